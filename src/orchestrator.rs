//! The orchestrator: plans batches, runs calls through the full pipeline,
//! and aggregates results
//!
//! Each call passes through the same stations in order: result cache,
//! approval gate, circuit breaker, then the retry loop around the executor.
//! The scheduler decides when a call runs; this module decides what running
//! a call means.

use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::approval::{ApprovalGate, ApprovalHandler, ApprovalRequest};
use crate::breaker::{BreakerRegistry, CircuitState};
use crate::cache::{CacheStats, ResultCache};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::planner::ExecutionPlanner;
use crate::registry::OperationRegistry;
use crate::retry::RetryPolicy;
use crate::scheduler::{CallRunner, ParallelScheduler};
use crate::traits::{EventSink, ExecutionContext, NoopEventSink, OperationExecutor, OrchestratorEvent};
use crate::types::{
    ExecutionMetadata, ExecutionOptions, ExecutionSummary, OperationCall, OperationDefinition,
    OperationResult,
};

/// Counters accumulated across the orchestrator's lifetime
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorMetrics {
    pub batches_executed: u64,

    /// Calls that reached an executor (cached and skipped calls excluded)
    pub calls_executed: u64,

    /// Calls that ended in `Succeeded`, including cache hits
    pub calls_succeeded: u64,

    /// Calls that ended in `Failed`, `Denied`, or `TimedOut`
    pub calls_failed: u64,

    pub cache_hits: u64,
    pub retries_performed: u64,

    /// Calls rejected by an open circuit breaker
    pub breaker_rejections: u64,

    pub average_batch_duration_ms: f64,
}

/// Dependency-aware executor of operation batches.
///
/// Operations are registered once with their definitions; batches of calls
/// are then planned into dependency levels and executed with bounded
/// concurrency. See the crate docs for a usage example.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<OperationRegistry>,
    planner: ExecutionPlanner,
    scheduler: ParallelScheduler,
    cache: Arc<ResultCache>,
    approval: Arc<ApprovalGate>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryPolicy,
    events: Arc<dyn EventSink>,
    cancel: Mutex<CancellationToken>,
    metrics: Arc<RwLock<OrchestratorMetrics>>,
}

impl Orchestrator {
    /// Creates an orchestrator from a validated configuration.
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        config.validate().map_err(OrchestratorError::configuration)?;

        Ok(Self {
            registry: Arc::new(OperationRegistry::new()),
            planner: ExecutionPlanner::new(),
            scheduler: ParallelScheduler::new(),
            cache: Arc::new(ResultCache::new(&config.cache)),
            approval: Arc::new(ApprovalGate::new(None)),
            breakers: Arc::new(BreakerRegistry::new(config.circuit_breaker.clone())),
            retry: RetryPolicy::new(config.retry.clone()),
            events: Arc::new(NoopEventSink),
            cancel: Mutex::new(CancellationToken::new()),
            metrics: Arc::new(RwLock::new(OrchestratorMetrics::default())),
            config,
        })
    }

    /// Installs the handler consulted for operations that require approval.
    /// Without one, such operations are denied.
    pub fn with_approval_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval = Arc::new(ApprovalGate::new(Some(handler)));
        self
    }

    /// Replaces the event sink. The default discards all events.
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Registers an operation so batches can call it.
    pub async fn register(
        &self,
        definition: OperationDefinition,
        executor: Arc<dyn OperationExecutor>,
    ) -> Result<()> {
        self.registry.register(definition, executor).await
    }

    /// The operation registry, for lookups beyond registration.
    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Batch options derived from the scheduler configuration.
    pub fn default_options(&self) -> ExecutionOptions {
        ExecutionOptions::from_config(&self.config.scheduler)
    }

    /// Executes a batch of calls and returns the aggregated summary.
    ///
    /// Fails up front (before anything runs) when a call names an
    /// unregistered operation, when call ids collide, or when the
    /// dependency graph contains a cycle. Failures of individual calls do
    /// not fail the batch; they are reported in the summary.
    pub async fn execute_batch(
        &self,
        calls: Vec<OperationCall>,
        options: ExecutionOptions,
    ) -> Result<ExecutionSummary> {
        let batch_id = Uuid::new_v4();
        let begin = Instant::now();

        if calls.is_empty() {
            return Ok(ExecutionSummary {
                success: true,
                results: Vec::new(),
                metadata: ExecutionMetadata {
                    batch_id,
                    total_calls: 0,
                    success_count: 0,
                    failure_count: 0,
                    skipped_count: 0,
                    cache_hits: 0,
                    parallel_levels: 0,
                    duration: Duration::ZERO,
                },
            });
        }

        for call in &calls {
            if !self.registry.contains(&call.operation).await {
                return Err(OrchestratorError::unknown_operation(&call.operation));
            }
        }

        let plan = self.planner.plan(&calls)?;
        tracing::info!(
            %batch_id,
            calls = calls.len(),
            levels = plan.level_count(),
            max_parallelism = plan.max_parallelism,
            "executing batch"
        );

        // A fresh token per batch: cancelling one batch must not poison
        // the next.
        let cancel = {
            let mut guard = self.cancel.lock().await;
            *guard = CancellationToken::new();
            guard.clone()
        };

        self.emit(OrchestratorEvent::BatchStarted {
            batch_id,
            total_calls: calls.len(),
            levels: plan.level_count(),
            timestamp: Utc::now(),
        })
        .await;

        let call_map: IndexMap<String, OperationCall> =
            calls.into_iter().map(|call| (call.id.clone(), call)).collect();

        let pipeline: Arc<dyn CallRunner> = Arc::new(CallPipeline {
            batch_id,
            cache_enabled: options.use_cache && self.config.cache.enabled,
            options: options.clone(),
            registry: Arc::clone(&self.registry),
            cache: Arc::clone(&self.cache),
            approval: Arc::clone(&self.approval),
            breakers: Arc::clone(&self.breakers),
            retry: self.retry.clone(),
            events: Arc::clone(&self.events),
            metrics: Arc::clone(&self.metrics),
            cancel: cancel.clone(),
        });

        let mut raw = self
            .scheduler
            .execute(
                batch_id,
                &plan,
                &call_map,
                pipeline,
                &options,
                &cancel,
                &self.events,
            )
            .await;

        // Summary results follow batch submission order. The scheduler
        // guarantees one result per planned call; the fallback never fires
        // in practice but keeps this total.
        let mut results = Vec::with_capacity(call_map.len());
        for (id, call) in &call_map {
            let result = raw.shift_remove(id).unwrap_or_else(|| {
                OperationResult::skipped(id, &call.operation, "no result recorded")
            });
            results.push(result);
        }

        let success_count = results.iter().filter(|r| r.is_success()).count();
        let failure_count = results.iter().filter(|r| r.status.is_failure()).count();
        let skipped_count = results.len() - success_count - failure_count;
        let cache_hits = results.iter().filter(|r| r.from_cache).count();
        let success = success_count == results.len();
        let duration = begin.elapsed();

        self.update_metrics(&results, success_count, failure_count, duration)
            .await;

        self.emit(OrchestratorEvent::BatchCompleted {
            batch_id,
            success,
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
        })
        .await;

        tracing::info!(
            %batch_id,
            success,
            success_count,
            failure_count,
            skipped_count,
            duration_ms = duration.as_millis() as u64,
            "batch finished"
        );

        Ok(ExecutionSummary {
            success,
            metadata: ExecutionMetadata {
                batch_id,
                total_calls: results.len(),
                success_count,
                failure_count,
                skipped_count,
                cache_hits,
                parallel_levels: plan.level_count(),
                duration,
            },
            results,
        })
    }

    /// Cancels the batch currently executing, if any. Calls that have not
    /// started are reported as `Cancelled`; in-flight calls finish.
    pub async fn cancel(&self) {
        let guard = self.cancel.lock().await;
        guard.cancel();
        tracing::info!("batch cancellation requested");
    }

    /// Token tied to the current (or next) batch, for composing with
    /// external shutdown logic.
    pub async fn cancellation_token(&self) -> CancellationToken {
        self.cancel.lock().await.clone()
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn invalidate_cache(&self, operation: &str, parameters: &Value) -> bool {
        self.cache.invalidate(operation, parameters).await
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await
    }

    /// Current circuit breaker state per operation.
    pub fn breaker_states(&self) -> HashMap<String, CircuitState> {
        self.breakers.states()
    }

    pub fn reset_breakers(&self) {
        self.breakers.reset()
    }

    /// Forgets remembered always-approve / always-deny decisions.
    pub async fn reset_approvals(&self) {
        self.approval.reset().await
    }

    pub async fn metrics(&self) -> OrchestratorMetrics {
        self.metrics.read().await.clone()
    }

    async fn update_metrics(
        &self,
        results: &[OperationResult],
        success_count: usize,
        failure_count: usize,
        duration: Duration,
    ) {
        let executed = results.iter().filter(|r| r.attempts > 0).count() as u64;
        let retries: u64 = results
            .iter()
            .map(|r| u64::from(r.attempts.saturating_sub(1)))
            .sum();

        let mut metrics = self.metrics.write().await;
        metrics.batches_executed += 1;
        metrics.calls_executed += executed;
        metrics.calls_succeeded += success_count as u64;
        metrics.calls_failed += failure_count as u64;
        metrics.retries_performed += retries;

        let batches = metrics.batches_executed as f64;
        let duration_ms = duration.as_millis() as f64;
        metrics.average_batch_duration_ms =
            (metrics.average_batch_duration_ms * (batches - 1.0) + duration_ms) / batches;
    }

    async fn emit(&self, event: OrchestratorEvent) {
        if let Err(error) = self.events.emit(event).await {
            tracing::warn!(%error, "event sink failure");
        }
    }
}

/// Per-batch call pipeline handed to the scheduler.
struct CallPipeline {
    batch_id: Uuid,
    cache_enabled: bool,
    options: ExecutionOptions,
    registry: Arc<OperationRegistry>,
    cache: Arc<ResultCache>,
    approval: Arc<ApprovalGate>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryPolicy,
    events: Arc<dyn EventSink>,
    metrics: Arc<RwLock<OrchestratorMetrics>>,
    cancel: CancellationToken,
}

#[async_trait::async_trait]
impl CallRunner for CallPipeline {
    async fn run_call(
        &self,
        call: OperationCall,
        dependency_results: HashMap<String, Value>,
    ) -> OperationResult {
        let registered = match self.registry.get(&call.operation).await {
            Some(registered) => registered,
            // Registration was checked before planning; a miss here means
            // the operation was unregistered mid-batch.
            None => {
                return OperationResult::failure(
                    &call.id,
                    &call.operation,
                    &OrchestratorError::unknown_operation(&call.operation),
                )
                .with_attempts(0);
            }
        };
        let definition = registered.definition;

        if self.cache_enabled && definition.cacheable {
            if let Some(output) = self.cache.get(&call.operation, &call.parameters).await {
                self.emit(OrchestratorEvent::CallCacheHit {
                    batch_id: self.batch_id,
                    call_id: call.id.clone(),
                    operation: call.operation.clone(),
                })
                .await;
                self.metrics.write().await.cache_hits += 1;
                return OperationResult::success(&call.id, &call.operation, output).mark_cached();
            }
        }

        if definition.requires_approval {
            let request = ApprovalRequest {
                call_id: call.id.clone(),
                operation: call.operation.clone(),
                parameters: call.parameters.clone(),
                description: definition.description.clone(),
            };
            if let Err(error) = self.approval.check(&request).await {
                self.emit(OrchestratorEvent::CallDenied {
                    batch_id: self.batch_id,
                    call_id: call.id.clone(),
                    operation: call.operation.clone(),
                })
                .await;
                return OperationResult::failure(&call.id, &call.operation, &error)
                    .with_attempts(0);
            }
        }

        // One breaker decision per call; retries within the call do not
        // re-consult it.
        if !self.breakers.allows_request(&call.operation) {
            self.metrics.write().await.breaker_rejections += 1;
            return OperationResult::failure(
                &call.id,
                &call.operation,
                &OrchestratorError::circuit_open(&call.operation),
            )
            .with_attempts(0);
        }

        let started_at = Utc::now();
        let begin = Instant::now();
        let timeout = definition.timeout.or(self.options.timeout);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let context = ExecutionContext {
                call_id: call.id.clone(),
                batch_id: self.batch_id,
                attempt,
                dependency_results: dependency_results.clone(),
            };

            self.emit(OrchestratorEvent::CallStarted {
                batch_id: self.batch_id,
                call_id: call.id.clone(),
                operation: call.operation.clone(),
                attempt,
            })
            .await;

            let outcome = match timeout {
                Some(limit) => {
                    match tokio::time::timeout(
                        limit,
                        registered.executor.execute(call.parameters.clone(), &context),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(OrchestratorError::timeout(&call.operation, limit)),
                    }
                }
                None => {
                    registered
                        .executor
                        .execute(call.parameters.clone(), &context)
                        .await
                }
            };

            match outcome {
                Ok(output) => {
                    if let Some(CircuitState::Closed) = self.breakers.record_success(&call.operation)
                    {
                        self.emit(OrchestratorEvent::BreakerClosed {
                            operation: call.operation.clone(),
                        })
                        .await;
                    }

                    if self.cache_enabled && definition.cacheable {
                        self.cache
                            .put(&call.operation, &call.parameters, &output, definition.cache_ttl)
                            .await;
                    }

                    let result = OperationResult::success(&call.id, &call.operation, output)
                        .with_attempts(attempt)
                        .with_timing(started_at, begin.elapsed());
                    self.emit_completed(&result).await;
                    return result;
                }
                Err(error) => {
                    // Cancellation suppresses further retries; the
                    // attempt's own error stands as the terminal result.
                    if self.retry.should_retry(&error, attempt, definition.retryable)
                        && !self.cancel.is_cancelled()
                    {
                        let delay = self.retry.delay_before(attempt + 1);
                        tracing::debug!(
                            call_id = %call.id,
                            operation = %call.operation,
                            attempt,
                            %error,
                            delay_ms = delay.as_millis() as u64,
                            "attempt failed, retrying"
                        );
                        self.emit(OrchestratorEvent::CallRetrying {
                            batch_id: self.batch_id,
                            call_id: call.id.clone(),
                            operation: call.operation.clone(),
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                        })
                        .await;
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if let Some(CircuitState::Open) = self.breakers.record_failure(&call.operation)
                    {
                        self.emit(OrchestratorEvent::BreakerOpened {
                            operation: call.operation.clone(),
                        })
                        .await;
                    }

                    tracing::error!(
                        call_id = %call.id,
                        operation = %call.operation,
                        attempt,
                        %error,
                        "call failed"
                    );
                    let result = OperationResult::failure(&call.id, &call.operation, &error)
                        .with_attempts(attempt)
                        .with_timing(started_at, begin.elapsed());
                    self.emit_completed(&result).await;
                    return result;
                }
            }
        }
    }
}

impl CallPipeline {
    async fn emit_completed(&self, result: &OperationResult) {
        self.emit(OrchestratorEvent::CallCompleted {
            batch_id: self.batch_id,
            call_id: result.call_id.clone(),
            operation: result.operation.clone(),
            status: result.status,
            duration_ms: result.duration.as_millis() as u64,
        })
        .await;
    }

    async fn emit(&self, event: OrchestratorEvent) {
        if let Err(error) = self.events.emit(event).await {
            tracing::warn!(%error, "event sink failure");
        }
    }
}
