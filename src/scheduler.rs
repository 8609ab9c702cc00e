//! Level-by-level execution of planned batches with bounded concurrency

use async_trait::async_trait;
use futures_util::future::join_all;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::reference::resolve_parameters;
use crate::traits::{EventSink, OrchestratorEvent};
use crate::types::{ExecutionOptions, ExecutionPlan, OperationCall, OperationResult};

/// Executes one call end to end: cache, approval, breaker, retries.
/// The orchestrator supplies the implementation; the scheduler only
/// decides when each call runs.
#[async_trait]
pub trait CallRunner: Send + Sync {
    async fn run_call(
        &self,
        call: OperationCall,
        dependency_results: HashMap<String, Value>,
    ) -> OperationResult;
}

/// Runs an execution plan level by level.
///
/// A level only starts once the previous one has fully completed. Within a
/// level, calls are dispatched in chunks of at most `max_concurrency`; the
/// cancellation token is checked before every level and every chunk, and
/// in-flight calls always run to completion.
#[derive(Debug, Default)]
pub struct ParallelScheduler;

impl ParallelScheduler {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(
        &self,
        batch_id: Uuid,
        plan: &ExecutionPlan,
        calls: &IndexMap<String, OperationCall>,
        runner: Arc<dyn CallRunner>,
        options: &ExecutionOptions,
        cancel: &CancellationToken,
        events: &Arc<dyn EventSink>,
    ) -> IndexMap<String, OperationResult> {
        let mut results: IndexMap<String, OperationResult> =
            IndexMap::with_capacity(plan.call_count());
        let mut completed_outputs: HashMap<String, Value> = HashMap::new();
        let mut not_succeeded: HashSet<String> = HashSet::new();
        let mut abort = false;
        let mut cancelled = false;

        // Sequential mode degrades every call to its own single-entry level.
        let levels: Vec<Vec<String>> = if options.parallel {
            plan.levels.clone()
        } else {
            plan.sequential_order
                .iter()
                .map(|id| vec![id.clone()])
                .collect()
        };

        'levels: for (level_index, level) in levels.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            if options.parallel {
                emit(
                    events,
                    OrchestratorEvent::LevelStarted {
                        batch_id,
                        level: level_index,
                        calls: level.len(),
                    },
                )
                .await;
            }

            let chunk_size = options.max_concurrency.max(1);
            for chunk in level.chunks(chunk_size) {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break 'levels;
                }

                let mut futures = Vec::new();
                for id in chunk {
                    let call = match calls.get(id) {
                        Some(call) => call.clone(),
                        None => continue,
                    };

                    if abort {
                        not_succeeded.insert(id.clone());
                        results.insert(
                            id.clone(),
                            OperationResult::skipped(
                                id,
                                &call.operation,
                                "skipped after earlier failure (fail-fast)",
                            ),
                        );
                        continue;
                    }

                    // A dependent of a failed call fails terminally, the
                    // same way an unresolved output reference does; it is
                    // never dispatched.
                    if let Some(failed_dep) = call
                        .depends_on
                        .iter()
                        .find(|dep| not_succeeded.contains(*dep))
                    {
                        not_succeeded.insert(id.clone());
                        let error = OrchestratorError::unresolved_reference(
                            id,
                            format!("${{{}}}", failed_dep),
                            format!("dependency '{}' did not succeed", failed_dep),
                        );
                        results.insert(
                            id.clone(),
                            OperationResult::failure(id, &call.operation, &error)
                                .with_attempts(0),
                        );
                        continue;
                    }

                    match resolve_parameters(id, &call.parameters, &completed_outputs) {
                        Ok(resolved) => {
                            let mut call = call;
                            call.parameters = resolved;
                            let dependency_results: HashMap<String, Value> = call
                                .depends_on
                                .iter()
                                .filter_map(|dep| {
                                    completed_outputs
                                        .get(dep)
                                        .map(|value| (dep.clone(), value.clone()))
                                })
                                .collect();
                            let runner = Arc::clone(&runner);
                            futures
                                .push(async move { runner.run_call(call, dependency_results).await });
                        }
                        Err(error) => {
                            tracing::warn!(call_id = %id, %error, "parameter resolution failed");
                            not_succeeded.insert(id.clone());
                            if options.fail_fast {
                                abort = true;
                            }
                            results.insert(
                                id.clone(),
                                OperationResult::failure(id, &call.operation, &error)
                                    .with_attempts(0),
                            );
                        }
                    }
                }

                for result in join_all(futures).await {
                    if result.is_success() {
                        completed_outputs.insert(
                            result.call_id.clone(),
                            result.output.clone().unwrap_or(Value::Null),
                        );
                    } else {
                        not_succeeded.insert(result.call_id.clone());
                        if options.fail_fast {
                            abort = true;
                        }
                    }
                    results.insert(result.call_id.clone(), result);
                }
            }
        }

        if cancelled {
            for id in &plan.sequential_order {
                if !results.contains_key(id) {
                    let operation = calls
                        .get(id)
                        .map(|call| call.operation.clone())
                        .unwrap_or_default();
                    results.insert(id.clone(), OperationResult::cancelled(id, operation));
                }
            }
        }

        results
    }
}

async fn emit(events: &Arc<dyn EventSink>, event: OrchestratorEvent) {
    if let Err(error) = events.emit(event).await {
        tracing::warn!(%error, "event sink failure");
    }
}
