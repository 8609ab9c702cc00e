//! Data model for batch execution: calls, definitions, plans, results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{ErrorCategory, OrchestratorError};

fn default_parameters() -> Value {
    serde_json::json!({})
}

/// A single operation invocation within a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationCall {
    /// Caller-chosen id, unique within the batch
    pub id: String,

    /// Name of the registered operation to invoke
    pub operation: String,

    /// Arguments passed to the operation. String values may embed
    /// `${call.path}` references to outputs of earlier calls.
    #[serde(default = "default_parameters")]
    pub parameters: Value,

    /// Ids of calls that must succeed before this one runs
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl OperationCall {
    pub fn new(id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            operation: operation.into(),
            parameters: default_parameters(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_dependency(mut self, call_id: impl Into<String>) -> Self {
        self.depends_on.push(call_id.into());
        self
    }

    pub fn with_dependencies(mut self, call_ids: Vec<String>) -> Self {
        self.depends_on = call_ids;
        self
    }
}

/// Static description of an operation known to the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDefinition {
    /// Unique operation name
    pub name: String,

    /// Human-readable description, shown in approval prompts
    pub description: String,

    /// JSON schema of the accepted parameters
    pub parameters_schema: Value,

    /// Names of operations that must already be registered; checked at
    /// registration time, not per batch
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Whether each invocation must pass the approval gate
    pub requires_approval: bool,

    /// Whether failed attempts may be retried
    pub retryable: bool,

    /// Whether successful results may be cached
    pub cacheable: bool,

    /// Per-attempt timeout, overriding the batch-level setting
    pub timeout: Option<Duration>,

    /// Cache lifetime, overriding the configured default TTL
    pub cache_ttl: Option<Duration>,
}

impl OperationDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters_schema: default_parameters(),
            dependencies: Vec::new(),
            requires_approval: false,
            retryable: true,
            cacheable: true,
            timeout: None,
            cache_ttl: None,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.parameters_schema = schema;
        self
    }

    pub fn with_dependency(mut self, operation: impl Into<String>) -> Self {
        self.dependencies.push(operation.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn requiring_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn non_cacheable(mut self) -> Self {
        self.cacheable = false;
        self
    }
}

/// Terminal status of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    /// The call produced an output (possibly from cache)
    Succeeded,
    /// All attempts failed
    Failed,
    /// Not run because fail-fast aborted the batch after an earlier failure
    Skipped,
    /// Rejected by the approval gate
    Denied,
    /// The final attempt exceeded its timeout
    TimedOut,
    /// Not run because the batch was cancelled
    Cancelled,
}

impl CallStatus {
    /// Whether this status counts as a failure in summary accounting.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Denied | Self::TimedOut)
    }
}

/// Outcome of a single call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub call_id: String,
    pub operation: String,
    pub status: CallStatus,

    /// Output value when the call succeeded
    pub output: Option<Value>,

    /// Error message when it did not
    pub error: Option<String>,

    /// Category of the terminal error, when one applies
    pub error_category: Option<ErrorCategory>,

    /// Execution attempts made (0 for cached or never-started calls)
    pub attempts: u32,

    /// Wall-clock time spent on the call
    pub duration: Duration,

    /// Whether the output came from the result cache
    pub from_cache: bool,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl OperationResult {
    pub fn success(call_id: impl Into<String>, operation: impl Into<String>, output: Value) -> Self {
        let now = Utc::now();
        Self {
            call_id: call_id.into(),
            operation: operation.into(),
            status: CallStatus::Succeeded,
            output: Some(output),
            error: None,
            error_category: None,
            attempts: 1,
            duration: Duration::ZERO,
            from_cache: false,
            started_at: now,
            completed_at: now,
        }
    }

    /// Builds a failure result, deriving the status from the error kind.
    pub fn failure(
        call_id: impl Into<String>,
        operation: impl Into<String>,
        error: &OrchestratorError,
    ) -> Self {
        let status = match error {
            OrchestratorError::Timeout { .. } => CallStatus::TimedOut,
            OrchestratorError::ApprovalDenied { .. } | OrchestratorError::NoApprovalHandler { .. } => {
                CallStatus::Denied
            }
            OrchestratorError::Cancelled => CallStatus::Cancelled,
            _ => CallStatus::Failed,
        };
        let now = Utc::now();
        Self {
            call_id: call_id.into(),
            operation: operation.into(),
            status,
            output: None,
            error: Some(error.to_string()),
            error_category: Some(error.category()),
            attempts: 1,
            duration: Duration::ZERO,
            from_cache: false,
            started_at: now,
            completed_at: now,
        }
    }

    pub fn skipped(
        call_id: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            call_id: call_id.into(),
            operation: operation.into(),
            status: CallStatus::Skipped,
            output: None,
            error: Some(reason.into()),
            error_category: None,
            attempts: 0,
            duration: Duration::ZERO,
            from_cache: false,
            started_at: now,
            completed_at: now,
        }
    }

    pub fn cancelled(call_id: impl Into<String>, operation: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            call_id: call_id.into(),
            operation: operation.into(),
            status: CallStatus::Cancelled,
            output: None,
            error: Some("batch cancelled before the call started".to_string()),
            error_category: None,
            attempts: 0,
            duration: Duration::ZERO,
            from_cache: false,
            started_at: now,
            completed_at: now,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_timing(mut self, started_at: DateTime<Utc>, duration: Duration) -> Self {
        self.started_at = started_at;
        self.duration = duration;
        self.completed_at = Utc::now();
        self
    }

    /// Marks the result as served from cache. Cached results carry no
    /// execution attempts.
    pub fn mark_cached(mut self) -> Self {
        self.from_cache = true;
        self.attempts = 0;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == CallStatus::Succeeded
    }
}

/// Options controlling a single batch execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Maximum calls in flight at once within a level
    pub max_concurrency: usize,

    /// Skip all pending calls once any call fails
    pub fail_fast: bool,

    /// Whether the result cache participates in this batch
    pub use_cache: bool,

    /// Run independent calls in parallel (false = strict sequential order)
    pub parallel: bool,

    /// Per-attempt timeout for definitions that do not set their own
    pub timeout: Option<Duration>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            fail_fast: false,
            use_cache: true,
            parallel: true,
            timeout: None,
        }
    }
}

impl ExecutionOptions {
    /// Derives batch options from the scheduler configuration.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            fail_fast: config.fail_fast,
            use_cache: true,
            parallel: config.parallel,
            timeout: Some(config.default_timeout),
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Leveled execution order produced by the planner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Call ids grouped into dependency levels; every call's dependencies
    /// sit in strictly earlier levels
    pub levels: Vec<Vec<String>>,

    /// Size of the largest level
    pub max_parallelism: usize,

    /// Flattened level order for sequential execution
    pub sequential_order: Vec<String>,
}

impl ExecutionPlan {
    pub fn from_levels(levels: Vec<Vec<String>>) -> Self {
        let max_parallelism = levels.iter().map(Vec::len).max().unwrap_or(0);
        let sequential_order = levels.iter().flatten().cloned().collect();
        Self {
            levels,
            max_parallelism,
            sequential_order,
        }
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn call_count(&self) -> usize {
        self.sequential_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequential_order.is_empty()
    }
}

/// Batch-level counters attached to an execution summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub batch_id: Uuid,
    pub total_calls: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
    pub cache_hits: usize,
    pub parallel_levels: usize,
    pub duration: Duration,
}

/// Aggregated outcome of a batch execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// True only when every call succeeded; failed, denied, timed-out,
    /// skipped, and cancelled calls all clear it
    pub success: bool,

    /// Per-call results in batch submission order
    pub results: Vec<OperationResult>,

    pub metadata: ExecutionMetadata,
}

impl ExecutionSummary {
    pub fn result(&self, call_id: &str) -> Option<&OperationResult> {
        self.results.iter().find(|r| r.call_id == call_id)
    }

    pub fn output(&self, call_id: &str) -> Option<&Value> {
        self.result(call_id).and_then(|r| r.output.as_ref())
    }

    pub fn failed_calls(&self) -> Vec<&OperationResult> {
        self.results
            .iter()
            .filter(|r| r.status.is_failure())
            .collect()
    }
}
