//! Core traits connecting the orchestrator to consumer-supplied operations

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::types::CallStatus;

/// Per-attempt context handed to an operation executor
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Id of the call being executed
    pub call_id: String,

    /// Id of the batch the call belongs to
    pub batch_id: Uuid,

    /// Attempt number, starting at 1
    pub attempt: u32,

    /// Outputs of the call's direct dependencies, keyed by call id
    pub dependency_results: HashMap<String, Value>,
}

impl ExecutionContext {
    /// Output of a dependency call, if it succeeded.
    pub fn dependency_output(&self, call_id: &str) -> Option<&Value> {
        self.dependency_results.get(call_id)
    }
}

/// Trait implemented by the operations the orchestrator runs
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    /// Execute the operation with fully resolved parameters
    async fn execute(&self, parameters: Value, context: &ExecutionContext) -> Result<Value>;
}

/// Events emitted during batch execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrchestratorEvent {
    /// A batch started executing
    BatchStarted {
        batch_id: Uuid,
        total_calls: usize,
        levels: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A batch finished, successfully or not
    BatchCompleted {
        batch_id: Uuid,
        success: bool,
        duration_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A level of independent calls is about to be dispatched
    LevelStarted {
        batch_id: Uuid,
        level: usize,
        calls: usize,
    },

    /// An attempt of a call started
    CallStarted {
        batch_id: Uuid,
        call_id: String,
        operation: String,
        attempt: u32,
    },

    /// A call reached a terminal status
    CallCompleted {
        batch_id: Uuid,
        call_id: String,
        operation: String,
        status: CallStatus,
        duration_ms: u64,
    },

    /// A call was served from the result cache
    CallCacheHit {
        batch_id: Uuid,
        call_id: String,
        operation: String,
    },

    /// A call was denied by the approval gate
    CallDenied {
        batch_id: Uuid,
        call_id: String,
        operation: String,
    },

    /// A failed attempt will be retried after a delay
    CallRetrying {
        batch_id: Uuid,
        call_id: String,
        operation: String,
        attempt: u32,
        delay_ms: u64,
    },

    /// The circuit breaker for an operation opened
    BreakerOpened { operation: String },

    /// The circuit breaker for an operation closed again
    BreakerClosed { operation: String },
}

/// Trait for delivering orchestrator events to external systems
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver a single event
    async fn emit(&self, event: OrchestratorEvent) -> Result<()>;
}

/// Event sink that discards everything
#[derive(Debug, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn emit(&self, _event: OrchestratorEvent) -> Result<()> {
        Ok(())
    }
}

/// Event sink that forwards events to `tracing`
#[derive(Debug, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: OrchestratorEvent) -> Result<()> {
        match &event {
            OrchestratorEvent::BatchStarted {
                batch_id,
                total_calls,
                levels,
                ..
            } => {
                tracing::info!(%batch_id, total_calls, levels, "batch started");
            }
            OrchestratorEvent::BatchCompleted {
                batch_id,
                success,
                duration_ms,
                ..
            } => {
                tracing::info!(%batch_id, success, duration_ms, "batch completed");
            }
            OrchestratorEvent::LevelStarted {
                batch_id,
                level,
                calls,
            } => {
                tracing::debug!(%batch_id, level, calls, "level started");
            }
            OrchestratorEvent::CallStarted {
                batch_id,
                call_id,
                operation,
                attempt,
            } => {
                tracing::debug!(%batch_id, %call_id, %operation, attempt, "call started");
            }
            OrchestratorEvent::CallCompleted {
                batch_id,
                call_id,
                operation,
                status,
                duration_ms,
            } => {
                tracing::debug!(
                    %batch_id, %call_id, %operation, ?status, duration_ms,
                    "call completed"
                );
            }
            OrchestratorEvent::CallCacheHit {
                batch_id,
                call_id,
                operation,
            } => {
                tracing::debug!(%batch_id, %call_id, %operation, "cache hit");
            }
            OrchestratorEvent::CallDenied {
                batch_id,
                call_id,
                operation,
            } => {
                tracing::warn!(%batch_id, %call_id, %operation, "call denied");
            }
            OrchestratorEvent::CallRetrying {
                batch_id,
                call_id,
                operation,
                attempt,
                delay_ms,
            } => {
                tracing::warn!(
                    %batch_id, %call_id, %operation, attempt, delay_ms,
                    "retrying call"
                );
            }
            OrchestratorEvent::BreakerOpened { operation } => {
                tracing::warn!(%operation, "circuit breaker opened");
            }
            OrchestratorEvent::BreakerClosed { operation } => {
                tracing::info!(%operation, "circuit breaker closed");
            }
        }
        Ok(())
    }
}
