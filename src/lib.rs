//! # Tool Orchestrator
//!
//! A dependency-aware execution engine for batches of tool calls, built for
//! AI agents that issue many interdependent operations at once.
//!
//! This crate provides:
//! - Dependency resolution with cycle detection and leveled planning
//! - Parallel execution with bounded concurrency and fail-fast support
//! - `${call.path}` references that splice earlier outputs into parameters
//! - Result caching keyed by operation and canonical parameters
//! - Approval gating with remembered always-approve / always-deny decisions
//! - Retries with exponential backoff and per-operation circuit breakers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tool_orchestrator::{
//!     ExecutionOptions, OperationCall, OperationDefinition, Orchestrator, OrchestratorConfig,
//! };
//! use std::sync::Arc;
//!
//! struct SearchExecutor;
//!
//! #[async_trait::async_trait]
//! impl tool_orchestrator::OperationExecutor for SearchExecutor {
//!     async fn execute(
//!         &self,
//!         parameters: serde_json::Value,
//!         _context: &tool_orchestrator::ExecutionContext,
//!     ) -> tool_orchestrator::Result<serde_json::Value> {
//!         Ok(serde_json::json!({"hits": ["a.rs", "b.rs"], "query": parameters["query"]}))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::new(OrchestratorConfig::default())?;
//!     orchestrator
//!         .register(
//!             OperationDefinition::new("search", "Search the code index"),
//!             Arc::new(SearchExecutor),
//!         )
//!         .await?;
//!
//!     let calls = vec![
//!         OperationCall::new("a", "search")
//!             .with_parameters(serde_json::json!({"query": "async fn"})),
//!         OperationCall::new("b", "search")
//!             .with_parameters(serde_json::json!({"query": "${a.hits[0]}"}))
//!             .with_dependency("a"),
//!     ];
//!
//!     let summary = orchestrator
//!         .execute_batch(calls, ExecutionOptions::default())
//!         .await?;
//!     println!("success: {}", summary.success);
//!     Ok(())
//! }
//! ```

pub mod approval;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod reference;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod traits;
pub mod types;

// Re-export main types for convenience
pub use approval::{ApprovalDecision, ApprovalGate, ApprovalHandler, ApprovalRequest};
pub use breaker::{BreakerRegistry, CircuitBreaker, CircuitState};
pub use cache::{CacheStats, ResultCache};
pub use config::{CacheConfig, CircuitBreakerConfig, OrchestratorConfig, RetryConfig, SchedulerConfig};
pub use error::{ErrorCategory, OrchestratorError, Result};
pub use orchestrator::{Orchestrator, OrchestratorMetrics};
pub use planner::{DependencyGraph, ExecutionPlanner};
pub use reference::resolve_parameters;
pub use registry::{OperationRegistry, RegisteredOperation};
pub use retry::RetryPolicy;
pub use scheduler::{CallRunner, ParallelScheduler};
pub use traits::{
    EventSink, ExecutionContext, NoopEventSink, OperationExecutor, OrchestratorEvent,
    TracingEventSink,
};
pub use types::{
    CallStatus, ExecutionMetadata, ExecutionOptions, ExecutionPlan, ExecutionSummary,
    OperationCall, OperationDefinition, OperationResult,
};
