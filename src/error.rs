//! Error types for the tool orchestrator

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Errors that can occur during batch orchestration
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Unknown operation: {name}")]
    UnknownOperation { name: String },

    #[error("Operation already registered: {name}")]
    DuplicateOperation { name: String },

    #[error("Operation '{operation}' depends on unregistered operation '{dependency}'")]
    UnregisteredDependency { operation: String, dependency: String },

    #[error("Duplicate call id in batch: {id}")]
    DuplicateCallId { id: String },

    #[error("Call '{id}' depends on unknown call '{dependency}'")]
    UnknownDependency { id: String, dependency: String },

    #[error("Circular dependency: {path}")]
    CircularDependency { path: String },

    #[error("Unresolved reference '{reference}' in call '{call_id}': {reason}")]
    UnresolvedReference {
        call_id: String,
        reference: String,
        reason: String,
    },

    #[error("Approval denied for operation '{operation}'")]
    ApprovalDenied { operation: String },

    #[error("Operation '{operation}' requires approval but no approval handler is configured")]
    NoApprovalHandler { operation: String },

    #[error("Circuit breaker open for operation '{operation}'")]
    CircuitOpen { operation: String },

    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout { operation: String, duration: Duration },

    #[error("Execution failed: {message}")]
    Execution { message: String },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl OrchestratorError {
    pub fn unknown_operation(name: impl Into<String>) -> Self {
        Self::UnknownOperation { name: name.into() }
    }

    pub fn duplicate_operation(name: impl Into<String>) -> Self {
        Self::DuplicateOperation { name: name.into() }
    }

    pub fn unregistered_dependency(
        operation: impl Into<String>,
        dependency: impl Into<String>,
    ) -> Self {
        Self::UnregisteredDependency {
            operation: operation.into(),
            dependency: dependency.into(),
        }
    }

    pub fn duplicate_call_id(id: impl Into<String>) -> Self {
        Self::DuplicateCallId { id: id.into() }
    }

    pub fn unknown_dependency(id: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::UnknownDependency {
            id: id.into(),
            dependency: dependency.into(),
        }
    }

    /// Builds a cycle error from the node path, e.g. `["a", "b", "a"]`
    /// renders as `a -> b -> a`.
    pub fn cycle(path: &[String]) -> Self {
        Self::CircularDependency {
            path: path.join(" -> "),
        }
    }

    pub fn unresolved_reference(
        call_id: impl Into<String>,
        reference: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnresolvedReference {
            call_id: call_id.into(),
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub fn approval_denied(operation: impl Into<String>) -> Self {
        Self::ApprovalDenied {
            operation: operation.into(),
        }
    }

    pub fn circuit_open(operation: impl Into<String>) -> Self {
        Self::CircuitOpen {
            operation: operation.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Category used for retry decisions and result reporting. Variants with
    /// a fixed meaning map directly; free-form execution failures are
    /// classified from their message text.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::UnknownOperation { .. }
            | Self::UnknownDependency { .. }
            | Self::UnregisteredDependency { .. } => ErrorCategory::NotFound,
            Self::ApprovalDenied { .. } | Self::NoApprovalHandler { .. } => {
                ErrorCategory::Permission
            }
            Self::DuplicateOperation { .. }
            | Self::DuplicateCallId { .. }
            | Self::CircularDependency { .. }
            | Self::UnresolvedReference { .. }
            | Self::Configuration { .. }
            | Self::Serialization { .. } => ErrorCategory::Validation,
            Self::Execution { message } => ErrorCategory::classify(message),
            Self::CircuitOpen { .. } | Self::Cancelled => ErrorCategory::Unknown,
        }
    }

    /// Whether a failed attempt with this error may be retried.
    /// `retry_unknown` controls the policy for unclassified failures.
    pub fn is_retryable(&self, retry_unknown: bool) -> bool {
        // A rejected or cancelled call must fail fast, whatever its category.
        if matches!(self, Self::CircuitOpen { .. } | Self::Cancelled) {
            return false;
        }
        self.category().is_retryable(retry_unknown)
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for OrchestratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Execution {
                message: format!("request timed out: {}", err),
            }
        } else if err.is_connect() {
            Self::Execution {
                message: format!("connection failed: {}", err),
            }
        } else {
            Self::Execution {
                message: format!("request failed: {}", err),
            }
        }
    }
}

/// Failure categories recognized by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Network,
    Validation,
    Permission,
    NotFound,
    Unknown,
}

impl ErrorCategory {
    /// Classifies a free-form error message by keyword matching.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline") {
            Self::Timeout
        } else if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("dns")
            || lower.contains("unreachable")
            || lower.contains("broken pipe")
        {
            Self::Network
        } else if lower.contains("permission")
            || lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("access denied")
        {
            Self::Permission
        } else if lower.contains("invalid")
            || lower.contains("malformed")
            || lower.contains("parameter")
            || lower.contains("argument")
            || lower.contains("schema")
        {
            Self::Validation
        } else if lower.contains("not found")
            || lower.contains("no such")
            || lower.contains("does not exist")
        {
            Self::NotFound
        } else {
            Self::Unknown
        }
    }

    pub fn is_retryable(&self, retry_unknown: bool) -> bool {
        match self {
            Self::Timeout | Self::Network => true,
            Self::Validation | Self::Permission | Self::NotFound => false,
            Self::Unknown => retry_unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Validation => "validation",
            Self::Permission => "permission",
            Self::NotFound => "not_found",
            Self::Unknown => "unknown",
        }
    }
}

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;
