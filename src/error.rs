//! Error types for the workflow engine.

use thiserror::Error;

/// Result type alias for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Main error type for the workflow engine.
#[derive(Error, Debug, Clone)]
pub enum WorkflowError {
    /// Workflow or state not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid workflow definition (missing initial state, dangling transition target, etc).
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// A state's configured timeout elapsed before `execute` produced a result.
    #[error("state '{state}' timed out after {elapsed_ms}ms (configured {configured_ms}ms)")]
    StateTimeout {
        state: String,
        configured_ms: u64,
        elapsed_ms: u64,
    },

    /// A state's `execute` returned an error.
    #[error("state '{state}' execution failed: {reason}")]
    StateExecutionFailed { state: String, reason: String },

    /// Retry attempts exhausted under a configured retry policy.
    #[error("retry attempts exhausted after {attempts} attempt(s): {original}")]
    RetryExhausted {
        original: String,
        attempts: u32,
        policy: String,
    },

    /// A `goto`/resume target is not reachable from the current state per the
    /// workflow's transition table, or a workflow status transition is illegal.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Group lock could not be acquired for the requesting execution.
    #[error("group lock unavailable: {0}")]
    LockUnavailable(String),

    /// The persistence adapter reported a failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// The lock adapter reported a failure (distinct from a denied acquisition).
    #[error("lock adapter error: {0}")]
    LockAdapterError(String),

    /// The configured error handler itself threw.
    #[error("error handler failed: {0}")]
    HandlerError(String),

    /// A throttle/sequential group, or some other bounded resource, is exhausted.
    #[error("resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),

    /// Execution was cancelled.
    #[error("workflow execution cancelled: {0}")]
    Cancelled(String),

    /// Catch-all for invariant violations that should never surface to callers.
    #[error("internal workflow engine error: {0}")]
    Internal(String),
}

impl WorkflowError {
    /// Returns true if the error is eligible for retry under a state's retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkflowError::StateExecutionFailed { .. }
                | WorkflowError::StateTimeout { .. }
                | WorkflowError::PersistenceError(_)
                | WorkflowError::LockAdapterError(_)
                | WorkflowError::Internal(_)
        )
    }

    /// Returns true if the error is fatal and should never be retried, regardless
    /// of policy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WorkflowError::InvalidDefinition(_)
                | WorkflowError::RetryExhausted { .. }
                | WorkflowError::InvalidStateTransition { .. }
        )
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        WorkflowError::Internal(err.to_string())
    }
}
