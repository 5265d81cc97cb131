//! External-interface traits the core consumes but never implements for
//! production use: persistence, distributed locking, and logging.

use crate::error::WorkflowResult;
use crate::state::{WorkflowExecution, WorkflowStatus};
use async_trait::async_trait;
use std::time::Duration;

/// Optional filter passed to `PersistenceAdapter::find`.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub workflow_name: Option<String>,
    pub status: Option<WorkflowStatus>,
}

impl ExecutionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workflow_name(mut self, name: impl Into<String>) -> Self {
        self.workflow_name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Durable storage for workflow executions. The core treats "last write
/// equals last-known-good" and calls `save`/`update` after every transition,
/// suspension, completion, and terminal failure.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn save(&self, execution: &WorkflowExecution) -> WorkflowResult<()>;
    async fn update(&self, id: &str, execution: &WorkflowExecution) -> WorkflowResult<()>;
    async fn load(&self, id: &str) -> WorkflowResult<Option<WorkflowExecution>>;
    async fn find(&self, filter: ExecutionFilter) -> WorkflowResult<Vec<WorkflowExecution>>;
}

/// Distributed mutual exclusion for `SEQUENTIAL` concurrency groups. The
/// in-memory concurrency manager treats this as the source of truth; its own
/// state is a reentrancy cache layered on top.
#[async_trait]
pub trait LockAdapter: Send + Sync {
    async fn acquire(&self, key: &str, holder: &str) -> WorkflowResult<bool>;
    async fn release(&self, key: &str) -> WorkflowResult<()>;
    async fn is_locked(&self, key: &str) -> WorkflowResult<bool>;
    async fn extend(&self, key: &str, ttl: Duration) -> WorkflowResult<bool>;
}

/// Pluggable sink for engine log output. Logging is never load-bearing: no
/// decision the engine makes depends on a `Logger` call succeeding or even
/// being observed.
pub trait Logger: Send + Sync {
    fn log(&self, message: &str);
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str, err: Option<&crate::error::WorkflowError>);
    fn error(&self, message: &str, err: Option<&crate::error::WorkflowError>);
}

/// Default `Logger` bridging onto `tracing`, so callers get structured logs
/// out of the box without the core depending on a concrete sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn debug(&self, message: &str) {
        tracing::debug!("{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warn(&self, message: &str, err: Option<&crate::error::WorkflowError>) {
        match err {
            Some(e) => tracing::warn!(error = %e, "{}", message),
            None => tracing::warn!("{}", message),
        }
    }

    fn error(&self, message: &str, err: Option<&crate::error::WorkflowError>) {
        match err {
            Some(e) => tracing::error!(error = %e, "{}", message),
            None => tracing::error!("{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_filter_builder() {
        let filter = ExecutionFilter::new()
            .with_workflow_name("onboarding")
            .with_status(WorkflowStatus::Running);
        assert_eq!(filter.workflow_name.as_deref(), Some("onboarding"));
        assert_eq!(filter.status, Some(WorkflowStatus::Running));
    }
}
