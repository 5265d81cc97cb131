//! Error handler and plugin traits: the hooks a workflow definition attaches
//! to customize how failures and lifecycle events are handled.

use crate::error::{WorkflowError, WorkflowResult};
use crate::state::WorkflowContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The phase the engine was in when a hookable error occurred, passed to
/// `ErrorHandler::handle` so a single handler can branch on context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPhase {
    WorkflowStart,
    LockAcquisition,
    BeforeState,
    StateExecute,
    AfterState,
}

/// Decision returned by an error handler (or normalized from one) that the
/// retry engine and workflow executor act on. Bare handler decisions with no
/// attached state normalize to `target_state: None, output: None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Keep retrying (retry phase) or keep running (other phases).
    Continue,
    /// Stop advancing the workflow without failing it.
    Exit,
    /// Fail the workflow, persisting the failure.
    Fail,
    /// Fail the workflow without persisting (used when persistence itself
    /// is implicated in the failure).
    FailNoPersist,
    /// Jump directly to a named state, bypassing the normal transition table.
    TransitionTo,
    /// Abandon any further retries for this attempt and fall through to
    /// normal failure handling immediately.
    StopRetry,
}

/// Normalized result of consulting an `ErrorHandler`. Static-language
/// normalization of what, in a looser type system, might be a bare decision
/// or a decision-plus-payload union.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerOutcome {
    pub decision: Decision,
    pub target_state: Option<String>,
    pub output: Option<serde_json::Value>,
}

impl HandlerOutcome {
    pub fn bare(decision: Decision) -> Self {
        Self {
            decision,
            target_state: None,
            output: None,
        }
    }

    pub fn transition_to(target: impl Into<String>, output: Option<serde_json::Value>) -> Self {
        Self {
            decision: Decision::TransitionTo,
            target_state: Some(target.into()),
            output,
        }
    }
}

/// A user-supplied error handler consulted whenever a hookable error occurs.
/// If the handler itself throws, the caller falls back to `Decision::Fail`
/// during non-retry phases, or logs and continues retrying during the retry
/// phase — see the workflow executor and retry engine respectively.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(
        &self,
        phase: ErrorPhase,
        context: &WorkflowContext,
        error: &WorkflowError,
    ) -> Result<HandlerOutcome, WorkflowError>;
}

/// Cross-cutting hooks invoked around every state, in registration order.
/// All methods default to no-ops. `before_execute`/`after_execute` failures
/// are hookable (`ErrorPhase::BeforeState`/`AfterState`) and routed through
/// the workflow's error handler like any other execution error.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Called once when the plugin is registered with an `Engine`.
    async fn on_init(&self) {}

    /// Called before each state runs.
    async fn before_execute(&self, _context: &WorkflowContext) -> WorkflowResult<()> {
        Ok(())
    }

    /// Called after each state completes successfully.
    async fn after_execute(&self, _context: &WorkflowContext) -> WorkflowResult<()> {
        Ok(())
    }

    /// Best-effort notification when a workflow ultimately fails; errors
    /// from this hook are logged, never propagated.
    async fn on_error(&self, _context: &WorkflowContext, _error: &WorkflowError) {}

    /// Allows a plugin to inject additional data into the context once,
    /// before the workflow's first state runs.
    fn extend_context(&self, context: &mut WorkflowContext) {
        let _ = context;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_outcome_normalizes_to_no_payload() {
        let outcome = HandlerOutcome::bare(Decision::Continue);
        assert!(outcome.target_state.is_none());
        assert!(outcome.output.is_none());
    }

    #[test]
    fn transition_to_outcome_carries_target() {
        let outcome = HandlerOutcome::transition_to("recover", None);
        assert_eq!(outcome.decision, Decision::TransitionTo);
        assert_eq!(outcome.target_state.as_deref(), Some("recover"));
    }
}
