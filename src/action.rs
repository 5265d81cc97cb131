//! The `State` trait state bodies implement, and the `Actions` handle they
//! use to declare how a workflow should proceed.

use crate::error::WorkflowResult;
use crate::state::WorkflowContext;
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// What a state body decided to do, returned from `State::execute` via
/// `Actions` rather than by mutating shared state directly.
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    /// Advance along the normal transition table, optionally attaching an
    /// output value for this state.
    Next { output: Option<Value> },
    /// Jump directly to a named state, bypassing the transition table.
    Goto { target: String, output: Option<Value> },
    /// Suspend the workflow, optionally recording what it's waiting for.
    Suspend { waiting_for: Option<String> },
    /// Terminate the workflow successfully right here.
    Complete { output: Option<Value> },
}

/// Handle passed to a state body for declaring its outcome and for reading
/// ambient per-attempt information (the current attempt number, a best-effort
/// cancellation signal on timeout).
pub struct Actions<'a> {
    context: &'a WorkflowContext,
    attempt: u32,
    cancellation: CancellationToken,
}

impl<'a> Actions<'a> {
    pub fn new(context: &'a WorkflowContext, attempt: u32, cancellation: CancellationToken) -> Self {
        Self {
            context,
            attempt,
            cancellation,
        }
    }

    pub fn context(&self) -> &WorkflowContext {
        self.context
    }

    /// 1-based attempt number for the current `execute` call.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Signaled (best-effort) when the state's configured timeout fires.
    /// State bodies may poll or select on this to stop early; nothing
    /// requires them to.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn next(&self, output: Option<Value>) -> ExecutionResult {
        ExecutionResult::Next { output }
    }

    pub fn goto(&self, target: impl Into<String>, output: Option<Value>) -> ExecutionResult {
        ExecutionResult::Goto {
            target: target.into(),
            output,
        }
    }

    pub fn suspend(&self, waiting_for: Option<String>) -> ExecutionResult {
        ExecutionResult::Suspend { waiting_for }
    }

    pub fn complete(&self, output: Option<Value>) -> ExecutionResult {
        ExecutionResult::Complete { output }
    }
}

/// A single state's behavior. Hook methods default to no-ops so
/// implementations only override what they need.
#[async_trait]
pub trait State: Send + Sync {
    /// Runs the state's core work and declares how the workflow proceeds.
    async fn execute(&self, actions: &Actions<'_>) -> WorkflowResult<ExecutionResult>;

    /// Runs once before `execute`, before delay/timeout are applied.
    async fn on_start(&self, _context: &WorkflowContext) -> WorkflowResult<()> {
        Ok(())
    }

    /// Runs after a successful `execute`.
    async fn on_success(&self, _context: &WorkflowContext, _result: &ExecutionResult) -> WorkflowResult<()> {
        Ok(())
    }

    /// Runs after `execute` fails. The attempt is still a failure either way
    /// — this never turns it into a success. Returning `Ok(Some(error))`
    /// replaces the error that propagates to retry/history with that one;
    /// `Ok(None)` preserves the original.
    async fn on_failure(
        &self,
        _context: &WorkflowContext,
        _error: &crate::error::WorkflowError,
    ) -> WorkflowResult<Option<crate::error::WorkflowError>> {
        Ok(None)
    }

    /// Always runs after success or failure handling, regardless of outcome.
    async fn on_finish(&self, _context: &WorkflowContext) {}
}
