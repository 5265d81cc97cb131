//! Runs a single state through its full hook lifecycle: `on_start`, delay,
//! `execute` (raced against the configured timeout), `on_success`/
//! `on_failure`, and finally `on_finish`.

use crate::action::{Actions, ExecutionResult};
use crate::definition::StateDefinition;
use crate::error::{WorkflowError, WorkflowResult};
use crate::state::WorkflowContext;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct StateExecutor;

impl StateExecutor {
    /// Runs `definition` once, for the given 1-based attempt number.
    ///
    /// `on_success` never runs when `execute` fails; `on_finish` always runs,
    /// regardless of which branch was taken, even when `on_start` itself
    /// fails. Only `on_failure`'s returned override propagates as an error;
    /// every other hook swallows its own failure and logs a warning.
    pub async fn run(
        definition: &StateDefinition,
        context: &WorkflowContext,
        attempt: u32,
    ) -> WorkflowResult<ExecutionResult> {
        if let Err(error) = definition.state.on_start(context).await {
            warn!(state = %definition.id, error = %error, "on_start hook failed; continuing");
        }

        if let Some(delay) = definition.delay {
            sleep(delay).await;
        }

        let cancellation = CancellationToken::new();
        let actions = Actions::new(context, attempt, cancellation.clone());

        let exec_start = std::time::Instant::now();
        let outcome = match definition.timeout {
            Some(configured) => match timeout(configured, definition.state.execute(&actions)).await {
                Ok(result) => result,
                Err(_) => {
                    cancellation.cancel();
                    Err(WorkflowError::StateTimeout {
                        state: definition.id.clone(),
                        configured_ms: configured.as_millis() as u64,
                        elapsed_ms: exec_start.elapsed().as_millis() as u64,
                    })
                }
            },
            None => definition.state.execute(&actions).await,
        };

        let result = match outcome {
            Ok(result) => {
                if let Err(error) = definition.state.on_success(context, &result).await {
                    warn!(state = %definition.id, error = %error, "on_success hook failed; continuing");
                }
                debug!(state = %definition.id, "state succeeded on attempt {}", attempt);
                Ok(result)
            }
            Err(error) => match definition.state.on_failure(context, &error).await {
                Ok(Some(override_error)) => {
                    warn!(state = %definition.id, error = %override_error, "on_failure replaced the error");
                    Err(override_error)
                }
                Ok(None) => {
                    warn!(state = %definition.id, error = %error, "state failed on attempt {}", attempt);
                    Err(error)
                }
                Err(handler_error) => {
                    warn!(
                        state = %definition.id,
                        error = %handler_error,
                        "on_failure hook itself failed; preserving original error"
                    );
                    Err(error)
                }
            },
        };

        definition.state.on_finish(context).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct SucceedsState;

    #[async_trait]
    impl crate::action::State for SucceedsState {
        async fn execute(&self, actions: &Actions<'_>) -> WorkflowResult<ExecutionResult> {
            Ok(actions.next(Some(serde_json::json!({"ok": true}))))
        }
    }

    struct AlwaysTimesOutState;

    #[async_trait]
    impl crate::action::State for AlwaysTimesOutState {
        async fn execute(&self, _actions: &Actions<'_>) -> WorkflowResult<ExecutionResult> {
            sleep(Duration::from_secs(10)).await;
            unreachable!("should have timed out first");
        }
    }

    struct FailsThenOverridesState;

    #[async_trait]
    impl crate::action::State for FailsThenOverridesState {
        async fn execute(&self, _actions: &Actions<'_>) -> WorkflowResult<ExecutionResult> {
            Err(WorkflowError::StateExecutionFailed {
                state: "x".into(),
                reason: "boom".into(),
            })
        }

        async fn on_failure(
            &self,
            _context: &WorkflowContext,
            _error: &WorkflowError,
        ) -> WorkflowResult<Option<WorkflowError>> {
            Ok(Some(WorkflowError::StateExecutionFailed {
                state: "x".into(),
                reason: "overridden reason".into(),
            }))
        }
    }

    #[tokio::test]
    async fn successful_execute_runs_on_success_not_on_failure() {
        let def = StateDefinition::new("s", Arc::new(SucceedsState));
        let ctx = WorkflowContext::new("exec_1".into(), "s".into());
        let result = StateExecutor::run(&def, &ctx, 1).await.unwrap();
        matches!(result, ExecutionResult::Next { .. });
    }

    #[tokio::test]
    async fn timeout_produces_state_timeout_error() {
        let mut def = StateDefinition::new("s", Arc::new(AlwaysTimesOutState));
        def.timeout = Some(Duration::from_millis(20));
        let ctx = WorkflowContext::new("exec_1".into(), "s".into());
        let result = StateExecutor::run(&def, &ctx, 1).await;
        assert!(matches!(result, Err(WorkflowError::StateTimeout { .. })));
    }

    #[tokio::test]
    async fn on_failure_override_replaces_error_but_attempt_still_fails() {
        let def = StateDefinition::new("s", Arc::new(FailsThenOverridesState));
        let ctx = WorkflowContext::new("exec_1".into(), "s".into());
        let result = StateExecutor::run(&def, &ctx, 1).await;
        match result {
            Err(WorkflowError::StateExecutionFailed { reason, .. }) => {
                assert_eq!(reason, "overridden reason");
            }
            other => panic!("expected overridden failure, got {other:?}"),
        }
    }
}
