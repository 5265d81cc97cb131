//! Retry policies and the retry engine that drives a state through them.

use crate::error::WorkflowError;
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;

/// Backoff shape between retry attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RetryStrategy {
    Fixed,
    Linear,
    /// `multiplier` defaults to 2.0, matching the spec's default.
    Exponential { multiplier: f64 },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Exponential { multiplier: 2.0 }
    }
}

/// Retry configuration attached to a state definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first; must be >= 1.
    pub max_attempts: u32,
    pub strategy: RetryStrategy,
    pub initial_delay: StdDuration,
    pub max_delay: StdDuration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, strategy: RetryStrategy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            strategy,
            initial_delay: StdDuration::from_millis(100),
            max_delay: StdDuration::from_secs(30),
        }
    }

    pub fn with_initial_delay(mut self, delay: StdDuration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: StdDuration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait before the attempt that follows the given (1-based)
    /// failed attempt number, clamped to `max_delay`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> StdDuration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match &self.strategy {
            RetryStrategy::Fixed => initial_ms,
            RetryStrategy::Linear => initial_ms * attempt as f64,
            RetryStrategy::Exponential { multiplier } => {
                initial_ms * multiplier.powi((attempt as i32) - 1)
            }
        };

        StdDuration::from_millis(delay_ms.min(max_ms).max(0.0) as u64)
    }
}

use crate::action::ExecutionResult;
use crate::definition::StateDefinition;
use crate::handler::{Decision, ErrorHandler, ErrorPhase, HandlerOutcome};
use crate::state::{TransitionRecord, TransitionStatus, WorkflowContext};
use crate::state_executor::StateExecutor;
use chrono::Utc;
use tokio::time::sleep;
use tracing::warn;

/// What the retry engine produced after running a state to either success
/// or retry exhaustion/handler-directed exit.
pub enum RetryOutcome {
    /// The state executed successfully, with the final accepted result.
    Success(ExecutionResult),
    /// Every attempt failed, retries exhausted (or the handler directed a
    /// stop/transition/fail), with the handler's final outcome for the
    /// caller to act on.
    Exhausted {
        outcome: HandlerOutcome,
        last_error: WorkflowError,
        attempts: u32,
    },
}

/// Drives a single state through its configured retry policy, consulting the
/// workflow's error handler (if any) after every failed attempt. Every failed
/// attempt gets its own `Failure` history record and counts toward
/// `ContextMetadata::total_attempts`, whether or not it is ultimately
/// retried — a state that fails twice then succeeds leaves 2 failure records
/// behind it, not 1.
///
/// When the error handler itself throws during this phase, the failure is
/// logged and retrying continues as if the handler had returned
/// `Decision::Continue` — unlike every other hookable phase, where a
/// handler throw falls back to `Decision::Fail`.
pub struct RetryEngine;

impl RetryEngine {
    pub async fn run(
        definition: &StateDefinition,
        context: &mut WorkflowContext,
        error_handler: Option<&(dyn ErrorHandler)>,
    ) -> RetryOutcome {
        let max_attempts = definition.retry.as_ref().map(|p| p.max_attempts).unwrap_or(1);
        let mut attempt = 1u32;

        loop {
            let attempt_started_at = Utc::now();
            let outcome_result = StateExecutor::run(definition, context, attempt).await;
            context.metadata.total_attempts += 1;

            match outcome_result {
                Ok(result) => return RetryOutcome::Success(result),
                Err(error) => {
                    let failure_record = TransitionRecord::new(
                        context.current_state.clone(),
                        context.current_state.clone(),
                        attempt_started_at,
                        TransitionStatus::Failure,
                        Some(error.to_string()),
                    );
                    context.apply_transition(failure_record);

                    let outcome = match error_handler {
                        Some(handler) => {
                            match handler
                                .handle(ErrorPhase::StateExecute, context, &error)
                                .await
                            {
                                Ok(outcome) => outcome,
                                Err(handler_error) => {
                                    warn!(
                                        state = %definition.id,
                                        error = %handler_error,
                                        "error handler failed during retry phase; continuing to retry"
                                    );
                                    HandlerOutcome::bare(Decision::Continue)
                                }
                            }
                        }
                        None => HandlerOutcome::bare(Decision::Continue),
                    };

                    match outcome.decision {
                        Decision::Continue => {
                            if attempt >= max_attempts {
                                return RetryOutcome::Exhausted {
                                    outcome: HandlerOutcome::bare(Decision::Fail),
                                    last_error: WorkflowError::RetryExhausted {
                                        original: error.to_string(),
                                        attempts: attempt,
                                        policy: format!("{:?}", definition.retry.as_ref().map(|p| &p.strategy)),
                                    },
                                    attempts: attempt,
                                };
                            }
                            if let Some(policy) = &definition.retry {
                                sleep(policy.backoff_for_attempt(attempt)).await;
                            }
                            attempt += 1;
                            continue;
                        }
                        Decision::StopRetry
                        | Decision::Exit
                        | Decision::Fail
                        | Decision::FailNoPersist
                        | Decision::TransitionTo => {
                            return RetryOutcome::Exhausted {
                                outcome,
                                last_error: error,
                                attempts: attempt,
                            };
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::new(5, RetryStrategy::Fixed)
            .with_initial_delay(StdDuration::from_millis(100));
        assert_eq!(policy.backoff_for_attempt(1).as_millis(), 100);
        assert_eq!(policy.backoff_for_attempt(3).as_millis(), 100);
    }

    #[test]
    fn exponential_backoff_doubles_and_clamps() {
        let policy = RetryPolicy::new(5, RetryStrategy::Exponential { multiplier: 2.0 })
            .with_initial_delay(StdDuration::from_millis(100))
            .with_max_delay(StdDuration::from_millis(200));

        // Matches spec scenario S4: attempts 1..=3 sleep 100, 200, 200.
        assert_eq!(policy.backoff_for_attempt(1).as_millis(), 100);
        assert_eq!(policy.backoff_for_attempt(2).as_millis(), 200);
        assert_eq!(policy.backoff_for_attempt(3).as_millis(), 200);
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let policy = RetryPolicy::new(5, RetryStrategy::Linear)
            .with_initial_delay(StdDuration::from_millis(50))
            .with_max_delay(StdDuration::from_secs(10));
        assert_eq!(policy.backoff_for_attempt(1).as_millis(), 50);
        assert_eq!(policy.backoff_for_attempt(2).as_millis(), 100);
        assert_eq!(policy.backoff_for_attempt(4).as_millis(), 200);
    }

    use crate::action::{Actions, State};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FailsNTimesThenSucceeds {
        remaining_failures: AtomicU32,
    }

    #[async_trait]
    impl State for FailsNTimesThenSucceeds {
        async fn execute(&self, actions: &Actions<'_>) -> WorkflowResult<ExecutionResult> {
            if self.remaining_failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(WorkflowError::StateExecutionFailed {
                    state: "s".into(),
                    reason: "not yet".into(),
                })
            } else {
                Ok(actions.next(None))
            }
        }
    }

    use crate::error::WorkflowResult;

    #[tokio::test]
    async fn retry_engine_succeeds_after_transient_failures() {
        let mut def = StateDefinition::new(
            "s",
            Arc::new(FailsNTimesThenSucceeds {
                remaining_failures: AtomicU32::new(2),
            }),
        );
        def.retry = Some(
            RetryPolicy::new(5, RetryStrategy::Fixed)
                .with_initial_delay(StdDuration::from_millis(1)),
        );
        let mut ctx = WorkflowContext::new("exec_1".into(), "s".into());

        let outcome = RetryEngine::run(&def, &mut ctx, None).await;
        assert!(matches!(outcome, RetryOutcome::Success(_)));

        // The retry engine itself only records the failed attempts; the
        // caller appends the eventual success record. Two failures survive
        // here, not a single collapsed record.
        assert_eq!(ctx.history.len(), 2);
        assert_eq!(ctx.history[0].status, TransitionStatus::Failure);
        assert_eq!(ctx.history[1].status, TransitionStatus::Failure);
        assert_eq!(ctx.metadata.total_attempts, 3);
    }

    #[tokio::test]
    async fn retry_engine_exhausts_after_max_attempts() {
        let mut def = StateDefinition::new(
            "s",
            Arc::new(FailsNTimesThenSucceeds {
                remaining_failures: AtomicU32::new(100),
            }),
        );
        def.retry = Some(
            RetryPolicy::new(3, RetryStrategy::Fixed)
                .with_initial_delay(StdDuration::from_millis(1)),
        );
        let mut ctx = WorkflowContext::new("exec_1".into(), "s".into());

        match RetryEngine::run(&def, &mut ctx, None).await {
            RetryOutcome::Exhausted { attempts, .. } => assert_eq!(attempts, 3),
            RetryOutcome::Success(_) => panic!("expected exhaustion"),
        }
        assert_eq!(ctx.history.len(), 3);
        assert!(ctx.history.iter().all(|r| r.status == TransitionStatus::Failure));
        assert_eq!(ctx.metadata.total_attempts, 3);
    }
}
