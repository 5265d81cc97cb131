//! The workflow executor: drives one `WorkflowDefinition` through its
//! transition loop from `execute`/`resume` to a terminal or suspended state.

use crate::action::ExecutionResult;
use crate::concurrency::ConcurrencyManager;
use crate::definition::{NextStep, StateDefinition, WorkflowDefinition};
use crate::error::{WorkflowError, WorkflowResult};
use crate::handler::{Decision, ErrorPhase, HandlerOutcome, Plugin};
use crate::interfaces::{Logger, PersistenceAdapter};
use crate::retry::{RetryEngine, RetryOutcome};
use crate::state::{
    StateId, TransitionRecord, TransitionStatus, WorkflowContext, WorkflowExecution,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{info, warn};

/// Input to `WorkflowExecutor::execute`.
#[derive(Default)]
pub struct ExecuteOptions {
    /// Caller-supplied execution id; stored verbatim if given. Otherwise an
    /// id of the form `exec_<unix-ms>_<random-base36>` is generated.
    pub execution_id: Option<String>,
    pub initial_data: serde_json::Map<String, serde_json::Value>,
}

/// How `resume` should treat the state a suspended (or failed) execution
/// left off at.
pub enum ResumeStrategy {
    /// Re-run the current state from attempt 1.
    Retry,
    /// Skip the current state, recording a zero-duration synthetic
    /// transition, and advance per the normal resolution rules.
    Skip,
    /// Jump directly to a named state via a zero-duration synthetic
    /// transition, bypassing the transition table.
    Goto(StateId),
}

pub struct ResumeOptions {
    pub strategy: ResumeStrategy,
}

/// What to do after handling a hookable or retry-exhausted failure.
enum FailureAction {
    /// `TRANSITION_TO` jumped the execution to a new state; keep looping.
    Recovered,
    /// `EXIT` (or a handler that asked to merely `Continue` outside the
    /// retry phase, which has no other meaning): stop advancing, leave the
    /// execution's status as-is.
    Stop,
    /// The workflow failed; `bool` says whether the failure should be
    /// persisted (`false` for `FailNoPersist`/`StopRetry`).
    Failed(WorkflowError, bool),
}

enum LoopSignal {
    ContinueOuter,
    Stop,
}

/// Drives a single `WorkflowDefinition` to completion or suspension,
/// persisting after every transition and consulting the definition's error
/// handler and plugins along the way.
pub struct WorkflowExecutor {
    definition: Arc<WorkflowDefinition>,
    persistence: Arc<dyn PersistenceAdapter>,
    concurrency: Option<Arc<ConcurrencyManager>>,
    logger: Arc<dyn Logger>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl WorkflowExecutor {
    pub fn new(
        definition: Arc<WorkflowDefinition>,
        persistence: Arc<dyn PersistenceAdapter>,
        concurrency: Option<Arc<ConcurrencyManager>>,
        logger: Arc<dyn Logger>,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> Self {
        Self {
            definition,
            persistence,
            concurrency,
            logger,
            plugins,
        }
    }

    fn generate_execution_id() -> String {
        let unix_ms = Utc::now().timestamp_millis();
        let mut rng = rand::thread_rng();
        let suffix_value: u64 = rng.gen();
        format!("exec_{}_{}", unix_ms, to_base36(suffix_value))
    }

    /// Starts a new execution of this definition.
    pub async fn execute(&self, options: ExecuteOptions) -> WorkflowResult<WorkflowExecution> {
        let execution_id = options.execution_id.unwrap_or_else(Self::generate_execution_id);
        let mut execution = WorkflowExecution::new(
            execution_id,
            self.definition.name.clone(),
            self.definition.initial_state.clone(),
        );
        execution.context.data = options.initial_data;

        for plugin in &self.plugins {
            plugin.extend_context(&mut execution.context);
        }

        info!(
            execution_id = %execution.id,
            workflow = %self.definition.name,
            "starting workflow execution"
        );

        if let Some(config) = &self.definition.concurrency {
            let manager = self
                .concurrency
                .as_ref()
                .expect("concurrency manager must be configured when definition.concurrency is Some");
            let group_id = manager.group_id_for(config, &execution.context);
            execution.context.group_id = Some(group_id.clone());

            let acquired = manager
                .acquire_group_lock(&group_id, &execution.id, config)
                .await?;

            if !acquired {
                let error = WorkflowError::LockUnavailable(group_id.clone());
                let outcome = self
                    .consult(ErrorPhase::LockAcquisition, &execution.context, &error)
                    .await;
                let current_id = execution.context.current_state.clone();
                match self.resolve_failure_action(&mut execution, &current_id, Utc::now(), outcome, error, true) {
                    FailureAction::Recovered => {
                        self.persistence.update(&execution.id, &execution).await?;
                    }
                    FailureAction::Stop => return Ok(execution),
                    FailureAction::Failed(err, persist) => {
                        execution.fail();
                        if persist {
                            self.persistence.update(&execution.id, &execution).await?;
                        }
                        return Err(err);
                    }
                }
            }
        }

        self.persistence.save(&execution).await?;

        match self.run_loop(execution).await {
            Ok(execution) => {
                // Suspended executions keep their group-lock slot by design
                // (see the SUSPENDED-retains-soft-lock open question) — only
                // a terminal, non-suspended outcome releases it here.
                if execution.status.is_terminal() {
                    self.release_lock(&execution).await;
                }
                Ok(execution)
            }
            Err((execution, error)) => {
                for plugin in &self.plugins {
                    plugin.on_error(&execution.context, &error).await;
                }
                self.logger.error("workflow execution failed", Some(&error));
                self.release_lock(&execution).await;
                Err(error)
            }
        }
    }

    /// Resumes a suspended or failed execution previously returned by
    /// `execute`, per `strategy`.
    pub async fn resume(
        &self,
        mut execution: WorkflowExecution,
        options: ResumeOptions,
    ) -> WorkflowResult<WorkflowExecution> {
        let current_id = execution.context.current_state.clone();
        execution.resume_from_suspension();

        match options.strategy {
            ResumeStrategy::Retry => {}
            ResumeStrategy::Skip => {
                match self.definition.resolve_next(&current_id, &execution.context)? {
                    NextStep::Goto(next, virtual_output) => {
                        if let Some(output) = virtual_output {
                            execution.context.record_output(current_id.clone(), output);
                        }
                        let record = TransitionRecord::new(
                            current_id.clone(),
                            next,
                            Utc::now(),
                            TransitionStatus::Success,
                            None,
                        );
                        execution.context.apply_transition(record);
                    }
                    NextStep::Terminate => {
                        let record = TransitionRecord::new(
                            current_id.clone(),
                            current_id.clone(),
                            Utc::now(),
                            TransitionStatus::Success,
                            None,
                        );
                        execution.context.apply_transition(record);
                        execution.complete();
                    }
                }
            }
            ResumeStrategy::Goto(target) => {
                if !self.definition.states.contains_key(&target) {
                    return Err(WorkflowError::NotFound(format!(
                        "resume target state '{}' not found",
                        target
                    )));
                }
                let record = TransitionRecord::new(
                    current_id.clone(),
                    target,
                    Utc::now(),
                    TransitionStatus::Success,
                    None,
                );
                execution.context.apply_transition(record);
            }
        }

        self.persistence.update(&execution.id, &execution).await?;

        match self.run_loop(execution).await {
            Ok(execution) => {
                if execution.status.is_terminal() {
                    self.release_lock(&execution).await;
                }
                Ok(execution)
            }
            Err((execution, error)) => {
                for plugin in &self.plugins {
                    plugin.on_error(&execution.context, &error).await;
                }
                self.release_lock(&execution).await;
                Err(error)
            }
        }
    }

    async fn release_lock(&self, execution: &WorkflowExecution) {
        if let (Some(manager), Some(group_id)) = (&self.concurrency, &execution.context.group_id) {
            if let Err(e) = manager.release_group_lock(group_id, &execution.id).await {
                warn!(execution_id = %execution.id, error = %e, "failed to release group lock");
            }
        }
    }

    async fn consult(
        &self,
        phase: ErrorPhase,
        context: &WorkflowContext,
        error: &WorkflowError,
    ) -> HandlerOutcome {
        match &self.definition.error_handler {
            Some(handler) => match handler.handle(phase, context, error).await {
                Ok(outcome) => outcome,
                Err(handler_error) => {
                    self.logger
                        .warn("error handler failed; falling back to Fail", Some(&handler_error));
                    HandlerOutcome::bare(Decision::Fail)
                }
            },
            None => HandlerOutcome::bare(Decision::Fail),
        }
    }

    /// `record_failure` is false when the caller already appended a
    /// `Failure` transition record for this exact failure (the retry
    /// engine does this per attempt) — in that case only the rewrite to
    /// `ErrorRecovery` is needed, not a second record.
    fn resolve_failure_action(
        &self,
        execution: &mut WorkflowExecution,
        current_id: &StateId,
        state_started_at: DateTime<Utc>,
        outcome: HandlerOutcome,
        error: WorkflowError,
        record_failure: bool,
    ) -> FailureAction {
        match outcome.decision {
            Decision::TransitionTo => {
                let target = outcome
                    .target_state
                    .clone()
                    .unwrap_or_else(|| current_id.clone());
                if record_failure {
                    let failure_record = TransitionRecord::new(
                        current_id.clone(),
                        current_id.clone(),
                        state_started_at,
                        TransitionStatus::Failure,
                        Some(error.to_string()),
                    );
                    execution.context.apply_transition(failure_record);
                }
                execution.context.mark_last_as_error_recovery();
                if let Some(output) = outcome.output {
                    execution.context.record_output(current_id.clone(), output);
                }
                let synthetic = TransitionRecord::new(
                    current_id.clone(),
                    target,
                    Utc::now(),
                    TransitionStatus::Success,
                    None,
                );
                execution.context.apply_transition(synthetic);
                FailureAction::Recovered
            }
            Decision::Exit | Decision::Continue => FailureAction::Stop,
            Decision::StopRetry | Decision::FailNoPersist => FailureAction::Failed(error, false),
            Decision::Fail => FailureAction::Failed(error, true),
        }
    }

    async fn apply_failure(
        &self,
        execution: &mut WorkflowExecution,
        current_id: &StateId,
        state_started_at: DateTime<Utc>,
        state_def: &StateDefinition,
        outcome: HandlerOutcome,
        error: WorkflowError,
        record_failure: bool,
    ) -> WorkflowResult<LoopSignal> {
        match self.resolve_failure_action(execution, current_id, state_started_at, outcome, error, record_failure) {
            FailureAction::Recovered => {
                if state_def.unlock_after {
                    if let (Some(manager), Some(group_id)) =
                        (&self.concurrency, execution.context.group_id.clone())
                    {
                        manager.partial_unlock(&group_id, &execution.id).await?;
                    }
                }
                self.persistence.update(&execution.id, execution).await?;
                Ok(LoopSignal::ContinueOuter)
            }
            FailureAction::Stop => Ok(LoopSignal::Stop),
            FailureAction::Failed(err, persist) => {
                execution.fail();
                if persist {
                    self.persistence.update(&execution.id, execution).await?;
                }
                Err(err)
            }
        }
    }

    /// The core transition loop. Always returns the execution, whether it
    /// succeeded, suspended, stopped early, or failed — callers need it on
    /// every path to release locks and run `on_error` plugins.
    async fn run_loop(
        &self,
        mut execution: WorkflowExecution,
    ) -> Result<WorkflowExecution, (WorkflowExecution, WorkflowError)> {
        'outer: loop {
            if execution.status.is_terminal() {
                break;
            }

            let current_id = execution.context.current_state.clone();
            let state_started_at = Utc::now();

            let state_def = match self.definition.states.get(&current_id) {
                Some(d) => d,
                None => {
                    let error = WorkflowError::NotFound(format!("state '{}' not defined", current_id));
                    execution.fail();
                    return Err((execution, error));
                }
            };

            for plugin in &self.plugins {
                if let Err(error) = plugin.before_execute(&execution.context).await {
                    let outcome = self
                        .consult(ErrorPhase::BeforeState, &execution.context, &error)
                        .await;
                    match self
                        .apply_failure(&mut execution, &current_id, state_started_at, state_def, outcome, error, true)
                        .await
                    {
                        Ok(LoopSignal::ContinueOuter) => continue 'outer,
                        Ok(LoopSignal::Stop) => break 'outer,
                        Err(e) => return Err((execution, e)),
                    }
                }
            }

            let error_handler = self.definition.error_handler.as_deref();
            let retry_outcome =
                RetryEngine::run(state_def, &mut execution.context, error_handler).await;

            match retry_outcome {
                RetryOutcome::Success(result) => {
                    for plugin in &self.plugins {
                        if let Err(error) = plugin.after_execute(&execution.context).await {
                            let outcome = self
                                .consult(ErrorPhase::AfterState, &execution.context, &error)
                                .await;
                            match self
                                .apply_failure(&mut execution, &current_id, state_started_at, state_def, outcome, error, true)
                                .await
                            {
                                Ok(LoopSignal::ContinueOuter) => continue 'outer,
                                Ok(LoopSignal::Stop) => break 'outer,
                                Err(e) => return Err((execution, e)),
                            }
                        }
                    }

                    if state_def.unlock_after {
                        if let (Some(manager), Some(group_id)) =
                            (&self.concurrency, execution.context.group_id.clone())
                        {
                            if let Err(e) = manager.partial_unlock(&group_id, &execution.id).await {
                                return Err((execution, e));
                            }
                        }
                    }

                    match result {
                        ExecutionResult::Suspend { waiting_for } => {
                            execution.suspend(waiting_for);
                            if let Err(e) = self.persistence.update(&execution.id, &execution).await {
                                return Err((execution, e));
                            }
                            break 'outer;
                        }
                        ExecutionResult::Complete { output } => {
                            if let Some(output) = output {
                                execution.context.record_output(current_id.clone(), output);
                            }
                            let record = TransitionRecord::new(
                                current_id.clone(),
                                current_id.clone(),
                                state_started_at,
                                TransitionStatus::Success,
                                None,
                            );
                            execution.context.apply_transition(record);
                            execution.complete();
                            if let Err(e) = self.persistence.update(&execution.id, &execution).await {
                                return Err((execution, e));
                            }
                            break 'outer;
                        }
                        ExecutionResult::Goto { target, output } => {
                            if !self.definition.states.contains_key(&target) {
                                let error = WorkflowError::InvalidStateTransition {
                                    from: current_id.clone(),
                                    to: target.clone(),
                                };
                                execution.fail();
                                return Err((execution, error));
                            }
                            if let Some(output) = output {
                                execution.context.record_output(current_id.clone(), output);
                            }
                            let record = TransitionRecord::new(
                                current_id.clone(),
                                target,
                                state_started_at,
                                TransitionStatus::Success,
                                None,
                            );
                            execution.context.apply_transition(record);
                        }
                        ExecutionResult::Next { output } => {
                            if let Some(output) = output {
                                execution.context.record_output(current_id.clone(), output);
                            }
                            match self.definition.resolve_next(&current_id, &execution.context) {
                                Ok(NextStep::Goto(next, virtual_output)) => {
                                    if let Some(v) = virtual_output {
                                        execution.context.record_output(current_id.clone(), v);
                                    }
                                    let record = TransitionRecord::new(
                                        current_id.clone(),
                                        next,
                                        state_started_at,
                                        TransitionStatus::Success,
                                        None,
                                    );
                                    execution.context.apply_transition(record);
                                }
                                Ok(NextStep::Terminate) => {
                                    let record = TransitionRecord::new(
                                        current_id.clone(),
                                        current_id.clone(),
                                        state_started_at,
                                        TransitionStatus::Success,
                                        None,
                                    );
                                    execution.context.apply_transition(record);
                                    execution.complete();
                                    if let Err(e) = self.persistence.update(&execution.id, &execution).await {
                                        return Err((execution, e));
                                    }
                                    break 'outer;
                                }
                                Err(error) => {
                                    execution.fail();
                                    return Err((execution, error));
                                }
                            }
                        }
                    }

                    if let Err(e) = self.persistence.update(&execution.id, &execution).await {
                        return Err((execution, e));
                    }
                }

                RetryOutcome::Exhausted {
                    outcome,
                    last_error,
                    ..
                } => {
                    match self
                        .apply_failure(&mut execution, &current_id, state_started_at, state_def, outcome, last_error, false)
                        .await
                    {
                        Ok(LoopSignal::ContinueOuter) => continue 'outer,
                        Ok(LoopSignal::Stop) => break 'outer,
                        Err(e) => return Err((execution, e)),
                    }
                }
            }
        }

        Ok(execution)
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while value > 0 {
        buf.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).expect("base36 alphabet is ASCII")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Actions, State};
    use crate::definition::WorkflowDefinitionBuilder;
    use crate::interfaces::{ExecutionFilter, LockAdapter, TracingLogger};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn base36_roundtrips_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    struct InMemoryPersistence {
        store: Mutex<HashMap<String, WorkflowExecution>>,
    }

    impl InMemoryPersistence {
        fn new() -> Self {
            Self {
                store: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl PersistenceAdapter for InMemoryPersistence {
        async fn save(&self, execution: &WorkflowExecution) -> WorkflowResult<()> {
            self.store
                .lock()
                .unwrap()
                .insert(execution.id.clone(), execution.clone());
            Ok(())
        }
        async fn update(&self, id: &str, execution: &WorkflowExecution) -> WorkflowResult<()> {
            self.store.lock().unwrap().insert(id.to_string(), execution.clone());
            Ok(())
        }
        async fn load(&self, id: &str) -> WorkflowResult<Option<WorkflowExecution>> {
            Ok(self.store.lock().unwrap().get(id).cloned())
        }
        async fn find(&self, _filter: ExecutionFilter) -> WorkflowResult<Vec<WorkflowExecution>> {
            Ok(self.store.lock().unwrap().values().cloned().collect())
        }
    }

    struct AlwaysGrant;

    #[async_trait]
    impl LockAdapter for AlwaysGrant {
        async fn acquire(&self, _key: &str, _holder: &str) -> WorkflowResult<bool> {
            Ok(true)
        }
        async fn release(&self, _key: &str) -> WorkflowResult<()> {
            Ok(())
        }
        async fn is_locked(&self, _key: &str) -> WorkflowResult<bool> {
            Ok(false)
        }
        async fn extend(&self, _key: &str, _ttl: Duration) -> WorkflowResult<bool> {
            Ok(true)
        }
    }

    struct NextState;

    #[async_trait]
    impl State for NextState {
        async fn execute(&self, actions: &Actions<'_>) -> WorkflowResult<ExecutionResult> {
            Ok(actions.next(Some(serde_json::json!({"seen": true}))))
        }
    }

    struct CompleteState;

    #[async_trait]
    impl State for CompleteState {
        async fn execute(&self, actions: &Actions<'_>) -> WorkflowResult<ExecutionResult> {
            Ok(actions.complete(Some(serde_json::json!({"done": true}))))
        }
    }

    fn executor() -> (WorkflowExecutor, Arc<InMemoryPersistence>) {
        let definition = WorkflowDefinitionBuilder::new("greeting")
            .state(StateDefinition::new("start", Arc::new(NextState)))
            .state(StateDefinition::new("finish", Arc::new(CompleteState)))
            .build()
            .unwrap();

        let persistence = Arc::new(InMemoryPersistence::new());
        let executor = WorkflowExecutor::new(
            Arc::new(definition),
            persistence.clone(),
            None,
            Arc::new(TracingLogger),
            Vec::new(),
        );
        (executor, persistence)
    }

    #[tokio::test]
    async fn executes_to_completion_and_persists_every_transition() {
        let (executor, persistence) = executor();
        let execution = executor
            .execute(ExecuteOptions::default())
            .await
            .unwrap();

        assert!(matches!(execution.status, crate::state::WorkflowStatus::Completed));
        assert_eq!(execution.context.history.len(), 2);

        let persisted = persistence.load(&execution.id).await.unwrap().unwrap();
        assert!(matches!(persisted.status, crate::state::WorkflowStatus::Completed));
    }
}
