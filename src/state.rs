//! Workflow execution state: the data persisted across transitions.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier for a state within a workflow definition.
pub type StateId = String;

/// Lifecycle status of a workflow execution.
///
/// Transitions are monotonic except for `Running <-> Suspended`, which may
/// cycle freely as a workflow suspends waiting on an external event and is
/// later resumed. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Running,
    Suspended,
    Completed,
    Failed,
}

impl WorkflowStatus {
    /// Terminal statuses never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// Validates a status transition per the engine's monotonicity rule.
    pub fn can_transition_to(&self, next: &WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Running, Suspended) => true,
            (Running, Completed) => true,
            (Running, Failed) => true,
            (Suspended, Running) => true,
            (Suspended, Failed) => true,
            (Completed, _) => false,
            (Failed, _) => false,
            _ => false,
        }
    }
}

/// Outcome recorded for a single attempted transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionStatus {
    Success,
    Failure,
    Suspended,
    /// The transition was synthesized by the error-handling pipeline's
    /// `TRANSITION_TO` decision, rewriting the prior failure's record.
    ErrorRecovery,
}

/// One entry in a workflow execution's append-only transition history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: StateId,
    pub to: StateId,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub status: TransitionStatus,
    pub error: Option<String>,
}

impl TransitionRecord {
    pub fn new(
        from: StateId,
        to: StateId,
        started_at: DateTime<Utc>,
        status: TransitionStatus,
        error: Option<String>,
    ) -> Self {
        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0);
        Self {
            from,
            to,
            started_at,
            completed_at,
            duration_ms,
            status,
            error,
        }
    }
}

/// Bookkeeping metadata carried alongside a workflow's business data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_attempts: u32,
}

impl ContextMetadata {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            updated_at: now,
            completed_at: None,
            total_attempts: 0,
        }
    }
}

/// The full, persisted state of one workflow run as it moves between states.
///
/// `data` is the free-form input/working set the workflow was started with
/// and that state bodies read and write from; `outputs` accumulates each
/// state's declared output keyed by the state that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub execution_id: String,
    pub group_id: Option<String>,
    pub current_state: StateId,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub outputs: HashMap<StateId, serde_json::Value>,
    pub history: Vec<TransitionRecord>,
    pub metadata: ContextMetadata,
}

impl WorkflowContext {
    pub fn new(execution_id: String, initial_state: StateId) -> Self {
        Self {
            execution_id,
            group_id: None,
            current_state: initial_state,
            data: serde_json::Map::new(),
            outputs: HashMap::new(),
            history: Vec::new(),
            metadata: ContextMetadata::new(),
        }
    }

    /// Appends a transition to history and advances `current_state`.
    ///
    /// The caller is responsible for ensuring `record.from` equals the
    /// pre-append `current_state`, per the execution's history invariant.
    pub fn apply_transition(&mut self, record: TransitionRecord) {
        self.current_state = record.to.clone();
        self.history.push(record);
        self.metadata.updated_at = Utc::now();
    }

    /// Rewrites the last history entry's status in place, used by the
    /// `TRANSITION_TO` error-recovery path to mark a failure as recovered.
    pub fn mark_last_as_error_recovery(&mut self) {
        if let Some(last) = self.history.last_mut() {
            last.status = TransitionStatus::ErrorRecovery;
        }
    }

    pub fn record_output(&mut self, state: StateId, output: serde_json::Value) {
        self.outputs.insert(state, output);
    }

    pub fn elapsed(&self) -> ChronoDuration {
        Utc::now() - self.metadata.started_at
    }
}

/// Present only while `status == Suspended`; records why and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionInfo {
    pub waiting_for: Option<String>,
    pub suspended_at: DateTime<Utc>,
}

/// A workflow run: the unit persisted via `PersistenceAdapter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    pub context: WorkflowContext,
    pub suspension: Option<SuspensionInfo>,
}

impl WorkflowExecution {
    pub fn new(id: String, workflow_name: String, initial_state: StateId) -> Self {
        Self {
            context: WorkflowContext::new(id.clone(), initial_state),
            id,
            workflow_name,
            status: WorkflowStatus::Running,
            suspension: None,
        }
    }

    pub fn suspend(&mut self, waiting_for: Option<String>) {
        self.status = WorkflowStatus::Suspended;
        self.suspension = Some(SuspensionInfo {
            waiting_for,
            suspended_at: Utc::now(),
        });
    }

    pub fn resume_from_suspension(&mut self) {
        self.status = WorkflowStatus::Running;
        self.suspension = None;
    }

    pub fn complete(&mut self) {
        self.status = WorkflowStatus::Completed;
        self.context.metadata.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self) {
        self.status = WorkflowStatus::Failed;
        self.context.metadata.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions() {
        assert!(WorkflowStatus::Running.can_transition_to(&WorkflowStatus::Suspended));
        assert!(WorkflowStatus::Suspended.can_transition_to(&WorkflowStatus::Running));
        assert!(WorkflowStatus::Running.can_transition_to(&WorkflowStatus::Completed));
        assert!(!WorkflowStatus::Completed.can_transition_to(&WorkflowStatus::Running));
        assert!(!WorkflowStatus::Failed.can_transition_to(&WorkflowStatus::Suspended));
    }

    #[test]
    fn context_applies_transition_and_tracks_history() {
        let mut ctx = WorkflowContext::new("exec_1".into(), "start".into());
        let started_at = ctx.metadata.started_at;
        let record = TransitionRecord::new(
            "start".into(),
            "next".into(),
            started_at,
            TransitionStatus::Success,
            None,
        );
        ctx.apply_transition(record);
        assert_eq!(ctx.current_state, "next");
        assert_eq!(ctx.history.len(), 1);
        assert_eq!(ctx.history[0].from, "start");
    }

    #[test]
    fn error_recovery_rewrites_last_entry() {
        let mut ctx = WorkflowContext::new("exec_1".into(), "start".into());
        let record = TransitionRecord::new(
            "start".into(),
            "start".into(),
            ctx.metadata.started_at,
            TransitionStatus::Failure,
            Some("boom".into()),
        );
        ctx.apply_transition(record);
        ctx.mark_last_as_error_recovery();
        assert_eq!(
            ctx.history.last().unwrap().status,
            TransitionStatus::ErrorRecovery
        );
    }
}
