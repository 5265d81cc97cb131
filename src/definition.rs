//! Workflow definitions: the static description of states, transitions, and
//! the concurrency/retry/error-handling configuration attached to them.

use crate::action::State;
use crate::concurrency::ConcurrencyConfig;
use crate::error::{WorkflowError, WorkflowResult};
use crate::handler::ErrorHandler;
use crate::retry::RetryPolicy;
use crate::state::{StateId, WorkflowContext};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A value attached to a conditional transition: either fixed, or computed
/// from the context at resolution time.
#[derive(Clone)]
pub enum VirtualOutput {
    Value(Value),
    Function(Arc<dyn Fn(&WorkflowContext) -> Value + Send + Sync>),
}

impl VirtualOutput {
    pub fn resolve(&self, context: &WorkflowContext) -> Value {
        match self {
            VirtualOutput::Value(v) => v.clone(),
            VirtualOutput::Function(f) => f(context),
        }
    }
}

/// An unconditional edge in the explicit transition table.
#[derive(Clone)]
pub struct Transition {
    pub from: StateId,
    pub to: StateId,
}

/// One candidate within a conditional transition group, tested in order.
#[derive(Clone)]
pub struct ConditionalTransition {
    pub condition: Arc<dyn Fn(&WorkflowContext) -> bool + Send + Sync>,
    pub to: StateId,
    pub output: Option<VirtualOutput>,
}

/// All conditional candidates leaving a given state, tested before the plain
/// transition table and the declaration-order fallback. If no candidate's
/// guard matches, `default` is taken (with `default_virtual_output`) instead
/// of falling through to the explicit transition table or the
/// declaration-order fallback; a `None` default terminates the workflow.
#[derive(Clone)]
pub struct ConditionalTransitionGroup {
    pub from: StateId,
    pub transitions: Vec<ConditionalTransition>,
    pub default: Option<StateId>,
    pub default_virtual_output: Option<VirtualOutput>,
}

/// What a plain (non-`goto`) advance out of a state resolves to.
#[derive(Clone)]
pub enum NextStep {
    /// Advance to the named state, optionally recording a virtual output.
    Goto(StateId, Option<Value>),
    /// A conditional-transition group's guards all failed and its `default`
    /// is `None`: the workflow completes here.
    Terminate,
}

/// Configuration for a single state: its body, and the timeout/delay/retry
/// policy wrapped around running it.
pub struct StateDefinition {
    pub id: StateId,
    pub state: Arc<dyn State>,
    pub timeout: Option<Duration>,
    pub delay: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    /// If true, the concurrency manager releases a throttle slot for this
    /// execution as soon as this state completes, letting other throttled
    /// executions in the same group proceed while this one keeps running.
    pub unlock_after: bool,
}

impl StateDefinition {
    pub fn new(id: impl Into<StateId>, state: Arc<dyn State>) -> Self {
        Self {
            id: id.into(),
            state,
            timeout: None,
            delay: None,
            retry: None,
            unlock_after: false,
        }
    }
}

/// A complete workflow: its states, transition table, and optional
/// concurrency and error-handling configuration.
pub struct WorkflowDefinition {
    pub name: String,
    pub states: IndexMap<StateId, StateDefinition>,
    pub initial_state: StateId,
    pub transitions: Vec<Transition>,
    pub conditional_transitions: Vec<ConditionalTransitionGroup>,
    pub concurrency: Option<ConcurrencyConfig>,
    pub error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl WorkflowDefinition {
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.states.is_empty() {
            return Err(WorkflowError::InvalidDefinition(format!(
                "workflow '{}' has no states",
                self.name
            )));
        }
        if !self.states.contains_key(&self.initial_state) {
            return Err(WorkflowError::InvalidDefinition(format!(
                "workflow '{}' initial state '{}' is not defined",
                self.name, self.initial_state
            )));
        }
        for transition in &self.transitions {
            if !self.states.contains_key(&transition.to) {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "workflow '{}' transition targets undefined state '{}'",
                    self.name, transition.to
                )));
            }
        }
        for group in &self.conditional_transitions {
            for candidate in &group.transitions {
                if !self.states.contains_key(&candidate.to) {
                    return Err(WorkflowError::InvalidDefinition(format!(
                        "workflow '{}' conditional transition targets undefined state '{}'",
                        self.name, candidate.to
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolves the next step for a plain (non-`goto`) advance out of
    /// `current`. If a conditional-transition group applies to `current`,
    /// it is authoritative: the first matching guard wins, and if none
    /// match, the group's `default` is taken (or the workflow terminates if
    /// `default` is `None`) — the explicit transition table and the
    /// declaration-order fallback are never consulted in that case. Only
    /// when no conditional group applies to `current` do those two tiers
    /// run, in order.
    pub fn resolve_next(
        &self,
        current: &StateId,
        context: &WorkflowContext,
    ) -> WorkflowResult<NextStep> {
        if let Some(group) = self
            .conditional_transitions
            .iter()
            .find(|g| &g.from == current)
        {
            for candidate in &group.transitions {
                if (candidate.condition)(context) {
                    let output = candidate.output.as_ref().map(|o| o.resolve(context));
                    return Ok(NextStep::Goto(candidate.to.clone(), output));
                }
            }
            return Ok(match &group.default {
                Some(default_to) => {
                    let output = group.default_virtual_output.as_ref().map(|o| o.resolve(context));
                    NextStep::Goto(default_to.clone(), output)
                }
                None => NextStep::Terminate,
            });
        }

        if let Some(transition) = self.transitions.iter().find(|t| &t.from == current) {
            return Ok(NextStep::Goto(transition.to.clone(), None));
        }

        let index = self
            .states
            .get_index_of(current)
            .ok_or_else(|| WorkflowError::NotFound(format!("state '{}' not found", current)))?;
        match self.states.get_index(index + 1) {
            Some((next_id, _)) => Ok(NextStep::Goto(next_id.clone(), None)),
            None => Err(WorkflowError::InvalidStateTransition {
                from: current.clone(),
                to: "<none>".to_string(),
            }),
        }
    }

    /// Whether `to` is a legal plain-advance target from `from`, per the
    /// same priority order `resolve_next` uses. `goto` targets bypass this
    /// check entirely by design.
    pub fn can_transition(&self, from: &StateId, to: &StateId) -> bool {
        if !self.states.contains_key(to) {
            return false;
        }
        let conditional_ok = self
            .conditional_transitions
            .iter()
            .find(|g| &g.from == from)
            .map(|g| g.transitions.iter().any(|c| &c.to == to) || g.default.as_ref() == Some(to))
            .unwrap_or(false);
        if conditional_ok {
            return true;
        }
        let explicit_ok = self.transitions.iter().any(|t| &t.from == from && &t.to == to);
        if explicit_ok {
            return true;
        }
        match self.states.get_index_of(from) {
            Some(index) => self
                .states
                .get_index(index + 1)
                .map(|(next_id, _)| next_id == to)
                .unwrap_or(false),
            None => false,
        }
    }
}

/// Fluent builder for `WorkflowDefinition`, mirroring the teacher's
/// `Task::new().with_config(...)` chained-builder idiom.
pub struct WorkflowDefinitionBuilder {
    name: String,
    states: IndexMap<StateId, StateDefinition>,
    initial_state: Option<StateId>,
    transitions: Vec<Transition>,
    conditional_transitions: Vec<ConditionalTransitionGroup>,
    concurrency: Option<ConcurrencyConfig>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl WorkflowDefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: IndexMap::new(),
            initial_state: None,
            transitions: Vec::new(),
            conditional_transitions: Vec::new(),
            concurrency: None,
            error_handler: None,
        }
    }

    pub fn state(mut self, definition: StateDefinition) -> Self {
        if self.initial_state.is_none() {
            self.initial_state = Some(definition.id.clone());
        }
        self.states.insert(definition.id.clone(), definition);
        self
    }

    pub fn initial_state(mut self, id: impl Into<StateId>) -> Self {
        self.initial_state = Some(id.into());
        self
    }

    pub fn transition(mut self, from: impl Into<StateId>, to: impl Into<StateId>) -> Self {
        self.transitions.push(Transition {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn conditional_transitions(mut self, group: ConditionalTransitionGroup) -> Self {
        self.conditional_transitions.push(group);
        self
    }

    pub fn concurrency(mut self, config: ConcurrencyConfig) -> Self {
        self.concurrency = Some(config);
        self
    }

    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn build(self) -> WorkflowResult<WorkflowDefinition> {
        let initial_state = self.initial_state.ok_or_else(|| {
            WorkflowError::InvalidDefinition(format!(
                "workflow '{}' has no initial state",
                self.name
            ))
        })?;

        let definition = WorkflowDefinition {
            name: self.name,
            states: self.states,
            initial_state,
            transitions: self.transitions,
            conditional_transitions: self.conditional_transitions,
            concurrency: self.concurrency,
            error_handler: self.error_handler,
        };
        definition.validate()?;
        Ok(definition)
    }
}
