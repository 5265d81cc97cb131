//! # Workflow Engine
//!
//! A durable, concurrency-aware workflow engine that drives user-defined
//! finite state machines to completion, persisting progress after every
//! transition.
//!
//! ## Features
//!
//! - **State machine execution**: named states with explicit and conditional
//!   transition tables, plus a declaration-order fallback.
//! - **Retry policies**: configurable backoff (fixed, linear, exponential)
//!   per state, with an error handler consulted on every failed attempt.
//! - **Concurrency groups**: `SEQUENTIAL` (distributed hard lock),
//!   `THROTTLE` (bounded soft lock), and `PARALLEL` execution modes.
//! - **Error handling pipeline**: a single `ErrorHandler::handle` call
//!   normalized into a `Decision`, consulted at every hookable phase.
//! - **Plugins**: cross-cutting `before_execute`/`after_execute`/`on_error`/
//!   `extend_context` hooks invoked in registration order.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use workflow_engine::prelude::*;
//! use std::sync::Arc;
//!
//! struct Greet;
//!
//! #[async_trait::async_trait]
//! impl State for Greet {
//!     async fn execute(&self, actions: &Actions<'_>) -> WorkflowResult<ExecutionResult> {
//!         Ok(actions.complete(Some(serde_json::json!({"greeting": "hello"}))))
//!     }
//! }
//!
//! # async fn in_memory_persistence() -> Arc<dyn PersistenceAdapter> { unimplemented!() }
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let definition = WorkflowDefinitionBuilder::new("greeting")
//!     .state(StateDefinition::new("greet", Arc::new(Greet)))
//!     .build()?;
//!
//! let engine = Engine::new(in_memory_persistence().await);
//! engine.register(definition, Vec::new()).await?;
//!
//! let execution = engine.execute("greeting", ExecuteOptions::default()).await?;
//! assert!(matches!(execution.status, WorkflowStatus::Completed));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Composition is leaves-first: the state registry feeds the concurrency
//! manager (which wraps a `LockAdapter`), which feeds the state executor,
//! which feeds the retry engine (which consults the error handler), which
//! feeds the workflow executor (which composes all of the above), which the
//! top-level `Engine` fronts.
//!
//! - **`state`**: the persisted data model (`WorkflowContext`,
//!   `WorkflowExecution`, transition history).
//! - **`definition`**: `WorkflowDefinition`, its states and transition
//!   tables, and the fluent builders used to construct one.
//! - **`action`**: the `State` trait state bodies implement, and the
//!   `Actions` handle they use to declare their outcome.
//! - **`state_executor`**: runs one state through its hook lifecycle and
//!   timeout.
//! - **`retry`**: retry policies and the engine that drives a state through
//!   them, consulting the error handler on every failure.
//! - **`handler`**: `ErrorHandler` and `Plugin`, and the `Decision`/
//!   `HandlerOutcome` types the executor acts on.
//! - **`concurrency`**: group-scoped locking in front of state execution.
//! - **`executor`**: the transition loop tying everything together.
//! - **`engine`**: the top-level facade registering definitions and routing
//!   `execute`/`resume`/`get`/`find`.
//! - **`interfaces`**: the `PersistenceAdapter`/`LockAdapter`/`Logger` traits
//!   the core depends on but never implements for production use.

pub mod action;
pub mod concurrency;
pub mod definition;
pub mod engine;
pub mod error;
pub mod executor;
pub mod handler;
pub mod interfaces;
pub mod retry;
pub mod state;
pub mod state_executor;

pub use action::{Actions, ExecutionResult, State};
pub use concurrency::{ConcurrencyConfig, ConcurrencyManager, ConcurrencyMode, GroupBy};
pub use definition::{
    ConditionalTransition, ConditionalTransitionGroup, NextStep, StateDefinition, Transition,
    VirtualOutput, WorkflowDefinition, WorkflowDefinitionBuilder,
};
pub use engine::Engine;
pub use error::{WorkflowError, WorkflowResult};
pub use executor::{ExecuteOptions, ResumeOptions, ResumeStrategy, WorkflowExecutor};
pub use handler::{Decision, ErrorHandler, ErrorPhase, HandlerOutcome, Plugin};
pub use interfaces::{ExecutionFilter, LockAdapter, Logger, PersistenceAdapter, TracingLogger};
pub use retry::{RetryEngine, RetryOutcome, RetryPolicy, RetryStrategy};
pub use state::{
    ContextMetadata, StateId, SuspensionInfo, TransitionRecord, TransitionStatus,
    WorkflowContext, WorkflowExecution, WorkflowStatus,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::action::{Actions, ExecutionResult, State};
    pub use crate::concurrency::{ConcurrencyConfig, ConcurrencyMode, GroupBy};
    pub use crate::definition::{StateDefinition, WorkflowDefinition, WorkflowDefinitionBuilder};
    pub use crate::engine::Engine;
    pub use crate::error::{WorkflowError, WorkflowResult};
    pub use crate::executor::{ExecuteOptions, ResumeOptions, ResumeStrategy};
    pub use crate::handler::{Decision, ErrorHandler, HandlerOutcome, Plugin};
    pub use crate::interfaces::{ExecutionFilter, LockAdapter, Logger, PersistenceAdapter};
    pub use crate::retry::{RetryPolicy, RetryStrategy};
    pub use crate::state::{WorkflowContext, WorkflowExecution, WorkflowStatus};
}

/// Current version of the workflow engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
