//! `Engine`: the top-level facade registering workflow definitions and
//! dispatching `execute`/`resume`/`get`/`find` to the right executor.

use crate::concurrency::ConcurrencyManager;
use crate::definition::WorkflowDefinition;
use crate::error::{WorkflowError, WorkflowResult};
use crate::executor::{ExecuteOptions, ResumeOptions, WorkflowExecutor};
use crate::handler::Plugin;
use crate::interfaces::{ExecutionFilter, LockAdapter, Logger, PersistenceAdapter, TracingLogger};
use crate::state::WorkflowExecution;
use dashmap::DashMap;
use std::sync::Arc;

/// Registers workflow definitions and routes calls to the executor backing
/// each one, the way the teacher's `WorkflowEngine`/`WorkflowEngineBuilder`
/// pair fronts its own executor.
pub struct Engine {
    persistence: Arc<dyn PersistenceAdapter>,
    lock_adapter: Option<Arc<dyn LockAdapter>>,
    logger: Arc<dyn Logger>,
    executors: DashMap<String, Arc<WorkflowExecutor>>,
}

impl Engine {
    pub fn new(persistence: Arc<dyn PersistenceAdapter>) -> Self {
        Self {
            persistence,
            lock_adapter: None,
            logger: Arc::new(TracingLogger),
            executors: DashMap::new(),
        }
    }

    pub fn with_lock_adapter(mut self, lock_adapter: Arc<dyn LockAdapter>) -> Self {
        self.lock_adapter = Some(lock_adapter);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Registers a workflow definition, building the `WorkflowExecutor` that
    /// backs it. Fails if the definition configures a concurrency mode that
    /// needs a `LockAdapter` but the engine wasn't given one.
    pub async fn register(
        &self,
        definition: WorkflowDefinition,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> WorkflowResult<()> {
        for plugin in &plugins {
            plugin.on_init().await;
        }

        let name = definition.name.clone();

        let concurrency_manager = match &definition.concurrency {
            Some(_) => {
                let lock_adapter = self.lock_adapter.clone().ok_or_else(|| {
                    WorkflowError::InvalidDefinition(format!(
                        "workflow '{}' configures concurrency but the engine has no LockAdapter",
                        name
                    ))
                })?;
                Some(Arc::new(ConcurrencyManager::new(lock_adapter)))
            }
            None => None,
        };

        let executor = WorkflowExecutor::new(
            Arc::new(definition),
            self.persistence.clone(),
            concurrency_manager,
            self.logger.clone(),
            plugins,
        );

        self.executors.insert(name, Arc::new(executor));
        Ok(())
    }

    pub async fn execute(
        &self,
        workflow_name: &str,
        options: ExecuteOptions,
    ) -> WorkflowResult<WorkflowExecution> {
        self.executor_for(workflow_name)?.execute(options).await
    }

    pub async fn resume(
        &self,
        workflow_name: &str,
        execution_id: &str,
        options: ResumeOptions,
    ) -> WorkflowResult<WorkflowExecution> {
        let executor = self.executor_for(workflow_name)?;
        let execution = self
            .persistence
            .load(execution_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("execution '{}' not found", execution_id)))?;
        executor.resume(execution, options).await
    }

    pub async fn get(&self, execution_id: &str) -> WorkflowResult<Option<WorkflowExecution>> {
        self.persistence.load(execution_id).await
    }

    pub async fn find(&self, filter: ExecutionFilter) -> WorkflowResult<Vec<WorkflowExecution>> {
        self.persistence.find(filter).await
    }

    fn executor_for(&self, workflow_name: &str) -> WorkflowResult<Arc<WorkflowExecutor>> {
        self.executors
            .get(workflow_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| WorkflowError::NotFound(format!("workflow '{}' is not registered", workflow_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Actions, ExecutionResult, State};
    use crate::definition::{StateDefinition, WorkflowDefinitionBuilder};
    use crate::interfaces::ExecutionFilter;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct CompleteImmediately;

    #[async_trait]
    impl State for CompleteImmediately {
        async fn execute(&self, actions: &Actions<'_>) -> WorkflowResult<ExecutionResult> {
            Ok(actions.complete(None))
        }
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
            self.store.lock().unwrap().insert(execution.id.clone(), execution.clone());
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

    #[tokio::test]
    async fn register_then_execute_roundtrips_through_get() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let engine = Engine::new(persistence);

        let definition = WorkflowDefinitionBuilder::new("onboarding")
            .state(StateDefinition::new("start", Arc::new(CompleteImmediately)))
            .build()
            .unwrap();

        engine.register(definition, Vec::new()).await.unwrap();

        let execution = engine
            .execute("onboarding", ExecuteOptions::default())
            .await
            .unwrap();

        let fetched = engine.get(&execution.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, execution.id);
    }

    #[tokio::test]
    async fn execute_unregistered_workflow_fails() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let engine = Engine::new(persistence);
        let result = engine.execute("missing", ExecuteOptions::default()).await;
        assert!(result.is_err());
    }
}
