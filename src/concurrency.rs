//! The concurrency manager: group-scoped locking in front of state
//! execution, with the distributed `LockAdapter` as the source of truth and
//! the in-memory table as a reentrancy cache / local optimization.

use crate::error::WorkflowResult;
use crate::interfaces::LockAdapter;
use crate::state::WorkflowContext;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// How executions of the same workflow are grouped for concurrency control.
pub enum GroupBy {
    Field(String),
    Function(Arc<dyn Fn(&WorkflowContext) -> String + Send + Sync>),
}

impl GroupBy {
    pub fn resolve(&self, context: &WorkflowContext) -> String {
        match self {
            GroupBy::Field(field) => context
                .data
                .get(field)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| context.execution_id.clone()),
            GroupBy::Function(f) => f(context),
        }
    }
}

/// Concurrency discipline applied within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcurrencyMode {
    /// Hard lock: only one execution per group may run at a time, enforced
    /// through the `LockAdapter`.
    Sequential,
    /// Soft lock: up to `max_concurrent` executions per group may run
    /// at once, tracked only in memory.
    Throttle,
    /// No coordination at all.
    Parallel,
}

pub struct ConcurrencyConfig {
    pub group_by: GroupBy,
    pub mode: ConcurrencyMode,
    pub max_concurrent_after_unlock: Option<usize>,
}

#[derive(Debug, Clone, Default)]
struct SoftLock {
    active_executions: HashSet<String>,
    max_concurrent: usize,
}

#[derive(Debug, Clone, Default)]
struct GroupLockInfo {
    hard_locked: bool,
    current_execution: Option<String>,
    soft_lock: SoftLock,
}

impl GroupLockInfo {
    fn is_empty(&self) -> bool {
        !self.hard_locked
            && self.current_execution.is_none()
            && self.soft_lock.active_executions.is_empty()
    }
}

/// Tracks group locks across all in-flight executions. `SEQUENTIAL` groups
/// mirror their hard lock through a `LockAdapter`; `THROTTLE` groups are
/// purely in-memory, with size bounded by `max_concurrent`.
pub struct ConcurrencyManager {
    locks: DashMap<String, GroupLockInfo>,
    lock_adapter: Arc<dyn LockAdapter>,
}

impl ConcurrencyManager {
    pub fn new(lock_adapter: Arc<dyn LockAdapter>) -> Self {
        Self {
            locks: DashMap::new(),
            lock_adapter,
        }
    }

    pub fn group_id_for(&self, config: &ConcurrencyConfig, context: &WorkflowContext) -> String {
        config.group_by.resolve(context)
    }

    /// Attempts to acquire the group lock for `execution_id`. Returns
    /// `Ok(true)` if the execution may proceed now.
    pub async fn acquire_group_lock(
        &self,
        group_id: &str,
        execution_id: &str,
        config: &ConcurrencyConfig,
    ) -> WorkflowResult<bool> {
        match config.mode {
            ConcurrencyMode::Parallel => Ok(true),

            ConcurrencyMode::Throttle => {
                let max_concurrent = config.max_concurrent_after_unlock.unwrap_or(1);
                let mut entry = self.locks.entry(group_id.to_string()).or_default();
                if entry.soft_lock.active_executions.contains(execution_id) {
                    return Ok(true);
                }
                if entry.soft_lock.active_executions.len() >= max_concurrent {
                    return Ok(false);
                }
                entry.soft_lock.max_concurrent = max_concurrent;
                entry
                    .soft_lock
                    .active_executions
                    .insert(execution_id.to_string());
                Ok(true)
            }

            ConcurrencyMode::Sequential => {
                // Reentrant: an execution that already holds the lock may
                // re-acquire it.
                let already_held = {
                    let entry = self.locks.get(group_id);
                    matches!(
                        entry.as_deref(),
                        Some(info) if info.hard_locked && info.current_execution.as_deref() == Some(execution_id)
                    )
                };
                if already_held {
                    return Ok(true);
                }

                let key = format!("workflow:group:{}", group_id);
                let acquired = self.lock_adapter.acquire(&key, execution_id).await?;
                if !acquired {
                    return Ok(false);
                }

                let mut entry = self.locks.entry(group_id.to_string()).or_default();
                entry.hard_locked = true;
                entry.current_execution = Some(execution_id.to_string());
                entry.soft_lock.active_executions.insert(execution_id.to_string());
                Ok(true)
            }
        }
    }

    /// Releases a SEQUENTIAL group's hard lock early, used by `unlock_after`
    /// states that want to let the next queued execution in the group
    /// acquire the lock while this one keeps running to completion. The
    /// execution stays recorded in `active_executions` — it hasn't finished,
    /// it has just relinquished exclusivity — so the eventual terminal
    /// `release_group_lock` still has bookkeeping to clean up.
    pub async fn partial_unlock(&self, group_id: &str, execution_id: &str) -> WorkflowResult<()> {
        let should_release = match self.locks.get_mut(group_id) {
            Some(mut entry) => {
                if entry.hard_locked && entry.current_execution.as_deref() == Some(execution_id) {
                    entry.hard_locked = false;
                    entry.current_execution = None;
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        if should_release {
            let key = format!("workflow:group:{}", group_id);
            self.lock_adapter.release(&key).await?;
        }

        Ok(())
    }

    /// Releases whatever lock `execution_id` holds on `group_id`. Idempotent;
    /// a no-op if the group or execution isn't tracked.
    pub async fn release_group_lock(
        &self,
        group_id: &str,
        execution_id: &str,
    ) -> WorkflowResult<()> {
        let should_release_hard = {
            match self.locks.get_mut(group_id) {
                Some(mut entry) => {
                    entry.soft_lock.active_executions.remove(execution_id);
                    if entry.current_execution.as_deref() == Some(execution_id) {
                        entry.hard_locked = false;
                        entry.current_execution = None;
                        true
                    } else {
                        false
                    }
                }
                None => return Ok(()),
            }
        };

        if should_release_hard {
            let key = format!("workflow:group:{}", group_id);
            self.lock_adapter.release(&key).await?;
        }

        // Drop now-empty group entries.
        if let Some(entry) = self.locks.get(group_id) {
            if entry.is_empty() {
                drop(entry);
                self.locks.remove(group_id);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct AlwaysGrantLock {
        granted: AtomicBool,
    }

    #[async_trait]
    impl LockAdapter for AlwaysGrantLock {
        async fn acquire(&self, _key: &str, _holder: &str) -> WorkflowResult<bool> {
            Ok(!self.granted.swap(true, Ordering::SeqCst))
        }
        async fn release(&self, _key: &str) -> WorkflowResult<()> {
            self.granted.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn is_locked(&self, _key: &str) -> WorkflowResult<bool> {
            Ok(self.granted.load(Ordering::SeqCst))
        }
        async fn extend(&self, _key: &str, _ttl: Duration) -> WorkflowResult<bool> {
            Ok(true)
        }
    }

    fn config(mode: ConcurrencyMode) -> ConcurrencyConfig {
        ConcurrencyConfig {
            group_by: GroupBy::Field("tenant".to_string()),
            mode,
            max_concurrent_after_unlock: Some(2),
        }
    }

    #[tokio::test]
    async fn sequential_lock_is_exclusive_and_reentrant() {
        let adapter = Arc::new(AlwaysGrantLock {
            granted: AtomicBool::new(false),
        });
        let manager = ConcurrencyManager::new(adapter);
        let cfg = config(ConcurrencyMode::Sequential);

        assert!(manager.acquire_group_lock("g1", "exec_a", &cfg).await.unwrap());
        // Reentrant for the same execution.
        assert!(manager.acquire_group_lock("g1", "exec_a", &cfg).await.unwrap());
        // Denied for a different execution.
        assert!(!manager.acquire_group_lock("g1", "exec_b", &cfg).await.unwrap());

        manager.release_group_lock("g1", "exec_a").await.unwrap();
        assert!(manager.acquire_group_lock("g1", "exec_b", &cfg).await.unwrap());
    }

    #[tokio::test]
    async fn partial_unlock_frees_hard_lock_but_keeps_execution_active() {
        let adapter = Arc::new(AlwaysGrantLock {
            granted: AtomicBool::new(false),
        });
        let manager = ConcurrencyManager::new(adapter);
        let cfg = config(ConcurrencyMode::Sequential);

        assert!(manager.acquire_group_lock("g1", "exec_a", &cfg).await.unwrap());
        // Still exclusive before unlock_after fires.
        assert!(!manager.acquire_group_lock("g1", "exec_b", &cfg).await.unwrap());

        manager.partial_unlock("g1", "exec_a").await.unwrap();

        // The hard lock is free; a different execution may now acquire it.
        assert!(manager.acquire_group_lock("g1", "exec_b", &cfg).await.unwrap());
        // exec_a relinquished exclusivity, not membership: a no-op partial
        // unlock on an execution that no longer owns the hard lock changes
        // nothing.
        manager.partial_unlock("g1", "exec_a").await.unwrap();

        manager.release_group_lock("g1", "exec_b").await.unwrap();
        manager.release_group_lock("g1", "exec_a").await.unwrap();
        assert!(manager.acquire_group_lock("g1", "exec_c", &cfg).await.unwrap());
    }

    #[tokio::test]
    async fn throttle_bounds_concurrent_executions() {
        let adapter = Arc::new(AlwaysGrantLock {
            granted: AtomicBool::new(false),
        });
        let manager = ConcurrencyManager::new(adapter);
        let cfg = config(ConcurrencyMode::Throttle);

        assert!(manager.acquire_group_lock("g1", "a", &cfg).await.unwrap());
        assert!(manager.acquire_group_lock("g1", "b", &cfg).await.unwrap());
        assert!(!manager.acquire_group_lock("g1", "c", &cfg).await.unwrap());

        manager.release_group_lock("g1", "a").await.unwrap();
        assert!(manager.acquire_group_lock("g1", "c", &cfg).await.unwrap());
    }

    #[tokio::test]
    async fn parallel_mode_never_blocks() {
        let adapter = Arc::new(AlwaysGrantLock {
            granted: AtomicBool::new(false),
        });
        let manager = ConcurrencyManager::new(adapter);
        let cfg = config(ConcurrencyMode::Parallel);

        assert!(manager.acquire_group_lock("g1", "a", &cfg).await.unwrap());
        assert!(manager.acquire_group_lock("g1", "b", &cfg).await.unwrap());
    }
}
