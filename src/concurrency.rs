//! Per-store write serialization
//!
//! Every store gets three single-worker queues, one per [`TaskCategory`]. Work
//! in one category of one store is serialized; different stores and different
//! categories run in parallel. No explicit locks are handed to callers.

use crate::error::QueueError;
use crate::task::{QueueConfig, StopOutcome, Task, TaskIdCounter, TaskQueue};
use crate::types::{StoreId, TaskId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Axis along which per-store work is serialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    /// Metadata mutations: create, rename, move, delete
    General,
    /// Large content writes
    Binary,
    /// Search index mutations
    Index,
}

impl TaskCategory {
    /// Stop order used by [`StoreConcurrencyManager::stop_store`]
    pub const ALL: [TaskCategory; 3] = [TaskCategory::General, TaskCategory::Binary, TaskCategory::Index];

    pub fn label(self) -> &'static str {
        match self {
            TaskCategory::General => "general",
            TaskCategory::Binary => "binary",
            TaskCategory::Index => "index",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The three queues owned by one store
pub struct StoreQueues {
    general: TaskQueue,
    binary: TaskQueue,
    index: TaskQueue,
}

impl StoreQueues {
    fn start(store_id: StoreId, ids: &TaskIdCounter, config: &QueueConfig) -> Result<Self, QueueError> {
        let start = |category: TaskCategory| {
            TaskQueue::start(format!("store-{}-{}", store_id, category), ids.clone(), config.clone())
        };
        Ok(Self {
            general: start(TaskCategory::General)?,
            binary: start(TaskCategory::Binary)?,
            index: start(TaskCategory::Index)?,
        })
    }

    pub fn get(&self, category: TaskCategory) -> &TaskQueue {
        match category {
            TaskCategory::General => &self.general,
            TaskCategory::Binary => &self.binary,
            TaskCategory::Index => &self.index,
        }
    }
}

struct Registry {
    queues: HashMap<StoreId, Arc<StoreQueues>>,
    /// Cleared by `stop_all_managers`; no new stores are started afterwards
    accepting: bool,
}

/// Maps each store to its general, binary, and index queues
pub struct StoreConcurrencyManager {
    stores: RwLock<Registry>,
    ids: TaskIdCounter,
    config: QueueConfig,
}

impl StoreConcurrencyManager {
    pub fn new(ids: TaskIdCounter, config: QueueConfig) -> Self {
        Self {
            stores: RwLock::new(Registry {
                queues: HashMap::new(),
                accepting: true,
            }),
            ids,
            config,
        }
    }

    pub fn ids(&self) -> &TaskIdCounter {
        &self.ids
    }

    /// Get or lazily start the queues for a store.
    ///
    /// A store that has been stopped keeps its stopped queues, so later
    /// submissions are rejected instead of silently restarting it. Once every
    /// manager has been stopped, unknown stores are rejected too.
    fn queues(&self, store_id: StoreId) -> Result<Arc<StoreQueues>, QueueError> {
        {
            let stores = self.stores.read();
            if let Some(queues) = stores.queues.get(&store_id) {
                return Ok(Arc::clone(queues));
            }
        }

        let mut stores = self.stores.write();
        // Another thread may have won the race
        if let Some(queues) = stores.queues.get(&store_id) {
            return Ok(Arc::clone(queues));
        }
        if !stores.accepting {
            warn!(store_id, "Rejected task for a store first used after shutdown");
            return Err(QueueError::SubmissionRejected {
                queue: format!("store-{}", store_id),
            });
        }
        let queues = Arc::new(StoreQueues::start(store_id, &self.ids, &self.config)?);
        stores.queues.insert(store_id, Arc::clone(&queues));
        info!(store_id, "Started store task queues");
        Ok(queues)
    }

    /// Enqueue `task` on the store's queue for `category`
    pub fn submit(&self, store_id: StoreId, category: TaskCategory, task: Task) -> Result<TaskId, QueueError> {
        let task_name = task.name().to_string();
        let id = self.queues(store_id)?.get(category).submit(task)?;
        debug!(store_id, %category, task_id = id, task = %task_name, "Routed task");
        Ok(id)
    }

    /// Tasks waiting on one queue; 0 for stores that were never used
    pub fn queue_size(&self, store_id: StoreId, category: TaskCategory) -> usize {
        self.stores
            .read()
            .queues
            .get(&store_id)
            .map(|queues| queues.get(category).size())
            .unwrap_or(0)
    }

    pub fn store_ids(&self) -> Vec<StoreId> {
        let mut ids: Vec<StoreId> = self.stores.read().queues.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Wait until all three queues of a store are idle. False on timeout.
    pub async fn wait_for_idle(&self, store_id: StoreId, limit: Duration) -> bool {
        let Some(queues) = self.stores.read().queues.get(&store_id).cloned() else {
            return true;
        };
        for category in TaskCategory::ALL {
            if !queues.get(category).wait_for_idle(limit).await {
                return false;
            }
        }
        true
    }

    /// Stop a store's queues in order: general, binary, index
    pub async fn stop_store(&self, store_id: StoreId) -> Vec<(TaskCategory, StopOutcome)> {
        let Some(queues) = self.stores.read().queues.get(&store_id).cloned() else {
            return Vec::new();
        };

        let mut outcomes = Vec::with_capacity(TaskCategory::ALL.len());
        for category in TaskCategory::ALL {
            let outcome = queues.get(category).shutdown().await;
            if !matches!(outcome, StopOutcome::Graceful | StopOutcome::AlreadyStopped) {
                warn!(store_id, %category, ?outcome, "Store queue did not stop gracefully");
            }
            outcomes.push((category, outcome));
        }
        info!(store_id, "Stopped store task queues");
        outcomes
    }

    /// Stop every store's queues.
    ///
    /// Stores are stopped one after another; if the process dies midway, later
    /// stores are left running while earlier ones are already stopped. The
    /// manager stops accepting new stores before the snapshot is taken, so no
    /// store can slip in behind it.
    pub async fn stop_all_managers(&self) -> HashMap<StoreId, Vec<(TaskCategory, StopOutcome)>> {
        let store_ids = {
            let mut stores = self.stores.write();
            stores.accepting = false;
            let mut ids: Vec<StoreId> = stores.queues.keys().copied().collect();
            ids.sort_unstable();
            ids
        };
        info!(stores = store_ids.len(), "Stopping all store task queues");

        let mut results = HashMap::with_capacity(store_ids.len());
        for store_id in store_ids {
            results.insert(store_id, self.stop_store(store_id).await);
        }
        results
    }
}
