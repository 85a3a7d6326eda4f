//! Mutation façade
//!
//! Every mutation is routed onto one of the owning store's queues and returns
//! its task id at once. A task that succeeds announces a [`ChangeEvent`] on the
//! affected directory's topic; index maintenance is queued separately on the
//! store's index queue.

use crate::concurrency::{StoreConcurrencyManager, TaskCategory};
use crate::error::{ApiError, StorageError};
use crate::events::{topic_for, ChangeCode, ChangeEvent, ChangePublisher};
use crate::index::{SearchHit, StoreIndexLifecycle};
use crate::resource::{AccessGrants, PathResource};
use crate::store::persistence::{FileSpec, SledResourceStore};
use crate::store::ClosureRepository;
use crate::task::Task;
use crate::types::{NodeId, StoreId, TaskId, UNBOUNDED};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

enum IndexChange {
    Upsert(Vec<NodeId>),
    Remove(Vec<NodeId>),
}

struct Shared {
    resources: SledResourceStore,
    queues: StoreConcurrencyManager,
    indexes: StoreIndexLifecycle,
    publisher: Arc<dyn ChangePublisher>,
}

impl Shared {
    fn announce(&self, directory: NodeId, code: ChangeCode, node_id: NodeId, message: String) {
        debug!(directory, %code, node_id, "Announcing change");
        self.publisher
            .publish(&topic_for(directory), ChangeEvent::new(code, node_id, message));
    }

    /// Ids of `node_id` and everything below it
    fn subtree_ids(&self, node_id: NodeId) -> Result<Vec<NodeId>, StorageError> {
        let mut ids: Vec<NodeId> = self
            .resources
            .list_descendants(node_id, UNBOUNDED)?
            .into_iter()
            .filter(|row| row.ancestor_id == node_id)
            .map(|row| row.descendant_id())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn text_content(&self, resource: &PathResource) -> Result<Option<String>, StorageError> {
        if !resource.is_file() {
            return Ok(None);
        }
        Ok(self
            .resources
            .read_blob(resource.id())?
            .and_then(|bytes| String::from_utf8(bytes).ok()))
    }

    fn apply_index(&self, store_id: StoreId, change: &IndexChange) -> anyhow::Result<usize> {
        let handle = self.indexes.get_or_create_index(store_id)?;
        let touched = match change {
            IndexChange::Upsert(ids) => {
                for node_id in ids {
                    match self.resources.get_node(*node_id)? {
                        Some(resource) => {
                            let content = self.text_content(&resource)?;
                            handle.upsert(&resource, content.as_deref())?;
                        }
                        // removed before the index caught up
                        None => handle.remove(*node_id)?,
                    }
                }
                ids.len()
            }
            IndexChange::Remove(ids) => {
                for node_id in ids {
                    handle.remove(*node_id)?;
                }
                ids.len()
            }
        };
        handle.commit()?;
        Ok(touched)
    }

    /// Queue index maintenance. The metadata change has already happened, so a
    /// stopped index queue is logged rather than failing the caller.
    fn schedule_index(self: &Arc<Self>, store_id: StoreId, directory: NodeId, change: IndexChange) {
        let shared = Arc::clone(self);
        let task = Task::from_fn(format!("index store {}", store_id), move || {
            let touched = shared.apply_index(store_id, &change)?;
            shared.announce(
                directory,
                ChangeCode::IndexUpdated,
                directory,
                format!("Search index updated for {} resource(s)", touched),
            );
            Ok(())
        });
        if let Err(err) = self.queues.submit(store_id, TaskCategory::Index, task) {
            warn!(store_id, error = %err, "Index update not queued");
        }
    }
}

/// Queued create/rename/move/delete/grant/content/index operations
#[derive(Clone)]
pub struct ResourceOperations {
    shared: Arc<Shared>,
}

impl ResourceOperations {
    pub fn new(
        resources: SledResourceStore,
        queues: StoreConcurrencyManager,
        indexes: StoreIndexLifecycle,
        publisher: Arc<dyn ChangePublisher>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                resources,
                queues,
                indexes,
                publisher,
            }),
        }
    }

    pub fn resources(&self) -> &SledResourceStore {
        &self.shared.resources
    }

    pub fn queues(&self) -> &StoreConcurrencyManager {
        &self.shared.queues
    }

    pub fn indexes(&self) -> &StoreIndexLifecycle {
        &self.shared.indexes
    }

    fn node(&self, node_id: NodeId) -> Result<PathResource, ApiError> {
        self.shared
            .resources
            .get_node(node_id)?
            .ok_or_else(|| StorageError::NodeNotFound(node_id).into())
    }

    fn submit<F>(&self, store_id: StoreId, category: TaskCategory, name: String, job: F) -> Result<TaskId, ApiError>
    where
        F: FnOnce(&Arc<Shared>) -> anyhow::Result<()> + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let task = Task::from_fn(name, move || job(&shared));
        Ok(self.shared.queues.submit(store_id, category, task)?)
    }

    pub fn create_directory(
        &self,
        parent_id: NodeId,
        name: &str,
        grants: AccessGrants,
        description: Option<String>,
    ) -> Result<TaskId, ApiError> {
        let parent = self.node(parent_id)?;
        let name = name.to_string();
        self.submit(
            parent.store_id,
            TaskCategory::General,
            format!("mkdir {}", name),
            move |shared| {
                let created = shared
                    .resources
                    .create_directory(parent_id, &name, grants, description)?;
                shared.announce(
                    parent_id,
                    ChangeCode::DirectoryCreated,
                    created.id(),
                    format!("Directory {} created", created.relative_path),
                );
                shared.schedule_index(created.store_id, parent_id, IndexChange::Upsert(vec![created.id()]));
                Ok(())
            },
        )
    }

    pub fn create_file(&self, parent_id: NodeId, spec: FileSpec) -> Result<TaskId, ApiError> {
        let parent = self.node(parent_id)?;
        self.submit(
            parent.store_id,
            TaskCategory::General,
            format!("create {}", spec.name),
            move |shared| {
                let created = shared.resources.create_file(parent_id, spec)?;
                shared.announce(
                    parent_id,
                    ChangeCode::FileCreated,
                    created.id(),
                    format!("File {} created", created.relative_path),
                );
                shared.schedule_index(created.store_id, parent_id, IndexChange::Upsert(vec![created.id()]));
                Ok(())
            },
        )
    }

    pub fn rename(&self, node_id: NodeId, new_name: &str) -> Result<TaskId, ApiError> {
        let resource = self.node(node_id)?;
        let directory = resource.parent_id().unwrap_or(node_id);
        let new_name = new_name.to_string();
        self.submit(
            resource.store_id,
            TaskCategory::General,
            format!("rename {}", node_id),
            move |shared| {
                let renamed = shared.resources.rename(node_id, &new_name)?;
                shared.announce(
                    directory,
                    ChangeCode::Renamed,
                    node_id,
                    format!("Renamed to {}", renamed.relative_path),
                );
                let subtree = shared.subtree_ids(node_id)?;
                shared.schedule_index(renamed.store_id, directory, IndexChange::Upsert(subtree));
                Ok(())
            },
        )
    }

    pub fn move_node(&self, node_id: NodeId, target_id: NodeId) -> Result<TaskId, ApiError> {
        let resource = self.node(node_id)?;
        self.node(target_id)?;
        let old_parent = resource.parent_id().unwrap_or(node_id);
        self.submit(
            resource.store_id,
            TaskCategory::General,
            format!("move {} -> {}", node_id, target_id),
            move |shared| {
                let moved = shared.resources.move_node(node_id, target_id)?;
                let message = format!("Moved to {}", moved.relative_path);
                shared.announce(old_parent, ChangeCode::Moved, node_id, message.clone());
                shared.announce(target_id, ChangeCode::Moved, node_id, message);
                let subtree = shared.subtree_ids(node_id)?;
                shared.schedule_index(moved.store_id, target_id, IndexChange::Upsert(subtree));
                Ok(())
            },
        )
    }

    pub fn delete(&self, node_id: NodeId) -> Result<TaskId, ApiError> {
        let resource = self.node(node_id)?;
        let directory = resource.parent_id().unwrap_or(node_id);
        self.submit(
            resource.store_id,
            TaskCategory::General,
            format!("delete {}", node_id),
            move |shared| {
                let removed = shared.resources.delete_subtree(node_id)?;
                let ids: Vec<NodeId> = removed.iter().map(PathResource::id).collect();
                shared.announce(
                    directory,
                    ChangeCode::Deleted,
                    node_id,
                    format!("Deleted {} ({} resource(s))", resource.relative_path, ids.len()),
                );
                shared.schedule_index(resource.store_id, directory, IndexChange::Remove(ids));
                Ok(())
            },
        )
    }

    pub fn set_grants(&self, node_id: NodeId, grants: AccessGrants) -> Result<TaskId, ApiError> {
        let resource = self.node(node_id)?;
        let directory = resource.parent_id().unwrap_or(node_id);
        self.submit(
            resource.store_id,
            TaskCategory::General,
            format!("grant {}", node_id),
            move |shared| {
                let updated = shared.resources.set_grants(node_id, grants)?;
                shared.announce(
                    directory,
                    ChangeCode::GrantsChanged,
                    node_id,
                    format!("Access grants changed on {}", updated.relative_path),
                );
                Ok(())
            },
        )
    }

    /// Store file content inline on the binary queue.
    ///
    /// Kind and size are checked up front so the caller sees those errors
    /// directly instead of as a failed task.
    pub fn write_content(&self, node_id: NodeId, content: Vec<u8>) -> Result<TaskId, ApiError> {
        let resource = self.node(node_id)?;
        if !resource.is_file() {
            return Err(StorageError::NotAFile(node_id).into());
        }
        let store = self
            .shared
            .resources
            .get_store(resource.store_id)?
            .ok_or(StorageError::StoreNotFound(resource.store_id))?;
        let size = content.len() as u64;
        if size > store.max_file_size {
            return Err(StorageError::FileTooLarge {
                size,
                limit: store.max_file_size,
            }
            .into());
        }

        let directory = resource.parent_id().unwrap_or(node_id);
        self.submit(
            resource.store_id,
            TaskCategory::Binary,
            format!("write {} ({} bytes)", node_id, size),
            move |shared| {
                let written = shared.resources.write_blob(node_id, &content)?;
                shared.announce(
                    directory,
                    ChangeCode::ContentWritten,
                    node_id,
                    format!("{} bytes written to {}", size, written.relative_path),
                );
                shared.schedule_index(written.store_id, directory, IndexChange::Upsert(vec![node_id]));
                Ok(())
            },
        )
    }

    /// Re-index one resource on its store's index queue
    pub fn index_resource(&self, node_id: NodeId) -> Result<TaskId, ApiError> {
        let resource = self.node(node_id)?;
        let directory = resource.parent_id().unwrap_or(node_id);
        self.submit(
            resource.store_id,
            TaskCategory::Index,
            format!("index {}", node_id),
            move |shared| {
                shared.apply_index(resource.store_id, &IndexChange::Upsert(vec![node_id]))?;
                shared.announce(
                    directory,
                    ChangeCode::IndexUpdated,
                    node_id,
                    format!("Indexed {}", resource.relative_path),
                );
                Ok(())
            },
        )
    }

    pub fn remove_from_index(&self, store_id: StoreId, node_id: NodeId) -> Result<TaskId, ApiError> {
        self.submit(
            store_id,
            TaskCategory::Index,
            format!("unindex {}", node_id),
            move |shared| {
                shared.apply_index(store_id, &IndexChange::Remove(vec![node_id]))?;
                Ok(())
            },
        )
    }

    /// Search a store's index; `None` uses the configured default limit
    pub fn search(&self, store_id: StoreId, query: &str, limit: Option<usize>) -> Result<Vec<SearchHit>, ApiError> {
        let limit = limit.unwrap_or(self.shared.indexes.config().search_limit);
        let handle = self.shared.indexes.get_or_create_index(store_id)?;
        Ok(handle.search(query, limit)?)
    }

    /// Wait for every store's queues to drain. False on timeout.
    pub async fn settle(&self, limit: Duration) -> bool {
        for store_id in self.shared.queues.store_ids() {
            if !self.shared.queues.wait_for_idle(store_id, limit).await {
                return false;
            }
        }
        true
    }

    /// Stop all queues, close all indexes, and flush storage
    pub async fn shutdown(&self) {
        self.shared.queues.stop_all_managers().await;
        self.shared.indexes.close_all();
        if let Err(err) = self.shared.resources.flush() {
            warn!(error = %err, "Failed to flush storage on shutdown");
        }
        info!("Resource operations shut down");
    }
}
