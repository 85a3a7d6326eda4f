//! Tasks and task identity
//!
//! A [`Task`] is a named, prioritized unit of work run by a
//! [`queue::TaskQueue`] worker. Ids come from a [`TaskIdCounter`] shared by
//! every queue in the process, so ids are comparable across queues.

pub mod queue;

pub use queue::{QueueConfig, QueueStats, StopOutcome, TaskQueue};

use crate::types::TaskId;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Priority level for queued work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Urgent = 3,
}

/// Boxed task body
pub type TaskFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A unit of work for a task queue
pub struct Task {
    name: String,
    priority: Priority,
    job: TaskFuture,
}

impl Task {
    pub fn new<F>(name: impl Into<String>, job: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            priority: Priority::default(),
            job: job.boxed(),
        }
    }

    /// Wrap a synchronous closure.
    ///
    /// The closure runs on the blocking pool while the queue worker awaits it,
    /// so the queue stays serial and sled or tantivy I/O never parks a runtime
    /// thread. Panics are re-raised on the worker.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self::new(name, async move {
            match tokio::task::spawn_blocking(f).await {
                Ok(result) => result,
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => Err(err.into()),
            }
        })
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub(crate) fn into_parts(self) -> (String, Priority, TaskFuture) {
        (self.name, self.priority, self.job)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Monotonic task id source.
///
/// Create one at process start and hand clones to every queue; it is never
/// reset. Ids start at 1.
#[derive(Debug, Clone, Default)]
pub struct TaskIdCounter(Arc<AtomicU64>);

impl TaskIdCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> TaskId {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Most recently issued id, 0 if none
    pub fn last_issued(&self) -> TaskId {
        self.0.load(Ordering::SeqCst)
    }
}
