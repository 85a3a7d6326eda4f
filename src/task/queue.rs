//! Single-worker priority task queue
//!
//! Tasks are ordered by priority, then by ascending task id. One background
//! worker drains the queue, so tasks on the same queue never overlap.

use super::{Priority, Task, TaskFuture, TaskIdCounter};
use crate::error::QueueError;
use crate::types::TaskId;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BinaryHeap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Timing knobs shared by every queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Upper bound on how long an idle worker waits before rechecking for stop
    pub poll_interval_ms: u64,
    /// How long `stop` waits for the in-flight task
    pub grace_period_ms: u64,
    /// Additional wait after the worker has been aborted
    pub force_period_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            grace_period_ms: 5000,
            force_period_ms: 2000,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn force_period(&self) -> Duration {
        Duration::from_millis(self.force_period_ms)
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Tasks waiting to run
    pub pending: usize,
    /// Tasks currently running (0 or 1)
    pub processing: usize,
    pub completed: usize,
    /// Tasks that returned an error or panicked
    pub failed: usize,
    /// Tasks dropped by `stop` without running
    pub discarded: usize,
}

/// How a `stop` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Worker finished within the grace period
    Graceful,
    /// Worker had to be aborted and exited within the force period
    Forced,
    /// Worker ignored the abort; it is detached and left running
    Abandoned,
    /// Queue was already stopped
    AlreadyStopped,
}

struct QueuedTask {
    id: TaskId,
    name: String,
    priority: Priority,
    submitted_at: DateTime<Utc>,
    job: TaskFuture,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for QueuedTask {}

impl Ord for QueuedTask {
    /// Higher priority first; for equal priority the lower id compares Greater
    /// so the max-heap pops it first.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.priority.cmp(&other.priority) {
            std::cmp::Ordering::Equal => self.id.cmp(&other.id).reverse(),
            ordering => ordering,
        }
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct Pending {
    heap: BinaryHeap<QueuedTask>,
    accepting: bool,
}

struct Shared {
    name: String,
    pending: Mutex<Pending>,
    notify: Notify,
    running: AtomicBool,
    stats: RwLock<QueueStats>,
}

/// A priority queue with exactly one consumer
pub struct TaskQueue {
    shared: Arc<Shared>,
    ids: TaskIdCounter,
    config: QueueConfig,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
    /// Create the queue and spawn its worker on the current tokio runtime
    pub fn start(name: impl Into<String>, ids: TaskIdCounter, config: QueueConfig) -> Result<Self, QueueError> {
        let name = name.into();
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| QueueError::NoRuntime(name.clone()))?;

        let shared = Arc::new(Shared {
            name: name.clone(),
            pending: Mutex::new(Pending {
                heap: BinaryHeap::new(),
                accepting: true,
            }),
            notify: Notify::new(),
            running: AtomicBool::new(true),
            stats: RwLock::new(QueueStats::default()),
        });

        let worker = runtime.spawn(Self::worker_loop(Arc::clone(&shared), config.poll_interval()));
        info!(queue = %name, "Started task queue worker");

        Ok(Self {
            shared,
            ids,
            config,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Enqueue a task and return its id without waiting for it to run
    pub fn submit(&self, task: Task) -> Result<TaskId, QueueError> {
        let (name, priority, job) = task.into_parts();
        let id = {
            let mut pending = self.shared.pending.lock();
            if !pending.accepting {
                warn!(queue = %self.shared.name, task = %name, "Rejected task submitted after stop");
                return Err(QueueError::SubmissionRejected {
                    queue: self.shared.name.clone(),
                });
            }
            // Id is drawn under the lock so heap order agrees with id order
            let id = self.ids.next_id();
            pending.heap.push(QueuedTask {
                id,
                name: name.clone(),
                priority,
                submitted_at: Utc::now(),
                job,
            });
            self.shared.stats.write().pending = pending.heap.len();
            id
        };

        self.shared.notify.notify_one();
        debug!(queue = %self.shared.name, task_id = id, task = %name, ?priority, "Submitted task");
        Ok(id)
    }

    /// Number of tasks waiting to run, excluding the in-flight one
    pub fn size(&self) -> usize {
        self.shared.pending.lock().heap.len()
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.pending.lock().accepting
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = self.shared.stats.read().clone();
        stats.pending = self.size();
        stats
    }

    /// Wait until nothing is queued or running. Returns false on timeout.
    pub async fn wait_for_idle(&self, limit: Duration) -> bool {
        let start = Instant::now();
        loop {
            let idle = {
                let pending = self.shared.pending.lock();
                pending.heap.is_empty() && self.shared.stats.read().processing == 0
            };
            if idle {
                return true;
            }
            if start.elapsed() >= limit {
                return false;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stop using the configured grace and force periods
    pub async fn shutdown(&self) -> StopOutcome {
        self.stop(self.config.grace_period(), self.config.force_period()).await
    }

    /// Discard queued tasks, then stop the worker.
    ///
    /// Waits up to `grace` for the in-flight task, aborts the worker, and waits
    /// up to `force` more. A worker that still has not exited is logged and
    /// detached; this method never fails.
    pub async fn stop(&self, grace: Duration, force: Duration) -> StopOutcome {
        let discarded = {
            let mut pending = self.shared.pending.lock();
            pending.accepting = false;
            let discarded = pending.heap.len();
            pending.heap.clear();
            discarded
        };
        {
            let mut stats = self.shared.stats.write();
            stats.pending = 0;
            stats.discarded += discarded;
        }

        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.notify.notify_one();

        let Some(mut handle) = self.worker.lock().take() else {
            return StopOutcome::AlreadyStopped;
        };
        if discarded > 0 {
            info!(queue = %self.shared.name, discarded, "Discarded queued tasks on stop");
        }

        if timeout(grace, &mut handle).await.is_ok() {
            info!(queue = %self.shared.name, "Stopped task queue worker");
            return StopOutcome::Graceful;
        }

        warn!(
            queue = %self.shared.name,
            grace_ms = grace.as_millis() as u64,
            "Worker did not finish within grace period, aborting"
        );
        handle.abort();

        if timeout(force, &mut handle).await.is_ok() {
            return StopOutcome::Forced;
        }

        let err = QueueError::Lifecycle {
            queue: self.shared.name.clone(),
            reason: format!("worker still running {}ms after abort", force.as_millis()),
        };
        error!(queue = %self.shared.name, error = %err, "Fatal: abandoning task queue worker");
        StopOutcome::Abandoned
    }

    async fn worker_loop(shared: Arc<Shared>, poll_interval: Duration) {
        debug!(queue = %shared.name, "Worker started");

        while shared.running.load(Ordering::SeqCst) {
            let next = {
                let mut pending = shared.pending.lock();
                let next = pending.heap.pop();
                if next.is_some() {
                    let mut stats = shared.stats.write();
                    stats.pending = pending.heap.len();
                    stats.processing += 1;
                }
                next
            };

            let Some(task) = next else {
                tokio::select! {
                    _ = shared.notify.notified() => {}
                    _ = sleep(poll_interval) => {}
                }
                continue;
            };

            Self::run_task(&shared, task).await;
        }

        debug!(queue = %shared.name, "Worker stopped");
    }

    async fn run_task(shared: &Shared, task: QueuedTask) {
        let QueuedTask {
            id,
            name,
            submitted_at,
            job,
            ..
        } = task;
        let waited_ms = (Utc::now() - submitted_at).num_milliseconds();
        let started = Instant::now();

        let result = AssertUnwindSafe(job).catch_unwind().await;

        let mut stats = shared.stats.write();
        stats.processing = stats.processing.saturating_sub(1);
        match result {
            Ok(Ok(())) => {
                stats.completed += 1;
                debug!(
                    queue = %shared.name,
                    task_id = id,
                    task = %name,
                    waited_ms,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Task completed"
                );
            }
            Ok(Err(err)) => {
                stats.failed += 1;
                error!(queue = %shared.name, task_id = id, task = %name, error = %err, "Task failed");
            }
            Err(panic) => {
                stats.failed += 1;
                error!(
                    queue = %shared.name,
                    task_id = id,
                    task = %name,
                    panic = %panic_message(&*panic),
                    "Task panicked"
                );
            }
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.shared.pending.lock().accepting = false;
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.notify.notify_one();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
