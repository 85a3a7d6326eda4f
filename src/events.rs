//! Directory change notifications
//!
//! Tasks announce successful mutations on a per-directory topic. Delivery is
//! fire-and-forget: publishing with nobody listening is not an error.

use crate::types::NodeId;
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{timeout_at, Instant};
use tracing::trace;

/// What changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeCode {
    DirectoryCreated,
    FileCreated,
    Renamed,
    Moved,
    Deleted,
    GrantsChanged,
    ContentWritten,
    IndexUpdated,
}

impl fmt::Display for ChangeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ChangeCode::DirectoryCreated => "DIRECTORY_CREATED",
            ChangeCode::FileCreated => "FILE_CREATED",
            ChangeCode::Renamed => "RENAMED",
            ChangeCode::Moved => "MOVED",
            ChangeCode::Deleted => "DELETED",
            ChangeCode::GrantsChanged => "GRANTS_CHANGED",
            ChangeCode::ContentWritten => "CONTENT_WRITTEN",
            ChangeCode::IndexUpdated => "INDEX_UPDATED",
        };
        f.write_str(code)
    }
}

/// Payload announced to subscribers of a directory topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub code: ChangeCode,
    pub message: String,
    /// Node the change applies to
    pub node_id: NodeId,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl ChangeEvent {
    pub fn new(code: ChangeCode, node_id: NodeId, message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            code,
            message: message.into(),
            node_id,
            date: now.date_naive(),
            time: now.time(),
        }
    }
}

/// Topic for changes inside directory `node_id`
pub fn topic_for(node_id: NodeId) -> String {
    format!("directory.{}", node_id)
}

/// Publish side of the notification channel
pub trait ChangePublisher: Send + Sync {
    fn publish(&self, topic: &str, event: ChangeEvent);
}

/// An event together with its topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub event: ChangeEvent,
}

/// In-process publisher over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<Published>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ChangePublisher for BroadcastPublisher {
    fn publish(&self, topic: &str, event: ChangeEvent) {
        let published = Published {
            topic: topic.to_string(),
            event,
        };
        match self.sender.send(published) {
            Ok(receivers) => trace!(topic, receivers, "Published change event"),
            Err(_) => trace!(topic, "Published change event with no subscribers"),
        }
    }
}

/// Receive until an event matches `accept` or `limit` elapses.
///
/// Lagged receivers skip the lost events and keep waiting.
pub async fn wait_for_event<F>(
    receiver: &mut broadcast::Receiver<Published>,
    limit: Duration,
    mut accept: F,
) -> Option<Published>
where
    F: FnMut(&Published) -> bool,
{
    let deadline = Instant::now() + limit;
    loop {
        match timeout_at(deadline, receiver.recv()).await {
            Ok(Ok(published)) if accept(&published) => return Some(published),
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return None,
        }
    }
}
