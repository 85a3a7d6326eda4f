//! Error types for storetree.
//!
//! Each component owns a narrow error enum; `ApiError` is the umbrella surfaced
//! by the service and operations layers.

use crate::types::{NodeId, StoreId, TaskId};
use thiserror::Error;

/// Malformed, empty, or cyclic closure row sets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StructureError {
    #[error("closure row set is empty")]
    EmptyRows,

    #[error("requested node {0} is absent from the row set")]
    MissingRoot(NodeId),

    #[error("root {root} has parent {parent} inside the row set")]
    RootHasParent { root: NodeId, parent: NodeId },

    #[error("node {node} has more than one parent ({first} and {second})")]
    MultipleParents {
        node: NodeId,
        first: NodeId,
        second: NodeId,
    },

    #[error("cycle detected at node {0}")]
    Cycle(NodeId),

    #[error("node {node} references parent {parent} which is not reachable from the root")]
    Detached { node: NodeId, parent: NodeId },

    #[error("ancestor {parent} of node {node} is missing from the row set")]
    MissingParent { node: NodeId, parent: NodeId },
}

/// Failures of the group-membership capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("membership lookup for group '{group}' failed: {reason}")]
    MembershipUnavailable { group: String, reason: String },

    #[error("membership lookup for group '{group}' timed out")]
    Timeout { group: String },
}

/// Task queue submission and lifecycle errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue '{queue}' is stopped; task rejected")]
    SubmissionRejected { queue: String },

    #[error("no async runtime available to start queue '{0}'")]
    NoRuntime(String),

    #[error("queue '{queue}' did not shut down: {reason}")]
    Lifecycle { queue: String, reason: String },
}

/// Search index errors.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index for store {store_id} is already held by another writer")]
    Lock { store_id: StoreId },

    #[error("search index error: {0}")]
    Search(#[from] tantivy::TantivyError),

    #[error("invalid search query: {0}")]
    Query(#[from] tantivy::query::QueryParserError),

    #[error("index for store {0} has been closed")]
    Closed(StoreId),

    #[error("index directory error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence errors from the closure-table backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("record encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("store not found: {0}")]
    StoreNotFound(StoreId),

    #[error("store name already taken: {0}")]
    StoreNameTaken(String),

    #[error("invalid move of node {node} under {target}: {reason}")]
    InvalidMove {
        node: NodeId,
        target: NodeId,
        reason: String,
    },

    #[error("node {0} is not a directory")]
    NotADirectory(NodeId),

    #[error("node {0} is not a file")]
    NotAFile(NodeId),

    #[error("content of {size} bytes exceeds store limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("invalid resource name: {0}")]
    InvalidName(String),
}

/// Umbrella error for the public API surface.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("task {0} did not complete; see the log for the cause")]
    TaskIncomplete(TaskId),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
