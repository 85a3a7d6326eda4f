//! Storetree: permission-aware closure-table resource trees
//!
//! Stores hold directories and files whose hierarchy is kept as a closure
//! table. Trees are rebuilt from closure rows top-down or bottom-up and
//! annotated with each user's effective read/write/execute rights. Mutations
//! run on per-store task queues, one writer per task category, and files are
//! indexed for full-text search per store.

pub mod closure;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod events;
pub mod index;
pub mod logging;
pub mod operations;
pub mod permission;
pub mod resource;
pub mod service;
pub mod store;
pub mod task;
pub mod tooling;
pub mod tree;
pub mod types;

pub use closure::{ClosureRow, ClosureTreeBuilder};
pub use concurrency::{StoreConcurrencyManager, TaskCategory};
pub use error::ApiError;
pub use index::StoreIndexLifecycle;
pub use operations::ResourceOperations;
pub use permission::{GroupMembership, PermissionEvaluator};
pub use resource::{AccessGrants, AccessRule, PathResource, Store};
pub use service::{SecureTreeService, ViewPolicy};
pub use store::persistence::SledResourceStore;
pub use task::{Task, TaskQueue};
pub use tree::{Tree, TreeNode};
