//! Closure-table persistence contract
//!
//! The tree engine reads through [`ClosureRepository`]; it never issues
//! storage queries itself. [`persistence::SledResourceStore`] is the bundled
//! sled-backed implementation.

pub mod persistence;

use crate::closure::ClosureRow;
use crate::error::StorageError;
use crate::resource::{PathResource, Store};
use crate::types::{NodeId, StoreId};

/// Read side of the closure table
pub trait ClosureRepository: Send + Sync {
    /// All ancestor/descendant pairs inside the window of nodes at most
    /// `max_depth` below `root_id`, including depth-0 self rows.
    fn list_descendants(&self, root_id: NodeId, max_depth: u32) -> Result<Vec<ClosureRow>, StorageError>;

    /// All ancestor/descendant pairs inside the window of `node_id` and its
    /// ancestors at most `max_levels` above it, including self rows.
    fn list_ancestors(&self, node_id: NodeId, max_levels: u32) -> Result<Vec<ClosureRow>, StorageError>;

    fn get_node(&self, node_id: NodeId) -> Result<Option<PathResource>, StorageError>;

    fn get_store(&self, store_id: StoreId) -> Result<Option<Store>, StorageError>;
}
