//! Generic tree container
//!
//! Trees are per-query snapshots: built fresh, annotated once, then read.
//! Parent access during traversal is provided by the walkers in [`walk`]
//! rather than stored back-references.

pub mod node;
pub mod walk;

pub use node::TreeNode;

/// Owns exactly one root node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree<T> {
    root: TreeNode<T>,
}

impl<T> Tree<T> {
    pub fn new(root: TreeNode<T>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &TreeNode<T> {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut TreeNode<T> {
        &mut self.root
    }

    pub fn into_root(self) -> TreeNode<T> {
        self.root
    }

    pub fn len(&self) -> usize {
        walk::count(self)
    }

    /// A tree always holds its root, so it is never empty
    pub fn is_empty(&self) -> bool {
        false
    }
}
