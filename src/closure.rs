//! Closure-table tree reconstruction
//!
//! A closure table persists one row per (ancestor, descendant) pair, including
//! a depth-0 self row per node. [`ClosureTreeBuilder`] turns a flat row set into
//! a fresh [`Tree`] either top-down (root to leaves) or bottom-up (a single
//! leaf-to-root ancestor chain). The builder never touches storage and never
//! caches; the rows come from a [`crate::store::ClosureRepository`].

use crate::error::StructureError;
use crate::resource::PathResource;
use crate::tree::{Tree, TreeNode};
use crate::types::{NodeId, UNBOUNDED};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// One ancestor/descendant pair plus the descendant's payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureRow {
    pub ancestor_id: NodeId,
    pub depth: u32,
    pub descendant: PathResource,
}

impl ClosureRow {
    pub fn new(ancestor_id: NodeId, depth: u32, descendant: PathResource) -> Self {
        Self {
            ancestor_id,
            depth,
            descendant,
        }
    }

    /// Depth-0 row of a node with itself
    pub fn self_row(resource: PathResource) -> Self {
        Self::new(resource.id(), 0, resource)
    }

    pub fn descendant_id(&self) -> NodeId {
        self.descendant.id()
    }

    pub fn is_immediate(&self) -> bool {
        self.depth == 1
    }
}

/// Rows indexed by node id with the immediate (depth 1) edges split out
struct RowIndex {
    payloads: HashMap<NodeId, PathResource>,
    parents: HashMap<NodeId, NodeId>,
    /// Children per parent in first-seen row order
    children: HashMap<NodeId, Vec<NodeId>>,
}

impl RowIndex {
    fn build(rows: Vec<ClosureRow>) -> Result<Self, StructureError> {
        if rows.is_empty() {
            return Err(StructureError::EmptyRows);
        }

        let mut payloads = HashMap::new();
        let mut parents: HashMap<NodeId, NodeId> = HashMap::new();
        let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

        for row in rows {
            let node_id = row.descendant_id();
            if row.is_immediate() {
                if row.ancestor_id == node_id {
                    return Err(StructureError::Cycle(node_id));
                }
                match parents.get(&node_id) {
                    Some(existing) if *existing != row.ancestor_id => {
                        return Err(StructureError::MultipleParents {
                            node: node_id,
                            first: *existing,
                            second: row.ancestor_id,
                        });
                    }
                    Some(_) => {}
                    None => {
                        parents.insert(node_id, row.ancestor_id);
                        children.entry(row.ancestor_id).or_default().push(node_id);
                    }
                }
            }
            payloads.entry(node_id).or_insert(row.descendant);
        }

        Ok(Self {
            payloads,
            parents,
            children,
        })
    }

    /// Take a payload and stamp its parent link from the immediate edges
    fn take(&mut self, node_id: NodeId) -> Option<PathResource> {
        let mut resource = self.payloads.remove(&node_id)?;
        if let Some(parent) = self.parents.get(&node_id) {
            resource.node.parent_node_id = Some(*parent);
        }
        Some(resource)
    }
}

/// Converts closure rows into trees
pub struct ClosureTreeBuilder {
    rows: Vec<ClosureRow>,
}

impl ClosureTreeBuilder {
    pub fn new(rows: Vec<ClosureRow>) -> Self {
        Self { rows }
    }

    /// Build the subtree under `root_id`, attaching at most `depth` levels below
    /// the root. Pass [`UNBOUNDED`] for no limit.
    pub fn top_down(self, root_id: NodeId, depth: u32) -> Result<Tree<PathResource>, StructureError> {
        let row_count = self.rows.len();
        let mut index = RowIndex::build(self.rows)?;

        if !index.payloads.contains_key(&root_id) {
            return Err(StructureError::MissingRoot(root_id));
        }
        if let Some(parent) = index.parents.get(&root_id) {
            if index.payloads.contains_key(parent) {
                return Err(StructureError::RootHasParent {
                    root: root_id,
                    parent: *parent,
                });
            }
        }

        let mut attached = HashSet::new();
        let mut path = HashSet::new();
        let root = attach(&mut index, root_id, 0, depth, &mut path, &mut attached)?;

        check_leftovers(&index, root_id, &attached)?;

        debug!(
            root_id,
            rows = row_count,
            nodes = attached.len(),
            depth,
            "Built top-down tree"
        );
        Ok(Tree::new(root))
    }

    /// Build the ancestor chain of `leaf_id`, walking at most `levels` hops
    /// upward. Pass [`UNBOUNDED`] to walk to the store root. The returned tree
    /// is rooted at the topmost ancestor reached and has a single branch.
    pub fn bottom_up(self, leaf_id: NodeId, levels: u32) -> Result<Tree<PathResource>, StructureError> {
        let mut index = RowIndex::build(self.rows)?;

        if !index.payloads.contains_key(&leaf_id) {
            return Err(StructureError::MissingRoot(leaf_id));
        }

        let mut chain = vec![leaf_id];
        let mut visited = HashSet::from([leaf_id]);
        let mut current = leaf_id;
        let mut hops = 0u32;

        while hops < levels {
            match index.parents.get(&current).copied() {
                Some(parent) => {
                    if !index.payloads.contains_key(&parent) {
                        return Err(StructureError::MissingParent {
                            node: current,
                            parent,
                        });
                    }
                    if !visited.insert(parent) {
                        return Err(StructureError::Cycle(parent));
                    }
                    chain.push(parent);
                    current = parent;
                    hops += 1;
                }
                None => {
                    // A node that records a parent but has no edge means the
                    // row set was cut short before the store root.
                    if let Some(parent) = index.payloads[&current].parent_id() {
                        return Err(StructureError::MissingParent {
                            node: current,
                            parent,
                        });
                    }
                    break;
                }
            }
        }

        // chain is leaf-first; nest from the leaf outward
        let mut below: Option<TreeNode<PathResource>> = None;
        for node_id in chain.iter().copied() {
            let mut resource = index
                .take(node_id)
                .ok_or(StructureError::Cycle(node_id))?;
            resource.node.child_node_id = below.as_ref().map(|child| child.data.id());
            let mut node = TreeNode::new(resource);
            if let Some(child) = below.take() {
                node.children.push(child);
            }
            below = Some(node);
        }

        let root = below.ok_or(StructureError::MissingRoot(leaf_id))?;
        debug!(leaf_id, hops, levels, "Built bottom-up chain");
        Ok(Tree::new(root))
    }
}

fn attach(
    index: &mut RowIndex,
    node_id: NodeId,
    level: u32,
    max_depth: u32,
    path: &mut HashSet<NodeId>,
    attached: &mut HashSet<NodeId>,
) -> Result<TreeNode<PathResource>, StructureError> {
    if !path.insert(node_id) {
        return Err(StructureError::Cycle(node_id));
    }
    let resource = index.take(node_id).ok_or(StructureError::Cycle(node_id))?;
    attached.insert(node_id);

    let mut node = TreeNode::new(resource);
    if level < max_depth {
        let child_ids = index.children.get(&node_id).cloned().unwrap_or_default();
        for child_id in child_ids {
            let child = attach(index, child_id, level + 1, max_depth, path, attached)?;
            node.children.push(child);
        }
    }

    path.remove(&node_id);
    Ok(node)
}

/// Classify nodes left unattached: either cut off by the depth bound (their
/// parent chain reaches the tree), or malformed.
fn check_leftovers(
    index: &RowIndex,
    root_id: NodeId,
    attached: &HashSet<NodeId>,
) -> Result<(), StructureError> {
    let mut leftovers: Vec<NodeId> = index.payloads.keys().copied().collect();
    leftovers.sort_unstable();

    for node_id in leftovers {
        let mut seen = HashSet::from([node_id]);
        let mut current = node_id;
        loop {
            let Some(parent) = index.parents.get(&current).copied() else {
                let parent = index
                    .payloads
                    .get(&current)
                    .and_then(|r| r.parent_id())
                    .unwrap_or(root_id);
                return Err(StructureError::Detached {
                    node: current,
                    parent,
                });
            };
            if attached.contains(&parent) {
                break;
            }
            if !seen.insert(parent) {
                return Err(StructureError::Cycle(parent));
            }
            if !index.payloads.contains_key(&parent) {
                return Err(StructureError::Detached {
                    node: current,
                    parent,
                });
            }
            current = parent;
        }
    }
    Ok(())
}

/// Convenience: top-down with no depth bound
pub fn build_full_tree(rows: Vec<ClosureRow>, root_id: NodeId) -> Result<Tree<PathResource>, StructureError> {
    ClosureTreeBuilder::new(rows).top_down(root_id, UNBOUNDED)
}
