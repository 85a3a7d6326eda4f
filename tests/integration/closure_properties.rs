use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};
use storetree::closure::{ClosureRow, ClosureTreeBuilder};
use storetree::error::StructureError;
use storetree::resource::PathResource;
use storetree::tree::walk;
use storetree::types::{NodeId, UNBOUNDED};

const ROOT: NodeId = 1;

/// Random store tree: node `i + 2` hangs under one of the nodes before it
fn forest() -> impl Strategy<Value = HashMap<NodeId, NodeId>> {
    prop::collection::vec(any::<prop::sample::Index>(), 0..40).prop_map(|picks| {
        let mut parents = HashMap::new();
        for (i, pick) in picks.iter().enumerate() {
            let node = i as NodeId + 2;
            let parent = pick.index(i + 1) as NodeId + 1;
            parents.insert(node, parent);
        }
        parents
    })
}

fn ancestors(parents: &HashMap<NodeId, NodeId>, node: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut current = node;
    while let Some(parent) = parents.get(&current) {
        out.push(*parent);
        current = *parent;
    }
    out
}

fn resource(parents: &HashMap<NodeId, NodeId>, node: NodeId) -> PathResource {
    let resource = PathResource::directory(node, 1, format!("n{}", node), format!("/n{}", node));
    match parents.get(&node) {
        Some(parent) => resource.with_parent(*parent),
        None => resource,
    }
}

fn all_nodes(parents: &HashMap<NodeId, NodeId>) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = parents.keys().copied().collect();
    nodes.push(ROOT);
    nodes.sort_unstable();
    nodes
}

/// Every (ancestor, descendant) pair of the forest, self rows included
fn closure_rows(parents: &HashMap<NodeId, NodeId>) -> Vec<ClosureRow> {
    let mut rows = Vec::new();
    for node in all_nodes(parents) {
        let payload = resource(parents, node);
        rows.push(ClosureRow::self_row(payload.clone()));
        for (depth, ancestor) in ancestors(parents, node).into_iter().enumerate() {
            rows.push(ClosureRow::new(ancestor, depth as u32 + 1, payload.clone()));
        }
    }
    rows
}

fn edge_set(parents: &HashMap<NodeId, NodeId>) -> BTreeSet<(NodeId, NodeId)> {
    parents.iter().map(|(child, parent)| (*parent, *child)).collect()
}

proptest! {
    #[test]
    fn full_build_reproduces_every_edge(parents in forest(), reverse in any::<bool>()) {
        let mut rows = closure_rows(&parents);
        if reverse {
            rows.reverse();
        }
        let tree = ClosureTreeBuilder::new(rows).top_down(ROOT, UNBOUNDED).unwrap();

        prop_assert_eq!(tree.len(), parents.len() + 1);
        let built: BTreeSet<_> = walk::edges(&tree, |r: &PathResource| r.id()).into_iter().collect();
        prop_assert_eq!(built, edge_set(&parents));
    }

    #[test]
    fn depth_bound_keeps_exactly_the_shallow_nodes(parents in forest(), depth in 0u32..5) {
        let tree = ClosureTreeBuilder::new(closure_rows(&parents)).top_down(ROOT, depth).unwrap();

        let expected: BTreeSet<NodeId> = all_nodes(&parents)
            .into_iter()
            .filter(|node| ancestors(&parents, *node).len() as u32 <= depth)
            .collect();
        let mut built = BTreeSet::new();
        walk::walk_pre_order(&tree, |r: &PathResource, _, _| {
            built.insert(r.id());
        });
        prop_assert_eq!(built, expected);
    }

    #[test]
    fn bottom_up_chain_matches_ancestry(parents in forest(), pick in any::<prop::sample::Index>()) {
        let nodes = all_nodes(&parents);
        let leaf = nodes[pick.index(nodes.len())];
        let tree = ClosureTreeBuilder::new(closure_rows(&parents)).bottom_up(leaf, UNBOUNDED).unwrap();

        let chain: Vec<NodeId> = walk::chain(&tree).into_iter().map(|r| r.id()).collect();
        let mut expected = ancestors(&parents, leaf);
        expected.reverse();
        expected.push(leaf);
        prop_assert_eq!(chain, expected);
        prop_assert_eq!(tree.len(), ancestors(&parents, leaf).len() + 1);
    }

    #[test]
    fn bottom_up_levels_truncate_from_the_top(parents in forest(), pick in any::<prop::sample::Index>(), levels in 0u32..4) {
        let nodes = all_nodes(&parents);
        let leaf = nodes[pick.index(nodes.len())];
        let tree = ClosureTreeBuilder::new(closure_rows(&parents)).bottom_up(leaf, levels).unwrap();

        let hops = ancestors(&parents, leaf).len().min(levels as usize);
        prop_assert_eq!(tree.len(), hops + 1);
        let chain = walk::chain(&tree);
        prop_assert_eq!(chain.last().map(|r| r.id()), Some(leaf));
    }

    #[test]
    fn subtree_with_outside_ancestors_is_rejected(parents in forest(), pick in any::<prop::sample::Index>()) {
        prop_assume!(!parents.is_empty());
        let mut children: Vec<NodeId> = parents.keys().copied().collect();
        children.sort_unstable();
        let node = children[pick.index(children.len())];

        let err = ClosureTreeBuilder::new(closure_rows(&parents)).top_down(node, UNBOUNDED).unwrap_err();
        prop_assert_eq!(err, StructureError::RootHasParent { root: node, parent: parents[&node] });
    }
}

#[test]
fn subtree_rows_build_below_any_node() {
    // 1 -> 2 -> 3 -> 4, and 2 -> 5
    let parents: HashMap<NodeId, NodeId> = [(2, 1), (3, 2), (4, 3), (5, 2)].into_iter().collect();
    let subtree: Vec<ClosureRow> = closure_rows(&parents)
        .into_iter()
        .filter(|row| {
            let inside = |id: NodeId| id == 2 || ancestors(&parents, id).contains(&2);
            inside(row.ancestor_id) && inside(row.descendant_id())
        })
        .collect();

    let tree = ClosureTreeBuilder::new(subtree).top_down(2, UNBOUNDED).unwrap();
    assert_eq!(tree.root().data.id(), 2);
    let edges: BTreeSet<_> = walk::edges(&tree, |r: &PathResource| r.id()).into_iter().collect();
    assert_eq!(edges, [(2, 3), (3, 4), (2, 5)].into_iter().collect());
}

#[test]
fn empty_rows_are_an_error() {
    let err = ClosureTreeBuilder::new(Vec::new()).top_down(ROOT, UNBOUNDED).unwrap_err();
    assert_eq!(err, StructureError::EmptyRows);
}
