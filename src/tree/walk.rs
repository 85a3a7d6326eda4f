//! Tree traversal utilities: walk, fold-down, print, sort, count, filter.

use super::{Tree, TreeNode};
use std::cmp::Ordering;

/// Pre-order walk. The visitor receives the payload, its depth (root = 0),
/// and the parent payload.
pub fn walk_pre_order<T, F>(tree: &Tree<T>, mut visit: F)
where
    F: FnMut(&T, usize, Option<&T>),
{
    fn go<T, F: FnMut(&T, usize, Option<&T>)>(
        node: &TreeNode<T>,
        depth: usize,
        parent: Option<&T>,
        visit: &mut F,
    ) {
        visit(&node.data, depth, parent);
        for child in &node.children {
            go(child, depth + 1, Some(&node.data), visit);
        }
    }
    go(tree.root(), 0, None, &mut visit);
}

/// Post-order walk: children before their parent.
pub fn walk_post_order<T, F>(tree: &Tree<T>, mut visit: F)
where
    F: FnMut(&T, usize, Option<&T>),
{
    fn go<T, F: FnMut(&T, usize, Option<&T>)>(
        node: &TreeNode<T>,
        depth: usize,
        parent: Option<&T>,
        visit: &mut F,
    ) {
        for child in &node.children {
            go(child, depth + 1, Some(&node.data), visit);
        }
        visit(&node.data, depth, parent);
    }
    go(tree.root(), 0, None, &mut visit);
}

/// Pre-order walk that threads a state value from each node to its children.
///
/// `visit` mutates the node and returns the state its children see. The first
/// error stops the walk.
pub fn try_descend<T, S, E, F>(tree: &mut Tree<T>, seed: S, mut visit: F) -> Result<(), E>
where
    F: FnMut(&mut T, &S) -> Result<S, E>,
{
    fn go<T, S, E, F: FnMut(&mut T, &S) -> Result<S, E>>(
        node: &mut TreeNode<T>,
        inherited: &S,
        visit: &mut F,
    ) -> Result<(), E> {
        let state = visit(&mut node.data, inherited)?;
        for child in node.children.iter_mut() {
            go(child, &state, visit)?;
        }
        Ok(())
    }
    go(tree.root_mut(), &seed, &mut visit)
}

/// Number of nodes in the tree
pub fn count<T>(tree: &Tree<T>) -> usize {
    let mut n = 0;
    walk_pre_order(tree, |_, _, _| n += 1);
    n
}

/// Immediate parent/child pairs, keyed by `key`
pub fn edges<T, K, F>(tree: &Tree<T>, key: F) -> Vec<(K, K)>
where
    F: Fn(&T) -> K,
{
    let mut out = Vec::new();
    walk_pre_order(tree, |node, _, parent| {
        if let Some(parent) = parent {
            out.push((key(parent), key(node)));
        }
    });
    out
}

/// First payload in pre-order matching `pred`
pub fn find<'a, T, F>(tree: &'a Tree<T>, pred: F) -> Option<&'a T>
where
    F: Fn(&T) -> bool,
{
    fn go<'a, T, F: Fn(&T) -> bool>(node: &'a TreeNode<T>, pred: &F) -> Option<&'a T> {
        if pred(&node.data) {
            return Some(&node.data);
        }
        node.children.iter().find_map(|child| go(child, pred))
    }
    go(tree.root(), &pred)
}

/// Payloads along the first-child branch, root first.
///
/// Meant for single-branch trees such as bottom-up ancestor chains.
pub fn chain<T>(tree: &Tree<T>) -> Vec<&T> {
    let mut out = Vec::new();
    let mut current = Some(tree.root());
    while let Some(node) = current {
        out.push(&node.data);
        current = node.children.first();
    }
    out
}

/// Recursively stable-sort every node's children
pub fn sort_children_by<T, F>(tree: &mut Tree<T>, mut cmp: F)
where
    F: FnMut(&T, &T) -> Ordering,
{
    fn go<T, F: FnMut(&T, &T) -> Ordering>(node: &mut TreeNode<T>, cmp: &mut F) {
        node.children.sort_by(|a, b| cmp(&a.data, &b.data));
        for child in node.children.iter_mut() {
            go(child, cmp);
        }
    }
    go(tree.root_mut(), &mut cmp);
}

/// Drop every non-root subtree whose top payload fails `keep`.
/// Returns the number of nodes removed.
pub fn retain<T, F>(tree: &mut Tree<T>, keep: F) -> usize
where
    F: Fn(&T) -> bool,
{
    fn subtree_size<T>(node: &TreeNode<T>) -> usize {
        1 + node.children.iter().map(subtree_size).sum::<usize>()
    }
    fn go<T, F: Fn(&T) -> bool>(node: &mut TreeNode<T>, keep: &F) -> usize {
        let mut removed = 0;
        node.children.retain(|child| {
            if keep(&child.data) {
                true
            } else {
                removed += subtree_size(child);
                false
            }
        });
        for child in node.children.iter_mut() {
            removed += go(child, keep);
        }
        removed
    }
    go(tree.root_mut(), &keep)
}

/// Render as indented text, one node per line
pub fn render<T, F>(tree: &Tree<T>, label: F) -> String
where
    F: Fn(&T) -> String,
{
    let mut out = String::new();
    walk_pre_order(tree, |node, depth, _| {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&"  ".repeat(depth));
        out.push_str(&label(node));
    });
    out
}
