//! Secure tree queries
//!
//! Reads closure rows, builds the tree, and annotates effective permissions for
//! one user. Inheritance is seeded from the full ancestor chain above the
//! returned tree, so a subtree or a truncated chain resolves the same rights
//! as it would inside the whole store.

use crate::closure::ClosureTreeBuilder;
use crate::error::{ApiError, StorageError};
use crate::permission::{EffectiveGrants, GroupMembership, PermissionEvaluator};
use crate::resource::{PathResource, Store};
use crate::store::ClosureRepository;
use crate::tree::{walk, Tree};
use crate::types::{NodeId, UNBOUNDED};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// What the service does with nodes the user cannot read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewPolicy {
    /// Return every node with its resolved flags
    #[default]
    Annotate,
    /// Drop unreadable subtrees below the requested node. Ancestor chains are
    /// never pruned, so the requested leaf always ends the chain.
    HideUnreadable,
}

/// Builds permission-annotated trees on request
pub struct SecureTreeService {
    repository: Arc<dyn ClosureRepository>,
    membership: Arc<dyn GroupMembership>,
    policy: ViewPolicy,
}

impl SecureTreeService {
    pub fn new(repository: Arc<dyn ClosureRepository>, membership: Arc<dyn GroupMembership>) -> Self {
        Self {
            repository,
            membership,
            policy: ViewPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ViewPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ViewPolicy {
        self.policy
    }

    /// Tree rooted at `root_id`, at most `depth` levels deep
    pub fn build_top_down_tree(
        &self,
        root_id: NodeId,
        user_id: &str,
        depth: u32,
    ) -> Result<Tree<PathResource>, ApiError> {
        let rows = self.repository.list_descendants(root_id, depth)?;
        let mut tree = ClosureTreeBuilder::new(rows).top_down(root_id, depth)?;
        self.annotate(&mut tree, user_id, true)?;
        info!(root_id, user_id, depth, nodes = tree.len(), "Built top-down tree");
        Ok(tree)
    }

    /// Ancestor chain ending at `leaf_id`, at most `levels` hops long
    pub fn build_bottom_up_tree(
        &self,
        leaf_id: NodeId,
        user_id: &str,
        levels: u32,
    ) -> Result<Tree<PathResource>, ApiError> {
        let rows = self.repository.list_ancestors(leaf_id, levels)?;
        let mut tree = ClosureTreeBuilder::new(rows).bottom_up(leaf_id, levels)?;
        self.annotate(&mut tree, user_id, false)?;
        info!(leaf_id, user_id, levels, nodes = tree.len(), "Built bottom-up tree");
        Ok(tree)
    }

    fn store_for(&self, resource: &PathResource) -> Result<Store, ApiError> {
        self.repository
            .get_store(resource.store_id)?
            .ok_or_else(|| StorageError::StoreNotFound(resource.store_id).into())
    }

    /// Resolve access on every node; `prune` applies the hide policy
    fn annotate(&self, tree: &mut Tree<PathResource>, user_id: &str, prune: bool) -> Result<(), ApiError> {
        let store = self.store_for(&tree.root().data)?;
        let mut evaluator = PermissionEvaluator::new(self.membership.as_ref(), user_id, store.default_rule);

        let seed = match tree.root().data.parent_id() {
            Some(parent_id) => self.inherited_at(&mut evaluator, parent_id)?,
            None => EffectiveGrants::unset(),
        };
        evaluator.evaluate_from(tree, seed)?;

        if prune && self.policy == ViewPolicy::HideUnreadable {
            let hidden = walk::retain(tree, |resource| resource.can_read());
            debug!(hidden, "Removed unreadable subtrees");
        }
        Ok(())
    }

    /// Grants that `parent_id` passes down to its children
    fn inherited_at(
        &self,
        evaluator: &mut PermissionEvaluator<'_>,
        parent_id: NodeId,
    ) -> Result<EffectiveGrants, ApiError> {
        let rows = self.repository.list_ancestors(parent_id, UNBOUNDED)?;
        let chain = ClosureTreeBuilder::new(rows).bottom_up(parent_id, UNBOUNDED)?;
        Ok(evaluator.grants_along(walk::chain(&chain))?)
    }
}
