//! Permission evaluation
//!
//! A single pre-order pass resolves read/write/execute for every node of a
//! built tree. An explicit group on a node resolves through the injected
//! [`GroupMembership`] capability and is inherited by descendants that do not
//! set the same right; rights never set on the path fall back to the store's
//! [`AccessRule`]. The evaluator annotates nodes and never removes them.

use crate::error::PermissionError;
use crate::resource::{AccessGrants, AccessRule, PathResource, ResolvedAccess, Right};
use crate::tree::{walk, Tree};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// Group-membership capability
pub trait GroupMembership: Send + Sync {
    fn is_member(&self, user_id: &str, group: &str) -> Result<bool, PermissionError>;
}

impl<F> GroupMembership for F
where
    F: Fn(&str, &str) -> Result<bool, PermissionError> + Send + Sync,
{
    fn is_member(&self, user_id: &str, group: &str) -> Result<bool, PermissionError> {
        self(user_id, group)
    }
}

/// Fixed group table, loaded from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticMembership {
    groups: HashMap<String, HashSet<String>>,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_table(table: &HashMap<String, Vec<String>>) -> Self {
        let groups = table
            .iter()
            .map(|(group, users)| (group.clone(), users.iter().cloned().collect()))
            .collect();
        Self { groups }
    }

    pub fn add_member(&mut self, group: impl Into<String>, user: impl Into<String>) {
        self.groups.entry(group.into()).or_default().insert(user.into());
    }

    pub fn with_member(mut self, group: impl Into<String>, user: impl Into<String>) -> Self {
        self.add_member(group, user);
        self
    }
}

impl GroupMembership for StaticMembership {
    fn is_member(&self, user_id: &str, group: &str) -> Result<bool, PermissionError> {
        Ok(self
            .groups
            .get(group)
            .map(|users| users.contains(user_id))
            .unwrap_or(false))
    }
}

/// Effective state of one right on the current path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    /// No node on the path set this right
    Unset,
    /// The nearest node that set this right resolved to this value
    Explicit(bool),
}

/// Effective grants carried from a node to its descendants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveGrants {
    read: Grant,
    write: Grant,
    execute: Grant,
}

impl Default for EffectiveGrants {
    fn default() -> Self {
        Self::unset()
    }
}

impl EffectiveGrants {
    pub fn unset() -> Self {
        Self {
            read: Grant::Unset,
            write: Grant::Unset,
            execute: Grant::Unset,
        }
    }

    pub fn get(&self, right: Right) -> Grant {
        match right {
            Right::Read => self.read,
            Right::Write => self.write,
            Right::Execute => self.execute,
        }
    }

    fn set(&mut self, right: Right, grant: Grant) {
        match right {
            Right::Read => self.read = grant,
            Right::Write => self.write = grant,
            Right::Execute => self.execute = grant,
        }
    }

    pub fn resolve(&self, default_rule: AccessRule) -> ResolvedAccess {
        let mut access = ResolvedAccess::default();
        for right in Right::ALL {
            let value = match self.get(right) {
                Grant::Explicit(value) => value,
                Grant::Unset => default_rule.permits(),
            };
            access.set(right, value);
        }
        access
    }
}

/// Resolves effective rights for one user over one tree build.
///
/// Membership answers are memoized for the lifetime of the evaluator only.
pub struct PermissionEvaluator<'a> {
    membership: &'a dyn GroupMembership,
    user_id: &'a str,
    default_rule: AccessRule,
    answers: HashMap<String, bool>,
}

impl<'a> PermissionEvaluator<'a> {
    pub fn new(membership: &'a dyn GroupMembership, user_id: &'a str, default_rule: AccessRule) -> Self {
        Self {
            membership,
            user_id,
            default_rule,
            answers: HashMap::new(),
        }
    }

    /// Annotate every node, starting with nothing inherited
    pub fn evaluate(&mut self, tree: &mut Tree<PathResource>) -> Result<(), PermissionError> {
        self.evaluate_from(tree, EffectiveGrants::unset())
    }

    /// Annotate every node, with `seed` as the grants inherited by the root
    pub fn evaluate_from(
        &mut self,
        tree: &mut Tree<PathResource>,
        seed: EffectiveGrants,
    ) -> Result<(), PermissionError> {
        let default_rule = self.default_rule;
        let mut annotated = 0usize;
        walk::try_descend::<_, _, PermissionError, _>(tree, seed, |resource, inherited| {
            let effective = self.step(&resource.grants, inherited)?;
            resource.access = Some(effective.resolve(default_rule));
            annotated += 1;
            trace!(
                node_id = resource.id(),
                access = ?resource.access,
                "Resolved access"
            );
            Ok(effective)
        })?;
        debug!(user_id = %self.user_id, nodes = annotated, "Evaluated permissions");
        Ok(())
    }

    /// Fold a root-first ancestor chain into the grants its last node passes on
    pub fn grants_along<'r, I>(&mut self, chain: I) -> Result<EffectiveGrants, PermissionError>
    where
        I: IntoIterator<Item = &'r PathResource>,
    {
        let mut effective = EffectiveGrants::unset();
        for resource in chain {
            effective = self.step(&resource.grants, &effective)?;
        }
        Ok(effective)
    }

    fn step(
        &mut self,
        grants: &AccessGrants,
        inherited: &EffectiveGrants,
    ) -> Result<EffectiveGrants, PermissionError> {
        let mut effective = *inherited;
        for right in Right::ALL {
            if let Some(group) = grants.group(right) {
                let member = self.is_member(group)?;
                effective.set(right, Grant::Explicit(member));
            }
        }
        Ok(effective)
    }

    fn is_member(&mut self, group: &str) -> Result<bool, PermissionError> {
        if let Some(answer) = self.answers.get(group) {
            return Ok(*answer);
        }
        let answer = self.membership.is_member(self.user_id, group)?;
        self.answers.insert(group.to_string(), answer);
        Ok(answer)
    }
}
