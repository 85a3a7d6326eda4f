//! Path resource model
//!
//! Nodes, directory/file resources, stores, and the access-control block that
//! the permission evaluator resolves.

use crate::types::{NodeId, StoreId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Store-wide fallback applied when no ancestor defines an explicit grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessRule {
    Allow,
    Deny,
}

impl AccessRule {
    pub fn permits(self) -> bool {
        matches!(self, AccessRule::Allow)
    }
}

impl fmt::Display for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessRule::Allow => write!(f, "allow"),
            AccessRule::Deny => write!(f, "deny"),
        }
    }
}

impl std::str::FromStr for AccessRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(AccessRule::Allow),
            "deny" => Ok(AccessRule::Deny),
            other => Err(format!("unknown access rule '{}' (expected allow or deny)", other)),
        }
    }
}

/// One of the three evaluated rights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Right {
    Read,
    Write,
    Execute,
}

impl Right {
    pub const ALL: [Right; 3] = [Right::Read, Right::Write, Right::Execute];
}

/// Named-group grants set directly on a resource.
///
/// `None` means "not explicitly set here", so the right is inherited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrants {
    pub read_group: Option<String>,
    pub write_group: Option<String>,
    pub execute_group: Option<String>,
}

impl AccessGrants {
    pub fn group(&self, right: Right) -> Option<&str> {
        match right {
            Right::Read => self.read_group.as_deref(),
            Right::Write => self.write_group.as_deref(),
            Right::Execute => self.execute_group.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.read_group.is_none() && self.write_group.is_none() && self.execute_group.is_none()
    }
}

/// Effective rights after evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAccess {
    pub can_read: bool,
    pub can_write: bool,
    pub can_execute: bool,
}

impl ResolvedAccess {
    pub fn get(&self, right: Right) -> bool {
        match right {
            Right::Read => self.can_read,
            Right::Write => self.can_write,
            Right::Execute => self.can_execute,
        }
    }

    pub(crate) fn set(&mut self, right: Right, value: bool) {
        match right {
            Right::Read => self.can_read = value,
            Right::Write => self.can_write = value,
            Right::Execute => self.can_execute = value,
        }
    }
}

/// Resource kind with kind-specific fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Directory,
    File {
        size: u64,
        mime_type: Option<String>,
        /// Binary content lives inline in the store rather than externally
        inline_content: bool,
    },
}

impl ResourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Directory => "DIRECTORY",
            ResourceKind::File { .. } => "FILE",
        }
    }
}

/// Identity, links, and timestamps common to every resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub parent_node_id: Option<NodeId>,
    /// Descendant end of the closure row this node was read from, if any
    pub child_node_id: Option<NodeId>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A directory or file within a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathResource {
    pub node: Node,
    pub store_id: StoreId,
    pub kind: ResourceKind,
    /// Path relative to the store root, `/` for the root directory
    pub relative_path: String,
    pub description: Option<String>,
    pub grants: AccessGrants,
    /// Populated by the permission evaluator
    #[serde(default)]
    pub access: Option<ResolvedAccess>,
}

impl PathResource {
    pub fn new(
        node_id: NodeId,
        store_id: StoreId,
        name: impl Into<String>,
        kind: ResourceKind,
        relative_path: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            node: Node {
                node_id,
                parent_node_id: None,
                child_node_id: None,
                name: name.into(),
                created_at: now,
                updated_at: now,
            },
            store_id,
            kind,
            relative_path: relative_path.into(),
            description: None,
            grants: AccessGrants::default(),
            access: None,
        }
    }

    pub fn directory(
        node_id: NodeId,
        store_id: StoreId,
        name: impl Into<String>,
        relative_path: impl Into<String>,
    ) -> Self {
        Self::new(node_id, store_id, name, ResourceKind::Directory, relative_path)
    }

    pub fn with_parent(mut self, parent: NodeId) -> Self {
        self.node.parent_node_id = Some(parent);
        self
    }

    pub fn with_grants(mut self, grants: AccessGrants) -> Self {
        self.grants = grants;
        self
    }

    pub fn id(&self) -> NodeId {
        self.node.node_id
    }

    pub fn parent_id(&self) -> Option<NodeId> {
        self.node.parent_node_id
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, ResourceKind::Directory)
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, ResourceKind::File { .. })
    }

    pub fn can_read(&self) -> bool {
        self.access.map(|a| a.can_read).unwrap_or(false)
    }

    pub fn can_write(&self) -> bool {
        self.access.map(|a| a.can_write).unwrap_or(false)
    }

    pub fn can_execute(&self) -> bool {
        self.access.map(|a| a.can_execute).unwrap_or(false)
    }
}

/// A named top-level container with its own root directory and access default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub store_id: StoreId,
    pub name: String,
    pub root_path: PathBuf,
    pub root_node_id: NodeId,
    pub max_file_size: u64,
    pub default_rule: AccessRule,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Join a parent's relative path with a child name.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}
