//! Sled-backed closure table
//!
//! Layout (all ids big-endian so prefix scans come back in id order):
//!
//! - `stores`: store_id -> bincode(Store)
//! - `store_names`: name -> store_id
//! - `nodes`: node_id -> bincode(PathResource)
//! - `closure`: ancestor ‖ descendant -> depth
//! - `closure_rev`: descendant ‖ ancestor -> depth
//! - `blobs`: node_id -> inline content
//!
//! Every node has a depth-0 self row. Multi-tree updates are not atomic;
//! callers serialize mutations per store through the general task queue.

use super::ClosureRepository;
use crate::closure::ClosureRow;
use crate::error::StorageError;
use crate::resource::{
    child_path, AccessGrants, AccessRule, PathResource, ResourceKind, Store,
};
use crate::types::{NodeId, StoreId};
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Parameters for a new file record
#[derive(Debug, Clone, Default)]
pub struct FileSpec {
    pub name: String,
    pub mime_type: Option<String>,
    pub description: Option<String>,
    pub grants: AccessGrants,
}

impl FileSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Sled closure-table store
#[derive(Clone)]
pub struct SledResourceStore {
    db: sled::Db,
    stores: sled::Tree,
    store_names: sled::Tree,
    nodes: sled::Tree,
    closure: sled::Tree,
    closure_rev: sled::Tree,
    blobs: sled::Tree,
}

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn pair_key(first: u64, second: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&first.to_be_bytes());
    key[8..].copy_from_slice(&second.to_be_bytes());
    key
}

fn decode_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}

fn decode_depth(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(buf)
}

fn validate_name(name: &str) -> Result<(), StorageError> {
    if name.trim().is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Swap the `old` prefix of a relative path for `new`
fn rebase_path(path: &str, old: &str, new: &str) -> String {
    match path.strip_prefix(old) {
        Some(rest) => format!("{}{}", new, rest),
        None => path.to_string(),
    }
}

impl SledResourceStore {
    /// Open (or create) a store database at `path`
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Sled(sled::Error::Io(e)))?;
        }
        let db = sled::open(path)?;
        info!(path = %path.display(), "Opened resource store");
        Self::from_db(db)
    }

    /// Open a throwaway database that is removed on drop
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            stores: db.open_tree("stores")?,
            store_names: db.open_tree("store_names")?,
            nodes: db.open_tree("nodes")?,
            closure: db.open_tree("closure")?,
            closure_rev: db.open_tree("closure_rev")?,
            blobs: db.open_tree("blobs")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn next_id(&self) -> Result<u64, StorageError> {
        // sled ids start at 0; keep 0 free
        Ok(self.db.generate_id()? + 1)
    }

    fn put_node(&self, resource: &PathResource) -> Result<(), StorageError> {
        let mut record = resource.clone();
        record.access = None;
        self.nodes
            .insert(id_key(record.id()), bincode::serialize(&record)?)?;
        Ok(())
    }

    fn require_node(&self, node_id: NodeId) -> Result<PathResource, StorageError> {
        self.get_node(node_id)?
            .ok_or(StorageError::NodeNotFound(node_id))
    }

    fn put_edge(&self, ancestor: NodeId, descendant: NodeId, depth: u32) -> Result<(), StorageError> {
        let depth = depth.to_be_bytes();
        self.closure.insert(pair_key(ancestor, descendant), &depth[..])?;
        self.closure_rev.insert(pair_key(descendant, ancestor), &depth[..])?;
        Ok(())
    }

    fn remove_edge(&self, ancestor: NodeId, descendant: NodeId) -> Result<(), StorageError> {
        self.closure.remove(pair_key(ancestor, descendant))?;
        self.closure_rev.remove(pair_key(descendant, ancestor))?;
        Ok(())
    }

    /// (descendant, depth) pairs below `node_id`, self included
    fn descendant_edges(&self, node_id: NodeId) -> Result<Vec<(NodeId, u32)>, StorageError> {
        let mut out = Vec::new();
        for entry in self.closure.scan_prefix(id_key(node_id)) {
            let (key, value) = entry?;
            out.push((decode_u64(&key[8..]), decode_depth(&value)));
        }
        Ok(out)
    }

    /// (ancestor, depth) pairs above `node_id`, self included
    fn ancestor_edges(&self, node_id: NodeId) -> Result<Vec<(NodeId, u32)>, StorageError> {
        let mut out = Vec::new();
        for entry in self.closure_rev.scan_prefix(id_key(node_id)) {
            let (key, value) = entry?;
            out.push((decode_u64(&key[8..]), decode_depth(&value)));
        }
        Ok(out)
    }

    /// Every pair whose two ends are both inside `window`
    fn rows_within(&self, window: &[NodeId]) -> Result<Vec<ClosureRow>, StorageError> {
        let members: HashSet<NodeId> = window.iter().copied().collect();
        let mut rows = Vec::new();
        for node_id in window {
            let resource = self.require_node(*node_id)?;
            for (ancestor, depth) in self.ancestor_edges(*node_id)? {
                if members.contains(&ancestor) {
                    rows.push(ClosureRow::new(ancestor, depth, resource.clone()));
                }
            }
        }
        Ok(rows)
    }

    /// Create a store together with its root directory
    pub fn create_store(
        &self,
        name: &str,
        root_path: impl Into<PathBuf>,
        max_file_size: u64,
        default_rule: AccessRule,
    ) -> Result<Store, StorageError> {
        validate_name(name)?;
        if self.store_names.contains_key(name.as_bytes())? {
            return Err(StorageError::StoreNameTaken(name.to_string()));
        }

        let store_id = self.next_id()?;
        let root_id = self.next_id()?;
        let now = Utc::now();
        let store = Store {
            store_id,
            name: name.to_string(),
            root_path: root_path.into(),
            root_node_id: root_id,
            max_file_size,
            default_rule,
            created_at: now,
            updated_at: now,
        };

        let root = PathResource::directory(root_id, store_id, name, "/");
        self.put_node(&root)?;
        self.put_edge(root_id, root_id, 0)?;
        self.stores
            .insert(id_key(store_id), bincode::serialize(&store)?)?;
        self.store_names.insert(name.as_bytes(), &id_key(store_id)[..])?;

        info!(store_id, name, root_id, "Created store");
        Ok(store)
    }

    pub fn list_stores(&self) -> Result<Vec<Store>, StorageError> {
        let mut out = Vec::new();
        for entry in self.stores.iter() {
            let (_, value) = entry?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    pub fn find_store(&self, name: &str) -> Result<Option<Store>, StorageError> {
        match self.store_names.get(name.as_bytes())? {
            Some(id) => self.get_store(decode_u64(&id)),
            None => Ok(None),
        }
    }

    /// Immediate children of a directory, in id order
    pub fn children(&self, parent_id: NodeId) -> Result<Vec<PathResource>, StorageError> {
        let mut out = Vec::new();
        for (node_id, depth) in self.descendant_edges(parent_id)? {
            if depth == 1 {
                out.push(self.require_node(node_id)?);
            }
        }
        Ok(out)
    }

    /// Resolve a store-relative path such as `/docs/a.txt`
    pub fn resolve_path(&self, store_id: StoreId, relative_path: &str) -> Result<Option<PathResource>, StorageError> {
        let store = self
            .get_store(store_id)?
            .ok_or(StorageError::StoreNotFound(store_id))?;
        let mut current = self.require_node(store.root_node_id)?;
        for segment in relative_path.split('/').filter(|s| !s.is_empty()) {
            let next = self
                .children(current.id())?
                .into_iter()
                .find(|child| child.name() == segment);
            match next {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    fn ensure_unique_name(&self, parent_id: NodeId, name: &str, except: Option<NodeId>) -> Result<(), StorageError> {
        let clash = self
            .children(parent_id)?
            .into_iter()
            .any(|child| child.name() == name && Some(child.id()) != except);
        if clash {
            return Err(StorageError::InvalidName(format!(
                "'{}' already exists in directory {}",
                name, parent_id
            )));
        }
        Ok(())
    }

    fn insert_child(
        &self,
        parent_id: NodeId,
        name: &str,
        kind: ResourceKind,
        grants: AccessGrants,
        description: Option<String>,
    ) -> Result<PathResource, StorageError> {
        validate_name(name)?;
        let parent = self.require_node(parent_id)?;
        if !parent.is_directory() {
            return Err(StorageError::NotADirectory(parent_id));
        }
        self.ensure_unique_name(parent_id, name, None)?;

        let node_id = self.next_id()?;
        let mut resource = PathResource::new(
            node_id,
            parent.store_id,
            name,
            kind,
            child_path(&parent.relative_path, name),
        )
        .with_parent(parent_id)
        .with_grants(grants);
        resource.description = description;
        self.put_node(&resource)?;

        for (ancestor, depth) in self.ancestor_edges(parent_id)? {
            self.put_edge(ancestor, node_id, depth + 1)?;
        }
        self.put_edge(node_id, node_id, 0)?;

        debug!(
            node_id,
            parent_id,
            path = %resource.relative_path,
            kind = resource.kind.label(),
            "Inserted resource"
        );
        Ok(resource)
    }

    pub fn create_directory(
        &self,
        parent_id: NodeId,
        name: &str,
        grants: AccessGrants,
        description: Option<String>,
    ) -> Result<PathResource, StorageError> {
        self.insert_child(parent_id, name, ResourceKind::Directory, grants, description)
    }

    pub fn create_file(&self, parent_id: NodeId, spec: FileSpec) -> Result<PathResource, StorageError> {
        let kind = ResourceKind::File {
            size: 0,
            mime_type: spec.mime_type,
            inline_content: false,
        };
        self.insert_child(parent_id, &spec.name, kind, spec.grants, spec.description)
    }

    /// Rewrite the relative path of every node in the subtree of `node_id`
    fn rebase_subtree(&self, node_id: NodeId, old_base: &str, new_base: &str) -> Result<(), StorageError> {
        let now = Utc::now();
        for (descendant, _) in self.descendant_edges(node_id)? {
            let mut resource = self.require_node(descendant)?;
            resource.relative_path = rebase_path(&resource.relative_path, old_base, new_base);
            resource.node.updated_at = now;
            self.put_node(&resource)?;
        }
        Ok(())
    }

    pub fn rename(&self, node_id: NodeId, new_name: &str) -> Result<PathResource, StorageError> {
        validate_name(new_name)?;
        let mut resource = self.require_node(node_id)?;
        let Some(parent_id) = resource.parent_id() else {
            // store root: display name only
            resource.node.name = new_name.to_string();
            resource.node.updated_at = Utc::now();
            self.put_node(&resource)?;
            return Ok(resource);
        };
        self.ensure_unique_name(parent_id, new_name, Some(node_id))?;

        let parent = self.require_node(parent_id)?;
        let old_path = resource.relative_path.clone();
        let new_path = child_path(&parent.relative_path, new_name);
        self.rebase_subtree(node_id, &old_path, &new_path)?;

        let mut resource = self.require_node(node_id)?;
        resource.node.name = new_name.to_string();
        self.put_node(&resource)?;
        debug!(node_id, from = %old_path, to = %new_path, "Renamed resource");
        Ok(resource)
    }

    /// Re-parent `node_id` (and its subtree) under `target_id`
    pub fn move_node(&self, node_id: NodeId, target_id: NodeId) -> Result<PathResource, StorageError> {
        let invalid = |reason: &str| StorageError::InvalidMove {
            node: node_id,
            target: target_id,
            reason: reason.to_string(),
        };

        let resource = self.require_node(node_id)?;
        let target = self.require_node(target_id)?;
        if resource.parent_id().is_none() {
            return Err(invalid("store root cannot be moved"));
        }
        if !target.is_directory() {
            return Err(StorageError::NotADirectory(target_id));
        }
        if resource.store_id != target.store_id {
            return Err(invalid("target belongs to another store"));
        }
        let subtree = self.descendant_edges(node_id)?;
        if subtree.iter().any(|(id, _)| *id == target_id) {
            return Err(invalid("target is inside the moved subtree"));
        }
        self.ensure_unique_name(target_id, resource.name(), Some(node_id))?;

        let old_ancestors: Vec<NodeId> = self
            .ancestor_edges(node_id)?
            .into_iter()
            .filter(|(_, depth)| *depth > 0)
            .map(|(id, _)| id)
            .collect();
        for ancestor in &old_ancestors {
            for (descendant, _) in &subtree {
                self.remove_edge(*ancestor, *descendant)?;
            }
        }

        for (ancestor, above) in self.ancestor_edges(target_id)? {
            for (descendant, below) in &subtree {
                self.put_edge(ancestor, *descendant, above + 1 + below)?;
            }
        }

        let old_path = resource.relative_path.clone();
        let new_path = child_path(&target.relative_path, resource.name());
        self.rebase_subtree(node_id, &old_path, &new_path)?;

        let mut moved = self.require_node(node_id)?;
        moved.node.parent_node_id = Some(target_id);
        self.put_node(&moved)?;
        debug!(node_id, target_id, from = %old_path, to = %new_path, "Moved resource");
        Ok(moved)
    }

    /// Remove a node, its subtree, their closure rows, and inline content.
    /// Returns the removed resources, top first.
    pub fn delete_subtree(&self, node_id: NodeId) -> Result<Vec<PathResource>, StorageError> {
        let resource = self.require_node(node_id)?;
        if resource.parent_id().is_none() {
            return Err(StorageError::InvalidMove {
                node: node_id,
                target: node_id,
                reason: "store root cannot be deleted".to_string(),
            });
        }

        let mut subtree = self.descendant_edges(node_id)?;
        subtree.sort_by_key(|(_, depth)| *depth);

        let mut removed = Vec::with_capacity(subtree.len());
        for (descendant, _) in &subtree {
            removed.push(self.require_node(*descendant)?);
        }
        for (descendant, _) in &subtree {
            for (ancestor, _) in self.ancestor_edges(*descendant)? {
                self.remove_edge(ancestor, *descendant)?;
            }
            self.nodes.remove(id_key(*descendant))?;
            self.blobs.remove(id_key(*descendant))?;
        }

        debug!(node_id, removed = removed.len(), "Deleted subtree");
        Ok(removed)
    }

    pub fn set_grants(&self, node_id: NodeId, grants: AccessGrants) -> Result<PathResource, StorageError> {
        let mut resource = self.require_node(node_id)?;
        resource.grants = grants;
        resource.node.updated_at = Utc::now();
        self.put_node(&resource)?;
        Ok(resource)
    }

    /// Store file content inline, enforcing the store's size limit
    pub fn write_blob(&self, node_id: NodeId, content: &[u8]) -> Result<PathResource, StorageError> {
        let mut resource = self.require_node(node_id)?;
        let store = self
            .get_store(resource.store_id)?
            .ok_or(StorageError::StoreNotFound(resource.store_id))?;
        let size = content.len() as u64;
        if size > store.max_file_size {
            return Err(StorageError::FileTooLarge {
                size,
                limit: store.max_file_size,
            });
        }
        let ResourceKind::File { mime_type, .. } = &resource.kind else {
            return Err(StorageError::NotAFile(node_id));
        };
        let mime_type = mime_type.clone();
        resource.kind = ResourceKind::File {
            size,
            mime_type,
            inline_content: true,
        };
        resource.node.updated_at = Utc::now();
        self.blobs.insert(id_key(node_id), content)?;
        self.put_node(&resource)?;
        Ok(resource)
    }

    pub fn read_blob(&self, node_id: NodeId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blobs.get(id_key(node_id))?.map(|v| v.to_vec()))
    }
}

impl ClosureRepository for SledResourceStore {
    fn list_descendants(&self, root_id: NodeId, max_depth: u32) -> Result<Vec<ClosureRow>, StorageError> {
        let window: Vec<NodeId> = self
            .descendant_edges(root_id)?
            .into_iter()
            .filter(|(_, depth)| *depth <= max_depth)
            .map(|(id, _)| id)
            .collect();
        self.rows_within(&window)
    }

    fn list_ancestors(&self, node_id: NodeId, max_levels: u32) -> Result<Vec<ClosureRow>, StorageError> {
        let window: Vec<NodeId> = self
            .ancestor_edges(node_id)?
            .into_iter()
            .filter(|(_, depth)| *depth <= max_levels)
            .map(|(id, _)| id)
            .collect();
        self.rows_within(&window)
    }

    fn get_node(&self, node_id: NodeId) -> Result<Option<PathResource>, StorageError> {
        match self.nodes.get(id_key(node_id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_store(&self, store_id: StoreId) -> Result<Option<Store>, StorageError> {
        match self.stores.get(id_key(store_id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}
