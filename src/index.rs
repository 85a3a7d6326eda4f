//! Per-store full-text search index
//!
//! [`StoreIndexLifecycle`] hands out one [`IndexHandle`] per store. The handle
//! pairs a tantivy writer with a reader; writes are crate-private so that the
//! operations layer can route them through the store's index queue.

use crate::error::IndexError;
use crate::resource::PathResource;
use crate::types::{NodeId, StoreId};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError, Term};
use tracing::{debug, info, warn};

/// Index settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory holding one sub-directory per store; `None` keeps indexes in memory
    pub root: Option<PathBuf>,
    /// Memory budget of each store's writer
    pub writer_heap_bytes: usize,
    /// Default number of hits returned by a search
    pub search_limit: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: None,
            writer_heap_bytes: 15_000_000,
            search_limit: 20,
        }
    }
}

impl IndexConfig {
    pub fn store_dir(&self, store_id: StoreId) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(format!("store-{}", store_id)))
    }
}

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub node_id: NodeId,
    pub name: String,
    pub relative_path: String,
    pub score: f32,
}

#[derive(Clone, Copy)]
struct IndexFields {
    node_id: Field,
    name: Field,
    path: Field,
    description: Field,
    content: Field,
}

impl IndexFields {
    fn schema() -> (Schema, Self) {
        let mut builder = Schema::builder();
        let fields = Self {
            node_id: builder.add_text_field("node_id", STRING | STORED),
            name: builder.add_text_field("name", TEXT | STORED),
            path: builder.add_text_field("path", TEXT | STORED),
            description: builder.add_text_field("description", TEXT),
            content: builder.add_text_field("content", TEXT),
        };
        (builder.build(), fields)
    }

    fn node_term(&self, node_id: NodeId) -> Term {
        Term::from_field_text(self.node_id, &node_id.to_string())
    }
}

/// Writer/searcher pair for one store
pub struct IndexHandle {
    store_id: StoreId,
    index: Index,
    reader: IndexReader,
    fields: IndexFields,
    writer: Mutex<Option<IndexWriter>>,
}

impl IndexHandle {
    fn open(store_id: StoreId, location: Option<&Path>, heap_bytes: usize) -> Result<Self, IndexError> {
        let (schema, fields) = IndexFields::schema();
        let index = match location {
            Some(path) => {
                std::fs::create_dir_all(path)?;
                let dir = MmapDirectory::open(path).map_err(TantivyError::from)?;
                Index::open_or_create(dir, schema)?
            }
            None => Index::create_in_ram(schema),
        };

        let writer = index
            .writer_with_num_threads(1, heap_bytes)
            .map_err(|err| match err {
                TantivyError::LockFailure(..) => IndexError::Lock { store_id },
                other => IndexError::Search(other),
            })?;
        debug!(store_id, on_disk = location.is_some(), "Opened search index");
        Self::assemble(store_id, index, fields, Some(writer))
    }

    /// Search-only view of a store's index.
    ///
    /// Takes no writer lock, so it works next to a process that is writing.
    /// A store with nothing on disk yet gets an empty in-memory index.
    fn open_reader(store_id: StoreId, location: Option<&Path>) -> Result<Self, IndexError> {
        let (schema, fields) = IndexFields::schema();
        let index = match location {
            Some(path) if path.join("meta.json").is_file() => Index::open_in_dir(path)?,
            _ => Index::create_in_ram(schema),
        };
        debug!(store_id, "Opened read-only search index");
        Self::assemble(store_id, index, fields, None)
    }

    fn assemble(
        store_id: StoreId,
        index: Index,
        fields: IndexFields,
        writer: Option<IndexWriter>,
    ) -> Result<Self, IndexError> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            store_id,
            index,
            reader,
            fields,
            writer: Mutex::new(writer),
        })
    }

    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    fn with_writer<R>(&self, f: impl FnOnce(&mut IndexWriter) -> Result<R, IndexError>) -> Result<R, IndexError> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(IndexError::Closed(self.store_id))?;
        f(writer)
    }

    /// Replace the document for `resource`. Visible to searches after `commit`.
    pub(crate) fn upsert(&self, resource: &PathResource, content: Option<&str>) -> Result<(), IndexError> {
        let fields = self.fields;
        self.with_writer(|writer| {
            writer.delete_term(fields.node_term(resource.id()));
            writer.add_document(doc!(
                fields.node_id => resource.id().to_string(),
                fields.name => resource.name(),
                fields.path => resource.relative_path.as_str(),
                fields.description => resource.description.as_deref().unwrap_or_default(),
                fields.content => content.unwrap_or_default(),
            ))?;
            Ok(())
        })
    }

    pub(crate) fn remove(&self, node_id: NodeId) -> Result<(), IndexError> {
        let term = self.fields.node_term(node_id);
        self.with_writer(|writer| {
            writer.delete_term(term);
            Ok(())
        })
    }

    /// Commit pending writes and refresh the searcher
    pub(crate) fn commit(&self) -> Result<u64, IndexError> {
        let opstamp = self.with_writer(|writer| Ok(writer.commit()?))?;
        self.reader.reload()?;
        Ok(opstamp)
    }

    /// Query name, path, description, and content
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, IndexError> {
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(
            &self.index,
            vec![
                self.fields.name,
                self.fields.path,
                self.fields.description,
                self.fields.content,
            ],
        );
        let query = parser.parse_query(query)?;
        let top = searcher.search(&query, &TopDocs::with_limit(limit.max(1)))?;

        let mut hits = Vec::with_capacity(top.len());
        for (score, address) in top {
            let doc = searcher.doc(address)?;
            let text = |field: Field| {
                doc.get_first(field)
                    .and_then(|value| value.as_text())
                    .map(str::to_string)
            };
            let Some(node_id) = text(self.fields.node_id).and_then(|id| id.parse().ok()) else {
                continue;
            };
            hits.push(SearchHit {
                node_id,
                name: text(self.fields.name).unwrap_or_default(),
                relative_path: text(self.fields.path).unwrap_or_default(),
                score,
            });
        }
        Ok(hits)
    }

    /// Documents visible to the current searcher
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// True once the writer is released, or for a read-only handle
    pub fn is_closed(&self) -> bool {
        self.writer.lock().is_none()
    }

    /// Release the writer and its directory lock. Searches keep working.
    pub fn close(&self) -> Result<(), IndexError> {
        let Some(writer) = self.writer.lock().take() else {
            return Ok(());
        };
        writer.wait_merging_threads()?;
        debug!(store_id = self.store_id, "Closed search index writer");
        Ok(())
    }
}

impl fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexHandle")
            .field("store_id", &self.store_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Lazily opened index handles, one per store
pub struct StoreIndexLifecycle {
    handles: DashMap<StoreId, Arc<IndexHandle>>,
    config: IndexConfig,
    closed: AtomicBool,
}

impl StoreIndexLifecycle {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            handles: DashMap::new(),
            config,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// The store's handle, opening it on first use.
    ///
    /// Opening happens while the map shard is held, so concurrent first
    /// callers for one store never open two writers on the same location.
    /// After `close_all` nothing is opened again.
    pub fn get_or_create_index(&self, store_id: StoreId) -> Result<Arc<IndexHandle>, IndexError> {
        if let Some(handle) = self.handles.get(&store_id) {
            return Ok(Arc::clone(handle.value()));
        }

        let entry = self.handles.entry(store_id).or_try_insert_with(|| {
            // Checked under the shard lock so `close_all` sees every insert
            if self.closed.load(Ordering::SeqCst) {
                return Err(IndexError::Closed(store_id));
            }
            let location = self.config.store_dir(store_id);
            let handle = IndexHandle::open(store_id, location.as_deref(), self.config.writer_heap_bytes)?;
            info!(store_id, "Created search index handle");
            Ok::<_, IndexError>(Arc::new(handle))
        })?;
        Ok(Arc::clone(entry.value()))
    }

    /// Open a search-only handle that is not tracked by this lifecycle
    pub fn open_reader(&self, store_id: StoreId) -> Result<IndexHandle, IndexError> {
        IndexHandle::open_reader(store_id, self.config.store_dir(store_id).as_deref())
    }

    /// Handle for a store only if one is already open
    pub fn get(&self, store_id: StoreId) -> Option<Arc<IndexHandle>> {
        self.handles.get(&store_id).map(|handle| Arc::clone(handle.value()))
    }

    pub fn open_count(&self) -> usize {
        self.handles.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close every open handle. Failures are logged and skipped.
    ///
    /// Returns the number of handles closed cleanly. The lifecycle refuses to
    /// open further handles afterwards.
    pub fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let mut store_ids: Vec<StoreId> = self.handles.iter().map(|entry| *entry.key()).collect();
        store_ids.sort_unstable();

        let mut closed = 0;
        for store_id in store_ids {
            let Some((_, handle)) = self.handles.remove(&store_id) else {
                continue;
            };
            match handle.close() {
                Ok(()) => closed += 1,
                Err(err) => warn!(store_id, error = %err, "Failed to close search index"),
            }
        }
        info!(closed, "Closed search indexes");
        closed
    }
}
