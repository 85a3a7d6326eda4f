//! CLI Tooling
//!
//! Command-line interface over stores, trees, and search. Mutating commands
//! go through the same per-store queues as any other caller and return once
//! the change has been announced.

use crate::concurrency::StoreConcurrencyManager;
use crate::config::StoretreeConfig;
use crate::error::{ApiError, StorageError};
use crate::events::{topic_for, wait_for_event, BroadcastPublisher, ChangeCode, Published};
use crate::index::{SearchHit, StoreIndexLifecycle};
use crate::logging::LoggingConfig;
use crate::operations::ResourceOperations;
use crate::resource::{AccessGrants, AccessRule, PathResource, ResourceKind, Store};
use crate::service::{SecureTreeService, ViewPolicy};
use crate::store::persistence::{FileSpec, SledResourceStore};
use crate::task::TaskIdCounter;
use crate::tree::{walk, Tree, TreeNode};
use crate::types::{NodeId, TaskId, UNBOUNDED};
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use owo_colors::OwoColorize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// How long a mutating command waits for its change announcement
const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Storetree CLI - permission-aware resource trees
#[derive(Parser)]
#[command(name = "storetree")]
#[command(about = "Permission-aware directory trees over a closure table")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Database directory (overrides storage.db_path)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes a file)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// `base` with the logging flags applied on top
    pub fn logging_config(&self, base: &LoggingConfig) -> Result<LoggingConfig, ApiError> {
        let mut config = base.clone();
        if self.verbose {
            config.level = "debug".to_string();
        }
        if let Some(level) = &self.log_level {
            config.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.format = format.parse()?;
        }
        if let Some(output) = &self.log_output {
            config.output = output.parse()?;
        }
        if let Some(file) = &self.log_file {
            config.file = Some(file.clone());
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage stores
    Store {
        #[command(subcommand)]
        command: StoreCommands,
    },
    /// Create a directory
    Mkdir {
        store: String,
        /// Store-relative path of the new directory
        path: String,
        #[command(flatten)]
        grants: GrantArgs,
        #[arg(long)]
        description: Option<String>,
    },
    /// Create a file, optionally filling it from a local file
    Put {
        store: String,
        /// Store-relative path of the new file
        path: String,
        /// Local file whose bytes become the content
        #[arg(long)]
        from: Option<PathBuf>,
        #[arg(long)]
        mime: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[command(flatten)]
        grants: GrantArgs,
    },
    /// Move a resource into another directory
    Mv {
        store: String,
        path: String,
        /// Destination directory
        target: String,
    },
    /// Rename a resource in place
    Rename {
        store: String,
        path: String,
        name: String,
    },
    /// Delete a resource and everything below it
    Rm { store: String, path: String },
    /// Change the group grants on a resource
    Grant {
        store: String,
        path: String,
        #[command(flatten)]
        grants: GrantArgs,
        /// Start from no grants instead of the current ones
        #[arg(long)]
        clear: bool,
    },
    /// Show the tree below a path with effective permissions
    Tree {
        store: String,
        #[arg(default_value = "/")]
        path: String,
        /// User whose permissions are evaluated
        #[arg(long)]
        user: String,
        /// Levels below the path (default: tree.default_depth)
        #[arg(long)]
        depth: Option<u32>,
        /// No depth limit
        #[arg(long, conflicts_with = "depth")]
        all: bool,
        /// Drop subtrees the user cannot read
        #[arg(long)]
        hide_unreadable: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show the ancestor chain of a path
    Ancestors {
        store: String,
        path: String,
        #[arg(long)]
        user: String,
        /// Levels above the path (default: up to the store root)
        #[arg(long)]
        levels: Option<u32>,
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Full-text search within a store
    Search {
        store: String,
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum StoreCommands {
    /// Create a store with an empty root directory
    Create {
        name: String,
        /// Filesystem location the store represents
        #[arg(long, default_value = ".")]
        root_path: PathBuf,
        /// Largest file content accepted, in bytes
        #[arg(long, default_value_t = 10 * 1024 * 1024)]
        max_file_size: u64,
        /// Applied where no ancestor sets a grant (allow or deny)
        #[arg(long, default_value = "allow")]
        default_rule: AccessRule,
    },
    /// List stores
    List {
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
}

/// Group grant flags; `-` clears a right
#[derive(Args, Debug, Clone, Default)]
pub struct GrantArgs {
    /// Group allowed to read
    #[arg(long)]
    pub read: Option<String>,
    /// Group allowed to write
    #[arg(long)]
    pub write: Option<String>,
    /// Group allowed to execute
    #[arg(long)]
    pub execute: Option<String>,
}

impl GrantArgs {
    pub fn apply(&self, mut grants: AccessGrants) -> AccessGrants {
        fn merge(slot: &mut Option<String>, value: Option<&str>) {
            match value {
                Some("-") => *slot = None,
                Some(group) => *slot = Some(group.to_string()),
                None => {}
            }
        }
        merge(&mut grants.read_group, self.read.as_deref());
        merge(&mut grants.write_group, self.write.as_deref());
        merge(&mut grants.execute_group, self.execute.as_deref());
        grants
    }
}

/// CLI context holding configuration and the opened resource store
pub struct CliContext {
    config: StoretreeConfig,
    resources: SledResourceStore,
}

impl CliContext {
    /// Open the database named by `db_override` or `storage.db_path`; a
    /// temporary database when neither is set.
    pub fn new(mut config: StoretreeConfig, db_override: Option<PathBuf>) -> Result<Self, ApiError> {
        if let Some(db) = db_override {
            config.storage.db_path = Some(db);
        }
        let resources = match &config.storage.db_path {
            Some(path) => SledResourceStore::open(path)?,
            None => SledResourceStore::temporary()?,
        };
        Ok(Self { config, resources })
    }

    pub fn config(&self) -> &StoretreeConfig {
        &self.config
    }

    pub fn resources(&self) -> &SledResourceStore {
        &self.resources
    }

    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Store { command } => self.handle_store(command),
            Commands::Tree {
                store,
                path,
                user,
                depth,
                all,
                hide_unreadable,
                format,
            } => {
                let depth = if *all {
                    UNBOUNDED
                } else {
                    depth.unwrap_or(self.config.tree.default_depth)
                };
                let policy = if *hide_unreadable {
                    ViewPolicy::HideUnreadable
                } else {
                    self.config.tree.view_policy
                };
                self.handle_tree(store, path, user, depth, policy, format)
            }
            Commands::Ancestors {
                store,
                path,
                user,
                levels,
                format,
            } => self.handle_ancestors(store, path, user, levels.unwrap_or(UNBOUNDED), format),
            Commands::Search {
                store,
                query,
                limit,
                format,
            } => self.handle_search(store, query, *limit, format),
            Commands::Config {
                command: ConfigCommands::Show,
            } => self.config.to_toml(),
            mutation => self.run_mutation(mutation),
        }
    }

    fn store(&self, name: &str) -> Result<Store, ApiError> {
        self.resources
            .find_store(name)?
            .ok_or_else(|| ApiError::NotFound(format!("store '{}'", name)))
    }

    fn resolve(&self, store: &Store, path: &str) -> Result<PathResource, ApiError> {
        self.resources
            .resolve_path(store.store_id, path)?
            .ok_or_else(|| ApiError::NotFound(format!("{}:{}", store.name, path)))
    }

    fn tree_service(&self, policy: ViewPolicy) -> SecureTreeService {
        SecureTreeService::new(Arc::new(self.resources.clone()), Arc::new(self.config.membership()))
            .with_policy(policy)
    }

    fn handle_store(&self, command: &StoreCommands) -> Result<String, ApiError> {
        match command {
            StoreCommands::Create {
                name,
                root_path,
                max_file_size,
                default_rule,
            } => {
                let store = self
                    .resources
                    .create_store(name, root_path.clone(), *max_file_size, *default_rule)?;
                self.resources.flush()?;
                Ok(format!(
                    "Created store {} (id {}, root node {}, default {})",
                    store.name.bold(),
                    store.store_id,
                    store.root_node_id,
                    store.default_rule
                ))
            }
            StoreCommands::List { format } => {
                let stores = self.resources.list_stores()?;
                match format.as_str() {
                    "json" => to_json(&stores),
                    "text" => Ok(format_store_table(&stores)),
                    other => Err(unknown_format(other)),
                }
            }
        }
    }

    fn handle_tree(
        &self,
        store: &str,
        path: &str,
        user: &str,
        depth: u32,
        policy: ViewPolicy,
        format: &str,
    ) -> Result<String, ApiError> {
        let store = self.store(store)?;
        let node = self.resolve(&store, path)?;
        let tree = self.tree_service(policy).build_top_down_tree(node.id(), user, depth)?;
        info!(store = %store.name, path, user, depth, "Rendered tree");
        render_tree(&tree, format, &format!("{}:{} as {}", store.name, node.relative_path, user))
    }

    fn handle_ancestors(
        &self,
        store: &str,
        path: &str,
        user: &str,
        levels: u32,
        format: &str,
    ) -> Result<String, ApiError> {
        let store = self.store(store)?;
        let node = self.resolve(&store, path)?;
        let tree = self
            .tree_service(self.config.tree.view_policy)
            .build_bottom_up_tree(node.id(), user, levels)?;
        render_tree(&tree, format, &format!("Ancestors of {}:{} as {}", store.name, node.relative_path, user))
    }

    fn handle_search(&self, store: &str, query: &str, limit: Option<usize>, format: &str) -> Result<String, ApiError> {
        let store = self.store(store)?;
        // Reader only, so a concurrent writer keeps its index lock
        let indexes = StoreIndexLifecycle::new(self.config.index.clone());
        let limit = limit.unwrap_or(indexes.config().search_limit);
        let hits = indexes.open_reader(store.store_id)?.search(query, limit)?;
        match format {
            "json" => to_json(&hits),
            "text" => Ok(format_search_table(&store, query, &hits)),
            other => Err(unknown_format(other)),
        }
    }

    fn run_mutation(&self, command: &Commands) -> Result<String, ApiError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(ApiError::ConfigError(
                "Mutating commands cannot run from within an async runtime".to_string(),
            ));
        }
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| ApiError::ConfigError(format!("Failed to create runtime: {}", e)))?;
        runtime.block_on(async {
            let mut session = MutationSession::open(self);
            let result = session.dispatch(command).await;
            session.close().await;
            result
        })
    }
}

/// Queues, indexes, and an event subscription for one mutating command
struct MutationSession<'a> {
    context: &'a CliContext,
    operations: ResourceOperations,
    events: broadcast::Receiver<Published>,
}

impl<'a> MutationSession<'a> {
    fn open(context: &'a CliContext) -> Self {
        let publisher = BroadcastPublisher::default();
        let events = publisher.subscribe();
        let operations = ResourceOperations::new(
            context.resources.clone(),
            StoreConcurrencyManager::new(TaskIdCounter::new(), context.config.queue.clone()),
            StoreIndexLifecycle::new(context.config.index.clone()),
            Arc::new(publisher),
        );
        Self {
            context,
            operations,
            events,
        }
    }

    /// Submit one operation and wait for `code` on `directory`'s topic
    async fn apply<F>(&mut self, directory: NodeId, code: ChangeCode, submit: F) -> Result<Published, ApiError>
    where
        F: FnOnce(&ResourceOperations) -> Result<TaskId, ApiError>,
    {
        let task_id = submit(&self.operations)?;
        let topic = topic_for(directory);
        wait_for_event(&mut self.events, EVENT_TIMEOUT, |published| {
            published.topic == topic && published.event.code == code
        })
        .await
        .ok_or(ApiError::TaskIncomplete(task_id))
    }

    async fn dispatch(&mut self, command: &Commands) -> Result<String, ApiError> {
        let context = self.context;
        match command {
            Commands::Mkdir {
                store,
                path,
                grants,
                description,
            } => {
                let store = context.store(store)?;
                let (parent_path, name) = split_parent(path)?;
                let parent_id = context.resolve(&store, &parent_path)?.id();
                let grants = grants.apply(AccessGrants::default());
                let description = description.clone();
                let published = self
                    .apply(parent_id, ChangeCode::DirectoryCreated, move |ops| {
                        ops.create_directory(parent_id, &name, grants, description)
                    })
                    .await?;
                Ok(describe(&published))
            }
            Commands::Put {
                store,
                path,
                from,
                mime,
                description,
                grants,
            } => {
                let store = context.store(store)?;
                let (parent_path, name) = split_parent(path)?;
                let parent_id = context.resolve(&store, &parent_path)?.id();
                let content = match from {
                    Some(source) => {
                        let bytes = std::fs::read(source)
                            .map_err(|e| ApiError::NotFound(format!("{}: {}", source.display(), e)))?;
                        if bytes.len() as u64 > store.max_file_size {
                            return Err(StorageError::FileTooLarge {
                                size: bytes.len() as u64,
                                limit: store.max_file_size,
                            }
                            .into());
                        }
                        Some(bytes)
                    }
                    None => None,
                };
                let spec = FileSpec {
                    name,
                    mime_type: mime.clone(),
                    description: description.clone(),
                    grants: grants.apply(AccessGrants::default()),
                };

                let created = self
                    .apply(parent_id, ChangeCode::FileCreated, move |ops| ops.create_file(parent_id, spec))
                    .await?;
                let mut lines = vec![describe(&created)];
                if let Some(content) = content {
                    let node_id = created.event.node_id;
                    let written = self
                        .apply(parent_id, ChangeCode::ContentWritten, move |ops| {
                            ops.write_content(node_id, content)
                        })
                        .await?;
                    lines.push(describe(&written));
                }
                Ok(lines.join("\n"))
            }
            Commands::Mv { store, path, target } => {
                let store = context.store(store)?;
                let node_id = context.resolve(&store, path)?.id();
                let target = context.resolve(&store, target)?;
                if !target.is_directory() {
                    return Err(StorageError::NotADirectory(target.id()).into());
                }
                let target_id = target.id();
                let published = self
                    .apply(target_id, ChangeCode::Moved, move |ops| ops.move_node(node_id, target_id))
                    .await?;
                Ok(describe(&published))
            }
            Commands::Rename { store, path, name } => {
                let store = context.store(store)?;
                let node = context.resolve(&store, path)?;
                let node_id = node.id();
                let directory = node.parent_id().unwrap_or(node_id);
                let published = self
                    .apply(directory, ChangeCode::Renamed, move |ops| ops.rename(node_id, name))
                    .await?;
                Ok(describe(&published))
            }
            Commands::Rm { store, path } => {
                let store = context.store(store)?;
                let node = context.resolve(&store, path)?;
                let node_id = node.id();
                let directory = node.parent_id().unwrap_or(node_id);
                let published = self
                    .apply(directory, ChangeCode::Deleted, move |ops| ops.delete(node_id))
                    .await?;
                Ok(describe(&published))
            }
            Commands::Grant {
                store,
                path,
                grants,
                clear,
            } => {
                let store = context.store(store)?;
                let node = context.resolve(&store, path)?;
                let node_id = node.id();
                let directory = node.parent_id().unwrap_or(node_id);
                let base = if *clear { AccessGrants::default() } else { node.grants.clone() };
                let updated = grants.apply(base);
                let published = self
                    .apply(directory, ChangeCode::GrantsChanged, move |ops| ops.set_grants(node_id, updated))
                    .await?;
                Ok(describe(&published))
            }
            _ => Err(ApiError::ConfigError("Command does not modify resources".to_string())),
        }
    }

    /// Let follow-up index work finish, then release queues and indexes
    async fn close(self) {
        if !self.operations.settle(EVENT_TIMEOUT).await {
            warn!("Queues still busy at shutdown");
        }
        self.operations.shutdown().await;
    }
}

/// Split `/a/b/c` into (`/a/b`, `c`)
fn split_parent(path: &str) -> Result<(String, String), ApiError> {
    let trimmed = path.trim_end_matches('/');
    let (parent, name) = match trimmed.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", trimmed),
    };
    if name.is_empty() {
        return Err(StorageError::InvalidName(path.to_string()).into());
    }
    let parent = if parent.is_empty() { "/" } else { parent };
    Ok((parent.to_string(), name.to_string()))
}

fn unknown_format(format: &str) -> ApiError {
    ApiError::ConfigError(format!("Unknown output format '{}' (expected text or json)", format))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, ApiError> {
    serde_json::to_string_pretty(value).map_err(|e| ApiError::ConfigError(format!("Failed to render JSON: {}", e)))
}

fn describe(published: &Published) -> String {
    format!(
        "{} {} (node {})",
        published.event.code.to_string().green(),
        published.event.message,
        published.event.node_id
    )
}

fn access_flags(resource: &PathResource) -> String {
    match resource.access {
        Some(access) => [
            (access.can_read, 'r'),
            (access.can_write, 'w'),
            (access.can_execute, 'x'),
        ]
        .iter()
        .map(|(granted, flag)| if *granted { *flag } else { '-' })
        .collect(),
        None => "???".to_string(),
    }
}

fn tree_label(resource: &PathResource) -> String {
    let flags = access_flags(resource);
    let name = match &resource.kind {
        ResourceKind::Directory => format!("{}/", resource.name()).bold().to_string(),
        ResourceKind::File { size, .. } => format!("{} ({} B)", resource.name(), size),
    };
    if resource.can_read() {
        format!("{} {}", flags, name)
    } else {
        format!("{} {}", flags.dimmed(), name.dimmed())
    }
}

fn node_json(node: &TreeNode<PathResource>) -> Value {
    let resource = &node.data;
    json!({
        "node_id": resource.id(),
        "name": resource.name(),
        "kind": resource.kind.label(),
        "path": resource.relative_path,
        "access": resource.access,
        "children": node.children.iter().map(node_json).collect::<Vec<_>>(),
    })
}

fn render_tree(tree: &Tree<PathResource>, format: &str, title: &str) -> Result<String, ApiError> {
    match format {
        "json" => to_json(&node_json(tree.root())),
        "text" => Ok(format!(
            "{}\n{}",
            title.bold().underline(),
            walk::render(tree, tree_label)
        )),
        other => Err(unknown_format(other)),
    }
}

fn format_store_table(stores: &[Store]) -> String {
    if stores.is_empty() {
        return "No stores.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Name", "Root Path", "Root Node", "Max File Size", "Default"]);
    for store in stores {
        table.add_row(vec![
            store.store_id.to_string(),
            store.name.clone(),
            store.root_path.display().to_string(),
            store.root_node_id.to_string(),
            store.max_file_size.to_string(),
            store.default_rule.to_string(),
        ]);
    }
    table.to_string()
}

fn format_search_table(store: &Store, query: &str, hits: &[SearchHit]) -> String {
    let title = format!("Search {} for \"{}\"", store.name, query);
    if hits.is_empty() {
        return format!("{}\nNo matches.", title.bold().underline());
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Node", "Name", "Path", "Score"]);
    for hit in hits {
        table.add_row(vec![
            hit.node_id.to_string(),
            hit.name.clone(),
            hit.relative_path.clone(),
            format!("{:.3}", hit.score),
        ]);
    }
    format!("{}\n{}", title.bold().underline(), table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;
    use std::io::Write;
    use tempfile::TempDir;

    fn context() -> (TempDir, CliContext) {
        let dir = TempDir::new().unwrap();
        let mut config = StoretreeConfig::default();
        config.index.root = Some(dir.path().join("index"));
        config.groups.insert("eng".into(), vec!["alice".into()]);
        let context = CliContext::new(config, Some(dir.path().join("db"))).unwrap();
        (dir, context)
    }

    fn run(context: &CliContext, args: &[&str]) -> Result<String, ApiError> {
        let mut argv = vec!["storetree"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).unwrap();
        context.execute(&cli.command)
    }

    #[test]
    fn test_create_browse_search_delete() {
        let (dir, context) = context();
        let created = run(&context, &["store", "create", "docs", "--default-rule", "deny"]).unwrap();
        assert!(created.contains("docs"));

        let out = run(&context, &["mkdir", "docs", "/reports", "--read", "eng"]).unwrap();
        assert!(out.contains("DIRECTORY_CREATED"));

        let source = dir.path().join("q3.txt");
        std::fs::File::create(&source)
            .unwrap()
            .write_all(b"quarterly revenue summary")
            .unwrap();
        let out = run(
            &context,
            &["put", "docs", "/reports/q3.txt", "--from", source.to_str().unwrap()],
        )
        .unwrap();
        assert!(out.contains("FILE_CREATED"));
        assert!(out.contains("CONTENT_WRITTEN"));

        let tree = run(&context, &["tree", "docs", "--user", "alice", "--all"]).unwrap();
        assert!(tree.contains("reports/"));
        assert!(tree.contains("q3.txt (25 B)"));

        let hidden = run(
            &context,
            &["tree", "docs", "--user", "mallory", "--all", "--hide-unreadable"],
        )
        .unwrap();
        assert!(!hidden.contains("q3.txt"));

        let hits = run(&context, &["search", "docs", "revenue"]).unwrap();
        assert!(hits.contains("/reports/q3.txt"));

        let chain = run(
            &context,
            &["ancestors", "docs", "/reports/q3.txt", "--user", "alice", "--format", "json"],
        )
        .unwrap();
        let chain: Value = serde_json::from_str(&chain).unwrap();
        assert_eq!(chain["name"], "docs");
        assert_eq!(chain["access"]["can_read"], false);
        assert_eq!(chain["children"][0]["children"][0]["name"], "q3.txt");
        assert_eq!(chain["children"][0]["children"][0]["access"]["can_read"], true);

        let out = run(&context, &["rm", "docs", "/reports"]).unwrap();
        assert!(out.contains("DELETED"));
        let tree = run(&context, &["tree", "docs", "--user", "alice", "--all"]).unwrap();
        assert!(!tree.contains("reports"));
        let hits = run(&context, &["search", "docs", "revenue", "--format", "json"]).unwrap();
        let hits: Vec<Value> = serde_json::from_str(&hits).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_alongside_a_writer() {
        let (_dir, context) = context();
        run(&context, &["store", "create", "docs"]).unwrap();
        run(&context, &["store", "create", "empty"]).unwrap();
        run(&context, &["mkdir", "docs", "/handbook", "--description", "onboarding guide"]).unwrap();

        let store = context.resources().find_store("docs").unwrap().unwrap();
        let writer = StoreIndexLifecycle::new(context.config().index.clone());
        writer.get_or_create_index(store.store_id).unwrap();

        let hits = run(&context, &["search", "docs", "onboarding"]).unwrap();
        assert!(hits.contains("/handbook"));
        let none = run(&context, &["search", "empty", "onboarding"]).unwrap();
        assert!(none.contains("No matches."));
        assert_eq!(writer.close_all(), 1);
    }

    #[test]
    fn test_grant_rename_and_move() {
        let (_dir, context) = context();
        run(&context, &["store", "create", "docs"]).unwrap();
        run(&context, &["mkdir", "docs", "/a"]).unwrap();
        run(&context, &["mkdir", "docs", "/b"]).unwrap();

        run(&context, &["grant", "docs", "/a", "--read", "eng", "--write", "ops"]).unwrap();
        let store = context.resources().find_store("docs").unwrap().unwrap();
        let a = context.resources().resolve_path(store.store_id, "/a").unwrap().unwrap();
        assert_eq!(a.grants.read_group.as_deref(), Some("eng"));
        assert_eq!(a.grants.write_group.as_deref(), Some("ops"));

        run(&context, &["grant", "docs", "/a", "--read", "-"]).unwrap();
        let a = context.resources().resolve_path(store.store_id, "/a").unwrap().unwrap();
        assert_eq!(a.grants.read_group, None);
        assert_eq!(a.grants.write_group.as_deref(), Some("ops"));

        run(&context, &["grant", "docs", "/a", "--clear"]).unwrap();
        let a = context.resources().resolve_path(store.store_id, "/a").unwrap().unwrap();
        assert!(a.grants.is_empty());

        let out = run(&context, &["rename", "docs", "/a", "a2"]).unwrap();
        assert!(out.contains("RENAMED"));
        let out = run(&context, &["mv", "docs", "/a2", "/b"]).unwrap();
        assert!(out.contains("/b/a2"));
        assert!(context.resources().resolve_path(store.store_id, "/b/a2").unwrap().is_some());
        assert!(context.resources().resolve_path(store.store_id, "/a2").unwrap().is_none());
    }

    #[test]
    fn test_errors_surface_before_queueing() {
        let (dir, context) = context();
        run(&context, &["store", "create", "tiny", "--max-file-size", "4"]).unwrap();

        let err = run(&context, &["mkdir", "nope", "/a"]).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let err = run(&context, &["mkdir", "tiny", "/"]).unwrap_err();
        assert!(matches!(err, ApiError::Storage(StorageError::InvalidName(_))));

        let source = dir.path().join("big.bin");
        std::fs::write(&source, b"too many bytes").unwrap();
        let err = run(&context, &["put", "tiny", "/big.bin", "--from", source.to_str().unwrap()]).unwrap_err();
        assert!(matches!(err, ApiError::Storage(StorageError::FileTooLarge { size: 14, limit: 4 })));
        let store = context.resources().find_store("tiny").unwrap().unwrap();
        assert!(context.resources().resolve_path(store.store_id, "/big.bin").unwrap().is_none());

        let err = run(&context, &["tree", "tiny", "--user", "a", "--format", "xml"]).unwrap_err();
        assert!(err.to_string().contains("xml"));
    }

    #[test]
    fn test_store_list_and_config_show() {
        let (_dir, context) = context();
        assert_eq!(run(&context, &["store", "list"]).unwrap(), "No stores.");
        run(&context, &["store", "create", "docs"]).unwrap();
        let listed = run(&context, &["store", "list"]).unwrap();
        assert!(listed.contains("docs"));
        assert!(listed.contains("allow"));

        let shown = run(&context, &["config", "show"]).unwrap();
        assert!(shown.contains("[queue]"));
        assert!(shown.contains("grace_period_ms = 5000"));
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("/a/b/c").unwrap(), ("/a/b".to_string(), "c".to_string()));
        assert_eq!(split_parent("/top/").unwrap(), ("/".to_string(), "top".to_string()));
        assert_eq!(split_parent("plain").unwrap(), ("/".to_string(), "plain".to_string()));
        assert!(split_parent("/").is_err());
    }

    #[test]
    fn test_logging_flags_override_config() {
        let cli = Cli::try_parse_from(["storetree", "--verbose", "--log-format", "json", "config", "show"]).unwrap();
        let config = cli.logging_config(&LoggingConfig::default()).unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);

        let cli = Cli::try_parse_from(["storetree", "--log-output", "sideways", "config", "show"]).unwrap();
        assert!(cli.logging_config(&LoggingConfig::default()).is_err());
    }
}
