use std::sync::Arc;
use std::time::Duration;
use storetree::concurrency::StoreConcurrencyManager;
use storetree::events::{topic_for, wait_for_event, BroadcastPublisher, ChangeCode, Published};
use storetree::index::{IndexConfig, StoreIndexLifecycle};
use storetree::operations::ResourceOperations;
use storetree::permission::StaticMembership;
use storetree::resource::{AccessGrants, AccessRule, Store};
use storetree::service::SecureTreeService;
use storetree::store::persistence::{FileSpec, SledResourceStore};
use storetree::store::ClosureRepository;
use storetree::task::{QueueConfig, TaskIdCounter};
use storetree::tree::walk;
use storetree::types::UNBOUNDED;
use tempfile::TempDir;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

struct World {
    ops: ResourceOperations,
    events: broadcast::Receiver<Published>,
    resources: SledResourceStore,
}

fn world(index: IndexConfig) -> World {
    let resources = SledResourceStore::temporary().unwrap();
    let publisher = BroadcastPublisher::default();
    let events = publisher.subscribe();
    let queues = StoreConcurrencyManager::new(
        TaskIdCounter::new(),
        QueueConfig {
            poll_interval_ms: 10,
            ..Default::default()
        },
    );
    let ops = ResourceOperations::new(
        resources.clone(),
        queues,
        StoreIndexLifecycle::new(index),
        Arc::new(publisher),
    );
    World {
        ops,
        events,
        resources,
    }
}

fn store(world: &World, name: &str, rule: AccessRule) -> Store {
    world.resources.create_store(name, format!("/srv/{}", name), 1024, rule).unwrap()
}

async fn next(events: &mut broadcast::Receiver<Published>, code: ChangeCode) -> Published {
    wait_for_event(events, WAIT, |p| p.event.code == code)
        .await
        .unwrap_or_else(|| panic!("no {} event", code))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn content_stays_searchable_after_shutdown() {
    let dir = TempDir::new().unwrap();
    let index = IndexConfig {
        root: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let mut world = world(index.clone());
    let docs = store(&world, "docs", AccessRule::Allow);

    world
        .ops
        .create_file(docs.root_node_id, FileSpec::named("minutes.txt"))
        .unwrap();
    let created = next(&mut world.events, ChangeCode::FileCreated).await;
    world
        .ops
        .write_content(created.event.node_id, b"board meeting minutes for march".to_vec())
        .unwrap();
    next(&mut world.events, ChangeCode::ContentWritten).await;
    let indexed = next(&mut world.events, ChangeCode::IndexUpdated).await;
    assert_eq!(indexed.topic, topic_for(docs.root_node_id));

    assert!(world.ops.settle(WAIT).await);
    world.ops.shutdown().await;

    let reopened = StoreIndexLifecycle::new(index);
    let hits = reopened
        .get_or_create_index(docs.store_id)
        .unwrap()
        .search("march", 10)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].relative_path, "/minutes.txt");
    reopened.close_all();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stores_keep_separate_indexes() {
    let mut world = world(IndexConfig::default());
    let alpha = store(&world, "alpha", AccessRule::Allow);
    let beta = store(&world, "beta", AccessRule::Allow);

    for (store, name) in [(&alpha, "shared-plan.md"), (&beta, "shared-budget.md"), (&alpha, "alpha-only.md")] {
        world.ops.create_file(store.root_node_id, FileSpec::named(name)).unwrap();
    }
    for _ in 0..3 {
        next(&mut world.events, ChangeCode::FileCreated).await;
    }
    assert!(world.ops.settle(WAIT).await);

    let alpha_hits = world.ops.search(alpha.store_id, "shared", None).unwrap();
    let beta_hits = world.ops.search(beta.store_id, "shared", None).unwrap();
    assert_eq!(alpha_hits.len(), 1);
    assert_eq!(alpha_hits[0].name, "shared-plan.md");
    assert_eq!(beta_hits.len(), 1);
    assert_eq!(beta_hits[0].name, "shared-budget.md");
    assert_eq!(world.ops.indexes().open_count(), 2);

    world.ops.shutdown().await;
    assert_eq!(world.ops.indexes().open_count(), 0);
}

#[tokio::test]
async fn queued_grant_changes_show_up_in_tree_views() {
    let mut world = world(IndexConfig::default());
    let vault = store(&world, "vault", AccessRule::Deny);
    let keys = world
        .resources
        .create_directory(vault.root_node_id, "keys", AccessGrants::default(), None)
        .unwrap();
    let membership = StaticMembership::new().with_member("security", "sky");
    let service = SecureTreeService::new(Arc::new(world.resources.clone()), Arc::new(membership));

    let before = service.build_top_down_tree(vault.root_node_id, "sky", UNBOUNDED).unwrap();
    assert!(!walk::find(&before, |r| r.id() == keys.id()).unwrap().can_read());

    world
        .ops
        .set_grants(
            keys.id(),
            AccessGrants {
                read_group: Some("security".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    let changed = next(&mut world.events, ChangeCode::GrantsChanged).await;
    assert_eq!(changed.event.node_id, keys.id());
    assert_eq!(changed.topic, topic_for(vault.root_node_id));

    let after = service.build_top_down_tree(vault.root_node_id, "sky", UNBOUNDED).unwrap();
    let keys_view = walk::find(&after, |r| r.id() == keys.id()).unwrap();
    assert!(keys_view.can_read());
    assert!(!keys_view.can_write());
    world.ops.shutdown().await;
}

#[tokio::test]
async fn moving_a_directory_under_itself_changes_nothing() {
    let mut world = world(IndexConfig::default());
    let docs = store(&world, "docs", AccessRule::Allow);
    let outer = world
        .resources
        .create_directory(docs.root_node_id, "outer", AccessGrants::default(), None)
        .unwrap();
    let inner = world
        .resources
        .create_directory(outer.id(), "inner", AccessGrants::default(), None)
        .unwrap();

    world.ops.move_node(outer.id(), inner.id()).unwrap();
    assert!(world.ops.settle(WAIT).await);
    let event = wait_for_event(&mut world.events, Duration::from_millis(50), |p| {
        p.event.code == ChangeCode::Moved
    })
    .await;
    assert!(event.is_none());

    let inner_now = world.resources.get_node(inner.id()).unwrap().unwrap();
    assert_eq!(inner_now.relative_path, "/outer/inner");
    assert_eq!(inner_now.parent_id(), Some(outer.id()));
    world.ops.shutdown().await;
}
