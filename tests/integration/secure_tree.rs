use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use storetree::error::{ApiError, PermissionError};
use storetree::permission::{GroupMembership, StaticMembership};
use storetree::resource::{AccessGrants, AccessRule, PathResource};
use storetree::service::{SecureTreeService, ViewPolicy};
use storetree::store::persistence::{FileSpec, SledResourceStore};
use storetree::tree::{walk, Tree};
use storetree::types::{NodeId, UNBOUNDED};

fn grants(read: Option<&str>, write: Option<&str>, execute: Option<&str>) -> AccessGrants {
    AccessGrants {
        read_group: read.map(str::to_string),
        write_group: write.map(str::to_string),
        execute_group: execute.map(str::to_string),
    }
}

fn flags(tree: &Tree<PathResource>, name: &str) -> (bool, bool, bool) {
    let resource = walk::find(tree, |r| r.name() == name).unwrap();
    (resource.can_read(), resource.can_write(), resource.can_execute())
}

/// /handbook (read: staff)
///   /handbook/drafts (write: editors)
///     /handbook/drafts/next.md (read: editors)
///   /handbook/tools (execute: ops)
///     /handbook/tools/deploy.sh
struct Handbook {
    db: Arc<SledResourceStore>,
    root: NodeId,
    handbook: NodeId,
    drafts: NodeId,
    next: NodeId,
    deploy: NodeId,
}

fn handbook(default_rule: AccessRule) -> Handbook {
    let db = Arc::new(SledResourceStore::temporary().unwrap());
    let store = db.create_store("wiki", "/srv/wiki", 1 << 16, default_rule).unwrap();
    let handbook = db
        .create_directory(store.root_node_id, "handbook", grants(Some("staff"), None, None), None)
        .unwrap();
    let drafts = db
        .create_directory(handbook.id(), "drafts", grants(None, Some("editors"), None), None)
        .unwrap();
    let next = db
        .create_file(
            drafts.id(),
            FileSpec {
                grants: grants(Some("editors"), None, None),
                ..FileSpec::named("next.md")
            },
        )
        .unwrap();
    let tools = db
        .create_directory(handbook.id(), "tools", grants(None, None, Some("ops")), None)
        .unwrap();
    let deploy = db.create_file(tools.id(), FileSpec::named("deploy.sh")).unwrap();
    Handbook {
        db,
        root: store.root_node_id,
        handbook: handbook.id(),
        drafts: drafts.id(),
        next: next.id(),
        deploy: deploy.id(),
    }
}

fn membership() -> StaticMembership {
    StaticMembership::new()
        .with_member("staff", "sam")
        .with_member("staff", "erin")
        .with_member("editors", "erin")
        .with_member("ops", "olga")
}

fn service(fixture: &Handbook) -> SecureTreeService {
    SecureTreeService::new(fixture.db.clone(), Arc::new(membership()))
}

#[test]
fn rights_inherit_independently() {
    let fixture = handbook(AccessRule::Deny);
    let service = service(&fixture);

    let tree = service.build_top_down_tree(fixture.root, "erin", UNBOUNDED).unwrap();
    assert_eq!(tree.len(), 6);
    assert_eq!(flags(&tree, "wiki"), (false, false, false));
    assert_eq!(flags(&tree, "handbook"), (true, false, false));
    assert_eq!(flags(&tree, "drafts"), (true, true, false));
    assert_eq!(flags(&tree, "next.md"), (true, true, false));
    assert_eq!(flags(&tree, "deploy.sh"), (true, false, false));

    let tree = service.build_top_down_tree(fixture.root, "sam", UNBOUNDED).unwrap();
    assert_eq!(flags(&tree, "drafts"), (true, false, false));
    // an explicit group overrides the inherited grant
    assert_eq!(flags(&tree, "next.md"), (false, false, false));

    let tree = service.build_top_down_tree(fixture.root, "olga", UNBOUNDED).unwrap();
    assert_eq!(flags(&tree, "handbook"), (false, false, false));
    assert_eq!(flags(&tree, "deploy.sh"), (false, false, true));
}

#[test]
fn default_rule_fills_unset_rights() {
    let fixture = handbook(AccessRule::Allow);
    let tree = service(&fixture)
        .build_top_down_tree(fixture.root, "olga", UNBOUNDED)
        .unwrap();
    assert_eq!(flags(&tree, "wiki"), (true, true, true));
    assert_eq!(flags(&tree, "handbook"), (false, true, true));
    assert_eq!(flags(&tree, "drafts"), (false, false, true));
    assert_eq!(flags(&tree, "deploy.sh"), (false, true, true));
}

#[test]
fn subtree_and_chain_queries_match_the_full_tree() {
    let fixture = handbook(AccessRule::Deny);
    let service = service(&fixture);
    let full = service.build_top_down_tree(fixture.root, "erin", UNBOUNDED).unwrap();

    let subtree = service.build_top_down_tree(fixture.drafts, "erin", UNBOUNDED).unwrap();
    assert_eq!(subtree.root().data.id(), fixture.drafts);
    assert_eq!(flags(&subtree, "drafts"), flags(&full, "drafts"));
    assert_eq!(flags(&subtree, "next.md"), flags(&full, "next.md"));

    // one level up from next.md stops at drafts, which still inherits staff read
    let chain = service.build_bottom_up_tree(fixture.next, "sam", 1).unwrap();
    let names: Vec<&str> = walk::chain(&chain).into_iter().map(|r| r.name()).collect();
    assert_eq!(names, vec!["drafts", "next.md"]);
    assert_eq!(flags(&chain, "drafts"), (true, false, false));
    assert_eq!(flags(&chain, "next.md"), (false, false, false));

    let chain = service.build_bottom_up_tree(fixture.deploy, "sam", UNBOUNDED).unwrap();
    let ids: Vec<NodeId> = walk::chain(&chain).into_iter().map(|r| r.id()).collect();
    assert_eq!(ids.first(), Some(&fixture.root));
    assert_eq!(ids.last(), Some(&fixture.deploy));
    assert_eq!(ids.len(), 4);
}

#[test]
fn depth_bound_limits_the_view() {
    let fixture = handbook(AccessRule::Deny);
    let service = service(&fixture);
    let tree = service.build_top_down_tree(fixture.root, "sam", 1).unwrap();
    assert_eq!(tree.len(), 2);
    assert_eq!(tree.root().children[0].data.id(), fixture.handbook);

    let tree = service.build_top_down_tree(fixture.root, "sam", 0).unwrap();
    assert_eq!(tree.len(), 1);
}

#[test]
fn hide_policy_prunes_unreadable_subtrees_only() {
    let fixture = handbook(AccessRule::Deny);
    let service = service(&fixture).with_policy(ViewPolicy::HideUnreadable);

    let tree = service.build_top_down_tree(fixture.root, "sam", UNBOUNDED).unwrap();
    // root stays even though unreadable; next.md is hidden from sam
    assert_eq!(tree.root().data.id(), fixture.root);
    assert!(walk::find(&tree, |r| r.name() == "next.md").is_none());
    assert!(walk::find(&tree, |r| r.name() == "deploy.sh").is_some());

    let tree = service.build_top_down_tree(fixture.root, "olga", UNBOUNDED).unwrap();
    assert_eq!(tree.len(), 1);
}

#[test]
fn membership_failures_propagate_and_answers_are_memoized() {
    let fixture = handbook(AccessRule::Deny);
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let membership = move |user: &str, group: &str| -> Result<bool, PermissionError> {
        counted.fetch_add(1, Ordering::SeqCst);
        Ok(user == "erin" && group != "ops")
    };
    let service = SecureTreeService::new(fixture.db.clone(), Arc::new(membership));
    service.build_top_down_tree(fixture.root, "erin", UNBOUNDED).unwrap();
    // staff, editors, ops: each group asked once per build
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let failing = |_: &str, group: &str| -> Result<bool, PermissionError> {
        Err(PermissionError::MembershipUnavailable {
            group: group.to_string(),
            reason: "directory offline".to_string(),
        })
    };
    let service = SecureTreeService::new(fixture.db.clone(), Arc::new(failing));
    let err = service.build_top_down_tree(fixture.root, "erin", UNBOUNDED).unwrap_err();
    assert!(matches!(
        err,
        ApiError::Permission(PermissionError::MembershipUnavailable { .. })
    ));
}

#[test]
fn membership_trait_object_accepts_closures() {
    let closure = |user: &str, group: &str| -> Result<bool, PermissionError> { Ok(user == group) };
    let oracle: Arc<dyn GroupMembership> = Arc::new(closure);
    assert!(oracle.is_member("ops", "ops").unwrap());
    assert!(!oracle.is_member("sam", "ops").unwrap());
}
