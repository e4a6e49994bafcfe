//! Integration tests for the branch kernel over the in-memory backend.
//!
//! These tests validate the end-to-end lifecycle:
//! 1. Snapshot-copying branch creation
//! 2. Listing, renaming, archiving
//! 3. Cascading deletion
//! 4. Tree construction and visualization
//! 5. Path and divergence queries
//! 6. Current-branch pointer

use std::sync::Arc;

use branch_kernel::{
    BranchError, BranchRegistry, InMemoryStore, Message, MessageId, TreeBuilder, TreeExport,
    TreeNavigator,
};
use chrono::{TimeZone, Utc};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

type TestRegistry = BranchRegistry<InMemoryStore, InMemoryStore>;

fn message_id(n: u128) -> MessageId {
    MessageId::new(Uuid::from_u128(n))
}

/// Seed a conversation with `count` messages, ids 1..=count in log order.
fn seeded_store(conversation_id: &str, count: usize) -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    for i in 0..count {
        store.add_message(Message::new(
            message_id((i + 1) as u128),
            conversation_id,
            format!("prompt {i}"),
            format!("response {i}"),
            Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap(),
        ));
    }
    Arc::new(store)
}

fn registry(store: &Arc<InMemoryStore>) -> TestRegistry {
    BranchRegistry::new(Arc::clone(store), Arc::clone(store))
}

fn navigator(store: &Arc<InMemoryStore>) -> TreeNavigator<InMemoryStore> {
    TreeNavigator::new(Arc::clone(store))
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot Semantics
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn branch_snapshot_is_exact_message_prefix() {
    let store = seeded_store("c1", 5);
    let registry = registry(&store);

    for k in 1..=5 {
        let name = format!("at-{k}");
        let id = registry
            .create_branch("c1", &name, Some(k), None, None)
            .await
            .unwrap();
        let messages = registry.get_branch_messages(&id).await.unwrap();
        let ids: Vec<u128> = messages.iter().map(|m| m.id.as_uuid().as_u128()).collect();
        let expected: Vec<u128> = (1..=k as u128).collect();
        assert_eq!(ids, expected, "branch at index {k} must hold [m1..m{k}]");
    }
}

#[tokio::test]
async fn branch_snapshot_is_frozen_at_creation() {
    let store = seeded_store("c1", 2);
    let registry = registry(&store);

    let id = registry
        .create_branch("c1", "frozen", None, None, None)
        .await
        .unwrap();

    // The conversation grows after the fork; the branch must not.
    store.add_message(Message::new(
        message_id(3),
        "c1",
        "later prompt",
        "later response",
        Utc.timestamp_opt(1_700_000_100, 0).unwrap(),
    ));

    let messages = registry.get_branch_messages(&id).await.unwrap();
    assert_eq!(messages.len(), 2);

    let summary = registry.get_branch("c1", "frozen").await.unwrap().unwrap();
    assert_eq!(summary.message_count, 2);
}

#[tokio::test]
async fn duplicate_name_fails_and_leaves_original_intact() {
    let store = seeded_store("c1", 3);
    let registry = registry(&store);

    let original = registry
        .create_branch("c1", "main", None, None, None)
        .await
        .unwrap();

    let result = registry
        .create_branch("c1", "main", Some(1), Some("dup"), None)
        .await;
    assert!(matches!(result, Err(BranchError::AlreadyExists(_))));

    let summary = registry.get_branch("c1", "main").await.unwrap().unwrap();
    assert_eq!(summary.id, original);
    assert_eq!(summary.message_count, 3);
    assert!(summary.description.is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Rename / Archive
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rename_to_taken_name_changes_nothing() {
    let store = seeded_store("c1", 1);
    let registry = registry(&store);

    registry.create_branch("c1", "a", None, None, None).await.unwrap();
    registry.create_branch("c1", "b", None, None, None).await.unwrap();

    assert!(!registry.rename_branch("c1", "a", "b").await.unwrap());

    // Both branches are still addressable by their old names.
    assert!(registry.get_branch("c1", "a").await.unwrap().is_some());
    assert!(registry.get_branch("c1", "b").await.unwrap().is_some());
}

#[tokio::test]
async fn archive_is_idempotent_and_filters_listings() {
    let store = seeded_store("c1", 1);
    let registry = registry(&store);

    registry.create_branch("c1", "keep", None, None, None).await.unwrap();
    registry.create_branch("c1", "shelve", None, None, None).await.unwrap();

    assert!(registry.archive_branch("c1", "shelve").await.unwrap());
    assert!(registry.archive_branch("c1", "shelve").await.unwrap());

    let active = registry.list_branches("c1", false).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].name, "keep");

    let all = registry.list_branches("c1", true).await.unwrap();
    assert_eq!(all.len(), 2);
    let shelved = all.iter().find(|b| b.name == "shelve").unwrap();
    assert!(!shelved.active);
}

// ─────────────────────────────────────────────────────────────────────────────
// Deletion
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unforced_delete_of_parent_raises_has_children() {
    let store = seeded_store("c1", 1);
    let registry = registry(&store);

    registry.create_branch("c1", "root", None, None, None).await.unwrap();
    registry
        .create_branch("c1", "child", None, None, Some("root"))
        .await
        .unwrap();

    let result = registry.delete_branch("c1", "root", false).await;
    assert!(matches!(result, Err(BranchError::HasChildren(_))));

    // Nothing was deleted.
    assert_eq!(registry.list_branches("c1", true).await.unwrap().len(), 2);

    assert!(registry.delete_branch("c1", "root", true).await.unwrap());
    assert!(registry.list_branches("c1", true).await.unwrap().is_empty());
}

#[tokio::test]
async fn forced_delete_removes_every_transitive_descendant() {
    let store = seeded_store("c1", 2);
    let registry = registry(&store);

    // root ── a ── a1
    //      └─ b        plus an unrelated sibling tree
    registry.create_branch("c1", "root", None, None, None).await.unwrap();
    registry.create_branch("c1", "a", None, None, Some("root")).await.unwrap();
    registry.create_branch("c1", "b", None, None, Some("root")).await.unwrap();
    registry.create_branch("c1", "a1", None, None, Some("a")).await.unwrap();
    registry.create_branch("c1", "bystander", None, None, None).await.unwrap();

    let before = registry.list_branches("c1", true).await.unwrap();
    assert_eq!(before.len(), 5);

    assert!(registry.delete_branch("c1", "root", true).await.unwrap());

    let after = registry.list_branches("c1", true).await.unwrap();
    let names: Vec<&str> = after.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["bystander"]);

    // Snapshot rows of deleted branches are gone with them.
    assert_eq!(store.num_branches(), 1);
    assert_eq!(store.num_entries(), 2);
}

#[tokio::test]
async fn delete_missing_branch_returns_false() {
    let store = seeded_store("c1", 1);
    let registry = registry(&store);
    assert!(!registry.delete_branch("c1", "ghost", false).await.unwrap());
    assert!(!registry.delete_branch("c1", "ghost", true).await.unwrap());
}

// ─────────────────────────────────────────────────────────────────────────────
// Compare
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn alpha_beta_divergence_scenario() {
    let store = seeded_store("c1", 3);
    let registry = registry(&store);
    let navigator = navigator(&store);

    registry.create_branch("c1", "alpha", None, None, None).await.unwrap();
    registry.create_branch("c1", "beta", Some(2), None, None).await.unwrap();

    let comparison = navigator.compare("c1", "alpha", "beta").await.unwrap();

    assert_eq!(comparison.common.divergence_point, 2);
    assert_eq!(comparison.common.messages, 2);
    assert_eq!(comparison.branch1.name, "alpha");
    assert_eq!(comparison.branch1.total_messages, 3);
    assert_eq!(comparison.branch1.unique_messages, 1);
    assert_eq!(comparison.branch1.unique_message_list, vec![message_id(3)]);
    assert_eq!(comparison.branch2.total_messages, 2);
    assert_eq!(comparison.branch2.unique_messages, 0);
    assert!(comparison.branch2.unique_message_list.is_empty());
}

#[tokio::test]
async fn compare_reports_tree_ancestor_through_parent_links() {
    let store = seeded_store("c1", 3);
    let registry = registry(&store);
    let navigator = navigator(&store);

    registry.create_branch("c1", "trunk", None, None, None).await.unwrap();
    registry
        .create_branch("c1", "left", Some(2), None, Some("trunk"))
        .await
        .unwrap();
    registry
        .create_branch("c1", "right", Some(3), None, Some("trunk"))
        .await
        .unwrap();

    let comparison = navigator.compare("c1", "left", "right").await.unwrap();
    assert_eq!(comparison.common_ancestor.as_deref(), Some("trunk"));
    // Sequences share the two-message prefix.
    assert_eq!(comparison.common.divergence_point, 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tree Visualization
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn json_visualization_reproduces_listing_adjacency() {
    let store = seeded_store("c1", 2);
    let registry = registry(&store);
    let navigator = navigator(&store);

    registry.create_branch("c1", "root", None, None, None).await.unwrap();
    registry.create_branch("c1", "a", None, None, Some("root")).await.unwrap();
    registry.create_branch("c1", "b", None, None, Some("root")).await.unwrap();
    registry.create_branch("c1", "a1", None, None, Some("a")).await.unwrap();

    let rendered = navigator.visualize("c1", "json").await.unwrap();
    let export: TreeExport = serde_json::from_str(&rendered).unwrap();

    // Adjacency derived independently from the flat listing.
    let listing = registry.list_branches("c1", true).await.unwrap();
    for branch in &listing {
        let parent_name = branch.parent_branch_id.map(|pid| {
            listing
                .iter()
                .find(|b| b.id == pid)
                .expect("parent must be in listing")
                .name
                .clone()
        });

        match parent_name {
            None => {
                assert!(export.tree.iter().any(|n| n.summary.name == branch.name));
            }
            Some(parent_name) => {
                fn find<'a>(
                    nodes: &'a [branch_kernel::TreeNodeExport],
                    name: &str,
                ) -> Option<&'a branch_kernel::TreeNodeExport> {
                    for node in nodes {
                        if node.summary.name == name {
                            return Some(node);
                        }
                        if let Some(found) = find(&node.children, name) {
                            return Some(found);
                        }
                    }
                    None
                }
                let parent = find(&export.tree, &parent_name).unwrap();
                assert!(parent.children.iter().any(|c| c.summary.name == branch.name));
            }
        }
    }

    assert_eq!(export.branches.len(), listing.len());
}

#[tokio::test]
async fn ascii_visualization_renders_connectors_and_counts() {
    let store = seeded_store("c1", 3);
    let registry = registry(&store);
    let navigator = navigator(&store);

    registry
        .create_branch("c1", "root", None, Some("the trunk"), None)
        .await
        .unwrap();
    registry
        .create_branch("c1", "a", Some(1), None, Some("root"))
        .await
        .unwrap();
    registry
        .create_branch("c1", "b", Some(2), None, Some("root"))
        .await
        .unwrap();

    let rendered = navigator.visualize("c1", "ascii").await.unwrap();

    assert!(rendered.starts_with("Conversation Branch Tree"));
    assert!(rendered.contains("Conversation ID: c1"));
    assert!(rendered.contains("Total branches: 3"));
    assert!(rendered.contains("└─ root (3 messages) - the trunk"));
    assert!(rendered.contains("   ├─ a (1 messages)"));
    assert!(rendered.contains("   └─ b (2 messages)"));
}

#[tokio::test]
async fn visualize_unknown_conversation_is_not_an_error() {
    let store = seeded_store("c1", 1);
    let navigator = navigator(&store);

    let rendered = navigator.visualize("nowhere", "ascii").await.unwrap();
    assert_eq!(rendered, "No branches found for conversation nowhere");

    let rendered = navigator.visualize("nowhere", "json").await.unwrap();
    assert_eq!(rendered, "No branches found for conversation nowhere");
}

// ─────────────────────────────────────────────────────────────────────────────
// Paths and Tree Building
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn branch_path_spans_root_to_leaf() {
    let store = seeded_store("c1", 1);
    let registry = registry(&store);
    let navigator = navigator(&store);

    registry.create_branch("c1", "root", None, None, None).await.unwrap();
    registry.create_branch("c1", "mid", None, None, Some("root")).await.unwrap();
    registry.create_branch("c1", "leaf", None, None, Some("mid")).await.unwrap();

    assert_eq!(
        navigator.branch_path("c1", "leaf").await.unwrap(),
        vec!["root", "mid", "leaf"]
    );
    assert_eq!(navigator.branch_path("c1", "root").await.unwrap(), vec!["root"]);
}

#[tokio::test]
async fn tree_builder_counts_and_orders_children() {
    let store = seeded_store("c1", 3);
    let registry = registry(&store);

    registry.create_branch("c1", "root", Some(3), None, None).await.unwrap();
    registry
        .create_branch("c1", "first", Some(1), None, Some("root"))
        .await
        .unwrap();
    registry
        .create_branch("c1", "second", Some(2), None, Some("root"))
        .await
        .unwrap();

    let tree = TreeBuilder::new(Arc::clone(&store)).build("c1").await.unwrap();
    assert_eq!(tree.len(), 3);
    assert_eq!(tree.roots().len(), 1);

    let root = tree.node(tree.roots()[0]).unwrap();
    assert_eq!(root.summary.message_count, 3);

    // Children appear in creation order.
    let child_names: Vec<&str> = root
        .children
        .iter()
        .map(|&slot| tree.node(slot).unwrap().summary.name.as_str())
        .collect();
    assert_eq!(child_names, vec!["first", "second"]);
}

#[tokio::test]
async fn archived_branches_stay_in_the_tree() {
    let store = seeded_store("c1", 1);
    let registry = registry(&store);

    registry.create_branch("c1", "root", None, None, None).await.unwrap();
    registry.create_branch("c1", "old", None, None, Some("root")).await.unwrap();
    registry.archive_branch("c1", "old").await.unwrap();

    let tree = TreeBuilder::new(Arc::clone(&store)).build("c1").await.unwrap();
    assert_eq!(tree.len(), 2);
    let archived = tree.find_by_name("old").unwrap();
    assert!(!archived.summary.active);
}

// ─────────────────────────────────────────────────────────────────────────────
// Current Branch Pointer
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn current_branch_defaults_to_none_and_round_trips() {
    let store = seeded_store("c1", 1);
    let registry = registry(&store);

    assert!(registry.current_branch("c1").await.unwrap().is_none());

    registry.create_branch("c1", "main", None, None, None).await.unwrap();
    assert!(registry.set_current_branch("c1", "main").await.unwrap());
    assert_eq!(
        registry.current_branch("c1").await.unwrap().unwrap().name,
        "main"
    );

    assert!(!registry.set_current_branch("c1", "ghost").await.unwrap());
    // A failed set leaves the pointer untouched.
    assert_eq!(
        registry.current_branch("c1").await.unwrap().unwrap().name,
        "main"
    );
}

#[tokio::test]
async fn cascade_delete_clears_current_branch_pointer() {
    let store = seeded_store("c1", 1);
    let registry = registry(&store);

    registry.create_branch("c1", "root", None, None, None).await.unwrap();
    registry.create_branch("c1", "child", None, None, Some("root")).await.unwrap();
    registry.set_current_branch("c1", "child").await.unwrap();

    registry.delete_branch("c1", "root", true).await.unwrap();
    assert!(registry.current_branch("c1").await.unwrap().is_none());
}
