//! Derived queries over the branch forest.
//!
//! Visualization (ascii and json), root-to-branch paths, and pairwise
//! branch comparison (sequence divergence plus tree common ancestor).
//! All operations are read-only.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::registry::BranchError;
use crate::store::BranchStore;
use crate::tree::builder::{BranchTree, TreeBuilder};
use crate::types::{
    BranchComparison, BranchDivergence, BranchId, BranchRecord, BranchSummary, CommonSegment,
    MessageId,
};

/// Supported tree visualization formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeFormat {
    /// Box-drawing text rendering.
    Ascii,
    /// Structural JSON export.
    Json,
}

impl TreeFormat {
    /// Parse a format name. Unknown names are an [`BranchError::InvalidFormat`].
    pub fn parse(s: &str) -> Result<Self, BranchError> {
        match s {
            "ascii" => Ok(Self::Ascii),
            "json" => Ok(Self::Json),
            other => Err(BranchError::InvalidFormat(other.to_string())),
        }
    }
}

/// JSON export of a conversation's branch forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeExport {
    /// Conversation the forest belongs to.
    pub conversation_id: String,
    /// Flat branch list in creation order.
    pub branches: Vec<BranchSummary>,
    /// Nested forest, one entry per root.
    pub tree: Vec<TreeNodeExport>,
}

/// One nested node of the JSON forest export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNodeExport {
    /// The branch, annotated with its message count.
    #[serde(flatten)]
    pub summary: BranchSummary,
    /// Child branches in creation order.
    pub children: Vec<TreeNodeExport>,
}

impl TreeNodeExport {
    fn from_tree(tree: &BranchTree, slot: usize) -> Option<Self> {
        let node = tree.node(slot)?;
        Some(Self {
            summary: node.summary.clone(),
            children: node
                .children
                .iter()
                .filter_map(|&child| Self::from_tree(tree, child))
                .collect(),
        })
    }
}

impl TreeExport {
    /// Build the export shape from an assembled forest.
    pub fn from_tree(tree: &BranchTree) -> Self {
        Self {
            conversation_id: tree.conversation_id.clone(),
            branches: tree.summaries().cloned().collect(),
            tree: tree
                .roots()
                .iter()
                .filter_map(|&root| TreeNodeExport::from_tree(tree, root))
                .collect(),
        }
    }
}

/// Read-only navigator over a conversation's branch forest.
///
/// Safe to run concurrently with other readers; not guaranteed
/// consistent with an in-flight delete on the same conversation.
pub struct TreeNavigator<B: BranchStore> {
    store: Arc<B>,
}

impl<B: BranchStore> TreeNavigator<B> {
    /// Create a new navigator over the given store.
    pub fn new(store: Arc<B>) -> Self {
        Self { store }
    }

    /// Render the conversation's branch forest.
    ///
    /// An empty forest yields a plain "no branches found" string in
    /// either format rather than an error; an unknown format name fails
    /// [`BranchError::InvalidFormat`].
    pub async fn visualize(
        &self,
        conversation_id: &str,
        format: &str,
    ) -> Result<String, BranchError> {
        let format = TreeFormat::parse(format)?;
        let tree = TreeBuilder::new(Arc::clone(&self.store))
            .build(conversation_id)
            .await?;

        if tree.is_empty() {
            return Ok(format!(
                "No branches found for conversation {conversation_id}"
            ));
        }

        match format {
            TreeFormat::Ascii => Ok(render_ascii(&tree)),
            TreeFormat::Json => {
                let export = TreeExport::from_tree(&tree);
                serde_json::to_string_pretty(&export)
                    .map_err(|e| BranchError::Store(e.to_string()))
            }
        }
    }

    /// Path of branch names from a root to the named branch, inclusive.
    ///
    /// Walks parent pointers upward, O(depth). A dangling parent
    /// terminates the walk at the last resolvable ancestor; a cycle in a
    /// corrupt store terminates rather than looping.
    pub async fn branch_path(
        &self,
        conversation_id: &str,
        name: &str,
    ) -> Result<Vec<String>, BranchError> {
        let branch = self
            .store
            .get_branch(conversation_id, name)
            .await
            .map_err(BranchError::from_store)?
            .ok_or_else(|| BranchError::BranchNotFound(name.to_string()))?;

        let mut path = vec![branch.name.clone()];
        let mut visited: BTreeSet<BranchId> = BTreeSet::new();
        visited.insert(branch.id);

        let mut parent = branch.parent_branch_id;
        while let Some(parent_id) = parent {
            if !visited.insert(parent_id) {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    branch = %name,
                    "Parent chain cycle detected; truncating path"
                );
                break;
            }
            match self
                .store
                .get_branch_by_id(&parent_id)
                .await
                .map_err(BranchError::from_store)?
            {
                Some(record) => {
                    path.push(record.name.clone());
                    parent = record.parent_branch_id;
                }
                // Dangling pointer: degrade to the resolvable prefix.
                None => break,
            }
        }

        path.reverse();
        Ok(path)
    }

    /// Compare two branches of the same conversation.
    ///
    /// The divergence point comes from a lock-step walk of the two
    /// message-id sequences; the common ancestor from the branch tree's
    /// parent links. The two notions are independent and reported
    /// side by side.
    pub async fn compare(
        &self,
        conversation_id: &str,
        name_a: &str,
        name_b: &str,
    ) -> Result<BranchComparison, BranchError> {
        let branch_a = self.resolve(conversation_id, name_a).await?;
        let branch_b = self.resolve(conversation_id, name_b).await?;

        let ids_a = self.message_ids(&branch_a.id).await?;
        let ids_b = self.message_ids(&branch_b.id).await?;

        let divergence = ids_a
            .iter()
            .zip(ids_b.iter())
            .position(|(a, b)| a != b)
            .unwrap_or_else(|| ids_a.len().min(ids_b.len()));

        let common_ancestor = self.common_ancestor(&branch_a, &branch_b).await?;

        Ok(BranchComparison {
            branch1: divergence_side(name_a, &ids_a, divergence),
            branch2: divergence_side(name_b, &ids_b, divergence),
            common: CommonSegment {
                messages: divergence,
                divergence_point: divergence,
            },
            common_ancestor,
        })
    }

    async fn resolve(
        &self,
        conversation_id: &str,
        name: &str,
    ) -> Result<BranchRecord, BranchError> {
        self.store
            .get_branch(conversation_id, name)
            .await
            .map_err(BranchError::from_store)?
            .ok_or_else(|| BranchError::BranchNotFound(name.to_string()))
    }

    async fn message_ids(&self, branch_id: &BranchId) -> Result<Vec<MessageId>, BranchError> {
        let entries = self
            .store
            .get_entries(branch_id)
            .await
            .map_err(BranchError::from_store)?;
        Ok(entries.into_iter().map(|e| e.message_id).collect())
    }

    /// Nearest branch both sides descend from, in the parent-link sense.
    ///
    /// Collects one side's full ancestry set, then walks the other
    /// side's chain and returns the first id the set contains. Both
    /// walks are cycle-guarded and tolerate dangling pointers.
    async fn common_ancestor(
        &self,
        branch_a: &BranchRecord,
        branch_b: &BranchRecord,
    ) -> Result<Option<String>, BranchError> {
        let mut ancestors_a: BTreeSet<BranchId> = BTreeSet::new();
        let mut parent = branch_a.parent_branch_id;
        while let Some(parent_id) = parent {
            if !ancestors_a.insert(parent_id) {
                break;
            }
            parent = match self
                .store
                .get_branch_by_id(&parent_id)
                .await
                .map_err(BranchError::from_store)?
            {
                Some(record) => record.parent_branch_id,
                None => break,
            };
        }

        let mut visited: BTreeSet<BranchId> = BTreeSet::new();
        let mut parent = branch_b.parent_branch_id;
        while let Some(parent_id) = parent {
            if ancestors_a.contains(&parent_id) {
                let name = self
                    .store
                    .get_branch_by_id(&parent_id)
                    .await
                    .map_err(BranchError::from_store)?
                    .map(|record| record.name);
                return Ok(name);
            }
            if !visited.insert(parent_id) {
                break;
            }
            parent = match self
                .store
                .get_branch_by_id(&parent_id)
                .await
                .map_err(BranchError::from_store)?
            {
                Some(record) => record.parent_branch_id,
                None => break,
            };
        }

        Ok(None)
    }
}

fn divergence_side(name: &str, ids: &[MessageId], divergence: usize) -> BranchDivergence {
    let unique: Vec<MessageId> = ids[divergence.min(ids.len())..].to_vec();
    BranchDivergence {
        name: name.to_string(),
        total_messages: ids.len(),
        unique_messages: unique.len(),
        unique_message_list: unique,
    }
}

/// Render the forest as box-drawing text.
///
/// Depth-first pre-order with an explicit stack so deep trees cannot
/// exhaust the call stack. Roots are rendered as siblings of an implicit
/// super-root, so a non-last root gets the `├─ ` connector too.
fn render_ascii(tree: &BranchTree) -> String {
    let mut output = Vec::new();
    output.push("Conversation Branch Tree".to_string());
    output.push("=".repeat(70));
    output.push(format!("Conversation ID: {}", tree.conversation_id));
    output.push(format!("Total branches: {}", tree.len()));
    output.push(String::new());

    // Stack entries: (slot, inherited prefix, is-last-sibling).
    let mut stack: Vec<(usize, String, bool)> = Vec::new();
    let roots = tree.roots();
    for (i, &root) in roots.iter().enumerate().rev() {
        stack.push((root, String::new(), i == roots.len() - 1));
    }

    while let Some((slot, prefix, is_last)) = stack.pop() {
        let Some(node) = tree.node(slot) else { continue };
        let connector = if is_last { "└─ " } else { "├─ " };

        let mut label = format!(
            "{} ({} messages)",
            node.summary.name, node.summary.message_count
        );
        if let Some(description) = &node.summary.description {
            label.push_str(&format!(" - {description}"));
        }
        output.push(format!("{prefix}{connector}{label}"));

        let child_prefix = format!("{prefix}{}", if is_last { "   " } else { "│  " });
        for (i, &child) in node.children.iter().enumerate().rev() {
            stack.push((child, child_prefix.clone(), i == node.children.len() - 1));
        }
    }

    output.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BranchStore, InMemoryStore};
    use crate::types::{BranchMessageEntry, BranchRecord};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    async fn insert(
        store: &InMemoryStore,
        name: &str,
        at_secs: i64,
        parent: Option<BranchId>,
        message_ids: &[u128],
        description: Option<&str>,
    ) -> BranchId {
        let mut record = BranchRecord::new("c1", name, Utc.timestamp_opt(at_secs, 0).unwrap());
        record.parent_branch_id = parent;
        record.description = description.map(str::to_string);
        let entries: Vec<BranchMessageEntry> = message_ids
            .iter()
            .enumerate()
            .map(|(i, &m)| {
                BranchMessageEntry::new(record.id, MessageId::new(Uuid::from_u128(m)), i as u32)
            })
            .collect();
        assert!(store.insert_branch(&record, &entries).await.unwrap());
        record.id
    }

    #[tokio::test]
    async fn test_visualize_ascii_shape() {
        let store = Arc::new(InMemoryStore::new());
        let root = insert(&store, "root", 100, None, &[1, 2], None).await;
        insert(&store, "a", 200, Some(root), &[1], Some("first detour")).await;
        insert(&store, "b", 300, Some(root), &[1, 2], None).await;

        let navigator = TreeNavigator::new(Arc::clone(&store));
        let rendered = navigator.visualize("c1", "ascii").await.unwrap();

        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "Conversation Branch Tree");
        assert_eq!(lines[1], "=".repeat(70));
        assert_eq!(lines[2], "Conversation ID: c1");
        assert_eq!(lines[3], "Total branches: 3");
        assert_eq!(lines[4], "");
        assert_eq!(lines[5], "└─ root (2 messages)");
        assert_eq!(lines[6], "   ├─ a (1 messages) - first detour");
        assert_eq!(lines[7], "   └─ b (2 messages)");
    }

    #[tokio::test]
    async fn test_visualize_multiple_roots_use_sibling_connectors() {
        let store = Arc::new(InMemoryStore::new());
        insert(&store, "first", 100, None, &[], None).await;
        insert(&store, "second", 200, None, &[], None).await;

        let navigator = TreeNavigator::new(Arc::clone(&store));
        let rendered = navigator.visualize("c1", "ascii").await.unwrap();

        assert!(rendered.contains("├─ first (0 messages)"));
        assert!(rendered.contains("└─ second (0 messages)"));
    }

    #[tokio::test]
    async fn test_visualize_empty_and_bad_format() {
        let store = Arc::new(InMemoryStore::new());
        let navigator = TreeNavigator::new(Arc::clone(&store));

        let rendered = navigator.visualize("c1", "ascii").await.unwrap();
        assert_eq!(rendered, "No branches found for conversation c1");

        let result = navigator.visualize("c1", "dot").await;
        assert!(matches!(result, Err(BranchError::InvalidFormat(_))));
    }

    #[tokio::test]
    async fn test_visualize_json_reproduces_adjacency() {
        let store = Arc::new(InMemoryStore::new());
        let root = insert(&store, "root", 100, None, &[1], None).await;
        insert(&store, "child", 200, Some(root), &[1], None).await;

        let navigator = TreeNavigator::new(Arc::clone(&store));
        let rendered = navigator.visualize("c1", "json").await.unwrap();
        let export: TreeExport = serde_json::from_str(&rendered).unwrap();

        assert_eq!(export.conversation_id, "c1");
        assert_eq!(export.branches.len(), 2);
        assert_eq!(export.tree.len(), 1);
        assert_eq!(export.tree[0].summary.name, "root");
        assert_eq!(export.tree[0].children.len(), 1);
        assert_eq!(export.tree[0].children[0].summary.name, "child");
    }

    #[tokio::test]
    async fn test_branch_path_walks_to_root() {
        let store = Arc::new(InMemoryStore::new());
        let root = insert(&store, "root", 100, None, &[], None).await;
        let mid = insert(&store, "mid", 200, Some(root), &[], None).await;
        insert(&store, "leaf", 300, Some(mid), &[], None).await;

        let navigator = TreeNavigator::new(Arc::clone(&store));
        let path = navigator.branch_path("c1", "leaf").await.unwrap();
        assert_eq!(path, vec!["root", "mid", "leaf"]);

        let result = navigator.branch_path("c1", "ghost").await;
        assert!(matches!(result, Err(BranchError::BranchNotFound(_))));
    }

    #[tokio::test]
    async fn test_branch_path_degrades_on_dangling_parent() {
        let store = Arc::new(InMemoryStore::new());
        insert(&store, "orphan", 100, Some(BranchId::random()), &[], None).await;

        let navigator = TreeNavigator::new(Arc::clone(&store));
        let path = navigator.branch_path("c1", "orphan").await.unwrap();
        assert_eq!(path, vec!["orphan"]);
    }

    #[tokio::test]
    async fn test_compare_prefix_branches() {
        let store = Arc::new(InMemoryStore::new());
        insert(&store, "alpha", 100, None, &[1, 2, 3], None).await;
        insert(&store, "beta", 200, None, &[1, 2], None).await;

        let navigator = TreeNavigator::new(Arc::clone(&store));
        let comparison = navigator.compare("c1", "alpha", "beta").await.unwrap();

        assert_eq!(comparison.common.divergence_point, 2);
        assert_eq!(comparison.common.messages, 2);
        assert_eq!(comparison.branch1.total_messages, 3);
        assert_eq!(comparison.branch1.unique_messages, 1);
        assert_eq!(
            comparison.branch1.unique_message_list,
            vec![MessageId::new(Uuid::from_u128(3))]
        );
        assert_eq!(comparison.branch2.unique_messages, 0);
        assert!(comparison.common_ancestor.is_none());
    }

    #[tokio::test]
    async fn test_compare_finds_tree_ancestor() {
        let store = Arc::new(InMemoryStore::new());
        let root = insert(&store, "root", 100, None, &[1], None).await;
        insert(&store, "a", 200, Some(root), &[1, 2], None).await;
        insert(&store, "b", 300, Some(root), &[1, 3], None).await;

        let navigator = TreeNavigator::new(Arc::clone(&store));
        let comparison = navigator.compare("c1", "a", "b").await.unwrap();

        assert_eq!(comparison.common_ancestor.as_deref(), Some("root"));
        assert_eq!(comparison.common.divergence_point, 1);
    }

    #[tokio::test]
    async fn test_compare_ancestor_independent_of_divergence() {
        // A branch created with an explicit unrelated parent shares a
        // tree ancestor while diverging at index 0.
        let store = Arc::new(InMemoryStore::new());
        let root = insert(&store, "root", 100, None, &[1], None).await;
        insert(&store, "a", 200, Some(root), &[5, 6], None).await;
        insert(&store, "b", 300, Some(root), &[7], None).await;

        let navigator = TreeNavigator::new(Arc::clone(&store));
        let comparison = navigator.compare("c1", "a", "b").await.unwrap();

        assert_eq!(comparison.common.divergence_point, 0);
        assert_eq!(comparison.common_ancestor.as_deref(), Some("root"));
    }

    #[tokio::test]
    async fn test_compare_missing_branch_fails() {
        let store = Arc::new(InMemoryStore::new());
        insert(&store, "only", 100, None, &[1], None).await;

        let navigator = TreeNavigator::new(Arc::clone(&store));
        let result = navigator.compare("c1", "only", "ghost").await;
        assert!(matches!(result, Err(BranchError::BranchNotFound(_))));
    }
}
