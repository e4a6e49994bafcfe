//! Branch forest construction.
//!
//! Loads a conversation's flat branch records and assembles the
//! parent→children forest in memory: one arena of nodes, adjacency as
//! arena indices, an id index for lookups. Nothing here is persisted.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::registry::BranchError;
use crate::store::BranchStore;
use crate::types::{BranchId, BranchSummary};

/// One node of the in-memory branch forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchNode {
    /// The branch, annotated with its message count.
    pub summary: BranchSummary,
    /// Arena slots of this node's children, in creation order.
    pub children: Vec<usize>,
}

/// A conversation's branch forest.
///
/// All nodes live in one flat arena; roots and children are arena
/// indices. Node order is creation time ascending (id as tiebreaker), so
/// traversal order is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchTree {
    /// Conversation the forest belongs to.
    pub conversation_id: String,
    nodes: Vec<BranchNode>,
    roots: Vec<usize>,
    #[serde(skip)]
    index: BTreeMap<BranchId, usize>,
}

impl BranchTree {
    /// Assemble a forest from flat records, already in creation order.
    ///
    /// Branches whose parent is absent from the set are promoted to
    /// roots rather than rejected, so a transiently inconsistent store
    /// degrades instead of failing readers.
    pub fn from_summaries(conversation_id: impl Into<String>, summaries: Vec<BranchSummary>) -> Self {
        let conversation_id = conversation_id.into();

        let index: BTreeMap<BranchId, usize> = summaries
            .iter()
            .enumerate()
            .map(|(slot, s)| (s.id, slot))
            .collect();

        let mut nodes: Vec<BranchNode> = summaries
            .into_iter()
            .map(|summary| BranchNode { summary, children: Vec::new() })
            .collect();

        let mut roots = Vec::new();
        for slot in 0..nodes.len() {
            match nodes[slot].summary.parent_branch_id {
                Some(parent_id) => match index.get(&parent_id) {
                    Some(&parent_slot) => nodes[parent_slot].children.push(slot),
                    None => {
                        tracing::warn!(
                            conversation_id = %conversation_id,
                            branch = %nodes[slot].summary.name,
                            parent_id = %parent_id,
                            "Dangling parent reference; promoting branch to root"
                        );
                        roots.push(slot);
                    }
                },
                None => roots.push(slot),
            }
        }

        Self { conversation_id, nodes, roots, index }
    }

    /// Number of branches in the forest.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the forest is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Arena slots of the roots, in creation order.
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Look at a node by arena slot.
    pub fn node(&self, slot: usize) -> Option<&BranchNode> {
        self.nodes.get(slot)
    }

    /// All nodes in load (creation) order.
    pub fn nodes(&self) -> &[BranchNode] {
        &self.nodes
    }

    /// Flat branch summaries in load (creation) order.
    pub fn summaries(&self) -> impl Iterator<Item = &BranchSummary> {
        self.nodes.iter().map(|n| &n.summary)
    }

    /// Find a node's arena slot by branch id.
    pub fn slot_of(&self, id: &BranchId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Find a node by branch name.
    pub fn find_by_name(&self, name: &str) -> Option<&BranchNode> {
        self.nodes.iter().find(|n| n.summary.name == name)
    }
}

/// Assembles [`BranchTree`]s from a branch store.
pub struct TreeBuilder<B: BranchStore> {
    store: Arc<B>,
}

impl<B: BranchStore> TreeBuilder<B> {
    /// Create a new builder over the given store.
    pub fn new(store: Arc<B>) -> Self {
        Self { store }
    }

    /// Build the branch forest for a conversation.
    ///
    /// Loads every branch (archived included) ordered by creation time
    /// ascending so child ordering is deterministic, annotates each with
    /// its message count, and attaches children to parents by id. An
    /// unknown conversation yields an empty forest.
    pub async fn build(&self, conversation_id: &str) -> Result<BranchTree, BranchError> {
        let records = self
            .store
            .list_branches(conversation_id, true)
            .await
            .map_err(BranchError::from_store)?;

        let ids: Vec<BranchId> = records.iter().map(|r| r.id).collect();
        let counts = self
            .store
            .count_entries(&ids)
            .await
            .map_err(BranchError::from_store)?;

        let summaries: Vec<BranchSummary> = records
            .into_iter()
            .map(|record| {
                let count = counts.get(&record.id).copied().unwrap_or(0);
                BranchSummary::from_record(record, count)
            })
            .collect();

        Ok(BranchTree::from_summaries(conversation_id, summaries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BranchRecord;
    use chrono::{TimeZone, Utc};

    fn summary(name: &str, at_secs: i64, parent: Option<BranchId>) -> BranchSummary {
        let mut record = BranchRecord::new("c1", name, Utc.timestamp_opt(at_secs, 0).unwrap());
        record.parent_branch_id = parent;
        BranchSummary::from_record(record, 0)
    }

    #[test]
    fn test_forest_attaches_children_in_order() {
        let root = summary("root", 100, None);
        let root_id = root.id;
        let a = summary("a", 200, Some(root_id));
        let b = summary("b", 300, Some(root_id));
        let a_id = a.id;
        let a1 = summary("a1", 400, Some(a_id));

        let tree = BranchTree::from_summaries("c1", vec![root, a, b, a1]);

        assert_eq!(tree.len(), 4);
        assert_eq!(tree.roots(), &[0]);
        let root_node = tree.node(0).unwrap();
        assert_eq!(root_node.children, vec![1, 2]);
        assert_eq!(tree.node(1).unwrap().children, vec![3]);
        assert_eq!(tree.find_by_name("a1").unwrap().summary.name, "a1");
        assert_eq!(tree.slot_of(&root_id), Some(0));
    }

    #[test]
    fn test_dangling_parent_is_promoted_to_root() {
        let orphan = summary("orphan", 100, Some(BranchId::random()));
        let tree = BranchTree::from_summaries("c1", vec![orphan]);

        assert_eq!(tree.roots(), &[0]);
        assert_eq!(tree.node(0).unwrap().summary.name, "orphan");
    }

    #[test]
    fn test_empty_forest() {
        let tree = BranchTree::from_summaries("c1", vec![]);
        assert!(tree.is_empty());
        assert!(tree.roots().is_empty());
    }

    #[tokio::test]
    async fn test_build_from_store() {
        use crate::store::{BranchStore, InMemoryStore};

        let store = Arc::new(InMemoryStore::new());
        let root = BranchRecord::new("c1", "root", Utc.timestamp_opt(100, 0).unwrap());
        let child = BranchRecord::new("c1", "child", Utc.timestamp_opt(200, 0).unwrap())
            .with_parent(root.id);
        store.insert_branch(&root, &[]).await.unwrap();
        store.insert_branch(&child, &[]).await.unwrap();

        let builder = TreeBuilder::new(Arc::clone(&store));
        let tree = builder.build("c1").await.unwrap();

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.roots().len(), 1);
        let root_node = tree.node(tree.roots()[0]).unwrap();
        assert_eq!(root_node.summary.name, "root");
        assert_eq!(root_node.children.len(), 1);

        // Unknown conversations are empty forests, not errors.
        assert!(builder.build("nope").await.unwrap().is_empty());
    }
}
