//! Property-based tests for forest construction, comparison, and
//! cascading deletion.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;

use branch_kernel::{
    BranchId, BranchMessageEntry, BranchRecord, BranchRegistry, BranchStore, BranchSummary,
    BranchTree, InMemoryStore, Message, MessageId, TreeNavigator,
};
use chrono::{TimeZone, Utc};
use uuid::Uuid;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn message_id(n: u128) -> MessageId {
    MessageId::new(Uuid::from_u128(n))
}

async fn insert_branch_with_ids(store: &InMemoryStore, name: &str, ids: &[MessageId]) -> BranchId {
    let record = BranchRecord::new("c1", name, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    let id = record.id;
    let entries: Vec<BranchMessageEntry> = ids
        .iter()
        .enumerate()
        .map(|(seq, mid)| BranchMessageEntry::new(id, *mid, seq as u32))
        .collect();
    assert!(store.insert_branch(&record, &entries).await.unwrap());
    id
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Divergence is exactly the shared prefix length when the suffixes
    /// are drawn from disjoint id spaces, and each side's unique list is
    /// exactly its suffix.
    #[test]
    fn divergence_matches_shared_prefix(
        prefix_len in 0usize..20,
        suffix_a_len in 0usize..10,
        suffix_b_len in 0usize..10,
    ) {
        let rt = runtime();
        rt.block_on(async {
            let store = Arc::new(InMemoryStore::new());

            let prefix: Vec<MessageId> = (1..=prefix_len as u128).map(message_id).collect();
            let suffix_a: Vec<MessageId> =
                (0..suffix_a_len as u128).map(|i| message_id(1_000 + i)).collect();
            let suffix_b: Vec<MessageId> =
                (0..suffix_b_len as u128).map(|i| message_id(2_000 + i)).collect();

            let ids_a: Vec<MessageId> =
                prefix.iter().chain(suffix_a.iter()).copied().collect();
            let ids_b: Vec<MessageId> =
                prefix.iter().chain(suffix_b.iter()).copied().collect();

            insert_branch_with_ids(&store, "a", &ids_a).await;
            insert_branch_with_ids(&store, "b", &ids_b).await;

            let navigator = TreeNavigator::new(Arc::clone(&store));
            let comparison = navigator.compare("c1", "a", "b").await.unwrap();

            prop_assert_eq!(comparison.common.divergence_point, prefix_len);
            prop_assert_eq!(comparison.common.messages, prefix_len);
            prop_assert_eq!(comparison.branch1.total_messages, ids_a.len());
            prop_assert_eq!(comparison.branch2.total_messages, ids_b.len());
            prop_assert_eq!(comparison.branch1.unique_messages, suffix_a_len);
            prop_assert_eq!(comparison.branch2.unique_messages, suffix_b_len);
            prop_assert_eq!(comparison.branch1.unique_message_list, suffix_a);
            prop_assert_eq!(comparison.branch2.unique_message_list, suffix_b);
            Ok(())
        })?;
    }

    /// Force-deleting any branch of a random forest never strands a
    /// branch whose parent is gone, and never leaves snapshot rows
    /// behind for deleted branches.
    #[test]
    fn forced_delete_leaves_no_orphans(
        parents in prop::collection::vec(proptest::option::of(0usize..8), 1..12),
        victim in 0usize..12,
    ) {
        let rt = runtime();
        rt.block_on(async {
            let store = Arc::new(InMemoryStore::new());
            store.add_message(Message::new(
                message_id(1),
                "c1",
                "prompt",
                "response",
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            ));
            let registry = BranchRegistry::new(Arc::clone(&store), Arc::clone(&store));

            // Parent slots always point at an earlier branch, so the
            // forest is acyclic by construction.
            for (i, parent) in parents.iter().enumerate() {
                let parent_name = parent
                    .filter(|&p| p < i)
                    .map(|p| format!("b{p}"));
                registry
                    .create_branch("c1", &format!("b{i}"), None, None, parent_name.as_deref())
                    .await
                    .unwrap();
            }

            let victim = format!("b{}", victim % parents.len());
            registry.delete_branch("c1", &victim, true).await.unwrap();

            let remaining = registry.list_branches("c1", true).await.unwrap();
            let remaining_ids: BTreeSet<BranchId> =
                remaining.iter().map(|b| b.id).collect();

            for branch in &remaining {
                prop_assert_ne!(&branch.name, &victim);
                if let Some(parent_id) = branch.parent_branch_id {
                    prop_assert!(
                        remaining_ids.contains(&parent_id),
                        "branch {} lost its parent",
                        branch.name
                    );
                }
            }

            // Each surviving branch holds exactly the one-message snapshot.
            prop_assert_eq!(store.num_branches(), remaining.len());
            prop_assert_eq!(store.num_entries(), remaining.len());
            Ok(())
        })?;
    }

    /// Forest assembly places every summary exactly once; summaries with
    /// unresolvable parents surface as roots instead of disappearing.
    #[test]
    fn forest_assembly_is_total(
        parents in prop::collection::vec(
            prop_oneof![
                Just(0u8),      // root
                Just(1u8),      // parent = previous branch
                Just(2u8),      // parent = unknown id
            ],
            1..16,
        ),
    ) {
        let mut summaries = Vec::new();
        let mut expected_roots = 0usize;
        let mut previous: Option<BranchId> = None;

        for (i, kind) in parents.iter().enumerate() {
            let mut record = BranchRecord::new(
                "c1",
                format!("b{i}"),
                Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap(),
            );
            match (*kind, previous) {
                (1, Some(parent)) => record = record.with_parent(parent),
                (2, _) => {
                    record = record.with_parent(BranchId::random());
                    expected_roots += 1;
                }
                _ => expected_roots += 1,
            }
            previous = Some(record.id);
            summaries.push(BranchSummary::from_record(record, 0));
        }

        let tree = BranchTree::from_summaries("c1", summaries.clone());

        prop_assert_eq!(tree.len(), summaries.len());
        prop_assert_eq!(tree.roots().len(), expected_roots);

        // Reachability from the roots covers every node exactly once.
        let mut seen = BTreeSet::new();
        let mut stack: Vec<usize> = tree.roots().to_vec();
        while let Some(slot) = stack.pop() {
            prop_assert!(seen.insert(slot), "slot {} reached twice", slot);
            let node = tree.node(slot).unwrap();
            stack.extend(node.children.iter().copied());
        }
        prop_assert_eq!(seen.len(), summaries.len());
    }
}
