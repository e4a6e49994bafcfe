//! In-memory store for testing.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::{BranchId, BranchMessageEntry, BranchRecord, Message, MessageId};
use super::{BranchStore, MessageStore};

/// Error type for the in-memory store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InMemoryError {
    /// Branch not found.
    #[error("Branch not found: {0}")]
    BranchNotFound(BranchId),
}

#[derive(Debug, Default)]
struct Inner {
    /// Messages by id.
    messages: BTreeMap<MessageId, Message>,
    /// Branch records by id.
    branches: BTreeMap<BranchId, BranchRecord>,
    /// Snapshot entries per branch, held in sequence order.
    entries: BTreeMap<BranchId, Vec<BranchMessageEntry>>,
    /// Current-branch pointer per conversation.
    heads: BTreeMap<String, BranchId>,
}

/// In-memory message and branch store.
///
/// Uses BTreeMap for deterministic iteration order. State lives behind
/// a single lock so mutations through `Arc` stay atomic: every store
/// call takes the lock exactly once.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message to the conversation log.
    pub fn add_message(&self, message: Message) {
        self.inner.write().messages.insert(message.id, message);
    }

    /// Get the number of branches across all conversations.
    pub fn num_branches(&self) -> usize {
        self.inner.read().branches.len()
    }

    /// Get the number of snapshot entry rows across all branches.
    pub fn num_entries(&self) -> usize {
        self.inner.read().entries.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    type Error = InMemoryError;

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, Self::Error> {
        let inner = self.inner.read();
        let mut messages: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(messages)
    }

    async fn get_messages_by_ids(&self, ids: &[MessageId]) -> Result<Vec<Message>, Self::Error> {
        let inner = self.inner.read();
        Ok(ids
            .iter()
            .filter_map(|id| inner.messages.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl BranchStore for InMemoryStore {
    type Error = InMemoryError;

    async fn insert_branch(
        &self,
        record: &BranchRecord,
        entries: &[BranchMessageEntry],
    ) -> Result<bool, Self::Error> {
        let mut inner = self.inner.write();

        let taken = inner.branches.values().any(|b| {
            b.conversation_id == record.conversation_id && b.name == record.name
        });
        if taken {
            return Ok(false);
        }

        inner.branches.insert(record.id, record.clone());
        inner.entries.insert(record.id, entries.to_vec());
        Ok(true)
    }

    async fn get_branch(
        &self,
        conversation_id: &str,
        name: &str,
    ) -> Result<Option<BranchRecord>, Self::Error> {
        let inner = self.inner.read();
        Ok(inner
            .branches
            .values()
            .find(|b| b.conversation_id == conversation_id && b.name == name)
            .cloned())
    }

    async fn get_branch_by_id(&self, id: &BranchId) -> Result<Option<BranchRecord>, Self::Error> {
        Ok(self.inner.read().branches.get(id).cloned())
    }

    async fn list_branches(
        &self,
        conversation_id: &str,
        include_inactive: bool,
    ) -> Result<Vec<BranchRecord>, Self::Error> {
        let inner = self.inner.read();
        let mut branches: Vec<BranchRecord> = inner
            .branches
            .values()
            .filter(|b| b.conversation_id == conversation_id)
            .filter(|b| include_inactive || b.active)
            .cloned()
            .collect();
        branches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(branches)
    }

    async fn rename_branch(
        &self,
        conversation_id: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<bool, Self::Error> {
        let mut inner = self.inner.write();

        let new_taken = inner.branches.values().any(|b| {
            b.conversation_id == conversation_id && b.name == new_name
        });
        if new_taken {
            return Ok(false);
        }

        let target = inner.branches.values_mut().find(|b| {
            b.conversation_id == conversation_id && b.name == old_name
        });
        match target {
            Some(branch) => {
                branch.name = new_name.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn archive_branch(
        &self,
        conversation_id: &str,
        name: &str,
    ) -> Result<bool, Self::Error> {
        let mut inner = self.inner.write();
        let target = inner.branches.values_mut().find(|b| {
            b.conversation_id == conversation_id && b.name == name
        });
        match target {
            Some(branch) => {
                branch.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn has_children(&self, id: &BranchId) -> Result<bool, Self::Error> {
        let inner = self.inner.read();
        Ok(inner
            .branches
            .values()
            .any(|b| b.parent_branch_id == Some(*id)))
    }

    async fn delete_branches(&self, ids: &[BranchId]) -> Result<(), Self::Error> {
        let mut inner = self.inner.write();
        for id in ids {
            inner.branches.remove(id);
            inner.entries.remove(id);
        }
        inner.heads.retain(|_, head| !ids.contains(head));
        Ok(())
    }

    async fn get_entries(
        &self,
        branch_id: &BranchId,
    ) -> Result<Vec<BranchMessageEntry>, Self::Error> {
        let inner = self.inner.read();
        let mut entries = inner.entries.get(branch_id).cloned().unwrap_or_default();
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    async fn count_entries(
        &self,
        branch_ids: &[BranchId],
    ) -> Result<BTreeMap<BranchId, usize>, Self::Error> {
        let inner = self.inner.read();
        Ok(branch_ids
            .iter()
            .filter_map(|id| inner.entries.get(id).map(|e| (*id, e.len())))
            .collect())
    }

    async fn current_branch(
        &self,
        conversation_id: &str,
    ) -> Result<Option<BranchId>, Self::Error> {
        Ok(self.inner.read().heads.get(conversation_id).copied())
    }

    async fn set_current_branch(
        &self,
        conversation_id: &str,
        branch_id: Option<BranchId>,
    ) -> Result<(), Self::Error> {
        let mut inner = self.inner.write();
        match branch_id {
            Some(id) => {
                // Mirror the foreign key the relational backend enforces.
                if !inner.branches.contains_key(&id) {
                    return Err(InMemoryError::BranchNotFound(id));
                }
                inner.heads.insert(conversation_id.to_string(), id);
            }
            None => {
                inner.heads.remove(conversation_id);
            }
        }
        Ok(())
    }
}
