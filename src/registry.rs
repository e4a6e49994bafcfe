//! Branch lifecycle management.
//!
//! The registry owns branch records and their frozen message snapshots:
//! create, lookup, rename, archive, and (cascading) delete. It reads the
//! conversation log through a [`MessageStore`] and persists through a
//! [`BranchStore`]; every mutation is handed to the store as one atomic
//! unit.

use std::sync::Arc;

use chrono::Utc;

use crate::store::{BranchStore, MessageStore};
use crate::types::{
    BranchId, BranchMessageEntry, BranchRecord, BranchSummary, Message,
};

/// Error type for registry and navigator operations.
#[derive(Debug, thiserror::Error)]
pub enum BranchError {
    /// Conversation absent or empty.
    #[error("Conversation not found or empty: {0}")]
    ConversationNotFound(String),
    /// Branch (or named parent branch) not found within the conversation.
    #[error("Branch not found: {0}")]
    BranchNotFound(String),
    /// Branch name already taken within the conversation.
    #[error("Branch already exists: {0}")]
    AlreadyExists(String),
    /// Branch point outside `[1, message_count]`.
    #[error("Invalid message index: {given} (conversation has {max} messages)")]
    InvalidMessageIndex {
        /// The 1-indexed branch point the caller asked for.
        given: usize,
        /// Number of messages in the conversation.
        max: usize,
    },
    /// Unforced delete of a branch that other branches descend from.
    #[error("Branch '{0}' has child branches; use force to delete it and all children")]
    HasChildren(String),
    /// Unknown visualization format.
    #[error("Unsupported format: {0}")]
    InvalidFormat(String),
    /// Store error.
    #[error("Store error: {0}")]
    Store(String),
}

impl BranchError {
    /// Create a store error from any backend error type.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::Store(e.to_string())
    }
}

/// Branch lifecycle manager.
///
/// Generic over the message log and the branch persistence backend so
/// tests run against the in-memory store and production against
/// PostgreSQL.
///
/// Single-writer-per-conversation is assumed: the registry provides no
/// cross-operation locking. Each individual mutation is atomic at the
/// store, so readers degrade gracefully but are not snapshot-consistent
/// with an in-flight delete.
pub struct BranchRegistry<M: MessageStore, B: BranchStore> {
    messages: Arc<M>,
    branches: Arc<B>,
}

impl<M: MessageStore, B: BranchStore> BranchRegistry<M, B> {
    /// Create a new registry over the given stores.
    pub fn new(messages: Arc<M>, branches: Arc<B>) -> Self {
        Self { messages, branches }
    }

    /// Fork a conversation into a new branch.
    ///
    /// Copies message ids `[0, from_message_index)` from the conversation
    /// log into a frozen snapshot; `from_message_index` is 1-indexed and
    /// defaults to "all current messages". The snapshot never tracks the
    /// source conversation after this call.
    ///
    /// Errors: [`BranchError::ConversationNotFound`] when the
    /// conversation has no messages, [`BranchError::InvalidMessageIndex`]
    /// when the index is out of range, [`BranchError::BranchNotFound`]
    /// when `parent_branch_name` does not resolve, and
    /// [`BranchError::AlreadyExists`] on a name collision.
    pub async fn create_branch(
        &self,
        conversation_id: &str,
        name: &str,
        from_message_index: Option<usize>,
        description: Option<&str>,
        parent_branch_name: Option<&str>,
    ) -> Result<BranchId, BranchError> {
        let messages = self
            .messages
            .list_messages(conversation_id)
            .await
            .map_err(BranchError::from_store)?;
        if messages.is_empty() {
            return Err(BranchError::ConversationNotFound(
                conversation_id.to_string(),
            ));
        }

        let snapshot: &[Message] = match from_message_index {
            Some(index) => {
                if index < 1 || index > messages.len() {
                    return Err(BranchError::InvalidMessageIndex {
                        given: index,
                        max: messages.len(),
                    });
                }
                &messages[..index]
            }
            None => &messages[..],
        };

        let parent_id = match parent_branch_name {
            Some(parent_name) => {
                let parent = self
                    .branches
                    .get_branch(conversation_id, parent_name)
                    .await
                    .map_err(BranchError::from_store)?
                    .ok_or_else(|| BranchError::BranchNotFound(parent_name.to_string()))?;
                Some(parent.id)
            }
            None => None,
        };

        let mut record = BranchRecord::new(conversation_id, name, Utc::now());
        if let Some(parent_id) = parent_id {
            record = record.with_parent(parent_id);
        }
        if let Some(last) = snapshot.last() {
            record = record.with_branch_point(last.id);
        }
        if let Some(description) = description {
            record = record.with_description(description);
        }

        let entries: Vec<BranchMessageEntry> = snapshot
            .iter()
            .enumerate()
            .map(|(i, m)| BranchMessageEntry::new(record.id, m.id, i as u32))
            .collect();

        let inserted = self
            .branches
            .insert_branch(&record, &entries)
            .await
            .map_err(BranchError::from_store)?;
        if !inserted {
            return Err(BranchError::AlreadyExists(name.to_string()));
        }

        tracing::info!(
            conversation_id = %conversation_id,
            branch = %name,
            branch_id = %record.id,
            snapshot_len = entries.len(),
            "Branch created"
        );
        Ok(record.id)
    }

    /// Look up a branch by name, annotated with its message count.
    /// Absence is `None`, not an error.
    pub async fn get_branch(
        &self,
        conversation_id: &str,
        name: &str,
    ) -> Result<Option<BranchSummary>, BranchError> {
        let record = self
            .branches
            .get_branch(conversation_id, name)
            .await
            .map_err(BranchError::from_store)?;
        match record {
            Some(record) => Ok(Some(self.summarize(record).await?)),
            None => Ok(None),
        }
    }

    /// List a conversation's branches ordered by creation time
    /// descending, each annotated with its message count. Archived
    /// branches are excluded unless `include_inactive` is set. An
    /// unknown conversation yields an empty list.
    pub async fn list_branches(
        &self,
        conversation_id: &str,
        include_inactive: bool,
    ) -> Result<Vec<BranchSummary>, BranchError> {
        let mut records = self
            .branches
            .list_branches(conversation_id, include_inactive)
            .await
            .map_err(BranchError::from_store)?;
        // Store order is created-at ascending; listings are newest-first.
        records.reverse();

        let ids: Vec<BranchId> = records.iter().map(|r| r.id).collect();
        let counts = self
            .branches
            .count_entries(&ids)
            .await
            .map_err(BranchError::from_store)?;

        Ok(records
            .into_iter()
            .map(|record| {
                let count = counts.get(&record.id).copied().unwrap_or(0);
                BranchSummary::from_record(record, count)
            })
            .collect())
    }

    /// Rename a branch. Returns `false` without touching anything when
    /// the old name is missing or the new name is already taken.
    pub async fn rename_branch(
        &self,
        conversation_id: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<bool, BranchError> {
        let renamed = self
            .branches
            .rename_branch(conversation_id, old_name, new_name)
            .await
            .map_err(BranchError::from_store)?;
        if renamed {
            tracing::info!(
                conversation_id = %conversation_id,
                old_name = %old_name,
                new_name = %new_name,
                "Branch renamed"
            );
        }
        Ok(renamed)
    }

    /// Archive a branch (Active → Archived). Idempotent; returns `false`
    /// when the branch does not exist. No operation restores an archived
    /// branch.
    pub async fn archive_branch(
        &self,
        conversation_id: &str,
        name: &str,
    ) -> Result<bool, BranchError> {
        self.branches
            .archive_branch(conversation_id, name)
            .await
            .map_err(BranchError::from_store)
    }

    /// Delete a branch, optionally cascading to all descendants.
    ///
    /// Without `force`, fails [`BranchError::HasChildren`] when any
    /// branch names this one as parent. With `force`, the full cascade
    /// set is computed with an explicit worklist (never unbounded
    /// recursion) and handed to the store in children-before-parents
    /// order as a single atomic delete. Returns `false` when the named
    /// branch does not exist.
    pub async fn delete_branch(
        &self,
        conversation_id: &str,
        name: &str,
        force: bool,
    ) -> Result<bool, BranchError> {
        let branch = match self
            .branches
            .get_branch(conversation_id, name)
            .await
            .map_err(BranchError::from_store)?
        {
            Some(branch) => branch,
            None => return Ok(false),
        };

        let has_children = self
            .branches
            .has_children(&branch.id)
            .await
            .map_err(BranchError::from_store)?;
        if has_children && !force {
            return Err(BranchError::HasChildren(name.to_string()));
        }

        let delete_set = if force {
            self.collect_cascade(conversation_id, branch.id).await?
        } else {
            vec![branch.id]
        };

        self.branches
            .delete_branches(&delete_set)
            .await
            .map_err(BranchError::from_store)?;

        tracing::info!(
            conversation_id = %conversation_id,
            branch = %name,
            deleted = delete_set.len(),
            "Branch deleted"
        );
        Ok(true)
    }

    /// Collect the target and all transitive descendants in
    /// children-before-parents order.
    async fn collect_cascade(
        &self,
        conversation_id: &str,
        root: BranchId,
    ) -> Result<Vec<BranchId>, BranchError> {
        let all = self
            .branches
            .list_branches(conversation_id, true)
            .await
            .map_err(BranchError::from_store)?;

        // Parent-before-child order via a worklist, then reversed so the
        // store deletes leaves first.
        let mut order: Vec<BranchId> = Vec::new();
        let mut stack: Vec<BranchId> = vec![root];
        while let Some(id) = stack.pop() {
            order.push(id);
            for child in all.iter().filter(|b| b.parent_branch_id == Some(id)) {
                stack.push(child.id);
            }
        }
        order.reverse();
        Ok(order)
    }

    /// Resolve a branch's snapshot to full messages, in the branch's own
    /// stored sequence order. Ids that no longer resolve in the log are
    /// silently omitted; an empty or unknown branch yields an empty list.
    pub async fn get_branch_messages(
        &self,
        branch_id: &BranchId,
    ) -> Result<Vec<Message>, BranchError> {
        let entries = self
            .branches
            .get_entries(branch_id)
            .await
            .map_err(BranchError::from_store)?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<_> = entries.iter().map(|e| e.message_id).collect();
        self.messages
            .get_messages_by_ids(&ids)
            .await
            .map_err(BranchError::from_store)
    }

    /// Fetch the conversation's current branch, if one is set.
    pub async fn current_branch(
        &self,
        conversation_id: &str,
    ) -> Result<Option<BranchSummary>, BranchError> {
        let head = self
            .branches
            .current_branch(conversation_id)
            .await
            .map_err(BranchError::from_store)?;
        let Some(head) = head else {
            return Ok(None);
        };
        let record = self
            .branches
            .get_branch_by_id(&head)
            .await
            .map_err(BranchError::from_store)?;
        match record {
            Some(record) => Ok(Some(self.summarize(record).await?)),
            None => Ok(None),
        }
    }

    /// Point the conversation's current branch at the named branch.
    /// Returns `false` when the branch does not exist.
    pub async fn set_current_branch(
        &self,
        conversation_id: &str,
        name: &str,
    ) -> Result<bool, BranchError> {
        let branch = match self
            .branches
            .get_branch(conversation_id, name)
            .await
            .map_err(BranchError::from_store)?
        {
            Some(branch) => branch,
            None => return Ok(false),
        };
        self.branches
            .set_current_branch(conversation_id, Some(branch.id))
            .await
            .map_err(BranchError::from_store)?;
        Ok(true)
    }

    /// Get a reference to the branch store.
    pub fn branch_store(&self) -> &Arc<B> {
        &self.branches
    }

    /// Get a reference to the message store.
    pub fn message_store(&self) -> &Arc<M> {
        &self.messages
    }

    async fn summarize(&self, record: BranchRecord) -> Result<BranchSummary, BranchError> {
        let counts = self
            .branches
            .count_entries(&[record.id])
            .await
            .map_err(BranchError::from_store)?;
        let count = counts.get(&record.id).copied().unwrap_or(0);
        Ok(BranchSummary::from_record(record, count))
    }
}
