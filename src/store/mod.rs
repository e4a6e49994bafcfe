//! Storage backends for the branch kernel.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use std::collections::BTreeMap;

use async_trait::async_trait;
use crate::types::{BranchId, BranchMessageEntry, BranchRecord, Message, MessageId};

/// Trait for the append-only conversation log.
///
/// The message log is owned by the surrounding system; the branch kernel
/// only reads it. Implementations must guarantee deterministic ordering
/// of results. All methods are async to support async database access.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync;

    /// Fetch all messages of a conversation, ordered by creation time
    /// ascending (id as tiebreaker). Unknown conversations yield an
    /// empty list.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, Self::Error>;

    /// Fetch messages by id, preserving the requested order and
    /// silently omitting ids that do not resolve.
    async fn get_messages_by_ids(&self, ids: &[MessageId]) -> Result<Vec<Message>, Self::Error>;
}

/// Trait for branch persistence.
///
/// Every mutating method must execute as one atomic unit (a transaction
/// or a single lock scope), so a crash never leaves a partially-deleted
/// subtree or a branch without its snapshot entries.
#[async_trait]
pub trait BranchStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync;

    /// Insert a branch together with its snapshot entries atomically.
    ///
    /// Returns `false` without inserting anything when the
    /// `(conversation_id, name)` pair is already taken.
    async fn insert_branch(
        &self,
        record: &BranchRecord,
        entries: &[BranchMessageEntry],
    ) -> Result<bool, Self::Error>;

    /// Fetch a branch by conversation and name (case-sensitive).
    async fn get_branch(
        &self,
        conversation_id: &str,
        name: &str,
    ) -> Result<Option<BranchRecord>, Self::Error>;

    /// Fetch a branch by id.
    async fn get_branch_by_id(&self, id: &BranchId) -> Result<Option<BranchRecord>, Self::Error>;

    /// Fetch branches of a conversation ordered by creation time
    /// ascending (id as tiebreaker). `include_inactive` controls whether
    /// archived branches are returned.
    async fn list_branches(
        &self,
        conversation_id: &str,
        include_inactive: bool,
    ) -> Result<Vec<BranchRecord>, Self::Error>;

    /// Rename a branch. Returns `false` when the old name is missing or
    /// the new name is already taken within the conversation; the store
    /// never leaks its uniqueness violation for this call.
    async fn rename_branch(
        &self,
        conversation_id: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<bool, Self::Error>;

    /// Mark a branch inactive. Idempotent; returns `false` when the
    /// branch does not exist.
    async fn archive_branch(&self, conversation_id: &str, name: &str)
        -> Result<bool, Self::Error>;

    /// Check whether any branch names this one as parent.
    async fn has_children(&self, id: &BranchId) -> Result<bool, Self::Error>;

    /// Delete the given branches and their snapshot entries atomically,
    /// clearing any current-branch pointer that references them. The
    /// caller supplies the full cascade set in children-before-parents
    /// order.
    async fn delete_branches(&self, ids: &[BranchId]) -> Result<(), Self::Error>;

    /// Fetch a branch's snapshot entries ordered by sequence ascending.
    async fn get_entries(&self, branch_id: &BranchId)
        -> Result<Vec<BranchMessageEntry>, Self::Error>;

    /// Count snapshot entries for each of the given branches. Ids with
    /// no entries are absent from the map.
    async fn count_entries(
        &self,
        branch_ids: &[BranchId],
    ) -> Result<BTreeMap<BranchId, usize>, Self::Error>;

    /// Fetch the conversation's current-branch pointer, if set.
    async fn current_branch(&self, conversation_id: &str)
        -> Result<Option<BranchId>, Self::Error>;

    /// Set or clear the conversation's current-branch pointer. The
    /// caller is responsible for resolving the id to an existing branch.
    async fn set_current_branch(
        &self,
        conversation_id: &str,
        branch_id: Option<BranchId>,
    ) -> Result<(), Self::Error>;
}

pub use memory::InMemoryStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
