//! Branch types for the branch kernel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::message::MessageId;

/// Unique identifier for a conversation branch.
///
/// Wraps a UUID and implements `Ord` for deterministic ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BranchId(Uuid);

impl BranchId {
    /// Create a new BranchId from a UUID.
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Create a new BranchId from a UUID string.
    pub fn from_str(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Generate a fresh random BranchId.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for BranchId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Persisted branch record.
///
/// Parent/child relationships are stored as back-references only
/// (`parent_branch_id`); forward adjacency is rebuilt per query by the
/// tree builder, never persisted.
///
/// Invariants:
/// - `(conversation_id, name)` is unique (case-sensitive)
/// - `conversation_id` is immutable after creation
/// - the parent chain is acyclic and terminates at a root (`None` parent)
/// - a branch's conversation matches its parent's conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRecord {
    /// Unique branch identifier.
    pub id: BranchId,
    /// Conversation this branch forks.
    pub conversation_id: String,
    /// Branch name, unique per conversation.
    pub name: String,
    /// Parent branch, if this branch was forked from another branch.
    pub parent_branch_id: Option<BranchId>,
    /// Last conversation message captured at fork time.
    pub branch_point_message_id: Option<MessageId>,
    /// Optional free-form description.
    pub description: Option<String>,
    /// False once the branch has been archived.
    pub active: bool,
    /// When the branch was created.
    pub created_at: DateTime<Utc>,
}

impl BranchRecord {
    /// Create a new active branch record with a fresh id.
    pub fn new(
        conversation_id: impl Into<String>,
        name: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BranchId::random(),
            conversation_id: conversation_id.into(),
            name: name.into(),
            parent_branch_id: None,
            branch_point_message_id: None,
            description: None,
            active: true,
            created_at,
        }
    }

    /// Set the parent branch.
    pub fn with_parent(mut self, parent: BranchId) -> Self {
        self.parent_branch_id = Some(parent);
        self
    }

    /// Set the branch point message.
    pub fn with_branch_point(mut self, message_id: MessageId) -> Self {
        self.branch_point_message_id = Some(message_id);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check if this is a root branch (no parent).
    pub fn is_root(&self) -> bool {
        self.parent_branch_id.is_none()
    }
}

impl PartialEq for BranchRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BranchRecord {}

/// One row of a branch's frozen message snapshot.
///
/// Sequence values are contiguous per branch, starting at 0. Entries are
/// created atomically with their branch and removed atomically on delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchMessageEntry {
    /// Branch the entry belongs to.
    pub branch_id: BranchId,
    /// Message captured from the conversation log.
    pub message_id: MessageId,
    /// Position within the branch, starting at 0.
    pub sequence: u32,
}

impl BranchMessageEntry {
    /// Create a new entry.
    pub fn new(branch_id: BranchId, message_id: MessageId, sequence: u32) -> Self {
        Self {
            branch_id,
            message_id,
            sequence,
        }
    }
}

/// A branch record annotated with its snapshot length.
///
/// This is the shape lookups and listings return: the persisted fields
/// flattened together with `message_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchSummary {
    /// Unique branch identifier.
    pub id: BranchId,
    /// Conversation this branch forks.
    pub conversation_id: String,
    /// Branch name, unique per conversation.
    pub name: String,
    /// Parent branch, if any.
    pub parent_branch_id: Option<BranchId>,
    /// Last conversation message captured at fork time.
    pub branch_point_message_id: Option<MessageId>,
    /// Optional free-form description.
    pub description: Option<String>,
    /// False once the branch has been archived.
    pub active: bool,
    /// When the branch was created.
    pub created_at: DateTime<Utc>,
    /// Number of messages in the branch's frozen snapshot.
    pub message_count: usize,
}

impl BranchSummary {
    /// Annotate a record with its message count.
    pub fn from_record(record: BranchRecord, message_count: usize) -> Self {
        Self {
            id: record.id,
            conversation_id: record.conversation_id,
            name: record.name,
            parent_branch_id: record.parent_branch_id,
            branch_point_message_id: record.branch_point_message_id,
            description: record.description,
            active: record.active,
            created_at: record.created_at,
            message_count,
        }
    }

    /// Check if this is a root branch (no parent).
    pub fn is_root(&self) -> bool {
        self.parent_branch_id.is_none()
    }
}
