//! # branch-kernel
//!
//! Branch lifecycle and tree navigation for append-only conversation logs.
//!
//! The branch kernel answers one question:
//!
//! > Given a conversation log, how do its forked branches relate - and
//! > where do any two of them diverge?
//!
//! ## Core Contract
//!
//! 1. Fork a conversation into named branches carrying **frozen message
//!    snapshots** (never live views of the source)
//! 2. Maintain the branch tree through rename/archive/delete, with
//!    cascading deletes executed atomically
//! 3. Answer structural queries: visualization, root paths, common
//!    ancestry, sequence divergence
//!
//! ## Architecture
//!
//! ```text
//! MessageStore ──► BranchRegistry ──► BranchStore (Postgres or Memory)
//!                        │
//!                  TreeBuilder ──► BranchTree ──► TreeNavigator
//! ```
//!
//! ## Shape Guarantees
//!
//! - `(conversation_id, name)` is unique per branch
//! - Parent chains are acyclic and terminate at a root
//! - Snapshot sequences are contiguous from 0
//! - Dangling parent references degrade to roots, never to errors

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod registry;
pub mod store;
pub mod tree;
pub mod types;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use registry::{BranchError, BranchRegistry};
pub use store::{BranchStore, InMemoryStore, MessageStore};
#[cfg(feature = "postgres")]
pub use store::postgres::{
    PostgresConfig, PostgresError, PostgresStore, BRANCHES_TABLE_SCHEMA,
    BRANCH_MESSAGE_ENTRIES_TABLE_SCHEMA, CONVERSATION_HEADS_TABLE_SCHEMA,
};
pub use tree::{
    BranchNode, BranchTree, TreeBuilder, TreeExport, TreeFormat, TreeNavigator, TreeNodeExport,
};
pub use types::{
    BranchComparison, BranchDivergence, BranchId, BranchMessageEntry, BranchRecord, BranchSummary,
    CommonSegment, Message, MessageId,
};

// Service re-exports (when service feature is enabled)
#[cfg(feature = "service")]
pub use service::{create_router, AppState, ServiceState};

/// Schema version for all branch kernel types.
/// Increment on breaking changes to any schema type.
pub const BRANCH_KERNEL_SCHEMA_VERSION: &str = "1.0.0";
