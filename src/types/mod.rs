//! Core types for the branch kernel.

pub mod branch;
pub mod compare;
pub mod message;

pub use branch::{BranchId, BranchMessageEntry, BranchRecord, BranchSummary};
pub use compare::{BranchComparison, BranchDivergence, CommonSegment};
pub use message::{Message, MessageId};
