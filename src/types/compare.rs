//! Branch comparison types.

use serde::{Deserialize, Serialize};

use super::message::MessageId;

/// One side of a branch comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchDivergence {
    /// Branch name.
    pub name: String,
    /// Total messages in the branch's snapshot.
    pub total_messages: usize,
    /// Number of messages past the divergence point.
    pub unique_messages: usize,
    /// Message ids past the divergence point, in stored order.
    pub unique_message_list: Vec<MessageId>,
}

/// The shared prefix of two compared branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonSegment {
    /// Length of the shared message prefix.
    pub messages: usize,
    /// First index at which the two sequences differ, or the length of
    /// the shorter sequence when one is a strict prefix of the other.
    pub divergence_point: usize,
}

/// Result of comparing two branches of the same conversation.
///
/// `divergence_point` is derived from the message sequences;
/// `common_ancestor` from the branch tree's parent links. The two
/// usually agree but are independent: a branch created with an explicit
/// unrelated parent can diverge at index 0 while still sharing a tree
/// ancestor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchComparison {
    /// First compared branch.
    pub branch1: BranchDivergence,
    /// Second compared branch.
    pub branch2: BranchDivergence,
    /// Shared prefix of the two message sequences.
    pub common: CommonSegment,
    /// Name of the nearest branch both sides descend from, if the
    /// parent chains intersect.
    pub common_ancestor: Option<String>,
}
