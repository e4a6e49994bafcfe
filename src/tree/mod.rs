//! Branch tree construction and navigation.
//!
//! Parent links are persisted as back-references only; this module
//! rebuilds forward adjacency on demand ([`builder`]) and answers
//! structural questions over the result ([`navigator`]).

pub mod builder;
pub mod navigator;

pub use builder::{BranchNode, BranchTree, TreeBuilder};
pub use navigator::{TreeExport, TreeFormat, TreeNavigator, TreeNodeExport};
