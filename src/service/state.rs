//! Service state management.
//!
//! Holds the shared store handles and constructs per-request registry
//! and navigator views over them.

use std::sync::Arc;

use crate::registry::BranchRegistry;
use crate::store::{BranchStore, MessageStore};
use crate::tree::{TreeBuilder, TreeNavigator};

/// Shared service state.
///
/// The registry and navigator are cheap wrappers over `Arc`ed stores,
/// so handlers build them per request instead of sharing mutable state.
pub struct ServiceState<M, B>
where
    M: MessageStore + 'static,
    B: BranchStore + 'static,
{
    /// The conversation log backend.
    pub messages: Arc<M>,
    /// The branch persistence backend.
    pub branches: Arc<B>,
}

impl<M, B> ServiceState<M, B>
where
    M: MessageStore + 'static,
    B: BranchStore + 'static,
{
    /// Create service state over already-shared stores.
    pub fn new(messages: Arc<M>, branches: Arc<B>) -> Self {
        Self { messages, branches }
    }

    /// Build a branch registry over the shared stores.
    pub fn registry(&self) -> BranchRegistry<M, B> {
        BranchRegistry::new(Arc::clone(&self.messages), Arc::clone(&self.branches))
    }

    /// Build a tree builder over the shared branch store.
    pub fn tree_builder(&self) -> TreeBuilder<B> {
        TreeBuilder::new(Arc::clone(&self.branches))
    }

    /// Build a tree navigator over the shared branch store.
    pub fn navigator(&self) -> TreeNavigator<B> {
        TreeNavigator::new(Arc::clone(&self.branches))
    }
}

impl<M, B> Clone for ServiceState<M, B>
where
    M: MessageStore + 'static,
    B: BranchStore + 'static,
{
    fn clone(&self) -> Self {
        Self {
            messages: Arc::clone(&self.messages),
            branches: Arc::clone(&self.branches),
        }
    }
}
