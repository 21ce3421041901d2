//! In-memory state store implementation for the Journey engine
//!
//! This crate provides in-memory implementations of the repository traits
//! defined in `journey-core`. It is useful for development, testing, and
//! single-process deployments where persistence is not required.

use std::sync::Arc;

pub mod repositories;
pub use repositories::{InMemoryFlowStore, InMemoryRunStore, InMemoryWakeQueue};

#[cfg(test)]
mod tests;

/// Bundle of in-memory stores for wiring an engine in one call
pub struct InMemoryStateStore {
    /// Flow definition store
    pub flows: Arc<InMemoryFlowStore>,
    /// Run store
    pub runs: Arc<InMemoryRunStore>,
    /// Wake queue
    pub wakes: Arc<InMemoryWakeQueue>,
}

impl InMemoryStateStore {
    /// Create a fresh set of stores
    pub fn new() -> Self {
        Self {
            flows: Arc::new(InMemoryFlowStore::new()),
            runs: Arc::new(InMemoryRunStore::new()),
            wakes: Arc::new(InMemoryWakeQueue::new()),
        }
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}
