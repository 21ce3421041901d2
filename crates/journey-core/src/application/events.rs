//! Correlation registry for inbound contact events.
//!
//! Maps a (contact, channel) key to the run currently waiting on it.
//! Delivery is first-match-wins: `take` removes the registration, so a
//! racing timeout worker finds nothing and stands down.

use dashmap::DashMap;

use crate::domain::run::{CorrelationKey, RunId};

/// Registry of runs waiting on inbound events
#[derive(Default)]
pub struct EventRouter {
    waiting: DashMap<CorrelationKey, RunId>,
}

impl EventRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run as waiting on a key. A key carries at most one run;
    /// a second registration replaces the first (the run store's
    /// one-active-run invariant keeps this from happening in practice).
    pub fn register(&self, key: CorrelationKey, run_id: RunId) {
        if let Some(previous) = self.waiting.insert(key.clone(), run_id) {
            tracing::warn!(
                contact_id = %key.contact.0,
                replaced_run = %previous.0,
                "correlation key re-registered over an existing waiting run"
            );
        }
    }

    /// Remove a registration; no-op if the key is not registered
    pub fn deregister(&self, key: &CorrelationKey) {
        self.waiting.remove(key);
    }

    /// Claim the waiting run for a key, removing the registration.
    /// Returns None when no run is waiting (the event will be dropped).
    pub fn take(&self, key: &CorrelationKey) -> Option<RunId> {
        self.waiting.remove(key).map(|(_, run_id)| run_id)
    }

    /// Whether a run is registered on the key
    pub fn is_registered(&self, key: &CorrelationKey) -> bool {
        self.waiting.contains_key(key)
    }
}
