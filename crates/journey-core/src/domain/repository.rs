//! Repository traits for the Journey engine.
//!
//! The engine only ever talks to these traits; external crates implement
//! them to provide different persistence mechanisms. The in-memory
//! implementations live in the `journey-state-inmemory` crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use super::flow::{ContactId, FlowDefinition, FlowId, FlowVersionId};
use super::run::{CorrelationKey, RunId, RunInstance, RunStatus, ScheduledWake, WakeId};
use crate::error::EngineError;

/// Store of validated, versioned flow definitions
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Save a flow definition version
    async fn save(&self, definition: &FlowDefinition) -> Result<(), EngineError>;

    /// Find one exact version
    async fn find_version(
        &self,
        id: &FlowVersionId,
    ) -> Result<Option<FlowDefinition>, EngineError>;

    /// The highest published version of a flow family, if any
    async fn latest_published(&self, id: &FlowId) -> Result<Option<FlowDefinition>, EngineError>;

    /// List all stored versions
    async fn list_versions(&self) -> Result<Vec<FlowVersionId>, EngineError>;
}

/// Optional filters for run listing
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    /// Restrict to one flow family
    pub flow_id: Option<FlowId>,
    /// Restrict to one status
    pub status: Option<RunStatus>,
}

/// Durable store of run instances.
///
/// Saves are compare-and-swap on the run revision; leases make each run
/// single-writer across worker processes.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Find a run by ID
    async fn find_by_id(&self, id: &RunId) -> Result<Option<RunInstance>, EngineError>;

    /// Save the run if its stored revision still matches `run.revision`;
    /// bumps the revision on success, returns
    /// [`EngineError::RevisionConflict`] otherwise
    async fn save(&self, run: &mut RunInstance) -> Result<(), EngineError>;

    /// The active (pending/running/waiting) run for a contact in a flow
    /// family, if one exists
    async fn find_active_for_contact(
        &self,
        contact: &ContactId,
        flow: &FlowId,
    ) -> Result<Option<RunInstance>, EngineError>;

    /// The waiting run registered on a correlation key, if any
    async fn find_waiting_by_correlation(
        &self,
        key: &CorrelationKey,
    ) -> Result<Option<RunInstance>, EngineError>;

    /// Claim the run for `owner` for `ttl`; returns
    /// [`EngineError::LeaseConflict`] while another worker's unexpired
    /// lease stands. Re-acquiring one's own lease extends it.
    async fn acquire_lease(
        &self,
        id: &RunId,
        owner: &str,
        ttl: Duration,
    ) -> Result<(), EngineError>;

    /// Release a lease held by `owner`; releasing a lease one does not hold
    /// is a no-op
    async fn release_lease(&self, id: &RunId, owner: &str) -> Result<(), EngineError>;

    /// List runs with optional filters
    async fn list(&self, filter: &RunFilter) -> Result<Vec<RunInstance>, EngineError>;
}

/// Durable timer queue that resumes suspended runs
#[async_trait]
pub trait WakeQueue: Send + Sync {
    /// Persist a wake; returns its id
    async fn schedule(&self, wake: ScheduledWake) -> Result<WakeId, EngineError>;

    /// Cancel a wake that has not fired; cancelling an unknown wake is a
    /// no-op (it may already have been consumed)
    async fn cancel(&self, id: &WakeId) -> Result<(), EngineError>;

    /// Claim every wake due at `now` for `owner` with a time-bounded claim
    /// lease. Claimed wakes are invisible to other workers until the claim
    /// lapses, so a crashed worker's wakes become reclaimable.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        owner: &str,
        lease: Duration,
    ) -> Result<Vec<ScheduledWake>, EngineError>;

    /// Consume a claimed wake exactly once
    async fn complete(&self, id: &WakeId) -> Result<(), EngineError>;

    /// Wakes not yet consumed (pending plus claimed); used by tests and
    /// operator inspection
    async fn outstanding(&self) -> Result<Vec<ScheduledWake>, EngineError>;
}
