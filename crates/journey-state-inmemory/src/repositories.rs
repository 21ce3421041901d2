//! In-memory repository implementations.
//!
//! Concurrency-safe via `dashmap`; the run store additionally serializes
//! saves behind a guard so the compare-and-swap check and the
//! one-active-run scan are atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Duration;

use journey_core::domain::flow::{ContactId, FlowDefinition, FlowId, FlowVersionId};
use journey_core::domain::repository::{FlowStore, RunFilter, RunStore, WakeQueue};
use journey_core::domain::run::{
    CorrelationKey, RunId, RunInstance, RunStatus, ScheduledWake, WakeId,
};
use journey_core::error::EngineError;

/// In-memory implementation of the flow definition store
#[derive(Default)]
pub struct InMemoryFlowStore {
    versions: DashMap<FlowVersionId, FlowDefinition>,
}

impl InMemoryFlowStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn save(&self, definition: &FlowDefinition) -> Result<(), EngineError> {
        self.versions
            .insert(definition.version_id(), definition.clone());
        Ok(())
    }

    async fn find_version(
        &self,
        id: &FlowVersionId,
    ) -> Result<Option<FlowDefinition>, EngineError> {
        Ok(self.versions.get(id).map(|entry| entry.clone()))
    }

    async fn latest_published(
        &self,
        id: &FlowId,
    ) -> Result<Option<FlowDefinition>, EngineError> {
        let latest = self
            .versions
            .iter()
            .filter(|entry| {
                entry.id == *id
                    && entry.status == journey_core::domain::flow::FlowStatus::Published
            })
            .max_by_key(|entry| entry.version)
            .map(|entry| entry.clone());
        Ok(latest)
    }

    async fn list_versions(&self) -> Result<Vec<FlowVersionId>, EngineError> {
        Ok(self.versions.iter().map(|entry| entry.key().clone()).collect())
    }
}

struct LeaseRecord {
    owner: String,
    expires_at: DateTime<Utc>,
}

/// In-memory implementation of the run store with CAS saves and per-run
/// leases
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: DashMap<String, RunInstance>,
    leases: DashMap<String, LeaseRecord>,
    // Serializes saves so the revision check and the duplicate-active scan
    // cannot interleave
    save_guard: Mutex<()>,
}

impl InMemoryRunStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(30))
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn find_by_id(&self, id: &RunId) -> Result<Option<RunInstance>, EngineError> {
        Ok(self.runs.get(&id.0).map(|entry| entry.clone()))
    }

    async fn save(&self, run: &mut RunInstance) -> Result<(), EngineError> {
        let _guard = self.save_guard.lock().map_err(|e| {
            EngineError::StateStore(format!("save guard poisoned: {}", e))
        })?;

        match self.runs.get(&run.id.0).map(|entry| entry.revision) {
            Some(stored_revision) => {
                if stored_revision != run.revision {
                    return Err(EngineError::RevisionConflict(format!(
                        "run {} is at revision {}, save expected {}",
                        run.id.0, stored_revision, run.revision
                    )));
                }
            }
            None => {
                if run.revision != 0 {
                    return Err(EngineError::RevisionConflict(format!(
                        "run {} does not exist at revision {}",
                        run.id.0, run.revision
                    )));
                }
                // First insert of an active run: enforce one active run per
                // (contact, flow family)
                if run.status.is_active() {
                    let duplicate = self.runs.iter().any(|entry| {
                        entry.contact_id == run.contact_id
                            && entry.flow_id == run.flow_id
                            && entry.status.is_active()
                    });
                    if duplicate {
                        return Err(EngineError::DuplicateActiveRun(run.contact_id.0.clone()));
                    }
                }
            }
        }

        run.revision += 1;
        run.updated_at = Utc::now();
        self.runs.insert(run.id.0.clone(), run.clone());
        Ok(())
    }

    async fn find_active_for_contact(
        &self,
        contact: &ContactId,
        flow: &FlowId,
    ) -> Result<Option<RunInstance>, EngineError> {
        let found = self
            .runs
            .iter()
            .find(|entry| {
                entry.contact_id == *contact
                    && entry.flow_id == *flow
                    && entry.status.is_active()
            })
            .map(|entry| entry.clone());
        Ok(found)
    }

    async fn find_waiting_by_correlation(
        &self,
        key: &CorrelationKey,
    ) -> Result<Option<RunInstance>, EngineError> {
        let found = self
            .runs
            .iter()
            .find(|entry| {
                entry.status == RunStatus::Waiting && entry.correlation.as_ref() == Some(key)
            })
            .map(|entry| entry.clone());
        Ok(found)
    }

    async fn acquire_lease(
        &self,
        id: &RunId,
        owner: &str,
        ttl: Duration,
    ) -> Result<(), EngineError> {
        let now = Utc::now();
        let expires_at = now + chrono_ttl(ttl);

        match self.leases.entry(id.0.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let lease = occupied.get();
                if lease.owner != owner && lease.expires_at > now {
                    return Err(EngineError::LeaseConflict(id.0.clone()));
                }
                occupied.insert(LeaseRecord {
                    owner: owner.to_string(),
                    expires_at,
                });
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(LeaseRecord {
                    owner: owner.to_string(),
                    expires_at,
                });
            }
        }
        Ok(())
    }

    async fn release_lease(&self, id: &RunId, owner: &str) -> Result<(), EngineError> {
        self.leases
            .remove_if(&id.0, |_, lease| lease.owner == owner);
        Ok(())
    }

    async fn list(&self, filter: &RunFilter) -> Result<Vec<RunInstance>, EngineError> {
        let result = self
            .runs
            .iter()
            .filter(|entry| {
                filter
                    .flow_id
                    .as_ref()
                    .map(|flow| entry.flow_id == *flow)
                    .unwrap_or(true)
                    && filter
                        .status
                        .map(|status| entry.status == status)
                        .unwrap_or(true)
            })
            .map(|entry| entry.clone())
            .collect();
        Ok(result)
    }
}

struct WakeEntry {
    wake: ScheduledWake,
    claimed_by: Option<String>,
    claim_expires: Option<DateTime<Utc>>,
}

/// In-memory wake queue with claim leases and exactly-once completion
#[derive(Default)]
pub struct InMemoryWakeQueue {
    entries: DashMap<String, WakeEntry>,
}

impl InMemoryWakeQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WakeQueue for InMemoryWakeQueue {
    async fn schedule(&self, wake: ScheduledWake) -> Result<WakeId, EngineError> {
        let id = wake.id.clone();
        self.entries.insert(
            id.0.clone(),
            WakeEntry {
                wake,
                claimed_by: None,
                claim_expires: None,
            },
        );
        Ok(id)
    }

    async fn cancel(&self, id: &WakeId) -> Result<(), EngineError> {
        // May already be consumed; cancelling the loser of a race is a no-op
        self.entries.remove(&id.0);
        Ok(())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        owner: &str,
        lease: Duration,
    ) -> Result<Vec<ScheduledWake>, EngineError> {
        let claim_expires = now + chrono_ttl(lease);
        let mut claimed = Vec::new();

        for mut entry in self.entries.iter_mut() {
            if entry.wake.due_at > now {
                continue;
            }
            let claim_lapsed = match (&entry.claimed_by, entry.claim_expires) {
                (None, _) => true,
                (Some(_), Some(expires)) => expires <= now,
                (Some(_), None) => false,
            };
            if !claim_lapsed {
                continue;
            }
            entry.claimed_by = Some(owner.to_string());
            entry.claim_expires = Some(claim_expires);
            claimed.push(entry.wake.clone());
        }

        if !claimed.is_empty() {
            tracing::debug!(count = claimed.len(), owner, "claimed due wakes");
        }
        Ok(claimed)
    }

    async fn complete(&self, id: &WakeId) -> Result<(), EngineError> {
        self.entries.remove(&id.0);
        Ok(())
    }

    async fn outstanding(&self) -> Result<Vec<ScheduledWake>, EngineError> {
        Ok(self.entries.iter().map(|entry| entry.wake.clone()).collect())
    }
}
