//! Durable timer worker: wakes suspended runs when their wakes come due.
//!
//! Polling, multi-worker safe: each poll claims due wakes under a
//! time-bounded lease and invokes the executor exactly once per claim. A
//! claim left unconsumed by a crashed worker lapses and becomes claimable
//! again. Precision is bounded by the polling granularity.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::application::executor::StepExecutor;
use crate::config::EngineConfig;
use crate::domain::repository::WakeQueue;
use crate::error::EngineError;

/// Polls the wake queue and resumes due runs
pub struct WakeScheduler {
    wakes: Arc<dyn WakeQueue>,
    executor: Arc<StepExecutor>,
    config: EngineConfig,
    worker_id: String,
}

impl WakeScheduler {
    /// Create a scheduler worker
    pub fn new(
        wakes: Arc<dyn WakeQueue>,
        executor: Arc<StepExecutor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            wakes,
            executor,
            config,
            worker_id: format!("scheduler-{}", Uuid::new_v4()),
        }
    }

    /// Poll forever at the configured interval
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(error) = self.poll_once(Utc::now()).await {
                tracing::warn!(error = %error, "wake poll failed");
            }
        }
    }

    /// Spawn the polling loop on the runtime
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Claim and process every wake due at `now`; returns how many were
    /// consumed. Tests drive this directly with a simulated clock.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let due = self
            .wakes
            .claim_due(now, &self.worker_id, self.config.lease_ttl())
            .await?;

        let mut consumed = 0;
        for wake in due {
            match self.executor.resume_from_wake(&wake).await {
                Ok(()) => {
                    self.wakes.complete(&wake.id).await?;
                    consumed += 1;
                }
                Err(EngineError::LeaseConflict(_)) => {
                    // Another worker is on this run; the claim lapses and
                    // the wake is re-polled
                    tracing::debug!(
                        run_id = %wake.run_id.0,
                        wake_id = %wake.id.0,
                        "run lease busy; wake deferred"
                    );
                }
                Err(error) => {
                    // Failures are isolated per wake; the claim lapses and
                    // the wake retries
                    tracing::warn!(
                        run_id = %wake.run_id.0,
                        wake_id = %wake.id.0,
                        error = %error,
                        "wake processing failed"
                    );
                }
            }
        }

        Ok(consumed)
    }
}
