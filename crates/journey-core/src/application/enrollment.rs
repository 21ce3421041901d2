//! Enrollment: creating a run for a contact entering a flow.
//!
//! Idempotent by design: repeated enrollment triggers (form double-submit,
//! webhook replays) must not burst duplicate messages at a contact.

use std::sync::Arc;

use crate::application::executor::StepExecutor;
use crate::domain::events::DomainEventHandler;
use crate::domain::flow::{ContactId, FlowStatus, FlowVersionId};
use crate::domain::repository::{FlowStore, RunStore};
use crate::domain::run::RunInstance;
use crate::error::EngineError;

/// Creates run instances, enforcing one active run per (contact, flow)
pub struct EnrollmentService {
    runs: Arc<dyn RunStore>,
    flows: Arc<dyn FlowStore>,
    executor: Arc<StepExecutor>,
    event_handler: Arc<dyn DomainEventHandler>,
}

impl EnrollmentService {
    /// Create a new enrollment service
    pub fn new(
        runs: Arc<dyn RunStore>,
        flows: Arc<dyn FlowStore>,
        executor: Arc<StepExecutor>,
        event_handler: Arc<dyn DomainEventHandler>,
    ) -> Self {
        Self {
            runs,
            flows,
            executor,
            event_handler,
        }
    }

    /// Enroll a contact into a published flow version and execute until the
    /// run suspends or terminates.
    ///
    /// If the contact already has an active run in this flow family the
    /// existing run is returned unchanged; later flow versions never spawn
    /// a second concurrent run for the same family.
    pub async fn enroll(
        &self,
        contact: ContactId,
        version: &FlowVersionId,
    ) -> Result<RunInstance, EngineError> {
        let definition = self
            .flows
            .find_version(version)
            .await?
            .ok_or_else(|| EngineError::FlowNotFound(version.to_string()))?;

        if definition.status != FlowStatus::Published {
            return Err(EngineError::NotPublished(version.to_string()));
        }

        if let Some(existing) = self
            .runs
            .find_active_for_contact(&contact, &version.flow)
            .await?
        {
            tracing::debug!(
                contact_id = %contact.0,
                run_id = %existing.id.0,
                "contact already active in flow; enrollment is a no-op"
            );
            return Ok(existing);
        }

        let mut run = RunInstance::new(&definition, contact.clone());
        match self.runs.save(&mut run).await {
            Ok(()) => {}
            // Lost a concurrent-enrollment race; the winner's run stands
            Err(EngineError::DuplicateActiveRun(_)) => {
                if let Some(existing) = self
                    .runs
                    .find_active_for_contact(&contact, &version.flow)
                    .await?
                {
                    return Ok(existing);
                }
                return Err(EngineError::DuplicateActiveRun(contact.0));
            }
            Err(error) => return Err(error),
        }

        for event in run.take_events() {
            self.event_handler.handle_event(event).await?;
        }

        tracing::info!(
            contact_id = %contact.0,
            run_id = %run.id.0,
            flow_version = %version,
            "contact enrolled"
        );

        self.executor.kick(&run.id).await?;

        self.runs
            .find_by_id(&run.id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run.id.0.clone()))
    }
}
