//! Authoring-facing flow service: validate drafts, publish versions.

use std::sync::Arc;

use crate::domain::flow::{FlowDefinition, FlowStatus, FlowVersionId, ValidationError};
use crate::domain::repository::FlowStore;
use crate::error::EngineError;

/// Service the authoring surface calls to validate and publish flows
pub struct FlowService {
    store: Arc<dyn FlowStore>,
}

impl FlowService {
    /// Create a new flow service
    pub fn new(store: Arc<dyn FlowStore>) -> Self {
        Self { store }
    }

    /// Validate a draft, returning every problem found (possibly empty)
    pub fn validate(&self, draft: &FlowDefinition) -> Vec<ValidationError> {
        draft.validate()
    }

    /// Freeze a draft at the next version of its family.
    ///
    /// Fails with the full validation error list if the draft is invalid.
    /// The published version is immutable; in-flight runs keep executing
    /// the version they enrolled on.
    pub async fn publish(
        &self,
        mut draft: FlowDefinition,
    ) -> Result<FlowVersionId, EngineError> {
        let errors = draft.validate();
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }

        let next_version = self
            .store
            .latest_published(&draft.id)
            .await?
            .map(|d| d.version + 1)
            .unwrap_or(1);

        draft.version = next_version;
        draft.status = FlowStatus::Published;

        let version_id = draft.version_id();
        self.store.save(&draft).await?;

        tracing::info!(flow_id = %draft.id.0, version = next_version, "flow published");
        Ok(version_id)
    }

    /// Fetch one exact version
    pub async fn get(&self, id: &FlowVersionId) -> Result<FlowDefinition, EngineError> {
        self.store
            .find_version(id)
            .await?
            .ok_or_else(|| EngineError::FlowNotFound(id.to_string()))
    }
}
