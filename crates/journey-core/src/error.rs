use crate::domain::flow::ValidationError;
use thiserror::Error;

/// Core error type for the Journey engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Flow definition failed validation; carries every problem found
    #[error("flow validation failed: {0:?}")]
    Validation(Vec<ValidationError>),

    /// Flow version not found
    #[error("flow version not found: {0}")]
    FlowNotFound(String),

    /// Flow version exists but has not been published
    #[error("flow version is not published: {0}")]
    NotPublished(String),

    /// Run instance not found
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// The contact already has an active run in this flow family
    #[error("contact already has an active run in this flow: {0}")]
    DuplicateActiveRun(String),

    /// Run status transition not allowed from the current status
    #[error("invalid run transition: {0}")]
    InvalidTransition(String),

    /// Compare-and-swap save lost against a concurrent writer
    #[error("run revision conflict: {0}")]
    RevisionConflict(String),

    /// Another worker holds the run's lease
    #[error("run lease held elsewhere: {0}")]
    LeaseConflict(String),

    /// Retryable delivery failure (network timeout, 5xx)
    #[error("transient delivery failure: {0}")]
    TransientDelivery(String),

    /// Non-retryable delivery failure (bad address, 4xx, exhausted retries)
    #[error("permanent delivery failure: {0}")]
    PermanentDelivery(String),

    /// A run invariant was violated; the run is escalated to failed
    #[error("corrupt run state: {0}")]
    CorruptRunState(String),

    /// State store error
    #[error("state store error: {0}")]
    StateStore(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}
