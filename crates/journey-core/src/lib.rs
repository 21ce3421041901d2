//!
//! Journey Core - Flow model and execution engine for the Journey platform
//!
//! This crate defines the flow definition model, the durable per-contact
//! run state machine, and the services that execute runs: enrollment, the
//! step executor, the wake scheduler, the event router and the side-effect
//! gateway seam. Persistence is behind repository traits; the in-memory
//! implementations live in `journey-state-inmemory`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - flow definitions, runs, events, repository traits
pub mod domain;

/// Application services - enrollment, execution, scheduling, routing
pub mod application;

/// Side-effect gateway traits, retry policy and adapters
pub mod gateway;

/// Engine tunables
pub mod config;

/// Error types
pub mod error;

/// Core data types
pub mod types;

// Re-export key types
pub use config::EngineConfig;
pub use error::EngineError;
pub use types::Payload;

pub use domain::flow::{
    Channel, ContactId, DelayUnit, FlowDefinition, FlowId, FlowStatus, FlowVersionId, HttpMethod,
    Predicate, PredicateOp, SplitBranch, SplitType, StepDefinition, StepId, StepKind,
    ValidationError,
};
pub use domain::repository::{FlowStore, RunFilter, RunStore, WakeQueue};
pub use domain::run::{
    CorrelationKey, RunId, RunInstance, RunStatus, ScheduledWake, StepExecutionRecord,
    StepOutcome, WakeId, WakeReason,
};

pub use application::enrollment::EnrollmentService;
pub use application::events::EventRouter;
pub use application::executor::StepExecutor;
pub use application::flows::FlowService;
pub use application::scheduler::WakeScheduler;

pub use domain::events::{DomainEvent, DomainEventHandler, TracingEventHandler};
pub use gateway::{
    Ack, DeliveryError, IdempotencyToken, RetryPolicy, SideEffectGateway, SideEffectOp,
};

#[cfg(feature = "testing")]
pub use gateway::RecordingGateway;
