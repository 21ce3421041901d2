use crate::domain::flow::{ContactId, FlowVersionId, StepId};
use crate::domain::run::{CorrelationKey, RunId, WakeId};
use crate::error::EngineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Domain event trait for all run lifecycle events
pub trait DomainEvent: Debug + Send + Sync {
    /// Returns the type of the event as a string
    fn event_type(&self) -> &'static str;

    /// Returns the run this event belongs to
    fn run_id(&self) -> &RunId;

    /// Returns the timestamp when the event occurred
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Consumes drained domain events (audit log, metrics, outbox)
#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    /// Handle a single event
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), EngineError>;
}

/// Default handler: emits each event as a structured tracing record
pub struct TracingEventHandler;

#[async_trait]
impl DomainEventHandler for TracingEventHandler {
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), EngineError> {
        tracing::info!(
            event_type = event.event_type(),
            run_id = %event.run_id().0,
            "domain event"
        );
        Ok(())
    }
}

/// Event: a contact was enrolled into a flow version
#[derive(Debug)]
pub struct RunEnrolled {
    /// The new run
    pub run_id: RunId,
    /// The version enrolled into
    pub flow_version: FlowVersionId,
    /// The enrolled contact
    pub contact_id: ContactId,
    /// When enrollment happened
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for RunEnrolled {
    fn event_type(&self) -> &'static str {
        "run.enrolled"
    }

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: a run suspended on a wake and/or correlation
#[derive(Debug)]
pub struct RunSuspended {
    /// The suspended run
    pub run_id: RunId,
    /// The step it suspended on
    pub step_id: Option<StepId>,
    /// The outstanding wake, if any
    pub wake_id: Option<WakeId>,
    /// The outstanding correlation, if any
    pub correlation: Option<CorrelationKey>,
    /// When it suspended
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for RunSuspended {
    fn event_type(&self) -> &'static str {
        "run.suspended"
    }

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: a waiting run resumed
#[derive(Debug)]
pub struct RunResumed {
    /// The resumed run
    pub run_id: RunId,
    /// When it resumed
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for RunResumed {
    fn event_type(&self) -> &'static str {
        "run.resumed"
    }

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: a run reached the end of its flow
#[derive(Debug)]
pub struct RunCompleted {
    /// The completed run
    pub run_id: RunId,
    /// When it completed
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for RunCompleted {
    fn event_type(&self) -> &'static str {
        "run.completed"
    }

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: a run failed at a step
#[derive(Debug)]
pub struct RunFailed {
    /// The failed run
    pub run_id: RunId,
    /// The failing step
    pub step_id: StepId,
    /// Error detail
    pub error: String,
    /// When it failed
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for RunFailed {
    fn event_type(&self) -> &'static str {
        "run.failed"
    }

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: a run was cancelled
#[derive(Debug)]
pub struct RunCancelled {
    /// The cancelled run
    pub run_id: RunId,
    /// When it was cancelled
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for RunCancelled {
    fn event_type(&self) -> &'static str {
        "run.cancelled"
    }

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        let now = Utc::now();
        let run_id = RunId("r-1".to_string());

        let completed = RunCompleted {
            run_id: run_id.clone(),
            timestamp: now,
        };
        assert_eq!(completed.event_type(), "run.completed");
        assert_eq!(completed.run_id(), &run_id);
        assert_eq!(completed.timestamp(), now);

        let failed = RunFailed {
            run_id: run_id.clone(),
            step_id: StepId("s-1".to_string()),
            error: "boom".to_string(),
            timestamp: now,
        };
        assert_eq!(failed.event_type(), "run.failed");
    }

    #[tokio::test]
    async fn test_tracing_handler_accepts_events() {
        let handler = TracingEventHandler;
        let event = Box::new(RunResumed {
            run_id: RunId("r-1".to_string()),
            timestamp: Utc::now(),
        });
        assert!(handler.handle_event(event).await.is_ok());
    }
}
