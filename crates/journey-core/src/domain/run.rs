//! Run instances: one contact's traversal of one published flow version.
//!
//! The aggregate owns its status machine; every transition validates the
//! source status and records a domain event. All mutation goes through the
//! step executor under the per-run lease.

use crate::domain::events::{
    DomainEvent, RunCancelled, RunCompleted, RunEnrolled, RunFailed, RunResumed, RunSuspended,
};
use crate::domain::flow::{Channel, ContactId, FlowDefinition, FlowId, FlowVersionId, StepId};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Value object: Run ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

/// Value object: Scheduled wake ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WakeId(pub String);

/// Routing key for inbound contact events
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationKey {
    /// The contact the event belongs to
    pub contact: ContactId,
    /// The channel it arrived on
    pub channel: Channel,
}

/// Why a wake was scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeReason {
    /// A delay step elapsed
    Delay,
    /// A wait_for_response timeout fired
    WaitTimeout,
}

/// A durable timer entry that resumes a suspended run. Consumed exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledWake {
    /// Wake ID
    pub id: WakeId,
    /// The run to resume
    pub run_id: RunId,
    /// The step the run suspended on
    pub step_id: StepId,
    /// When the wake becomes due
    pub due_at: DateTime<Utc>,
    /// Why it was scheduled
    pub reason: WakeReason,
}

impl ScheduledWake {
    /// Create a wake with a fresh id
    pub fn new(run_id: RunId, step_id: StepId, due_at: DateTime<Utc>, reason: WakeReason) -> Self {
        Self {
            id: WakeId(Uuid::new_v4().to_string()),
            run_id,
            step_id,
            due_at,
            reason,
        }
    }
}

/// Run instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Enrolled, not yet executed
    Pending,
    /// A worker is executing steps
    Running,
    /// Suspended on a wake and/or correlation
    Waiting,
    /// Reached the end of the flow
    Completed,
    /// Stopped at a failing step
    Failed,
    /// Cancelled by an operator
    Cancelled,
}

impl RunStatus {
    /// Pending, running and waiting runs count against the
    /// one-active-run-per-(contact, flow) invariant
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::Running | RunStatus::Waiting)
    }
}

/// How one step execution ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// Moved to the single successor
    Advanced,
    /// Took a labeled branch
    Branched(String),
    /// Suspended on a wake or correlation
    Suspended,
    /// The step failed the run
    Failed,
}

/// Append-only record of one step execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionRecord {
    /// The step executed
    pub step_id: StepId,
    /// When execution began
    pub started_at: DateTime<Utc>,
    /// When it ended
    pub completed_at: DateTime<Utc>,
    /// How it ended
    pub outcome: StepOutcome,
    /// Error detail for failed outcomes
    pub error: Option<String>,
}

/// Aggregate: one contact's run through one flow version
#[derive(Debug, Serialize, Deserialize)]
pub struct RunInstance {
    /// Unique identifier
    pub id: RunId,

    /// Flow family
    pub flow_id: FlowId,

    /// The exact published version this run executes; later versions never
    /// affect an in-flight run
    pub flow_version: FlowVersionId,

    /// The contact moving through the flow
    pub contact_id: ContactId,

    /// Current status
    pub status: RunStatus,

    /// The step the run is at; None once terminal
    pub current_step: Option<StepId>,

    /// Key/value state seeded at enrollment and updated by steps
    pub context: HashMap<String, serde_json::Value>,

    /// Append-only execution history
    pub history: Vec<StepExecutionRecord>,

    /// Outstanding wake while waiting
    pub pending_wake: Option<WakeId>,

    /// Outstanding event registration while waiting
    pub correlation: Option<CorrelationKey>,

    /// Cooperative cancellation flag, honored before the next step
    pub cancel_requested: bool,

    /// Error message if the run failed
    pub error: Option<String>,

    /// Compare-and-swap revision, bumped by every save
    pub revision: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,

    /// Domain events pending dispatch
    #[serde(skip)]
    pub events: Vec<Box<dyn DomainEvent>>,
}

// Domain events are drained at save time, not cloned with the aggregate.
impl Clone for RunInstance {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            flow_id: self.flow_id.clone(),
            flow_version: self.flow_version.clone(),
            contact_id: self.contact_id.clone(),
            status: self.status,
            current_step: self.current_step.clone(),
            context: self.context.clone(),
            history: self.history.clone(),
            pending_wake: self.pending_wake.clone(),
            correlation: self.correlation.clone(),
            cancel_requested: self.cancel_requested,
            error: self.error.clone(),
            revision: self.revision,
            created_at: self.created_at,
            updated_at: self.updated_at,
            events: Vec::new(),
        }
    }
}

impl RunInstance {
    /// Enroll a contact into a published flow version at its start step
    pub fn new(definition: &FlowDefinition, contact_id: ContactId) -> Self {
        let id = RunId(Uuid::new_v4().to_string());
        let now = Utc::now();

        let mut context = HashMap::new();
        context.insert(
            "contact_id".to_string(),
            serde_json::Value::String(contact_id.0.clone()),
        );
        context.insert(
            "enrolled_at".to_string(),
            serde_json::Value::String(now.to_rfc3339()),
        );

        let mut run = Self {
            id: id.clone(),
            flow_id: definition.id.clone(),
            flow_version: definition.version_id(),
            contact_id: contact_id.clone(),
            status: RunStatus::Pending,
            current_step: definition.start_step().map(|s| s.id.clone()),
            context,
            history: Vec::new(),
            pending_wake: None,
            correlation: None,
            cancel_requested: false,
            error: None,
            revision: 0,
            created_at: now,
            updated_at: now,
            events: Vec::with_capacity(4),
        };

        run.record_event(Box::new(RunEnrolled {
            run_id: id,
            flow_version: definition.version_id(),
            contact_id,
            timestamp: now,
        }));

        run
    }

    /// Begin execution
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.status != RunStatus::Pending {
            return Err(EngineError::InvalidTransition(format!(
                "cannot start run in status {:?}",
                self.status
            )));
        }
        self.status = RunStatus::Running;
        self.touch();
        Ok(())
    }

    /// Suspend on a scheduled wake (delay step)
    pub fn suspend_for_wake(&mut self, wake_id: WakeId) -> Result<(), EngineError> {
        if self.status != RunStatus::Running {
            return Err(EngineError::InvalidTransition(format!(
                "cannot suspend run in status {:?}",
                self.status
            )));
        }
        self.pending_wake = Some(wake_id.clone());
        self.status = RunStatus::Waiting;
        self.record_event(Box::new(RunSuspended {
            run_id: self.id.clone(),
            step_id: self.current_step.clone(),
            wake_id: Some(wake_id),
            correlation: None,
            timestamp: Utc::now(),
        }));
        self.touch();
        Ok(())
    }

    /// Suspend on both a timeout wake and an event correlation
    /// (wait_for_response step); whichever resolves first wins
    pub fn suspend_for_event(
        &mut self,
        wake_id: WakeId,
        key: CorrelationKey,
    ) -> Result<(), EngineError> {
        if self.status != RunStatus::Running {
            return Err(EngineError::InvalidTransition(format!(
                "cannot suspend run in status {:?}",
                self.status
            )));
        }
        self.pending_wake = Some(wake_id.clone());
        self.correlation = Some(key.clone());
        self.status = RunStatus::Waiting;
        self.record_event(Box::new(RunSuspended {
            run_id: self.id.clone(),
            step_id: self.current_step.clone(),
            wake_id: Some(wake_id),
            correlation: Some(key),
            timestamp: Utc::now(),
        }));
        self.touch();
        Ok(())
    }

    /// Resume a waiting run, clearing both suspension registrations
    pub fn resume(&mut self) -> Result<(), EngineError> {
        if self.status != RunStatus::Waiting {
            return Err(EngineError::InvalidTransition(format!(
                "cannot resume run in status {:?}",
                self.status
            )));
        }
        self.pending_wake = None;
        self.correlation = None;
        self.status = RunStatus::Running;
        self.record_event(Box::new(RunResumed {
            run_id: self.id.clone(),
            timestamp: Utc::now(),
        }));
        self.touch();
        Ok(())
    }

    /// Complete the run after the last reachable step
    pub fn complete(&mut self) -> Result<(), EngineError> {
        if self.status != RunStatus::Running {
            return Err(EngineError::InvalidTransition(format!(
                "cannot complete run in status {:?}",
                self.status
            )));
        }
        self.status = RunStatus::Completed;
        self.current_step = None;
        self.record_event(Box::new(RunCompleted {
            run_id: self.id.clone(),
            timestamp: Utc::now(),
        }));
        self.touch();
        Ok(())
    }

    /// Fail the run at the given step
    pub fn fail(&mut self, step_id: &StepId, error: String) -> Result<(), EngineError> {
        if !self.status.is_active() {
            return Err(EngineError::InvalidTransition(format!(
                "cannot fail run in status {:?}",
                self.status
            )));
        }
        self.status = RunStatus::Failed;
        self.error = Some(error.clone());
        self.record_event(Box::new(RunFailed {
            run_id: self.id.clone(),
            step_id: step_id.clone(),
            error,
            timestamp: Utc::now(),
        }));
        self.touch();
        Ok(())
    }

    /// Cancel the run; clears suspension registrations
    pub fn cancel(&mut self) -> Result<(), EngineError> {
        if !self.status.is_active() {
            return Err(EngineError::InvalidTransition(format!(
                "cannot cancel run in status {:?}",
                self.status
            )));
        }
        self.status = RunStatus::Cancelled;
        self.pending_wake = None;
        self.correlation = None;
        self.record_event(Box::new(RunCancelled {
            run_id: self.id.clone(),
            timestamp: Utc::now(),
        }));
        self.touch();
        Ok(())
    }

    /// Append a step execution record
    pub fn record(&mut self, record: StepExecutionRecord) {
        self.history.push(record);
        self.touch();
    }

    /// Number of prior executions of a step; feeds the idempotency token so
    /// a re-entered step gets a fresh generation
    pub fn attempt_generation(&self, step_id: &StepId) -> u32 {
        self.history.iter().filter(|r| &r.step_id == step_id).count() as u32
    }

    /// A waiting run must hold at least one registration
    pub fn check_waiting_invariant(&self) -> Result<(), EngineError> {
        if self.status == RunStatus::Waiting
            && self.pending_wake.is_none()
            && self.correlation.is_none()
        {
            return Err(EngineError::CorruptRunState(format!(
                "run {} is waiting with no pending wake or correlation",
                self.id.0
            )));
        }
        Ok(())
    }

    /// Record a domain event
    pub fn record_event(&mut self, event: Box<dyn DomainEvent>) {
        self.events.push(event);
    }

    /// Get and clear all pending domain events
    pub fn take_events(&mut self) -> Vec<Box<dyn DomainEvent>> {
        std::mem::take(&mut self.events)
    }

    #[inline]
    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
