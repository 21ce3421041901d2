//! The step executor: the per-run state machine.
//!
//! Given a run and its current step, performs the step's semantics and
//! advances, suspends or terminates the run. All execution happens under
//! the per-run lease, so a scheduler wake and an inbound event racing for
//! the same waiting step cannot both win. Every save is compare-and-swap
//! on the run revision.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::events::EventRouter;
use crate::config::EngineConfig;
use crate::domain::events::DomainEventHandler;
use crate::domain::flow::{
    Channel, ContactId, FlowDefinition, FlowVersionId, SplitBranch, SplitType, StepDefinition,
    StepId, StepKind,
};
use crate::domain::repository::{FlowStore, RunStore, WakeQueue};
use crate::domain::run::{
    CorrelationKey, RunId, RunInstance, RunStatus, ScheduledWake, StepExecutionRecord,
    StepOutcome, WakeReason,
};
use crate::error::EngineError;
use crate::gateway::{IdempotencyToken, SideEffectGateway, SideEffectOp};
use crate::types::Payload;

/// How one step execution resolved
enum StepResolution {
    /// Move on; `next: None` completes the run
    Advance {
        next: Option<StepId>,
        outcome: StepOutcome,
    },
    /// The run suspended; the aggregate is already `Waiting`
    Suspend,
    /// The step failed the run
    Fail(String),
}

/// Executes runs against their flow definitions
pub struct StepExecutor {
    runs: Arc<dyn RunStore>,
    flows: Arc<dyn FlowStore>,
    wakes: Arc<dyn WakeQueue>,
    router: Arc<EventRouter>,
    gateway: Arc<dyn SideEffectGateway>,
    event_handler: Arc<dyn DomainEventHandler>,
    config: EngineConfig,
    worker_id: String,
}

impl StepExecutor {
    /// Create a new executor; each instance is one lease-holding worker
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runs: Arc<dyn RunStore>,
        flows: Arc<dyn FlowStore>,
        wakes: Arc<dyn WakeQueue>,
        router: Arc<EventRouter>,
        gateway: Arc<dyn SideEffectGateway>,
        event_handler: Arc<dyn DomainEventHandler>,
        config: EngineConfig,
    ) -> Self {
        Self {
            runs,
            flows,
            wakes,
            router,
            gateway,
            event_handler,
            config,
            worker_id: format!("executor-{}", Uuid::new_v4()),
        }
    }

    /// This worker's lease owner id
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Drive a pending or running run until it suspends or terminates
    pub async fn kick(&self, run_id: &RunId) -> Result<(), EngineError> {
        self.runs
            .acquire_lease(run_id, &self.worker_id, self.config.lease_ttl())
            .await?;
        let result = self.kick_locked(run_id).await;
        self.runs.release_lease(run_id, &self.worker_id).await?;
        result
    }

    async fn kick_locked(&self, run_id: &RunId) -> Result<(), EngineError> {
        let mut run = self.load_run(run_id).await?;

        if run.status == RunStatus::Waiting {
            // A waiting run with no registration can never be woken again
            if let Err(corrupt) = run.check_waiting_invariant() {
                return self.escalate_corrupt(&mut run, corrupt).await;
            }
            return Ok(());
        }

        if run.status == RunStatus::Pending {
            run.start()?;
        }
        if run.status != RunStatus::Running {
            return Ok(());
        }

        let definition = self.load_definition(&run.flow_version).await?;
        self.drive(&mut run, &definition).await
    }

    /// Resume a run whose scheduled wake fired.
    ///
    /// A wake that no longer matches the run's outstanding registration is
    /// stale (the run already moved on) and is consumed as a no-op.
    pub async fn resume_from_wake(&self, wake: &ScheduledWake) -> Result<(), EngineError> {
        self.runs
            .acquire_lease(&wake.run_id, &self.worker_id, self.config.lease_ttl())
            .await?;
        let result = self.resume_from_wake_locked(wake).await;
        self.runs.release_lease(&wake.run_id, &self.worker_id).await?;
        result
    }

    async fn resume_from_wake_locked(&self, wake: &ScheduledWake) -> Result<(), EngineError> {
        let mut run = self.load_run(&wake.run_id).await?;

        if run.status != RunStatus::Waiting || run.pending_wake.as_ref() != Some(&wake.id) {
            tracing::debug!(
                run_id = %wake.run_id.0,
                wake_id = %wake.id.0,
                "stale wake ignored"
            );
            return Ok(());
        }

        let definition = self.load_definition(&run.flow_version).await?;
        let (step_id, step) = match self.current_step(&run, &definition) {
            Ok(found) => found,
            Err(corrupt) => return self.escalate_corrupt(&mut run, corrupt).await,
        };
        let started = Utc::now();

        let next = match (wake.reason, &step.kind) {
            (WakeReason::Delay, StepKind::Delay { next, .. }) => {
                run.resume()?;
                run.record(StepExecutionRecord {
                    step_id: step_id.clone(),
                    started_at: started,
                    completed_at: Utc::now(),
                    outcome: StepOutcome::Advanced,
                    error: None,
                });
                next.clone()
            }
            (WakeReason::WaitTimeout, StepKind::WaitForResponse { on_timeout, .. }) => {
                // The event side lost; drop its registration
                if let Some(key) = run.correlation.clone() {
                    self.router.deregister(&key);
                }
                run.resume()?;
                run.context
                    .insert("replied".to_string(), serde_json::Value::Bool(false));
                run.record(StepExecutionRecord {
                    step_id: step_id.clone(),
                    started_at: started,
                    completed_at: Utc::now(),
                    outcome: StepOutcome::Branched("timeout".to_string()),
                    error: None,
                });
                on_timeout.clone()
            }
            _ => {
                let corrupt = EngineError::CorruptRunState(format!(
                    "run {} woke with reason {:?} on step {} of kind it cannot resume",
                    run.id.0, wake.reason, step_id
                ));
                return self.escalate_corrupt(&mut run, corrupt).await;
            }
        };

        run.current_step = next;
        self.save_and_publish(&mut run).await?;
        self.drive(&mut run, &definition).await
    }

    /// Route an inbound contact event to the run waiting on it, if any.
    ///
    /// Events with no waiting run are discarded (logged, not an error). An
    /// event losing the lease race against the timeout wake is likewise
    /// discarded; the timer path deregisters the correlation.
    pub async fn deliver_event(
        &self,
        contact: ContactId,
        channel: Channel,
        payload: Payload,
    ) -> Result<(), EngineError> {
        let key = CorrelationKey { contact, channel };
        // Router registrations are process-local; after a restart the
        // durable run record is the source of truth
        let run_id = match self.router.take(&key) {
            Some(run_id) => run_id,
            None => match self.runs.find_waiting_by_correlation(&key).await? {
                Some(run) => run.id,
                None => {
                    tracing::debug!(
                        contact_id = %key.contact.0,
                        "inbound event with no waiting run; discarded"
                    );
                    return Ok(());
                }
            },
        };

        match self
            .runs
            .acquire_lease(&run_id, &self.worker_id, self.config.lease_ttl())
            .await
        {
            Ok(()) => {}
            Err(EngineError::LeaseConflict(_)) => {
                tracing::debug!(
                    run_id = %run_id.0,
                    "inbound event lost the race for the run lease; discarded"
                );
                return Ok(());
            }
            Err(error) => return Err(error),
        }

        let result = self.deliver_event_locked(&run_id, &key, payload).await;
        self.runs.release_lease(&run_id, &self.worker_id).await?;
        result
    }

    async fn deliver_event_locked(
        &self,
        run_id: &RunId,
        key: &CorrelationKey,
        payload: Payload,
    ) -> Result<(), EngineError> {
        let mut run = self.load_run(run_id).await?;

        if run.status != RunStatus::Waiting || run.correlation.as_ref() != Some(key) {
            tracing::debug!(run_id = %run_id.0, "event for a run no longer waiting; discarded");
            return Ok(());
        }

        // The timeout wake lost; cancel it
        if let Some(wake_id) = run.pending_wake.clone() {
            self.wakes.cancel(&wake_id).await?;
        }

        let definition = self.load_definition(&run.flow_version).await?;
        let (step_id, step) = match self.current_step(&run, &definition) {
            Ok(found) => found,
            Err(corrupt) => return self.escalate_corrupt(&mut run, corrupt).await,
        };

        let StepKind::WaitForResponse { on_reply, .. } = &step.kind else {
            let corrupt = EngineError::CorruptRunState(format!(
                "run {} received an event while on step {} which does not wait",
                run.id.0, step_id
            ));
            return self.escalate_corrupt(&mut run, corrupt).await;
        };

        let started = Utc::now();
        run.resume()?;
        run.context
            .insert("replied".to_string(), serde_json::Value::Bool(true));
        run.context
            .insert("last_reply".to_string(), payload.into_value());
        run.record(StepExecutionRecord {
            step_id: step_id.clone(),
            started_at: started,
            completed_at: Utc::now(),
            outcome: StepOutcome::Branched("replied".to_string()),
            error: None,
        });
        run.current_step = on_reply.clone();

        self.save_and_publish(&mut run).await?;
        self.drive(&mut run, &definition).await
    }

    /// Request cancellation of a run.
    ///
    /// Cooperative: if the run is idle this finalizes immediately
    /// (registrations deregistered, status `Cancelled`); if a worker is
    /// mid-step, the flag is set and honored before the next step.
    pub async fn cancel(&self, run_id: &RunId) -> Result<(), EngineError> {
        match self
            .runs
            .acquire_lease(run_id, &self.worker_id, self.config.lease_ttl())
            .await
        {
            Ok(()) => {
                let result = self.cancel_locked(run_id).await;
                self.runs.release_lease(run_id, &self.worker_id).await?;
                result
            }
            Err(EngineError::LeaseConflict(_)) => self.request_cancel_flag(run_id).await,
            Err(error) => Err(error),
        }
    }

    async fn cancel_locked(&self, run_id: &RunId) -> Result<(), EngineError> {
        let mut run = self.load_run(run_id).await?;
        if !run.status.is_active() {
            return Ok(());
        }

        if let Some(key) = run.correlation.clone() {
            self.router.deregister(&key);
        }
        if let Some(wake_id) = run.pending_wake.clone() {
            self.wakes.cancel(&wake_id).await?;
        }
        run.cancel()?;
        self.save_and_publish(&mut run).await
    }

    /// The lease holder is mid-step; leave a flag it must honor before the
    /// next step begins
    async fn request_cancel_flag(&self, run_id: &RunId) -> Result<(), EngineError> {
        for _ in 0..4 {
            let mut run = self.load_run(run_id).await?;
            if !run.status.is_active() {
                return Ok(());
            }
            run.cancel_requested = true;
            match self.runs.save(&mut run).await {
                Ok(()) => return Ok(()),
                Err(EngineError::RevisionConflict(_)) => continue,
                Err(error) => return Err(error),
            }
        }
        Err(EngineError::RevisionConflict(run_id.0.clone()))
    }

    /// Current state of a run, for `getRunStatus`-style callers
    pub async fn status(&self, run_id: &RunId) -> Result<RunInstance, EngineError> {
        self.load_run(run_id).await
    }

    /// Execute steps until the run suspends or terminates
    async fn drive(
        &self,
        run: &mut RunInstance,
        definition: &FlowDefinition,
    ) -> Result<(), EngineError> {
        while run.status == RunStatus::Running {
            if run.cancel_requested {
                if let Some(key) = run.correlation.clone() {
                    self.router.deregister(&key);
                }
                run.cancel()?;
                self.save_and_publish(run).await?;
                break;
            }

            let Some(step_id) = run.current_step.clone() else {
                run.complete()?;
                self.save_and_publish(run).await?;
                break;
            };

            let Some(step) = definition.step(&step_id) else {
                let corrupt = EngineError::CorruptRunState(format!(
                    "run {} references unknown step {}",
                    run.id.0, step_id
                ));
                return self.escalate_corrupt(run, corrupt).await;
            };

            let started = Utc::now();
            tracing::debug!(
                run_id = %run.id.0,
                step_id = %step_id,
                contact_id = %run.contact_id.0,
                "executing step"
            );

            match self.execute_step(run, definition, step).await? {
                StepResolution::Advance { next, outcome } => {
                    run.record(StepExecutionRecord {
                        step_id: step_id.clone(),
                        started_at: started,
                        completed_at: Utc::now(),
                        outcome,
                        error: None,
                    });
                    run.current_step = next;
                }
                StepResolution::Suspend => {
                    run.record(StepExecutionRecord {
                        step_id: step_id.clone(),
                        started_at: started,
                        completed_at: Utc::now(),
                        outcome: StepOutcome::Suspended,
                        error: None,
                    });
                }
                StepResolution::Fail(reason) => {
                    tracing::warn!(
                        run_id = %run.id.0,
                        step_id = %step_id,
                        error = %reason,
                        "step failed the run"
                    );
                    run.record(StepExecutionRecord {
                        step_id: step_id.clone(),
                        started_at: started,
                        completed_at: Utc::now(),
                        outcome: StepOutcome::Failed,
                        error: Some(reason.clone()),
                    });
                    run.fail(&step_id, reason)?;
                }
            }

            self.save_and_publish(run).await?;
        }

        Ok(())
    }

    /// One step's semantics, by kind
    async fn execute_step(
        &self,
        run: &mut RunInstance,
        definition: &FlowDefinition,
        step: &StepDefinition,
    ) -> Result<StepResolution, EngineError> {
        match &step.kind {
            StepKind::Message { template, next } => {
                let body = render_template(template, &run.context);
                let op = SideEffectOp::SendMessage {
                    contact: run.contact_id.clone(),
                    channel: definition.channel,
                    body,
                };
                Ok(self.deliver(run, &step.id, op, next.clone()).await)
            }

            StepKind::Delay { .. } => {
                let duration = step
                    .kind
                    .suspend_duration()
                    .unwrap_or_default();
                let due_at = Utc::now()
                    + chrono::Duration::from_std(duration)
                        .unwrap_or_else(|_| chrono::Duration::days(30));
                let wake = ScheduledWake::new(
                    run.id.clone(),
                    step.id.clone(),
                    due_at,
                    WakeReason::Delay,
                );
                let wake_id = self.wakes.schedule(wake).await?;
                run.suspend_for_wake(wake_id)?;
                Ok(StepResolution::Suspend)
            }

            StepKind::WaitForResponse {
                timeout_seconds, ..
            } => {
                let due_at = Utc::now() + chrono::Duration::seconds(*timeout_seconds as i64);
                let wake = ScheduledWake::new(
                    run.id.clone(),
                    step.id.clone(),
                    due_at,
                    WakeReason::WaitTimeout,
                );
                let wake_id = self.wakes.schedule(wake).await?;
                let key = CorrelationKey {
                    contact: run.contact_id.clone(),
                    channel: definition.channel,
                };
                self.router.register(key.clone(), run.id.clone());
                run.suspend_for_event(wake_id, key)?;
                Ok(StepResolution::Suspend)
            }

            StepKind::Condition {
                predicate,
                on_true,
                on_false,
            } => {
                let (next, label) = if predicate.eval(&run.context) {
                    (on_true.clone(), "true")
                } else {
                    (on_false.clone(), "false")
                };
                Ok(StepResolution::Advance {
                    next,
                    outcome: StepOutcome::Branched(label.to_string()),
                })
            }

            StepKind::Webhook { url, method, next } => {
                let op = SideEffectOp::HttpCall {
                    url: url.clone(),
                    method: *method,
                    payload: Payload::new(serde_json::to_value(&run.context)?),
                };
                Ok(self.deliver(run, &step.id, op, next.clone()).await)
            }

            StepKind::Split {
                split_type,
                branches,
            } => {
                let index = split_index(
                    &run.contact_id,
                    &run.flow_version,
                    &step.id,
                    *split_type,
                    branches,
                );
                let branch = &branches[index];
                Ok(StepResolution::Advance {
                    next: Some(branch.to.clone()),
                    outcome: StepOutcome::Branched(format!("branch_{}", index)),
                })
            }

            // Single-flight past the merge is guaranteed by the run lease;
            // a duplicate wake re-entering finds the run already advanced
            // and is dropped upstream as stale
            StepKind::Merge { next } => Ok(StepResolution::Advance {
                next: next.clone(),
                outcome: StepOutcome::Advanced,
            }),

            StepKind::Tag { tag, add, next } => {
                let op = SideEffectOp::MutateTag {
                    contact: run.contact_id.clone(),
                    tag: tag.clone(),
                    add: *add,
                };
                Ok(self.deliver(run, &step.id, op, next.clone()).await)
            }

            StepKind::Notification { message, next } => {
                let op = SideEffectOp::Notify {
                    contact: run.contact_id.clone(),
                    message: render_template(message, &run.context),
                };
                Ok(self.deliver(run, &step.id, op, next.clone()).await)
            }

            StepKind::Survey { survey_id, next } => {
                let op = SideEffectOp::DispatchSurvey {
                    contact: run.contact_id.clone(),
                    survey_id: survey_id.clone(),
                };
                Ok(self.deliver(run, &step.id, op, next.clone()).await)
            }

            StepKind::Calendar { calendar_url, next } => {
                let op = SideEffectOp::CalendarInvite {
                    contact: run.contact_id.clone(),
                    calendar_url: calendar_url.clone(),
                };
                Ok(self.deliver(run, &step.id, op, next.clone()).await)
            }

            StepKind::Location { prompt, next } => {
                let op = SideEffectOp::RequestLocation {
                    contact: run.contact_id.clone(),
                    prompt: render_template(prompt, &run.context),
                };
                Ok(self.deliver(run, &step.id, op, next.clone()).await)
            }

            StepKind::Action {
                action,
                params,
                next,
            } => {
                let op = SideEffectOp::InvokeAction {
                    contact: run.contact_id.clone(),
                    name: action.clone(),
                    params: Payload::new(params.clone()),
                };
                Ok(self.deliver(run, &step.id, op, next.clone()).await)
            }
        }
    }

    /// Run a gateway operation under the retry policy
    async fn deliver(
        &self,
        run: &RunInstance,
        step_id: &StepId,
        op: SideEffectOp,
        next: Option<StepId>,
    ) -> StepResolution {
        let token = IdempotencyToken::new(&run.id, step_id, run.attempt_generation(step_id));
        match self
            .config
            .retry_policy()
            .call(self.gateway.as_ref(), &op, &token)
            .await
        {
            Ok(ack) => {
                tracing::debug!(
                    run_id = %run.id.0,
                    step_id = %step_id,
                    op = op.kind(),
                    reference = %ack.reference,
                    "side effect acknowledged"
                );
                StepResolution::Advance {
                    next,
                    outcome: StepOutcome::Advanced,
                }
            }
            Err(error) => StepResolution::Fail(error.to_string()),
        }
    }

    /// Save under CAS and dispatch drained domain events.
    ///
    /// The only writer that can race a lease holder is the cancellation
    /// flag, so a conflict is resolved by merging the flag and re-saving.
    async fn save_and_publish(&self, run: &mut RunInstance) -> Result<(), EngineError> {
        match self.runs.save(run).await {
            Ok(()) => {}
            Err(EngineError::RevisionConflict(_)) => {
                let run_id = run.id.clone();
                let latest = self.load_run(&run_id).await?;
                run.cancel_requested = run.cancel_requested || latest.cancel_requested;
                run.revision = latest.revision;
                self.runs.save(run).await?;
            }
            Err(error) => return Err(error),
        }

        for event in run.take_events() {
            self.event_handler.handle_event(event).await?;
        }
        Ok(())
    }

    /// Fail the run and alert the operator; never silently dropped
    async fn escalate_corrupt(
        &self,
        run: &mut RunInstance,
        corrupt: EngineError,
    ) -> Result<(), EngineError> {
        tracing::error!(
            run_id = %run.id.0,
            error = %corrupt,
            "corrupt run state; failing run for operator attention"
        );
        let step_id = run
            .current_step
            .clone()
            .unwrap_or_else(|| StepId("<unknown>".to_string()));
        run.fail(&step_id, corrupt.to_string())?;
        self.save_and_publish(run).await
    }

    fn current_step<'a>(
        &self,
        run: &RunInstance,
        definition: &'a FlowDefinition,
    ) -> Result<(StepId, &'a StepDefinition), EngineError> {
        let step_id = run.current_step.clone().ok_or_else(|| {
            EngineError::CorruptRunState(format!("run {} is waiting with no current step", run.id.0))
        })?;
        let step = definition.step(&step_id).ok_or_else(|| {
            EngineError::CorruptRunState(format!(
                "run {} references unknown step {}",
                run.id.0, step_id
            ))
        })?;
        Ok((step_id, step))
    }

    async fn load_run(&self, run_id: &RunId) -> Result<RunInstance, EngineError> {
        self.runs
            .find_by_id(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run_id.0.clone()))
    }

    async fn load_definition(
        &self,
        version: &FlowVersionId,
    ) -> Result<FlowDefinition, EngineError> {
        self.flows
            .find_version(version)
            .await?
            .ok_or_else(|| EngineError::FlowNotFound(version.to_string()))
    }
}

/// Substitute `{{key}}` placeholders from the run context
pub fn render_template(template: &str, context: &HashMap<String, serde_json::Value>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in context {
        let placeholder = format!("{{{{{}}}}}", key);
        if rendered.contains(&placeholder) {
            let replacement = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&placeholder, &replacement);
        }
    }
    rendered
}

/// Deterministic branch choice for a split step.
///
/// The hash point depends only on (contact, flow version, step), never on
/// wall clock or retry count, so resumed or retried execution always takes
/// the same branch.
pub fn split_index(
    contact: &ContactId,
    version: &FlowVersionId,
    step_id: &StepId,
    split_type: SplitType,
    branches: &[SplitBranch],
) -> usize {
    let mut hasher = Sha256::new();
    hasher.update(contact.0.as_bytes());
    hasher.update(b":");
    hasher.update(version.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(step_id.0.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let point = u64::from_be_bytes(bytes);

    let weight_of = |branch: &SplitBranch| -> u64 {
        match split_type {
            SplitType::Random => 1,
            SplitType::Percentage | SplitType::Custom => branch.weight as u64,
        }
    };

    let total: u64 = branches.iter().map(weight_of).sum();
    if total == 0 {
        return 0;
    }

    let mut point = point % total;
    for (index, branch) in branches.iter().enumerate() {
        let weight = weight_of(branch);
        if point < weight {
            return index;
        }
        point -= weight;
    }
    branches.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_template() {
        let mut context = HashMap::new();
        context.insert("first_name".to_string(), json!("Ada"));
        context.insert("seats".to_string(), json!(12));

        let rendered = render_template("Hi {{first_name}}, you have {{seats}} seats", &context);
        assert_eq!(rendered, "Hi Ada, you have 12 seats");
    }

    #[test]
    fn test_render_template_leaves_unknown_placeholders() {
        let context = HashMap::new();
        let rendered = render_template("Hi {{first_name}}", &context);
        assert_eq!(rendered, "Hi {{first_name}}");
    }

    fn branches(weights: &[u32]) -> Vec<SplitBranch> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| SplitBranch {
                weight: *w,
                to: StepId(format!("b{}", i)),
            })
            .collect()
    }

    #[test]
    fn test_split_is_deterministic() {
        let contact = ContactId("c-42".to_string());
        let version = FlowVersionId {
            flow: crate::domain::flow::FlowId("welcome".to_string()),
            version: 3,
        };
        let step = StepId("split-1".to_string());
        let branches = branches(&[50, 50]);

        let first = split_index(&contact, &version, &step, SplitType::Percentage, &branches);
        for _ in 0..10 {
            assert_eq!(
                split_index(&contact, &version, &step, SplitType::Percentage, &branches),
                first
            );
        }
    }

    #[test]
    fn test_split_zero_weight_branches_are_skipped() {
        let contact = ContactId("c-1".to_string());
        let version = FlowVersionId {
            flow: crate::domain::flow::FlowId("f".to_string()),
            version: 1,
        };
        let step = StepId("s".to_string());
        let branches = branches(&[0, 100]);

        let index = split_index(&contact, &version, &step, SplitType::Custom, &branches);
        assert_eq!(index, 1);
    }

    #[test]
    fn test_split_random_ignores_weights() {
        let version = FlowVersionId {
            flow: crate::domain::flow::FlowId("f".to_string()),
            version: 1,
        };
        let step = StepId("s".to_string());
        // With weights ignored, both branches must be reachable across
        // many contacts
        let branches = branches(&[0, 1]);
        let mut seen = [false, false];
        for i in 0..64 {
            let contact = ContactId(format!("c-{}", i));
            let index = split_index(&contact, &version, &step, SplitType::Random, &branches);
            seen[index] = true;
        }
        assert!(seen[0] && seen[1]);
    }
}
