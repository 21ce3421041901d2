//! Side-effect gateway: the uniform, retrying seam between the step
//! executor and the outside world (message providers, webhooks, tag and
//! notification adapters).
//!
//! Every outward call carries an idempotency token derived from
//! (run, step, attempt generation) so re-delivery after a crash cannot
//! double-send.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::flow::{Channel, ContactId, HttpMethod, StepId};
use crate::domain::run::RunId;
use crate::types::Payload;

/// HTTP adapter for webhook operations
pub mod http;

#[cfg(feature = "testing")]
mod recording;

#[cfg(feature = "testing")]
pub use recording::RecordingGateway;

/// One outward call requested by a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SideEffectOp {
    /// Deliver a rendered message body to a contact
    SendMessage {
        /// Recipient
        contact: ContactId,
        /// Delivery channel
        channel: Channel,
        /// Rendered body
        body: String,
    },
    /// Call an external HTTP endpoint
    HttpCall {
        /// Target URL
        url: String,
        /// HTTP method
        method: HttpMethod,
        /// Request body
        payload: Payload,
    },
    /// Add or remove a contact tag
    MutateTag {
        /// Contact to mutate
        contact: ContactId,
        /// Tag label
        tag: String,
        /// true = add, false = remove
        add: bool,
    },
    /// Internal operator notification
    Notify {
        /// Contact the notification concerns
        contact: ContactId,
        /// Notification text
        message: String,
    },
    /// Send a survey to a contact
    DispatchSurvey {
        /// Recipient
        contact: ContactId,
        /// Survey identifier
        survey_id: String,
    },
    /// Send a calendar booking link
    CalendarInvite {
        /// Recipient
        contact: ContactId,
        /// Booking link
        calendar_url: String,
    },
    /// Ask the contact for their location
    RequestLocation {
        /// Recipient
        contact: ContactId,
        /// Prompt text
        prompt: String,
    },
    /// Invoke a named action adapter
    InvokeAction {
        /// Contact in scope
        contact: ContactId,
        /// Adapter name
        name: String,
        /// Adapter parameters
        params: Payload,
    },
}

impl SideEffectOp {
    /// Short operation label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SideEffectOp::SendMessage { .. } => "send_message",
            SideEffectOp::HttpCall { .. } => "http_call",
            SideEffectOp::MutateTag { .. } => "mutate_tag",
            SideEffectOp::Notify { .. } => "notify",
            SideEffectOp::DispatchSurvey { .. } => "dispatch_survey",
            SideEffectOp::CalendarInvite { .. } => "calendar_invite",
            SideEffectOp::RequestLocation { .. } => "request_location",
            SideEffectOp::InvokeAction { .. } => "invoke_action",
        }
    }
}

/// Token identifying one logical delivery; stable across automatic retries
/// of the same generation, fresh on step re-entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyToken(pub String);

impl IdempotencyToken {
    /// Build the token for (run, step, attempt generation)
    pub fn new(run_id: &RunId, step_id: &StepId, generation: u32) -> Self {
        Self(format!("{}:{}:{}", run_id.0, step_id.0, generation))
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Successful delivery acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Provider reference for the delivery
    pub reference: String,
}

/// Delivery failure, classified for the retry policy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Retryable: network timeout, 5xx, provider throttling
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Not retryable: bad address, malformed request, 4xx
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

/// Uniform interface to every external adapter
#[async_trait]
pub trait SideEffectGateway: Send + Sync {
    /// Execute one operation. Implementations must treat a replayed token
    /// as already-delivered and ack without re-executing.
    async fn execute(
        &self,
        op: &SideEffectOp,
        token: &IdempotencyToken,
    ) -> Result<Ack, DeliveryError>;
}

/// Exponential backoff with jitter and a hard attempt cap
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts before giving up
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles per attempt
    pub base_backoff: Duration,

    /// Upper bound on a single backoff sleep
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based), jittered up to +50%
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_backoff
            .saturating_mul(1u32 << (attempt.saturating_sub(1)).min(16));
        let capped = doubled.min(self.max_backoff);
        let jitter_ms = rand::thread_rng().gen_range(0..=(capped.as_millis() as u64) / 2);
        capped + Duration::from_millis(jitter_ms)
    }

    /// Drive one operation to an ack or a permanent failure. Exhausted
    /// transient failures are reclassified as permanent so the caller sees
    /// a single terminal error kind.
    pub async fn call(
        &self,
        gateway: &dyn SideEffectGateway,
        op: &SideEffectOp,
        token: &IdempotencyToken,
    ) -> Result<Ack, DeliveryError> {
        let mut attempt = 0u32;
        loop {
            match gateway.execute(op, token).await {
                Ok(ack) => return Ok(ack),
                Err(DeliveryError::Permanent(reason)) => {
                    return Err(DeliveryError::Permanent(reason));
                }
                Err(DeliveryError::Transient(reason)) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(DeliveryError::Permanent(format!(
                            "retries exhausted after {} attempts: {}",
                            attempt, reason
                        )));
                    }
                    let backoff = self.backoff_for(attempt);
                    tracing::debug!(
                        op = op.kind(),
                        token = %token,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        reason = %reason,
                        "retrying side effect"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
