//! In-memory gateway test double.
//!
//! Records every acknowledged operation, deduplicates on the idempotency
//! token, and can be scripted to fail upcoming calls.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

use super::{Ack, DeliveryError, IdempotencyToken, SideEffectGateway, SideEffectOp};

/// Gateway double that records deliveries and honors token replay
#[derive(Default)]
pub struct RecordingGateway {
    acked: DashMap<String, Ack>,
    records: Mutex<Vec<(IdempotencyToken, SideEffectOp)>>,
    scripted_failures: Mutex<VecDeque<DeliveryError>>,
}

impl RecordingGateway {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure to be returned by an upcoming call, FIFO
    pub fn push_failure(&self, error: DeliveryError) {
        self.scripted_failures
            .lock()
            .expect("failure script lock")
            .push_back(error);
    }

    /// Queue the same failure `count` times
    pub fn push_failures(&self, error: DeliveryError, count: usize) {
        for _ in 0..count {
            self.push_failure(error.clone());
        }
    }

    /// Every acknowledged delivery, in order; token replays appear once
    pub fn deliveries(&self) -> Vec<(IdempotencyToken, SideEffectOp)> {
        self.records.lock().expect("records lock").clone()
    }

    /// Count of acknowledged deliveries matching the op kind label
    pub fn delivery_count(&self, kind: &str) -> usize {
        self.deliveries()
            .iter()
            .filter(|(_, op)| op.kind() == kind)
            .count()
    }
}

#[async_trait]
impl SideEffectGateway for RecordingGateway {
    async fn execute(
        &self,
        op: &SideEffectOp,
        token: &IdempotencyToken,
    ) -> Result<Ack, DeliveryError> {
        // Replayed token: already delivered, return the original ack
        if let Some(ack) = self.acked.get(&token.0) {
            return Ok(ack.clone());
        }

        if let Some(error) = self
            .scripted_failures
            .lock()
            .expect("failure script lock")
            .pop_front()
        {
            return Err(error);
        }

        let ack = Ack {
            reference: Uuid::new_v4().to_string(),
        };
        self.records
            .lock()
            .expect("records lock")
            .push((token.clone(), op.clone()));
        self.acked.insert(token.0.clone(), ack.clone());
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flow::{Channel, ContactId, StepId};
    use crate::domain::run::RunId;

    fn op() -> SideEffectOp {
        SideEffectOp::SendMessage {
            contact: ContactId("c-1".to_string()),
            channel: Channel::Sms,
            body: "hello".to_string(),
        }
    }

    #[tokio::test]
    async fn test_token_replay_does_not_double_record() {
        let gateway = RecordingGateway::new();
        let token = IdempotencyToken::new(&RunId("r".to_string()), &StepId("s".to_string()), 0);

        let first = gateway.execute(&op(), &token).await.unwrap();
        let second = gateway.execute(&op(), &token).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(gateway.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let gateway = RecordingGateway::new();
        gateway.push_failure(DeliveryError::Transient("http 503".to_string()));
        let token = IdempotencyToken::new(&RunId("r".to_string()), &StepId("s".to_string()), 0);

        let first = gateway.execute(&op(), &token).await;
        assert!(matches!(first, Err(DeliveryError::Transient(_))));

        let second = gateway.execute(&op(), &token).await;
        assert!(second.is_ok());
        assert_eq!(gateway.delivery_count("send_message"), 1);
    }
}
