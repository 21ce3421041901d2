//! Webhook delivery over HTTP.

use async_trait::async_trait;
use std::time::Duration;

use super::{Ack, DeliveryError, IdempotencyToken, SideEffectGateway, SideEffectOp};
use crate::domain::flow::HttpMethod;

/// Gateway adapter for [`SideEffectOp::HttpCall`] operations.
///
/// Classification: 2xx acks; 408/429/5xx and connection-level timeouts are
/// transient; every other status and malformed request is permanent.
pub struct HttpGateway {
    client: reqwest::Client,
}

impl HttpGateway {
    /// Build a gateway with the given per-request timeout
    pub fn new(timeout: Duration) -> Result<Self, crate::error::EngineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::error::EngineError::StateStore(e.to_string()))?;
        Ok(Self { client })
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

#[async_trait]
impl SideEffectGateway for HttpGateway {
    async fn execute(
        &self,
        op: &SideEffectOp,
        token: &IdempotencyToken,
    ) -> Result<Ack, DeliveryError> {
        let (url, method, payload) = match op {
            SideEffectOp::HttpCall {
                url,
                method,
                payload,
            } => (url, *method, payload),
            other => {
                return Err(DeliveryError::Permanent(format!(
                    "http gateway cannot execute {} operations",
                    other.kind()
                )));
            }
        };

        let response = self
            .client
            .request(method.into(), url)
            .header("Idempotency-Key", &token.0)
            .json(payload.as_value())
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    tracing::debug!(url = %url, status = status.as_u16(), "webhook delivered");
                    Ok(Ack {
                        reference: format!("http-{}", status.as_u16()),
                    })
                } else if status.is_server_error()
                    || status == reqwest::StatusCode::REQUEST_TIMEOUT
                    || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                {
                    Err(DeliveryError::Transient(format!("http {}", status.as_u16())))
                } else {
                    Err(DeliveryError::Permanent(format!("http {}", status.as_u16())))
                }
            }
            Err(error) if error.is_timeout() || error.is_connect() => {
                Err(DeliveryError::Transient(error.to_string()))
            }
            Err(error) => Err(DeliveryError::Permanent(error.to_string())),
        }
    }
}
