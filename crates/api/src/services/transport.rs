//! Outbound HTTP transport for webhook deliveries.

use std::time::Duration;

use async_trait::async_trait;
use domain::models::delivery::truncate_utf8;
use thiserror::Error;

use super::EngineError;

/// A fully built delivery request.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
    pub timeout: Duration,
}

impl OutboundRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Status and leading bytes of the receiver's response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Failures that produced no HTTP status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError>;
}

/// `reqwest` transport. Redirects are not followed.
pub struct ReqwestTransport {
    client: reqwest::Client,
    body_limit: usize,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, body_limit: usize) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| EngineError::HttpClient(e.to_string()))?;
        Ok(Self { client, body_limit })
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }

        let mut response = builder.send().await?;
        let status = response.status().as_u16();

        // Only the first `body_limit` bytes are kept, so stop reading there.
        let mut raw = Vec::new();
        while raw.len() < self.body_limit {
            match response.chunk().await {
                Ok(Some(chunk)) => raw.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(status, error = %e, "Response body read interrupted");
                    break;
                }
            }
        }

        Ok(TransportResponse {
            status,
            body: truncate_utf8(&String::from_utf8_lossy(&raw), self.body_limit),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = OutboundRequest {
            url: "https://example.com/hook".into(),
            headers: vec![("X-Webhook-Event", "form.submitted".into())],
            body: "{}".into(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(request.header("x-webhook-event"), Some("form.submitted"));
        assert_eq!(request.header("x-missing"), None);
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::Timeout.to_string(), "request timed out");
        assert_eq!(
            TransportError::Connect("refused".into()).to_string(),
            "connection failed: refused"
        );
    }

    #[test]
    fn test_client_builds() {
        assert!(ReqwestTransport::new("webhook-engine/1.0", 1024).is_ok());
    }
}
