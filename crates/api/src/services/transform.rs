//! Payload shaping applied once the engine has decided to deliver.

use domain::models::{Endpoint, EventEnvelope};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("payload rejected: {0}")]
    Rejected(String),
}

/// Renders the request body for one endpoint.
///
/// The rendered body is stored with the retry task and resent unchanged, so
/// a transform runs once per delivery, not once per attempt.
pub trait PayloadTransform: Send + Sync {
    fn render(&self, endpoint: &Endpoint, envelope: &EventEnvelope)
        -> Result<String, TransformError>;
}

/// Sends the event envelope as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEnvelopeTransform;

impl PayloadTransform for JsonEnvelopeTransform {
    fn render(
        &self,
        _endpoint: &Endpoint,
        envelope: &EventEnvelope,
    ) -> Result<String, TransformError> {
        Ok(serde_json::to_string(envelope)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn endpoint() -> Endpoint {
        let now = Utc::now();
        Endpoint {
            id: Uuid::new_v4(),
            form_id: Uuid::new_v4(),
            name: "crm".into(),
            url: "https://example.com/hook".into(),
            secret: "s3cret-value".into(),
            event_types: vec!["*".into()],
            enabled: true,
            max_retries: None,
            timeout_secs: None,
            failure_threshold: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_json_envelope_contains_wire_fields() {
        let endpoint = endpoint();
        let envelope = EventEnvelope::new(
            "form.submitted",
            endpoint.form_id,
            serde_json::json!({"email": "a@example.com"}),
            Utc::now(),
        );

        let body = JsonEnvelopeTransform.render(&endpoint, &envelope).unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(value["event_type"], "form.submitted");
        assert_eq!(value["form_id"], endpoint.form_id.to_string());
        assert_eq!(value["data"]["email"], "a@example.com");
        assert!(value.get("id").is_some());
        assert!(value.get("timestamp").is_some());
    }
}
