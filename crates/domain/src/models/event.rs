//! Inbound events and the JSON envelope sent to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A request to publish an event to every subscribed endpoint of a form.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PublishRequest {
    pub form_id: Uuid,

    #[validate(length(min = 1, max = 100, message = "event_type must be between 1 and 100 characters"))]
    #[validate(custom(function = "validate_concrete_event_type"))]
    pub event_type: String,

    #[serde(default)]
    pub data: serde_json::Value,

    /// Producer identity used for source-level rate limiting.
    #[validate(length(min = 1, max = 100, message = "source must be between 1 and 100 characters"))]
    pub source: Option<String>,
}

/// Body POSTed to the endpoint. Identical across retries of a delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub event_type: String,
    pub form_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(
        event_type: impl Into<String>,
        form_id: Uuid,
        data: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            form_id,
            timestamp: now,
            data,
        }
    }

    /// The synthetic event sent by endpoint tests.
    pub fn test_event(form_id: Uuid, endpoint_id: Uuid, now: DateTime<Utc>) -> Self {
        Self::new(
            "test",
            form_id,
            serde_json::json!({
                "message": "This is a test webhook delivery",
                "endpoint_id": endpoint_id,
            }),
            now,
        )
    }
}

/// Published events name one concrete type; wildcards belong to subscriptions.
fn validate_concrete_event_type(event_type: &str) -> Result<(), validator::ValidationError> {
    if event_type.contains('*') {
        let mut err = validator::ValidationError::new("event_type_wildcard");
        err.message = Some("Published event types cannot contain wildcards".into());
        return Err(err);
    }
    Ok(())
}
