//! Webhook endpoint domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::validation::{validate_event_types, validate_webhook_url};
use uuid::Uuid;
use validator::Validate;

/// Wildcard subscribing an endpoint to every event type.
pub const WILDCARD: &str = "*";

/// A subscriber-registered destination for events of a form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Endpoint {
    pub id: Uuid,
    pub form_id: Uuid,
    pub name: String,
    pub url: String,
    pub secret: String,
    pub event_types: Vec<String>,
    pub enabled: bool,
    /// Overrides the engine-wide retry budget.
    pub max_retries: Option<i32>,
    /// Overrides the engine-wide request timeout.
    pub timeout_secs: Option<i32>,
    /// Overrides the engine-wide breaker threshold.
    pub failure_threshold: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    /// Returns true if any subscription pattern matches the event type.
    pub fn is_subscribed_to(&self, event_type: &str) -> bool {
        self.event_types
            .iter()
            .any(|pattern| matches_event_type(pattern, event_type))
    }

    /// Enabled and subscribed.
    pub fn accepts(&self, event_type: &str) -> bool {
        self.enabled && self.is_subscribed_to(event_type)
    }

    /// Effective retry budget given the engine default.
    pub fn retry_budget(&self, default: u32) -> u32 {
        self.max_retries
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(default)
    }

    /// Effective breaker threshold given the engine default.
    pub fn breaker_threshold(&self, default: u32) -> u32 {
        self.failure_threshold
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(default)
    }

    /// Effective request timeout given the engine default.
    pub fn request_timeout_secs(&self, default: u64) -> u64 {
        self.timeout_secs
            .and_then(|v| u64::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(default)
    }
}

/// Matches a subscription pattern against a concrete event type.
///
/// Patterns are exact names, `*`, or a prefix ending in `*` (`form.*`).
pub fn matches_event_type(pattern: &str, event_type: &str) -> bool {
    if pattern == WILDCARD || pattern == event_type {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => event_type.starts_with(prefix),
        None => false,
    }
}

/// Request payload for registering an endpoint.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateEndpointRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: String,

    #[validate(custom(function = "validate_url"))]
    pub url: String,

    /// Generated when omitted.
    #[validate(length(min = 8, max = 256, message = "Secret must be between 8 and 256 characters"))]
    pub secret: Option<String>,

    #[validate(custom(function = "validate_subscriptions"))]
    pub event_types: Vec<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[validate(range(min = 0, max = 25, message = "max_retries must be between 0 and 25"))]
    pub max_retries: Option<i32>,

    #[validate(range(min = 1, max = 120, message = "timeout_secs must be between 1 and 120"))]
    pub timeout_secs: Option<i32>,

    #[validate(range(min = 1, max = 1000, message = "failure_threshold must be between 1 and 1000"))]
    pub failure_threshold: Option<i32>,
}

/// Partial update of an endpoint. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateEndpointRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: Option<String>,

    #[validate(custom(function = "validate_url"))]
    pub url: Option<String>,

    #[validate(length(min = 8, max = 256, message = "Secret must be between 8 and 256 characters"))]
    pub secret: Option<String>,

    #[validate(custom(function = "validate_subscriptions"))]
    pub event_types: Option<Vec<String>>,

    pub enabled: Option<bool>,

    #[validate(range(min = 0, max = 25, message = "max_retries must be between 0 and 25"))]
    pub max_retries: Option<i32>,

    #[validate(range(min = 1, max = 120, message = "timeout_secs must be between 1 and 120"))]
    pub timeout_secs: Option<i32>,

    #[validate(range(min = 1, max = 1000, message = "failure_threshold must be between 1 and 1000"))]
    pub failure_threshold: Option<i32>,
}

impl UpdateEndpointRequest {
    /// Applies the present fields to `endpoint`.
    pub fn apply(self, endpoint: &mut Endpoint, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            endpoint.name = name;
        }
        if let Some(url) = self.url {
            endpoint.url = url;
        }
        if let Some(secret) = self.secret {
            endpoint.secret = secret;
        }
        if let Some(event_types) = self.event_types {
            endpoint.event_types = event_types;
        }
        if let Some(enabled) = self.enabled {
            endpoint.enabled = enabled;
        }
        if self.max_retries.is_some() {
            endpoint.max_retries = self.max_retries;
        }
        if self.timeout_secs.is_some() {
            endpoint.timeout_secs = self.timeout_secs;
        }
        if self.failure_threshold.is_some() {
            endpoint.failure_threshold = self.failure_threshold;
        }
        endpoint.updated_at = now;
    }
}

/// Endpoint as returned by the management API.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointResponse {
    pub id: Uuid,
    pub form_id: Uuid,
    pub name: String,
    pub url: String,
    pub event_types: Vec<String>,
    pub enabled: bool,
    pub max_retries: Option<i32>,
    pub timeout_secs: Option<i32>,
    pub failure_threshold: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Returned once on creation so the subscriber can store the secret.
#[derive(Debug, Clone, Serialize)]
pub struct CreateEndpointResponse {
    #[serde(flatten)]
    pub endpoint: EndpointResponse,
    pub secret: String,
}

impl From<Endpoint> for EndpointResponse {
    fn from(e: Endpoint) -> Self {
        Self {
            id: e.id,
            form_id: e.form_id,
            name: e.name,
            url: e.url,
            event_types: e.event_types,
            enabled: e.enabled,
            max_retries: e.max_retries,
            timeout_secs: e.timeout_secs,
            failure_threshold: e.failure_threshold,
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}

impl From<Endpoint> for CreateEndpointResponse {
    fn from(e: Endpoint) -> Self {
        let secret = e.secret.clone();
        Self {
            endpoint: e.into(),
            secret,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn validate_url(url: &str) -> Result<(), validator::ValidationError> {
    validate_webhook_url(url)
}

fn validate_subscriptions(event_types: &[String]) -> Result<(), validator::ValidationError> {
    validate_event_types(event_types)
}
