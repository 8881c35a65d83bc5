//! Delivery attempt log model and outcome classification.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum bytes of response body retained on an attempt row.
pub const MAX_RESPONSE_BODY_BYTES: usize = 1024;

/// Result category of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Success,
    RetryableFailure,
    TerminalFailure,
    /// No request was made because the endpoint's breaker rejected it.
    CircuitOpen,
    /// No request was made because a rate limit denied it.
    RateLimited,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RetryableFailure => "retryable_failure",
            Self::TerminalFailure => "terminal_failure",
            Self::CircuitOpen => "circuit_open",
            Self::RateLimited => "rate_limited",
        }
    }

    /// True if an HTTP request actually left the engine.
    pub fn is_physical(&self) -> bool {
        !matches!(self, Self::CircuitOpen | Self::RateLimited)
    }

    /// True if the outcome should be retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RetryableFailure | Self::CircuitOpen | Self::RateLimited
        )
    }

    /// Classifies a received HTTP status.
    ///
    /// 2xx succeeds; 4xx is terminal except 408 and 429; everything else is retryable.
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            408 | 429 => Self::RetryableFailure,
            400..=499 => Self::TerminalFailure,
            _ => Self::RetryableFailure,
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "retryable_failure" => Ok(Self::RetryableFailure),
            "terminal_failure" => Ok(Self::TerminalFailure),
            "circuit_open" => Ok(Self::CircuitOpen),
            "rate_limited" => Ok(Self::RateLimited),
            other => Err(format!("unknown delivery outcome: {other}")),
        }
    }
}

/// One row of the append-only delivery log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    /// Stable across every attempt of the same delivery.
    pub delivery_id: i64,
    pub endpoint_id: Uuid,
    pub form_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    pub target_url: String,
    /// 1 for the initial attempt, k+1 for retry k.
    pub attempt_number: i32,
    pub status_code: Option<i32>,
    pub response_time_ms: i64,
    pub success: bool,
    pub outcome: DeliveryOutcome,
    pub error_message: Option<String>,
    pub response_body: Option<String>,
    pub request_payload: String,
    pub created_at: DateTime<Utc>,
}

/// Filter for listing delivery log rows, newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeliveryQuery {
    pub form_id: Option<Uuid>,
    pub endpoint_id: Option<Uuid>,
    pub success: Option<bool>,
    /// Skip rows written for requests that never left the engine.
    #[serde(default)]
    pub physical_only: bool,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl DeliveryQuery {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 500;

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub fn matches(&self, attempt: &DeliveryAttempt) -> bool {
        self.form_id.map_or(true, |id| attempt.form_id == id)
            && self.endpoint_id.map_or(true, |id| attempt.endpoint_id == id)
            && self.success.map_or(true, |s| attempt.success == s)
            && (!self.physical_only || attempt.outcome.is_physical())
            && self.since.map_or(true, |t| attempt.created_at >= t)
            && self.until.map_or(true, |t| attempt.created_at < t)
    }
}

/// Issues delivery identifiers that increase monotonically.
///
/// Identifiers are seeded from the wall clock in microseconds so they keep
/// increasing across restarts.
#[derive(Debug)]
pub struct DeliveryIdGenerator {
    last: AtomicI64,
}

impl DeliveryIdGenerator {
    pub fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }

    pub fn next_id(&self) -> i64 {
        let now = Utc::now().timestamp_micros();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self.last.compare_exchange_weak(
                prev,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

impl Default for DeliveryIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncates to at most `max_bytes`, respecting char boundaries.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
