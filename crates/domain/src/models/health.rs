//! Endpoint health derived from recent delivery history.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::delivery::DeliveryAttempt;
use crate::services::statistics::ResponseTimeStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(Self::Healthy),
            "unhealthy" => Ok(Self::Unhealthy),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown health status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    pub min_samples: usize,
    /// Success rate (0.0..=1.0) below which an endpoint is unhealthy.
    pub unhealthy_threshold: f64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            min_samples: 10,
            unhealthy_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthRecord {
    pub endpoint_id: Uuid,
    pub form_id: Uuid,
    /// 0.0..=1.0 over physical attempts in the sample.
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub p95_response_time_ms: i64,
    pub sample_size: i32,
    pub status: HealthStatus,
    pub last_updated: DateTime<Utc>,
}

impl HealthRecord {
    /// Evaluates health from recent attempts.
    ///
    /// Short-circuited rows (circuit open, rate limited) made no request and
    /// are not a health signal.
    pub fn evaluate(
        endpoint_id: Uuid,
        form_id: Uuid,
        attempts: &[DeliveryAttempt],
        policy: &HealthPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let physical: Vec<&DeliveryAttempt> =
            attempts.iter().filter(|a| a.outcome.is_physical()).collect();
        let sample_size = physical.len();
        let successes = physical.iter().filter(|a| a.success).count();
        let success_rate = if sample_size == 0 {
            0.0
        } else {
            successes as f64 / sample_size as f64
        };
        let times: Vec<i64> = physical.iter().map(|a| a.response_time_ms).collect();
        let stats = ResponseTimeStats::from_samples(&times);

        let status = if sample_size < policy.min_samples.max(1) {
            HealthStatus::Unknown
        } else if success_rate < policy.unhealthy_threshold {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        };

        Self {
            endpoint_id,
            form_id,
            success_rate,
            avg_response_time_ms: stats.avg_ms,
            p95_response_time_ms: stats.p95_ms,
            sample_size: i32::try_from(sample_size).unwrap_or(i32::MAX),
            status,
            last_updated: now,
        }
    }
}

/// Physical failures at or after `since`.
pub fn failures_since(attempts: &[DeliveryAttempt], since: DateTime<Utc>) -> usize {
    attempts
        .iter()
        .filter(|a| a.outcome.is_physical() && !a.success && a.created_at >= since)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::delivery::DeliveryOutcome;
    use chrono::Duration;

    fn attempt(outcome: DeliveryOutcome, ms: i64, at: DateTime<Utc>) -> DeliveryAttempt {
        DeliveryAttempt {
            id: Uuid::new_v4(),
            delivery_id: 1,
            endpoint_id: Uuid::nil(),
            form_id: Uuid::nil(),
            event_id: Uuid::new_v4(),
            event_type: "form.submitted".into(),
            target_url: "https://example.com".into(),
            attempt_number: 1,
            status_code: None,
            response_time_ms: ms,
            success: outcome == DeliveryOutcome::Success,
            outcome,
            error_message: None,
            response_body: None,
            request_payload: "{}".into(),
            created_at: at,
        }
    }

    fn policy() -> HealthPolicy {
        HealthPolicy {
            min_samples: 4,
            unhealthy_threshold: 0.5,
        }
    }

    #[test]
    fn test_unknown_below_min_samples() {
        let now = Utc::now();
        let attempts = vec![attempt(DeliveryOutcome::Success, 10, now); 3];
        let r = HealthRecord::evaluate(Uuid::nil(), Uuid::nil(), &attempts, &policy(), now);
        assert_eq!(r.status, HealthStatus::Unknown);
        assert_eq!(r.sample_size, 3);
    }

    #[test]
    fn test_unhealthy_below_threshold() {
        let now = Utc::now();
        let mut attempts = vec![attempt(DeliveryOutcome::RetryableFailure, 10, now); 3];
        attempts.push(attempt(DeliveryOutcome::Success, 10, now));
        let r = HealthRecord::evaluate(Uuid::nil(), Uuid::nil(), &attempts, &policy(), now);
        assert_eq!(r.status, HealthStatus::Unhealthy);
        assert_eq!(r.success_rate, 0.25);
    }

    #[test]
    fn test_healthy_at_threshold() {
        let now = Utc::now();
        let mut attempts = vec![attempt(DeliveryOutcome::TerminalFailure, 10, now); 2];
        attempts.extend(vec![attempt(DeliveryOutcome::Success, 30, now); 2]);
        let r = HealthRecord::evaluate(Uuid::nil(), Uuid::nil(), &attempts, &policy(), now);
        assert_eq!(r.status, HealthStatus::Healthy);
        assert_eq!(r.avg_response_time_ms, 20.0);
        assert_eq!(r.p95_response_time_ms, 30);
    }

    #[test]
    fn test_short_circuited_rows_are_ignored() {
        let now = Utc::now();
        let mut attempts = vec![attempt(DeliveryOutcome::CircuitOpen, 0, now); 10];
        attempts.extend(vec![attempt(DeliveryOutcome::RateLimited, 0, now); 10]);
        let r = HealthRecord::evaluate(Uuid::nil(), Uuid::nil(), &attempts, &policy(), now);
        assert_eq!(r.sample_size, 0);
        assert_eq!(r.status, HealthStatus::Unknown);
        assert_eq!(failures_since(&attempts, now - Duration::minutes(1)), 0);
    }

    #[test]
    fn test_failures_since_window() {
        let now = Utc::now();
        let attempts = vec![
            attempt(DeliveryOutcome::RetryableFailure, 0, now - Duration::minutes(10)),
            attempt(DeliveryOutcome::RetryableFailure, 0, now),
            attempt(DeliveryOutcome::Success, 0, now),
        ];
        assert_eq!(failures_since(&attempts, now - Duration::minutes(1)), 1);
    }
}
