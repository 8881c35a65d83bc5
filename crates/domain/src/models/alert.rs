//! Alerts raised by the health monitor.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Health transitioned into unhealthy.
    HighFailureRate,
    /// The endpoint's breaker opened.
    EndpointDown,
    FailureBurst,
    /// A delivery consumed its retry budget.
    RetryExhausted,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighFailureRate => "high_failure_rate",
            Self::EndpointDown => "endpoint_down",
            Self::FailureBurst => "failure_burst",
            Self::RetryExhausted => "retry_exhausted",
        }
    }

    pub fn default_severity(&self) -> AlertSeverity {
        match self {
            Self::HighFailureRate | Self::FailureBurst => AlertSeverity::Warning,
            Self::EndpointDown | Self::RetryExhausted => AlertSeverity::Critical,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high_failure_rate" => Ok(Self::HighFailureRate),
            "endpoint_down" => Ok(Self::EndpointDown),
            "failure_burst" => Ok(Self::FailureBurst),
            "retry_exhausted" => Ok(Self::RetryExhausted),
            other => Err(format!("unknown alert type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown alert severity: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: Uuid,
    pub form_id: Uuid,
    pub endpoint_id: Option<Uuid>,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        form_id: Uuid,
        endpoint_id: Option<Uuid>,
        alert_type: AlertType,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            form_id,
            endpoint_id,
            alert_type,
            severity: alert_type.default_severity(),
            message: message.into(),
            acknowledged: false,
            acknowledged_at: None,
            created_at: now,
        }
    }

    pub fn acknowledge(&mut self, now: DateTime<Utc>) {
        if !self.acknowledged {
            self.acknowledged = true;
            self.acknowledged_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_alert_uses_default_severity() {
        let a = Alert::new(Uuid::nil(), None, AlertType::RetryExhausted, "gave up", Utc::now());
        assert_eq!(a.severity, AlertSeverity::Critical);
        assert!(!a.acknowledged);
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let now = Utc::now();
        let mut a = Alert::new(Uuid::nil(), None, AlertType::FailureBurst, "burst", now);
        a.acknowledge(now);
        let first = a.acknowledged_at;
        a.acknowledge(now + chrono::Duration::seconds(5));
        assert_eq!(a.acknowledged_at, first);
    }
}
