//! Retry queue model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a queued retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    Pending,
    /// Claimed by a worker; the claim expires at `lease_expires_at`.
    Processing,
    Completed,
    Failed,
}

impl RetryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RetryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown retry status: {other}")),
        }
    }
}

/// A delivery awaiting (or done with) retries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryTask {
    pub id: Uuid,
    /// The attempt row that created this task.
    pub delivery_attempt_id: Uuid,
    pub delivery_id: i64,
    pub endpoint_id: Uuid,
    pub form_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Token of the current claim. Settling requires presenting it.
    pub lease_id: Option<Uuid>,
    /// Serialized envelope, resent byte-for-byte.
    pub payload: String,
    pub status: RetryStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetryTask {
    /// Attempt number of the next try: the initial attempt is 1.
    pub fn next_attempt_number(&self) -> i32 {
        self.retry_count + 2
    }

    pub fn has_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Due and either pending or holding an expired lease.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            RetryStatus::Pending => self.next_retry_at <= now,
            RetryStatus::Processing => self.lease_expires_at.map_or(true, |l| l <= now),
            _ => false,
        }
    }

    /// True while the claim identified by `lease_id` still owns the task.
    pub fn holds_lease(&self, lease_id: Uuid) -> bool {
        self.status == RetryStatus::Processing && self.lease_id == Some(lease_id)
    }
}

/// Retry-queue change committed together with an attempt row.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryTransition {
    /// The attempt ends the delivery with no queue entry (initial success).
    None,
    /// Insert a new task.
    Enqueue(RetryTask),
    /// The retry succeeded.
    Complete { task_id: Uuid, lease_id: Uuid },
    /// The retry failed with budget left.
    Reschedule {
        task_id: Uuid,
        lease_id: Uuid,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        last_error: Option<String>,
    },
    /// The retry failed terminally or exhausted its budget.
    Fail {
        task_id: Uuid,
        lease_id: Uuid,
        retry_count: i32,
        last_error: Option<String>,
    },
}
