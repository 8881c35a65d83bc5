//! Circuit breaker snapshot entity.

use chrono::{DateTime, Utc};
use domain::models::CircuitBreakerState;
use sqlx::FromRow;
use uuid::Uuid;

use super::{parse_column, unsigned_column};
use crate::error::StoreError;

/// Database entity for the circuit_breaker_states table.
#[derive(Debug, Clone, FromRow)]
pub struct CircuitBreakerEntity {
    pub endpoint_id: Uuid,
    pub state: String,
    pub consecutive_failures: i32,
    pub failure_threshold: i32,
    pub open_count: i32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_reset_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<CircuitBreakerEntity> for CircuitBreakerState {
    type Error = StoreError;

    fn try_from(entity: CircuitBreakerEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            endpoint_id: entity.endpoint_id,
            state: parse_column("state", &entity.state)?,
            consecutive_failures: unsigned_column(
                "consecutive_failures",
                entity.consecutive_failures,
            )?,
            failure_threshold: unsigned_column("failure_threshold", entity.failure_threshold)?,
            open_count: unsigned_column("open_count", entity.open_count)?,
            last_failure_at: entity.last_failure_at,
            next_reset_at: entity.next_reset_at,
            // In-flight probes do not survive a restart.
            probe_deadline: None,
            updated_at: entity.updated_at,
        })
    }
}
