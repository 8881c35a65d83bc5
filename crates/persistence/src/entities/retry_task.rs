//! Retry queue entity.

use chrono::{DateTime, Utc};
use domain::models::RetryTask;
use sqlx::FromRow;
use uuid::Uuid;

use super::parse_column;
use crate::error::StoreError;

pub const COLUMNS: &str = "id, delivery_attempt_id, delivery_id, endpoint_id, form_id, \
    event_id, event_type, retry_count, max_retries, next_retry_at, lease_expires_at, \
    lease_id, payload, status, last_error, created_at, updated_at";

/// Database entity for the retry_tasks table.
#[derive(Debug, Clone, FromRow)]
pub struct RetryTaskEntity {
    pub id: Uuid,
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
    pub lease_id: Option<Uuid>,
    pub payload: String,
    pub status: String,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RetryTaskEntity> for RetryTask {
    type Error = StoreError;

    fn try_from(entity: RetryTaskEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            id: entity.id,
            delivery_attempt_id: entity.delivery_attempt_id,
            delivery_id: entity.delivery_id,
            endpoint_id: entity.endpoint_id,
            form_id: entity.form_id,
            event_id: entity.event_id,
            event_type: entity.event_type,
            retry_count: entity.retry_count,
            max_retries: entity.max_retries,
            next_retry_at: entity.next_retry_at,
            lease_expires_at: entity.lease_expires_at,
            lease_id: entity.lease_id,
            payload: entity.payload,
            status: parse_column("status", &entity.status)?,
            last_error: entity.last_error,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        })
    }
}
