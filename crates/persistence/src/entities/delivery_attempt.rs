//! Delivery log entity.

use chrono::{DateTime, Utc};
use domain::models::DeliveryAttempt;
use sqlx::FromRow;
use uuid::Uuid;

use super::parse_column;
use crate::error::StoreError;

pub const COLUMNS: &str = "id, delivery_id, endpoint_id, form_id, event_id, event_type, \
    target_url, attempt_number, status_code, response_time_ms, success, outcome, \
    error_message, response_body, request_payload, created_at";

/// Database entity for the delivery_attempts table.
#[derive(Debug, Clone, FromRow)]
pub struct DeliveryAttemptEntity {
    pub id: Uuid,
    pub delivery_id: i64,
    pub endpoint_id: Uuid,
    pub form_id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    pub target_url: String,
    pub attempt_number: i32,
    pub status_code: Option<i32>,
    pub response_time_ms: i64,
    pub success: bool,
    pub outcome: String,
    pub error_message: Option<String>,
    pub response_body: Option<String>,
    pub request_payload: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DeliveryAttemptEntity> for DeliveryAttempt {
    type Error = StoreError;

    fn try_from(entity: DeliveryAttemptEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            id: entity.id,
            delivery_id: entity.delivery_id,
            endpoint_id: entity.endpoint_id,
            form_id: entity.form_id,
            event_id: entity.event_id,
            event_type: entity.event_type,
            target_url: entity.target_url,
            attempt_number: entity.attempt_number,
            status_code: entity.status_code,
            response_time_ms: entity.response_time_ms,
            success: entity.success,
            outcome: parse_column("outcome", &entity.outcome)?,
            error_message: entity.error_message,
            response_body: entity.response_body,
            request_payload: entity.request_payload,
            created_at: entity.created_at,
        })
    }
}
