//! Endpoint health entity.

use chrono::{DateTime, Utc};
use domain::models::HealthRecord;
use sqlx::FromRow;
use uuid::Uuid;

use super::parse_column;
use crate::error::StoreError;

/// Database entity for the health_records table.
#[derive(Debug, Clone, FromRow)]
pub struct HealthRecordEntity {
    pub endpoint_id: Uuid,
    pub form_id: Uuid,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub p95_response_time_ms: i64,
    pub sample_size: i32,
    pub status: String,
    pub last_updated: DateTime<Utc>,
}

impl TryFrom<HealthRecordEntity> for HealthRecord {
    type Error = StoreError;

    fn try_from(entity: HealthRecordEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            endpoint_id: entity.endpoint_id,
            form_id: entity.form_id,
            success_rate: entity.success_rate,
            avg_response_time_ms: entity.avg_response_time_ms,
            p95_response_time_ms: entity.p95_response_time_ms,
            sample_size: entity.sample_size,
            status: parse_column("status", &entity.status)?,
            last_updated: entity.last_updated,
        })
    }
}
