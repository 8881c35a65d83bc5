//! Analytics bucket entity.

use chrono::NaiveDate;
use domain::models::AnalyticsBucket;
use sqlx::FromRow;
use uuid::Uuid;

use super::parse_column;
use crate::error::StoreError;

pub const COLUMNS: &str = "form_id, endpoint_id, bucket_date, bucket_hour, granularity, \
    total_count, success_count, failure_count, short_circuited_count, min_response_ms, \
    max_response_ms, avg_response_ms, p95_response_ms";

/// Database entity for the analytics_buckets table.
#[derive(Debug, Clone, FromRow)]
pub struct AnalyticsBucketEntity {
    pub form_id: Uuid,
    pub endpoint_id: Uuid,
    pub bucket_date: NaiveDate,
    pub bucket_hour: Option<i16>,
    pub granularity: String,
    pub total_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub short_circuited_count: i64,
    pub min_response_ms: i64,
    pub max_response_ms: i64,
    pub avg_response_ms: f64,
    pub p95_response_ms: i64,
}

impl TryFrom<AnalyticsBucketEntity> for AnalyticsBucket {
    type Error = StoreError;

    fn try_from(entity: AnalyticsBucketEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            form_id: entity.form_id,
            endpoint_id: entity.endpoint_id,
            date: entity.bucket_date,
            hour: entity.bucket_hour,
            granularity: parse_column("granularity", &entity.granularity)?,
            total_count: entity.total_count,
            success_count: entity.success_count,
            failure_count: entity.failure_count,
            short_circuited_count: entity.short_circuited_count,
            min_response_ms: entity.min_response_ms,
            max_response_ms: entity.max_response_ms,
            avg_response_ms: entity.avg_response_ms,
            p95_response_ms: entity.p95_response_ms,
        })
    }
}
