//! Analytics bucket and rollup watermark queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::{AnalyticsBucket, Granularity, Period};
use uuid::Uuid;

use super::PgStore;
use crate::entities::{analytics, AnalyticsBucketEntity};
use crate::metrics::QueryTimer;
use crate::store::{AnalyticsStore, StoreResult};

#[async_trait]
impl AnalyticsStore for PgStore {
    async fn replace_period(
        &self,
        period: Period,
        buckets: &[AnalyticsBucket],
    ) -> StoreResult<()> {
        let timer = QueryTimer::new("replace_analytics_period");
        let hour = period.hour.map(|h| h as i16);
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"
            DELETE FROM analytics_buckets
            WHERE bucket_date = $1 AND bucket_hour IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(period.date)
        .bind(hour)
        .execute(&mut *tx)
        .await?;

        for b in buckets {
            sqlx::query(
                r#"
                INSERT INTO analytics_buckets (form_id, endpoint_id, bucket_date, bucket_hour,
                                               granularity, total_count, success_count,
                                               failure_count, short_circuited_count,
                                               min_response_ms, max_response_ms,
                                               avg_response_ms, p95_response_ms, period_start)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(b.form_id)
            .bind(b.endpoint_id)
            .bind(b.date)
            .bind(b.hour)
            .bind(b.granularity.as_str())
            .bind(b.total_count)
            .bind(b.success_count)
            .bind(b.failure_count)
            .bind(b.short_circuited_count)
            .bind(b.min_response_ms)
            .bind(b.max_response_ms)
            .bind(b.avg_response_ms)
            .bind(b.p95_response_ms)
            .bind(b.key().period.start())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        timer.record();
        Ok(())
    }

    async fn list_buckets(
        &self,
        form_id: Uuid,
        granularity: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<AnalyticsBucket>> {
        let timer = QueryTimer::new("list_analytics_buckets");
        let entities = sqlx::query_as::<_, AnalyticsBucketEntity>(&format!(
            r#"
            SELECT {} FROM analytics_buckets
            WHERE form_id = $1 AND granularity = $2
              AND period_start >= $3 AND period_start < $4
            ORDER BY period_start, endpoint_id
            "#,
            analytics::COLUMNS
        ))
        .bind(form_id)
        .bind(granularity.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(self.pool())
        .await;
        timer.record();
        entities?.into_iter().map(TryInto::try_into).collect()
    }

    async fn rollup_watermark(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let timer = QueryTimer::new("rollup_watermark");
        let row: Result<Option<(DateTime<Utc>,)>, sqlx::Error> =
            sqlx::query_as("SELECT watermark FROM analytics_rollup_state WHERE id = 1")
                .fetch_optional(self.pool())
                .await;
        timer.record();
        Ok(row?.map(|(w,)| w))
    }

    async fn set_rollup_watermark(&self, watermark: DateTime<Utc>) -> StoreResult<()> {
        let timer = QueryTimer::new("set_rollup_watermark");
        let result = sqlx::query(
            r#"
            INSERT INTO analytics_rollup_state (id, watermark, updated_at)
            VALUES (1, $1, NOW())
            ON CONFLICT (id) DO UPDATE
            SET watermark = GREATEST(analytics_rollup_state.watermark, EXCLUDED.watermark),
                updated_at = NOW()
            "#,
        )
        .bind(watermark)
        .execute(self.pool())
        .await;
        timer.record();
        result?;
        Ok(())
    }
}
