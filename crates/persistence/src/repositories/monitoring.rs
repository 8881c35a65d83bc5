//! Health, alert and breaker snapshot queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::{Alert, AlertType, CircuitBreakerState, HealthRecord};
use uuid::Uuid;

use super::PgStore;
use crate::entities::{alert, AlertEntity, CircuitBreakerEntity, HealthRecordEntity};
use crate::metrics::QueryTimer;
use crate::store::{MonitoringStore, StoreResult};

const SELECT_HEALTH: &str = r#"
    SELECT endpoint_id, form_id, success_rate, avg_response_time_ms, p95_response_time_ms,
           sample_size, status, last_updated
    FROM health_records
"#;

#[async_trait]
impl MonitoringStore for PgStore {
    async fn upsert_health(&self, record: &HealthRecord) -> StoreResult<()> {
        let timer = QueryTimer::new("upsert_health");
        // Skips endpoints deleted since evaluation started.
        let result = sqlx::query(
            r#"
            INSERT INTO health_records (endpoint_id, form_id, success_rate, avg_response_time_ms,
                                        p95_response_time_ms, sample_size, status, last_updated)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8
            WHERE EXISTS (SELECT 1 FROM endpoints WHERE id = $1)
            ON CONFLICT (endpoint_id) DO UPDATE
            SET success_rate = EXCLUDED.success_rate,
                avg_response_time_ms = EXCLUDED.avg_response_time_ms,
                p95_response_time_ms = EXCLUDED.p95_response_time_ms,
                sample_size = EXCLUDED.sample_size,
                status = EXCLUDED.status,
                last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(record.endpoint_id)
        .bind(record.form_id)
        .bind(record.success_rate)
        .bind(record.avg_response_time_ms)
        .bind(record.p95_response_time_ms)
        .bind(record.sample_size)
        .bind(record.status.as_str())
        .bind(record.last_updated)
        .execute(self.pool())
        .await;
        timer.record();
        result?;
        Ok(())
    }

    async fn get_health(&self, endpoint_id: Uuid) -> StoreResult<Option<HealthRecord>> {
        let timer = QueryTimer::new("get_health");
        let entity = sqlx::query_as::<_, HealthRecordEntity>(&format!(
            "{SELECT_HEALTH} WHERE endpoint_id = $1"
        ))
        .bind(endpoint_id)
        .fetch_optional(self.pool())
        .await;
        timer.record();
        entity?.map(TryInto::try_into).transpose()
    }

    async fn list_health_for_form(&self, form_id: Uuid) -> StoreResult<Vec<HealthRecord>> {
        let timer = QueryTimer::new("list_health_for_form");
        let entities = sqlx::query_as::<_, HealthRecordEntity>(&format!(
            "{SELECT_HEALTH} WHERE form_id = $1 ORDER BY endpoint_id"
        ))
        .bind(form_id)
        .fetch_all(self.pool())
        .await;
        timer.record();
        entities?.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_alert(&self, alert: &Alert) -> StoreResult<()> {
        let timer = QueryTimer::new("insert_alert");
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (id, form_id, endpoint_id, alert_type, severity, message,
                                acknowledged, acknowledged_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(alert.id)
        .bind(alert.form_id)
        .bind(alert.endpoint_id)
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(alert.acknowledged)
        .bind(alert.acknowledged_at)
        .bind(alert.created_at)
        .execute(self.pool())
        .await;
        timer.record();
        result?;
        Ok(())
    }

    async fn latest_alert(
        &self,
        form_id: Uuid,
        endpoint_id: Option<Uuid>,
        alert_type: AlertType,
    ) -> StoreResult<Option<Alert>> {
        let timer = QueryTimer::new("latest_alert");
        let entity = sqlx::query_as::<_, AlertEntity>(&format!(
            r#"
            SELECT {} FROM alerts
            WHERE form_id = $1 AND endpoint_id IS NOT DISTINCT FROM $2 AND alert_type = $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            alert::COLUMNS
        ))
        .bind(form_id)
        .bind(endpoint_id)
        .bind(alert_type.as_str())
        .fetch_optional(self.pool())
        .await;
        timer.record();
        entity?.map(TryInto::try_into).transpose()
    }

    async fn list_alerts(
        &self,
        form_id: Uuid,
        include_acknowledged: bool,
        limit: i64,
    ) -> StoreResult<Vec<Alert>> {
        let timer = QueryTimer::new("list_alerts");
        let entities = sqlx::query_as::<_, AlertEntity>(&format!(
            r#"
            SELECT {} FROM alerts
            WHERE form_id = $1 AND ($2 OR NOT acknowledged)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
            alert::COLUMNS
        ))
        .bind(form_id)
        .bind(include_acknowledged)
        .bind(limit)
        .fetch_all(self.pool())
        .await;
        timer.record();
        entities?.into_iter().map(TryInto::try_into).collect()
    }

    async fn acknowledge_alert(
        &self,
        alert_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Alert>> {
        let timer = QueryTimer::new("acknowledge_alert");
        let entity = sqlx::query_as::<_, AlertEntity>(&format!(
            r#"
            UPDATE alerts
            SET acknowledged = TRUE,
                acknowledged_at = COALESCE(acknowledged_at, $2)
            WHERE id = $1
            RETURNING {}
            "#,
            alert::COLUMNS
        ))
        .bind(alert_id)
        .bind(now)
        .fetch_optional(self.pool())
        .await;
        timer.record();
        entity?.map(TryInto::try_into).transpose()
    }

    async fn save_breaker_states(&self, states: &[CircuitBreakerState]) -> StoreResult<()> {
        let timer = QueryTimer::new("save_breaker_states");
        let mut tx = self.pool().begin().await?;
        for s in states {
            sqlx::query(
                r#"
                INSERT INTO circuit_breaker_states (endpoint_id, state, consecutive_failures,
                                                    failure_threshold, open_count,
                                                    last_failure_at, next_reset_at, updated_at)
                SELECT $1, $2, $3, $4, $5, $6, $7, $8
                WHERE EXISTS (SELECT 1 FROM endpoints WHERE id = $1)
                ON CONFLICT (endpoint_id) DO UPDATE
                SET state = EXCLUDED.state,
                    consecutive_failures = EXCLUDED.consecutive_failures,
                    failure_threshold = EXCLUDED.failure_threshold,
                    open_count = EXCLUDED.open_count,
                    last_failure_at = EXCLUDED.last_failure_at,
                    next_reset_at = EXCLUDED.next_reset_at,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(s.endpoint_id)
            .bind(s.state.as_str())
            .bind(i32::try_from(s.consecutive_failures).unwrap_or(i32::MAX))
            .bind(i32::try_from(s.failure_threshold).unwrap_or(i32::MAX))
            .bind(i32::try_from(s.open_count).unwrap_or(i32::MAX))
            .bind(s.last_failure_at)
            .bind(s.next_reset_at)
            .bind(s.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        timer.record();
        Ok(())
    }

    async fn load_breaker_states(&self) -> StoreResult<Vec<CircuitBreakerState>> {
        let timer = QueryTimer::new("load_breaker_states");
        let entities = sqlx::query_as::<_, CircuitBreakerEntity>(
            r#"
            SELECT endpoint_id, state, consecutive_failures, failure_threshold, open_count,
                   last_failure_at, next_reset_at, updated_at
            FROM circuit_breaker_states
            "#,
        )
        .fetch_all(self.pool())
        .await;
        timer.record();
        entities?.into_iter().map(TryInto::try_into).collect()
    }
}
