//! Delivery log and retry queue queries.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use domain::models::{AttemptGroup, DeliveryAttempt, DeliveryQuery, RetryTask, RetryTransition};
use sqlx::{Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::PgStore;
use crate::entities::{
    delivery_attempt, parse_column, retry_task, DeliveryAttemptEntity, RetryTaskEntity,
};
use crate::error::StoreError;
use crate::metrics::QueryTimer;
use crate::store::{AttemptCounts, DeliveryStore, StoreResult};

async fn insert_attempt(
    tx: &mut Transaction<'_, Postgres>,
    attempt: &DeliveryAttempt,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO delivery_attempts (id, delivery_id, endpoint_id, form_id, event_id,
                                       event_type, target_url, attempt_number, status_code,
                                       response_time_ms, success, outcome, error_message,
                                       response_body, request_payload, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
    )
    .bind(attempt.id)
    .bind(attempt.delivery_id)
    .bind(attempt.endpoint_id)
    .bind(attempt.form_id)
    .bind(attempt.event_id)
    .bind(&attempt.event_type)
    .bind(&attempt.target_url)
    .bind(attempt.attempt_number)
    .bind(attempt.status_code)
    .bind(attempt.response_time_ms)
    .bind(attempt.success)
    .bind(attempt.outcome.as_str())
    .bind(&attempt.error_message)
    .bind(&attempt.response_body)
    .bind(&attempt.request_payload)
    .bind(attempt.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_task(
    tx: &mut Transaction<'_, Postgres>,
    task: &RetryTask,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO retry_tasks (id, delivery_attempt_id, delivery_id, endpoint_id, form_id,
                                 event_id, event_type, retry_count, max_retries, next_retry_at,
                                 lease_expires_at, lease_id, payload, status, last_error,
                                 created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#,
    )
    .bind(task.id)
    .bind(task.delivery_attempt_id)
    .bind(task.delivery_id)
    .bind(task.endpoint_id)
    .bind(task.form_id)
    .bind(task.event_id)
    .bind(&task.event_type)
    .bind(task.retry_count)
    .bind(task.max_retries)
    .bind(task.next_retry_at)
    .bind(task.lease_expires_at)
    .bind(task.lease_id)
    .bind(&task.payload)
    .bind(task.status.as_str())
    .bind(&task.last_error)
    .bind(task.created_at)
    .bind(task.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Applies a transition to a claimed task. Returns rows affected, which is
/// zero when `lease_id` no longer owns the task.
async fn update_task(
    tx: &mut Transaction<'_, Postgres>,
    transition: &RetryTransition,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = match transition {
        RetryTransition::None | RetryTransition::Enqueue(_) => return Ok(1),
        RetryTransition::Complete { task_id, lease_id } => {
            sqlx::query(
                r#"
                UPDATE retry_tasks
                SET status = 'completed', lease_expires_at = NULL, lease_id = NULL, updated_at = $2
                WHERE id = $1 AND status = 'processing' AND lease_id = $3
                "#,
            )
            .bind(task_id)
            .bind(now)
            .bind(lease_id)
            .execute(&mut **tx)
            .await?
        }
        RetryTransition::Reschedule {
            task_id,
            lease_id,
            retry_count,
            next_retry_at,
            last_error,
        } => {
            sqlx::query(
                r#"
                UPDATE retry_tasks
                SET status = 'pending',
                    retry_count = $2,
                    next_retry_at = $3,
                    last_error = $4,
                    lease_expires_at = NULL,
                    lease_id = NULL,
                    updated_at = $5
                WHERE id = $1 AND status = 'processing' AND lease_id = $6
                "#,
            )
            .bind(task_id)
            .bind(retry_count)
            .bind(next_retry_at)
            .bind(last_error)
            .bind(now)
            .bind(lease_id)
            .execute(&mut **tx)
            .await?
        }
        RetryTransition::Fail {
            task_id,
            lease_id,
            retry_count,
            last_error,
        } => {
            sqlx::query(
                r#"
                UPDATE retry_tasks
                SET status = 'failed',
                    retry_count = $2,
                    last_error = $3,
                    lease_expires_at = NULL,
                    lease_id = NULL,
                    updated_at = $4
                WHERE id = $1 AND status = 'processing' AND lease_id = $5
                "#,
            )
            .bind(task_id)
            .bind(retry_count)
            .bind(last_error)
            .bind(now)
            .bind(lease_id)
            .execute(&mut **tx)
            .await?
        }
    };
    Ok(result.rows_affected())
}

#[async_trait]
impl DeliveryStore for PgStore {
    async fn record_attempt(
        &self,
        attempt: &DeliveryAttempt,
        transition: &RetryTransition,
    ) -> StoreResult<()> {
        let timer = QueryTimer::new("record_attempt");
        let mut tx = self.pool().begin().await?;

        insert_attempt(&mut tx, attempt).await?;
        if let RetryTransition::Enqueue(task) = transition {
            insert_task(&mut tx, task)
                .await
                .map_err(StoreError::from_write)?;
        }
        if update_task(&mut tx, transition, attempt.created_at).await? == 0 {
            tx.rollback().await?;
            timer.record();
            return Err(StoreError::Conflict(format!(
                "retry task for delivery {} is no longer held by this claim",
                attempt.delivery_id
            )));
        }

        tx.commit().await?;
        timer.record();
        Ok(())
    }

    async fn list_attempts(&self, query: &DeliveryQuery) -> StoreResult<Vec<DeliveryAttempt>> {
        let timer = QueryTimer::new("list_attempts");
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM delivery_attempts WHERE TRUE",
            delivery_attempt::COLUMNS
        ));
        if let Some(form_id) = query.form_id {
            qb.push(" AND form_id = ").push_bind(form_id);
        }
        if let Some(endpoint_id) = query.endpoint_id {
            qb.push(" AND endpoint_id = ").push_bind(endpoint_id);
        }
        if let Some(success) = query.success {
            qb.push(" AND success = ").push_bind(success);
        }
        if query.physical_only {
            qb.push(" AND outcome NOT IN ('circuit_open', 'rate_limited')");
        }
        if let Some(since) = query.since {
            qb.push(" AND created_at >= ").push_bind(since);
        }
        if let Some(until) = query.until {
            qb.push(" AND created_at < ").push_bind(until);
        }
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(query.effective_limit())
            .push(" OFFSET ")
            .push_bind(query.effective_offset());

        let entities = qb
            .build_query_as::<DeliveryAttemptEntity>()
            .fetch_all(self.pool())
            .await;
        timer.record();
        entities?.into_iter().map(TryInto::try_into).collect()
    }

    async fn attempts_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<DeliveryAttempt>> {
        let timer = QueryTimer::new("attempts_in_range");
        let entities = sqlx::query_as::<_, DeliveryAttemptEntity>(&format!(
            "SELECT {} FROM delivery_attempts WHERE created_at >= $1 AND created_at < $2",
            delivery_attempt::COLUMNS
        ))
        .bind(from)
        .bind(to)
        .fetch_all(self.pool())
        .await;
        timer.record();
        entities?.into_iter().map(TryInto::try_into).collect()
    }

    async fn attempt_counts(
        &self,
        form_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<AttemptCounts> {
        let timer = QueryTimer::new("attempt_counts");
        let row: Result<(i64, i64, Option<DateTime<Utc>>), sqlx::Error> = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE success),
                   MAX(created_at)
            FROM delivery_attempts
            WHERE form_id = $1 AND created_at >= $2
            "#,
        )
        .bind(form_id)
        .bind(since)
        .fetch_one(self.pool())
        .await;
        timer.record();

        let (total, successful, last_attempt_at) = row?;
        Ok(AttemptCounts {
            total,
            successful,
            failed: total - successful,
            last_attempt_at,
        })
    }

    async fn attempt_groups(
        &self,
        form_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<AttemptGroup>> {
        let timer = QueryTimer::new("attempt_groups");
        let rows: Result<Vec<(String, Option<i32>, Option<String>, i64)>, sqlx::Error> =
            sqlx::query_as(
                r#"
                SELECT outcome, status_code, error_message, COUNT(*)
                FROM delivery_attempts
                WHERE form_id = $1 AND created_at >= $2 AND created_at < $3
                GROUP BY outcome, status_code, error_message
                "#,
            )
            .bind(form_id)
            .bind(from)
            .bind(to)
            .fetch_all(self.pool())
            .await;
        timer.record();
        rows?
            .into_iter()
            .map(|(outcome, status_code, error_message, count)| {
                Ok(AttemptGroup {
                    outcome: parse_column("outcome", &outcome)?,
                    status_code,
                    error_message,
                    count,
                })
            })
            .collect()
    }

    async fn delete_attempts_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let timer = QueryTimer::new("delete_attempts_before");
        let result = sqlx::query("DELETE FROM delivery_attempts WHERE created_at < $1")
            .bind(cutoff)
            .execute(self.pool())
            .await;
        timer.record();
        Ok(result?.rows_affected())
    }

    async fn claim_due_retries(
        &self,
        now: DateTime<Utc>,
        batch: i64,
        lease: Duration,
    ) -> StoreResult<Vec<RetryTask>> {
        let timer = QueryTimer::new("claim_due_retries");
        let entities = sqlx::query_as::<_, RetryTaskEntity>(&format!(
            r#"
            UPDATE retry_tasks
            SET status = 'processing', lease_expires_at = $2, lease_id = $4, updated_at = $1
            WHERE id IN (
                SELECT id FROM retry_tasks
                WHERE (status = 'pending' AND next_retry_at <= $1)
                   OR (status = 'processing' AND lease_expires_at <= $1)
                ORDER BY next_retry_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            retry_task::COLUMNS
        ))
        .bind(now)
        .bind(now + lease)
        .bind(batch)
        .bind(Uuid::new_v4())
        .fetch_all(self.pool())
        .await;
        timer.record();
        entities?.into_iter().map(TryInto::try_into).collect()
    }

    async fn postpone_retry(
        &self,
        task_id: Uuid,
        lease_id: Uuid,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let timer = QueryTimer::new("postpone_retry");
        let result = sqlx::query(
            r#"
            UPDATE retry_tasks
            SET status = 'pending', next_retry_at = $2, lease_expires_at = NULL,
                lease_id = NULL, updated_at = $3
            WHERE id = $1 AND status = 'processing' AND lease_id = $4
            "#,
        )
        .bind(task_id)
        .bind(next_retry_at)
        .bind(now)
        .bind(lease_id)
        .execute(self.pool())
        .await;
        timer.record();

        if result?.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "retry task {task_id} is no longer held by this claim"
            )));
        }
        Ok(())
    }

    async fn abandon_retry(
        &self,
        task_id: Uuid,
        lease_id: Uuid,
        last_error: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let timer = QueryTimer::new("abandon_retry");
        let result = sqlx::query(
            r#"
            UPDATE retry_tasks
            SET status = 'failed', last_error = $2, lease_expires_at = NULL,
                lease_id = NULL, updated_at = $3
            WHERE id = $1 AND status = 'processing' AND lease_id = $4
            "#,
        )
        .bind(task_id)
        .bind(last_error)
        .bind(now)
        .bind(lease_id)
        .execute(self.pool())
        .await;
        timer.record();

        if result?.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "retry task {task_id} is no longer held by this claim"
            )));
        }
        Ok(())
    }

    async fn release_expired_leases(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let timer = QueryTimer::new("release_expired_leases");
        let result = sqlx::query(
            r#"
            UPDATE retry_tasks
            SET status = 'pending', lease_expires_at = NULL, lease_id = NULL, updated_at = $1
            WHERE status = 'processing'
              AND (lease_expires_at IS NULL OR lease_expires_at <= $1)
            "#,
        )
        .bind(now)
        .execute(self.pool())
        .await;
        timer.record();
        Ok(result?.rows_affected())
    }

    async fn get_retry_task(&self, id: Uuid) -> StoreResult<Option<RetryTask>> {
        let timer = QueryTimer::new("get_retry_task");
        let entity = sqlx::query_as::<_, RetryTaskEntity>(&format!(
            "SELECT {} FROM retry_tasks WHERE id = $1",
            retry_task::COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await;
        timer.record();
        entity?.map(TryInto::try_into).transpose()
    }

    async fn count_queued_retries(&self, form_id: Option<Uuid>) -> StoreResult<i64> {
        let timer = QueryTimer::new("count_queued_retries");
        let row: Result<(i64,), sqlx::Error> = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM retry_tasks
            WHERE status IN ('pending', 'processing')
              AND ($1::uuid IS NULL OR form_id = $1)
            "#,
        )
        .bind(form_id)
        .fetch_one(self.pool())
        .await;
        timer.record();
        Ok(row?.0)
    }
}
