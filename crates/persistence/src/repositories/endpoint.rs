//! Endpoint queries.

use async_trait::async_trait;
use domain::models::Endpoint;
use uuid::Uuid;

use super::PgStore;
use crate::entities::EndpointEntity;
use crate::error::StoreError;
use crate::metrics::QueryTimer;
use crate::store::{EndpointStore, StoreResult};

const SELECT_ENDPOINT: &str = r#"
    SELECT id, form_id, name, url, secret, event_types, enabled, max_retries,
           timeout_secs, failure_threshold, created_at, updated_at
    FROM endpoints
"#;

#[async_trait]
impl EndpointStore for PgStore {
    async fn create_endpoint(&self, endpoint: &Endpoint) -> StoreResult<()> {
        let timer = QueryTimer::new("create_endpoint");
        let result = sqlx::query(
            r#"
            INSERT INTO endpoints (id, form_id, name, url, secret, event_types, enabled,
                                   max_retries, timeout_secs, failure_threshold,
                                   created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(endpoint.id)
        .bind(endpoint.form_id)
        .bind(&endpoint.name)
        .bind(&endpoint.url)
        .bind(&endpoint.secret)
        .bind(&endpoint.event_types)
        .bind(endpoint.enabled)
        .bind(endpoint.max_retries)
        .bind(endpoint.timeout_secs)
        .bind(endpoint.failure_threshold)
        .bind(endpoint.created_at)
        .bind(endpoint.updated_at)
        .execute(self.pool())
        .await;
        timer.record();

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                StoreError::Conflict(format!("endpoint {} exists", endpoint.id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_endpoint(&self, id: Uuid) -> StoreResult<Option<Endpoint>> {
        let timer = QueryTimer::new("get_endpoint");
        let entity = sqlx::query_as::<_, EndpointEntity>(&format!("{SELECT_ENDPOINT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await;
        timer.record();
        Ok(entity?.map(Into::into))
    }

    async fn update_endpoint(&self, endpoint: &Endpoint) -> StoreResult<()> {
        let timer = QueryTimer::new("update_endpoint");
        let result = sqlx::query(
            r#"
            UPDATE endpoints
            SET name = $2,
                url = $3,
                secret = $4,
                event_types = $5,
                enabled = $6,
                max_retries = $7,
                timeout_secs = $8,
                failure_threshold = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(endpoint.id)
        .bind(&endpoint.name)
        .bind(&endpoint.url)
        .bind(&endpoint.secret)
        .bind(&endpoint.event_types)
        .bind(endpoint.enabled)
        .bind(endpoint.max_retries)
        .bind(endpoint.timeout_secs)
        .bind(endpoint.failure_threshold)
        .bind(endpoint.updated_at)
        .execute(self.pool())
        .await;
        timer.record();

        if result?.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("endpoint {}", endpoint.id)));
        }
        Ok(())
    }

    async fn delete_endpoint(&self, id: Uuid) -> StoreResult<bool> {
        let timer = QueryTimer::new("delete_endpoint");
        let result = sqlx::query("DELETE FROM endpoints WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await;
        timer.record();
        Ok(result?.rows_affected() > 0)
    }

    async fn list_endpoints_for_form(&self, form_id: Uuid) -> StoreResult<Vec<Endpoint>> {
        let timer = QueryTimer::new("list_endpoints_for_form");
        let entities = sqlx::query_as::<_, EndpointEntity>(&format!(
            "{SELECT_ENDPOINT} WHERE form_id = $1 ORDER BY created_at"
        ))
        .bind(form_id)
        .fetch_all(self.pool())
        .await;
        timer.record();
        Ok(entities?.into_iter().map(Into::into).collect())
    }

    async fn list_all_endpoints(&self) -> StoreResult<Vec<Endpoint>> {
        let timer = QueryTimer::new("list_all_endpoints");
        let entities =
            sqlx::query_as::<_, EndpointEntity>(&format!("{SELECT_ENDPOINT} ORDER BY created_at"))
                .fetch_all(self.pool())
                .await;
        timer.record();
        Ok(entities?.into_iter().map(Into::into).collect())
    }
}
