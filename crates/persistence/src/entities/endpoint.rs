//! Endpoint entity.

use chrono::{DateTime, Utc};
use domain::models::Endpoint;
use sqlx::FromRow;
use uuid::Uuid;

/// Database entity for the endpoints table.
#[derive(Debug, Clone, FromRow)]
pub struct EndpointEntity {
    pub id: Uuid,
    pub form_id: Uuid,
    pub name: String,
    pub url: String,
    pub secret: String,
    pub event_types: Vec<String>,
    pub enabled: bool,
    pub max_retries: Option<i32>,
    pub timeout_secs: Option<i32>,
    pub failure_threshold: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<EndpointEntity> for Endpoint {
    fn from(entity: EndpointEntity) -> Self {
        Self {
            id: entity.id,
            form_id: entity.form_id,
            name: entity.name,
            url: entity.url,
            secret: entity.secret,
            event_types: entity.event_types,
            enabled: entity.enabled,
            max_retries: entity.max_retries,
            timeout_secs: entity.timeout_secs,
            failure_threshold: entity.failure_threshold,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}
