//! Alert entity.

use chrono::{DateTime, Utc};
use domain::models::Alert;
use sqlx::FromRow;
use uuid::Uuid;

use super::parse_column;
use crate::error::StoreError;

pub const COLUMNS: &str = "id, form_id, endpoint_id, alert_type, severity, message, \
    acknowledged, acknowledged_at, created_at";

/// Database entity for the alerts table.
#[derive(Debug, Clone, FromRow)]
pub struct AlertEntity {
    pub id: Uuid,
    pub form_id: Uuid,
    pub endpoint_id: Option<Uuid>,
    pub alert_type: String,
    pub severity: String,
    pub message: String,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AlertEntity> for Alert {
    type Error = StoreError;

    fn try_from(entity: AlertEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            id: entity.id,
            form_id: entity.form_id,
            endpoint_id: entity.endpoint_id,
            alert_type: parse_column("alert_type", &entity.alert_type)?,
            severity: parse_column("severity", &entity.severity)?,
            message: entity.message,
            acknowledged: entity.acknowledged,
            acknowledged_at: entity.acknowledged_at,
            created_at: entity.created_at,
        })
    }
}
