//! Alert raising with a per-condition cooldown.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use domain::models::{Alert, AlertType};
use metrics::counter;
use persistence::{Store, StoreError};
use tracing::{debug, warn};
use uuid::Uuid;

pub struct AlertService {
    store: Arc<dyn Store>,
    cooldown: Duration,
}

impl AlertService {
    pub fn new(store: Arc<dyn Store>, cooldown: Duration) -> Self {
        Self { store, cooldown }
    }

    /// Stores a new alert unless the same type was raised for the same
    /// endpoint within the cooldown. Returns the stored alert.
    pub async fn raise(
        &self,
        form_id: Uuid,
        endpoint_id: Option<Uuid>,
        alert_type: AlertType,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>, StoreError> {
        if let Some(last) = self
            .store
            .latest_alert(form_id, endpoint_id, alert_type)
            .await?
        {
            if now - last.created_at < self.cooldown {
                debug!(
                    form_id = %form_id,
                    endpoint_id = ?endpoint_id,
                    alert_type = %alert_type,
                    "Alert suppressed by cooldown"
                );
                return Ok(None);
            }
        }

        let alert = Alert::new(form_id, endpoint_id, alert_type, message, now);
        self.store.insert_alert(&alert).await?;

        counter!("webhook_alerts_total", "type" => alert_type.as_str()).increment(1);
        warn!(
            alert_id = %alert.id,
            form_id = %form_id,
            endpoint_id = ?endpoint_id,
            alert_type = %alert_type,
            severity = alert.severity.as_str(),
            message = %alert.message,
            "Alert raised"
        );
        Ok(Some(alert))
    }

    /// Like [`raise`](Self::raise) but only logs storage failures.
    pub async fn raise_logged(
        &self,
        form_id: Uuid,
        endpoint_id: Option<Uuid>,
        alert_type: AlertType,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        if let Err(e) = self
            .raise(form_id, endpoint_id, alert_type, message, now)
            .await
        {
            warn!(
                form_id = %form_id,
                endpoint_id = ?endpoint_id,
                alert_type = %alert_type,
                error = %e,
                "Failed to store alert"
            );
        }
    }
}
