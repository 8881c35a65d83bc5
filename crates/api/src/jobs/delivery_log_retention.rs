//! Delivery log retention.
//!
//! Attempt rows are deleted once they are older than the retention period,
//! but never before the analytics rollup has consumed them.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use persistence::{Store, StoreError};
use tracing::{debug, info};

use super::scheduler::{Job, JobFrequency};

pub struct DeliveryLogRetentionJob {
    store: Arc<dyn Store>,
    retention: Duration,
    interval_secs: u64,
}

impl DeliveryLogRetentionJob {
    pub fn new(store: Arc<dyn Store>, retention_days: i64, interval_secs: u64) -> Self {
        Self {
            store,
            retention: Duration::days(retention_days.max(1)),
            interval_secs,
        }
    }

    /// Deletes expired rows. Returns the number deleted.
    pub async fn purge(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let Some(watermark) = self.store.rollup_watermark().await? else {
            debug!("No rollup watermark yet, skipping delivery log retention");
            return Ok(0);
        };
        let cutoff = (now - self.retention).min(watermark);
        let deleted = self.store.delete_attempts_before(cutoff).await?;
        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "Deleted expired delivery attempts");
        }
        Ok(deleted)
    }
}

#[async_trait::async_trait]
impl Job for DeliveryLogRetentionJob {
    fn name(&self) -> &'static str {
        "delivery_log_retention"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        self.purge(Utc::now())
            .await
            .map(|_| ())
            .map_err(|e| format!("Failed to purge delivery log: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::{DeliveryAttempt, DeliveryOutcome};
    use persistence::{AnalyticsStore, InMemoryStore};
    use uuid::Uuid;

    fn attempt(at: DateTime<Utc>) -> DeliveryAttempt {
        DeliveryAttempt {
            id: Uuid::new_v4(),
            delivery_id: 1,
            endpoint_id: Uuid::new_v4(),
            form_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            event_type: "form.submitted".into(),
            target_url: "https://example.com/hook".into(),
            attempt_number: 1,
            status_code: Some(200),
            response_time_ms: 12,
            success: true,
            outcome: DeliveryOutcome::Success,
            error_message: None,
            response_body: None,
            request_payload: "{}".into(),
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_skips_without_watermark() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        store.insert_attempt(attempt(now - Duration::days(200))).await;

        let job = DeliveryLogRetentionJob::new(store.clone(), 90, 3600);
        assert_eq!(job.purge(now).await.unwrap(), 0);
        assert_eq!(store.all_attempts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_deletes_expired_rows() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        store.insert_attempt(attempt(now - Duration::days(100))).await;
        store.insert_attempt(attempt(now - Duration::days(10))).await;
        store.set_rollup_watermark(now).await.unwrap();

        let job = DeliveryLogRetentionJob::new(store.clone(), 90, 3600);
        assert_eq!(job.purge(now).await.unwrap(), 1);
        assert_eq!(store.all_attempts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_never_deletes_past_watermark() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        store.insert_attempt(attempt(now - Duration::days(100))).await;
        store
            .set_rollup_watermark(now - Duration::days(120))
            .await
            .unwrap();

        let job = DeliveryLogRetentionJob::new(store.clone(), 90, 3600);
        assert_eq!(job.purge(now).await.unwrap(), 0);
    }
}
