//! Retry queue polling.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use super::scheduler::{Job, JobFrequency};
use crate::services::RetryScheduler;

pub struct WebhookRetryJob {
    scheduler: Arc<RetryScheduler>,
    poll_interval_secs: u64,
}

impl WebhookRetryJob {
    pub fn new(scheduler: Arc<RetryScheduler>, poll_interval_secs: u64) -> Self {
        Self {
            scheduler,
            poll_interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for WebhookRetryJob {
    fn name(&self) -> &'static str {
        "webhook_retry"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.poll_interval_secs)
    }

    fn run_on_start(&self) -> bool {
        true
    }

    async fn execute(&self) -> Result<(), String> {
        let processed = self
            .scheduler
            .tick(Utc::now())
            .await
            .map_err(|e| format!("Failed to process webhook retries: {e}"))?;

        if processed > 0 {
            info!(processed, "Processed webhook retries");
        }
        Ok(())
    }
}
