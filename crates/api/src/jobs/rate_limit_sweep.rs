//! Drops rate-limit state that can no longer deny anything.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use super::scheduler::{Job, JobFrequency};
use crate::middleware::ApiRateLimiter;
use crate::services::DeliveryRateLimiter;

pub struct RateLimitSweepJob {
    delivery: Arc<DeliveryRateLimiter>,
    api: Option<Arc<ApiRateLimiter>>,
    interval_secs: u64,
}

impl RateLimitSweepJob {
    pub fn new(
        delivery: Arc<DeliveryRateLimiter>,
        api: Option<Arc<ApiRateLimiter>>,
        interval_secs: u64,
    ) -> Self {
        Self {
            delivery,
            api,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for RateLimitSweepJob {
    fn name(&self) -> &'static str {
        "rate_limit_sweep"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        let windows = self.delivery.sweep(Utc::now()).await;
        let clients = self.api.as_ref().map_or(0, |api| api.sweep());
        debug!(windows, clients, "Swept rate limit state");
        Ok(())
    }
}
