//! Periodic endpoint health evaluation.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use super::scheduler::{Job, JobFrequency};
use crate::services::HealthMonitor;

pub struct EndpointHealthJob {
    monitor: Arc<HealthMonitor>,
    interval_secs: u64,
}

impl EndpointHealthJob {
    pub fn new(monitor: Arc<HealthMonitor>, interval_secs: u64) -> Self {
        Self {
            monitor,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for EndpointHealthJob {
    fn name(&self) -> &'static str {
        "endpoint_health"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        let evaluated = self
            .monitor
            .evaluate_all(Utc::now())
            .await
            .map_err(|e| format!("Failed to evaluate endpoint health: {e}"))?;
        debug!(evaluated, "Endpoint health refreshed");
        Ok(())
    }
}
