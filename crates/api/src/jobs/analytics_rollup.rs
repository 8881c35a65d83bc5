//! Hourly and daily analytics rollup.

use std::sync::Arc;

use chrono::Utc;

use super::scheduler::{Job, JobFrequency};
use crate::services::AnalyticsAggregator;

pub struct AnalyticsRollupJob {
    aggregator: Arc<AnalyticsAggregator>,
    interval_secs: u64,
}

impl AnalyticsRollupJob {
    pub fn new(aggregator: Arc<AnalyticsAggregator>, interval_secs: u64) -> Self {
        Self {
            aggregator,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for AnalyticsRollupJob {
    fn name(&self) -> &'static str {
        "analytics_rollup"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    /// Catches up on anything missed while the service was down.
    fn run_on_start(&self) -> bool {
        true
    }

    async fn execute(&self) -> Result<(), String> {
        self.aggregator
            .run(Utc::now())
            .await
            .map(|_| ())
            .map_err(|e| format!("Failed to roll up analytics: {e}"))
    }
}
