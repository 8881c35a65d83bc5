//! Hourly and daily rollups of the delivery log.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use domain::models::{
    AnalyticsBucket, BucketKey, DeliveryAttempt, ErrorBreakdown, Granularity, Period,
    RealtimeStats,
};
use persistence::{Store, StoreError};
use tracing::{debug, info};
use uuid::Uuid;

use super::EngineError;

/// Rolled-up periods from one aggregation run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RollupSummary {
    pub hourly_periods: usize,
    pub daily_periods: usize,
    pub buckets: usize,
}

pub struct AnalyticsAggregator {
    store: Arc<dyn Store>,
    backfill: Duration,
}

impl AnalyticsAggregator {
    pub fn new(store: Arc<dyn Store>, backfill: Duration) -> Self {
        Self { store, backfill }
    }

    /// Recomputes every bucket of `period` from the log. Idempotent.
    pub async fn rollup_period(&self, period: Period) -> Result<usize, StoreError> {
        let attempts = self
            .store
            .attempts_in_range(period.start(), period.end())
            .await?;

        let mut groups: BTreeMap<(Uuid, Uuid), Vec<DeliveryAttempt>> = BTreeMap::new();
        for attempt in attempts {
            groups
                .entry((attempt.form_id, attempt.endpoint_id))
                .or_default()
                .push(attempt);
        }

        let buckets: Vec<AnalyticsBucket> = groups
            .into_iter()
            .map(|((form_id, endpoint_id), rows)| {
                let key = BucketKey {
                    form_id,
                    endpoint_id,
                    period,
                };
                AnalyticsBucket::from_attempts(key, &rows)
            })
            .collect();

        self.store.replace_period(period, &buckets).await?;
        Ok(buckets.len())
    }

    /// Rolls up everything from the watermark (or the backfill horizon) to
    /// the current hour. The previous hour and day are always recomputed so
    /// late-written attempts are picked up.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RollupSummary, StoreError> {
        let current_hour = Granularity::Hourly.period_containing(now);
        let start = self
            .store
            .rollup_watermark()
            .await?
            .unwrap_or(now - self.backfill)
            .min(current_hour.previous().start());

        let mut summary = RollupSummary::default();

        let mut hour = Granularity::Hourly.period_containing(start);
        while hour.start() <= current_hour.start() {
            summary.buckets += self.rollup_period(hour).await?;
            summary.hourly_periods += 1;
            hour = hour.next();
        }

        let today = Granularity::Daily.period_containing(now);
        let mut day = Granularity::Daily.period_containing(start);
        while day.start() <= today.start() {
            summary.buckets += self.rollup_period(day).await?;
            summary.daily_periods += 1;
            day = day.next();
        }

        self.store.set_rollup_watermark(current_hour.start()).await?;

        if summary.hourly_periods > 2 {
            info!(
                hourly_periods = summary.hourly_periods,
                daily_periods = summary.daily_periods,
                buckets = summary.buckets,
                "Analytics caught up"
            );
        } else {
            debug!(buckets = summary.buckets, "Analytics rolled up");
        }
        Ok(summary)
    }

    pub async fn get_analytics(
        &self,
        form_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<AnalyticsBucket>, EngineError> {
        if from >= to {
            return Err(EngineError::Validation(
                "`from` must be earlier than `to`".to_string(),
            ));
        }
        Ok(self
            .store
            .list_buckets(form_id, granularity, from, to)
            .await?)
    }

    /// Failure categories, response codes and the most frequent error
    /// messages, read straight from the log.
    pub async fn error_breakdown(
        &self,
        form_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ErrorBreakdown, EngineError> {
        if from >= to {
            return Err(EngineError::Validation(
                "`from` must be earlier than `to`".to_string(),
            ));
        }
        let groups = self.store.attempt_groups(form_id, from, to).await?;
        Ok(ErrorBreakdown::from_groups(form_id, from, to, &groups))
    }

    /// Live counters over the last 24 hours plus the current retry backlog.
    pub async fn realtime_stats(
        &self,
        form_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RealtimeStats, StoreError> {
        let counts = self
            .store
            .attempt_counts(form_id, now - Duration::hours(24))
            .await?;
        let queue_size = self.store.count_queued_retries(Some(form_id)).await?;
        let success_rate = if counts.total == 0 {
            0.0
        } else {
            counts.successful as f64 / counts.total as f64 * 100.0
        };

        Ok(RealtimeStats {
            form_id,
            total_requests: counts.total,
            successful_requests: counts.successful,
            failed_requests: counts.failed,
            success_rate,
            last_request_at: counts.last_attempt_at,
            queue_size,
            timestamp: now,
        })
    }
}
