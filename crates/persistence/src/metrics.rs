//! Store metrics collection.

use metrics::{gauge, histogram};
use sqlx::PgPool;
use std::time::Instant;

/// Queries slower than this are logged.
const SLOW_QUERY_SECS: f64 = 1.0;

/// Record a store query duration.
pub fn record_query_duration(query_name: &'static str, duration_secs: f64) {
    histogram!(
        "webhook_store_query_duration_seconds",
        "query" => query_name
    )
    .record(duration_secs);
}

/// Record connection pool gauges.
///
/// Call this periodically to track pool health.
pub fn record_pool_metrics(pool: &PgPool) {
    let size = pool.size() as usize;
    let idle = pool.num_idle();
    let active = size.saturating_sub(idle);

    gauge!("webhook_store_connections_active").set(active as f64);
    gauge!("webhook_store_connections_idle").set(idle as f64);
    gauge!("webhook_store_connections_total").set(size as f64);
}

/// Times a store operation.
///
/// ```ignore
/// let timer = QueryTimer::new("claim_due_retries");
/// let result = sqlx::query_as::<_, RetryTaskEntity>(...).fetch_all(&pool).await;
/// timer.record();
/// ```
pub struct QueryTimer {
    query_name: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn new(query_name: &'static str) -> Self {
        Self {
            query_name,
            start: Instant::now(),
        }
    }

    pub fn record(self) {
        let elapsed = self.start.elapsed().as_secs_f64();
        if elapsed >= SLOW_QUERY_SECS {
            tracing::warn!(query = self.query_name, elapsed_secs = elapsed, "Slow store query");
        }
        record_query_duration(self.query_name, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_timer_creation() {
        let timer = QueryTimer::new("claim_due_retries");
        assert_eq!(timer.query_name, "claim_due_retries");
    }

    #[test]
    fn test_record_without_recorder_is_noop() {
        QueryTimer::new("list_attempts").record();
    }
}
