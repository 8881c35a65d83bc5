//! Background job scheduler and job implementations.

mod analytics_rollup;
mod circuit_snapshot;
mod delivery_log_retention;
mod endpoint_health;
mod pool_metrics;
mod rate_limit_sweep;
mod scheduler;
mod webhook_retry;

pub use analytics_rollup::AnalyticsRollupJob;
pub use circuit_snapshot::{restore_breakers, save_breakers, CircuitSnapshotJob};
pub use delivery_log_retention::DeliveryLogRetentionJob;
pub use endpoint_health::EndpointHealthJob;
pub use pool_metrics::PoolMetricsJob;
pub use rate_limit_sweep::RateLimitSweepJob;
pub use scheduler::{Job, JobFrequency, JobScheduler};
pub use webhook_retry::WebhookRetryJob;
