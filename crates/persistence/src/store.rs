//! Storage traits consumed by the engine.
//!
//! Every trait has a PostgreSQL implementation in [`crate::repositories`]
//! and an in-memory one in [`crate::memory`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use domain::models::{
    Alert, AlertType, AnalyticsBucket, AttemptGroup, CircuitBreakerState, DeliveryAttempt,
    DeliveryQuery, Endpoint, Granularity, HealthRecord, Period, RetryTask, RetryTransition,
};

use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait EndpointStore: Send + Sync {
    async fn create_endpoint(&self, endpoint: &Endpoint) -> StoreResult<()>;

    async fn get_endpoint(&self, id: Uuid) -> StoreResult<Option<Endpoint>>;

    /// Fails with `NotFound` if the endpoint does not exist.
    async fn update_endpoint(&self, endpoint: &Endpoint) -> StoreResult<()>;

    /// Also removes the endpoint's retry tasks, health record and breaker snapshot.
    async fn delete_endpoint(&self, id: Uuid) -> StoreResult<bool>;

    async fn list_endpoints_for_form(&self, form_id: Uuid) -> StoreResult<Vec<Endpoint>>;

    async fn list_all_endpoints(&self) -> StoreResult<Vec<Endpoint>>;
}

/// Totals used for realtime statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptCounts {
    pub total: i64,
    pub successful: i64,
    pub failed: i64,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

/// Delivery log and retry queue.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Appends `attempt` and applies `transition` in one transaction.
    ///
    /// Transitions on an existing task only apply while the task is
    /// `processing`; otherwise nothing is written and `Conflict` is returned.
    async fn record_attempt(
        &self,
        attempt: &DeliveryAttempt,
        transition: &RetryTransition,
    ) -> StoreResult<()>;

    /// Newest first.
    async fn list_attempts(&self, query: &DeliveryQuery) -> StoreResult<Vec<DeliveryAttempt>>;

    /// Attempts in `[from, to)` across all forms, for rollups.
    async fn attempts_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<DeliveryAttempt>>;

    async fn attempt_counts(
        &self,
        form_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<AttemptCounts>;

    /// A form's attempts in `[from, to)` grouped by outcome, status code
    /// and error message.
    async fn attempt_groups(
        &self,
        form_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<AttemptGroup>>;

    async fn delete_attempts_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    /// Moves up to `batch` due tasks to `processing` with a lease ending at
    /// `now + lease` and a fresh `lease_id`. A task is handed to exactly one
    /// caller; once the lease expires a later claim replaces the token.
    async fn claim_due_retries(
        &self,
        now: DateTime<Utc>,
        batch: i64,
        lease: Duration,
    ) -> StoreResult<Vec<RetryTask>>;

    /// Returns a claimed task to `pending` without consuming retry budget.
    /// Fails with `Conflict` unless `lease_id` still owns the task.
    async fn postpone_retry(
        &self,
        task_id: Uuid,
        lease_id: Uuid,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Marks a claimed task `failed` without recording an attempt, for
    /// retries whose endpoint is gone or disabled. Same ownership rule as
    /// `postpone_retry`.
    async fn abandon_retry(
        &self,
        task_id: Uuid,
        lease_id: Uuid,
        last_error: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Returns `processing` tasks with an expired lease to `pending`.
    async fn release_expired_leases(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    async fn get_retry_task(&self, id: Uuid) -> StoreResult<Option<RetryTask>>;

    /// Pending and processing tasks, optionally for one form.
    async fn count_queued_retries(&self, form_id: Option<Uuid>) -> StoreResult<i64>;
}

/// Health records, alerts and breaker snapshots.
#[async_trait]
pub trait MonitoringStore: Send + Sync {
    async fn upsert_health(&self, record: &HealthRecord) -> StoreResult<()>;

    async fn get_health(&self, endpoint_id: Uuid) -> StoreResult<Option<HealthRecord>>;

    async fn list_health_for_form(&self, form_id: Uuid) -> StoreResult<Vec<HealthRecord>>;

    async fn insert_alert(&self, alert: &Alert) -> StoreResult<()>;

    /// Most recent alert of a type for an endpoint, for cooldowns.
    async fn latest_alert(
        &self,
        form_id: Uuid,
        endpoint_id: Option<Uuid>,
        alert_type: AlertType,
    ) -> StoreResult<Option<Alert>>;

    /// Newest first.
    async fn list_alerts(
        &self,
        form_id: Uuid,
        include_acknowledged: bool,
        limit: i64,
    ) -> StoreResult<Vec<Alert>>;

    async fn acknowledge_alert(
        &self,
        alert_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Alert>>;

    async fn save_breaker_states(&self, states: &[CircuitBreakerState]) -> StoreResult<()>;

    async fn load_breaker_states(&self) -> StoreResult<Vec<CircuitBreakerState>>;
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Replaces every bucket of `period` with `buckets` in one transaction.
    async fn replace_period(&self, period: Period, buckets: &[AnalyticsBucket])
        -> StoreResult<()>;

    /// Buckets whose period starts in `[from, to)`, oldest first.
    async fn list_buckets(
        &self,
        form_id: Uuid,
        granularity: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<AnalyticsBucket>>;

    /// End of the last hour whose buckets are final.
    async fn rollup_watermark(&self) -> StoreResult<Option<DateTime<Utc>>>;

    async fn set_rollup_watermark(&self, watermark: DateTime<Utc>) -> StoreResult<()>;
}

/// Connectivity probe for readiness checks.
#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;
}

/// Everything the engine needs from storage.
pub trait Store:
    EndpointStore + DeliveryStore + MonitoringStore + AnalyticsStore + StoreHealth
{
}

impl<T> Store for T where
    T: EndpointStore + DeliveryStore + MonitoringStore + AnalyticsStore + StoreHealth
{
}
