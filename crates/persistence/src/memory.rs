//! In-memory store used by tests and single-process deployments.
//!
//! All state sits behind one lock, so every trait method is atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use domain::models::{
    Alert, AlertType, AnalyticsBucket, AttemptGroup, CircuitBreakerState, DeliveryAttempt,
    DeliveryOutcome, DeliveryQuery, Endpoint, Granularity, HealthRecord, Period, RetryStatus,
    RetryTask, RetryTransition,
};

use crate::error::StoreError;
use crate::store::{
    AnalyticsStore, AttemptCounts, DeliveryStore, EndpointStore, MonitoringStore, StoreHealth,
    StoreResult,
};

#[derive(Default)]
struct State {
    endpoints: HashMap<Uuid, Endpoint>,
    attempts: Vec<DeliveryAttempt>,
    retries: HashMap<Uuid, RetryTask>,
    health: HashMap<Uuid, HealthRecord>,
    alerts: Vec<Alert>,
    breakers: HashMap<Uuid, CircuitBreakerState>,
    buckets: Vec<AnalyticsBucket>,
    watermark: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every retry task, for assertions.
    pub async fn retry_tasks(&self) -> Vec<RetryTask> {
        self.state.read().await.retries.values().cloned().collect()
    }

    /// Every log row in insertion order.
    pub async fn all_attempts(&self) -> Vec<DeliveryAttempt> {
        self.state.read().await.attempts.clone()
    }

    /// Inserts a log row with no queue transition. Test seeding only.
    pub async fn insert_attempt(&self, attempt: DeliveryAttempt) {
        self.state.write().await.attempts.push(attempt);
    }
}

fn apply_transition(
    retries: &mut HashMap<Uuid, RetryTask>,
    transition: &RetryTransition,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    let (task_id, lease_id, status) = match transition {
        RetryTransition::None => return Ok(()),
        RetryTransition::Enqueue(task) => {
            if retries.contains_key(&task.id) {
                return Err(StoreError::Conflict(format!("retry task {} exists", task.id)));
            }
            retries.insert(task.id, task.clone());
            return Ok(());
        }
        RetryTransition::Complete { task_id, lease_id } => {
            (*task_id, *lease_id, RetryStatus::Completed)
        }
        RetryTransition::Reschedule {
            task_id, lease_id, ..
        } => (*task_id, *lease_id, RetryStatus::Pending),
        RetryTransition::Fail {
            task_id, lease_id, ..
        } => (*task_id, *lease_id, RetryStatus::Failed),
    };

    let task = claimed_task(retries, task_id, lease_id)?;

    match transition {
        RetryTransition::Reschedule {
            retry_count,
            next_retry_at,
            last_error,
            ..
        } => {
            task.retry_count = *retry_count;
            task.next_retry_at = *next_retry_at;
            task.last_error = last_error.clone();
        }
        RetryTransition::Fail {
            retry_count,
            last_error,
            ..
        } => {
            task.retry_count = *retry_count;
            task.last_error = last_error.clone();
        }
        _ => {}
    }
    task.status = status;
    task.lease_expires_at = None;
    task.lease_id = None;
    task.updated_at = now;
    Ok(())
}

/// The task, provided `lease_id` is the claim that currently owns it.
fn claimed_task(
    retries: &mut HashMap<Uuid, RetryTask>,
    task_id: Uuid,
    lease_id: Uuid,
) -> StoreResult<&mut RetryTask> {
    let task = retries
        .get_mut(&task_id)
        .ok_or_else(|| StoreError::NotFound(format!("retry task {task_id}")))?;
    if !task.holds_lease(lease_id) {
        return Err(StoreError::Conflict(format!(
            "retry task {task_id} is {} and no longer held by this claim",
            task.status
        )));
    }
    Ok(task)
}

#[async_trait]
impl StoreHealth for InMemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl EndpointStore for InMemoryStore {
    async fn create_endpoint(&self, endpoint: &Endpoint) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.endpoints.contains_key(&endpoint.id) {
            return Err(StoreError::Conflict(format!("endpoint {} exists", endpoint.id)));
        }
        state.endpoints.insert(endpoint.id, endpoint.clone());
        Ok(())
    }

    async fn get_endpoint(&self, id: Uuid) -> StoreResult<Option<Endpoint>> {
        Ok(self.state.read().await.endpoints.get(&id).cloned())
    }

    async fn update_endpoint(&self, endpoint: &Endpoint) -> StoreResult<()> {
        let mut state = self.state.write().await;
        match state.endpoints.get_mut(&endpoint.id) {
            Some(existing) => {
                *existing = endpoint.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("endpoint {}", endpoint.id))),
        }
    }

    async fn delete_endpoint(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let removed = state.endpoints.remove(&id).is_some();
        if removed {
            state.retries.retain(|_, t| t.endpoint_id != id);
            state.health.remove(&id);
            state.breakers.remove(&id);
        }
        Ok(removed)
    }

    async fn list_endpoints_for_form(&self, form_id: Uuid) -> StoreResult<Vec<Endpoint>> {
        let state = self.state.read().await;
        let mut endpoints: Vec<Endpoint> = state
            .endpoints
            .values()
            .filter(|e| e.form_id == form_id)
            .cloned()
            .collect();
        endpoints.sort_by_key(|e| e.created_at);
        Ok(endpoints)
    }

    async fn list_all_endpoints(&self) -> StoreResult<Vec<Endpoint>> {
        let mut endpoints: Vec<Endpoint> =
            self.state.read().await.endpoints.values().cloned().collect();
        endpoints.sort_by_key(|e| e.created_at);
        Ok(endpoints)
    }
}

#[async_trait]
impl DeliveryStore for InMemoryStore {
    async fn record_attempt(
        &self,
        attempt: &DeliveryAttempt,
        transition: &RetryTransition,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let RetryTransition::Enqueue(task) = transition {
            if !state.endpoints.contains_key(&task.endpoint_id) {
                return Err(StoreError::MissingReference(format!(
                    "endpoint {} for retry task {}",
                    task.endpoint_id, task.id
                )));
            }
        }
        apply_transition(&mut state.retries, transition, attempt.created_at)?;
        state.attempts.push(attempt.clone());
        Ok(())
    }

    async fn list_attempts(&self, query: &DeliveryQuery) -> StoreResult<Vec<DeliveryAttempt>> {
        let state = self.state.read().await;
        let mut rows: Vec<DeliveryAttempt> = state
            .attempts
            .iter()
            .filter(|a| query.matches(a))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(query.effective_offset() as usize)
            .take(query.effective_limit() as usize)
            .collect())
    }

    async fn attempts_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<DeliveryAttempt>> {
        let state = self.state.read().await;
        Ok(state
            .attempts
            .iter()
            .filter(|a| a.created_at >= from && a.created_at < to)
            .cloned()
            .collect())
    }

    async fn attempt_counts(
        &self,
        form_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<AttemptCounts> {
        let state = self.state.read().await;
        let mut counts = AttemptCounts::default();
        for a in state
            .attempts
            .iter()
            .filter(|a| a.form_id == form_id && a.created_at >= since)
        {
            counts.total += 1;
            if a.success {
                counts.successful += 1;
            } else {
                counts.failed += 1;
            }
            counts.last_attempt_at = counts.last_attempt_at.max(Some(a.created_at));
        }
        Ok(counts)
    }

    async fn attempt_groups(
        &self,
        form_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<AttemptGroup>> {
        let state = self.state.read().await;
        let mut groups: HashMap<(DeliveryOutcome, Option<i32>, Option<String>), i64> =
            HashMap::new();
        for a in state
            .attempts
            .iter()
            .filter(|a| a.form_id == form_id && a.created_at >= from && a.created_at < to)
        {
            *groups
                .entry((a.outcome, a.status_code, a.error_message.clone()))
                .or_insert(0) += 1;
        }
        Ok(groups
            .into_iter()
            .map(|((outcome, status_code, error_message), count)| AttemptGroup {
                outcome,
                status_code,
                error_message,
                count,
            })
            .collect())
    }

    async fn delete_attempts_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let before = state.attempts.len();
        state.attempts.retain(|a| a.created_at >= cutoff);
        Ok((before - state.attempts.len()) as u64)
    }

    async fn claim_due_retries(
        &self,
        now: DateTime<Utc>,
        batch: i64,
        lease: Duration,
    ) -> StoreResult<Vec<RetryTask>> {
        let mut state = self.state.write().await;
        let mut due: Vec<&mut RetryTask> = state
            .retries
            .values_mut()
            .filter(|t| t.is_claimable(now))
            .collect();
        due.sort_by_key(|t| t.next_retry_at);

        let lease_id = Uuid::new_v4();
        let mut claimed = Vec::new();
        for task in due.into_iter().take(batch.max(0) as usize) {
            task.status = RetryStatus::Processing;
            task.lease_expires_at = Some(now + lease);
            task.lease_id = Some(lease_id);
            task.updated_at = now;
            claimed.push(task.clone());
        }
        Ok(claimed)
    }

    async fn postpone_retry(
        &self,
        task_id: Uuid,
        lease_id: Uuid,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let task = claimed_task(&mut state.retries, task_id, lease_id)?;
        task.status = RetryStatus::Pending;
        task.next_retry_at = next_retry_at;
        task.lease_expires_at = None;
        task.lease_id = None;
        task.updated_at = now;
        Ok(())
    }

    async fn abandon_retry(
        &self,
        task_id: Uuid,
        lease_id: Uuid,
        last_error: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let task = claimed_task(&mut state.retries, task_id, lease_id)?;
        task.status = RetryStatus::Failed;
        task.last_error = Some(last_error.to_string());
        task.lease_expires_at = None;
        task.lease_id = None;
        task.updated_at = now;
        Ok(())
    }

    async fn release_expired_leases(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let mut released = 0;
        for task in state.retries.values_mut() {
            if task.status == RetryStatus::Processing
                && task.lease_expires_at.map_or(true, |l| l <= now)
            {
                task.status = RetryStatus::Pending;
                task.lease_expires_at = None;
                task.lease_id = None;
                task.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn get_retry_task(&self, id: Uuid) -> StoreResult<Option<RetryTask>> {
        Ok(self.state.read().await.retries.get(&id).cloned())
    }

    async fn count_queued_retries(&self, form_id: Option<Uuid>) -> StoreResult<i64> {
        let state = self.state.read().await;
        Ok(state
            .retries
            .values()
            .filter(|t| !t.status.is_terminal())
            .filter(|t| form_id.map_or(true, |f| t.form_id == f))
            .count() as i64)
    }
}

#[async_trait]
impl MonitoringStore for InMemoryStore {
    async fn upsert_health(&self, record: &HealthRecord) -> StoreResult<()> {
        self.state
            .write()
            .await
            .health
            .insert(record.endpoint_id, record.clone());
        Ok(())
    }

    async fn get_health(&self, endpoint_id: Uuid) -> StoreResult<Option<HealthRecord>> {
        Ok(self.state.read().await.health.get(&endpoint_id).cloned())
    }

    async fn list_health_for_form(&self, form_id: Uuid) -> StoreResult<Vec<HealthRecord>> {
        let state = self.state.read().await;
        Ok(state
            .health
            .values()
            .filter(|h| h.form_id == form_id)
            .cloned()
            .collect())
    }

    async fn insert_alert(&self, alert: &Alert) -> StoreResult<()> {
        self.state.write().await.alerts.push(alert.clone());
        Ok(())
    }

    async fn latest_alert(
        &self,
        form_id: Uuid,
        endpoint_id: Option<Uuid>,
        alert_type: AlertType,
    ) -> StoreResult<Option<Alert>> {
        let state = self.state.read().await;
        Ok(state
            .alerts
            .iter()
            .filter(|a| {
                a.form_id == form_id && a.endpoint_id == endpoint_id && a.alert_type == alert_type
            })
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn list_alerts(
        &self,
        form_id: Uuid,
        include_acknowledged: bool,
        limit: i64,
    ) -> StoreResult<Vec<Alert>> {
        let state = self.state.read().await;
        let mut alerts: Vec<Alert> = state
            .alerts
            .iter()
            .filter(|a| a.form_id == form_id && (include_acknowledged || !a.acknowledged))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts.truncate(limit.max(0) as usize);
        Ok(alerts)
    }

    async fn acknowledge_alert(
        &self,
        alert_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Alert>> {
        let mut state = self.state.write().await;
        Ok(state.alerts.iter_mut().find(|a| a.id == alert_id).map(|a| {
            a.acknowledge(now);
            a.clone()
        }))
    }

    async fn save_breaker_states(&self, states: &[CircuitBreakerState]) -> StoreResult<()> {
        let mut state = self.state.write().await;
        for s in states {
            state.breakers.insert(s.endpoint_id, s.clone());
        }
        Ok(())
    }

    async fn load_breaker_states(&self) -> StoreResult<Vec<CircuitBreakerState>> {
        Ok(self.state.read().await.breakers.values().cloned().collect())
    }
}

#[async_trait]
impl AnalyticsStore for InMemoryStore {
    async fn replace_period(
        &self,
        period: Period,
        buckets: &[AnalyticsBucket],
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.buckets.retain(|b| b.key().period != period);
        state.buckets.extend(buckets.iter().cloned());
        Ok(())
    }

    async fn list_buckets(
        &self,
        form_id: Uuid,
        granularity: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<AnalyticsBucket>> {
        let state = self.state.read().await;
        let mut buckets: Vec<AnalyticsBucket> = state
            .buckets
            .iter()
            .filter(|b| b.form_id == form_id && b.granularity == granularity)
            .filter(|b| {
                let start = b.key().period.start();
                start >= from && start < to
            })
            .cloned()
            .collect();
        buckets.sort_by_key(|b| (b.key().period.start(), b.endpoint_id));
        Ok(buckets)
    }

    async fn rollup_watermark(&self) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.state.read().await.watermark)
    }

    async fn set_rollup_watermark(&self, watermark: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.watermark = state.watermark.max(Some(watermark));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::DeliveryOutcome;
    use std::sync::Arc;

    fn attempt(now: DateTime<Utc>) -> DeliveryAttempt {
        DeliveryAttempt {
            id: Uuid::new_v4(),
            delivery_id: 1,
            endpoint_id: Uuid::nil(),
            form_id: Uuid::nil(),
            event_id: Uuid::new_v4(),
            event_type: "form.submitted".into(),
            target_url: "https://example.com".into(),
            attempt_number: 1,
            status_code: Some(503),
            response_time_ms: 12,
            success: false,
            outcome: DeliveryOutcome::RetryableFailure,
            error_message: None,
            response_body: None,
            request_payload: "{}".into(),
            created_at: now,
        }
    }

    fn task(now: DateTime<Utc>) -> RetryTask {
        RetryTask {
            id: Uuid::new_v4(),
            delivery_attempt_id: Uuid::new_v4(),
            delivery_id: 1,
            endpoint_id: Uuid::nil(),
            form_id: Uuid::nil(),
            event_id: Uuid::new_v4(),
            event_type: "form.submitted".into(),
            retry_count: 0,
            max_retries: 3,
            next_retry_at: now,
            lease_expires_at: None,
            lease_id: None,
            payload: "{}".into(),
            status: RetryStatus::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn endpoint(now: DateTime<Utc>) -> Endpoint {
        Endpoint {
            id: Uuid::nil(),
            form_id: Uuid::nil(),
            name: "crm".into(),
            url: "https://example.com".into(),
            secret: "supersecret".into(),
            event_types: vec!["*".into()],
            enabled: true,
            max_retries: None,
            timeout_secs: None,
            failure_threshold: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Store holding the endpoint every test task points at.
    async fn store_with_endpoint(now: DateTime<Utc>) -> InMemoryStore {
        let store = InMemoryStore::new();
        store.create_endpoint(&endpoint(now)).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_concurrent_claims_hand_out_each_task_once() {
        let now = Utc::now();
        let store = Arc::new(store_with_endpoint(now).await);
        for _ in 0..20 {
            store
                .record_attempt(&attempt(now), &RetryTransition::Enqueue(task(now)))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .claim_due_retries(now, 10, Duration::seconds(30))
                    .await
                    .unwrap()
            }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.extend(h.await.unwrap().into_iter().map(|t| t.id));
        }
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(total, 20);
        assert_eq!(ids.len(), 20);
    }

    #[tokio::test]
    async fn test_expired_lease_is_released() {
        let now = Utc::now();
        let store = store_with_endpoint(now).await;
        store
            .record_attempt(&attempt(now), &RetryTransition::Enqueue(task(now)))
            .await
            .unwrap();
        let claimed = store
            .claim_due_retries(now, 10, Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert!(claimed[0].lease_id.is_some());
        assert_eq!(store.release_expired_leases(now).await.unwrap(), 0);
        assert_eq!(
            store
                .release_expired_leases(now + Duration::seconds(31))
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.retry_tasks().await[0].lease_id, None);
    }

    #[tokio::test]
    async fn test_transition_requires_processing() {
        let now = Utc::now();
        let store = store_with_endpoint(now).await;
        let t = task(now);
        let id = t.id;
        store
            .record_attempt(&attempt(now), &RetryTransition::Enqueue(t))
            .await
            .unwrap();

        let err = store
            .record_attempt(
                &attempt(now),
                &RetryTransition::Complete {
                    task_id: id,
                    lease_id: Uuid::new_v4(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.all_attempts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_claim_cannot_settle_reclaimed_task() {
        let now = Utc::now();
        let store = store_with_endpoint(now).await;
        let mut t = task(now);
        t.max_retries = 1;
        let id = t.id;
        store
            .record_attempt(&attempt(now), &RetryTransition::Enqueue(t))
            .await
            .unwrap();

        let first = store
            .claim_due_retries(now, 10, Duration::seconds(30))
            .await
            .unwrap();
        let later = now + Duration::seconds(31);
        let second = store
            .claim_due_retries(later, 10, Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        let stale_lease = first[0].lease_id.unwrap();
        let live_lease = second[0].lease_id.unwrap();
        assert_ne!(stale_lease, live_lease);

        let stale = store
            .record_attempt(
                &attempt(later),
                &RetryTransition::Fail {
                    task_id: id,
                    lease_id: stale_lease,
                    retry_count: 1,
                    last_error: Some("HTTP 503".into()),
                },
            )
            .await;
        assert!(matches!(stale, Err(StoreError::Conflict(_))));
        let postponed = store
            .postpone_retry(id, stale_lease, later + Duration::seconds(5), later)
            .await;
        assert!(matches!(postponed, Err(StoreError::Conflict(_))));
        let abandoned = store
            .abandon_retry(id, stale_lease, "endpoint disabled", later)
            .await;
        assert!(matches!(abandoned, Err(StoreError::Conflict(_))));

        store
            .record_attempt(
                &attempt(later),
                &RetryTransition::Complete {
                    task_id: id,
                    lease_id: live_lease,
                },
            )
            .await
            .unwrap();
        let task = store.get_retry_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, RetryStatus::Completed);
        assert_eq!(task.lease_id, None);
    }

    #[tokio::test]
    async fn test_enqueue_for_missing_endpoint_is_rejected() {
        let now = Utc::now();
        let store = InMemoryStore::new();
        let err = store
            .record_attempt(&attempt(now), &RetryTransition::Enqueue(task(now)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingReference(_)));
        assert!(store.all_attempts().await.is_empty());
        assert!(store.retry_tasks().await.is_empty());

        store
            .record_attempt(&attempt(now), &RetryTransition::None)
            .await
            .unwrap();
        assert_eq!(store.all_attempts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_endpoint_cascades() {
        let now = Utc::now();
        let store = store_with_endpoint(now).await;
        store
            .record_attempt(&attempt(now), &RetryTransition::Enqueue(task(now)))
            .await
            .unwrap();
        assert!(store.delete_endpoint(Uuid::nil()).await.unwrap());
        assert!(store.retry_tasks().await.is_empty());
        assert_eq!(store.all_attempts().await.len(), 1);
    }
}
