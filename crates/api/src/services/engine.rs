//! The webhook engine: fan-out, retry outcomes and the operations the HTTP
//! surface exposes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use domain::models::{
    Alert, AlertType, CircuitBreakerState, CircuitState, CreateEndpointRequest, DeliveryAttempt,
    DeliveryIdGenerator, DeliveryOutcome, DeliveryQuery, Endpoint, EventEnvelope, PublishRequest,
    RetryStatus, RetryTask, RetryTransition, UpdateEndpointRequest,
};
use domain::services::RetryPolicy;
use metrics::counter;
use persistence::{Store, StoreError};
use serde::Serialize;
use shared::crypto::generate_secret;
use shared::validation::validate_public_url;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

use super::alerting::AlertService;
use super::circuit_breaker::CircuitBreakerRegistry;
use super::executor::{AttemptRequest, DeliveryExecutor, ExecutedAttempt};
use super::transform::PayloadTransform;
use super::EngineError;
use crate::config::Config;

const GENERATED_SECRET_LEN: usize = 32;
/// Tries for one attempt-row write before the row is given up.
const STORE_WRITE_TRIES: u32 = 3;
const STORE_WRITE_BACKOFF: std::time::Duration = std::time::Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_retries: u32,
    pub worker_pool_size: usize,
    pub max_payload_bytes: usize,
    pub allow_private_urls: bool,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.delivery.max_retries,
            worker_pool_size: config.delivery.worker_pool_size,
            max_payload_bytes: config.delivery.max_payload_bytes,
            allow_private_urls: config.delivery.allow_private_urls,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishReceipt {
    pub event_id: Uuid,
    pub endpoint_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub success: bool,
    pub status_code: Option<i32>,
    pub response_time_ms: i64,
    pub outcome: DeliveryOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub delivery_id: i64,
}

/// Breaker state as seen by the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub endpoint_id: Uuid,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub open_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_reset_at: Option<DateTime<Utc>>,
}

impl CircuitStatus {
    fn observe(state: &CircuitBreakerState, now: DateTime<Utc>) -> Self {
        Self {
            endpoint_id: state.endpoint_id,
            state: state.effective_state(now),
            consecutive_failures: state.consecutive_failures,
            failure_threshold: state.failure_threshold,
            open_count: state.open_count,
            last_failure_at: state.last_failure_at,
            next_reset_at: state.next_reset_at,
        }
    }
}

/// How a claimed retry task was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryResult {
    Completed,
    Rescheduled,
    Failed,
    /// Short-circuited; returned to the queue without using budget.
    Postponed,
    /// The endpoint is gone or disabled.
    Abandoned,
    /// The task could not be settled (lease lost or store failure).
    Skipped,
}

impl RetryResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryResult::Completed => "completed",
            RetryResult::Rescheduled => "rescheduled",
            RetryResult::Failed => "failed",
            RetryResult::Postponed => "postponed",
            RetryResult::Abandoned => "abandoned",
            RetryResult::Skipped => "skipped",
        }
    }
}

/// A rendered delivery waiting for its first attempt.
struct PendingDelivery {
    endpoint: Endpoint,
    event_id: Uuid,
    event_type: String,
    delivery_id: i64,
    payload: String,
    source: Option<String>,
}

pub struct WebhookEngine {
    store: Arc<dyn Store>,
    executor: Arc<DeliveryExecutor>,
    transform: Arc<dyn PayloadTransform>,
    breakers: Arc<CircuitBreakerRegistry>,
    alerts: Arc<AlertService>,
    retry_policy: RetryPolicy,
    delivery_ids: DeliveryIdGenerator,
    workers: Arc<Semaphore>,
    tracker: TaskTracker,
    shutting_down: AtomicBool,
    settings: EngineSettings,
}

impl WebhookEngine {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<DeliveryExecutor>,
        transform: Arc<dyn PayloadTransform>,
        breakers: Arc<CircuitBreakerRegistry>,
        alerts: Arc<AlertService>,
        retry_policy: RetryPolicy,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            executor,
            transform,
            breakers,
            alerts,
            retry_policy,
            delivery_ids: DeliveryIdGenerator::new(),
            workers: Arc::new(Semaphore::new(settings.worker_pool_size.max(1))),
            tracker: TaskTracker::new(),
            shutting_down: AtomicBool::new(false),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Permits bounding concurrent outbound requests, shared with retries.
    pub fn workers(&self) -> &Arc<Semaphore> {
        &self.workers
    }

    // ------------------------------------------------------------------
    // Publish
    // ------------------------------------------------------------------

    /// Schedules delivery of an event to every enabled, subscribed endpoint
    /// of the form. Returns before any request is sent.
    pub async fn publish(
        self: &Arc<Self>,
        request: PublishRequest,
    ) -> Result<PublishReceipt, EngineError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(EngineError::ShuttingDown);
        }
        request.validate()?;

        let size = serde_json::to_vec(&request.data)
            .map_err(|e| EngineError::Validation(format!("data is not serializable: {e}")))?
            .len();
        if size > self.settings.max_payload_bytes {
            return Err(EngineError::PayloadTooLarge {
                size,
                limit: self.settings.max_payload_bytes,
            });
        }

        let envelope = EventEnvelope::new(
            request.event_type.clone(),
            request.form_id,
            request.data,
            Utc::now(),
        );
        let endpoints: Vec<Endpoint> = self
            .store
            .list_endpoints_for_form(request.form_id)
            .await?
            .into_iter()
            .filter(|e| e.accepts(&envelope.event_type))
            .collect();

        let mut scheduled = 0;
        for endpoint in endpoints {
            let payload = match self.transform.render(&endpoint, &envelope) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(
                        endpoint_id = %endpoint.id,
                        event_id = %envelope.id,
                        error = %e,
                        "Failed to render payload"
                    );
                    continue;
                }
            };
            let delivery = PendingDelivery {
                endpoint,
                event_id: envelope.id,
                event_type: envelope.event_type.clone(),
                delivery_id: self.delivery_ids.next_id(),
                payload,
                source: request.source.clone(),
            };

            let engine = Arc::clone(self);
            let workers = Arc::clone(&self.workers);
            self.tracker.spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return;
                };
                engine.deliver(delivery).await;
            });
            scheduled += 1;
        }

        counter!("webhook_events_published_total").increment(1);
        info!(
            event_id = %envelope.id,
            form_id = %envelope.form_id,
            event_type = %envelope.event_type,
            endpoint_count = scheduled,
            "Event published"
        );

        Ok(PublishReceipt {
            event_id: envelope.id,
            endpoint_count: scheduled,
        })
    }

    /// First attempt of a delivery; enqueues a retry task when needed.
    async fn deliver(&self, delivery: PendingDelivery) {
        let executed = self
            .executor
            .attempt(AttemptRequest {
                endpoint: &delivery.endpoint,
                event_id: delivery.event_id,
                event_type: &delivery.event_type,
                delivery_id: delivery.delivery_id,
                attempt_number: 1,
                payload: &delivery.payload,
                source: delivery.source.as_deref(),
            })
            .await;

        let budget = delivery.endpoint.retry_budget(self.settings.max_retries);
        let now = Utc::now();
        let (transition, exhausted) =
            self.initial_transition(&executed, delivery.payload, budget, now);

        let queued = match self.persist(&executed.attempt, &transition).await {
            Ok(queued) => queued,
            Err(e) => {
                error!(
                    endpoint_id = %delivery.endpoint.id,
                    delivery_id = delivery.delivery_id,
                    error = %e,
                    "Failed to record delivery attempt"
                );
                return;
            }
        };
        if !queued {
            return;
        }

        if let RetryTransition::Enqueue(task) = &transition {
            counter!("webhook_retry_tasks_total", "result" => "enqueued").increment(1);
            debug!(
                task_id = %task.id,
                delivery_id = task.delivery_id,
                status = %task.status,
                next_retry_at = %task.next_retry_at,
                "Retry task enqueued"
            );
        }
        if exhausted {
            self.raise_exhausted(&delivery.endpoint, delivery.delivery_id, 0, now)
                .await;
        }
    }

    /// Queue change for a first attempt, and whether it exhausted the budget.
    fn initial_transition(
        &self,
        executed: &ExecutedAttempt,
        payload: String,
        budget: u32,
        now: DateTime<Utc>,
    ) -> (RetryTransition, bool) {
        let attempt = &executed.attempt;
        let max_retries = i32::try_from(budget).unwrap_or(i32::MAX);
        let task = |status: RetryStatus, next_retry_at: DateTime<Utc>| RetryTask {
            id: Uuid::new_v4(),
            delivery_attempt_id: attempt.id,
            delivery_id: attempt.delivery_id,
            endpoint_id: attempt.endpoint_id,
            form_id: attempt.form_id,
            event_id: attempt.event_id,
            event_type: attempt.event_type.clone(),
            retry_count: 0,
            max_retries,
            next_retry_at,
            lease_expires_at: None,
            lease_id: None,
            payload: payload.clone(),
            status,
            last_error: attempt.error_message.clone(),
            created_at: now,
            updated_at: now,
        };

        match attempt.outcome {
            DeliveryOutcome::Success => (RetryTransition::None, false),
            DeliveryOutcome::TerminalFailure => {
                (RetryTransition::Enqueue(task(RetryStatus::Failed, now)), false)
            }
            _ if budget == 0 => (
                RetryTransition::Enqueue(task(RetryStatus::Failed, now)),
                attempt.outcome == DeliveryOutcome::RetryableFailure,
            ),
            DeliveryOutcome::RetryableFailure => {
                let next = now + self.backoff(0);
                (RetryTransition::Enqueue(task(RetryStatus::Pending, next)), false)
            }
            DeliveryOutcome::CircuitOpen | DeliveryOutcome::RateLimited => {
                let next = executed.defer_until.unwrap_or(now).max(now);
                (RetryTransition::Enqueue(task(RetryStatus::Pending, next)), false)
            }
        }
    }

    /// Writes an attempt row with its queue change, retrying transient store
    /// failures with doubling backoff. When the endpoint vanished before a
    /// new task could be inserted, the row is written alone and `Ok(false)`
    /// is returned.
    async fn persist(
        &self,
        attempt: &DeliveryAttempt,
        transition: &RetryTransition,
    ) -> Result<bool, StoreError> {
        let row_only = RetryTransition::None;
        let mut current = transition;
        let mut queued = true;
        let mut tries = 1;
        let mut backoff = STORE_WRITE_BACKOFF;
        loop {
            match self.store.record_attempt(attempt, current).await {
                Ok(()) => return Ok(queued),
                Err(StoreError::MissingReference(what))
                    if matches!(current, RetryTransition::Enqueue(_)) =>
                {
                    warn!(
                        delivery_id = attempt.delivery_id,
                        endpoint_id = %attempt.endpoint_id,
                        missing = %what,
                        "Endpoint removed mid-delivery; logging attempt without retry task"
                    );
                    current = &row_only;
                    queued = false;
                }
                Err(e) if e.is_transient() && tries < STORE_WRITE_TRIES => {
                    warn!(
                        delivery_id = attempt.delivery_id,
                        tries,
                        error = %e,
                        "Attempt write failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    tries += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn backoff(&self, retry_count: u32) -> Duration {
        self.retry_policy.delay_for(retry_count, &mut rand::thread_rng())
    }

    async fn raise_exhausted(
        &self,
        endpoint: &Endpoint,
        delivery_id: i64,
        retries: i32,
        now: DateTime<Utc>,
    ) {
        self.alerts
            .raise_logged(
                endpoint.form_id,
                Some(endpoint.id),
                AlertType::RetryExhausted,
                format!(
                    "Delivery {delivery_id} to {} failed after {retries} retries",
                    endpoint.url
                ),
                now,
            )
            .await;
    }

    // ------------------------------------------------------------------
    // Retries
    // ------------------------------------------------------------------

    /// Re-attempts a claimed retry task and settles it.
    pub async fn retry(&self, task: RetryTask) -> RetryResult {
        let result = self.settle_retry(&task).await;
        counter!("webhook_retry_tasks_total", "result" => result.as_str()).increment(1);
        result
    }

    async fn settle_retry(&self, task: &RetryTask) -> RetryResult {
        let Some(lease_id) = task.lease_id else {
            warn!(task_id = %task.id, "Retry task has no claim; skipping");
            return RetryResult::Skipped;
        };
        let endpoint = match self.store.get_endpoint(task.endpoint_id).await {
            Ok(Some(endpoint)) if endpoint.enabled => endpoint,
            Ok(found) => {
                let reason = if found.is_some() {
                    "endpoint disabled"
                } else {
                    "endpoint not found"
                };
                return match self
                    .store
                    .abandon_retry(task.id, lease_id, reason, Utc::now())
                    .await {
                    Ok(()) => {
                        info!(task_id = %task.id, reason, "Retry task abandoned");
                        RetryResult::Abandoned
                    }
                    Err(e) => self.settle_failed(task, e),
                };
            }
            Err(e) => return self.settle_failed(task, e),
        };

        let executed = self
            .executor
            .attempt(AttemptRequest {
                endpoint: &endpoint,
                event_id: task.event_id,
                event_type: &task.event_type,
                delivery_id: task.delivery_id,
                attempt_number: task.next_attempt_number(),
                payload: &task.payload,
                source: None,
            })
            .await;
        let now = Utc::now();

        if let Some(defer_until) = executed.defer_until {
            let next_retry_at = defer_until.max(now);
            return match self
                .store
                .postpone_retry(task.id, lease_id, next_retry_at, now)
                .await
            {
                Ok(()) => {
                    debug!(
                        task_id = %task.id,
                        delivery_id = task.delivery_id,
                        endpoint_id = %task.endpoint_id,
                        outcome = %executed.attempt.outcome,
                        next_retry_at = %next_retry_at,
                        "Retry short-circuited and postponed"
                    );
                    RetryResult::Postponed
                }
                Err(e) => self.settle_failed(task, e),
            };
        }

        let attempt = &executed.attempt;
        let retry_count = task.retry_count.saturating_add(1);
        let (transition, result) = match attempt.outcome {
            DeliveryOutcome::Success => (
                RetryTransition::Complete {
                    task_id: task.id,
                    lease_id,
                },
                RetryResult::Completed,
            ),
            DeliveryOutcome::RetryableFailure if retry_count < task.max_retries => {
                let delay = self.backoff(u32::try_from(retry_count).unwrap_or(u32::MAX));
                (
                    RetryTransition::Reschedule {
                        task_id: task.id,
                        lease_id,
                        retry_count,
                        next_retry_at: now + delay,
                        last_error: attempt.error_message.clone(),
                    },
                    RetryResult::Rescheduled,
                )
            }
            _ => (
                RetryTransition::Fail {
                    task_id: task.id,
                    lease_id,
                    retry_count,
                    last_error: attempt.error_message.clone(),
                },
                RetryResult::Failed,
            ),
        };

        match self.persist(attempt, &transition).await {
            Ok(_) => {}
            Err(e @ (StoreError::Conflict(_) | StoreError::NotFound(_))) => {
                // The request went out; its row is kept even though the
                // task now belongs to another claim.
                if let Err(log_err) = self.persist(attempt, &RetryTransition::None).await {
                    error!(
                        task_id = %task.id,
                        error = %log_err,
                        "Failed to record attempt of lost retry claim"
                    );
                }
                return self.settle_failed(task, e);
            }
            Err(e) => return self.settle_failed(task, e),
        }

        if result == RetryResult::Failed && attempt.outcome == DeliveryOutcome::RetryableFailure {
            self.raise_exhausted(&endpoint, task.delivery_id, retry_count, now)
                .await;
        }
        result
    }

    fn settle_failed(&self, task: &RetryTask, err: StoreError) -> RetryResult {
        match err {
            StoreError::Conflict(_) => warn!(
                task_id = %task.id,
                error = %err,
                "Retry task lease lost before settling"
            ),
            _ => error!(task_id = %task.id, error = %err, "Failed to settle retry task"),
        }
        RetryResult::Skipped
    }

    // ------------------------------------------------------------------
    // Endpoint test
    // ------------------------------------------------------------------

    /// Sends one synthetic `test` event and records the single attempt.
    /// Skips the retry queue but not the breaker or the rate limiter.
    pub async fn test_endpoint(
        &self,
        form_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<TestResult, EngineError> {
        let endpoint = self.get_endpoint(form_id, endpoint_id).await?;
        let envelope = EventEnvelope::test_event(form_id, endpoint.id, Utc::now());
        let payload = self.transform.render(&endpoint, &envelope)?;
        let delivery_id = self.delivery_ids.next_id();

        let executed = self
            .executor
            .attempt(AttemptRequest {
                endpoint: &endpoint,
                event_id: envelope.id,
                event_type: &envelope.event_type,
                delivery_id,
                attempt_number: 1,
                payload: &payload,
                source: None,
            })
            .await;
        self.persist(&executed.attempt, &RetryTransition::None).await?;

        let attempt = executed.attempt;
        Ok(TestResult {
            success: attempt.success,
            status_code: attempt.status_code,
            response_time_ms: attempt.response_time_ms,
            outcome: attempt.outcome,
            error_message: attempt.error_message,
            delivery_id,
        })
    }

    // ------------------------------------------------------------------
    // Endpoints
    // ------------------------------------------------------------------

    pub async fn create_endpoint(
        &self,
        form_id: Uuid,
        request: CreateEndpointRequest,
    ) -> Result<Endpoint, EngineError> {
        request.validate()?;
        self.check_target(&request.url)?;
        let now = Utc::now();
        let endpoint = Endpoint {
            id: Uuid::new_v4(),
            form_id,
            name: request.name,
            url: request.url,
            secret: request
                .secret
                .unwrap_or_else(|| generate_secret(GENERATED_SECRET_LEN)),
            event_types: request.event_types,
            enabled: request.enabled,
            max_retries: request.max_retries,
            timeout_secs: request.timeout_secs,
            failure_threshold: request.failure_threshold,
            created_at: now,
            updated_at: now,
        };
        self.store.create_endpoint(&endpoint).await?;

        info!(
            endpoint_id = %endpoint.id,
            form_id = %form_id,
            url = %endpoint.url,
            "Endpoint created"
        );
        Ok(endpoint)
    }

    /// Refuses internal targets unless private URLs are allowed.
    fn check_target(&self, url: &str) -> Result<(), EngineError> {
        if self.settings.allow_private_urls {
            return Ok(());
        }
        validate_public_url(url).map_err(|e| {
            EngineError::Validation(
                e.message
                    .map(|m| m.into_owned())
                    .unwrap_or_else(|| format!("url rejected: {}", e.code)),
            )
        })
    }

    pub async fn get_endpoint(
        &self,
        form_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<Endpoint, EngineError> {
        match self.store.get_endpoint(endpoint_id).await? {
            Some(endpoint) if endpoint.form_id == form_id => Ok(endpoint),
            _ => Err(EngineError::NotFound(format!("endpoint {endpoint_id}"))),
        }
    }

    pub async fn list_endpoints(&self, form_id: Uuid) -> Result<Vec<Endpoint>, EngineError> {
        Ok(self.store.list_endpoints_for_form(form_id).await?)
    }

    pub async fn update_endpoint(
        &self,
        form_id: Uuid,
        endpoint_id: Uuid,
        request: UpdateEndpointRequest,
    ) -> Result<Endpoint, EngineError> {
        request.validate()?;
        if let Some(url) = &request.url {
            self.check_target(url)?;
        }
        let mut endpoint = self.get_endpoint(form_id, endpoint_id).await?;
        request.apply(&mut endpoint, Utc::now());
        self.store.update_endpoint(&endpoint).await?;

        info!(endpoint_id = %endpoint.id, form_id = %form_id, "Endpoint updated");
        Ok(endpoint)
    }

    pub async fn delete_endpoint(
        &self,
        form_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<(), EngineError> {
        self.get_endpoint(form_id, endpoint_id).await?;
        if !self.store.delete_endpoint(endpoint_id).await? {
            return Err(EngineError::NotFound(format!("endpoint {endpoint_id}")));
        }
        self.breakers.remove(endpoint_id).await;

        info!(endpoint_id = %endpoint_id, form_id = %form_id, "Endpoint deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dashboard reads
    // ------------------------------------------------------------------

    pub async fn list_deliveries(
        &self,
        query: &DeliveryQuery,
    ) -> Result<Vec<DeliveryAttempt>, EngineError> {
        Ok(self.store.list_attempts(query).await?)
    }

    pub async fn circuit_status(
        &self,
        form_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<CircuitStatus, EngineError> {
        let endpoint = self.get_endpoint(form_id, endpoint_id).await?;
        let now = Utc::now();
        let state = match self.breakers.state(endpoint.id).await {
            Some(state) => state,
            None => CircuitBreakerState::new(endpoint.id, self.threshold_for(&endpoint), now),
        };
        Ok(CircuitStatus::observe(&state, now))
    }

    pub async fn reset_circuit(
        &self,
        form_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<CircuitStatus, EngineError> {
        let endpoint = self.get_endpoint(form_id, endpoint_id).await?;
        let now = Utc::now();
        let state = self
            .breakers
            .reset(endpoint.id, self.threshold_for(&endpoint), now)
            .await;
        info!(endpoint_id = %endpoint.id, "Circuit breaker reset manually");
        Ok(CircuitStatus::observe(&state, now))
    }

    fn threshold_for(&self, endpoint: &Endpoint) -> u32 {
        endpoint.breaker_threshold(self.breakers.policy().failure_threshold)
    }

    pub async fn list_alerts(
        &self,
        form_id: Uuid,
        include_acknowledged: bool,
        limit: i64,
    ) -> Result<Vec<Alert>, EngineError> {
        Ok(self
            .store
            .list_alerts(form_id, include_acknowledged, limit)
            .await?)
    }

    pub async fn acknowledge_alert(&self, alert_id: Uuid) -> Result<Alert, EngineError> {
        self.store
            .acknowledge_alert(alert_id, Utc::now())
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("alert {alert_id}")))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Waits for every delivery spawned so far. New publishes are accepted
    /// again afterwards.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Stops accepting work and waits up to `grace` for in-flight deliveries.
    /// Returns false if deliveries were still running at the deadline.
    pub async fn shutdown(&self, grace: std::time::Duration) -> bool {
        self.shutting_down.store(true, Ordering::Release);
        self.tracker.close();
        let in_flight = self.tracker.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for in-flight deliveries");
        }
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    remaining = self.tracker.len(),
                    "Shutdown grace period elapsed with deliveries in flight"
                );
                false
            }
        }
    }
}
