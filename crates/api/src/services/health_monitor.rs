//! Rolling endpoint health derived from the delivery log.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use domain::models::health::failures_since;
use domain::models::{AlertType, DeliveryQuery, Endpoint, HealthPolicy, HealthRecord, HealthStatus};
use persistence::{Store, StoreError};
use tracing::{debug, warn};

use super::alerting::AlertService;
use crate::config::Config;

#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub window: Duration,
    pub max_samples: i64,
    pub burst_threshold: usize,
    pub burst_window: Duration,
}

impl HealthSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window: Duration::minutes(config.health.window_minutes),
            max_samples: config.health.max_samples,
            burst_threshold: config.health.failure_burst_threshold,
            burst_window: Duration::seconds(config.health.failure_burst_window_secs),
        }
    }
}

pub struct HealthMonitor {
    store: Arc<dyn Store>,
    alerts: Arc<AlertService>,
    policy: HealthPolicy,
    settings: HealthSettings,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn Store>,
        alerts: Arc<AlertService>,
        policy: HealthPolicy,
        settings: HealthSettings,
    ) -> Self {
        Self {
            store,
            alerts,
            policy,
            settings,
        }
    }

    /// Re-evaluates every endpoint. Returns how many were updated.
    pub async fn evaluate_all(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let endpoints = self.store.list_all_endpoints().await?;
        let mut updated = 0;
        for endpoint in &endpoints {
            match self.evaluate_endpoint(endpoint, now).await {
                Ok(_) => updated += 1,
                Err(e) => warn!(
                    endpoint_id = %endpoint.id,
                    error = %e,
                    "Failed to evaluate endpoint health"
                ),
            }
        }
        Ok(updated)
    }

    pub async fn evaluate_endpoint(
        &self,
        endpoint: &Endpoint,
        now: DateTime<Utc>,
    ) -> Result<HealthRecord, StoreError> {
        let query = DeliveryQuery {
            endpoint_id: Some(endpoint.id),
            physical_only: true,
            since: Some(now - self.settings.window),
            limit: Some(self.settings.max_samples),
            ..Default::default()
        };
        let attempts = self.store.list_attempts(&query).await?;
        let previous = self.store.get_health(endpoint.id).await?;

        let record =
            HealthRecord::evaluate(endpoint.id, endpoint.form_id, &attempts, &self.policy, now);
        self.store.upsert_health(&record).await?;
        debug!(
            endpoint_id = %endpoint.id,
            status = %record.status,
            success_rate = record.success_rate,
            sample_size = record.sample_size,
            "Endpoint health evaluated"
        );

        let was_unhealthy = previous.is_some_and(|p| p.status == HealthStatus::Unhealthy);
        if record.status == HealthStatus::Unhealthy && !was_unhealthy {
            self.alerts
                .raise_logged(
                    endpoint.form_id,
                    Some(endpoint.id),
                    AlertType::HighFailureRate,
                    format!(
                        "Success rate for {} dropped to {:.1}% over the last {} attempts",
                        endpoint.url,
                        record.success_rate * 100.0,
                        record.sample_size
                    ),
                    now,
                )
                .await;
        }

        let burst = failures_since(&attempts, now - self.settings.burst_window);
        if self.settings.burst_threshold > 0 && burst >= self.settings.burst_threshold {
            self.alerts
                .raise_logged(
                    endpoint.form_id,
                    Some(endpoint.id),
                    AlertType::FailureBurst,
                    format!(
                        "{burst} failed deliveries to {} in the last {} seconds",
                        endpoint.url,
                        self.settings.burst_window.num_seconds()
                    ),
                    now,
                )
                .await;
        }

        Ok(record)
    }

    pub async fn form_health(&self, form_id: uuid::Uuid) -> Result<Vec<HealthRecord>, StoreError> {
        self.store.list_health_for_form(form_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::{DeliveryAttempt, DeliveryOutcome};
    use persistence::{EndpointStore, InMemoryStore, MonitoringStore};
    use uuid::Uuid;

    fn endpoint() -> Endpoint {
        let now = Utc::now();
        Endpoint {
            id: Uuid::new_v4(),
            form_id: Uuid::new_v4(),
            name: "crm".into(),
            url: "https://example.com/hook".into(),
            secret: "s3cret-value".into(),
            event_types: vec!["*".into()],
            enabled: true,
            max_retries: None,
            timeout_secs: None,
            failure_threshold: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn attempt(endpoint: &Endpoint, success: bool, at: DateTime<Utc>) -> DeliveryAttempt {
        DeliveryAttempt {
            id: Uuid::new_v4(),
            delivery_id: 1,
            endpoint_id: endpoint.id,
            form_id: endpoint.form_id,
            event_id: Uuid::new_v4(),
            event_type: "form.submitted".into(),
            target_url: endpoint.url.clone(),
            attempt_number: 1,
            status_code: Some(if success { 200 } else { 500 }),
            response_time_ms: 100,
            success,
            outcome: if success {
                DeliveryOutcome::Success
            } else {
                DeliveryOutcome::RetryableFailure
            },
            error_message: None,
            response_body: None,
            request_payload: "{}".into(),
            created_at: at,
        }
    }

    fn monitor(store: Arc<InMemoryStore>) -> HealthMonitor {
        let store: Arc<dyn Store> = store;
        HealthMonitor::new(
            store.clone(),
            Arc::new(AlertService::new(store, Duration::hours(1))),
            HealthPolicy {
                min_samples: 4,
                unhealthy_threshold: 0.5,
            },
            HealthSettings {
                window: Duration::hours(1),
                max_samples: 200,
                burst_threshold: 0,
                burst_window: Duration::minutes(5),
            },
        )
    }

    #[tokio::test]
    async fn test_unknown_with_too_few_samples() {
        let store = Arc::new(InMemoryStore::new());
        let endpoint = endpoint();
        store.create_endpoint(&endpoint).await.unwrap();
        let now = Utc::now();
        store.insert_attempt(attempt(&endpoint, false, now)).await;

        let record = monitor(store).evaluate_endpoint(&endpoint, now).await.unwrap();
        assert_eq!(record.status, HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn test_transition_to_unhealthy_alerts_once() {
        let store = Arc::new(InMemoryStore::new());
        let endpoint = endpoint();
        store.create_endpoint(&endpoint).await.unwrap();
        let now = Utc::now();
        for i in 0..5 {
            let at = now - Duration::minutes(i);
            store.insert_attempt(attempt(&endpoint, i == 0, at)).await;
        }

        let monitor = monitor(store.clone());
        let record = monitor.evaluate_endpoint(&endpoint, now).await.unwrap();
        assert_eq!(record.status, HealthStatus::Unhealthy);
        assert!((record.success_rate - 0.2).abs() < 1e-9);

        monitor.evaluate_endpoint(&endpoint, now).await.unwrap();
        let alerts = store.list_alerts(endpoint.form_id, true, 10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::HighFailureRate);
    }

    #[tokio::test]
    async fn test_attempts_outside_window_are_ignored() {
        let store = Arc::new(InMemoryStore::new());
        let endpoint = endpoint();
        store.create_endpoint(&endpoint).await.unwrap();
        let now = Utc::now();
        for _ in 0..5 {
            store
                .insert_attempt(attempt(&endpoint, false, now - Duration::hours(2)))
                .await;
        }
        for _ in 0..4 {
            store.insert_attempt(attempt(&endpoint, true, now)).await;
        }

        let record = monitor(store).evaluate_endpoint(&endpoint, now).await.unwrap();
        assert_eq!(record.status, HealthStatus::Healthy);
        assert_eq!(record.sample_size, 4);
    }

    #[tokio::test]
    async fn test_failure_burst_alert() {
        let store = Arc::new(InMemoryStore::new());
        let endpoint = endpoint();
        store.create_endpoint(&endpoint).await.unwrap();
        let now = Utc::now();
        for _ in 0..3 {
            store.insert_attempt(attempt(&endpoint, false, now)).await;
        }

        let mut monitor = monitor(store.clone());
        monitor.settings.burst_threshold = 3;
        monitor.evaluate_endpoint(&endpoint, now).await.unwrap();

        let alerts = store.list_alerts(endpoint.form_id, true, 10).await.unwrap();
        assert!(alerts.iter().any(|a| a.alert_type == AlertType::FailureBurst));
    }

    #[tokio::test]
    async fn test_short_circuited_rows_do_not_crowd_out_samples() {
        let store = Arc::new(InMemoryStore::new());
        let endpoint = endpoint();
        store.create_endpoint(&endpoint).await.unwrap();
        let now = Utc::now();
        for _ in 0..4 {
            store
                .insert_attempt(attempt(&endpoint, true, now - Duration::minutes(10)))
                .await;
        }
        for _ in 0..10 {
            let mut rejected = attempt(&endpoint, false, now);
            rejected.status_code = None;
            rejected.outcome = DeliveryOutcome::CircuitOpen;
            store.insert_attempt(rejected).await;
        }

        let mut monitor = monitor(store);
        monitor.settings.max_samples = 5;
        let record = monitor.evaluate_endpoint(&endpoint, now).await.unwrap();
        assert_eq!(record.status, HealthStatus::Healthy);
        assert_eq!(record.sample_size, 4);
    }
}
