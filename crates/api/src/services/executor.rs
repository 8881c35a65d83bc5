//! Single delivery attempts.
//!
//! The executor gates each attempt through the endpoint's circuit breaker
//! and the rate limiter, sends the signed request, classifies the result and
//! reports it back to the breaker. It builds the log row but never writes
//! it; callers commit the row together with the retry-queue change.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use domain::models::delivery::truncate_utf8;
use domain::models::{
    Admission, AlertType, CircuitState, DeliveryAttempt, DeliveryOutcome, Endpoint, RateLimitKey,
    RateLimitRule,
};
use metrics::{counter, histogram};
use shared::crypto::sign_payload;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::alerting::AlertService;
use super::circuit_breaker::CircuitBreakerRegistry;
use super::rate_limiter::{DeliveryRateLimiter, RateDecision};
use super::transport::{OutboundRequest, TransportError, WebhookTransport};
use crate::config::Config;

pub const HEADER_EVENT: &str = "X-Webhook-Event";
pub const HEADER_DELIVERY: &str = "X-Webhook-Delivery";
pub const HEADER_ATTEMPT: &str = "X-Webhook-Attempt";
pub const HEADER_TIMESTAMP: &str = "X-Webhook-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub default_timeout_secs: u64,
    pub default_failure_threshold: u32,
    pub user_agent: String,
    pub response_body_limit: usize,
    pub rate_window: Duration,
    pub endpoint_limit: u32,
    pub form_limit: Option<u32>,
    pub source_limit: Option<u32>,
}

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_timeout_secs: config.delivery.timeout_secs,
            default_failure_threshold: config.circuit_breaker.failure_threshold,
            user_agent: config.delivery.user_agent.clone(),
            response_body_limit: config.delivery.response_body_limit,
            rate_window: Duration::seconds(
                i64::try_from(config.rate_limit.window_secs).unwrap_or(i64::MAX / 1000),
            ),
            endpoint_limit: config.rate_limit.endpoint_limit,
            form_limit: config.rate_limit.form_limit,
            source_limit: config.rate_limit.source_limit,
        }
    }
}

/// What to send and how to label it.
#[derive(Debug, Clone, Copy)]
pub struct AttemptRequest<'a> {
    pub endpoint: &'a Endpoint,
    pub event_id: Uuid,
    pub event_type: &'a str,
    pub delivery_id: i64,
    pub attempt_number: i32,
    pub payload: &'a str,
    pub source: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct ExecutedAttempt {
    pub attempt: DeliveryAttempt,
    /// Set for short-circuited attempts: the earliest time a retry can pass.
    pub defer_until: Option<DateTime<Utc>>,
}

/// Hands an admitted half-open slot back to its breaker when the attempt
/// is dropped before reporting an outcome (request timeout, client gone).
struct HalfOpenGuard {
    breakers: Arc<CircuitBreakerRegistry>,
    endpoint_id: Uuid,
    armed: bool,
}

impl HalfOpenGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for HalfOpenGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let breakers = Arc::clone(&self.breakers);
        let endpoint_id = self.endpoint_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    breakers.release_probe(endpoint_id, Utc::now()).await;
                    debug!(endpoint_id = %endpoint_id, "Abandoned half-open slot released");
                });
            }
            // No runtime left; the half-open deadline frees the breaker instead.
            Err(_) => warn!(endpoint_id = %endpoint_id, "Half-open attempt dropped during shutdown"),
        }
    }
}

pub struct DeliveryExecutor {
    transport: Arc<dyn WebhookTransport>,
    breakers: Arc<CircuitBreakerRegistry>,
    limiter: Arc<DeliveryRateLimiter>,
    alerts: Arc<AlertService>,
    settings: ExecutorSettings,
}

impl DeliveryExecutor {
    pub fn new(
        transport: Arc<dyn WebhookTransport>,
        breakers: Arc<CircuitBreakerRegistry>,
        limiter: Arc<DeliveryRateLimiter>,
        alerts: Arc<AlertService>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            transport,
            breakers,
            limiter,
            alerts,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub async fn attempt(&self, request: AttemptRequest<'_>) -> ExecutedAttempt {
        let endpoint = request.endpoint;
        let now = Utc::now();
        let threshold = endpoint.breaker_threshold(self.settings.default_failure_threshold);

        let admission = self.breakers.admit(endpoint.id, threshold, now).await;
        if let Admission::Rejected { retry_at } = admission {
            return self.short_circuit(
                &request,
                DeliveryOutcome::CircuitOpen,
                format!("circuit open until {}", retry_at.to_rfc3339()),
                retry_at,
                now,
            );
        }
        let mut half_open = (admission == Admission::Probe).then(|| HalfOpenGuard {
            breakers: Arc::clone(&self.breakers),
            endpoint_id: endpoint.id,
            armed: true,
        });

        let rules = self.rules_for(endpoint, request.source);
        let decision = self.limiter.try_acquire(&rules, now).await;
        if let RateDecision::Denied { key, retry_at } = decision {
            if let Some(guard) = half_open.take() {
                guard.disarm();
                self.breakers.release_probe(endpoint.id, now).await;
            }
            return self.short_circuit(
                &request,
                DeliveryOutcome::RateLimited,
                format!("rate limit exceeded for {}", key.as_str()),
                retry_at,
                now,
            );
        }

        let outbound = self.build_request(&request, now);
        let timeout = outbound.timeout;
        let started = Instant::now();
        // Bound the attempt even if a transport ignores its own timeout.
        let result = match tokio::time::timeout(timeout, self.transport.send(outbound)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };
        let elapsed = started.elapsed();
        let response_time_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);

        let (outcome, status_code, response_body, error_message) = match result {
            Ok(response) => {
                let outcome = DeliveryOutcome::from_status(response.status);
                let error = (outcome != DeliveryOutcome::Success)
                    .then(|| format!("HTTP {}", response.status));
                let body = (!response.body.is_empty())
                    .then(|| truncate_utf8(&response.body, self.settings.response_body_limit));
                (outcome, Some(i32::from(response.status)), body, error)
            }
            Err(TransportError::Timeout) => (
                DeliveryOutcome::RetryableFailure,
                None,
                None,
                Some(format!("request timed out after {}s", timeout.as_secs())),
            ),
            Err(e) => (DeliveryOutcome::RetryableFailure, None, None, Some(e.to_string())),
        };

        self.report_to_breaker(endpoint, outcome, now).await;
        if let Some(guard) = half_open.take() {
            guard.disarm();
        }

        counter!("webhook_delivery_attempts_total", "outcome" => outcome.as_str()).increment(1);
        histogram!("webhook_delivery_duration_seconds").record(elapsed.as_secs_f64());

        if outcome == DeliveryOutcome::Success {
            info!(
                endpoint_id = %endpoint.id,
                delivery_id = request.delivery_id,
                attempt = request.attempt_number,
                status_code = ?status_code,
                response_time_ms,
                "Webhook delivered"
            );
        } else {
            warn!(
                endpoint_id = %endpoint.id,
                delivery_id = request.delivery_id,
                attempt = request.attempt_number,
                outcome = %outcome,
                status_code = ?status_code,
                error = ?error_message,
                "Webhook delivery failed"
            );
        }

        ExecutedAttempt {
            attempt: DeliveryAttempt {
                id: Uuid::new_v4(),
                delivery_id: request.delivery_id,
                endpoint_id: endpoint.id,
                form_id: endpoint.form_id,
                event_id: request.event_id,
                event_type: request.event_type.to_string(),
                target_url: endpoint.url.clone(),
                attempt_number: request.attempt_number,
                status_code,
                response_time_ms,
                success: outcome == DeliveryOutcome::Success,
                outcome,
                error_message,
                response_body,
                request_payload: request.payload.to_string(),
                created_at: now,
            },
            defer_until: None,
        }
    }

    fn rules_for(&self, endpoint: &Endpoint, source: Option<&str>) -> Vec<RateLimitRule> {
        let window = self.settings.rate_window;
        let mut rules = vec![RateLimitRule {
            key: RateLimitKey::endpoint(&endpoint.url),
            limit: self.settings.endpoint_limit,
            window,
        }];
        if let Some(limit) = self.settings.form_limit {
            rules.push(RateLimitRule {
                key: RateLimitKey::form(endpoint.form_id),
                limit,
                window,
            });
        }
        if let (Some(limit), Some(source)) = (self.settings.source_limit, source) {
            rules.push(RateLimitRule {
                key: RateLimitKey::source(source),
                limit,
                window,
            });
        }
        rules
    }

    fn build_request(&self, request: &AttemptRequest<'_>, now: DateTime<Utc>) -> OutboundRequest {
        let endpoint = request.endpoint;
        let mut headers = vec![
            ("Content-Type", "application/json".to_string()),
            ("User-Agent", self.settings.user_agent.clone()),
            (HEADER_EVENT, request.event_type.to_string()),
            (HEADER_DELIVERY, request.delivery_id.to_string()),
            (HEADER_ATTEMPT, request.attempt_number.to_string()),
            (HEADER_TIMESTAMP, now.timestamp().to_string()),
        ];
        if !endpoint.secret.is_empty() {
            headers.push((
                HEADER_SIGNATURE,
                sign_payload(&endpoint.secret, request.payload.as_bytes()),
            ));
        }

        OutboundRequest {
            url: endpoint.url.clone(),
            headers,
            body: request.payload.to_string(),
            timeout: std::time::Duration::from_secs(
                endpoint.request_timeout_secs(self.settings.default_timeout_secs),
            ),
        }
    }

    async fn report_to_breaker(
        &self,
        endpoint: &Endpoint,
        outcome: DeliveryOutcome,
        now: DateTime<Utc>,
    ) {
        if outcome == DeliveryOutcome::Success {
            self.breakers.record_success(endpoint.id, now).await;
            return;
        }

        let opened = self
            .breakers
            .record_failure(endpoint.id, now)
            .await
            .is_some_and(|t| t.to == CircuitState::Open);
        if opened {
            self.alerts
                .raise_logged(
                    endpoint.form_id,
                    Some(endpoint.id),
                    AlertType::EndpointDown,
                    format!(
                        "Deliveries to {} are suspended after repeated failures",
                        endpoint.url
                    ),
                    now,
                )
                .await;
        }
    }

    fn short_circuit(
        &self,
        request: &AttemptRequest<'_>,
        outcome: DeliveryOutcome,
        reason: String,
        defer_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ExecutedAttempt {
        let endpoint = request.endpoint;
        counter!("webhook_delivery_attempts_total", "outcome" => outcome.as_str()).increment(1);
        debug!(
            endpoint_id = %endpoint.id,
            delivery_id = request.delivery_id,
            outcome = %outcome,
            defer_until = %defer_until,
            "Delivery short-circuited"
        );

        ExecutedAttempt {
            attempt: DeliveryAttempt {
                id: Uuid::new_v4(),
                delivery_id: request.delivery_id,
                endpoint_id: endpoint.id,
                form_id: endpoint.form_id,
                event_id: request.event_id,
                event_type: request.event_type.to_string(),
                target_url: endpoint.url.clone(),
                attempt_number: request.attempt_number,
                status_code: None,
                response_time_ms: 0,
                success: false,
                outcome,
                error_message: Some(reason),
                response_body: None,
                request_payload: request.payload.to_string(),
                created_at: now,
            },
            defer_until: Some(defer_until),
        }
    }
}
