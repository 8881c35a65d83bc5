//! Per-endpoint circuit breakers.
//!
//! Each endpoint owns one breaker behind its own lock, so updates for one
//! endpoint are serialized without contending with unrelated endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use domain::models::{
    Admission, CircuitBreakerPolicy, CircuitBreakerState, CircuitState, CircuitTransition,
};
use metrics::counter;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

type Breaker = Arc<Mutex<CircuitBreakerState>>;

pub struct CircuitBreakerRegistry {
    policy: CircuitBreakerPolicy,
    breakers: RwLock<HashMap<Uuid, Breaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(policy: CircuitBreakerPolicy) -> Self {
        Self {
            policy,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &CircuitBreakerPolicy {
        &self.policy
    }

    async fn get(&self, endpoint_id: Uuid) -> Option<Breaker> {
        self.breakers.read().await.get(&endpoint_id).cloned()
    }

    async fn get_or_create(
        &self,
        endpoint_id: Uuid,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> Breaker {
        if let Some(breaker) = self.get(endpoint_id).await {
            return breaker;
        }

        let mut breakers = self.breakers.write().await;
        // Another task may have created it between the two locks.
        breakers
            .entry(endpoint_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(CircuitBreakerState::new(
                    endpoint_id,
                    threshold,
                    now,
                )))
            })
            .clone()
    }

    /// Asks whether a request to the endpoint may go out now.
    ///
    /// `threshold` is the endpoint's effective failure threshold; changes to
    /// it take effect on the next admission.
    pub async fn admit(
        &self,
        endpoint_id: Uuid,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> Admission {
        let breaker = self.get_or_create(endpoint_id, threshold, now).await;
        let mut state = breaker.lock().await;
        state.failure_threshold = threshold.max(1);
        let (admission, transition) = state.admit(now, &self.policy);
        if let Some(t) = transition {
            log_transition(endpoint_id, t, &state);
        }
        admission
    }

    /// Returns an admitted probe that never reached the network.
    pub async fn release_probe(&self, endpoint_id: Uuid, now: DateTime<Utc>) {
        if let Some(breaker) = self.get(endpoint_id).await {
            breaker.lock().await.release_probe(now);
        }
    }

    pub async fn record_success(
        &self,
        endpoint_id: Uuid,
        now: DateTime<Utc>,
    ) -> Option<CircuitTransition> {
        let breaker = self.get(endpoint_id).await?;
        let mut state = breaker.lock().await;
        let transition = state.record_success(now);
        if let Some(t) = transition {
            log_transition(endpoint_id, t, &state);
        }
        transition
    }

    pub async fn record_failure(
        &self,
        endpoint_id: Uuid,
        now: DateTime<Utc>,
    ) -> Option<CircuitTransition> {
        let breaker = self.get(endpoint_id).await?;
        let mut state = breaker.lock().await;
        let transition = state.record_failure(now, &self.policy);
        if let Some(t) = transition {
            log_transition(endpoint_id, t, &state);
        }
        transition
    }

    /// Current breaker state, if the endpoint has ever been admitted.
    pub async fn state(&self, endpoint_id: Uuid) -> Option<CircuitBreakerState> {
        let breaker = self.get(endpoint_id).await?;
        let state = breaker.lock().await.clone();
        Some(state)
    }

    /// Manually closes the breaker.
    pub async fn reset(
        &self,
        endpoint_id: Uuid,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> CircuitBreakerState {
        let breaker = self.get_or_create(endpoint_id, threshold, now).await;
        let mut state = breaker.lock().await;
        if let Some(t) = state.reset(now) {
            log_transition(endpoint_id, t, &state);
        }
        state.clone()
    }

    pub async fn remove(&self, endpoint_id: Uuid) {
        self.breakers.write().await.remove(&endpoint_id);
    }

    /// Copies every breaker for persistence.
    pub async fn snapshot(&self) -> Vec<CircuitBreakerState> {
        let breakers: Vec<Breaker> = self.breakers.read().await.values().cloned().collect();
        let mut states = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            states.push(breaker.lock().await.clone());
        }
        states
    }

    /// Loads persisted breakers. Endpoints already tracked keep their live state.
    pub async fn restore(&self, states: Vec<CircuitBreakerState>) -> usize {
        let mut breakers = self.breakers.write().await;
        let mut restored = 0;
        for mut state in states {
            if breakers.contains_key(&state.endpoint_id) {
                continue;
            }
            state.probe_deadline = None;
            breakers.insert(state.endpoint_id, Arc::new(Mutex::new(state)));
            restored += 1;
        }
        restored
    }
}

fn log_transition(endpoint_id: Uuid, t: CircuitTransition, state: &CircuitBreakerState) {
    counter!("webhook_circuit_transitions_total", "to" => t.to.as_str()).increment(1);
    match t.to {
        CircuitState::Open => warn!(
            endpoint_id = %endpoint_id,
            from = %t.from,
            consecutive_failures = state.consecutive_failures,
            open_count = state.open_count,
            next_reset_at = ?state.next_reset_at,
            "Circuit breaker opened"
        ),
        _ => info!(
            endpoint_id = %endpoint_id,
            from = %t.from,
            to = %t.to,
            "Circuit breaker state changed"
        ),
    }
}
