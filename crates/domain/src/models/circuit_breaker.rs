//! Per-endpoint circuit breaker state machine.
//!
//! Transitions are `closed -> open -> half_open -> closed | open`. A closed
//! breaker never moves straight to half_open. Only one probe is admitted
//! while half open; a probe that has not reported back by its deadline is
//! treated as lost and another one may go out.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            "half_open" => Ok(Self::HalfOpen),
            other => Err(format!("unknown circuit state: {other}")),
        }
    }
}

/// Engine-wide breaker tuning.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerPolicy {
    pub failure_threshold: u32,
    pub base_cooldown: Duration,
    pub max_cooldown: Duration,
    /// How long a half-open probe may stay unanswered.
    pub probe_timeout: Duration,
}

impl CircuitBreakerPolicy {
    /// Cooldown for the n-th consecutive open period: base * 2^(n-1), capped.
    pub fn cooldown(&self, open_count: u32) -> Duration {
        let exp = open_count.saturating_sub(1).min(30);
        let ms = self
            .base_cooldown
            .num_milliseconds()
            .saturating_mul(1i64 << exp);
        Duration::milliseconds(ms.min(self.max_cooldown.num_milliseconds()))
    }
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_cooldown: Duration::seconds(60),
            max_cooldown: Duration::hours(1),
            probe_timeout: Duration::seconds(135),
        }
    }
}

/// Decision for a delivery about to be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The single half-open trial request.
    Probe,
    Rejected { retry_at: DateTime<Utc> },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitTransition {
    pub from: CircuitState,
    pub to: CircuitState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerState {
    pub endpoint_id: Uuid,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    /// Consecutive open periods without an intervening close.
    pub open_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_reset_at: Option<DateTime<Utc>>,
    /// Set while a half-open probe is outstanding.
    pub probe_deadline: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CircuitBreakerState {
    pub fn new(endpoint_id: Uuid, failure_threshold: u32, now: DateTime<Utc>) -> Self {
        Self {
            endpoint_id,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
            open_count: 0,
            last_failure_at: None,
            next_reset_at: None,
            probe_deadline: None,
            updated_at: now,
        }
    }

    /// True while an admitted probe is outstanding and not yet overdue.
    pub fn probe_in_flight(&self, now: DateTime<Utc>) -> bool {
        self.probe_deadline.is_some_and(|deadline| now < deadline)
    }

    /// State as observed at `now`; an expired open period reads as half open.
    pub fn effective_state(&self, now: DateTime<Utc>) -> CircuitState {
        match (self.state, self.next_reset_at) {
            (CircuitState::Open, Some(reset)) if now >= reset => CircuitState::HalfOpen,
            (state, _) => state,
        }
    }

    /// Decides whether a request may go out, moving open to half_open when
    /// the cooldown has elapsed.
    pub fn admit(
        &mut self,
        now: DateTime<Utc>,
        policy: &CircuitBreakerPolicy,
    ) -> (Admission, Option<CircuitTransition>) {
        match self.state {
            CircuitState::Closed => (Admission::Allowed, None),
            CircuitState::Open => {
                let reset = self.next_reset_at.unwrap_or(now);
                if now < reset {
                    return (Admission::Rejected { retry_at: reset }, None);
                }
                let t = self.transition(CircuitState::HalfOpen, now);
                self.probe_deadline = Some(now + policy.probe_timeout);
                (Admission::Probe, Some(t))
            }
            CircuitState::HalfOpen => {
                if let Some(deadline) = self.probe_deadline.filter(|d| now < *d) {
                    (
                        Admission::Rejected {
                            retry_at: deadline.min(now + policy.base_cooldown),
                        },
                        None,
                    )
                } else {
                    self.probe_deadline = Some(now + policy.probe_timeout);
                    self.updated_at = now;
                    (Admission::Probe, None)
                }
            }
        }
    }

    /// Gives back an admitted probe that never produced a physical attempt.
    pub fn release_probe(&mut self, now: DateTime<Utc>) {
        if self.state == CircuitState::HalfOpen && self.probe_deadline.is_some() {
            self.probe_deadline = None;
            self.updated_at = now;
        }
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) -> Option<CircuitTransition> {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                self.updated_at = now;
                None
            }
            CircuitState::HalfOpen => {
                let t = self.transition(CircuitState::Closed, now);
                self.consecutive_failures = 0;
                self.open_count = 0;
                self.next_reset_at = None;
                self.probe_deadline = None;
                Some(t)
            }
            // A request started before the breaker opened; the cooldown stands.
            CircuitState::Open => None,
        }
    }

    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        policy: &CircuitBreakerPolicy,
    ) -> Option<CircuitTransition> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(now);
        self.updated_at = now;
        match self.state {
            CircuitState::Closed if self.consecutive_failures >= self.failure_threshold => {
                Some(self.open(now, policy))
            }
            CircuitState::HalfOpen => Some(self.open(now, policy)),
            _ => None,
        }
    }

    /// Manual reset to closed.
    pub fn reset(&mut self, now: DateTime<Utc>) -> Option<CircuitTransition> {
        let prev = self.state;
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.open_count = 0;
        self.next_reset_at = None;
        self.probe_deadline = None;
        self.updated_at = now;
        (prev != CircuitState::Closed).then_some(CircuitTransition {
            from: prev,
            to: CircuitState::Closed,
        })
    }

    fn open(&mut self, now: DateTime<Utc>, policy: &CircuitBreakerPolicy) -> CircuitTransition {
        let t = self.transition(CircuitState::Open, now);
        self.open_count = self.open_count.saturating_add(1);
        self.next_reset_at = Some(now + policy.cooldown(self.open_count));
        self.probe_deadline = None;
        t
    }

    fn transition(&mut self, to: CircuitState, now: DateTime<Utc>) -> CircuitTransition {
        let from = self.state;
        self.state = to;
        self.updated_at = now;
        CircuitTransition { from, to }
    }
}
