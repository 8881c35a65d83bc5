//! Persists circuit breaker state so it survives restarts.

use std::sync::Arc;

use persistence::{Store, StoreError};
use tracing::{debug, info};

use super::scheduler::{Job, JobFrequency};
use crate::services::CircuitBreakerRegistry;

pub struct CircuitSnapshotJob {
    breakers: Arc<CircuitBreakerRegistry>,
    store: Arc<dyn Store>,
    interval_secs: u64,
}

impl CircuitSnapshotJob {
    pub fn new(
        breakers: Arc<CircuitBreakerRegistry>,
        store: Arc<dyn Store>,
        interval_secs: u64,
    ) -> Self {
        Self {
            breakers,
            store,
            interval_secs,
        }
    }
}

/// Writes every live breaker to the store.
pub async fn save_breakers(
    breakers: &CircuitBreakerRegistry,
    store: &dyn Store,
) -> Result<usize, StoreError> {
    let states = breakers.snapshot().await;
    if states.is_empty() {
        return Ok(0);
    }
    store.save_breaker_states(&states).await?;
    Ok(states.len())
}

/// Loads persisted breakers into the registry at startup.
pub async fn restore_breakers(
    breakers: &CircuitBreakerRegistry,
    store: &dyn Store,
) -> Result<usize, StoreError> {
    let states = store.load_breaker_states().await?;
    let restored = breakers.restore(states).await;
    if restored > 0 {
        info!(restored, "Restored circuit breaker state");
    }
    Ok(restored)
}

#[async_trait::async_trait]
impl Job for CircuitSnapshotJob {
    fn name(&self) -> &'static str {
        "circuit_snapshot"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        let saved = save_breakers(&self.breakers, self.store.as_ref())
            .await
            .map_err(|e| format!("Failed to persist circuit breakers: {e}"))?;
        debug!(saved, "Persisted circuit breaker state");
        Ok(())
    }
}
