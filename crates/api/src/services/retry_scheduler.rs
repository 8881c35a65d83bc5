//! Claim-and-dispatch loop body for the retry queue.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use persistence::{Store, StoreError};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::engine::WebhookEngine;

pub struct RetryScheduler {
    engine: Arc<WebhookEngine>,
    store: Arc<dyn Store>,
    batch_size: i64,
    lease: Duration,
}

impl RetryScheduler {
    pub fn new(engine: Arc<WebhookEngine>, batch_size: i64, lease: Duration) -> Self {
        let store = Arc::clone(engine.store());
        Self {
            engine,
            store,
            batch_size,
            lease,
        }
    }

    /// Releases expired leases, claims due tasks and re-attempts them
    /// concurrently. Returns the number of tasks processed.
    ///
    /// Worker permits are taken before claiming and at most one task is
    /// claimed per permit, so a lease never ticks away while its task waits
    /// for a worker.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let released = self.store.release_expired_leases(now).await?;
        if released > 0 {
            warn!(released, "Released retry tasks with expired leases");
        }

        let wanted = usize::try_from(self.batch_size).unwrap_or(0);
        let mut permits = Vec::with_capacity(wanted);
        while permits.len() < wanted {
            match Arc::clone(self.engine.workers()).try_acquire_owned() {
                Ok(permit) => permits.push(permit),
                Err(_) => break,
            }
        }
        if permits.is_empty() {
            debug!("No free workers; retry claim deferred");
            return Ok(0);
        }

        let tasks = self
            .store
            .claim_due_retries(now, permits.len() as i64, self.lease)
            .await?;
        if tasks.is_empty() {
            return Ok(0);
        }
        debug!(claimed = tasks.len(), "Claimed due retry tasks");

        let mut set = JoinSet::new();
        for (task, permit) in tasks.into_iter().zip(permits) {
            let engine = Arc::clone(&self.engine);
            set.spawn(async move {
                let _permit = permit;
                engine.retry(task).await
            });
        }

        let mut processed = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(_) => processed += 1,
                Err(e) => error!(error = %e, "Retry task panicked"),
            }
        }
        Ok(processed)
    }
}
