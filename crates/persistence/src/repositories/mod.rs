//! PostgreSQL implementations of the store traits.
//!
//! One `PgStore` implements every trait; each file holds one trait's queries.

mod analytics;
mod delivery;
mod endpoint;
mod monitoring;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::metrics::QueryTimer;
use crate::store::{StoreHealth, StoreResult};

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store over a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StoreHealth for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        let timer = QueryTimer::new("ping");
        let result = sqlx::query("SELECT 1").execute(self.pool()).await;
        timer.record();
        result?;
        Ok(())
    }
}
