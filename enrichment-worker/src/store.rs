use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to connect to the database: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("failed to update record {id}: {error}")]
    Update {
        id: i64,
        #[source]
        error: sqlx::Error,
    },
}

/// Applies the enrichment value to the record keyed by `id`, returning how
/// many rows were updated. Records are never created here.
#[async_trait]
pub trait EnrichmentStore: Send + Sync {
    async fn apply(&self, id: i64, value: &str) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub max_lifetime: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub acquire_timeout: Duration,
}

#[derive(Clone)]
pub struct PgEnrichmentStore {
    pool: PgPool,
}

impl PgEnrichmentStore {
    pub async fn connect(database_url: &str, config: &PoolConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .max_lifetime(config.max_lifetime)
            .idle_timeout(config.idle_timeout)
            .acquire_timeout(config.acquire_timeout)
            .connect(database_url)
            .await
            .map_err(StoreError::Connect)?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnrichmentStore for PgEnrichmentStore {
    async fn apply(&self, id: i64, value: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE info SET inn = $2 WHERE id = $1")
            .bind(id)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::Update { id, error })?;

        Ok(result.rows_affected())
    }
}
