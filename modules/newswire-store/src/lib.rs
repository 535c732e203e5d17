//! Typed Postgres gateway for sources, items, subscriptions, and delivery
//! receipts. All mutating operations are idempotent with respect to their
//! natural keys; every externally sourced string is sanitized before a write.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

mod items;
mod sources;
mod users;

pub use items::{FoundItem, NewItem, ScrapeTarget};
pub use sources::Source;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique-constraint hit. Call sites treat this as idempotent success.
    #[error("storage conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        match self {
            StoreError::Conflict(_) => true,
            StoreError::Database(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some("23505")
            }
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct NewsStore {
    pool: PgPool,
}

impl NewsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a bounded connection pool. Fatal at startup if the database is
    /// unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations (idempotent).
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// (total connections, currently checked out) — exposed as gauges.
    pub fn pool_stats(&self) -> (u32, u32) {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        (size, size.saturating_sub(idle))
    }
}
