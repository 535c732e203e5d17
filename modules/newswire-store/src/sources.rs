use chrono::{DateTime, Utc};
use newswire_common::{clean_text, SourceStatus};
use tracing::info;

use crate::{NewsStore, Result};

/// A polled syndication source. Gateway queries only ever return active rows;
/// lifecycle state stays in storage.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl NewsStore {
    /// All sources eligible for polling.
    pub async fn active_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query_as::<_, Source>(
            r#"
            SELECT id, name, url, created_at FROM sources
            WHERE status = 'active'
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn source_by_id(&self, id: i64) -> Result<Option<Source>> {
        let row = sqlx::query_as::<_, Source>(
            r#"
            SELECT id, name, url, created_at FROM sources
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Lookup by feed URL. URLs are stored lower-cased, so the probe is
    /// lower-cased too.
    pub async fn source_by_url(&self, url: &str) -> Result<Option<Source>> {
        let row = sqlx::query_as::<_, Source>(
            r#"
            SELECT id, name, url, created_at FROM sources
            WHERE url = lower($1) AND status = 'active'
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Create or rename a source, returning its id. Used by the external
    /// command surface; the pipeline itself only reads sources.
    pub async fn add_source(&self, name: &str, url: &str) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO sources (name, url) VALUES ($1, $2)
            ON CONFLICT (url) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(clean_text(name))
        .bind(clean_text(url))
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Administrative lifecycle transition.
    pub async fn set_source_status(&self, id: i64, status: SourceStatus) -> Result<()> {
        sqlx::query(r#"UPDATE sources SET status = $2 WHERE id = $1"#)
            .bind(id)
            .bind(status.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Point a relocated feed at its current URL. Startup migration for the
    /// hard-coded deprecated → current set.
    pub async fn update_source_url(&self, old_url: &str, new_url: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sources SET url = $2
            WHERE url = lower($1)
              AND NOT EXISTS (SELECT 1 FROM sources WHERE url = lower($2))
            "#,
        )
        .bind(old_url)
        .bind(new_url)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(old_url, new_url, "Migrated relocated feed URL");
        }
        Ok(())
    }
}
