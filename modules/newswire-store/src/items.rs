use std::collections::HashSet;

use chrono::{DateTime, Utc};
use newswire_common::{clean_text, ScrapeStatus, ScrapedArticle};

use crate::{NewsStore, Result};

/// Candidate item ready for upsert. Link is the global dedup key.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub source_id: i64,
    pub title: String,
    pub description: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
}

impl NewItem {
    /// Copy with all externally sourced strings passed through the sanitizer.
    pub fn sanitized(&self) -> NewItem {
        NewItem {
            source_id: self.source_id,
            title: clean_text(&self.title),
            description: clean_text(&self.description),
            link: clean_text(&self.link),
            published_at: self.published_at,
        }
    }
}

/// Item queued for a scrape attempt.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScrapeTarget {
    pub id: i64,
    pub link: String,
}

/// Search hit returned to the external command surface.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FoundItem {
    pub id: i64,
    pub source_id: i64,
    pub title: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
}

impl NewsStore {
    /// Insert an item or, if the link is already known, refresh its metadata
    /// while keeping the existing id.
    pub async fn upsert_item(&self, item: &NewItem) -> Result<i64> {
        let item = item.sanitized();
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO news (source_id, title, description, link, published_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (link) DO UPDATE
                SET title = EXCLUDED.title,
                    description = EXCLUDED.description,
                    updated_at = now()
            RETURNING id
            "#,
        )
        .bind(item.source_id)
        .bind(&item.title)
        .bind(&item.description)
        .bind(&item.link)
        .bind(item.published_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Batch dedup: which of these links are already stored.
    pub async fn existing_links(&self, links: &[String]) -> Result<HashSet<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"SELECT link FROM news WHERE link = ANY($1)"#,
        )
        .bind(links)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    /// Per-link existence probe, the sequential fallback when the batch query
    /// fails.
    pub async fn link_exists(&self, link: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(SELECT 1 FROM news WHERE link = $1)"#,
        )
        .bind(link)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Record a completed scrape with its full payload.
    pub async fn mark_scrape_success(&self, id: i64, payload: &ScrapedArticle) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE news
            SET full_text = $2,
                author = $3,
                category = $4,
                tags = $5,
                images = $6,
                meta_keywords = $7,
                meta_description = $8,
                meta_data = $9,
                content_html = $10,
                scraped_at = now(),
                scrape_status = $11,
                scrape_error = NULL,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(clean_text(&payload.full_text))
        .bind(clean_text(&payload.author))
        .bind(clean_text(&payload.category))
        .bind(clean_all(&payload.tags))
        .bind(clean_all(&payload.images))
        .bind(clean_text(&payload.meta_keywords))
        .bind(clean_text(&payload.meta_description))
        .bind(clean_json(&payload.meta_data))
        .bind(clean_text(&payload.content_html))
        .bind(ScrapeStatus::Success.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a failed scrape attempt with its error text.
    pub async fn mark_scrape_failure(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE news
            SET scraped_at = now(),
                scrape_status = $2,
                scrape_error = $3,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(ScrapeStatus::Failed.to_string())
        .bind(clean_text(error))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Next batch of items awaiting a scrape: pending or previously failed,
    /// published within the last 7 days, newest first.
    pub async fn scrape_batch(&self, limit: i64) -> Result<Vec<ScrapeTarget>> {
        let rows = sqlx::query_as::<_, ScrapeTarget>(
            r#"
            SELECT id, link FROM news
            WHERE scrape_status IN ('pending', 'failed')
              AND published_at >= now() - interval '7 days'
            ORDER BY id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Full-text lookup over title, description, and body. Serves the
    /// external command surface.
    pub async fn search_items(&self, query: &str, limit: i64) -> Result<Vec<FoundItem>> {
        let rows = sqlx::query_as::<_, FoundItem>(
            r#"
            SELECT id, source_id, title, link, published_at FROM news
            WHERE tvs @@ plainto_tsquery('simple', $1)
            ORDER BY published_at DESC
            LIMIT $2
            "#,
        )
        .bind(clean_text(query))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

fn clean_all(values: &[String]) -> Vec<String> {
    values.iter().map(|v| clean_text(v)).collect()
}

/// JSONB rejects NUL escapes, so string values inside the meta map are
/// sanitized like every other external string.
fn clean_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(clean_text(s)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(clean_json).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (clean_text(k), clean_json(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_strips_nul() {
        let item = NewItem {
            source_id: 1,
            title: "tit\0le".into(),
            description: "des\0c".into(),
            link: "https://x/a".into(),
            published_at: Utc::now(),
        };
        let clean = item.sanitized();
        assert_eq!(clean.title, "title");
        assert_eq!(clean.description, "desc");
        assert_eq!(clean.link, "https://x/a");
    }

    #[test]
    fn test_clean_json_sanitizes_nested_strings() {
        let dirty = serde_json::json!({
            "og:title": "bad\0value",
            "nested": ["a\0", {"k\0": "v"}],
            "count": 3,
        });
        let clean = clean_json(&dirty);
        assert_eq!(clean["og:title"], "badvalue");
        assert_eq!(clean["nested"][0], "a");
        assert_eq!(clean["nested"][1]["k"], "v");
        assert_eq!(clean["count"], 3);
    }
}
