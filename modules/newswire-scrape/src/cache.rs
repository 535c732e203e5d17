// Distributed cache of scraped article payloads.

use std::time::Duration;

use async_trait::async_trait;
use newswire_common::{NewswireError, ScrapedArticle};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{info, warn};

const CACHE_TTL_SECS: u64 = 30 * 60;
const CACHE_OP_TIMEOUT: Duration = Duration::from_secs(2);
const KEY_PREFIX: &str = "article:";

/// Cache of scrape payloads keyed by article URL. Misses and backend errors
/// are indistinguishable so scraping degrades gracefully to origin fetch.
#[async_trait]
pub trait ContentCache: Send + Sync {
    async fn get(&self, url: &str) -> Option<ScrapedArticle>;
    async fn put(&self, url: &str, payload: &ScrapedArticle);
}

fn cache_key(url: &str) -> String {
    format!("{KEY_PREFIX}{:x}", md5::compute(url))
}

/// Redis-backed cache with a 30-minute TTL.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, NewswireError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| NewswireError::TransientNetwork(format!("redis: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| NewswireError::TransientNetwork(format!("redis: {e}")))?;
        info!("Connected to content cache");
        Ok(Self { conn })
    }
}

#[async_trait]
impl ContentCache for RedisCache {
    async fn get(&self, url: &str) -> Option<ScrapedArticle> {
        let key = cache_key(url);
        let mut conn = self.conn.clone();
        let fetched: Option<String> =
            match tokio::time::timeout(CACHE_OP_TIMEOUT, conn.get(&key)).await {
                Ok(Ok(value)) => value,
                Ok(Err(e)) => {
                    warn!(url, error = %e, "Cache read failed, treating as miss");
                    None
                }
                Err(_) => {
                    warn!(url, "Cache read timed out, treating as miss");
                    None
                }
            };

        let raw = fetched?;
        match serde_json::from_str(&raw) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(url, error = %e, "Cached payload is malformed, treating as miss");
                None
            }
        }
    }

    async fn put(&self, url: &str, payload: &ScrapedArticle) {
        let key = cache_key(url);
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                warn!(url, error = %e, "Failed to serialize scrape payload");
                return;
            }
        };

        let mut conn = self.conn.clone();
        let write: Result<Result<(), _>, _> =
            tokio::time::timeout(CACHE_OP_TIMEOUT, conn.set_ex(&key, json, CACHE_TTL_SECS)).await;
        match write {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(url, error = %e, "Cache write failed"),
            Err(_) => warn!(url, "Cache write timed out"),
        }
    }
}

/// Stands in when no cache endpoint is configured: every lookup misses.
pub struct NoopCache;

#[async_trait]
impl ContentCache for NoopCache {
    async fn get(&self, _url: &str) -> Option<ScrapedArticle> {
        None
    }

    async fn put(&self, _url: &str, _payload: &ScrapedArticle) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_is_prefixed_md5() {
        let key = cache_key("https://x/a");
        assert!(key.starts_with("article:"));
        // md5 hex digest is 32 chars
        assert_eq!(key.len(), "article:".len() + 32);
        // Stable across calls
        assert_eq!(key, cache_key("https://x/a"));
        assert_ne!(key, cache_key("https://x/b"));
    }

    #[tokio::test]
    async fn test_noop_cache_always_misses() {
        let cache = NoopCache;
        cache.put("https://x/a", &ScrapedArticle::default()).await;
        assert!(cache.get("https://x/a").await.is_none());
    }
}
