// RSS/Atom feed fetching and entry normalization.

use std::time::Duration;

use newswire_common::{ItemCandidate, NewswireError};
use tracing::{debug, info};

const FEED_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_IDLE_PER_HOST: usize = 10;
const USER_AGENT: &str = "newswire/0.1";

/// Fetches and parses a feed URL into candidate items with UTC timestamps.
#[derive(Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
}

impl Default for FeedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(FEED_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .user_agent(USER_AGENT)
            .build()
            .expect("Failed to build feed HTTP client");
        Self { client }
    }

    /// Fetch one feed and return its entries in feed order.
    pub async fn fetch(&self, feed_url: &str) -> Result<Vec<ItemCandidate>, NewswireError> {
        let resp = self
            .client
            .get(feed_url)
            .send()
            .await
            .map_err(|e| classify_fetch_error(feed_url, &e))?;

        if !resp.status().is_success() {
            return Err(NewswireError::TransientNetwork(format!(
                "{feed_url}: HTTP {}",
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| classify_fetch_error(feed_url, &e))?;

        let candidates = parse_feed(&bytes)?;
        info!(feed_url, entries = candidates.len(), "Feed parsed");
        Ok(candidates)
    }
}

/// Map feed entries to candidates. Entries without any link or timestamp are
/// skipped; instants are normalized to UTC.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<ItemCandidate>, NewswireError> {
    let feed = feed_rs::parser::parse(bytes)
        .map_err(|e| NewswireError::Parse(format!("feed parse failed: {e}")))?;

    let candidates = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let link = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref().unwrap_or("alternate") == "alternate")
                .or_else(|| entry.links.first())
                .map(|l| l.href.clone())
                .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))?;

            let published_at = match entry.published.or(entry.updated) {
                Some(dt) => dt.with_timezone(&chrono::Utc),
                None => {
                    debug!(link, "Entry has no timestamp, skipped");
                    return None;
                }
            };

            Some(ItemCandidate {
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                description: entry.summary.map(|s| s.content).unwrap_or_default(),
                link,
                published_at,
            })
        })
        .collect();

    Ok(candidates)
}

fn classify_fetch_error(url: &str, e: &reqwest::Error) -> NewswireError {
    if e.is_timeout() {
        NewswireError::FetchTimeout(url.to_string())
    } else {
        NewswireError::TransientNetwork(format!("{url}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Wire</title>
    <item>
      <title>First</title>
      <description>one</description>
      <link>https://x/a</link>
      <pubDate>Wed, 01 May 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Second</title>
      <description>two</description>
      <link>https://x/b</link>
      <pubDate>Wed, 01 May 2024 11:00:00 +0300</pubDate>
    </item>
    <item>
      <title>No date</title>
      <link>https://x/c</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed_keeps_order_and_utc() {
        let candidates = parse_feed(RSS_FIXTURE.as_bytes()).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].link, "https://x/a");
        assert_eq!(candidates[1].link, "https://x/b");
        // +0300 offset normalized to UTC
        assert_eq!(
            candidates[1].published_at.to_rfc3339(),
            "2024-05-01T08:00:00+00:00"
        );
    }

    #[test]
    fn test_parse_feed_skips_dateless_entries() {
        let candidates = parse_feed(RSS_FIXTURE.as_bytes()).unwrap();
        assert!(candidates.iter().all(|c| c.link != "https://x/c"));
    }

    #[test]
    fn test_parse_feed_rejects_garbage() {
        let err = parse_feed(b"not a feed at all").unwrap_err();
        assert!(matches!(err, NewswireError::Parse(_)));
    }
}
