use std::collections::HashSet;

use async_trait::async_trait;
use newswire_common::{ItemCandidate, NewswireError};
use newswire_scrape::FeedFetcher;
use newswire_store::{NewsStore, Source};

/// Storage operations the poller needs, behind a seam so tests can fake them.
#[async_trait]
pub trait PollerStore: Send + Sync {
    async fn active_sources(&self) -> Result<Vec<Source>, NewswireError>;
    async fn existing_links(&self, links: &[String]) -> Result<HashSet<String>, NewswireError>;
    async fn link_exists(&self, link: &str) -> Result<bool, NewswireError>;
}

#[async_trait]
impl PollerStore for NewsStore {
    async fn active_sources(&self) -> Result<Vec<Source>, NewswireError> {
        NewsStore::active_sources(self)
            .await
            .map_err(|e| NewswireError::StorageFatal(e.to_string()))
    }

    async fn existing_links(&self, links: &[String]) -> Result<HashSet<String>, NewswireError> {
        NewsStore::existing_links(self, links)
            .await
            .map_err(|e| NewswireError::StorageFatal(e.to_string()))
    }

    async fn link_exists(&self, link: &str) -> Result<bool, NewswireError> {
        NewsStore::link_exists(self, link)
            .await
            .map_err(|e| NewswireError::StorageFatal(e.to_string()))
    }
}

/// Feed retrieval seam.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<ItemCandidate>, NewswireError>;
}

#[async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<ItemCandidate>, NewswireError> {
        FeedFetcher::fetch(self, url).await
    }
}
