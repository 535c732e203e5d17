use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use newswire_bus::{ItemEnvelope, ItemSink};
use newswire_common::{CircuitBreaker, ItemCandidate, Metrics, NewswireError};
use newswire_store::Source;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::traits::{FeedSource, PollerStore};

/// Active-source cache lifetime.
const SOURCE_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
/// Upper bound on poll workers per tick.
const MAX_WORKERS: usize = 6;
/// Candidates older than this are dropped before publishing.
const CANDIDATE_MAX_AGE_HOURS: i64 = 24;

#[derive(Default)]
struct SourceCache {
    sources: Vec<Source>,
    refreshed_at: Option<Instant>,
}

pub struct SourcePoller {
    store: Arc<dyn PollerStore>,
    fetcher: Arc<dyn FeedSource>,
    sink: Arc<dyn ItemSink>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<Metrics>,
    cache: Mutex<SourceCache>,
}

impl SourcePoller {
    pub fn new(
        store: Arc<dyn PollerStore>,
        fetcher: Arc<dyn FeedSource>,
        sink: Arc<dyn ItemSink>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            fetcher,
            sink,
            breaker,
            metrics,
            cache: Mutex::new(SourceCache::default()),
        })
    }

    /// Periodic loop: first fire after one period, then every period until
    /// cancellation. Each tick runs in its own task so a panic ends only that
    /// cycle.
    pub async fn run(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Source poller stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let poller = Arc::clone(&self);
                    let tick = tokio::spawn(async move { poller.tick().await });
                    if let Err(e) = tick.await {
                        if e.is_panic() {
                            error!("Poll tick panicked, cycle abandoned");
                        }
                    }
                }
            }
        }
    }

    /// One poll cycle across all active sources.
    pub async fn tick(self: &Arc<Self>) {
        let run_id = Uuid::new_v4();
        self.metrics.poller.ticks.inc();

        let sources = match self.cached_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                warn!(%run_id, error = %e, "Failed to load active sources");
                return;
            }
        };
        if sources.is_empty() {
            return;
        }

        let workers = worker_count(sources.len());
        info!(%run_id, sources = sources.len(), workers, "Poll tick started");

        // Fan the sources out over a jobs channel drained by the worker pool.
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Source>();
        for source in &sources {
            let _ = tx.send(source.clone());
        }
        drop(tx);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let poller = Arc::clone(self);
            let rx = Arc::clone(&rx);
            handles.push(tokio::spawn(async move {
                let mut gathered: Vec<(Source, ItemCandidate)> = Vec::new();
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(source) = job else { break };
                    gathered.extend(poller.poll_source(source).await);
                }
                gathered
            }));
        }

        let mut candidates: Vec<(Source, ItemCandidate)> = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(batch) => candidates.extend(batch),
                Err(e) => warn!(%run_id, error = %e, "Poll worker failed"),
            }
        }

        self.metrics.poller.candidates_seen.add(candidates.len() as u64);
        if candidates.is_empty() {
            info!(%run_id, "Poll tick complete, no fresh candidates");
            return;
        }

        let fresh = self.dedup_against_storage(candidates).await;

        let mut published = 0u64;
        for (source, candidate) in fresh {
            let envelope = ItemEnvelope {
                source_id: source.id,
                source_name: source.name.clone(),
                title: candidate.title,
                description: candidate.description,
                link: candidate.link,
                published_at: candidate.published_at,
            };
            match self.sink.publish_item(&envelope).await {
                Ok(()) => {
                    published += 1;
                    self.metrics.bus.published.inc();
                }
                Err(e) => {
                    // Storage never saw this candidate; the next tick
                    // re-observes it.
                    warn!(%run_id, link = %envelope.link, error = %e, "Publish failed, dropped");
                    self.metrics.bus.publish_failures.inc();
                }
            }
        }

        self.metrics.poller.items_published.add(published);
        info!(%run_id, published, "Poll tick complete");
    }

    /// Parse one source through the feed breaker, keeping candidates fresher
    /// than 24 h.
    async fn poll_source(&self, source: Source) -> Vec<(Source, ItemCandidate)> {
        self.metrics.poller.sources_polled.inc();

        let fetched = self
            .breaker
            .call(|| self.fetcher.fetch(&source.url))
            .await;

        let entries = match fetched {
            Ok(entries) => entries,
            Err(NewswireError::BreakerOpen(_)) => {
                self.metrics.poller.breaker_refusals.inc();
                return Vec::new();
            }
            Err(e) => {
                warn!(source = %source.url, error = %e, "Feed poll failed");
                self.metrics.poller.feed_errors.inc();
                return Vec::new();
            }
        };

        let cutoff = Utc::now() - chrono::Duration::hours(CANDIDATE_MAX_AGE_HOURS);
        entries
            .into_iter()
            .filter(|c| c.published_at > cutoff)
            .map(|c| (source.clone(), c))
            .collect()
    }

    /// One batch existence query for the whole tick; falls back to per-link
    /// probes if the batch query itself fails, so a single storage hiccup
    /// never drops a full tick.
    async fn dedup_against_storage(
        &self,
        candidates: Vec<(Source, ItemCandidate)>,
    ) -> Vec<(Source, ItemCandidate)> {
        let links: Vec<String> = candidates.iter().map(|(_, c)| c.link.clone()).collect();

        match self.store.existing_links(&links).await {
            Ok(existing) => candidates
                .into_iter()
                .filter(|(_, c)| !existing.contains(&c.link))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Batch dedup failed, falling back to per-link probes");
                self.metrics.poller.dedup_fallbacks.inc();
                let mut fresh = Vec::new();
                for (source, candidate) in candidates {
                    match self.store.link_exists(&candidate.link).await {
                        Ok(false) => fresh.push((source, candidate)),
                        Ok(true) => {}
                        Err(e) => {
                            warn!(link = %candidate.link, error = %e, "Existence probe failed, candidate skipped");
                        }
                    }
                }
                fresh
            }
        }
    }

    /// Active sources, refreshed from storage when the cache is empty or older
    /// than its TTL.
    async fn cached_sources(&self) -> Result<Vec<Source>, NewswireError> {
        {
            let cache = self.cache.lock().expect("source cache lock poisoned");
            let fresh = cache
                .refreshed_at
                .map(|t| t.elapsed() < SOURCE_CACHE_TTL)
                .unwrap_or(false);
            if fresh && !cache.sources.is_empty() {
                return Ok(cache.sources.clone());
            }
        }

        let sources = self.store.active_sources().await?;
        let mut cache = self.cache.lock().expect("source cache lock poisoned");
        cache.sources = sources.clone();
        cache.refreshed_at = Some(Instant::now());
        Ok(sources)
    }
}

fn worker_count(source_count: usize) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    MAX_WORKERS.min(2 * cpus).min(source_count).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_bounds() {
        assert_eq!(worker_count(1), 1);
        assert!(worker_count(100) <= MAX_WORKERS);
        assert!(worker_count(3) <= 3);
        assert_eq!(worker_count(0), 1);
    }
}
