//! Periodic batch loop over items awaiting a scrape: pending or previously
//! failed, published within the last 7 days. Workers are semaphore-bounded and
//! staggered to spread load on origins.

use std::sync::Arc;
use std::time::Duration;

use newswire_common::{CircuitBreaker, Metrics, NewswireError};
use newswire_store::{NewsStore, ScrapeTarget};
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::article::ArticleScraper;
use crate::cache::ContentCache;

/// Per-index stagger step; the total delay is capped at ~1 s.
const STAGGER_STEP: Duration = Duration::from_millis(100);
const STAGGER_CAP: Duration = Duration::from_secs(1);
const STAGGER_JITTER_MS: u64 = 250;

enum Outcome {
    Success,
    Failed,
    Skipped,
}

pub struct ScrapeScheduler {
    store: NewsStore,
    scraper: ArticleScraper,
    cache: Arc<dyn ContentCache>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<Metrics>,
    batch_size: i64,
    concurrency: usize,
}

impl ScrapeScheduler {
    pub fn new(
        store: NewsStore,
        scraper: ArticleScraper,
        cache: Arc<dyn ContentCache>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<Metrics>,
        batch_size: i64,
        concurrency: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            scraper,
            cache,
            breaker,
            metrics,
            batch_size,
            concurrency,
        })
    }

    /// Periodic loop: first fire after one period, then every period until
    /// cancellation.
    pub async fn run(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Scrape scheduler stopped");
                    return;
                }
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    /// One scrape cycle over the next batch.
    pub async fn tick(self: &Arc<Self>) {
        self.metrics.scraper.ticks.inc();

        let targets = match self.store.scrape_batch(self.batch_size).await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(error = %e, "Failed to load scrape batch");
                return;
            }
        };
        if targets.is_empty() {
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(targets.len());

        for (index, target) in targets.into_iter().enumerate() {
            let scheduler = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let delay = stagger_delay(index);

            handles.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                scheduler.process_target(target).await
            }));
        }

        let mut successes = 0u64;
        let mut failures = 0u64;
        let mut skipped = 0u64;
        for handle in handles {
            match handle.await {
                Ok(Outcome::Success) => successes += 1,
                Ok(Outcome::Failed) => failures += 1,
                Ok(Outcome::Skipped) => skipped += 1,
                Err(e) => {
                    warn!(error = %e, "Scrape worker panicked");
                    failures += 1;
                }
            }
        }

        self.metrics.scraper.scraped_ok.add(successes);
        self.metrics.scraper.scrape_failures.add(failures);
        info!(successes, failures, skipped, "Scrape tick complete");
    }

    async fn process_target(&self, target: ScrapeTarget) -> Outcome {
        if let Some(payload) = self.cache.get(&target.link).await {
            self.metrics.scraper.cache_hits.inc();
            return match self.store.mark_scrape_success(target.id, &payload).await {
                Ok(()) => Outcome::Success,
                Err(e) => {
                    warn!(id = target.id, error = %e, "Failed to persist cached scrape");
                    Outcome::Failed
                }
            };
        }
        self.metrics.scraper.cache_misses.inc();

        let scraped = self
            .breaker
            .call(|| self.scraper.scrape(&target.link))
            .await;

        match scraped {
            Ok(payload) => {
                self.cache.put(&target.link, &payload).await;
                match self.store.mark_scrape_success(target.id, &payload).await {
                    Ok(()) => Outcome::Success,
                    Err(e) => {
                        warn!(id = target.id, error = %e, "Failed to persist scrape payload");
                        Outcome::Failed
                    }
                }
            }
            Err(NewswireError::BreakerOpen(_)) => {
                // Refused locally; the item keeps its status and is retried
                // next tick.
                self.metrics.scraper.breaker_refusals.inc();
                Outcome::Skipped
            }
            Err(e) => {
                if let Err(persist_err) = self
                    .store
                    .mark_scrape_failure(target.id, &e.to_string())
                    .await
                {
                    warn!(id = target.id, error = %persist_err, "Failed to record scrape failure");
                }
                Outcome::Failed
            }
        }
    }
}

fn stagger_delay(index: usize) -> Duration {
    let base = STAGGER_STEP
        .saturating_mul(index as u32)
        .min(STAGGER_CAP);
    let jitter = Duration::from_millis(rand::rng().random_range(0..STAGGER_JITTER_MS));
    base + jitter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stagger_delay_is_capped() {
        for index in [0usize, 3, 10, 500] {
            let delay = stagger_delay(index);
            assert!(delay <= STAGGER_CAP + Duration::from_millis(STAGGER_JITTER_MS));
        }
    }

    #[test]
    fn test_stagger_delay_grows_with_index() {
        // Base component (without jitter) is index * step until the cap
        let low = stagger_delay(0);
        assert!(low < STAGGER_STEP + Duration::from_millis(STAGGER_JITTER_MS));
        let high = stagger_delay(9);
        assert!(high >= Duration::from_millis(900));
    }
}
