//! Process-wide counters and gauges, grouped by subsystem. The administrative
//! surface pulls these through `render`; everything else just increments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lock-free integer counter (or gauge, via `set`).
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set(&self, n: u64) {
        self.0.store(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct PollerMetrics {
    pub ticks: Counter,
    pub sources_polled: Counter,
    pub feed_errors: Counter,
    pub candidates_seen: Counter,
    pub items_published: Counter,
    pub dedup_fallbacks: Counter,
    pub breaker_refusals: Counter,
}

#[derive(Debug, Default)]
pub struct ScraperMetrics {
    pub ticks: Counter,
    pub scraped_ok: Counter,
    pub scrape_failures: Counter,
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub breaker_refusals: Counter,
}

#[derive(Debug, Default)]
pub struct DispatcherMetrics {
    pub items_ingested: Counter,
    pub stale_dropped: Counter,
    pub notifications_enqueued: Counter,
    pub messages_sent: Counter,
    pub send_failures: Counter,
    pub rate_limit_hits: Counter,
    pub receipts_written: Counter,
    pub requeues: Counter,
}

#[derive(Debug, Default)]
pub struct BusMetrics {
    pub published: Counter,
    pub publish_failures: Counter,
    pub consumed: Counter,
}

#[derive(Debug, Default)]
pub struct StoreMetrics {
    /// Connections currently checked out of the pool.
    pub pool_in_use: Counter,
    pub pool_size: Counter,
}

#[derive(Debug, Default)]
pub struct Metrics {
    pub poller: PollerMetrics,
    pub scraper: ScraperMetrics,
    pub dispatcher: DispatcherMetrics,
    pub bus: BusMetrics,
    pub store: StoreMetrics,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Plain-text listing of every metric, one `subsystem_name value` per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut push = |name: &str, value: u64| {
            out.push_str(name);
            out.push(' ');
            out.push_str(&value.to_string());
            out.push('\n');
        };

        push("poller_ticks", self.poller.ticks.get());
        push("poller_sources_polled", self.poller.sources_polled.get());
        push("poller_feed_errors", self.poller.feed_errors.get());
        push("poller_candidates_seen", self.poller.candidates_seen.get());
        push("poller_items_published", self.poller.items_published.get());
        push("poller_dedup_fallbacks", self.poller.dedup_fallbacks.get());
        push("poller_breaker_refusals", self.poller.breaker_refusals.get());

        push("scraper_ticks", self.scraper.ticks.get());
        push("scraper_scraped_ok", self.scraper.scraped_ok.get());
        push("scraper_scrape_failures", self.scraper.scrape_failures.get());
        push("scraper_cache_hits", self.scraper.cache_hits.get());
        push("scraper_cache_misses", self.scraper.cache_misses.get());
        push("scraper_breaker_refusals", self.scraper.breaker_refusals.get());

        push("dispatcher_items_ingested", self.dispatcher.items_ingested.get());
        push("dispatcher_stale_dropped", self.dispatcher.stale_dropped.get());
        push(
            "dispatcher_notifications_enqueued",
            self.dispatcher.notifications_enqueued.get(),
        );
        push("dispatcher_messages_sent", self.dispatcher.messages_sent.get());
        push("dispatcher_send_failures", self.dispatcher.send_failures.get());
        push("dispatcher_rate_limit_hits", self.dispatcher.rate_limit_hits.get());
        push("dispatcher_receipts_written", self.dispatcher.receipts_written.get());
        push("dispatcher_requeues", self.dispatcher.requeues.get());

        push("bus_published", self.bus.published.get());
        push("bus_publish_failures", self.bus.publish_failures.get());
        push("bus_consumed", self.bus.consumed.get());

        push("store_pool_in_use", self.store.pool_in_use.get());
        push("store_pool_size", self.store.pool_size.get());

        out
    }
}
