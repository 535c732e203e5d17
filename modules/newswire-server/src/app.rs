//! Startup wiring and lifecycle: storage bootstrap, bus probing with the
//! degraded-mode fallback, the periodic loops, and signal handling.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use newswire_bus::{BusClient, BusConfig, ItemSink};
use newswire_common::{
    CircuitBreaker, Config, GlobalLimiter, Metrics, PerKeyLimiter,
};
use newswire_dispatch::{
    DirectSink, DispatchStore, Dispatcher, TelegramSender, PER_CHAT_INTERVAL,
};
use newswire_poller::{PollerStore, SourcePoller};
use newswire_scrape::{
    ArticleScraper, ContentCache, FeedFetcher, NoopCache, RedisCache, ScrapeScheduler,
};
use newswire_store::NewsStore;

const BUS_PROBE_ATTEMPTS: u32 = 3;
const BUS_PROBE_BACKOFF: Duration = Duration::from_secs(2);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const POOL_GAUGE_PERIOD: Duration = Duration::from_secs(30);

/// Feeds that moved after sources were seeded; refreshed at every startup.
const RELOCATED_FEEDS: &[(&str, &str)] = &[
    ("http://lenta.ru/rss", "https://lenta.ru/rss"),
    (
        "http://feeds.bbci.co.uk/news/rss.xml",
        "https://feeds.bbci.co.uk/news/rss.xml",
    ),
];

pub async fn run(config: Config) -> Result<()> {
    // Storage is the one dependency the process cannot live without.
    let store = NewsStore::connect(&config.database_url(), config.db_pool_size)
        .await
        .context("failed to open storage")?;
    store.migrate().await.context("schema bootstrap failed")?;
    for (old_url, new_url) in RELOCATED_FEEDS {
        store
            .update_source_url(old_url, new_url)
            .await
            .context("feed URL migration failed")?;
    }
    info!("Storage ready");

    let cache: Arc<dyn ContentCache> = match &config.redis_url {
        Some(url) => match RedisCache::connect(url).await {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                warn!(error = %e, "Content cache unavailable, scraping degrades to origin fetch");
                Arc::new(NoopCache)
            }
        },
        None => Arc::new(NoopCache),
    };

    let bus = probe_bus(&config).await;
    if bus.is_none() {
        if !config.degrade_without_bus {
            anyhow::bail!("event bus unreachable and degraded mode is disabled");
        }
        warn!("Event bus unreachable, running in degraded mode (direct dispatch)");
    }

    let cancel = CancellationToken::new();
    let metrics = Metrics::new();
    let global_limiter = Arc::new(GlobalLimiter::new());
    let per_chat = Arc::new(PerKeyLimiter::new(PER_CHAT_INTERVAL));
    let feed_breaker = Arc::new(CircuitBreaker::feed());
    let article_breaker = Arc::new(CircuitBreaker::article());
    let chat_breaker = Arc::new(CircuitBreaker::chat());

    let chat = Arc::new(TelegramSender::new(
        &config.telegram_bot_token,
        chat_breaker,
        Arc::clone(&per_chat),
    ));

    let dispatcher = Dispatcher::new(
        Arc::new(store.clone()) as Arc<dyn DispatchStore>,
        chat,
        Arc::clone(&global_limiter),
        Arc::clone(&metrics),
        bus.clone(),
    );

    let sink: Arc<dyn ItemSink> = match &bus {
        Some(bus) => Arc::new(bus.clone()),
        None => Arc::new(DirectSink::new(Arc::clone(&dispatcher))),
    };

    let poller = SourcePoller::new(
        Arc::new(store.clone()) as Arc<dyn PollerStore>,
        Arc::new(FeedFetcher::new()),
        sink,
        feed_breaker,
        Arc::clone(&metrics),
    );

    let scheduler = ScrapeScheduler::new(
        store.clone(),
        ArticleScraper::new(),
        cache,
        article_breaker,
        Arc::clone(&metrics),
        config.scrape_batch_size,
        config.scrape_concurrency,
    );

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(poller.run(
        Duration::from_secs(config.poll_interval_secs),
        cancel.clone(),
    )));
    tasks.push(tokio::spawn(scheduler.run(
        Duration::from_secs(config.scrape_interval_mins * 60),
        cancel.clone(),
    )));
    tasks.push(tokio::spawn(Arc::clone(&dispatcher).run_flush(
        Duration::from_secs(config.flush_interval_mins * 60),
        cancel.clone(),
    )));
    tasks.push(tokio::spawn(
        Arc::clone(&per_chat).run_sweeper(cancel.clone()),
    ));
    tasks.push(tokio::spawn(pool_gauge_loop(
        store.clone(),
        Arc::clone(&metrics),
        cancel.clone(),
    )));

    if let Some(bus) = &bus {
        let subscription = bus
            .subscribe_items()
            .await
            .context("items subscription could not be established")?;
        tasks.push(tokio::spawn(
            Arc::clone(&dispatcher).run_ingest(subscription, cancel.clone()),
        ));
    }

    info!(loops = tasks.len(), degraded = bus.is_none(), "Pipeline running");

    wait_for_shutdown().await?;
    cancel.cancel();

    if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(tasks))
        .await
        .is_err()
    {
        warn!("Some loops did not stop within the shutdown grace period");
    }

    Ok(())
}

/// Probe the bus up to three times with a short back-off. `None` selects
/// degraded mode.
async fn probe_bus(config: &Config) -> Option<BusClient> {
    let bus_config = BusConfig {
        url: config.nats_url.clone(),
        items_subject: config.nats_items_subject.clone(),
        notifications_subject: config.nats_notifications_subject.clone(),
    };

    for attempt in 1..=BUS_PROBE_ATTEMPTS {
        match BusClient::connect(&bus_config).await {
            Ok(client) => match client.probe().await {
                Ok(()) => return Some(client),
                Err(e) => warn!(attempt, error = %e, "Bus probe failed"),
            },
            Err(e) => warn!(attempt, error = %e, "Bus connect failed"),
        }
        if attempt < BUS_PROBE_ATTEMPTS {
            tokio::time::sleep(BUS_PROBE_BACKOFF).await;
        }
    }
    None
}

/// Expose storage pool utilization as gauges.
async fn pool_gauge_loop(store: NewsStore, metrics: Arc<Metrics>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(POOL_GAUGE_PERIOD);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let (size, in_use) = store.pool_stats();
                metrics.store.pool_size.set(size as u64);
                metrics.store.pool_in_use.set(in_use as u64);
            }
        }
    }
}

/// Block until a shutdown signal arrives. A reload signal is logged and left
/// to the orchestrator.
async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received, shutting down");
                return Ok(());
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down");
                return Ok(());
            }
            _ = sighup.recv() => {
                info!("SIGHUP received, reload is handled by the orchestrator");
            }
        }
    }
}
