use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newswire_bus::{BusClient, ItemEnvelope, ItemSink, NotificationEnvelope};
use newswire_common::{GlobalLimiter, Metrics, NewswireError};
use newswire_store::NewItem;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::format::compose_digest;
use crate::traits::{ChatSender, DispatchStore};

/// Items older than this at ingest time are persisted but never notified.
const NOTIFY_MAX_AGE_HOURS: i64 = 24;

/// One queued notification for one subscriber.
#[derive(Debug, Clone)]
pub struct PendingNotification {
    pub news_id: i64,
    pub source_id: i64,
    pub title: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
    pub source_name: String,
    pub source_url: String,
}

/// Consumes item envelopes, persists them, batches per-user notifications,
/// and flushes them through the chat adapter.
pub struct Dispatcher {
    store: Arc<dyn DispatchStore>,
    chat: Arc<dyn ChatSender>,
    limiter: Arc<GlobalLimiter>,
    metrics: Arc<Metrics>,
    /// Fan-out of delivered notifications; absent in degraded mode.
    bus: Option<BusClient>,
    /// One lock covers both the ingest append path and the flush
    /// swap-and-clear, so no pending item is lost to a race between them.
    pending: Mutex<HashMap<i64, Vec<PendingNotification>>>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn DispatchStore>,
        chat: Arc<dyn ChatSender>,
        limiter: Arc<GlobalLimiter>,
        metrics: Arc<Metrics>,
        bus: Option<BusClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            chat,
            limiter,
            metrics,
            bus,
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Ingest one item envelope: upsert, age-gate, resolve subscribers, and
    /// queue pending notifications. The direct entry point in degraded mode;
    /// the bus ingest loop calls it too.
    pub async fn process(&self, envelope: &ItemEnvelope) -> Result<(), NewswireError> {
        let item = NewItem {
            source_id: envelope.source_id,
            title: envelope.title.clone(),
            description: envelope.description.clone(),
            link: envelope.link.clone(),
            published_at: envelope.published_at,
        };
        let news_id = self.store.upsert_item(&item).await?;
        self.metrics.dispatcher.items_ingested.inc();

        let cutoff = Utc::now() - chrono::Duration::hours(NOTIFY_MAX_AGE_HOURS);
        if envelope.published_at <= cutoff {
            self.metrics.dispatcher.stale_dropped.inc();
            return Ok(());
        }

        let subscribers = self.store.subscribers_of(envelope.source_id).await?;
        if subscribers.is_empty() {
            return Ok(());
        }
        let source_url = self
            .store
            .source_url(envelope.source_id)
            .await?
            .unwrap_or_default();

        let mut pending = self.pending.lock().await;
        for chat_id in subscribers {
            self.store.ensure_user(chat_id).await?;
            if self.store.receipt_exists(chat_id, news_id).await? {
                continue;
            }
            let queue = pending.entry(chat_id).or_default();
            if queue.iter().any(|p| p.news_id == news_id) {
                continue;
            }
            queue.push(PendingNotification {
                news_id,
                source_id: envelope.source_id,
                title: envelope.title.clone(),
                link: envelope.link.clone(),
                published_at: envelope.published_at,
                source_name: envelope.source_name.clone(),
                source_url: source_url.clone(),
            });
            self.metrics.dispatcher.notifications_enqueued.inc();
        }

        Ok(())
    }

    /// One flush cycle: swap out the pending map and send one batched digest
    /// per subscriber, re-enqueueing on any failure.
    pub async fn flush(&self) {
        let swapped = {
            let mut pending = self.pending.lock().await;
            std::mem::take(&mut *pending)
        };
        if swapped.is_empty() {
            return;
        }

        let users = swapped.len();
        info!(users, "Flush tick started");

        for (chat_id, items) in swapped {
            if items.is_empty() {
                continue;
            }

            if !self.limiter.allow() {
                self.metrics.dispatcher.requeues.inc();
                self.re_enqueue(chat_id, items).await;
                continue;
            }

            tokio::time::sleep(self.limiter.current_interval()).await;

            let text = compose_digest(&items, Utc::now());
            match self.chat.send_message(chat_id, &text).await {
                Ok(()) => {
                    let news_ids: Vec<i64> = items.iter().map(|p| p.news_id).collect();
                    match self.store.append_receipts(chat_id, &news_ids).await {
                        Ok(()) => {
                            self.metrics.dispatcher.messages_sent.inc();
                            self.metrics
                                .dispatcher
                                .receipts_written
                                .add(news_ids.len() as u64);
                            self.publish_notifications(chat_id, &items).await;
                            self.limiter.relax();
                        }
                        Err(e) => {
                            warn!(chat_id, error = %e, "Receipt commit failed, re-enqueueing");
                            self.metrics.dispatcher.requeues.inc();
                            self.re_enqueue(chat_id, items).await;
                        }
                    }
                }
                Err(e) if e.is_rate_limit() => {
                    warn!(chat_id, retry_after = ?e.retry_after(), "Chat rate limit hit");
                    self.metrics.dispatcher.rate_limit_hits.inc();
                    self.limiter.escalate(e.retry_after());
                    self.re_enqueue(chat_id, items).await;
                }
                Err(e @ NewswireError::ChatPermanent(_)) => {
                    error!(chat_id, error = %e, "Permanent chat error, re-enqueueing");
                    self.metrics.dispatcher.send_failures.inc();
                    self.re_enqueue(chat_id, items).await;
                }
                Err(e) => {
                    warn!(chat_id, error = %e, "Send failed, re-enqueueing");
                    self.metrics.dispatcher.send_failures.inc();
                    self.re_enqueue(chat_id, items).await;
                }
            }
        }
    }

    /// Put a user's batch back, ahead of anything queued meanwhile, so
    /// insertion order survives a failed flush.
    async fn re_enqueue(&self, chat_id: i64, mut items: Vec<PendingNotification>) {
        let mut pending = self.pending.lock().await;
        let queue = pending.entry(chat_id).or_default();
        items.extend(queue.drain(..));
        *queue = items;
    }

    async fn publish_notifications(&self, chat_id: i64, items: &[PendingNotification]) {
        let Some(bus) = &self.bus else { return };
        for item in items {
            let envelope = NotificationEnvelope {
                chat_id,
                news_id: item.news_id,
                source_id: item.source_id,
                source_name: item.source_name.clone(),
                title: item.title.clone(),
                link: item.link.clone(),
                published_at: item.published_at,
            };
            if let Err(e) = bus.publish_notification(&envelope).await {
                warn!(chat_id, news_id = item.news_id, error = %e, "Notification publish dropped");
                self.metrics.bus.publish_failures.inc();
            }
        }
    }

    /// Pending queue sizes, for tests and the administrative surface.
    pub async fn pending_counts(&self) -> HashMap<i64, usize> {
        self.pending
            .lock()
            .await
            .iter()
            .map(|(chat_id, queue)| (*chat_id, queue.len()))
            .collect()
    }

    /// Periodic flush loop: first fire after one period.
    pub async fn run_flush(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Dispatcher flush loop stopped");
                    return;
                }
                _ = ticker.tick() => self.flush().await,
            }
        }
    }

    /// Long-lived ingest loop over the `items` subscription. Acknowledgement
    /// is returning without error; failed envelopes are logged and skipped
    /// (storage-level dedup covers re-observation).
    pub async fn run_ingest(
        self: Arc<Self>,
        mut subscription: newswire_bus::ItemSubscription,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Dispatcher ingest loop stopped");
                    return;
                }
                next = subscription.next() => match next {
                    None => {
                        warn!("Items subscription ended");
                        return;
                    }
                    Some(Ok(envelope)) => {
                        self.metrics.bus.consumed.inc();
                        if let Err(e) = self.process(&envelope).await {
                            warn!(link = %envelope.link, error = %e, "Ingest failed for envelope");
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Malformed envelope skipped");
                    }
                },
            }
        }
    }
}

/// In-process sink used in degraded mode: the poller feeds the dispatcher
/// directly, bypassing the bus, with identical semantics and locking.
pub struct DirectSink {
    dispatcher: Arc<Dispatcher>,
}

impl DirectSink {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl ItemSink for DirectSink {
    async fn publish_item(&self, envelope: &ItemEnvelope) -> Result<(), NewswireError> {
        self.dispatcher.process(envelope).await
    }
}
