//! Dispatcher semantics against in-memory fakes: ingest age-gating, receipt
//! dedup, batched flush, rate-limit escalation, partial failures, and the
//! degraded-mode direct path.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use newswire_bus::{ItemEnvelope, ItemSink};
use newswire_common::{GlobalLimiter, Metrics, NewswireError};
use newswire_dispatch::{DirectSink, DispatchStore, Dispatcher, ChatSender};
use newswire_store::NewItem;

#[derive(Default)]
struct FakeStore {
    items: Mutex<HashMap<String, i64>>,
    next_id: AtomicI64,
    subscribers: Mutex<HashMap<i64, Vec<i64>>>,
    receipts: Mutex<HashSet<(i64, i64)>>,
    users: Mutex<HashSet<i64>>,
    fail_receipts: AtomicBool,
}

impl FakeStore {
    fn new(subscribers: HashMap<i64, Vec<i64>>) -> Arc<Self> {
        let store = Self::default();
        store.next_id.store(1, Ordering::SeqCst);
        *store.subscribers.lock().unwrap() = subscribers;
        Arc::new(store)
    }

    fn insert_receipt(&self, chat_id: i64, news_id: i64) {
        self.receipts.lock().unwrap().insert((chat_id, news_id));
    }

    fn receipts(&self) -> HashSet<(i64, i64)> {
        self.receipts.lock().unwrap().clone()
    }
}

#[async_trait]
impl DispatchStore for FakeStore {
    async fn upsert_item(&self, item: &NewItem) -> Result<i64, NewswireError> {
        let mut items = self.items.lock().unwrap();
        let id = *items.entry(item.link.clone()).or_insert_with(|| {
            self.next_id.fetch_add(1, Ordering::SeqCst)
        });
        Ok(id)
    }

    async fn subscribers_of(&self, source_id: i64) -> Result<Vec<i64>, NewswireError> {
        Ok(self
            .subscribers
            .lock()
            .unwrap()
            .get(&source_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn source_url(&self, _source_id: i64) -> Result<Option<String>, NewswireError> {
        Ok(Some("https://s".to_string()))
    }

    async fn ensure_user(&self, chat_id: i64) -> Result<(), NewswireError> {
        self.users.lock().unwrap().insert(chat_id);
        Ok(())
    }

    async fn receipt_exists(&self, chat_id: i64, news_id: i64) -> Result<bool, NewswireError> {
        Ok(self.receipts.lock().unwrap().contains(&(chat_id, news_id)))
    }

    async fn append_receipts(&self, chat_id: i64, news_ids: &[i64]) -> Result<(), NewswireError> {
        if self.fail_receipts.load(Ordering::SeqCst) {
            return Err(NewswireError::StorageFatal("commit failed".into()));
        }
        let mut receipts = self.receipts.lock().unwrap();
        for news_id in news_ids {
            receipts.insert((chat_id, *news_id));
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeChat {
    sent: Mutex<Vec<(i64, String)>>,
    script: Mutex<HashMap<i64, VecDeque<NewswireError>>>,
}

impl FakeChat {
    fn fail_next(&self, chat_id: i64, error: NewswireError) {
        self.script
            .lock()
            .unwrap()
            .entry(chat_id)
            .or_default()
            .push_back(error);
    }

    fn sent_to(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == chat_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl ChatSender for FakeChat {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), NewswireError> {
        if let Some(queue) = self.script.lock().unwrap().get_mut(&chat_id) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

fn envelope(link: &str, age_minutes: i64) -> ItemEnvelope {
    ItemEnvelope {
        source_id: 7,
        source_name: "S".to_string(),
        title: "T".to_string(),
        description: String::new(),
        link: link.to_string(),
        published_at: Utc::now() - ChronoDuration::minutes(age_minutes),
    }
}

struct Harness {
    store: Arc<FakeStore>,
    chat: Arc<FakeChat>,
    limiter: Arc<GlobalLimiter>,
    metrics: Arc<Metrics>,
    dispatcher: Arc<Dispatcher>,
}

fn harness(subscribers: HashMap<i64, Vec<i64>>) -> Harness {
    let store = FakeStore::new(subscribers);
    let chat = Arc::new(FakeChat::default());
    let limiter = Arc::new(GlobalLimiter::new());
    let metrics = Metrics::new();
    let dispatcher = Dispatcher::new(
        Arc::clone(&store) as Arc<dyn DispatchStore>,
        Arc::clone(&chat) as Arc<dyn ChatSender>,
        Arc::clone(&limiter),
        Arc::clone(&metrics),
        None,
    );
    Harness {
        store,
        chat,
        limiter,
        metrics,
        dispatcher,
    }
}

#[tokio::test(start_paused = true)]
async fn test_fresh_item_reaches_all_subscribers() {
    let h = harness(HashMap::from([(7, vec![100, 200])]));

    h.dispatcher.process(&envelope("https://x/a", 15)).await.unwrap();
    assert_eq!(h.dispatcher.pending_counts().await.len(), 2);

    h.dispatcher.flush().await;

    for chat_id in [100, 200] {
        let sent = h.chat.sent_to(chat_id);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], "1. T   [S](https://x/a) • 15 мин");
    }
    assert_eq!(h.store.receipts(), HashSet::from([(100, 1), (200, 1)]));
    // Flushed queues are empty afterwards
    assert!(h.dispatcher.pending_counts().await.is_empty());
    // Both users auto-created
    assert!(h.store.users.lock().unwrap().contains(&100));
}

#[tokio::test(start_paused = true)]
async fn test_stale_item_is_persisted_but_not_notified() {
    let h = harness(HashMap::from([(7, vec![100])]));

    h.dispatcher.process(&envelope("https://x/old", 25 * 60)).await.unwrap();
    // Boundary: exactly 24 h old is also not notified
    h.dispatcher.process(&envelope("https://x/b", 24 * 60)).await.unwrap();

    assert!(h.dispatcher.pending_counts().await.is_empty());
    assert_eq!(h.metrics.dispatcher.stale_dropped.get(), 2);
    // Items were still persisted
    assert_eq!(h.store.items.lock().unwrap().len(), 2);

    h.dispatcher.flush().await;
    assert!(h.store.receipts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reingest_before_flush_queues_once() {
    let h = harness(HashMap::from([(7, vec![100])]));

    let env = envelope("https://x/a", 10);
    h.dispatcher.process(&env).await.unwrap();
    h.dispatcher.process(&env).await.unwrap();

    assert_eq!(h.dispatcher.pending_counts().await.get(&100), Some(&1));

    h.dispatcher.flush().await;
    assert_eq!(h.chat.sent_to(100).len(), 1);
    assert_eq!(h.store.receipts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_existing_receipt_suppresses_notification() {
    let h = harness(HashMap::from([(7, vec![100, 200])]));
    // Item id 1 was already delivered to user 100
    h.store.insert_receipt(100, 1);

    h.dispatcher.process(&envelope("https://x/a", 10)).await.unwrap();

    let counts = h.dispatcher.pending_counts().await;
    assert!(!counts.contains_key(&100));
    assert_eq!(counts.get(&200), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_escalates_and_requeues() {
    let h = harness(HashMap::from([(7, vec![100])]));
    h.chat.fail_next(
        100,
        NewswireError::ChatRateLimit {
            retry_after: Some(Duration::from_secs(400)),
        },
    );

    h.dispatcher.process(&envelope("https://x/a", 10)).await.unwrap();
    h.dispatcher.flush().await;

    // retry-after of 400 s lands in the 30 s tier
    assert_eq!(h.limiter.current_interval(), Duration::from_secs(30));
    assert_eq!(h.dispatcher.pending_counts().await.get(&100), Some(&1));
    assert!(h.store.receipts().is_empty());
    assert_eq!(h.metrics.dispatcher.rate_limit_hits.get(), 1);

    // Next flush succeeds and the interval relaxes by 10%
    tokio::time::advance(Duration::from_secs(31)).await;
    h.dispatcher.flush().await;

    assert_eq!(h.chat.sent_to(100).len(), 1);
    assert_eq!(h.store.receipts(), HashSet::from([(100, 1)]));
    assert!(h.dispatcher.pending_counts().await.is_empty());
    assert_eq!(h.limiter.current_interval(), Duration::from_secs(27));
}

#[tokio::test(start_paused = true)]
async fn test_partial_subscriber_failure() {
    let h = harness(HashMap::from([(7, vec![100, 200])]));
    h.chat.fail_next(
        200,
        NewswireError::ChatPermanent("Forbidden: bot was blocked by the user".into()),
    );

    h.dispatcher.process(&envelope("https://x/a", 10)).await.unwrap();
    h.dispatcher.flush().await;

    // User 100 delivered and committed; user 200 re-enqueued with no receipts
    assert_eq!(h.chat.sent_to(100).len(), 1);
    assert_eq!(h.store.receipts(), HashSet::from([(100, 1)]));
    assert_eq!(h.dispatcher.pending_counts().await.get(&200), Some(&1));
    assert_eq!(h.metrics.dispatcher.send_failures.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_receipt_commit_failure_requeues() {
    let h = harness(HashMap::from([(7, vec![100])]));
    h.store.fail_receipts.store(true, Ordering::SeqCst);

    h.dispatcher.process(&envelope("https://x/a", 10)).await.unwrap();
    h.dispatcher.flush().await;

    assert!(h.store.receipts().is_empty());
    assert_eq!(h.dispatcher.pending_counts().await.get(&100), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_limiter_denial_requeues_whole_list() {
    let h = harness(HashMap::from([(7, vec![100])]));
    // Consume the admission so the flush is denied
    assert!(h.limiter.allow());

    h.dispatcher.process(&envelope("https://x/a", 10)).await.unwrap();
    h.dispatcher.flush().await;

    assert!(h.chat.sent_to(100).is_empty());
    assert_eq!(h.dispatcher.pending_counts().await.get(&100), Some(&1));
    assert_eq!(h.metrics.dispatcher.requeues.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_requeue_preserves_insertion_order() {
    let h = harness(HashMap::from([(7, vec![100])]));
    h.chat.fail_next(100, NewswireError::TransientNetwork("reset".into()));

    h.dispatcher.process(&envelope("https://x/a", 10)).await.unwrap();
    h.dispatcher.flush().await;
    // A second item arrives after the failed flush
    h.dispatcher.process(&envelope("https://x/b", 5)).await.unwrap();

    tokio::time::advance(Duration::from_secs(1)).await;
    h.dispatcher.flush().await;

    let sent = h.chat.sent_to(100);
    assert_eq!(sent.len(), 1);
    let lines: Vec<&str> = sent[0].lines().collect();
    assert!(lines[0].starts_with("1. ") && lines[0].contains("https://x/a"));
    assert!(lines[1].starts_with("2. ") && lines[1].contains("https://x/b"));
}

#[tokio::test(start_paused = true)]
async fn test_degraded_mode_direct_sink() {
    let h = harness(HashMap::from([(7, vec![100])]));
    let sink = DirectSink::new(Arc::clone(&h.dispatcher));

    sink.publish_item(&envelope("https://x/a", 10)).await.unwrap();

    assert_eq!(h.dispatcher.pending_counts().await.get(&100), Some(&1));

    h.dispatcher.flush().await;
    assert_eq!(h.chat.sent_to(100).len(), 1);
    assert_eq!(h.store.receipts(), HashSet::from([(100, 1)]));
}
