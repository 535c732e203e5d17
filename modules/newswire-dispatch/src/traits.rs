use async_trait::async_trait;
use newswire_common::NewswireError;
use newswire_store::{NewItem, NewsStore, StoreError};

/// Storage operations the dispatcher needs, behind a seam so tests can fake
/// them.
#[async_trait]
pub trait DispatchStore: Send + Sync {
    async fn upsert_item(&self, item: &NewItem) -> Result<i64, NewswireError>;
    async fn subscribers_of(&self, source_id: i64) -> Result<Vec<i64>, NewswireError>;
    async fn source_url(&self, source_id: i64) -> Result<Option<String>, NewswireError>;
    async fn ensure_user(&self, chat_id: i64) -> Result<(), NewswireError>;
    async fn receipt_exists(&self, chat_id: i64, news_id: i64) -> Result<bool, NewswireError>;
    /// Append one receipt per item in a single transaction.
    async fn append_receipts(&self, chat_id: i64, news_ids: &[i64]) -> Result<(), NewswireError>;
}

fn map_store_error(e: StoreError) -> NewswireError {
    if e.is_conflict() {
        NewswireError::StorageConflict(e.to_string())
    } else {
        NewswireError::StorageFatal(e.to_string())
    }
}

#[async_trait]
impl DispatchStore for NewsStore {
    async fn upsert_item(&self, item: &NewItem) -> Result<i64, NewswireError> {
        NewsStore::upsert_item(self, item).await.map_err(map_store_error)
    }

    async fn subscribers_of(&self, source_id: i64) -> Result<Vec<i64>, NewswireError> {
        NewsStore::subscribers_of(self, source_id)
            .await
            .map_err(map_store_error)
    }

    async fn source_url(&self, source_id: i64) -> Result<Option<String>, NewswireError> {
        let source = NewsStore::source_by_id(self, source_id)
            .await
            .map_err(map_store_error)?;
        Ok(source.map(|s| s.url))
    }

    async fn ensure_user(&self, chat_id: i64) -> Result<(), NewswireError> {
        NewsStore::ensure_user(self, chat_id, None)
            .await
            .map_err(map_store_error)
    }

    async fn receipt_exists(&self, chat_id: i64, news_id: i64) -> Result<bool, NewswireError> {
        NewsStore::receipt_exists(self, chat_id, news_id)
            .await
            .map_err(map_store_error)
    }

    async fn append_receipts(&self, chat_id: i64, news_ids: &[i64]) -> Result<(), NewswireError> {
        NewsStore::append_receipts(self, chat_id, news_ids)
            .await
            .map_err(map_store_error)
    }
}

/// Chat egress seam. The production implementation wraps the Telegram Bot API
/// behind the `chat` breaker.
#[async_trait]
pub trait ChatSender: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), NewswireError>;
}
