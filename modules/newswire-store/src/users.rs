use newswire_common::clean_text;
use sqlx::{Postgres, Transaction};

use crate::{NewsStore, Result};

impl NewsStore {
    /// Create the user row if it does not exist yet. Chat ids legitimately
    /// appear in subscription and notification paths before the user record.
    pub async fn ensure_user(&self, chat_id: i64, username: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (chat_id, username) VALUES ($1, $2)
            ON CONFLICT (chat_id) DO NOTHING
            "#,
        )
        .bind(chat_id)
        .bind(username.map(clean_text))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Subscribe a chat to a source. Used by the external command surface.
    pub async fn subscribe(&self, chat_id: i64, source_id: i64) -> Result<()> {
        self.ensure_user(chat_id, None).await?;
        sqlx::query(
            r#"
            INSERT INTO subscriptions (chat_id, source_id) VALUES ($1, $2)
            ON CONFLICT (chat_id, source_id) DO NOTHING
            "#,
        )
        .bind(chat_id)
        .bind(source_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn unsubscribe(&self, chat_id: i64, source_id: i64) -> Result<()> {
        sqlx::query(r#"DELETE FROM subscriptions WHERE chat_id = $1 AND source_id = $2"#)
            .bind(chat_id)
            .bind(source_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Chat ids subscribed to a source.
    pub async fn subscribers_of(&self, source_id: i64) -> Result<Vec<i64>> {
        let rows = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT chat_id FROM subscriptions
            WHERE source_id = $1
            ORDER BY chat_id
            "#,
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Has this item already been delivered to this user.
    pub async fn receipt_exists(&self, chat_id: i64, news_id: i64) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(SELECT 1 FROM messages WHERE chat_id = $1 AND news_id = $2)"#,
        )
        .bind(chat_id)
        .bind(news_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Append one delivery receipt inside a caller-owned transaction.
    /// A duplicate (chat_id, news_id) is an idempotent no-op.
    pub async fn insert_receipt(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        chat_id: i64,
        news_id: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (chat_id, news_id) VALUES ($1, $2)
            ON CONFLICT (chat_id, news_id) DO NOTHING
            "#,
        )
        .bind(chat_id)
        .bind(news_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Append receipts for every item sent to a user in one transaction.
    pub async fn append_receipts(&self, chat_id: i64, news_ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for news_id in news_ids {
            self.insert_receipt(&mut tx, chat_id, *news_id).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
