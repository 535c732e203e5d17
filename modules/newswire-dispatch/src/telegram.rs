//! Thin egress wrapper over the Telegram Bot API: per-chat pacing, the `chat`
//! breaker, and classification of API errors into the pipeline taxonomy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use newswire_common::{CircuitBreaker, NewswireError, PerKeyLimiter};
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::RequestError;
use tracing::debug;

use crate::traits::ChatSender;

/// Telegram allows roughly one message per second per chat.
pub const PER_CHAT_INTERVAL: Duration = Duration::from_secs(1);

pub struct TelegramSender {
    bot: Bot,
    breaker: Arc<CircuitBreaker>,
    per_chat: Arc<PerKeyLimiter>,
}

impl TelegramSender {
    pub fn new(token: &str, breaker: Arc<CircuitBreaker>, per_chat: Arc<PerKeyLimiter>) -> Self {
        Self {
            bot: Bot::new(token),
            breaker,
            per_chat,
        }
    }

    async fn send_inner(&self, chat_id: i64, text: &str) -> Result<(), NewswireError> {
        // Per-chat pacing: wait out the remainder of the interval if needed.
        let wait = self.per_chat.wait_for(chat_id);
        if !wait.is_zero() {
            debug!(chat_id, wait_ms = wait.as_millis() as u64, "Per-chat pacing");
            tokio::time::sleep(wait).await;
        }
        self.per_chat.allow(chat_id);

        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Markdown)
            .disable_web_page_preview(true)
            .await
            .map(|_| ())
            .map_err(classify_error)
    }
}

#[async_trait]
impl ChatSender for TelegramSender {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), NewswireError> {
        self.breaker.call(|| self.send_inner(chat_id, text)).await
    }
}

/// Map a Telegram API error onto the pipeline taxonomy. The API reports most
/// recipient problems only in the message text, so classification is by
/// substring.
fn classify_error(e: RequestError) -> NewswireError {
    match e {
        RequestError::RetryAfter(retry_after) => NewswireError::ChatRateLimit {
            retry_after: Some(retry_after),
        },
        other => classify_api_message(&other.to_string()),
    }
}

fn classify_api_message(message: &str) -> NewswireError {
    let lower = message.to_lowercase();
    if lower.contains("too many requests") || lower.contains("retry later") {
        return NewswireError::ChatRateLimit { retry_after: None };
    }
    const PERMANENT: &[&str] = &[
        "bot was blocked",
        "chat not found",
        "user is deactivated",
        "bot was kicked",
        "bad request",
        "unauthorized",
    ];
    if PERMANENT.iter().any(|p| lower.contains(p)) {
        return NewswireError::ChatPermanent(message.to_string());
    }
    NewswireError::TransientNetwork(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_classified_by_substring() {
        let err = classify_api_message("Too Many Requests: retry later");
        assert!(err.is_rate_limit());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_permanent_recipient_errors() {
        for message in [
            "Forbidden: bot was blocked by the user",
            "Bad Request: chat not found",
            "Forbidden: user is deactivated",
            "Unauthorized",
        ] {
            let err = classify_api_message(message);
            assert!(
                matches!(err, NewswireError::ChatPermanent(_)),
                "{message} should be permanent"
            );
        }
    }

    #[test]
    fn test_unknown_errors_are_transient() {
        let err = classify_api_message("connection reset by peer");
        assert!(matches!(err, NewswireError::TransientNetwork(_)));
    }
}
