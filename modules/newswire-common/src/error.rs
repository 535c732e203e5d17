use std::time::Duration;

use thiserror::Error;

/// Result type alias used across the pipeline crates.
pub type Result<T> = std::result::Result<T, NewswireError>;

/// The error kinds the pipeline distinguishes. Callers branch on the kind,
/// never on message text.
#[derive(Error, Debug)]
pub enum NewswireError {
    /// Connect/DNS/TCP/TLS failure on egress. Retried by the breaker's
    /// admission cycle, never surfaced to the user.
    #[error("network error: {0}")]
    TransientNetwork(String),

    #[error("fetch timed out: {0}")]
    FetchTimeout(String),

    /// Article body exceeded the scraper's size cap.
    #[error("payload too large: {url} ({size} bytes)")]
    PayloadTooLarge { url: String, size: u64 },

    /// Malformed feed, article, or envelope.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("bus unavailable: {0}")]
    BusUnavailable(String),

    /// Call refused locally by an open circuit breaker.
    #[error("{0} breaker is open")]
    BreakerOpen(String),

    /// Downstream rate-limit signal from the chat API.
    #[error("chat rate limited (retry after {retry_after:?})")]
    ChatRateLimit { retry_after: Option<Duration> },

    /// Permanent recipient error: blocked, chat not found, bad request.
    #[error("permanent chat error: {0}")]
    ChatPermanent(String),

    /// Unique-constraint hit; treated as idempotent success at call sites.
    #[error("storage conflict: {0}")]
    StorageConflict(String),

    #[error("storage error: {0}")]
    StorageFatal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl NewswireError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, NewswireError::ChatRateLimit { .. })
    }

    /// Server-supplied retry-after hint, if the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            NewswireError::ChatRateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn is_breaker_open(&self) -> bool {
        matches!(self, NewswireError::BreakerOpen(_))
    }
}
