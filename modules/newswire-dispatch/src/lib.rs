//! Notification dispatcher: consumes item events, resolves subscribers,
//! batches per-user pending notifications, and periodically flushes them
//! through the chat adapter under a global adaptive rate limit.

mod dispatcher;
mod format;
mod telegram;
mod traits;

pub use dispatcher::{Dispatcher, DirectSink, PendingNotification};
pub use format::{compose_digest, relative_age};
pub use telegram::{TelegramSender, PER_CHAT_INTERVAL};
pub use traits::{ChatSender, DispatchStore};
