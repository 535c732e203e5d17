//! Periodic fan-out poller: parses every active source on a fixed cadence,
//! deduplicates candidates against storage in one batch, and hands new items
//! to the configured sink (the bus, or the dispatcher directly in degraded
//! mode).

mod poller;
mod traits;

pub use poller::SourcePoller;
pub use traits::{FeedSource, PollerStore};
