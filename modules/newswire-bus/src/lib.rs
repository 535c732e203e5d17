//! Event bus adapter: publish/subscribe of item and notification envelopes
//! over NATS with UTF-8 JSON framing, plus the `ItemSink` seam that lets the
//! poller feed the dispatcher directly when the bus is unavailable.

mod envelope;
mod nats;
mod sink;

pub use envelope::{ItemEnvelope, NotificationEnvelope};
pub use nats::{BusClient, BusConfig, ItemSubscription};
pub use sink::ItemSink;
