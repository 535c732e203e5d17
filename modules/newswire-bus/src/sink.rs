use async_trait::async_trait;
use newswire_common::NewswireError;

use crate::envelope::ItemEnvelope;
use crate::nats::BusClient;

/// Where the poller hands off candidate items: the bus in normal operation,
/// the dispatcher's in-process entry point in degraded mode.
#[async_trait]
pub trait ItemSink: Send + Sync {
    async fn publish_item(&self, envelope: &ItemEnvelope) -> Result<(), NewswireError>;
}

#[async_trait]
impl ItemSink for BusClient {
    async fn publish_item(&self, envelope: &ItemEnvelope) -> Result<(), NewswireError> {
        BusClient::publish_item(self, envelope).await
    }
}
