use std::time::Duration;

use futures::StreamExt;
use newswire_common::NewswireError;
use tracing::{info, warn};

use crate::envelope::{ItemEnvelope, NotificationEnvelope};

/// Publish is fire-and-forget with this deadline.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(3);
/// Subscription establishment probing.
const SUBSCRIBE_ATTEMPTS: u32 = 5;
const SUBSCRIBE_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub url: String,
    pub items_subject: String,
    pub notifications_subject: String,
}

/// NATS-backed event bus adapter.
#[derive(Clone)]
pub struct BusClient {
    client: async_nats::Client,
    items_subject: String,
    notifications_subject: String,
}

impl BusClient {
    pub async fn connect(config: &BusConfig) -> Result<Self, NewswireError> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| NewswireError::BusUnavailable(e.to_string()))?;

        info!(url = %config.url, "Connected to event bus");

        Ok(Self {
            client,
            items_subject: config.items_subject.clone(),
            notifications_subject: config.notifications_subject.clone(),
        })
    }

    /// Round-trip health probe.
    pub async fn probe(&self) -> Result<(), NewswireError> {
        tokio::time::timeout(PUBLISH_TIMEOUT, self.client.flush())
            .await
            .map_err(|_| NewswireError::BusUnavailable("flush timed out".to_string()))?
            .map_err(|e| NewswireError::BusUnavailable(e.to_string()))
    }

    async fn publish(&self, subject: String, payload: Vec<u8>) -> Result<(), NewswireError> {
        let send = async {
            self.client
                .publish(subject, payload.into())
                .await
                .map_err(|e| NewswireError::BusUnavailable(e.to_string()))?;
            self.client
                .flush()
                .await
                .map_err(|e| NewswireError::BusUnavailable(e.to_string()))
        };
        tokio::time::timeout(PUBLISH_TIMEOUT, send)
            .await
            .map_err(|_| NewswireError::BusUnavailable("publish timed out".to_string()))?
    }

    /// Publish one item envelope on the `items` channel.
    pub async fn publish_item(&self, envelope: &ItemEnvelope) -> Result<(), NewswireError> {
        let payload = serde_json::to_vec(envelope)
            .map_err(|e| NewswireError::Parse(e.to_string()))?;
        self.publish(self.items_subject.clone(), payload).await
    }

    /// Publish one notification envelope for downstream consumers.
    pub async fn publish_notification(
        &self,
        envelope: &NotificationEnvelope,
    ) -> Result<(), NewswireError> {
        let payload = serde_json::to_vec(envelope)
            .map_err(|e| NewswireError::Parse(e.to_string()))?;
        self.publish(self.notifications_subject.clone(), payload).await
    }

    /// Establish the long-lived `items` subscription, probing up to five times
    /// with a 10 s back-off before giving up.
    pub async fn subscribe_items(&self) -> Result<ItemSubscription, NewswireError> {
        let mut last_error = String::new();
        for attempt in 1..=SUBSCRIBE_ATTEMPTS {
            match self.client.subscribe(self.items_subject.clone()).await {
                Ok(subscriber) => {
                    info!(subject = %self.items_subject, "Subscribed to items channel");
                    return Ok(ItemSubscription { subscriber });
                }
                Err(e) => {
                    warn!(
                        subject = %self.items_subject,
                        attempt,
                        error = %e,
                        "Failed to subscribe, backing off"
                    );
                    last_error = e.to_string();
                    if attempt < SUBSCRIBE_ATTEMPTS {
                        tokio::time::sleep(SUBSCRIBE_BACKOFF).await;
                    }
                }
            }
        }
        Err(NewswireError::BusUnavailable(format!(
            "subscribe failed after {SUBSCRIBE_ATTEMPTS} attempts: {last_error}"
        )))
    }
}

/// Long-lived subscription over the `items` channel. The consumer
/// acknowledges by returning without error; there is no redelivery.
pub struct ItemSubscription {
    subscriber: async_nats::Subscriber,
}

impl ItemSubscription {
    /// Next envelope, or `None` when the subscription ends. Malformed
    /// payloads surface as `Parse` errors for the caller to log and skip.
    pub async fn next(&mut self) -> Option<Result<ItemEnvelope, NewswireError>> {
        let message = self.subscriber.next().await?;
        Some(
            serde_json::from_slice(&message.payload)
                .map_err(|e| NewswireError::Parse(e.to_string())),
        )
    }
}
