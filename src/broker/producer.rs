use lapin::options::BasicPublishOptions;
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel};
use tracing::{debug, warn};
use uuid::Uuid;

use super::ledger::DeliveryLedger;
use crate::errors::{RelayError, Result};

/// Publishes forwarded messages to the outgoing exchange.
///
/// Confirmation is synchronous: when the channel is in confirm mode, `publish`
/// blocks until the broker has accepted the message. Asynchronous confirm
/// tracking proved unreliable in earlier iterations of this service, so
/// throughput is traded for the certainty that a returned `Ok` means the
/// broker holds the message. The pending-confirmation ledger is still kept:
/// the publish sequence tag is opened before the publish goes out and settled
/// when the confirm resolves, so an unknown or repeated confirmation surfaces
/// as a protocol violation instead of passing silently.
pub struct Producer {
    channel: Channel,
    exchange: String,
    confirms: DeliveryLedger,
}

impl Producer {
    pub fn new(channel: Channel, exchange: impl Into<String>) -> Self {
        Self {
            channel,
            exchange: exchange.into(),
            confirms: DeliveryLedger::new(),
        }
    }

    /// Publish `body` with the given routing key and headers.
    ///
    /// Messages are persistent and carry a fresh message id; the incoming
    /// header table travels with the message unmodified.
    pub async fn publish(&self, body: &[u8], routing_key: &str, headers: &FieldTable) -> Result<()> {
        let tag = self.confirms.open_next();

        let properties = BasicProperties::default()
            .with_message_id(Uuid::new_v4().to_string().into())
            .with_content_type("application/json".into())
            .with_delivery_mode(2)
            .with_timestamp(chrono::Utc::now().timestamp() as u64)
            .with_headers(headers.clone());

        let confirm = self
            .channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(|e| {
                self.abandon(tag);
                RelayError::Publish(e.to_string())
            })?;

        match confirm.await {
            Ok(Confirmation::Ack(_)) | Ok(Confirmation::NotRequested) => {
                self.confirms.settle(tag, false)?;
                debug!(
                    exchange = %self.exchange,
                    routing_key = %routing_key,
                    "message published"
                );
                Ok(())
            }
            Ok(Confirmation::Nack(_)) => {
                self.confirms.settle(tag, false)?;
                Err(RelayError::Publish(format!(
                    "broker refused message (nack) on exchange '{}'",
                    self.exchange
                )))
            }
            Err(err) => {
                self.abandon(tag);
                Err(RelayError::Publish(err.to_string()))
            }
        }
    }

    /// Publish sequence tags still awaiting a broker confirmation.
    pub fn pending_confirmations(&self) -> usize {
        self.confirms.outstanding()
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Close the publishing channel. Part of the guaranteed-cleanup path.
    pub async fn close(&self) -> Result<()> {
        if self.pending_confirmations() > 0 {
            warn!(
                pending = self.pending_confirmations(),
                "closing producer with unresolved confirmations"
            );
        }
        self.channel
            .close(0, "closing producer")
            .await
            .map_err(|e| RelayError::Channel(e.to_string()))
    }

    // The broker never saw (or never answered for) this publish; forget the
    // tag so the failure is not later misreported as an unknown confirmation.
    fn abandon(&self, tag: u64) {
        if let Err(err) = self.confirms.settle(tag, false) {
            warn!("failed to abandon publish tag {tag}: {err}");
        }
    }
}
