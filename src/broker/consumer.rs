use futures_lite::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::ledger::DeliveryLedger;
use crate::errors::{RelayError, Result};
use crate::message::InboundMessage;

/// Subscribes to the incoming queue and hands out one message at a time.
///
/// Delivery is cooperative: `next_delivery` blocks until the broker pushes
/// one message, and the caller is expected to forward and acknowledge it
/// before waiting again. A prefetch of 1 makes the broker enforce the same
/// single-in-flight discipline. Nothing is ever auto-acknowledged; a message
/// that is not acked comes back on redelivery.
pub struct Consumer {
    channel: Channel,
    stream: Mutex<lapin::Consumer>,
    ledger: DeliveryLedger,
    queue: String,
}

impl Consumer {
    /// Register a manual-ack consumer on `queue`.
    pub async fn subscribe(channel: Channel, queue: &str) -> Result<Self> {
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| RelayError::Channel(format!("failed to set prefetch: {e}")))?;

        let consumer_tag = format!("register-publisher-{}", Uuid::new_v4());
        let stream = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| RelayError::Consume(e.to_string()))?;

        info!(queue = %queue, consumer_tag = %consumer_tag, "subscribed");

        Ok(Self {
            channel,
            stream: Mutex::new(stream),
            ledger: DeliveryLedger::new(),
            queue: queue.to_string(),
        })
    }

    /// Wait for the next delivery. The returned message's delivery tag is
    /// recorded as outstanding until `ack` settles it.
    pub async fn next_delivery(&self) -> Result<InboundMessage> {
        let mut stream = self.stream.lock().await;

        match stream.next().await {
            Some(Ok(delivery)) => {
                self.ledger.open(delivery.delivery_tag)?;
                debug!(
                    queue = %self.queue,
                    delivery_tag = delivery.delivery_tag,
                    redelivered = delivery.redelivered,
                    "delivery received"
                );
                Ok(InboundMessage::from_delivery(&delivery))
            }
            Some(Err(err)) => Err(RelayError::Consume(err.to_string())),
            None => Err(RelayError::Consume(format!(
                "consumer stream for queue '{}' ended",
                self.queue
            ))),
        }
    }

    /// Acknowledge a single delivery.
    ///
    /// The tag must belong to an outstanding delivery: acking an unknown tag,
    /// or the same tag twice, is a protocol violation. Cumulative
    /// acknowledgment of a tag range is unsupported and is rejected by the
    /// ledger before anything reaches the wire.
    pub async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.ledger.settle(delivery_tag, false)?;

        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| RelayError::Consume(format!("failed to ack tag {delivery_tag}: {e}")))
    }

    /// Deliveries handed out but not yet acknowledged. With prefetch 1 this
    /// is at most 1.
    pub fn unacked(&self) -> usize {
        self.ledger.outstanding()
    }

    /// Close the consuming channel. Part of the guaranteed-cleanup path. An
    /// unacked delivery at this point goes back to the queue for redelivery.
    pub async fn close(&self) -> Result<()> {
        if self.unacked() > 0 {
            debug!(
                queue = %self.queue,
                unacked = self.unacked(),
                "closing consumer with an unacked delivery, broker will redeliver"
            );
        }
        self.channel
            .close(0, "closing consumer")
            .await
            .map_err(|e| RelayError::Channel(e.to_string()))
    }
}
