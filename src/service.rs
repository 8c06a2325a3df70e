use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::audit::AuditLog;
use crate::broker::{declare_exchange, declare_queue, ConnectionManager, Consumer, Producer};
use crate::config::RelayConfig;
use crate::errors::{RelayError, Result};
use crate::retry::{ensure, RetryPolicy};

/// Fixed pause before rebuilding after exhausted retries or an unexpected
/// failure.
pub const DEGRADED_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Starting,
    Running,
    Degraded,
    Stopped,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelayState::Starting => "starting",
            RelayState::Running => "running",
            RelayState::Degraded => "degraded",
            RelayState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// The top-level service loop: consume from the System of Record queue,
/// forward to the outgoing exchange, acknowledge, forever.
///
/// Ordinary faults never terminate the loop: it degrades, waits, and
/// rebuilds its connections. Only an operator interrupt (or a protocol
/// violation, which signals corrupted bookkeeping) stops it, and both paths
/// run the guaranteed cleanup.
pub struct Relay {
    config: RelayConfig,
    audit: Arc<AuditLog>,
    policy: RetryPolicy,
}

impl Relay {
    pub fn new(config: RelayConfig, audit: Arc<AuditLog>) -> Self {
        let policy = RetryPolicy::with_max_retries(config.max_retries);
        Self {
            config,
            audit,
            policy,
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Drive the relay until `shutdown` fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                break;
            }

            info!(state = %RelayState::Starting, "building broker sessions");

            match self.run_once(&mut shutdown).await {
                Ok(()) => break,
                Err(err @ RelayError::ProtocolViolation(_)) => {
                    error!(error = %err, "integrity failure, refusing to continue");
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        state = %RelayState::Degraded,
                        error = %err,
                        backoff_secs = DEGRADED_BACKOFF.as_secs(),
                        "relay degraded, will rebuild"
                    );
                    tokio::select! {
                        _ = wait_for_shutdown(&mut shutdown) => break,
                        _ = sleep(DEGRADED_BACKOFF) => {}
                    }
                }
            }
        }

        info!(state = %RelayState::Stopped, "relay stopped");
        Ok(())
    }

    /// One connect-pump-cleanup cycle. Connections are closed on every exit
    /// path, normal shutdown and error alike.
    async fn run_once(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let incoming = ConnectionManager::connect(
            &self.config.incoming.uri,
            false,
            self.config.connect_timeout,
        )
        .await?;

        let outgoing = match ConnectionManager::connect(
            &self.config.outgoing.uri,
            self.config.confirm_publish,
            self.config.connect_timeout,
        )
        .await
        {
            Ok(connection) => connection,
            Err(err) => {
                let _ = incoming.close().await;
                return Err(err);
            }
        };

        let result = self.pump(&incoming, &outgoing, shutdown).await;

        let _ = incoming.close().await;
        let _ = outgoing.close().await;

        result
    }

    async fn pump(
        &self,
        incoming: &ConnectionManager,
        outgoing: &ConnectionManager,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let consume_channel = incoming.open_channel().await?;
        let publish_channel = outgoing.open_channel().await?;

        declare_exchange(&consume_channel, &self.config.incoming.exchange).await?;
        declare_queue(
            &consume_channel,
            &self.config.incoming.queue,
            &self.config.incoming.exchange,
            self.config.incoming.binding_key.as_deref(),
            true,
        )
        .await?;
        declare_exchange(&publish_channel, &self.config.outgoing.exchange).await?;

        let producer = Producer::new(publish_channel, self.config.outgoing.exchange.name.clone());
        let consumer = Consumer::subscribe(consume_channel, &self.config.incoming.queue).await?;

        info!(
            state = %RelayState::Running,
            incoming_queue = %self.config.incoming.queue,
            outgoing_exchange = %producer.exchange(),
            "forwarding messages"
        );

        let result = self.pump_messages(&producer, &consumer, shutdown).await;

        let _ = consumer.close().await;
        let _ = producer.close().await;

        result
    }

    async fn pump_messages(
        &self,
        producer: &Producer,
        consumer: &Consumer,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            let message = tokio::select! {
                _ = wait_for_shutdown(shutdown) => return Ok(()),
                received = ensure(
                    &self.policy,
                    |err, interval| warn!(error = %err, ?interval, "event wait failed, retrying"),
                    move || consumer.next_delivery(),
                ) => received?,
            };

            let title = message.title();
            self.audit.pulled(title.clone(), message.delivery_tag);

            // Forward first. A failed forward propagates without the source
            // message ever being acked, so the broker redelivers it.
            let body = message.body.as_slice();
            let routing_key = message.routing_key.as_str();
            let headers = &message.headers;
            ensure(
                &self.policy,
                |err, interval| warn!(error = %err, ?interval, "forward failed, retrying"),
                move || producer.publish(body, routing_key, headers),
            )
            .await?;

            self.audit.pushed(title.clone(), routing_key);
            self.audit.push_acknowledged(title.clone());

            consumer.ack(message.delivery_tag).await?;
            self.audit.pull_acknowledged(title, message.delivery_tag);
        }
    }
}

/// Resolves once shutdown is requested. A dropped sender counts as a request;
/// there is no one left to ask for anything else.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_render_for_logging() {
        assert_eq!(RelayState::Starting.to_string(), "starting");
        assert_eq!(RelayState::Running.to_string(), "running");
        assert_eq!(RelayState::Degraded.to_string(), "degraded");
        assert_eq!(RelayState::Stopped.to_string(), "stopped");
    }

    #[tokio::test]
    async fn shutdown_wait_resolves_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        wait_for_shutdown(&mut rx).await;
    }

    #[tokio::test]
    async fn shutdown_wait_resolves_when_sender_goes_away() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        wait_for_shutdown(&mut rx).await;
    }

    #[tokio::test]
    async fn shutdown_wait_ignores_false_updates() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move {
            wait_for_shutdown(&mut rx).await;
        });

        tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        tx.send(true).unwrap();
        waiter.await.unwrap();
    }
}
