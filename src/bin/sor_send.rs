//! Stand-in for the System of Record: publishes one JSON message onto the
//! incoming queue and exits. Useful for exercising a running relay by hand.
//!
//! Usage: `sor-send ['{"json":"body"}'] [title_number]`

use register_publisher::broker::{declare_exchange, declare_queue, ConnectionManager, Producer};
use register_publisher::config::RelayConfig;
use register_publisher::message::headers_with_title;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = RelayConfig::load()?;

    let mut args = std::env::args().skip(1);
    let body = args.next().unwrap_or_else(|| r#"{"a":1}"#.to_string());
    let title = args.next().unwrap_or_else(|| "T1".to_string());

    // The relay forwards bodies opaquely, but a hand-driven sender should not
    // push garbage into the system.
    serde_json::from_str::<serde_json::Value>(&body)?;

    let connection =
        ConnectionManager::connect(&config.incoming.uri, true, config.connect_timeout).await?;
    let channel = connection.open_channel().await?;

    declare_exchange(&channel, &config.incoming.exchange).await?;
    declare_queue(
        &channel,
        &config.incoming.queue,
        &config.incoming.exchange,
        config.incoming.binding_key.as_deref(),
        true,
    )
    .await?;

    // Default direct exchange convention: routing key is the queue name.
    let routing_key = config
        .incoming
        .binding_key
        .clone()
        .unwrap_or_else(|| config.incoming.queue.clone());

    let producer = Producer::new(channel, config.incoming.exchange.name.clone());
    producer
        .publish(body.as_bytes(), &routing_key, &headers_with_title(&title))
        .await?;

    info!(queue = %config.incoming.queue, title = %title, "message sent");

    producer.close().await?;
    connection.close().await?;

    Ok(())
}
