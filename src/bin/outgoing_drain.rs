//! Inspects the outgoing side of the relay: binds a queue to the outgoing
//! exchange, reports its depth, then drains and prints every message. The
//! depth query is the primitive the external monitoring layer consumes.

use lapin::options::{BasicAckOptions, BasicGetOptions};
use register_publisher::broker::{
    declare_exchange, declare_queue, queue_depth, ConnectionManager,
};
use register_publisher::config::RelayConfig;
use register_publisher::message::title_of;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = RelayConfig::load()?;

    let connection =
        ConnectionManager::connect(&config.outgoing.uri, false, config.connect_timeout).await?;
    let channel = connection.open_channel().await?;

    declare_exchange(&channel, &config.outgoing.exchange).await?;
    declare_queue(
        &channel,
        &config.outgoing.queue,
        &config.outgoing.exchange,
        config.outgoing.binding_key.as_deref(),
        true,
    )
    .await?;

    let depth = queue_depth(&channel, &config.outgoing.queue).await?;
    println!("{} messages on '{}'", depth, config.outgoing.queue);

    let mut drained = 0u32;
    loop {
        let fetched = channel
            .basic_get(&config.outgoing.queue, BasicGetOptions::default())
            .await?;

        let Some(message) = fetched else {
            break;
        };

        let title = message
            .delivery
            .properties
            .headers()
            .as_ref()
            .and_then(title_of)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "title={} body={}",
            title,
            String::from_utf8_lossy(&message.delivery.data)
        );

        message.delivery.ack(BasicAckOptions::default()).await?;
        drained += 1;
    }

    println!("drained {drained} messages");

    connection.close().await?;

    Ok(())
}
