use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use register_publisher::audit::AuditLog;
use register_publisher::config::RelayConfig;
use register_publisher::service::Relay;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = RelayConfig::load()?;

    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        incoming_queue = %config.incoming.queue,
        outgoing_exchange = %config.outgoing.exchange.name,
        max_retries = config.max_retries,
        "register-publisher starting"
    );

    let audit = Arc::new(AuditLog::default());
    let relay = Relay::new(config, audit);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
        }
        let _ = shutdown_tx.send(true);
    });

    relay.run(shutdown_rx).await?;

    Ok(())
}
