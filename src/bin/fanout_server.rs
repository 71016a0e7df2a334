//! Fan-out server: per-stream channels ─► WebSocket viewers

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use elastic_stream::config::FanoutSettings;
use elastic_stream::telemetry::{init_tracing, shutdown_signal};
use elastic_stream::{FanoutServer, RedisStore, Supervisor};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let settings = FanoutSettings::from_env().context("Failed to load configuration")?;

    init_tracing(settings.log_format);

    info!(
        bind = %settings.fanout.bind_addr,
        broker = %settings.store.broker_url,
        max_viewers = settings.fanout.max_viewers,
        "Starting fan-out server"
    );

    let store = Arc::new(
        RedisStore::connect(&settings.store.broker_url)
            .await
            .context("Failed to connect to broker store")?,
    );

    let server = FanoutServer::bind(settings.fanout.clone(), store)
        .await
        .context("Failed to bind fan-out listener")?;

    let mut supervisor = Supervisor::new();
    supervisor.spawn("fanout-server", move |token| {
        server.run_until(async move { token.cancelled().await })
    });

    supervisor
        .run_until(shutdown_signal())
        .await
        .context("Fan-out server failed")?;

    info!("Fan-out server stopped");
    Ok(())
}
