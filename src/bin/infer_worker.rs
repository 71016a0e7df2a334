//! Inference worker: queue_<category> ─► inference ─► per-stream channels

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use elastic_stream::config::WorkerSettings;
use elastic_stream::telemetry::{init_tracing, metrics_sink, shutdown_signal};
use elastic_stream::{
    Error, FrameQueue, InferWorker, Inference, PassthroughInference, RedisStore, StreamBroker, Supervisor,
};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = WorkerSettings::from_env().context("Failed to load configuration")?;

    init_tracing(settings.log_format);

    info!(
        category = %settings.queue.category,
        queue = %settings.store.queue_url,
        broker = %settings.store.broker_url,
        "Starting inference worker"
    );

    let metrics = metrics_sink(&settings.metrics)?;

    let queue_store = Arc::new(
        RedisStore::connect(&settings.store.queue_url)
            .await
            .context("Failed to connect to queue store")?,
    );
    let broker_store = Arc::new(
        RedisStore::connect(&settings.store.broker_url)
            .await
            .context("Failed to connect to broker store")?,
    );

    let broker = Arc::new(StreamBroker::new(broker_store));
    broker
        .sync_from_store()
        .await
        .context("Failed to load stream registry")?;

    let monitor_broker = Arc::clone(&broker);
    let inference: Arc<dyn Inference> = Arc::new(PassthroughInference);
    let worker = InferWorker::new(
        FrameQueue::new(queue_store, settings.queue.clone()),
        broker,
        inference,
        metrics,
        settings.worker.clone(),
    );

    let mut supervisor = Supervisor::new();
    supervisor.spawn("registry-monitor", move |token| async move {
        let monitor = monitor_broker.start_monitor(token).await?;
        monitor.await.map_err(|e| Error::TaskFailed {
            name: "registry-monitor".to_string(),
            reason: e.to_string(),
        })?
    });
    supervisor.spawn("infer-worker", move |token| worker.run(token));

    supervisor
        .run_until(shutdown_signal())
        .await
        .context("Inference worker failed")?;

    info!("Inference worker stopped");
    Ok(())
}
