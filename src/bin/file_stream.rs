//! File stream: image directory ─► queue_<category>

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use elastic_stream::capture::{run_capture, FileSource, FrameBuffer, FrameProducer};
use elastic_stream::config::FileStreamSettings;
use elastic_stream::stats::QUEUE_DROP_FPS;
use elastic_stream::telemetry::{init_tracing, metrics_sink, shutdown_signal};
use elastic_stream::{FrameQueue, RedisStore, StreamId, Supervisor};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = FileStreamSettings::from_env().context("Failed to load configuration")?;

    init_tracing(settings.log_format);

    let capture = settings.capture.clone();
    let stream = StreamId::origin(capture.stream_name.clone(), capture.category.clone());

    info!(
        stream = %stream,
        dir = %capture.source_dir.display(),
        fps = capture.fps,
        "Starting file stream"
    );

    let metrics = metrics_sink(&settings.metrics)?;

    let store = Arc::new(
        RedisStore::connect(&settings.store.queue_url)
            .await
            .context("Failed to connect to queue store")?,
    );

    let source = FileSource::open(&capture.source_dir, capture.fps)
        .await
        .context("Failed to open frame directory")?;

    let buffer = FrameBuffer::new(capture.buffer);
    let queue = FrameQueue::new(store, settings.queue.clone())
        .on_drop_rate(move |rate| metrics.record(QUEUE_DROP_FPS, rate));
    let producer = FrameProducer::new(queue, stream, buffer.clone()).poll_interval(capture.poll_interval);

    let mut supervisor = Supervisor::new();
    supervisor.spawn("capture", move |token| run_capture(source, buffer, token));
    supervisor.spawn("producer", move |token| producer.run(token));

    supervisor
        .run_until(shutdown_signal())
        .await
        .context("File stream failed")?;

    info!("File stream stopped");
    Ok(())
}
