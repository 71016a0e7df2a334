//! Inference worker lifecycle loop
//!
//! ```text
//!   queue_<category> ──pop──► [InferWorker] ──infer──► publish "<name>:<category>:inferred"
//!                                  │
//!                                  ├─ register inferred id when the registry lacks it
//!                                  ├─ unregister when the origin lease expires
//!                                  └─ every window: infer fps, drop fps, scale ratio ──► MetricsSink
//! ```
//!
//! The loop is driven one [`InferWorker::step`] at a time so tests can walk
//! it deterministically; [`InferWorker::run`] adds polling and cancellation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::queue::FrameQueue;
use crate::registry::{StreamBroker, StreamId, StreamStatus};
use crate::stats::{
    MetricsSink, ScaleCalculator, ScaleSample, ThroughputWindow, DROP_FPS, INFER_FPS, SCALE_RATIO,
};
use crate::store::{FrameStore, StreamStore};

/// Image-to-image inference backend
#[async_trait]
pub trait Inference: Send + Sync + 'static {
    /// Run the model on one compressed image
    async fn infer(&self, image: Bytes) -> Result<Bytes>;
}

/// Returns every image unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughInference;

#[async_trait]
impl Inference for PassthroughInference {
    async fn infer(&self, image: Bytes) -> Result<Bytes> {
        Ok(image)
    }
}

/// Worker loop configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,

    /// Consecutive empty polls before a neutral scale signal is emitted
    pub idle_threshold: u32,

    /// Throughput reporting window
    pub report_interval: Duration,

    /// Scale ratio emitted after `idle_threshold` empty polls
    pub idle_scale_ratio: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            idle_threshold: 600,
            report_interval: Duration::from_secs(10),
            idle_scale_ratio: 0.5,
        }
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn idle_threshold(mut self, ticks: u32) -> Self {
        self.idle_threshold = ticks;
        self
    }

    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn idle_scale_ratio(mut self, ratio: f64) -> Self {
        self.idle_scale_ratio = ratio;
        self
    }
}

/// Outcome of one loop iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A frame of this (inferred) stream was processed
    Processed(StreamId),
    /// The queue was empty
    Idle,
}

/// Drains one category queue through an inference backend
pub struct InferWorker<Q: FrameStore, B: StreamStore> {
    queue: FrameQueue<Q>,
    broker: Arc<StreamBroker<B>>,
    inference: Arc<dyn Inference>,
    metrics: Arc<dyn MetricsSink>,
    config: WorkerConfig,

    /// Inferred streams this worker registered, with the last frame time
    tracked: HashMap<String, (StreamId, Instant)>,
    idle_ticks: u32,
    window: ThroughputWindow,
    scale: ScaleCalculator,
}

impl<Q: FrameStore, B: StreamStore> InferWorker<Q, B> {
    pub fn new(
        queue: FrameQueue<Q>,
        broker: Arc<StreamBroker<B>>,
        inference: Arc<dyn Inference>,
        metrics: Arc<dyn MetricsSink>,
        config: WorkerConfig,
    ) -> Self {
        let window = ThroughputWindow::new(config.report_interval);

        Self {
            queue,
            broker,
            inference,
            metrics,
            config,
            tracked: HashMap::new(),
            idle_ticks: 0,
            window,
            scale: ScaleCalculator::new(),
        }
    }

    /// Streams currently tracked by this worker
    pub fn tracked(&self) -> Vec<StreamId> {
        self.tracked.values().map(|(id, _)| id.clone()).collect()
    }

    /// When the last frame of `id` was processed
    pub fn last_seen(&self, id: &StreamId) -> Option<Instant> {
        self.tracked.get(&id.to_string()).map(|(_, seen)| *seen)
    }

    /// Run one iteration: expire, pop, infer, publish, report
    pub async fn step(&mut self) -> Result<Step> {
        self.expire_streams().await?;

        let outcome = match self.queue.pop().await? {
            Some(msg) => {
                self.idle_ticks = 0;

                let id = msg.stream_id(StreamStatus::Inferred);
                // The id may have left the registry while still tracked here
                if !self.broker.contains(&id).await {
                    self.broker.register(&id).await?;
                }
                self.tracked.insert(id.to_string(), (id.clone(), Instant::now()));

                let result = self.inference.infer(msg.into_data()).await?;
                self.broker.publish(&id, result).await?;
                self.window.on_processed();

                tracing::trace!(stream = %id, "Frame processed");
                Step::Processed(id)
            }
            None => {
                self.idle_ticks += 1;
                if self.idle_ticks > self.config.idle_threshold {
                    self.idle_ticks = 0;
                    tracing::debug!(
                        queue = %self.queue.name(),
                        ratio = self.config.idle_scale_ratio,
                        "Queue idle, emitting neutral scale signal"
                    );
                    self.emit(ScaleSample {
                        infer_fps: 0.0,
                        drop_fps: 0.0,
                        ratio: self.config.idle_scale_ratio,
                    });
                }
                Step::Idle
            }
        };

        let dropped = self.queue.drop_count().await?;
        self.window.on_dropped(dropped);

        if let Some(throughput) = self.window.poll(Instant::now()) {
            let sample = self.scale.observe_throughput(throughput);
            tracing::info!(
                queue = %self.queue.name(),
                infer_fps = sample.infer_fps,
                drop_fps = sample.drop_fps,
                ratio = sample.ratio,
                "Throughput"
            );
            self.emit(sample);
        }

        Ok(outcome)
    }

    /// Loop until cancelled or a fatal error
    ///
    /// Tracked streams stay registered on cancellation; only lease expiry
    /// retires them.
    pub async fn run(mut self, token: CancellationToken) -> Result<()> {
        tracing::info!(
            queue = %self.queue.name(),
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "Inference worker started"
        );

        while !token.is_cancelled() {
            if let Step::Idle = self.step().await? {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        tracing::info!(queue = %self.queue.name(), "Inference worker stopped");
        Ok(())
    }

    async fn expire_streams(&mut self) -> Result<()> {
        let mut expired = Vec::new();
        for (key, (id, _)) in &self.tracked {
            if self.queue.is_expired(id).await? {
                expired.push(key.clone());
            }
        }

        for key in expired {
            if let Some((id, last_seen)) = self.tracked.remove(&key) {
                tracing::info!(
                    stream = %id,
                    silent_ms = last_seen.elapsed().as_millis() as u64,
                    "Stream lease expired, unregistering"
                );
                self.broker.unregister(&id).await?;
            }
        }

        Ok(())
    }

    fn emit(&self, sample: ScaleSample) {
        self.metrics.record(INFER_FPS, sample.infer_fps);
        self.metrics.record(DROP_FPS, sample.drop_fps);
        self.metrics.record(SCALE_RATIO, sample.ratio);
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;
    use crate::error::Error;
    use crate::queue::QueueConfig;
    use crate::stats::MemorySink;
    use crate::store::{MemoryStore, STREAMS_KEY};

    struct Fixture {
        store: Arc<MemoryStore>,
        producer: FrameQueue<MemoryStore>,
        broker: Arc<StreamBroker<MemoryStore>>,
        sink: Arc<MemorySink>,
    }

    impl Fixture {
        fn new(capacity: usize) -> Self {
            let store = Arc::new(MemoryStore::new());
            let producer = FrameQueue::new(
                Arc::clone(&store),
                QueueConfig::for_category("face").capacity(capacity),
            );
            Self {
                broker: Arc::new(StreamBroker::new(Arc::clone(&store))),
                sink: Arc::new(MemorySink::new()),
                store,
                producer,
            }
        }

        fn worker(&self, config: WorkerConfig) -> InferWorker<MemoryStore, MemoryStore> {
            self.worker_with(Arc::new(PassthroughInference), config)
        }

        fn worker_with(
            &self,
            inference: Arc<dyn Inference>,
            config: WorkerConfig,
        ) -> InferWorker<MemoryStore, MemoryStore> {
            let queue = FrameQueue::new(Arc::clone(&self.store), QueueConfig::for_category("face"));
            let metrics: Arc<dyn MetricsSink> = self.sink.clone();
            InferWorker::new(queue, Arc::clone(&self.broker), inference, metrics, config)
        }

        /// A replica with its own broker on the same store
        fn worker_on(
            &self,
            broker: Arc<StreamBroker<MemoryStore>>,
            config: WorkerConfig,
        ) -> InferWorker<MemoryStore, MemoryStore> {
            let queue = FrameQueue::new(Arc::clone(&self.store), QueueConfig::for_category("face"));
            let metrics: Arc<dyn MetricsSink> = self.sink.clone();
            InferWorker::new(queue, broker, Arc::new(PassthroughInference), metrics, config)
        }
    }

    struct FailingInference;

    #[async_trait]
    impl Inference for FailingInference {
        async fn infer(&self, _image: Bytes) -> Result<Bytes> {
            Err(Error::Inference("model not loaded".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_frame_registers_and_publishes() {
        let mut fx = Fixture::new(32);
        let mut worker = fx.worker(WorkerConfig::default());
        let inferred = StreamId::inferred("cam-0", "face");
        let mut frames = fx.store.subscribe(&inferred.to_string()).await.unwrap();

        fx.producer
            .push(&StreamId::origin("cam-0", "face"), Bytes::from_static(b"jpeg"))
            .await
            .unwrap();

        assert_eq!(worker.step().await.unwrap(), Step::Processed(inferred.clone()));
        assert!(fx.broker.contains(&inferred).await);
        assert!(worker.last_seen(&inferred).is_some());
        assert_eq!(frames.next().await.unwrap(), Bytes::from_static(b"jpeg"));

        assert_eq!(worker.step().await.unwrap(), Step::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_stream_is_unregistered() {
        let mut fx = Fixture::new(32);
        let mut worker = fx.worker(WorkerConfig::default());
        let origin = StreamId::origin("cam-0", "face");
        let inferred = StreamId::inferred("cam-0", "face");

        fx.producer.push(&origin, Bytes::from_static(b"a")).await.unwrap();
        worker.step().await.unwrap();

        tokio::time::advance(Duration::from_millis(1000)).await;
        worker.step().await.unwrap();
        assert!(fx.broker.contains(&inferred).await);

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(worker.step().await.unwrap(), Step::Idle);
        assert!(!fx.broker.contains(&inferred).await);
        assert!(worker.tracked().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_threshold_emits_neutral_signal() {
        let fx = Fixture::new(32);
        let mut worker = fx.worker(WorkerConfig::new().idle_threshold(3));

        for _ in 0..3 {
            worker.step().await.unwrap();
        }
        assert!(fx.sink.series(SCALE_RATIO).is_empty());

        worker.step().await.unwrap();
        assert_eq!(fx.sink.series(SCALE_RATIO), vec![0.5]);
        assert_eq!(fx.sink.series(INFER_FPS), vec![0.0]);
        assert_eq!(fx.sink.series(DROP_FPS), vec![0.0]);

        // Counter restarts after the signal
        for _ in 0..3 {
            worker.step().await.unwrap();
        }
        assert_eq!(fx.sink.series(SCALE_RATIO).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reports_ratio_with_drops() {
        let mut fx = Fixture::new(20);
        let mut worker = fx.worker(WorkerConfig::default());
        let origin = StreamId::origin("cam-0", "face");

        // 25 pushes into 20 slots: 5 trimmed by the producer
        for _ in 0..25 {
            fx.producer.push(&origin, Bytes::from_static(b"f")).await.unwrap();
        }
        for _ in 0..20 {
            assert!(matches!(worker.step().await.unwrap(), Step::Processed(_)));
        }
        assert!(fx.sink.values().is_empty());

        tokio::time::advance(Duration::from_secs(10)).await;
        worker.step().await.unwrap();

        assert_eq!(fx.sink.series(INFER_FPS), vec![2.0]);
        assert_eq!(fx.sink.series(DROP_FPS), vec![0.5]);
        assert_eq!(fx.sink.series(SCALE_RATIO), vec![1.25]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reports_ratio_against_peak() {
        let mut fx = Fixture::new(32);
        let mut worker = fx.worker(WorkerConfig::default());
        let origin = StreamId::origin("cam-0", "face");

        for (frames, expected) in [(20, 1.0), (10, 0.5)] {
            for _ in 0..frames {
                fx.producer.push(&origin, Bytes::from_static(b"f")).await.unwrap();
                worker.step().await.unwrap();
            }
            tokio::time::advance(Duration::from_secs(10)).await;
            worker.step().await.unwrap();
            assert_eq!(fx.sink.series(SCALE_RATIO).last().copied(), Some(expected));
        }
    }

    #[tokio::test]
    async fn test_inference_failure_is_fatal() {
        let mut fx = Fixture::new(32);
        let mut worker = fx.worker_with(Arc::new(FailingInference), WorkerConfig::default());

        fx.producer
            .push(&StreamId::origin("cam-0", "face"), Bytes::from_static(b"a"))
            .await
            .unwrap();

        assert!(matches!(worker.step().await, Err(Error::Inference(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_run_leaves_streams_registered() {
        let mut fx = Fixture::new(32);
        let worker = fx.worker(WorkerConfig::default());
        let inferred = StreamId::inferred("cam-0", "face");

        fx.producer
            .push(&StreamId::origin("cam-0", "face"), Bytes::from_static(b"a"))
            .await
            .unwrap();

        let token = CancellationToken::new();
        let handle = tokio::spawn(worker.run(token.clone()));

        while !fx.broker.contains(&inferred).await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        token.cancel();
        handle.await.unwrap().unwrap();
        assert!(fx.broker.contains(&inferred).await);
        assert!(fx.store.members(STREAMS_KEY).await.unwrap().contains(&inferred.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopping_one_replica_keeps_stream_live() {
        let mut fx = Fixture::new(32);
        let origin = StreamId::origin("cam-0", "face");
        let inferred = StreamId::inferred("cam-0", "face");

        let mut a = fx.worker(WorkerConfig::default());
        let other_broker = Arc::new(StreamBroker::new(Arc::clone(&fx.store)));
        let mut b = fx.worker_on(Arc::clone(&other_broker), WorkerConfig::default());

        fx.producer.push(&origin, Bytes::from_static(b"1")).await.unwrap();
        assert_eq!(a.step().await.unwrap(), Step::Processed(inferred.clone()));
        fx.producer.push(&origin, Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(b.step().await.unwrap(), Step::Processed(inferred.clone()));

        let token = CancellationToken::new();
        token.cancel();
        a.run(token).await.unwrap();

        for _ in 0..5 {
            fx.producer.push(&origin, Bytes::from_static(b"f")).await.unwrap();
            assert_eq!(b.step().await.unwrap(), Step::Processed(inferred.clone()));
        }

        assert!(fx.store.members(STREAMS_KEY).await.unwrap().contains(&inferred.to_string()));
        assert!(other_broker.contains(&inferred).await);
    }

    #[tokio::test]
    async fn test_stream_removed_elsewhere_is_registered_again() {
        let mut fx = Fixture::new(32);
        let mut worker = fx.worker(WorkerConfig::default());
        let origin = StreamId::origin("cam-0", "face");
        let inferred = StreamId::inferred("cam-0", "face");

        let token = CancellationToken::new();
        let monitor = fx.broker.start_monitor(token.clone()).await.unwrap();

        fx.producer.push(&origin, Bytes::from_static(b"1")).await.unwrap();
        worker.step().await.unwrap();
        assert!(fx.broker.contains(&inferred).await);

        // Dropped from the set by another process while still producing
        fx.store.remove(STREAMS_KEY, &inferred.to_string()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while fx.broker.contains(&inferred).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("monitor did not observe the removal");

        fx.producer.push(&origin, Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(worker.step().await.unwrap(), Step::Processed(inferred.clone()));
        assert!(fx.broker.contains(&inferred).await);
        assert!(fx.store.members(STREAMS_KEY).await.unwrap().contains(&inferred.to_string()));

        token.cancel();
        monitor.await.unwrap().unwrap();
    }
}
