//! Bounded frame queue
//!
//! One queue per inference category, shared by every producer of that
//! category and every worker consuming it:
//!
//! ```text
//!   [capture A] ─┐                                 ┌─► [worker 1]
//!   [capture B] ─┼─► push ─► queue_face (≤ 32) ─► pop ─┤
//!   [capture C] ─┘      │                          └─► [worker 2]
//!                       └─► <name>_expire (lease, refreshed per push)
//! ```
//!
//! The queue never grows past its capacity: a push that overflows trims the
//! oldest entries and counts them as dropped. Producers see the count as
//! the return value of [`FrameQueue::push`]; consumers collect the fleet-wide
//! total through [`FrameQueue::drop_count`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::error::Result;
use crate::registry::StreamId;
use crate::stats::RateWindow;
use crate::store::{lease_key, FrameStore, QueueKeys};

pub mod message;

pub use message::FrameMessage;

/// Default queue capacity
pub const DEFAULT_CAPACITY: usize = 32;

/// Default lease time-to-live
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(2);

/// Default drop-rate reporting window
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Frame queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Inference category this queue is bound to
    pub category: String,

    /// Maximum number of queued frames
    pub capacity: usize,

    /// Liveness lease time-to-live
    pub lease_ttl: Duration,

    /// Drop-rate reporting window
    pub report_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            category: "face".to_string(),
            capacity: DEFAULT_CAPACITY,
            lease_ttl: DEFAULT_LEASE_TTL,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }
}

impl QueueConfig {
    /// Default config bound to `category`
    pub fn for_category(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            ..Default::default()
        }
    }

    /// Set the capacity (at least 1)
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Set the lease time-to-live
    pub fn lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Set the drop-rate reporting window
    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }
}

type DropRateCallback = Box<dyn Fn(f64) + Send + Sync>;

/// Producer/consumer handle on one category's queue
pub struct FrameQueue<S: FrameStore> {
    store: Arc<S>,
    config: QueueConfig,
    keys: QueueKeys,
    drop_window: RateWindow,
    on_drop_rate: Option<DropRateCallback>,
}

impl<S: FrameStore> FrameQueue<S> {
    pub fn new(store: Arc<S>, config: QueueConfig) -> Self {
        let keys = QueueKeys::for_category(&config.category);
        let drop_window = RateWindow::new(config.report_interval);

        Self {
            store,
            config,
            keys,
            drop_window,
            on_drop_rate: None,
        }
    }

    /// Report `drops / second` to `callback` once per reporting window
    ///
    /// The callback runs inline on the push path and must not block.
    pub fn on_drop_rate(mut self, callback: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.on_drop_rate = Some(Box::new(callback));
        self
    }

    /// Category this queue is bound to
    pub fn category(&self) -> &str {
        &self.config.category
    }

    /// Store key of the underlying list
    pub fn name(&self) -> &str {
        &self.keys.list
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue a frame for `stream` and refresh its lease
    ///
    /// Returns the number of old frames trimmed to keep the queue bounded.
    /// A stream of another category is a caller bug: it is logged and the
    /// frame is discarded.
    pub async fn push(&mut self, stream: &StreamId, data: Bytes) -> Result<u64> {
        if stream.category != self.config.category {
            tracing::error!(
                stream = %stream,
                queue = %self.keys.list,
                "Invalid category for frame, discarding"
            );
            return Ok(0);
        }

        let envelope = FrameMessage::new(stream.name.clone(), stream.category.clone(), data).encode()?;
        let dropped = self
            .store
            .push(
                &self.keys,
                &lease_key(&stream.name),
                envelope,
                self.config.lease_ttl,
                self.config.capacity,
            )
            .await?;

        if dropped > 0 {
            tracing::debug!(stream = %stream, dropped = dropped, "Queue overflow, trimmed oldest frames");
        }

        self.drop_window.add(dropped);
        if let Some(rate) = self.drop_window.poll(Instant::now()) {
            tracing::info!(queue = %self.keys.list, drop_fps = rate, "Producer drop rate");
            if let Some(ref callback) = self.on_drop_rate {
                callback(rate);
            }
        }

        Ok(dropped)
    }

    /// Dequeue the oldest frame, if any
    ///
    /// Never blocks; an empty queue yields `None`. Envelopes that fail to
    /// decode are logged and skipped.
    pub async fn pop(&self) -> Result<Option<FrameMessage>> {
        loop {
            let Some(envelope) = self.store.pop(&self.keys).await? else {
                return Ok(None);
            };

            match FrameMessage::decode(&envelope) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    tracing::warn!(
                        queue = %self.keys.list,
                        error = %e,
                        size = envelope.len(),
                        "Discarding malformed frame envelope"
                    );
                }
            }
        }
    }

    /// Frames trimmed by any producer since the last call
    pub async fn drop_count(&self) -> Result<u64> {
        self.store.take_dropped(&self.keys).await
    }

    /// Current queue length
    pub async fn len(&self) -> Result<usize> {
        self.store.len(&self.keys).await
    }

    /// True iff no frame was pushed for `stream` within the lease ttl
    pub async fn is_expired(&self, stream: &StreamId) -> Result<bool> {
        let expired = self.store.is_expired(&lease_key(&stream.name)).await?;
        if expired {
            tracing::debug!(stream = %stream, "Stream lease expired");
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::store::MemoryStore;

    fn queue(store: &Arc<MemoryStore>) -> FrameQueue<MemoryStore> {
        FrameQueue::new(Arc::clone(store), QueueConfig::for_category("face"))
    }

    #[tokio::test]
    async fn test_bound_keeps_newest_in_order() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = queue(&store);
        let stream = StreamId::origin("cam-0", "face");

        let n = 50u64;
        let mut dropped = 0;
        for i in 0..n {
            dropped += queue.push(&stream, Bytes::from(i.to_be_bytes().to_vec())).await.unwrap();
        }

        assert_eq!(queue.len().await.unwrap(), 32);
        assert_eq!(dropped, n - 32);
        assert_eq!(queue.drop_count().await.unwrap(), n - 32);

        for i in (n - 32)..n {
            let msg = queue.pop().await.unwrap().unwrap();
            assert_eq!(msg.data().as_ref(), &i.to_be_bytes());
            assert_eq!(msg.name(), "cam-0");
        }
        assert!(queue.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_category_mismatch_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = queue(&store);
        let stream = StreamId::origin("cam-0", "car");

        assert_eq!(queue.push(&stream, Bytes::from_static(b"x")).await.unwrap(), 0);
        assert_eq!(queue.len().await.unwrap(), 0);
        // No lease either
        assert!(queue.is_expired(&stream).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_follows_pushes() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = queue(&store);
        let stream = StreamId::origin("cam-0", "face");

        queue.push(&stream, Bytes::from_static(b"a")).await.unwrap();
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(!queue.is_expired(&stream).await.unwrap());

        // Refreshed by the second push
        queue.push(&stream, Bytes::from_static(b"b")).await.unwrap();
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(!queue.is_expired(&stream).await.unwrap());

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(queue.is_expired(&stream).await.unwrap());

        // Lease is per name: the inferred identity of the same stream follows it
        assert!(queue.is_expired(&stream.with_status(crate::registry::StreamStatus::Inferred)).await.unwrap());
    }

    #[tokio::test]
    async fn test_pop_skips_malformed_envelopes() {
        let store = Arc::new(MemoryStore::new());
        let mut queue = queue(&store);
        let keys = QueueKeys::for_category("face");

        store
            .push(&keys, "junk_expire", Bytes::from_static(b"\x01garbage"), DEFAULT_LEASE_TTL, 32)
            .await
            .unwrap();
        queue.push(&StreamId::origin("cam-0", "face"), Bytes::from_static(b"ok")).await.unwrap();

        let msg = queue.pop().await.unwrap().unwrap();
        assert_eq!(msg.data().as_ref(), b"ok");
        assert!(queue.pop().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_rate_reported_per_window() {
        let store = Arc::new(MemoryStore::new());
        let rates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&rates);
        let config = QueueConfig::for_category("face").capacity(2);
        let mut queue = FrameQueue::new(Arc::clone(&store), config)
            .on_drop_rate(move |rate| sink.lock().unwrap().push(rate));
        let stream = StreamId::origin("cam-0", "face");

        // 2 fit, 10 more are each trimmed
        for _ in 0..12 {
            queue.push(&stream, Bytes::from_static(b"f")).await.unwrap();
        }
        assert!(rates.lock().unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(10)).await;
        queue.push(&stream, Bytes::from_static(b"f")).await.unwrap();

        // 11 drops over the 10s window
        assert_eq!(*rates.lock().unwrap(), vec![1.1]);
    }

    #[test]
    fn test_config_builder() {
        let config = QueueConfig::for_category("car")
            .capacity(0)
            .lease_ttl(Duration::from_secs(5))
            .report_interval(Duration::from_secs(1));

        assert_eq!(config.category, "car");
        assert_eq!(config.capacity, 1);
        assert_eq!(config.lease_ttl, Duration::from_secs(5));
        assert_eq!(config.report_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.capacity, 32);
        assert_eq!(config.lease_ttl, Duration::from_secs(2));
        assert_eq!(config.report_interval, Duration::from_secs(10));
    }
}
