//! Capture side of the pipeline
//!
//! ```text
//!   [CaptureSource] ──capture task──► FrameBuffer (≤ 10, replace oldest)
//!                                          │
//!                                   [FrameProducer] ──push every 10ms──► queue_<category>
//! ```
//!
//! The buffer decouples a source running at its own frame rate from store
//! round-trips: a slow store costs stale frames, never a stalled camera.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;

pub mod producer;
pub mod source;

pub use producer::FrameProducer;
pub use source::{run_capture, CaptureSource, FileSource};

/// Capture process configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Stream name announced with every frame
    pub stream_name: String,

    /// Inference category the frames are queued for
    pub category: String,

    /// Directory of pre-encoded images for [`FileSource`]
    pub source_dir: PathBuf,

    /// Target frames per second
    pub fps: u32,

    /// Frames held between the source and the producer
    pub buffer: usize,

    /// Producer poll interval when the buffer is empty
    pub poll_interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            stream_name: "file-0".to_string(),
            category: "face".to_string(),
            source_dir: PathBuf::from("videos"),
            fps: 15,
            buffer: 10,
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl CaptureConfig {
    pub fn new(stream_name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            category: category.into(),
            ..Default::default()
        }
    }

    pub fn source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = dir.into();
        self
    }

    /// Set the target frame rate (at least 1)
    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    pub fn buffer(mut self, frames: usize) -> Self {
        self.buffer = frames.max(1);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Bounded frame hand-off that replaces the oldest frame when full
///
/// Clones share the same buffer.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    inner: Arc<Mutex<VecDeque<Bytes>>>,
    capacity: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Bytes>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a frame; returns `true` if the oldest frame was replaced
    pub fn push(&self, frame: Bytes) -> bool {
        let mut frames = self.lock();
        let replaced = if frames.len() >= self.capacity {
            frames.pop_front();
            true
        } else {
            false
        };
        frames.push_back(frame);
        replaced
    }

    /// Take the oldest frame
    pub fn pop(&self) -> Option<Bytes> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
