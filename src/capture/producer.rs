//! Buffer-to-queue producer task

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::FrameBuffer;
use crate::error::Result;
use crate::queue::FrameQueue;
use crate::registry::StreamId;
use crate::store::FrameStore;

/// Drains a [`FrameBuffer`] into the category queue under a stream's origin id
pub struct FrameProducer<S: FrameStore> {
    queue: FrameQueue<S>,
    stream: StreamId,
    buffer: FrameBuffer,
    poll_interval: Duration,
}

impl<S: FrameStore> FrameProducer<S> {
    pub fn new(queue: FrameQueue<S>, stream: StreamId, buffer: FrameBuffer) -> Self {
        Self {
            queue,
            stream,
            buffer,
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Set the poll interval used while the buffer is empty
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    /// Push buffered frames until cancelled
    ///
    /// Store failures end the task with the error.
    pub async fn run(mut self, token: CancellationToken) -> Result<()> {
        tracing::info!(stream = %self.stream, queue = %self.queue.name(), "Frame producer started");

        let mut pushed = 0u64;
        while !token.is_cancelled() {
            match self.buffer.pop() {
                Some(frame) => {
                    self.queue.push(&self.stream, frame).await?;
                    pushed += 1;
                }
                None => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        tracing::info!(stream = %self.stream, pushed = pushed, "Frame producer stopped");
        Ok(())
    }
}
