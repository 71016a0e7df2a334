//! Frame sources

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::FrameBuffer;
use crate::error::{Error, Result};
use crate::stats::RateWindow;

const FPS_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Producer of compressed image frames
#[async_trait]
pub trait CaptureSource: Send + 'static {
    /// Wait for the next frame; `None` once the source is exhausted
    async fn next_frame(&mut self) -> Result<Option<Bytes>>;
}

/// Loops over the image files of a directory at a fixed frame rate
///
/// Files are played in name order and sent as-is; no decoding happens here.
pub struct FileSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    ticker: Interval,
    fps: RateWindow,
}

impl FileSource {
    /// List the frames in `dir`
    pub async fn open(dir: impl AsRef<Path>, fps: u32) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(Error::Capture(format!("no frames in {}", dir.display())));
        }

        let period = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(dir = %dir.display(), frames = files.len(), fps = fps, "File source opened");

        Ok(Self {
            dir,
            files,
            next: 0,
            ticker,
            fps: RateWindow::new(FPS_REPORT_INTERVAL),
        })
    }

    /// Number of distinct frames in the loop
    pub fn frame_count(&self) -> usize {
        self.files.len()
    }
}

#[async_trait]
impl CaptureSource for FileSource {
    async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        self.ticker.tick().await;

        let path = &self.files[self.next];
        let data = tokio::fs::read(path).await?;
        self.next = (self.next + 1) % self.files.len();

        self.fps.add(1);
        if let Some(fps) = self.fps.poll(Instant::now()) {
            tracing::info!(dir = %self.dir.display(), fps = fps, "Capture rate");
        }

        Ok(Some(Bytes::from(data)))
    }
}

/// Move frames from `source` into `buffer` until cancelled or exhausted
pub async fn run_capture<C: CaptureSource>(
    mut source: C,
    buffer: FrameBuffer,
    token: CancellationToken,
) -> Result<()> {
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = source.next_frame() => frame?,
        };

        match frame {
            Some(frame) => {
                if buffer.push(frame) {
                    tracing::trace!("Capture buffer full, replaced oldest frame");
                }
            }
            None => {
                tracing::info!("Capture source exhausted");
                break;
            }
        }
    }

    Ok(())
}
