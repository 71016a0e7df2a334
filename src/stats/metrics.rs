//! Fixed-window rate counters

use std::time::Duration;

use tokio::time::Instant;

/// Single counter over a fixed reporting window
///
/// Counts accumulate until the window has elapsed; [`RateWindow::poll`] then
/// returns `count / elapsed_seconds` and starts a new window.
#[derive(Debug, Clone)]
pub struct RateWindow {
    interval: Duration,
    started_at: Instant,
    count: u64,
}

impl RateWindow {
    /// Start a window now
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            started_at: Instant::now(),
            count: 0,
        }
    }

    /// Add to the counter
    pub fn add(&mut self, n: u64) {
        self.count += n;
    }

    /// Counted so far in this window
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Return the rate and reset if the window is over
    pub fn poll(&mut self, now: Instant) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.started_at);
        if elapsed < self.interval || elapsed.is_zero() {
            return None;
        }

        let rate = self.count as f64 / elapsed.as_secs_f64();
        self.started_at = now;
        self.count = 0;
        Some(rate)
    }
}

/// Rates observed by a consumer over one window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    /// Frames processed per second
    pub processed_fps: f64,
    /// Frames dropped upstream per second
    pub dropped_fps: f64,
}

/// Processed and dropped counters sharing one window
#[derive(Debug, Clone)]
pub struct ThroughputWindow {
    interval: Duration,
    started_at: Instant,
    processed: u64,
    dropped: u64,
}

impl ThroughputWindow {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            started_at: Instant::now(),
            processed: 0,
            dropped: 0,
        }
    }

    pub fn on_processed(&mut self) {
        self.processed += 1;
    }

    pub fn on_dropped(&mut self, n: u64) {
        self.dropped += n;
    }

    /// Return both rates and reset if the window is over
    pub fn poll(&mut self, now: Instant) -> Option<Throughput> {
        let elapsed = now.saturating_duration_since(self.started_at);
        if elapsed < self.interval || elapsed.is_zero() {
            return None;
        }

        let secs = elapsed.as_secs_f64();
        let throughput = Throughput {
            processed_fps: self.processed as f64 / secs,
            dropped_fps: self.dropped as f64 / secs,
        };

        self.started_at = now;
        self.processed = 0;
        self.dropped = 0;
        Some(throughput)
    }
}
