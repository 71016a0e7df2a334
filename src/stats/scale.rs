//! Autoscaling signal
//!
//! The ratio is meant to drive an external horizontal autoscaler:
//!
//! - frames are being dropped: `(infer_fps + drop_fps) / infer_fps`, i.e. how
//!   much more capacity the current demand needs (> 1.0)
//! - nothing dropped: `infer_fps / max_observed_infer_fps`, i.e. how far below
//!   its historical peak this worker runs (<= 1.0)
//!
//! The two branches meet with a jump at `drop_fps == 0`, and the historical
//! peak never decays, so after a burst a sustained lower load reads as idle.
//! Treat the formula as a tunable signal rather than a control law.

use super::metrics::Throughput;

/// One window's worth of scaling inputs and output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleSample {
    pub infer_fps: f64,
    pub drop_fps: f64,
    pub ratio: f64,
}

/// Tracks the peak inference rate and turns throughput into a scale ratio
#[derive(Debug, Clone, Default)]
pub struct ScaleCalculator {
    max_infer_fps: f64,
}

impl ScaleCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest inference rate observed so far
    pub fn max_infer_fps(&self) -> f64 {
        self.max_infer_fps
    }

    /// Fold one window into the peak and compute its ratio
    pub fn observe(&mut self, infer_fps: f64, drop_fps: f64) -> ScaleSample {
        if infer_fps > self.max_infer_fps {
            self.max_infer_fps = infer_fps;
        }

        let ratio = if drop_fps > 0.0 {
            if infer_fps > 0.0 {
                (infer_fps + drop_fps) / infer_fps
            } else {
                // Dropping without making progress: saturate
                f64::MAX
            }
        } else if self.max_infer_fps > 0.0 {
            infer_fps / self.max_infer_fps
        } else {
            0.0
        };

        ScaleSample {
            infer_fps,
            drop_fps,
            ratio,
        }
    }

    pub fn observe_throughput(&mut self, throughput: Throughput) -> ScaleSample {
        self.observe(throughput.processed_fps, throughput.dropped_fps)
    }
}
