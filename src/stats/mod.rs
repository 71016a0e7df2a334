//! Throughput statistics and metrics reporting
//!
//! Rates are computed over fixed windows ([`RateWindow`], [`ThroughputWindow`]);
//! the autoscaling signal is derived by [`ScaleCalculator`]. Values leave the
//! process only through a [`MetricsSink`].

pub mod metrics;
pub mod scale;
pub mod sink;

pub use self::metrics::{RateWindow, Throughput, ThroughputWindow};
pub use self::scale::{ScaleCalculator, ScaleSample};
pub use self::sink::{LogSink, MemorySink, MetricsSink, PrometheusSink};

/// Gauge: frames inferred per second
pub const INFER_FPS: &str = "ei_infer_fps";
/// Gauge: frames dropped per second, seen by the consumer
pub const DROP_FPS: &str = "ei_drop_fps";
/// Gauge: autoscale ratio
pub const SCALE_RATIO: &str = "ei_scale_ratio";
/// Gauge: frames trimmed per second by a producer
pub const QUEUE_DROP_FPS: &str = "ei_queue_drop_fps";
