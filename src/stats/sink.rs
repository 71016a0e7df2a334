//! Metrics sinks

use std::sync::Mutex;

/// Destination for named gauge values
///
/// Implementations must not block: sinks are called inline from the frame
/// path.
pub trait MetricsSink: Send + Sync {
    fn record(&self, name: &str, value: f64);
}

/// Sets gauges through the `metrics` facade (scraped by the Prometheus exporter)
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn record(&self, name: &str, value: f64) {
        ::metrics::gauge!(name.to_string()).set(value);
    }
}

/// Logs each value
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn record(&self, name: &str, value: f64) {
        tracing::info!(metric = name, value = value, "Metric");
    }
}

/// Keeps every recorded value in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    values: Mutex<Vec<(String, f64)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded `(name, value)` pairs in order
    pub fn values(&self) -> Vec<(String, f64)> {
        self.values
            .lock()
            .map(|values| values.clone())
            .unwrap_or_default()
    }

    /// Values recorded under `name`, in order
    pub fn series(&self, name: &str) -> Vec<f64> {
        self.values()
            .into_iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v)
            .collect()
    }
}

impl MetricsSink for MemorySink {
    fn record(&self, name: &str, value: f64) {
        if let Ok(mut values) = self.values.lock() {
            values.push((name.to_string(), value));
        }
    }
}
