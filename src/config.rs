//! Process configuration from the environment
//!
//! Each binary reads one settings struct. Loaders take a lookup function so
//! tests can feed a map instead of the process environment.
//!
//! | Variable           | Used by              | Default                   |
//! |--------------------|----------------------|---------------------------|
//! | `QUEUE_URL`        | worker, file-stream  | `redis://127.0.0.1:6379/` |
//! | `BROKER_URL`       | worker, fan-out      | `QUEUE_URL`               |
//! | `INFER_TYPE`       | worker, file-stream  | `face`                    |
//! | `POLL_INTERVAL_MS` | worker               | `50`                      |
//! | `IDLE_THRESHOLD`   | worker               | `600`                     |
//! | `STREAM_NAME`      | file-stream          | `file-0`                  |
//! | `VIDEO_DIR`        | file-stream          | `videos`                  |
//! | `CAPTURE_FPS`      | file-stream          | `15`                      |
//! | `WS_BIND`          | fan-out              | `0.0.0.0:31611`           |
//! | `MAX_VIEWERS`      | fan-out              | `100`                     |
//! | `METRICS_PORT`     | worker, file-stream  | `8000` (`0` logs instead) |
//! | `LOG_FORMAT`       | all                  | `text` (or `json`)        |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::capture::CaptureConfig;
use crate::queue::QueueConfig;
use crate::server::FanoutConfig;
use crate::worker::WorkerConfig;

/// Default store address
pub const DEFAULT_STORE_URL: &str = "redis://127.0.0.1:6379/";

/// Default Prometheus exporter port
pub const DEFAULT_METRICS_PORT: u16 = 8000;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: String, value: String },

    /// A variable must not be empty
    #[error("{0} must not be empty")]
    Empty(String),
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

/// Store connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Store holding the frame queues
    pub queue_url: String,
    /// Store holding the registry and frame channels
    pub broker_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            queue_url: DEFAULT_STORE_URL.to_string(),
            broker_url: DEFAULT_STORE_URL.to_string(),
        }
    }
}

/// Metrics exporter settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsConfig {
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prometheus_port: DEFAULT_METRICS_PORT,
        }
    }
}

/// Settings for the `infer-worker` binary
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub metrics: MetricsConfig,
    pub log_format: LogFormat,
}

/// Settings for the `fanout-server` binary
#[derive(Debug, Clone)]
pub struct FanoutSettings {
    pub store: StoreConfig,
    pub fanout: FanoutConfig,
    pub log_format: LogFormat,
}

/// Settings for the `file-stream` binary
#[derive(Debug, Clone)]
pub struct FileStreamSettings {
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub capture: CaptureConfig,
    pub metrics: MetricsConfig,
    pub log_format: LogFormat,
}

/// Reads variables through a lookup function
struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var).map(|v| v.trim().to_string())
    }

    fn string(&self, var: &str, default: &str) -> Result<String, ConfigError> {
        match self.get(var) {
            Some(v) if v.is_empty() => Err(ConfigError::Empty(var.to_string())),
            Some(v) => Ok(v),
            None => Ok(default.to_string()),
        }
    }

    fn parse<T: FromStr>(&self, var: &str, default: T) -> Result<T, ConfigError> {
        match self.get(var) {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                var: var.to_string(),
                value: v,
            }),
            None => Ok(default),
        }
    }

    fn store(&self) -> Result<StoreConfig, ConfigError> {
        let queue_url = self.string("QUEUE_URL", DEFAULT_STORE_URL)?;
        let broker_url = self.string("BROKER_URL", &queue_url)?;
        Ok(StoreConfig { queue_url, broker_url })
    }

    fn queue(&self) -> Result<QueueConfig, ConfigError> {
        Ok(QueueConfig::for_category(self.string("INFER_TYPE", "face")?))
    }

    fn metrics(&self) -> Result<MetricsConfig, ConfigError> {
        Ok(MetricsConfig {
            prometheus_port: self.parse("METRICS_PORT", DEFAULT_METRICS_PORT)?,
        })
    }

    fn log_format(&self) -> Result<LogFormat, ConfigError> {
        self.parse("LOG_FORMAT", LogFormat::Text)
    }
}

impl WorkerSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };
        let defaults = WorkerConfig::default();

        let poll_ms = env.parse("POLL_INTERVAL_MS", defaults.poll_interval.as_millis() as u64)?;
        let worker = WorkerConfig::new()
            .poll_interval(Duration::from_millis(poll_ms))
            .idle_threshold(env.parse("IDLE_THRESHOLD", defaults.idle_threshold)?);

        Ok(Self {
            store: env.store()?,
            queue: env.queue()?,
            worker,
            metrics: env.metrics()?,
            log_format: env.log_format()?,
        })
    }
}

impl FanoutSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };
        let defaults = FanoutConfig::default();

        let bind: SocketAddr = env.parse("WS_BIND", defaults.bind_addr)?;
        let fanout = FanoutConfig::with_addr(bind)
            .max_viewers(env.parse("MAX_VIEWERS", defaults.max_viewers)?);

        Ok(Self {
            store: env.store()?,
            fanout,
            log_format: env.log_format()?,
        })
    }
}

impl FileStreamSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };
        let queue = env.queue()?;
        let defaults = CaptureConfig::default();

        let capture = CaptureConfig::new(env.string("STREAM_NAME", &defaults.stream_name)?, queue.category.clone())
            .source_dir(env.string("VIDEO_DIR", &defaults.source_dir.to_string_lossy())?)
            .fps(env.parse("CAPTURE_FPS", defaults.fps)?);

        Ok(Self {
            store: env.store()?,
            queue,
            capture,
            metrics: env.metrics()?,
            log_format: env.log_format()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn test_worker_defaults() {
        let settings = WorkerSettings::from_lookup(lookup(&[])).unwrap();

        assert_eq!(settings.store, StoreConfig::default());
        assert_eq!(settings.queue.category, "face");
        assert_eq!(settings.queue.capacity, 32);
        assert_eq!(settings.worker.poll_interval, Duration::from_millis(50));
        assert_eq!(settings.worker.idle_threshold, 600);
        assert_eq!(settings.metrics.prometheus_port, 8000);
        assert_eq!(settings.log_format, LogFormat::Text);
    }

    #[test]
    fn test_worker_overrides() {
        let settings = WorkerSettings::from_lookup(lookup(&[
            ("QUEUE_URL", "redis://queue:6379/"),
            ("INFER_TYPE", "car"),
            ("POLL_INTERVAL_MS", "20"),
            ("IDLE_THRESHOLD", "100"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        // Broker follows the queue unless set
        assert_eq!(settings.store.broker_url, "redis://queue:6379/");
        assert_eq!(settings.queue.category, "car");
        assert_eq!(settings.worker.poll_interval, Duration::from_millis(20));
        assert_eq!(settings.worker.idle_threshold, 100);
        assert_eq!(settings.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_number_is_error() {
        let err = WorkerSettings::from_lookup(lookup(&[("IDLE_THRESHOLD", "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "IDLE_THRESHOLD".into(),
                value: "lots".into()
            }
        );
        assert_eq!(err.to_string(), "invalid value for IDLE_THRESHOLD: \"lots\"");
    }

    #[test]
    fn test_empty_category_is_error() {
        let err = WorkerSettings::from_lookup(lookup(&[("INFER_TYPE", " ")])).unwrap_err();
        assert_eq!(err, ConfigError::Empty("INFER_TYPE".into()));
    }

    #[test]
    fn test_fanout_settings() {
        let settings = FanoutSettings::from_lookup(lookup(&[
            ("BROKER_URL", "redis://broker:6379/"),
            ("WS_BIND", "127.0.0.1:9000"),
            ("MAX_VIEWERS", "5"),
        ]))
        .unwrap();

        assert_eq!(settings.store.broker_url, "redis://broker:6379/");
        assert_eq!(settings.fanout.bind_addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(settings.fanout.max_viewers, 5);

        assert!(FanoutSettings::from_lookup(lookup(&[("WS_BIND", "nowhere")])).is_err());
    }

    #[test]
    fn test_file_stream_settings() {
        let settings = FileStreamSettings::from_lookup(lookup(&[
            ("STREAM_NAME", "10.0.0.5-0"),
            ("INFER_TYPE", "body"),
            ("VIDEO_DIR", "/data/clips"),
            ("CAPTURE_FPS", "30"),
        ]))
        .unwrap();

        assert_eq!(settings.capture.stream_name, "10.0.0.5-0");
        assert_eq!(settings.capture.category, "body");
        assert_eq!(settings.capture.source_dir, std::path::PathBuf::from("/data/clips"));
        assert_eq!(settings.capture.fps, 30);
        assert_eq!(settings.capture.buffer, 10);
        assert_eq!(settings.queue.category, "body");
    }
}
