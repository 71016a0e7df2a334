//! elastic-stream: coordination fabric for elastic video inference
//!
//! Processes in the pipeline never talk to each other directly. Everything
//! goes through a shared store (Redis in production):
//!
//! ```text
//!   [file-stream / camera]                [infer-worker × N]               [fanout-server]
//!    capture ─► FrameBuffer ─► push ──►  queue_<category>  ──► pop ─► infer ─► publish ──► relay ─► viewers
//!                                 │                              │                          ▲
//!                                 └─ <name>_expire lease ◄───────┘ expiry check             │
//!                                                          register/unregister ─► set "streams" ─┘ notifications
//! ```
//!
//! - [`queue`]: bounded per-category frame queue with liveness leases
//! - [`registry`]: distributed set of live streams and per-stream publication
//! - [`worker`]: lifecycle loop turning queued frames into published streams
//! - [`server`]: WebSocket fan-out of published streams to viewers
//! - [`supervisor`]: fail-fast ownership of a process's tasks

pub mod capture;
pub mod config;
pub mod error;
pub mod queue;
pub mod registry;
pub mod server;
pub mod stats;
pub mod store;
pub mod supervisor;
pub mod telemetry;
pub mod worker;

pub use error::{Error, Result};
pub use queue::{FrameMessage, FrameQueue, QueueConfig};
pub use registry::{StreamBroker, StreamId, StreamStatus};
pub use server::{FanoutConfig, FanoutServer};
pub use store::{MemoryStore, RedisStore};
pub use supervisor::Supervisor;
pub use worker::{InferWorker, Inference, PassthroughInference, WorkerConfig};
