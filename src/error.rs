//! Error types
//!
//! Fatal errors end the task that hit them; the [`Supervisor`](crate::supervisor::Supervisor)
//! turns any one of them into a full shutdown. Expected conditions (empty queue,
//! duplicate registration, viewer disconnects) are not errors and never reach here.

use thiserror::Error;

use crate::config::ConfigError;
use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum Error {
    /// The shared store could not be reached or rejected a command
    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    /// A store subscription ended while it was still needed
    #[error("store subscription closed: {0}")]
    SubscriptionClosed(String),

    /// A frame envelope could not be encoded
    #[error("failed to encode frame envelope: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// A frame envelope could not be decoded
    #[error("failed to decode frame envelope: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Registry-level failure (malformed stream id)
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The inference collaborator failed
    #[error("inference failed: {0}")]
    Inference(String),

    /// The capture source failed
    #[error("capture failed: {0}")]
    Capture(String),

    /// WebSocket transport failure
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A supervised task panicked or was aborted
    #[error("task {name} failed: {reason}")]
    TaskFailed { name: String, reason: String },
}

impl Error {
    /// Whether this error was raised by the store client (connection loss, bad reply)
    pub fn is_store(&self) -> bool {
        matches!(self, Error::Store(_) | Error::SubscriptionClosed(_))
    }
}
