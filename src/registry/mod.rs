//! Stream registry and broker
//!
//! The registry is a distributed set of active stream ids in the shared
//! store. Each process mirrors it through a [`StreamBroker`]:
//!
//! ```text
//!                        store: set "streams"
//!                 ┌──────────────────────────────┐
//!                 │ cam-0:face:inferred          │
//!                 │ cam-1:car:inferred           │
//!                 └──────┬───────────────▲───────┘
//!          sadd/srem     │               │  register / unregister
//!          notifications │               │
//!         ┌──────────────┼───────┐       │
//!         ▼              ▼       │       │
//!   [StreamBroker]  [StreamBroker]     [StreamBroker]
//!    fan-out server  dashboard          infer worker
//!    on_add/on_remove                   publish() ──► channel "<id>"
//! ```
//!
//! Frames are published on a channel named after the canonical id. Delivery
//! is at-most-once: a stream nobody subscribes to loses its frames.

pub mod broker;
pub mod error;
pub mod identity;

pub use broker::{ChannelListener, NoopListener, StreamBroker, StreamEvent, StreamListener};
pub use error::RegistryError;
pub use identity::{StreamId, StreamStatus};
