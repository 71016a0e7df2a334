//! WebSocket fan-out server
//!
//! One event loop owns every map. Registry changes start and stop one relay
//! per stream; each relay feeds a local broadcast channel that all viewers
//! of the stream read from:
//!
//! ```text
//!   store channel "<id>"                      viewer tasks
//!   ───────────────────► [relay <id>] ──► broadcast::Tx ──┬──► ws://host/<id>
//!                                                          ├──► ws://host/<id>
//!                                                          └──► ws://host/<id>
//!
//!   registry notifications ──► on_add / on_remove ──► start / cancel relay
//!   TCP accept ──► handshake ──► admission (active stream? below cap?) ──► subscribe
//! ```
//!
//! `bytes::Bytes` is reference counted, so every viewer of a stream shares
//! the frame allocation made by the relay.

pub mod config;
pub mod listener;
pub mod relay;
pub mod viewers;

pub use config::FanoutConfig;
pub use listener::FanoutServer;
pub use viewers::{FanoutStats, Rejection, ViewerTable};
