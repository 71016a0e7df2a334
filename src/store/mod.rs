//! Shared store abstraction
//!
//! Every process in the pipeline talks to the others only through a shared
//! key-value/pub-sub store. Two capability traits describe what each side
//! needs from it:
//!
//! - [`FrameStore`]: bounded per-category lists plus per-stream leases
//! - [`StreamStore`]: the registry set, its change notifications, and
//!   per-stream pub/sub channels
//!
//! [`RedisStore`] is the production implementation; [`MemoryStore`] is an
//! in-process fake with the same semantics, used by the test suite.
//!
//! # Key layout
//!
//! ```text
//! queue_<category>          list     FIFO of frame envelopes
//! queue_<category>_dropped  string   frames trimmed since the consumer last looked
//! <stream name>_expire      string   liveness lease (PX = lease ttl)
//! streams                   set      registry of active stream ids
//! <stream id>               channel  published frame bytes
//! __keyevent@<db>__:*       pattern  sadd / srem notifications
//! ```

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::error::Result;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Key of the distributed registry set
pub const STREAMS_KEY: &str = "streams";

/// Store keys backing one category's frame queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    /// List holding the frame envelopes
    pub list: String,
    /// Counter of frames trimmed by producers
    pub dropped: String,
}

impl QueueKeys {
    pub fn for_category(category: &str) -> Self {
        Self {
            list: format!("queue_{}", category),
            dropped: format!("queue_{}_dropped", category),
        }
    }
}

/// Lease key for a stream name
pub fn lease_key(stream_name: &str) -> String {
    format!("{}_expire", stream_name)
}

/// Change notification for a watched set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetEvent {
    /// One or more members were added
    Added,
    /// One or more members were removed
    Removed,
}

/// Bounded frame lists with liveness leases
#[async_trait]
pub trait FrameStore: Send + Sync + 'static {
    /// Append `payload`, refresh `lease` for `lease_ttl`, then trim the list to
    /// its newest `capacity` entries.
    ///
    /// Runs as one atomic store operation. Returns the number of entries
    /// trimmed, which is also added to the queue's dropped counter.
    async fn push(
        &self,
        keys: &QueueKeys,
        lease: &str,
        payload: Bytes,
        lease_ttl: Duration,
        capacity: usize,
    ) -> Result<u64>;

    /// Remove and return the oldest entry, if any
    async fn pop(&self, keys: &QueueKeys) -> Result<Option<Bytes>>;

    /// Current number of queued entries
    async fn len(&self, keys: &QueueKeys) -> Result<usize>;

    /// Atomically read and reset the dropped counter
    async fn take_dropped(&self, keys: &QueueKeys) -> Result<u64>;

    /// True iff the lease key is absent
    async fn is_expired(&self, lease: &str) -> Result<bool>;
}

/// Registry set, change notifications and frame channels
#[async_trait]
pub trait StreamStore: Send + Sync + 'static {
    /// Add `member` to `set`; false if it was already present
    async fn add(&self, set: &str, member: &str) -> Result<bool>;

    /// Remove `member` from `set`; false if it was absent
    async fn remove(&self, set: &str, member: &str) -> Result<bool>;

    /// Snapshot of all members of `set`
    async fn members(&self, set: &str) -> Result<HashSet<String>>;

    /// Fire-and-forget publish on `channel`
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()>;

    /// Stream of add/remove notifications for `set`.
    ///
    /// The subscription is live when this returns. The stream ends if the
    /// underlying connection is lost.
    async fn watch(&self, set: &str) -> Result<BoxStream<'static, SetEvent>>;

    /// Stream of payloads published on `channel`.
    ///
    /// Dropping the stream releases the subscription.
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, Bytes>>;
}
