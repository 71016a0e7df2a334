//! In-process store
//!
//! Mirrors the Redis semantics the pipeline depends on (atomic push-and-trim,
//! lease expiry, set notifications that fire only on real changes, lossy
//! pub/sub) so brokers, workers and the fan-out server can be exercised
//! without a server. Lease clocks use `tokio::time`, so paused-time tests
//! control expiry.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::{FrameStore, QueueKeys, SetEvent, StreamStore};
use crate::error::Result;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<Bytes>>,
    counters: HashMap<String, u64>,
    leases: HashMap<String, Instant>,
    sets: HashMap<String, HashSet<String>>,
    channels: HashMap<String, broadcast::Sender<Bytes>>,
    set_events: HashMap<String, broadcast::Sender<SetEvent>>,
}

impl Inner {
    fn channel(&mut self, name: &str) -> &broadcast::Sender<Bytes> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
    }

    fn set_events(&mut self, set: &str) -> &broadcast::Sender<SetEvent> {
        self.set_events
            .entry(set.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
    }

    fn notify(&mut self, set: &str, event: SetEvent) {
        // No watcher is not an error
        let _ = self.set_events(set).send(event);
    }
}

/// Shared in-memory store; clones share state
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain collections behind,
        // which are still consistent enough for a fake.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of a queue's entries, oldest first
    pub fn entries(&self, keys: &QueueKeys) -> Vec<Bytes> {
        self.lock()
            .lists
            .get(&keys.list)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live subscriptions on a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock()
            .channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of live watchers on a set
    pub fn watcher_count(&self, set: &str) -> usize {
        self.lock()
            .set_events
            .get(set)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drop every watcher and subscriber, as if the server connection was lost
    pub fn disconnect_all(&self) {
        let mut inner = self.lock();
        inner.channels.clear();
        inner.set_events.clear();
    }
}

/// Turn a broadcast receiver into a stream that skips lag and ends on close
fn receiver_stream<T: Clone + Send + 'static>(
    rx: broadcast::Receiver<T>,
) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped = skipped, "Memory store subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

#[async_trait]
impl FrameStore for MemoryStore {
    async fn push(
        &self,
        keys: &QueueKeys,
        lease: &str,
        payload: Bytes,
        lease_ttl: Duration,
        capacity: usize,
    ) -> Result<u64> {
        let mut inner = self.lock();

        let list = inner.lists.entry(keys.list.clone()).or_default();
        list.push_back(payload);
        let mut dropped = 0u64;
        while list.len() > capacity {
            list.pop_front();
            dropped += 1;
        }

        inner
            .leases
            .insert(lease.to_string(), Instant::now() + lease_ttl);

        if dropped > 0 {
            *inner.counters.entry(keys.dropped.clone()).or_default() += dropped;
        }

        Ok(dropped)
    }

    async fn pop(&self, keys: &QueueKeys) -> Result<Option<Bytes>> {
        Ok(self
            .lock()
            .lists
            .get_mut(&keys.list)
            .and_then(|list| list.pop_front()))
    }

    async fn len(&self, keys: &QueueKeys) -> Result<usize> {
        Ok(self.lock().lists.get(&keys.list).map_or(0, |list| list.len()))
    }

    async fn take_dropped(&self, keys: &QueueKeys) -> Result<u64> {
        Ok(self.lock().counters.remove(&keys.dropped).unwrap_or(0))
    }

    async fn is_expired(&self, lease: &str) -> Result<bool> {
        let mut inner = self.lock();
        match inner.leases.get(lease) {
            Some(deadline) if *deadline > Instant::now() => Ok(false),
            Some(_) => {
                inner.leases.remove(lease);
                Ok(true)
            }
            None => Ok(true),
        }
    }
}

#[async_trait]
impl StreamStore for MemoryStore {
    async fn add(&self, set: &str, member: &str) -> Result<bool> {
        let mut inner = self.lock();
        let added = inner
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        if added {
            inner.notify(set, SetEvent::Added);
        }
        Ok(added)
    }

    async fn remove(&self, set: &str, member: &str) -> Result<bool> {
        let mut inner = self.lock();
        let removed = inner
            .sets
            .get_mut(set)
            .map_or(false, |members| members.remove(member));
        if removed {
            inner.notify(set, SetEvent::Removed);
        }
        Ok(removed)
    }

    async fn members(&self, set: &str) -> Result<HashSet<String>> {
        Ok(self.lock().sets.get(set).cloned().unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        if let Some(tx) = self.lock().channels.get(channel) {
            let _ = tx.send(payload);
        }
        Ok(())
    }

    async fn watch(&self, set: &str) -> Result<BoxStream<'static, SetEvent>> {
        let rx = self.lock().set_events(set).subscribe();
        Ok(receiver_stream(rx))
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, Bytes>> {
        let rx = self.lock().channel(channel).subscribe();
        Ok(receiver_stream(rx))
    }
}
