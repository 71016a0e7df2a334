//! Stream broker implementation
//!
//! Every process that needs to know which streams are alive holds one
//! broker. The broker mirrors the distributed registry set into a local
//! cache and keeps it converged by watching the set's change notifications.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::identity::StreamId;
use crate::error::{Error, Result};
use crate::store::{StreamStore, STREAMS_KEY};

/// Callbacks for streams added or removed by other processes
///
/// Called from the monitor task; implementations must return quickly.
pub trait StreamListener: Send + Sync + 'static {
    fn on_add(&self, id: &StreamId);
    fn on_remove(&self, id: &StreamId);
}

/// Listener that ignores every change
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl StreamListener for NoopListener {
    fn on_add(&self, _id: &StreamId) {}
    fn on_remove(&self, _id: &StreamId) {}
}

/// Registry change delivered through a [`ChannelListener`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Added(StreamId),
    Removed(StreamId),
}

/// Listener forwarding changes into an unbounded channel
///
/// Lets a single-owner event loop consume registry changes in order.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StreamListener for ChannelListener {
    fn on_add(&self, id: &StreamId) {
        if self.tx.send(StreamEvent::Added(id.clone())).is_err() {
            tracing::debug!(stream = %id, "Stream listener closed, dropping add");
        }
    }

    fn on_remove(&self, id: &StreamId) {
        if self.tx.send(StreamEvent::Removed(id.clone())).is_err() {
            tracing::debug!(stream = %id, "Stream listener closed, dropping remove");
        }
    }
}

/// Local view of the distributed stream registry
///
/// Thread-safe via `RwLock`. Local mutations hold the write lock across the
/// store round-trip so a concurrent notification cannot report this
/// broker's own change back to its listener.
pub struct StreamBroker<S: StreamStore> {
    /// Shared store holding the registry set and the frame channels
    store: Arc<S>,

    /// Canonical id string to parsed identity
    cache: RwLock<HashMap<String, StreamId>>,

    /// Notified of changes made elsewhere
    listener: Arc<dyn StreamListener>,
}

impl<S: StreamStore> StreamBroker<S> {
    /// Create a broker with an empty cache and no listener
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            listener: Arc::new(NoopListener),
        }
    }

    /// Set the listener notified by the monitor
    pub fn with_listener(mut self, listener: Arc<dyn StreamListener>) -> Self {
        self.listener = listener;
        self
    }

    /// The backing store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Add a stream to the registry
    ///
    /// Returns `false` if it was already cached (the store is not touched)
    /// or already in the registry set, e.g. registered by another process.
    /// The stream is cached either way.
    pub async fn register(&self, id: &StreamId) -> Result<bool> {
        let key = id.to_string();
        let mut cache = self.cache.write().await;

        if cache.contains_key(&key) {
            tracing::debug!(stream = %id, "Stream already registered");
            return Ok(false);
        }

        let added = self.store.add(STREAMS_KEY, &key).await?;
        cache.insert(key, id.clone());

        if added {
            tracing::info!(stream = %id, streams = cache.len(), "Stream registered");
        } else {
            tracing::debug!(stream = %id, streams = cache.len(), "Stream registered elsewhere, cached");
        }
        Ok(added)
    }

    /// Remove a stream from the registry
    ///
    /// Returns `false` if it was not cached.
    pub async fn unregister(&self, id: &StreamId) -> Result<bool> {
        let key = id.to_string();
        let mut cache = self.cache.write().await;

        if !cache.contains_key(&key) {
            tracing::debug!(stream = %id, "Stream not registered");
            return Ok(false);
        }

        self.store.remove(STREAMS_KEY, &key).await?;
        cache.remove(&key);

        tracing::info!(stream = %id, streams = cache.len(), "Stream unregistered");
        Ok(true)
    }

    /// Publish frame bytes on a stream's channel
    ///
    /// At-most-once: nobody listening is not an error.
    pub async fn publish(&self, id: &StreamId, data: Bytes) -> Result<()> {
        self.store.publish(&id.to_string(), data).await
    }

    /// Replace the local cache with the store's registry set
    pub async fn sync_from_store(&self) -> Result<usize> {
        let mut cache = self.cache.write().await;
        *cache = parse_members(self.store.members(STREAMS_KEY).await?);

        tracing::info!(streams = cache.len(), "Registry synced from store");
        Ok(cache.len())
    }

    /// Whether a stream is in the local cache
    pub async fn contains(&self, id: &StreamId) -> bool {
        self.cache.read().await.contains_key(&id.to_string())
    }

    /// Snapshot of the cached identities, sorted by canonical id
    pub async fn streams(&self) -> Vec<StreamId> {
        let cache = self.cache.read().await;
        let mut keys: Vec<&String> = cache.keys().collect();
        keys.sort();
        keys.into_iter().filter_map(|k| cache.get(k).cloned()).collect()
    }

    /// Number of cached streams
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Diff the store against the cache and notify the listener
    ///
    /// Returns `(added, removed)`.
    pub async fn reconcile(&self) -> Result<(usize, usize)> {
        let mut cache = self.cache.write().await;
        let fresh = parse_members(self.store.members(STREAMS_KEY).await?);

        let added: Vec<StreamId> = fresh
            .iter()
            .filter(|(key, _)| !cache.contains_key(*key))
            .map(|(_, id)| id.clone())
            .collect();
        let removed: Vec<StreamId> = cache
            .iter()
            .filter(|(key, _)| !fresh.contains_key(*key))
            .map(|(_, id)| id.clone())
            .collect();

        *cache = fresh;
        drop(cache);

        for id in &added {
            tracing::info!(stream = %id, "Stream added");
            self.listener.on_add(id);
        }
        for id in &removed {
            tracing::info!(stream = %id, "Stream removed");
            self.listener.on_remove(id);
        }

        Ok((added.len(), removed.len()))
    }

    /// Start watching the registry set
    ///
    /// The watch is established and one reconciliation done before this
    /// returns, so no change made after the call is missed. The task ends
    /// with `Ok` on cancellation and with an error if the store fails or
    /// the notification stream closes.
    pub async fn start_monitor(
        self: &Arc<Self>,
        token: CancellationToken,
    ) -> Result<JoinHandle<Result<()>>> {
        let mut events = self.store.watch(STREAMS_KEY).await?;
        self.reconcile().await?;

        let broker = Arc::clone(self);
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("Registry monitor stopped");
                        return Ok(());
                    }
                    event = events.next() => {
                        let Some(event) = event else {
                            tracing::error!("Registry notifications closed");
                            return Err(Error::SubscriptionClosed(STREAMS_KEY.to_string()));
                        };

                        let (added, removed) = broker.reconcile().await?;
                        tracing::debug!(
                            event = ?event,
                            added = added,
                            removed = removed,
                            "Registry notification"
                        );
                    }
                }
            }
        }))
    }
}

fn parse_members(members: HashSet<String>) -> HashMap<String, StreamId> {
    members
        .into_iter()
        .filter_map(|member| match member.parse::<StreamId>() {
            Ok(id) => Some((member, id)),
            Err(e) => {
                tracing::warn!(member = %member, error = %e, "Ignoring malformed registry member");
                None
            }
        })
        .collect()
}
