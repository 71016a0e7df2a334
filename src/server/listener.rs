//! Fan-out server event loop
//!
//! Handles the TCP accept loop, registry changes, viewer admission and
//! shutdown from a single task that owns every map.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::config::FanoutConfig;
use super::relay::{relay_stream, serve_viewer, AdmissionRequest, Admitted, ViewerGuard};
use super::viewers::{FanoutStats, Rejection, ViewerTable};
use crate::error::{Error, Result};
use crate::registry::{ChannelListener, StreamBroker, StreamEvent};
use crate::store::StreamStore;

/// A stream with a running relay
struct ActiveStream {
    tx: broadcast::Sender<Bytes>,
    token: CancellationToken,
}

/// WebSocket fan-out server
pub struct FanoutServer<S: StreamStore> {
    config: FanoutConfig,
    store: Arc<S>,
    broker: Arc<StreamBroker<S>>,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    listener: TcpListener,
    stats: Arc<FanoutStats>,
}

impl<S: StreamStore> FanoutServer<S> {
    /// Bind the listening socket
    ///
    /// Streams are tracked from [`run_until`](Self::run_until) on.
    pub async fn bind(config: FanoutConfig, store: Arc<S>) -> Result<Self> {
        let (listener_cb, events) = ChannelListener::new();
        let broker = Arc::new(StreamBroker::new(Arc::clone(&store)).with_listener(Arc::new(listener_cb)));
        let listener = TcpListener::bind(config.bind_addr).await?;

        Ok(Self {
            config,
            store,
            broker,
            events,
            listener,
            stats: Arc::new(FanoutStats::default()),
        })
    }

    /// Actual bound address (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The server's registry view
    pub fn broker(&self) -> &Arc<StreamBroker<S>> {
        &self.broker
    }

    /// Live viewer and stream counters
    pub fn stats(&self) -> Arc<FanoutStats> {
        Arc::clone(&self.stats)
    }

    /// Run until `shutdown` resolves or a fatal store error
    ///
    /// Every relay and viewer task is cancelled and awaited before this
    /// returns.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let FanoutServer {
            config,
            store,
            broker,
            mut events,
            listener,
            stats,
        } = self;

        let root = CancellationToken::new();
        let mut monitor = broker.start_monitor(root.child_token()).await?;

        tracing::info!(
            addr = %listener.local_addr()?,
            max_viewers = config.max_viewers,
            "Fan-out server listening"
        );

        let (admit_tx, mut admit_rx) = mpsc::unbounded_channel();
        let (left_tx, mut left_rx) = mpsc::unbounded_channel();

        let mut state = LoopState {
            table: ViewerTable::new(config.max_viewers),
            config,
            store,
            stats,
            root: root.clone(),
            streams: HashMap::new(),
            relays: JoinSet::new(),
            viewers: JoinSet::new(),
            next_viewer_id: 1,
            left_tx,
        };

        tokio::pin!(shutdown);
        let mut monitor_done = false;

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received");
                    break Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => state.on_accept(socket, peer, admit_tx.clone()),
                    Err(e) => tracing::error!(error = %e, "Failed to accept connection"),
                },
                Some(event) = events.recv() => match event {
                    StreamEvent::Added(id) => state.on_stream_added(id.to_string()),
                    StreamEvent::Removed(id) => state.on_stream_removed(&id.to_string()),
                },
                Some(request) = admit_rx.recv() => state.on_admission(request),
                Some(id) = left_rx.recv() => state.on_viewer_left(id),
                Some(_) = state.viewers.join_next() => {}
                Some(joined) = state.relays.join_next() => {
                    if let Err(e) = state.on_relay_done(joined) {
                        break Err(e);
                    }
                }
                joined = &mut monitor => {
                    monitor_done = true;
                    break match joined {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(e),
                        Err(e) => Err(Error::TaskFailed {
                            name: "registry-monitor".to_string(),
                            reason: e.to_string(),
                        }),
                    };
                }
            }
        };

        if let Err(ref e) = result {
            tracing::error!(error = %e, "Fan-out server failed");
        }

        root.cancel();
        drop(listener);

        while state.viewers.join_next().await.is_some() {}
        while state.relays.join_next().await.is_some() {}
        if !monitor_done {
            let _ = monitor.await;
        }

        tracing::info!(
            streams = state.streams.len(),
            viewers = state.table.len(),
            "Fan-out server stopped"
        );

        result
    }
}

/// Everything the event loop owns
struct LoopState<S: StreamStore> {
    config: FanoutConfig,
    store: Arc<S>,
    stats: Arc<FanoutStats>,
    root: CancellationToken,
    streams: HashMap<String, ActiveStream>,
    relays: JoinSet<(String, Result<()>)>,
    viewers: JoinSet<()>,
    table: ViewerTable,
    next_viewer_id: u64,
    left_tx: mpsc::UnboundedSender<u64>,
}

impl<S: StreamStore> LoopState<S> {
    fn on_accept(
        &mut self,
        socket: TcpStream,
        peer: SocketAddr,
        admissions: mpsc::UnboundedSender<AdmissionRequest>,
    ) {
        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let id = self.next_viewer_id;
        self.next_viewer_id += 1;

        tracing::debug!(viewer = id, peer = %peer, "New connection");

        self.viewers.spawn(serve_viewer(
            id,
            socket,
            peer,
            admissions,
            self.config.handshake_timeout,
            self.root.child_token(),
        ));
    }

    fn on_stream_added(&mut self, stream: String) {
        if self.streams.contains_key(&stream) {
            return;
        }

        let (tx, _) = broadcast::channel(self.config.viewer_buffer);
        let token = self.root.child_token();

        let store = Arc::clone(&self.store);
        let relay_tx = tx.clone();
        let relay_token = token.clone();
        let name = stream.clone();
        self.relays.spawn(async move {
            let result = relay_stream(store, name.clone(), relay_tx, relay_token).await;
            (name, result)
        });

        self.streams.insert(stream.clone(), ActiveStream { tx, token });
        self.stats.streams.store(self.streams.len(), Ordering::Relaxed);

        tracing::info!(stream = %stream, streams = self.streams.len(), "Relay started");
    }

    fn on_stream_removed(&mut self, stream: &str) {
        // Dropping the sender closes every viewer of the stream once the
        // relay has exited
        if let Some(active) = self.streams.remove(stream) {
            active.token.cancel();
            self.stats.streams.store(self.streams.len(), Ordering::Relaxed);
            tracing::info!(
                stream = %stream,
                viewers = self.table.count_for(stream),
                "Relay stopped"
            );
        }
    }

    fn on_admission(&mut self, request: AdmissionRequest) {
        let AdmissionRequest { id, target, reply } = request;
        let frames = self.streams.get(&target).map(|active| active.tx.subscribe());

        let decision = match (self.table.admit(id, &target, frames.is_some()), frames) {
            (Ok(()), Some(frames)) => Ok(Admitted {
                frames,
                guard: ViewerGuard::new(id, self.left_tx.clone()),
            }),
            (Ok(()), None) => Err(Rejection::UnknownStream),
            (Err(rejection), _) => Err(rejection),
        };

        match decision {
            Ok(admitted) => {
                self.stats.viewers.store(self.table.len(), Ordering::Relaxed);
                tracing::debug!(viewer = id, stream = %target, viewers = self.table.len(), "Viewer admitted");
                // A viewer gone before the reply drops its guard here
                let _ = reply.send(Ok(admitted));
            }
            Err(rejection) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                let _ = reply.send(Err(rejection));
            }
        }
    }

    fn on_viewer_left(&mut self, id: u64) {
        if self.table.remove(id).is_some() {
            self.stats.viewers.store(self.table.len(), Ordering::Relaxed);
            tracing::debug!(viewer = id, viewers = self.table.len(), "Viewer removed");
        }
    }

    fn on_relay_done(
        &mut self,
        joined: std::result::Result<(String, Result<()>), tokio::task::JoinError>,
    ) -> Result<()> {
        match joined {
            Ok((_, Ok(()))) => Ok(()),
            Ok((stream, Err(e))) => {
                tracing::error!(stream = %stream, error = %e, "Relay failed");
                Err(e)
            }
            Err(e) => Err(Error::TaskFailed {
                name: "relay".to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
