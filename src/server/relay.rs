//! Per-stream relay and per-viewer forwarding tasks

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::viewers::Rejection;
use crate::error::{Error, Result};
use crate::store::StreamStore;

/// Forward a stream's published frames into its local broadcast channel
///
/// Ends with `Ok` when cancelled and with an error if the subscription
/// closes underneath it.
pub(crate) async fn relay_stream<S: StreamStore>(
    store: Arc<S>,
    stream: String,
    tx: broadcast::Sender<Bytes>,
    token: CancellationToken,
) -> Result<()> {
    let mut frames = tokio::select! {
        _ = token.cancelled() => return Ok(()),
        frames = store.subscribe(&stream) => frames?,
    };
    tracing::debug!(stream = %stream, "Relay subscribed");

    let mut relayed = 0u64;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            frame = frames.next() => match frame {
                Some(frame) => {
                    // No viewers is fine
                    let _ = tx.send(frame);
                    relayed += 1;
                }
                None if token.is_cancelled() => break,
                None => return Err(Error::SubscriptionClosed(stream)),
            }
        }
    }

    tracing::debug!(stream = %stream, relayed = relayed, "Relay stopped");
    Ok(())
}

/// Sends the viewer id back to the loop when dropped, however the viewer ends
pub(crate) struct ViewerGuard {
    id: u64,
    left: mpsc::UnboundedSender<u64>,
}

impl ViewerGuard {
    pub(crate) fn new(id: u64, left: mpsc::UnboundedSender<u64>) -> Self {
        Self { id, left }
    }
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        let _ = self.left.send(self.id);
    }
}

/// Admitted viewer's frame feed
pub(crate) struct Admitted {
    pub frames: broadcast::Receiver<Bytes>,
    pub guard: ViewerGuard,
}

/// Admission request from a viewer task to the event loop
pub(crate) struct AdmissionRequest {
    pub id: u64,
    pub target: String,
    pub reply: oneshot::Sender<std::result::Result<Admitted, Rejection>>,
}

/// Upgrade a TCP connection, ask for admission, then forward frames
pub(crate) async fn serve_viewer(
    id: u64,
    socket: TcpStream,
    peer: SocketAddr,
    admissions: mpsc::UnboundedSender<AdmissionRequest>,
    handshake_timeout: Duration,
    token: CancellationToken,
) {
    let mut path = None;
    let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        path = Some(req.uri().path().to_string());
        Ok(resp)
    };

    let handshake = tokio::time::timeout(
        handshake_timeout,
        tokio_tungstenite::accept_hdr_async(socket, callback),
    );
    let mut ws = tokio::select! {
        _ = token.cancelled() => return,
        result = handshake => match result {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                tracing::debug!(viewer = id, peer = %peer, error = %e, "WebSocket handshake failed");
                return;
            }
            Err(_) => {
                tracing::debug!(viewer = id, peer = %peer, "WebSocket handshake timed out");
                return;
            }
        }
    };

    let path = path.unwrap_or_default();
    let target = path.strip_prefix('/').unwrap_or(&path).to_string();

    let (reply_tx, reply_rx) = oneshot::channel();
    let request = AdmissionRequest {
        id,
        target: target.clone(),
        reply: reply_tx,
    };
    if admissions.send(request).is_err() {
        return;
    }

    let decision = tokio::select! {
        _ = token.cancelled() => return,
        decision = reply_rx => match decision {
            Ok(decision) => decision,
            Err(_) => return,
        }
    };

    let Admitted { mut frames, guard: _guard } = match decision {
        Ok(admitted) => admitted,
        Err(rejection) => {
            tracing::warn!(viewer = id, peer = %peer, stream = %target, reason = %rejection, "Viewer rejected");
            let code = match rejection {
                Rejection::UnknownStream => CloseCode::Normal,
                Rejection::Full => CloseCode::Again,
            };
            let _ = ws
                .close(Some(CloseFrame {
                    code,
                    reason: rejection.to_string().into(),
                }))
                .await;
            return;
        }
    };

    tracing::info!(viewer = id, peer = %peer, stream = %target, "Viewer connected");

    let (mut sink, mut incoming) = ws.split();
    let mut sent = 0u64;
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    if let Err(e) = sink.send(Message::Binary(frame.to_vec())).await {
                        tracing::debug!(viewer = id, error = %e, "Send to disconnected viewer");
                        break;
                    }
                    sent += 1;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(viewer = id, skipped = skipped, "Viewer lagging, skipped frames");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!(viewer = id, stream = %target, "Stream removed, closing viewer");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = incoming.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(viewer = id, error = %e, "Viewer read error");
                    break;
                }
            }
        }
    }

    tracing::info!(viewer = id, stream = %target, frames = sent, "Viewer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_relay_forwards_in_order() {
        let store = Arc::new(MemoryStore::new());
        let (tx, mut rx) = broadcast::channel(16);
        let token = CancellationToken::new();
        let relay = tokio::spawn(relay_stream(Arc::clone(&store), "a".to_string(), tx, token.clone()));

        while store.subscriber_count("a") == 0 {
            tokio::task::yield_now().await;
        }
        store.publish("a", Bytes::from_static(b"1")).await.unwrap();
        store.publish("b", Bytes::from_static(b"x")).await.unwrap();
        store.publish("a", Bytes::from_static(b"2")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"1"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"2"));

        token.cancel();
        relay.await.unwrap().unwrap();
        assert_eq!(store.subscriber_count("a"), 0);
        // Relay dropped its sender
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)));
    }

    #[tokio::test]
    async fn test_relay_fails_when_subscription_closes() {
        let store = Arc::new(MemoryStore::new());
        let (tx, _rx) = broadcast::channel(16);
        let relay = tokio::spawn(relay_stream(
            Arc::clone(&store),
            "a".to_string(),
            tx,
            CancellationToken::new(),
        ));

        while store.subscriber_count("a") == 0 {
            tokio::task::yield_now().await;
        }
        store.disconnect_all();

        assert!(matches!(relay.await.unwrap(), Err(Error::SubscriptionClosed(_))));
    }

    #[test]
    fn test_guard_reports_on_drop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(ViewerGuard::new(7, tx));
        assert_eq!(rx.try_recv().unwrap(), 7);
    }
}
