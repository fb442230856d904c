//! In-process transport.
//!
//! [`MemoryTransport::pair`] returns the client side of a channel together with
//! a [`MemoryPeer`] that plays the server: it sees every message the client
//! sends, can push messages back, can close the connection, and can inject
//! connect, disconnect and send failures.
//!
//! ```rust
//! # async fn demo() -> relaymcp_transport::TransportResult<()> {
//! use relaymcp_transport::{MemoryTransport, Transport};
//!
//! let (transport, peer) = MemoryTransport::pair();
//! transport.connect().await?;
//! peer.send_json(&serde_json::json!({"jsonrpc": "2.0", "method": "notifications/ready"}))?;
//! let msg = transport.receive().await?;
//! assert!(msg.is_some());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use relaymcp_protocol::MessageId;
use relaymcp_protocol::jsonrpc::JsonRpcMessage;
use serde::Serialize;
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tracing::{debug, trace, warn};

use crate::error::{TransportError, TransportResult};
use crate::message::TransportMessage;
use crate::traits::{Transport, TransportFuture, TransportState};

#[derive(Debug)]
enum Inbound {
    Message(TransportMessage),
    Close,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<TransportState>,
    fail_connects: AtomicUsize,
    fail_disconnect: AtomicBool,
    fail_sends: AtomicBool,
    connects: AtomicUsize,
    attempts: AtomicUsize,
    disconnects: AtomicUsize,
    connect_delay: Mutex<Duration>,
    peer_ids: AtomicI64,
}

/// Client side of an in-process connection
#[derive(Debug)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<TransportMessage>,
    inbound: TokioMutex<mpsc::UnboundedReceiver<Inbound>>,
}

/// Server side of an in-process connection
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    shared: Arc<Shared>,
    to_client: mpsc::UnboundedSender<Inbound>,
    from_client: Arc<TokioMutex<mpsc::UnboundedReceiver<TransportMessage>>>,
}

impl MemoryTransport {
    /// Create a disconnected transport and its peer
    pub fn pair() -> (Self, MemoryPeer) {
        let shared = Arc::new(Shared {
            state: Mutex::new(TransportState::Disconnected),
            fail_connects: AtomicUsize::new(0),
            fail_disconnect: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            connect_delay: Mutex::new(Duration::ZERO),
            peer_ids: AtomicI64::new(0),
        });
        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();

        let transport = Self {
            shared: Arc::clone(&shared),
            outbound,
            inbound: TokioMutex::new(inbound),
        };
        let peer = MemoryPeer {
            shared,
            to_client,
            from_client: Arc::new(TokioMutex::new(from_client)),
        };
        (transport, peer)
    }

    fn set_state(&self, state: TransportState) {
        *self.shared.state.lock() = state;
    }
}

impl Transport for MemoryTransport {
    fn state(&self) -> TransportFuture<'_, TransportState> {
        Box::pin(async move { self.shared.state.lock().clone() })
    }

    fn connect(&self) -> TransportFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            self.shared.attempts.fetch_add(1, Ordering::SeqCst);
            let delay = *self.shared.connect_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let refuse = self
                .shared
                .fail_connects
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refuse {
                debug!("Memory transport refusing connection");
                self.set_state(TransportState::Failed {
                    reason: "connection refused".to_string(),
                });
                return Err(TransportError::ConnectionFailed(
                    "connection refused by peer".to_string(),
                ));
            }

            self.set_state(TransportState::Connected);
            let n = self.shared.connects.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(connects = n, "Memory transport connected");
            Ok(())
        })
    }

    fn disconnect(&self) -> TransportFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            self.set_state(TransportState::Disconnected);
            self.shared.disconnects.fetch_add(1, Ordering::SeqCst);
            if self.shared.fail_disconnect.swap(false, Ordering::SeqCst) {
                return Err(TransportError::DisconnectFailed(
                    "peer did not acknowledge close".to_string(),
                ));
            }
            debug!("Memory transport disconnected");
            Ok(())
        })
    }

    fn send(&self, message: TransportMessage) -> TransportFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            if *self.shared.state.lock() != TransportState::Connected {
                return Err(TransportError::NotConnected);
            }
            if self.shared.fail_sends.load(Ordering::SeqCst) {
                return Err(TransportError::SendFailed("injected send failure".to_string()));
            }
            trace!(id = %message.id, size = message.size(), "Memory transport send");
            self.outbound
                .send(message)
                .map_err(|_| TransportError::ConnectionLost("peer dropped".to_string()))
        })
    }

    fn receive(&self) -> TransportFuture<'_, TransportResult<Option<TransportMessage>>> {
        Box::pin(async move {
            let mut inbound = self.inbound.lock().await;
            match inbound.recv().await {
                Some(Inbound::Message(message)) => Ok(Some(message)),
                Some(Inbound::Close) | None => {
                    debug!("Memory transport closed by peer");
                    self.set_state(TransportState::Disconnected);
                    Ok(None)
                }
            }
        })
    }

    fn endpoint(&self) -> Option<String> {
        Some("memory://peer".to_string())
    }
}

impl MemoryPeer {
    /// Push a raw message to the client
    pub fn send(&self, message: TransportMessage) -> TransportResult<()> {
        self.to_client
            .send(Inbound::Message(message))
            .map_err(|_| TransportError::ConnectionLost("client dropped".to_string()))
    }

    /// Serialize `value` and push it to the client
    pub fn send_json<T: Serialize>(&self, value: &T) -> TransportResult<()> {
        let id = self.shared.peer_ids.fetch_add(1, Ordering::SeqCst);
        let payload = serde_json::to_vec(value)?;
        self.send(TransportMessage::new(
            MessageId::String(format!("peer-{id}")),
            Bytes::from(payload),
        ))
    }

    /// Next message the client sent, or `None` once the client is dropped
    pub async fn recv(&self) -> Option<TransportMessage> {
        self.from_client.lock().await.recv().await
    }

    /// Next message the client sent that parses as JSON-RPC
    pub async fn recv_json(&self) -> Option<JsonRpcMessage> {
        loop {
            let message = self.recv().await?;
            match message.to_jsonrpc() {
                Ok(parsed) => return Some(parsed),
                Err(e) => warn!(error = %e, "Peer skipping unparseable message"),
            }
        }
    }

    /// Close the connection; the client's next `receive()` returns `Ok(None)`
    pub fn close(&self) {
        let _ = self.to_client.send(Inbound::Close);
    }

    /// Refuse the next `n` connection attempts
    pub fn fail_next_connects(&self, n: usize) {
        self.shared.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Make the next `disconnect()` report an error
    pub fn fail_next_disconnect(&self) {
        self.shared.fail_disconnect.store(true, Ordering::SeqCst);
    }

    /// Make every connection attempt take `delay` before it resolves
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.shared.connect_delay.lock() = delay;
    }

    /// Make every `send()` fail until reset
    pub fn fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Number of successful connections so far
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Number of connection attempts so far, refused ones included
    pub fn connect_attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Number of times the client closed its side
    pub fn disconnect_count(&self) -> usize {
        self.shared.disconnects.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_requires_connection() {
        let (transport, _peer) = MemoryTransport::pair();
        let msg = TransportMessage::new(MessageId::Number(1), Bytes::from_static(b"{}"));
        assert_eq!(
            transport.send(msg).await.unwrap_err(),
            TransportError::NotConnected
        );
    }

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let (transport, peer) = MemoryTransport::pair();
        transport.connect().await.unwrap();

        let request = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});
        transport
            .send(TransportMessage::from_json(MessageId::Number(1), &request).unwrap())
            .await
            .unwrap();
        let seen = peer.recv_json().await.unwrap();
        assert_eq!(seen.method(), Some("ping"));

        peer.send_json(&json!({"jsonrpc": "2.0", "id": 1, "result": {}}))
            .unwrap();
        let reply = transport.receive().await.unwrap().unwrap();
        assert!(matches!(
            reply.to_jsonrpc().unwrap(),
            JsonRpcMessage::Response(_)
        ));
    }

    #[tokio::test]
    async fn test_close_then_reconnect() {
        let (transport, peer) = MemoryTransport::pair();
        transport.connect().await.unwrap();

        peer.close();
        assert!(transport.receive().await.unwrap().is_none());
        assert_eq!(transport.state().await, TransportState::Disconnected);

        transport.connect().await.unwrap();
        assert!(transport.is_connected().await);
        assert_eq!(peer.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_injected_connect_failures() {
        let (transport, peer) = MemoryTransport::pair();
        peer.fail_next_connects(2);

        assert!(transport.connect().await.is_err());
        assert!(matches!(
            transport.state().await,
            TransportState::Failed { .. }
        ));
        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_ok());
        assert_eq!(peer.connect_count(), 1);
        assert_eq!(peer.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_injected_disconnect_failure_still_disconnects() {
        let (transport, peer) = MemoryTransport::pair();
        transport.connect().await.unwrap();
        peer.fail_next_disconnect();

        assert!(matches!(
            transport.disconnect().await,
            Err(TransportError::DisconnectFailed(_))
        ));
        assert_eq!(transport.state().await, TransportState::Disconnected);
        assert!(transport.disconnect().await.is_ok());
        assert_eq!(peer.disconnect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_delay() {
        let (transport, peer) = MemoryTransport::pair();
        peer.set_connect_delay(Duration::from_millis(500));

        let start = tokio::time::Instant::now();
        transport.connect().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(peer.connect_attempts(), 1);
    }
}
