//! Shared fixtures for the client integration tests
//!
//! Every test drives a real [`Client`] over a [`MemoryTransport`]; the
//! [`MemoryPeer`] plays the server.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relaymcp_client::{Client, ClientBuilder, ClientConfig, ConnectionState};
use relaymcp_protocol::jsonrpc::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use relaymcp_transport::{MemoryPeer, MemoryTransport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once; `RUST_LOG` overrides the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// No heartbeat and no reconnection, so nothing happens behind the test's back
pub fn quiet_config() -> ClientConfig {
    ClientConfig {
        auto_reconnect: false,
        heartbeat_interval: 0,
        ..ClientConfig::default()
    }
}

/// Fresh client and the server side of its transport
pub fn client(config: ClientConfig) -> (Client<MemoryTransport>, MemoryPeer) {
    init_tracing();
    let (transport, peer) = MemoryTransport::pair();
    let client = ClientBuilder::new()
        .with_config(config)
        .build(transport)
        .expect("test config is valid");
    (client, peer)
}

/// Fake server loop
///
/// Every message the client sends is forwarded on the returned channel.
/// Requests are additionally passed to `answer`; a `Some` response is sent
/// back, `None` leaves the request hanging.
pub fn serve<F>(peer: MemoryPeer, answer: F) -> (JoinHandle<()>, mpsc::UnboundedReceiver<JsonRpcMessage>)
where
    F: Fn(&MemoryPeer, &JsonRpcRequest) -> Option<JsonRpcResponse> + Send + 'static,
{
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(message) = peer.recv_json().await {
            if let JsonRpcMessage::Request(request) = &message {
                if let Some(response) = answer(&peer, request) {
                    let _ = peer.send_json(&response);
                }
            }
            let _ = seen_tx.send(message);
        }
    });
    (handle, seen_rx)
}

/// Next forwarded message with `method`, skipping others
pub async fn next_with_method(
    seen: &mut mpsc::UnboundedReceiver<JsonRpcMessage>,
    method: &str,
) -> JsonRpcMessage {
    let wait = async {
        loop {
            let message = seen.recv().await.expect("server loop ended");
            if message.method() == Some(method) {
                return message;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("no {method} message arrived"))
}

/// Next forwarded response, skipping requests and notifications
pub async fn next_response(seen: &mut mpsc::UnboundedReceiver<JsonRpcMessage>) -> JsonRpcResponse {
    let wait = async {
        loop {
            if let JsonRpcMessage::Response(response) = seen.recv().await.expect("server loop ended") {
                return response;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("no response arrived")
}

/// Record every state transition of `client`
pub fn record_states(client: &Client<MemoryTransport>) -> Arc<Mutex<Vec<ConnectionState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    client.on_state_change(move |state| sink.lock().push(state));
    states
}

/// Yield until `condition` holds, failing after a generous bound
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never became true");
}
