//! Integration tests for the in-process transport used as a shared handle.

use std::collections::BTreeSet;
use std::sync::Arc;

use relaymcp_protocol::MessageId;
use relaymcp_protocol::jsonrpc::{JsonRpcMessage, JsonRpcRequest};
use relaymcp_transport::{MemoryTransport, Transport, TransportMessage, TransportState};

#[tokio::test]
async fn concurrent_senders_share_one_transport() {
    let (transport, peer) = MemoryTransport::pair();
    let transport = Arc::new(transport);
    transport.connect().await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..8_i64 {
        let transport = Arc::clone(&transport);
        tasks.push(tokio::spawn(async move {
            let request = JsonRpcRequest::new("ping", None, MessageId::Number(i));
            let msg = TransportMessage::from_json(MessageId::Number(i), &request).unwrap();
            transport.send(msg).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut seen = BTreeSet::new();
    for _ in 0..8 {
        match peer.recv_json().await.unwrap() {
            JsonRpcMessage::Request(req) => {
                seen.insert(req.id);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
    assert_eq!(seen.len(), 8);
}

#[tokio::test]
async fn dropping_the_peer_reads_as_close() {
    let (transport, peer) = MemoryTransport::pair();
    transport.connect().await.unwrap();
    drop(peer);

    assert!(transport.receive().await.unwrap().is_none());
    assert_eq!(transport.state().await, TransportState::Disconnected);
}

#[tokio::test]
async fn failing_sends_surface_as_errors() {
    let (transport, peer) = MemoryTransport::pair();
    transport.connect().await.unwrap();
    peer.fail_sends(true);

    let msg = TransportMessage::from_json(MessageId::Number(1), &serde_json::json!({})).unwrap();
    assert!(transport.send(msg.clone()).await.is_err());

    peer.fail_sends(false);
    assert!(transport.send(msg).await.is_ok());
}
