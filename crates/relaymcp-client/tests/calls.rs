//! Request execution: results, errors, progress, timeouts and cancellation

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use relaymcp_client::{CallOptions, CancellationToken, SessionUpdate};
use relaymcp_protocol::jsonrpc::{JsonRpcError, JsonRpcMessage, JsonRpcNotification};
use relaymcp_protocol::types::ProgressNotification;
use relaymcp_protocol::{ErrorKind, JsonRpcResponse, MessageId};
use serde_json::{Value, json};

use common::{client, eventually, next_response, next_with_method, quiet_config, serve};

fn text_result(text: &str) -> Value {
    json!({"content": [{"type": "text", "text": text}]})
}

#[tokio::test]
async fn test_call_tool_round_trip() {
    let (client, peer) = client(quiet_config());
    let (_server, mut seen) = serve(peer, |_, request| {
        (request.method == "tools/call").then(|| {
            let name = request.params.as_ref().and_then(|p| p["name"].as_str()).unwrap_or("");
            JsonRpcResponse::success(text_result(name), request.id.clone())
        })
    });
    client.connect().await.unwrap();

    let result = client
        .call_tool("echo", Some(json!({"text": "hi"})), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(result.content, vec![json!({"type": "text", "text": "echo"})]);

    let JsonRpcMessage::Request(sent) = next_with_method(&mut seen, "tools/call").await else {
        panic!("tools/call must be a request");
    };
    assert_eq!(sent.params, Some(json!({"name": "echo", "arguments": {"text": "hi"}})));

    let stats = client.stats();
    assert_eq!((stats.request_count, stats.error_count), (1, 0));
    assert!(stats.last_activity.is_some());
    assert!(client.active_requests().is_empty());
}

#[tokio::test]
async fn test_server_error_is_counted_and_returned() {
    let (client, peer) = client(quiet_config());
    let (_server, _seen) = serve(peer, |_, request| {
        Some(JsonRpcResponse::error_response(
            JsonRpcError::new(-32050, "tool exploded"),
            request.id.clone(),
        ))
    });
    client.connect().await.unwrap();

    let err = client
        .call_tool("boom", None, CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Rpc { code: -32050 });
    assert_eq!(err.message, "tool exploded");

    let stats = client.stats();
    assert_eq!((stats.request_count, stats.error_count), (1, 1));
}

#[tokio::test]
async fn test_progress_reaches_subscriber_in_order() {
    let (client, peer) = client(quiet_config());
    let (_server, _seen) = serve(peer, |peer, request| {
        let token = request.params.as_ref()?["_meta"]["progressToken"].clone();
        for step in [25, 50, 75] {
            peer.send_json(&json!({
                "jsonrpc": "2.0",
                "method": "notifications/progress",
                "params": {"progressToken": token, "progress": step, "total": 100}
            }))
            .ok()?;
        }
        // Progress for some other call must not leak in
        peer.send_json(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/progress",
            "params": {"progressToken": 999_999, "progress": 1}
        }))
        .ok()?;
        Some(JsonRpcResponse::success(text_result("done"), request.id.clone()))
    });
    client.connect().await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let options =
        CallOptions::new().with_progress(move |p: &ProgressNotification| sink.lock().push(p.progress));

    client.call_tool("build", None, options).await.unwrap();
    assert_eq!(*seen.lock(), vec![25.0, 50.0, 75.0]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_cleans_up() {
    let (client, peer) = client(quiet_config());
    let (_server, _seen) = serve(peer, |_, _| None);
    client.connect().await.unwrap();

    let options = CallOptions::new()
        .with_timeout(Duration::from_millis(500))
        .with_progress(|_: &ProgressNotification| {});
    let err = client
        .call_tool("slow", None, options)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(client.active_requests().is_empty());
    let stats = client.stats();
    assert_eq!((stats.request_count, stats.error_count), (1, 1));
}

#[tokio::test]
async fn test_dropped_call_cleans_up() {
    let (client, peer) = client(quiet_config());
    let (_server, mut seen) = serve(peer.clone(), |_, _| None);
    client.connect().await.unwrap();

    let watcher = Arc::new(());
    let call = tokio::spawn({
        let client = client.clone();
        let held = Arc::clone(&watcher);
        let options = CallOptions::new().with_progress(move |_: &ProgressNotification| {
            let _ = &held;
        });
        async move { client.call_tool("slow", None, options).await }
    });

    let JsonRpcMessage::Request(request) = next_with_method(&mut seen, "tools/call").await else {
        panic!("tools/call must be a request");
    };
    assert_eq!(client.active_requests(), vec![request.id.clone()]);
    assert_eq!(Arc::strong_count(&watcher), 2);

    call.abort();
    assert!(call.await.unwrap_err().is_cancelled());
    assert!(client.active_requests().is_empty());
    // The progress callback was released along with its subscription
    assert_eq!(Arc::strong_count(&watcher), 1);
}

#[tokio::test]
async fn test_peer_close_fails_call_promptly() {
    let (client, peer) = client(quiet_config());
    let (_server, mut seen) = serve(peer.clone(), |_, _| None);
    client.connect().await.unwrap();

    let call = tokio::spawn({
        let client = client.clone();
        let options = CallOptions::new().with_timeout(Duration::from_secs(30));
        async move { client.call_tool("slow", None, options).await }
    });
    next_with_method(&mut seen, "tools/call").await;

    peer.close();
    let err = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .expect("call outlived the connection")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Transport);
    assert!(client.active_requests().is_empty());
    let stats = client.stats();
    assert_eq!((stats.request_count, stats.error_count), (1, 1));
}

#[tokio::test]
async fn test_disconnect_fails_call_promptly() {
    let (client, peer) = client(quiet_config());
    let (_server, mut seen) = serve(peer.clone(), |_, _| None);
    client.connect().await.unwrap();

    let call = tokio::spawn({
        let client = client.clone();
        let options = CallOptions::new().with_timeout(Duration::from_secs(30));
        async move { client.read_resource("file:///big", options).await }
    });
    next_with_method(&mut seen, "resources/read").await;

    client.disconnect().await.unwrap();
    let err = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .expect("call outlived the connection")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Transport);
    assert_eq!(client.stats().error_count, 1);
}

#[tokio::test]
async fn test_cancellation_token_aborts_call() {
    let (client, peer) = client(quiet_config());
    let (_server, mut seen) = serve(peer, |_, _| None);
    client.connect().await.unwrap();

    let token = CancellationToken::new();
    let call = tokio::spawn({
        let client = client.clone();
        let options = CallOptions::new().with_cancellation(token.clone());
        async move { client.call_tool("slow", None, options).await }
    });

    let JsonRpcMessage::Request(request) = next_with_method(&mut seen, "tools/call").await else {
        panic!("tools/call must be a request");
    };
    assert_eq!(client.active_requests(), vec![request.id.clone()]);

    token.cancel();
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert!(client.active_requests().is_empty());

    let JsonRpcMessage::Notification(notice) =
        next_with_method(&mut seen, "notifications/cancelled").await
    else {
        panic!("cancellation notice must be a notification");
    };
    assert_eq!(
        notice.params.as_ref().map(|p| p["requestId"].clone()),
        Some(Value::from(request.id))
    );
}

#[tokio::test]
async fn test_cancel_request_by_id() {
    let (client, peer) = client(quiet_config());
    let (_server, mut seen) = serve(peer, |_, _| None);
    client.connect().await.unwrap();

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.read_resource("file:///big", CallOptions::new()).await }
    });
    let JsonRpcMessage::Request(request) = next_with_method(&mut seen, "resources/read").await else {
        panic!("resources/read must be a request");
    };

    assert!(client.cancel_request(&request.id));
    assert!(!client.cancel_request(&request.id));
    assert_eq!(call.await.unwrap().unwrap_err().kind, ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_already_cancelled_token_sends_nothing() {
    let (client, peer) = client(quiet_config());
    let (_server, mut seen) = serve(peer, |_, _| None);
    client.connect().await.unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let err = client
        .call_tool("never", None, CallOptions::new().with_cancellation(token))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert!(
        tokio::time::timeout(Duration::from_millis(20), seen.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_listings_follow_pagination() {
    let (client, peer) = client(quiet_config());
    let (_server, _seen) = serve(peer, |_, request| {
        let cursor = request.params.as_ref().and_then(|p| p["cursor"].as_str());
        let page = match cursor {
            None => json!({"tools": [{"name": "a", "inputSchema": {}}], "nextCursor": "p2"}),
            Some("p2") => json!({"tools": [{"name": "b", "inputSchema": {}}]}),
            Some(_) => json!({"tools": []}),
        };
        Some(JsonRpcResponse::success(page, request.id.clone()))
    });
    client.connect().await.unwrap();

    let names: Vec<String> = client
        .list_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|tool| tool.name)
        .collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(client.stats().request_count, 2);
}

#[tokio::test]
async fn test_listing_stops_on_repeated_cursor() {
    let (client, peer) = client(quiet_config());
    let (_server, _seen) = serve(peer, |_, request| {
        let page = json!({"resources": [{"uri": "file:///loop", "name": "loop"}], "nextCursor": "same"});
        Some(JsonRpcResponse::success(page, request.id.clone()))
    });
    client.connect().await.unwrap();

    let err = client.list_resources().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Protocol);
    assert_eq!(err.message, "resources/list repeated cursor 'same'");
    assert_eq!(client.stats().request_count, 2);
}

#[tokio::test]
async fn test_malformed_result_is_protocol_error() {
    let (client, peer) = client(quiet_config());
    let (_server, _seen) = serve(peer, |_, request| {
        Some(JsonRpcResponse::success(json!({"tools": "nope"}), request.id.clone()))
    });
    client.connect().await.unwrap();

    assert_eq!(client.list_tools().await.unwrap_err().kind, ErrorKind::Protocol);
}

#[tokio::test]
async fn test_successful_call_touches_session() {
    let (client, peer) = client(quiet_config());
    let (_server, _seen) = serve(peer, |_, request| {
        Some(JsonRpcResponse::success(json!({}), request.id.clone()))
    });
    client.connect().await.unwrap();

    let created = client.set_session_context(SessionUpdate::new().with_user(json!("ada")));
    tokio::time::sleep(Duration::from_millis(5)).await;
    client.ping().await.unwrap();

    let session = client.session_context().unwrap();
    assert_eq!(session.session_id, created.session_id);
    assert!(session.last_activity > created.last_activity);

    client.clear_session_context();
    assert_eq!(client.session_context(), None);
}

#[tokio::test]
async fn test_server_requests_are_answered() {
    let (client, peer) = client(quiet_config());
    let (_server, mut seen) = serve(peer.clone(), |_, _| None);
    client.connect().await.unwrap();

    peer.send_json(&json!({"jsonrpc": "2.0", "id": "srv-1", "method": "ping"}))
        .unwrap();
    let pong = next_response(&mut seen).await;
    assert_eq!(pong.request_id(), Some(&MessageId::from("srv-1")));
    assert_eq!(pong.result(), Some(&json!({})));

    peer.send_json(&json!({"jsonrpc": "2.0", "id": 7, "method": "sampling/createMessage"}))
        .unwrap();
    let refusal = next_response(&mut seen).await;
    assert_eq!(refusal.request_id(), Some(&MessageId::Number(7)));
    assert_eq!(refusal.error().map(|e| e.code), Some(-32601));
}

#[tokio::test]
async fn test_notification_subscribers_see_every_notification() {
    let (client, peer) = client(quiet_config());
    let (_server, _seen) = serve(peer.clone(), |_, _| None);
    client.connect().await.unwrap();

    let methods = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&methods);
    let subscription =
        client.on_notification(move |n: &JsonRpcNotification| sink.lock().push(n.method.clone()));

    for method in ["notifications/message", "notifications/progress"] {
        peer.send_json(&json!({"jsonrpc": "2.0", "method": method, "params": {"progressToken": 1, "progress": 1}}))
            .unwrap();
    }
    eventually(|| methods.lock().len() == 2).await;
    assert_eq!(
        *methods.lock(),
        vec!["notifications/message", "notifications/progress"]
    );

    subscription.unsubscribe();
    peer.send_json(&json!({"jsonrpc": "2.0", "method": "notifications/message"}))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(methods.lock().len(), 2);
}

#[tokio::test]
async fn test_send_failures_are_retried() {
    let config = relaymcp_client::ClientConfig {
        retries: 2,
        ..quiet_config()
    };
    let (client, peer) = client(config);
    client.connect().await.unwrap();
    peer.fail_sends(true);

    let err = client.ping().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Transport);
    assert_eq!(client.stats().error_count, 1);
}
