//! Connection lifecycle: state transitions, reconnection backoff, heartbeat

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use relaymcp_client::{CallOptions, ClientConfig, ConnectionState};
use relaymcp_protocol::ErrorKind;
use tokio::time::{Instant, sleep_until};

use common::{client, quiet_config, record_states};

use ConnectionState::{Connected, Connecting, Disconnected, Disconnecting, Error};

#[tokio::test]
async fn test_fresh_client_is_disconnected() {
    let (client, peer) = client(ClientConfig::default());

    assert_eq!(client.state(), Disconnected);
    assert!(!client.is_connected());
    assert_eq!(client.stats().connect_time, None);
    assert_eq!(peer.connect_attempts(), 0);
}

#[tokio::test]
async fn test_connect_then_disconnect_emits_each_transition_once() {
    let (client, peer) = client(quiet_config());
    let states = record_states(&client);

    client.connect().await.unwrap();
    assert_eq!(*states.lock(), vec![Connecting, Connected]);
    assert!(client.stats().connect_time.is_some());

    states.lock().clear();
    client.disconnect().await.unwrap();
    assert_eq!(*states.lock(), vec![Disconnecting, Disconnected]);
    assert_eq!(peer.connect_count(), 1);

    // Second disconnect is a no-op
    client.disconnect().await.unwrap();
    assert_eq!(states.lock().len(), 2);
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let (client, _peer) = client(quiet_config());
    client.connect().await.unwrap();

    let err = client.connect().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::AlreadyConnected);
    assert_eq!(client.state(), Connected);
}

#[tokio::test]
async fn test_calls_while_disconnected_never_reach_transport() {
    let (client, peer) = client(quiet_config());

    let err = client
        .call_tool("search", None, CallOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotConnected);
    assert_eq!(client.list_tools().await.unwrap_err().kind, ErrorKind::NotConnected);

    let stats = client.stats();
    assert_eq!((stats.request_count, stats.error_count), (0, 0));
    assert_eq!(peer.connect_attempts(), 0);
    assert!(
        tokio::time::timeout(Duration::from_millis(20), peer.recv())
            .await
            .is_err(),
        "nothing may be sent while disconnected"
    );
}

#[tokio::test]
async fn test_failed_connect_lands_in_error() {
    let (client, peer) = client(quiet_config());
    let states = record_states(&client);
    peer.fail_next_connects(1);

    let err = client.connect().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Transport);
    assert_eq!(*states.lock(), vec![Connecting, Error]);

    // Error is a valid starting point for a manual retry
    client.connect().await.unwrap();
    assert_eq!(client.state(), Connected);
}

#[tokio::test]
async fn test_disconnect_error_is_returned_but_state_settles() {
    let (client, peer) = client(quiet_config());
    client.connect().await.unwrap();
    peer.fail_next_disconnect();

    let err = client.disconnect().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Transport);
    assert_eq!(client.state(), Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff_doubles_until_budget_is_spent() {
    let config = ClientConfig {
        retry_delay: 100,
        max_retries: 3,
        heartbeat_interval: 0,
        ..ClientConfig::default()
    };
    let (client, peer) = client(config);
    peer.fail_next_connects(usize::MAX);

    assert!(client.connect().await.is_err());
    let start = Instant::now();
    assert_eq!(peer.connect_attempts(), 1);

    // Attempts at +100, +300 (100 + 200) and +700 (300 + 400)
    for (at_ms, expected) in [(99, 1), (101, 2), (299, 2), (301, 3), (699, 3), (701, 4)] {
        sleep_until(start + Duration::from_millis(at_ms)).await;
        assert_eq!(peer.connect_attempts(), expected, "attempts at +{at_ms}ms");
    }

    // Budget exhausted: nothing else happens
    sleep_until(start + Duration::from_secs(60)).await;
    assert_eq!(peer.connect_attempts(), 4);
    assert_eq!(client.state(), Error);
    assert_eq!(client.stats().reconnect_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_successful_reconnect_resets_backoff() {
    let config = ClientConfig {
        retry_delay: 100,
        max_retries: 2,
        heartbeat_interval: 0,
        ..ClientConfig::default()
    };
    let (client, peer) = client(config);
    peer.fail_next_connects(1);

    assert!(client.connect().await.is_err());
    let start = Instant::now();

    sleep_until(start + Duration::from_millis(150)).await;
    assert_eq!(client.state(), Connected);
    assert_eq!(client.connection().reconnect_attempts(), 0);
    assert_eq!(client.stats().reconnect_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_manual_disconnect_cancels_pending_reconnect() {
    let config = ClientConfig {
        retry_delay: 100,
        heartbeat_interval: 0,
        ..ClientConfig::default()
    };
    let (client, peer) = client(config);
    peer.fail_next_connects(1);

    assert!(client.connect().await.is_err());
    let start = Instant::now();
    client.disconnect().await.unwrap();

    sleep_until(start + Duration::from_secs(10)).await;
    assert_eq!(peer.connect_attempts(), 1);
    assert_eq!(client.state(), Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_abandons_dialing_reconnect() {
    let config = ClientConfig {
        retry_delay: 100,
        max_retries: 5,
        heartbeat_interval: 0,
        ..ClientConfig::default()
    };
    let (client, peer) = client(config);
    let states = record_states(&client);
    peer.fail_next_connects(usize::MAX);
    peer.set_connect_delay(Duration::from_millis(500));

    assert!(client.connect().await.is_err());
    let start = Instant::now();

    // The first reconnection dials from +100 and would be refused at +600
    sleep_until(start + Duration::from_millis(200)).await;
    assert_eq!(client.state(), Connecting);

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), Disconnected);
    assert!(start.elapsed() < Duration::from_millis(300));

    sleep_until(start + Duration::from_secs(60)).await;
    assert_eq!(peer.connect_attempts(), 2);
    assert_eq!(client.state(), Disconnected);
    assert_eq!(
        *states.lock(),
        vec![Connecting, Error, Connecting, Disconnected]
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_takes_over_from_dialing_reconnect() {
    let config = ClientConfig {
        retry_delay: 100,
        heartbeat_interval: 0,
        ..ClientConfig::default()
    };
    let (client, peer) = client(config);
    peer.fail_next_connects(1);
    peer.set_connect_delay(Duration::from_millis(500));

    assert!(client.connect().await.is_err());
    let start = Instant::now();

    sleep_until(start + Duration::from_millis(200)).await;
    assert_eq!(client.state(), Connecting);

    client.connect().await.unwrap();
    assert_eq!(client.state(), Connected);
    assert_eq!(peer.connect_attempts(), 3);
    assert_eq!(peer.connect_count(), 1);

    sleep_until(start + Duration::from_secs(10)).await;
    assert_eq!(client.state(), Connected);
    assert_eq!(peer.connect_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_peer_close_triggers_reconnect() {
    let config = ClientConfig {
        retry_delay: 100,
        heartbeat_interval: 0,
        ..ClientConfig::default()
    };
    let (client, peer) = client(config);
    let states = record_states(&client);
    client.connect().await.unwrap();
    let start = Instant::now();

    peer.close();
    sleep_until(start + Duration::from_millis(50)).await;
    assert_eq!(client.state(), Disconnected);

    sleep_until(start + Duration::from_millis(150)).await;
    assert_eq!(client.state(), Connected);
    assert_eq!(
        *states.lock(),
        vec![Connecting, Connected, Disconnected, Connecting, Connected]
    );
    assert_eq!(peer.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_failure_moves_to_error_and_reconnects() {
    let config = ClientConfig {
        heartbeat_interval: 1_000,
        heartbeat_timeout: 200,
        retry_delay: 100,
        ..ClientConfig::default()
    };
    let (client, peer) = client(config);
    let states = record_states(&client);
    client.connect().await.unwrap();
    let start = Instant::now();

    // The peer never answers: ping at +1000, timeout at +1200
    sleep_until(start + Duration::from_millis(1_100)).await;
    assert_eq!(client.state(), Connected);

    sleep_until(start + Duration::from_millis(1_250)).await;
    assert_eq!(client.state(), Error);

    // Reconnect after the first backoff step, at +1300
    sleep_until(start + Duration::from_millis(1_350)).await;
    assert_eq!(client.state(), Connected);
    assert_eq!(
        *states.lock(),
        vec![Connecting, Connected, Error, Connecting, Connected]
    );
    assert_eq!(client.stats().reconnect_count, 1);
    assert_eq!(peer.connect_count(), 2);
    // The unresponsive link was closed before dialing again
    assert_eq!(peer.disconnect_count(), 1);

    let ping = peer.recv_json().await.unwrap();
    assert_eq!(ping.method(), Some("ping"));
}

#[tokio::test(start_paused = true)]
async fn test_answered_heartbeat_keeps_connection() {
    let config = ClientConfig {
        heartbeat_interval: 1_000,
        heartbeat_timeout: 200,
        ..ClientConfig::default()
    };
    let (client, peer) = client(config);
    let (_server, _seen) = common::serve(peer, |_, request| {
        Some(relaymcp_protocol::JsonRpcResponse::success(
            serde_json::json!({}),
            request.id.clone(),
        ))
    });
    client.connect().await.unwrap();
    let start = Instant::now();

    sleep_until(start + Duration::from_millis(5_500)).await;
    assert_eq!(client.state(), Connected);
    assert_eq!(client.stats().reconnect_count, 0);
}
