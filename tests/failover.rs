//! Session failover and reconciliation tests
//!
//! Exercises the connection lifecycle against in-process WebSocket
//! shards, and the reconciliation invariants at the library surface.

use futures_util::{SinkExt, StreamExt};
use linkstream_session::events::{destinations, topics, Frame};
use linkstream_session::{
    merge_users, ChatMessage, ConnectionPhase, FailoverOutcome, FailureKind, FailureSignal,
    PhaseCell, PostMessage, PushEvent, SessionConnection, SessionMetrics, StateReconciler, User,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

fn test_connection() -> (
    SessionConnection,
    mpsc::Receiver<PushEvent>,
    mpsc::Receiver<FailureSignal>,
) {
    let (push_tx, push_rx) = mpsc::channel(64);
    let (failure_tx, failure_rx) = mpsc::channel(64);
    let connection = SessionConnection::new(
        "alice",
        PhaseCell::new(),
        push_tx,
        failure_tx,
        SessionMetrics::default(),
    );
    (connection, push_rx, failure_rx)
}

async fn bind_shard() -> (TcpListener, SocketAddr, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let http_addr = format!("http://{addr}");
    (listener, addr, http_addr)
}

/// Accept one client and collect its first two subscribe frames.
async fn accept_and_read_subscriptions(
    listener: &TcpListener,
) -> (
    tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    Vec<String>,
) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    let mut subscribed = Vec::new();
    while subscribed.len() < 2 {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => match Frame::from_json(&text).unwrap() {
                Frame::Subscribe { topic } => subscribed.push(topic),
                other => panic!("expected subscribe frame, got {other:?}"),
            },
            other => panic!("expected text frame, got {other:?}"),
        }
    }
    (ws, subscribed)
}

#[tokio::test]
async fn connect_registers_exactly_the_two_user_topics() {
    let (listener, _, http_addr) = bind_shard().await;
    let server = tokio::spawn(async move {
        let (_ws, subscribed) = accept_and_read_subscriptions(&listener).await;
        subscribed
    });

    let (connection, _push, _failures) = test_connection();
    let epoch = timeout(WAIT, connection.connect(&http_addr))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(epoch, 1);
    assert_eq!(connection.phase(), ConnectionPhase::Connected);
    assert_eq!(connection.shard(), Some(http_addr));

    let subscribed = timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(subscribed, vec![topics::timeline("alice"), topics::chat("alice")]);

    connection.teardown().await;
}

#[tokio::test]
async fn publish_sends_a_send_frame_to_the_destination() {
    let (listener, _, http_addr) = bind_shard().await;
    let server = tokio::spawn(async move {
        let (mut ws, _) = accept_and_read_subscriptions(&listener).await;
        match ws.next().await {
            Some(Ok(Message::Text(text))) => Frame::from_json(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    });

    let (connection, _push, _failures) = test_connection();
    timeout(WAIT, connection.connect(&http_addr))
        .await
        .unwrap()
        .unwrap();

    connection
        .publish(
            destinations::CHAT,
            serde_json::json!({
                "from": "alice", "to": "bob", "text": "hi", "timestamp": 1000
            }),
        )
        .await
        .unwrap();

    match timeout(WAIT, server).await.unwrap().unwrap() {
        Frame::Send { destination, body } => {
            assert_eq!(destination, destinations::CHAT);
            assert_eq!(body["to"], "bob");
        }
        other => panic!("expected send frame, got {other:?}"),
    }

    connection.teardown().await;
}

#[tokio::test]
async fn push_frames_are_decoded_and_forwarded() {
    let (listener, _, http_addr) = bind_shard().await;
    let server = tokio::spawn(async move {
        let (mut ws, _) = accept_and_read_subscriptions(&listener).await;
        let frame = Frame::Message {
            topic: topics::chat("alice"),
            body: serde_json::json!({
                "from": "bob", "to": "alice", "text": "hi", "timestamp": 1000
            }),
        };
        ws.send(Message::Text(frame.to_json().unwrap().into()))
            .await
            .unwrap();
        // Hold the connection open until the client is done.
        let _ = ws.next().await;
    });

    let (connection, mut push_rx, _failures) = test_connection();
    timeout(WAIT, connection.connect(&http_addr))
        .await
        .unwrap()
        .unwrap();

    match timeout(WAIT, push_rx.recv()).await.unwrap().unwrap() {
        PushEvent::Chat(msg) => {
            assert_eq!(msg.from, "bob");
            assert_eq!(msg.text, "hi");
        }
        other => panic!("expected chat event, got {other:?}"),
    }

    connection.teardown().await;
    server.abort();
}

#[tokio::test]
async fn shard_close_raises_one_transport_failure_with_the_connection_epoch() {
    let (listener, _, http_addr) = bind_shard().await;
    let server = tokio::spawn(async move {
        let (mut ws, _) = accept_and_read_subscriptions(&listener).await;
        ws.close(None).await.unwrap();
    });

    let (connection, _push, mut failure_rx) = test_connection();
    let epoch = timeout(WAIT, connection.connect(&http_addr))
        .await
        .unwrap()
        .unwrap();

    let signal = timeout(WAIT, failure_rx.recv()).await.unwrap().unwrap();
    assert_eq!(signal.kind, FailureKind::TransportClosed);
    assert_eq!(signal.epoch, epoch);

    timeout(WAIT, server).await.unwrap().unwrap();
    connection.teardown().await;
}

#[tokio::test]
async fn malformed_push_raises_a_protocol_failure() {
    let (listener, _, http_addr) = bind_shard().await;
    let server = tokio::spawn(async move {
        let (mut ws, _) = accept_and_read_subscriptions(&listener).await;
        ws.send(Message::Text("not a frame".into())).await.unwrap();
        let _ = ws.next().await;
    });

    let (connection, _push, mut failure_rx) = test_connection();
    let epoch = timeout(WAIT, connection.connect(&http_addr))
        .await
        .unwrap()
        .unwrap();

    let signal = timeout(WAIT, failure_rx.recv()).await.unwrap().unwrap();
    assert_eq!(signal.kind, FailureKind::Protocol);
    assert_eq!(signal.epoch, epoch);

    connection.teardown().await;
    server.abort();
}

#[tokio::test]
async fn reconnect_closes_the_old_transport_and_advances_the_epoch() {
    let (listener_a, _, addr_a) = bind_shard().await;
    let (listener_b, _, addr_b) = bind_shard().await;

    let server_a = tokio::spawn(async move {
        let (mut ws, _) = accept_and_read_subscriptions(&listener_a).await;
        // The client switching shards must end this stream.
        loop {
            match ws.next().await {
                Some(Ok(_)) => continue,
                _ => break,
            }
        }
    });
    let server_b = tokio::spawn(async move {
        let (_ws, subscribed) = accept_and_read_subscriptions(&listener_b).await;
        subscribed
    });

    let (connection, _push, _failures) = test_connection();
    let first = timeout(WAIT, connection.connect(&addr_a))
        .await
        .unwrap()
        .unwrap();
    let second = timeout(WAIT, connection.connect(&addr_b))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first, 1);
    assert_eq!(second, 2);
    assert_eq!(connection.shard(), Some(addr_b));

    // Old transport observed the teardown; new shard got fresh
    // subscriptions with no duplicates.
    timeout(WAIT, server_a).await.unwrap().unwrap();
    let subscribed = timeout(WAIT, server_b).await.unwrap().unwrap();
    assert_eq!(subscribed.len(), 2);

    connection.teardown().await;
}

#[test]
fn failover_decision_matches_the_documented_phase_walk() {
    // Scenario: resolve returns shard2 while connected to shard1.
    let outcome = FailoverOutcome::decide(Some("http://shard2:9090"), Some("http://shard1:9090"));
    assert_eq!(outcome, FailoverOutcome::Reconnect("http://shard2:9090".to_string()));

    let cell = PhaseCell::new();
    assert!(cell.transition(ConnectionPhase::Connecting));
    assert!(cell.transition(ConnectionPhase::Connected));
    assert!(cell.transition(ConnectionPhase::Resolving));
    assert!(cell.transition(ConnectionPhase::Connecting));
    assert!(cell.transition(ConnectionPhase::Connected));

    // Scenario: the directory is unreachable; the session parks.
    let outcome = FailoverOutcome::decide(None, Some("http://shard1:9090"));
    assert_eq!(outcome, FailoverOutcome::Stop);
    assert!(cell.transition(ConnectionPhase::Resolving));
    assert!(cell.transition(ConnectionPhase::Disconnected));
}

#[test]
fn bulk_merge_excludes_the_viewer_and_defaults_unfollowed() {
    let roster = vec!["alice".to_string(), "bob".to_string(), "carol".to_string()];
    let follow_data = vec![User {
        username: "bob".to_string(),
        followed: true,
    }];

    let merged = merge_users("alice", &roster, &follow_data);

    assert_eq!(
        merged,
        vec![
            User { username: "bob".to_string(), followed: true },
            User { username: "carol".to_string(), followed: false },
        ]
    );
}

#[test]
fn incoming_and_echoed_chat_messages_share_a_thread() {
    let reconciler = StateReconciler::new("alice");

    reconciler.fold(PushEvent::Chat(ChatMessage {
        from: "bob".to_string(),
        to: "alice".to_string(),
        text: "hi".to_string(),
        timestamp: 1000,
    }));
    reconciler.fold(PushEvent::Chat(ChatMessage {
        from: "alice".to_string(),
        to: "bob".to_string(),
        text: "hello".to_string(),
        timestamp: 1001,
    }));

    let thread = reconciler.thread("bob");
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0].from, "bob");
    assert_eq!(thread[1].from, "alice");
}

#[test]
fn timeline_pushes_append_in_arrival_order() {
    let reconciler = StateReconciler::new("alice");

    for (ts, text) in [(2000, "late post first"), (1000, "early post second")] {
        reconciler.fold(PushEvent::Timeline(PostMessage {
            from: "bob".to_string(),
            text: text.to_string(),
            timestamp: ts,
        }));
    }

    let timeline = reconciler.timeline();
    assert_eq!(timeline[0].text, "late post first");
    assert_eq!(timeline[1].text, "early post second");
}
