//! End-to-end dispatch behavior over a real WebSocket.

mod common;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use pulsedesk_connection::{ConnectOptions, ConnectionManager, WILDCARD};
use pulsedesk_protocol::Frame;

use common::{accept, bind, text_frame};

#[tokio::test]
async fn typed_frame_reaches_its_handler_once() {
    let (listener, url) = bind().await;
    let mgr = ConnectionManager::new(ConnectOptions::default());

    let (tx, mut rx) = mpsc::channel::<serde_json::Value>(8);
    mgr.on("task_created", "board", move |frame| {
        if let Ok(Some(data)) = frame.parse_data::<serde_json::Value>() {
            let _ = tx.try_send(data);
        }
    });

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        ws.send(text_frame("task_created", serde_json::json!({"id": 1})))
            .await
            .unwrap();
        // Hold the connection open until the client disconnects.
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    });

    mgr.connect(&format!("{url}/ws/projects/p1/tasks")).await;
    assert!(mgr.is_connected());

    let data = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("handler should fire")
        .unwrap();
    assert_eq!(data, serde_json::json!({"id": 1}));

    // Exactly once.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());

    mgr.disconnect().await;
    let _ = server.await;
}

#[tokio::test]
async fn unregistered_type_reaches_only_wildcard_handlers() {
    let (listener, url) = bind().await;
    let mgr = ConnectionManager::new(ConnectOptions::default());

    let (tx, mut rx) = mpsc::channel::<String>(8);
    {
        let tx = tx.clone();
        mgr.on(WILDCARD, "audit", move |frame| {
            let _ = tx.try_send(format!("wildcard:{}", frame.frame_type));
        });
    }
    mgr.on("task_created", "board", move |frame| {
        let _ = tx.try_send(format!("typed:{}", frame.frame_type));
    });

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        ws.send(text_frame("source_update", serde_json::json!({"n": 3})))
            .await
            .unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    });

    mgr.connect(&format!("{url}/ws/knowledge")).await;

    let seen = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("wildcard should fire")
        .unwrap();
    assert_eq!(seen, "wildcard:source_update");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "typed handler must not fire");

    mgr.disconnect().await;
    let _ = server.await;
}

#[tokio::test]
async fn send_degrades_to_false_when_not_connected() {
    let (listener, url) = bind().await;
    let mgr = ConnectionManager::new(ConnectOptions::default());

    assert!(!mgr.send("chat_message", Some(&serde_json::json!({"text": "hi"}))).await);

    let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(8);
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                tokio_tungstenite::tungstenite::Message::Text(text) => {
                    let frame: Frame = serde_json::from_str(text.as_str()).unwrap();
                    let _ = frame_tx.try_send(frame);
                }
                msg if msg.is_close() => break,
                _ => {}
            }
        }
    });

    mgr.connect(&format!("{url}/ws/chat/s1")).await;
    assert!(mgr.send("chat_message", Some(&serde_json::json!({"text": "hi"}))).await);

    let received = tokio::time::timeout(Duration::from_secs(5), frame_rx.recv())
        .await
        .expect("server should receive the frame")
        .unwrap();
    assert_eq!(received.frame_type, "chat_message");
    assert!(received.timestamp.is_some());

    mgr.disconnect().await;
    assert!(!mgr.send("chat_message", Some(&serde_json::json!({"text": "late"}))).await);
    let _ = server.await;
}

#[tokio::test]
async fn malformed_payload_is_dropped_without_breaking_the_stream() {
    let (listener, url) = bind().await;
    let mgr = ConnectionManager::new(ConnectOptions::default());

    let (tx, mut rx) = mpsc::channel::<String>(8);
    mgr.on(WILDCARD, "audit", move |frame| {
        let _ = tx.try_send(frame.frame_type.clone());
    });

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        ws.send(tokio_tungstenite::tungstenite::Message::Text(
            "definitely not json".into(),
        ))
        .await
        .unwrap();
        ws.send(text_frame("project_created", serde_json::json!({"id": "p2"})))
            .await
            .unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    });

    mgr.connect(&format!("{url}/ws/projects")).await;

    let seen = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("valid frame should still arrive")
        .unwrap();
    assert_eq!(seen, "project_created");

    mgr.disconnect().await;
    let _ = server.await;
}

#[tokio::test]
async fn connect_to_same_endpoint_is_idempotent() {
    let (listener, url) = bind().await;
    let endpoint = format!("{url}/ws/knowledge");
    let mgr = ConnectionManager::new(ConnectOptions::default());

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        // A second accept would mean a duplicate transport.
        let second = tokio::time::timeout(Duration::from_millis(300), listener.accept());
        let dup = second.await.is_ok();
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
        dup
    });

    mgr.connect(&endpoint).await;
    assert!(mgr.is_connected());
    mgr.connect(&endpoint).await;
    assert!(mgr.is_connected());

    mgr.disconnect().await;
    let duplicate = server.await.unwrap();
    assert!(!duplicate, "repeat connect must not open a second transport");
}
