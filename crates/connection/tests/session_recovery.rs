//! Session recreation after server-side invalidation.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use pulsedesk_connection::{
    BackoffPolicy, ConnectOptions, ConnectionState, SessionBackend, SessionChannel, SessionError,
    SessionEvent, SessionStatus,
};

use common::{accept_with_path, bind, text_frame};

/// Backend handing out s1, s2, ... with a scripted status answer.
#[derive(Clone)]
struct MockBackend {
    created: Arc<AtomicU32>,
    status: SessionStatus,
    fail_after: Option<u32>,
}

impl MockBackend {
    fn new(status: SessionStatus) -> Self {
        Self {
            created: Arc::new(AtomicU32::new(0)),
            status,
            fail_after: None,
        }
    }

    fn failing_after(status: SessionStatus, n: u32) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new(status)
        }
    }
}

impl SessionBackend for MockBackend {
    async fn create_session(&self) -> Result<String, SessionError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(limit) = self.fail_after
            && n > limit
        {
            return Err(SessionError::Status(500));
        }
        Ok(format!("s{n}"))
    }

    async fn session_status(&self, _id: &str) -> Result<SessionStatus, SessionError> {
        Ok(self.status)
    }
}

fn options() -> ConnectOptions {
    ConnectOptions {
        backoff: BackoffPolicy {
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(1),
            max_attempts: 3,
            cap_exponent: 5,
        },
        heartbeat: None,
        ..ConnectOptions::default()
    }
}

fn invalidation_close() -> CloseFrame {
    CloseFrame {
        code: CloseCode::from(4004u16),
        reason: "session not found".into(),
    }
}

#[tokio::test]
async fn invalidation_code_recreates_session_with_handlers_intact() {
    let (listener, url) = bind().await;

    let backend = MockBackend::new(SessionStatus::Active);
    let channel = SessionChannel::new(backend, options(), {
        let url = url.clone();
        move |id| format!("{url}/ws/chat/{id}")
    });

    // Three distinct handlers, registered exactly once, before any session
    // exists.
    let (tx, mut rx) = mpsc::channel::<String>(16);
    for frame_type in ["chat_message", "stream_chunk", "stream_complete"] {
        let tx = tx.clone();
        channel.on(frame_type, "panel", move |frame| {
            let _ = tx.try_send(frame.frame_type.clone());
        });
    }
    let mut events = channel.take_events().await.unwrap();

    let server = tokio::spawn(async move {
        let (mut ws, path) = accept_with_path(&listener).await;
        assert_eq!(path, "/ws/chat/s1");

        // The server forgets the session and says so on the way out.
        ws.close(Some(invalidation_close())).await.unwrap();
        while ws.next().await.is_some() {}

        // The replacement session must carry the new id.
        let (mut ws, path) = accept_with_path(&listener).await;
        assert_eq!(path, "/ws/chat/s2");
        for frame_type in ["chat_message", "stream_chunk", "stream_complete"] {
            ws.send(text_frame(frame_type, serde_json::json!({})))
                .await
                .unwrap();
        }
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    });

    channel.open().await.unwrap();

    // All three callbacks hear from the new session without any
    // re-registration.
    let mut seen = HashSet::new();
    for _ in 0..3 {
        let frame_type = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("handlers should fire from the new session")
            .unwrap();
        seen.insert(frame_type);
    }
    assert!(seen.contains("chat_message"));
    assert!(seen.contains("stream_chunk"));
    assert!(seen.contains("stream_complete"));
    assert_eq!(channel.session_id().await.as_deref(), Some("s2"));

    // The substitution was announced.
    let replaced = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(SessionEvent::Replaced { old, new }) => return (old, new),
                Some(_) => continue,
                None => panic!("event stream ended without a Replaced event"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(replaced, ("s1".to_string(), "s2".to_string()));

    channel.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn transient_drop_keeps_the_session_and_reconnects() {
    let (listener, url) = bind().await;

    let backend = MockBackend::new(SessionStatus::Active);
    let created = backend.created.clone();
    let channel = SessionChannel::new(backend, options(), {
        let url = url.clone();
        move |id| format!("{url}/ws/chat/{id}")
    });

    let (tx, mut rx) = mpsc::channel::<String>(16);
    channel.on("chat_message", "panel", move |frame| {
        let _ = tx.try_send(frame.frame_type.clone());
    });

    let server = tokio::spawn(async move {
        // Abrupt drop: no close frame — looks like a network blip.
        let (ws, path) = accept_with_path(&listener).await;
        assert_eq!(path, "/ws/chat/s1");
        drop(ws);

        // The status probe says the session is alive, so the client must
        // come back to the *same* session endpoint.
        let (mut ws, path) = accept_with_path(&listener).await;
        assert_eq!(path, "/ws/chat/s1");
        ws.send(text_frame("chat_message", serde_json::json!({"text": "wb"})))
            .await
            .unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    });

    channel.open().await.unwrap();

    let frame_type = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("handler should fire after the generic reconnect")
        .unwrap();
    assert_eq!(frame_type, "chat_message");

    // No session churn on a transient failure.
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(channel.session_id().await.as_deref(), Some("s1"));

    channel.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn status_probe_detects_silent_invalidation() {
    let (listener, url) = bind().await;

    // The server drops without the distinguished close code, but the
    // status endpoint confirms the session is gone.
    let backend = MockBackend::new(SessionStatus::Invalid);
    let channel = SessionChannel::new(backend, options(), {
        let url = url.clone();
        move |id| format!("{url}/ws/chat/{id}")
    });

    let server = tokio::spawn(async move {
        let (ws, path) = accept_with_path(&listener).await;
        assert_eq!(path, "/ws/chat/s1");
        drop(ws);

        let (mut ws, path) = accept_with_path(&listener).await;
        assert_eq!(path, "/ws/chat/s2");
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    });

    channel.open().await.unwrap();

    let mut state_rx = channel.manager().state_rx();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if channel.session_id().await.as_deref() == Some("s2")
                && *state_rx.borrow_and_update() == ConnectionState::Connected
            {
                return;
            }
            state_rx.changed().await.unwrap();
        }
    })
    .await
    .expect("should recreate onto s2");

    channel.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn recreation_failure_is_bounded_and_surfaces_failed() {
    let (listener, url) = bind().await;

    // Session creation works once, then the API dies.
    let backend = MockBackend::failing_after(SessionStatus::Invalid, 1);
    let channel = SessionChannel::new(backend, options(), {
        let url = url.clone();
        move |id| format!("{url}/ws/chat/{id}")
    });

    let server = tokio::spawn(async move {
        let (mut ws, _path) = accept_with_path(&listener).await;
        ws.close(Some(invalidation_close())).await.unwrap();
        while ws.next().await.is_some() {}
    });

    channel.open().await.unwrap();

    let mut state_rx = channel.manager().state_rx();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *state_rx.borrow_and_update() == ConnectionState::Failed {
                return;
            }
            state_rx.changed().await.unwrap();
        }
    })
    .await
    .expect("exhausted recreation should surface Failed");

    channel.close().await;
    server.await.unwrap();
}
