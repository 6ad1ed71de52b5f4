//! Shared helpers: a minimal in-process WebSocket server.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use pulsedesk_protocol::Frame;

/// Binds a listener on an ephemeral port, returning it and the ws URL.
pub async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

/// Accepts one WebSocket connection.
pub async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

/// Accepts one WebSocket connection, capturing the request path.
pub async fn accept_with_path(listener: &TcpListener) -> (WebSocketStream<TcpStream>, String) {
    let (stream, _) = listener.accept().await.unwrap();
    let path = Arc::new(Mutex::new(String::new()));
    let seen = path.clone();
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            *seen.lock().unwrap() = req.uri().to_string();
            Ok(resp)
        },
    )
    .await
    .unwrap();
    let path = path.lock().unwrap().clone();
    (ws, path)
}

/// Builds a text message carrying an envelope frame.
pub fn text_frame(frame_type: &str, data: serde_json::Value) -> Message {
    let frame = Frame::new(frame_type, Some(&data)).unwrap();
    Message::Text(serde_json::to_string(&frame).unwrap().into())
}
