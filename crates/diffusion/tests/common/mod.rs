//! Local event-channel server for integration tests.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// What the server does after sending its frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterFrames {
    /// Keep the socket open until the client goes away
    HoldOpen,
    /// Close the socket
    Close,
}

/// Accept one client, send `frames`, then hold or close.
///
/// Returns the `ws://` URL to connect to.
pub async fn serve_frames(frames: Vec<String>, after: AfterFrames) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        for frame in frames {
            if ws.send(Message::Text(frame.into())).await.is_err() {
                return;
            }
        }

        match after {
            AfterFrames::HoldOpen => while let Some(Ok(_)) = ws.next().await {},
            AfterFrames::Close => {
                let _ = ws.close(None).await;
            }
        }
    });

    (format!("ws://{addr}/ws?clientId=test"), handle)
}

pub fn status(queue_remaining: u64) -> String {
    json!({
        "type": "status",
        "data": {"status": {"exec_info": {"queue_remaining": queue_remaining}}, "sid": "test"}
    })
    .to_string()
}

pub fn executed(prompt_id: &str) -> String {
    json!({
        "type": "executed",
        "data": {"node": "9", "output": {"images": []}, "prompt_id": prompt_id}
    })
    .to_string()
}

pub fn execution_cached(prompt_id: &str) -> String {
    json!({
        "type": "execution_cached",
        "data": {"nodes": [], "prompt_id": prompt_id}
    })
    .to_string()
}

pub fn execution_error(prompt_id: &str, node_type: &str, message: &str) -> String {
    json!({
        "type": "execution_error",
        "data": {
            "prompt_id": prompt_id,
            "node_id": "5",
            "node_type": node_type,
            "exception_message": message
        }
    })
    .to_string()
}

pub fn progress(value: u32, max: u32) -> String {
    json!({"type": "progress", "data": {"value": value, "max": max}}).to_string()
}
