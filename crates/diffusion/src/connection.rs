//! Event-channel socket task.
//!
//! The task only moves frames; it never touches the completion registry.
//! Everything it observes is forwarded as a [`StreamEdge`] over an unbounded
//! channel to the single owner of the [`EventStream`](crate::EventStream).

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::DiffusionError;

/// Something that happened on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEdge {
    Opened,
    Message(String),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

/// Handle to a running socket task. Dropping it closes the socket.
pub(crate) struct Connection {
    edges: mpsc::UnboundedReceiver<StreamEdge>,
    _shutdown: oneshot::Sender<()>,
}

impl Connection {
    /// Spawn the socket task on the current tokio runtime.
    pub(crate) fn open(url: &str) -> Result<Self, DiffusionError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DiffusionError::Connection(format!("no async runtime: {e}")))?;

        let (edge_tx, edges) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        runtime.spawn(run(url.to_string(), edge_tx, shutdown_rx));

        Ok(Self {
            edges,
            _shutdown: shutdown,
        })
    }

    /// Next buffered edge, without waiting
    pub(crate) fn try_next(&mut self) -> Option<StreamEdge> {
        self.edges.try_recv().ok()
    }

    /// Wait for the next edge; `None` once the task has exited and the
    /// buffer is empty
    pub(crate) async fn next(&mut self) -> Option<StreamEdge> {
        self.edges.recv().await
    }
}

async fn run(
    url: String,
    edges: mpsc::UnboundedSender<StreamEdge>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let connected = tokio::select! {
        result = connect_async(url.as_str()) => result,
        _ = &mut shutdown => return,
    };

    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            let _ = edges.send(StreamEdge::Error(e.to_string()));
            return;
        }
    };

    if edges.send(StreamEdge::Opened).is_err() {
        return;
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("Closing event channel {}", url);
                let _ = write.close().await;
                break;
            }
            msg = read.next() => {
                let edge = match msg {
                    Some(Ok(Message::Text(text))) => StreamEdge::Message(text.as_str().to_owned()),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.as_str().to_owned()))
                            .unwrap_or((None, String::new()));
                        let _ = edges.send(StreamEdge::Closed { code, reason });
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = edges.send(StreamEdge::Error(e.to_string()));
                        break;
                    }
                    None => {
                        let _ = edges.send(StreamEdge::Closed { code: None, reason: String::new() });
                        break;
                    }
                };

                if edges.send(edge).is_err() {
                    break;
                }
            }
        }
    }
}
