//! Frames received on the server's event channel.
//!
//! Every frame has the shape `{"type": <string>, "data": {...}}`. Only the
//! frame types that matter for job completion are decoded; everything else
//! comes back as [`ServerMessage::Other`].

use serde::Deserialize;

use crate::{IpcError, JobId};

/// A decoded event-channel frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Aggregate queue state
    Status { queue_remaining: u64 },
    /// An output node of the job finished
    Executed { prompt_id: JobId },
    /// The job was served from cache
    ExecutionCached { prompt_id: JobId },
    /// The job failed on the server
    ExecutionError {
        prompt_id: JobId,
        message: Option<String>,
        node_type: Option<String>,
    },
    /// Any frame type not listed above
    Other(String),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct StatusData {
    status: StatusInfo,
}

#[derive(Deserialize)]
struct StatusInfo {
    exec_info: ExecInfo,
}

#[derive(Deserialize)]
struct ExecInfo {
    queue_remaining: u64,
}

#[derive(Deserialize)]
struct PromptData {
    prompt_id: JobId,
}

#[derive(Deserialize)]
struct ErrorData {
    prompt_id: JobId,
    #[serde(default)]
    exception_message: Option<String>,
    #[serde(default)]
    node_type: Option<String>,
}

impl ServerMessage {
    /// Decode a text frame.
    ///
    /// Fails when the frame is not JSON, has no `type`, or a known frame type
    /// is missing the fields it needs.
    pub fn parse(text: &str) -> Result<Self, IpcError> {
        let frame: RawFrame = serde_json::from_str(text)?;

        let message = match frame.kind.as_str() {
            "status" => {
                let data: StatusData = decode(&frame.kind, frame.data)?;
                Self::Status {
                    queue_remaining: data.status.exec_info.queue_remaining,
                }
            }
            "executed" => {
                let data: PromptData = decode(&frame.kind, frame.data)?;
                Self::Executed {
                    prompt_id: data.prompt_id,
                }
            }
            "execution_cached" => {
                let data: PromptData = decode(&frame.kind, frame.data)?;
                Self::ExecutionCached {
                    prompt_id: data.prompt_id,
                }
            }
            "execution_error" => {
                let data: ErrorData = decode(&frame.kind, frame.data)?;
                Self::ExecutionError {
                    prompt_id: data.prompt_id,
                    message: data.exception_message,
                    node_type: data.node_type,
                }
            }
            _ => Self::Other(frame.kind),
        };

        Ok(message)
    }

    /// Job this frame refers to, if it is a per-job frame.
    pub fn prompt_id(&self) -> Option<&JobId> {
        match self {
            Self::Executed { prompt_id }
            | Self::ExecutionCached { prompt_id }
            | Self::ExecutionError { prompt_id, .. } => Some(prompt_id),
            Self::Status { .. } | Self::Other(_) => None,
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(kind: &str, data: serde_json::Value) -> Result<T, IpcError> {
    serde_json::from_value(data)
        .map_err(|e| IpcError::InvalidFrame(format!("'{kind}' frame: {e}")))
}
