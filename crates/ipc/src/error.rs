//! Error types for wire encoding and decoding.

/// Errors that can occur while encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A known frame type whose payload lacks the fields it needs
    #[error("Invalid event frame: {0}")]
    InvalidFrame(String),
}
