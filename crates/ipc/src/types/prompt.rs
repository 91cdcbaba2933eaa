//! Submission envelope and server acknowledgement.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-assigned job identifier (`prompt_id` on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Body of `POST /prompt`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptRequest {
    pub prompt: serde_json::Value,
    pub client_id: String,
}

/// Successful response to `POST /prompt`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptResponse {
    pub prompt_id: JobId,
    /// Position in the server queue
    #[serde(default)]
    pub number: Option<u64>,
    #[serde(default)]
    pub node_errors: Option<serde_json::Value>,
}

/// Options accepted alongside a workflow submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitOptions {
    /// Session id used to scope event-channel frames; generated when empty
    #[serde(default)]
    pub client_id: Option<String>,
}
