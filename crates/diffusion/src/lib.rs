//! Remote diffusion for Easel
//!
//! Builds node graphs, submits them to a ComfyUI-style server, and tracks
//! their completion over the server's event channel:
//! - [`workflow`] - graph builders for each workflow family
//! - [`client`] - HTTP submission and readiness probe
//! - [`readiness`] - fixed-interval readiness polling
//! - [`registry`] - job id to one-shot completion callback map
//! - [`events`] - event-channel connection and frame dispatch
//! - [`launcher`] - optional portable server process
//! - [`output`] - output image discovery and decoding
//! - [`remote`] - the end-to-end [`RemoteDiffusion`] backend

pub mod client;
mod connection;
pub mod events;
pub mod launcher;
pub mod output;
pub mod readiness;
pub mod registry;
pub mod remote;
pub mod workflow;

pub use client::ServerClient;
pub use connection::StreamEdge;
pub use events::{ConnectionState, EventStream};
pub use launcher::{PortableLauncher, ProcessLauncher};
pub use readiness::{HealthProbe, ReadinessOutcome, ReadinessPoller, ReadinessState};
pub use registry::{CompletionCallback, CompletionPolicy, CompletionRegistry, JobOutcome};
pub use remote::RemoteDiffusion;
pub use workflow::{Workflow, apply_defaults};

use std::time::Duration;

use easel_ipc::{JobId, WorkflowRequest};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiffusionError {
    #[error("Invalid workflow JSON: {0}")]
    InvalidInput(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Server returned HTTP {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Server not ready after {0:?}")]
    Timeout(Duration),

    #[error("Job {job_id} failed: {message}")]
    Execution { job_id: JobId, message: String },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Failed to launch server: {0}")]
    Launch(String),

    #[error("No output image found: {0}")]
    MissingOutput(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cancelled")]
    Cancelled,
}

impl DiffusionError {
    /// Transport-level or non-2xx submission failure
    pub fn is_submission_failure(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Server { .. })
    }
}

impl From<easel_ipc::IpcError> for DiffusionError {
    fn from(err: easel_ipc::IpcError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

/// Progress callback type
pub type ProgressCallback = Box<dyn Fn(f32, Option<&image::RgbaImage>) + Send + Sync>;

/// Trait for diffusion backends
#[allow(async_fn_in_trait)]
pub trait DiffusionBackend {
    /// Generate an image from the given request
    async fn generate(
        &mut self,
        request: WorkflowRequest,
        on_progress: Option<ProgressCallback>,
    ) -> Result<image::RgbaImage, DiffusionError>;

    /// Cancel the current generation
    fn cancel(&mut self);

    /// Check if currently generating
    fn is_generating(&self) -> bool;
}
