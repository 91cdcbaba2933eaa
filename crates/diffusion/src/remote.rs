//! Remote diffusion server backend

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use easel_config::ServerSettings;
use easel_ipc::{JobId, SubmitOptions, WorkflowRequest};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::ServerClient;
use crate::events::EventStream;
use crate::launcher::ProcessLauncher;
use crate::output::{OutputSnapshot, load_output_image};
use crate::registry::JobOutcome;
use crate::workflow::{Workflow, apply_defaults};
use crate::{DiffusionBackend, DiffusionError, ProgressCallback};

/// How often the output folder is checked while waiting for the image
const OUTPUT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs workflows on a ComfyUI-style server and picks up the saved image.
///
/// One event-channel session is kept across generations and reopened if it
/// drops.
pub struct RemoteDiffusion {
    settings: ServerSettings,
    client: ServerClient,
    events: EventStream,
    event_url: String,
    client_id: String,
    cancel: CancellationToken,
    generating: Arc<AtomicBool>,
}

impl RemoteDiffusion {
    pub fn new(settings: ServerSettings) -> Self {
        let client_id = uuid::Uuid::new_v4().to_string();
        Self {
            client: ServerClient::from_settings(&settings),
            events: EventStream::with_policy(settings.completion_mode.into()),
            event_url: settings.ws_url(Some(&client_id)),
            client_id,
            settings,
            cancel: CancellationToken::new(),
            generating: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Listen for completion frames on a different URL than the one derived
    /// from the base URL.
    pub fn with_event_url(mut self, url: impl Into<String>) -> Self {
        self.event_url = url.into();
        self
    }

    /// Start the server with `launcher` instead of the configured one.
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.client = self.client.with_launcher(launcher);
        self
    }

    pub fn client(&self) -> &ServerClient {
        &self.client
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Token that aborts the running generation when cancelled.
    ///
    /// A fired token is replaced when the next generation starts, so take a
    /// fresh handle for every run.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run a workflow and return the path of the image the server saved.
    pub async fn generate_to_file(
        &mut self,
        mut request: WorkflowRequest,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<PathBuf, DiffusionError> {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        let cancel = self.cancel.clone();

        let output_dir = self.settings.output_folder().ok_or_else(|| {
            DiffusionError::MissingOutput("no output folder configured".into())
        })?;

        report(on_progress, 0.0);
        self.client
            .ensure_ready(self.settings.ready_timeout(), &cancel)
            .await?
            .into_result()?;
        report(on_progress, 0.1);

        self.events.connect(&self.event_url)?;

        apply_defaults(&mut request, &self.settings);
        let graph_json = request.build_json()?;
        let snapshot = OutputSnapshot::take(&output_dir, request.filename_prefix());

        let options = SubmitOptions {
            client_id: Some(self.client_id.clone()),
        };
        let job_id = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DiffusionError::Cancelled),
            submitted = self.client.submit(&graph_json, &options) => submitted?,
        };
        report(on_progress, 0.2);

        let (done_tx, done_rx) = oneshot::channel();
        self.events.watch(job_id.clone(), move |outcome| {
            let _ = done_tx.send(outcome);
        });

        let outcome = self.await_completion(&job_id, done_rx, &cancel).await?;
        if !outcome.success {
            error!("Job {} failed: {}", job_id, outcome.detail);
            return Err(DiffusionError::Execution {
                job_id,
                message: outcome.detail,
            });
        }
        report(on_progress, 0.8);

        let path = self.await_output(&snapshot, &cancel).await?;
        info!("Job {} produced {}", job_id, path.display());
        report(on_progress, 0.9);
        Ok(path)
    }

    /// Wait for an image newer than `snapshot`.
    ///
    /// The server may report completion before the file exists, so the
    /// folder is checked after the settle delay and then polled until the
    /// output timeout runs out.
    async fn await_output(
        &self,
        snapshot: &OutputSnapshot,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DiffusionError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DiffusionError::Cancelled),
            _ = tokio::time::sleep(self.settings.output_settle_delay()) => {}
        }

        let deadline = tokio::time::Instant::now() + self.settings.output_timeout();
        loop {
            if let Some(path) = snapshot.fresh_image() {
                return Ok(path);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DiffusionError::MissingOutput(format!(
                    "no new '{}*.png' in {}",
                    snapshot.prefix(),
                    snapshot.dir().display()
                )));
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DiffusionError::Cancelled),
                _ = tokio::time::sleep(OUTPUT_POLL_INTERVAL) => {}
            }
        }
    }

    /// Pump the event channel until the watch for `job_id` fires.
    async fn await_completion(
        &mut self,
        job_id: &JobId,
        mut done: oneshot::Receiver<JobOutcome>,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, DiffusionError> {
        loop {
            match done.try_recv() {
                Ok(outcome) => return Ok(outcome),
                Err(oneshot::error::TryRecvError::Closed) => {
                    return Err(DiffusionError::Connection(format!(
                        "watch for job {job_id} was dropped"
                    )));
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
            }

            let pumped = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                alive = self.events.next_edge() => Some(alive),
            };

            match pumped {
                Some(true) => {}
                Some(false) => {
                    self.events.unwatch(job_id);
                    return Err(DiffusionError::Connection(format!(
                        "event channel closed before job {job_id} finished"
                    )));
                }
                None => {
                    warn!("Generation cancelled, no longer watching job {}", job_id);
                    self.events.unwatch(job_id);
                    return Err(DiffusionError::Cancelled);
                }
            }
        }
    }
}

impl DiffusionBackend for RemoteDiffusion {
    async fn generate(
        &mut self,
        request: WorkflowRequest,
        on_progress: Option<ProgressCallback>,
    ) -> Result<image::RgbaImage, DiffusionError> {
        self.generating.store(true, Ordering::SeqCst);

        let result = match self.generate_to_file(request, on_progress.as_ref()).await {
            Ok(path) => load_output_image(&path),
            Err(e) => Err(e),
        };
        if let (Ok(image), Some(callback)) = (&result, &on_progress) {
            callback(1.0, Some(image));
        }

        self.generating.store(false, Ordering::SeqCst);
        result
    }

    fn cancel(&mut self) {
        self.cancel.cancel();
    }

    fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }
}

fn report(on_progress: Option<&ProgressCallback>, fraction: f32) {
    if let Some(callback) = on_progress {
        callback(fraction, None);
    }
}
