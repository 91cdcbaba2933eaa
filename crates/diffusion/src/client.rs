//! HTTP side of the server: workflow submission and the health probe.

use std::sync::Arc;
use std::time::Duration;

use easel_config::ServerSettings;
use easel_ipc::{JobId, NodeGraph, PromptRequest, PromptResponse, SubmitOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::DiffusionError;
use crate::launcher::{PortableLauncher, ProcessLauncher};
use crate::readiness::{HealthProbe, ReadinessOutcome, wait_until_ready};

/// Per-request timeout for the health probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Client for the server's HTTP endpoints.
#[derive(Clone)]
pub struct ServerClient {
    http: reqwest::Client,
    settings: ServerSettings,
    launcher: Option<Arc<dyn ProcessLauncher>>,
}

impl std::fmt::Debug for ServerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerClient")
            .field("base_url", &self.settings.base_url)
            .field("launcher", &self.launcher.is_some())
            .finish()
    }
}

impl ServerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings: ServerSettings::new(base_url),
            launcher: None,
        }
    }

    /// Client for the configured server, with a portable launcher when
    /// auto-start is enabled.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        let launcher: Option<Arc<dyn ProcessLauncher>> = settings
            .auto_start_portable
            .then(|| Arc::new(PortableLauncher::from_settings(settings)) as Arc<dyn ProcessLauncher>);

        Self {
            http: reqwest::Client::new(),
            settings: settings.clone(),
            launcher,
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.settings.base_url
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// One `GET /system_stats`; returns the body on 2xx.
    pub async fn check_ready(&self) -> Result<String, DiffusionError> {
        let response = self
            .http
            .get(self.settings.health_url())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| DiffusionError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DiffusionError::Transport(e.to_string()))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(DiffusionError::Server {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Start the portable server if configured, then poll the health probe
    /// until it answers or `budget` runs out.
    pub async fn ensure_ready(
        &self,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<ReadinessOutcome, DiffusionError> {
        self.ensure_server();
        wait_until_ready(self, budget, cancel).await
    }

    /// Submit a workflow graph given as JSON text.
    ///
    /// The text must parse as a JSON object; anything else is rejected
    /// before any request is made.
    pub async fn submit(
        &self,
        graph_json: &str,
        options: &SubmitOptions,
    ) -> Result<JobId, DiffusionError> {
        self.ensure_server();

        let prompt: serde_json::Value = serde_json::from_str(graph_json)
            .map_err(|e| DiffusionError::InvalidInput(e.to_string()))?;
        if !prompt.is_object() {
            return Err(DiffusionError::InvalidInput(
                "workflow must be a JSON object".into(),
            ));
        }

        let client_id = options
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        self.post_prompt(PromptRequest { prompt, client_id }).await
    }

    /// Submit an already-built graph.
    pub async fn submit_graph(
        &self,
        graph: &NodeGraph,
        options: &SubmitOptions,
    ) -> Result<JobId, DiffusionError> {
        self.submit(&graph.to_json()?, options).await
    }

    async fn post_prompt(&self, request: PromptRequest) -> Result<JobId, DiffusionError> {
        let url = self.settings.prompt_url();
        debug!("Submitting workflow to {} (client {})", url, request.client_id);

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| DiffusionError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DiffusionError::Transport(e.to_string()))?;

        if !status.is_success() {
            warn!("Workflow submission rejected with HTTP {}", status.as_u16());
            return Err(DiffusionError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: PromptResponse = serde_json::from_str(&body)
            .map_err(|e| DiffusionError::MalformedResponse(format!("{e}: {body}")))?;

        if parsed.prompt_id.as_str().is_empty() {
            return Err(DiffusionError::MalformedResponse(format!(
                "empty prompt_id: {body}"
            )));
        }

        if let Some(errors) = parsed
            .node_errors
            .as_ref()
            .filter(|errors| errors.as_object().is_some_and(|map| !map.is_empty()))
        {
            warn!("Server reported node errors: {}", errors);
        }

        info!(
            "Submitted job {} (queue position {:?})",
            parsed.prompt_id, parsed.number
        );
        Ok(parsed.prompt_id)
    }

    /// Start the portable server if configured.
    ///
    /// Call before waiting for readiness. Failures are logged only; the
    /// health probe and the submission report whether the server is reachable.
    pub fn ensure_server(&self) {
        let Some(launcher) = &self.launcher else {
            return;
        };
        match launcher.ensure_running() {
            Ok(true) => debug!("Portable server running"),
            Ok(false) => {}
            Err(e) => warn!("Could not start portable server: {}", e),
        }
    }
}

impl HealthProbe for ServerClient {
    async fn probe(&self) -> Result<String, DiffusionError> {
        self.check_ready().await
    }
}
