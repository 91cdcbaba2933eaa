//! Shared configuration for Easel
//!
//! This crate is the single source of truth for where the diffusion server
//! lives, how a portable install is launched, and where generated images land.
//! Hosts either insert [`ServerSettings`] as a Bevy resource (`bevy` feature)
//! or build it from the environment with [`ServerSettings::from_env`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[cfg(feature = "bevy")]
use bevy::prelude::Resource;

/// Default server base URL
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8188";

/// Default launcher script inside a portable install
pub const DEFAULT_PORTABLE_EXECUTABLE: &str = "run_nvidia_gpu.bat";

/// Default readiness budget in seconds
pub const DEFAULT_READY_TIMEOUT_SECS: f32 = 30.0;

/// Default delay between job completion and reading the output folder
pub const DEFAULT_OUTPUT_SETTLE_MS: u64 = 500;

/// Default time to wait for a fresh output image after completion, in seconds
pub const DEFAULT_OUTPUT_TIMEOUT_SECS: f32 = 120.0;

/// Upper bound for any timeout given in seconds (one day)
pub const MAX_TIMEOUT_SECS: f32 = 86_400.0;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "EASEL_";

/// Errors raised while reading configuration overrides.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

/// How completion is detected on the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// An empty server queue completes every pending job, and per-job
    /// `executed` / `execution_error` frames complete their own job.
    QueueDrain,
    /// Only per-job frames complete a job.
    #[default]
    JobEvents,
}

/// Connection, launch and output settings for the diffusion server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "bevy", derive(Resource))]
#[serde(default)]
pub struct ServerSettings {
    /// HTTP base URL, e.g. `http://127.0.0.1:8188`
    pub base_url: String,
    /// Launch the portable install before talking to the server
    pub auto_start_portable: bool,
    /// Root folder of the portable install
    pub portable_root: Option<PathBuf>,
    /// Launcher executable, relative to `portable_root`
    pub portable_executable: String,
    /// Extra launcher arguments, whitespace separated
    pub portable_args: String,
    /// Explicit output folder; falls back to `<portable_root>/ComfyUI/output`
    pub output_dir: Option<PathBuf>,
    /// How long to wait for the server to come up, in seconds
    pub ready_timeout_secs: f32,
    /// Delay after completion before looking for the image, in milliseconds
    pub output_settle_ms: u64,
    /// How long to keep looking for a fresh image after completion, in seconds
    pub output_timeout_secs: f32,
    pub completion_mode: CompletionMode,
    pub default_checkpoint: Option<String>,
    pub default_unet: Option<String>,
    pub default_clip: Option<String>,
    pub default_vae: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auto_start_portable: false,
            portable_root: None,
            portable_executable: DEFAULT_PORTABLE_EXECUTABLE.to_string(),
            portable_args: String::new(),
            output_dir: None,
            ready_timeout_secs: DEFAULT_READY_TIMEOUT_SECS,
            output_settle_ms: DEFAULT_OUTPUT_SETTLE_MS,
            output_timeout_secs: DEFAULT_OUTPUT_TIMEOUT_SECS,
            completion_mode: CompletionMode::default(),
            default_checkpoint: None,
            default_unet: None,
            default_clip: None,
            default_vae: None,
        }
    }
}

impl ServerSettings {
    /// Create settings pointing at the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Defaults overridden by `EASEL_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Apply overrides from a key lookup.
    ///
    /// Keys are the field names upper-cased with the `EASEL_` prefix, e.g.
    /// `EASEL_BASE_URL`. Empty values clear optional paths.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(url) = get("BASE_URL") {
            self.base_url = url;
        }
        if let Some(value) = get("AUTO_START") {
            self.auto_start_portable = parse_bool("AUTO_START", &value)?;
        }
        if let Some(root) = get("PORTABLE_ROOT") {
            self.portable_root = non_empty_path(root);
        }
        if let Some(exe) = get("PORTABLE_EXECUTABLE") {
            self.portable_executable = exe;
        }
        if let Some(args) = get("PORTABLE_ARGS") {
            self.portable_args = args;
        }
        if let Some(dir) = get("OUTPUT_DIR") {
            self.output_dir = non_empty_path(dir);
        }
        if let Some(value) = get("READY_TIMEOUT") {
            self.ready_timeout_secs = parse_timeout("READY_TIMEOUT", &value)?;
        }
        if let Some(value) = get("OUTPUT_SETTLE_MS") {
            self.output_settle_ms = value
                .trim()
                .parse()
                .map_err(|_| invalid("OUTPUT_SETTLE_MS", &value))?;
        }
        if let Some(value) = get("OUTPUT_TIMEOUT") {
            self.output_timeout_secs = parse_timeout("OUTPUT_TIMEOUT", &value)?;
        }
        if let Some(value) = get("COMPLETION_MODE") {
            self.completion_mode = match value.trim() {
                "queue_drain" => CompletionMode::QueueDrain,
                "job_events" => CompletionMode::JobEvents,
                _ => return Err(invalid("COMPLETION_MODE", &value)),
            };
        }
        if let Some(name) = get("CHECKPOINT") {
            self.default_checkpoint = Some(name);
        }
        if let Some(name) = get("UNET") {
            self.default_unet = Some(name);
        }
        if let Some(name) = get("CLIP") {
            self.default_clip = Some(name);
        }
        if let Some(name) = get("VAE") {
            self.default_vae = Some(name);
        }
        Ok(())
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Readiness probe endpoint
    pub fn health_url(&self) -> String {
        format!("{}/system_stats", self.base())
    }

    /// Workflow submission endpoint
    pub fn prompt_url(&self) -> String {
        format!("{}/prompt", self.base())
    }

    /// Event channel URL, `http(s)` swapped for `ws(s)`
    pub fn ws_url(&self, client_id: Option<&str>) -> String {
        let base = self.base();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };

        match client_id.filter(|id| !id.is_empty()) {
            Some(id) => format!("{ws_base}/ws?clientId={id}"),
            None => format!("{ws_base}/ws"),
        }
    }

    /// Folder the server writes images into, if one is known
    pub fn output_folder(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.output_dir {
            return Some(dir.clone());
        }
        self.portable_root
            .as_ref()
            .map(|root| root.join("ComfyUI").join("output"))
    }

    /// Readiness budget as a `Duration`, clamped to `0..=MAX_TIMEOUT_SECS`
    pub fn ready_timeout(&self) -> Duration {
        clamped_secs(self.ready_timeout_secs)
    }

    /// Output wait budget as a `Duration`, clamped like [`Self::ready_timeout`]
    pub fn output_timeout(&self) -> Duration {
        clamped_secs(self.output_timeout_secs)
    }

    /// Output settle delay as a `Duration`
    pub fn output_settle_delay(&self) -> Duration {
        Duration::from_millis(self.output_settle_ms)
    }
}

/// Whether `secs` is usable as a timeout: finite and within `0..=MAX_TIMEOUT_SECS`.
pub fn is_valid_timeout(secs: f32) -> bool {
    secs.is_finite() && (0.0..=MAX_TIMEOUT_SECS).contains(&secs)
}

// NaN maps to zero; `max` returns the non-NaN operand.
fn clamped_secs(secs: f32) -> Duration {
    let secs = secs.max(0.0).min(MAX_TIMEOUT_SECS);
    Duration::try_from_secs_f32(secs).unwrap_or(Duration::ZERO)
}

fn parse_timeout(name: &str, value: &str) -> Result<f32, ConfigError> {
    value
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|secs| is_valid_timeout(*secs))
        .ok_or_else(|| invalid(name, value))
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: format!("{ENV_PREFIX}{name}"),
        value: value.to_string(),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, value)),
    }
}

fn non_empty_path(value: String) -> Option<PathBuf> {
    if value.trim().is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}
