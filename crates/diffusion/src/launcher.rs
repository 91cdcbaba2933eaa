//! Optional local server process.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use easel_config::ServerSettings;
use tracing::{info, warn};

use crate::DiffusionError;

/// Something that can bring the server up before a submission.
pub trait ProcessLauncher: Send + Sync {
    /// Start the server unless it is already running.
    ///
    /// Returns `Ok(false)` when launching is disabled and nothing was done.
    fn ensure_running(&self) -> Result<bool, DiffusionError>;

    /// Stop a server started by this launcher.
    fn shutdown(&self);
}

/// Launches a portable install via its launcher script.
///
/// The script runs with the portable root as working directory. Only the
/// process started here is tracked; a server started some other way is
/// not detected.
#[derive(Debug)]
pub struct PortableLauncher {
    enabled: bool,
    root: Option<PathBuf>,
    executable: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl PortableLauncher {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            enabled: settings.auto_start_portable,
            root: settings.portable_root.clone(),
            executable: settings.portable_executable.clone(),
            args: settings
                .portable_args
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            child: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn spawn(&self) -> Result<Child, DiffusionError> {
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| DiffusionError::Launch("portable root is not configured".into()))?;
        if self.executable.trim().is_empty() {
            return Err(DiffusionError::Launch(
                "portable executable is not configured".into(),
            ));
        }

        let executable = root.join(&self.executable);
        if !executable.is_file() {
            return Err(DiffusionError::Launch(format!(
                "{} does not exist",
                executable.display()
            )));
        }

        info!("Starting portable server {}", executable.display());
        Command::new(&executable)
            .args(&self.args)
            .current_dir(root)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| DiffusionError::Launch(format!("{}: {e}", executable.display())))
    }
}

impl ProcessLauncher for PortableLauncher {
    fn ensure_running(&self) -> Result<bool, DiffusionError> {
        if !self.enabled {
            return Ok(false);
        }

        let mut child = self
            .child
            .lock()
            .map_err(|_| DiffusionError::Launch("launcher state poisoned".into()))?;

        if let Some(running) = child.as_mut() {
            match running.try_wait() {
                Ok(None) => return Ok(true),
                Ok(Some(status)) => warn!("Portable server exited ({}), restarting", status),
                Err(e) => warn!("Could not query portable server: {}", e),
            }
        }

        *child = Some(self.spawn()?);
        Ok(true)
    }

    fn shutdown(&self) {
        let Ok(mut child) = self.child.lock() else {
            return;
        };
        if let Some(mut running) = child.take() {
            info!("Stopping portable server (pid {})", running.id());
            if let Err(e) = running.kill() {
                warn!("Failed to stop portable server: {}", e);
            }
            let _ = running.wait();
        }
    }
}

impl Drop for PortableLauncher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
