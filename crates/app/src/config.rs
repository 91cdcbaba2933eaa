//! Settings resolution and log format selection

use std::path::PathBuf;

use easel_config::{ConfigError, ServerSettings, is_valid_timeout};

/// Log line layout on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One short line per event (default)
    #[default]
    Compact,
    /// Multi-line output with span context
    Pretty,
}

impl LogFormat {
    /// Parse from environment variable EASEL_LOG_FORMAT
    pub fn from_env() -> Self {
        Self::parse(std::env::var("EASEL_LOG_FORMAT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("pretty") => Self::Pretty,
            Some("compact") | _ => Self::Compact,
        }
    }
}

/// Values given on the command line; they win over the environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub base_url: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub ready_timeout: Option<f32>,
}

impl CliOverrides {
    pub fn apply(&self, settings: &mut ServerSettings) -> Result<(), ConfigError> {
        if let Some(secs) = self.ready_timeout {
            if !is_valid_timeout(secs) {
                return Err(ConfigError::InvalidValue {
                    key: "--ready-timeout".into(),
                    value: secs.to_string(),
                });
            }
            settings.ready_timeout_secs = secs;
        }
        if let Some(url) = &self.base_url {
            settings.base_url = url.clone();
        }
        if let Some(dir) = &self.output_dir {
            settings.output_dir = Some(dir.clone());
        }
        Ok(())
    }
}

/// Environment settings with command-line overrides applied
pub fn load_settings(overrides: &CliOverrides) -> Result<ServerSettings, ConfigError> {
    let mut settings = ServerSettings::from_env()?;
    overrides.apply(&mut settings)?;
    Ok(settings)
}
