use std::path::PathBuf;

use crate::shared::config::{AppConfig, ConfigError};

/// Explicit configuration file
pub const CONFIG_PATH_ENV: &str = "QMS_CONFIG";
/// Overrides `base_url`
pub const API_URL_ENV: &str = "QMS_API_URL";
pub const FETCH_TIMEOUT_ENV: &str = "QMS_FETCH_TIMEOUT_MS";
pub const COUNT_TIMEOUT_ENV: &str = "QMS_COUNT_TIMEOUT_MS";

/// Client configuration wrapper.
///
/// Resolution order: the file named by `QMS_CONFIG`, then
/// `<config dir>/qms-sync/config.toml` if present, then built-in defaults.
/// Environment overrides are applied last and the result is validated.
#[derive(Debug, Clone, Default)]
pub struct Config {
    app: AppConfig,
    source: Option<PathBuf>,
}

impl Config {
    /// Create a configuration from built-in defaults only
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_app(app: AppConfig) -> Self {
        Self { app, source: None }
    }

    /// Load configuration from file and environment
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        let path = match explicit {
            Some(path) => Some(path),
            None => Self::default_path().filter(|p| p.exists()),
        };

        let mut config = match &path {
            Some(path) => {
                tracing::info!("[Config] Loading {}", path.display());
                Self {
                    app: AppConfig::from_file(path)?,
                    source: Some(path.clone()),
                }
            }
            None => {
                tracing::debug!("[Config] No configuration file, using defaults");
                Self::default()
            }
        };
        config.apply_env()?;
        config.app.validate()?;
        Ok(config)
    }

    /// Per-user configuration file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("qms-sync").join("config.toml"))
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            self.app.base_url = url;
        }
        if let Some(ms) = env_millis(FETCH_TIMEOUT_ENV)? {
            self.app.fetch_timeout_ms = ms;
        }
        if let Some(ms) = env_millis(COUNT_TIMEOUT_ENV)? {
            self.app.count_timeout_ms = ms;
        }
        Ok(())
    }

    pub fn app(&self) -> &AppConfig {
        &self.app
    }

    pub fn into_app(self) -> AppConfig {
        self.app
    }

    /// File the configuration was read from, if any
    pub fn source(&self) -> Option<&PathBuf> {
        self.source.as_ref()
    }

    pub fn base_url(&self) -> &str {
        &self.app.base_url
    }
}

fn env_millis(name: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", name, e))),
        Err(_) => Ok(None),
    }
}
