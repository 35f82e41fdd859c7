use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capability::CapabilitySettings;
use crate::orchestration::{ExecutorSettings, DEFAULT_MAX_CAPABILITY_CALLS, DEFAULT_TIMEOUT_SECS};
use crate::workflow::PipelineSettings;
use crate::{Error, Result};

/// User configuration from `~/.crewflow/crewflow.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Headless backend command line, e.g. `claude --model sonnet`.
    pub backend: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_capability_calls: Option<usize>,
    #[serde(default)]
    pub abort_on_capability_error: bool,
    pub search_api_key_env: Option<String>,
    pub search_endpoint: Option<String>,
    pub scrape_max_chars: Option<usize>,
    /// Root directory for the file capabilities.
    pub workspace: Option<String>,
    /// Backend requests per minute for a whole run.
    pub max_rpm: Option<u32>,
}

impl Config {
    pub fn crewflow_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".crewflow"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::crewflow_dir()?.join("crewflow.toml"))
    }

    pub fn effective_backend(&self) -> &str {
        self.backend.as_deref().unwrap_or("claude")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    pub fn workspace_dir(&self) -> PathBuf {
        match &self.workspace {
            Some(dir) => expand_tilde(dir),
            None => PathBuf::from("."),
        }
    }

    pub fn capability_settings(&self) -> CapabilitySettings {
        let defaults = CapabilitySettings::default();
        CapabilitySettings {
            workspace: self.workspace_dir(),
            search_api_key_env: self
                .search_api_key_env
                .clone()
                .unwrap_or(defaults.search_api_key_env),
            search_endpoint: self
                .search_endpoint
                .clone()
                .unwrap_or(defaults.search_endpoint),
            scrape_max_chars: self.scrape_max_chars.unwrap_or(defaults.scrape_max_chars),
            http_timeout: defaults.http_timeout,
        }
    }

    /// Executor settings: pipeline overrides win over user configuration.
    pub fn executor_settings(&self, pipeline: &PipelineSettings, output_dir: PathBuf) -> ExecutorSettings {
        ExecutorSettings {
            default_max_capability_calls: pipeline
                .max_capability_calls
                .or(self.max_capability_calls)
                .unwrap_or(DEFAULT_MAX_CAPABILITY_CALLS),
            abort_on_capability_error: pipeline
                .abort_on_capability_error
                .unwrap_or(self.abort_on_capability_error),
            output_dir,
            max_rpm: pipeline.max_rpm.or(self.max_rpm).filter(|&rpm| rpm > 0),
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Read a config file; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            tracing::debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        tracing::debug!(
            backend = config.effective_backend(),
            timeout_secs = ?config.timeout_secs,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "config saved");
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
