use std::{fs, io, path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "dashboard.toml";
const ENV_PREFIX: &str = "DASH__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read { path: String, source: io::Error },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Window after initialization in which widgets may first register.
    pub request_window_ms: u64,
    /// Window after a resolution in which the same id may register again.
    pub cycle_window_ms: u64,
    pub max_cycles: u32,
    pub timeout_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            request_window_ms: 2_000,
            cycle_window_ms: 2_000,
            max_cycles: 3,
            timeout_secs: 20 * 60,
        }
    }
}

impl RenderConfig {
    pub fn request_window(&self) -> Duration {
        Duration::from_millis(self.request_window_ms)
    }

    pub fn cycle_window(&self) -> Duration {
        Duration::from_millis(self.cycle_window_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per backend call, including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 200,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub workspace: String,
    pub mailbox_capacity: usize,
    pub event_capacity: usize,
    pub wait_timeout_secs: u64,
    pub undo_limit: usize,
    pub render: RenderConfig,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace: "default".into(),
            mailbox_capacity: 256,
            event_capacity: 1024,
            wait_timeout_secs: 30,
            undo_limit: 50,
            render: RenderConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = workspace.into();
        self
    }
}

/// Defaults, overridden by `dashboard.toml` (when present) and then by `DASH__*` variables.
pub fn load_config() -> Result<EngineConfig, ConfigError> {
    let mut config = load_config_file(Path::new(DEFAULT_CONFIG_FILE))?.unwrap_or_default();
    apply_env_overrides(&mut config, std::env::vars())?;
    Ok(config)
}

pub fn load_config_file(path: &Path) -> Result<Option<EngineConfig>, ConfigError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            })
        }
    };
    toml::from_str(&raw)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
}

pub fn apply_env_overrides(
    config: &mut EngineConfig,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Result<(), ConfigError> {
    for (key, value) in vars {
        let Some(name) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        match name {
            "WORKSPACE" => config.workspace = value,
            "MAILBOX_CAPACITY" => config.mailbox_capacity = parse(&key, &value)?,
            "EVENT_CAPACITY" => config.event_capacity = parse(&key, &value)?,
            "WAIT_TIMEOUT_SECS" => config.wait_timeout_secs = parse(&key, &value)?,
            "UNDO_LIMIT" => config.undo_limit = parse(&key, &value)?,
            "RENDER__REQUEST_WINDOW_MS" => config.render.request_window_ms = parse(&key, &value)?,
            "RENDER__CYCLE_WINDOW_MS" => config.render.cycle_window_ms = parse(&key, &value)?,
            "RENDER__MAX_CYCLES" => config.render.max_cycles = parse(&key, &value)?,
            "RENDER__TIMEOUT_SECS" => config.render.timeout_secs = parse(&key, &value)?,
            "RETRY__MAX_ATTEMPTS" => config.retry.max_attempts = parse(&key, &value)?,
            "RETRY__INITIAL_BACKOFF_MS" => config.retry.initial_backoff_ms = parse(&key, &value)?,
            "RETRY__BACKOFF_MULTIPLIER" => config.retry.backoff_multiplier = parse(&key, &value)?,
            _ => {}
        }
    }
    Ok(())
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
