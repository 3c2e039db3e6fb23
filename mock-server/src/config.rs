use crate::frame::{FrameMode, DEFAULT_MAX_FRAME_BYTES};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    pub bind: String,
    /// How often each connection's writer drains the dispatcher.
    pub poll_interval_ms: u64,
    /// Upper bound on waiting for connection tasks during shutdown.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:0".to_string(),
            poll_interval_ms: 100,
            shutdown_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FramingConfig {
    /// Ignore braces inside JSON string literals when splitting frames.
    pub quote_aware: bool,
    pub max_frame_bytes: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            quote_aware: false,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl FramingConfig {
    pub fn mode(&self) -> FrameMode {
        if self.quote_aware {
            FrameMode::QuoteAware
        } else {
            FrameMode::BraceCount
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HarnessConfig {
    pub wait_poll_interval_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            wait_poll_interval_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingConfig {
    pub level: String,
    /// `text` or `json`.
    pub format: String,
    /// Log to this file instead of stdout.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MockConfig {
    pub server: ServerConfig,
    pub framing: FramingConfig,
    pub harness: HarnessConfig,
    pub logging: LoggingConfig,
}

impl MockConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|err| ConfigError::new(format!("TOML parse error: {err}")))
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(bind) = env::var("KODI_MOCK_SERVER_BIND") {
            if !bind.trim().is_empty() {
                self.server.bind = bind.trim().to_string();
            }
        }
        if let Ok(interval) = env::var("KODI_MOCK_POLL_INTERVAL_MS") {
            if let Ok(parsed) = interval.trim().parse::<u64>() {
                self.server.poll_interval_ms = parsed;
            }
        }
        if let Ok(quote_aware) = env::var("KODI_MOCK_FRAMING_QUOTE_AWARE") {
            let value = quote_aware.trim().to_lowercase();
            self.framing.quote_aware = matches!(value.as_str(), "1" | "true" | "yes" | "on");
        }
        if let Ok(level) = env::var("KODI_MOCK_LOG_LEVEL") {
            if !level.trim().is_empty() {
                self.logging.level = level.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;

        if !(10..=10_000).contains(&self.server.poll_interval_ms) {
            return Err(ConfigError::new(
                "server.poll-interval-ms must be between 10 and 10000",
            ));
        }
        if self.server.shutdown_timeout_ms == 0 {
            return Err(ConfigError::new("server.shutdown-timeout-ms must be > 0"));
        }
        if !(1..=1_000).contains(&self.harness.wait_poll_interval_ms) {
            return Err(ConfigError::new(
                "harness.wait-poll-interval-ms must be between 1 and 1000",
            ));
        }
        if self.framing.max_frame_bytes < 64 {
            return Err(ConfigError::new("framing.max-frame-bytes must be >= 64"));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(ConfigError::new(format!(
                "logging.format must be 'text' or 'json' (got '{}')",
                self.logging.format
            )));
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.bind.parse().map_err(|err| {
            ConfigError::new(format!("Invalid server.bind '{}': {err}", self.server.bind))
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.server.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.server.shutdown_timeout_ms)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.harness.wait_poll_interval_ms)
    }
}

#[derive(Clone)]
pub struct ConfigManager {
    path: Option<PathBuf>,
    config: Arc<RwLock<MockConfig>>,
}

impl ConfigManager {
    pub fn load_from_fs(config_override: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = resolve_config_path(config_override);
        let config = read_config(path.as_deref())?;

        Ok(Self {
            path,
            config: Arc::new(RwLock::new(config)),
        })
    }

    pub fn current(&self) -> MockConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Apply command-line overrides on top of the loaded configuration.
    pub fn update(
        &self,
        apply: impl FnOnce(&mut MockConfig),
    ) -> Result<MockConfig, ConfigError> {
        let mut config = self.current();
        apply(&mut config);
        config.validate()?;
        *self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config.clone();
        Ok(config)
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self {
            path: None,
            config: Arc::new(RwLock::new(MockConfig::default())),
        }
    }
}

fn read_config(path: Option<&Path>) -> Result<MockConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let raw = fs::read_to_string(path).map_err(|err| {
                ConfigError::new(format!("Unable to read config '{}': {err}", path.display()))
            })?;
            MockConfig::from_toml_str(&raw)?
        }
        None => MockConfig::default(),
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn resolve_config_path(config_override: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = config_override {
        return Some(path);
    }

    let mut candidates = Vec::new();
    if let Some(home) = env::var_os("XDG_CONFIG_HOME").filter(|value| !value.is_empty()) {
        candidates.push(PathBuf::from(home).join("kodi-mock-server").join("config.toml"));
    } else if let Some(home) = env::var_os("HOME").filter(|value| !value.is_empty()) {
        candidates.push(
            PathBuf::from(home)
                .join(".config")
                .join("kodi-mock-server")
                .join("config.toml"),
        );
    }

    candidates.into_iter().find(|path| path.exists())
}
