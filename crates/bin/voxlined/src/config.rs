//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `voxline.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use voxline_adapter_realtime_ws::RealtimeConfig;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Connection to the processing backend.
    pub realtime: RealtimeSection,
    pub scheduler: SchedulerConfig,
    pub queue: QueueConfig,
    pub matcher: MatcherConfig,
    pub macros: MacrosConfig,
    pub retention: RetentionConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

/// `SQLite` database configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL or file path.
    pub url: String,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Realtime channel settings plus the bearer token it presents.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RealtimeSection {
    #[serde(flatten)]
    pub channel: RealtimeConfig,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Delivery attempts per queued command.
    pub max_retries: u32,
    /// Period of the background drain, in seconds.
    pub drain_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Concurrent scoring workers.
    pub workers: usize,
    /// Directory of `*.json` template definitions.
    pub templates_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MacrosConfig {
    /// Directory of `*.json` macro definitions.
    pub dir: Option<PathBuf>,
}

/// How long terminal commands are kept.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub days: u32,
    pub sweep_interval_secs: u64,
}

impl Config {
    /// Load configuration from `voxline.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("VOXLINE_CONFIG").unwrap_or_else(|_| "voxline.toml".to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("VOXLINE_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = std::env::var("VOXLINE_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = std::env::var("VOXLINE_DATABASE_URL") {
            self.database.url = val;
        }
        if let Ok(val) = std::env::var("VOXLINE_REALTIME_URL") {
            self.realtime.channel.url = val;
        }
        if let Ok(val) = std::env::var("VOXLINE_TOKEN") {
            self.realtime.token = Some(val);
        }
        if let Ok(val) = std::env::var("VOXLINE_TEMPLATES_DIR") {
            self.matcher.templates_dir = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("VOXLINE_MACROS_DIR") {
            self.macros.dir = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("VOXLINE_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("port must be non-zero".to_string()));
        }
        if !self.realtime.channel.url.starts_with("ws://") {
            return Err(ConfigError::Validation(
                "realtime.url must be a ws:// endpoint".to_string(),
            ));
        }
        if self.queue.max_retries == 0 {
            return Err(ConfigError::Validation(
                "queue.max_retries must be at least 1".to_string(),
            ));
        }
        let periods = [
            ("realtime.heartbeat_secs", self.realtime.channel.heartbeat_secs),
            ("realtime.request_timeout_secs", self.realtime.channel.request_timeout_secs),
            ("scheduler.poll_interval_secs", self.scheduler.poll_interval_secs),
            ("queue.drain_interval_secs", self.queue.drain_interval_secs),
            ("retention.sweep_interval_secs", self.retention.sweep_interval_secs),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::Validation(format!("{name} must be non-zero")));
        }
        Ok(())
    }

    /// Return the `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl QueueConfig {
    #[must_use]
    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }
}

impl RetentionConfig {
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:voxline.db?mode=rwc".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "voxlined=info,voxline=info,tower_http=debug".to_string(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            drain_interval_secs: 30,
        }
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            templates_dir: None,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: 30,
            sweep_interval_secs: 3600,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
