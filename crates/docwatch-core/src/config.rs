//! Configuration module for Docwatch.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Docwatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub server: ServerConfig,
    pub drive: DriveConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// Monitoring engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Folder whose change feed is watched at startup (at most one).
    pub folder_id: Option<String>,
    /// Documents watched individually at startup.
    pub documents: Vec<String>,
    /// Public URL the remote store delivers push notifications to.
    pub callback_address: String,
    /// Upper bound, in seconds, for every remote call.
    pub remote_timeout_secs: u64,
    /// Maximum number of documents fetched and normalized in parallel.
    pub fetch_concurrency: usize,
    /// Maximum number of change pages followed per notification.
    pub max_change_pages: u32,
    /// Channels expiring within this many seconds are renewed.
    pub renew_margin_secs: u64,
    /// Seconds between renewal sweeps.
    pub renew_interval_secs: u64,
}

/// Inbound HTTP endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind, e.g. `0.0.0.0:8080`.
    pub listen: String,
    /// Capacity of each subscriber's event queue.
    pub subscriber_queue: usize,
}

/// Remote document store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Overrides every Google API host (used by tests and proxies).
    pub api_base_url: Option<String>,
}

/// Authentication / OAuth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// OAuth client ID. `None` disables token refresh.
    pub client_id: Option<String>,
    /// OAuth client secret.
    pub client_secret: Option<String>,
    /// Keyring username the credential is stored under.
    pub account: String,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/docwatch/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("docwatch")
            .join("config.yaml")
    }
}

impl MonitorConfig {
    /// Timeout applied to every remote call.
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    /// Renewal margin as a chrono duration.
    pub fn renew_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.renew_margin_secs as i64)
    }

    /// Interval between renewal sweeps.
    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            folder_id: None,
            documents: Vec::new(),
            callback_address: "http://127.0.0.1:8080/notifications".to_string(),
            remote_timeout_secs: 30,
            fetch_concurrency: 4,
            max_change_pages: 10,
            renew_margin_secs: 600,
            renew_interval_secs: 300,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            subscriber_queue: 64,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            account: "default".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"monitor.fetch_concurrency"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- monitor ---
        if url::Url::parse(&self.monitor.callback_address).is_err() {
            errors.push(ValidationError {
                field: "monitor.callback_address".into(),
                message: format!("not a valid URL: {}", self.monitor.callback_address),
            });
        }
        if self.monitor.remote_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "monitor.remote_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.monitor.fetch_concurrency == 0 || self.monitor.fetch_concurrency > 64 {
            errors.push(ValidationError {
                field: "monitor.fetch_concurrency".into(),
                message: "must be in range 1..=64".into(),
            });
        }
        if self.monitor.max_change_pages == 0 {
            errors.push(ValidationError {
                field: "monitor.max_change_pages".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.monitor.renew_interval_secs == 0 {
            errors.push(ValidationError {
                field: "monitor.renew_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.monitor.renew_margin_secs < self.monitor.renew_interval_secs {
            errors.push(ValidationError {
                field: "monitor.renew_margin_secs".into(),
                message: format!(
                    "renew_margin_secs ({}) must be at least renew_interval_secs ({})",
                    self.monitor.renew_margin_secs, self.monitor.renew_interval_secs
                ),
            });
        }

        // --- server ---
        if self.server.listen.parse::<std::net::SocketAddr>().is_err() {
            errors.push(ValidationError {
                field: "server.listen".into(),
                message: format!("not a socket address: {}", self.server.listen),
            });
        }
        if self.server.subscriber_queue == 0 {
            errors.push(ValidationError {
                field: "server.subscriber_queue".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- auth ---
        if self.auth.client_id.is_some() != self.auth.client_secret.is_some() {
            errors.push(ValidationError {
                field: "auth.client_secret".into(),
                message: "client_id and client_secret must be set together".into(),
            });
        }
        if self.auth.account.is_empty() {
            errors.push(ValidationError {
                field: "auth.account".into(),
                message: "must not be empty".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use docwatch_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .monitor_folder_id("1AbCdEf")
///     .monitor_callback_address("https://hooks.example.com/notifications")
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- monitor ---

    pub fn monitor_folder_id(mut self, folder_id: impl Into<String>) -> Self {
        self.config.monitor.folder_id = Some(folder_id.into());
        self
    }

    pub fn monitor_document(mut self, document_id: impl Into<String>) -> Self {
        self.config.monitor.documents.push(document_id.into());
        self
    }

    pub fn monitor_callback_address(mut self, address: impl Into<String>) -> Self {
        self.config.monitor.callback_address = address.into();
        self
    }

    pub fn monitor_remote_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.monitor.remote_timeout_secs = seconds;
        self
    }

    pub fn monitor_fetch_concurrency(mut self, n: usize) -> Self {
        self.config.monitor.fetch_concurrency = n;
        self
    }

    pub fn monitor_max_change_pages(mut self, n: u32) -> Self {
        self.config.monitor.max_change_pages = n;
        self
    }

    pub fn monitor_renew_margin_secs(mut self, seconds: u64) -> Self {
        self.config.monitor.renew_margin_secs = seconds;
        self
    }

    pub fn monitor_renew_interval_secs(mut self, seconds: u64) -> Self {
        self.config.monitor.renew_interval_secs = seconds;
        self
    }

    // --- server ---

    pub fn server_listen(mut self, listen: impl Into<String>) -> Self {
        self.config.server.listen = listen.into();
        self
    }

    pub fn server_subscriber_queue(mut self, n: usize) -> Self {
        self.config.server.subscriber_queue = n;
        self
    }

    // --- drive ---

    pub fn drive_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.drive.api_base_url = Some(url.into());
        self
    }

    // --- auth ---

    pub fn auth_client(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.config.auth.client_id = Some(client_id.into());
        self.config.auth.client_secret = Some(client_secret.into());
        self
    }

    pub fn auth_account(mut self, account: impl Into<String>) -> Self {
        self.config.auth.account = account.into();
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
