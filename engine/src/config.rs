//! Configuration management for the engine.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default REST base the original farm server listens on.
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// Which direction a full sync pass runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncOrder {
    /// Push local changes, then pull the server's.
    #[default]
    PushFirst,
    /// Pull the server's changes, then push local ones.
    PullFirst,
}

impl FromStr for SyncOrder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "push_first" | "push" => Ok(Self::PushFirst),
            "pull_first" | "pull" => Ok(Self::PullFirst),
            _ => Err(ConfigError::InvalidSyncOrder(s.to_string())),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// REST base URL, e.g. `http://localhost:5000/api`
    pub api_url: String,
    /// Bearer token sent with every request
    pub api_token: Option<String>,
    /// SQLite file; `None` keeps the store in memory
    pub database_path: Option<PathBuf>,
    /// Per-request timeout; `None` waits for the server indefinitely
    pub request_timeout: Option<Duration>,
    pub sync_order: SyncOrder,
    /// Run a full pass as soon as the sync triggers start
    pub sync_on_start: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            database_path: None,
            request_timeout: None,
            sync_order: SyncOrder::default(),
            sync_on_start: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `PADDOCK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = get("PADDOCK_API_URL") {
            config.api_url = url;
        }
        config.api_token = get("PADDOCK_API_TOKEN");
        config.database_path = get("PADDOCK_DATABASE_PATH").map(PathBuf::from);

        if let Some(secs) = get("PADDOCK_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidTimeout(secs.clone()))?;
            config.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(order) = get("PADDOCK_SYNC_ORDER") {
            config.sync_order = order.parse()?;
        }
        if let Some(flag) = get("PADDOCK_SYNC_ON_START") {
            config.sync_on_start = parse_flag(&flag)
                .ok_or_else(|| ConfigError::InvalidFlag("PADDOCK_SYNC_ON_START", flag.clone()))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_sync_order(mut self, order: SyncOrder) -> Self {
        self.sync_order = order;
        self
    }

    pub fn with_sync_on_start(mut self, enabled: bool) -> Self {
        self.sync_on_start = enabled;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let url = self.api_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidApiUrl(self.api_url.clone()));
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("PADDOCK_API_URL must be an http(s) URL, got {0:?}")]
    InvalidApiUrl(String),

    #[error("Invalid PADDOCK_REQUEST_TIMEOUT_SECS value: {0:?}")]
    InvalidTimeout(String),

    #[error("Invalid PADDOCK_SYNC_ORDER value: {0:?} (expected push_first or pull_first)")]
    InvalidSyncOrder(String),

    #[error("Invalid {0} value: {1:?}")]
    InvalidFlag(&'static str, String),

    #[error("HTTP client could not be built: {0}")]
    HttpClient(String),
}
