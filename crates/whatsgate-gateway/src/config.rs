//! Gateway configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a host can start the gateway with
//! zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use whatsgate_media::config::DEFAULT_TIMEOUT;
use whatsgate_shared::constants::{
    DISPATCH_QUEUE_CAPACITY, KEEPALIVE_FAILURE_THRESHOLD, MAX_HISTORY_SYNC_MESSAGES,
    PRESENCE_REFRESH_SECS, RECONNECT_MAX_INTERVAL_SECS, RECONNECT_MIN_INTERVAL_SECS,
};

/// Process-wide gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Device database file.
    /// Env: `WHATSGATE_DB_PATH`
    /// Default: `whatsgate.db` in the platform data directory.
    pub db_path: PathBuf,

    /// Name shown on the primary device's list of linked devices.
    /// Env: `WHATSGATE_DEVICE_NAME`
    /// Default: `"whatsgate"`
    pub device_name: String,

    /// Host log level name (`DEBUG`, `INFO`, `WARNING`, ...).
    /// Env: `WHATSGATE_LOG_LEVEL`
    /// Default: `"INFO"`
    pub log_level: String,

    /// Directory for media scratch files.
    /// Env: `WHATSGATE_TEMP_DIR`
    /// Default: the system temp dir.
    pub temp_dir: Option<PathBuf>,

    /// Upper bound on a single transcoder run.
    /// Env: `WHATSGATE_MEDIA_TIMEOUT_SECS`
    /// Default: 120 s
    pub media_timeout: Duration,

    /// Slots in the host dispatch queue.
    /// Env: `WHATSGATE_DISPATCH_CAPACITY`
    /// Default: `1024`
    pub dispatch_capacity: usize,

    pub session: SessionConfig,
}

/// Per-session timing and paging settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base interval between contact presence refreshes, before jitter.
    /// Env: `WHATSGATE_PRESENCE_REFRESH_SECS`
    pub presence_refresh: Duration,
    pub reconnect_floor: Duration,
    pub reconnect_ceiling: Duration,
    /// Keep-alive timeouts tolerated before a forced reconnect.
    pub keepalive_threshold: u32,
    pub history_page_size: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            presence_refresh: Duration::from_secs(PRESENCE_REFRESH_SECS),
            reconnect_floor: Duration::from_secs(RECONNECT_MIN_INTERVAL_SECS),
            reconnect_ceiling: Duration::from_secs(RECONNECT_MAX_INTERVAL_SECS),
            keepalive_threshold: KEEPALIVE_FAILURE_THRESHOLD,
            history_page_size: MAX_HISTORY_SYNC_MESSAGES,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            db_path: whatsgate_store::database::default_path()
                .unwrap_or_else(|_| PathBuf::from("whatsgate.db")),
            device_name: "whatsgate".to_string(),
            log_level: "INFO".to_string(),
            temp_dir: None,
            media_timeout: DEFAULT_TIMEOUT,
            dispatch_capacity: DISPATCH_QUEUE_CAPACITY,
            session: SessionConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = var("WHATSGATE_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Some(name) = var("WHATSGATE_DEVICE_NAME") {
            if !name.is_empty() {
                config.device_name = name;
            }
        }

        if let Some(level) = var("WHATSGATE_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(dir) = var("WHATSGATE_TEMP_DIR") {
            if !dir.is_empty() {
                config.temp_dir = Some(PathBuf::from(dir));
            }
        }

        if let Some(secs) = parse_var(&var, "WHATSGATE_MEDIA_TIMEOUT_SECS") {
            config.media_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var(&var, "WHATSGATE_PRESENCE_REFRESH_SECS") {
            config.session.presence_refresh = Duration::from_secs(secs);
        }

        if let Some(n) = parse_var::<usize>(&var, "WHATSGATE_DISPATCH_CAPACITY") {
            config.dispatch_capacity = n;
        }

        config
    }
}

/// Parse a positive number, warning and returning `None` on bad input.
fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let value = var(key)?;
    match value.trim().parse::<T>() {
        Ok(n) if n > T::default() => Some(n),
        _ => {
            tracing::warn!(key, value = %value, "Invalid value, using default");
            None
        }
    }
}
