use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Map a host log level name to a tracing level.
///
/// Unknown names fall back to `INFO`.
pub fn level_filter_from_host(level: &str) -> LevelFilter {
    match level.trim().to_ascii_uppercase().as_str() {
        "FATAL" | "CRITICAL" | "ERROR" => LevelFilter::ERROR,
        "WARN" | "WARNING" => LevelFilter::WARN,
        "DEBUG" => LevelFilter::DEBUG,
        _ => LevelFilter::INFO,
    }
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `host_level`. Calling this again after a
/// subscriber is installed does nothing.
pub fn init(host_level: &str) {
    let level = level_filter_from_host(host_level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok() {
        tracing::debug!(%level, "logging initialised");
    }
}
