//! Configuration loader
//!
//! ## Loading Strategy
//! 1. Load `OFFSYNC_CONFIG` if set, else the first config file found by
//!    [`probe_config_paths`], else start from defaults
//! 2. Apply `OFFSYNC_*` environment overrides on top
//! 3. Validate the result
//!
//! JSON and TOML are both accepted, detected by extension.
//!
//! ## Environment Variables
//! - `OFFSYNC_DB_PATH`, `OFFSYNC_DB_POOL_SIZE`
//! - `OFFSYNC_REMOTE_BASE_URL`, `OFFSYNC_REMOTE_API_PREFIX`,
//!   `OFFSYNC_REMOTE_RECONCILE_PATH`, `OFFSYNC_REMOTE_AUTH_TOKEN`,
//!   `OFFSYNC_REMOTE_TIMEOUT`
//! - `OFFSYNC_SYNC_ENABLED`, `OFFSYNC_SYNC_INTERVAL`, `OFFSYNC_SYNC_DEBOUNCE_MS`,
//!   `OFFSYNC_SYNC_CALL_TIMEOUT`, `OFFSYNC_SYNC_MAX_RETRIES` (`unlimited` disables
//!   dead-lettering)
//! - `OFFSYNC_PROBE_URL`, `OFFSYNC_PROBE_INTERVAL`, `OFFSYNC_ASSUME_ONLINE`
//! - `OFFSYNC_LOG_LEVEL`, `OFFSYNC_LOG_JSON`
//!
//! ## File Locations
//! `offsync.{toml,json}` then `config.{toml,json}`, looked up in the working
//! directory, its two parents, and next to the executable.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use offsync_domain::{Config, QueueError, Result};

const FILE_NAMES: [&str; 4] = ["offsync.toml", "offsync.json", "config.toml", "config.json"];

/// Load configuration from the probed file (or defaults) plus environment
/// overrides.
///
/// # Errors
/// Returns `QueueError::Config` if a file exists but cannot be parsed, or a
/// value is invalid.
pub fn load() -> Result<Config> {
    let explicit = env_string("OFFSYNC_CONFIG").map(PathBuf::from);
    let base = match explicit.or_else(probe_config_paths) {
        Some(path) => load_from_file(Some(path))?,
        None => {
            tracing::debug!("No config file found; using defaults");
            Config::default()
        }
    };

    let config = apply_env_overrides(base)?;
    validate(&config)?;
    Ok(config)
}

/// Defaults with environment overrides applied.
///
/// # Errors
/// Returns `QueueError::Config` for unparsable or invalid values.
pub fn load_from_env() -> Result<Config> {
    let config = apply_env_overrides(Config::default())?;
    validate(&config)?;
    tracing::info!("Configuration loaded from environment variables");
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations.
///
/// # Errors
/// Returns `QueueError::Config` if the file is missing or malformed.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(QueueError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            QueueError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| QueueError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| QueueError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| QueueError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(QueueError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// First existing config file among the standard locations.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd.clone());
        roots.push(cwd.join(".."));
        roots.push(cwd.join("../.."));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.push(exe_dir.to_path_buf());
        }
    }

    roots
        .iter()
        .flat_map(|root| FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

fn apply_env_overrides(mut config: Config) -> Result<Config> {
    if let Some(path) = env_string("OFFSYNC_DB_PATH") {
        config.database.path = path;
    }
    if let Some(size) = env_parse::<u32>("OFFSYNC_DB_POOL_SIZE")? {
        config.database.pool_size = size;
    }

    if let Some(url) = env_string("OFFSYNC_REMOTE_BASE_URL") {
        config.remote.base_url = url;
    }
    if let Some(prefix) = env_string("OFFSYNC_REMOTE_API_PREFIX") {
        config.remote.api_prefix = prefix;
    }
    if let Some(path) = env_string("OFFSYNC_REMOTE_RECONCILE_PATH") {
        config.remote.reconcile_path = Some(path);
    }
    if let Some(token) = env_string("OFFSYNC_REMOTE_AUTH_TOKEN") {
        config.remote.auth_token = Some(token);
    }
    if let Some(secs) = env_parse::<u64>("OFFSYNC_REMOTE_TIMEOUT")? {
        config.remote.request_timeout_secs = secs;
    }

    config.sync.enabled = env_bool("OFFSYNC_SYNC_ENABLED", config.sync.enabled);
    if let Some(secs) = env_parse::<u64>("OFFSYNC_SYNC_INTERVAL")? {
        config.sync.interval_seconds = secs;
    }
    if let Some(ms) = env_parse::<u64>("OFFSYNC_SYNC_DEBOUNCE_MS")? {
        config.sync.reconnect_debounce_ms = ms;
    }
    if let Some(secs) = env_parse::<u64>("OFFSYNC_SYNC_CALL_TIMEOUT")? {
        config.sync.call_timeout_secs = secs;
    }
    if let Some(raw) = env_string("OFFSYNC_SYNC_MAX_RETRIES") {
        config.sync.max_retries = if raw.eq_ignore_ascii_case("unlimited") {
            None
        } else {
            Some(parse_value("OFFSYNC_SYNC_MAX_RETRIES", &raw)?)
        };
    }

    if let Some(url) = env_string("OFFSYNC_PROBE_URL") {
        config.connectivity.probe_url = Some(url);
    }
    if let Some(secs) = env_parse::<u64>("OFFSYNC_PROBE_INTERVAL")? {
        config.connectivity.probe_interval_secs = secs;
    }
    config.connectivity.assume_online =
        env_bool("OFFSYNC_ASSUME_ONLINE", config.connectivity.assume_online);

    if let Some(level) = env_string("OFFSYNC_LOG_LEVEL") {
        config.logging.level = level;
    }
    config.logging.json = env_bool("OFFSYNC_LOG_JSON", config.logging.json);

    Ok(config)
}

/// Reject values that would make the engine misbehave silently.
///
/// # Errors
/// Returns `QueueError::Config` naming the first invalid field.
pub fn validate(config: &Config) -> Result<()> {
    if config.database.path.trim().is_empty() {
        return Err(QueueError::Config("database.path must not be empty".into()));
    }
    if config.database.pool_size == 0 {
        return Err(QueueError::Config("database.pool_size must be at least 1".into()));
    }
    if config.remote.base_url.trim().is_empty() {
        return Err(QueueError::Config("remote.base_url must not be empty".into()));
    }
    if config.sync.interval_seconds == 0 {
        return Err(QueueError::Config("sync.interval_seconds must be positive".into()));
    }
    if config.sync.call_timeout_secs == 0 {
        return Err(QueueError::Config("sync.call_timeout_secs must be positive".into()));
    }
    if config.sync.backoff_base_ms > config.sync.backoff_max_secs.saturating_mul(1_000) {
        return Err(QueueError::Config(
            "sync.backoff_base_ms must not exceed sync.backoff_max_secs".into(),
        ));
    }
    if config.connectivity.probe_url.is_some() && config.connectivity.probe_interval_secs == 0 {
        return Err(QueueError::Config("connectivity.probe_interval_secs must be positive".into()));
    }
    Ok(())
}

/// Non-empty environment variable.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(key).map(|raw| parse_value(key, &raw)).transpose()
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| QueueError::Config(format!("Invalid value for {key}: {e}")))
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    env_string(key)
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use once_cell::sync::Lazy;
    use tempfile::Builder;

    use super::*;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const ALL_VARS: [&str; 18] = [
        "OFFSYNC_CONFIG",
        "OFFSYNC_DB_PATH",
        "OFFSYNC_DB_POOL_SIZE",
        "OFFSYNC_REMOTE_BASE_URL",
        "OFFSYNC_REMOTE_API_PREFIX",
        "OFFSYNC_REMOTE_RECONCILE_PATH",
        "OFFSYNC_REMOTE_AUTH_TOKEN",
        "OFFSYNC_REMOTE_TIMEOUT",
        "OFFSYNC_SYNC_ENABLED",
        "OFFSYNC_SYNC_INTERVAL",
        "OFFSYNC_SYNC_DEBOUNCE_MS",
        "OFFSYNC_SYNC_CALL_TIMEOUT",
        "OFFSYNC_SYNC_MAX_RETRIES",
        "OFFSYNC_PROBE_URL",
        "OFFSYNC_PROBE_INTERVAL",
        "OFFSYNC_ASSUME_ONLINE",
        "OFFSYNC_LOG_LEVEL",
        "OFFSYNC_LOG_JSON",
    ];

    fn clear_env() {
        for key in ALL_VARS {
            std::env::remove_var(key);
        }
    }

    fn temp_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");

        for (value, expected) in [("1", true), ("TRUE", true), ("on", true), ("0", false), ("no", false)] {
            std::env::set_var("OFFSYNC_TEST_BOOL", value);
            assert_eq!(env_bool("OFFSYNC_TEST_BOOL", !expected), expected, "{value}");
        }
        std::env::remove_var("OFFSYNC_TEST_BOOL");
        assert!(env_bool("OFFSYNC_TEST_BOOL", true));
    }

    #[test]
    fn test_load_from_env_overrides_defaults() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("OFFSYNC_DB_PATH", "/tmp/queue.db");
        std::env::set_var("OFFSYNC_DB_POOL_SIZE", "2");
        std::env::set_var("OFFSYNC_REMOTE_BASE_URL", "https://api.example.com");
        std::env::set_var("OFFSYNC_REMOTE_AUTH_TOKEN", "secret");
        std::env::set_var("OFFSYNC_SYNC_INTERVAL", "60");
        std::env::set_var("OFFSYNC_SYNC_MAX_RETRIES", "unlimited");
        std::env::set_var("OFFSYNC_ASSUME_ONLINE", "yes");
        std::env::set_var("OFFSYNC_LOG_JSON", "true");

        let config = load_from_env().unwrap();
        clear_env();

        assert_eq!(config.database.path, "/tmp/queue.db");
        assert_eq!(config.database.pool_size, 2);
        assert_eq!(config.remote.base_url, "https://api.example.com");
        assert_eq!(config.remote.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.sync.interval_seconds, 60);
        assert_eq!(config.sync.max_retries, None);
        assert_eq!(config.sync.reconnect_debounce_ms, 2_000);
        assert!(config.connectivity.assume_online);
        assert!(config.logging.json);
    }

    #[test]
    fn test_load_from_env_invalid_number() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("OFFSYNC_DB_POOL_SIZE", "not-a-number");
        let result = load_from_env();
        clear_env();

        let err = result.unwrap_err();
        assert!(matches!(err, QueueError::Config(msg) if msg.contains("OFFSYNC_DB_POOL_SIZE")));
    }

    #[test]
    fn test_load_prefers_explicit_config_path() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        let file = temp_config(".toml", "[sync]\ninterval_seconds = 42\n");
        std::env::set_var("OFFSYNC_CONFIG", file.path());
        std::env::set_var("OFFSYNC_LOG_LEVEL", "debug");
        let result = load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.sync.interval_seconds, 42);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validation_rejects_zero_interval() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("OFFSYNC_SYNC_INTERVAL", "0");
        let result = load_from_env();
        clear_env();

        assert!(matches!(result, Err(QueueError::Config(_))));
    }

    #[test]
    fn test_load_from_file_toml() {
        let file = temp_config(
            ".toml",
            r#"
            [database]
            path = "queue.db"

            [remote]
            base_url = "https://api.example.com"
            reconcile_path = "/api/reconcile"

            [sync]
            interval_seconds = 120
            max_retries = 3
            "#,
        );

        let config = load_from_file(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.database.path, "queue.db");
        assert_eq!(config.database.pool_size, 4);
        assert_eq!(config.remote.reconcile_path.as_deref(), Some("/api/reconcile"));
        assert_eq!(config.sync.interval_seconds, 120);
        assert_eq!(config.sync.max_retries, Some(3));
    }

    #[test]
    fn test_load_from_file_json() {
        let file = temp_config(
            ".json",
            r#"{ "connectivity": { "probe_url": "https://example.com/health", "assume_online": true } }"#,
        );

        let config = load_from_file(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.connectivity.probe_url.as_deref(), Some("https://example.com/health"));
        assert!(config.connectivity.assume_online);
    }

    #[test]
    fn test_load_from_file_invalid_format() {
        let file = temp_config(".toml", "this is = = not toml");
        let err = load_from_file(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, QueueError::Config(msg) if msg.contains("TOML")));
    }

    #[test]
    fn test_load_from_file_unsupported_extension() {
        let file = temp_config(".yaml", "sync: {}");
        let err = load_from_file(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, QueueError::Config(msg) if msg.contains("Unsupported")));
    }

    #[test]
    fn test_load_from_file_missing() {
        let err = load_from_file(Some(PathBuf::from("/nonexistent/offsync.toml"))).unwrap_err();
        assert!(matches!(err, QueueError::Config(msg) if msg.contains("not found")));
    }

    #[test]
    fn test_validate_defaults() {
        assert!(validate(&Config::default()).is_ok());

        let mut config = Config::default();
        config.database.pool_size = 0;
        assert!(validate(&config).is_err());
    }
}
