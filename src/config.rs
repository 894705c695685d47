// Configuration File Support
//
// TOML configuration for docgate with environment variable overrides.
// Configuration files are loaded from XDG config directory: ~/.config/docgate/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rate_limit::RateLimitConfig;
use crate::service::DEFAULT_MAX_QUERY_RESULTS;
use crate::store::rest::{RestStoreConfig, DEFAULT_BASE_URL, DEFAULT_DATABASE};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Backing document store
    pub store: StoreConfig,

    /// Per-category request limits
    pub rate_limit: RateLimitConfig,

    /// Query defaults
    pub query: QueryConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Convert the level string to a tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}

/// Which document store the service talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store, contents are lost on exit
    #[default]
    Memory,
    /// Firestore REST API
    Rest,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "rest" => Ok(StoreBackend::Rest),
            other => Err(format!("unknown store backend: {}", other)),
        }
    }
}

/// Document store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Project that owns the database (REST only)
    pub project_id: Option<String>,

    /// Database id
    pub database: String,

    /// API root, e.g. `http://localhost:8080` for the emulator
    pub base_url: String,

    /// Bearer token sent with every REST request
    pub auth_token: Option<String>,

    /// Timeout in seconds for REST requests
    pub timeout_secs: u64,

    /// Subscription polling interval in milliseconds (REST only)
    pub poll_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            project_id: None,
            database: DEFAULT_DATABASE.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_token: None,
            timeout_secs: 30,
            poll_interval_ms: 1000,
        }
    }
}

impl StoreConfig {
    /// Connection settings for the REST store
    pub fn rest_config(&self) -> Result<RestStoreConfig> {
        let project_id = self
            .project_id
            .clone()
            .context("store.project_id is required for the rest backend")?;
        Ok(RestStoreConfig {
            project_id,
            database: self.database.clone(),
            base_url: self.base_url.clone(),
            auth_token: self.auth_token.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        })
    }
}

/// Query configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    /// Ceiling applied to every query limit
    pub max_results: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_QUERY_RESULTS,
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if the resulting configuration is invalid.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/docgate/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "docgate", "docgate") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            // Fallback if XDG dirs cannot be determined
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("docgate")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - DOCGATE_LOG_LEVEL
    /// - DOCGATE_LOG_FORMAT
    /// - DOCGATE_STORE_BACKEND
    /// - DOCGATE_PROJECT_ID
    /// - DOCGATE_BASE_URL
    /// - DOCGATE_AUTH_TOKEN
    /// - DOCGATE_MAX_QUERY_RESULTS
    /// - the rate limit variables read by [`RateLimitConfig::apply_env_overrides`]
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("DOCGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("DOCGATE_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(backend) = std::env::var("DOCGATE_STORE_BACKEND") {
            if let Ok(backend) = backend.parse() {
                self.store.backend = backend;
            }
        }
        if let Ok(project) = std::env::var("DOCGATE_PROJECT_ID") {
            self.store.project_id = Some(project);
        }
        if let Ok(url) = std::env::var("DOCGATE_BASE_URL") {
            self.store.base_url = url;
        }
        if let Ok(token) = std::env::var("DOCGATE_AUTH_TOKEN") {
            self.store.auth_token = Some(token);
        }

        if let Ok(max) = std::env::var("DOCGATE_MAX_QUERY_RESULTS") {
            if let Ok(max) = max.parse::<usize>() {
                if max > 0 {
                    self.query.max_results = max;
                }
            }
        }

        self.rate_limit = self.rate_limit.apply_env_overrides();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.store.backend == StoreBackend::Rest {
            if self.store.project_id.as_deref().map_or(true, |p| p.trim().is_empty()) {
                anyhow::bail!("store.project_id must be set when using the rest backend");
            }
            if self.store.timeout_secs == 0 {
                anyhow::bail!("store.timeout_secs must be > 0");
            }
            if self.store.poll_interval_ms == 0 {
                anyhow::bail!("store.poll_interval_ms must be > 0");
            }
        }

        if self.query.max_results == 0 {
            anyhow::bail!("query.max_results must be > 0");
        }

        self.rate_limit
            .validate()
            .context("Invalid rate_limit section")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{Category, UnkeyedPolicy};
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Tests below read or write process-wide DOCGATE_* variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_VARS: &[&str] = &[
        "DOCGATE_LOG_LEVEL",
        "DOCGATE_LOG_FORMAT",
        "DOCGATE_STORE_BACKEND",
        "DOCGATE_PROJECT_ID",
        "DOCGATE_BASE_URL",
        "DOCGATE_AUTH_TOKEN",
        "DOCGATE_MAX_QUERY_RESULTS",
        "DOCGATE_RATE_LIMIT_ENABLED",
        "DOCGATE_DOCUMENT_READ_LIMIT",
        "DOCGATE_DOCUMENT_WRITE_LIMIT",
        "DOCGATE_COLLECTION_READ_LIMIT",
        "DOCGATE_SUBSCRIPTION_LIMIT",
        "DOCGATE_RATE_WINDOW_MS",
        "DOCGATE_UNKEYED_POLICY",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "compact");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.database, "(default)");
        assert_eq!(config.query.max_results, 100);
        assert_eq!(config.rate_limit, RateLimitConfig::default());
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rest_backend_requires_project() {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Rest;
        assert!(config.validate().is_err());
        assert!(config.store.rest_config().is_err());

        config.store.project_id = Some("demo".to_string());
        assert!(config.validate().is_ok());
        let rest = config.store.rest_config().unwrap();
        assert_eq!(rest.project_id, "demo");
        assert_eq!(rest.timeout, Duration::from_secs(30));
        assert_eq!(rest.poll_interval, Duration::from_millis(1000));
    }

    #[test]
    fn test_config_validation_zero_limits() {
        let mut config = Config::default();
        config.query.max_results = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rate_limit = config.rate_limit.with_limit(Category::Subscription, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_nonexistent_file() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_valid_toml_config() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        let temp_file = NamedTempFile::new().unwrap();
        let toml_content = r#"
[logging]
level = "debug"
format = "json"

[store]
backend = "rest"
project_id = "demo"
base_url = "http://localhost:8080"
poll_interval_ms = 250

[rate_limit]
document_write_limit = 10
unkeyed = "shared"

[query]
max_results = 25
"#;
        fs::write(temp_file.path(), toml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.store.backend, StoreBackend::Rest);
        assert_eq!(config.store.base_url, "http://localhost:8080");
        assert_eq!(config.store.poll_interval_ms, 250);
        assert_eq!(config.store.timeout_secs, 30);
        assert_eq!(config.rate_limit.limit_for(Category::DocumentWrite), 10);
        assert_eq!(config.rate_limit.limit_for(Category::DocumentRead), 100);
        assert_eq!(config.rate_limit.unkeyed, UnkeyedPolicy::Shared);
        assert_eq!(config.query.max_results, 25);
    }

    #[test]
    fn test_load_invalid_toml_config() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[logging\nlevel = ").unwrap();
        assert!(Config::load_from_path(temp_file.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        std::env::set_var("DOCGATE_LOG_LEVEL", "warn");
        std::env::set_var("DOCGATE_STORE_BACKEND", "REST");
        std::env::set_var("DOCGATE_PROJECT_ID", "from-env");
        std::env::set_var("DOCGATE_DOCUMENT_READ_LIMIT", "7");
        std::env::set_var("DOCGATE_SUBSCRIPTION_LIMIT", "not-a-number");
        std::env::set_var("DOCGATE_MAX_QUERY_RESULTS", "0");

        let config = Config::default().apply_env_overrides();
        clear_env();

        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.store.backend, StoreBackend::Rest);
        assert_eq!(config.store.project_id.as_deref(), Some("from-env"));
        assert_eq!(config.rate_limit.limit_for(Category::DocumentRead), 7);
        // Invalid values are ignored
        assert_eq!(config.rate_limit.limit_for(Category::Subscription), 30);
        assert_eq!(config.query.max_results, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_log_level() {
        let mut config = Config::default();
        config.logging.level = "DEBUG".to_string();
        assert_eq!(config.logging.log_level().unwrap(), tracing::Level::DEBUG);

        config.logging.level = "loud".to_string();
        assert!(config.logging.log_level().is_err());
    }
}
