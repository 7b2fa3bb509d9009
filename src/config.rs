//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub updater: UpdaterConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Dependency store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("compdeps").join("depends.db").to_string_lossy().to_string())
        .unwrap_or_else(|| "./compdeps_data/depends.db".to_string())
}

fn default_busy_timeout() -> u64 {
    5000
}

impl StoreConfig {
    /// Database path with a leading `~/` expanded to the home directory
    pub fn resolved_path(&self) -> PathBuf {
        match (self.path.strip_prefix("~/"), dirs::home_dir()) {
            (Some(rest), Some(home)) => home.join(rest),
            _ => PathBuf::from(&self.path),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// Reference cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_algorithm_max_age")]
    pub algorithm_max_age_secs: u64,

    #[serde(default = "default_group_max_age")]
    pub group_max_age_secs: u64,

    #[serde(default)]
    pub case_sensitive_names: bool,
}

fn default_algorithm_max_age() -> u64 {
    3600 // 1 hour
}

fn default_group_max_age() -> u64 {
    900 // 15 minutes
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            algorithm_max_age_secs: default_algorithm_max_age(),
            group_max_age_secs: default_group_max_age(),
            case_sensitive_names: false,
        }
    }
}

/// Notification consumer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UpdaterConfig {
    /// Maximum notifications handled per drain
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub full_eval_on_startup: bool,
}

fn default_batch_size() -> usize {
    100
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            full_eval_on_startup: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("compdeps").join("config.toml")),
            Some(PathBuf::from("/etc/compdeps/config.toml")),
            Some(PathBuf::from("./compdeps.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("COMPDEPS_DB_PATH") {
            self.store.path = path;
        }

        if let Ok(age) = std::env::var("COMPDEPS_CACHE_MAX_AGE_SECS") {
            if let Ok(secs) = age.parse() {
                self.cache.algorithm_max_age_secs = secs;
                self.cache.group_max_age_secs = secs;
            }
        }

        if let Ok(level) = std::env::var("COMPDEPS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("COMPDEPS_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Compdeps Configuration
#
# Environment variables override these settings:
# - COMPDEPS_DB_PATH
# - COMPDEPS_CACHE_MAX_AGE_SECS
# - COMPDEPS_LOG_LEVEL
# - COMPDEPS_LOG_FORMAT

[store]
# SQLite database holding the dependency index and notification queue
path = "~/.local/share/compdeps/depends.db"

# How long to wait on a locked database (ms)
busy_timeout_ms = 5000

[cache]
# Maximum age of a cached algorithm before it is reloaded (seconds)
algorithm_max_age_secs = 3600

# Maximum age of a cached group before it is reloaded (seconds)
group_max_age_secs = 900

# Match unique names case-sensitively
case_sensitive_names = false

[updater]
# Maximum notifications handled per drain
batch_size = 100

# Rebuild the whole dependency index before draining the queue
full_eval_on_startup = false

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/compdeps/compdeps.log"
"#
    .to_string()
}
