//! Configuration System
//!
//! Connector settings that the host does not deliver: secure store
//! location, provider endpoints, checkpoint fallback and logging.
//! Supports TOML config files and environment variable overrides.

use crate::providers::Provider;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub splunk: SplunkConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Secure store (storage/passwords endpoint) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SplunkConfig {
    /// Overrides the `server_uri` delivered with the input configuration
    pub management_url: Option<String>,

    #[serde(default = "default_app")]
    pub app: String,

    #[serde(default = "default_owner")]
    pub owner: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_app() -> String {
    "TA-GoogleFitness".to_string()
}

fn default_owner() -> String {
    "nobody".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// Used when neither the settings nor the host supply a management URL
pub const DEFAULT_MANAGEMENT_URL: &str = "https://127.0.0.1:8089";

impl Default for SplunkConfig {
    fn default() -> Self {
        Self {
            management_url: None,
            app: default_app(),
            owner: default_owner(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Checkpoint behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    /// How far before "now" a run starts when its checkpoint is unreadable
    #[serde(default = "default_corrupt_fallback")]
    pub corrupt_fallback_minutes: i64,
}

fn default_corrupt_fallback() -> i64 {
    120
}

impl CheckpointConfig {
    pub fn corrupt_fallback(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.corrupt_fallback_minutes.max(0))
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            corrupt_fallback_minutes: default_corrupt_fallback(),
        }
    }
}

/// Per-provider endpoint overrides
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub google_fitness: ProviderEndpoint,

    #[serde(default)]
    pub fitbit: ProviderEndpoint,

    #[serde(default)]
    pub microsoft: ProviderEndpoint,
}

impl ProvidersConfig {
    /// Endpoint settings for `provider`, with blanks filled from the provider defaults
    pub fn endpoint(&self, provider: Provider) -> ProviderEndpoint {
        let configured = match provider {
            Provider::GoogleFitness => &self.google_fitness,
            Provider::FitBit => &self.fitbit,
            Provider::Microsoft => &self.microsoft,
        };

        let mut endpoint = configured.clone();
        if endpoint.api_base.is_empty() {
            endpoint.api_base = provider.default_api_base().to_string();
        }
        if endpoint.token_url.is_empty() {
            endpoint.token_url = provider.default_token_url().to_string();
        }
        endpoint
    }
}

/// REST endpoints of one provider
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEndpoint {
    #[serde(default)]
    pub api_base: String,

    #[serde(default)]
    pub token_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ProviderEndpoint {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            token_url: String::new(),
            request_timeout_secs: default_request_timeout(),
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
    ///
    /// Runs before logging is set up, so files that failed to load are
    /// returned for the caller to report.
    pub fn load_default() -> LoadedConfig {
        let config_paths: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("fitness-input").join("config.toml")),
            Some(PathBuf::from("/etc/fitness-input/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::load_first(&config_paths)
    }

    /// Load the first existing file of `paths` that parses
    pub fn load_first(paths: &[PathBuf]) -> LoadedConfig {
        let mut skipped = Vec::new();

        for path in paths {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        return LoadedConfig {
                            config,
                            source: Some(path.clone()),
                            skipped,
                        };
                    }
                    Err(e) => skipped.push(e),
                }
            }
        }

        LoadedConfig {
            config: Self::from_env(),
            source: None,
            skipped,
        }
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("FITNESS_INPUT_MANAGEMENT_URL") {
            self.splunk.management_url = Some(url);
        }
        if let Ok(app) = std::env::var("FITNESS_INPUT_APP") {
            self.splunk.app = app;
        }
        if let Ok(minutes) = std::env::var("FITNESS_INPUT_CHECKPOINT_FALLBACK_MINUTES") {
            if let Ok(m) = minutes.parse() {
                self.checkpoint.corrupt_fallback_minutes = m;
            }
        }

        if let Ok(level) = std::env::var("FITNESS_INPUT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("FITNESS_INPUT_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Result of searching the default config locations
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,
    /// File the settings came from; `None` means defaults plus environment
    pub source: Option<PathBuf>,
    /// Files that exist but could not be loaded
    pub skipped: Vec<ConfigError>,
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
    r#"# fitness-input Configuration
#
# Environment variables override these settings:
# - FITNESS_INPUT_MANAGEMENT_URL
# - FITNESS_INPUT_APP
# - FITNESS_INPUT_CHECKPOINT_FALLBACK_MINUTES
# - FITNESS_INPUT_LOG_LEVEL
# - FITNESS_INPUT_LOG_FORMAT

[splunk]
# Management endpoint; defaults to the server_uri sent by Splunk
# management_url = "https://127.0.0.1:8089"

# App namespace that owns the stored passwords
app = "TA-GoogleFitness"

# Owner scope for the storage/passwords query
owner = "nobody"

# Request timeout in seconds
request_timeout_secs = 30

[checkpoint]
# Minutes to look back when a checkpoint file cannot be decoded
corrupt_fallback_minutes = 120

[providers.google_fitness]
api_base = "https://www.googleapis.com"
token_url = "https://oauth2.googleapis.com/token"
request_timeout_secs = 30

[providers.fitbit]
api_base = "https://api.fitbit.com"
token_url = "https://api.fitbit.com/oauth2/token"
request_timeout_secs = 30

[providers.microsoft]
api_base = "https://api.microsofthealth.net"
token_url = "https://login.microsoftonline.com/common/oauth2/v2.0/token"
request_timeout_secs = 30

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty or json (always written to stderr)
format = "pretty"
"#
    .to_string()
}
