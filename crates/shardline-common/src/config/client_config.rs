//! Client configuration structs
//!
//! Loads configuration from environment variables or from a config file with
//! environment overrides.

use serde::Deserialize;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub app: AppSettings,
    /// Bot token, without the `Bot ` prefix
    pub token: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub shards: ShardConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub rest: RestConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default)]
    pub env: Environment,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            env: Environment::default(),
        }
    }
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            "development" => Ok(Self::Development),
            other => Err(format!("unknown environment `{other}`")),
        }
    }
}

/// Gateway connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Fixed gateway URL; resolved through `GET /gateway/bot` when absent
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_version")]
    pub version: u8,
    /// Member count above which guilds arrive without a full member list
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u16,
    #[serde(default = "default_intents")]
    pub intents: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            version: default_api_version(),
            large_threshold: default_large_threshold(),
            intents: default_intents(),
        }
    }
}

/// Sharding settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShardConfig {
    /// Total shard count; the recommended count is used when absent
    #[serde(default)]
    pub count: Option<u32>,
}

/// Reconnect and session pacing settings
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    /// Spacing between fresh identifies across shards
    #[serde(default = "default_identify_delay")]
    pub identify_delay_secs: u64,
    /// Reconnect when a heartbeat is still unacknowledged at the next beat
    #[serde(default = "default_true")]
    pub heartbeat_watchdog: bool,
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }

    pub fn identify_delay(&self) -> Duration {
        Duration::from_secs(self.identify_delay_secs)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
            identify_delay_secs: default_identify_delay(),
            heartbeat_watchdog: true,
        }
    }
}

/// REST client settings
#[derive(Debug, Clone, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_rest_url")]
    pub base_url: String,
    /// Maximum concurrent in-flight HTTP requests
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Automatic retries of a request answered with 429
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,
}

impl RestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: default_rest_url(),
            pool_size: default_pool_size(),
            timeout_secs: default_timeout(),
            rate_limit_retries: default_rate_limit_retries(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "shardline".to_string()
}

fn default_true() -> bool {
    true
}

fn default_api_version() -> u8 {
    10
}

fn default_large_threshold() -> u16 {
    250
}

fn default_intents() -> u64 {
    // GUILDS | GUILD_MEMBERS
    0b11
}

fn default_base_delay() -> u64 {
    2
}

fn default_max_delay() -> u64 {
    900 // 15 minutes
}

fn default_identify_delay() -> u64 {
    5
}

fn default_rest_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_pool_size() -> usize {
    5
}

fn default_timeout() -> u64 {
    30
}

fn default_rate_limit_retries() -> u32 {
    1
}

impl ClientConfig {
    /// Create a configuration with defaults for everything but the token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            app: AppSettings::default(),
            token: token.into(),
            gateway: GatewayConfig::default(),
            shards: ShardConfig::default(),
            reconnect: ReconnectConfig::default(),
            rest: RestConfig::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `SHARDLINE_TOKEN` is missing or a value does not parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from a file, with `SHARDLINE__*` environment
    /// variables overriding file values (`SHARDLINE__REST__POOL_SIZE=8`)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("SHARDLINE").separator("__"))
            .build()?
            .try_deserialize()
            .map_err(ConfigError::from)
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            app: AppSettings {
                name: get("APP_NAME").unwrap_or_else(default_app_name),
                env: parse_or("APP_ENV", get("APP_ENV"), Environment::default())?,
            },
            token: get("SHARDLINE_TOKEN").ok_or(ConfigError::MissingVar("SHARDLINE_TOKEN"))?,
            gateway: GatewayConfig {
                url: get("SHARDLINE_GATEWAY_URL"),
                version: parse_or(
                    "SHARDLINE_API_VERSION",
                    get("SHARDLINE_API_VERSION"),
                    default_api_version(),
                )?,
                large_threshold: parse_or(
                    "SHARDLINE_LARGE_THRESHOLD",
                    get("SHARDLINE_LARGE_THRESHOLD"),
                    default_large_threshold(),
                )?,
                intents: parse_or(
                    "SHARDLINE_INTENTS",
                    get("SHARDLINE_INTENTS"),
                    default_intents(),
                )?,
            },
            shards: ShardConfig {
                count: get("SHARDLINE_SHARD_COUNT")
                    .map(|v| parse_value("SHARDLINE_SHARD_COUNT", &v))
                    .transpose()?,
            },
            reconnect: ReconnectConfig {
                auto_reconnect: parse_or(
                    "SHARDLINE_AUTO_RECONNECT",
                    get("SHARDLINE_AUTO_RECONNECT"),
                    true,
                )?,
                base_delay_secs: parse_or(
                    "SHARDLINE_RECONNECT_BASE_SECS",
                    get("SHARDLINE_RECONNECT_BASE_SECS"),
                    default_base_delay(),
                )?,
                max_delay_secs: parse_or(
                    "SHARDLINE_RECONNECT_MAX_SECS",
                    get("SHARDLINE_RECONNECT_MAX_SECS"),
                    default_max_delay(),
                )?,
                identify_delay_secs: parse_or(
                    "SHARDLINE_IDENTIFY_DELAY_SECS",
                    get("SHARDLINE_IDENTIFY_DELAY_SECS"),
                    default_identify_delay(),
                )?,
                heartbeat_watchdog: parse_or(
                    "SHARDLINE_HEARTBEAT_WATCHDOG",
                    get("SHARDLINE_HEARTBEAT_WATCHDOG"),
                    true,
                )?,
            },
            rest: RestConfig {
                base_url: get("SHARDLINE_REST_URL").unwrap_or_else(default_rest_url),
                pool_size: parse_or(
                    "SHARDLINE_REST_POOL_SIZE",
                    get("SHARDLINE_REST_POOL_SIZE"),
                    default_pool_size(),
                )?,
                timeout_secs: parse_or(
                    "SHARDLINE_REST_TIMEOUT_SECS",
                    get("SHARDLINE_REST_TIMEOUT_SECS"),
                    default_timeout(),
                )?,
                rate_limit_retries: parse_or(
                    "SHARDLINE_RATE_LIMIT_RETRIES",
                    get("SHARDLINE_RATE_LIMIT_RETRIES"),
                    default_rate_limit_retries(),
                )?,
            },
        })
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key, value.to_string()))
}

fn parse_or<T: FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    value.map_or(Ok(default), |v| parse_value(key, &v))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),

    #[error("Configuration source error: {0}")]
    Source(#[from] config::ConfigError),
}
