//! Application configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file when present).

use serde::Deserialize;
use std::env;
use switchboard_core::Intents;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app: AppSettings,
    pub bot: BotConfig,
    pub sharding: ShardingConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
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

/// Bot credentials and subscription settings
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub token: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub intents: Intents,
    /// Dispatch event names that are never forwarded
    #[serde(default)]
    pub ignore_events: Vec<String>,
}

/// Shard topology and identify throttling
#[derive(Debug, Clone, Deserialize)]
pub struct ShardingConfig {
    /// Explicit shard IDs to run locally; empty means "all shards"
    #[serde(default)]
    pub shard_ids: Vec<u32>,
    /// Total shard count; `None` uses the server recommendation
    #[serde(default)]
    pub shard_count: Option<u32>,
    /// Minimum delay between two identifies, in milliseconds
    #[serde(default = "default_shard_rate_limit_ms")]
    pub shard_rate_limit_ms: u64,
    /// Maximum identifies per rolling 24 hours
    #[serde(default = "default_identify_daily_limit")]
    pub identify_daily_limit: usize,
    /// Redistribute shards automatically when the server requires it
    #[serde(default = "default_auto_rescale")]
    pub auto_rescale: bool,
}

// Default value functions
fn default_app_name() -> String {
    "switchboard".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_api_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_shard_rate_limit_ms() -> u64 {
    5_000
}

fn default_identify_daily_limit() -> usize {
    1_000
}

fn default_auto_rescale() -> bool {
    true
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing or malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("BOT_TOKEN")
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingVar("BOT_TOKEN"))?;

        let intents = match lookup("GATEWAY_INTENTS") {
            Some(raw) => Intents::parse(&raw)
                .map_err(|e| ConfigError::InvalidValue("GATEWAY_INTENTS", e.to_string()))?,
            None => Intents::default(),
        };

        let shard_ids = match lookup("SHARD_IDS") {
            Some(raw) => parse_list(&raw)
                .iter()
                .map(|s| {
                    s.parse::<u32>()
                        .map_err(|_| ConfigError::InvalidValue("SHARD_IDS", s.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let shard_count = lookup("SHARD_COUNT")
            .map(|s| {
                s.parse::<u32>()
                    .map_err(|_| ConfigError::InvalidValue("SHARD_COUNT", s))
            })
            .transpose()?;

        if let Some(count) = shard_count {
            if let Some(id) = shard_ids.iter().find(|id| **id >= count) {
                return Err(ConfigError::InvalidValue(
                    "SHARD_IDS",
                    format!("shard {id} is out of range for SHARD_COUNT={count}"),
                ));
            }
        }

        Ok(Self {
            app: AppSettings {
                name: lookup("APP_NAME").unwrap_or_else(default_app_name),
                env: lookup("APP_ENV")
                    .and_then(|s| match s.to_lowercase().as_str() {
                        "production" => Some(Environment::Production),
                        "staging" => Some(Environment::Staging),
                        "development" => Some(Environment::Development),
                        _ => None,
                    })
                    .unwrap_or_default(),
            },
            bot: BotConfig {
                token,
                api_base_url: lookup("API_BASE_URL").unwrap_or_else(default_api_base_url),
                intents,
                ignore_events: lookup("IGNORE_EVENTS")
                    .map(|s| parse_list(&s).into_iter().map(|e| e.to_uppercase()).collect())
                    .unwrap_or_default(),
            },
            sharding: ShardingConfig {
                shard_ids,
                shard_count,
                shard_rate_limit_ms: lookup("SHARD_RATE_LIMIT_MS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(default_shard_rate_limit_ms),
                identify_daily_limit: lookup("IDENTIFY_DAILY_LIMIT")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(default_identify_daily_limit),
                auto_rescale: lookup("AUTO_RESCALE")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(default_auto_rescale),
            },
        })
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
