//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (exchange credentials) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use crate::calibration::CalibrationConfig;
use crate::engine::retry::RetryConfig;
use crate::odds::NormalizerConfig;
use crate::strategy::StakingConfig;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    pub staking: StakingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub cycle_interval_secs: u64,
    /// Run the whole pipeline but never place orders.
    #[serde(default)]
    pub dry_run: bool,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Emit JSON log lines. `DUTCHER_LOG_JSON` forces this on.
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_filter() -> String {
    "dutcher=info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    pub app_key_env: String,
    pub username_env: String,
    pub password_env: String,
    /// Empty means horse and greyhound racing.
    #[serde(default)]
    pub event_type_ids: Vec<String>,
    #[serde(default = "default_lookback_mins")]
    pub lookback_mins: i64,
    #[serde(default = "default_lookahead_mins")]
    pub lookahead_mins: i64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_lookback_mins() -> i64 {
    10
}

fn default_lookahead_mins() -> i64 {
    30
}

fn default_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// sqlx connection URL, e.g. `sqlite://dutcher.db`.
    pub database_url: String,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
