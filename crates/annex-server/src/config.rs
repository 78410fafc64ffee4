//! Server configuration: `config.toml` plus environment overrides.
//!
//! `DB_PATH`, `ZK_VERIFYING_KEY_PATH`, and the `SERVER_POLICY_*` family
//! are read once at bootstrap; nothing re-reads the environment at
//! request time.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use annex_types::ServerPolicy;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Network and identity settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// ZK verifier settings.
    #[serde(default)]
    pub zk: ZkConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Unique short identifier of this server.
    #[serde(default = "default_slug")]
    pub slug: String,
    /// Human-readable server name.
    #[serde(default = "default_label")]
    pub label: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    8420
}

fn default_slug() -> String {
    "annex".to_string()
}

fn default_label() -> String {
    "Annex Server".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            slug: default_slug(),
            label: default_label(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "annex.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` env-filter expression.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON log lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// ZK verifier configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ZkConfig {
    /// Path to the membership verifying key (snarkjs JSON). The server
    /// refuses to start without a key matching the circuit shape.
    #[serde(default = "default_vkey_path")]
    pub verifying_key_path: String,
}

fn default_vkey_path() -> String {
    "keys/membership_vkey.json".to_string()
}

impl Default for ZkConfig {
    fn default() -> Self {
        Self {
            verifying_key_path: default_vkey_path(),
        }
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The config file is not valid TOML.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from an optional TOML file, then applies
/// environment overrides.
///
/// A missing file is not an error: defaults apply.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file exists but cannot be read or
/// parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) if Path::new(path).exists() => {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        }
        _ => Config::default(),
    };

    if let Ok(db_path) = std::env::var("DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(vkey_path) = std::env::var("ZK_VERIFYING_KEY_PATH") {
        config.zk.verifying_key_path = vkey_path;
    }

    Ok(config)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(var = name, value = raw, "ignoring unparsable policy override");
                None
            }
        },
        Err(_) => None,
    }
}

fn env_list(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
}

/// Applies `SERVER_POLICY_*` environment overrides to a policy. Used
/// only when seeding the first policy version at bootstrap.
pub fn apply_policy_env_overrides(policy: &mut ServerPolicy) {
    if let Some(v) = env_parse("SERVER_POLICY_FEDERATION_ENABLED") {
        policy.federation_enabled = v;
    }
    if let Some(v) = env_parse("SERVER_POLICY_VOICE_ENABLED") {
        policy.voice_enabled = v;
    }
    if let Some(v) = env_parse("SERVER_POLICY_DEFAULT_RETENTION_DAYS") {
        policy.default_retention_days = v;
    }
    if let Some(v) = env_parse("SERVER_POLICY_MAX_MEMBERS") {
        policy.max_members = v;
    }
    if let Some(v) = env_parse("SERVER_POLICY_REGISTRATION_LIMIT") {
        policy.rate_limit.registration_limit = v;
    }
    if let Some(v) = env_parse("SERVER_POLICY_VERIFICATION_LIMIT") {
        policy.rate_limit.verification_limit = v;
    }
    if let Some(v) = env_parse("SERVER_POLICY_DEFAULT_LIMIT") {
        policy.rate_limit.default_limit = v;
    }
    if let Some(v) = env_parse("SERVER_POLICY_REHANDSHAKE_MIN_SECONDS") {
        policy.federation_rehandshake_min_seconds = v;
    }
    if let Some(v) = env_parse("SERVER_POLICY_FEDERATION_FRESHNESS_SECONDS") {
        policy.federation_freshness_seconds = v;
    }
    if let Some(v) = env_list("SERVER_POLICY_PRINCIPLES") {
        policy.principles = v;
    }
    if let Some(v) = env_list("SERVER_POLICY_PROHIBITED_ACTIONS") {
        policy.prohibited_actions = v;
    }
}
