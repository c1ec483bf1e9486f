//! Core configuration types and loading.

use crate::auth::ImplicationGraph;
use crate::auth::cache::DEFAULT_TTL_SECS;
use crate::rules::duration::DEFAULT_BLACKLIST_DURATION;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub authorization: AuthorizationConfig,
    #[serde(default)]
    pub blacklist: BlacklistConfig,
    /// Directory for the built-in role source.
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        super::validate(&config).map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            ConfigError::Invalid(messages.join("; "))
        })?;
        Ok(config)
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the API listens on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// When set, Prometheus metrics are served on this port.
    pub metrics_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            metrics_port: None,
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file, or `:memory:`.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "blockip.db".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Authorization configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationConfig {
    /// Lifetime of cached role sets.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Accept any logged-in user without looking at roles. Development only.
    #[serde(default)]
    pub skip_permission_checks: bool,
    /// How a missing role is named in the 403 message, e.g.
    /// `cn={role},ou=blockip,dc=example,dc=org`.
    #[serde(default = "default_role_path_template")]
    pub role_path_template: String,
    /// Extra hint appended to the 403 message.
    pub missing_role_solution: Option<String>,
    /// Replaces the built-in role implication graph when present.
    pub implied_roles: Option<BTreeMap<String, Vec<String>>>,
}

impl AuthorizationConfig {
    pub fn cache_ttl(&self) -> chrono::Duration {
        i64::try_from(self.cache_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Role implication graph in effect.
    pub fn implication_graph(&self) -> ImplicationGraph {
        match &self.implied_roles {
            Some(edges) => ImplicationGraph::from_edges(
                edges
                    .iter()
                    .map(|(role, implied)| (role.as_str(), implied.iter().map(String::as_str))),
            ),
            None => ImplicationGraph::builtin(),
        }
    }

    /// Name of `role` as shown to users.
    pub fn role_path(&self, role: &str) -> String {
        self.role_path_template.replace("{role}", role)
    }
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            skip_permission_checks: false,
            role_path_template: default_role_path_template(),
            missing_role_solution: None,
            implied_roles: None,
        }
    }
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}

fn default_role_path_template() -> String {
    "{role}".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlacklistConfig {
    /// `for` value used when a request names neither `for` nor `until`.
    #[serde(default = "default_duration")]
    pub default_duration: String,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            default_duration: default_duration(),
        }
    }
}

fn default_duration() -> String {
    DEFAULT_BLACKLIST_DURATION.to_string()
}

/// A user of the built-in directory.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub name: String,
    /// Argon2 PHC string (`blockipd hash-password` prints one).
    pub password_hash: String,
    #[serde(default)]
    pub roles: Vec<String>,
}
