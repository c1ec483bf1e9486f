//! Configuration loading and management.
//!
//! - [`types`]: config struct definitions and defaults
//! - [`validation`]: startup checks run by [`Config::load`]

mod types;
mod validation;

pub use types::{
    AuthorizationConfig, BlacklistConfig, Config, ConfigError, DatabaseConfig, LogFormat,
    LoggingConfig, ServerConfig, UserConfig,
};
pub use validation::{ValidationError, validate};
