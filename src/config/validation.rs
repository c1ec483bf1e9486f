//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use crate::rules::duration::Interval;
use argon2::PasswordHash;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("authorization.cache_ttl_secs must be greater than zero")]
    ZeroCacheTtl,
    #[error("authorization.role_path_template must contain {{role}}, got '{0}'")]
    RolePathTemplate(String),
    #[error("blacklist.default_duration is not a valid interval: '{0}'")]
    DefaultDuration(String),
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
    #[error("users: duplicate user name '{0}'")]
    DuplicateUser(String),
    #[error("users: '{0}' has no roles")]
    UserWithoutRoles(String),
    #[error("users: '{0}' has a malformed password_hash")]
    MalformedPasswordHash(String),
    #[error("users: '{user}' has unknown role '{role}'")]
    UnknownRole { user: String, role: String },
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let auth = &config.authorization;
    if auth.cache_ttl_secs == 0 {
        errors.push(ValidationError::ZeroCacheTtl);
    }
    if !auth.role_path_template.contains("{role}") {
        errors.push(ValidationError::RolePathTemplate(auth.role_path_template.clone()));
    }

    if Interval::parse(&config.blacklist.default_duration).is_err() {
        errors.push(ValidationError::DefaultDuration(
            config.blacklist.default_duration.clone(),
        ));
    }

    // Database path validation
    let db_path = Path::new(&config.database.path);
    if config.database.path != ":memory:"
        && let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        errors.push(ValidationError::DatabasePathInvalid(config.database.path.clone()));
    }

    let graph = auth.implication_graph();
    let mut seen = HashSet::new();
    for user in &config.users {
        if !seen.insert(user.name.as_str()) {
            errors.push(ValidationError::DuplicateUser(user.name.clone()));
        }
        if user.roles.is_empty() {
            errors.push(ValidationError::UserWithoutRoles(user.name.clone()));
        }
        if PasswordHash::new(&user.password_hash).is_err() {
            errors.push(ValidationError::MalformedPasswordHash(user.name.clone()));
        }
        for role in &user.roles {
            if !graph.is_known(role) {
                errors.push(ValidationError::UnknownRole {
                    user: user.name.clone(),
                    role: role.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::hash_password;
    use crate::config::ConfigError;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.listen.to_string(), "127.0.0.1:5000");
        assert_eq!(config.database.path, "blockip.db");
        assert_eq!(config.authorization.cache_ttl_secs, 600);
        assert_eq!(config.blacklist.default_duration, "8 hours");
        assert!(!config.authorization.skip_permission_checks);
    }

    #[test]
    fn test_valid_users_pass() {
        let toml = format!(
            r#"
[authorization]
role_path_template = "cn={{role}},ou=blockip"

[[users]]
name = "alice"
password_hash = "{}"
roles = ["network-blacklister", "history-reader"]
"#,
            hash_password("pw").unwrap()
        );
        let config = Config::parse(&toml).unwrap();
        assert_eq!(config.users.len(), 1);
        assert_eq!(config.authorization.role_path("reader"), "cn=reader,ou=blockip");
    }

    #[test]
    fn test_collects_every_error() {
        let toml = r#"
[authorization]
cache_ttl_secs = 0

[blacklist]
default_duration = "forever"

[[users]]
name = "bob"
password_hash = "plaintext"
roles = ["superuser"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::ZeroCacheTtl)));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::DefaultDuration(_))));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::MalformedPasswordHash(_))));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownRole { .. })));

        assert!(matches!(Config::parse(toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_custom_implication_graph() {
        let toml = r#"
[authorization.implied_roles]
admin = ["reader", "blacklister"]
"#;
        let config = Config::parse(toml).unwrap();
        let graph = config.authorization.implication_graph();
        assert!(graph.is_known("admin"));
        assert!(!graph.is_known("whitelister"));
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = Config::parse(include_str!("../../blockip.example.toml")).unwrap();
        assert_eq!(config.users[0].name, "alice");
        assert!(config.server.metrics_port.is_none());
    }

    #[test]
    fn test_bad_log_format_is_a_parse_error() {
        let err = Config::parse("[logging]\nformat = \"xml\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
