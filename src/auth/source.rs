//! Directory collaborators that turn credentials into raw role sets.

use super::password::{hash_password, verify_password_str};
use super::roles::Role;
use crate::config::UserConfig;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleSourceError {
    #[error("bad credentials")]
    BadCredentials,
    #[error("role source unavailable: {0}")]
    Unavailable(String),
}

/// Looks up the roles directly assigned to a user.
///
/// Implementations may block on network I/O. Returned roles are not yet
/// closed under implication.
#[async_trait]
pub trait RoleSource: Send + Sync {
    async fn fetch_roles(&self, user: &str, secret: &str) -> Result<HashSet<Role>, RoleSourceError>;
}

#[derive(Debug, Clone)]
struct StaticUser {
    password_hash: String,
    roles: HashSet<Role>,
}

/// Config-backed directory: users with Argon2 password hashes.
#[derive(Debug, Clone)]
pub struct StaticRoleSource {
    users: Arc<HashMap<String, StaticUser>>,
    /// Verified for unknown users so they cost the same as wrong passwords.
    dummy_hash: Arc<str>,
}

impl StaticRoleSource {
    pub fn new(users: &[UserConfig]) -> Result<Self, argon2::password_hash::Error> {
        let users = users
            .iter()
            .map(|u| {
                let user = StaticUser {
                    password_hash: u.password_hash.clone(),
                    roles: u.roles.iter().map(|r| Role::new(r.as_str())).collect(),
                };
                (u.name.clone(), user)
            })
            .collect();

        Ok(Self {
            users: Arc::new(users),
            dummy_hash: hash_password("blockip-dummy-password")?.into(),
        })
    }
}

#[async_trait]
impl RoleSource for StaticRoleSource {
    async fn fetch_roles(&self, user: &str, secret: &str) -> Result<HashSet<Role>, RoleSourceError> {
        let entry = self.users.get(user).cloned();
        let hash = match &entry {
            Some(u) => u.password_hash.clone(),
            None => self.dummy_hash.to_string(),
        };
        let secret = secret.to_string();

        // Argon2 verification is CPU-bound
        let verified = tokio::task::spawn_blocking(move || verify_password_str(&secret, &hash))
            .await
            .map_err(|e| RoleSourceError::Unavailable(e.to_string()))?
            .map_err(|e| RoleSourceError::Unavailable(format!("stored password hash: {e}")))?;

        match entry {
            Some(u) if verified => {
                debug!(user = %user, roles = u.roles.len(), "Credentials verified");
                Ok(u.roles)
            }
            _ => Err(RoleSourceError::BadCredentials),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> StaticRoleSource {
        StaticRoleSource::new(&[UserConfig {
            name: "alice".into(),
            password_hash: hash_password("wonderland").unwrap(),
            roles: vec!["blacklister".into()],
        }])
        .unwrap()
    }

    #[tokio::test]
    async fn valid_credentials_return_raw_roles() {
        let roles = source().fetch_roles("alice", "wonderland").await.unwrap();
        assert_eq!(roles, HashSet::from([Role::new("blacklister")]));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_are_bad_credentials() {
        let source = source();
        assert_eq!(
            source.fetch_roles("alice", "looking-glass").await,
            Err(RoleSourceError::BadCredentials)
        );
        assert_eq!(
            source.fetch_roles("mallory", "wonderland").await,
            Err(RoleSourceError::BadCredentials)
        );
    }
}
