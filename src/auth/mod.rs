//! Authentication and authorization.
//!
//! - [`roles`]: roles and their implication graph
//! - [`source`]: directory collaborators ([`RoleSource`])
//! - [`cache`]: TTL cache of closed role sets
//! - [`password`]: Argon2 helpers
//!
//! [`Authorizer`] ties them together. Handlers call
//! [`Authorizer::check_authorization`] first thing, naming the role they
//! need and whether the request targets a whole network.

pub mod cache;
pub mod password;
pub mod roles;
pub mod source;

pub use cache::AuthorizationCache;
pub use roles::{ImplicationGraph, Role};
pub use source::{RoleSource, RoleSourceError, StaticRoleSource};

use crate::clock::Clock;
use crate::error::ServiceError;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info};

/// User name and secret presented with a request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Role-based access checks for handlers.
pub struct Authorizer {
    cache: AuthorizationCache,
    graph: Arc<ImplicationGraph>,
    skip_permission_checks: bool,
}

impl Authorizer {
    pub fn new(
        source: Arc<dyn RoleSource>,
        graph: ImplicationGraph,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        let graph = Arc::new(graph);
        Self {
            cache: AuthorizationCache::new(source, Arc::clone(&graph), clock, ttl),
            graph,
            skip_permission_checks: false,
        }
    }

    /// Let every logged-in user through without a role lookup.
    pub fn skip_permission_checks(mut self, skip: bool) -> Self {
        self.skip_permission_checks = skip;
        self
    }

    /// The role actually required for `role` at the given scope.
    ///
    /// Network-wide requests need `network-<role>` when such a role exists.
    pub fn effective_role(&self, role: &str, network_scope: bool) -> Role {
        let role = Role::new(role);
        if network_scope {
            let network = role.network_variant();
            if self.graph.is_known(network.as_str()) {
                return network;
            }
        }
        role
    }

    /// Succeeds iff the credentials carry `required` (or its network variant
    /// when `network_scope` is set). Returns the authenticated user name.
    pub async fn check_authorization(
        &self,
        credentials: Option<&Credentials>,
        required: &str,
        network_scope: bool,
    ) -> Result<String, ServiceError> {
        let role = self.effective_role(required, network_scope);

        let Some(credentials) = credentials.filter(|c| !c.user.is_empty()) else {
            info!(role = %role, "Denied access: not logged in");
            return Err(ServiceError::NotLoggedIn);
        };

        if self.skip_permission_checks {
            debug!(user = %credentials.user, role = %role, "Skipped permission check");
            return Ok(credentials.user.clone());
        }

        let roles = match self
            .cache
            .resolve(&credentials.user, &credentials.secret)
            .await
        {
            Ok(roles) => roles,
            Err(RoleSourceError::BadCredentials) => {
                info!(user = %credentials.user, "Denied access: bad credentials");
                return Err(ServiceError::BadCredentials);
            }
            Err(e) => return Err(e.into()),
        };

        if roles.contains(&role) {
            info!(user = %credentials.user, role = %role, "Allowed access");
            Ok(credentials.user.clone())
        } else {
            info!(user = %credentials.user, role = %role, "Denied access: missing role");
            Err(ServiceError::InsufficientRights {
                user_name: credentials.user.clone(),
                role: role.to_string(),
            })
        }
    }
}
