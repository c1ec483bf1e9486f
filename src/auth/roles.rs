//! Roles and the implication graph.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// An opaque permission name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The network-wide variant of this role (`network-<name>`).
    pub fn network_variant(&self) -> Role {
        Role(format!("network-{}", self.0))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Role {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Role {
    fn from(name: &str) -> Self {
        Role::new(name)
    }
}

pub const READER: &str = "reader";
pub const HISTORY_READER: &str = "history-reader";
pub const BLACKLISTER: &str = "blacklister";
pub const UNBLACKLISTER: &str = "unblacklister";
pub const WHITELISTER: &str = "whitelister";
pub const UNWHITELISTER: &str = "unwhitelister";

/// Roles that change a list; each has a `network-` variant.
const MUTATING_ROLES: [&str; 4] = [BLACKLISTER, UNBLACKLISTER, WHITELISTER, UNWHITELISTER];

/// Static role → directly implied roles mapping, plus the set of known roles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImplicationGraph {
    known: HashSet<Role>,
    implied: HashMap<Role, HashSet<Role>>,
}

impl ImplicationGraph {
    /// A graph from explicit edges. Every role named on either side is known.
    pub fn from_edges<I, R, J>(edges: I) -> Self
    where
        I: IntoIterator<Item = (R, J)>,
        R: Into<Role>,
        J: IntoIterator<Item = R>,
    {
        let mut graph = Self::default();
        for (role, implied) in edges {
            let role = role.into();
            let targets = graph.implied.entry(role.clone()).or_default();
            for target in implied {
                let target = target.into();
                graph.known.insert(target.clone());
                targets.insert(target);
            }
            graph.known.insert(role);
        }
        graph
    }

    /// The built-in graph: every list mutator implies `reader`, every
    /// `network-X` implies `X`.
    pub fn builtin() -> Self {
        let mut edges: Vec<(Role, Vec<Role>)> = vec![
            (Role::new(READER), vec![]),
            (Role::new(HISTORY_READER), vec![]),
        ];
        for name in MUTATING_ROLES {
            let role = Role::new(name);
            edges.push((role.network_variant(), vec![role.clone(), Role::new(READER)]));
            edges.push((role, vec![Role::new(READER)]));
        }
        Self::from_edges(edges)
    }

    pub fn is_known(&self, role: &str) -> bool {
        self.known.contains(role)
    }

    /// Expand `roles` with every role they imply, directly or transitively.
    ///
    /// Breadth-first; a role already in the result is never enqueued again,
    /// so cycles terminate.
    pub fn close<I>(&self, roles: I) -> HashSet<Role>
    where
        I: IntoIterator<Item = Role>,
    {
        let mut result = HashSet::new();
        let mut queue = VecDeque::new();

        for role in roles {
            if result.insert(role.clone()) {
                queue.push_back(role);
            }
        }

        while let Some(role) = queue.pop_front() {
            let Some(implied) = self.implied.get(&role) else {
                continue;
            };
            for next in implied {
                if result.insert(next.clone()) {
                    queue.push_back(next.clone());
                }
            }
        }

        result
    }
}
