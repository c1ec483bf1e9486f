//! blockip - shared registry of IP blacklist and whitelist decisions.
//!
//! Operators add and cancel rules through an HTTP API; enforcement points
//! poll the active lists. Every rule is kept forever so the history of an
//! address can be reconstructed.
//!
//! Layering, bottom up:
//!
//! - [`net`], [`clock`]: address and time primitives
//! - [`store`], [`db`]: transactional rule storage (in-memory and SQLite)
//! - [`rules`]: duration parsing and the rule engine
//! - [`auth`]: role sources, role closure and the authorization cache
//! - [`http`]: the API surface

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod metrics;
pub mod net;
pub mod rules;
pub mod store;
