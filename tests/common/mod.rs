//! Shared fixtures for integration tests.
//!
//! Every engine scenario runs against each store backend: the in-memory
//! store, a `:memory:` SQLite database and an on-disk SQLite file.

#![allow(dead_code)]

use blockip::clock::ManualClock;
use blockip::db::SqliteRuleStore;
use blockip::net::NetworkPrefix;
use blockip::rules::RuleEngine;
use blockip::store::{MemoryRuleStore, RuleStore};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

/// A rule engine over one backend, with a clock the test controls.
pub struct Backend {
    pub name: &'static str,
    pub engine: RuleEngine,
    pub clock: Arc<ManualClock>,
    // Keeps the database file alive for the on-disk backend.
    _dir: Option<TempDir>,
}

pub fn start_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
    ))
}

fn backend(
    name: &'static str,
    store: Arc<dyn RuleStore>,
    dir: Option<TempDir>,
) -> Backend {
    let clock = start_clock();
    Backend {
        name,
        engine: RuleEngine::new(store, clock.clone()),
        clock,
        _dir: dir,
    }
}

/// One backend of each kind.
pub async fn backends() -> Vec<Backend> {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("blockip.db");
    let file_store = SqliteRuleStore::connect(path.to_str().expect("utf-8 path"))
        .await
        .expect("open sqlite file");
    let memory_sqlite = SqliteRuleStore::connect(":memory:")
        .await
        .expect("open sqlite memory");

    vec![
        backend("memory", Arc::new(MemoryRuleStore::new()), None),
        backend("sqlite-memory", Arc::new(memory_sqlite), None),
        backend("sqlite-file", Arc::new(file_store), Some(dir)),
    ]
}

pub fn net(text: &str) -> NetworkPrefix {
    NetworkPrefix::parse_strict(text).expect("valid prefix")
}
