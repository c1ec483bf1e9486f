//! Read-through authorization cache.
//!
//! Maps `(user name, secret)` to the user's closed role set. Entries live for
//! a fixed TTL measured with the injected [`Clock`]; freshness is checked on
//! every lookup. Each key has its own async slot, so a slow directory lookup
//! only blocks callers presenting the same credentials. Secrets are kept as
//! SHA-256 digests, never in clear. Stale slots are pruned on a miss, at
//! most once per TTL.

use super::roles::{ImplicationGraph, Role};
use super::source::{RoleSource, RoleSourceError};
use crate::clock::Clock;
use crate::metrics;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Default entry lifetime.
pub const DEFAULT_TTL_SECS: u64 = 600;

type CacheKey = (String, [u8; 32]);

#[derive(Debug)]
struct CacheEntry {
    roles: Arc<HashSet<Role>>,
    created_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.created_at
            .checked_add_signed(ttl)
            .is_none_or(|end| now < end)
    }
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

pub struct AuthorizationCache {
    source: Arc<dyn RoleSource>,
    graph: Arc<ImplicationGraph>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entries: DashMap<CacheKey, Slot>,
    last_prune: SyncMutex<DateTime<Utc>>,
}

impl AuthorizationCache {
    pub fn new(
        source: Arc<dyn RoleSource>,
        graph: Arc<ImplicationGraph>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            source,
            graph,
            last_prune: SyncMutex::new(clock.now()),
            clock,
            ttl,
            entries: DashMap::new(),
        }
    }

    fn key(user: &str, secret: &str) -> CacheKey {
        (user.to_string(), Sha256::digest(secret.as_bytes()).into())
    }

    /// Closed role set for the credentials, from cache when fresh.
    pub async fn resolve(
        &self,
        user: &str,
        secret: &str,
    ) -> Result<Arc<HashSet<Role>>, RoleSourceError> {
        let key = Self::key(user, secret);
        // Clone the slot out so the map shard is not held across the await
        let slot: Slot = self.entries.entry(key.clone()).or_default().clone();
        let mut entry = slot.lock().await;

        if let Some(cached) = (*entry).as_ref()
            && cached.is_fresh(self.ttl, self.clock.now())
        {
            debug!(user = %user, "Authorization cache hit");
            metrics::record_cache_lookup(true);
            return Ok(Arc::clone(&cached.roles));
        }

        metrics::record_cache_lookup(false);
        *entry = None;
        self.prune_stale();

        match self.source.fetch_roles(user, secret).await {
            Ok(raw) => {
                let roles = Arc::new(self.graph.close(raw));
                *entry = Some(CacheEntry {
                    roles: Arc::clone(&roles),
                    created_at: self.clock.now(),
                });
                Ok(roles)
            }
            Err(e) => {
                drop(entry);
                // Don't keep empty slots around for rejected credentials
                self.entries.remove_if(&key, |_, s| {
                    Arc::ptr_eq(s, &slot) && s.try_lock().is_ok_and(|g| g.is_none())
                });
                Err(e)
            }
        }
    }

    /// Drop slots whose entry has expired. Slots being filled are kept.
    fn prune_stale(&self) {
        let now = self.clock.now();
        {
            let mut last = self.last_prune.lock();
            if last.checked_add_signed(self.ttl).is_some_and(|next| now < next) {
                return;
            }
            *last = now;
        }
        let before = self.entries.len();
        self.entries.retain(|_, slot| {
            slot.try_lock()
                .map_or(true, |g| (*g).as_ref().is_none_or(|e| e.is_fresh(self.ttl, now)))
        });
        debug!(pruned = before.saturating_sub(self.entries.len()), "Pruned authorization cache");
    }

    /// Forget the entry for one credential pair.
    pub fn invalidate(&self, user: &str, secret: &str) {
        self.entries.remove(&Self::key(user, secret));
    }

    /// Forget every entry.
    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    /// Number of keys currently held (fresh or stale).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
