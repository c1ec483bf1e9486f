//! Blocking rule engine.
//!
//! Every operation comes in two forms. `foo_in` runs against a transaction
//! the caller already holds, so several operations can share one scope.
//! `foo` opens a transaction, runs `foo_in` and commits on success. A failed
//! or abandoned mutation drops its transaction, which rolls it back.
//!
//! Mutations run in [`TxMode::Write`] transactions. The store serializes
//! those, so the conflict check, insert, supersession and overlap
//! recomputation of one mutation never interleave with another.

use crate::clock::Clock;
use crate::error::ServiceError;
use crate::metrics;
use crate::net::NetworkPrefix;
use crate::rules::duration::DurationSpec;
use crate::rules::model::{
    BlockingRule, NewRule, Nullification, NullificationType, RuleId, RuleRecord, RuleType,
};
use crate::store::{RuleFilter, RuleStore, RuleTransaction, TxMode, minimum_lead_time};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Result of adding a blacklist entry.
#[derive(Debug, Clone)]
pub struct BlacklistAddition {
    pub new_entry: RuleRecord,
    /// Shorter same-address entries the new one replaced.
    pub superseded: Vec<RuleRecord>,
    /// Other active blacklist entries overlapping the address.
    pub overlapping: Vec<RuleRecord>,
}

/// Result of adding a whitelist entry.
#[derive(Debug, Clone)]
pub struct WhitelistAddition {
    pub new_entry: RuleRecord,
    pub overlapping: Vec<RuleRecord>,
}

/// Result of canceling entries.
#[derive(Debug, Clone)]
pub struct Cancellation {
    pub canceled: Vec<RuleRecord>,
    /// Active entries of the same list that still cover part of the address.
    pub overlapping: Vec<RuleRecord>,
}

/// Who asked for a mutation, and why.
#[derive(Debug, Clone, Copy)]
pub struct Actor<'a> {
    pub user: &'a str,
    pub comment: &'a str,
}

impl<'a> Actor<'a> {
    pub fn new(user: &'a str, comment: &'a str) -> Self {
        Self { user, comment }
    }

    fn comment(&self) -> Result<&'a str, ServiceError> {
        let comment = self.comment.trim();
        if comment.is_empty() {
            return Err(ServiceError::MissingComment);
        }
        Ok(comment)
    }
}

/// Rule engine over a [`RuleStore`].
#[derive(Clone)]
pub struct RuleEngine {
    store: Arc<dyn RuleStore>,
    clock: Arc<dyn Clock>,
}

impl RuleEngine {
    pub fn new(store: Arc<dyn RuleStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    async fn read(&self) -> Result<Box<dyn RuleTransaction>, ServiceError> {
        Ok(self.store.begin(TxMode::Read).await?)
    }

    async fn write(&self) -> Result<Box<dyn RuleTransaction>, ServiceError> {
        Ok(self.store.begin(TxMode::Write).await?)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Active rules of `rule_type`, oldest first.
    pub async fn list_active(&self, rule_type: RuleType) -> Result<Vec<RuleRecord>, ServiceError> {
        let mut tx = self.read().await?;
        self.list_active_in(tx.as_mut(), rule_type).await
    }

    pub async fn list_active_in(
        &self,
        tx: &mut dyn RuleTransaction,
        rule_type: RuleType,
    ) -> Result<Vec<RuleRecord>, ServiceError> {
        let now = self.clock.now();
        let rules = tx.select(&RuleFilter::active(rule_type, now)).await?;
        Ok(records(rules, now))
    }

    /// Active rules of `rule_type` overlapping `address`, except `exclude_id`.
    pub async fn list_overlapping(
        &self,
        rule_type: RuleType,
        address: NetworkPrefix,
        exclude_id: Option<RuleId>,
    ) -> Result<Vec<RuleRecord>, ServiceError> {
        let mut tx = self.read().await?;
        self.list_overlapping_in(tx.as_mut(), rule_type, address, exclude_id)
            .await
    }

    pub async fn list_overlapping_in(
        &self,
        tx: &mut dyn RuleTransaction,
        rule_type: RuleType,
        address: NetworkPrefix,
        exclude_id: Option<RuleId>,
    ) -> Result<Vec<RuleRecord>, ServiceError> {
        let now = self.clock.now();
        let filter = RuleFilter::active(rule_type, now)
            .overlapping(address)
            .excluding(exclude_id);
        let rules = tx.select(&filter).await?;
        Ok(records(rules, now))
    }

    /// Every rule ever created whose address overlaps `address`, with its
    /// current status.
    pub async fn history(&self, address: NetworkPrefix) -> Result<Vec<RuleRecord>, ServiceError> {
        let mut tx = self.read().await?;
        self.history_in(tx.as_mut(), address).await
    }

    pub async fn history_in(
        &self,
        tx: &mut dyn RuleTransaction,
        address: NetworkPrefix,
    ) -> Result<Vec<RuleRecord>, ServiceError> {
        let now = self.clock.now();
        let rules = tx.select(&RuleFilter::all().overlapping(address)).await?;
        Ok(records(rules, now))
    }

    // ------------------------------------------------------------------
    // Blacklist
    // ------------------------------------------------------------------

    pub async fn add_blacklist_entry(
        &self,
        address: NetworkPrefix,
        duration: &DurationSpec,
        actor: Actor<'_>,
    ) -> Result<BlacklistAddition, ServiceError> {
        let result = async {
            let mut tx = self.write().await?;
            let addition = self
                .add_blacklist_entry_in(tx.as_mut(), address, duration, actor)
                .await?;
            tx.commit().await?;
            Ok::<_, ServiceError>(addition)
        }
        .await;
        metrics::record_mutation("add_blacklist_entry", &result);
        result
    }

    pub async fn add_blacklist_entry_in(
        &self,
        tx: &mut dyn RuleTransaction,
        address: NetworkPrefix,
        duration: &DurationSpec,
        actor: Actor<'_>,
    ) -> Result<BlacklistAddition, ServiceError> {
        let comment = actor.comment()?;
        let now = self.clock.now();
        let expires_at = duration.resolve(now)?;
        if expires_at < now + minimum_lead_time() {
            return Err(ServiceError::EmptyDuration);
        }

        let conflicting = tx
            .select(&RuleFilter::active(RuleType::Whitelist, now).overlapping(address))
            .await?;
        if !conflicting.is_empty() {
            return Err(ServiceError::AddressCannotBeBlacklisted {
                address,
                conflicting_whitelist_entries: records(conflicting, now),
            });
        }

        // Equal expiry counts as already covered
        let existing = tx
            .select(
                &RuleFilter::active(RuleType::Blacklist, now)
                    .exact(address)
                    .expiring_at_or_after(expires_at),
            )
            .await?;
        if !existing.is_empty() {
            return Err(ServiceError::AddressAlreadyBlacklisted {
                address,
                existing_blacklist_entries: records(existing, now),
            });
        }

        let new_rule = tx
            .insert(NewRule {
                rule_type: RuleType::Blacklist,
                address,
                created_at: now,
                created_by: actor.user.to_string(),
                creation_comment: comment.to_string(),
                expires_at: Some(expires_at),
            })
            .await?;

        let superseded = tx
            .nullify(
                &RuleFilter::active(RuleType::Blacklist, now)
                    .exact(address)
                    .expiring_before(expires_at)
                    .excluding(Some(new_rule.id)),
                &Nullification {
                    at: now,
                    by: actor.user.to_string(),
                    kind: NullificationType::Superseded,
                    comment: None,
                },
            )
            .await?;

        let overlapping = self
            .list_overlapping_in(tx, RuleType::Blacklist, address, Some(new_rule.id))
            .await?;

        info!(
            address = %address,
            user = %actor.user,
            expires_at = %expires_at,
            superseded = superseded.len(),
            "Added {} to the blacklist", address
        );

        Ok(BlacklistAddition {
            new_entry: RuleRecord::at(new_rule, now),
            superseded: records(superseded, now),
            overlapping,
        })
    }

    pub async fn cancel_blacklist_entry(
        &self,
        address: NetworkPrefix,
        actor: Actor<'_>,
    ) -> Result<Cancellation, ServiceError> {
        let result = async {
            let mut tx = self.write().await?;
            let cancellation = self
                .cancel_blacklist_entry_in(tx.as_mut(), address, actor)
                .await?;
            tx.commit().await?;
            Ok::<_, ServiceError>(cancellation)
        }
        .await;
        metrics::record_mutation("cancel_blacklist_entry", &result);
        result
    }

    pub async fn cancel_blacklist_entry_in(
        &self,
        tx: &mut dyn RuleTransaction,
        address: NetworkPrefix,
        actor: Actor<'_>,
    ) -> Result<Cancellation, ServiceError> {
        let canceled = self
            .cancel_in(tx, RuleType::Blacklist, address, actor)
            .await?;
        if canceled.is_empty() {
            return Err(ServiceError::AddressNotBlacklisted { address });
        }
        self.finish_cancellation(tx, RuleType::Blacklist, address, actor, canceled)
            .await
    }

    // ------------------------------------------------------------------
    // Whitelist
    // ------------------------------------------------------------------

    pub async fn add_whitelist_entry(
        &self,
        address: NetworkPrefix,
        actor: Actor<'_>,
    ) -> Result<WhitelistAddition, ServiceError> {
        let result = async {
            let mut tx = self.write().await?;
            let addition = self
                .add_whitelist_entry_in(tx.as_mut(), address, actor)
                .await?;
            tx.commit().await?;
            Ok::<_, ServiceError>(addition)
        }
        .await;
        metrics::record_mutation("add_whitelist_entry", &result);
        result
    }

    pub async fn add_whitelist_entry_in(
        &self,
        tx: &mut dyn RuleTransaction,
        address: NetworkPrefix,
        actor: Actor<'_>,
    ) -> Result<WhitelistAddition, ServiceError> {
        let comment = actor.comment()?;
        let now = self.clock.now();

        let conflicting = tx
            .select(&RuleFilter::active(RuleType::Blacklist, now).overlapping(address))
            .await?;
        if !conflicting.is_empty() {
            return Err(ServiceError::AddressCannotBeWhitelisted {
                address,
                conflicting_blacklist_entries: records(conflicting, now),
            });
        }

        let existing = tx
            .select(&RuleFilter::active(RuleType::Whitelist, now).exact(address))
            .await?;
        if !existing.is_empty() {
            return Err(ServiceError::AddressAlreadyWhitelisted {
                address,
                existing_whitelist_entries: records(existing, now),
            });
        }

        let new_rule = tx
            .insert(NewRule {
                rule_type: RuleType::Whitelist,
                address,
                created_at: now,
                created_by: actor.user.to_string(),
                creation_comment: comment.to_string(),
                expires_at: None,
            })
            .await?;

        let overlapping = self
            .list_overlapping_in(tx, RuleType::Whitelist, address, Some(new_rule.id))
            .await?;

        info!(address = %address, user = %actor.user, "Added {} to the whitelist", address);

        Ok(WhitelistAddition {
            new_entry: RuleRecord::at(new_rule, now),
            overlapping,
        })
    }

    pub async fn cancel_whitelist_entry(
        &self,
        address: NetworkPrefix,
        actor: Actor<'_>,
    ) -> Result<Cancellation, ServiceError> {
        let result = async {
            let mut tx = self.write().await?;
            let cancellation = self
                .cancel_whitelist_entry_in(tx.as_mut(), address, actor)
                .await?;
            tx.commit().await?;
            Ok::<_, ServiceError>(cancellation)
        }
        .await;
        metrics::record_mutation("cancel_whitelist_entry", &result);
        result
    }

    pub async fn cancel_whitelist_entry_in(
        &self,
        tx: &mut dyn RuleTransaction,
        address: NetworkPrefix,
        actor: Actor<'_>,
    ) -> Result<Cancellation, ServiceError> {
        let canceled = self
            .cancel_in(tx, RuleType::Whitelist, address, actor)
            .await?;
        if canceled.is_empty() {
            return Err(ServiceError::AddressNotWhitelisted { address });
        }
        self.finish_cancellation(tx, RuleType::Whitelist, address, actor, canceled)
            .await
    }

    // ------------------------------------------------------------------
    // Shared cancellation steps
    // ------------------------------------------------------------------

    async fn cancel_in(
        &self,
        tx: &mut dyn RuleTransaction,
        rule_type: RuleType,
        address: NetworkPrefix,
        actor: Actor<'_>,
    ) -> Result<Vec<BlockingRule>, ServiceError> {
        let comment = actor.comment()?;
        let now = self.clock.now();
        let canceled = tx
            .nullify(
                &RuleFilter::active(rule_type, now).exact(address),
                &Nullification {
                    at: now,
                    by: actor.user.to_string(),
                    kind: NullificationType::Canceled,
                    comment: Some(comment.to_string()),
                },
            )
            .await?;
        Ok(canceled)
    }

    async fn finish_cancellation(
        &self,
        tx: &mut dyn RuleTransaction,
        rule_type: RuleType,
        address: NetworkPrefix,
        actor: Actor<'_>,
        canceled: Vec<BlockingRule>,
    ) -> Result<Cancellation, ServiceError> {
        let now = self.clock.now();
        let overlapping = self
            .list_overlapping_in(tx, rule_type, address, None)
            .await?;

        info!(
            address = %address,
            user = %actor.user,
            canceled = canceled.len(),
            still_in_effect = overlapping.len(),
            "Removed {} from the {}", address, list_name(rule_type)
        );

        Ok(Cancellation {
            canceled: records(canceled, now),
            overlapping,
        })
    }
}

fn records(rules: Vec<BlockingRule>, now: DateTime<Utc>) -> Vec<RuleRecord> {
    rules
        .into_iter()
        .map(|rule| RuleRecord::at(rule, now))
        .collect()
}

fn list_name(rule_type: RuleType) -> &'static str {
    match rule_type {
        RuleType::Blacklist => "blacklist",
        RuleType::Whitelist => "whitelist",
    }
}
