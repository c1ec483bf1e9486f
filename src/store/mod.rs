//! Rule storage abstraction.
//!
//! The rule engine only needs three primitives from storage, all executed
//! inside a caller-controlled transaction:
//!
//! - **insert** a new rule and get it back with its assigned id
//! - **nullify** every still-open rule matching a [`RuleFilter`]
//! - **select** rules matching a [`RuleFilter`], ordered by creation
//!
//! Two implementations exist: [`MemoryRuleStore`] (embedded, used by tests)
//! and [`crate::db::SqliteRuleStore`] (persistent).
//!
//! # Isolation
//!
//! A [`TxMode::Write`] transaction excludes every other write transaction
//! from the moment it begins until it commits or is dropped. The engine runs
//! its whole check-insert-supersede sequence inside one, so two concurrent
//! mutations can never both pass a conflict check. Dropping a transaction
//! without committing discards its changes.

mod memory;

pub use memory::MemoryRuleStore;

use crate::net::NetworkPrefix;
use crate::rules::model::{BlockingRule, NewRule, Nullification, RuleId, RuleType};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    /// The rule would end less than [`minimum_lead_time`] after creation.
    #[error("rule ends too soon after its creation")]
    EmptyDuration,
    #[error("whitelist entries cannot expire")]
    ExpiringWhitelist,
    #[error("corrupt rule row {id}: {reason}")]
    CorruptRow { id: RuleId, reason: String },
    #[error("transaction already finished")]
    TransactionFinished,
    #[error("read-only transaction cannot {0}")]
    ReadOnly(&'static str),
}

/// Shortest lifetime a time-bounded rule may have.
pub fn minimum_lead_time() -> Duration {
    Duration::minutes(1)
}

/// Check the insert-time invariants every store enforces.
pub fn validate_new_rule(rule: &NewRule) -> Result<(), StoreError> {
    match (rule.rule_type, rule.expires_at) {
        (RuleType::Whitelist, Some(_)) => Err(StoreError::ExpiringWhitelist),
        (_, Some(end)) if end < rule.created_at + minimum_lead_time() => {
            Err(StoreError::EmptyDuration)
        }
        _ => Ok(()),
    }
}

/// Transaction flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Consistent reads; never blocks writers for long.
    Read,
    /// Exclusive writer for the lifetime of the transaction.
    Write,
}

/// Address predicate of a [`RuleFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMatch {
    /// Rule address equals this prefix.
    Exact(NetworkPrefix),
    /// Rule address contains or is contained in this prefix.
    Overlapping(NetworkPrefix),
}

impl AddressMatch {
    pub fn matches(&self, address: &NetworkPrefix) -> bool {
        match self {
            AddressMatch::Exact(prefix) => prefix == address,
            AddressMatch::Overlapping(prefix) => prefix.overlaps(address),
        }
    }
}

/// Expiry predicate of a [`RuleFilter`]. Rules without expiry count as
/// never ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryBound {
    /// `expires_at < t`
    Before(DateTime<Utc>),
    /// `expires_at >= t` (or no expiry)
    AtOrAfter(DateTime<Utc>),
}

/// Row filter. Unset fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleFilter {
    pub rule_type: Option<RuleType>,
    pub address: Option<AddressMatch>,
    /// Only rules that are active at this instant.
    pub active_at: Option<DateTime<Utc>>,
    pub expiry: Option<ExpiryBound>,
    pub exclude_id: Option<RuleId>,
}

impl RuleFilter {
    /// Rules of `rule_type` active at `now`.
    pub fn active(rule_type: RuleType, now: DateTime<Utc>) -> Self {
        Self {
            rule_type: Some(rule_type),
            active_at: Some(now),
            ..Self::default()
        }
    }

    /// Every rule, any type and status.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn exact(mut self, address: NetworkPrefix) -> Self {
        self.address = Some(AddressMatch::Exact(address));
        self
    }

    pub fn overlapping(mut self, address: NetworkPrefix) -> Self {
        self.address = Some(AddressMatch::Overlapping(address));
        self
    }

    pub fn expiring_before(mut self, t: DateTime<Utc>) -> Self {
        self.expiry = Some(ExpiryBound::Before(t));
        self
    }

    pub fn expiring_at_or_after(mut self, t: DateTime<Utc>) -> Self {
        self.expiry = Some(ExpiryBound::AtOrAfter(t));
        self
    }

    pub fn excluding(mut self, id: Option<RuleId>) -> Self {
        self.exclude_id = id;
        self
    }

    /// Evaluate the filter against a single rule.
    pub fn matches(&self, rule: &BlockingRule) -> bool {
        if self.rule_type.is_some_and(|t| t != rule.rule_type) {
            return false;
        }
        if self.exclude_id == Some(rule.id) {
            return false;
        }
        if let Some(address) = &self.address
            && !address.matches(&rule.address)
        {
            return false;
        }
        if let Some(now) = self.active_at
            && !rule.is_active(now)
        {
            return false;
        }
        match (self.expiry, rule.expires_at) {
            (Some(ExpiryBound::Before(t)), Some(end)) => end < t,
            (Some(ExpiryBound::Before(_)), None) => false,
            (Some(ExpiryBound::AtOrAfter(t)), Some(end)) => end >= t,
            (Some(ExpiryBound::AtOrAfter(_)), None) | (None, _) => true,
        }
    }
}

/// Source of transactions.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn begin(&self, mode: TxMode) -> Result<Box<dyn RuleTransaction>, StoreError>;
}

/// An open transaction. Dropping it without [`commit`](Self::commit) rolls back.
#[async_trait]
pub trait RuleTransaction: Send {
    /// Insert a rule; the store assigns its id.
    async fn insert(&mut self, rule: NewRule) -> Result<BlockingRule, StoreError>;

    /// Stamp `nullification` on every not-yet-nullified rule matching
    /// `filter` and return the updated rules in creation order.
    async fn nullify(
        &mut self,
        filter: &RuleFilter,
        nullification: &Nullification,
    ) -> Result<Vec<BlockingRule>, StoreError>;

    /// Rules matching `filter`, ordered by creation time, then id.
    async fn select(&mut self, filter: &RuleFilter) -> Result<Vec<BlockingRule>, StoreError>;

    /// Make the transaction's changes visible. The handle is spent afterwards.
    async fn commit(&mut self) -> Result<(), StoreError>;
}

/// Sort rules the way every `select` returns them.
pub(crate) fn sort_by_creation(rules: &mut [BlockingRule]) {
    rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}
