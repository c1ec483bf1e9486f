//! Blocking rule models and derived status.

use crate::net::NetworkPrefix;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// Store-assigned rule identifier. Monotonically increasing.
pub type RuleId = i64;

/// Which list a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleType {
    Blacklist,
    Whitelist,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Blacklist => "BLACKLIST",
            RuleType::Whitelist => "WHITELIST",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BLACKLIST" => Ok(RuleType::Blacklist),
            "WHITELIST" => Ok(RuleType::Whitelist),
            other => Err(format!("unknown rule type: {other}")),
        }
    }
}

/// Why a rule stopped being active before its natural end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullificationType {
    Canceled,
    Superseded,
}

impl NullificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NullificationType::Canceled => "CANCELED",
            NullificationType::Superseded => "SUPERSEDED",
        }
    }
}

impl FromStr for NullificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CANCELED" => Ok(NullificationType::Canceled),
            "SUPERSEDED" => Ok(NullificationType::Superseded),
            other => Err(format!("unknown nullification type: {other}")),
        }
    }
}

/// Derived rule status. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleStatus {
    Active,
    Ended,
    Canceled,
    Superseded,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleStatus::Active => "ACTIVE",
            RuleStatus::Ended => "ENDED",
            RuleStatus::Canceled => "CANCELED",
            RuleStatus::Superseded => "SUPERSEDED",
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nullification stamp. Written once; the rule is immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nullification {
    /// When the rule was nullified.
    pub at: DateTime<Utc>,
    /// User who caused the nullification.
    pub by: String,
    pub kind: NullificationType,
    /// Operator comment (cancellations only).
    pub comment: Option<String>,
}

/// A blacklist or whitelist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockingRule {
    pub id: RuleId,
    pub rule_type: RuleType,
    pub address: NetworkPrefix,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub creation_comment: String,
    /// End of a time-bounded blacklist entry. Always `None` for whitelist entries.
    pub expires_at: Option<DateTime<Utc>>,
    pub nullification: Option<Nullification>,
}

impl BlockingRule {
    /// Status as of `now`.
    pub fn status(&self, now: DateTime<Utc>) -> RuleStatus {
        match &self.nullification {
            Some(n) => match n.kind {
                NullificationType::Canceled => RuleStatus::Canceled,
                NullificationType::Superseded => RuleStatus::Superseded,
            },
            None => match self.expires_at {
                Some(end) if end <= now => RuleStatus::Ended,
                _ => RuleStatus::Active,
            },
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status(now) == RuleStatus::Active
    }
}

/// A rule about to be inserted; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewRule {
    pub rule_type: RuleType,
    pub address: NetworkPrefix,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub creation_comment: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewRule {
    pub fn into_rule(self, id: RuleId) -> BlockingRule {
        BlockingRule {
            id,
            rule_type: self.rule_type,
            address: self.address,
            created_at: self.created_at,
            created_by: self.created_by,
            creation_comment: self.creation_comment,
            expires_at: self.expires_at,
            nullification: None,
        }
    }
}

/// A rule paired with its status at the time it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRecord {
    pub status: RuleStatus,
    pub rule: BlockingRule,
}

impl RuleRecord {
    pub fn at(rule: BlockingRule, now: DateTime<Utc>) -> Self {
        Self {
            status: rule.status(now),
            rule,
        }
    }
}
