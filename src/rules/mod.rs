//! Blocking rules: the data model, expiry resolution and the engine that
//! keeps the active rule set consistent.

pub mod duration;
pub mod engine;
pub mod model;

pub use duration::DurationSpec;
pub use engine::{Actor, BlacklistAddition, Cancellation, RuleEngine, WhitelistAddition};
pub use model::{BlockingRule, RuleRecord, RuleStatus, RuleType};
