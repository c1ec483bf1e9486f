//! Embedded in-memory rule store.
//!
//! The committed table is an immutable `Arc<Table>` behind a `RwLock`. Read
//! transactions clone the `Arc` and never wait on writers. A write
//! transaction holds the writer mutex for its whole lifetime and edits a
//! copy-on-write version of the table, so writers are fully serialized and
//! an abandoned transaction leaves no trace. Commit swaps the new table in.

use super::{
    RuleFilter, RuleStore, RuleTransaction, StoreError, TxMode, sort_by_creation,
    validate_new_rule,
};
use crate::rules::model::{BlockingRule, NewRule, Nullification, RuleId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct Table {
    rules: Vec<BlockingRule>,
    last_id: RuleId,
}

/// In-process rule store.
#[derive(Debug, Clone, Default)]
pub struct MemoryRuleStore {
    committed: Arc<RwLock<Arc<Table>>>,
    writer: Arc<Mutex<()>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<Table> {
        self.committed.read().clone()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn begin(&self, mode: TxMode) -> Result<Box<dyn RuleTransaction>, StoreError> {
        let writer = match mode {
            TxMode::Read => None,
            TxMode::Write => Some(Arc::clone(&self.writer).lock_owned().await),
        };
        // Taken after the writer lock so a write tx starts from the latest commit
        let working = self.snapshot();
        Ok(Box::new(MemoryTransaction {
            committed: Arc::clone(&self.committed),
            writer,
            working,
            mode,
            finished: false,
        }))
    }
}

struct MemoryTransaction {
    committed: Arc<RwLock<Arc<Table>>>,
    writer: Option<OwnedMutexGuard<()>>,
    working: Arc<Table>,
    mode: TxMode,
    finished: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            Err(StoreError::TransactionFinished)
        } else {
            Ok(())
        }
    }

    fn ensure_writable(&self, what: &'static str) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.mode == TxMode::Read {
            return Err(StoreError::ReadOnly(what));
        }
        Ok(())
    }
}

#[async_trait]
impl RuleTransaction for MemoryTransaction {
    async fn insert(&mut self, rule: NewRule) -> Result<BlockingRule, StoreError> {
        self.ensure_writable("insert")?;
        validate_new_rule(&rule)?;
        let table = Arc::make_mut(&mut self.working);
        table.last_id += 1;
        let rule = rule.into_rule(table.last_id);
        debug!(id = rule.id, address = %rule.address, rule_type = %rule.rule_type, "Inserted rule");
        table.rules.push(rule.clone());
        Ok(rule)
    }

    async fn nullify(
        &mut self,
        filter: &RuleFilter,
        nullification: &Nullification,
    ) -> Result<Vec<BlockingRule>, StoreError> {
        self.ensure_writable("nullify")?;
        let pending = |rule: &BlockingRule| rule.nullification.is_none() && filter.matches(rule);
        if !self.working.rules.iter().any(pending) {
            return Ok(Vec::new());
        }
        let mut affected = Vec::new();
        for rule in Arc::make_mut(&mut self.working).rules.iter_mut() {
            if pending(&*rule) {
                rule.nullification = Some(nullification.clone());
                affected.push(rule.clone());
            }
        }
        sort_by_creation(&mut affected);
        Ok(affected)
    }

    async fn select(&mut self, filter: &RuleFilter) -> Result<Vec<BlockingRule>, StoreError> {
        self.ensure_open()?;
        let mut rows: Vec<BlockingRule> = self
            .working
            .rules
            .iter()
            .filter(|rule| filter.matches(rule))
            .cloned()
            .collect();
        sort_by_creation(&mut rows);
        Ok(rows)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.finished = true;
        if let Some(writer) = self.writer.take() {
            *self.committed.write() = Arc::clone(&self.working);
            drop(writer);
        }
        Ok(())
    }
}
