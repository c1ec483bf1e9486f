//! Blocking rule queries.
//!
//! Addresses are stored with their first and last address as big-endian
//! blobs of the family's width. CIDR blocks are nested or disjoint, so the
//! rules overlapping a prefix are its ancestors (one exact `(family, net_lo,
//! prefix_len)` lookup per length up to its own) plus its descendants (a `net_lo`
//! range inside the block). Both are searches on the `(family, net_lo,
//! prefix_len)` index.

use crate::net::NetworkPrefix;
use crate::rules::model::{BlockingRule, NewRule, Nullification, NullificationType, RuleType};
use crate::store::{
    AddressMatch, ExpiryBound, RuleFilter, RuleTransaction, StoreError, TxMode, sort_by_creation,
    validate_new_rule,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction};
use tracing::debug;

const RULE_COLUMNS: &str = "id, rule_type, address, created_at, created_by, creation_comment, \
     expires_at, nullified_at, nullified_by, nullification_type, nullification_comment";

/// Row shape of [`RULE_COLUMNS`].
type RuleRow = (
    i64,
    String,
    String,
    i64,
    String,
    String,
    Option<i64>,
    Option<i64>,
    Option<String>,
    Option<String>,
    Option<String>,
);

/// An open SQLite transaction.
///
/// The inner sqlx transaction rolls back when dropped uncommitted.
pub struct SqliteTransaction {
    tx: Option<Transaction<'static, Sqlite>>,
    mode: TxMode,
}

impl SqliteTransaction {
    pub(super) async fn begin(pool: &SqlitePool, mode: TxMode) -> Result<Self, StoreError> {
        let mut tx = pool.begin().await?;

        if mode == TxMode::Write {
            // Take the write lock now; every check below runs under it
            sqlx::query("UPDATE rule_write_lock SET touched_at = touched_at + 1 WHERE id = 1")
                .execute(&mut *tx)
                .await?;
        }

        Ok(Self { tx: Some(tx), mode })
    }

    fn open(&mut self) -> Result<&mut Transaction<'static, Sqlite>, StoreError> {
        self.tx.as_mut().ok_or(StoreError::TransactionFinished)
    }

    fn writable(&mut self, what: &'static str) -> Result<&mut Transaction<'static, Sqlite>, StoreError> {
        if self.mode == TxMode::Read {
            return Err(StoreError::ReadOnly(what));
        }
        self.open()
    }

    async fn fetch(&mut self, filter: &RuleFilter) -> Result<Vec<BlockingRule>, StoreError> {
        let tx = self.open()?;

        let mut query = select_query("", filter);
        let rows = query.build_query_as::<RuleRow>().fetch_all(&mut **tx).await?;
        let mut rules = rows
            .into_iter()
            .map(rule_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        sort_by_creation(&mut rules);
        Ok(rules)
    }
}

#[async_trait]
impl RuleTransaction for SqliteTransaction {
    async fn insert(&mut self, rule: NewRule) -> Result<BlockingRule, StoreError> {
        validate_new_rule(&rule)?;
        let tx = self.writable("insert")?;

        let (lo, hi) = rule.address.bounds();
        let result = sqlx::query(
            r#"
            INSERT INTO blocking_rule
                (rule_type, address, family, prefix_len, net_lo, net_hi,
                 created_at, created_by, creation_comment, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(rule.rule_type.as_str())
        .bind(rule.address.to_string())
        .bind(i64::from(rule.address.version()))
        .bind(i64::from(rule.address.prefix_len()))
        .bind(lo)
        .bind(hi)
        .bind(rule.created_at.timestamp_millis())
        .bind(&rule.created_by)
        .bind(&rule.creation_comment)
        .bind(rule.expires_at.map(|t| t.timestamp_millis()))
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.message().contains("br_valid_duration")
            {
                return StoreError::EmptyDuration;
            }
            StoreError::from(e)
        })?;

        let id = result.last_insert_rowid();
        debug!(id, address = %rule.address, rule_type = %rule.rule_type, "Inserted rule");

        // Hand back what a later read would return
        let mut stored = rule.into_rule(id);
        stored.created_at = truncate_millis(stored.created_at);
        stored.expires_at = stored.expires_at.map(truncate_millis);
        Ok(stored)
    }

    async fn nullify(
        &mut self,
        filter: &RuleFilter,
        nullification: &Nullification,
    ) -> Result<Vec<BlockingRule>, StoreError> {
        self.writable("nullify")?;

        let targets: Vec<BlockingRule> = self
            .fetch(filter)
            .await?
            .into_iter()
            .filter(|rule| rule.nullification.is_none())
            .collect();

        let tx = self.writable("nullify")?;
        let stamp = Nullification {
            at: truncate_millis(nullification.at),
            ..nullification.clone()
        };

        let mut affected = Vec::with_capacity(targets.len());
        for mut rule in targets {
            let result = sqlx::query(
                r#"
                UPDATE blocking_rule
                SET nullified_at = ?, nullified_by = ?, nullification_type = ?,
                    nullification_comment = ?
                WHERE id = ? AND nullification_type IS NULL
                "#,
            )
            .bind(stamp.at.timestamp_millis())
            .bind(&stamp.by)
            .bind(stamp.kind.as_str())
            .bind(stamp.comment.as_deref())
            .bind(rule.id)
            .execute(&mut **tx)
            .await?;

            if result.rows_affected() > 0 {
                debug!(id = rule.id, kind = stamp.kind.as_str(), "Nullified rule");
                rule.nullification = Some(stamp.clone());
                affected.push(rule);
            }
        }

        Ok(affected)
    }

    async fn select(&mut self, filter: &RuleFilter) -> Result<Vec<BlockingRule>, StoreError> {
        self.fetch(filter).await
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionFinished)?;
        tx.commit().await?;
        Ok(())
    }
}

/// `SELECT` of every rule column under `filter`, after `prefix`.
fn select_query(prefix: &str, filter: &RuleFilter) -> QueryBuilder<'static, Sqlite> {
    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "{prefix}SELECT {RULE_COLUMNS} FROM blocking_rule WHERE 1 = 1"
    ));
    push_filter(&mut query, filter);
    query
}

fn push_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &RuleFilter) {
    if let Some(rule_type) = filter.rule_type {
        query.push(" AND rule_type = ").push_bind(rule_type.as_str());
    }

    if let Some(id) = filter.exclude_id {
        query.push(" AND id <> ").push_bind(id);
    }

    match filter.address {
        Some(AddressMatch::Exact(address)) => {
            let (lo, _) = address.bounds();
            query
                .push(" AND family = ")
                .push_bind(i64::from(address.version()))
                .push(" AND net_lo = ")
                .push_bind(lo)
                .push(" AND prefix_len = ")
                .push_bind(i64::from(address.prefix_len()));
        }
        Some(AddressMatch::Overlapping(address)) => {
            let family = i64::from(address.version());
            // Each OR term is an index search of its own
            query.push(" AND (");
            for ancestor in address.ancestors() {
                let (lo, _) = ancestor.bounds();
                query
                    .push("(family = ")
                    .push_bind(family)
                    .push(" AND net_lo = ")
                    .push_bind(lo)
                    .push(" AND prefix_len = ")
                    .push_bind(i64::from(ancestor.prefix_len()))
                    .push(") OR ");
            }
            let (lo, hi) = address.bounds();
            query
                .push("(family = ")
                .push_bind(family)
                .push(" AND net_lo BETWEEN ")
                .push_bind(lo)
                .push(" AND ")
                .push_bind(hi)
                .push(" AND prefix_len > ")
                .push_bind(i64::from(address.prefix_len()))
                .push("))");
        }
        None => {}
    }

    if let Some(now) = filter.active_at {
        query
            .push(" AND nullification_type IS NULL AND (expires_at IS NULL OR expires_at > ")
            .push_bind(now.timestamp_millis())
            .push(")");
    }

    match filter.expiry {
        Some(ExpiryBound::Before(t)) => {
            query
                .push(" AND expires_at IS NOT NULL AND expires_at < ")
                .push_bind(t.timestamp_millis());
        }
        Some(ExpiryBound::AtOrAfter(t)) => {
            query
                .push(" AND (expires_at IS NULL OR expires_at >= ")
                .push_bind(t.timestamp_millis())
                .push(")");
        }
        None => {}
    }
}

fn rule_from_row(row: RuleRow) -> Result<BlockingRule, StoreError> {
    let (
        id,
        rule_type,
        address,
        created_at,
        created_by,
        creation_comment,
        expires_at,
        nullified_at,
        nullified_by,
        nullification_type,
        nullification_comment,
    ) = row;

    let corrupt = |reason: String| StoreError::CorruptRow { id, reason };

    let rule_type: RuleType = rule_type.parse().map_err(corrupt)?;
    let address =
        NetworkPrefix::parse_strict(&address).map_err(|e| corrupt(e.to_string()))?;
    let created_at = from_millis(created_at).ok_or_else(|| corrupt("bad created_at".into()))?;
    let expires_at = expires_at
        .map(|ms| from_millis(ms).ok_or_else(|| corrupt("bad expires_at".into())))
        .transpose()?;

    let nullification = match (nullified_at, nullified_by, nullification_type) {
        (Some(at), Some(by), Some(kind)) => Some(Nullification {
            at: from_millis(at).ok_or_else(|| corrupt("bad nullified_at".into()))?,
            by,
            kind: kind.parse::<NullificationType>().map_err(corrupt)?,
            comment: nullification_comment,
        }),
        (None, None, None) => None,
        _ => return Err(corrupt("partial nullification".into())),
    };

    Ok(BlockingRule {
        id,
        rule_type,
        address,
        created_at,
        created_by,
        creation_comment,
        expires_at,
        nullification,
    })
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

fn truncate_millis(t: DateTime<Utc>) -> DateTime<Utc> {
    from_millis(t.timestamp_millis()).unwrap_or(t)
}
