// src/history/mod.rs

//! Transaction history
//!
//! [`TransactionHistory`] is a thin query surface over the persisted
//! [`TransactionRecord`]s of one database connection. Records returned by the
//! `list_*` methods carry only their metadata; call
//! [`TransactionHistory::load_items`] before looking at their contents.
//!
//! The submodules build on it: transaction-id specs, reverting and merging
//! records (undo, rollback) and the recent-changes summary.

pub mod changes;
pub mod merge;
pub mod revert;
pub mod spec;

pub use changes::{RecentChanges, recent_changes};
pub use merge::merge_transactions;
pub use revert::{revert_transactions, rollback_replay, undo_replay};
pub use spec::{IdSpec, resolve_transaction_specs, select_one};

use crate::db::models::item::json_list;
use crate::db::models::{TRANS_COLUMNS, TransactionRecord, item};
use crate::error::Result;
use crate::item::{Action, ItemKind, Reason, State};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

/// Query/insert accessor over the history tables of one connection
pub struct TransactionHistory<'a> {
    conn: &'a Connection,
}

impl<'a> TransactionHistory<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn conn(&self) -> &'a Connection {
        self.conn
    }

    /// All transaction ids, ascending
    pub fn list_transaction_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare("SELECT id FROM trans ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Records with the given ids, in the order the ids were given
    ///
    /// Unknown ids are skipped; duplicates yield one record.
    pub fn list_transactions(&self, ids: &[i64]) -> Result<Vec<TransactionRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!("SELECT {TRANS_COLUMNS} FROM trans WHERE id IN (SELECT value FROM json_each(?1))");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut by_id: HashMap<i64, TransactionRecord> = stmt
            .query_map([json_list(ids)?], TransactionRecord::from_row)?
            .map(|r| r.map(|record| (record.id, record)))
            .collect::<std::result::Result<_, _>>()?;

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Records with `start <= id <= end`, ascending
    pub fn list_transactions_range(&self, start: i64, end: i64) -> Result<Vec<TransactionRecord>> {
        let sql = format!("SELECT {TRANS_COLUMNS} FROM trans WHERE id BETWEEN ?1 AND ?2 ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![start, end], TransactionRecord::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn list_all_transactions(&self) -> Result<Vec<TransactionRecord>> {
        let sql = format!("SELECT {TRANS_COLUMNS} FROM trans ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([], TransactionRecord::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Most recently started record, if any
    pub fn last_transaction(&self) -> Result<Option<TransactionRecord>> {
        let sql = format!("SELECT {TRANS_COLUMNS} FROM trans ORDER BY id DESC LIMIT 1");
        Ok(self
            .conn
            .query_row(&sql, [], TransactionRecord::from_row)
            .optional()?)
    }

    /// Fill in the items of `records` with one query per item kind
    pub fn load_items(&self, records: &mut [TransactionRecord]) -> Result<()> {
        item::load_items(self.conn, records)
    }

    /// Keep only records containing a package whose name is exactly one of `names`
    pub fn filter_transactions_by_pkg_names(
        &self,
        transactions: Vec<TransactionRecord>,
        names: &[String],
    ) -> Result<Vec<TransactionRecord>> {
        if transactions.is_empty() || names.is_empty() {
            return Ok(transactions);
        }

        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT ti.trans_id FROM trans_item ti JOIN rpm r ON r.item_id = ti.id
             WHERE r.name IN (SELECT value FROM json_each(?1))",
        )?;
        let matching = stmt
            .query_map([json_list(names)?], |row| row.get(0))?
            .collect::<std::result::Result<HashSet<i64>, _>>()?;

        Ok(transactions
            .into_iter()
            .filter(|t| matching.contains(&t.id))
            .collect())
    }

    /// Reason recorded for `name.arch` by the latest successful item strictly before `point`
    ///
    /// `Replaced` items are ignored: they carry the reason of the item that
    /// superseded them, which is recorded separately.
    pub fn transaction_item_reason_at(&self, name: &str, arch: &str, point: i64) -> Result<Reason> {
        let reason: Option<String> = self
            .conn
            .query_row(
                "SELECT ti.reason FROM trans_item ti
                 JOIN rpm r ON r.item_id = ti.id
                 JOIN trans t ON t.id = ti.trans_id
                 WHERE r.name = ?1 AND r.arch = ?2 AND ti.trans_id < ?3
                   AND ti.state = ?4 AND ti.action != ?5
                 ORDER BY ti.trans_id DESC, ti.seq DESC
                 LIMIT 1",
                params![
                    name,
                    arch,
                    point,
                    State::Ok.as_str(),
                    Action::Replaced.as_str()
                ],
                |row| row.get(0),
            )
            .optional()?;

        match reason {
            Some(reason) => Reason::from_str(&reason),
            None => Ok(Reason::None),
        }
    }

    /// Item count per record id, in a single query
    pub fn get_transaction_item_counts(
        &self,
        transactions: &[TransactionRecord],
    ) -> Result<HashMap<i64, i64>> {
        if transactions.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<i64> = transactions.iter().map(|t| t.id).collect();
        let mut stmt = self.conn.prepare(
            "SELECT t.id, COUNT(ti.id) FROM trans t LEFT JOIN trans_item ti ON ti.trans_id = t.id
             WHERE t.id IN (SELECT value FROM json_each(?1)) GROUP BY t.id",
        )?;
        let counts = stmt
            .query_map([json_list(&ids)?], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<HashMap<i64, i64>, _>>()?;
        Ok(counts)
    }

    /// Item count of one record per kind
    pub fn count_items_by_kind(&self, id: i64) -> Result<HashMap<ItemKind, i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT item_type, COUNT(*) FROM trans_item WHERE trans_id = ?1 GROUP BY item_type",
        )?;
        let rows = stmt
            .query_map([id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut counts = HashMap::new();
        for (kind, count) in rows {
            counts.insert(ItemKind::from_str(&kind)?, count);
        }
        Ok(counts)
    }
}
