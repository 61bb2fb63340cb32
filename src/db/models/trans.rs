// src/db/models/trans.rs

//! Transaction Record model - the persisted description of an executed transaction

use super::item;
use crate::error::{Error, Result};
use crate::item::{EnvironmentItem, GroupItem, Item, ItemComparator, ModuleItem, PackageItem, State};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::str::FromStr;
use tracing::debug;

/// Columns selected for every record query, in `from_row` order
pub(crate) const TRANS_COLUMNS: &str = "id, dt_begin, dt_end, rpmdb_version_begin, rpmdb_version_end,
     releasever, user_id, description, comment, state";

/// A transaction as recorded in history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    /// Assigned by `start()`; 0 means not yet persisted
    pub id: i64,
    pub dt_start: i64,
    pub dt_end: i64,
    pub rpmdb_version_begin: String,
    pub rpmdb_version_end: String,
    pub releasever: String,
    pub user_id: u32,
    pub description: String,
    pub comment: String,
    pub state: State,
    pub packages: Vec<PackageItem>,
    pub groups: Vec<GroupItem>,
    pub environments: Vec<EnvironmentItem>,
    pub modules: Vec<ModuleItem>,
}

impl Default for TransactionRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionRecord {
    /// Create an empty, not yet persisted record
    pub fn new() -> Self {
        Self {
            id: 0,
            dt_start: 0,
            dt_end: 0,
            rpmdb_version_begin: String::new(),
            rpmdb_version_end: String::new(),
            releasever: String::new(),
            user_id: 0,
            description: String::new(),
            comment: String::new(),
            state: State::Started,
            packages: Vec::new(),
            groups: Vec::new(),
            environments: Vec::new(),
            modules: Vec::new(),
        }
    }

    /// Persist a `Started` stub together with every item added so far
    pub fn start(&mut self, conn: &Connection) -> Result<i64> {
        if self.id != 0 {
            return Err(Error::TransactionError(format!(
                "Transaction has already started with id {}",
                self.id
            )));
        }
        if self.dt_start == 0 {
            self.dt_start = chrono::Utc::now().timestamp();
        }
        self.state = State::Started;

        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO trans (dt_begin, rpmdb_version_begin, releasever, user_id, description, comment, state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.dt_start,
                &self.rpmdb_version_begin,
                &self.releasever,
                self.user_id,
                &self.description,
                &self.comment,
                self.state.as_str()
            ],
        )?;
        let id = tx.last_insert_rowid();
        item::insert_items(&tx, id, self)?;
        tx.commit()?;

        self.id = id;
        debug!("Started history transaction {}", id);
        Ok(id)
    }

    /// Stamp the end time and final state; items still `Started` take the same state
    pub fn finish(&mut self, conn: &Connection, state: State) -> Result<()> {
        if self.id == 0 {
            return Err(Error::TransactionError(
                "Cannot finish a transaction that was not started".to_string(),
            ));
        }
        if self.state.is_finished() {
            return Err(Error::TransactionError(format!(
                "Transaction {} is already finished with state {}",
                self.id, self.state
            )));
        }
        if !state.is_finished() {
            return Err(Error::TransactionError(format!(
                "Cannot finish transaction {} with state {}",
                self.id, state
            )));
        }
        if self.dt_end == 0 {
            self.dt_end = chrono::Utc::now().timestamp();
        }

        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE trans SET dt_end = ?1, rpmdb_version_end = ?2, comment = ?3, state = ?4 WHERE id = ?5",
            params![
                self.dt_end,
                &self.rpmdb_version_end,
                &self.comment,
                state.as_str(),
                self.id
            ],
        )?;
        tx.execute(
            "UPDATE trans_item SET state = ?1 WHERE trans_id = ?2 AND state = ?3",
            params![state.as_str(), self.id, State::Started.as_str()],
        )?;
        tx.commit()?;

        self.state = state;
        for item in self.items_mut() {
            if item.state == State::Started {
                item.state = state;
            }
        }
        debug!("Finished history transaction {} with state {}", self.id, state);
        Ok(())
    }

    /// Find a record by id, items included
    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let sql = format!("SELECT {TRANS_COLUMNS} FROM trans WHERE id = ?1");
        let record = conn.query_row(&sql, [id], Self::from_row).optional()?;

        match record {
            Some(mut record) => {
                item::load_items(conn, std::slice::from_mut(&mut record))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Append a captured output line
    pub fn add_console_output_line(&self, conn: &Connection, fd: i32, line: &str) -> Result<()> {
        if self.id == 0 {
            return Err(Error::TransactionError(
                "Cannot record output of a transaction that was not started".to_string(),
            ));
        }
        conn.execute(
            "INSERT INTO console_output (trans_id, file_descriptor, line) VALUES (?1, ?2, ?3)",
            params![self.id, fd, line],
        )?;
        Ok(())
    }

    /// Captured output lines in insertion order
    pub fn console_output(&self, conn: &Connection) -> Result<Vec<(i32, String)>> {
        let mut stmt = conn.prepare(
            "SELECT file_descriptor, line FROM console_output WHERE trans_id = ?1 ORDER BY id",
        )?;
        let lines = stmt
            .query_map([self.id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    /// All items as the kind-tagged enum, sorted with `order`
    pub fn items_sorted(&self, order: ItemComparator) -> Vec<Item> {
        let mut items: Vec<Item> = self
            .packages
            .iter()
            .cloned()
            .map(Item::Package)
            .chain(self.groups.iter().cloned().map(Item::Group))
            .chain(self.environments.iter().cloned().map(Item::Environment))
            .chain(self.modules.iter().cloned().map(Item::Module))
            .collect();
        items.sort_by(order);
        items
    }

    pub fn item_count(&self) -> usize {
        self.packages.len() + self.groups.len() + self.environments.len() + self.modules.len()
    }

    fn items_mut(&mut self) -> impl Iterator<Item = &mut crate::item::ItemInfo> {
        self.packages
            .iter_mut()
            .map(|p| &mut p.info)
            .chain(self.groups.iter_mut().map(|g| &mut g.info))
            .chain(self.environments.iter_mut().map(|e| &mut e.info))
            .chain(self.modules.iter_mut().map(|m| &mut m.info))
    }

    /// Convert a database row to a record without items
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let state_str: String = row.get(9)?;
        let state = State::from_str(&state_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                9,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
            )
        })?;

        Ok(Self {
            id: row.get(0)?,
            dt_start: row.get(1)?,
            dt_end: row.get(2)?,
            rpmdb_version_begin: row.get(3)?,
            rpmdb_version_end: row.get(4)?,
            releasever: row.get(5)?,
            user_id: row.get(6)?,
            description: row.get(7)?,
            comment: row.get(8)?,
            state,
            ..Self::new()
        })
    }
}
