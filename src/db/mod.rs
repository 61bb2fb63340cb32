// src/db/mod.rs

//! Database layer for the transaction history and installed-system state
//!
//! One SQLite file holds both the history tables (`trans`, `trans_item` and the
//! per-kind item tables) and the system-state tables used by the built-in
//! backend. All access goes through `rusqlite`.

pub mod models;
pub mod schema;

use crate::error::{Error, Result};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory containing the database file
pub fn db_dir(db_path: &str) -> PathBuf {
    Path::new(db_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf()
}

/// Create the database (and its parent directory) and apply migrations
pub fn init(db_path: &str) -> Result<()> {
    let dir = db_dir(db_path);
    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| {
            Error::InitError(format!("Failed to create {}: {}", dir.display(), e))
        })?;
    }

    let conn = Connection::open(db_path)?;
    configure(&conn)?;
    schema::migrate(&conn)?;
    info!("Database ready at {}", db_path);
    Ok(())
}

/// Open an existing database
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        return Err(Error::NotFound(format!(
            "Database not found at {db_path} (run `pkgtxn init` first)"
        )));
    }

    let conn = Connection::open(db_path)?;
    configure(&conn)?;
    schema::migrate(&conn)?;
    debug!("Opened database {}", db_path);
    Ok(conn)
}

/// Open an in-memory database with the full schema
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    schema::migrate(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
    Ok(())
}

/// Run `f` inside a database transaction, committing on success
pub fn transaction<T, F>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&rusqlite::Transaction) -> Result<T>,
{
    let tx = conn.transaction()?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_parent_dir() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/history.db");
        let path = path.to_str().unwrap();

        init(path).unwrap();
        assert!(Path::new(path).exists());
        open(path).unwrap();
    }

    #[test]
    fn test_open_missing_database() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.db");
        assert!(matches!(open(path.to_str().unwrap()), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_db_dir_of_bare_filename() {
        assert_eq!(db_dir("history.db"), PathBuf::from("."));
        assert_eq!(db_dir("/var/lib/pkgtxn/history.db"), PathBuf::from("/var/lib/pkgtxn"));
    }
}
