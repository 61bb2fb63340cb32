// src/db/schema.rs

//! Database schema definitions and migrations
//!
//! Version 1 holds the transaction history; version 2 adds the installed-system
//! state that the built-in backend maintains.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version: Option<i32> = conn.query_row(
        "SELECT MAX(version) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!("Schema migration complete. Now at version {}", SCHEMA_VERSION);
    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::InitError(format!("Unknown migration version: {version}"))),
    }
}

/// Transaction history
///
/// - trans: one row per executed transaction
/// - trans_item: common item columns, one row per item
/// - rpm / comps_group / comps_environment / module: per-kind identity
/// - console_output: lines captured while the transaction ran
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE trans (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dt_begin INTEGER NOT NULL,
            dt_end INTEGER NOT NULL DEFAULT 0,
            rpmdb_version_begin TEXT NOT NULL DEFAULT '',
            rpmdb_version_end TEXT NOT NULL DEFAULT '',
            releasever TEXT NOT NULL DEFAULT '',
            user_id INTEGER NOT NULL DEFAULT 0,
            description TEXT NOT NULL DEFAULT '',
            comment TEXT NOT NULL DEFAULT '',
            state TEXT NOT NULL
        );

        CREATE TABLE trans_item (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trans_id INTEGER NOT NULL REFERENCES trans(id) ON DELETE CASCADE,
            item_type TEXT NOT NULL,
            seq INTEGER NOT NULL,
            action TEXT NOT NULL,
            reason TEXT NOT NULL,
            state TEXT NOT NULL,
            repo_id TEXT NOT NULL DEFAULT ''
        );

        CREATE INDEX idx_trans_item_trans ON trans_item(trans_id);

        CREATE TABLE rpm (
            item_id INTEGER PRIMARY KEY REFERENCES trans_item(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            epoch INTEGER NOT NULL DEFAULT 0,
            version TEXT NOT NULL,
            release TEXT NOT NULL,
            arch TEXT NOT NULL
        );

        CREATE INDEX idx_rpm_name_arch ON rpm(name, arch);

        CREATE TABLE comps_group (
            item_id INTEGER PRIMARY KEY REFERENCES trans_item(id) ON DELETE CASCADE,
            groupid TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            translated_name TEXT NOT NULL DEFAULT '',
            package_types TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE comps_group_package (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            group_item_id INTEGER NOT NULL REFERENCES comps_group(item_id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            installed INTEGER NOT NULL DEFAULT 0,
            pkg_type TEXT NOT NULL
        );

        CREATE TABLE comps_environment (
            item_id INTEGER PRIMARY KEY REFERENCES trans_item(id) ON DELETE CASCADE,
            environmentid TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            translated_name TEXT NOT NULL DEFAULT '',
            package_types TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE comps_environment_group (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            environment_item_id INTEGER NOT NULL REFERENCES comps_environment(item_id) ON DELETE CASCADE,
            groupid TEXT NOT NULL,
            installed INTEGER NOT NULL DEFAULT 0,
            optional INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE module (
            item_id INTEGER PRIMARY KEY REFERENCES trans_item(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            stream TEXT NOT NULL
        );

        CREATE TABLE console_output (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trans_id INTEGER NOT NULL REFERENCES trans(id) ON DELETE CASCADE,
            file_descriptor INTEGER NOT NULL,
            line TEXT NOT NULL
        );
        ",
    )?;

    Ok(())
}

/// Installed-system state
///
/// `installed_package.id` doubles as the installed-database record id that
/// erase elements are addressed by.
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 2");

    conn.execute_batch(
        "
        CREATE TABLE installed_package (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            epoch INTEGER NOT NULL DEFAULT 0,
            version TEXT NOT NULL,
            release TEXT NOT NULL,
            arch TEXT NOT NULL,
            repo_id TEXT NOT NULL DEFAULT '',
            reason TEXT NOT NULL DEFAULT 'None',
            installed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(name, epoch, version, release, arch)
        );

        CREATE INDEX idx_installed_package_name ON installed_package(name, arch);

        CREATE TABLE installed_group (
            groupid TEXT PRIMARY KEY,
            reason TEXT NOT NULL,
            package_types TEXT NOT NULL DEFAULT '',
            packages TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE installed_environment (
            environmentid TEXT PRIMARY KEY,
            groups TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE module_state (
            name TEXT PRIMARY KEY,
            stream TEXT NOT NULL,
            state TEXT NOT NULL
        );
        ",
    )?;

    Ok(())
}
