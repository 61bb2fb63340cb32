// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use pkgtxn::config::Config;
use pkgtxn::db;
use pkgtxn::db::models::InstalledPackage;
use pkgtxn::item::{Action, Reason};
use pkgtxn::replay::{PackageReplay, ReplaySettings, TransactionReplay, resolve_replay};
use pkgtxn::transaction::{ResolvedTransaction, RunEnvironment, RunResult, SilentCallbacks, SystemBackend};
use pkgtxn::version::Nevra;
use rusqlite::Connection;
use tempfile::TempDir;

/// Create an initialized database with the lock file next to it.
///
/// Returns (TempDir, Connection, Config) - keep the TempDir alive to prevent cleanup.
pub fn setup() -> (TempDir, Connection, Config) {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir
        .path()
        .join("history.db")
        .to_str()
        .unwrap()
        .to_string();

    db::init(&db_path).unwrap();
    let conn = db::open(&db_path).unwrap();
    let config = Config {
        db_path,
        ..Config::default()
    };
    (temp_dir, conn, config)
}

pub fn nevra(s: &str) -> Nevra {
    Nevra::parse(s).unwrap()
}

pub fn replay_of(packages: &[(&str, Action, Reason)]) -> TransactionReplay {
    TransactionReplay {
        packages: packages
            .iter()
            .map(|(nevra, action, reason)| PackageReplay {
                action: *action,
                reason: *reason,
                group_id: String::new(),
                nevra: nevra.to_string(),
                package_path: String::new(),
                repo_id: "fedora".to_string(),
            })
            .collect(),
        ..Default::default()
    }
}

/// Run `transaction` through the built-in backend
pub fn run(conn: &Connection, config: &Config, transaction: &mut ResolvedTransaction) -> RunResult {
    let mut backend = SystemBackend::new(conn, &config.installonly_pkgs);
    let mut env = RunEnvironment {
        conn,
        config,
        backend: &mut backend,
        verifier: None,
    };
    transaction.run(&mut env, &mut SilentCallbacks).unwrap()
}

/// Resolve `replay`, run it and return the new history id
pub fn apply_replay(
    conn: &Connection,
    config: &Config,
    replay: &TransactionReplay,
    settings: &ReplaySettings,
) -> i64 {
    let mut transaction = resolve_replay(conn, replay, None, settings, config).unwrap();
    assert!(transaction.problems.is_empty(), "{:?}", transaction.problems);
    assert_eq!(run(conn, config, &mut transaction), RunResult::Success);
    transaction.history_id().unwrap()
}

/// Apply package actions as one recorded transaction
pub fn apply(conn: &Connection, config: &Config, packages: &[(&str, Action, Reason)]) -> i64 {
    apply_replay(conn, config, &replay_of(packages), &ReplaySettings::default())
}

/// Installed NEVRAs, sorted
pub fn installed(conn: &Connection) -> Vec<String> {
    let mut nevras: Vec<String> = InstalledPackage::list_all(conn)
        .unwrap()
        .into_iter()
        .map(|p| p.nevra.to_string())
        .collect();
    nevras.sort();
    nevras
}
