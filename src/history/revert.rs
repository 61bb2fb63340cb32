// src/history/revert.rs

//! Undo and rollback: reverting recorded transactions
//!
//! Every reverted record becomes a replay with inverted actions. The replays
//! are merged newest first against the installed set, giving one
//! transaction that takes the system back.

use super::TransactionHistory;
use super::merge::merge_transactions;
use crate::db::models::{InstalledPackage, TransactionRecord};
use crate::error::{Error, Result};
use crate::item::{Action, Reason, State};
use crate::replay::{EnvironmentReplay, GroupReplay, PackageReplay, TransactionReplay};
use std::collections::HashMap;
use tracing::{debug, warn};

fn revert_action(action: Action) -> Result<Action> {
    action
        .revert()
        .ok_or_else(|| Error::TransactionError(format!("Cannot revert action: \"{}\"", action)))
}

/// Replay that undoes one record, items in reverse order
///
/// Group and environment upgrades are skipped with a log entry.
fn revert_record(
    history: &TransactionHistory<'_>,
    record: &TransactionRecord,
    logs: &mut Vec<String>,
) -> Result<TransactionReplay> {
    let mut replay = TransactionReplay::default();

    for pkg in record.packages.iter().rev() {
        let action = revert_action(pkg.info.action)?;
        let original = pkg.info.reason;

        // The reason before a reason change, or before a clean-up removal,
        // can only be recovered from earlier history
        let reason = if action == Action::ReasonChange
            || (action == Action::Install && original == Reason::Clean)
        {
            history.transaction_item_reason_at(pkg.name(), pkg.arch(), record.id)?
        } else if action == Action::Remove
            && matches!(original, Reason::Dependency | Reason::WeakDependency)
        {
            Reason::Clean
        } else {
            original
        };

        replay.packages.push(PackageReplay {
            action,
            reason,
            group_id: String::new(),
            nevra: pkg.nevra.to_string(),
            package_path: String::new(),
            repo_id: pkg.info.repo_id.clone(),
        });
    }

    for group in record.groups.iter().rev() {
        if group.info.action == Action::Upgrade {
            warn!("Cannot revert upgrade of group {}", group.group_id);
            logs.push(format!(
                "Reverting the upgrade of group \"{}\" is not supported; its packages are reverted individually.",
                group.group_id
            ));
            continue;
        }
        let action = revert_action(group.info.action)?;
        let reason = match (action, group.info.reason) {
            (Action::Install, Reason::Clean) => Reason::Dependency,
            (Action::Remove, Reason::Dependency) => Reason::Clean,
            (_, reason) => reason,
        };
        replay.groups.push(GroupReplay {
            action,
            reason,
            group_id: group.group_id.clone(),
            group_path: String::new(),
            repo_id: group.info.repo_id.clone(),
            package_types: group.package_types.clone(),
        });
    }

    for env in record.environments.iter().rev() {
        if env.info.action == Action::Upgrade {
            warn!("Cannot revert upgrade of environment {}", env.environment_id);
            logs.push(format!(
                "Reverting the upgrade of environment \"{}\" is not supported; its packages are reverted individually.",
                env.environment_id
            ));
            continue;
        }
        replay.environments.push(EnvironmentReplay {
            action: revert_action(env.info.action)?,
            environment_id: env.environment_id.clone(),
            environment_path: String::new(),
            repo_id: env.info.repo_id.clone(),
        });
    }

    Ok(replay)
}

/// Installed NEVRAs grouped by `name.arch`, the shape merging works on
pub fn installed_na_map(installed: &[InstalledPackage]) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for pkg in installed {
        map.entry(pkg.nevra.na()).or_default().push(pkg.nevra.to_string());
    }
    map
}

/// Revert `records` (oldest first, items loaded) into one merged replay
///
/// Returns the replay and the log entries produced while reverting and
/// merging.
pub fn revert_transactions(
    history: &TransactionHistory<'_>,
    records: &[TransactionRecord],
    installonly_names: &[String],
) -> Result<(TransactionReplay, Vec<String>)> {
    let mut logs = Vec::new();
    let mut reverted = records
        .iter()
        .map(|record| revert_record(history, record, &mut logs))
        .collect::<Result<Vec<_>>>()?;
    reverted.reverse();

    let mut installed = installed_na_map(&InstalledPackage::list_all(history.conn())?);
    let (merged, problems) = merge_transactions(reverted, &mut installed, installonly_names)?;
    logs.extend(problems);

    debug!(
        "Reverted {} transactions into {} package actions",
        records.len(),
        merged.packages.len()
    );
    Ok((merged, logs))
}

/// Replay that undoes `record`
pub fn undo_replay(
    history: &TransactionHistory<'_>,
    record: &TransactionRecord,
    installonly_names: &[String],
) -> Result<(TransactionReplay, Vec<String>)> {
    let mut record = record.clone();
    if record.packages.is_empty() && record.groups.is_empty() && record.environments.is_empty() {
        history.load_items(std::slice::from_mut(&mut record))?;
    }
    revert_transactions(history, std::slice::from_ref(&record), installonly_names)
}

/// Replay that undoes every successful transaction after `target_id`
pub fn rollback_replay(
    history: &TransactionHistory<'_>,
    target_id: i64,
    installonly_names: &[String],
) -> Result<(TransactionReplay, Vec<String>)> {
    let mut records: Vec<TransactionRecord> = history
        .list_all_transactions()?
        .into_iter()
        .filter(|t| t.id > target_id && t.state == State::Ok)
        .collect();
    records.sort_by_key(|t| t.id);
    history.load_items(&mut records)?;

    revert_transactions(history, &records, installonly_names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::item::{GroupItem, PackageItem};
    use crate::version::Nevra;
    use rusqlite::Connection;

    fn record_with(conn: &Connection, packages: &[(&str, Action, Reason)]) -> TransactionRecord {
        let mut record = TransactionRecord::new();
        for (nevra, action, reason) in packages {
            record.packages.push(PackageItem::new(
                Nevra::parse(nevra).unwrap(),
                *action,
                *reason,
                "fedora",
            ));
        }
        record.start(conn).unwrap();
        record.finish(conn, State::Ok).unwrap();
        record
    }

    fn installed(conn: &Connection, nevra: &str, reason: Reason) {
        InstalledPackage::new(Nevra::parse(nevra).unwrap(), "fedora", reason)
            .insert(conn)
            .unwrap();
    }

    #[test]
    fn test_undo_install() {
        let conn = db::open_in_memory().unwrap();
        let record = record_with(&conn, &[("bash-5.2-1.x86_64", Action::Install, Reason::Dependency)]);
        installed(&conn, "bash-5.2-1.x86_64", Reason::Dependency);

        let history = TransactionHistory::new(&conn);
        let (replay, logs) = undo_replay(&history, &record, &[]).unwrap();
        assert!(logs.is_empty());
        assert_eq!(replay.packages.len(), 1);
        assert_eq!(replay.packages[0].action, Action::Remove);
        assert_eq!(replay.packages[0].reason, Reason::Clean);
    }

    #[test]
    fn test_undo_upgrade() {
        let conn = db::open_in_memory().unwrap();
        let record = record_with(
            &conn,
            &[
                ("bash-5.2-2.x86_64", Action::Upgrade, Reason::User),
                ("bash-5.2-1.x86_64", Action::Replaced, Reason::User),
            ],
        );
        installed(&conn, "bash-5.2-2.x86_64", Reason::User);

        let history = TransactionHistory::new(&conn);
        let (replay, _) = undo_replay(&history, &record, &[]).unwrap();
        let actions: Vec<(String, Action)> = replay
            .packages
            .iter()
            .map(|p| (p.nevra.clone(), p.action))
            .collect();
        assert!(actions.contains(&("bash-5.2-2.x86_64".to_string(), Action::Replaced)));
        assert!(actions.contains(&("bash-5.2-1.x86_64".to_string(), Action::Install)));
    }

    #[test]
    fn test_revert_record_reverses_item_order() {
        let conn = db::open_in_memory().unwrap();
        let record = record_with(
            &conn,
            &[
                ("glibc-2.39-1.x86_64", Action::Install, Reason::Dependency),
                ("bash-5.2-1.x86_64", Action::Install, Reason::User),
                ("bash-doc-5.2-1.noarch", Action::Install, Reason::WeakDependency),
            ],
        );

        let history = TransactionHistory::new(&conn);
        let mut logs = Vec::new();
        let replay = revert_record(&history, &record, &mut logs).unwrap();
        let nevras: Vec<&str> = replay.packages.iter().map(|p| p.nevra.as_str()).collect();
        assert_eq!(
            nevras,
            vec!["bash-doc-5.2-1.noarch", "bash-5.2-1.x86_64", "glibc-2.39-1.x86_64"]
        );
        assert!(replay.packages.iter().all(|p| p.action == Action::Remove));
        assert!(logs.is_empty());
    }

    #[test]
    fn test_clean_removal_restores_earlier_reason() {
        let conn = db::open_in_memory().unwrap();
        record_with(&conn, &[("libfoo-1.0-1.x86_64", Action::Install, Reason::WeakDependency)]);
        let removal = record_with(&conn, &[("libfoo-1.0-1.x86_64", Action::Remove, Reason::Clean)]);

        let history = TransactionHistory::new(&conn);
        let (replay, _) = undo_replay(&history, &removal, &[]).unwrap();
        assert_eq!(replay.packages[0].action, Action::Install);
        assert_eq!(replay.packages[0].reason, Reason::WeakDependency);
    }

    #[test]
    fn test_group_upgrade_is_not_reverted() {
        let conn = db::open_in_memory().unwrap();
        let mut record = TransactionRecord::new();
        record
            .groups
            .push(GroupItem::new("core", Action::Upgrade, Reason::User, "fedora"));
        record.start(&conn).unwrap();
        record.finish(&conn, State::Ok).unwrap();

        let history = TransactionHistory::new(&conn);
        let (replay, logs) = undo_replay(&history, &record, &[]).unwrap();
        assert!(replay.groups.is_empty());
        assert_eq!(logs.len(), 1);
        assert!(logs[0].contains("core"));
    }

    #[test]
    fn test_rollback_skips_failed_and_older() {
        let conn = db::open_in_memory().unwrap();
        let target = record_with(&conn, &[("bash-5.2-1.x86_64", Action::Install, Reason::User)]);
        record_with(&conn, &[("zsh-5.9-1.x86_64", Action::Install, Reason::User)]);

        let mut failed = TransactionRecord::new();
        failed.packages.push(PackageItem::new(
            Nevra::parse("fish-3.7-1.x86_64").unwrap(),
            Action::Install,
            Reason::User,
            "fedora",
        ));
        failed.start(&conn).unwrap();
        failed.finish(&conn, State::Error).unwrap();

        installed(&conn, "bash-5.2-1.x86_64", Reason::User);
        installed(&conn, "zsh-5.9-1.x86_64", Reason::User);

        let history = TransactionHistory::new(&conn);
        let (replay, _) = rollback_replay(&history, target.id, &[]).unwrap();
        assert_eq!(replay.packages.len(), 1);
        assert_eq!(replay.packages[0].nevra, "zsh-5.9-1.x86_64");
        assert_eq!(replay.packages[0].action, Action::Remove);
    }
}
