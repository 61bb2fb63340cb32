// src/history/changes.rs

//! Summary of what recent transactions changed on the system

use super::TransactionHistory;
use crate::db::models::InstalledPackage;
use crate::error::Result;
use crate::item::{Action, State};
use crate::version::Nevra;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Package changes still visible in the installed set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentChanges {
    /// Installed by a recent transaction and still installed
    pub installed: Vec<Nevra>,
    /// Removed and not installed in any version now
    pub removed: Vec<Nevra>,
    /// `(previous, current)` where the current version is newer
    pub upgraded: Vec<(Nevra, Nevra)>,
    /// `(previous, current)` where the current version is older
    pub downgraded: Vec<(Nevra, Nevra)>,
}

impl RecentChanges {
    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
            && self.removed.is_empty()
            && self.upgraded.is_empty()
            && self.downgraded.is_empty()
    }
}

/// Changes made by successful transactions that ended after `since`
///
/// Without `since` only the latest transaction is considered. Only the
/// oldest install, remove or replace of each `name.arch` counts. Obsoleted
/// packages show up as removed because history does not record what
/// obsoleted them.
pub fn recent_changes(history: &TransactionHistory<'_>, since: Option<i64>) -> Result<RecentChanges> {
    let mut records = match since {
        Some(since) => history
            .list_all_transactions()?
            .into_iter()
            .filter(|t| t.dt_end > since)
            .collect(),
        None => history.last_transaction()?.into_iter().collect::<Vec<_>>(),
    };
    records.retain(|t| t.state == State::Ok);
    records.sort_by_key(|t| t.id);
    history.load_items(&mut records)?;

    let mut installed_na: HashMap<String, Nevra> = HashMap::new();
    for pkg in InstalledPackage::list_all(history.conn())? {
        installed_na.entry(pkg.nevra.na()).or_insert(pkg.nevra);
    }

    let mut changes = RecentChanges::default();
    let mut seen: HashSet<String> = HashSet::new();

    for record in &records {
        for pkg in &record.packages {
            let action = pkg.info.action;
            if !matches!(action, Action::Install | Action::Remove | Action::Replaced) {
                continue;
            }
            let na = pkg.nevra.na();
            if !seen.insert(na.clone()) {
                continue;
            }

            let current = installed_na.get(&na);
            if action == Action::Install {
                if let Some(current) = current {
                    changes.installed.push(current.clone());
                }
                continue;
            }

            match current {
                Some(current) => match pkg.nevra.evr_cmp(current) {
                    Ordering::Less => changes.upgraded.push((pkg.nevra.clone(), current.clone())),
                    Ordering::Greater => changes.downgraded.push((pkg.nevra.clone(), current.clone())),
                    Ordering::Equal => {}
                },
                None => changes.removed.push(pkg.nevra.clone()),
            }
        }
    }

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::db::models::TransactionRecord;
    use crate::item::{PackageItem, Reason};
    use rusqlite::Connection;

    fn nevra(s: &str) -> Nevra {
        Nevra::parse(s).unwrap()
    }

    fn record(conn: &Connection, packages: &[(&str, Action)], dt_end: i64) {
        let mut record = TransactionRecord::new();
        record.dt_start = dt_end - 1;
        record.dt_end = dt_end;
        for (n, action) in packages {
            record
                .packages
                .push(PackageItem::new(nevra(n), *action, Reason::User, "fedora"));
        }
        record.start(conn).unwrap();
        record.finish(conn, State::Ok).unwrap();
    }

    #[test]
    fn test_changes_since() {
        let conn = db::open_in_memory().unwrap();
        record(&conn, &[("old-1.0-1.x86_64", Action::Install)], 100);
        record(
            &conn,
            &[
                ("bash-5.2-2.x86_64", Action::Upgrade),
                ("bash-5.2-1.x86_64", Action::Replaced),
                ("vim-9.1-1.x86_64", Action::Install),
                ("nano-7.2-1.x86_64", Action::Remove),
            ],
            200,
        );
        for n in ["old-1.0-1.x86_64", "bash-5.2-2.x86_64", "vim-9.1-1.x86_64"] {
            InstalledPackage::new(nevra(n), "fedora", Reason::User)
                .insert(&conn)
                .unwrap();
        }

        let history = TransactionHistory::new(&conn);
        let changes = recent_changes(&history, Some(150)).unwrap();
        assert_eq!(changes.installed, vec![nevra("vim-9.1-1.x86_64")]);
        assert_eq!(changes.removed, vec![nevra("nano-7.2-1.x86_64")]);
        assert_eq!(
            changes.upgraded,
            vec![(nevra("bash-5.2-1.x86_64"), nevra("bash-5.2-2.x86_64"))]
        );
        assert!(changes.downgraded.is_empty());

        let all = recent_changes(&history, Some(0)).unwrap();
        assert!(all.installed.contains(&nevra("old-1.0-1.x86_64")));
    }

    #[test]
    fn test_changes_default_to_last_transaction() {
        let conn = db::open_in_memory().unwrap();
        record(&conn, &[("old-1.0-1.x86_64", Action::Install)], 100);
        record(&conn, &[("vim-9.1-1.x86_64", Action::Install)], 200);
        for n in ["old-1.0-1.x86_64", "vim-9.1-1.x86_64"] {
            InstalledPackage::new(nevra(n), "fedora", Reason::User)
                .insert(&conn)
                .unwrap();
        }

        let history = TransactionHistory::new(&conn);
        let changes = recent_changes(&history, None).unwrap();
        assert_eq!(changes.installed, vec![nevra("vim-9.1-1.x86_64")]);
    }
}
