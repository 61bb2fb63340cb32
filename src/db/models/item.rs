// src/db/models/item.rs

//! Persistence of transaction items
//!
//! Every item gets a `trans_item` row holding the shared columns plus one row
//! in the table of its kind. Loading is batched: all items of a set of records
//! are fetched with one query per kind, regardless of how many records there are.

use super::trans::TransactionRecord;
use crate::error::Result;
use crate::item::{
    Action, EnvironmentGroup, EnvironmentItem, GroupItem, GroupPackage, ItemInfo, ItemKind,
    ModuleItem, PackageItem, PackageType, Reason, State,
};
use crate::version::Nevra;
use rusqlite::{Connection, Row, params};
use std::collections::HashMap;
use std::str::FromStr;

/// Encode values as one JSON array parameter, matched with
/// `IN (SELECT value FROM json_each(?1))`
///
/// A single parameter keeps the query within SQLite's variable limit however
/// many values there are.
pub(crate) fn json_list<T: serde::Serialize>(values: &[T]) -> Result<String> {
    Ok(serde_json::to_string(values)?)
}

/// Wrap an enum parse failure as a column conversion error
pub(crate) fn conversion_err(idx: usize, err: impl ToString) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err.to_string(),
        )),
    )
}

fn insert_common(
    conn: &Connection,
    trans_id: i64,
    kind: ItemKind,
    seq: usize,
    info: &ItemInfo,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO trans_item (trans_id, item_type, seq, action, reason, state, repo_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            trans_id,
            kind.as_str(),
            seq as i64,
            info.action.as_str(),
            info.reason.as_str(),
            info.state.as_str(),
            &info.repo_id
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert all items of `record` under `trans_id`, assigning their row ids
pub(crate) fn insert_items(conn: &Connection, trans_id: i64, record: &mut TransactionRecord) -> Result<()> {
    let mut seq = 0;

    for pkg in &mut record.packages {
        let id = insert_common(conn, trans_id, ItemKind::Package, seq, &pkg.info)?;
        conn.execute(
            "INSERT INTO rpm (item_id, name, epoch, version, release, arch) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                &pkg.nevra.name,
                pkg.nevra.epoch,
                &pkg.nevra.version,
                &pkg.nevra.release,
                &pkg.nevra.arch
            ],
        )?;
        pkg.info.id = id;
        seq += 1;
    }

    for group in &mut record.groups {
        let id = insert_common(conn, trans_id, ItemKind::Group, seq, &group.info)?;
        conn.execute(
            "INSERT INTO comps_group (item_id, groupid, name, translated_name, package_types)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                &group.group_id,
                &group.name,
                &group.translated_name,
                PackageType::join(&group.package_types)
            ],
        )?;
        for member in &group.packages {
            conn.execute(
                "INSERT INTO comps_group_package (group_item_id, name, installed, pkg_type)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, &member.name, member.installed, member.package_type.as_str()],
            )?;
        }
        group.info.id = id;
        seq += 1;
    }

    for env in &mut record.environments {
        let id = insert_common(conn, trans_id, ItemKind::Environment, seq, &env.info)?;
        conn.execute(
            "INSERT INTO comps_environment (item_id, environmentid, name, translated_name, package_types)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                &env.environment_id,
                &env.name,
                &env.translated_name,
                PackageType::join(&env.package_types)
            ],
        )?;
        for member in &env.groups {
            conn.execute(
                "INSERT INTO comps_environment_group (environment_item_id, groupid, installed, optional)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, &member.group_id, member.installed, member.optional],
            )?;
        }
        env.info.id = id;
        seq += 1;
    }

    for module in &mut record.modules {
        let id = insert_common(conn, trans_id, ItemKind::Module, seq, &module.info)?;
        conn.execute(
            "INSERT INTO module (item_id, name, stream) VALUES (?1, ?2, ?3)",
            params![id, &module.name, &module.stream],
        )?;
        module.info.id = id;
        seq += 1;
    }

    Ok(())
}

/// Parse the shared columns `id, action, reason, state, repo_id` starting at `offset`
fn info_from_row(row: &Row, offset: usize) -> rusqlite::Result<ItemInfo> {
    let action: String = row.get(offset + 1)?;
    let reason: String = row.get(offset + 2)?;
    let state: String = row.get(offset + 3)?;

    Ok(ItemInfo {
        id: row.get(offset)?,
        action: Action::from_str(&action).map_err(|e| conversion_err(offset + 1, e))?,
        reason: Reason::from_str(&reason).map_err(|e| conversion_err(offset + 2, e))?,
        state: State::from_str(&state).map_err(|e| conversion_err(offset + 3, e))?,
        repo_id: row.get(offset + 4)?,
    })
}

const COMMON_COLUMNS: &str = "ti.trans_id, ti.id, ti.action, ti.reason, ti.state, ti.repo_id";

/// Load the items of every record in `records`, replacing whatever they held
pub(crate) fn load_items(conn: &Connection, records: &mut [TransactionRecord]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let index: HashMap<i64, usize> = records
        .iter()
        .enumerate()
        .map(|(pos, record)| (record.id, pos))
        .collect();
    let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
    let ids = json_list(&ids)?;

    for record in records.iter_mut() {
        record.packages.clear();
        record.groups.clear();
        record.environments.clear();
        record.modules.clear();
    }

    // Packages
    let sql = format!(
        "SELECT {COMMON_COLUMNS}, r.name, r.epoch, r.version, r.release, r.arch
         FROM trans_item ti JOIN rpm r ON r.item_id = ti.id
         WHERE ti.trans_id IN (SELECT value FROM json_each(?1)) ORDER BY ti.trans_id, ti.seq"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([&ids], |row| {
            let trans_id: i64 = row.get(0)?;
            let info = info_from_row(row, 1)?;
            let nevra = Nevra {
                name: row.get(6)?,
                epoch: row.get(7)?,
                version: row.get(8)?,
                release: row.get(9)?,
                arch: row.get(10)?,
            };
            Ok((trans_id, PackageItem { info, nevra }))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (trans_id, pkg) in rows {
        if let Some(&pos) = index.get(&trans_id) {
            records[pos].packages.push(pkg);
        }
    }

    // Groups and their member packages
    let sql = format!(
        "SELECT {COMMON_COLUMNS}, g.groupid, g.name, g.translated_name, g.package_types
         FROM trans_item ti JOIN comps_group g ON g.item_id = ti.id
         WHERE ti.trans_id IN (SELECT value FROM json_each(?1)) ORDER BY ti.trans_id, ti.seq"
    );
    let mut stmt = conn.prepare(&sql)?;
    let groups = stmt
        .query_map([&ids], |row| {
            let trans_id: i64 = row.get(0)?;
            let info = info_from_row(row, 1)?;
            let types: String = row.get(9)?;
            Ok((
                trans_id,
                GroupItem {
                    info,
                    group_id: row.get(6)?,
                    name: row.get(7)?,
                    translated_name: row.get(8)?,
                    package_types: PackageType::parse_list(&types)
                        .map_err(|e| conversion_err(9, e))?,
                    packages: Vec::new(),
                },
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let sql = "SELECT p.group_item_id, p.name, p.installed, p.pkg_type
         FROM comps_group_package p JOIN trans_item ti ON ti.id = p.group_item_id
         WHERE ti.trans_id IN (SELECT value FROM json_each(?1)) ORDER BY p.id";
    let mut stmt = conn.prepare(sql)?;
    let mut members: HashMap<i64, Vec<GroupPackage>> = HashMap::new();
    let rows = stmt
        .query_map([&ids], |row| {
            let pkg_type: String = row.get(3)?;
            Ok((
                row.get::<_, i64>(0)?,
                GroupPackage {
                    name: row.get(1)?,
                    installed: row.get(2)?,
                    package_type: PackageType::from_str(&pkg_type)
                        .map_err(|e| conversion_err(3, e))?,
                },
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (item_id, member) in rows {
        members.entry(item_id).or_default().push(member);
    }
    for (trans_id, mut group) in groups {
        group.packages = members.remove(&group.info.id).unwrap_or_default();
        if let Some(&pos) = index.get(&trans_id) {
            records[pos].groups.push(group);
        }
    }

    // Environments and their member groups
    let sql = format!(
        "SELECT {COMMON_COLUMNS}, e.environmentid, e.name, e.translated_name, e.package_types
         FROM trans_item ti JOIN comps_environment e ON e.item_id = ti.id
         WHERE ti.trans_id IN (SELECT value FROM json_each(?1)) ORDER BY ti.trans_id, ti.seq"
    );
    let mut stmt = conn.prepare(&sql)?;
    let environments = stmt
        .query_map([&ids], |row| {
            let trans_id: i64 = row.get(0)?;
            let info = info_from_row(row, 1)?;
            let types: String = row.get(9)?;
            Ok((
                trans_id,
                EnvironmentItem {
                    info,
                    environment_id: row.get(6)?,
                    name: row.get(7)?,
                    translated_name: row.get(8)?,
                    package_types: PackageType::parse_list(&types)
                        .map_err(|e| conversion_err(9, e))?,
                    groups: Vec::new(),
                },
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let sql = "SELECT g.environment_item_id, g.groupid, g.installed, g.optional
         FROM comps_environment_group g JOIN trans_item ti ON ti.id = g.environment_item_id
         WHERE ti.trans_id IN (SELECT value FROM json_each(?1)) ORDER BY g.id";
    let mut stmt = conn.prepare(sql)?;
    let mut env_groups: HashMap<i64, Vec<EnvironmentGroup>> = HashMap::new();
    let rows = stmt
        .query_map([&ids], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                EnvironmentGroup {
                    group_id: row.get(1)?,
                    installed: row.get(2)?,
                    optional: row.get(3)?,
                },
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (item_id, member) in rows {
        env_groups.entry(item_id).or_default().push(member);
    }
    for (trans_id, mut env) in environments {
        env.groups = env_groups.remove(&env.info.id).unwrap_or_default();
        if let Some(&pos) = index.get(&trans_id) {
            records[pos].environments.push(env);
        }
    }

    // Modules
    let sql = format!(
        "SELECT {COMMON_COLUMNS}, m.name, m.stream
         FROM trans_item ti JOIN module m ON m.item_id = ti.id
         WHERE ti.trans_id IN (SELECT value FROM json_each(?1)) ORDER BY ti.trans_id, ti.seq"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([&ids], |row| {
            let trans_id: i64 = row.get(0)?;
            Ok((
                trans_id,
                ModuleItem {
                    info: info_from_row(row, 1)?,
                    name: row.get(6)?,
                    stream: row.get(7)?,
                },
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (trans_id, module) in rows {
        if let Some(&pos) = index.get(&trans_id) {
            records[pos].modules.push(module);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        schema::migrate(&conn).unwrap();
        (temp_file, conn)
    }

    #[test]
    fn test_all_kinds_survive_persistence() {
        let (_temp, conn) = create_test_db();

        let mut record = TransactionRecord::new();
        record.packages.push(PackageItem::new(
            Nevra::parse("bash-1:5.2-1.x86_64").unwrap(),
            Action::Upgrade,
            Reason::User,
            "updates",
        ));

        let mut group = GroupItem::new("core", Action::Install, Reason::User, "fedora");
        group.name = "Core".to_string();
        group.packages.push(GroupPackage {
            name: "bash".to_string(),
            installed: true,
            package_type: PackageType::Mandatory,
        });
        record.groups.push(group);

        let mut env = EnvironmentItem::new("server", Action::Install, Reason::User, "fedora");
        env.groups.push(EnvironmentGroup {
            group_id: "core".to_string(),
            installed: true,
            optional: false,
        });
        record.environments.push(env);

        record
            .modules
            .push(ModuleItem::new("nodejs", "18", Action::Enable, Reason::User));

        let id = record.start(&conn).unwrap();
        let stored = TransactionRecord::find_by_id(&conn, id).unwrap().unwrap();

        assert_eq!(stored.packages, record.packages);
        assert_eq!(stored.groups, record.groups);
        assert_eq!(stored.environments, record.environments);
        assert_eq!(stored.modules, record.modules);
        assert_eq!(stored.packages[0].nevra.epoch, 1);
    }

    #[test]
    fn test_batch_load_distributes_items() {
        let (_temp, conn) = create_test_db();

        let mut first = TransactionRecord::new();
        first.packages.push(PackageItem::new(
            Nevra::parse("a-1-1.noarch").unwrap(),
            Action::Install,
            Reason::User,
            "repo",
        ));
        first.start(&conn).unwrap();

        let mut second = TransactionRecord::new();
        second.packages.push(PackageItem::new(
            Nevra::parse("b-1-1.noarch").unwrap(),
            Action::Install,
            Reason::Dependency,
            "repo",
        ));
        second.packages.push(PackageItem::new(
            Nevra::parse("c-1-1.noarch").unwrap(),
            Action::Install,
            Reason::Dependency,
            "repo",
        ));
        second.start(&conn).unwrap();

        let mut records = vec![
            TransactionRecord { id: second.id, ..TransactionRecord::new() },
            TransactionRecord { id: first.id, ..TransactionRecord::new() },
        ];
        load_items(&conn, &mut records).unwrap();

        assert_eq!(records[0].packages.len(), 2);
        assert_eq!(records[0].packages[0].name(), "b");
        assert_eq!(records[1].packages.len(), 1);
        assert_eq!(records[1].packages[0].name(), "a");
    }

    #[test]
    fn test_json_list() {
        assert_eq!(json_list(&[3_i64, 1]).unwrap(), "[3,1]");
        assert_eq!(json_list(&["vim", "bash"]).unwrap(), r#"["vim","bash"]"#);
    }
}
