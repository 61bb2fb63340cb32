// src/db/models/installed.rs

//! Installed-system state: packages, comps groups, environments and module streams

use super::item::conversion_err;
use crate::error::{Error, Result};
use crate::item::{PackageType, Reason};
use crate::version::Nevra;
use rusqlite::{Connection, OptionalExtension, Row, params};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

const PACKAGE_COLUMNS: &str = "id, name, epoch, version, release, arch, repo_id, reason";

/// A package present in the installed database
///
/// `id` is the installed-database record id that erase elements address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub id: i64,
    pub nevra: Nevra,
    pub repo_id: String,
    pub reason: Reason,
}

impl InstalledPackage {
    pub fn new(nevra: Nevra, repo_id: &str, reason: Reason) -> Self {
        Self {
            id: 0,
            nevra,
            repo_id: repo_id.to_string(),
            reason,
        }
    }

    /// Insert this package, returning its record id
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO installed_package (name, epoch, version, release, arch, repo_id, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &self.nevra.name,
                self.nevra.epoch,
                &self.nevra.version,
                &self.nevra.release,
                &self.nevra.arch,
                &self.repo_id,
                self.reason.as_str()
            ],
        )?;
        self.id = conn.last_insert_rowid();
        Ok(self.id)
    }

    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let sql = format!("SELECT {PACKAGE_COLUMNS} FROM installed_package WHERE id = ?1");
        Ok(conn.query_row(&sql, [id], Self::from_row).optional()?)
    }

    pub fn find_by_nevra(conn: &Connection, nevra: &Nevra) -> Result<Option<Self>> {
        let sql = format!(
            "SELECT {PACKAGE_COLUMNS} FROM installed_package
             WHERE name = ?1 AND epoch = ?2 AND version = ?3 AND release = ?4 AND arch = ?5"
        );
        Ok(conn
            .query_row(
                &sql,
                params![
                    &nevra.name,
                    nevra.epoch,
                    &nevra.version,
                    &nevra.release,
                    &nevra.arch
                ],
                Self::from_row,
            )
            .optional()?)
    }

    /// All installed versions of `name.arch`
    pub fn find_by_name_arch(conn: &Connection, name: &str, arch: &str) -> Result<Vec<Self>> {
        let sql = format!(
            "SELECT {PACKAGE_COLUMNS} FROM installed_package WHERE name = ?1 AND arch = ?2 ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let packages = stmt
            .query_map(params![name, arch], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(packages)
    }

    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Vec<Self>> {
        let sql = format!("SELECT {PACKAGE_COLUMNS} FROM installed_package WHERE name = ?1 ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let packages = stmt
            .query_map([name], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(packages)
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let sql = format!("SELECT {PACKAGE_COLUMNS} FROM installed_package ORDER BY name, arch, id");
        let mut stmt = conn.prepare(&sql)?;
        let packages = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(packages)
    }

    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        let removed = conn.execute("DELETE FROM installed_package WHERE id = ?1", [id])?;
        if removed == 0 {
            return Err(Error::NotFound(format!("Installed package record {id}")));
        }
        Ok(())
    }

    /// Set the reason of every installed version of `name.arch`
    pub fn set_reason(conn: &Connection, name: &str, arch: &str, reason: Reason) -> Result<usize> {
        Ok(conn.execute(
            "UPDATE installed_package SET reason = ?1 WHERE name = ?2 AND arch = ?3",
            params![reason.as_str(), name, arch],
        )?)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let reason: String = row.get(7)?;
        Ok(Self {
            id: row.get(0)?,
            nevra: Nevra {
                name: row.get(1)?,
                epoch: row.get(2)?,
                version: row.get(3)?,
                release: row.get(4)?,
                arch: row.get(5)?,
            },
            repo_id: row.get(6)?,
            reason: Reason::from_str(&reason).map_err(|e| conversion_err(7, e))?,
        })
    }
}

/// Fingerprint of the installed package set: `<count>:<sha256 of sorted NEVRAs>`
pub fn rpmdb_cookie(conn: &Connection) -> Result<String> {
    let mut nevras: Vec<String> = InstalledPackage::list_all(conn)?
        .iter()
        .map(|p| p.nevra.to_full_string())
        .collect();
    nevras.sort();

    let mut hasher = Sha256::new();
    for nevra in &nevras {
        hasher.update(nevra.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("{}:{}", nevras.len(), hex::encode(hasher.finalize())))
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect()
}

/// An installed comps group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledGroup {
    pub group_id: String,
    pub reason: Reason,
    pub package_types: Vec<PackageType>,
    /// Names of the packages installed with the group
    pub packages: Vec<String>,
}

impl InstalledGroup {
    /// Insert or replace the group state
    pub fn save(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO installed_group (groupid, reason, package_types, packages)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                &self.group_id,
                self.reason.as_str(),
                PackageType::join(&self.package_types),
                self.packages.join(",")
            ],
        )?;
        Ok(())
    }

    pub fn find(conn: &Connection, group_id: &str) -> Result<Option<Self>> {
        Ok(conn
            .query_row(
                "SELECT groupid, reason, package_types, packages FROM installed_group WHERE groupid = ?1",
                [group_id],
                Self::from_row,
            )
            .optional()?)
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT groupid, reason, package_types, packages FROM installed_group ORDER BY groupid",
        )?;
        let groups = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(groups)
    }

    pub fn delete(conn: &Connection, group_id: &str) -> Result<()> {
        conn.execute("DELETE FROM installed_group WHERE groupid = ?1", [group_id])?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let reason: String = row.get(1)?;
        let types: String = row.get(2)?;
        let packages: String = row.get(3)?;
        Ok(Self {
            group_id: row.get(0)?,
            reason: Reason::from_str(&reason).map_err(|e| conversion_err(1, e))?,
            package_types: PackageType::parse_list(&types).map_err(|e| conversion_err(2, e))?,
            packages: split_list(&packages),
        })
    }
}

/// An installed comps environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledEnvironment {
    pub environment_id: String,
    pub groups: Vec<String>,
}

impl InstalledEnvironment {
    pub fn save(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO installed_environment (environmentid, groups) VALUES (?1, ?2)",
            params![&self.environment_id, self.groups.join(",")],
        )?;
        Ok(())
    }

    pub fn find(conn: &Connection, environment_id: &str) -> Result<Option<Self>> {
        Ok(conn
            .query_row(
                "SELECT environmentid, groups FROM installed_environment WHERE environmentid = ?1",
                [environment_id],
                |row| {
                    let groups: String = row.get(1)?;
                    Ok(Self {
                        environment_id: row.get(0)?,
                        groups: split_list(&groups),
                    })
                },
            )
            .optional()?)
    }

    pub fn delete(conn: &Connection, environment_id: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM installed_environment WHERE environmentid = ?1",
            [environment_id],
        )?;
        Ok(())
    }
}

/// Enablement of a module stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    Enabled,
    Disabled,
}

impl ModuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Enabled => "enabled",
            ModuleStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "enabled" => Ok(ModuleStatus::Enabled),
            "disabled" => Ok(ModuleStatus::Disabled),
            _ => Err(Error::InvalidValue(format!("Unknown module state: {s}"))),
        }
    }
}

/// Persisted module stream state; a reset module has no row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleState {
    pub name: String,
    pub stream: String,
    pub status: ModuleStatus,
}

impl ModuleState {
    pub fn save(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO module_state (name, stream, state) VALUES (?1, ?2, ?3)",
            params![&self.name, &self.stream, self.status.as_str()],
        )?;
        Ok(())
    }

    pub fn find(conn: &Connection, name: &str) -> Result<Option<Self>> {
        Ok(conn
            .query_row(
                "SELECT name, stream, state FROM module_state WHERE name = ?1",
                [name],
                |row| {
                    let status: String = row.get(2)?;
                    Ok(Self {
                        name: row.get(0)?,
                        stream: row.get(1)?,
                        status: ModuleStatus::from_str(&status).map_err(|e| conversion_err(2, e))?,
                    })
                },
            )
            .optional()?)
    }

    pub fn reset(conn: &Connection, name: &str) -> Result<()> {
        conn.execute("DELETE FROM module_state WHERE name = ?1", [name])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        schema::migrate(&conn).unwrap();
        (temp_file, conn)
    }

    fn install(conn: &Connection, nevra: &str, reason: Reason) -> i64 {
        InstalledPackage::new(Nevra::parse(nevra).unwrap(), "fedora", reason)
            .insert(conn)
            .unwrap()
    }

    #[test]
    fn test_installed_package_crud() {
        let (_temp, conn) = create_test_db();

        let id = install(&conn, "kernel-6.1-1.x86_64", Reason::User);
        install(&conn, "kernel-6.2-1.x86_64", Reason::User);

        let found = InstalledPackage::find_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(found.nevra.to_string(), "kernel-6.1-1.x86_64");

        let versions = InstalledPackage::find_by_name_arch(&conn, "kernel", "x86_64").unwrap();
        assert_eq!(versions.len(), 2);

        InstalledPackage::set_reason(&conn, "kernel", "x86_64", Reason::Dependency).unwrap();
        let found = InstalledPackage::find_by_nevra(&conn, &Nevra::parse("kernel-6.2-1.x86_64").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(found.reason, Reason::Dependency);

        InstalledPackage::delete(&conn, id).unwrap();
        assert!(InstalledPackage::find_by_id(&conn, id).unwrap().is_none());
        assert!(matches!(InstalledPackage::delete(&conn, id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_cookie_tracks_installed_set() {
        let (_temp, conn) = create_test_db();

        let empty = rpmdb_cookie(&conn).unwrap();
        assert!(empty.starts_with("0:"));

        install(&conn, "b-1-1.noarch", Reason::User);
        install(&conn, "a-1-1.noarch", Reason::User);
        let cookie = rpmdb_cookie(&conn).unwrap();
        assert!(cookie.starts_with("2:"));
        assert_ne!(cookie, empty);
        assert_eq!(cookie, rpmdb_cookie(&conn).unwrap());
    }

    #[test]
    fn test_group_and_module_state() {
        let (_temp, conn) = create_test_db();

        let group = InstalledGroup {
            group_id: "core".to_string(),
            reason: Reason::User,
            package_types: vec![PackageType::Mandatory],
            packages: vec!["bash".to_string(), "coreutils".to_string()],
        };
        group.save(&conn).unwrap();
        assert_eq!(InstalledGroup::find(&conn, "core").unwrap(), Some(group));
        InstalledGroup::delete(&conn, "core").unwrap();
        assert!(InstalledGroup::list_all(&conn).unwrap().is_empty());

        let module = ModuleState {
            name: "nodejs".to_string(),
            stream: "18".to_string(),
            status: ModuleStatus::Enabled,
        };
        module.save(&conn).unwrap();
        assert_eq!(ModuleState::find(&conn, "nodejs").unwrap(), Some(module));
        ModuleState::reset(&conn, "nodejs").unwrap();
        assert!(ModuleState::find(&conn, "nodejs").unwrap().is_none());
    }
}
