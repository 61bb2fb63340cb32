// src/replay/store.rs

//! Reading and writing stored transactions
//!
//! A stored transaction is a directory holding `transaction.json` and,
//! optionally, one JSON definition per comps group or environment. Paths in
//! the transaction document are relative to that directory. Files are written
//! through a temporary file in the destination directory which is then renamed
//! over the target, so readers never see a partial document.

use super::TransactionReplay;
use crate::error::{Error, Result};
use crate::item::{
    Action, EnvironmentGroup, EnvironmentItem, GroupItem, GroupPackage, PackageType, Reason,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Name of the transaction document inside a stored transaction directory
pub const TRANSACTION_FILE: &str = "transaction.json";

/// Subdirectories for exported comps definitions
const GROUPS_DIR: &str = "groups";
const ENVIRONMENTS_DIR: &str = "environments";

/// Exported definition of a comps group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompsGroupDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub translated_name: String,
    #[serde(default)]
    pub packages: Vec<GroupPackage>,
}

impl CompsGroupDefinition {
    pub fn from_item(group: &GroupItem) -> Self {
        Self {
            id: group.group_id.clone(),
            name: group.name.clone(),
            translated_name: group.translated_name.clone(),
            packages: group.packages.clone(),
        }
    }

    pub fn into_item(self, action: Action, reason: Reason, repo_id: &str, types: &[PackageType]) -> GroupItem {
        let mut item = GroupItem::new(&self.id, action, reason, repo_id);
        item.name = self.name;
        item.translated_name = self.translated_name;
        if !types.is_empty() {
            item.package_types = types.to_vec();
        }
        item.packages = self.packages;
        item
    }
}

/// Exported definition of a comps environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompsEnvironmentDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub translated_name: String,
    #[serde(default)]
    pub groups: Vec<EnvironmentGroup>,
}

impl CompsEnvironmentDefinition {
    pub fn from_item(env: &EnvironmentItem) -> Self {
        Self {
            id: env.environment_id.clone(),
            name: env.name.clone(),
            translated_name: env.translated_name.clone(),
            groups: env.groups.clone(),
        }
    }

    pub fn into_item(self, action: Action, reason: Reason, repo_id: &str) -> EnvironmentItem {
        let mut item = EnvironmentItem::new(&self.id, action, reason, repo_id);
        item.name = self.name;
        item.translated_name = self.translated_name;
        item.groups = self.groups;
        item
    }
}

/// Write `content` to `path` via a temporary file and an atomic rename
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir)
        .map_err(|e| Error::IoError(format!("Failed to create {}: {}", dir.display(), e)))?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path)?;

    debug!("Wrote {}", path.display());
    Ok(())
}

/// Store `replay` as `transaction.json` inside `dir`, returning the file path
///
/// Groups and environments whose items are given get their definitions
/// exported next to the document, and the document points at them.
pub fn store_replay(
    replay: &TransactionReplay,
    groups: &[GroupItem],
    environments: &[EnvironmentItem],
    dir: &Path,
) -> Result<PathBuf> {
    let mut replay = replay.clone();

    for group in &mut replay.groups {
        if let Some(item) = groups.iter().find(|g| g.group_id == group.group_id) {
            let relative = Path::new(GROUPS_DIR).join(format!("{}.json", group.group_id));
            let json = serde_json::to_string_pretty(&CompsGroupDefinition::from_item(item))?;
            write_atomic(&dir.join(&relative), json.as_bytes())?;
            group.group_path = relative.to_string_lossy().into_owned();
        }
    }

    for env in &mut replay.environments {
        if let Some(item) = environments
            .iter()
            .find(|e| e.environment_id == env.environment_id)
        {
            let relative = Path::new(ENVIRONMENTS_DIR).join(format!("{}.json", env.environment_id));
            let json = serde_json::to_string_pretty(&CompsEnvironmentDefinition::from_item(item))?;
            write_atomic(&dir.join(&relative), json.as_bytes())?;
            env.environment_path = relative.to_string_lossy().into_owned();
        }
    }

    let path = dir.join(TRANSACTION_FILE);
    write_atomic(&path, replay.to_json()?.as_bytes())?;
    info!("Stored transaction to {}", path.display());
    Ok(path)
}

/// Write one `<id>.json` definition per group and environment into `comps_dir`
pub fn write_comps_definitions(
    groups: &[GroupItem],
    environments: &[EnvironmentItem],
    comps_dir: &Path,
) -> Result<()> {
    for group in groups {
        let json = serde_json::to_string_pretty(&CompsGroupDefinition::from_item(group))?;
        write_atomic(&comps_dir.join(format!("{}.json", group.group_id)), json.as_bytes())?;
    }
    for env in environments {
        let json = serde_json::to_string_pretty(&CompsEnvironmentDefinition::from_item(env))?;
        write_atomic(&comps_dir.join(format!("{}.json", env.environment_id)), json.as_bytes())?;
    }
    Ok(())
}

/// Load a stored transaction from a directory or a document path
///
/// Returns the replay and the directory its relative paths are based on.
pub fn load_replay(path: &Path) -> Result<(TransactionReplay, PathBuf)> {
    let file = if path.is_dir() {
        path.join(TRANSACTION_FILE)
    } else {
        path.to_path_buf()
    };
    let content = fs::read_to_string(&file)
        .map_err(|e| Error::ReplayError(format!("Can't read {}: {}", file.display(), e)))?;
    let replay = TransactionReplay::parse(&content)?;

    let base = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    Ok((replay, base))
}

/// Read a group definition referenced by a replay
pub fn load_group_definition(base: &Path, relative: &str) -> Result<CompsGroupDefinition> {
    let path = base.join(relative);
    let content = fs::read_to_string(&path)
        .map_err(|e| Error::ReplayError(format!("Can't read {}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&content)?)
}

/// Read an environment definition referenced by a replay
pub fn load_environment_definition(base: &Path, relative: &str) -> Result<CompsEnvironmentDefinition> {
    let path = base.join(relative);
    let content = fs::read_to_string(&path)
        .map_err(|e| Error::ReplayError(format!("Can't read {}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::{GroupReplay, PackageReplay};
    use tempfile::TempDir;

    fn sample_replay() -> TransactionReplay {
        TransactionReplay {
            packages: vec![PackageReplay {
                action: Action::Install,
                reason: Reason::User,
                group_id: String::new(),
                nevra: "bash-5.2-1.x86_64".to_string(),
                package_path: String::new(),
                repo_id: "fedora".to_string(),
            }],
            groups: vec![GroupReplay {
                action: Action::Install,
                reason: Reason::User,
                group_id: "core".to_string(),
                group_path: String::new(),
                repo_id: "fedora".to_string(),
                package_types: vec![PackageType::Mandatory],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_store_and_load() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("transaction");

        let mut group = GroupItem::new("core", Action::Install, Reason::User, "fedora");
        group.packages.push(GroupPackage {
            name: "bash".to_string(),
            installed: true,
            package_type: PackageType::Mandatory,
        });

        let path = store_replay(&sample_replay(), &[group.clone()], &[], &dir).unwrap();
        assert_eq!(path, dir.join(TRANSACTION_FILE));

        let (loaded, base) = load_replay(&dir).unwrap();
        assert_eq!(base, dir);
        assert_eq!(loaded.packages, sample_replay().packages);
        assert_eq!(loaded.groups[0].group_path, "groups/core.json");

        let definition = load_group_definition(&base, &loaded.groups[0].group_path).unwrap();
        assert_eq!(definition.packages, group.packages);
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");

        // Only the target remains; the temporary file was renamed over it
        let entries = fs::read_dir(temp.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_unpersisted_temp_file_leaves_destination_untouched() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(TRANSACTION_FILE);
        fs::write(&path, "original").unwrap();

        {
            let mut partial = NamedTempFile::new_in(temp.path()).unwrap();
            partial.write_all(b"{\"version\": ").unwrap();
            // Dropped before persist, as if the write were interrupted
        }

        assert_eq!(fs::read_to_string(&path).unwrap(), "original");
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = load_replay(&temp.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, Error::ReplayError(_)));
    }

    #[test]
    fn test_write_comps_definitions() {
        let temp = TempDir::new().unwrap();
        let group = GroupItem::new("core", Action::Install, Reason::User, "fedora");
        let env = EnvironmentItem::new("server", Action::Install, Reason::User, "fedora");

        write_comps_definitions(&[group], &[env], temp.path()).unwrap();
        assert!(temp.path().join("core.json").exists());
        assert!(temp.path().join("server.json").exists());
    }
}
