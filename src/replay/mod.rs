// src/replay/mod.rs

//! Serialized transactions
//!
//! A [`TransactionReplay`] is the portable description of a transaction used by
//! `store`, `replay`, `undo`, `redo` and `rollback`. On disk it is a JSON
//! document (format version "1.0"):
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "rpms": [{"nevra": "bash-5.2-1.x86_64", "action": "Install", "reason": "User", "repo_id": "fedora"}],
//!   "groups": [{"id": "core", "action": "Install", "reason": "User", "repo_id": "fedora",
//!               "package_types": "mandatory, default"}],
//!   "environments": [{"id": "server", "action": "Install", "repo_id": "fedora"}],
//!   "modules": [{"name": "nodejs", "stream": "18", "action": "Enable", "reason": "User"}]
//! }
//! ```

pub mod resolve;
pub mod store;

pub use resolve::{ReplaySettings, resolve_replay};
pub use store::{
    CompsEnvironmentDefinition, CompsGroupDefinition, TRANSACTION_FILE, load_environment_definition,
    load_group_definition, load_replay, store_replay, write_atomic, write_comps_definitions,
};

use crate::db::models::TransactionRecord;
use crate::error::{Error, Result};
use crate::item::{Action, PackageType, Reason};
use crate::version::Nevra;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Incompatible changes bump the major version
pub const VERSION_MAJOR: &str = "1";
/// Backwards compatible extensions bump the minor version
pub const VERSION_MINOR: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReplay {
    pub action: Action,
    pub reason: Reason,
    /// Only meaningful for `Reason Change` to reason `Group`
    pub group_id: String,
    pub nevra: String,
    pub package_path: String,
    pub repo_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupReplay {
    pub action: Action,
    pub reason: Reason,
    pub group_id: String,
    pub group_path: String,
    pub repo_id: String,
    pub package_types: Vec<PackageType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentReplay {
    pub action: Action,
    pub environment_id: String,
    pub environment_path: String,
    pub repo_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReplay {
    pub action: Action,
    pub reason: Reason,
    pub name: String,
    pub stream: String,
}

/// Portable description of one transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionReplay {
    pub packages: Vec<PackageReplay>,
    pub groups: Vec<GroupReplay>,
    pub environments: Vec<EnvironmentReplay>,
    pub modules: Vec<ModuleReplay>,
    pub releasever: String,
    pub user_id: Option<u32>,
    pub description: String,
    pub comment: String,
}

// On-disk shapes. Every field is optional here so that missing keys can be
// reported with the name of the key instead of a generic serde message.

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawReplay {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    rpms: Vec<RawPackage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    groups: Vec<RawGroup>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    environments: Vec<RawEnvironment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    modules: Vec<RawModule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    releasever: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawPackage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nevra: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    repo_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    package_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    repo_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    package_types: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawEnvironment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    environment_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    repo_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawModule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

fn required(value: Option<String>, key: &str, what: &str) -> Result<String> {
    value.ok_or_else(|| Error::ReplayError(format!("Missing object key \"{key}\" in {what}")))
}

fn parse_value<T: FromStr<Err = Error>>(value: &str) -> Result<T> {
    T::from_str(value).map_err(|e| Error::ReplayError(e.to_string()))
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn check_version(version: Option<&str>) -> Result<()> {
    let version = version.ok_or_else(|| Error::ReplayError("Missing key \"version\"".to_string()))?;

    let Some((major, minor)) = version.split_once('.') else {
        return Err(Error::ReplayError(format!(
            "Unexpected version format: \"{version}\", supported version is \"{VERSION_MAJOR}.{VERSION_MINOR}\""
        )));
    };
    if major != VERSION_MAJOR {
        return Err(Error::ReplayError(format!(
            "Incompatible major version: \"{major}\", supported major version is \"{VERSION_MAJOR}\""
        )));
    }
    if !minor.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::ReplayError(format!(
            "Invalid minor version: \"{minor}\", number expected"
        )));
    }
    Ok(())
}

impl TransactionReplay {
    /// Parse a serialized transaction
    pub fn parse(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Err(Error::ReplayError(
                "Serialized transaction input is empty".to_string(),
            ));
        }
        let raw: RawReplay = serde_json::from_str(json).map_err(|e| {
            Error::ReplayError(format!("Error during transaction replay JSON parsing: {e}"))
        })?;
        check_version(raw.version.as_deref())?;

        let mut replay = TransactionReplay {
            releasever: raw.releasever.unwrap_or_default(),
            user_id: raw.user_id,
            description: raw.description.unwrap_or_default(),
            comment: raw.comment.unwrap_or_default(),
            ..Default::default()
        };

        for env in raw.environments {
            let environment_id = required(env.id, "id", "an environment")?;
            let action = required(env.action, "action", "an environment")?;
            replay.environments.push(EnvironmentReplay {
                action: parse_value(&action)?,
                environment_id,
                environment_path: env.environment_path.unwrap_or_default(),
                repo_id: env.repo_id.unwrap_or_default(),
            });
        }

        for group in raw.groups {
            let group_id = required(group.id, "id", "a group")?;
            let action = required(group.action, "action", "a group")?;
            let reason = required(group.reason, "reason", "a group")?;
            let package_types = match group.package_types {
                Some(types) => PackageType::parse_list(&types)
                    .map_err(|e| Error::ReplayError(e.to_string()))?,
                None => Vec::new(),
            };
            replay.groups.push(GroupReplay {
                action: parse_value(&action)?,
                reason: parse_value(&reason)?,
                group_id,
                group_path: group.group_path.unwrap_or_default(),
                repo_id: group.repo_id.unwrap_or_default(),
                package_types,
            });
        }

        for pkg in raw.rpms {
            let nevra = pkg.nevra.unwrap_or_default();
            if !nevra.is_empty() && Nevra::parse(&nevra).is_err() {
                return Err(Error::ReplayError(format!(
                    "Cannot parse NEVRA for rpm \"{nevra}\""
                )));
            }
            let package_path = pkg.package_path.unwrap_or_default();
            if nevra.is_empty() && package_path.is_empty() {
                return Err(Error::ReplayError(
                    "Either \"nevra\" or \"package_path\" object key is required in an rpm".to_string(),
                ));
            }
            let action: Action = parse_value(&required(pkg.action, "action", "an rpm")?)?;
            let reason: Reason = parse_value(&required(pkg.reason, "reason", "an rpm")?)?;
            let group_id = match pkg.group_id {
                Some(group_id) => group_id,
                None if reason == Reason::Group && action == Action::ReasonChange => {
                    return Err(Error::ReplayError(
                        "Missing mandatory object key \"group_id\" in an rpm with reason \"Group\" and action \"Reason Change\"".to_string(),
                    ));
                }
                None => String::new(),
            };
            replay.packages.push(PackageReplay {
                action,
                reason,
                group_id,
                nevra,
                package_path,
                repo_id: pkg.repo_id.unwrap_or_default(),
            });
        }

        for module in raw.modules {
            let name = required(module.name, "name", "a module")?;
            let stream = required(module.stream, "stream", "a module")?;
            let action = required(module.action, "action", "a module")?;
            let reason = required(module.reason, "reason", "a module")?;
            replay.modules.push(ModuleReplay {
                action: parse_value(&action)?,
                reason: parse_value(&reason)?,
                name,
                stream,
            });
        }

        Ok(replay)
    }

    /// Serialize as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        let raw = RawReplay {
            version: Some(format!("{VERSION_MAJOR}.{VERSION_MINOR}")),
            rpms: self
                .packages
                .iter()
                .map(|p| RawPackage {
                    nevra: non_empty(&p.nevra),
                    action: Some(p.action.as_str().to_string()),
                    reason: Some(p.reason.as_str().to_string()),
                    repo_id: Some(p.repo_id.clone()),
                    package_path: non_empty(&p.package_path),
                    group_id: non_empty(&p.group_id),
                })
                .collect(),
            groups: self
                .groups
                .iter()
                .map(|g| RawGroup {
                    id: Some(g.group_id.clone()),
                    action: Some(g.action.as_str().to_string()),
                    reason: Some(g.reason.as_str().to_string()),
                    group_path: non_empty(&g.group_path),
                    repo_id: Some(g.repo_id.clone()),
                    package_types: Some(PackageType::join(&g.package_types)),
                })
                .collect(),
            environments: self
                .environments
                .iter()
                .map(|e| RawEnvironment {
                    id: Some(e.environment_id.clone()),
                    action: Some(e.action.as_str().to_string()),
                    environment_path: non_empty(&e.environment_path),
                    repo_id: Some(e.repo_id.clone()),
                })
                .collect(),
            modules: self
                .modules
                .iter()
                .map(|m| RawModule {
                    name: Some(m.name.clone()),
                    stream: Some(m.stream.clone()),
                    action: Some(m.action.as_str().to_string()),
                    reason: Some(m.reason.as_str().to_string()),
                })
                .collect(),
            releasever: non_empty(&self.releasever),
            user_id: self.user_id,
            description: non_empty(&self.description),
            comment: non_empty(&self.comment),
        };

        let mut json = serde_json::to_string_pretty(&raw)?;
        json.push('\n');
        Ok(json)
    }

    /// Describe a recorded transaction; the record's items must be loaded
    pub fn from_record(record: &TransactionRecord) -> Self {
        TransactionReplay {
            packages: record
                .packages
                .iter()
                .map(|p| PackageReplay {
                    action: p.info.action,
                    reason: p.info.reason,
                    group_id: String::new(),
                    nevra: p.nevra.to_string(),
                    package_path: String::new(),
                    repo_id: p.info.repo_id.clone(),
                })
                .collect(),
            groups: record
                .groups
                .iter()
                .map(|g| GroupReplay {
                    action: g.info.action,
                    reason: g.info.reason,
                    group_id: g.group_id.clone(),
                    group_path: String::new(),
                    repo_id: g.info.repo_id.clone(),
                    package_types: g.package_types.clone(),
                })
                .collect(),
            environments: record
                .environments
                .iter()
                .map(|e| EnvironmentReplay {
                    action: e.info.action,
                    environment_id: e.environment_id.clone(),
                    environment_path: String::new(),
                    repo_id: e.info.repo_id.clone(),
                })
                .collect(),
            modules: record
                .modules
                .iter()
                .map(|m| ModuleReplay {
                    action: m.info.action,
                    reason: m.info.reason,
                    name: m.name.clone(),
                    stream: m.stream.clone(),
                })
                .collect(),
            releasever: record.releasever.clone(),
            user_id: Some(record.user_id),
            description: record.description.clone(),
            comment: record.comment.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
            && self.groups.is_empty()
            && self.environments.is_empty()
            && self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::PackageItem;

    const SAMPLE: &str = r#"{
        "version": "1.0",
        "rpms": [
            {"nevra": "bash-5.2-1.x86_64", "action": "Upgrade", "reason": "User", "repo_id": "updates"},
            {"nevra": "bash-5.1-1.x86_64", "action": "Upgraded", "reason": "User", "repo_id": "@System"}
        ],
        "groups": [
            {"id": "core", "action": "Install", "reason": "User", "repo_id": "fedora",
             "package_types": "mandatory, default", "group_path": "comps/core.json"}
        ],
        "environments": [{"id": "server", "action": "Install", "repo_id": "fedora"}],
        "modules": [{"name": "nodejs", "stream": "18", "action": "Enable", "reason": "User"}],
        "description": "pkgtxn upgrade bash"
    }"#;

    #[test]
    fn test_parse_sample() {
        let replay = TransactionReplay::parse(SAMPLE).unwrap();

        assert_eq!(replay.packages.len(), 2);
        assert_eq!(replay.packages[1].action, Action::Replaced);
        assert_eq!(replay.groups[0].package_types, vec![PackageType::Mandatory, PackageType::Default]);
        assert_eq!(replay.groups[0].group_path, "comps/core.json");
        assert_eq!(replay.environments[0].environment_id, "server");
        assert_eq!(replay.modules[0].action, Action::Enable);
        assert_eq!(replay.description, "pkgtxn upgrade bash");
        assert_eq!(replay.user_id, None);
    }

    #[test]
    fn test_serialized_form_parses_back() {
        let replay = TransactionReplay::parse(SAMPLE).unwrap();
        let json = replay.to_json().unwrap();
        assert!(json.contains("\"version\": \"1.0\""));
        assert!(json.contains("\"action\": \"Replaced\""));
        assert_eq!(TransactionReplay::parse(&json).unwrap(), replay);
    }

    #[test]
    fn test_version_checks() {
        let err = TransactionReplay::parse(r#"{"rpms": []}"#).unwrap_err();
        assert!(err.to_string().contains("Missing key \"version\""));

        let err = TransactionReplay::parse(r#"{"version": "2.0"}"#).unwrap_err();
        assert!(err.to_string().contains("Incompatible major version"));

        let err = TransactionReplay::parse(r#"{"version": "1.x"}"#).unwrap_err();
        assert!(err.to_string().contains("Invalid minor version"));

        let err = TransactionReplay::parse(r#"{"version": "1"}"#).unwrap_err();
        assert!(err.to_string().contains("Unexpected version format"));

        assert!(TransactionReplay::parse(r#"{"version": "1.7"}"#).unwrap().is_empty());
    }

    #[test]
    fn test_missing_keys_are_named() {
        let err = TransactionReplay::parse(
            r#"{"version": "1.0", "rpms": [{"nevra": "a-1-1.noarch", "reason": "User"}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("\"action\" in an rpm"));

        let err = TransactionReplay::parse(
            r#"{"version": "1.0", "rpms": [{"action": "Install", "reason": "User"}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("\"nevra\" or \"package_path\""));

        let err = TransactionReplay::parse(
            r#"{"version": "1.0", "rpms": [{"nevra": "a-1-1.noarch", "action": "Reason Change", "reason": "Group"}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("group_id"));

        let err = TransactionReplay::parse(r#"{"version": "1.0", "groups": [{"id": "core", "action": "Install"}]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("\"reason\" in a group"));
    }

    #[test]
    fn test_unknown_action_is_replay_error() {
        let err = TransactionReplay::parse(
            r#"{"version": "1.0", "rpms": [{"nevra": "a-1-1.noarch", "action": "Frob", "reason": "User"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ReplayError(_)));
    }

    #[test]
    fn test_from_record() {
        let mut record = TransactionRecord::new();
        record.description = "install a".to_string();
        record.user_id = 1000;
        record.packages.push(PackageItem::new(
            Nevra::parse("a-0:1-1.noarch").unwrap(),
            Action::Install,
            Reason::User,
            "fedora",
        ));

        let replay = TransactionReplay::from_record(&record);
        assert_eq!(replay.packages[0].nevra, "a-1-1.noarch");
        assert_eq!(replay.user_id, Some(1000));
        assert_eq!(replay.description, "install a");
    }
}
