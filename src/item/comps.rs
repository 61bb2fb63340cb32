// src/item/comps.rs

//! Comps group and environment items

use super::{Action, ItemInfo, Reason};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Membership class of a package inside a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Mandatory,
    Default,
    Optional,
    Conditional,
}

impl PackageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageType::Mandatory => "mandatory",
            PackageType::Default => "default",
            PackageType::Optional => "optional",
            PackageType::Conditional => "conditional",
        }
    }

    /// Render a set of types as `mandatory, default, ...`
    pub fn join(types: &[PackageType]) -> String {
        types
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Parse a comma separated list; empty input yields no types
    pub fn parse_list(s: &str) -> Result<Vec<PackageType>> {
        s.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mandatory" => Ok(PackageType::Mandatory),
            "default" => Ok(PackageType::Default),
            "optional" => Ok(PackageType::Optional),
            "conditional" => Ok(PackageType::Conditional),
            _ => Err(Error::InvalidValue(format!("Unknown comps package type: {s}"))),
        }
    }
}

/// Package listed in a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPackage {
    pub name: String,
    pub installed: bool,
    pub package_type: PackageType,
}

/// A comps group taking part in a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupItem {
    pub info: ItemInfo,
    pub group_id: String,
    pub name: String,
    pub translated_name: String,
    pub package_types: Vec<PackageType>,
    pub packages: Vec<GroupPackage>,
}

impl GroupItem {
    pub fn new(group_id: &str, action: Action, reason: Reason, repo_id: &str) -> Self {
        Self {
            info: ItemInfo::new(action, reason, repo_id),
            group_id: group_id.to_string(),
            name: String::new(),
            translated_name: String::new(),
            package_types: vec![PackageType::Mandatory, PackageType::Default, PackageType::Conditional],
            packages: Vec::new(),
        }
    }
}

/// Group listed in an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentGroup {
    pub group_id: String,
    pub installed: bool,
    pub optional: bool,
}

/// A comps environment taking part in a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentItem {
    pub info: ItemInfo,
    pub environment_id: String,
    pub name: String,
    pub translated_name: String,
    pub package_types: Vec<PackageType>,
    pub groups: Vec<EnvironmentGroup>,
}

impl EnvironmentItem {
    pub fn new(environment_id: &str, action: Action, reason: Reason, repo_id: &str) -> Self {
        Self {
            info: ItemInfo::new(action, reason, repo_id),
            environment_id: environment_id.to_string(),
            name: String::new(),
            translated_name: String::new(),
            package_types: vec![PackageType::Mandatory, PackageType::Default, PackageType::Conditional],
            groups: Vec::new(),
        }
    }
}
