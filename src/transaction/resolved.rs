// src/transaction/resolved.rs

//! In-memory plan handed to the execution engine

use crate::config::Config;
use crate::db::models::TransactionRecord;
use crate::item::{Action, EnvironmentItem, GroupItem, ModuleItem, PackageItem, Reason};
use crate::replay::{EnvironmentReplay, GroupReplay, ModuleReplay, PackageReplay, TransactionReplay};
use crate::version::Nevra;
use std::path::{Path, PathBuf};

/// A package item together with its relationships inside one resolved transaction
///
/// Relationships are indices into the owning transaction's package list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub item: PackageItem,
    /// Installed-database record id of the package an outbound action removes
    pub rpmdb_id: i64,
    /// Local file to install from, once downloaded
    pub package_path: Option<PathBuf>,
    /// Group a `Reason Change` to `Group` attributes the package to
    pub reason_change_group_id: Option<String>,
    pub replaces: Option<usize>,
    pub replaced_by: Vec<usize>,
    pub obsoletes: Vec<usize>,
}

impl ResolvedPackage {
    pub fn new(item: PackageItem) -> Self {
        Self {
            item,
            rpmdb_id: 0,
            package_path: None,
            reason_change_group_id: None,
            replaces: None,
            replaced_by: Vec::new(),
            obsoletes: Vec::new(),
        }
    }

    pub fn nevra(&self) -> &Nevra {
        &self.item.nevra
    }

    pub fn action(&self) -> Action {
        self.item.info.action
    }

    pub fn reason(&self) -> Reason {
        self.item.info.reason
    }
}

/// Result of a resolution step, not yet executed
#[derive(Debug, Clone, Default)]
pub struct ResolvedTransaction {
    pub packages: Vec<ResolvedPackage>,
    pub groups: Vec<GroupItem>,
    pub environments: Vec<EnvironmentItem>,
    pub modules: Vec<ModuleItem>,

    /// Warnings and notes produced while resolving
    pub resolve_logs: Vec<String>,
    /// Problems that prevent running
    pub problems: Vec<String>,

    pub description: String,
    pub comment: String,
    pub user_id: u32,

    /// Backend check and run problems of the last attempt
    pub(crate) transaction_problems: Vec<String>,
    /// Signature verification problems of the last check
    pub(crate) signature_problems: Vec<String>,
    pub(crate) run_attempted: bool,
    pub(crate) history_id: Option<i64>,
}

impl ResolvedTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
            && self.groups.is_empty()
            && self.environments.is_empty()
            && self.modules.is_empty()
    }

    pub fn transaction_problems(&self) -> &[String] {
        &self.transaction_problems
    }

    pub fn signature_problems(&self) -> &[String] {
        &self.signature_problems
    }

    /// Id of the history record written by a successful start, if any
    pub fn history_id(&self) -> Option<i64> {
        self.history_id
    }

    /// Push a package, returning its index
    pub fn add_package(&mut self, package: ResolvedPackage) -> usize {
        self.packages.push(package);
        self.packages.len() - 1
    }

    /// Record that the inbound package at `inbound` supersedes the one at `outbound`
    pub fn link_replacement(&mut self, inbound: usize, outbound: usize) {
        self.packages[inbound].replaces = Some(outbound);
        if !self.packages[outbound].replaced_by.contains(&inbound) {
            self.packages[outbound].replaced_by.push(inbound);
        }
    }

    /// Build the history record describing this transaction
    pub(crate) fn to_record(&self, config: &Config) -> TransactionRecord {
        let mut record = TransactionRecord::new();
        record.releasever = config.releasever.clone().unwrap_or_default();
        record.user_id = self.user_id;
        record.description = self.description.clone();
        record.comment = self.comment.clone();
        record.packages = self.packages.iter().map(|p| p.item.clone()).collect();
        record.groups = self.groups.clone();
        record.environments = self.environments.clone();
        record.modules = self.modules.clone();
        record
    }

    /// Describe this transaction for later replay
    ///
    /// With `packages_path`, inbound packages that have a local file point at
    /// `<packages_path>/<file name>`. With `comps_path`, groups and
    /// environments point at `<comps_path>/<id>.json`, which
    /// [`ResolvedTransaction::store_comps`] writes.
    pub fn to_replay(&self, packages_path: Option<&Path>, comps_path: Option<&Path>) -> TransactionReplay {
        let packages = self
            .packages
            .iter()
            .map(|p| {
                let package_path = match (packages_path, &p.package_path) {
                    (Some(dir), Some(file)) if p.action().is_inbound() => file
                        .file_name()
                        .map(|name| dir.join(name).to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    _ => String::new(),
                };
                PackageReplay {
                    action: p.action(),
                    reason: p.reason(),
                    group_id: p.reason_change_group_id.clone().unwrap_or_default(),
                    nevra: p.nevra().to_string(),
                    package_path,
                    repo_id: p.item.info.repo_id.clone(),
                }
            })
            .collect();

        let comps_file = |id: &str| {
            comps_path
                .map(|dir| dir.join(format!("{id}.json")).to_string_lossy().into_owned())
                .unwrap_or_default()
        };

        TransactionReplay {
            packages,
            groups: self
                .groups
                .iter()
                .map(|g| GroupReplay {
                    action: g.info.action,
                    reason: g.info.reason,
                    group_id: g.group_id.clone(),
                    group_path: comps_file(&g.group_id),
                    repo_id: g.info.repo_id.clone(),
                    package_types: g.package_types.clone(),
                })
                .collect(),
            environments: self
                .environments
                .iter()
                .map(|e| EnvironmentReplay {
                    action: e.info.action,
                    environment_id: e.environment_id.clone(),
                    environment_path: comps_file(&e.environment_id),
                    repo_id: e.info.repo_id.clone(),
                })
                .collect(),
            modules: self
                .modules
                .iter()
                .map(|m| ModuleReplay {
                    action: m.info.action,
                    reason: m.info.reason,
                    name: m.name.clone(),
                    stream: m.stream.clone(),
                })
                .collect(),
            releasever: String::new(),
            user_id: Some(self.user_id),
            description: self.description.clone(),
            comment: self.comment.clone(),
        }
    }

    /// Serialized replay document, see [`ResolvedTransaction::to_replay`]
    pub fn serialize(&self, packages_path: Option<&Path>, comps_path: Option<&Path>) -> crate::Result<String> {
        self.to_replay(packages_path, comps_path).to_json()
    }

    /// Write one `<id>.json` definition per group and environment into `comps_path`
    pub fn store_comps(&self, comps_path: &Path) -> crate::Result<()> {
        crate::replay::write_comps_definitions(&self.groups, &self.environments, comps_path)
    }
}
