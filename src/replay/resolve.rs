// src/replay/resolve.rs

//! Turning a replay into a resolved transaction
//!
//! Resolution works directly against the installed set: every stored action
//! is checked against what is installed now, outbound items get the record
//! id they remove, and inbound items that replace an installed version are
//! linked to the outbound item for it. Checks that fail become problems, or
//! log entries when the matching setting tolerates them.

use super::{EnvironmentReplay, GroupReplay, ModuleReplay, PackageReplay, TransactionReplay};
use super::{load_environment_definition, load_group_definition};
use crate::config::Config;
use crate::db::models::{InstalledEnvironment, InstalledGroup, InstalledPackage};
use crate::error::{Error, Result};
use crate::item::{
    Action, EnvironmentGroup, EnvironmentItem, GroupItem, GroupPackage, ModuleItem, PackageItem,
    PackageType, Reason,
};
use crate::transaction::{ResolvedPackage, ResolvedTransaction};
use crate::version::Nevra;
use rusqlite::Connection;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// How strictly a replay is matched against the installed system
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySettings {
    /// Mismatches with the installed set are warnings instead of problems
    pub ignore_installed: bool,
    /// Packages pulled in beyond the stored ones are warnings instead of problems
    pub ignore_extras: bool,
    /// Stored reasons win over installed ones
    pub override_reasons: bool,
    /// Missing packages and definitions are skipped
    pub skip_unavailable: bool,
    /// Derive package actions from the desired end state
    pub resolve_again: bool,
}

impl ReplaySettings {
    /// Settings for repeating a recorded transaction
    pub fn redo() -> Self {
        Self {
            ignore_installed: true,
            ignore_extras: true,
            override_reasons: true,
            ..Default::default()
        }
    }

    /// Settings for undo and rollback
    pub fn revert(ignore_installed: bool) -> Self {
        Self {
            ignore_installed,
            ..Default::default()
        }
    }
}

/// Resolve `replay` against the installed set
///
/// `base_dir` is the directory relative package and definition paths are
/// looked up in; without it they are relative to the working directory.
/// The result carries its problems instead of failing; only malformed
/// replays and database errors are returned as errors.
pub fn resolve_replay(
    conn: &Connection,
    replay: &TransactionReplay,
    base_dir: Option<&Path>,
    settings: &ReplaySettings,
    config: &Config,
) -> Result<ResolvedTransaction> {
    let installed = InstalledPackage::list_all(conn)?;

    let rederived;
    let replay = if settings.resolve_again {
        rederived = rederive_actions(replay, &installed, config)?;
        &rederived
    } else {
        replay
    };

    let mut resolver = Resolver::new(conn, config, settings, installed, replay)?;
    let base_dir = base_dir.unwrap_or(Path::new("."));

    for pkg in &replay.packages {
        resolver.resolve_package(pkg, base_dir)?;
    }
    resolver.link_counterparts();

    for env in &replay.environments {
        resolver.resolve_environment(env, base_dir)?;
    }
    for group in &replay.groups {
        resolver.resolve_group(group, base_dir)?;
    }
    for module in &replay.modules {
        resolver.resolve_module(module)?;
    }

    let mut transaction = resolver.transaction;
    fix_reasons(&mut transaction, &reason_overrides(replay), settings.override_reasons);

    transaction.description = replay.description.clone();
    transaction.comment = replay.comment.clone();
    if let Some(user_id) = replay.user_id {
        transaction.user_id = user_id;
    }

    debug!(
        "Resolved replay into {} packages, {} groups, {} environments, {} modules with {} problems",
        transaction.packages.len(),
        transaction.groups.len(),
        transaction.environments.len(),
        transaction.modules.len(),
        transaction.problems.len()
    );
    Ok(transaction)
}

/// Re-apply stored reasons, keyed by NEVRA, to resolved packages
///
/// Installs and removals take the stored reason. Other actions take it only
/// when it is stronger than the one they have, unless `force` is set.
/// Reason changes keep their own reason.
pub fn fix_reasons(transaction: &mut ResolvedTransaction, overrides: &HashMap<String, Reason>, force: bool) {
    for pkg in &mut transaction.packages {
        let Some(&reason) = overrides.get(&pkg.nevra().to_string()) else {
            continue;
        };
        let apply = match pkg.action() {
            Action::ReasonChange => false,
            Action::Install | Action::Remove => true,
            _ => force || reason > pkg.reason(),
        };
        if apply && pkg.reason() != reason {
            debug!("Reason of {} set to {}", pkg.nevra(), reason);
            pkg.item.info.reason = reason;
        }
    }
}

/// Stored reasons of the inbound and removed packages of `replay`
fn reason_overrides(replay: &TransactionReplay) -> HashMap<String, Reason> {
    replay
        .packages
        .iter()
        .filter(|p| p.action.is_inbound() || p.action == Action::Remove)
        .map(|p| (p.nevra.clone(), p.reason))
        .collect()
}

/// NEVRA of a stored package, taken from the file name when only a path is stored
fn package_nevra(pkg: &PackageReplay) -> Result<Nevra> {
    if !pkg.nevra.is_empty() {
        return Nevra::parse(&pkg.nevra)
            .map_err(|_| Error::ReplayError(format!("Cannot parse NEVRA for rpm \"{}\"", pkg.nevra)));
    }
    let stem = Path::new(&pkg.package_path)
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.strip_suffix(".rpm").unwrap_or(name))
        .unwrap_or_default();
    Nevra::parse(stem).map_err(|_| {
        Error::ReplayError(format!(
            "Cannot determine NEVRA of rpm at \"{}\"",
            pkg.package_path
        ))
    })
}

fn is_installonly(config: &Config, nevra: &Nevra) -> bool {
    config.is_installonly(&nevra.name)
}

/// Rewrite package actions to reach the stored end state from the current one
fn rederive_actions(
    replay: &TransactionReplay,
    installed: &[InstalledPackage],
    config: &Config,
) -> Result<TransactionReplay> {
    let mut inbound_na = HashSet::new();
    for pkg in replay.packages.iter().filter(|p| p.action.is_inbound()) {
        inbound_na.insert(package_nevra(pkg)?.na());
    }

    let mut rederived = replay.clone();
    for pkg in &mut rederived.packages {
        let nevra = package_nevra(pkg)?;
        let action = if pkg.action.is_inbound() {
            let same_na: Vec<&InstalledPackage> = installed
                .iter()
                .filter(|i| i.nevra.na() == nevra.na())
                .collect();
            if same_na.iter().any(|i| i.nevra == nevra) {
                Action::Reinstall
            } else if same_na.is_empty() || is_installonly(config, &nevra) {
                Action::Install
            } else {
                let latest = same_na
                    .iter()
                    .map(|i| &i.nevra)
                    .max_by(|a, b| a.evr_cmp(b))
                    .unwrap_or(&nevra);
                if nevra.evr_cmp(latest) == Ordering::Greater {
                    Action::Upgrade
                } else {
                    Action::Downgrade
                }
            }
        } else if pkg.action.is_outbound() {
            if inbound_na.contains(&nevra.na()) {
                Action::Replaced
            } else {
                Action::Remove
            }
        } else {
            pkg.action
        };
        if action != pkg.action {
            debug!("Action of {} re-derived as {} (stored {})", nevra, action, pkg.action);
            pkg.action = action;
        }
    }
    Ok(rederived)
}

struct Resolver<'a> {
    conn: &'a Connection,
    config: &'a Config,
    settings: &'a ReplaySettings,
    installed: Vec<InstalledPackage>,
    /// NEVRAs the replay itself takes off the system
    outbound: HashSet<String>,
    /// Inbound packages that may replace installed versions
    pending_counterparts: Vec<usize>,
    transaction: ResolvedTransaction,
}

impl<'a> Resolver<'a> {
    fn new(
        conn: &'a Connection,
        config: &'a Config,
        settings: &'a ReplaySettings,
        installed: Vec<InstalledPackage>,
        replay: &TransactionReplay,
    ) -> Result<Self> {
        let mut outbound = HashSet::new();
        for pkg in replay.packages.iter().filter(|p| p.action.is_outbound()) {
            outbound.insert(package_nevra(pkg)?.to_string());
        }
        Ok(Self {
            conn,
            config,
            settings,
            installed,
            outbound,
            pending_counterparts: Vec::new(),
            transaction: ResolvedTransaction::new(),
        })
    }

    /// Record `message` as a warning when `tolerated`, as a problem otherwise
    fn report(&mut self, tolerated: bool, message: String) {
        if tolerated {
            warn!("{}", message);
            self.transaction.resolve_logs.push(message);
        } else {
            info!("Replay problem: {}", message);
            self.transaction.problems.push(message);
        }
    }

    fn installed_nevra(&self, nevra: &Nevra) -> Option<InstalledPackage> {
        self.installed.iter().find(|i| i.nevra == *nevra).cloned()
    }

    /// Installed packages of the same name.arch in another version
    fn installed_others(&self, nevra: &Nevra) -> Vec<InstalledPackage> {
        self.installed
            .iter()
            .filter(|i| i.nevra.name == nevra.name && i.nevra.arch == nevra.arch && i.nevra != *nevra)
            .cloned()
            .collect()
    }

    fn different_version_message(action: Action, nevra: &Nevra, others: &[InstalledPackage]) -> String {
        let others = others
            .iter()
            .map(|o| o.nevra.to_string())
            .collect::<Vec<_>>()
            .join("', '");
        format!("Cannot perform {action} because '{nevra}' is installed in a different version: '{others}'.")
    }

    fn push(&mut self, nevra: Nevra, action: Action, reason: Reason, pkg: &PackageReplay) -> usize {
        let item = PackageItem::new(nevra, action, reason, &pkg.repo_id);
        self.transaction.add_package(ResolvedPackage::new(item))
    }

    fn resolve_package(&mut self, pkg: &PackageReplay, base_dir: &Path) -> Result<()> {
        let nevra = package_nevra(pkg)?;

        let package_path = if pkg.package_path.is_empty() {
            None
        } else {
            let path = base_dir.join(&pkg.package_path);
            if !path.exists() {
                let message = format!("Cannot perform {}, no match for: {}.", pkg.action, pkg.package_path);
                self.report(self.settings.skip_unavailable, message);
                return Ok(());
            }
            Some(path)
        };

        match pkg.action {
            Action::Install | Action::Upgrade | Action::Downgrade => {
                if let Some(index) = self.resolve_inbound(pkg, nevra) {
                    self.transaction.packages[index].package_path = package_path;
                }
            }
            Action::Reinstall => {
                let Some(installed) = self.installed_nevra(&nevra) else {
                    let message = format!("Cannot perform Reinstall for Package '{nevra}' because it is not installed.");
                    self.report(self.settings.ignore_installed, message);
                    return Ok(());
                };
                let index = self.push(nevra, Action::Reinstall, installed.reason, pkg);
                self.transaction.packages[index].package_path = package_path;
                self.pending_counterparts.push(index);
            }
            Action::Remove | Action::Replaced => self.resolve_outbound(pkg, nevra),
            Action::ReasonChange => {
                let Some(installed) = self.installed_nevra(&nevra) else {
                    let message = format!("Cannot perform Reason Change for Package '{nevra}' because it is not installed.");
                    self.report(self.settings.ignore_installed, message);
                    return Ok(());
                };
                let index = self.push(nevra, Action::ReasonChange, pkg.reason, pkg);
                let resolved = &mut self.transaction.packages[index];
                resolved.rpmdb_id = installed.id;
                if pkg.reason == Reason::Group && !pkg.group_id.is_empty() {
                    resolved.reason_change_group_id = Some(pkg.group_id.clone());
                }
            }
            other => {
                return Err(Error::ReplayError(format!(
                    "Unexpected action \"{other}\" for rpm \"{nevra}\""
                )));
            }
        }
        Ok(())
    }

    /// Place an install, upgrade or downgrade; returns its index when added
    fn resolve_inbound(&mut self, pkg: &PackageReplay, nevra: Nevra) -> Option<usize> {
        if let Some(installed) = self.installed_nevra(&nevra) {
            if self.settings.override_reasons && installed.reason != pkg.reason {
                let index = self.push(nevra, Action::ReasonChange, pkg.reason, pkg);
                self.transaction.packages[index].rpmdb_id = installed.id;
                return Some(index);
            }
            self.report(
                self.settings.ignore_installed,
                format!("Package \"{nevra}\" is already installed."),
            );
            return None;
        }

        let others = if is_installonly(self.config, &nevra) {
            Vec::new()
        } else {
            self.installed_others(&nevra)
        };
        let Some(latest) = others.iter().max_by(|a, b| a.nevra.evr_cmp(&b.nevra)).cloned() else {
            return Some(self.push(nevra, Action::Install, pkg.reason, pkg));
        };

        // A plain install of a name.arch that is already installed only
        // makes sense when the replay also takes the installed version away
        let removed_by_replay = others.iter().any(|o| self.outbound.contains(&o.nevra.to_string()));
        if pkg.action == Action::Install && !removed_by_replay {
            let message = Self::different_version_message(pkg.action, &nevra, &others);
            self.report(self.settings.ignore_installed, message);
            return None;
        }

        let action = match nevra.evr_cmp(&latest.nevra) {
            Ordering::Greater => Action::Upgrade,
            _ => Action::Downgrade,
        };
        if action != pkg.action {
            debug!("{} of {} placed as {}", pkg.action, nevra, action);
        }
        let index = self.push(nevra, action, latest.reason, pkg);
        self.pending_counterparts.push(index);
        Some(index)
    }

    fn resolve_outbound(&mut self, pkg: &PackageReplay, nevra: Nevra) {
        if pkg.action == Action::Replaced && self.settings.skip_unavailable {
            debug!("Skipping replaced package {}", nevra);
            return;
        }

        let Some(installed) = self.installed_nevra(&nevra) else {
            let others = self.installed_others(&nevra);
            let message = if others.is_empty() {
                format!("Cannot perform {} for Package '{nevra}' because it is not installed.", pkg.action)
            } else {
                Self::different_version_message(pkg.action, &nevra, &others)
            };
            self.report(self.settings.ignore_installed, message);
            return;
        };

        if self
            .transaction
            .packages
            .iter()
            .any(|p| p.action().is_outbound() && p.rpmdb_id == installed.id)
        {
            debug!("{} is already removed by this transaction", nevra);
            return;
        }

        let reason = match pkg.action {
            Action::Remove => pkg.reason,
            _ => installed.reason,
        };
        let index = self.push(nevra, pkg.action, reason, pkg);
        self.transaction.packages[index].rpmdb_id = installed.id;
    }

    /// Attach every pending inbound package to the outbound items of the versions it replaces
    ///
    /// Installed versions the replay does not take away itself get a
    /// derived `Replaced` item.
    fn link_counterparts(&mut self) {
        let pending = std::mem::take(&mut self.pending_counterparts);
        for inbound in pending {
            let nevra = self.transaction.packages[inbound].nevra().clone();
            let counterparts = if self.transaction.packages[inbound].action() == Action::Reinstall {
                self.installed_nevra(&nevra).into_iter().collect()
            } else {
                self.installed_others(&nevra)
            };

            for installed in counterparts {
                let existing = self
                    .transaction
                    .packages
                    .iter()
                    .position(|p| p.action().is_outbound() && p.rpmdb_id == installed.id);
                let outbound = match existing {
                    Some(index) => index,
                    None => {
                        let key = installed.nevra.to_string();
                        if !self.outbound.contains(&key) {
                            let message = format!(
                                "Extra package '{key}' (with action '{}') which is not present in the stored transaction was pulled into the transaction.",
                                Action::Replaced
                            );
                            self.report(self.settings.ignore_extras, message);
                        }
                        let item = PackageItem::new(
                            installed.nevra.clone(),
                            Action::Replaced,
                            installed.reason,
                            &installed.repo_id,
                        );
                        let mut resolved = ResolvedPackage::new(item);
                        resolved.rpmdb_id = installed.id;
                        self.transaction.add_package(resolved)
                    }
                };
                self.transaction.link_replacement(inbound, outbound);
            }
        }
    }

    fn resolve_group(&mut self, group: &GroupReplay, base_dir: &Path) -> Result<()> {
        let installed = InstalledGroup::find(self.conn, &group.group_id)?;
        match (group.action, &installed) {
            (Action::Install, Some(_)) => {
                let message = format!("Group '{}' is already installed.", group.group_id);
                self.report(self.settings.ignore_installed, message);
                return Ok(());
            }
            (Action::Upgrade | Action::Remove, None) => {
                let message = format!(
                    "Cannot perform {} for Group '{}' because it is not installed.",
                    group.action, group.group_id
                );
                self.report(self.settings.ignore_installed, message);
                return Ok(());
            }
            (Action::Install | Action::Upgrade | Action::Remove, _) => {}
            (other, _) => {
                return Err(Error::ReplayError(format!(
                    "Unexpected action \"{other}\" for group \"{}\"",
                    group.group_id
                )));
            }
        }

        let item = if group.group_path.is_empty() {
            let mut item = GroupItem::new(&group.group_id, group.action, group.reason, &group.repo_id);
            if !group.package_types.is_empty() {
                item.package_types = group.package_types.clone();
            }
            if let Some(installed) = installed {
                item.packages = installed
                    .packages
                    .into_iter()
                    .map(|name| GroupPackage {
                        name,
                        installed: true,
                        package_type: PackageType::Mandatory,
                    })
                    .collect();
            }
            item
        } else {
            match load_group_definition(base_dir, &group.group_path) {
                Ok(definition) => {
                    definition.into_item(group.action, group.reason, &group.repo_id, &group.package_types)
                }
                Err(e) => {
                    self.report(self.settings.skip_unavailable, e.to_string());
                    return Ok(());
                }
            }
        };
        self.transaction.groups.push(item);
        Ok(())
    }

    fn resolve_environment(&mut self, env: &EnvironmentReplay, base_dir: &Path) -> Result<()> {
        let installed = InstalledEnvironment::find(self.conn, &env.environment_id)?;
        match (env.action, &installed) {
            (Action::Install, Some(_)) => {
                let message = format!("Environment '{}' is already installed.", env.environment_id);
                self.report(self.settings.ignore_installed, message);
                return Ok(());
            }
            (Action::Upgrade | Action::Remove, None) => {
                let message = format!(
                    "Cannot perform {} for Environment '{}' because it is not installed.",
                    env.action, env.environment_id
                );
                self.report(self.settings.ignore_installed, message);
                return Ok(());
            }
            (Action::Install | Action::Upgrade | Action::Remove, _) => {}
            (other, _) => {
                return Err(Error::ReplayError(format!(
                    "Unexpected action \"{other}\" for environment \"{}\"",
                    env.environment_id
                )));
            }
        }

        let item = if env.environment_path.is_empty() {
            let mut item = EnvironmentItem::new(&env.environment_id, env.action, Reason::User, &env.repo_id);
            if let Some(installed) = installed {
                item.groups = installed
                    .groups
                    .into_iter()
                    .map(|group_id| EnvironmentGroup {
                        group_id,
                        installed: true,
                        optional: false,
                    })
                    .collect();
            }
            item
        } else {
            match load_environment_definition(base_dir, &env.environment_path) {
                Ok(definition) => definition.into_item(env.action, Reason::User, &env.repo_id),
                Err(e) => {
                    self.report(self.settings.skip_unavailable, e.to_string());
                    return Ok(());
                }
            }
        };
        self.transaction.environments.push(item);
        Ok(())
    }

    fn resolve_module(&mut self, module: &ModuleReplay) -> Result<()> {
        if !matches!(
            module.action,
            Action::Enable | Action::Disable | Action::Reset | Action::Switch
        ) {
            return Err(Error::ReplayError(format!(
                "Unexpected action \"{}\" for module \"{}:{}\"",
                module.action, module.name, module.stream
            )));
        }
        self.transaction.modules.push(ModuleItem::new(
            &module.name,
            &module.stream,
            module.action,
            module.reason,
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn installed(conn: &Connection, nevra: &str, reason: Reason) -> i64 {
        InstalledPackage::new(Nevra::parse(nevra).unwrap(), "fedora", reason)
            .insert(conn)
            .unwrap()
    }

    fn package(nevra: &str, action: Action, reason: Reason) -> PackageReplay {
        PackageReplay {
            action,
            reason,
            group_id: String::new(),
            nevra: nevra.to_string(),
            package_path: String::new(),
            repo_id: "fedora".to_string(),
        }
    }

    fn resolve(conn: &Connection, packages: Vec<PackageReplay>, settings: ReplaySettings) -> ResolvedTransaction {
        let replay = TransactionReplay {
            packages,
            ..Default::default()
        };
        resolve_replay(conn, &replay, None, &settings, &Config::default()).unwrap()
    }

    #[test]
    fn test_install_already_installed() {
        let conn = db::open_in_memory().unwrap();
        installed(&conn, "bash-5.2-1.x86_64", Reason::User);

        let packages = vec![package("bash-5.2-1.x86_64", Action::Install, Reason::User)];
        let strict = resolve(&conn, packages.clone(), ReplaySettings::default());
        assert_eq!(strict.problems, vec!["Package \"bash-5.2-1.x86_64\" is already installed."]);
        assert!(strict.packages.is_empty());

        let tolerant = resolve(&conn, packages, ReplaySettings::revert(true));
        assert!(tolerant.problems.is_empty());
        assert_eq!(tolerant.resolve_logs.len(), 1);
    }

    #[test]
    fn test_override_reasons_becomes_reason_change() {
        let conn = db::open_in_memory().unwrap();
        let id = installed(&conn, "bash-5.2-1.x86_64", Reason::Dependency);

        let resolved = resolve(
            &conn,
            vec![package("bash-5.2-1.x86_64", Action::Install, Reason::User)],
            ReplaySettings::redo(),
        );
        assert_eq!(resolved.packages.len(), 1);
        assert_eq!(resolved.packages[0].action(), Action::ReasonChange);
        assert_eq!(resolved.packages[0].reason(), Reason::User);
        assert_eq!(resolved.packages[0].rpmdb_id, id);
    }

    #[test]
    fn test_install_in_different_version() {
        let conn = db::open_in_memory().unwrap();
        installed(&conn, "bash-5.2-1.x86_64", Reason::User);

        let resolved = resolve(
            &conn,
            vec![package("bash-5.2-2.x86_64", Action::Install, Reason::User)],
            ReplaySettings::default(),
        );
        assert_eq!(
            resolved.problems,
            vec![
                "Cannot perform Install because 'bash-5.2-2.x86_64' is installed in a different version: 'bash-5.2-1.x86_64'."
            ]
        );
    }

    #[test]
    fn test_upgrade_links_stored_replaced() {
        let conn = db::open_in_memory().unwrap();
        let id = installed(&conn, "bash-5.2-1.x86_64", Reason::Dependency);

        let resolved = resolve(
            &conn,
            vec![
                package("bash-5.2-2.x86_64", Action::Upgrade, Reason::User),
                package("bash-5.2-1.x86_64", Action::Replaced, Reason::Dependency),
            ],
            ReplaySettings::default(),
        );
        assert!(resolved.problems.is_empty(), "{:?}", resolved.problems);
        assert_eq!(resolved.packages.len(), 2);
        assert_eq!(resolved.packages[0].replaces, Some(1));
        assert_eq!(resolved.packages[1].replaced_by, vec![0]);
        assert_eq!(resolved.packages[1].rpmdb_id, id);
        // The stored reason is stronger than the installed one
        assert_eq!(resolved.packages[0].reason(), Reason::User);
    }

    #[test]
    fn test_upgrade_without_replaced_is_extra() {
        let conn = db::open_in_memory().unwrap();
        installed(&conn, "bash-5.2-1.x86_64", Reason::User);
        let packages = vec![package("bash-5.2-2.x86_64", Action::Upgrade, Reason::User)];

        let strict = resolve(&conn, packages.clone(), ReplaySettings::default());
        assert_eq!(strict.problems.len(), 1);
        assert!(strict.problems[0].starts_with("Extra package 'bash-5.2-1.x86_64'"));

        let tolerant = resolve(
            &conn,
            packages,
            ReplaySettings {
                ignore_extras: true,
                ..Default::default()
            },
        );
        assert!(tolerant.problems.is_empty());
        assert_eq!(tolerant.packages.len(), 2);
        assert_eq!(tolerant.packages[1].action(), Action::Replaced);
    }

    #[test]
    fn test_install_over_removed_version_becomes_downgrade() {
        let conn = db::open_in_memory().unwrap();
        installed(&conn, "bash-5.2-2.x86_64", Reason::User);

        let resolved = resolve(
            &conn,
            vec![
                package("bash-5.2-1.x86_64", Action::Install, Reason::User),
                package("bash-5.2-2.x86_64", Action::Replaced, Reason::User),
            ],
            ReplaySettings::default(),
        );
        assert!(resolved.problems.is_empty(), "{:?}", resolved.problems);
        assert_eq!(resolved.packages[0].action(), Action::Downgrade);
        assert_eq!(resolved.packages[0].replaces, Some(1));
    }

    #[test]
    fn test_remove_not_installed() {
        let conn = db::open_in_memory().unwrap();
        let resolved = resolve(
            &conn,
            vec![package("vim-9.1-1.x86_64", Action::Remove, Reason::User)],
            ReplaySettings::default(),
        );
        assert_eq!(
            resolved.problems,
            vec!["Cannot perform Remove for Package 'vim-9.1-1.x86_64' because it is not installed."]
        );
    }

    #[test]
    fn test_replaced_dropped_when_skipping_unavailable() {
        let conn = db::open_in_memory().unwrap();
        installed(&conn, "bash-5.2-1.x86_64", Reason::User);
        let resolved = resolve(
            &conn,
            vec![
                package("bash-5.2-2.x86_64", Action::Upgrade, Reason::User),
                package("bash-5.2-1.x86_64", Action::Replaced, Reason::User),
            ],
            ReplaySettings {
                skip_unavailable: true,
                ..Default::default()
            },
        );
        // The replaced item comes back derived, without an extras problem
        assert!(resolved.problems.is_empty());
        assert_eq!(resolved.packages.len(), 2);
    }

    #[test]
    fn test_resolve_again() {
        let conn = db::open_in_memory().unwrap();
        installed(&conn, "bash-5.2-1.x86_64", Reason::User);
        installed(&conn, "nano-7.2-1.x86_64", Reason::User);

        let resolved = resolve(
            &conn,
            vec![
                package("bash-5.2-3.x86_64", Action::Install, Reason::User),
                package("nano-7.2-1.x86_64", Action::Replaced, Reason::User),
                package("vim-9.1-1.x86_64", Action::Upgrade, Reason::User),
            ],
            ReplaySettings {
                resolve_again: true,
                ignore_extras: true,
                ..Default::default()
            },
        );
        assert!(resolved.problems.is_empty(), "{:?}", resolved.problems);
        let actions: Vec<(String, Action)> = resolved
            .packages
            .iter()
            .map(|p| (p.nevra().to_string(), p.action()))
            .collect();
        assert!(actions.contains(&("bash-5.2-3.x86_64".to_string(), Action::Upgrade)));
        assert!(actions.contains(&("nano-7.2-1.x86_64".to_string(), Action::Remove)));
        assert!(actions.contains(&("vim-9.1-1.x86_64".to_string(), Action::Install)));
    }

    #[test]
    fn test_fix_reasons() {
        let mut transaction = ResolvedTransaction::new();
        for (nevra, action, reason) in [
            ("a-1-1.noarch", Action::Install, Reason::Dependency),
            ("b-1-1.noarch", Action::Upgrade, Reason::User),
            ("c-1-1.noarch", Action::ReasonChange, Reason::Group),
        ] {
            transaction.add_package(ResolvedPackage::new(PackageItem::new(
                Nevra::parse(nevra).unwrap(),
                action,
                reason,
                "fedora",
            )));
        }
        let overrides: HashMap<String, Reason> = [
            ("a-1-1.noarch".to_string(), Reason::WeakDependency),
            ("b-1-1.noarch".to_string(), Reason::Dependency),
            ("c-1-1.noarch".to_string(), Reason::User),
        ]
        .into_iter()
        .collect();

        fix_reasons(&mut transaction, &overrides, false);
        assert_eq!(transaction.packages[0].reason(), Reason::WeakDependency);
        assert_eq!(transaction.packages[1].reason(), Reason::User);
        assert_eq!(transaction.packages[2].reason(), Reason::Group);

        fix_reasons(&mut transaction, &overrides, true);
        assert_eq!(transaction.packages[1].reason(), Reason::Dependency);
    }

    #[test]
    fn test_modules_and_groups() {
        let conn = db::open_in_memory().unwrap();
        let replay = TransactionReplay {
            groups: vec![GroupReplay {
                action: Action::Install,
                reason: Reason::User,
                group_id: "core".to_string(),
                group_path: String::new(),
                repo_id: "fedora".to_string(),
                package_types: vec![PackageType::Mandatory],
            }],
            modules: vec![ModuleReplay {
                action: Action::Enable,
                reason: Reason::User,
                name: "nodejs".to_string(),
                stream: "18".to_string(),
            }],
            ..Default::default()
        };
        let resolved =
            resolve_replay(&conn, &replay, None, &ReplaySettings::default(), &Config::default()).unwrap();
        assert!(resolved.problems.is_empty());
        assert_eq!(resolved.groups[0].package_types, vec![PackageType::Mandatory]);
        assert_eq!(resolved.modules[0].to_string(), "nodejs:18");
    }
}
