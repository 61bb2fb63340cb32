// src/history/merge.rs

//! Folding several transactions into one
//!
//! Rollback reverts a series of transactions; applying the reverted
//! transactions one after another would touch the same packages repeatedly,
//! so they are merged into a single equivalent transaction first. Conflicting
//! actions are resolved with the newest one winning and every such decision
//! is reported as a problem string.

use crate::error::{Error, Result};
use crate::item::Action;
use crate::replay::{EnvironmentReplay, GroupReplay, PackageReplay, TransactionReplay};
use crate::version::Nevra;
use std::collections::{HashMap, HashSet};

/// Insertion-ordered map keyed by item identity
///
/// Removed entries leave an empty slot so the remaining order is kept without
/// shifting; a key inserted again goes to the end.
struct Ordered<T> {
    slots: Vec<Option<T>>,
    index: HashMap<String, usize>,
}

impl<T> Ordered<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&T> {
        self.index.get(key).and_then(|&pos| self.slots[pos].as_ref())
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        self.index.get(key).and_then(|&pos| self.slots[pos].as_mut())
    }

    fn insert(&mut self, key: &str, value: T) {
        match self.index.get(key) {
            Some(&pos) => self.slots[pos] = Some(value),
            None => {
                self.index.insert(key.to_string(), self.slots.len());
                self.slots.push(Some(value));
            }
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(pos) = self.index.remove(key) {
            self.slots[pos] = None;
        }
    }

    fn into_values(self) -> Vec<T> {
        self.slots.into_iter().flatten().collect()
    }
}

/// Comps items merge by id with the same rules for groups and environments
trait CompsReplay: Clone {
    fn id(&self) -> &str;
    fn action(&self) -> Action;
    fn set_action(&mut self, action: Action);
}

impl CompsReplay for GroupReplay {
    fn id(&self) -> &str {
        &self.group_id
    }
    fn action(&self) -> Action {
        self.action
    }
    fn set_action(&mut self, action: Action) {
        self.action = action;
    }
}

impl CompsReplay for EnvironmentReplay {
    fn id(&self) -> &str {
        &self.environment_id
    }
    fn action(&self) -> Action {
        self.action
    }
    fn set_action(&mut self, action: Action) {
        self.action = action;
    }
}

fn merge_comps<T: CompsReplay>(replay: &T, merged: &mut Ordered<T>, problems: &mut Vec<String>) {
    let id = replay.id().to_string();
    let Some(previous) = merged.get(&id).map(CompsReplay::action) else {
        merged.insert(&id, replay.clone());
        return;
    };
    let current = replay.action();

    if current.is_inbound() && previous.is_inbound() {
        // A pending install must survive: later inbound actions assume it happened
        let mut replay = replay.clone();
        if previous == Action::Install {
            replay.set_action(Action::Install);
        }
        merged.insert(&id, replay);
    } else if current.is_outbound() && previous.is_outbound() {
        problems.push(format!(
            "Action '{current}' '{id}' cannot be merged after it was '{previous}' in preceding transactions -> setting '{current}'."
        ));
        merged.insert(&id, replay.clone());
    } else if previous == Action::Upgrade {
        merged.insert(&id, replay.clone());
    } else if current == Action::Upgrade {
        problems.push(format!(
            "Action 'Upgrade' '{id}' cannot be merged because it is not present at that point -> setting 'Install'."
        ));
        let mut replay = replay.clone();
        replay.set_action(Action::Install);
        merged.insert(&id, replay);
    } else {
        merged.remove(&id);
    }
}

fn add_installed(installed: &mut HashMap<String, Vec<String>>, na: &str, nevra: &str) {
    installed.entry(na.to_string()).or_default().push(nevra.to_string());
}

fn remove_installed(installed: &mut HashMap<String, Vec<String>>, na: &str, nevra: &str) {
    if let Some(nevras) = installed.get_mut(na) {
        nevras.retain(|n| n != nevra);
    }
}

fn is_installed(installed: &HashMap<String, Vec<String>>, na: &str, nevra: &str) -> bool {
    installed
        .get(na)
        .is_some_and(|nevras| nevras.iter().any(|n| n == nevra))
}

/// Merge `transactions` in order into one transaction
///
/// `installed` maps `name.arch` to the NEVRAs installed before the first
/// transaction and is updated to the state after the last one.
pub fn merge_transactions(
    transactions: Vec<TransactionReplay>,
    installed: &mut HashMap<String, Vec<String>>,
    installonly_names: &[String],
) -> Result<(TransactionReplay, Vec<String>)> {
    let mut problems = Vec::new();
    let mut packages: Ordered<PackageReplay> = Ordered::new();
    let mut groups: Ordered<GroupReplay> = Ordered::new();
    let mut environments: Ordered<EnvironmentReplay> = Ordered::new();
    let mut merged = TransactionReplay::default();

    for mut trans in transactions {
        // Outbound first: with a-1 installed, "a-2 Upgrade, a-1 Replaced" must
        // not see two inbound versions of a non-installonly name.arch
        trans
            .packages
            .sort_by_key(|p| if p.action.is_outbound() { 0 } else { 1 });
        let mut removed_this_transaction: HashSet<String> = HashSet::new();

        for replay in &trans.packages {
            let nevra = Nevra::parse(&replay.nevra).map_err(|_| {
                Error::MergeError(format!(
                    "Cannot parse rpm nevra \"{}\" while merging transactions",
                    replay.nevra
                ))
            })?;
            let na = nevra.na();
            let action = replay.action;

            let previous = packages
                .get(&replay.nevra)
                .map(|p| p.action)
                .filter(|a| !matches!(a, Action::ReasonChange | Action::Reinstall));

            if let Some(previous) = previous {
                if action == Action::Reinstall {
                    if !is_installed(installed, &na, &replay.nevra) {
                        problems.push(format!(
                            "Action 'Reinstall' '{}' cannot be merged because it is not present at that point -> setting 'Install'.",
                            replay.nevra
                        ));
                        add_installed(installed, &na, &replay.nevra);
                        let mut replay = replay.clone();
                        replay.action = Action::Install;
                        packages.insert(&replay.nevra.clone(), replay);
                    }
                    continue;
                }
                if action == Action::ReasonChange {
                    if let Some(pending) = packages.get_mut(&replay.nevra) {
                        pending.reason = replay.reason;
                    }
                    continue;
                }

                if (action.is_inbound() && previous.is_inbound())
                    || (action.is_outbound() && previous.is_outbound())
                {
                    problems.push(format!(
                        "Action '{}' '{}' cannot be merged after it was '{}' in preceding transaction -> setting '{}'.",
                        action, replay.nevra, previous, action
                    ));
                    packages.insert(&replay.nevra, replay.clone());
                } else if action.is_inbound() || action.is_outbound() {
                    // Opposite directions cancel out
                    packages.remove(&replay.nevra);
                    if action.is_inbound() {
                        add_installed(installed, &na, &replay.nevra);
                    } else {
                        removed_this_transaction.insert(na.clone());
                        remove_installed(installed, &na, &replay.nevra);
                    }
                } else {
                    return Err(Error::MergeError(format!(
                        "Unexpected action encountered: '{action}' during transaction merge."
                    )));
                }
                continue;
            }

            let na_installed = installed.get(&na).is_some_and(|n| !n.is_empty());

            if !na_installed {
                if action.is_outbound() || action == Action::ReasonChange {
                    problems.push(format!(
                        "Action '{}' '{}' cannot be merged because it is not present at that point -> skipping it.",
                        action, replay.nevra
                    ));
                    continue;
                }
                if action == Action::Reinstall {
                    problems.push(format!(
                        "Action 'Reinstall' '{}' cannot be merged because it is not present at that point -> setting 'Install'.",
                        replay.nevra
                    ));
                    let mut replay = replay.clone();
                    replay.action = Action::Install;
                    packages.insert(&replay.nevra.clone(), replay);
                    continue;
                }

                // The first inbound action on a name.arch that is not installed
                // has to be an install for the later ones to apply
                let mut pending = replay.clone();
                if action != Action::Install {
                    if !removed_this_transaction.contains(&na) {
                        problems.push(format!(
                            "Action '{}' '{}' cannot be merged because it is not present at that point -> setting 'Install'.",
                            action, replay.nevra
                        ));
                    }
                    pending.action = Action::Install;
                }
                packages.insert(&replay.nevra, pending);
                add_installed(installed, &na, &replay.nevra);
            } else if action.is_outbound()
                || action == Action::ReasonChange
                || action == Action::Reinstall
            {
                if is_installed(installed, &na, &replay.nevra) {
                    if action.is_outbound() {
                        remove_installed(installed, &na, &replay.nevra);
                        removed_this_transaction.insert(na.clone());
                    }
                    packages.insert(&replay.nevra, replay.clone());
                } else {
                    let present = installed.get(&na).map(|n| n.join(",")).unwrap_or_default();
                    problems.push(format!(
                        "Action '{}' '{}' cannot be merged because it is not present at that point (present versions are: {}) -> skipping it.",
                        action, replay.nevra, present
                    ));
                }
            } else if action.is_inbound() {
                if is_installed(installed, &na, &replay.nevra) {
                    problems.push(format!(
                        "Action '{}' '{}' cannot be merged because it is already present at that point -> skipping it.",
                        action, replay.nevra
                    ));
                    continue;
                }

                if installonly_names.iter().any(|n| *n == nevra.name) {
                    packages.insert(&replay.nevra, replay.clone());
                    add_installed(installed, &na, &replay.nevra);
                } else {
                    // Only the latest inbound version of a name.arch is kept
                    let current = installed
                        .get(&na)
                        .and_then(|n| n.first())
                        .cloned()
                        .unwrap_or_default();
                    packages.remove(&current);
                    packages.insert(&replay.nevra, replay.clone());
                    if action == Action::Install {
                        problems.push(format!(
                            "Action '{}' '{}' cannot be merged because it is already installed in version '{}' -> keeping the action from older transaction with '{}'.",
                            action, replay.nevra, current, replay.nevra
                        ));
                    }
                    installed.insert(na.clone(), vec![replay.nevra.clone()]);
                }
            } else {
                return Err(Error::MergeError(format!(
                    "Invalid action encountered: '{action}' during transaction merge."
                )));
            }
        }

        for group in &trans.groups {
            merge_comps(group, &mut groups, &mut problems);
        }
        for env in &trans.environments {
            merge_comps(env, &mut environments, &mut problems);
        }
        merged.modules.extend(trans.modules);
    }

    merged.packages = packages.into_values();
    merged.groups = groups.into_values();
    merged.environments = environments.into_values();
    Ok((merged, problems))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Reason;

    fn pkg(nevra: &str, action: Action) -> PackageReplay {
        PackageReplay {
            action,
            reason: Reason::User,
            group_id: String::new(),
            nevra: nevra.to_string(),
            package_path: String::new(),
            repo_id: "fedora".to_string(),
        }
    }

    #[test]
    fn test_ordered_keeps_insertion_order() {
        let mut ordered: Ordered<u32> = Ordered::new();
        ordered.insert("a", 1);
        ordered.insert("b", 2);
        ordered.insert("c", 3);
        ordered.insert("a", 10);
        ordered.remove("b");
        ordered.remove("missing");
        ordered.insert("b", 20);
        if let Some(c) = ordered.get_mut("c") {
            *c += 1;
        }

        assert_eq!(ordered.get("a"), Some(&10));
        assert_eq!(ordered.get("d"), None);
        assert_eq!(ordered.into_values(), vec![10, 4, 20]);
    }

    #[test]
    fn test_merge_many_transactions() {
        let replays: Vec<TransactionReplay> = (0..2000)
            .map(|i| TransactionReplay {
                packages: vec![pkg(&format!("pkg{i}-1.0-1.noarch"), Action::Remove)],
                ..Default::default()
            })
            .collect();
        let mut installed: HashMap<String, Vec<String>> = (0..2000)
            .map(|i| (format!("pkg{i}.noarch"), vec![format!("pkg{i}-1.0-1.noarch")]))
            .collect();

        let (merged, problems) = merge_transactions(replays, &mut installed, &[]).unwrap();
        assert!(problems.is_empty(), "{problems:?}");
        assert_eq!(merged.packages.len(), 2000);
        assert_eq!(merged.packages[0].nevra, "pkg0-1.0-1.noarch");
        assert_eq!(merged.packages[1999].nevra, "pkg1999-1.0-1.noarch");
    }

    fn group(id: &str, action: Action) -> GroupReplay {
        GroupReplay {
            action,
            reason: Reason::User,
            group_id: id.to_string(),
            group_path: String::new(),
            repo_id: "fedora".to_string(),
            package_types: Vec::new(),
        }
    }

    fn trans(packages: Vec<PackageReplay>) -> TransactionReplay {
        TransactionReplay {
            packages,
            ..Default::default()
        }
    }

    fn installed(pairs: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (na, nevra) in pairs {
            map.entry(na.to_string()).or_default().push(nevra.to_string());
        }
        map
    }

    fn actions(replay: &TransactionReplay) -> Vec<(String, Action)> {
        replay
            .packages
            .iter()
            .map(|p| (p.nevra.clone(), p.action))
            .collect()
    }

    #[test]
    fn test_install_then_remove_cancels() {
        let mut state = installed(&[]);
        let (merged, problems) = merge_transactions(
            vec![
                trans(vec![pkg("a-1-1.noarch", Action::Install)]),
                trans(vec![pkg("a-1-1.noarch", Action::Remove)]),
            ],
            &mut state,
            &[],
        )
        .unwrap();

        assert!(merged.packages.is_empty());
        assert!(problems.is_empty());
        assert!(state.get("a.noarch").unwrap().is_empty());
    }

    #[test]
    fn test_chained_upgrades_collapse() {
        let mut state = installed(&[("a.noarch", "a-1-1.noarch")]);
        let (merged, problems) = merge_transactions(
            vec![
                trans(vec![
                    pkg("a-2-1.noarch", Action::Upgrade),
                    pkg("a-1-1.noarch", Action::Replaced),
                ]),
                trans(vec![
                    pkg("a-3-1.noarch", Action::Upgrade),
                    pkg("a-2-1.noarch", Action::Replaced),
                ]),
            ],
            &mut state,
            &[],
        )
        .unwrap();

        assert!(problems.is_empty());
        assert_eq!(
            actions(&merged),
            vec![
                ("a-1-1.noarch".to_string(), Action::Replaced),
                ("a-3-1.noarch".to_string(), Action::Install),
            ]
        );
        assert_eq!(state.get("a.noarch").unwrap(), &vec!["a-3-1.noarch".to_string()]);
    }

    #[test]
    fn test_outbound_of_missing_is_skipped() {
        let mut state = installed(&[]);
        let (merged, problems) = merge_transactions(
            vec![trans(vec![pkg("a-1-1.noarch", Action::Remove)])],
            &mut state,
            &[],
        )
        .unwrap();

        assert!(merged.packages.is_empty());
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("skipping it"));
    }

    #[test]
    fn test_reason_change_updates_pending() {
        let mut state = installed(&[]);
        let mut change = pkg("a-1-1.noarch", Action::ReasonChange);
        change.reason = Reason::Dependency;

        let (merged, _) = merge_transactions(
            vec![
                trans(vec![pkg("a-1-1.noarch", Action::Install)]),
                trans(vec![change]),
            ],
            &mut state,
            &[],
        )
        .unwrap();

        assert_eq!(merged.packages.len(), 1);
        assert_eq!(merged.packages[0].action, Action::Install);
        assert_eq!(merged.packages[0].reason, Reason::Dependency);
    }

    #[test]
    fn test_installonly_versions_accumulate() {
        let mut state = installed(&[("kernel.x86_64", "kernel-1-1.x86_64")]);
        let (merged, problems) = merge_transactions(
            vec![
                trans(vec![pkg("kernel-2-1.x86_64", Action::Install)]),
                trans(vec![pkg("kernel-3-1.x86_64", Action::Install)]),
            ],
            &mut state,
            &["kernel".to_string()],
        )
        .unwrap();

        assert!(problems.is_empty());
        assert_eq!(merged.packages.len(), 2);
        assert_eq!(state.get("kernel.x86_64").unwrap().len(), 3);
    }

    #[test]
    fn test_reinstall_of_missing_becomes_install() {
        let mut state = installed(&[]);
        let (merged, problems) = merge_transactions(
            vec![trans(vec![pkg("a-1-1.noarch", Action::Reinstall)])],
            &mut state,
            &[],
        )
        .unwrap();

        assert_eq!(merged.packages[0].action, Action::Install);
        assert_eq!(problems.len(), 1);
    }

    #[test]
    fn test_group_merge_rules() {
        let mut state = installed(&[]);
        let first = TransactionReplay {
            groups: vec![group("core", Action::Install), group("web", Action::Remove)],
            ..Default::default()
        };
        let second = TransactionReplay {
            groups: vec![group("core", Action::Upgrade), group("web", Action::Upgrade)],
            ..Default::default()
        };

        let (merged, problems) = merge_transactions(vec![first, second], &mut state, &[]).unwrap();

        assert_eq!(merged.groups.len(), 2);
        assert_eq!(merged.groups[0].action, Action::Install);
        assert_eq!(merged.groups[1].action, Action::Install);
        assert_eq!(problems.len(), 1);

        let (merged, _) = merge_transactions(
            vec![
                TransactionReplay {
                    groups: vec![group("core", Action::Install)],
                    ..Default::default()
                },
                TransactionReplay {
                    groups: vec![group("core", Action::Remove)],
                    ..Default::default()
                },
            ],
            &mut state,
            &[],
        )
        .unwrap();
        assert!(merged.groups.is_empty());
    }

    #[test]
    fn test_bad_nevra_is_merge_error() {
        let mut state = installed(&[]);
        let err = merge_transactions(
            vec![trans(vec![pkg("nonsense", Action::Install)])],
            &mut state,
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::MergeError(_)));
    }
}
