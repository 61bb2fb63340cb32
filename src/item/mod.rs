// src/item/mod.rs

//! Transaction item model
//!
//! The vocabulary shared by live and historical transactions: what is done to
//! an item ([`Action`]), why the item is on the system ([`Reason`]) and how far
//! the operation got ([`State`]). Items themselves come in four kinds, modeled
//! as variants of [`Item`].

mod comps;
mod module;
mod package;

pub use comps::{EnvironmentGroup, EnvironmentItem, GroupItem, GroupPackage, PackageType};
pub use module::ModuleItem;
pub use package::PackageItem;

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Operation performed on an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Install,
    Upgrade,
    Downgrade,
    Reinstall,
    Remove,
    /// Item leaves the system because another item supersedes it
    Replaced,
    ReasonChange,
    Enable,
    Disable,
    Reset,
    Switch,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Install => "Install",
            Action::Upgrade => "Upgrade",
            Action::Downgrade => "Downgrade",
            Action::Reinstall => "Reinstall",
            Action::Remove => "Remove",
            Action::Replaced => "Replaced",
            Action::ReasonChange => "Reason Change",
            Action::Enable => "Enable",
            Action::Disable => "Disable",
            Action::Reset => "Reset",
            Action::Switch => "Switch",
        }
    }

    /// One-letter code used in history tables
    pub fn short(&self) -> &'static str {
        match self {
            Action::Install => "I",
            Action::Upgrade => "U",
            Action::Downgrade => "D",
            Action::Reinstall => "R",
            Action::Remove => "E",
            Action::Replaced => "O",
            Action::ReasonChange => "C",
            Action::Enable | Action::Disable | Action::Reset | Action::Switch => "?",
        }
    }

    /// Item appears on disk or changes in place
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            Action::Install | Action::Upgrade | Action::Downgrade | Action::Reinstall
        )
    }

    /// Item leaves the disk
    pub fn is_outbound(&self) -> bool {
        matches!(self, Action::Remove | Action::Replaced)
    }

    /// Action that undoes this one, if any
    pub fn revert(&self) -> Option<Action> {
        match self {
            Action::Install => Some(Action::Remove),
            Action::Upgrade | Action::Downgrade => Some(Action::Replaced),
            Action::Reinstall => Some(Action::Reinstall),
            Action::Remove | Action::Replaced => Some(Action::Install),
            Action::ReasonChange => Some(Action::ReasonChange),
            Action::Enable | Action::Disable | Action::Reset | Action::Switch => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Install" => Ok(Action::Install),
            "Upgrade" => Ok(Action::Upgrade),
            "Downgrade" => Ok(Action::Downgrade),
            "Reinstall" => Ok(Action::Reinstall),
            "Remove" | "Removed" => Ok(Action::Remove),
            "Replaced" | "Upgraded" | "Downgraded" | "Reinstalled" | "Obsoleted" => {
                Ok(Action::Replaced)
            }
            "Reason Change" => Ok(Action::ReasonChange),
            "Enable" => Ok(Action::Enable),
            "Disable" => Ok(Action::Disable),
            "Reset" => Ok(Action::Reset),
            "Switch" => Ok(Action::Switch),
            _ => Err(Error::InvalidValue(format!("Unknown transaction item action: {s}"))),
        }
    }
}

/// Why an item is present on the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    None,
    Dependency,
    ExternalUser,
    WeakDependency,
    Group,
    Clean,
    User,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::None => "None",
            Reason::Dependency => "Dependency",
            Reason::ExternalUser => "External User",
            Reason::WeakDependency => "Weak Dependency",
            Reason::Group => "Group",
            Reason::Clean => "Clean",
            Reason::User => "User",
        }
    }

    fn strength(&self) -> u8 {
        match self {
            Reason::None => 0,
            Reason::Dependency => 1,
            Reason::ExternalUser => 2,
            Reason::WeakDependency => 3,
            Reason::Group => 4,
            Reason::Clean => 5,
            Reason::User => 6,
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "None" => Ok(Reason::None),
            "Dependency" => Ok(Reason::Dependency),
            "External User" => Ok(Reason::ExternalUser),
            "Weak Dependency" => Ok(Reason::WeakDependency),
            "Group" => Ok(Reason::Group),
            "Clean" => Ok(Reason::Clean),
            "User" => Ok(Reason::User),
            _ => Err(Error::InvalidValue(format!("Unknown transaction item reason: {s}"))),
        }
    }
}

impl Ord for Reason {
    fn cmp(&self, other: &Self) -> Ordering {
        self.strength().cmp(&other.strength())
    }
}

impl PartialOrd for Reason {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two reasons: -1 if `a` is weaker, 0 if equal, 1 if stronger
pub fn reason_compare(a: Reason, b: Reason) -> i32 {
    match a.cmp(&b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// Lifecycle of an item or a whole transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Started,
    Ok,
    Error,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Started => "Started",
            State::Ok => "Ok",
            State::Error => "Error",
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, State::Started)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Started" => Ok(State::Started),
            "Ok" => Ok(State::Ok),
            "Error" => Ok(State::Error),
            _ => Err(Error::InvalidValue(format!("Unknown transaction state: {s}"))),
        }
    }
}

/// Kind of an item, as persisted in history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKind {
    Package,
    Group,
    Environment,
    Module,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Package => "rpm",
            ItemKind::Group => "group",
            ItemKind::Environment => "environment",
            ItemKind::Module => "module",
        }
    }
}

impl FromStr for ItemKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rpm" => Ok(ItemKind::Package),
            "group" => Ok(ItemKind::Group),
            "environment" => Ok(ItemKind::Environment),
            "module" => Ok(ItemKind::Module),
            _ => Err(Error::InvalidValue(format!("Unknown transaction item type: {s}"))),
        }
    }
}

/// Fields shared by every item kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    /// Row id once persisted, 0 before
    pub id: i64,
    pub action: Action,
    pub reason: Reason,
    pub state: State,
    pub repo_id: String,
}

impl ItemInfo {
    pub fn new(action: Action, reason: Reason, repo_id: &str) -> Self {
        Self {
            id: 0,
            action,
            reason,
            state: State::Started,
            repo_id: repo_id.to_string(),
        }
    }
}

/// One package, group, environment or module taking part in a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Package(PackageItem),
    Group(GroupItem),
    Environment(EnvironmentItem),
    Module(ModuleItem),
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        match self {
            Item::Package(_) => ItemKind::Package,
            Item::Group(_) => ItemKind::Group,
            Item::Environment(_) => ItemKind::Environment,
            Item::Module(_) => ItemKind::Module,
        }
    }

    pub fn info(&self) -> &ItemInfo {
        match self {
            Item::Package(p) => &p.info,
            Item::Group(g) => &g.info,
            Item::Environment(e) => &e.info,
            Item::Module(m) => &m.info,
        }
    }

    pub fn info_mut(&mut self) -> &mut ItemInfo {
        match self {
            Item::Package(p) => &mut p.info,
            Item::Group(g) => &mut g.info,
            Item::Environment(e) => &mut e.info,
            Item::Module(m) => &mut m.info,
        }
    }

    pub fn action(&self) -> Action {
        self.info().action
    }

    pub fn reason(&self) -> Reason {
        self.info().reason
    }

    pub fn state(&self) -> State {
        self.info().state
    }

    /// Identity string: NEVRA, group/environment id or `name:stream`
    pub fn identity(&self) -> String {
        match self {
            Item::Package(p) => p.nevra.to_string(),
            Item::Group(g) => g.group_id.clone(),
            Item::Environment(e) => e.environment_id.clone(),
            Item::Module(m) => m.to_string(),
        }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}

/// Ordering used when mixed-kind contents are displayed
pub type ItemComparator = fn(&Item, &Item) -> Ordering;

/// Default display order: kind (packages first), then identity
pub fn default_item_order(a: &Item, b: &Item) -> Ordering {
    a.kind()
        .cmp(&b.kind())
        .then_with(|| a.identity().cmp(&b.identity()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTIONS: [Action; 11] = [
        Action::Install,
        Action::Upgrade,
        Action::Downgrade,
        Action::Reinstall,
        Action::Remove,
        Action::Replaced,
        Action::ReasonChange,
        Action::Enable,
        Action::Disable,
        Action::Reset,
        Action::Switch,
    ];

    #[test]
    fn test_action_string_round_trip() {
        for action in ACTIONS {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
    }

    #[test]
    fn test_action_legacy_spellings() {
        assert_eq!("Removed".parse::<Action>().unwrap(), Action::Remove);
        assert_eq!("Upgraded".parse::<Action>().unwrap(), Action::Replaced);
        assert_eq!("Obsoleted".parse::<Action>().unwrap(), Action::Replaced);
    }

    #[test]
    fn test_unknown_strings_are_invalid_value() {
        assert!(matches!("Frobnicate".parse::<Action>(), Err(Error::InvalidValue(_))));
        assert!(matches!("Because".parse::<Reason>(), Err(Error::InvalidValue(_))));
        assert!(matches!("Done".parse::<State>(), Err(Error::InvalidValue(_))));
    }

    #[test]
    fn test_direction_classification() {
        let inbound: Vec<_> = ACTIONS.iter().filter(|a| a.is_inbound()).collect();
        let outbound: Vec<_> = ACTIONS.iter().filter(|a| a.is_outbound()).collect();
        assert_eq!(inbound.len(), 4);
        assert_eq!(outbound, vec![&Action::Remove, &Action::Replaced]);
        assert!(!Action::ReasonChange.is_inbound() && !Action::ReasonChange.is_outbound());
    }

    #[test]
    fn test_reason_compare_is_total() {
        let order = [
            Reason::None,
            Reason::Dependency,
            Reason::ExternalUser,
            Reason::WeakDependency,
            Reason::Group,
            Reason::Clean,
            Reason::User,
        ];
        for (i, a) in order.iter().enumerate() {
            for (j, b) in order.iter().enumerate() {
                let expected = (i as i32 - j as i32).signum();
                assert_eq!(reason_compare(*a, *b), expected);
            }
        }
    }

    #[test]
    fn test_revert_actions() {
        assert_eq!(Action::Install.revert(), Some(Action::Remove));
        assert_eq!(Action::Upgrade.revert(), Some(Action::Replaced));
        assert_eq!(Action::Replaced.revert(), Some(Action::Install));
        assert_eq!(Action::Enable.revert(), None);
    }
}
