// src/item/module.rs

//! Module stream items

use super::{Action, ItemInfo, Reason};
use std::fmt;

/// A module stream; its actions never touch the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleItem {
    pub info: ItemInfo,
    pub name: String,
    pub stream: String,
}

impl ModuleItem {
    pub fn new(name: &str, stream: &str, action: Action, reason: Reason) -> Self {
        Self {
            info: ItemInfo::new(action, reason, ""),
            name: name.to_string(),
            stream: stream.to_string(),
        }
    }
}

impl fmt::Display for ModuleItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.stream)
    }
}
