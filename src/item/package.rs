// src/item/package.rs

//! Package items

use super::{Action, ItemInfo, Reason};
use crate::version::Nevra;

/// A package taking part in a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageItem {
    pub info: ItemInfo,
    pub nevra: Nevra,
}

impl PackageItem {
    pub fn new(nevra: Nevra, action: Action, reason: Reason, repo_id: &str) -> Self {
        Self {
            info: ItemInfo::new(action, reason, repo_id),
            nevra,
        }
    }

    pub fn name(&self) -> &str {
        &self.nevra.name
    }

    pub fn arch(&self) -> &str {
        &self.nevra.arch
    }
}
