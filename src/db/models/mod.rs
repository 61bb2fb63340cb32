// src/db/models/mod.rs

//! Data models for history and installed-system records
//!
//! Each struct corresponds to one or more database tables and provides the
//! methods for creating, reading and updating its rows.

mod installed;
pub(crate) mod item;
mod trans;

pub use installed::{
    InstalledEnvironment, InstalledGroup, InstalledPackage, ModuleState, ModuleStatus, rpmdb_cookie,
};
pub use trans::TransactionRecord;
pub(crate) use trans::TRANS_COLUMNS;
