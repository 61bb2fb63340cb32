// src/transaction/callbacks.rs

//! Notifications relayed while a transaction executes
//!
//! The backend reports progress through one stream of [`BackendEvent`]s; the
//! engine resolves the affected element back to its [`ResolvedPackage`] and
//! forwards a typed call on [`TransactionCallbacks`]. Every method has an
//! empty default so implementors only override what they display.

use super::resolved::ResolvedPackage;
use crate::version::Nevra;
use std::fmt;

/// Kind of scriptlet being run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptType {
    Unknown,
    PreInstall,
    PostInstall,
    PreUninstall,
    PostUninstall,
    PreTransaction,
    PostTransaction,
    TriggerPreInstall,
    TriggerInstall,
    TriggerUninstall,
    TriggerPostUninstall,
}

impl ScriptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::Unknown => "unknown",
            ScriptType::PreInstall => "pre",
            ScriptType::PostInstall => "post",
            ScriptType::PreUninstall => "preun",
            ScriptType::PostUninstall => "postun",
            ScriptType::PreTransaction => "pretrans",
            ScriptType::PostTransaction => "posttrans",
            ScriptType::TriggerPreInstall => "triggerprein",
            ScriptType::TriggerInstall => "triggerin",
            ScriptType::TriggerUninstall => "triggerun",
            ScriptType::TriggerPostUninstall => "triggerpostun",
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw notification emitted by a backend during `run`
///
/// Events that concern a single element are delivered together with that
/// element; the engine rejects them when the element is missing or unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    InstallStart { total: u64 },
    InstallProgress { amount: u64, total: u64 },
    InstallStop,
    UninstallStart { total: u64 },
    UninstallProgress { amount: u64, total: u64 },
    UninstallStop,
    UnpackError,
    CpioError,
    ElementProgress { amount: u64, total: u64 },
    TransactionStart { total: u64 },
    TransactionProgress { amount: u64, total: u64 },
    TransactionStop,
    VerifyStart { total: u64 },
    VerifyProgress { amount: u64, total: u64 },
    VerifyStop,
    ScriptStart { script_type: ScriptType },
    ScriptStop { script_type: ScriptType, return_code: i32 },
    ScriptError { script_type: ScriptType, return_code: i32 },
}

/// Observer of a running transaction
#[allow(unused_variables)]
pub trait TransactionCallbacks {
    /// Called before the backend starts, with the number of elements to process
    fn before_begin(&mut self, total: usize) {}

    /// Called once the backend returned
    fn after_complete(&mut self, success: bool) {}

    fn install_start(&mut self, item: &ResolvedPackage, total: u64) {}
    fn install_progress(&mut self, item: &ResolvedPackage, amount: u64, total: u64) {}
    fn install_stop(&mut self, item: &ResolvedPackage) {}

    fn uninstall_start(&mut self, item: &ResolvedPackage, total: u64) {}
    fn uninstall_progress(&mut self, item: &ResolvedPackage, amount: u64, total: u64) {}
    fn uninstall_stop(&mut self, item: &ResolvedPackage) {}

    fn unpack_error(&mut self, item: &ResolvedPackage) {}
    fn cpio_error(&mut self, item: &ResolvedPackage) {}

    fn elem_progress(&mut self, item: &ResolvedPackage, amount: u64, total: u64) {}

    fn transaction_start(&mut self, total: u64) {}
    fn transaction_progress(&mut self, amount: u64, total: u64) {}
    fn transaction_stop(&mut self) {}

    fn verify_start(&mut self, total: u64) {}
    fn verify_progress(&mut self, amount: u64, total: u64) {}
    fn verify_stop(&mut self) {}

    fn script_start(&mut self, item: Option<&ResolvedPackage>, nevra: Option<&Nevra>, script_type: ScriptType) {}

    /// Output captured from the scriptlet that just stopped or failed
    fn script_output(
        &mut self,
        item: Option<&ResolvedPackage>,
        nevra: Option<&Nevra>,
        script_type: ScriptType,
        return_code: i32,
        output: &str,
    ) {
    }

    fn script_stop(&mut self, item: Option<&ResolvedPackage>, nevra: Option<&Nevra>, script_type: ScriptType, return_code: i32) {}

    fn script_error(&mut self, item: Option<&ResolvedPackage>, nevra: Option<&Nevra>, script_type: ScriptType, return_code: i32) {}
}

/// Callbacks that ignore every notification
#[derive(Debug, Default)]
pub struct SilentCallbacks;

impl TransactionCallbacks for SilentCallbacks {}
