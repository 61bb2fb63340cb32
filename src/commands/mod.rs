// src/commands/mod.rs
//! Command handlers for the pkgtxn CLI

mod history;
pub mod progress;

pub use history::{
    cmd_history_changes, cmd_history_info, cmd_history_list, cmd_history_redo, cmd_history_replay,
    cmd_history_rollback, cmd_history_store, cmd_history_undo,
};

/// Failure that ends the process with a specific exit code
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CommandExitError {
    pub code: i32,
    pub message: String,
}

impl CommandExitError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
