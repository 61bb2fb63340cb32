// src/cli/mod.rs
//! CLI definitions for pkgtxn
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.
//!
//! - `init` - Create the database
//! - `history` - Inspect and act on recorded transactions

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod history;

pub use history::HistoryCommands;

#[derive(Parser)]
#[command(name = "pkgtxn")]
#[command(version)]
#[command(about = "Package transactions with durable history, undo, redo, rollback and replay", long_about = None)]
pub struct Cli {
    /// Path to the database file (overrides the configuration)
    #[arg(short, long, global = true)]
    pub db_path: Option<String>,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Transaction history
    #[command(subcommand)]
    History(HistoryCommands),
}
