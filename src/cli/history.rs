// src/cli/history.rs
//! Transaction history commands

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum HistoryCommands {
    /// List transactions
    List {
        /// Transaction ids or ranges (`ID`, `last`, `last-N`, `FROM..TO`)
        specs: Vec<String>,

        /// Oldest first
        #[arg(long)]
        reverse: bool,

        /// Only transactions touching one of these package names
        #[arg(long, value_delimiter = ',')]
        contains_pkgs: Vec<String>,
    },

    /// Show transaction details (default: last)
    Info {
        /// Transaction ids or ranges
        specs: Vec<String>,

        /// Oldest first
        #[arg(long)]
        reverse: bool,

        /// Only transactions touching one of these package names
        #[arg(long, value_delimiter = ',')]
        contains_pkgs: Vec<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Revert one transaction
    Undo {
        /// Transaction to revert
        spec: String,

        /// Treat mismatches with installed packages as warnings
        #[arg(long)]
        ignore_installed: bool,

        /// Only test the resulting transaction
        #[arg(long)]
        dry_run: bool,
    },

    /// Repeat one transaction
    Redo {
        /// Transaction to repeat
        spec: String,

        /// Only test the resulting transaction
        #[arg(long)]
        dry_run: bool,
    },

    /// Revert every transaction after the given one
    Rollback {
        /// Transaction to go back to
        spec: String,

        /// Treat mismatches with installed packages as warnings
        #[arg(long)]
        ignore_installed: bool,

        /// Only test the resulting transaction
        #[arg(long)]
        dry_run: bool,
    },

    /// Store a transaction for later replay (default: last)
    Store {
        /// Transaction to store
        specs: Vec<String>,

        /// Destination directory
        #[arg(short, long, default_value = "./transaction")]
        output: PathBuf,

        /// Overwrite an existing stored transaction without asking
        #[arg(short = 'y', long)]
        assumeyes: bool,
    },

    /// Replay a stored transaction
    Replay {
        /// Stored transaction directory or document
        path: PathBuf,

        /// Derive package actions from the installed set instead of the stored ones
        #[arg(long)]
        resolve: bool,

        /// Treat mismatches with installed packages as warnings
        #[arg(long)]
        ignore_installed: bool,

        /// Treat packages not in the stored transaction as warnings
        #[arg(long)]
        ignore_extras: bool,

        /// Skip packages and definitions that are not available
        #[arg(long)]
        skip_unavailable: bool,

        /// Only test the resulting transaction
        #[arg(long)]
        dry_run: bool,
    },

    /// Summarize recent package changes
    Changes {
        /// Only transactions that ended after this Unix timestamp
        #[arg(long)]
        since: Option<i64>,
    },
}
