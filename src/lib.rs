// src/lib.rs

//! Package transaction engine
//!
//! Executes resolved package transactions through a pluggable backend and
//! keeps a durable history of every run, from which transactions can be
//! listed, undone, redone, rolled back, stored and replayed.
//!
//! # Architecture
//!
//! - `item`: actions, reasons, states and the four item kinds
//! - `db`: SQLite history store and installed-system tables
//! - `history`: id specs, queries, revert and merge of recorded transactions
//! - `replay`: the portable JSON form of a transaction and its resolution
//! - `transaction`: resolved transactions and the execution engine

pub mod config;
pub mod db;
mod error;
pub mod history;
pub mod item;
pub mod replay;
pub mod transaction;
pub mod version;

pub use config::Config;
pub use error::{Error, Result};
pub use history::TransactionHistory;
pub use replay::{ReplaySettings, TransactionReplay};
pub use transaction::{ResolvedTransaction, RunResult};
