// src/commands/history.rs
//! Transaction history commands

use super::CommandExitError;
use super::progress::TransactionProgress;
use anyhow::{Context, Result, bail};
use pkgtxn::db::models::TransactionRecord;
use pkgtxn::history::{
    TransactionHistory, recent_changes, resolve_transaction_specs, rollback_replay, undo_replay,
};
use pkgtxn::item::{Item, default_item_order};
use pkgtxn::replay::{
    ReplaySettings, TRANSACTION_FILE, TransactionReplay, load_replay, resolve_replay, store_replay,
};
use pkgtxn::transaction::{ResolvedTransaction, RunEnvironment, SystemBackend};
use pkgtxn::Config;
use rusqlite::Connection;
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing::{info, warn};

fn open_db(db_path: &str) -> Result<Connection> {
    pkgtxn::db::open(db_path).context("Failed to open package database")
}

fn format_time(timestamp: i64) -> String {
    if timestamp == 0 {
        return "unknown".to_string();
    }
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Records matching `specs` (all when empty), filtered and ordered for display
fn select_records(
    history: &TransactionHistory<'_>,
    specs: &[String],
    reverse: bool,
    contains_pkgs: &[String],
) -> Result<Vec<TransactionRecord>> {
    let records = if specs.is_empty() {
        history.list_all_transactions()?
    } else {
        resolve_transaction_specs(history, specs)?
    };
    let mut records = history.filter_transactions_by_pkg_names(records, contains_pkgs)?;

    records.sort_by_key(|t| t.id);
    records.dedup_by_key(|t| t.id);
    if !reverse {
        records.reverse();
    }
    Ok(records)
}

/// The single record `specs` name; anything else exits with status 1
fn select_one(history: &TransactionHistory<'_>, specs: &[String]) -> Result<TransactionRecord> {
    pkgtxn::history::select_one(history, specs).map_err(|err| match err {
        pkgtxn::Error::NoMatchingTransaction | pkgtxn::Error::AmbiguousTransaction => {
            CommandExitError::new(1, err.to_string()).into()
        }
        other => other.into(),
    })
}

/// List transactions
pub fn cmd_history_list(db_path: &str, specs: &[String], reverse: bool, contains_pkgs: &[String]) -> Result<()> {
    let conn = open_db(db_path)?;
    let history = TransactionHistory::new(&conn);

    let records = select_records(&history, specs, reverse, contains_pkgs)?;
    if records.is_empty() {
        println!("No transactions recorded.");
        return Ok(());
    }
    let counts = history.get_transaction_item_counts(&records)?;

    println!("{:>5}  {:40}  {:19}  {:6}  {:>7}", "ID", "COMMAND LINE", "DATE AND TIME", "STATUS", "ALTERED");
    println!("{}", "-".repeat(86));
    for record in &records {
        let mut description = record.description.clone();
        if description.chars().count() > 40 {
            description = description.chars().take(37).collect::<String>() + "...";
        }
        println!(
            "{:>5}  {:40}  {:19}  {:6}  {:>7}",
            record.id,
            description,
            format_time(record.dt_start),
            record.state.as_str(),
            counts.get(&record.id).copied().unwrap_or(0)
        );
    }
    Ok(())
}

fn item_repo(item: &Item) -> &str {
    &item.info().repo_id
}

fn record_json(conn: &Connection, record: &TransactionRecord) -> Result<serde_json::Value> {
    let items: Vec<serde_json::Value> = record
        .items_sorted(default_item_order)
        .iter()
        .map(|item| {
            json!({
                "type": item.kind().as_str(),
                "name": item.identity(),
                "action": item.action().as_str(),
                "reason": item.reason().as_str(),
                "repository": item_repo(item),
                "state": item.state().as_str(),
            })
        })
        .collect();
    let output: Vec<String> = record
        .console_output(conn)?
        .into_iter()
        .map(|(_, line)| line)
        .collect();

    Ok(json!({
        "id": record.id,
        "start_time": record.dt_start,
        "end_time": record.dt_end,
        "rpmdb_version_begin": record.rpmdb_version_begin,
        "rpmdb_version_end": record.rpmdb_version_end,
        "user_id": record.user_id,
        "status": record.state.as_str(),
        "releasever": record.releasever,
        "description": record.description,
        "comment": record.comment,
        "items": items,
        "scriptlet_output": output,
    }))
}

fn print_record(conn: &Connection, record: &TransactionRecord) -> Result<()> {
    println!("Transaction ID : {}", record.id);
    println!("Begin time     : {}", format_time(record.dt_start));
    println!("Begin rpmdb    : {}", record.rpmdb_version_begin);
    println!("End time       : {}", format_time(record.dt_end));
    println!("End rpmdb      : {}", record.rpmdb_version_end);
    println!("User           : {}", record.user_id);
    println!("Status         : {}", record.state);
    println!("Releasever     : {}", record.releasever);
    println!("Description    : {}", record.description);
    println!("Comment        : {}", record.comment);

    let items = record.items_sorted(default_item_order);
    println!("\nItems altered ({}):", items.len());
    for item in &items {
        println!(
            "  {:14} {:50} {:16} {}",
            item.action().as_str(),
            item.identity(),
            item.reason().as_str(),
            item_repo(item)
        );
    }

    let output = record.console_output(conn)?;
    if !output.is_empty() {
        println!("\nScriptlet output:");
        for (_, line) in output {
            println!("  {}", line);
        }
    }
    Ok(())
}

/// Show transaction details
pub fn cmd_history_info(
    db_path: &str,
    specs: &[String],
    reverse: bool,
    contains_pkgs: &[String],
    as_json: bool,
) -> Result<()> {
    let conn = open_db(db_path)?;
    let history = TransactionHistory::new(&conn);

    let specs = if specs.is_empty() {
        vec!["last".to_string()]
    } else {
        specs.to_vec()
    };
    let mut records = select_records(&history, &specs, reverse, contains_pkgs)?;
    history.load_items(&mut records)?;

    if as_json {
        let values = records
            .iter()
            .map(|record| record_json(&conn, record))
            .collect::<Result<Vec<_>>>()?;
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No matching transactions.");
        return Ok(());
    }
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            println!();
        }
        print_record(&conn, record)?;
    }
    Ok(())
}

fn print_transaction_table(transaction: &ResolvedTransaction) {
    println!("{:14} {:50} {:16} REPOSITORY", "ACTION", "ITEM", "REASON");
    println!("{}", "-".repeat(96));
    for pkg in &transaction.packages {
        println!(
            "{:14} {:50} {:16} {}",
            pkg.action().as_str(),
            pkg.nevra().to_string(),
            pkg.reason().as_str(),
            pkg.item.info.repo_id
        );
    }
    for group in &transaction.groups {
        println!(
            "{:14} {:50} {:16} {}",
            group.info.action.as_str(),
            format!("@{}", group.group_id),
            group.info.reason.as_str(),
            group.info.repo_id
        );
    }
    for env in &transaction.environments {
        println!(
            "{:14} {:50} {:16} {}",
            env.info.action.as_str(),
            format!("@{}", env.environment_id),
            env.info.reason.as_str(),
            env.info.repo_id
        );
    }
    for module in &transaction.modules {
        println!(
            "{:14} {:50} {}",
            module.info.action.as_str(),
            module.to_string(),
            module.info.reason.as_str()
        );
    }
    println!();
}

/// Print resolve output, then test or run the transaction
fn execute_transaction(
    conn: &Connection,
    config: &Config,
    mut transaction: ResolvedTransaction,
    dry_run: bool,
) -> Result<()> {
    for log in &transaction.resolve_logs {
        eprintln!("Warning: {}", log);
    }
    if !transaction.problems.is_empty() {
        eprintln!("Failed to resolve the transaction:");
        for problem in &transaction.problems {
            eprintln!("  {}", problem);
        }
        bail!("Cannot run transaction with resolving problems.");
    }
    if transaction.is_empty() {
        println!("Nothing to do.");
        return Ok(());
    }

    print_transaction_table(&transaction);

    let mut backend = SystemBackend::new(conn, &config.installonly_pkgs);
    let mut env = RunEnvironment {
        conn,
        config,
        backend: &mut backend,
        verifier: None,
    };

    let result = if dry_run {
        transaction.test(&mut env)?
    } else {
        let mut progress = TransactionProgress::new();
        transaction.run(&mut env, &mut progress)?
    };

    if !result.is_success() {
        for problem in transaction
            .transaction_problems()
            .iter()
            .chain(transaction.signature_problems())
        {
            eprintln!("  {}", problem);
        }
        bail!("{}", result.message());
    }

    match transaction.history_id() {
        Some(id) => println!("Complete! Recorded as transaction {}.", id),
        None => println!("Test of the transaction succeeded; nothing was changed."),
    }
    Ok(())
}

/// Revert one transaction
pub fn cmd_history_undo(db_path: &str, config: &Config, spec: &str, ignore_installed: bool, dry_run: bool) -> Result<()> {
    let conn = open_db(db_path)?;
    let history = TransactionHistory::new(&conn);
    let record = select_one(&history, &[spec.to_string()])?;
    info!("Reverting transaction {}", record.id);

    let (replay, logs) = undo_replay(&history, &record, &config.installonly_pkgs)?;
    let mut transaction = resolve_replay(&conn, &replay, None, &ReplaySettings::revert(ignore_installed), config)?;
    let resolve_logs = std::mem::take(&mut transaction.resolve_logs);
    transaction.resolve_logs = logs.into_iter().chain(resolve_logs).collect();
    transaction.description = format!("history undo {}", spec);

    execute_transaction(&conn, config, transaction, dry_run)
}

/// Repeat one transaction
pub fn cmd_history_redo(db_path: &str, config: &Config, spec: &str, dry_run: bool) -> Result<()> {
    let conn = open_db(db_path)?;
    let history = TransactionHistory::new(&conn);
    let record = select_one(&history, &[spec.to_string()])?;
    info!("Repeating transaction {}", record.id);

    let replay = TransactionReplay::from_record(&record);
    let mut transaction = resolve_replay(&conn, &replay, None, &ReplaySettings::redo(), config)?;
    transaction.description = format!("history redo {}", spec);

    execute_transaction(&conn, config, transaction, dry_run)
}

/// Revert every transaction after the given one
pub fn cmd_history_rollback(
    db_path: &str,
    config: &Config,
    spec: &str,
    ignore_installed: bool,
    dry_run: bool,
) -> Result<()> {
    let conn = open_db(db_path)?;
    let history = TransactionHistory::new(&conn);
    let record = select_one(&history, &[spec.to_string()])?;
    info!("Rolling back to transaction {}", record.id);

    let (replay, logs) = rollback_replay(&history, record.id, &config.installonly_pkgs)?;
    let mut transaction = resolve_replay(&conn, &replay, None, &ReplaySettings::revert(ignore_installed), config)?;
    let resolve_logs = std::mem::take(&mut transaction.resolve_logs);
    transaction.resolve_logs = logs.into_iter().chain(resolve_logs).collect();
    transaction.description = format!("history rollback {}", spec);

    execute_transaction(&conn, config, transaction, dry_run)
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N]: ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Store a transaction for later replay
pub fn cmd_history_store(db_path: &str, specs: &[String], output: &Path, assumeyes: bool) -> Result<()> {
    let conn = open_db(db_path)?;
    let history = TransactionHistory::new(&conn);

    let record = if specs.is_empty() {
        select_one(&history, &["last".to_string()])?
    } else {
        select_one(&history, specs)?
    };

    let target = output.join(TRANSACTION_FILE);
    if target.exists()
        && !assumeyes
        && !confirm(&format!(
            "File \"{}\" already exists, it will be overwritten. Do you want to continue?",
            target.display()
        ))?
    {
        return Err(pkgtxn::Error::Cancelled(format!("{} was not overwritten", target.display())).into());
    }

    let replay = TransactionReplay::from_record(&record);
    let path = store_replay(&replay, &record.groups, &record.environments, output)
        .with_context(|| format!("Failed to store transaction {}", record.id))?;
    println!("Transaction saved to {}.", path.display());
    Ok(())
}

/// Replay a stored transaction
#[allow(clippy::too_many_arguments)]
pub fn cmd_history_replay(
    db_path: &str,
    config: &Config,
    path: &Path,
    resolve: bool,
    ignore_installed: bool,
    ignore_extras: bool,
    skip_unavailable: bool,
    dry_run: bool,
) -> Result<()> {
    let conn = open_db(db_path)?;
    let (replay, base_dir) = load_replay(path)
        .with_context(|| format!("Failed to load stored transaction from {}", path.display()))?;

    if let Some(releasever) = &config.releasever
        && !replay.releasever.is_empty()
        && replay.releasever != *releasever
    {
        warn!(
            "Stored transaction was made for release {}, running {}",
            replay.releasever, releasever
        );
    }

    let settings = ReplaySettings {
        ignore_installed,
        ignore_extras,
        override_reasons: false,
        skip_unavailable: skip_unavailable || config.skip_unavailable,
        resolve_again: resolve,
    };
    let mut transaction = resolve_replay(&conn, &replay, Some(&base_dir), &settings, config)?;
    transaction.description = format!("history replay {}", path.display());

    execute_transaction(&conn, config, transaction, dry_run)
}

/// Summarize recent package changes
pub fn cmd_history_changes(db_path: &str, since: Option<i64>) -> Result<()> {
    let conn = open_db(db_path)?;
    let history = TransactionHistory::new(&conn);
    let changes = recent_changes(&history, since)?;

    if changes.is_empty() {
        println!("No package changes.");
        return Ok(());
    }
    if !changes.installed.is_empty() {
        println!("Installed ({}):", changes.installed.len());
        for nevra in &changes.installed {
            println!("  + {}", nevra);
        }
    }
    if !changes.removed.is_empty() {
        println!("Removed ({}):", changes.removed.len());
        for nevra in &changes.removed {
            println!("  - {}", nevra);
        }
    }
    if !changes.upgraded.is_empty() {
        println!("Upgraded ({}):", changes.upgraded.len());
        for (old, new) in &changes.upgraded {
            println!("  ^ {} -> {}", old, new);
        }
    }
    if !changes.downgraded.is_empty() {
        println!("Downgraded ({}):", changes.downgraded.len());
        for (old, new) in &changes.downgraded {
            println!("  v {} -> {}", old, new);
        }
    }
    Ok(())
}
