// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use pkgtxn::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands, HistoryCommands};

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    if let Err(err) = run() {
        if let Some(exit) = err.downcast_ref::<commands::CommandExitError>() {
            eprintln!("{}", exit.message);
            std::process::exit(exit.code);
        }
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }
    let db_path = config.db_path.clone();

    match cli.command {
        Commands::Init => {
            info!("Initializing database at: {}", db_path);
            pkgtxn::db::init(&db_path)?;
            println!("Database initialized successfully at: {}", db_path);
            Ok(())
        }
        Commands::History(command) => match command {
            HistoryCommands::List {
                specs,
                reverse,
                contains_pkgs,
            } => commands::cmd_history_list(&db_path, &specs, reverse, &contains_pkgs),
            HistoryCommands::Info {
                specs,
                reverse,
                contains_pkgs,
                json,
            } => commands::cmd_history_info(&db_path, &specs, reverse, &contains_pkgs, json),
            HistoryCommands::Undo {
                spec,
                ignore_installed,
                dry_run,
            } => commands::cmd_history_undo(&db_path, &config, &spec, ignore_installed, dry_run),
            HistoryCommands::Redo { spec, dry_run } => {
                commands::cmd_history_redo(&db_path, &config, &spec, dry_run)
            }
            HistoryCommands::Rollback {
                spec,
                ignore_installed,
                dry_run,
            } => commands::cmd_history_rollback(&db_path, &config, &spec, ignore_installed, dry_run),
            HistoryCommands::Store {
                specs,
                output,
                assumeyes,
            } => commands::cmd_history_store(&db_path, &specs, &output, assumeyes),
            HistoryCommands::Replay {
                path,
                resolve,
                ignore_installed,
                ignore_extras,
                skip_unavailable,
                dry_run,
            } => commands::cmd_history_replay(
                &db_path,
                &config,
                &path,
                resolve,
                ignore_installed,
                ignore_extras,
                skip_unavailable,
                dry_run,
            ),
            HistoryCommands::Changes { since } => commands::cmd_history_changes(&db_path, since),
        },
    }
}
