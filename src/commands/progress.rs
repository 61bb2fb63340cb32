// src/commands/progress.rs
//! Progress display for transaction runs
//!
//! An overall bar counts finished elements; a status line below shows the
//! current operation. Scriptlet output and failures are printed above the
//! bars so they stay visible after the run.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use pkgtxn::transaction::{ResolvedPackage, ScriptType, TransactionCallbacks};
use pkgtxn::version::Nevra;
use std::time::Duration;

/// Transaction progress tracker driven by engine callbacks
pub struct TransactionProgress {
    multi: MultiProgress,
    overall: ProgressBar,
    status: ProgressBar,
    completed: u64,
}

impl TransactionProgress {
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let overall = ProgressBar::new(0);
        overall.set_style(
            ProgressStyle::default_bar()
                .template("{msg} ({pos}/{len}) [{bar:40.green/dim}] {percent}%")
                .expect("Invalid progress bar template")
                .progress_chars("##-"),
        );
        overall.set_message("Running transaction");

        let status = ProgressBar::new_spinner();
        status.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner:.cyan} {msg}")
                .expect("Invalid spinner template"),
        );
        status.enable_steady_tick(Duration::from_millis(100));

        let overall = multi.add(overall);
        let status = multi.add(status);

        Self {
            multi,
            overall,
            status,
            completed: 0,
        }
    }

    fn element_done(&mut self, message: String) {
        self.completed += 1;
        self.overall.set_position(self.completed);
        self.status.set_message(message);
    }

    /// Print a line above the bars
    fn println(&self, line: &str) {
        if self.multi.println(line).is_err() {
            eprintln!("{}", line);
        }
    }
}

fn subject(item: Option<&ResolvedPackage>, nevra: Option<&Nevra>) -> String {
    match (item, nevra) {
        (Some(item), _) => item.nevra().to_string(),
        (None, Some(nevra)) => nevra.to_string(),
        (None, None) => "transaction".to_string(),
    }
}

impl TransactionCallbacks for TransactionProgress {
    fn before_begin(&mut self, total: usize) {
        self.overall.set_length(total as u64);
    }

    fn after_complete(&mut self, success: bool) {
        self.status.finish_and_clear();
        if success {
            self.overall.finish_with_message("Transaction complete");
        } else {
            self.overall.abandon_with_message("Transaction failed");
        }
    }

    fn install_start(&mut self, item: &ResolvedPackage, _total: u64) {
        self.status
            .set_message(format!("{} {}...", item.action(), item.nevra()));
    }

    fn install_stop(&mut self, item: &ResolvedPackage) {
        self.element_done(format!("{} {} [done]", item.action(), item.nevra()));
    }

    fn uninstall_start(&mut self, item: &ResolvedPackage, _total: u64) {
        self.status
            .set_message(format!("{} {}...", item.action(), item.nevra()));
    }

    fn uninstall_stop(&mut self, item: &ResolvedPackage) {
        self.element_done(format!("{} {} [done]", item.action(), item.nevra()));
    }

    fn unpack_error(&mut self, item: &ResolvedPackage) {
        self.println(&format!("Unpack error: {}", item.nevra()));
    }

    fn cpio_error(&mut self, item: &ResolvedPackage) {
        self.println(&format!("Cpio error: {}", item.nevra()));
    }

    fn transaction_start(&mut self, _total: u64) {
        self.status.set_message("Preparing transaction...");
    }

    fn verify_start(&mut self, _total: u64) {
        self.status.set_message("Verifying packages...");
    }

    fn script_start(&mut self, item: Option<&ResolvedPackage>, nevra: Option<&Nevra>, script_type: ScriptType) {
        self.status.set_message(format!(
            "Running {} scriptlet: {}",
            script_type,
            subject(item, nevra)
        ));
    }

    fn script_output(
        &mut self,
        _item: Option<&ResolvedPackage>,
        _nevra: Option<&Nevra>,
        _script_type: ScriptType,
        _return_code: i32,
        output: &str,
    ) {
        for line in output.lines() {
            self.println(line);
        }
    }

    fn script_error(
        &mut self,
        item: Option<&ResolvedPackage>,
        nevra: Option<&Nevra>,
        script_type: ScriptType,
        return_code: i32,
    ) {
        self.println(&format!(
            "Error in {} scriptlet: {} return code {}",
            script_type,
            subject(item, nevra),
            return_code
        ));
    }
}
