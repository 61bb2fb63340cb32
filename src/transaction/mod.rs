// src/transaction/mod.rs

//! Executing resolved transactions
//!
//! A [`ResolvedTransaction`] is run through a fixed pipeline:
//!
//! ```text
//! rerun guard -> resolve problems -> signatures -> lock -> fill -> check
//!   -> test run -> [stop if test only] -> history start -> run
//!   -> system state update -> history finish
//! ```
//!
//! Recoverable failures come back as a [`RunResult`]; backend contract
//! violations come back as [`Error::Integrity`](crate::Error::Integrity).

mod backend;
mod callbacks;
mod engine;
mod resolved;
mod scriptlet;

pub use backend::{Backend, ProblemFilter, SystemBackend};
pub use callbacks::{BackendEvent, ScriptType, SilentCallbacks, TransactionCallbacks};
pub use engine::{Element, ElementEvent, ElementId, ElementType, Engine, FillContext, RunContext, RunOutput};
pub use resolved::{ResolvedPackage, ResolvedTransaction};
pub use scriptlet::{ScriptletDrain, ScriptletOutput, ScriptletWriter};

use crate::config::Config;
use crate::db::models::{
    InstalledEnvironment, InstalledGroup, InstalledPackage, ModuleState, ModuleStatus, TransactionRecord,
};
use crate::error::{Error, Result};
use crate::item::{Action, Reason, State};
use fs2::FileExt;
use rusqlite::Connection;
use std::fmt;
use std::fs::{self, File};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name of the lock file serializing transaction runs
pub const LOCK_FILE: &str = "pkgtxn.lock";

/// Outcome of running a resolved transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    Success,
    ErrorRerun,
    ErrorResolve,
    ErrorLock,
    ErrorCheck,
    ErrorRpmRun,
    ErrorGpgCheck,
}

impl RunResult {
    pub fn message(&self) -> &'static str {
        match self {
            RunResult::Success => "",
            RunResult::ErrorRerun => "This transaction has been already run before.",
            RunResult::ErrorResolve => "Cannot run transaction with resolving problems.",
            RunResult::ErrorLock => {
                "Failed to obtain rpm transaction lock. Another transaction is in progress."
            }
            RunResult::ErrorCheck => "Rpm transaction check failed.",
            RunResult::ErrorRpmRun => "Rpm transaction failed.",
            RunResult::ErrorGpgCheck => "Signature verification failed.",
        }
    }

    pub fn is_success(&self) -> bool {
        *self == RunResult::Success
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunResult::Success => f.write_str("Success"),
            other => f.write_str(other.message()),
        }
    }
}

/// Verifies package signatures before anything is executed
pub trait SignatureVerifier {
    /// `Err` carries a problem description
    fn verify(&self, package: &ResolvedPackage) -> std::result::Result<(), String>;
}

/// Fetches inbound packages to local files
pub trait PackageDownloader {
    fn download(&mut self, package: &ResolvedPackage) -> Result<PathBuf>;
}

/// Collaborators of one run
pub struct RunEnvironment<'a> {
    pub conn: &'a Connection,
    pub config: &'a Config,
    pub backend: &'a mut dyn Backend,
    pub verifier: Option<&'a dyn SignatureVerifier>,
}

/// Exclusive run lock; released when dropped
struct RunLock {
    file: File,
}

impl RunLock {
    const MAX_RETRIES: u32 = 3;

    fn acquire(config: &Config) -> Result<Option<Self>> {
        let dir = config.lock_dir();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::IoError(format!("Failed to create {}: {}", dir.display(), e)))?;
        let file = File::create(dir.join(LOCK_FILE))?;

        // Tries: 0ms, 100ms, 200ms
        for attempt in 0..Self::MAX_RETRIES {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Some(Self { file })),
                Err(e) => {
                    debug!("Transaction lock busy (attempt {}): {}", attempt + 1, e);
                    if attempt < Self::MAX_RETRIES - 1 {
                        std::thread::sleep(Duration::from_millis(100 * (1 << attempt)));
                    }
                }
            }
        }
        Ok(None)
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl ResolvedTransaction {
    /// Fetch every inbound package that has no local file yet; stops at the first failure
    pub fn download(&mut self, downloader: &mut dyn PackageDownloader) -> Result<()> {
        for package in &mut self.packages {
            if !package.action().is_inbound() || package.package_path.is_some() {
                continue;
            }
            let path = downloader.download(package)?;
            debug!("Downloaded {} to {}", package.nevra(), path.display());
            package.package_path = Some(path);
        }
        Ok(())
    }

    /// Verify every inbound package; problems are kept in `signature_problems`
    pub fn check_gpg_signatures(&mut self, verifier: &dyn SignatureVerifier) -> bool {
        self.signature_problems = self
            .packages
            .iter()
            .filter(|p| p.action().is_inbound())
            .filter_map(|p| verifier.verify(p).err())
            .collect();
        self.signature_problems.is_empty()
    }

    /// Check the transaction in the backend without changing anything
    pub fn test(&mut self, env: &mut RunEnvironment<'_>) -> Result<RunResult> {
        self.execute(env, &mut SilentCallbacks, true)
    }

    /// Execute the transaction and record it in history
    pub fn run(
        &mut self,
        env: &mut RunEnvironment<'_>,
        callbacks: &mut dyn TransactionCallbacks,
    ) -> Result<RunResult> {
        self.execute(env, callbacks, false)
    }

    fn execute(
        &mut self,
        env: &mut RunEnvironment<'_>,
        callbacks: &mut dyn TransactionCallbacks,
        test: bool,
    ) -> Result<RunResult> {
        if self.run_attempted {
            return Ok(RunResult::ErrorRerun);
        }
        self.run_attempted = true;

        if !self.problems.is_empty() {
            return Ok(RunResult::ErrorResolve);
        }

        if env.config.pkg_gpgcheck
            && let Some(verifier) = env.verifier
            && !self.check_gpg_signatures(verifier)
        {
            return Ok(RunResult::ErrorGpgCheck);
        }

        let test_only = test || env.config.test_only()?;

        let Some(_lock) = RunLock::acquire(env.config)? else {
            return Ok(RunResult::ErrorLock);
        };

        let mut engine = Engine::new(&mut *env.backend, env.config);
        engine.fill(&self.packages)?;

        let problems = engine.check();
        if !problems.is_empty() {
            self.transaction_problems = problems;
            return Ok(RunResult::ErrorCheck);
        }

        let output = engine.run(&self.packages, &mut SilentCallbacks, true)?;
        if output.return_code != 0 {
            self.transaction_problems = engine.problems();
            return Ok(RunResult::ErrorRpmRun);
        }
        if test_only {
            info!("Test transaction finished successfully");
            return Ok(RunResult::Success);
        }

        let mut record = self.to_record(env.config);
        record.rpmdb_version_begin = engine.db_cookie()?;
        let id = record.start(env.conn)?;
        self.history_id = Some(id);

        // A started record is always finished, as Error when anything below fails
        let outcome = engine
            .run(&self.packages, callbacks, false)
            .and_then(|output| self.record_run(env.conn, &record, &engine, &output));

        record.rpmdb_version_end = engine.db_cookie().unwrap_or_else(|err| {
            warn!("Cannot read the installed package fingerprint: {}", err);
            String::new()
        });
        let state = outcome.as_ref().map_or(State::Error, |(state, _)| *state);
        let finished = record.finish(env.conn, state);
        let (state, result) = outcome?;
        finished?;

        info!("Transaction {} finished: {}", id, state);
        Ok(result)
    }

    /// Store scriptlet output and, after a successful run, the new system state
    fn record_run(
        &mut self,
        conn: &Connection,
        record: &TransactionRecord,
        engine: &Engine<'_>,
        output: &RunOutput,
    ) -> Result<(State, RunResult)> {
        for line in &output.script_lines {
            record.add_console_output_line(conn, 1, line)?;
        }

        if output.return_code == 0 {
            self.update_system_state(conn)?;
            Ok((State::Ok, RunResult::Success))
        } else {
            self.transaction_problems = engine.problems();
            Ok((State::Error, RunResult::ErrorRpmRun))
        }
    }

    /// Record reasons, groups, environments and modules after a successful run
    fn update_system_state(&self, conn: &Connection) -> Result<()> {
        for package in self.packages.iter().rev() {
            let action = package.action();
            let reason = package.reason();
            let stores_reason = matches!(
                reason,
                Reason::Dependency | Reason::WeakDependency | Reason::User | Reason::ExternalUser | Reason::Group
            );
            if (action.is_inbound() && stores_reason) || action == Action::ReasonChange {
                let updated = InstalledPackage::set_reason(
                    conn,
                    package.item.name(),
                    package.item.arch(),
                    reason,
                )?;
                if updated == 0 && action == Action::ReasonChange {
                    warn!("Cannot change reason of {}: not installed", package.nevra());
                }
            }
        }

        for group in &self.groups {
            match group.info.action {
                action if action.is_inbound() => InstalledGroup {
                    group_id: group.group_id.clone(),
                    reason: group.info.reason,
                    package_types: group.package_types.clone(),
                    packages: group
                        .packages
                        .iter()
                        .filter(|p| group.package_types.contains(&p.package_type))
                        .map(|p| p.name.clone())
                        .collect(),
                }
                .save(conn)?,
                action if action.is_outbound() => InstalledGroup::delete(conn, &group.group_id)?,
                _ => {}
            }
        }

        for env in &self.environments {
            match env.info.action {
                action if action.is_inbound() => InstalledEnvironment {
                    environment_id: env.environment_id.clone(),
                    groups: env
                        .groups
                        .iter()
                        .filter(|g| !g.optional)
                        .map(|g| g.group_id.clone())
                        .collect(),
                }
                .save(conn)?,
                action if action.is_outbound() => InstalledEnvironment::delete(conn, &env.environment_id)?,
                _ => {}
            }
        }

        for module in &self.modules {
            let status = match module.info.action {
                Action::Enable | Action::Switch => ModuleStatus::Enabled,
                Action::Disable => ModuleStatus::Disabled,
                Action::Reset => {
                    ModuleState::reset(conn, &module.name)?;
                    continue;
                }
                other => {
                    warn!("Ignoring unsupported module action {} for {}", other, module);
                    continue;
                }
            };
            ModuleState {
                name: module.name.clone(),
                stream: module.stream.clone(),
                status,
            }
            .save(conn)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{GroupItem, GroupPackage, ModuleItem, PackageItem, PackageType};
    use crate::version::Nevra;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Connection, Config) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("history.db");
        let db_path = db_path.to_str().unwrap().to_string();
        crate::db::init(&db_path).unwrap();
        let conn = crate::db::open(&db_path).unwrap();
        let config = Config {
            db_path,
            pkg_gpgcheck: false,
            ..Config::default()
        };
        (dir, conn, config)
    }

    fn install(nevra: &str, reason: Reason) -> ResolvedPackage {
        ResolvedPackage::new(PackageItem::new(
            Nevra::parse(nevra).unwrap(),
            Action::Install,
            reason,
            "fedora",
        ))
    }

    #[test]
    fn test_run_installs_and_records() {
        let (_dir, conn, config) = setup();
        let mut transaction = ResolvedTransaction::new();
        transaction.add_package(install("bash-5.2-1.x86_64", Reason::User));
        transaction.description = "install bash".to_string();

        let mut backend = SystemBackend::new(&conn, &config.installonly_pkgs);
        let mut env = RunEnvironment {
            conn: &conn,
            config: &config,
            backend: &mut backend,
            verifier: None,
        };
        let result = transaction.run(&mut env, &mut SilentCallbacks).unwrap();
        assert_eq!(result, RunResult::Success);

        let installed = InstalledPackage::find_by_nevra(&conn, &Nevra::parse("bash-5.2-1.x86_64").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(installed.reason, Reason::User);

        let record = TransactionRecord::find_by_id(&conn, transaction.history_id().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(record.state, State::Ok);
        assert_eq!(record.packages[0].info.state, State::Ok);
        assert!(record.rpmdb_version_begin.starts_with("0:"));
        assert!(record.rpmdb_version_end.starts_with("1:"));
    }

    #[test]
    fn test_rerun_is_refused() {
        let (_dir, conn, config) = setup();
        let mut transaction = ResolvedTransaction::new();
        transaction.add_package(install("bash-5.2-1.x86_64", Reason::User));

        let mut backend = SystemBackend::new(&conn, &config.installonly_pkgs);
        let mut env = RunEnvironment {
            conn: &conn,
            config: &config,
            backend: &mut backend,
            verifier: None,
        };
        assert_eq!(transaction.test(&mut env).unwrap(), RunResult::Success);
        assert_eq!(transaction.run(&mut env, &mut SilentCallbacks).unwrap(), RunResult::ErrorRerun);
        assert!(InstalledPackage::list_all(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_resolve_problems_block_run() {
        let (_dir, conn, config) = setup();
        let mut transaction = ResolvedTransaction::new();
        transaction.problems.push("nothing provides libfoo".to_string());

        let mut backend = SystemBackend::new(&conn, &config.installonly_pkgs);
        let mut env = RunEnvironment {
            conn: &conn,
            config: &config,
            backend: &mut backend,
            verifier: None,
        };
        assert_eq!(
            transaction.run(&mut env, &mut SilentCallbacks).unwrap(),
            RunResult::ErrorResolve
        );
    }

    #[test]
    fn test_already_installed_fails_check() {
        let (_dir, conn, config) = setup();
        InstalledPackage::new(Nevra::parse("bash-5.2-1.x86_64").unwrap(), "fedora", Reason::User)
            .insert(&conn)
            .unwrap();

        let mut transaction = ResolvedTransaction::new();
        transaction.add_package(install("bash-5.2-1.x86_64", Reason::User));

        let mut backend = SystemBackend::new(&conn, &config.installonly_pkgs);
        let mut env = RunEnvironment {
            conn: &conn,
            config: &config,
            backend: &mut backend,
            verifier: None,
        };
        assert_eq!(
            transaction.run(&mut env, &mut SilentCallbacks).unwrap(),
            RunResult::ErrorCheck
        );
        assert_eq!(
            transaction.transaction_problems(),
            ["package bash-5.2-1.x86_64 is already installed"]
        );
    }

    struct RejectAll;

    impl SignatureVerifier for RejectAll {
        fn verify(&self, package: &ResolvedPackage) -> std::result::Result<(), String> {
            Err(format!("{}: no signature", package.nevra()))
        }
    }

    #[test]
    fn test_signature_failure() {
        let (_dir, conn, mut config) = setup();
        config.pkg_gpgcheck = true;
        let mut transaction = ResolvedTransaction::new();
        transaction.add_package(install("bash-5.2-1.x86_64", Reason::User));

        let mut backend = SystemBackend::new(&conn, &config.installonly_pkgs);
        let mut env = RunEnvironment {
            conn: &conn,
            config: &config,
            backend: &mut backend,
            verifier: Some(&RejectAll),
        };
        assert_eq!(
            transaction.run(&mut env, &mut SilentCallbacks).unwrap(),
            RunResult::ErrorGpgCheck
        );
        assert_eq!(transaction.signature_problems(), ["bash-5.2-1.x86_64: no signature"]);
    }

    #[test]
    fn test_lock_held_elsewhere() {
        let (dir, conn, config) = setup();
        let held = File::create(dir.path().join(LOCK_FILE)).unwrap();
        held.try_lock_exclusive().unwrap();

        let mut transaction = ResolvedTransaction::new();
        transaction.add_package(install("bash-5.2-1.x86_64", Reason::User));

        let mut backend = SystemBackend::new(&conn, &config.installonly_pkgs);
        let mut env = RunEnvironment {
            conn: &conn,
            config: &config,
            backend: &mut backend,
            verifier: None,
        };
        assert_eq!(
            transaction.run(&mut env, &mut SilentCallbacks).unwrap(),
            RunResult::ErrorLock
        );
    }

    #[test]
    fn test_tsflags_test_stops_before_history() {
        let (_dir, conn, mut config) = setup();
        config.tsflags = vec!["test".to_string()];
        let mut transaction = ResolvedTransaction::new();
        transaction.add_package(install("bash-5.2-1.x86_64", Reason::User));

        let mut backend = SystemBackend::new(&conn, &config.installonly_pkgs);
        let mut env = RunEnvironment {
            conn: &conn,
            config: &config,
            backend: &mut backend,
            verifier: None,
        };
        assert_eq!(
            transaction.run(&mut env, &mut SilentCallbacks).unwrap(),
            RunResult::Success
        );
        assert_eq!(transaction.history_id(), None);
        assert!(InstalledPackage::list_all(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_system_state_for_groups_and_modules() {
        let (_dir, conn, config) = setup();
        let mut transaction = ResolvedTransaction::new();
        let mut group = GroupItem::new("core", Action::Install, Reason::User, "fedora");
        group.packages = vec![
            GroupPackage {
                name: "bash".to_string(),
                installed: true,
                package_type: PackageType::Mandatory,
            },
            GroupPackage {
                name: "zsh".to_string(),
                installed: false,
                package_type: PackageType::Optional,
            },
        ];
        transaction.groups.push(group);
        transaction
            .modules
            .push(ModuleItem::new("nodejs", "20", Action::Enable, Reason::User));

        let mut backend = SystemBackend::new(&conn, &config.installonly_pkgs);
        let mut env = RunEnvironment {
            conn: &conn,
            config: &config,
            backend: &mut backend,
            verifier: None,
        };
        assert_eq!(
            transaction.run(&mut env, &mut SilentCallbacks).unwrap(),
            RunResult::Success
        );

        let group = InstalledGroup::find(&conn, "core").unwrap().unwrap();
        assert_eq!(group.packages, vec!["bash"]);
        let module = ModuleState::find(&conn, "nodejs").unwrap().unwrap();
        assert_eq!(module.stream, "20");
        assert_eq!(module.status, ModuleStatus::Enabled);
    }

    #[test]
    fn test_failed_state_update_finishes_record_as_error() {
        let (_dir, conn, config) = setup();
        conn.execute_batch(
            "CREATE TRIGGER reject_group BEFORE INSERT ON installed_group
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .unwrap();

        let mut transaction = ResolvedTransaction::new();
        transaction.add_package(install("bash-5.2-1.x86_64", Reason::Group));
        transaction
            .groups
            .push(GroupItem::new("core", Action::Install, Reason::User, "fedora"));

        let mut backend = SystemBackend::new(&conn, &config.installonly_pkgs);
        let mut env = RunEnvironment {
            conn: &conn,
            config: &config,
            backend: &mut backend,
            verifier: None,
        };
        let err = transaction.run(&mut env, &mut SilentCallbacks).unwrap_err();
        assert!(err.to_string().contains("disk full"), "{err}");

        let record = TransactionRecord::find_by_id(&conn, transaction.history_id().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(record.state, State::Error);
        assert!(record.rpmdb_version_end.starts_with("1:"));
        assert_eq!(InstalledPackage::list_all(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_run_result_messages() {
        assert_eq!(RunResult::ErrorCheck.to_string(), "Rpm transaction check failed.");
        assert!(RunResult::Success.is_success());
        assert!(!RunResult::ErrorLock.is_success());
    }
}
