// src/transaction/backend.rs

//! The packaging backend seam and the built-in bookkeeping backend

use super::callbacks::BackendEvent;
use super::engine::{Element, ElementEvent, ElementId, ElementType, FillContext, RunContext};
use super::resolved::ResolvedPackage;
use super::scriptlet::ScriptletWriter;
use crate::db::models::{InstalledPackage, rpmdb_cookie};
use crate::error::{Error, Result};
use crate::item::Reason;
use crate::version::Nevra;
use rusqlite::Connection;
use std::cmp::Ordering;
use tracing::debug;

/// Problem classes the backend is told to tolerate during a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProblemFilter {
    /// Accept installing a version older than the one installed
    pub allow_old_package: bool,
    /// Accept packages built for another architecture
    pub ignore_arch: bool,
}

/// A native packaging backend
///
/// Every element-adding call must report the element it created through
/// [`FillContext::element_changed`] with `other = None` before returning.
/// Elements created as a side effect are reported with `other` naming the
/// requesting element. During [`Backend::run`] all progress goes through
/// [`RunContext::notify`].
pub trait Backend {
    /// Every installed package
    fn installed_packages(&self) -> Result<Vec<Nevra>>;

    /// Add an install element; `upgrade` replaces other versions of the same name.arch
    fn add_install(&mut self, ctx: &mut FillContext, package: &ResolvedPackage, upgrade: bool) -> Result<()>;

    fn add_reinstall(&mut self, ctx: &mut FillContext, package: &ResolvedPackage) -> Result<()>;

    /// Add an erase element for an installed record
    ///
    /// Erasing a record that already has an element is a no-op and reports nothing.
    fn add_erase(&mut self, ctx: &mut FillContext, rpmdb_id: i64) -> Result<()>;

    /// Put the elements into execution order
    fn order(&mut self) -> Result<()>;

    /// Dependency and conflict problems of the element set
    fn check(&mut self) -> Vec<String>;

    fn element_count(&self) -> usize;

    /// Where scriptlets write their output; `None` closes it
    ///
    /// The backend must not keep other handles to the writer.
    fn set_script_output(&mut self, output: Option<ScriptletWriter>);

    /// Execute the elements, returning 0 on success
    fn run(&mut self, ctx: &mut RunContext<'_>, filter: ProblemFilter, test: bool) -> Result<i32>;

    /// Problems reported by the last run
    fn problems(&self) -> Vec<String>;

    /// Fingerprint of the installed package set
    fn db_cookie(&self) -> Result<String>;
}

#[derive(Debug, Clone)]
struct Operation {
    element: Element,
    repo_id: String,
    reason: Reason,
}

/// Backend that keeps the installed set in the `installed_package` table
///
/// It installs nothing on disk; elements only add and delete rows. The whole
/// run is applied in one database transaction.
pub struct SystemBackend<'a> {
    conn: &'a Connection,
    installonly: Vec<String>,
    operations: Vec<Operation>,
    problems: Vec<String>,
}

impl<'a> SystemBackend<'a> {
    pub fn new(conn: &'a Connection, installonly: &[String]) -> Self {
        Self {
            conn,
            installonly: installonly.to_vec(),
            operations: Vec::new(),
            problems: Vec::new(),
        }
    }

    fn next_id(&self) -> ElementId {
        ElementId(self.operations.len())
    }

    fn erase_element_for(&self, rpmdb_id: i64) -> Option<&Element> {
        self.operations
            .iter()
            .map(|op| &op.element)
            .find(|e| e.element_type == ElementType::Removed && e.rpmdb_id == rpmdb_id)
    }

    fn push_added(&mut self, ctx: &mut FillContext, package: &ResolvedPackage) -> Element {
        let element = Element {
            id: self.next_id(),
            element_type: ElementType::Added,
            nevra: package.nevra().clone(),
            rpmdb_id: 0,
        };
        self.operations.push(Operation {
            element: element.clone(),
            repo_id: package.item.info.repo_id.clone(),
            reason: package.reason(),
        });
        ctx.element_changed(ElementEvent::Add, &element, None);
        element
    }

    /// Erase `installed` unless an element already does; report it as caused by `trigger`
    fn push_implicit_erase(&mut self, ctx: &mut FillContext, installed: &InstalledPackage, trigger: &Element) {
        if self.erase_element_for(installed.id).is_some() {
            return;
        }
        let element = Element {
            id: self.next_id(),
            element_type: ElementType::Removed,
            nevra: installed.nevra.clone(),
            rpmdb_id: installed.id,
        };
        self.operations.push(Operation {
            element: element.clone(),
            repo_id: installed.repo_id.clone(),
            reason: installed.reason,
        });
        ctx.element_changed(ElementEvent::Add, &element, Some(trigger));
    }

    /// Problems of the element set given what is installed now
    fn compute_problems(&self, filter: ProblemFilter) -> Result<Vec<String>> {
        let mut problems = Vec::new();
        for op in &self.operations {
            let element = &op.element;
            if element.element_type != ElementType::Added {
                continue;
            }
            let nevra = &element.nevra;

            for installed in InstalledPackage::find_by_name_arch(self.conn, &nevra.name, &nevra.arch)? {
                let erased = self.erase_element_for(installed.id).is_some();
                if installed.nevra == *nevra && !erased {
                    problems.push(format!("package {} is already installed", nevra));
                } else if erased
                    && !filter.allow_old_package
                    && installed.nevra.evr_cmp(nevra) == Ordering::Greater
                {
                    problems.push(format!(
                        "package {} (which is newer than {}) is already installed",
                        installed.nevra, nevra
                    ));
                }
            }
        }
        Ok(problems)
    }
}

impl Backend for SystemBackend<'_> {
    fn installed_packages(&self) -> Result<Vec<Nevra>> {
        Ok(InstalledPackage::list_all(self.conn)?
            .into_iter()
            .map(|p| p.nevra)
            .collect())
    }

    fn add_install(&mut self, ctx: &mut FillContext, package: &ResolvedPackage, upgrade: bool) -> Result<()> {
        let added = self.push_added(ctx, package);
        if upgrade && !self.installonly.iter().any(|n| n == package.item.name()) {
            for installed in
                InstalledPackage::find_by_name_arch(self.conn, package.item.name(), package.item.arch())?
            {
                if installed.nevra != *package.nevra() {
                    self.push_implicit_erase(ctx, &installed, &added);
                }
            }
        }
        Ok(())
    }

    fn add_reinstall(&mut self, ctx: &mut FillContext, package: &ResolvedPackage) -> Result<()> {
        let installed = InstalledPackage::find_by_nevra(self.conn, package.nevra())?.ok_or_else(|| {
            Error::TransactionError(format!("Package {} is not installed", package.nevra()))
        })?;
        let added = self.push_added(ctx, package);
        self.push_implicit_erase(ctx, &installed, &added);
        Ok(())
    }

    fn add_erase(&mut self, ctx: &mut FillContext, rpmdb_id: i64) -> Result<()> {
        if self.erase_element_for(rpmdb_id).is_some() {
            return Ok(());
        }
        let installed = InstalledPackage::find_by_id(self.conn, rpmdb_id)?.ok_or_else(|| {
            Error::TransactionError("Package was not found in rpm database".to_string())
        })?;
        let element = Element {
            id: self.next_id(),
            element_type: ElementType::Removed,
            nevra: installed.nevra.clone(),
            rpmdb_id,
        };
        self.operations.push(Operation {
            element: element.clone(),
            repo_id: installed.repo_id,
            reason: installed.reason,
        });
        ctx.element_changed(ElementEvent::Add, &element, None);
        Ok(())
    }

    fn order(&mut self) -> Result<()> {
        // Installs first; erases of replaced packages follow the packages replacing them
        self.operations
            .sort_by_key(|op| op.element.element_type == ElementType::Removed);
        Ok(())
    }

    fn check(&mut self) -> Vec<String> {
        match self.compute_problems(ProblemFilter {
            allow_old_package: true,
            ignore_arch: true,
        }) {
            Ok(problems) => problems,
            Err(e) => vec![e.to_string()],
        }
    }

    fn element_count(&self) -> usize {
        self.operations.len()
    }

    // No scriptlets run here; dropping the writer ends the stream
    fn set_script_output(&mut self, _output: Option<ScriptletWriter>) {}

    fn run(&mut self, ctx: &mut RunContext<'_>, filter: ProblemFilter, test: bool) -> Result<i32> {
        self.problems = self.compute_problems(filter)?;
        if !self.problems.is_empty() {
            return Ok(1);
        }

        let operations = self.operations.clone();
        let total = operations.len() as u64;
        ctx.notify(None, BackendEvent::TransactionStart { total });
        for done in 1..=total {
            ctx.notify(None, BackendEvent::TransactionProgress { amount: done, total });
        }
        ctx.notify(None, BackendEvent::TransactionStop);

        if test {
            debug!("Test run of {} elements finished", total);
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        // Rows are deleted up front so a reinstall can insert the same NEVRA again
        for op in operations.iter().filter(|op| op.element.element_type == ElementType::Removed) {
            InstalledPackage::delete(&tx, op.element.rpmdb_id)?;
        }
        for op in &operations {
            let element = &op.element;
            match element.element_type {
                ElementType::Added => {
                    ctx.notify(Some(element), BackendEvent::InstallStart { total: 1 });
                    InstalledPackage::new(element.nevra.clone(), &op.repo_id, op.reason).insert(&tx)?;
                    ctx.notify(Some(element), BackendEvent::InstallProgress { amount: 1, total: 1 });
                    ctx.notify(Some(element), BackendEvent::InstallStop);
                }
                ElementType::Removed => {
                    ctx.notify(Some(element), BackendEvent::UninstallStart { total: 1 });
                    ctx.notify(Some(element), BackendEvent::UninstallProgress { amount: 1, total: 1 });
                    ctx.notify(Some(element), BackendEvent::UninstallStop);
                }
            }
        }
        tx.commit()?;
        Ok(0)
    }

    fn problems(&self) -> Vec<String> {
        self.problems.clone()
    }

    fn db_cookie(&self) -> Result<String> {
        rpmdb_cookie(self.conn)
    }
}
