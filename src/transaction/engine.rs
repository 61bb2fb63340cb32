// src/transaction/engine.rs

//! Execution engine: drives a backend through a resolved transaction
//!
//! Filling walks the resolved packages in order and asks the backend for one
//! element per package. Each request must be answered, within the same call,
//! by a change notification naming the new element; the engine tags that
//! element with the package that caused it. Elements the backend adds on its
//! own (obsoletes, the old version of an upgrade) are parked by installed
//! record id until an explicit erase of the same record claims them. Anything
//! left unclaimed, and any element the backend removes by itself, aborts the
//! fill.
//!
//! Running relays the backend's notification stream to
//! [`TransactionCallbacks`] and captures scriptlet output on a worker thread.

use super::backend::{Backend, ProblemFilter};
use super::callbacks::{BackendEvent, TransactionCallbacks};
use super::resolved::ResolvedPackage;
use super::scriptlet::{ScriptletDrain, ScriptletOutput};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::item::Action;
use crate::version::Nevra;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Handle of a backend element, unique within one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    /// Package being installed
    Added,
    /// Installed package being erased
    Removed,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Added => f.write_str("added"),
            ElementType::Removed => f.write_str("removed"),
        }
    }
}

/// One operation in the backend's transaction set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub id: ElementId,
    pub element_type: ElementType,
    pub nevra: Nevra,
    /// Installed-database record id; 0 for packages not yet installed
    pub rpmdb_id: i64,
}

/// Change made to the backend's element set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementEvent {
    Add,
    Del,
}

/// Bookkeeping for one fill pass, passed to every backend element call
#[derive(Debug, Default)]
pub struct FillContext {
    current: Option<usize>,
    explicit_tagged: bool,
    implicit: HashMap<i64, Element>,
    element_items: HashMap<ElementId, usize>,
    violation: Option<Error>,
}

impl FillContext {
    fn begin_item(&mut self, index: usize) {
        self.current = Some(index);
        self.explicit_tagged = false;
    }

    fn violate(&mut self, err: Error) {
        if self.violation.is_none() {
            self.violation = Some(err);
        }
    }

    fn take_violation(&mut self) -> Result<()> {
        match self.violation.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Report a change to the element set
    ///
    /// `other` is `None` when the change is the one just requested; otherwise
    /// it names the element whose request triggered this change.
    pub fn element_changed(&mut self, event: ElementEvent, element: &Element, other: Option<&Element>) {
        let Some(trigger) = other else {
            match self.current {
                Some(index) => {
                    self.element_items.insert(element.id, index);
                    self.explicit_tagged = true;
                }
                None => self.violate(Error::Integrity(format!(
                    "Element {} reported outside of an element request",
                    element.nevra
                ))),
            }
            return;
        };

        if element.rpmdb_id == 0 {
            self.violate(Error::Integrity(format!(
                "Implicit element {} type {} with zero record number (caused by {})",
                element.nevra, element.element_type, trigger.nevra
            )));
            return;
        }

        match event {
            ElementEvent::Add => {
                debug!(
                    "Implicitly added element {} type {} (caused by {})",
                    element.nevra, element.element_type, trigger.nevra
                );
                self.implicit.insert(element.rpmdb_id, element.clone());
            }
            ElementEvent::Del => self.violate(Error::Integrity(format!(
                "Implicitly removed element {} type {} (caused by {})",
                element.nevra, element.element_type, trigger.nevra
            ))),
        }
    }
}

/// State of one backend run, passed to [`Backend::run`]
pub struct RunContext<'r> {
    packages: &'r [ResolvedPackage],
    element_items: &'r HashMap<ElementId, usize>,
    callbacks: &'r mut dyn TransactionCallbacks,
    script_output: Arc<ScriptletOutput>,
    violation: Option<Error>,
}

impl<'r> RunContext<'r> {
    fn violate(&mut self, err: Error) {
        if self.violation.is_none() {
            self.violation = Some(err);
        }
    }

    fn item_for(&mut self, element: Option<&Element>) -> std::result::Result<Option<&'r ResolvedPackage>, ()> {
        let Some(element) = element else {
            return Ok(None);
        };
        let packages = self.packages;
        let element_items = self.element_items;
        match element_items.get(&element.id).and_then(|&index| packages.get(index)) {
            Some(item) => Ok(Some(item)),
            None => {
                self.violate(Error::Integrity(format!(
                    "Backend notification for unknown element {} type {}",
                    element.nevra, element.element_type
                )));
                Err(())
            }
        }
    }

    /// Deliver one backend notification
    pub fn notify(&mut self, element: Option<&Element>, event: BackendEvent) {
        let Ok(item) = self.item_for(element) else {
            return;
        };
        let nevra = element.map(|e| &e.nevra);

        match event {
            BackendEvent::TransactionStart { total } => self.callbacks.transaction_start(total),
            BackendEvent::TransactionProgress { amount, total } => {
                self.callbacks.transaction_progress(amount, total)
            }
            BackendEvent::TransactionStop => self.callbacks.transaction_stop(),
            BackendEvent::VerifyStart { total } => self.callbacks.verify_start(total),
            BackendEvent::VerifyProgress { amount, total } => self.callbacks.verify_progress(amount, total),
            BackendEvent::VerifyStop => self.callbacks.verify_stop(),

            BackendEvent::ScriptStart { script_type } => {
                info!(
                    "Running {} scriptlet: {}",
                    script_type,
                    nevra.map(|n| n.to_string()).unwrap_or_default()
                );
                self.callbacks.script_start(item, nevra, script_type);
                self.script_output.clear();
            }
            BackendEvent::ScriptStop { script_type, return_code } => {
                info!(
                    "Stop {} scriptlet: {}",
                    script_type,
                    nevra.map(|n| n.to_string()).unwrap_or_default()
                );
                let output = self.script_output.last();
                self.callbacks
                    .script_output(item, nevra, script_type, return_code, &output);
                self.callbacks.script_stop(item, nevra, script_type, return_code);
            }
            BackendEvent::ScriptError { script_type, return_code } => {
                let name = nevra.map(|n| n.to_string()).unwrap_or_default();
                if return_code != 0 {
                    error!(
                        "Error in {} scriptlet: {} return code {}",
                        script_type, name, return_code
                    );
                    let output = self.script_output.last();
                    self.callbacks
                        .script_output(item, nevra, script_type, return_code, &output);
                    self.callbacks.script_error(item, nevra, script_type, return_code);
                } else {
                    warn!("Non-critical error in {} scriptlet: {}", script_type, name);
                }
            }

            event => {
                let Some(item) = item else {
                    self.violate(Error::Integrity(format!(
                        "Backend notification {event:?} without an element"
                    )));
                    return;
                };
                self.relay_element_event(item, event);
            }
        }
    }

    fn relay_element_event(&mut self, item: &'r ResolvedPackage, event: BackendEvent) {
        match event {
            BackendEvent::InstallStart { total } => {
                info!("Installing {}", item.nevra());
                self.callbacks.install_start(item, total);
            }
            BackendEvent::InstallProgress { amount, total } => {
                self.callbacks.install_progress(item, amount, total)
            }
            BackendEvent::InstallStop => self.callbacks.install_stop(item),
            BackendEvent::UninstallStart { total } => {
                info!("Erasing {}", item.nevra());
                self.callbacks.uninstall_start(item, total);
            }
            BackendEvent::UninstallProgress { amount, total } => {
                self.callbacks.uninstall_progress(item, amount, total)
            }
            BackendEvent::UninstallStop => self.callbacks.uninstall_stop(item),
            BackendEvent::UnpackError => {
                error!("Unpack error: {}", item.nevra());
                self.callbacks.unpack_error(item);
            }
            BackendEvent::CpioError => {
                error!("Cpio error: {}", item.nevra());
                self.callbacks.cpio_error(item);
            }
            BackendEvent::ElementProgress { amount, total } => {
                self.callbacks.elem_progress(item, amount, total)
            }
            _ => {}
        }
    }
}

/// Outcome of one backend run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// Backend return code; 0 is success
    pub return_code: i32,
    /// Lines printed by scriptlets, empty for test runs
    pub script_lines: Vec<String>,
}

/// Drives one backend through one resolved transaction
pub struct Engine<'a> {
    backend: &'a mut dyn Backend,
    config: &'a Config,
    element_items: HashMap<ElementId, usize>,
    downgrade_requested: bool,
}

impl<'a> Engine<'a> {
    pub fn new(backend: &'a mut dyn Backend, config: &'a Config) -> Self {
        Self {
            backend,
            config,
            element_items: HashMap::new(),
            downgrade_requested: false,
        }
    }

    /// Whether running needs the backend to accept older versions
    pub fn downgrade_requested(&self) -> bool {
        self.downgrade_requested
    }

    /// Latest installed version of every install-only package name
    fn latest_installonly(&self) -> Result<HashMap<String, Nevra>> {
        let mut latest: HashMap<String, Nevra> = HashMap::new();
        for nevra in self.backend.installed_packages()? {
            if !self.config.is_installonly(&nevra.name) {
                continue;
            }
            match latest.get(&nevra.name) {
                Some(current) if current.evr_cmp(&nevra) != Ordering::Less => {}
                _ => {
                    latest.insert(nevra.name.clone(), nevra);
                }
            }
        }
        Ok(latest)
    }

    /// Add one element per package and let the backend order them
    pub fn fill(&mut self, packages: &[ResolvedPackage]) -> Result<()> {
        let latest_installonly = self.latest_installonly()?;
        let mut ctx = FillContext::default();

        for (index, package) in packages.iter().enumerate() {
            ctx.begin_item(index);

            match package.action() {
                Action::Install => {
                    if let Some(latest) = latest_installonly.get(package.item.name())
                        && latest.evr_cmp(package.nevra()) == Ordering::Greater
                    {
                        self.downgrade_requested = true;
                    }
                    self.backend.add_install(&mut ctx, package, false)?;
                    require_explicit(&mut ctx, package)?;
                }
                Action::Upgrade => {
                    self.backend.add_install(&mut ctx, package, true)?;
                    require_explicit(&mut ctx, package)?;
                }
                Action::Downgrade => {
                    self.backend.add_install(&mut ctx, package, true)?;
                    require_explicit(&mut ctx, package)?;
                    self.downgrade_requested = true;
                }
                Action::Reinstall => {
                    self.backend.add_reinstall(&mut ctx, package)?;
                    require_explicit(&mut ctx, package)?;
                }
                Action::Remove | Action::Replaced => {
                    self.backend.add_erase(&mut ctx, package.rpmdb_id)?;
                    ctx.take_violation()?;
                    if !ctx.explicit_tagged {
                        match ctx.implicit.remove(&package.rpmdb_id) {
                            Some(element) => {
                                ctx.element_items.insert(element.id, index);
                            }
                            None => {
                                return Err(Error::Integrity(format!(
                                    "Backend ignored explicit request to remove {}",
                                    package.nevra()
                                )));
                            }
                        }
                    }
                }
                Action::ReasonChange | Action::Enable | Action::Disable | Action::Reset | Action::Switch => {}
            }

            ctx.take_violation()?;
        }
        ctx.current = None;

        if !ctx.implicit.is_empty() {
            let mut extra: Vec<String> = ctx.implicit.values().map(|e| e.nevra.to_string()).collect();
            extra.sort();
            return Err(Error::Integrity(format!(
                "The backend transaction contains more elements than requested: {}",
                extra.join(", ")
            )));
        }

        self.backend.order()?;
        self.element_items = ctx.element_items;
        debug!(
            "Filled backend transaction with {} elements",
            self.backend.element_count()
        );
        Ok(())
    }

    /// Backend dependency and conflict problems; empty when the set is consistent
    pub fn check(&mut self) -> Vec<String> {
        self.backend.check()
    }

    /// Problems reported by the last run
    pub fn problems(&self) -> Vec<String> {
        self.backend.problems()
    }

    pub fn db_cookie(&self) -> Result<String> {
        self.backend.db_cookie()
    }

    /// Run the filled transaction
    ///
    /// A test run checks everything a real run would without changing the
    /// installed state, and does not capture scriptlet output.
    pub fn run(
        &mut self,
        packages: &[ResolvedPackage],
        callbacks: &mut dyn TransactionCallbacks,
        test: bool,
    ) -> Result<RunOutput> {
        let filter = ProblemFilter {
            allow_old_package: self.downgrade_requested,
            ignore_arch: self.config.ignorearch,
        };
        let script_output = ScriptletOutput::new();

        let drain = if test {
            None
        } else {
            let (drain, writer) = ScriptletDrain::start(script_output.clone())?;
            self.backend.set_script_output(Some(writer));
            Some(drain)
        };

        let mut ctx = RunContext {
            packages,
            element_items: &self.element_items,
            callbacks,
            script_output,
            violation: None,
        };

        ctx.callbacks.before_begin(self.backend.element_count());
        let result = self.backend.run(&mut ctx, filter, test);
        ctx.callbacks.after_complete(matches!(result, Ok(0)));
        let violation = ctx.violation.take();

        // The drain only sees end-of-stream once the backend lets go of the writer
        self.backend.set_script_output(None);
        let script_lines = drain.map(ScriptletDrain::finish).unwrap_or_default();

        let return_code = result?;
        if let Some(err) = violation {
            return Err(err);
        }
        Ok(RunOutput {
            return_code,
            script_lines,
        })
    }
}

fn require_explicit(ctx: &mut FillContext, package: &ResolvedPackage) -> Result<()> {
    ctx.take_violation()?;
    if ctx.explicit_tagged {
        Ok(())
    } else {
        Err(Error::Integrity(format!(
            "Backend silently ignored the request to {} {}",
            package.action().as_str().to_lowercase(),
            package.nevra()
        )))
    }
}
