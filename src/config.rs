// src/config.rs

//! Configuration for transaction execution
//!
//! Loaded from an optional TOML file; every field has a default so an empty or
//! missing file yields a usable configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default database location
pub const DEFAULT_DB_PATH: &str = "/var/lib/pkgtxn/history.db";

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/pkgtxn/pkgtxn.toml";

/// Transaction flags understood by the run pipeline
const KNOWN_TSFLAGS: &[&str] = &["test"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database holding history and installed-system state
    pub db_path: String,

    /// Packages of which several versions may be installed side by side
    pub installonly_pkgs: Vec<String>,

    /// How many install-only versions to keep (informational)
    pub installonly_limit: u32,

    /// Ignore architecture mismatches during the backend run
    pub ignorearch: bool,

    /// Backend transaction flags; only "test" is recognized
    pub tsflags: Vec<String>,

    /// Drop items that cannot be found instead of failing
    pub skip_unavailable: bool,

    /// Verify package signatures before running
    pub pkg_gpgcheck: bool,

    /// Release version recorded in new history records
    pub releasever: Option<String>,

    /// Directory for the transaction lock file; defaults to the database directory
    pub lock_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            installonly_pkgs: [
                "kernel",
                "kernel-core",
                "kernel-modules",
                "kernel-modules-core",
                "kernel-modules-extra",
                "installonlypkg(kernel)",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            installonly_limit: 3,
            ignorearch: false,
            tsflags: Vec::new(),
            skip_unavailable: false,
            pkg_gpgcheck: true,
            releasever: None,
            lock_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location if it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn is_installonly(&self, name: &str) -> bool {
        self.installonly_pkgs.iter().any(|n| n == name)
    }

    /// Whether `tsflags` asks for a test-only run; unknown flags are rejected
    pub fn test_only(&self) -> Result<bool> {
        let mut test = false;
        for flag in &self.tsflags {
            if !KNOWN_TSFLAGS.contains(&flag.as_str()) {
                return Err(Error::ConfigError(format!("Invalid tsflag: {flag}")));
            }
            test |= flag == "test";
        }
        Ok(test)
    }

    /// Directory of the transaction lock file
    pub fn lock_dir(&self) -> PathBuf {
        self.lock_dir
            .clone()
            .unwrap_or_else(|| crate::db::db_dir(&self.db_path))
    }
}
