//! Store handle for Fundry's ledger workspace.
//!
//! A Store is the root directory holding the ledger database, the broker
//! audit log, the notification feed, and the optional `fundry.toml` config.

use std::env;
use std::path::{Path, PathBuf};

/// Handle to a Fundry state workspace.
///
/// All engine state (projects, rewards, pledges, roles, applications,
/// comments) is scoped to one store.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute or caller-relative path to the store root directory.
    pub root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the store root: explicit `--dir`, then `FUNDRY_HOME`,
    /// then `./.fundry` under the current directory.
    pub fn resolve(dir: Option<&Path>) -> Self {
        if let Some(d) = dir {
            return Self::new(d);
        }
        if let Ok(home) = env::var("FUNDRY_HOME") {
            if !home.trim().is_empty() {
                return Self::new(home);
            }
        }
        Self::new(PathBuf::from(".fundry"))
    }
}
