//! Lockfile: the resolved plan as a `Name -> Version` JSON object.
//!
//! ```json
//! {
//!   "Az.Accounts": "2.12.1",
//!   "PSReadLine": "2.3.4"
//! }
//! ```

use super::error::ModError;
use super::plan::InstallationPlan;
use super::range::VersionRange;
use super::requirement::Requirement;
use super::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// Default lockfile name.
pub const LOCKFILE_NAME: &str = "modfetch.lock.json";

/// Pinned module versions, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lockfile {
    modules: BTreeMap<String, String>,
}

impl Lockfile {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every module in a plan.
    #[must_use]
    pub fn from_plan(plan: &InstallationPlan) -> Self {
        let mut lockfile = Self::new();
        for module in plan.iter() {
            lockfile.insert(module.name(), module.version());
        }
        lockfile
    }

    pub fn insert(&mut self, name: impl Into<String>, version: &Version) {
        self.modules.insert(name.into(), version.to_string());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.modules.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Exact-version requirements reproducing the locked set.
    pub fn requirements(&self) -> Result<Vec<Requirement>, ModError> {
        self.modules
            .iter()
            .map(|(name, version)| {
                let version = Version::parse(version)
                    .map_err(|e| e.context(format!("lockfile entry '{name}'")))?;
                let prerelease = version.is_prerelease();
                Ok(Requirement::new(name.clone(), VersionRange::exact(version))?
                    .with_prerelease(prerelease))
            })
            .collect()
    }

    /// Read a lockfile from a path.
    pub fn read_from(path: &Path) -> Result<Self, ModError> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ModError::io(format!("Lockfile not found: {}", path.display()))
            } else {
                ModError::io(format!("Failed to read lockfile {}: {e}", path.display()))
            }
        })?;

        serde_json::from_str(&content).map_err(|e| {
            ModError::corruption(format!("Invalid lockfile {}: {e}", path.display()))
        })
    }

    /// Write the lockfile, replacing any existing file in one step.
    pub fn write_to(&self, path: &Path) -> Result<(), ModError> {
        let mut content = serde_json::to_string_pretty(self)
            .map_err(|e| ModError::io(format!("Failed to serialize lockfile: {e}")))?;
        content.push('\n');

        let staging = path.with_extension("json.tmp");
        fs::write(&staging, content.as_bytes())
            .and_then(|()| fs::rename(&staging, path))
            .map_err(|e| {
                let _ = fs::remove_file(&staging);
                ModError::io(format!("Failed to write lockfile {}: {e}", path.display()))
            })
    }
}
