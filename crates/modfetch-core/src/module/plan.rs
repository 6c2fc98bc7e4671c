//! Resolver output: the installation plan.

use super::version::Version;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Where a resolved module's content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "location", rename_all = "lowercase")]
pub enum DownloadLocation {
    /// Package content URL on the registry.
    Remote(String),
    /// Already-installed module directory.
    Local(PathBuf),
}

/// One module pinned to an exact version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedModule {
    name: String,
    #[serde(serialize_with = "serialize_version")]
    version: Version,
    #[serde(skip_serializing_if = "Option::is_none")]
    guid: Option<String>,
    source: DownloadLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    install_path: Option<PathBuf>,
}

impl ResolvedModule {
    #[must_use]
    pub fn remote(name: impl Into<String>, version: Version, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version,
            guid: None,
            source: DownloadLocation::Remote(url.into()),
            install_path: None,
        }
    }

    #[must_use]
    pub fn local(name: impl Into<String>, version: Version, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            version,
            guid: None,
            source: DownloadLocation::Local(dir.into()),
            install_path: None,
        }
    }

    #[must_use]
    pub fn with_guid(mut self, guid: Option<String>) -> Self {
        self.guid = guid;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &Version {
        &self.version
    }

    #[must_use]
    pub fn guid(&self) -> Option<&str> {
        self.guid.as_deref()
    }

    #[must_use]
    pub fn location(&self) -> &DownloadLocation {
        &self.source
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self.source, DownloadLocation::Local(_))
    }

    /// Final on-disk directory, set by the installer.
    #[must_use]
    pub fn install_path(&self) -> Option<&Path> {
        self.install_path.as_deref()
    }

    pub(crate) fn set_install_path(&mut self, path: PathBuf) {
        self.install_path = Some(path);
    }

    /// Plan key: the lowercased name.
    #[must_use]
    pub fn key(&self) -> String {
        self.name.to_ascii_lowercase()
    }
}

fn serialize_version<S: serde::Serializer>(version: &Version, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(version)
}

impl fmt::Display for ResolvedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Deduplicated set of resolved modules, at most one per name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallationPlan {
    modules: BTreeMap<String, ResolvedModule>,
}

impl InstallationPlan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a module. Returns the existing entry instead if the name is
    /// already planned.
    pub fn insert(&mut self, module: ResolvedModule) -> Result<(), &ResolvedModule> {
        use std::collections::btree_map::Entry;
        match self.modules.entry(module.key()) {
            Entry::Vacant(slot) => {
                slot.insert(module);
                Ok(())
            }
            Entry::Occupied(existing) => Err(existing.into_mut()),
        }
    }

    /// Look up a module by name, case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResolvedModule> {
        self.modules.get(&name.to_ascii_lowercase())
    }

    /// Take a module back out of the plan.
    pub(crate) fn remove(&mut self, name: &str) -> Option<ResolvedModule> {
        self.modules.remove(&name.to_ascii_lowercase())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedModule> {
        self.modules.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules that still need downloading.
    pub fn remote_modules(&self) -> impl Iterator<Item = &ResolvedModule> {
        self.iter().filter(|m| !m.is_local())
    }

    #[must_use]
    pub fn into_modules(self) -> Vec<ResolvedModule> {
        self.modules.into_values().collect()
    }
}

impl IntoIterator for InstallationPlan {
    type Item = ResolvedModule;
    type IntoIter = std::collections::btree_map::IntoValues<String, ResolvedModule>;

    fn into_iter(self) -> Self::IntoIter {
        self.modules.into_values()
    }
}

impl FromIterator<ResolvedModule> for InstallationPlan {
    fn from_iter<T: IntoIterator<Item = ResolvedModule>>(iter: T) -> Self {
        let mut plan = Self::new();
        for module in iter {
            let _ = plan.insert(module);
        }
        plan
    }
}
