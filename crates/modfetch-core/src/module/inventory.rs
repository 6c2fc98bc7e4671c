//! Local module inventory.
//!
//! Layouts recognised under each search path:
//!
//! ```text
//! <root>/<Name>/<Version>/<Name>.manifest   versioned
//! <root>/<Name>/<Name>.manifest             legacy flat
//! ```

use super::error::ModError;
use super::install::INCOMPLETE_MARKER;
use super::manifest::{find_manifest, read_manifest};
use super::plan::ResolvedModule;
use super::requirement::Requirement;
use super::version::Version;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Outcome of a local lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalMatch {
    /// Use the installed module; no remote lookup needed.
    Accepted(ResolvedModule),
    /// Installed and satisfying, but update mode wants the remote answer
    /// first. Used if the registry returns the same version.
    Fallback(ResolvedModule),
}

impl LocalMatch {
    #[must_use]
    pub fn module(&self) -> &ResolvedModule {
        match self {
            Self::Accepted(module) | Self::Fallback(module) => module,
        }
    }

    #[must_use]
    pub fn into_module(self) -> ResolvedModule {
        match self {
            Self::Accepted(module) | Self::Fallback(module) => module,
        }
    }
}

/// Find the highest installed version satisfying `requirement`.
///
/// A version directory whose manifest is missing or unreadable is a hard
/// error. Directories still carrying the `.incomplete` marker are skipped.
pub fn find_local(
    requirement: &Requirement,
    search_paths: &[PathBuf],
    update: bool,
    strict: bool,
) -> Result<Option<LocalMatch>, ModError> {
    let mut best: Option<ResolvedModule> = None;

    for root in search_paths {
        let Some(module_dir) = find_child_dir(root, requirement.name()) else {
            continue;
        };
        trace!(module = requirement.name(), path = %module_dir.display(), "Scanning module directory");

        for dir in candidate_dirs(&module_dir, requirement)? {
            let Some(found) = inspect(&dir, requirement, strict)? else {
                continue;
            };
            if best.as_ref().map_or(true, |b| found.version() > b.version()) {
                best = Some(found);
            }
        }
    }

    let Some(module) = best else {
        return Ok(None);
    };

    let at_max = requirement
        .range()
        .max()
        .is_some_and(|max| max.same_precedence(module.version()));
    if update && !at_max {
        debug!(module = %module, "Local match kept as fallback in update mode");
        return Ok(Some(LocalMatch::Fallback(module)));
    }
    debug!(module = %module, "Satisfied locally");
    Ok(Some(LocalMatch::Accepted(module)))
}

fn candidate_dirs(module_dir: &Path, requirement: &Requirement) -> Result<Vec<PathBuf>, ModError> {
    if let Some(exact) = requirement.range().required_version() {
        let dir = module_dir.join(exact.folder_name());
        return Ok(if dir.is_dir() { vec![dir] } else { Vec::new() });
    }

    let mut dirs = Vec::new();
    for entry in fs::read_dir(module_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if Version::parse(name).is_ok() {
            dirs.push(entry.path());
        }
    }

    if find_manifest(module_dir, requirement.name()).is_some() {
        dirs.push(module_dir.to_path_buf());
    }
    Ok(dirs)
}

fn inspect(
    dir: &Path,
    requirement: &Requirement,
    strict: bool,
) -> Result<Option<ResolvedModule>, ModError> {
    if dir.join(INCOMPLETE_MARKER).exists() {
        warn!(path = %dir.display(), "Ignoring interrupted install");
        return Ok(None);
    }

    let (manifest, version) = read_manifest(dir, requirement.name())
        .map_err(|e| e.context(format!("while checking local install for {requirement}")))?;
    let guid = manifest.normalized_guid();

    if let Some(wanted) = requirement.guid() {
        if guid.as_deref() != Some(wanted) {
            debug!(path = %dir.display(), wanted, found = ?guid, "GUID mismatch, skipping");
            return Ok(None);
        }
    }

    if !requirement.is_satisfied_by(&version, strict) {
        return Ok(None);
    }

    Ok(Some(
        ResolvedModule::local(requirement.name(), version, dir).with_guid(guid),
    ))
}

/// Child directory of `root` named `name`, compared case-insensitively.
pub(crate) fn find_child_dir(root: &Path, name: &str) -> Option<PathBuf> {
    let exact = root.join(name);
    if exact.is_dir() {
        return Some(exact);
    }
    fs::read_dir(root)
        .ok()?
        .filter_map(Result::ok)
        .find(|entry| {
            entry.file_type().is_ok_and(|t| t.is_dir())
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
        .map(|entry| entry.path())
}
