//! Installed module manifests.
//!
//! Every installed module carries `<Name>.manifest`, a small JSON document:
//!
//! ```json
//! { "version": "2.1.0", "prerelease": "beta1", "guid": "..." }
//! ```
//!
//! Only `version` is required. The inventory parses it fully; the installer
//! only scans for the fields on freshly extracted files.

use super::error::ModError;
use super::version::Version;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Manifest file extension.
pub const MANIFEST_EXT: &str = "manifest";

/// The on-disk manifest document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prerelease: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
}

impl ModuleManifest {
    /// The effective version: `version` plus the `prerelease` label if any.
    pub fn module_version(&self) -> Result<Version, ModError> {
        effective_version(&self.version, self.prerelease.as_deref())
    }

    /// GUID, lowercased.
    #[must_use]
    pub fn normalized_guid(&self) -> Option<String> {
        normalize_guid(self.guid.as_deref())
    }
}

/// Fields pulled out of a manifest by [`scan_manifest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSummary {
    pub version: Version,
    pub guid: Option<String>,
}

/// `<dir>/<name>.manifest`.
#[must_use]
pub fn manifest_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{MANIFEST_EXT}"))
}

/// Find the manifest in `dir`, matching the module name case-insensitively.
#[must_use]
pub fn find_manifest(dir: &Path, name: &str) -> Option<PathBuf> {
    let exact = manifest_path(dir, name);
    if exact.is_file() {
        return Some(exact);
    }
    let wanted = format!("{name}.{MANIFEST_EXT}").to_ascii_lowercase();
    fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .find(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.to_ascii_lowercase() == wanted)
        })
}

/// Fully parse the manifest for `name` in `dir`.
///
/// A missing or unparseable manifest is corruption.
pub fn read_manifest(dir: &Path, name: &str) -> Result<(ModuleManifest, Version), ModError> {
    let path = find_manifest(dir, name).ok_or_else(|| {
        ModError::corruption(format!(
            "Missing manifest for {name} in {}",
            dir.display()
        ))
    })?;
    let content = fs::read_to_string(&path)
        .map_err(|e| ModError::corruption(format!("Cannot read {}: {e}", path.display())))?;
    let manifest: ModuleManifest = serde_json::from_str(&content)
        .map_err(|e| ModError::corruption(format!("Invalid manifest {}: {e}", path.display())))?;
    let version = manifest
        .module_version()
        .map_err(|e| ModError::corruption(format!("Invalid manifest {}: {}", path.display(), e.message())))?;
    Ok((manifest, version))
}

/// Scan a manifest for `version`, `prerelease` and `guid` without parsing
/// the whole document.
pub fn scan_manifest(dir: &Path, name: &str) -> Result<ManifestSummary, ModError> {
    let path = find_manifest(dir, name).ok_or_else(|| {
        ModError::corruption(format!(
            "Package for {name} has no manifest in {}",
            dir.display()
        ))
    })?;
    let content = fs::read_to_string(&path)
        .map_err(|e| ModError::corruption(format!("Cannot read {}: {e}", path.display())))?;

    let pattern = field_pattern()
        .ok_or_else(|| ModError::invariant("Manifest field pattern failed to compile"))?;

    let mut version = None;
    let mut prerelease = None;
    let mut guid = None;
    for caps in pattern.captures_iter(&content) {
        let (Some(field), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let slot = match field.as_str() {
            "version" => &mut version,
            "prerelease" => &mut prerelease,
            _ => &mut guid,
        };
        if slot.is_none() {
            *slot = Some(value.as_str());
        }
    }

    let raw = version.ok_or_else(|| {
        ModError::corruption(format!("Manifest {} declares no version", path.display()))
    })?;
    let version = effective_version(raw, prerelease)
        .map_err(|e| ModError::corruption(format!("Manifest {}: {}", path.display(), e.message())))?;

    Ok(ManifestSummary {
        version,
        guid: normalize_guid(guid),
    })
}

fn field_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#""(version|prerelease|guid)"\s*:\s*"([^"]*)""#).ok())
        .as_ref()
}

fn effective_version(version: &str, prerelease: Option<&str>) -> Result<Version, ModError> {
    let base = Version::parse(version)?;
    match prerelease.map(str::trim).filter(|p| !p.is_empty()) {
        Some(label) if !base.is_prerelease() => base.with_prerelease(label),
        _ => Ok(base),
    }
}

fn normalize_guid(guid: Option<&str>) -> Option<String> {
    guid.map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, file: &str, content: &str) {
        fs::write(dir.join(file), content).unwrap();
    }

    #[test]
    fn test_read_manifest_with_prerelease() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "Foo.manifest",
            r#"{"version":"2.0.0","prerelease":"beta1","guid":"ABCD-1234"}"#,
        );
        let (manifest, version) = read_manifest(dir.path(), "Foo").unwrap();
        assert_eq!(version, Version::parse("2.0.0-beta1").unwrap());
        assert_eq!(manifest.normalized_guid().as_deref(), Some("abcd-1234"));
    }

    #[test]
    fn test_read_manifest_case_insensitive_name() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "foo.MANIFEST", r#"{"version":"1.2"}"#);
        let (_, version) = read_manifest(dir.path(), "Foo").unwrap();
        assert_eq!(version, Version::parse("1.2").unwrap());
    }

    #[test]
    fn test_missing_or_invalid_manifest_is_corruption() {
        let dir = TempDir::new().unwrap();
        let err = read_manifest(dir.path(), "Foo").unwrap_err();
        assert_eq!(err.code(), super::super::error::codes::MOD_CORRUPTION);

        write(dir.path(), "Foo.manifest", "{ not json");
        let err = read_manifest(dir.path(), "Foo").unwrap_err();
        assert_eq!(err.code(), super::super::error::codes::MOD_CORRUPTION);

        write(dir.path(), "Foo.manifest", r#"{"version":"one"}"#);
        assert!(read_manifest(dir.path(), "Foo").is_err());
    }

    #[test]
    fn test_scan_manifest() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "Foo.manifest",
            "{\n  \"guid\" : \"F00D-0000\",\n  \"version\": \"1.2.3.4\"\n}\n",
        );
        let summary = scan_manifest(dir.path(), "Foo").unwrap();
        assert_eq!(summary.version.folder_name(), "1.2.3.4");
        assert_eq!(summary.guid.as_deref(), Some("f00d-0000"));
    }

    #[test]
    fn test_scan_manifest_without_version() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Foo.manifest", r#"{"guid":"x"}"#);
        let err = scan_manifest(dir.path(), "Foo").unwrap_err();
        assert!(err.message().contains("no version"));
    }
}
