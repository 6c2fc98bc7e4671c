//! Module requirements.
//!
//! Parses the requirement shorthand:
//! - `Az.Accounts`
//! - `Az.Accounts=2.1.0`, `Az.Accounts@2.1.0` (exact)
//! - `Az.Accounts>2.0`, `>=`, `<`, `<=`
//! - `Az.Accounts:[2.0, 3.0)` (raw range expression)
//! - `!Az.Accounts` or `Az.Accounts!` (allow prereleases)

use super::error::ModError;
use super::range::VersionRange;
use super::version::Version;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

const PRERELEASE_MARKER: char = '!';

/// A request for one module within a version range.
///
/// Equality and hashing cover name, GUID and range. The prerelease flag is
/// not part of a requirement's identity.
#[derive(Debug, Clone)]
pub struct Requirement {
    name: String,
    guid: Option<String>,
    range: VersionRange,
    prerelease: bool,
}

impl Requirement {
    /// Create a requirement. The name must be non-empty.
    pub fn new(name: impl Into<String>, range: VersionRange) -> Result<Self, ModError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ModError::invalid_requirement(&name, "empty module name"));
        }
        validate_name(trimmed)?;
        Ok(Self {
            name: trimmed.to_string(),
            guid: None,
            range,
            prerelease: false,
        })
    }

    /// Pin the module GUID.
    #[must_use]
    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        let guid = guid.into();
        self.guid = (!guid.trim().is_empty()).then(|| guid.trim().to_ascii_lowercase());
        self
    }

    /// Opt in to prerelease versions.
    #[must_use]
    pub fn with_prerelease(mut self, prerelease: bool) -> Self {
        self.prerelease = prerelease;
        self
    }

    /// Parse the requirement shorthand.
    pub fn parse(input: &str) -> Result<Self, ModError> {
        let mut s = input.trim();
        let mut prerelease = false;

        if let Some(rest) = s.strip_prefix(PRERELEASE_MARKER) {
            prerelease = true;
            s = rest.trim_start();
        }
        if let Some(rest) = s.strip_suffix(PRERELEASE_MARKER) {
            prerelease = true;
            s = rest.trim_end();
        }

        if s.is_empty() {
            return Err(ModError::invalid_requirement(input, "empty module name"));
        }

        let (name, range) = if let Some((name, raw)) = s.split_once(':') {
            (name, VersionRange::parse(raw)?)
        } else if let Some(pos) = s.find(['=', '>', '<', '@']) {
            let (name, expr) = s.split_at(pos);
            let range = match expr.strip_prefix('@') {
                Some(exact) => VersionRange::exact(
                    Version::parse(exact)
                        .map_err(|e| ModError::invalid_requirement(input, e.message()))?,
                ),
                None => VersionRange::parse(expr)?,
            };
            (name, range)
        } else {
            (s, VersionRange::any())
        };

        if name.trim().is_empty() {
            return Err(ModError::invalid_requirement(input, "empty module name"));
        }

        Ok(Self::new(name, range)?.with_prerelease(prerelease))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Case-insensitive key used for plan deduplication.
    #[must_use]
    pub fn key(&self) -> String {
        self.name.to_ascii_lowercase()
    }

    #[must_use]
    pub fn guid(&self) -> Option<&str> {
        self.guid.as_deref()
    }

    #[must_use]
    pub fn range(&self) -> &VersionRange {
        &self.range
    }

    #[must_use]
    pub fn prerelease(&self) -> bool {
        self.prerelease
    }

    /// Prereleases are allowed when opted in, or when a range bound is one.
    #[must_use]
    pub fn allows_prerelease(&self) -> bool {
        self.prerelease || self.range.mentions_prerelease()
    }

    /// Whether `version` meets this requirement, prerelease policy included.
    #[must_use]
    pub fn is_satisfied_by(&self, version: &Version, strict: bool) -> bool {
        (self.allows_prerelease() || !version.is_prerelease())
            && self.range.satisfies(version, strict)
    }

    /// Combine two requirements on the same module.
    ///
    /// Returns `None` when no version can satisfy both (empty range
    /// intersection or different pinned GUIDs).
    #[must_use]
    pub fn merge(&self, other: &Self) -> Option<Self> {
        let guid = match (&self.guid, &other.guid) {
            (Some(a), Some(b)) if a != b => return None,
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        let range = self.range.intersect(&other.range)?;
        Some(Self {
            name: self.name.clone(),
            guid,
            range,
            prerelease: self.prerelease || other.prerelease,
        })
    }
}

fn validate_name(name: &str) -> Result<(), ModError> {
    if let Some(bad) = name
        .chars()
        .find(|c| c.is_whitespace() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
    {
        return Err(ModError::invalid_requirement(
            name,
            format!("invalid character '{bad}' in module name"),
        ));
    }
    if name == "." || name == ".." {
        return Err(ModError::invalid_requirement(name, "reserved module name"));
    }
    Ok(())
}

impl PartialEq for Requirement {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.guid == other.guid && self.range == other.range
    }
}

impl Eq for Requirement {}

impl Hash for Requirement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.guid.hash(state);
        self.range.hash(state);
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(exact) = self.range.required_version() {
            write!(f, "@{exact}")?;
        } else if !self.range.is_any() {
            write!(f, ":{}", self.range)?;
        }
        if self.prerelease {
            write!(f, "{PRERELEASE_MARKER}")?;
        }
        if let Some(guid) = &self.guid {
            write!(f, " ({guid})")?;
        }
        Ok(())
    }
}

impl FromStr for Requirement {
    type Err = ModError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
