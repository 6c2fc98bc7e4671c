//! Module versions.
//!
//! Two schemes coexist on the registry: SemVer2 (`1.2.3-beta.1+build`) and
//! legacy dotted versions with 2 to 4 numeric segments (`1.2`, `1.2.3.4`).
//! Everything is stored as a `semver::Version`; legacy shapes that SemVer
//! cannot express are encoded losslessly:
//!
//! | legacy    | encoded                                               |
//! |-----------|-------------------------------------------------------|
//! | `1.2`     | `1.2.0+SYSTEMVERSION.NOBUILD`                         |
//! | `1.2.3`   | `1.2.3`                                               |
//! | `1.2.3.4` | `1.2.4-SYSTEMVERSION.R0000000004+SYSTEMVERSION.HASREVISION` |
//!
//! A revision is encoded as a prerelease of the *next* patch, so `1.2.3.4`
//! sorts after `1.2.3` and before `1.2.4`, exactly like legacy four-part
//! ordering. The label is zero-padded so revisions compare correctly as text.

use super::error::ModError;
use semver::{BuildMetadata, Prerelease};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const NO_BUILD_TAG: &str = "SYSTEMVERSION.NOBUILD";
const HAS_REVISION_TAG: &str = "SYSTEMVERSION.HASREVISION";
const REVISION_PREFIX: &str = "SYSTEMVERSION.R";
const REVISION_WIDTH: usize = 10;

/// A legacy 2–4 segment version.
///
/// Field order matters: the derived ordering compares `major`, `minor`,
/// `build`, `revision`, with a missing segment sorting before any present one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LegacyVersion {
    pub major: u64,
    pub minor: u64,
    pub build: Option<u64>,
    pub revision: Option<u64>,
}

impl LegacyVersion {
    /// Parse `a.b`, `a.b.c` or `a.b.c.d`.
    pub fn parse(input: &str) -> Result<Self, ModError> {
        let input = input.trim();
        let segments: Vec<&str> = input.split('.').collect();
        if !(2..=4).contains(&segments.len()) {
            return Err(ModError::invalid_version(
                input,
                format!("expected 2 to 4 segments, found {}", segments.len()),
            ));
        }

        let mut numbers = Vec::with_capacity(segments.len());
        for segment in &segments {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ModError::invalid_version(
                    input,
                    format!("segment '{segment}' is not a number"),
                ));
            }
            let n = segment
                .parse::<u64>()
                .map_err(|e| ModError::invalid_version(input, e))?;
            numbers.push(n);
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            build: numbers.get(2).copied(),
            revision: numbers.get(3).copied(),
        })
    }
}

impl fmt::Display for LegacyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(build) = self.build {
            write!(f, ".{build}")?;
            if let Some(revision) = self.revision {
                write!(f, ".{revision}")?;
            }
        }
        Ok(())
    }
}

/// A normalized module version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(semver::Version);

impl Version {
    /// Create a plain `major.minor.patch` version.
    #[must_use]
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    /// Parse either a SemVer2 string or a legacy dotted version.
    pub fn parse(input: &str) -> Result<Self, ModError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ModError::invalid_version(input, "empty version"));
        }

        if input.contains(['-', '+']) {
            return semver::Version::parse(input)
                .map(Self)
                .map_err(|e| ModError::invalid_version(input, e));
        }

        Self::from_legacy(LegacyVersion::parse(input)?)
    }

    /// Encode a legacy version.
    pub fn from_legacy(legacy: LegacyVersion) -> Result<Self, ModError> {
        let LegacyVersion {
            major,
            minor,
            build,
            revision,
        } = legacy;

        let version = match (build, revision) {
            (None, _) => {
                let mut v = semver::Version::new(major, minor, 0);
                v.build = build_tag(NO_BUILD_TAG);
                v
            }
            (Some(build), None) => semver::Version::new(major, minor, build),
            (Some(build), Some(revision)) => {
                let next_patch = build.checked_add(1).ok_or_else(|| {
                    ModError::invalid_version(&legacy.to_string(), "build segment too large")
                })?;
                let mut v = semver::Version::new(major, minor, next_patch);
                v.pre = Prerelease::new(&format!(
                    "{REVISION_PREFIX}{revision:0width$}",
                    width = REVISION_WIDTH
                ))
                .map_err(|e| ModError::invalid_version(&legacy.to_string(), e))?;
                v.build = build_tag(HAS_REVISION_TAG);
                v
            }
        };

        Ok(Self(version))
    }

    /// Decode back to a legacy version, if this version has a legacy shape.
    ///
    /// Plain `a.b.c` versions decode to three-segment legacy versions; real
    /// prereleases and foreign build metadata do not decode.
    #[must_use]
    pub fn to_legacy(&self) -> Option<LegacyVersion> {
        let v = &self.0;
        match v.build.as_str() {
            NO_BUILD_TAG if v.pre.is_empty() && v.patch == 0 => Some(LegacyVersion {
                major: v.major,
                minor: v.minor,
                build: None,
                revision: None,
            }),
            HAS_REVISION_TAG => {
                let revision = self.encoded_revision()?;
                Some(LegacyVersion {
                    major: v.major,
                    minor: v.minor,
                    build: Some(v.patch.checked_sub(1)?),
                    revision: Some(revision),
                })
            }
            "" if v.pre.is_empty() => Some(LegacyVersion {
                major: v.major,
                minor: v.minor,
                build: Some(v.patch),
                revision: None,
            }),
            _ => None,
        }
    }

    fn encoded_revision(&self) -> Option<u64> {
        if self.0.build.as_str() != HAS_REVISION_TAG {
            return None;
        }
        let digits = self.0.pre.as_str().strip_prefix(REVISION_PREFIX)?;
        if digits.len() != REVISION_WIDTH {
            return None;
        }
        digits.parse().ok()
    }

    /// Attach a prerelease label (as read from a manifest).
    pub fn with_prerelease(&self, label: &str) -> Result<Self, ModError> {
        let label = label.trim();
        if label.is_empty() {
            return Ok(self.clone());
        }
        if self.has_revision() {
            return Err(ModError::invalid_version(
                &format!("{self}-{label}"),
                "four-part versions cannot carry a prerelease label",
            ));
        }
        let mut inner = self.0.clone();
        inner.pre = Prerelease::new(label)
            .map_err(|e| ModError::invalid_version(&format!("{self}-{label}"), e))?;
        if inner.build.as_str() == NO_BUILD_TAG {
            inner.build = BuildMetadata::EMPTY;
        }
        Ok(Self(inner))
    }

    #[must_use]
    pub fn major(&self) -> u64 {
        self.0.major
    }

    #[must_use]
    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    #[must_use]
    pub fn patch(&self) -> u64 {
        self.0.patch
    }

    /// The prerelease label, if this is a real prerelease.
    #[must_use]
    pub fn prerelease(&self) -> Option<&str> {
        if self.is_prerelease() {
            Some(self.0.pre.as_str())
        } else {
            None
        }
    }

    /// Whether this is a prerelease. Encoded legacy revisions are not.
    #[must_use]
    pub fn is_prerelease(&self) -> bool {
        !self.0.pre.is_empty() && !self.has_revision()
    }

    /// Whether this encodes a legacy fourth segment.
    #[must_use]
    pub fn has_revision(&self) -> bool {
        self.encoded_revision().is_some()
    }

    /// Same `major.minor.patch` (the prerelease "train").
    #[must_use]
    pub fn same_release(&self, other: &Self) -> bool {
        self.0.major == other.0.major
            && self.0.minor == other.0.minor
            && self.0.patch == other.0.patch
    }

    /// Whether the two versions have equal SemVer precedence. Build
    /// metadata, including the legacy tags, is ignored: `1.0` matches `1.0.0`.
    #[must_use]
    pub fn same_precedence(&self, other: &Self) -> bool {
        self.0.cmp_precedence(&other.0).is_eq()
    }

    /// Directory name used on disk: three parts, or four when the legacy
    /// revision is non-zero. Prerelease labels never appear in folder names.
    #[must_use]
    pub fn folder_name(&self) -> String {
        match self.to_legacy() {
            Some(LegacyVersion {
                major,
                minor,
                build: Some(build),
                revision: Some(revision),
            }) if revision > 0 => format!("{major}.{minor}.{build}.{revision}"),
            Some(legacy) => format!(
                "{}.{}.{}",
                legacy.major,
                legacy.minor,
                legacy.build.unwrap_or(0)
            ),
            None => format!("{}.{}.{}", self.0.major, self.0.minor, self.0.patch),
        }
    }

    /// The underlying SemVer value (encoded form for legacy versions).
    #[must_use]
    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }

    /// The encoded SemVer string, round-trippable through [`Version::parse`].
    #[must_use]
    pub fn to_semver_string(&self) -> String {
        self.0.to_string()
    }
}

fn build_tag(tag: &str) -> BuildMetadata {
    // Both tags are valid build metadata by construction.
    BuildMetadata::new(tag).unwrap_or(BuildMetadata::EMPTY)
}

fn build_rank(build: &BuildMetadata) -> u8 {
    match build.as_str() {
        NO_BUILD_TAG => 0,
        "" => 1,
        _ => 2,
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .cmp_precedence(&other.0)
            .then_with(|| build_rank(&self.0.build).cmp(&build_rank(&other.0.build)))
            .then_with(|| self.0.build.cmp(&other.0.build))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_legacy() {
            Some(legacy) => fmt::Display::fmt(&legacy, f),
            None => fmt::Display::fmt(&self.0, f),
        }
    }
}

impl FromStr for Version {
    type Err = ModError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<semver::Version> for Version {
    fn from(v: semver::Version) -> Self {
        Self(v)
    }
}
