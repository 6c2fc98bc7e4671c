//! Version ranges.
//!
//! Accepted forms:
//! - `*`, `latest`, or empty: unconstrained
//! - `[1.0]`, `=1.0`: exactly one version
//! - `[1.0,2.0)`, `(1.0,]`, `(,2.0]` ...: interval notation, any bracket mix
//! - `>1.0`, `>=1.0`, `<2.0`, `<=2.0`: one-sided shorthand
//! - `1.2.*`: wildcard, equivalent to `[1.2.0, 1.3.0)`
//! - `1.0`: bare version, minimum inclusive (`[1.0, )`), as registries use it

use super::error::ModError;
use super::version::Version;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A version interval. `None` bounds are unbounded (lowest / highest version).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    min: Option<Version>,
    max: Option<Version>,
    min_inclusive: bool,
    max_inclusive: bool,
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::any()
    }
}

impl VersionRange {
    /// The unconstrained range.
    #[must_use]
    pub fn any() -> Self {
        Self {
            min: None,
            max: None,
            min_inclusive: true,
            max_inclusive: true,
        }
    }

    /// A range matching exactly one version.
    #[must_use]
    pub fn exact(version: Version) -> Self {
        Self {
            min: Some(version.clone()),
            max: Some(version),
            min_inclusive: true,
            max_inclusive: true,
        }
    }

    /// Build a range, rejecting `min > max` and empty single-point intervals.
    pub fn new(
        min: Option<Version>,
        max: Option<Version>,
        min_inclusive: bool,
        max_inclusive: bool,
    ) -> Result<Self, ModError> {
        let range = Self {
            min_inclusive: min_inclusive || min.is_none(),
            max_inclusive: max_inclusive || max.is_none(),
            min,
            max,
        };
        if let (Some(lo), Some(hi)) = (&range.min, &range.max) {
            match precedence(lo, hi) {
                Ordering::Greater => {
                    return Err(ModError::invalid_range(
                        &range.to_string(),
                        "minimum is greater than maximum",
                    ));
                }
                Ordering::Equal if !(range.min_inclusive && range.max_inclusive) => {
                    return Err(ModError::invalid_range(
                        &range.to_string(),
                        "interval contains no versions",
                    ));
                }
                _ => {}
            }
        }
        Ok(range)
    }

    /// Parse a range expression.
    pub fn parse(input: &str) -> Result<Self, ModError> {
        let s = input.trim();

        if s.is_empty() || s == "*" || s.eq_ignore_ascii_case("latest") {
            return Ok(Self::any());
        }

        if s.starts_with('[') || s.starts_with('(') {
            return Self::parse_interval(s);
        }

        if let Some(rest) = s.strip_prefix(">=") {
            return Self::new(Some(parse_bound(input, rest)?), None, true, true);
        }
        if let Some(rest) = s.strip_prefix("<=") {
            return Self::new(None, Some(parse_bound(input, rest)?), true, true);
        }
        if let Some(rest) = s.strip_prefix('>') {
            return Self::new(Some(parse_bound(input, rest)?), None, false, true);
        }
        if let Some(rest) = s.strip_prefix('<') {
            return Self::new(None, Some(parse_bound(input, rest)?), true, false);
        }
        if let Some(rest) = s.strip_prefix('=') {
            return Ok(Self::exact(parse_bound(input, rest)?));
        }

        if let Some(prefix) = s.strip_suffix(".*") {
            return Self::parse_wildcard(input, prefix);
        }

        Self::new(Some(parse_bound(input, s)?), None, true, true)
    }

    fn parse_interval(s: &str) -> Result<Self, ModError> {
        let min_inclusive = s.starts_with('[');
        let max_inclusive = match s.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(ModError::invalid_range(s, "missing closing ']' or ')'")),
        };
        if s.len() < 2 {
            return Err(ModError::invalid_range(s, "empty interval"));
        }
        let inner = &s[1..s.len() - 1];

        let Some((lo, hi)) = inner.split_once(',') else {
            if !(min_inclusive && max_inclusive) {
                return Err(ModError::invalid_range(
                    s,
                    "an exact version must use '[' and ']'",
                ));
            }
            return Ok(Self::exact(parse_bound(s, inner)?));
        };

        if hi.contains(',') {
            return Err(ModError::invalid_range(s, "too many ',' separators"));
        }

        let (lo, hi) = (lo.trim(), hi.trim());
        if lo.is_empty() && hi.is_empty() {
            return Err(ModError::invalid_range(s, "no bounds given"));
        }

        let min = if lo.is_empty() {
            None
        } else {
            Some(parse_bound(s, lo)?)
        };
        let max = if hi.is_empty() {
            None
        } else {
            Some(parse_bound(s, hi)?)
        };
        Self::new(min, max, min_inclusive, max_inclusive)
    }

    fn parse_wildcard(input: &str, prefix: &str) -> Result<Self, ModError> {
        let parts: Result<Vec<u64>, _> = prefix.split('.').map(str::parse::<u64>).collect();
        let parts = parts.map_err(|_| ModError::invalid_range(input, "invalid wildcard"))?;

        let overflow = || ModError::invalid_range(input, "wildcard segment too large");
        let (min, max) = match parts.as_slice() {
            [major] => (
                Version::new(*major, 0, 0),
                Version::new(major.checked_add(1).ok_or_else(overflow)?, 0, 0),
            ),
            [major, minor] => (
                Version::new(*major, *minor, 0),
                Version::new(*major, minor.checked_add(1).ok_or_else(overflow)?, 0),
            ),
            [major, minor, patch] => (
                Version::new(*major, *minor, *patch),
                Version::new(*major, *minor, patch.checked_add(1).ok_or_else(overflow)?),
            ),
            _ => return Err(ModError::invalid_range(input, "invalid wildcard")),
        };
        Self::new(Some(min), Some(max), true, false)
    }

    #[must_use]
    pub fn min(&self) -> Option<&Version> {
        self.min.as_ref()
    }

    #[must_use]
    pub fn max(&self) -> Option<&Version> {
        self.max.as_ref()
    }

    #[must_use]
    pub fn min_inclusive(&self) -> bool {
        self.min_inclusive
    }

    #[must_use]
    pub fn max_inclusive(&self) -> bool {
        self.max_inclusive
    }

    /// The single version this range pins, if any.
    #[must_use]
    pub fn required_version(&self) -> Option<&Version> {
        match (&self.min, &self.max) {
            (Some(lo), Some(hi))
                if self.min_inclusive
                    && self.max_inclusive
                    && precedence(lo, hi) == Ordering::Equal =>
            {
                Some(lo)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn is_any(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Whether either bound is itself a prerelease, which implicitly opts in.
    #[must_use]
    pub fn mentions_prerelease(&self) -> bool {
        self.min.as_ref().is_some_and(Version::is_prerelease)
            || self.max.as_ref().is_some_and(Version::is_prerelease)
    }

    /// Whether `version` falls inside the range.
    ///
    /// Unless `strict`, a prerelease of the exclusive upper bound's own release
    /// is rejected: `[1.0.0, 2.0.0)` does not admit `2.0.0-alpha1`. The exception
    /// is a range whose bounds share one release train, such as
    /// `[2.0.0-alpha, 2.0.0)`, which compares normally.
    #[must_use]
    pub fn satisfies(&self, version: &Version, strict: bool) -> bool {
        if let Some(min) = &self.min {
            match precedence(version, min) {
                Ordering::Less => return false,
                Ordering::Equal if !self.min_inclusive => return false,
                _ => {}
            }
        }

        if let Some(max) = &self.max {
            match precedence(version, max) {
                Ordering::Greater => return false,
                Ordering::Equal if !self.max_inclusive => return false,
                _ => {}
            }

            if !strict
                && !self.max_inclusive
                && version.is_prerelease()
                && !max.is_prerelease()
                && version.same_release(max)
                && !self.is_single_train()
            {
                return false;
            }
        }

        true
    }

    fn is_single_train(&self) -> bool {
        matches!((&self.min, &self.max), (Some(lo), Some(hi)) if lo.same_release(hi))
    }

    /// Whether the two ranges share at least one version.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.intersect(other).is_some()
    }

    /// The intersection of two ranges, or `None` if it is empty.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let (min, min_inclusive) = tighter_min(
            (self.min.as_ref(), self.min_inclusive),
            (other.min.as_ref(), other.min_inclusive),
        );
        let (max, max_inclusive) = tighter_max(
            (self.max.as_ref(), self.max_inclusive),
            (other.max.as_ref(), other.max_inclusive),
        );
        Self::new(min.cloned(), max.cloned(), min_inclusive, max_inclusive).ok()
    }

    /// The greatest version in `versions` satisfying this range.
    ///
    /// Prereleases are only considered when `allow_prerelease` is set; among
    /// versions of equal precedence a stable release wins.
    pub fn best_match<'a, I>(
        &self,
        versions: I,
        strict: bool,
        allow_prerelease: bool,
    ) -> Option<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        versions
            .into_iter()
            .filter(|v| allow_prerelease || !v.is_prerelease())
            .filter(|v| self.satisfies(v, strict))
            .max_by(|a, b| {
                a.as_semver()
                    .cmp_precedence(b.as_semver())
                    .then_with(|| b.is_prerelease().cmp(&a.is_prerelease()))
                    .then_with(|| a.cmp(b))
            })
    }
}

fn parse_bound(input: &str, bound: &str) -> Result<Version, ModError> {
    Version::parse(bound.trim()).map_err(|e| ModError::invalid_range(input, e.message()))
}

/// Bound comparison. Build metadata never decides whether a version is in
/// range, so `1.0` and `1.0.0` sit on the same bound.
fn precedence(a: &Version, b: &Version) -> Ordering {
    a.as_semver().cmp_precedence(b.as_semver())
}

fn tighter_min<'a>(
    a: (Option<&'a Version>, bool),
    b: (Option<&'a Version>, bool),
) -> (Option<&'a Version>, bool) {
    match (a.0, b.0) {
        (None, _) => b,
        (_, None) => a,
        (Some(x), Some(y)) => match precedence(x, y) {
            Ordering::Greater => a,
            Ordering::Less => b,
            Ordering::Equal => (Some(x), a.1 && b.1),
        },
    }
}

fn tighter_max<'a>(
    a: (Option<&'a Version>, bool),
    b: (Option<&'a Version>, bool),
) -> (Option<&'a Version>, bool) {
    match (a.0, b.0) {
        (None, _) => b,
        (_, None) => a,
        (Some(x), Some(y)) => match precedence(x, y) {
            Ordering::Less => a,
            Ordering::Greater => b,
            Ordering::Equal => (Some(x), a.1 && b.1),
        },
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return f.write_str("*");
        }
        if let Some(exact) = self.required_version() {
            return write!(f, "[{exact}]");
        }
        f.write_str(if self.min_inclusive { "[" } else { "(" })?;
        if let Some(min) = &self.min {
            write!(f, "{min}")?;
        }
        f.write_str(", ")?;
        if let Some(max) = &self.max {
            write!(f, "{max}")?;
        }
        f.write_str(if self.max_inclusive { "]" } else { ")" })
    }
}

impl FromStr for VersionRange {
    type Err = ModError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
