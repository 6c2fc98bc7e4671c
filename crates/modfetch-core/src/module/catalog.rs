//! Registry documents.
//!
//! The registry exposes a service index listing typed resources. The
//! `RegistrationsBaseUrl` resource serves one registration index per module:
//!
//! ```json
//! {
//!   "count": 2,
//!   "items": [
//!     { "@id": ".../page/1.0.0/1.9.0.json", "lower": "1.0.0", "upper": "1.9.0" },
//!     { "@id": "...", "lower": "2.0.0", "upper": "2.1.0", "items": [ { "catalogEntry": { ... } } ] }
//!   ]
//! }
//! ```
//!
//! Pages either inline their leaves (`items`) or must be fetched from `@id`.

use super::error::ModError;
use super::range::VersionRange;
use super::requirement::Requirement;
use super::version::Version;
use serde::Deserialize;
use tracing::debug;

const REGISTRATIONS_TYPE: &str = "RegistrationsBaseUrl";

/// The registry root document.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceIndex {
    #[serde(default)]
    pub resources: Vec<ServiceResource>,
}

/// One typed service URL.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceResource {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: String,
}

impl ServiceIndex {
    /// The registrations base URL. Prefers the unversioned type, then the
    /// lexically greatest versioned one (`RegistrationsBaseUrl/3.6.0`).
    #[must_use]
    pub fn registrations_base(&self) -> Option<&str> {
        self.resources
            .iter()
            .filter(|r| {
                r.kind == REGISTRATIONS_TYPE
                    || r.kind.starts_with(&format!("{REGISTRATIONS_TYPE}/"))
            })
            .max_by(|a, b| {
                (a.kind == REGISTRATIONS_TYPE)
                    .cmp(&(b.kind == REGISTRATIONS_TYPE))
                    .then_with(|| a.kind.cmp(&b.kind))
            })
            .map(|r| r.id.as_str())
    }
}

/// A module's registration index.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationIndex {
    #[serde(default)]
    pub items: Vec<RegistrationPage>,
}

/// A page of versions, inline or by reference.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationPage {
    #[serde(rename = "@id")]
    pub id: String,
    pub lower: String,
    pub upper: String,
    #[serde(default)]
    pub items: Option<Vec<RegistrationLeaf>>,
}

/// One version of a module.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationLeaf {
    pub catalog_entry: CatalogEntry,
    #[serde(default)]
    pub package_content: Option<String>,
}

/// Version metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub dependency_groups: Vec<DependencyGroup>,
    #[serde(default)]
    pub package_content: Option<String>,
    #[serde(default)]
    pub listed: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DependencyGroup {
    #[serde(default)]
    pub dependencies: Vec<PackageDependency>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PackageDependency {
    pub id: String,
    #[serde(default)]
    pub range: Option<String>,
}

impl RegistrationPage {
    /// The page's declared version interval.
    pub fn bounds(&self) -> Result<VersionRange, ModError> {
        let lower = Version::parse(&self.lower)?;
        let upper = Version::parse(&self.upper)?;
        VersionRange::new(Some(lower), Some(upper), true, true)
    }
}

impl RegistrationLeaf {
    /// Download URL for the package content.
    #[must_use]
    pub fn content_url(&self) -> Option<&str> {
        self.package_content
            .as_deref()
            .or(self.catalog_entry.package_content.as_deref())
    }
}

impl CatalogEntry {
    /// All declared dependencies as requirements, deduplicated across groups.
    pub fn dependencies(&self) -> Result<Vec<Requirement>, ModError> {
        let mut requirements: Vec<Requirement> = Vec::new();
        for dep in self.dependency_groups.iter().flat_map(|g| &g.dependencies) {
            let range = VersionRange::parse(dep.range.as_deref().unwrap_or(""))
                .map_err(|e| e.context(format!("{}@{} dependency '{}'", self.id, self.version, dep.id)))?;
            let requirement = Requirement::new(dep.id.clone(), range)?;
            if !requirements.contains(&requirement) {
                requirements.push(requirement);
            }
        }
        Ok(requirements)
    }
}

impl RegistrationIndex {
    /// Leaves already present in the index document.
    pub fn inlined_leaves(&self) -> impl Iterator<Item = &RegistrationLeaf> {
        self.items.iter().filter_map(|p| p.items.as_ref()).flatten()
    }

    /// Non-inlined pages whose interval overlaps `range`, highest first.
    #[must_use]
    pub fn candidate_pages(&self, range: &VersionRange) -> Vec<&RegistrationPage> {
        let mut pages: Vec<(Version, &RegistrationPage)> = self
            .items
            .iter()
            .filter(|p| p.items.is_none())
            .filter_map(|page| match page.bounds() {
                Ok(bounds) if bounds.overlaps(range) => {
                    Version::parse(&page.upper).ok().map(|upper| (upper, page))
                }
                Ok(_) => None,
                Err(e) => {
                    debug!(page = %page.id, error = %e, "Skipping page with unreadable bounds");
                    None
                }
            })
            .collect();
        pages.sort_by(|a, b| b.0.cmp(&a.0));
        pages.into_iter().map(|(_, page)| page).collect()
    }
}

/// Pick the leaf that best satisfies `requirement`.
///
/// Unlisted versions are only eligible when the requirement pins them.
/// Two leaves resolving to the same version is an invariant violation.
pub fn select_leaf<'a, I>(
    leaves: I,
    requirement: &Requirement,
    strict: bool,
) -> Result<Option<&'a RegistrationLeaf>, ModError>
where
    I: IntoIterator<Item = &'a RegistrationLeaf>,
{
    let pinned = requirement.range().required_version();

    let candidates: Vec<(Version, &RegistrationLeaf)> = leaves
        .into_iter()
        .filter_map(|leaf| match Version::parse(&leaf.catalog_entry.version) {
            Ok(version) => Some((version, leaf)),
            Err(e) => {
                debug!(module = %leaf.catalog_entry.id, error = %e, "Skipping unparseable version");
                None
            }
        })
        .filter(|(version, leaf)| {
            leaf.catalog_entry.listed != Some(false)
                || pinned.is_some_and(|p| p.same_precedence(version))
        })
        .collect();

    let best = requirement.range().best_match(
        candidates.iter().map(|(v, _)| v),
        strict,
        requirement.allows_prerelease(),
    );

    let Some(best) = best else {
        return Ok(None);
    };

    let mut matching = candidates.iter().filter(|(v, _)| v == best);
    let Some((_, leaf)) = matching.next() else {
        return Ok(None);
    };
    if matching.next().is_some() {
        return Err(ModError::invariant(format!(
            "Multiple catalog entries for {}@{best} while resolving {requirement}",
            leaf.catalog_entry.id
        )));
    }
    Ok(Some(leaf))
}
