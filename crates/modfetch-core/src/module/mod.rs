//! Module manager functionality.
//!
//! Provides:
//! - Version parsing across SemVer2 and legacy 2-4 segment versions
//! - Version ranges and requirement shorthand
//! - A caching registry client for NuGet-v3 style registries
//! - Lookup of already-installed modules
//! - Dependency resolution into an installation plan
//! - Concurrent streaming download and extraction
//! - Lockfiles pinning a resolved plan

pub mod catalog;
pub mod error;
pub mod install;
pub mod inventory;
pub mod lockfile;
pub mod manifest;
pub mod plan;
pub mod range;
pub mod registry;
pub mod requirement;
pub mod resolve;
pub mod tarball;
pub mod version;

pub use catalog::{CatalogEntry, RegistrationIndex, RegistrationLeaf, RegistrationPage, ServiceIndex};
pub use error::{codes, ErrorKind, ModError};
pub use install::{InstallOptions, Installer, INCOMPLETE_MARKER};
pub use inventory::{find_local, LocalMatch};
pub use lockfile::{Lockfile, LOCKFILE_NAME};
pub use manifest::{read_manifest, scan_manifest, ManifestSummary, ModuleManifest};
pub use plan::{DownloadLocation, InstallationPlan, ResolvedModule};
pub use range::VersionRange;
pub use registry::{registration_url, RegistryClient};
pub use requirement::Requirement;
pub use resolve::{ResolveOptions, ResolveState, Resolver};
pub use version::{LegacyVersion, Version};
