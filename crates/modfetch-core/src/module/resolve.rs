//! Dependency resolution.
//!
//! Turns root requirements into an [`InstallationPlan`]. Registry lookups run
//! as background tasks; this module's loop is the only writer of the plan and
//! applies one completed lookup per iteration.
//!
//! Modules are deduplicated by name. Every requirement placed on a name is
//! kept, and the planned version must satisfy their intersection. A planned
//! module that a later requirement rules out is dropped, together with the
//! requirements it declared, and resolved again. An empty intersection is
//! `MOD_NOT_FOUND`.

use super::catalog::{select_leaf, RegistrationLeaf};
use super::error::{ErrorKind, ModError};
use super::inventory::{find_local, LocalMatch};
use super::plan::{InstallationPlan, ResolvedModule};
use super::registry::RegistryClient;
use super::requirement::Requirement;
use super::version::Version;
use crate::config::Config;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Options for dependency resolution.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Registry service index URL.
    pub source: String,
    /// Directories scanned for installed modules.
    pub search_paths: Vec<PathBuf>,
    /// Only accept local installs that are already at the range maximum.
    pub update: bool,
    /// Literal SemVer2 range checks.
    pub strict: bool,
    /// Allow prereleases for every requirement.
    pub prerelease: bool,
    /// How long to wait for a lookup before re-checking cancellation.
    pub poll_interval: Duration,
}

impl ResolveOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            source: config.source.clone(),
            search_paths: config.all_search_paths(),
            update: config.update,
            strict: config.strict,
            prerelease: config.prerelease,
            poll_interval: config.poll_interval(),
        }
    }
}

/// Resolver lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveState {
    /// Root requirements deduplicated, nothing issued yet.
    Seeded,
    /// Lookups are being issued.
    Resolving,
    /// No new lookups pending; waiting for the outstanding ones.
    Draining,
    Done,
    Cancelled,
    Failed,
}

/// A finished registry lookup.
#[derive(Debug)]
struct Resolution {
    module: ResolvedModule,
    dependencies: Vec<Requirement>,
}

type Lookup = (u64, Result<Resolution, ModError>);

/// How many times one module may be re-resolved after a narrower requirement
/// arrives before the run gives up with `MOD_CONFLICT`.
const MAX_RERESOLVES: u32 = 8;

/// One requirement placed on a module, and who placed it.
#[derive(Debug, Clone)]
struct Demand {
    requirement: Requirement,
    /// Key and display form of the planned module that declared it. `None`
    /// for root requirements.
    parent: Option<(String, String)>,
}

impl fmt::Display for Demand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some((_, label)) => write!(f, "{} (from {label})", self.requirement),
            None => fmt::Display::fmt(&self.requirement, f),
        }
    }
}

/// Bookkeeping for one resolve run. Owned by the resolve loop only.
#[derive(Default)]
struct Work {
    tasks: JoinSet<Lookup>,
    in_flight: HashMap<u64, Requirement>,
    /// Every live requirement per module key. The planned version must
    /// satisfy all of them at once.
    demands: HashMap<String, Vec<Demand>>,
    fallbacks: HashMap<String, ResolvedModule>,
    reresolves: HashMap<String, u32>,
    next_id: u64,
}

impl Work {
    fn lookup_pending(&self, key: &str) -> bool {
        self.in_flight.values().any(|r| r.key() == key)
    }
}

/// Resolves requirements against a registry and local installs.
#[derive(Debug)]
pub struct Resolver {
    registry: RegistryClient,
    options: ResolveOptions,
    token: CancellationToken,
    state: ResolveState,
    plan: InstallationPlan,
}

impl Resolver {
    #[must_use]
    pub fn new(registry: RegistryClient, options: ResolveOptions) -> Self {
        Self {
            registry,
            options,
            token: CancellationToken::new(),
            state: ResolveState::Seeded,
            plan: InstallationPlan::new(),
        }
    }

    /// Use an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Token that cancels this resolver.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    #[must_use]
    pub fn state(&self) -> ResolveState {
        self.state
    }

    /// The plan so far. After cancellation this holds every module resolved
    /// before the signal.
    #[must_use]
    pub fn plan(&self) -> &InstallationPlan {
        &self.plan
    }

    #[must_use]
    pub fn into_plan(self) -> InstallationPlan {
        self.plan
    }

    /// Resolve `requirements` into a plan.
    ///
    /// Modules already installed in a search path are left out of the plan.
    /// Any lookup failure aborts the whole run.
    pub async fn resolve(
        &mut self,
        requirements: &[Requirement],
    ) -> Result<InstallationPlan, ModError> {
        self.state = ResolveState::Seeded;
        self.plan = InstallationPlan::new();

        let mut work = Work::default();
        let outcome = self.run(requirements, &mut work).await;

        work.tasks.abort_all();
        while work.tasks.join_next().await.is_some() {}

        match outcome {
            Ok(()) => {
                self.state = ResolveState::Done;
                info!(modules = self.plan.len(), "Resolution complete");
                Ok(self.plan.clone())
            }
            Err(e) if e.kind() == ErrorKind::Cancelled => {
                self.state = ResolveState::Cancelled;
                info!(modules = self.plan.len(), "Resolution cancelled");
                Err(e)
            }
            Err(e) => {
                self.state = ResolveState::Failed;
                Err(e)
            }
        }
    }

    async fn run(&mut self, requirements: &[Requirement], work: &mut Work) -> Result<(), ModError> {
        for requirement in self.merge_roots(requirements)? {
            self.demand(work, requirement, None)?;
        }

        self.state = ResolveState::Resolving;

        loop {
            if self.token.is_cancelled() {
                return Err(ModError::cancelled());
            }
            if work.tasks.is_empty() {
                return Ok(());
            }

            let joined = match tokio::time::timeout(self.options.poll_interval, work.tasks.join_next()).await {
                Err(_) => continue,
                Ok(None) => return Ok(()),
                Ok(Some(joined)) => joined,
            };
            let (id, result) =
                joined.map_err(|e| ModError::invariant(format!("Lookup task failed: {e}")))?;
            let requirement = work
                .in_flight
                .remove(&id)
                .ok_or_else(|| ModError::invariant(format!("Unknown lookup handle {id}")))?;

            let issued_before = work.next_id;
            let resolution = result.map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    self.not_found(work, &requirement, e)
                } else {
                    e
                }
            })?;
            self.apply(work, resolution)?;

            self.state = if work.next_id > issued_before {
                ResolveState::Resolving
            } else {
                ResolveState::Draining
            };
        }
    }

    /// Group root requirements by name and intersect their ranges.
    fn merge_roots(&self, requirements: &[Requirement]) -> Result<Vec<Requirement>, ModError> {
        let mut merged: Vec<Requirement> = Vec::with_capacity(requirements.len());
        for requirement in requirements {
            let requirement = self.apply_prerelease(requirement.clone());
            match merged.iter_mut().find(|r| r.key() == requirement.key()) {
                Some(existing) => {
                    *existing = existing.merge(&requirement).ok_or_else(|| {
                        ModError::not_found(
                            format!("both {existing} and {requirement}"),
                            &self.options.source,
                        )
                    })?;
                }
                None => merged.push(requirement),
            }
        }
        Ok(merged)
    }

    fn apply_prerelease(&self, requirement: Requirement) -> Requirement {
        let prerelease = requirement.prerelease() || self.options.prerelease;
        requirement.with_prerelease(prerelease)
    }

    /// Everything currently required of `key`, intersected. `None` once no
    /// live requirement names the module.
    fn wanted(&self, work: &Work, key: &str) -> Result<Option<Requirement>, ModError> {
        let Some(demands) = work.demands.get(key) else {
            return Ok(None);
        };
        let mut merged: Option<Requirement> = None;
        for demand in demands {
            merged = Some(match merged {
                None => demand.requirement.clone(),
                Some(acc) => acc
                    .merge(&demand.requirement)
                    .ok_or_else(|| self.unsatisfiable(demands))?,
            });
        }
        Ok(merged)
    }

    fn unsatisfiable(&self, demands: &[Demand]) -> ModError {
        let all: Vec<String> = demands.iter().map(ToString::to_string).collect();
        ModError::not_found(format!("all of {}", all.join(", ")), &self.options.source)
    }

    /// A lookup came back empty. Name every requirement that shaped it.
    fn not_found(&self, work: &Work, requirement: &Requirement, error: ModError) -> ModError {
        match work.demands.get(&requirement.key()) {
            Some(demands) if demands.len() > 1 => self.unsatisfiable(demands),
            _ => error,
        }
    }

    /// Record a requirement on a module and make sure the plan will satisfy
    /// it, together with every other requirement on the same module.
    fn demand(
        &mut self,
        work: &mut Work,
        requirement: Requirement,
        parent: Option<(String, String)>,
    ) -> Result<(), ModError> {
        let requirement = self.apply_prerelease(requirement);
        let key = requirement.key();
        work.demands
            .entry(key.clone())
            .or_default()
            .push(Demand { requirement, parent });

        let Some(wanted) = self.wanted(work, &key)? else {
            return Ok(());
        };

        if let Some(planned) = self.plan.get(&key) {
            if wanted.is_satisfied_by(planned.version(), self.options.strict) {
                trace!(requirement = %wanted, planned = %planned, "Satisfied by plan");
                return Ok(());
            }
            self.reresolve(work, &key, &wanted)?;
        }

        if work.lookup_pending(&key) {
            // The completion is checked against the merged requirement.
            trace!(requirement = %wanted, "Lookup already pending");
            return Ok(());
        }
        self.seek(work, wanted)
    }

    /// Satisfy `wanted` locally or start a registry lookup for it.
    fn seek(&self, work: &mut Work, wanted: Requirement) -> Result<(), ModError> {
        match find_local(
            &wanted,
            &self.options.search_paths,
            self.options.update,
            self.options.strict,
        )? {
            Some(LocalMatch::Accepted(local)) => {
                debug!(requirement = %wanted, local = %local, "Satisfied locally");
                return Ok(());
            }
            Some(LocalMatch::Fallback(local)) => {
                work.fallbacks.insert(local.key(), local);
            }
            None => {}
        }
        self.spawn(work, wanted);
        Ok(())
    }

    /// Drop the planned entry for `key` so it can be resolved again against
    /// a narrower requirement.
    fn reresolve(&mut self, work: &mut Work, key: &str, wanted: &Requirement) -> Result<(), ModError> {
        let attempts = work.reresolves.entry(key.to_string()).or_default();
        *attempts += 1;
        if *attempts > MAX_RERESOLVES {
            return Err(match self.plan.get(key) {
                Some(planned) => conflict(wanted, planned),
                None => ModError::conflict(format!("{wanted} keeps changing during resolution")),
            });
        }
        if let Some(planned) = self.plan.get(key) {
            debug!(planned = %planned, requirement = %wanted, "Re-resolving");
        }
        self.retract(work, key);
        Ok(())
    }

    /// Remove `key` from the plan along with the requirements it declared.
    /// Modules left with no requirement at all are removed in turn.
    fn retract(&mut self, work: &mut Work, key: &str) {
        let Some(removed) = self.plan.remove(key) else {
            return;
        };
        trace!(module = %removed, "Retracted");

        let mut orphans = Vec::new();
        work.demands.retain(|name, demands| {
            demands.retain(|d| d.parent.as_ref().map(|(k, _)| k.as_str()) != Some(key));
            if demands.is_empty() {
                orphans.push(name.clone());
                false
            } else {
                true
            }
        });
        for orphan in orphans {
            self.retract(work, &orphan);
        }
    }

    fn spawn(&self, work: &mut Work, requirement: Requirement) {
        let id = work.next_id;
        work.next_id += 1;
        work.in_flight.insert(id, requirement.clone());

        let registry = self.registry.clone();
        let source = self.options.source.clone();
        let strict = self.options.strict;
        let token = self.token.child_token();

        debug!(requirement = %requirement, "Looking up");
        work.tasks.spawn(async move {
            let result = lookup(&registry, &source, &requirement, strict, &token).await;
            (id, result)
        });
    }

    fn apply(&mut self, work: &mut Work, resolution: Resolution) -> Result<(), ModError> {
        let Resolution {
            module,
            dependencies,
        } = resolution;
        let key = module.key();

        let Some(wanted) = self.wanted(work, &key)? else {
            trace!(module = %module, "No longer required");
            return Ok(());
        };

        if let Some(planned) = self.plan.get(&key) {
            trace!(module = %module, planned = %planned, "Already planned");
            return Ok(());
        }

        if !wanted.is_satisfied_by(module.version(), self.options.strict) {
            if work.lookup_pending(&key) {
                trace!(module = %module, requirement = %wanted, "Waiting for pending lookup");
                return Ok(());
            }
            debug!(module = %module, requirement = %wanted, "Requirement narrowed during lookup");
            return self.seek(work, wanted);
        }

        if let Some(local) = work.fallbacks.get(&key) {
            if local.version() == module.version() {
                debug!(module = %module, "Newest version is already installed");
                return Ok(());
            }
        }

        let module = module.with_guid(wanted.guid().map(str::to_string));
        info!(module = %module, "Resolved");
        let parent = (key, module.to_string());
        if self.plan.insert(module).is_err() {
            return Err(ModError::invariant(format!("{} was planned twice", parent.1)));
        }

        for dependency in dependencies {
            self.demand(work, dependency, Some(parent.clone()))
                .map_err(|e| e.context(format!("dependency of {}", parent.1)))?;
        }
        Ok(())
    }
}

fn conflict(requirement: &Requirement, planned: &ResolvedModule) -> ModError {
    ModError::conflict(format!(
        "{requirement} is not satisfied by already planned {planned}"
    ))
}

/// Find the best registry version for `requirement`.
///
/// Inlined catalog data is tried first, then referenced pages whose interval
/// overlaps the range, highest page first.
async fn lookup(
    registry: &RegistryClient,
    source: &str,
    requirement: &Requirement,
    strict: bool,
    token: &CancellationToken,
) -> Result<Resolution, ModError> {
    let (url, index) = registry
        .fetch_registration(source, requirement.name(), token)
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => ModError::not_found(requirement, source),
            _ => e.context(requirement),
        })?;

    if let Some(leaf) = select_leaf(index.inlined_leaves(), requirement, strict)? {
        return resolution(requirement, leaf);
    }

    for page in index.candidate_pages(requirement.range()) {
        let page = registry
            .fetch_page(page, token)
            .await
            .map_err(|e| e.context(requirement))?;
        if let Some(leaf) = select_leaf(page.items.iter().flatten(), requirement, strict)? {
            return resolution(requirement, leaf);
        }
    }

    Err(ModError::not_found(requirement, &url))
}

fn resolution(requirement: &Requirement, leaf: &RegistrationLeaf) -> Result<Resolution, ModError> {
    let entry = &leaf.catalog_entry;
    let version = Version::parse(&entry.version)?;
    let url = leaf.content_url().ok_or_else(|| {
        ModError::transport(format!(
            "Catalog entry {}@{} has no package content URL",
            entry.id, entry.version
        ))
    })?;

    Ok(Resolution {
        module: ResolvedModule::remote(entry.id.clone(), version, url)
            .with_guid(requirement.guid().map(str::to_string)),
        dependencies: entry.dependencies()?,
    })
}
