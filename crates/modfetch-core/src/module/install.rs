//! Concurrent module installation.
//!
//! Downloads are streamed straight into extraction workers; nothing is
//! buffered to a temp file. Each target directory holds an `.incomplete`
//! marker for as long as it is being written, so an interrupted install is
//! recognised and reclaimed by the next run.
//!
//! ```text
//! <destination>/<Name>/<Version>/
//!     <Name>.manifest
//!     .incomplete        (only while extracting)
//! ```

use super::error::{codes, ErrorKind, ModError};
use super::inventory::find_child_dir;
use super::manifest::scan_manifest;
use super::plan::{DownloadLocation, InstallationPlan, ResolvedModule};
use super::registry::RegistryClient;
use super::tarball::{extract_tgz_to, strip_packaging_artifacts};
use crate::config::Config;
use futures::{StreamExt, TryStreamExt};
use std::cmp::Ordering;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinSet;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sentinel present while a module directory is being written.
pub const INCOMPLETE_MARKER: &str = ".incomplete";

/// Options for installation.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Root directory modules are installed into.
    pub destination: PathBuf,
    /// Reinstalling an identical version is a no-op instead of an error.
    pub update: bool,
    /// Concurrent streaming downloads.
    pub max_downloads: usize,
    /// Extraction worker threads.
    pub extract_workers: usize,
}

impl InstallOptions {
    pub fn from_config(config: &Config) -> Result<Self, ModError> {
        let destination = config.destination.clone().ok_or_else(|| {
            ModError::io("No install destination configured (use --destination or MODFETCH_DESTINATION)")
        })?;
        Ok(Self {
            destination,
            update: config.update,
            max_downloads: config.max_downloads,
            extract_workers: config.extract_workers,
        })
    }
}

/// What to do with an existing target directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prepared {
    Proceed,
    AlreadyInstalled,
}

/// Shared per-run state handed to each module task.
#[derive(Clone)]
struct Job {
    registry: RegistryClient,
    destination: PathBuf,
    update: bool,
    downloads: Arc<Semaphore>,
    workers: Arc<rayon::ThreadPool>,
    token: CancellationToken,
}

/// Installs a resolved plan.
pub struct Installer {
    registry: RegistryClient,
    options: InstallOptions,
    workers: Arc<rayon::ThreadPool>,
    token: CancellationToken,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("options", &self.options)
            .field("workers", &self.workers.current_num_threads())
            .finish_non_exhaustive()
    }
}

impl Installer {
    pub fn new(registry: RegistryClient, options: InstallOptions) -> Result<Self, ModError> {
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(options.extract_workers.max(1))
            .thread_name(|i| format!("modfetch-extract-{i}"))
            .build()
            .map_err(|e| ModError::io(format!("Failed to start extraction workers: {e}")))?;

        Ok(Self {
            registry,
            options,
            workers: Arc::new(workers),
            token: CancellationToken::new(),
        })
    }

    /// Use an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    #[must_use]
    pub fn options(&self) -> &InstallOptions {
        &self.options
    }

    /// Install every module in `plan`.
    ///
    /// One module failing does not stop the others; failures are reported
    /// together once all modules finish. Returns the installed modules with
    /// their final directories.
    pub async fn install(&self, plan: &InstallationPlan) -> Result<Vec<ResolvedModule>, ModError> {
        fs::create_dir_all(&self.options.destination).map_err(|e| {
            ModError::io(format!(
                "Cannot create destination {}: {e}",
                self.options.destination.display()
            ))
        })?;

        let job = Job {
            registry: self.registry.clone(),
            destination: self.options.destination.clone(),
            update: self.options.update,
            downloads: Arc::new(Semaphore::new(self.options.max_downloads.max(1))),
            workers: Arc::clone(&self.workers),
            token: self.token.clone(),
        };

        let mut tasks = JoinSet::new();
        for module in plan.iter().cloned() {
            let job = job.clone();
            tasks.spawn(async move {
                let label = module.to_string();
                (label, install_module(job, module).await)
            });
        }

        let mut installed = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Some(module)))) => installed.push(module),
                Ok((label, Ok(None))) => debug!(module = %label, "Already installed"),
                Ok((label, Err(e))) => {
                    if e.kind() != ErrorKind::Cancelled {
                        warn!(module = %label, error = %e, "Install failed");
                    }
                    failures.push(e.context(label));
                }
                Err(e) => failures.push(ModError::invariant(format!("Install task failed: {e}"))),
            }
        }

        if self.token.is_cancelled() {
            return Err(ModError::cancelled());
        }
        if let Some(fatal) = failures.iter().find(|e| e.code() == codes::MOD_INVARIANT) {
            return Err(fatal.clone());
        }
        if !failures.is_empty() {
            return Err(ModError::install_failed(failures));
        }

        installed.sort_by_key(ResolvedModule::key);
        info!(modules = installed.len(), "Install complete");
        Ok(installed)
    }
}

async fn install_module(job: Job, mut module: ResolvedModule) -> Result<Option<ResolvedModule>, ModError> {
    let url = match module.location() {
        DownloadLocation::Remote(url) => url.clone(),
        DownloadLocation::Local(dir) => {
            let dir = dir.clone();
            module.set_install_path(dir);
            return Ok(Some(module));
        }
    };

    let destination = job.destination.clone();
    let planned = module.clone();
    let update = job.update;
    let (target, prepared) = tokio::task::spawn_blocking(move || {
        let module_dir = find_child_dir(&destination, planned.name())
            .unwrap_or_else(|| destination.join(planned.name()));
        let target = module_dir.join(planned.version().folder_name());
        prepare_target(&target, &planned, update).map(|prepared| (target, prepared))
    })
    .await
    .map_err(|e| ModError::invariant(format!("Prepare task failed: {e}")))??;

    if prepared == Prepared::AlreadyInstalled {
        return Ok(None);
    }

    let permit = tokio::select! {
        biased;
        () = job.token.cancelled() => return Err(ModError::cancelled()),
        permit = Arc::clone(&job.downloads).acquire_owned() => permit
            .map_err(|_| ModError::invariant("Download limiter closed"))?,
    };

    let response = job.registry.download(&url, &job.token).await?;
    let body = response
        .bytes_stream()
        .map_err(io::Error::other)
        .take_until(job.token.clone().cancelled_owned());
    let reader = SyncIoBridge::new(StreamReader::new(Box::pin(body)));

    let (tx, rx) = oneshot::channel();
    let worker_target = target.clone();
    let worker_module = module.clone();
    let token = job.token.clone();
    job.workers.spawn(move || {
        let result = extract_module(reader, &worker_target, &worker_module, &token);
        let _ = tx.send(result);
    });

    let result = rx
        .await
        .map_err(|_| ModError::invariant("Extraction worker exited without a result"))?;
    drop(permit);

    let final_dir = result?;
    info!(module = %module, path = %final_dir.display(), "Installed");
    module.set_install_path(final_dir);
    Ok(Some(module))
}

/// Reclaim wreckage and decide whether `target` needs installing. Blocking.
fn prepare_target(target: &Path, module: &ResolvedModule, update: bool) -> Result<Prepared, ModError> {
    if target.join(INCOMPLETE_MARKER).exists() {
        warn!(path = %target.display(), "Removing interrupted install");
        fs::remove_dir_all(target)?;
        return Ok(Prepared::Proceed);
    }
    if !target.exists() {
        return Ok(Prepared::Proceed);
    }

    let existing = match scan_manifest(target, module.name()) {
        Ok(summary) => summary.version,
        Err(e) => {
            warn!(path = %target.display(), error = %e, "Removing unreadable install");
            fs::remove_dir_all(target)?;
            return Ok(Prepared::Proceed);
        }
    };

    match existing.as_semver().cmp_precedence(module.version().as_semver()) {
        Ordering::Equal if update => Ok(Prepared::AlreadyInstalled),
        Ordering::Equal => Err(ModError::invariant(format!(
            "{module} is already installed at {}",
            target.display()
        ))),
        Ordering::Greater => Err(ModError::conflict(format!(
            "{} holds {existing}, newer than planned {module}; remove it manually to downgrade",
            target.display()
        ))),
        Ordering::Less => {
            debug!(path = %target.display(), %existing, "Replacing older install");
            fs::remove_dir_all(target)?;
            Ok(Prepared::Proceed)
        }
    }
}

/// Extract one package into `target`. Runs on an extraction worker.
///
/// On failure the directory is removed; if that removal fails the marker
/// left behind lets the next run reclaim it.
fn extract_module<R: Read>(
    reader: R,
    target: &Path,
    module: &ResolvedModule,
    token: &CancellationToken,
) -> Result<PathBuf, ModError> {
    fs::create_dir_all(target)?;
    fs::write(target.join(INCOMPLETE_MARKER), b"")?;

    let mut current = target.to_path_buf();
    let result = populate(reader, &mut current, module, token);

    match result {
        Ok(()) => {
            fs::remove_file(current.join(INCOMPLETE_MARKER))?;
            Ok(current)
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_dir_all(&current) {
                warn!(path = %current.display(), error = %cleanup, "Failed to clean up");
            }
            if token.is_cancelled() {
                Err(ModError::cancelled())
            } else {
                Err(e)
            }
        }
    }
}

fn populate<R: Read>(
    reader: R,
    current: &mut PathBuf,
    module: &ResolvedModule,
    token: &CancellationToken,
) -> Result<(), ModError> {
    let files = extract_tgz_to(reader, current, INCOMPLETE_MARKER, token)?;
    debug!(module = %module, files, "Extracted");

    let summary = scan_manifest(current, module.name())?;

    if let Some(wanted) = module.guid() {
        if summary.guid.as_deref() != Some(wanted) {
            return Err(ModError::corruption(format!(
                "{module}: GUID mismatch (expected {wanted}, package has {})",
                summary.guid.as_deref().unwrap_or("none")
            )));
        }
    }

    let folder = summary.version.folder_name();
    if current.file_name().and_then(|n| n.to_str()) != Some(folder.as_str()) {
        let renamed = current
            .parent()
            .map(|parent| parent.join(&folder))
            .ok_or_else(|| ModError::invariant(format!("{} has no parent", current.display())))?;
        if renamed.join(INCOMPLETE_MARKER).exists() {
            fs::remove_dir_all(&renamed)?;
        } else if renamed.exists() {
            return Err(ModError::conflict(format!(
                "{module}: package declares {}, which is already installed at {}",
                summary.version,
                renamed.display()
            )));
        }
        warn!(module = %module, actual = %summary.version, "Package version differs from plan");
        fs::rename(&*current, &renamed)?;
        *current = renamed;
    }

    strip_packaging_artifacts(current)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::tarball::tests::build_tgz;
    use crate::module::version::Version;
    use tempfile::TempDir;

    fn module(name: &str, version: &str) -> ResolvedModule {
        ResolvedModule::remote(name, Version::parse(version).unwrap(), "https://example.test/pkg")
    }

    fn seed(target: &Path, name: &str, version: &str) {
        fs::create_dir_all(target).unwrap();
        fs::write(
            target.join(format!("{name}.manifest")),
            format!(r#"{{"version":"{version}"}}"#),
        )
        .unwrap();
    }

    #[test]
    fn test_prepare_removes_incomplete_wreckage() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("Foo").join("1.0.0");
        seed(&target, "Foo", "1.0.0");
        fs::write(target.join(INCOMPLETE_MARKER), b"").unwrap();

        let prepared = prepare_target(&target, &module("Foo", "1.0.0"), false).unwrap();
        assert_eq!(prepared, Prepared::Proceed);
        assert!(!target.exists());
    }

    #[test]
    fn test_prepare_existing_same_version() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("Foo").join("1.0.0");
        seed(&target, "Foo", "1.0.0");

        let err = prepare_target(&target, &module("Foo", "1.0.0"), false).unwrap_err();
        assert_eq!(err.code(), codes::MOD_INVARIANT);

        let prepared = prepare_target(&target, &module("Foo", "1.0.0"), true).unwrap();
        assert_eq!(prepared, Prepared::AlreadyInstalled);
        assert!(target.exists());
    }

    #[test]
    fn test_prepare_two_part_manifest_matches_planned_release() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("Foo").join("1.0.0");
        seed(&target, "Foo", "1.0");

        let prepared = prepare_target(&target, &module("Foo", "1.0.0"), true).unwrap();
        assert_eq!(prepared, Prepared::AlreadyInstalled);
        assert!(target.join("Foo.manifest").is_file());
    }

    #[test]
    fn test_prepare_existing_newer_is_rejected() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("Foo").join("2.0.0");
        seed(&target, "Foo", "2.0.0");

        let err = prepare_target(&target, &module("Foo", "2.0.0-beta1"), false).unwrap_err();
        assert_eq!(err.code(), codes::MOD_CONFLICT);
        assert!(target.exists());
    }

    #[test]
    fn test_prepare_existing_older_is_replaced() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("Foo").join("2.0.0");
        seed(&target, "Foo", "2.0.0-beta1");

        let prepared = prepare_target(&target, &module("Foo", "2.0.0"), false).unwrap();
        assert_eq!(prepared, Prepared::Proceed);
        assert!(!target.exists());
    }

    #[test]
    fn test_extract_module_renames_to_manifest_version() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("Foo").join("1.0.0");
        let tgz = build_tgz(&[
            ("Foo.manifest", br#"{"version":"1.0.1"}"#),
            ("Foo.nuspec", b"<package/>"),
        ]);

        let dir = extract_module(&tgz[..], &target, &module("Foo", "1.0.0"), &CancellationToken::new())
            .unwrap();
        assert_eq!(dir, root.path().join("Foo").join("1.0.1"));
        assert!(!target.exists());
        assert!(dir.join("Foo.manifest").is_file());
        assert!(!dir.join("Foo.nuspec").exists());
        assert!(!dir.join(INCOMPLETE_MARKER).exists());
    }

    #[test]
    fn test_extract_module_guid_mismatch_removes_directory() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("Foo").join("1.0.0");
        let tgz = build_tgz(&[("Foo.manifest", br#"{"version":"1.0.0","guid":"bbbb"}"#)]);
        let pinned = module("Foo", "1.0.0").with_guid(Some("aaaa".to_string()));

        let err = extract_module(&tgz[..], &target, &pinned, &CancellationToken::new()).unwrap_err();
        assert_eq!(err.code(), codes::MOD_CORRUPTION);
        assert!(err.message().contains("GUID mismatch"));
        assert!(!target.exists());
    }

    #[test]
    fn test_extract_module_without_manifest_fails() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("Foo").join("1.0.0");
        let tgz = build_tgz(&[("readme.txt", b"hi")]);

        let err = extract_module(&tgz[..], &target, &module("Foo", "1.0.0"), &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.code(), codes::MOD_CORRUPTION);
        assert!(!target.exists());
    }

    #[test]
    fn test_options_require_destination() {
        let err = InstallOptions::from_config(&Config::default()).unwrap_err();
        assert_eq!(err.code(), codes::MOD_IO);

        let options =
            InstallOptions::from_config(&Config::default().with_destination("/tmp/modules")).unwrap();
        assert_eq!(options.destination, PathBuf::from("/tmp/modules"));
    }
}
