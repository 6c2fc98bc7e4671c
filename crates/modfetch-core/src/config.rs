use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default registry service index.
pub const DEFAULT_SOURCE: &str = "https://pwsh.gallery/index.json";

/// Environment variable to override the registry source.
pub const SOURCE_ENV: &str = "MODFETCH_SOURCE";

/// Environment variable to set the install destination.
pub const DESTINATION_ENV: &str = "MODFETCH_DESTINATION";

/// Default number of concurrent package downloads.
pub const DEFAULT_MAX_DOWNLOADS: usize = 16;

/// Default per-request timeout for registry calls.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default resolver poll interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Runtime configuration for modfetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Registry service index URL.
    pub source: String,

    /// Directory modules are installed into.
    pub destination: Option<PathBuf>,

    /// Additional module directories scanned for already-installed versions.
    pub search_paths: Vec<PathBuf>,

    /// Prefer the newest remote version over satisfying local installs.
    pub update: bool,

    /// Allow prerelease versions for every requirement.
    pub prerelease: bool,

    /// Use literal SemVer2 range comparison.
    pub strict: bool,

    /// Concurrent streaming downloads.
    pub max_downloads: usize,

    /// Extraction worker pool size.
    pub extract_workers: usize,

    /// Per-request timeout, in seconds.
    pub request_timeout_secs: u64,

    /// How often the resolver wakes up to check for cancellation, in milliseconds.
    pub poll_interval_ms: u64,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,
}

/// Get number of CPUs (clamped to 1..=64).
#[must_use]
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
        .clamp(1, 64)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            destination: None,
            search_paths: Vec::new(),
            update: false,
            prerelease: false,
            strict: false,
            max_downloads: DEFAULT_MAX_DOWNLOADS,
            extract_workers: num_cpus(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            json_logs: false,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Load a config file (JSON). Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `MODFETCH_SOURCE` and `MODFETCH_DESTINATION` if set.
    #[must_use]
    pub fn apply_env(mut self) -> Self {
        if let Ok(source) = std::env::var(SOURCE_ENV) {
            if !source.trim().is_empty() {
                self.source = source;
            }
        }
        if let Ok(dest) = std::env::var(DESTINATION_ENV) {
            if !dest.trim().is_empty() {
                self.destination = Some(PathBuf::from(dest));
            }
        }
        self
    }

    /// Reject settings that cannot work.
    pub fn validate(&self) -> Result<(), Error> {
        if self.source.trim().is_empty() {
            return Err(Error::invalid("source must not be empty"));
        }
        if self.max_downloads == 0 {
            return Err(Error::invalid("max_downloads must be at least 1"));
        }
        if self.extract_workers == 0 {
            return Err(Error::invalid("extract_workers must be at least 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::invalid("request_timeout_secs must be at least 1"));
        }
        Ok(())
    }

    /// Set the registry source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Set the install destination.
    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Add a module search path.
    #[must_use]
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    /// Set update mode.
    #[must_use]
    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    /// Set prerelease opt-in.
    #[must_use]
    pub fn with_prerelease(mut self, prerelease: bool) -> Self {
        self.prerelease = prerelease;
        self
    }

    /// Set strict SemVer2 range comparison.
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Per-request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Resolver poll interval as a `Duration`.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Every directory LocalInventory should scan: the destination first,
    /// then the configured search paths, without duplicates.
    #[must_use]
    pub fn all_search_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for path in self.destination.iter().chain(self.search_paths.iter()) {
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }
        paths
    }
}
