//! Module manager error types.

use std::fmt;
use std::io;

/// Module manager error codes.
pub mod codes {
    pub const MOD_VERSION_INVALID: &str = "MOD_VERSION_INVALID";
    pub const MOD_RANGE_INVALID: &str = "MOD_RANGE_INVALID";
    pub const MOD_REQUIREMENT_INVALID: &str = "MOD_REQUIREMENT_INVALID";
    pub const MOD_NOT_FOUND: &str = "MOD_NOT_FOUND";
    pub const MOD_TRANSPORT: &str = "MOD_TRANSPORT";
    pub const MOD_CORRUPTION: &str = "MOD_CORRUPTION";
    pub const MOD_INVARIANT: &str = "MOD_INVARIANT";
    pub const MOD_CONFLICT: &str = "MOD_CONFLICT";
    pub const MOD_CANCELLED: &str = "MOD_CANCELLED";
    pub const MOD_IO: &str = "MOD_IO";
    pub const MOD_INSTALL_FAILED: &str = "MOD_INSTALL_FAILED";
}

/// Error class, independent of the concrete code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed version, range or requirement input.
    Invalid,
    /// No registry version satisfies a requirement.
    NotFound,
    /// Network or HTTP failure other than 404.
    Transport,
    /// Broken local state (manifest, GUID mismatch).
    Corruption,
    /// Internal bug state, or a dependency conflict the planner refuses to guess at.
    Invariant,
    /// The operation was cancelled.
    Cancelled,
    /// Local filesystem failure.
    Io,
    /// Several per-module failures reported together.
    Aggregate,
}

/// Module manager error.
#[derive(Debug, Clone)]
pub struct ModError {
    code: &'static str,
    message: String,
    related: Vec<ModError>,
}

impl ModError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            related: Vec::new(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Per-module errors carried by an aggregate.
    #[must_use]
    pub fn related(&self) -> &[ModError] {
        &self.related
    }

    /// Classify the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self.code {
            codes::MOD_VERSION_INVALID | codes::MOD_RANGE_INVALID | codes::MOD_REQUIREMENT_INVALID => {
                ErrorKind::Invalid
            }
            codes::MOD_NOT_FOUND => ErrorKind::NotFound,
            codes::MOD_TRANSPORT => ErrorKind::Transport,
            codes::MOD_CORRUPTION => ErrorKind::Corruption,
            codes::MOD_CANCELLED => ErrorKind::Cancelled,
            codes::MOD_IO => ErrorKind::Io,
            codes::MOD_INSTALL_FAILED => ErrorKind::Aggregate,
            _ => ErrorKind::Invariant,
        }
    }

    pub fn invalid_version(input: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            codes::MOD_VERSION_INVALID,
            format!("Invalid version '{input}': {reason}"),
        )
    }

    pub fn invalid_range(input: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            codes::MOD_RANGE_INVALID,
            format!("Invalid version range '{input}': {reason}"),
        )
    }

    pub fn invalid_requirement(input: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            codes::MOD_REQUIREMENT_INVALID,
            format!("Invalid module requirement '{input}': {reason}"),
        )
    }

    /// No version satisfies `requirement` at `source`.
    #[must_use]
    pub fn not_found(requirement: impl fmt::Display, source: &str) -> Self {
        Self::new(
            codes::MOD_NOT_FOUND,
            format!("No version satisfying {requirement} was found at {source}"),
        )
    }

    /// The registry answered 404 for `url`.
    #[must_use]
    pub fn not_found_url(url: &str) -> Self {
        Self::new(codes::MOD_NOT_FOUND, format!("Registry returned 404 for {url}"))
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::new(codes::MOD_TRANSPORT, msg)
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::new(codes::MOD_CORRUPTION, msg)
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::new(codes::MOD_INVARIANT, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(codes::MOD_CONFLICT, msg)
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(codes::MOD_CANCELLED, "Operation was cancelled")
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(codes::MOD_IO, msg)
    }

    /// Combine per-module failures into one error.
    #[must_use]
    pub fn install_failed(failures: Vec<ModError>) -> Self {
        let mut message = format!("{} module(s) failed to install", failures.len());
        for failure in &failures {
            message.push_str("\n  - ");
            message.push_str(&failure.to_string());
        }
        Self {
            code: codes::MOD_INSTALL_FAILED,
            message,
            related: failures,
        }
    }

    /// Prefix the message with extra context, keeping the code.
    #[must_use]
    pub fn context(mut self, context: impl fmt::Display) -> Self {
        self.message = format!("{context}: {}", self.message);
        self
    }
}

impl fmt::Display for ModError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ModError {}

impl From<io::Error> for ModError {
    fn from(e: io::Error) -> Self {
        Self::new(codes::MOD_IO, e.to_string())
    }
}

impl From<reqwest::Error> for ModError {
    fn from(e: reqwest::Error) -> Self {
        let url = e.url().map(|u| u.as_str().to_string()).unwrap_or_default();
        if e.is_timeout() {
            Self::transport(format!("Request timed out: {url}"))
        } else if e.is_connect() {
            Self::transport(format!("Connection failed: {e}"))
        } else {
            Self::transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ModError {
    fn from(e: serde_json::Error) -> Self {
        Self::transport(format!("Invalid JSON: {e}"))
    }
}
