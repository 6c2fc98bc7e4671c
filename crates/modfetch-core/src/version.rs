/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User agent sent with every registry request.
pub const USER_AGENT: &str = concat!("modfetch/", env!("CARGO_PKG_VERSION"));

/// Returns a formatted version string.
#[must_use]
pub fn version_string() -> String {
    format!("modfetch {VERSION}")
}
