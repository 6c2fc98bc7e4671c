//! Package archive extraction.
//!
//! Package content is a gzip-compressed tar stream with entries at the
//! archive root. Extraction reads straight from the download stream.

use super::error::ModError;
use flate2::read::GzDecoder;
use std::cell::Cell;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Top-level directories that only matter to the packaging format.
const PACKAGING_DIRS: &[&str] = &["_rels", "package"];

/// Top-level files that only matter to the packaging format.
const PACKAGING_FILES: &[&str] = &["[Content_Types].xml"];

/// Extension of the packaging metadata file.
const PACKAGING_EXT: &str = "nuspec";

/// Reader or writer that remembers whether the wrapped stream ever failed.
struct Watched<'a, T> {
    inner: T,
    failed: &'a Cell<bool>,
}

impl<T> Watched<'_, T> {
    fn note<V>(&self, result: io::Result<V>) -> io::Result<V> {
        if let Err(e) = &result {
            if e.kind() != io::ErrorKind::Interrupted {
                self.failed.set(true);
            }
        }
        result
    }
}

impl<R: Read> Read for Watched<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.inner.read(buf);
        self.note(result)
    }
}

impl<W: Write> Write for Watched<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.inner.write(buf);
        self.note(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.inner.flush();
        self.note(result)
    }
}

/// Map a read error while walking the archive. Failures of the package
/// stream itself are transport errors; anything the decoders reject is
/// corruption.
fn read_error(source_failed: &Cell<bool>, what: &str, e: io::Error) -> ModError {
    if source_failed.get() {
        ModError::transport(format!("Failed to read package stream: {e}"))
    } else {
        ModError::corruption(format!("Failed to read {what}: {e}"))
    }
}

/// Extract a `.tgz` stream into `dest`, which must already exist.
///
/// Entries with absolute paths or `..` components are rejected. Symlinks and
/// other special entries are skipped. `skip` names a top-level file that the
/// archive must not overwrite. Cancellation is checked between entries.
///
/// Returns the number of files written.
pub fn extract_tgz_to<R: Read>(
    reader: R,
    dest: &Path,
    skip: &str,
    token: &CancellationToken,
) -> Result<usize, ModError> {
    let source_failed = Cell::new(false);
    let mut archive = Archive::new(GzDecoder::new(Watched {
        inner: reader,
        failed: &source_failed,
    }));
    let mut files = 0;

    let entries = archive
        .entries()
        .map_err(|e| read_error(&source_failed, "archive entries", e))?;

    for entry in entries {
        if token.is_cancelled() {
            return Err(ModError::cancelled());
        }

        let mut entry = entry.map_err(|e| read_error(&source_failed, "archive entry", e))?;
        let path = entry
            .path()
            .map_err(|e| ModError::corruption(format!("Failed to read entry path: {e}")))?
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect::<PathBuf>();
        let shown = path.to_string_lossy();
        if path.as_os_str().is_empty() {
            continue;
        }

        if path.is_absolute() {
            return Err(ModError::corruption(format!(
                "Archive contains absolute path: {shown}"
            )));
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(ModError::corruption(format!(
                "Archive contains path traversal: {shown}"
            )));
        }

        let dest_path = dest.join(&path);
        if !dest_path.starts_with(dest) {
            return Err(ModError::corruption(format!(
                "Archive entry escapes destination: {shown}"
            )));
        }
        if path.as_os_str() == skip {
            trace!(path = %shown, "Skipping reserved entry");
            continue;
        }

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(&dest_path)?;
        } else if kind.is_file() {
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let write_failed = Cell::new(false);
            let mut file = Watched {
                inner: File::create(&dest_path)?,
                failed: &write_failed,
            };
            io::copy(&mut entry, &mut file).map_err(|e| {
                if write_failed.get() {
                    ModError::from(e)
                } else {
                    read_error(&source_failed, &format!("entry {shown}"), e)
                }
            })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(mode) = entry.header().mode() {
                    let permissions = fs::Permissions::from_mode(mode | 0o600);
                    if let Err(e) = fs::set_permissions(&dest_path, permissions) {
                        warn!(path = %dest_path.display(), error = %e, "Failed to set file mode");
                    }
                }
            }
            files += 1;
        } else {
            trace!(path = %shown, "Skipping special entry");
        }
    }

    Ok(files)
}

/// Remove packaging-only artifacts from an extracted module directory.
pub fn strip_packaging_artifacts(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let path = entry.path();

        if entry.file_type()?.is_dir() {
            if PACKAGING_DIRS.contains(&name) {
                fs::remove_dir_all(&path)?;
            }
        } else if PACKAGING_FILES.contains(&name)
            || Path::new(name)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(PACKAGING_EXT))
        {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
