// src/core/resolver.rs

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use thiserror::Error;

use crate::core::search_path::SearchPath;

/// Why a program name could not be resolved against the search path.
///
/// All variants are recoverable: the control loop reports them and moves on.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// No entry of the search path contained the program at all.
    #[error("{0}: command not found")]
    NotFound(String),
    /// The program exists on the search path but is not executable by us.
    #[error("{0}: permission denied")]
    PermissionDenied(String),
    /// The program exists and is executable but is not a regular file.
    #[error("{0}: not a regular file")]
    NotARegularFile(String),
}

/// A verified executable location, fingerprinted at resolution time.
///
/// The device/inode pair captured from `stat` is the only identity proof
/// carried forward to the launcher: the path string alone is never trusted
/// again after this point. The value is exclusively owned and moves from the
/// resolver into the process handle; its buffer is released once, when the
/// final owner drops it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedExecutable {
    full_path: PathBuf,
    device: u64,
    inode: u64,
}

impl ResolvedExecutable {
    /// The absolute path the candidate was found at.
    pub fn full_path(&self) -> &Path {
        &self.full_path
    }

    /// Device id recorded by the resolution-time `stat`.
    pub fn device(&self) -> u64 {
        self.device
    }

    /// Inode recorded by the resolution-time `stat`.
    pub fn inode(&self) -> u64 {
        self.inode
    }
}

/// Resolves `name` against `search_path`; the first qualifying entry wins and
/// later entries are never consulted.
///
/// Each directory yields the candidate `dir/name`, probed for executability
/// before anything else. Expected probe failures (no such entry, permission
/// denied, not a directory, name too long) skip silently to the next entry;
/// any other failure is logged and also skipped. An executable candidate is
/// then `stat`ed and qualifies only as a regular file, at which point its
/// device and inode are captured. Nothing is cached across calls.
pub fn resolve(
    name: &str,
    search_path: SearchPath<'_>,
) -> Result<ResolvedExecutable, ResolveError> {
    let mut saw_permission_denied = false;
    let mut saw_irregular = false;

    for dir in search_path.entries() {
        let candidate = Path::new(dir).join(name);

        if let Err(e) = probe_executable(&candidate) {
            match e.raw_os_error() {
                Some(libc::EACCES) => saw_permission_denied = true,
                Some(libc::ENOENT | libc::ENAMETOOLONG | libc::ENOTDIR) => {}
                _ => warn!("access check failed for '{}': {}", candidate.display(), e),
            }
            continue;
        }

        match fs::metadata(&candidate) {
            Ok(meta) if meta.is_file() => {
                debug!(
                    "resolved '{}' to '{}' (dev {}, ino {})",
                    name,
                    candidate.display(),
                    meta.dev(),
                    meta.ino()
                );
                return Ok(ResolvedExecutable {
                    full_path: candidate,
                    device: meta.dev(),
                    inode: meta.ino(),
                });
            }
            Ok(_) => saw_irregular = true,
            Err(e) => {
                if e.kind() != io::ErrorKind::PermissionDenied {
                    warn!("stat failed for '{}': {}", candidate.display(), e);
                }
            }
        }
    }

    if saw_permission_denied {
        Err(ResolveError::PermissionDenied(name.to_string()))
    } else if saw_irregular {
        Err(ResolveError::NotARegularFile(name.to_string()))
    } else {
        Err(ResolveError::NotFound(name.to_string()))
    }
}

/// `access(2)` with `X_OK`: the cheap executability test that gates the stat.
fn probe_executable(candidate: &Path) -> io::Result<()> {
    let c_path = CString::new(candidate.as_os_str().as_bytes())
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    // Safety: `access` only reads the NUL-terminated path buffer.
    if unsafe { libc::access(c_path.as_ptr(), libc::X_OK) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
