//! Depth-first traversal of the archive base.
//!
//! [`Walk`] is a lazy, single-pass iterator over the non-directory entries an
//! [`EntryFilter`] accepts. Directories are never yielded; rejected ones are
//! not descended into. Symbolic links are reported as entries, never followed.

use crate::error::{Error, Result};
use crate::filter::{Decision, EntryFilter};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// An accepted entry, before it has been stat'ed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the walk base.
    pub relative: PathBuf,
}

impl Candidate {
    /// The relative path with `/` separators, as stored in the archive.
    pub fn name(&self) -> String {
        slash_path(&self.relative)
    }
}

/// Joins path components with `/` regardless of the host separator.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Lazy filtered walk of a directory tree.
pub struct Walk<'a> {
    base: PathBuf,
    filter: &'a EntryFilter,
    inner: walkdir::IntoIter,
}

impl<'a> Walk<'a> {
    pub fn new(base: &Path, filter: &'a EntryFilter) -> Self {
        Self {
            base: base.to_path_buf(),
            filter,
            inner: WalkDir::new(base).follow_links(false).into_iter(),
        }
    }

    /// Converts a traversal error into a fatal error, or `None` when the
    /// entry should just be skipped.
    fn classify(&self, err: walkdir::Error) -> Option<Error> {
        let depth = err.depth();
        let path = err
            .path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base.clone());
        let kind = err.io_error().map(io::Error::kind);

        if depth > 0 {
            match kind {
                Some(io::ErrorKind::NotFound) => {
                    debug!(path = %path.display(), "entry disappeared during walk; skipping");
                    return None;
                }
                Some(io::ErrorKind::PermissionDenied) => {
                    warn!(path = %path.display(), "permission denied during walk; skipping");
                    return None;
                }
                _ => {}
            }
        }

        Some(Error::walk(path, io::Error::from(err)))
    }
}

impl Iterator for Walk<'_> {
    type Item = Result<Candidate>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => match self.classify(err) {
                    Some(fatal) => return Some(Err(fatal)),
                    None => continue,
                },
            };

            // The base itself is never an archive entry.
            if entry.depth() == 0 {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&self.base).map(Path::to_path_buf)
            else {
                continue;
            };
            let is_dir = entry.file_type().is_dir();

            match self.filter.decide(entry.path(), &relative, is_dir) {
                Decision::Prune => {
                    if is_dir {
                        self.inner.skip_current_dir();
                    }
                }
                Decision::Exclude => {}
                Decision::Include if is_dir => {}
                Decision::Include => {
                    return Some(Ok(Candidate {
                        path: entry.into_path(),
                        relative,
                    }));
                }
            }
        }
    }
}
