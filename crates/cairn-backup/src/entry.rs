//! Filesystem entries and the tar headers derived from them.

use crate::error::{is_not_found, Error, Result};
use crate::walk::Candidate;
use std::fs::{self, Metadata};
use std::path::PathBuf;
use tar::{EntryType, Header, HeaderMode};
use tracing::{debug, warn};

/// Kind of a stat'ed entry that can be stored in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Symlink,
    Fifo,
    CharDevice,
    BlockDevice,
}

impl EntryKind {
    /// Classifies `meta`, returning `None` for types tar can't represent
    /// (sockets) and for directories, which never get their own entry.
    fn from_metadata(meta: &Metadata) -> Option<Self> {
        let ft = meta.file_type();
        if ft.is_file() {
            return Some(EntryKind::Regular);
        }
        if ft.is_symlink() {
            return Some(EntryKind::Symlink);
        }
        if ft.is_dir() {
            return None;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if ft.is_fifo() {
                return Some(EntryKind::Fifo);
            }
            if ft.is_char_device() {
                return Some(EntryKind::CharDevice);
            }
            if ft.is_block_device() {
                return Some(EntryKind::BlockDevice);
            }
        }

        None
    }

    fn entry_type(self) -> EntryType {
        match self {
            EntryKind::Regular => EntryType::Regular,
            EntryKind::Symlink => EntryType::Symlink,
            EntryKind::Fifo => EntryType::Fifo,
            EntryKind::CharDevice => EntryType::Char,
            EntryKind::BlockDevice => EntryType::Block,
        }
    }
}

/// Snapshot of one entry taken when it was visited.
#[derive(Debug, Clone)]
pub struct FsEntry {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the archive base; stored as the entry name.
    pub relative: PathBuf,
    pub kind: EntryKind,
    /// Bytes of content to archive; 0 for everything but regular files.
    pub size: u64,
    /// Raw link text for symlinks.
    pub link_target: Option<PathBuf>,
    metadata: Metadata,
}

impl FsEntry {
    /// Stats `candidate` without following symlinks.
    ///
    /// Returns `Ok(None)` for entries that should be skipped without error:
    /// entries that vanished, sockets, and symlinks whose target can't be read
    /// or doesn't exist.
    pub fn stat(candidate: Candidate) -> Result<Option<Self>> {
        let Candidate { path, relative } = candidate;

        let metadata = match fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(e) if is_not_found(&e) => {
                debug!(path = %relative.display(), "entry vanished before stat; skipping");
                return Ok(None);
            }
            Err(e) => return Err(Error::stat(relative, e)),
        };

        let Some(kind) = EntryKind::from_metadata(&metadata) else {
            debug!(path = %relative.display(), "unsupported file type; skipping");
            return Ok(None);
        };

        let link_target = if kind == EntryKind::Symlink {
            match read_symlink(&path, &relative) {
                Some(target) => Some(target),
                None => return Ok(None),
            }
        } else {
            None
        };

        let size = if kind == EntryKind::Regular {
            metadata.len()
        } else {
            0
        };

        Ok(Some(Self {
            path,
            relative,
            kind,
            size,
            link_target,
            metadata,
        }))
    }

    /// Builds the GNU tar header for this entry. The name and link target are
    /// filled in when the header is appended, so long paths get the GNU
    /// long-name records they need.
    pub fn header(&self) -> Header {
        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(&self.metadata, HeaderMode::Complete);
        header.set_entry_type(self.kind.entry_type());
        header.set_size(self.size);
        header
    }
}

/// Reads a symlink's target. Links whose target can't be read or doesn't
/// resolve are skipped; only unexpected failures are worth a warning.
fn read_symlink(path: &std::path::Path, relative: &std::path::Path) -> Option<PathBuf> {
    let target = match fs::read_link(path) {
        Ok(target) => target,
        Err(e) if is_not_found(&e) => return None,
        Err(e) => {
            warn!(
                path = %relative.display(),
                readlink_err = %e,
                "failed reading symlink for target path; skipping..."
            );
            return None;
        }
    };

    match fs::metadata(path) {
        Ok(_) => Some(target),
        Err(e) if is_not_found(&e) => {
            debug!(path = %relative.display(), "dangling symlink; skipping");
            None
        }
        Err(e) => {
            warn!(
                path = %relative.display(),
                readlink_err = %e,
                "failed resolving symlink target; skipping..."
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn candidate(dir: &TempDir, rel: &str) -> Candidate {
        Candidate {
            path: dir.path().join(rel),
            relative: PathBuf::from(rel),
        }
    }

    #[test]
    fn test_regular_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("data.bin"), vec![7u8; 1500]).unwrap();

        let entry = FsEntry::stat(candidate(&dir, "data.bin")).unwrap().unwrap();
        assert_eq!(entry.kind, EntryKind::Regular);
        assert_eq!(entry.size, 1500);
        assert!(entry.link_target.is_none());

        let header = entry.header();
        assert_eq!(header.entry_type(), EntryType::Regular);
        assert_eq!(header.size().unwrap(), 1500);
    }

    #[test]
    fn test_vanished_entry_is_skipped() {
        let dir = TempDir::new().unwrap();
        assert!(FsEntry::stat(candidate(&dir, "gone.txt")).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("target.txt"), "hello").unwrap();
        std::os::unix::fs::symlink("target.txt", dir.path().join("good")).unwrap();
        std::os::unix::fs::symlink("missing.txt", dir.path().join("dangling")).unwrap();

        let entry = FsEntry::stat(candidate(&dir, "good")).unwrap().unwrap();
        assert_eq!(entry.kind, EntryKind::Symlink);
        assert_eq!(entry.size, 0);
        assert_eq!(entry.link_target, Some(PathBuf::from("target.txt")));
        assert_eq!(entry.header().entry_type(), EntryType::Symlink);

        assert!(FsEntry::stat(candidate(&dir, "dangling")).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_sockets_are_skipped() {
        let dir = TempDir::new().unwrap();
        let _listener = std::os::unix::net::UnixListener::bind(dir.path().join("app.sock")).unwrap();
        assert!(FsEntry::stat(candidate(&dir, "app.sock")).unwrap().is_none());
    }
}
