//! Archive creation.
//!
//! An [`Archive`] describes one backup job: the directory to archive, which of
//! its entries to include, and how the output is written. [`Archive::create`]
//! walks the directory once, depth first, and streams every accepted entry
//! through the writer chain
//!
//! ```text
//! tar::Builder -> GzEncoder -> ProgressWriter? -> RateLimitedWriter? -> File
//! ```
//!
//! so the progress tracker sees exactly the compressed bytes handed to the
//! (possibly throttled) destination. File contents are copied through a single
//! bounded buffer per file, taken from a [`BufferPool`] for anything at least
//! one pool buffer in size.

use crate::checksum::calculate_checksum;
use crate::config::{BackupsConfig, CompressionLevel};
use crate::entry::FsEntry;
use crate::error::{is_not_found, Error, Result};
use crate::filter::EntryFilter;
use crate::limiter::{RateLimitedWriter, TokenBucket};
use crate::pool::BufferPool;
use crate::progress::{Progress, ProgressWriter};
use crate::walk::{Candidate, Walk};
use flate2::write::GzEncoder;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tar::Builder as TarBuilder;
use tracing::{debug, info, warn};

const BLOCK_SIZE: u64 = 512;

/// Lifecycle of a [`Archive::create`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Idle,
    Opening,
    Walking,
    Closing,
    Done,
    Failed,
}

/// Cooperative cancellation flag, checked before each entry is written.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of a successful archive job.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    /// Path of the created archive
    pub archive_path: PathBuf,

    /// Number of entries written
    pub entries: usize,

    /// Entries accepted by the filter but skipped (vanished, unsupported,
    /// unresolvable symlinks)
    pub skipped: usize,

    /// Size of the archive on disk in bytes
    pub size_bytes: u64,

    /// SHA256 of the archive
    pub checksum: String,

    /// Duration of the job in seconds
    pub duration_seconds: f64,
}

#[derive(Debug, Default)]
struct EntryCounts {
    entries: usize,
    skipped: usize,
}

/// One archive job over a directory tree.
#[derive(Debug, Clone)]
pub struct Archive {
    base: PathBuf,
    ignore: Option<String>,
    files: Vec<PathBuf>,
    progress: Option<Arc<Progress>>,
    pool: BufferPool,
    compression: CompressionLevel,
    write_limit_mib: u64,
    cancel: Option<CancellationToken>,
}

impl Archive {
    /// Creates a job archiving everything under `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            ignore: None,
            files: Vec::new(),
            progress: None,
            pool: BufferPool::shared(),
            compression: CompressionLevel::default(),
            write_limit_mib: 0,
            cancel: None,
        }
    }

    /// Sets gitignore-style rules (one per line) for entries to leave out.
    /// Ignored when an explicit file list is set.
    pub fn with_ignore(mut self, rules: impl Into<String>) -> Self {
        self.ignore = Some(rules.into());
        self
    }

    /// Restricts the archive to these paths, absolute or relative to the base.
    pub fn with_files(mut self, files: Vec<PathBuf>) -> Self {
        self.files = files;
        self
    }

    /// Reports compressed bytes written to `progress`.
    pub fn with_progress(mut self, progress: Arc<Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Uses `pool` for large-file copy buffers instead of the shared pool.
    pub fn with_pool(mut self, pool: BufferPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_compression(mut self, level: CompressionLevel) -> Self {
        self.compression = level;
        self
    }

    /// Caps sustained output at `mib_per_sec` MiB/s; 0 disables the cap.
    pub fn with_write_limit(mut self, mib_per_sec: u64) -> Self {
        self.write_limit_mib = mib_per_sec;
        self
    }

    /// Applies compression level and write limit from configuration.
    pub fn with_config(self, config: &BackupsConfig) -> Self {
        self.with_compression(config.compression_level)
            .with_write_limit(config.write_limit_mib())
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn progress(&self) -> Option<&Arc<Progress>> {
        self.progress.as_ref()
    }

    fn resolved_base(&self) -> Result<PathBuf> {
        std::path::absolute(&self.base).map_err(|e| Error::walk(&self.base, e))
    }

    fn filter(&self, base: &Path) -> EntryFilter {
        EntryFilter::for_job(base, self.ignore.as_deref(), &self.files)
    }

    /// Sums the sizes of the regular files this job would archive. Hosts use
    /// it as the total for a [`Progress`] tracker.
    ///
    /// The sum is of uncompressed content, while the tracker counts compressed
    /// output, so a finished job usually stops short of this total. Set the
    /// total to [`Progress::written`] once the job succeeds.
    pub fn estimate_size(&self) -> Result<u64> {
        let base = self.resolved_base()?;
        let filter = self.filter(&base);

        let mut total = 0u64;
        for candidate in Walk::new(&base, &filter) {
            let candidate = candidate?;
            match fs::symlink_metadata(&candidate.path) {
                Ok(meta) if meta.is_file() => total += meta.len(),
                Ok(_) => {}
                Err(e) if is_not_found(&e) => {}
                Err(e) => return Err(Error::stat(candidate.relative, e)),
            }
        }
        Ok(total)
    }

    /// Creates the archive at `dst`, truncating any existing file.
    ///
    /// On failure the partially written destination is left in place for the
    /// caller to remove.
    pub fn create(&self, dst: &Path) -> Result<ArchiveSummary> {
        let start = Instant::now();
        let mut state = ArchiveState::Idle;
        let base = self.resolved_base()?;
        info!(base = %base.display(), destination = %dst.display(), "creating archive");

        match self.run(&base, dst, &mut state) {
            Ok(counts) => {
                transition(&mut state, ArchiveState::Done);
                let size_bytes = fs::metadata(dst).map_err(|e| finish_error(dst, e))?.len();
                let checksum = calculate_checksum(dst).map_err(|e| finish_error(dst, e))?;
                let duration_seconds = start.elapsed().as_secs_f64();

                info!(
                    entries = counts.entries,
                    skipped = counts.skipped,
                    size_bytes,
                    "archive complete"
                );

                Ok(ArchiveSummary {
                    archive_path: dst.to_path_buf(),
                    entries: counts.entries,
                    skipped: counts.skipped,
                    size_bytes,
                    checksum,
                    duration_seconds,
                })
            }
            Err(e) => {
                transition(&mut state, ArchiveState::Failed);
                warn!(error = %e, "archive creation failed");
                Err(e)
            }
        }
    }

    fn run(&self, base: &Path, dst: &Path, state: &mut ArchiveState) -> Result<EntryCounts> {
        transition(state, ArchiveState::Opening);
        let file = open_destination(dst)?;

        let sink: Box<dyn Write> = match TokenBucket::from_mib_per_sec(self.write_limit_mib) {
            Some(bucket) => Box::new(RateLimitedWriter::new(file, bucket)),
            None => Box::new(file),
        };
        let sink: Box<dyn Write> = match &self.progress {
            Some(progress) => Box::new(ProgressWriter::new(sink, Arc::clone(progress))),
            None => sink,
        };
        let mut tar = TarBuilder::new(GzEncoder::new(sink, self.compression.to_flate2()));

        transition(state, ArchiveState::Walking);
        let filter = self.filter(base);
        let mut counts = EntryCounts::default();
        // The destination may live inside the base; it must not archive itself.
        let own = canonical_destination(dst);
        for candidate in Walk::new(base, &filter) {
            let candidate = candidate?;
            if own
                .as_deref()
                .is_some_and(|own| is_destination(own, &candidate.path))
            {
                debug!(path = %candidate.relative.display(), "skipping archive destination");
                continue;
            }
            self.add_to_archive(&mut tar, candidate, &mut counts)?;
        }

        transition(state, ArchiveState::Closing);
        let mut sink = tar
            .into_inner()
            .and_then(GzEncoder::finish)
            .map_err(|e| finish_error(dst, e))?;
        sink.flush().map_err(|e| finish_error(dst, e))?;

        Ok(counts)
    }

    /// Stats one walked entry and writes it.
    fn add_to_archive<W: Write>(
        &self,
        tar: &mut TarBuilder<W>,
        candidate: Candidate,
        counts: &mut EntryCounts,
    ) -> Result<()> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(Error::Cancelled);
        }

        match FsEntry::stat(candidate)? {
            Some(entry) => self.append_entry(tar, &entry, counts),
            None => {
                counts.skipped += 1;
                Ok(())
            }
        }
    }

    /// Writes one stat'ed entry: header, then exactly `size` bytes of content.
    fn append_entry<W: Write>(
        &self,
        tar: &mut TarBuilder<W>,
        entry: &FsEntry,
        counts: &mut EntryCounts,
    ) -> Result<()> {
        let mut header = entry.header();

        if let Some(target) = &entry.link_target {
            tar.append_link(&mut header, &entry.relative, target)
                .map_err(|e| Error::header(&entry.relative, e))?;
            counts.entries += 1;
            return Ok(());
        }

        if entry.size < 1 {
            tar.append_data(&mut header, &entry.relative, io::empty())
                .map_err(|e| Error::header(&entry.relative, e))?;
            counts.entries += 1;
            return Ok(());
        }

        // Open before writing the header so a file deleted in the meantime
        // leaves no dangling header behind.
        let mut file = match File::open(&entry.path) {
            Ok(f) => f,
            Err(e) if is_not_found(&e) => {
                debug!(path = %entry.relative.display(), "file vanished before copy; skipping");
                counts.skipped += 1;
                return Ok(());
            }
            Err(e) => return Err(Error::open(&entry.relative, e)),
        };

        // With an empty reader only the header (and any long-name records)
        // is written; the body follows through the underlying writer.
        tar.append_data(&mut header, &entry.relative, io::empty())
            .map_err(|e| Error::header(&entry.relative, e))?;

        let mut pooled;
        let mut exact;
        let buf: &mut [u8] = if entry.size >= self.pool.buffer_len() as u64 {
            pooled = self.pool.acquire();
            &mut pooled
        } else {
            exact = vec![0u8; entry.size as usize];
            &mut exact
        };

        copy_body(tar.get_mut(), &mut file, entry.size, buf)
            .map_err(|e| Error::copy(&entry.relative, e))?;

        counts.entries += 1;
        Ok(())
    }
}

/// `dst` with its parent directory resolved, without following `dst` itself.
fn canonical_destination(dst: &Path) -> Option<PathBuf> {
    let name = dst.file_name()?;
    let parent = match dst.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::canonicalize(parent).ok().map(|p| p.join(name))
}

fn is_destination(own: &Path, path: &Path) -> bool {
    own.file_name() == path.file_name() && canonical_destination(path).as_deref() == Some(own)
}

fn transition(state: &mut ArchiveState, next: ArchiveState) {
    debug!(from = ?*state, to = ?next, "archive state");
    *state = next;
}

fn finish_error(dst: &Path, source: io::Error) -> Error {
    Error::Finish {
        path: dst.to_path_buf(),
        source,
    }
}

/// Opens the destination write-only, created with owner-only permissions and
/// truncated if it exists.
fn open_destination(dst: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(dst).map_err(|source| Error::Destination {
        path: dst.to_path_buf(),
        source,
    })
}

/// Copies exactly `size` bytes from `src` to `dst` through `buf`, then pads
/// the entry to the tar block size. A source shorter than `size` is an error
/// since its header has already been written.
fn copy_body<W: Write, R: Read>(
    dst: &mut W,
    src: &mut R,
    size: u64,
    buf: &mut [u8],
) -> io::Result<()> {
    let mut remaining = size;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = match src.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("file shrank while archiving: {remaining} of {size} bytes missing"),
                ))
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        dst.write_all(&buf[..n])?;
        remaining -= n as u64;
    }

    let pad = (BLOCK_SIZE - size % BLOCK_SIZE) % BLOCK_SIZE;
    if pad > 0 {
        dst.write_all(&[0u8; BLOCK_SIZE as usize][..pad as usize])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_copy_body_pads_to_block() {
        let mut out = Vec::new();
        let mut src = Cursor::new(vec![1u8; 700]);
        let mut buf = [0u8; 64];
        copy_body(&mut out, &mut src, 700, &mut buf).unwrap();
        assert_eq!(out.len(), 1024);
        assert!(out[..700].iter().all(|b| *b == 1));
        assert!(out[700..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_copy_body_stops_at_size() {
        let mut out = Vec::new();
        let mut src = Cursor::new(vec![9u8; 2048]);
        let mut buf = [0u8; 100];
        copy_body(&mut out, &mut src, 512, &mut buf).unwrap();
        assert_eq!(out.len(), 512);
        assert_eq!(src.position(), 512);
    }

    #[test]
    fn test_copy_body_short_source() {
        let mut out = Vec::new();
        let mut src = Cursor::new(vec![1u8; 10]);
        let mut buf = [0u8; 8];
        let err = copy_body(&mut out, &mut src, 20, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_file_removed_after_stat_is_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("world.dat");
        fs::write(&path, vec![3u8; 2000]).unwrap();

        let entry = FsEntry::stat(Candidate {
            path: path.clone(),
            relative: PathBuf::from("world.dat"),
        })
        .unwrap()
        .unwrap();
        fs::remove_file(&path).unwrap();

        let archive = Archive::new(dir.path());
        let mut tar = TarBuilder::new(Vec::new());
        let mut counts = EntryCounts::default();
        archive.append_entry(&mut tar, &entry, &mut counts).unwrap();

        assert_eq!(counts.entries, 0);
        assert_eq!(counts.skipped, 1);
        assert!(tar.get_ref().is_empty(), "no header for a vanished file");
    }

    #[test]
    fn test_destination_matching() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        let dst = dir.path().join("nested/../backup.tar.gz");
        fs::write(dir.path().join("backup.tar.gz"), b"").unwrap();

        let own = canonical_destination(&dst).unwrap();
        assert!(is_destination(&own, &dir.path().join("backup.tar.gz")));
        assert!(!is_destination(&own, &dir.path().join("nested/backup.tar.gz")));
        assert!(!is_destination(&own, &dir.path().join("other.tar.gz")));
    }

    #[test]
    fn test_transition() {
        let mut state = ArchiveState::Idle;
        transition(&mut state, ArchiveState::Opening);
        assert_eq!(state, ArchiveState::Opening);
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_builder_options() {
        let config = BackupsConfig {
            compression_level: CompressionLevel::BestCompression,
            write_limit: 8,
        };
        let archive = Archive::new("/srv/data")
            .with_ignore("*.log")
            .with_config(&config);
        assert_eq!(archive.base(), Path::new("/srv/data"));
        assert_eq!(archive.compression, CompressionLevel::BestCompression);
        assert_eq!(archive.write_limit_mib, 8);
        assert!(archive.progress().is_none());
    }
}
