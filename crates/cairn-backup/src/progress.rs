//! Progress tracking for archive creation.
//!
//! [`Progress`] is shared between the archiving thread, which bumps the
//! written-byte counter through a [`ProgressWriter`], and whatever renders the
//! progress bar. Both counters are plain atomics so the write path never waits
//! on a reader.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Byte counters for one archive job.
#[derive(Debug, Default)]
pub struct Progress {
    written: AtomicU64,
    total: AtomicU64,
}

impl Progress {
    /// Creates a tracker for a job expected to produce `total` bytes.
    pub fn new(total: u64) -> Self {
        Self {
            written: AtomicU64::new(0),
            total: AtomicU64::new(total),
        }
    }

    /// Total number of bytes written so far.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Expected size of the job in bytes.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Replaces the expected total, e.g. once a size estimate completes.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    /// Counts `bytes` as written. This is the downstream-less form of
    /// [`ProgressWriter`] and always succeeds.
    pub fn write(&self, bytes: &[u8]) -> io::Result<usize> {
        self.add(bytes.len() as u64);
        Ok(bytes.len())
    }

    fn add(&self, n: u64) {
        self.written.fetch_add(n, Ordering::Relaxed);
    }

    /// Percentage complete, 0 when the total is unknown.
    pub fn percent(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.written() as f64 / total as f64 * 100.0
    }

    /// Renders a `width`-character bar followed by `<written> / <total>`.
    ///
    /// Ticks are truncated, never rounded, and capped at `width` so the bar
    /// cannot overflow when the estimate was low.
    pub fn render(&self, width: usize) -> String {
        let current = self.written();
        let total = self.total();

        let ticks = if total == 0 {
            0
        } else {
            let ticks = (current as u128 * width as u128 / total as u128) as usize;
            ticks.min(width)
        };

        format!(
            "[{}{}] {} / {}",
            "=".repeat(ticks),
            " ".repeat(width - ticks),
            format_bytes(current),
            format_bytes(total)
        )
    }
}

/// Pass-through writer that counts every byte its downstream accepts.
#[derive(Debug)]
pub struct ProgressWriter<W> {
    inner: W,
    progress: Arc<Progress>,
}

impl<W: Write> ProgressWriter<W> {
    pub fn new(inner: W, progress: Arc<Progress>) -> Self {
        Self { inner, progress }
    }

    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ProgressWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.progress.add(n as u64);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Formats a byte count using binary (1024-based) units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit_idx = 0;
    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }
    format!("{:.2} {}", size, UNITS[unit_idx])
}
