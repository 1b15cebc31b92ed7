//! Cairn Backup Archiver
//!
//! This crate turns a directory tree into a single `.tar.gz` archive for
//! backups, streaming entries straight from disk into the compressor with
//! bounded memory and an optional cap on write throughput.
//!
//! # Features
//!
//! - **Streaming**: one depth-first walk, no temporary files
//! - **Selective**: explicit path lists or gitignore-style ignore rules
//! - **Bounded memory**: file contents are copied through pooled fixed-size buffers
//! - **Throttled output**: token-bucket write limiting in MiB/s
//! - **Progress**: lock-free byte counters with a text progress bar
//! - **Tolerant of churn**: files deleted mid-walk are skipped, not fatal
//!
//! # Examples
//!
//! ```no_run
//! use cairn_backup::{Archive, Progress};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! fn main() -> cairn_backup::Result<()> {
//!     let archive = Archive::new("/srv/server").with_ignore("*.log\ncache/\n");
//!
//!     let progress = Arc::new(Progress::new(archive.estimate_size()?));
//!     let archive = archive.with_progress(Arc::clone(&progress));
//!
//!     let summary = archive.create(Path::new("/backups/server.tar.gz"))?;
//!     println!("{} entries, {}", summary.entries, progress.render(25));
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod checksum;
pub mod config;
pub mod entry;
pub mod error;
pub mod filter;
pub mod limiter;
pub mod pool;
pub mod progress;
pub mod walk;

// Re-export commonly used types
pub use archive::{Archive, ArchiveState, ArchiveSummary, CancellationToken};
pub use checksum::calculate_checksum;
pub use config::{BackupsConfig, CompressionLevel, Config, SystemConfig};
pub use entry::{EntryKind, FsEntry};
pub use error::{Error, ErrorKind, Result};
pub use filter::{Decision, EntryFilter};
pub use limiter::{RateLimitedWriter, TokenBucket};
pub use pool::{BufferPool, PooledBuffer, DEFAULT_BUFFER_LEN};
pub use progress::{format_bytes, Progress, ProgressWriter};
pub use walk::{Candidate, Walk};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
