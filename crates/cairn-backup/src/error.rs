//! Error types for cairn-backup

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias using cairn-backup's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], for hosts that want to branch on the
/// failing operation without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Destination,
    Walk,
    Stat,
    Header,
    Open,
    Copy,
    Finish,
    Cancelled,
    Config,
    Io,
}

/// Archive creation errors.
///
/// Every fatal filesystem failure carries the path (relative to the archive
/// base where one exists) and the underlying I/O error.
#[derive(Error, Debug)]
pub enum Error {
    /// The destination archive could not be opened
    #[error("failed to open archive destination '{}': {source}", path.display())]
    Destination { path: PathBuf, source: io::Error },

    /// Directory traversal failed
    #[error("failed walking '{}': {source}", path.display())]
    Walk { path: PathBuf, source: io::Error },

    /// lstat of an entry failed for a reason other than it disappearing
    #[error("failed to stat '{}': {source}", path.display())]
    Stat { path: PathBuf, source: io::Error },

    /// Writing a tar header failed
    #[error("failed to write tar header for '{}': {source}", path.display())]
    Header { path: PathBuf, source: io::Error },

    /// A file selected for the archive could not be opened
    #[error("failed to open '{}' for copying: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },

    /// Copying file contents into the archive failed
    #[error("failed to copy '{}' to archive: {source}", path.display())]
    Copy { path: PathBuf, source: io::Error },

    /// Flushing or closing the writer chain failed
    #[error("failed to finish archive '{}': {source}", path.display())]
    Finish { path: PathBuf, source: io::Error },

    /// The job was cancelled by its host
    #[error("archive creation cancelled")]
    Cancelled,

    /// Configuration file not found
    #[error("configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration format
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn walk(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Walk {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn stat(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Stat {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn header(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Header {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn copy(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Copy {
            path: path.into(),
            source,
        }
    }

    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// The operation that failed.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Destination { .. } => ErrorKind::Destination,
            Error::Walk { .. } => ErrorKind::Walk,
            Error::Stat { .. } => ErrorKind::Stat,
            Error::Header { .. } => ErrorKind::Header,
            Error::Open { .. } => ErrorKind::Open,
            Error::Copy { .. } => ErrorKind::Copy,
            Error::Finish { .. } => ErrorKind::Finish,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::ConfigNotFound { .. } | Error::InvalidConfig { .. } => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// The path the failure is attributed to, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Error::Destination { path, .. }
            | Error::Walk { path, .. }
            | Error::Stat { path, .. }
            | Error::Header { path, .. }
            | Error::Open { path, .. }
            | Error::Copy { path, .. }
            | Error::Finish { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Entries that vanish between discovery and use are skipped, not reported.
pub(crate) fn is_not_found(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound
}
