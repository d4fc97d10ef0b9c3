//! Error types for torrent core services.

use std::error::Error;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for torrent operations.
#[derive(Debug, Error)]
pub enum TorrentError {
    /// Hash text was not 40 hex digits.
    #[error("invalid info-hash")]
    InvalidHash {
        /// Offending input.
        value: String,
    },
    /// Magnet URI could not be parsed.
    #[error("invalid magnet uri")]
    InvalidMagnet {
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// Metainfo payload could not be parsed.
    #[error("invalid metainfo")]
    InvalidMetainfo {
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// Torrent was not found in the session.
    #[error("torrent not found")]
    NotFound {
        /// Missing torrent hash.
        hash: String,
    },
    /// Operation failed in the underlying engine.
    #[error("torrent operation failed")]
    OperationFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// Background worker is no longer accepting work.
    #[error("background worker stopped")]
    WorkerStopped {
        /// Operation identifier.
        operation: &'static str,
    },
    /// Filesystem operation failed.
    #[error("filesystem operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for torrent operation results.
pub type TorrentResult<T> = Result<T, TorrentError>;
