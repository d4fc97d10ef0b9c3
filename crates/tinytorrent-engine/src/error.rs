//! # Design
//!
//! - Constant-message errors for callers of the engine handle.
//! - Work executed on the engine task reports failures through `anyhow`; only the boundary types
//!   surface here.

use std::path::PathBuf;

use thiserror::Error;
use tinytorrent_core::RpcId;

/// Result type for engine handle operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors returned by the engine handle.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The command queue is at capacity.
    #[error("engine task queue full")]
    QueueFull {
        /// Queue capacity.
        capacity: usize,
    },
    /// The engine is shutting down and no longer accepts work.
    #[error("engine shutting down")]
    ShuttingDown,
    /// A queued task was dropped before producing a result.
    #[error("engine task dropped")]
    TaskDropped {
        /// Operation that was waiting on the result.
        operation: &'static str,
    },
    /// A queued task ran and failed.
    #[error("engine task failed")]
    TaskFailed {
        /// Operation that failed.
        operation: &'static str,
        /// Underlying failure.
        source: anyhow::Error,
    },
    /// No torrent carries the given RPC id.
    #[error("torrent not found")]
    TorrentNotFound {
        /// RPC id requested.
        id: RpcId,
    },
    /// A request carried an invalid value.
    #[error("invalid engine input")]
    InvalidInput {
        /// Field with an invalid value.
        field: &'static str,
        /// Static reason describing the problem.
        reason: &'static str,
    },
    /// The blocklist could not be loaded.
    #[error("blocklist unavailable")]
    Blocklist {
        /// Blocklist path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// History storage failed.
    #[error("history storage failed")]
    History {
        /// Operation that failed.
        operation: &'static str,
        /// Underlying failure.
        source: anyhow::Error,
    },
    /// Startup state could not be loaded.
    #[error("engine state unavailable")]
    Persistence {
        /// Load step that failed.
        operation: &'static str,
        /// Underlying persistence error.
        source: tinytorrent_data::DataError,
    },
    /// The engine task could not be spawned or joined.
    #[error("engine task join failed")]
    Join {
        /// Underlying join error.
        source: tokio::task::JoinError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn messages_stay_constant() {
        let err = EngineError::QueueFull { capacity: 4 };
        assert_eq!(err.to_string(), "engine task queue full");

        let err = EngineError::TaskFailed {
            operation: "pause",
            source: anyhow::anyhow!("unknown torrent"),
        };
        assert_eq!(err.to_string(), "engine task failed");
        assert!(err.source().is_some());
    }
}
