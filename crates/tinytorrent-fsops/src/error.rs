//! # Design
//!
//! - Constant-message errors for the automation filesystem helpers.
//! - Operation and path context travel as fields, never interpolated into messages.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for filesystem operations.
pub type FsOpsResult<T> = Result<T, FsOpsError>;

/// Errors produced by filesystem automation.
#[derive(Debug, Error)]
pub enum FsOpsError {
    /// IO failures while interacting with the filesystem.
    #[error("fsops io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Walkdir traversal failures.
    #[error("fsops walkdir failure")]
    Walkdir {
        /// Operation that triggered the walkdir failure.
        operation: &'static str,
        /// Path involved in the walkdir failure.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
    /// Input validation failures.
    #[error("fsops invalid input")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Every collision-free candidate name was already taken.
    #[error("fsops destination exhausted")]
    DestinationExhausted {
        /// Target that collided.
        path: PathBuf,
        /// Candidates tried.
        attempts: u32,
    },
}

impl FsOpsError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn errors_keep_constant_messages() {
        let err = FsOpsError::io("rename", "/tmp/x", io::Error::other("denied"));
        assert_eq!(err.to_string(), "fsops io failure");
        assert!(err.source().is_some());

        let err = FsOpsError::DestinationExhausted {
            path: PathBuf::from("/done/Movie"),
            attempts: 3,
        };
        assert_eq!(err.to_string(), "fsops destination exhausted");
    }
}
