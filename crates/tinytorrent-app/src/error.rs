//! # Design
//!
//! - Centralize application-level errors for bootstrap and shutdown.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: tinytorrent_telemetry::TelemetryError,
    },
    /// Persistence operations failed.
    #[error("persistence operation failed")]
    Persistence {
        /// Operation identifier.
        operation: &'static str,
        /// Source data error.
        source: tinytorrent_data::DataError,
    },
    /// Engine operations failed.
    #[error("engine operation failed")]
    Engine {
        /// Operation identifier.
        operation: &'static str,
        /// Source engine error.
        source: tinytorrent_engine::EngineError,
    },
    /// Filesystem or signal IO failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure, when known.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
    /// Bootstrap configuration was invalid.
    #[error("invalid bootstrap configuration")]
    InvalidConfig {
        /// Configuration field name.
        field: &'static str,
        /// Static reason describing the problem.
        reason: &'static str,
        /// Offending value, when safe to report.
        value: Option<String>,
    },
}

impl AppError {
    pub(crate) const fn telemetry(
        operation: &'static str,
        source: tinytorrent_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn persistence(
        operation: &'static str,
        source: tinytorrent_data::DataError,
    ) -> Self {
        Self::Persistence { operation, source }
    }

    pub(crate) const fn engine(
        operation: &'static str,
        source: tinytorrent_engine::EngineError,
    ) -> Self {
        Self::Engine { operation, source }
    }

    pub(crate) const fn io(
        operation: &'static str,
        path: Option<PathBuf>,
        source: io::Error,
    ) -> Self {
        Self::Io {
            operation,
            path,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn messages_stay_constant_and_keep_sources() {
        let err = AppError::io(
            "state_dir.create",
            Some(PathBuf::from("/nope")),
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "io operation failed");
        assert!(err.source().is_some());

        let err = AppError::engine("engine.start", tinytorrent_engine::EngineError::ShuttingDown);
        assert_eq!(err.to_string(), "engine operation failed");
        assert!(matches!(
            err,
            AppError::Engine {
                operation: "engine.start",
                ..
            }
        ));

        let err = AppError::InvalidConfig {
            field: "TT_STATE_DIR",
            reason: "empty",
            value: Some(String::new()),
        };
        assert_eq!(err.to_string(), "invalid bootstrap configuration");
    }
}
