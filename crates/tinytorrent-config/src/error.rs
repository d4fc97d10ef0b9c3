//! Error types for settings decoding and validation.

use thiserror::Error;

/// Primary error type for settings operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Field contained a value that could not be decoded.
    #[error("invalid settings field")]
    InvalidField {
        /// Persisted key of the offending field.
        field: String,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// Key did not map to any known setting.
    #[error("unknown settings field")]
    UnknownField {
        /// Persisted key that was not recognised.
        field: String,
    },
}

impl ConfigError {
    /// Persisted key the error refers to.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::InvalidField { field, .. } | Self::UnknownField { field } => field,
        }
    }
}

/// Convenience alias for settings results.
pub type ConfigResult<T> = Result<T, ConfigError>;
