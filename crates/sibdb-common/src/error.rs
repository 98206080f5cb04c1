//! Error types for SibDB.

use thiserror::Error;

/// Result type alias using SibDbError.
pub type Result<T> = std::result::Result<T, SibDbError>;

/// Errors that can occur in SibDB index operations.
///
/// Absence is never an error: looking up or deleting a missing key succeeds
/// with an empty outcome. Slot-range violations inside a node group are
/// programming errors and panic instead of surfacing here.
#[derive(Debug, Error)]
pub enum SibDbError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Index errors
    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),
}

impl SibDbError {
    /// Shorthand for an `IndexCorrupted` error built from anything displayable.
    pub fn corrupted(reason: impl Into<String>) -> Self {
        Self::IndexCorrupted(reason.into())
    }
}
