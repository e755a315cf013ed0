//! Region tree error types.

use thiserror::Error;

/// Result type alias for region tree operations.
pub type RegionResult<T> = Result<T, RegionError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionError {
    /// Empty segment, leading dot, or trailing dot. Caller error.
    #[error("invalid region path `{path}`: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("region not found: {0}")]
    NotFound(String),
}
