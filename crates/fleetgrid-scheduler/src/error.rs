//! Scheduler error types.

use std::time::Duration;

use fleetgrid_placement::PlacementError;
use fleetgrid_region::RegionError;
use thiserror::Error;

/// Errors returned to the caller of a deploy or reconciliation pass.
///
/// Per-node dispatch failures never surface here; they are recorded on the
/// deployment as [`DispatchError`]s instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("invalid region path `{path}`: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("region not found: {0}")]
    RegionNotFound(String),

    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl From<RegionError> for SchedulerError {
    fn from(e: RegionError) -> Self {
        match e {
            RegionError::InvalidPath { path, reason } => Self::InvalidPath { path, reason },
            RegionError::NotFound(path) => Self::RegionNotFound(path),
        }
    }
}

impl From<PlacementError> for SchedulerError {
    fn from(e: PlacementError) -> Self {
        match e {
            PlacementError::Region(e) => e.into(),
        }
    }
}

/// A single create or remove call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("container engine error: {0}")]
    Engine(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The pass was cancelled before this dispatch was issued.
    #[error("cancelled before dispatch")]
    Cancelled,
}
