//! Placement error types.

use fleetgrid_region::RegionError;
use thiserror::Error;

pub type PlacementResult<T> = Result<T, PlacementError>;

/// Errors that abort an election. These indicate a malformed request, not
/// an infrastructure problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    #[error(transparent)]
    Region(#[from] RegionError),
}
