//! Error types for MargaGrid

use thiserror::Error;

/// Errors raised while building a map from an occupancy document.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapError {
    #[error("Map has zero width or height")]
    Empty,

    #[error("Invalid resolution: {0}")]
    InvalidResolution(f64),

    #[error("Occupancy data has {actual} cells, expected {expected}")]
    DataSizeMismatch { expected: usize, actual: usize },
}

/// Errors raised by the planners.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanningError {
    #[error("No path found to target")]
    NoPathFound,

    #[error("Start position ({0}, {1}) is outside map")]
    StartOutOfBounds(i32, i32),

    #[error("Goal position ({0}, {1}) is outside map")]
    GoalOutOfBounds(i32, i32),

    #[error("Start position ({0}, {1}) is inside obstacle")]
    StartInObstacle(i32, i32),

    #[error("Goal ({0}, {1}) is unreachable (blocked)")]
    GoalInObstacle(i32, i32),

    #[error("Planning exceeded {0} iterations")]
    MaxIterationsExceeded(usize),

    #[error("Time horizon of {0} steps exhausted")]
    HorizonExceeded(u32),
}
