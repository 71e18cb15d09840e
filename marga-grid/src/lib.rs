//! MargaGrid - grid model and planners for the Marga routing broker.
//!
//! Provides the spatial side of routing:
//!
//! - **Messages**: ROS-shaped occupancy grid documents as they arrive on the
//!   costmap topic
//! - **MapMetadata**: origin, resolution, dimensions and obstacle mask built
//!   from an occupancy document
//! - **InflatedGrid**: obstacle mask expanded by the robot footprint, with
//!   the position/index mapping shared by both planners
//! - **AStarPlanner**: 8-connected planar A* over continuous coordinates
//! - **TimedGridMap**: time-augmented grid searched over `(x, y, t)` states
//!
//! All models are immutable after construction; callers replace them
//! wholesale when a new costmap arrives.

mod astar;
mod error;
mod inflation;
mod metadata;
pub mod messages;
mod timed;

pub use astar::{AStarConfig, AStarPlanner};
pub use error::{MapError, PlanningError};
pub use inflation::InflatedGrid;
pub use metadata::{DEFAULT_OCCUPANCY_THRESHOLD, MapMetadata};
pub use messages::RawOccupancyGrid;
pub use timed::{DEFAULT_MAX_TIME_STEPS, TimedGridConfig, TimedGridMap, TimedIndex, TimedPosition};
