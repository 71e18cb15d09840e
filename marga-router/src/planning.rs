//! Planner dispatch.
//!
//! The core talks to the planning collaborators through two traits:
//! [`PlanarPlanner`] for 2D mode and [`TimedGridModel`] for the
//! time-augmented 3D mode. Both are implemented for the `marga-grid`
//! types. Dispatch is a pure function of mode, map view and request; it
//! never blocks on I/O.

use std::sync::Arc;

use marga_grid::{
    AStarConfig, AStarPlanner, MapMetadata, PlanningError, TimedGridConfig, TimedGridMap,
    TimedIndex, TimedPosition,
};
use serde::Deserialize;

use crate::codec::DestinationRequest;
use crate::config::PlannerConfig;
use crate::error::{Result, RouterError};
use crate::state::{MapView, ModelBuild};

/// Start time for timed plans.
const PLAN_START_TIME: f64 = 0.0;

/// Active planning mode, fixed at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum PlannerMode {
    /// Planar A* over continuous coordinates
    #[serde(rename = "2d")]
    Planar2D,
    /// Space-time A* over the time-augmented grid
    #[default]
    #[serde(rename = "3d")]
    Timed3D,
}

impl std::fmt::Display for PlannerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlannerMode::Planar2D => write!(f, "2d"),
            PlannerMode::Timed3D => write!(f, "3d"),
        }
    }
}

/// Single route waypoint; `t` is the arrival time (0 in planar mode).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
    pub t: f64,
}

/// Ordered waypoint sequence handed to the codec.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Route {
    pub waypoints: Vec<Waypoint>,
}

impl Route {
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }
}

/// 2D planning collaborator.
pub trait PlanarPlanner: Send + Sync {
    fn plan(&self, current: (f64, f64), goal: (f64, f64)) -> std::result::Result<Vec<(f64, f64)>, PlanningError>;
}

/// Time-augmented grid collaborator.
pub trait TimedGridModel: Send + Sync {
    fn pos_to_index(&self, x: f64, y: f64) -> (i32, i32);

    fn index_to_pos(&self, ix: i32, iy: i32) -> (f64, f64);

    /// Plan from `start` to `goal` beginning at time step zero.
    fn plan(&self, start: (i32, i32), goal: (i32, i32)) -> std::result::Result<Vec<TimedIndex>, PlanningError>;

    /// Convert an index route to positions, offsetting arrival times by `start_time`.
    fn route_to_positions(&self, start_time: f64, route: &[TimedIndex]) -> Vec<TimedPosition>;
}

impl PlanarPlanner for AStarPlanner {
    fn plan(&self, current: (f64, f64), goal: (f64, f64)) -> std::result::Result<Vec<(f64, f64)>, PlanningError> {
        AStarPlanner::plan(self, current, goal)
    }
}

impl TimedGridModel for TimedGridMap {
    fn pos_to_index(&self, x: f64, y: f64) -> (i32, i32) {
        TimedGridMap::pos_to_index(self, x, y)
    }

    fn index_to_pos(&self, ix: i32, iy: i32) -> (f64, f64) {
        TimedGridMap::index_to_pos(self, ix, iy)
    }

    fn plan(&self, start: (i32, i32), goal: (i32, i32)) -> std::result::Result<Vec<TimedIndex>, PlanningError> {
        TimedGridMap::plan(self, start, goal)
    }

    fn route_to_positions(&self, start_time: f64, route: &[TimedIndex]) -> Vec<TimedPosition> {
        TimedGridMap::route_to_positions(self, start_time, route)
    }
}

/// Build the collaborator for `mode` from fresh metadata.
pub fn build_models(metadata: MapMetadata, mode: PlannerMode, config: &PlannerConfig) -> ModelBuild {
    let (timed, planar): (Option<Arc<dyn TimedGridModel>>, Option<Arc<dyn PlanarPlanner>>) =
        match mode {
            PlannerMode::Timed3D => {
                let grid = TimedGridMap::new(
                    &metadata,
                    TimedGridConfig {
                        robot_radius: config.robot_radius,
                        max_time_steps: config.max_time_steps,
                        step_duration: config.step_duration,
                        ..TimedGridConfig::default()
                    },
                );
                (Some(Arc::new(grid)), None)
            }
            PlannerMode::Planar2D => {
                let planner = AStarPlanner::new(
                    &metadata,
                    AStarConfig {
                        robot_radius: config.robot_radius,
                        ..AStarConfig::default()
                    },
                );
                (None, Some(Arc::new(planner)))
            }
        };

    ModelBuild {
        metadata: Arc::new(metadata),
        timed,
        planar,
    }
}

/// Plan a route for `request` against the current view.
///
/// # Errors
/// * `ModelNotReady` - no model for the active mode has been built yet
/// * `Planning` - the collaborator rejected the request or found no path
pub fn dispatch(mode: PlannerMode, view: &MapView, request: &DestinationRequest) -> Result<Route> {
    match mode {
        PlannerMode::Timed3D => {
            let model = view.timed.as_ref().ok_or(RouterError::ModelNotReady)?;

            let start = model.pos_to_index(request.current.0, request.current.1);
            let goal = model.pos_to_index(request.destination.0, request.destination.1);
            let route = model.plan(start, goal)?;

            let waypoints = model
                .route_to_positions(PLAN_START_TIME, &route)
                .into_iter()
                .map(|p| Waypoint { x: p.x, y: p.y, t: p.t })
                .collect();
            Ok(Route { waypoints })
        }
        PlannerMode::Planar2D => {
            let planner = view.planar.as_ref().ok_or(RouterError::ModelNotReady)?;

            let path = planner.plan(request.current, request.destination)?;
            let waypoints = path
                .into_iter()
                .map(|(x, y)| Waypoint { x, y, t: 0.0 })
                .collect();
            Ok(Route { waypoints })
        }
    }
}
