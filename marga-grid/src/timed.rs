//! Time-augmented grid and space-time A* search.
//!
//! The search runs over `(x, y, t)` states. Every action (an 8-connected
//! move or waiting in place) advances time by one step, and the search is
//! bounded by the configured horizon. Routes come back as timed indices and
//! can be converted to world positions with arrival times.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::astar::octile;
use crate::error::PlanningError;
use crate::inflation::InflatedGrid;
use crate::metadata::MapMetadata;

/// Default time horizon in steps.
pub const DEFAULT_MAX_TIME_STEPS: u32 = 300;

/// Cost of waiting one step in place.
const WAIT_COST: f64 = 1.0;

/// Time-augmented grid configuration.
#[derive(Debug, Clone)]
pub struct TimedGridConfig {
    /// Robot radius for obstacle inflation (meters)
    pub robot_radius: f64,
    /// Maximum number of time steps a route may span
    pub max_time_steps: u32,
    /// Duration of one time step (seconds)
    pub step_duration: f64,
    /// Maximum number of expansions before giving up
    pub max_iterations: usize,
}

impl Default for TimedGridConfig {
    fn default() -> Self {
        Self {
            robot_radius: 0.35,
            max_time_steps: DEFAULT_MAX_TIME_STEPS,
            step_duration: 1.0,
            max_iterations: 500_000,
        }
    }
}

/// Cell index with the time step at which it is occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimedIndex {
    pub x: i32,
    pub y: i32,
    pub t: u32,
}

/// World position with arrival time in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedPosition {
    pub x: f64,
    pub y: f64,
    pub t: f64,
}

/// Immutable time-augmented grid model.
#[derive(Debug, Clone)]
pub struct TimedGridMap {
    config: TimedGridConfig,
    grid: InflatedGrid,
}

impl TimedGridMap {
    /// Build the model for `meta`.
    pub fn new(meta: &MapMetadata, config: TimedGridConfig) -> Self {
        let grid = InflatedGrid::new(meta, config.robot_radius);
        Self { config, grid }
    }

    pub fn config(&self) -> &TimedGridConfig {
        &self.config
    }

    pub fn grid(&self) -> &InflatedGrid {
        &self.grid
    }

    pub fn pos_to_index(&self, x: f64, y: f64) -> (i32, i32) {
        self.grid.pos_to_index(x, y)
    }

    pub fn index_to_pos(&self, ix: i32, iy: i32) -> (f64, f64) {
        self.grid.index_to_pos(ix, iy)
    }

    /// Plan a space-time route between two cells, starting at step 0.
    pub fn plan(&self, start: (i32, i32), goal: (i32, i32)) -> Result<Vec<TimedIndex>, PlanningError> {
        if !self.grid.contains(start.0, start.1) {
            return Err(PlanningError::StartOutOfBounds(start.0, start.1));
        }
        if !self.grid.contains(goal.0, goal.1) {
            return Err(PlanningError::GoalOutOfBounds(goal.0, goal.1));
        }
        if !self.grid.is_free(start.0, start.1) {
            return Err(PlanningError::StartInObstacle(start.0, start.1));
        }
        if !self.grid.is_free(goal.0, goal.1) {
            return Err(PlanningError::GoalInObstacle(goal.0, goal.1));
        }

        let origin = TimedIndex {
            x: start.0,
            y: start.1,
            t: 0,
        };
        if start == goal {
            return Ok(vec![origin]);
        }

        let mut open_set = BinaryHeap::new();
        let mut came_from: HashMap<TimedIndex, TimedIndex> = HashMap::new();
        let mut g_score: HashMap<TimedIndex, f64> = HashMap::new();

        g_score.insert(origin, 0.0);
        open_set.push(SpaceTimeNode {
            state: origin,
            f_score: octile(start, goal),
        });

        let mut iterations = 0;
        let mut horizon_hit = false;

        while let Some(current) = open_set.pop() {
            iterations += 1;
            if iterations > self.config.max_iterations {
                return Err(PlanningError::MaxIterationsExceeded(self.config.max_iterations));
            }

            let state = current.state;
            if (state.x, state.y) == goal {
                return Ok(reconstruct(&came_from, origin, state));
            }

            if state.t >= self.config.max_time_steps {
                horizon_hit = true;
                continue;
            }

            let current_g = *g_score.get(&state).unwrap_or(&f64::INFINITY);
            let mut successors = self.grid.neighbors(state.x, state.y);
            successors.push(((state.x, state.y), WAIT_COST));

            for ((nx, ny), move_cost) in successors {
                let next = TimedIndex {
                    x: nx,
                    y: ny,
                    t: state.t + 1,
                };
                let tentative_g = current_g + move_cost;

                if tentative_g < *g_score.get(&next).unwrap_or(&f64::INFINITY) {
                    came_from.insert(next, state);
                    g_score.insert(next, tentative_g);
                    open_set.push(SpaceTimeNode {
                        state: next,
                        f_score: tentative_g + octile((nx, ny), goal),
                    });
                }
            }
        }

        if horizon_hit {
            Err(PlanningError::HorizonExceeded(self.config.max_time_steps))
        } else {
            Err(PlanningError::NoPathFound)
        }
    }

    /// Convert a timed index route to world positions with arrival times.
    ///
    /// `start_time` is added to every arrival time.
    pub fn route_to_positions(&self, start_time: f64, route: &[TimedIndex]) -> Vec<TimedPosition> {
        route
            .iter()
            .map(|idx| {
                let (x, y) = self.grid.index_to_pos(idx.x, idx.y);
                TimedPosition {
                    x,
                    y,
                    t: start_time + idx.t as f64 * self.config.step_duration,
                }
            })
            .collect()
    }

    /// World positions of blocked cells, for diagnostics.
    pub fn obstacle_points(&self) -> Vec<(f64, f64)> {
        self.grid.blocked_positions()
    }
}

fn reconstruct(
    came_from: &HashMap<TimedIndex, TimedIndex>,
    start: TimedIndex,
    goal: TimedIndex,
) -> Vec<TimedIndex> {
    let mut route = vec![goal];
    let mut current = goal;

    while current != start {
        match came_from.get(&current) {
            Some(&prev) => {
                route.push(prev);
                current = prev;
            }
            None => break,
        }
    }

    route.reverse();
    route
}

#[derive(Clone)]
struct SpaceTimeNode {
    state: TimedIndex,
    f_score: f64,
}

impl Eq for SpaceTimeNode {}

impl PartialEq for SpaceTimeNode {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state
    }
}

impl Ord for SpaceTimeNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on f_score; ties prefer later time (deeper nodes)
        other
            .f_score
            .partial_cmp(&self.f_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.state.t.cmp(&other.state.t))
    }
}

impl PartialOrd for SpaceTimeNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn free_map(size: usize) -> TimedGridMap {
        let meta = MapMetadata::free(size, size, 0.3, 0.0, 0.0);
        TimedGridMap::new(&meta, TimedGridConfig::default())
    }

    #[test]
    fn test_free_grid_corner_to_corner() {
        let map = free_map(5);
        let start = map.pos_to_index(0.0, 0.0);
        let goal = map.pos_to_index(1.2, 1.2);

        let route = map.plan(start, goal).unwrap();
        assert_eq!(route.len(), 5);
        assert_eq!((route[0].x, route[0].y), start);
        assert_eq!((route[4].x, route[4].y), goal);

        // Time strictly increases by one step per waypoint
        for (i, idx) in route.iter().enumerate() {
            assert_eq!(idx.t, i as u32);
        }
    }

    #[test]
    fn test_route_to_positions_applies_start_time() {
        let map = free_map(5);
        let route = map.plan((0, 0), (2, 0)).unwrap();

        let positions = map.route_to_positions(10.0, &route);
        assert_eq!(positions.len(), 3);
        assert_abs_diff_eq!(positions[0].t, 10.0);
        assert_abs_diff_eq!(positions[2].t, 12.0);
        assert_abs_diff_eq!(positions[2].x, 0.6, epsilon = 1e-9);
    }

    #[test]
    fn test_horizon_exhausted() {
        let meta = MapMetadata::free(30, 1, 0.3, 0.0, 0.0);
        let map = TimedGridMap::new(
            &meta,
            TimedGridConfig {
                robot_radius: 0.0,
                max_time_steps: 5,
                ..TimedGridConfig::default()
            },
        );

        assert_eq!(
            map.plan((0, 0), (20, 0)),
            Err(PlanningError::HorizonExceeded(5))
        );
    }

    #[test]
    fn test_blocked_goal() {
        let meta = MapMetadata::free(6, 6, 0.3, 0.0, 0.0).with_obstacle(5, 5);
        let map = TimedGridMap::new(&meta, TimedGridConfig::default());

        assert_eq!(
            map.plan((0, 0), (5, 5)),
            Err(PlanningError::GoalInObstacle(5, 5))
        );
        assert!(!map.obstacle_points().is_empty());
    }

    #[test]
    fn test_start_equals_goal() {
        let map = free_map(3);
        let route = map.plan((1, 1), (1, 1)).unwrap();
        assert_eq!(route, vec![TimedIndex { x: 1, y: 1, t: 0 }]);
    }
}
