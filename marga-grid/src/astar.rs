//! Planar A* path planning with obstacle inflation.
//!
//! - **Obstacle inflation**: obstacles are expanded by the robot radius
//! - **8-connected grid**: diagonal moves allowed, corners never cut
//! - **Continuous interface**: start and goal are world coordinates, the
//!   returned path is the sequence of visited cell positions

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::error::PlanningError;
use crate::inflation::InflatedGrid;
use crate::metadata::MapMetadata;

/// Configuration for the planar A* planner.
#[derive(Debug, Clone)]
pub struct AStarConfig {
    /// Robot radius for obstacle inflation (meters).
    pub robot_radius: f64,

    /// Maximum number of expansions before giving up.
    pub max_iterations: usize,
}

impl Default for AStarConfig {
    fn default() -> Self {
        Self {
            robot_radius: 0.35,
            max_iterations: 200_000,
        }
    }
}

/// A* planner over an inflated occupancy grid.
///
/// The grid is inflated once at construction; `plan` only reads it, so a
/// planner can be shared between threads behind an `Arc`.
#[derive(Debug, Clone)]
pub struct AStarPlanner {
    config: AStarConfig,
    grid: InflatedGrid,
}

impl AStarPlanner {
    /// Build a planner for `meta`.
    pub fn new(meta: &MapMetadata, config: AStarConfig) -> Self {
        let grid = InflatedGrid::new(meta, config.robot_radius);
        Self { config, grid }
    }

    pub fn grid(&self) -> &InflatedGrid {
        &self.grid
    }

    /// Plan a path between two world positions.
    ///
    /// # Returns
    /// * `Ok(path)` - world positions from the start cell to the goal cell
    /// * `Err(PlanningError)` - endpoints invalid or goal unreachable
    pub fn plan(&self, start: (f64, f64), goal: (f64, f64)) -> Result<Vec<(f64, f64)>, PlanningError> {
        let start_cell = self.grid.pos_to_index(start.0, start.1);
        let goal_cell = self.grid.pos_to_index(goal.0, goal.1);

        if !self.grid.contains(start_cell.0, start_cell.1) {
            return Err(PlanningError::StartOutOfBounds(start_cell.0, start_cell.1));
        }
        if !self.grid.contains(goal_cell.0, goal_cell.1) {
            return Err(PlanningError::GoalOutOfBounds(goal_cell.0, goal_cell.1));
        }
        if !self.grid.is_free(start_cell.0, start_cell.1) {
            return Err(PlanningError::StartInObstacle(start_cell.0, start_cell.1));
        }
        if !self.grid.is_free(goal_cell.0, goal_cell.1) {
            return Err(PlanningError::GoalInObstacle(goal_cell.0, goal_cell.1));
        }

        let cells = self.plan_cells(start_cell, goal_cell)?;
        Ok(cells
            .into_iter()
            .map(|(ix, iy)| self.grid.index_to_pos(ix, iy))
            .collect())
    }

    fn plan_cells(&self, start: (i32, i32), goal: (i32, i32)) -> Result<Vec<(i32, i32)>, PlanningError> {
        if start == goal {
            return Ok(vec![start]);
        }

        let mut open_set = BinaryHeap::new();
        let mut came_from: HashMap<(i32, i32), (i32, i32)> = HashMap::new();
        let mut g_score: HashMap<(i32, i32), f64> = HashMap::new();

        g_score.insert(start, 0.0);
        open_set.push(AStarNode {
            cell: start,
            f_score: octile(start, goal),
        });

        let mut iterations = 0;

        while let Some(current) = open_set.pop() {
            iterations += 1;
            if iterations > self.config.max_iterations {
                return Err(PlanningError::MaxIterationsExceeded(self.config.max_iterations));
            }

            if current.cell == goal {
                return Ok(reconstruct(&came_from, start, goal));
            }

            let current_g = *g_score.get(&current.cell).unwrap_or(&f64::INFINITY);

            for (neighbor, move_cost) in self.grid.neighbors(current.cell.0, current.cell.1) {
                let tentative_g = current_g + move_cost;

                if tentative_g < *g_score.get(&neighbor).unwrap_or(&f64::INFINITY) {
                    came_from.insert(neighbor, current.cell);
                    g_score.insert(neighbor, tentative_g);
                    open_set.push(AStarNode {
                        cell: neighbor,
                        f_score: tentative_g + octile(neighbor, goal),
                    });
                }
            }
        }

        Err(PlanningError::NoPathFound)
    }
}

/// Octile distance, admissible for 8-connected moves.
pub(crate) fn octile(a: (i32, i32), b: (i32, i32)) -> f64 {
    let dx = (a.0 - b.0).abs() as f64;
    let dy = (a.1 - b.1).abs() as f64;
    let (lo, hi) = if dx < dy { (dx, dy) } else { (dy, dx) };
    hi + (std::f64::consts::SQRT_2 - 1.0) * lo
}

fn reconstruct(
    came_from: &HashMap<(i32, i32), (i32, i32)>,
    start: (i32, i32),
    goal: (i32, i32),
) -> Vec<(i32, i32)> {
    let mut cells = vec![goal];
    let mut current = goal;

    while current != start {
        match came_from.get(&current) {
            Some(&prev) => {
                cells.push(prev);
                current = prev;
            }
            None => break,
        }
    }

    cells.reverse();
    cells
}

/// Node in the A* open set.
#[derive(Clone)]
struct AStarNode {
    cell: (i32, i32),
    f_score: f64,
}

impl Eq for AStarNode {}

impl PartialEq for AStarNode {
    fn eq(&self, other: &Self) -> bool {
        self.cell == other.cell
    }
}

impl Ord for AStarNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (lower f_score = higher priority)
        other
            .f_score
            .partial_cmp(&self.f_score)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for AStarNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn planner_for(meta: &MapMetadata, robot_radius: f64) -> AStarPlanner {
        AStarPlanner::new(
            meta,
            AStarConfig {
                robot_radius,
                ..AStarConfig::default()
            },
        )
    }

    #[test]
    fn test_simple_path() {
        let meta = MapMetadata::free(10, 10, 0.3, 0.0, 0.0);
        let planner = planner_for(&meta, 0.0);

        let path = planner.plan((0.0, 0.0), (2.7, 0.0)).unwrap();
        assert_eq!(path.len(), 10);
        let (x, y) = *path.last().unwrap();
        assert_abs_diff_eq!(x, 2.7, epsilon = 1e-9);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_start_equals_goal() {
        let meta = MapMetadata::free(4, 4, 0.5, 0.0, 0.0);
        let planner = planner_for(&meta, 0.0);

        let path = planner.plan((1.0, 1.0), (1.05, 0.98)).unwrap();
        assert_eq!(path.len(), 1);
    }

    #[test]
    fn test_path_around_wall() {
        let mut meta = MapMetadata::free(20, 20, 0.1, 0.0, 0.0);
        for y in 0..15 {
            meta = meta.with_obstacle(10, y);
        }
        let planner = planner_for(&meta, 0.1);

        let path = planner.plan((0.2, 0.2), (1.8, 0.2)).unwrap();
        // Must detour above the wall (inflated to y = 16)
        assert!(path.iter().any(|&(_, y)| y >= 1.6 - 1e-9));
        for &(x, y) in &path {
            let (ix, iy) = planner.grid().pos_to_index(x, y);
            assert!(planner.grid().is_free(ix, iy));
        }
    }

    #[test]
    fn test_no_path_to_enclosed_goal() {
        let mut meta = MapMetadata::free(12, 12, 1.0, 0.0, 0.0);
        for i in 4..=8 {
            meta = meta
                .with_obstacle(i, 4)
                .with_obstacle(i, 8)
                .with_obstacle(4, i)
                .with_obstacle(8, i);
        }
        let planner = planner_for(&meta, 0.0);

        assert_eq!(
            planner.plan((0.0, 0.0), (6.0, 6.0)),
            Err(PlanningError::NoPathFound)
        );
    }

    #[test]
    fn test_invalid_endpoints() {
        let meta = MapMetadata::free(5, 5, 1.0, 0.0, 0.0).with_obstacle(2, 2);
        let planner = planner_for(&meta, 0.0);

        assert_eq!(
            planner.plan((-3.0, 0.0), (1.0, 1.0)),
            Err(PlanningError::StartOutOfBounds(-3, 0))
        );
        assert_eq!(
            planner.plan((0.0, 0.0), (9.0, 1.0)),
            Err(PlanningError::GoalOutOfBounds(9, 1))
        );
        assert_eq!(
            planner.plan((2.0, 2.0), (0.0, 0.0)),
            Err(PlanningError::StartInObstacle(2, 2))
        );
        assert_eq!(
            planner.plan((0.0, 0.0), (2.0, 2.0)),
            Err(PlanningError::GoalInObstacle(2, 2))
        );
    }

    #[test]
    fn test_octile_heuristic() {
        assert_abs_diff_eq!(octile((0, 0), (3, 0)), 3.0);
        assert_abs_diff_eq!(
            octile((0, 0), (2, 2)),
            2.0 * std::f64::consts::SQRT_2,
            epsilon = 1e-12
        );
    }
}
