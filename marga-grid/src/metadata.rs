//! Map metadata derived from an occupancy grid document.

use crate::error::MapError;
use crate::messages::RawOccupancyGrid;

/// Occupancy value at or above which a cell counts as an obstacle.
pub const DEFAULT_OCCUPANCY_THRESHOLD: i8 = 50;

/// Immutable description of a map: geometry plus obstacle mask.
#[derive(Clone, Debug, PartialEq)]
pub struct MapMetadata {
    /// World x of cell (0, 0)
    pub origin_x: f64,
    /// World y of cell (0, 0)
    pub origin_y: f64,
    /// Meters per cell
    pub resolution: f64,
    pub width: usize,
    pub height: usize,
    /// Threshold used to classify obstacles
    pub occupancy_threshold: i8,
    /// Row-major obstacle mask (true = obstacle)
    obstacles: Vec<bool>,
}

impl MapMetadata {
    /// Build metadata from an occupancy document.
    ///
    /// # Arguments
    /// * `grid` - Raw occupancy grid
    /// * `threshold` - Cells with `value >= threshold` are obstacles
    /// * `unknown_is_obstacle` - Treat unknown (`< 0`) cells as obstacles
    pub fn from_occupancy(
        grid: &RawOccupancyGrid,
        threshold: i8,
        unknown_is_obstacle: bool,
    ) -> Result<Self, MapError> {
        let width = grid.info.width as usize;
        let height = grid.info.height as usize;
        let resolution = grid.info.resolution;

        if width == 0 || height == 0 {
            return Err(MapError::Empty);
        }
        if !resolution.is_finite() || resolution <= 0.0 {
            return Err(MapError::InvalidResolution(resolution));
        }
        if grid.data.len() != width * height {
            return Err(MapError::DataSizeMismatch {
                expected: width * height,
                actual: grid.data.len(),
            });
        }

        let obstacles = grid
            .data
            .iter()
            .map(|&v| if v < 0 { unknown_is_obstacle } else { v >= threshold })
            .collect();

        Ok(Self {
            origin_x: grid.info.origin.position.x,
            origin_y: grid.info.origin.position.y,
            resolution,
            width,
            height,
            occupancy_threshold: threshold,
            obstacles,
        })
    }

    /// All-free map, mostly useful for tests and simulation.
    pub fn free(width: usize, height: usize, resolution: f64, origin_x: f64, origin_y: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            resolution,
            width,
            height,
            occupancy_threshold: DEFAULT_OCCUPANCY_THRESHOLD,
            obstacles: vec![false; width * height],
        }
    }

    /// Mark a single cell as obstacle. Out-of-range cells are ignored.
    pub fn with_obstacle(mut self, x: usize, y: usize) -> Self {
        if x < self.width && y < self.height {
            self.obstacles[y * self.width + x] = true;
        }
        self
    }

    /// Check whether cell `(x, y)` is an obstacle. Out-of-range is not.
    pub fn is_obstacle(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.obstacles[y * self.width + x]
    }

    /// Iterate over obstacle cell coordinates.
    pub fn obstacle_cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.obstacles
            .iter()
            .enumerate()
            .filter(|(_, blocked)| **blocked)
            .map(|(idx, _)| (idx % self.width, idx / self.width))
    }

    pub fn obstacle_count(&self) -> usize {
        self.obstacles.iter().filter(|&&b| b).count()
    }

    /// World-space extent `(width_m, height_m)`.
    pub fn extent(&self) -> (f64, f64) {
        (
            self.width as f64 * self.resolution,
            self.height as f64 * self.resolution,
        )
    }
}
