//! Obstacle inflation and position/index mapping.

use crate::metadata::MapMetadata;

/// Obstacle grid expanded by the robot footprint.
///
/// A cell is traversable when no obstacle lies within the inflation radius
/// (circular footprint, measured in cells). Indices are signed so callers
/// can map positions outside the map and check bounds afterwards.
#[derive(Clone, Debug)]
pub struct InflatedGrid {
    width: usize,
    height: usize,
    resolution: f64,
    origin_x: f64,
    origin_y: f64,
    /// true = free, false = blocked
    free: Vec<bool>,
    inflation_cells: i32,
}

impl InflatedGrid {
    /// Inflate the obstacles of `meta` by `robot_radius` meters.
    pub fn new(meta: &MapMetadata, robot_radius: f64) -> Self {
        // A radius past the map diagonal blocks nothing more
        let diagonal = (meta.width as f64).hypot(meta.height as f64).ceil();
        let inflation_cells = (robot_radius.max(0.0) / meta.resolution)
            .ceil()
            .min(diagonal) as i32;

        let mut grid = Self {
            width: meta.width,
            height: meta.height,
            resolution: meta.resolution,
            origin_x: meta.origin_x,
            origin_y: meta.origin_y,
            free: vec![true; meta.width * meta.height],
            inflation_cells,
        };

        for (x, y) in meta.obstacle_cells() {
            grid.inflate_cell(x as i32, y as i32);
        }

        grid
    }

    fn inflate_cell(&mut self, cx: i32, cy: i32) {
        let r = i64::from(self.inflation_cells);
        let (cx, cy) = (i64::from(cx), i64::from(cy));
        let (w, h) = (self.width as i64, self.height as i64);

        for ny in (cy - r).max(0)..=(cy + r).min(h - 1) {
            for nx in (cx - r).max(0)..=(cx + r).min(w - 1) {
                let (dx, dy) = (nx - cx, ny - cy);
                if dx * dx + dy * dy <= r * r {
                    self.free[ny as usize * self.width + nx as usize] = false;
                }
            }
        }
    }

    /// Map a world position to the nearest cell index.
    pub fn pos_to_index(&self, x: f64, y: f64) -> (i32, i32) {
        let ix = ((x - self.origin_x) / self.resolution).round() as i32;
        let iy = ((y - self.origin_y) / self.resolution).round() as i32;
        (ix, iy)
    }

    /// Map a cell index back to its world position.
    pub fn index_to_pos(&self, ix: i32, iy: i32) -> (f64, f64) {
        (
            self.origin_x + ix as f64 * self.resolution,
            self.origin_y + iy as f64 * self.resolution,
        )
    }

    pub fn contains(&self, ix: i32, iy: i32) -> bool {
        ix >= 0 && iy >= 0 && (ix as usize) < self.width && (iy as usize) < self.height
    }

    /// Check if a cell is inside the map and not blocked after inflation.
    pub fn is_free(&self, ix: i32, iy: i32) -> bool {
        self.contains(ix, iy) && self.free[iy as usize * self.width + ix as usize]
    }

    /// Traversable 8-connected neighbors with their step costs.
    ///
    /// Diagonal moves require both adjacent cardinal cells to be free so
    /// paths never cut obstacle corners.
    pub fn neighbors(&self, ix: i32, iy: i32) -> Vec<((i32, i32), f64)> {
        let mut result = Vec::with_capacity(8);

        for (dx, dy) in [(0, 1), (1, 0), (0, -1), (-1, 0)] {
            if self.is_free(ix + dx, iy + dy) {
                result.push(((ix + dx, iy + dy), 1.0));
            }
        }

        for (dx, dy) in [(1, 1), (1, -1), (-1, 1), (-1, -1)] {
            if self.is_free(ix + dx, iy + dy)
                && self.is_free(ix + dx, iy)
                && self.is_free(ix, iy + dy)
            {
                result.push(((ix + dx, iy + dy), std::f64::consts::SQRT_2));
            }
        }

        result
    }

    /// World positions of blocked cells (after inflation).
    pub fn blocked_positions(&self) -> Vec<(f64, f64)> {
        self.free
            .iter()
            .enumerate()
            .filter(|(_, free)| !**free)
            .map(|(idx, _)| {
                self.index_to_pos((idx % self.width) as i32, (idx / self.width) as i32)
            })
            .collect()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn inflation_cells(&self) -> i32 {
        self.inflation_cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_round_trip_within_one_cell() {
        let meta = MapMetadata::free(20, 12, 0.3, -1.5, 2.0);
        let grid = InflatedGrid::new(&meta, 0.35);

        let mut x = -1.5;
        while x < -1.5 + 19.5 * 0.3 {
            let mut y = 2.0;
            while y < 2.0 + 11.5 * 0.3 {
                let (ix, iy) = grid.pos_to_index(x, y);
                assert!(grid.contains(ix, iy), "({x}, {y}) mapped outside");
                let (px, py) = grid.index_to_pos(ix, iy);
                assert!((px - x).abs() <= 0.3);
                assert!((py - y).abs() <= 0.3);
                y += 0.07;
            }
            x += 0.07;
        }
    }

    #[test]
    fn test_exact_cell_positions() {
        let meta = MapMetadata::free(5, 5, 0.3, 0.0, 0.0);
        let grid = InflatedGrid::new(&meta, 0.35);

        assert_eq!(grid.pos_to_index(0.0, 0.0), (0, 0));
        assert_eq!(grid.pos_to_index(1.2, 1.2), (4, 4));
        let (x, y) = grid.index_to_pos(4, 4);
        assert_abs_diff_eq!(x, 1.2, epsilon = 1e-9);
        assert_abs_diff_eq!(y, 1.2, epsilon = 1e-9);
    }

    #[test]
    fn test_inflation_radius() {
        let meta = MapMetadata::free(11, 11, 0.1, 0.0, 0.0).with_obstacle(5, 5);
        let grid = InflatedGrid::new(&meta, 0.2);

        assert_eq!(grid.inflation_cells(), 2);
        assert!(!grid.is_free(5, 5));
        assert!(!grid.is_free(7, 5));
        assert!(!grid.is_free(6, 6));
        // (7, 7) is sqrt(8) cells away, outside a radius of 2
        assert!(grid.is_free(7, 7));
        assert!(grid.is_free(8, 5));
    }

    #[test]
    fn test_radius_clamped_to_map_diagonal() {
        let meta = MapMetadata::free(3, 3, 5e-6, 0.0, 0.0).with_obstacle(1, 1);
        let grid = InflatedGrid::new(&meta, 0.35);

        assert_eq!(grid.inflation_cells(), 5);
        assert_eq!(grid.blocked_positions().len(), 9);

        let grid = InflatedGrid::new(&meta, f64::INFINITY);
        assert_eq!(grid.inflation_cells(), 5);
        assert!(!grid.is_free(0, 0));
    }

    #[test]
    fn test_diagonal_blocked_by_corner() {
        let meta = MapMetadata::free(3, 3, 1.0, 0.0, 0.0).with_obstacle(1, 0);
        let grid = InflatedGrid::new(&meta, 0.0);

        let neighbors: Vec<_> = grid.neighbors(0, 0).into_iter().map(|(c, _)| c).collect();
        assert!(neighbors.contains(&(0, 1)));
        assert!(!neighbors.contains(&(1, 0)));
        assert!(!neighbors.contains(&(1, 1)));
    }
}
