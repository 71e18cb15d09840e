//! ROS-shaped message documents.
//!
//! Field layout follows `nav_msgs/OccupancyGrid` and `nav_msgs/Path` as they
//! are serialized to JSON by the map gateway. Missing headers and poses
//! deserialize to their defaults so hand-written documents stay short.

use serde::{Deserialize, Serialize};

/// Timestamp as seconds + nanoseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Stamp {
    #[serde(default)]
    pub secs: i64,
    #[serde(default)]
    pub nsecs: u32,
}

impl Stamp {
    /// Build a stamp from fractional seconds.
    pub fn from_secs_f64(t: f64) -> Self {
        let secs = t.floor();
        let nsecs = ((t - secs) * 1e9).round().min(999_999_999.0) as u32;
        Self {
            secs: secs as i64,
            nsecs,
        }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + self.nsecs as f64 * 1e-9
    }
}

/// Standard message header.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub seq: u32,
    #[serde(default)]
    pub stamp: Stamp,
    #[serde(default)]
    pub frame_id: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default = "default_w")]
    pub w: f64,
}

fn default_w() -> f64 {
    1.0
}

impl Default for Quaternion {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    #[serde(default)]
    pub position: Point,
    #[serde(default)]
    pub orientation: Quaternion,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseStamped {
    #[serde(default)]
    pub header: Header,
    pub pose: Pose,
}

/// Metadata about the map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MapInfo {
    #[serde(default)]
    pub map_load_time: Stamp,
    /// Map resolution (meters/cell)
    pub resolution: f64,
    /// Width in cells
    pub width: u32,
    /// Height in cells
    pub height: u32,
    /// Real-world pose of cell (0, 0)
    #[serde(default)]
    pub origin: Pose,
}

/// Occupancy grid as published on the costmap topic.
///
/// `data` is row-major starting at (0, 0). Occupancy is in `[0, 100]`,
/// unknown is `-1`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOccupancyGrid {
    #[serde(default)]
    pub header: Header,
    pub info: MapInfo,
    pub data: Vec<i8>,
}

impl RawOccupancyGrid {
    /// All-free grid with the origin at `(origin_x, origin_y)`.
    pub fn free(width: u32, height: u32, resolution: f64, origin_x: f64, origin_y: f64) -> Self {
        Self {
            header: Header {
                frame_id: "map".to_string(),
                ..Header::default()
            },
            info: MapInfo {
                resolution,
                width,
                height,
                origin: Pose {
                    position: Point {
                        x: origin_x,
                        y: origin_y,
                        z: 0.0,
                    },
                    ..Pose::default()
                },
                ..MapInfo::default()
            },
            data: vec![0; (width * height) as usize],
        }
    }

    /// Set the occupancy value of cell `(x, y)`. Out-of-range cells are ignored.
    pub fn set(&mut self, x: u32, y: u32, value: i8) {
        if x < self.info.width && y < self.info.height {
            let idx = (y * self.info.width + x) as usize;
            if let Some(cell) = self.data.get_mut(idx) {
                *cell = value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_document_uses_defaults() {
        let json = r#"{"info":{"resolution":0.3,"width":2,"height":1},"data":[0,100]}"#;
        let grid: RawOccupancyGrid = serde_json::from_str(json).unwrap();

        assert_eq!(grid.info.width, 2);
        assert_eq!(grid.info.origin.orientation.w, 1.0);
        assert_eq!(grid.data, vec![0, 100]);
    }

    #[test]
    fn test_stamp_fractional_seconds() {
        let stamp = Stamp::from_secs_f64(2.5);
        assert_eq!(stamp.secs, 2);
        assert_eq!(stamp.nsecs, 500_000_000);
        approx::assert_relative_eq!(stamp.as_secs_f64(), 2.5);
    }

    #[test]
    fn test_set_ignores_out_of_range() {
        let mut grid = RawOccupancyGrid::free(3, 3, 0.1, 0.0, 0.0);
        grid.set(1, 2, 100);
        grid.set(5, 5, 100);

        assert_eq!(grid.data[7], 100);
        assert_eq!(grid.data.iter().filter(|&&v| v == 100).count(), 1);
    }
}
