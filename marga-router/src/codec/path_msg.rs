//! Path reply document.
//!
//! Shaped like `nav_msgs/Path`. In timed mode every pose stamp carries the
//! arrival time at that waypoint; planar replies leave stamps at zero.

use marga_grid::messages::{Header, Point, Pose, PoseStamped, Stamp};
use serde::{Deserialize, Serialize};

use crate::planning::{PlannerMode, Route};

const FRAME_ID: &str = "map";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PathMsg {
    pub header: Header,
    pub poses: Vec<PoseStamped>,
}

impl PathMsg {
    pub fn from_route(route: &Route, mode: PlannerMode) -> Self {
        let poses = route
            .waypoints
            .iter()
            .map(|wp| {
                let stamp = match mode {
                    PlannerMode::Timed3D => Stamp::from_secs_f64(wp.t),
                    PlannerMode::Planar2D => Stamp::default(),
                };
                PoseStamped {
                    header: Header {
                        seq: 0,
                        stamp,
                        frame_id: FRAME_ID.to_string(),
                    },
                    pose: Pose {
                        position: Point {
                            x: wp.x,
                            y: wp.y,
                            z: 0.0,
                        },
                        ..Pose::default()
                    },
                }
            })
            .collect();

        Self {
            header: Header {
                frame_id: FRAME_ID.to_string(),
                ..Header::default()
            },
            poses,
        }
    }
}
