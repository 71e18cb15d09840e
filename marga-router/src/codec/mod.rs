//! Wire codec for the routing broker.
//!
//! # Payloads
//!
//! ```text
//! routing channel ──► Supply { cdata: Content { entity: DestinationRequest } }
//! reply           ◄── Supply { name: "robotRoute",
//!                              cdata: Content { entity: MqttRecord {
//!                                  topic: "robot/path/{id}",
//!                                  record: PathMsg (JSON) } } }
//! costmap topic   ──► RawOccupancyGrid (JSON)
//! ```
//!
//! Binary envelopes are protobuf, documents are JSON. Decode failures are
//! returned as `RouterError::Decode` so callers can skip the message; an
//! empty route always encodes to a document with no poses.

mod path_msg;
pub mod proto;

pub use path_msg::PathMsg;
pub use proto::{Content, MqttRecord, Supply};

use marga_grid::RawOccupancyGrid;
use prost::Message as ProstMessage;

use crate::error::{Result, RouterError};
use crate::planning::{PlannerMode, Route};

/// Default routing channel identifier.
pub const ROUTING_SERVICE: u32 = 4;
/// Default map-gateway channel identifier.
pub const MQTT_GATEWAY_SVC: u32 = 17;
/// Supply name used for path replies.
pub const ROUTE_SUPPLY_NAME: &str = "robotRoute";

/// Decoded routing request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DestinationRequest {
    pub robot_id: u32,
    /// Current position (x, y)
    pub current: (f64, f64),
    /// Destination position (x, y)
    pub destination: (f64, f64),
}

impl DestinationRequest {
    pub fn to_proto(&self) -> proto::DestinationRequest {
        proto::DestinationRequest {
            robot_id: self.robot_id,
            current: Some(proto::Point {
                x: self.current.0 as f32,
                y: self.current.1 as f32,
            }),
            destination: Some(proto::Point {
                x: self.destination.0 as f32,
                y: self.destination.1 as f32,
            }),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_proto().encode_to_vec()
    }
}

/// Decode a serialized destination request.
pub fn decode_destination_request(bytes: &[u8]) -> Result<DestinationRequest> {
    let msg = proto::DestinationRequest::decode(bytes)?;

    let current = msg
        .current
        .ok_or_else(|| RouterError::Decode("request has no current position".into()))?;
    let destination = msg
        .destination
        .ok_or_else(|| RouterError::Decode("request has no destination".into()))?;

    Ok(DestinationRequest {
        robot_id: msg.robot_id,
        current: (current.x as f64, current.y as f64),
        destination: (destination.x as f64, destination.y as f64),
    })
}

/// Encode a route as a path document. Mode picks timed or planar stamps.
pub fn encode_path_reply(route: &Route, mode: PlannerMode) -> Result<Vec<u8>> {
    serde_json::to_vec(&PathMsg::from_route(route, mode))
        .map_err(|e| RouterError::Encode(e.to_string()))
}

/// Build the transport record for `topic`.
pub fn wrap_for_transport(topic: &str, payload: Vec<u8>) -> Vec<u8> {
    MqttRecord {
        topic: topic.to_string(),
        record: payload,
    }
    .encode_to_vec()
}

/// Decode a transport record.
pub fn unwrap_transport(bytes: &[u8]) -> Result<MqttRecord> {
    Ok(MqttRecord::decode(bytes)?)
}

/// Decode an occupancy grid document and check its data size.
pub fn decode_occupancy_update(bytes: &[u8]) -> Result<RawOccupancyGrid> {
    let grid: RawOccupancyGrid = serde_json::from_slice(bytes)?;

    let expected = grid.info.width as usize * grid.info.height as usize;
    if grid.data.len() != expected {
        return Err(RouterError::Decode(format!(
            "occupancy data has {} cells, expected {}",
            grid.data.len(),
            expected
        )));
    }

    Ok(grid)
}

/// Reply topic for a robot.
pub fn path_topic(robot_id: u32) -> String {
    format!("robot/path/{}", robot_id)
}
