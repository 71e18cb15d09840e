//! Protobuf payloads exchanged over the pub-sub backend.
//!
//! Declared with prost derives so the workspace builds without protoc.
//! Tags match the service bus schemas.

/// 2D point in map coordinates.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Point {
    #[prost(float, tag = "1")]
    pub x: f32,
    #[prost(float, tag = "2")]
    pub y: f32,
}

/// Per-robot routing request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DestinationRequest {
    #[prost(uint32, tag = "1")]
    pub robot_id: u32,
    #[prost(message, optional, tag = "2")]
    pub current: Option<Point>,
    #[prost(message, optional, tag = "3")]
    pub destination: Option<Point>,
}

/// MQTT record forwarded by the map gateway.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MqttRecord {
    #[prost(string, tag = "1")]
    pub topic: String,
    #[prost(bytes = "vec", tag = "2")]
    pub record: Vec<u8>,
}

/// Opaque application payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Content {
    #[prost(bytes = "vec", tag = "1")]
    pub entity: Vec<u8>,
}

/// Supply notification envelope.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Supply {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint64, tag = "2")]
    pub sender_id: u64,
    #[prost(uint64, tag = "3")]
    pub target_id: u64,
    #[prost(uint32, tag = "4")]
    pub channel_type: u32,
    #[prost(string, tag = "5")]
    pub supply_name: String,
    #[prost(string, tag = "7")]
    pub arg_json: String,
    #[prost(message, optional, tag = "9")]
    pub cdata: Option<Content>,
}

impl Supply {
    /// Entity bytes of the content, empty when absent.
    pub fn entity(&self) -> &[u8] {
        self.cdata
            .as_ref()
            .map(|c| c.entity.as_slice())
            .unwrap_or_default()
    }
}
