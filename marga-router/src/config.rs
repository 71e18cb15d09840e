//! Configuration loading for MargaRouter

use crate::error::{Result, RouterError};
use crate::ingestion::IngestionPolicy;
use crate::planning::PlannerMode;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub channels: ChannelConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub static_map: StaticMapConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

/// Service discovery settings
#[derive(Clone, Debug, Deserialize)]
pub struct NodeConfig {
    /// Name this process registers under
    #[serde(default = "default_node_name")]
    pub name: String,

    /// Node server address (default: 127.0.0.1:9990)
    #[serde(default = "default_node_server")]
    pub server: String,
}

/// MQTT broker carrying the costmap topic
#[derive(Clone, Debug, Deserialize)]
pub struct MqttConfig {
    /// Broker host (default: localhost)
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port (default: 1883)
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Topic carrying occupancy grid documents
    #[serde(default = "default_costmap_topic")]
    pub costmap_topic: String,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Capacity of the costmap queue between feed and ingestion
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Which client carries path replies
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyChannel {
    /// Map-gateway client (the gateway forwards the record to MQTT)
    #[default]
    Gateway,
    /// Routing client
    Routing,
}

/// Pub-sub channel identifiers
#[derive(Clone, Debug, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_map_gateway_channel")]
    pub map_gateway: u32,

    #[serde(default = "default_routing_channel")]
    pub routing: u32,

    #[serde(default)]
    pub reply: ReplyChannel,
}

/// Planner parameters
#[derive(Clone, Debug, Deserialize)]
pub struct PlannerConfig {
    #[serde(default)]
    pub mode: PlannerMode,

    /// Robot radius for obstacle inflation (meters)
    #[serde(default = "default_robot_radius")]
    pub robot_radius: f64,

    /// Occupancy value at or above which a cell is an obstacle
    #[serde(default = "default_occupancy_threshold")]
    pub occupancy_threshold: i8,

    /// Treat unknown cells as obstacles
    #[serde(default)]
    pub unknown_is_obstacle: bool,

    /// Time horizon of the timed grid (steps)
    #[serde(default = "default_max_time_steps")]
    pub max_time_steps: u32,

    /// Duration of one time step (seconds)
    #[serde(default = "default_step_duration")]
    pub step_duration: f64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct IngestionConfig {
    #[serde(default)]
    pub policy: IngestionPolicy,
}

/// Reconnect timing for pub-sub clients
#[derive(Clone, Debug, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before a reconnect attempt in milliseconds (default: 5000)
    #[serde(default = "default_reconnect_delay_ms")]
    pub delay_ms: u64,

    /// Growth factor per consecutive failure; 1.0 keeps the delay fixed
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for the grown delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct StaticMapConfig {
    /// Occupancy grid document loaded at startup
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SnapshotConfig {
    /// SVG written after each costmap build; an empty string disables it
    #[serde(default = "default_snapshot_path", deserialize_with = "deserialize_optional_path")]
    pub path: Option<PathBuf>,

    /// Pixels per meter
    #[serde(default = "default_snapshot_scale")]
    pub scale: f64,
}

// Default value functions
fn default_node_name() -> String {
    "GeoRoutingProvider".to_string()
}
fn default_node_server() -> String {
    "127.0.0.1:9990".to_string()
}
fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "marga-router".to_string()
}
fn default_costmap_topic() -> String {
    "map/global_costmap".to_string()
}
fn default_keep_alive_secs() -> u64 {
    5
}
fn default_queue_capacity() -> usize {
    16
}
fn default_map_gateway_channel() -> u32 {
    crate::codec::MQTT_GATEWAY_SVC
}
fn default_routing_channel() -> u32 {
    crate::codec::ROUTING_SERVICE
}
fn default_robot_radius() -> f64 {
    0.35
}
fn default_occupancy_threshold() -> i8 {
    marga_grid::DEFAULT_OCCUPANCY_THRESHOLD
}
fn default_max_time_steps() -> u32 {
    marga_grid::DEFAULT_MAX_TIME_STEPS
}
fn default_step_duration() -> f64 {
    1.0
}
fn default_reconnect_delay_ms() -> u64 {
    5000
}
fn default_backoff_multiplier() -> f64 {
    1.0
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_snapshot_path() -> Option<PathBuf> {
    Some(PathBuf::from("map/global_costmap.svg"))
}
fn default_snapshot_scale() -> f64 {
    20.0
}

fn deserialize_optional_path<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<PathBuf>, D::Error> {
    let path = String::deserialize(deserializer)?;
    Ok((!path.is_empty()).then(|| PathBuf::from(path)))
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            server: default_node_server(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            costmap_topic: default_costmap_topic(),
            keep_alive_secs: default_keep_alive_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            map_gateway: default_map_gateway_channel(),
            routing: default_routing_channel(),
            reply: ReplyChannel::default(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            mode: PlannerMode::default(),
            robot_radius: default_robot_radius(),
            occupancy_threshold: default_occupancy_threshold(),
            unknown_is_obstacle: false,
            max_time_steps: default_max_time_steps(),
            step_duration: default_step_duration(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_reconnect_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: default_snapshot_path(),
            scale: default_snapshot_scale(),
        }
    }
}

impl ReconnectConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.delay_ms))
    }
}

impl RouterConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RouterError::Config(format!("Failed to read config file: {}", e)))?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: RouterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the planner or supervisor cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.planner.robot_radius.is_finite() || self.planner.robot_radius < 0.0 {
            return Err(RouterError::Config(format!(
                "robot_radius must be finite and non-negative, got {}",
                self.planner.robot_radius
            )));
        }
        if !self.planner.step_duration.is_finite() || self.planner.step_duration <= 0.0 {
            return Err(RouterError::Config(format!(
                "step_duration must be positive, got {}",
                self.planner.step_duration
            )));
        }
        if self.planner.max_time_steps == 0 {
            return Err(RouterError::Config("max_time_steps must be positive".into()));
        }
        if self.reconnect.backoff_multiplier < 1.0 {
            return Err(RouterError::Config(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.reconnect.backoff_multiplier
            )));
        }
        if self.mqtt.queue_capacity == 0 {
            return Err(RouterError::Config("queue_capacity must be positive".into()));
        }
        Ok(())
    }
}
