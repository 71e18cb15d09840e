//! Error types for MargaRouter

use marga_grid::{MapError, PlanningError};
use thiserror::Error;

/// MargaRouter error type
#[derive(Error, Debug)]
pub enum RouterError {
    /// Malformed wire payload; the message is skipped.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    /// A request arrived before the first costmap was built.
    #[error("Grid model not ready")]
    ModelNotReady,

    #[error("Planning error: {0}")]
    Planning(#[from] PlanningError),

    #[error("Map error: {0}")]
    Map(#[from] MapError),

    #[error("Publish failed: {0}")]
    Publish(String),

    /// The subscription stream ended or broke.
    #[error("Transport disconnected: {0}")]
    TransportDisconnect(String),

    /// The client slot holds no transport handle.
    #[error("Client not connected")]
    NotConnected,

    #[error("Registration failed: {0}")]
    Registration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<prost::DecodeError> for RouterError {
    fn from(e: prost::DecodeError) -> Self {
        RouterError::Decode(e.to_string())
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(e: serde_json::Error) -> Self {
        RouterError::Decode(e.to_string())
    }
}

impl From<toml::de::Error> for RouterError {
    fn from(e: toml::de::Error) -> Self {
        RouterError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
