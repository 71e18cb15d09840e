//! Pub-sub backend seam.
//!
//! The broker only needs three capabilities from the service bus: node
//! registration, opening a connection to the backend, and per-channel
//! subscribe/notify on that connection. Two implementations are provided:
//!
//! - [`MemoryBackend`]: in-process broker with failure injection, used by
//!   tests and local runs
//! - [`TcpBackend`]: client speaking length-prefixed protobuf frames

pub mod memory;
pub mod tcp;

use std::sync::Arc;

use crate::codec::{Content, Supply};
use crate::error::Result;

pub use memory::MemoryBackend;
pub use tcp::TcpBackend;

/// One open connection to the pub-sub backend.
pub trait BackendLink: Send + Sync {
    /// Subscribe to supplies on `channel`, invoking `on_supply` for each one.
    ///
    /// Blocks until the stream ends. Any return, `Ok` or `Err`, means the
    /// subscription is gone.
    fn subscribe_supply(&self, channel: u32, on_supply: &mut dyn FnMut(Supply)) -> Result<()>;

    /// Publish a supply on `channel`. Returns the backend-assigned id.
    fn notify_supply(&self, channel: u32, name: &str, content: Content) -> Result<u64>;

    /// Tear the connection down, unblocking any subscriber.
    fn close(&self) {}
}

/// Opens connections to a backend address.
pub trait BackendConnector: Send + Sync {
    fn connect(&self, address: &str) -> Result<Arc<dyn BackendLink>>;
}

/// Service discovery.
pub trait NodeRegistry: Send + Sync {
    /// Register `name` offering `channels`; returns the backend address.
    fn register_node(&self, node_server: &str, name: &str, channels: &[u32]) -> Result<String>;

    fn unregister_node(&self) -> Result<()>;
}
