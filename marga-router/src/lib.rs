//! MargaRouter - routing broker for a multi-robot fleet.
//!
//! Listens for costmap updates, keeps a grid model of the environment, and
//! answers per-robot destination requests with planned paths published
//! back through the pub-sub bus.
//!
//! ## Architecture
//!
//! ```text
//! costmap topic / gateway ──► ingestion ──► SharedMap
//!                                              │
//! routing channel ──► RouteHandler ──► dispatch ──► codec ──► reply client
//! ```
//!
//! - **codec**: protobuf envelopes and JSON documents
//! - **ingestion**: costmap queue consumer, MQTT feed, SVG snapshot
//! - **planning**: collaborator traits and mode dispatch
//! - **handler**: one routing supply in, one reply out
//! - **supervisor**: service clients with reconnect and subscription loops
//! - **backend**: pub-sub seam with in-memory and TCP implementations
//! - **service**: wiring and lifecycle

pub mod backend;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod ingestion;
pub mod planning;
pub mod service;
pub mod state;
pub mod supervisor;

pub use config::RouterConfig;
pub use error::{Result, RouterError};
pub use handler::{HandleOutcome, RouteHandler};
pub use planning::{PlannerMode, Route, Waypoint};
pub use service::RouterService;
pub use state::{MapView, SharedMap};
