//! Costmap ingestion pipeline.
//!
//! Turns occupancy grid documents into the grid model for the active
//! planning mode and publishes it into the [`SharedMap`]:
//!
//! ```text
//! MQTT feed ─┐
//!            ├─► bounded queue ─► CostmapIngestor ─► SharedMap ─► handlers
//! gateway  ──┘                        │
//!                                     └─► SVG snapshot
//! ```
//!
//! Decoding and model construction happen on the ingestion thread without
//! holding the map lock; only the swap is done under it.

pub mod feed;
pub mod snapshot;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use marga_grid::MapMetadata;
use serde::Deserialize;

use crate::codec;
use crate::config::PlannerConfig;
use crate::error::Result;
use crate::planning::{PlannerMode, build_models};
use crate::state::SharedMap;

pub use snapshot::SnapshotWriter;

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// When live costmap updates rebuild the model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionPolicy {
    /// Build once from the first live update, discard the rest
    FirstOnly,
    /// Rebuild and swap on every update
    #[default]
    EveryUpdate,
}

/// Ingestion state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestState {
    AwaitingFirstMap,
    Ready,
}

/// Result of processing a single update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new model was published under this generation
    Built { generation: u64 },
    /// Ignored by the first-only policy
    Discarded,
    /// Undecodable or unusable document
    Rejected,
}

/// Consumes costmap documents and maintains the shared model.
pub struct CostmapIngestor {
    shared: Arc<SharedMap>,
    mode: PlannerMode,
    planner: PlannerConfig,
    policy: IngestionPolicy,
    snapshot: Option<SnapshotWriter>,
    state: IngestState,
    updates_received: u64,
}

impl CostmapIngestor {
    pub fn new(
        shared: Arc<SharedMap>,
        planner: PlannerConfig,
        policy: IngestionPolicy,
        snapshot: Option<SnapshotWriter>,
    ) -> Self {
        Self {
            shared,
            mode: planner.mode,
            planner,
            policy,
            snapshot,
            state: IngestState::AwaitingFirstMap,
            updates_received: 0,
        }
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    pub fn updates_received(&self) -> u64 {
        self.updates_received
    }

    /// Build the initial model from a static occupancy document.
    ///
    /// Does not mark the service ready; only a live update does.
    pub fn load_static_map(&mut self, path: &Path) -> Result<u64> {
        let bytes = std::fs::read(path)?;
        let metadata = self.decode(&bytes)?;

        tracing::info!(
            "Loaded static map {}: {}x{} @ {:.3} m/cell, {} obstacle cells",
            path.display(),
            metadata.width,
            metadata.height,
            metadata.resolution,
            metadata.obstacle_count()
        );
        Ok(self.install(metadata, false))
    }

    /// Process one live costmap update.
    pub fn process_update(&mut self, bytes: &[u8]) -> IngestOutcome {
        self.updates_received += 1;

        if self.policy == IngestionPolicy::FirstOnly && self.state == IngestState::Ready {
            tracing::debug!(
                "Costmap update #{} discarded (model already built)",
                self.updates_received
            );
            return IngestOutcome::Discarded;
        }

        let metadata = match self.decode(bytes) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("Skipping costmap update #{}: {}", self.updates_received, e);
                return IngestOutcome::Rejected;
            }
        };

        let first = self.state == IngestState::AwaitingFirstMap;
        let generation = self.install(metadata, true);
        self.state = IngestState::Ready;

        if first {
            tracing::info!("Costmap received, {} model ready (generation {})", self.mode, generation);
        } else {
            tracing::debug!("Costmap model replaced (generation {})", generation);
        }

        IngestOutcome::Built { generation }
    }

    /// Consume updates until the queue closes or `running` is cleared.
    pub fn run(mut self, rx: Receiver<Vec<u8>>, running: Arc<AtomicBool>) {
        tracing::info!("Costmap ingestion started ({:?} policy)", self.policy);

        while running.load(Ordering::Relaxed) {
            match rx.recv_timeout(RECV_TIMEOUT) {
                Ok(bytes) => {
                    self.process_update(&bytes);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!("Costmap queue closed, ingestion exiting");
                    break;
                }
            }
        }

        tracing::info!(
            "Costmap ingestion stopped after {} updates",
            self.updates_received
        );
    }

    fn decode(&self, bytes: &[u8]) -> Result<MapMetadata> {
        let grid = codec::decode_occupancy_update(bytes)?;
        Ok(MapMetadata::from_occupancy(
            &grid,
            self.planner.occupancy_threshold,
            self.planner.unknown_is_obstacle,
        )?)
    }

    fn install(&self, metadata: MapMetadata, mark_ready: bool) -> u64 {
        let build = build_models(metadata, self.mode, &self.planner);
        let metadata = Arc::clone(&build.metadata);
        let generation = self.shared.publish(build, mark_ready);

        if let Some(writer) = &self.snapshot {
            if let Err(e) = writer.write(&metadata) {
                tracing::warn!("Failed to write costmap snapshot {}: {}", writer.path().display(), e);
            }
        }
        generation
    }
}
