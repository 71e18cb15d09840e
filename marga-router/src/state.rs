//! Shared map state between the ingestion thread and request handlers.
//!
//! The view is swapped as a whole under a write lock, so readers always see
//! a metadata/model pair built from the same costmap. Readers clone the
//! `Arc`s under a read lock and plan without holding it; models are never
//! mutated after construction.

use std::sync::Arc;

use marga_grid::MapMetadata;
use parking_lot::RwLock;

use crate::planning::{PlanarPlanner, TimedGridModel};

/// Models built from one costmap.
#[derive(Clone)]
pub struct ModelBuild {
    pub metadata: Arc<MapMetadata>,
    pub timed: Option<Arc<dyn TimedGridModel>>,
    pub planar: Option<Arc<dyn PlanarPlanner>>,
}

/// Consistent snapshot of the shared map state.
#[derive(Clone, Default)]
pub struct MapView {
    pub metadata: Option<Arc<MapMetadata>>,
    pub timed: Option<Arc<dyn TimedGridModel>>,
    pub planar: Option<Arc<dyn PlanarPlanner>>,
    /// Set after the first successful live costmap build
    pub ready: bool,
    /// Incremented on every swap
    pub generation: u64,
}

/// Lock-guarded holder for the current map view.
#[derive(Default)]
pub struct SharedMap {
    inner: RwLock<MapView>,
}

impl SharedMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone the current view. The lock is held only for the clone.
    pub fn snapshot(&self) -> MapView {
        self.inner.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.read().ready
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Replace the models and optionally set the readiness flag.
    ///
    /// Returns the new generation.
    pub fn publish(&self, build: ModelBuild, mark_ready: bool) -> u64 {
        let mut view = self.inner.write();
        view.metadata = Some(build.metadata);
        view.timed = build.timed;
        view.planar = build.planar;
        view.ready |= mark_ready;
        view.generation += 1;
        view.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(width: usize) -> ModelBuild {
        ModelBuild {
            metadata: Arc::new(MapMetadata::free(width, width, 0.3, 0.0, 0.0)),
            timed: None,
            planar: None,
        }
    }

    #[test]
    fn test_initial_view_is_empty() {
        let shared = SharedMap::new();
        let view = shared.snapshot();

        assert!(view.metadata.is_none());
        assert!(view.timed.is_none());
        assert!(!view.ready);
        assert_eq!(view.generation, 0);
    }

    #[test]
    fn test_publish_swaps_whole_view() {
        let shared = SharedMap::new();
        assert_eq!(shared.publish(build(5), false), 1);
        assert!(!shared.is_ready());

        let before = shared.snapshot();
        assert_eq!(shared.publish(build(8), true), 2);
        let after = shared.snapshot();

        // Old snapshot keeps its own metadata alive
        assert_eq!(before.metadata.unwrap().width, 5);
        assert_eq!(after.metadata.unwrap().width, 8);
        assert!(after.ready);
    }

    #[test]
    fn test_ready_flag_is_sticky() {
        let shared = SharedMap::new();
        shared.publish(build(5), true);
        shared.publish(build(5), false);
        assert!(shared.is_ready());
    }

    #[test]
    fn test_concurrent_readers_see_complete_views() {
        let shared = Arc::new(SharedMap::new());
        let writer = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || {
                for width in 1..200 {
                    shared.publish(build(width), true);
                }
            })
        };

        for _ in 0..500 {
            let view = shared.snapshot();
            if let Some(meta) = view.metadata {
                assert_eq!(meta.width, meta.height);
                assert!(view.generation > 0);
            }
        }
        writer.join().unwrap();
        assert_eq!(shared.generation(), 199);
    }
}
