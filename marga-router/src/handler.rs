//! Route request handling.
//!
//! One supply in, at most one reply out: decode the destination request,
//! plan against the current map view, encode the path and publish it as a
//! `robotRoute` supply. Planning failures still produce a reply carrying an
//! empty route; only undecodable requests are dropped without one.

use std::sync::Arc;

use crate::codec::{self, Content, ROUTE_SUPPLY_NAME, Supply};
use crate::planning::{self, PlannerMode, Route};
use crate::state::SharedMap;
use crate::supervisor::ServiceClient;

/// What happened to one routing supply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Undecodable request, no reply sent
    Dropped,
    /// Reply published on `topic`
    Published {
        topic: String,
        waypoints: usize,
        supply_id: u64,
    },
    /// Reply could not be encoded or published
    PublishFailed { topic: String },
}

/// Handles destination requests arriving on the routing channel.
pub struct RouteHandler {
    mode: PlannerMode,
    map: Arc<SharedMap>,
    reply: Arc<ServiceClient>,
}

impl RouteHandler {
    /// `reply` is the client path replies are published through.
    pub fn new(mode: PlannerMode, map: Arc<SharedMap>, reply: Arc<ServiceClient>) -> Self {
        Self { mode, map, reply }
    }

    pub fn handle_supply(&self, supply: &Supply) -> HandleOutcome {
        let request = match codec::decode_destination_request(supply.entity()) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Dropping routing supply {}: {}", supply.id, e);
                return HandleOutcome::Dropped;
            }
        };

        tracing::info!(
            "Route request from robot {}: ({:.2}, {:.2}) -> ({:.2}, {:.2})",
            request.robot_id,
            request.current.0,
            request.current.1,
            request.destination.0,
            request.destination.1
        );

        let view = self.map.snapshot();
        let route = match planning::dispatch(self.mode, &view, &request) {
            Ok(route) => route,
            Err(e) => {
                tracing::warn!("{}: replying to robot {} with an empty route", e, request.robot_id);
                Route::default()
            }
        };

        let topic = codec::path_topic(request.robot_id);
        let payload = match codec::encode_path_reply(&route, self.mode) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode route for {}: {}", topic, e);
                return HandleOutcome::PublishFailed { topic };
            }
        };

        let content = Content {
            entity: codec::wrap_for_transport(&topic, payload),
        };
        match self.reply.notify(ROUTE_SUPPLY_NAME, content) {
            Ok(supply_id) => {
                tracing::info!(
                    "Published {} waypoints to {} (supply {})",
                    route.len(),
                    topic,
                    supply_id
                );
                HandleOutcome::Published {
                    topic,
                    waypoints: route.len(),
                    supply_id,
                }
            }
            Err(e) => {
                tracing::error!("Failed to publish route to {}: {}", topic, e);
                HandleOutcome::PublishFailed { topic }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::backend::memory::MEMORY_ADDRESS;
    use crate::codec::{DestinationRequest, MQTT_GATEWAY_SVC, PathMsg};
    use crate::config::{PlannerConfig, ReconnectConfig};
    use crate::ingestion::{CostmapIngestor, IngestionPolicy};
    use crate::error::RouterError;
    use marga_grid::RawOccupancyGrid;
    use parking_lot::Mutex;
    use std::io;

    /// Captures formatted log output.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        backend: MemoryBackend,
        map: Arc<SharedMap>,
        handler: RouteHandler,
    }

    fn fixture(mode: PlannerMode) -> Fixture {
        let backend = MemoryBackend::new();
        let reply = Arc::new(ServiceClient::connect(
            "gateway",
            MQTT_GATEWAY_SVC,
            MEMORY_ADDRESS,
            Arc::new(backend.clone()),
            &ReconnectConfig::default(),
        ));
        let map = Arc::new(SharedMap::new());
        let handler = RouteHandler::new(mode, Arc::clone(&map), reply);
        Fixture { backend, map, handler }
    }

    fn load_free_map(map: &Arc<SharedMap>, mode: PlannerMode, size: u32) {
        let planner = PlannerConfig {
            mode,
            ..PlannerConfig::default()
        };
        let mut ingestor = CostmapIngestor::new(Arc::clone(map), planner, IngestionPolicy::EveryUpdate, None);
        let doc = serde_json::to_vec(&RawOccupancyGrid::free(size, size, 0.3, 0.0, 0.0)).unwrap();
        ingestor.process_update(&doc);
    }

    fn request_supply(robot_id: u32, current: (f64, f64), destination: (f64, f64)) -> Supply {
        let request = DestinationRequest {
            robot_id,
            current,
            destination,
        };
        Supply {
            id: 1,
            cdata: Some(Content {
                entity: request.encode(),
            }),
            ..Supply::default()
        }
    }

    fn published_path(backend: &MemoryBackend) -> (String, PathMsg) {
        let published = backend.published();
        let last = published.last().unwrap();
        assert_eq!(last.supply_name, ROUTE_SUPPLY_NAME);
        assert_eq!(last.channel_type, MQTT_GATEWAY_SVC);

        let record = codec::unwrap_transport(last.entity()).unwrap();
        let path: PathMsg = serde_json::from_slice(&record.record).unwrap();
        (record.topic, path)
    }

    #[test]
    fn test_undecodable_request_is_dropped() {
        let f = fixture(PlannerMode::Timed3D);
        let supply = Supply {
            cdata: Some(Content {
                entity: vec![0xff, 0xff, 0xff],
            }),
            ..Supply::default()
        };

        assert_eq!(f.handler.handle_supply(&supply), HandleOutcome::Dropped);
        assert!(f.backend.published().is_empty());
    }

    #[test]
    fn test_request_before_costmap_gets_empty_route() {
        let f = fixture(PlannerMode::Timed3D);

        let outcome = f.handler.handle_supply(&request_supply(7, (0.0, 0.0), (1.2, 1.2)));
        assert!(matches!(
            outcome,
            HandleOutcome::Published { ref topic, waypoints: 0, .. } if topic == "robot/path/7"
        ));

        let (topic, path) = published_path(&f.backend);
        assert_eq!(topic, "robot/path/7");
        assert!(path.poses.is_empty());
    }

    #[test]
    fn test_request_before_costmap_logs_model_not_ready() {
        let f = fixture(PlannerMode::Timed3D);
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            f.handler.handle_supply(&request_supply(7, (0.0, 0.0), (1.2, 1.2)));
        });

        let text = String::from_utf8(logs.0.lock().clone()).unwrap();
        let line = text
            .lines()
            .find(|l| l.contains("empty route"))
            .unwrap();
        assert!(line.contains("WARN"));
        assert!(line.contains(&RouterError::ModelNotReady.to_string()));
        assert!(line.contains("robot 7"));
    }

    #[test]
    fn test_timed_route_published() {
        let f = fixture(PlannerMode::Timed3D);
        load_free_map(&f.map, PlannerMode::Timed3D, 5);

        let outcome = f.handler.handle_supply(&request_supply(3, (0.0, 0.0), (1.2, 1.2)));
        let HandleOutcome::Published { waypoints, .. } = outcome else {
            panic!("expected a published reply, got {:?}", outcome);
        };
        assert!(waypoints > 0);

        let (topic, path) = published_path(&f.backend);
        assert_eq!(topic, "robot/path/3");
        assert_eq!(path.poses.len(), waypoints);
        let last = path.poses.last().unwrap();
        assert!((last.pose.position.x - 1.2).abs() < 1e-9);
        assert!(last.header.stamp.as_secs_f64() > 0.0);
    }

    #[test]
    fn test_planar_route_published() {
        let f = fixture(PlannerMode::Planar2D);
        load_free_map(&f.map, PlannerMode::Planar2D, 10);

        let outcome = f.handler.handle_supply(&request_supply(5, (0.0, 0.0), (0.9, 0.0)));
        assert!(matches!(outcome, HandleOutcome::Published { waypoints: 4, .. }));

        let (_, path) = published_path(&f.backend);
        assert!(path.poses.iter().all(|p| p.header.stamp.secs == 0));
    }

    #[test]
    fn test_planning_failure_replies_empty() {
        let f = fixture(PlannerMode::Timed3D);
        load_free_map(&f.map, PlannerMode::Timed3D, 5);

        let outcome = f.handler.handle_supply(&request_supply(2, (0.0, 0.0), (50.0, 50.0)));
        assert!(matches!(outcome, HandleOutcome::Published { waypoints: 0, .. }));
    }

    #[test]
    fn test_publish_failure_is_reported() {
        let f = fixture(PlannerMode::Timed3D);
        f.backend.set_fail_publish(true);

        let outcome = f.handler.handle_supply(&request_supply(9, (0.0, 0.0), (1.0, 1.0)));
        assert_eq!(
            outcome,
            HandleOutcome::PublishFailed {
                topic: "robot/path/9".into()
            }
        );
    }
}
