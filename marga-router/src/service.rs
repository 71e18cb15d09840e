//! Router service wiring.
//!
//! Owns the shared map, both service clients and the worker threads:
//!
//! - **costmap-ingest**: drains the costmap queue into the shared map
//! - **gateway-subscriber**: map-gateway channel; forwards costmap records
//!   to the queue
//! - **routing-subscriber**: routing channel; answers destination requests
//! - **costmap-feed** (optional): MQTT subscription on the costmap topic

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::backend::{BackendConnector, NodeRegistry};
use crate::codec::{self, Supply};
use crate::config::{ReplyChannel, RouterConfig};
use crate::error::{Result, RouterError};
use crate::handler::RouteHandler;
use crate::ingestion::feed::{CostmapFeed, CostmapSink};
use crate::ingestion::{CostmapIngestor, SnapshotWriter};
use crate::state::SharedMap;
use crate::supervisor::{ServiceClient, spawn_subscription_loop};

const GATEWAY_CLIENT: &str = "gateway";
const ROUTING_CLIENT: &str = "routing";

/// Running broker instance.
pub struct RouterService {
    config: RouterConfig,
    map: Arc<SharedMap>,
    registry: Arc<dyn NodeRegistry>,
    gateway: Arc<ServiceClient>,
    routing: Arc<ServiceClient>,
    running: Arc<AtomicBool>,
    costmap_tx: Sender<Vec<u8>>,
    /// Kept for the sinks to evict from; the ingestion thread gets a clone
    costmap_rx: Receiver<Vec<u8>>,
    started: bool,
    threads: Vec<JoinHandle<()>>,
    feed: Option<CostmapFeed>,
}

impl RouterService {
    /// Register with the node server and open both clients.
    ///
    /// # Errors
    /// Registration failure is returned and is fatal for the process.
    /// Client connection failures are not; the subscription loops retry.
    pub fn connect(
        config: RouterConfig,
        registry: Arc<dyn NodeRegistry>,
        connector: Arc<dyn BackendConnector>,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let channels = [config.channels.map_gateway, config.channels.routing];
        let address = registry
            .register_node(&config.node.server, &config.node.name, &channels)
            .map_err(|e| match e {
                RouterError::Registration(_) => e,
                other => RouterError::Registration(other.to_string()),
            })?;
        tracing::info!(
            "Registered {} with {}, backend at {}",
            config.node.name,
            config.node.server,
            address
        );

        let gateway = Arc::new(ServiceClient::connect(
            GATEWAY_CLIENT,
            config.channels.map_gateway,
            address.clone(),
            Arc::clone(&connector),
            &config.reconnect,
        ));
        let routing = Arc::new(ServiceClient::connect(
            ROUTING_CLIENT,
            config.channels.routing,
            address,
            connector,
            &config.reconnect,
        ));

        let (costmap_tx, costmap_rx) = crossbeam_channel::bounded(config.mqtt.queue_capacity);

        Ok(Self {
            config,
            map: Arc::new(SharedMap::new()),
            registry,
            gateway,
            routing,
            running,
            costmap_tx,
            costmap_rx,
            started: false,
            threads: Vec::new(),
            feed: None,
        })
    }

    pub fn map(&self) -> &Arc<SharedMap> {
        &self.map
    }

    pub fn gateway(&self) -> &Arc<ServiceClient> {
        &self.gateway
    }

    pub fn routing(&self) -> &Arc<ServiceClient> {
        &self.routing
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Sink accepting costmap documents for the configured topic.
    pub fn costmap_sink(&self) -> CostmapSink {
        CostmapSink::new(
            self.costmap_tx.clone(),
            self.costmap_rx.clone(),
            self.config.mqtt.costmap_topic.clone(),
        )
    }

    /// Client replies are published through.
    pub fn reply_client(&self) -> &Arc<ServiceClient> {
        match self.config.channels.reply {
            ReplyChannel::Gateway => &self.gateway,
            ReplyChannel::Routing => &self.routing,
        }
    }

    /// Start ingestion and both subscription loops.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(RouterError::Config("service already started".into()));
        }
        self.started = true;
        let rx = self.costmap_rx.clone();

        let mut ingestor = CostmapIngestor::new(
            Arc::clone(&self.map),
            self.config.planner.clone(),
            self.config.ingestion.policy,
            self.config
                .snapshot
                .path
                .as_ref()
                .map(|path| SnapshotWriter::new(path, self.config.snapshot.scale)),
        );
        if let Some(path) = &self.config.static_map.path {
            if let Err(e) = ingestor.load_static_map(path) {
                tracing::warn!("Static map {} not loaded: {}", path.display(), e);
            }
        }

        let running = Arc::clone(&self.running);
        self.threads.push(
            thread::Builder::new()
                .name("costmap-ingest".into())
                .spawn(move || ingestor.run(rx, running))?,
        );

        let sink = self.costmap_sink();
        self.threads.push(spawn_subscription_loop(
            Arc::clone(&self.gateway),
            move |supply: Supply| forward_gateway_record(&sink, &supply),
            Arc::clone(&self.running),
        )?);

        let handler = RouteHandler::new(
            self.config.planner.mode,
            Arc::clone(&self.map),
            Arc::clone(self.reply_client()),
        );
        self.threads.push(spawn_subscription_loop(
            Arc::clone(&self.routing),
            move |supply: Supply| {
                let outcome = handler.handle_supply(&supply);
                tracing::debug!("Routing supply {}: {:?}", supply.id, outcome);
            },
            Arc::clone(&self.running),
        )?);

        tracing::info!(
            "Router started: {} planner, replies via {:?} client",
            self.config.planner.mode,
            self.config.channels.reply
        );
        Ok(())
    }

    /// Start the MQTT costmap subscription.
    pub fn start_mqtt_feed(&mut self) -> Result<()> {
        let feed = CostmapFeed::start(&self.config.mqtt, self.costmap_sink(), Arc::clone(&self.running))?;
        self.feed = Some(feed);
        Ok(())
    }

    /// Stop all threads and unregister from the node server.
    pub fn shutdown(mut self) -> Result<()> {
        tracing::info!("Shutting down router");
        self.running.store(false, Ordering::Relaxed);

        self.gateway.close();
        self.routing.close();
        if let Some(feed) = self.feed.take() {
            feed.stop();
        }

        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                tracing::error!("{} thread panicked", name);
            }
        }

        self.registry.unregister_node()?;
        tracing::info!("Unregistered {}", self.config.node.name);
        Ok(())
    }
}

/// Forward a map-gateway record to the costmap queue if its topic matches.
fn forward_gateway_record(sink: &CostmapSink, supply: &Supply) {
    match codec::unwrap_transport(supply.entity()) {
        Ok(record) => {
            sink.offer(&record.topic, record.record);
        }
        Err(e) => tracing::debug!("Ignoring gateway supply {}: {}", supply.id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::codec::Content;

    fn service(backend: &MemoryBackend, config: RouterConfig) -> Result<RouterService> {
        RouterService::connect(
            config,
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            Arc::new(AtomicBool::new(true)),
        )
    }

    #[test]
    fn test_registration_failure_is_fatal() {
        let backend = MemoryBackend::new();
        backend.set_refuse_registration(true);

        let err = service(&backend, RouterConfig::default()).err().unwrap();
        assert!(matches!(err, RouterError::Registration(_)));
    }

    #[test]
    fn test_registers_both_channels() {
        let backend = MemoryBackend::new();
        let service = service(&backend, RouterConfig::default()).unwrap();

        let registration = backend.registration().unwrap();
        assert_eq!(registration.name, "GeoRoutingProvider");
        assert_eq!(registration.channels, vec![17, 4]);
        assert!(service.gateway().is_connected());
        assert!(service.routing().is_connected());
    }

    #[test]
    fn test_reply_client_selection() {
        let backend = MemoryBackend::new();
        let service_default = service(&backend, RouterConfig::default()).unwrap();
        assert_eq!(service_default.reply_client().channel(), 17);

        let mut config = RouterConfig::default();
        config.channels.reply = ReplyChannel::Routing;
        let service_routing = service(&backend, config).unwrap();
        assert_eq!(service_routing.reply_client().channel(), 4);
    }

    #[test]
    fn test_gateway_record_forwarding() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        let sink = CostmapSink::new(tx, rx.clone(), "map/global_costmap");

        let matching = Supply {
            cdata: Some(Content {
                entity: codec::wrap_for_transport("map/global_costmap", b"{}".to_vec()),
            }),
            ..Supply::default()
        };
        let other = Supply {
            cdata: Some(Content {
                entity: codec::wrap_for_transport("robot/path/1", b"{}".to_vec()),
            }),
            ..Supply::default()
        };
        let garbage = Supply {
            cdata: Some(Content {
                entity: vec![0xff, 0xff],
            }),
            ..Supply::default()
        };

        forward_gateway_record(&sink, &matching);
        forward_gateway_record(&sink, &other);
        forward_gateway_record(&sink, &garbage);

        assert_eq!(rx.try_recv().unwrap(), b"{}");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_start_twice_fails() {
        let backend = MemoryBackend::new();
        let mut config = RouterConfig::default();
        config.snapshot.path = None;
        let mut service = service(&backend, config).unwrap();

        service.start().unwrap();
        assert!(service.start().is_err());
        service.shutdown().unwrap();
        assert!(backend.registration().is_none());
    }
}
