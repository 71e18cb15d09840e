//! Costmap sources feeding the ingestion queue.
//!
//! Two producers share one [`CostmapSink`]: the MQTT subscription on the
//! costmap topic, and the map-gateway channel which forwards MQTT records
//! wrapped in supplies. The queue is bounded; when ingestion falls behind
//! the oldest queued document is evicted so the newest one is always kept.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};

use crate::config::MqttConfig;
use crate::error::{Result, RouterError};

/// Pause after a broker connection error before polling again.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Filters costmap documents by topic and pushes them onto the queue.
///
/// Holds a receiver of the same queue so a full queue can give up its
/// oldest entry.
#[derive(Clone, Debug)]
pub struct CostmapSink {
    tx: Sender<Vec<u8>>,
    evict: Receiver<Vec<u8>>,
    topic: String,
}

impl CostmapSink {
    pub fn new(tx: Sender<Vec<u8>>, evict: Receiver<Vec<u8>>, topic: impl Into<String>) -> Self {
        Self {
            tx,
            evict,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Queue `payload` if it was published on the costmap topic.
    ///
    /// Returns true when the document was queued.
    pub fn offer(&self, topic: &str, payload: Vec<u8>) -> bool {
        if topic != self.topic {
            tracing::trace!("Ignoring record on topic {}", topic);
            return false;
        }

        match self.tx.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(payload)) => {
                if self.evict.try_recv().is_ok() {
                    tracing::debug!("Costmap queue full, evicted oldest update");
                }
                match self.tx.try_send(payload) {
                    Ok(()) => true,
                    Err(_) => {
                        tracing::debug!("Costmap queue still full, dropping update");
                        false
                    }
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("Costmap queue closed, dropping update");
                false
            }
        }
    }
}

/// MQTT subscription on the costmap topic.
pub struct CostmapFeed {
    client: Client,
    handle: JoinHandle<()>,
}

impl CostmapFeed {
    /// Connect to the broker and start the event-loop thread.
    ///
    /// The topic is (re)subscribed on every connection acknowledgement, so
    /// broker restarts are handled by the client's own reconnect.
    pub fn start(config: &MqttConfig, sink: CostmapSink, running: Arc<AtomicBool>) -> Result<Self> {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(1)));

        let (client, mut connection) = Client::new(options, config.queue_capacity.max(1));
        let subscriber = client.clone();
        let broker = format!("{}:{}", config.host, config.port);

        let handle = thread::Builder::new()
            .name("costmap-feed".into())
            .spawn(move || {
                tracing::info!("Costmap feed connecting to {} ({})", broker, sink.topic());

                for notification in connection.iter() {
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }

                    match notification {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            tracing::info!("Connected to MQTT broker {}", broker);
                            if let Err(e) = subscriber.try_subscribe(sink.topic(), QoS::AtMostOnce) {
                                tracing::error!("Failed to subscribe to {}: {}", sink.topic(), e);
                            }
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            sink.offer(&publish.topic, publish.payload.to_vec());
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("MQTT connection error: {}", e);
                            thread::sleep(ERROR_BACKOFF);
                        }
                    }
                }

                tracing::info!("Costmap feed stopped");
            })
            .map_err(RouterError::Io)?;

        Ok(Self { client, handle })
    }

    /// Disconnect from the broker and wait for the event loop to finish.
    pub fn stop(self) {
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!("MQTT disconnect: {}", e);
        }
        if self.handle.join().is_err() {
            tracing::error!("Costmap feed thread panicked");
        }
    }
}
