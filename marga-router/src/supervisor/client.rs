//! Service client with a replaceable backend connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use super::backoff::{RetryDelay, sleep_while_running};
use crate::backend::{BackendConnector, BackendLink};
use crate::codec::{Content, Supply};
use crate::config::ReconnectConfig;
use crate::error::{Result, RouterError};

/// Connection lifecycle of a [`ServiceClient`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    /// Old handle being taken out of the slot
    Disconnecting,
    /// Slot empty, sleeping before the next attempt
    WaitingBeforeRetry,
    /// Last attempt failed; the slot stays empty until the next one
    Disconnected,
}

/// Client bound to one pub-sub channel.
///
/// The connection handle lives in a mutex-guarded slot. Readers clone the
/// handle under the lock and use it outside; the lock is never held across
/// a blocking call. Only construction and [`ServiceClient::reconnect`]
/// write the slot, and a new handle is installed only into an empty slot.
pub struct ServiceClient {
    name: String,
    channel: u32,
    address: String,
    connector: Arc<dyn BackendConnector>,
    slot: Mutex<Option<Arc<dyn BackendLink>>>,
    state: Mutex<ClientState>,
    delay: Mutex<RetryDelay>,
    reconnects: AtomicU64,
}

impl ServiceClient {
    /// Create the client and attempt the initial connection.
    ///
    /// A failed initial connection is logged and leaves the slot empty; the
    /// subscription loop then goes straight into reconnect.
    pub fn connect(
        name: impl Into<String>,
        channel: u32,
        address: impl Into<String>,
        connector: Arc<dyn BackendConnector>,
        reconnect: &ReconnectConfig,
    ) -> Self {
        let name = name.into();
        let address = address.into();

        let (link, state) = match connector.connect(&address) {
            Ok(link) => {
                tracing::info!("{} client connected to {} (channel {})", name, address, channel);
                (Some(link), ClientState::Connected)
            }
            Err(e) => {
                tracing::error!("{} client failed to connect to {}: {}", name, address, e);
                (None, ClientState::Disconnected)
            }
        };

        Self {
            name,
            channel,
            address,
            connector,
            slot: Mutex::new(link),
            state: Mutex::new(state),
            delay: Mutex::new(RetryDelay::from_config(reconnect)),
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn state(&self) -> ClientState {
        *self.state.lock()
    }

    /// Number of successful reconnects.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Current handle, if any.
    pub fn handle(&self) -> Option<Arc<dyn BackendLink>> {
        self.slot.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Subscribe on this client's channel. Blocks until the stream ends.
    ///
    /// Returns the number of supplies delivered, or `NotConnected` right away
    /// when the slot is empty.
    pub fn subscribe(&self, on_supply: &mut dyn FnMut(Supply)) -> Result<usize> {
        let link = self.handle().ok_or(RouterError::NotConnected)?;

        let mut delivered = 0usize;
        let result = link.subscribe_supply(self.channel, &mut |supply| {
            delivered += 1;
            on_supply(supply);
        });
        if delivered > 0 {
            // Stream worked for a while; the next retry starts from the base delay
            self.delay.lock().reset();
        }
        result.map(|()| delivered)
    }

    /// Publish a supply on this client's channel.
    pub fn notify(&self, name: &str, content: Content) -> Result<u64> {
        let link = self.handle().ok_or(RouterError::NotConnected)?;
        link.notify_supply(self.channel, name, content)
    }

    /// Replace the connection.
    ///
    /// 1. Take the handle out of the slot under the lock.
    /// 2. Sleep the retry delay without the lock.
    /// 3. If the slot is still empty, connect outside the lock and install
    ///    the new handle only if the slot is still empty.
    ///
    /// Returns true when the slot holds a handle afterwards.
    pub fn reconnect(&self, running: &AtomicBool) -> bool {
        self.set_state(ClientState::Disconnecting);
        let old = self.slot.lock().take();
        if let Some(old) = old {
            old.close();
        }

        self.set_state(ClientState::WaitingBeforeRetry);
        let delay = self.delay.lock().next_delay();
        tracing::info!("{} client reconnecting in {:?}", self.name, delay);

        if !sleep_while_running(delay, running) {
            self.set_state(ClientState::Disconnected);
            return false;
        }

        if self.slot.lock().is_some() {
            self.set_state(ClientState::Connected);
            return true;
        }

        match self.connector.connect(&self.address) {
            Ok(link) => {
                let surplus = {
                    let mut slot = self.slot.lock();
                    if slot.is_none() {
                        *slot = Some(link);
                        None
                    } else {
                        Some(link)
                    }
                };
                if let Some(link) = surplus {
                    link.close();
                }

                self.reconnects.fetch_add(1, Ordering::Relaxed);
                self.set_state(ClientState::Connected);
                tracing::info!("{} client reconnected to {}", self.name, self.address);
                true
            }
            Err(e) => {
                self.set_state(ClientState::Disconnected);
                tracing::warn!("{} client reconnect failed: {}", self.name, e);
                false
            }
        }
    }

    /// Close the current handle, unblocking any subscriber.
    pub fn close(&self) {
        if let Some(link) = self.handle() {
            link.close();
        }
    }

    fn set_state(&self, state: ClientState) {
        *self.state.lock() = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::backend::memory::MEMORY_ADDRESS;
    use std::thread;
    use std::time::{Duration, Instant};

    fn fast_reconnect(delay_ms: u64) -> ReconnectConfig {
        ReconnectConfig {
            delay_ms,
            ..ReconnectConfig::default()
        }
    }

    fn client(backend: &MemoryBackend, delay_ms: u64) -> ServiceClient {
        ServiceClient::connect(
            "routing",
            4,
            MEMORY_ADDRESS,
            Arc::new(backend.clone()),
            &fast_reconnect(delay_ms),
        )
    }

    #[test]
    fn test_initial_connect() {
        let backend = MemoryBackend::new();
        let client = client(&backend, 10);

        assert!(client.is_connected());
        assert_eq!(client.state(), ClientState::Connected);
        assert!(client.notify("robotRoute", Content::default()).is_ok());
    }

    #[test]
    fn test_failed_initial_connect_leaves_slot_empty() {
        let backend = MemoryBackend::new();
        backend.set_refuse_connections(true);
        let client = client(&backend, 10);

        assert!(!client.is_connected());
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(matches!(client.subscribe(&mut |_| {}), Err(RouterError::NotConnected)));
        assert!(matches!(
            client.notify("robotRoute", Content::default()),
            Err(RouterError::NotConnected)
        ));
    }

    #[test]
    fn test_reconnect_installs_fresh_handle() {
        let backend = MemoryBackend::new();
        let client = client(&backend, 10);
        let running = AtomicBool::new(true);

        assert!(client.reconnect(&running));
        assert_eq!(backend.connect_count(), 2);
        assert_eq!(client.reconnect_count(), 1);
        assert_eq!(client.state(), ClientState::Connected);
    }

    #[test]
    fn test_reconnect_failure_keeps_slot_empty() {
        let backend = MemoryBackend::new();
        let client = client(&backend, 10);
        let running = AtomicBool::new(true);

        backend.set_refuse_connections(true);
        assert!(!client.reconnect(&running));
        assert!(client.handle().is_none());
        assert_eq!(client.state(), ClientState::Disconnected);

        backend.set_refuse_connections(false);
        assert!(client.reconnect(&running));
        assert!(client.handle().is_some());
    }

    #[test]
    fn test_reconnect_aborts_on_shutdown() {
        let backend = MemoryBackend::new();
        let client = client(&backend, 10_000);
        let running = AtomicBool::new(false);

        let start = Instant::now();
        assert!(!client.reconnect(&running));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(backend.connect_count(), 1);
    }

    #[test]
    fn test_readers_see_empty_slot_while_waiting() {
        let backend = MemoryBackend::new();
        let client = Arc::new(client(&backend, 300));
        let old = client.handle().unwrap();

        let worker = {
            let client = Arc::clone(&client);
            thread::spawn(move || client.reconnect(&AtomicBool::new(true)))
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while client.state() != ClientState::WaitingBeforeRetry && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(client.handle().is_none());
        // The taken handle was closed
        assert!(old.notify_supply(4, "x", Content::default()).is_err());

        assert!(worker.join().unwrap());
        let fresh = client.handle().unwrap();
        assert!(fresh.notify_supply(4, "x", Content::default()).is_ok());
    }

    #[test]
    fn test_subscribe_counts_deliveries() {
        let backend = MemoryBackend::new();
        let client = Arc::new(client(&backend, 10));

        let subscriber = {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                let mut ids = Vec::new();
                let result = client.subscribe(&mut |s| ids.push(s.id));
                (result, ids)
            })
        };

        assert!(backend.wait_for_subscribers(4, 1, Duration::from_secs(5)));
        backend.inject(4, "req", vec![1]);
        backend.inject(4, "req", vec![2]);
        thread::sleep(Duration::from_millis(100));
        backend.drop_subscriptions();

        let (result, ids) = subscriber.join().unwrap();
        assert!(matches!(result, Err(RouterError::TransportDisconnect(_))));
        assert_eq!(ids.len(), 2);
    }
}
