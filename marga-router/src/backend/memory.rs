//! In-process pub-sub backend.
//!
//! Every supply published on a channel is queued for each live subscriber
//! of that channel. Tests drive failures through the injection methods:
//! refused connections and registrations, failing publishes, and dropping
//! all live subscriptions at once.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{BackendConnector, BackendLink, NodeRegistry};
use crate::codec::{Content, Supply};
use crate::error::{Result, RouterError};

/// Address returned by [`MemoryBackend::register_node`].
pub const MEMORY_ADDRESS: &str = "memory://backend";

/// Sender id used for supplies injected by tests.
const EXTERNAL_SENDER: u64 = 0;

const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Number of link-published supplies kept for inspection.
pub const PUBLISHED_HISTORY: usize = 1024;

/// Shared in-memory broker. Cloning yields another handle to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<BrokerState>,
    changed: Condvar,
}

#[derive(Default)]
struct BrokerState {
    next_supply_id: u64,
    next_link_id: u64,
    next_subscriber_id: u64,
    connects: usize,
    subscribers: Vec<Subscriber>,
    /// Most recent link-published supplies, oldest first
    published: VecDeque<Supply>,
    published_total: usize,
    registered: Option<Registration>,
    refuse_connections: bool,
    refuse_registration: bool,
    fail_publish: bool,
}

struct Subscriber {
    id: u64,
    link_id: u64,
    channel: u32,
    queue: VecDeque<Supply>,
}

/// Node registration as seen by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub node_server: String,
    pub name: String,
    pub channels: Vec<u32>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a supply from an external participant.
    pub fn inject(&self, channel: u32, name: &str, entity: Vec<u8>) -> u64 {
        let mut state = self.inner.state.lock();
        let id = deliver(&mut state, EXTERNAL_SENDER, channel, name, Content { entity });
        self.inner.changed.notify_all();
        id
    }

    /// End every live subscription with a transport error.
    pub fn drop_subscriptions(&self) {
        let mut state = self.inner.state.lock();
        state.subscribers.clear();
        self.inner.changed.notify_all();
    }

    pub fn set_refuse_connections(&self, refuse: bool) {
        self.inner.state.lock().refuse_connections = refuse;
    }

    pub fn set_refuse_registration(&self, refuse: bool) {
        self.inner.state.lock().refuse_registration = refuse;
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.inner.state.lock().fail_publish = fail;
    }

    /// Supplies published by links, injected ones excluded. Only the last
    /// [`PUBLISHED_HISTORY`] are kept.
    pub fn published(&self) -> Vec<Supply> {
        self.inner.state.lock().published.iter().cloned().collect()
    }

    pub fn connect_count(&self) -> usize {
        self.inner.state.lock().connects
    }

    pub fn registration(&self) -> Option<Registration> {
        self.inner.state.lock().registered.clone()
    }

    pub fn subscriber_count(&self, channel: u32) -> usize {
        self.inner
            .state
            .lock()
            .subscribers
            .iter()
            .filter(|s| s.channel == channel)
            .count()
    }

    /// Block until `channel` has at least `count` subscribers.
    pub fn wait_for_subscribers(&self, channel: u32, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| {
            state.subscribers.iter().filter(|s| s.channel == channel).count() >= count
        })
    }

    /// Block until links have published at least `count` supplies.
    pub fn wait_for_published(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| state.published_total >= count)
    }

    fn wait_until(&self, timeout: Duration, done: impl Fn(&BrokerState) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !done(&state) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.inner
                .changed
                .wait_for(&mut state, (deadline - now).min(WAIT_SLICE));
        }
        true
    }
}

fn deliver(state: &mut BrokerState, sender_id: u64, channel: u32, name: &str, content: Content) -> u64 {
    state.next_supply_id += 1;
    let supply = Supply {
        id: state.next_supply_id,
        sender_id,
        channel_type: channel,
        supply_name: name.to_string(),
        cdata: Some(content),
        ..Supply::default()
    };

    for sub in state.subscribers.iter_mut().filter(|s| s.channel == channel) {
        sub.queue.push_back(supply.clone());
    }
    if sender_id != EXTERNAL_SENDER {
        if state.published.len() == PUBLISHED_HISTORY {
            state.published.pop_front();
        }
        state.published.push_back(supply);
        state.published_total += 1;
    }
    state.next_supply_id
}

impl BackendConnector for MemoryBackend {
    fn connect(&self, address: &str) -> Result<Arc<dyn BackendLink>> {
        let mut state = self.inner.state.lock();
        if state.refuse_connections {
            return Err(RouterError::TransportDisconnect(format!(
                "connection to {} refused",
                address
            )));
        }

        state.connects += 1;
        state.next_link_id += 1;
        Ok(Arc::new(MemoryLink {
            backend: self.clone(),
            link_id: state.next_link_id,
            closed: AtomicBool::new(false),
        }))
    }
}

impl NodeRegistry for MemoryBackend {
    fn register_node(&self, node_server: &str, name: &str, channels: &[u32]) -> Result<String> {
        let mut state = self.inner.state.lock();
        if state.refuse_registration {
            return Err(RouterError::Registration(format!(
                "node server {} unreachable",
                node_server
            )));
        }

        state.registered = Some(Registration {
            node_server: node_server.to_string(),
            name: name.to_string(),
            channels: channels.to_vec(),
        });
        Ok(MEMORY_ADDRESS.to_string())
    }

    fn unregister_node(&self) -> Result<()> {
        self.inner.state.lock().registered = None;
        Ok(())
    }
}

/// Connection handed out by [`MemoryBackend::connect`].
struct MemoryLink {
    backend: MemoryBackend,
    link_id: u64,
    closed: AtomicBool,
}

impl MemoryLink {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl BackendLink for MemoryLink {
    fn subscribe_supply(&self, channel: u32, on_supply: &mut dyn FnMut(Supply)) -> Result<()> {
        let inner = &self.backend.inner;
        let sub_id = {
            let mut state = inner.state.lock();
            state.next_subscriber_id += 1;
            let id = state.next_subscriber_id;
            state.subscribers.push(Subscriber {
                id,
                link_id: self.link_id,
                channel,
                queue: VecDeque::new(),
            });
            inner.changed.notify_all();
            id
        };

        let outcome = loop {
            let batch = {
                let mut state = inner.state.lock();
                loop {
                    if self.is_closed() {
                        break None;
                    }
                    let queue = state
                        .subscribers
                        .iter_mut()
                        .find(|s| s.id == sub_id)
                        .map(|s| std::mem::take(&mut s.queue));
                    match queue {
                        Some(q) if !q.is_empty() => break Some(q),
                        Some(_) => {
                            inner.changed.wait_for(&mut state, WAIT_SLICE);
                        }
                        None => break None,
                    }
                }
            };

            match batch {
                // Callbacks run without the broker lock so they can publish
                Some(queue) => {
                    for supply in queue {
                        on_supply(supply);
                    }
                }
                None => break Err(RouterError::TransportDisconnect("subscription dropped".into())),
            }
        };

        let mut state = inner.state.lock();
        state.subscribers.retain(|s| s.id != sub_id);
        inner.changed.notify_all();
        outcome
    }

    fn notify_supply(&self, channel: u32, name: &str, content: Content) -> Result<u64> {
        if self.is_closed() {
            return Err(RouterError::NotConnected);
        }

        let inner = &self.backend.inner;
        let mut state = inner.state.lock();
        if state.fail_publish {
            return Err(RouterError::Publish("backend rejected supply".into()));
        }

        let id = deliver(&mut state, self.link_id, channel, name, content);
        inner.changed.notify_all();
        Ok(id)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let inner = &self.backend.inner;
        let mut state = inner.state.lock();
        state.subscribers.retain(|s| s.link_id != self.link_id);
        inner.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_subscriber_receives_injected_supply() {
        let backend = MemoryBackend::new();
        let link = backend.connect(MEMORY_ADDRESS).unwrap();

        let handle = thread::spawn(move || {
            let mut received = Vec::new();
            let result = link.subscribe_supply(4, &mut |s| received.push(s));
            (result, received)
        });

        assert!(backend.wait_for_subscribers(4, 1, TIMEOUT));
        backend.inject(4, "request", vec![1, 2, 3]);
        backend.inject(17, "other", vec![9]);
        thread::sleep(Duration::from_millis(100));
        backend.drop_subscriptions();

        let (result, received) = handle.join().unwrap();
        assert!(matches!(result, Err(RouterError::TransportDisconnect(_))));
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].entity(), &[1, 2, 3]);
        assert_eq!(backend.subscriber_count(4), 0);
    }

    #[test]
    fn test_notify_records_publication() {
        let backend = MemoryBackend::new();
        let link = backend.connect(MEMORY_ADDRESS).unwrap();

        let id = link
            .notify_supply(17, "robotRoute", Content { entity: vec![7] })
            .unwrap();

        let published = backend.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, id);
        assert_eq!(published[0].channel_type, 17);
        assert_eq!(published[0].supply_name, "robotRoute");
    }

    #[test]
    fn test_published_history_is_capped() {
        let backend = MemoryBackend::new();
        let link = backend.connect(MEMORY_ADDRESS).unwrap();
        backend.inject(4, "request", vec![0]);

        let mut last_id = 0;
        for _ in 0..PUBLISHED_HISTORY + 5 {
            last_id = link.notify_supply(17, "robotRoute", Content::default()).unwrap();
        }

        let published = backend.published();
        assert_eq!(published.len(), PUBLISHED_HISTORY);
        assert_eq!(published.last().unwrap().id, last_id);
        assert!(published.iter().all(|s| s.sender_id != EXTERNAL_SENDER));
        assert!(backend.wait_for_published(PUBLISHED_HISTORY + 5, Duration::from_millis(10)));
    }

    #[test]
    fn test_failure_injection() {
        let backend = MemoryBackend::new();

        backend.set_refuse_connections(true);
        assert!(backend.connect(MEMORY_ADDRESS).is_err());
        backend.set_refuse_connections(false);
        let link = backend.connect(MEMORY_ADDRESS).unwrap();
        assert_eq!(backend.connect_count(), 1);

        backend.set_fail_publish(true);
        let err = link.notify_supply(4, "x", Content::default()).unwrap_err();
        assert!(matches!(err, RouterError::Publish(_)));

        backend.set_refuse_registration(true);
        let err = backend.register_node("127.0.0.1:9990", "router", &[17, 4]).unwrap_err();
        assert!(matches!(err, RouterError::Registration(_)));
    }

    #[test]
    fn test_registration_lifecycle() {
        let backend = MemoryBackend::new();
        let address = backend.register_node("127.0.0.1:9990", "router", &[17, 4]).unwrap();

        assert_eq!(address, MEMORY_ADDRESS);
        assert_eq!(backend.registration().unwrap().channels, vec![17, 4]);

        backend.unregister_node().unwrap();
        assert!(backend.registration().is_none());
    }

    #[test]
    fn test_close_unblocks_subscriber() {
        let backend = MemoryBackend::new();
        let link = backend.connect(MEMORY_ADDRESS).unwrap();
        let subscriber = Arc::clone(&link);

        let handle = thread::spawn(move || subscriber.subscribe_supply(4, &mut |_| {}));
        assert!(backend.wait_for_subscribers(4, 1, TIMEOUT));

        link.close();
        assert!(handle.join().unwrap().is_err());
        assert!(matches!(
            link.notify_supply(4, "x", Content::default()),
            Err(RouterError::NotConnected)
        ));
    }
}
