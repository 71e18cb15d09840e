//! TCP client for the pub-sub backend.
//!
//! # Framing
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4 bytes) │ Payload (variable)       │
//! │ Big-endian u32   │ protobuf `Frame`         │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! - **Maximum frame size**: 1 MiB; larger frames are rejected on both
//!   read and write, and the connection is considered broken
//! - **Requests**: register and unregister go to the node server, each on
//!   a short-lived connection; subscribe and notify go to the backend
//!   address returned by registration
//! - **Subscriptions** use a dedicated connection so a blocked reader never
//!   delays publishing
//! - **Notify** is request/reply on its own connection; after any failed
//!   exchange that connection is dropped and the next notify opens a fresh
//!   one, so a late ack can never be paired with a later request

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use prost::Message as ProstMessage;

use super::{BackendConnector, BackendLink, NodeRegistry};
use crate::codec::{Content, Supply};
use crate::error::{Result, RouterError};

/// Maximum frame payload size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame messages exchanged with the node server and backend.
pub mod wire {
    use crate::codec::Supply;

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RegisterNode {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(uint32, repeated, tag = "2")]
        pub channels: Vec<u32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct NodeAck {
        #[prost(uint64, tag = "1")]
        pub node_id: u64,
        #[prost(string, tag = "2")]
        pub server_address: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct UnregisterNode {
        #[prost(uint64, tag = "1")]
        pub node_id: u64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SubscribeRequest {
        #[prost(uint64, tag = "1")]
        pub node_id: u64,
        #[prost(uint32, tag = "2")]
        pub channel: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Ack {
        #[prost(uint64, tag = "1")]
        pub id: u64,
        #[prost(bool, tag = "2")]
        pub ok: bool,
        #[prost(string, tag = "3")]
        pub error: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Frame {
        #[prost(oneof = "frame::Body", tags = "1, 2, 3, 4, 5, 6, 7")]
        pub body: Option<frame::Body>,
    }

    pub mod frame {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum Body {
            #[prost(message, tag = "1")]
            Register(super::RegisterNode),
            #[prost(message, tag = "2")]
            Registered(super::NodeAck),
            #[prost(message, tag = "3")]
            Unregister(super::UnregisterNode),
            #[prost(message, tag = "4")]
            Subscribe(super::SubscribeRequest),
            #[prost(message, tag = "5")]
            Notify(super::Supply),
            #[prost(message, tag = "6")]
            Supply(super::Supply),
            #[prost(message, tag = "7")]
            Ack(super::Ack),
        }
    }

    impl Frame {
        pub fn new(body: frame::Body) -> Self {
            Self { body: Some(body) }
        }
    }
}

use wire::{Frame, frame::Body};

/// Write one length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    let encoded = frame.encode_to_vec();
    if encoded.len() > MAX_FRAME_SIZE {
        return Err(RouterError::Encode(format!(
            "frame of {} bytes exceeds {} byte limit",
            encoded.len(),
            MAX_FRAME_SIZE
        )));
    }

    let len = encoded.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&encoded)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed frame.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(RouterError::Decode(format!(
            "frame of {} bytes exceeds {} byte limit",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Frame::decode(payload.as_slice())?)
}

/// Write `frame` and read the reply.
fn exchange(stream: &mut TcpStream, frame: &Frame) -> Result<Frame> {
    write_frame(stream, frame)?;
    read_frame(stream)
}

fn open(address: &str, timeout: Duration) -> Result<TcpStream> {
    let addr = address
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| RouterError::Config(format!("Invalid address: {}", address)))?;
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[derive(Clone, Debug)]
struct NodeHandle {
    node_server: String,
    node_id: u64,
}

/// TCP implementation of [`NodeRegistry`] and [`BackendConnector`].
///
/// Links opened after registration carry the assigned node id.
pub struct TcpBackend {
    timeout: Duration,
    node: Mutex<Option<NodeHandle>>,
}

impl TcpBackend {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            node: Mutex::new(None),
        }
    }

    fn node_id(&self) -> u64 {
        self.node.lock().as_ref().map(|n| n.node_id).unwrap_or_default()
    }

    fn request(&self, address: &str, frame: Frame) -> Result<Frame> {
        let mut stream = open(address, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        exchange(&mut stream, &frame)
    }
}

impl NodeRegistry for TcpBackend {
    fn register_node(&self, node_server: &str, name: &str, channels: &[u32]) -> Result<String> {
        let request = Frame::new(Body::Register(wire::RegisterNode {
            name: name.to_string(),
            channels: channels.to_vec(),
        }));

        let reply = self
            .request(node_server, request)
            .map_err(|e| RouterError::Registration(format!("{}: {}", node_server, e)))?;

        match reply.body {
            Some(Body::Registered(ack)) => {
                tracing::info!("Registered as node {} at {}", ack.node_id, node_server);
                *self.node.lock() = Some(NodeHandle {
                    node_server: node_server.to_string(),
                    node_id: ack.node_id,
                });
                Ok(ack.server_address)
            }
            Some(Body::Ack(ack)) if !ack.ok => Err(RouterError::Registration(ack.error)),
            _ => Err(RouterError::Registration("unexpected reply from node server".into())),
        }
    }

    fn unregister_node(&self) -> Result<()> {
        let Some(node) = self.node.lock().take() else {
            return Ok(());
        };

        let request = Frame::new(Body::Unregister(wire::UnregisterNode {
            node_id: node.node_id,
        }));
        match self.request(&node.node_server, request)?.body {
            Some(Body::Ack(ack)) if !ack.ok => Err(RouterError::Registration(ack.error)),
            _ => Ok(()),
        }
    }
}

impl BackendConnector for TcpBackend {
    fn connect(&self, address: &str) -> Result<Arc<dyn BackendLink>> {
        let stream = open(address, self.timeout)
            .map_err(|e| RouterError::TransportDisconnect(format!("{}: {}", address, e)))?;
        stream.set_read_timeout(Some(self.timeout))?;

        Ok(Arc::new(TcpLink {
            address: address.to_string(),
            node_id: self.node_id(),
            timeout: self.timeout,
            request: Mutex::new(Some(stream)),
            subscription: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Connection to the backend address.
struct TcpLink {
    address: String,
    node_id: u64,
    timeout: Duration,
    /// Request/reply stream for notify; `None` after a failed exchange
    request: Mutex<Option<TcpStream>>,
    /// Clone of the live subscription stream, kept for `close`
    subscription: Mutex<Option<TcpStream>>,
    closed: AtomicBool,
}

impl BackendLink for TcpLink {
    fn subscribe_supply(&self, channel: u32, on_supply: &mut dyn FnMut(Supply)) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RouterError::NotConnected);
        }

        let mut stream = open(&self.address, self.timeout)
            .map_err(|e| RouterError::TransportDisconnect(e.to_string()))?;
        *self.subscription.lock() = Some(stream.try_clone()?);
        // close() either saw the stored stream or set the flag before it
        if self.closed.load(Ordering::Acquire) {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(RouterError::NotConnected);
        }

        write_frame(
            &mut stream,
            &Frame::new(Body::Subscribe(wire::SubscribeRequest {
                node_id: self.node_id,
                channel,
            })),
        )
        .map_err(|e| RouterError::TransportDisconnect(e.to_string()))?;

        loop {
            match read_frame(&mut stream) {
                Ok(Frame {
                    body: Some(Body::Supply(supply)),
                }) => on_supply(supply),
                Ok(_) => tracing::trace!("Ignoring non-supply frame on channel {}", channel),
                Err(e) => {
                    self.subscription.lock().take();
                    return Err(RouterError::TransportDisconnect(e.to_string()));
                }
            }
        }
    }

    fn notify_supply(&self, channel: u32, name: &str, content: Content) -> Result<u64> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RouterError::NotConnected);
        }

        let supply = Supply {
            sender_id: self.node_id,
            channel_type: channel,
            supply_name: name.to_string(),
            cdata: Some(content),
            ..Supply::default()
        };

        let mut slot = self.request.lock();
        if slot.is_none() {
            let stream = open(&self.address, self.timeout)
                .map_err(|e| RouterError::Publish(format!("{}: {}", self.address, e)))?;
            stream.set_read_timeout(Some(self.timeout))?;
            *slot = Some(stream);
        }
        let Some(stream) = slot.as_mut() else {
            return Err(RouterError::NotConnected);
        };

        let failure = match exchange(stream, &Frame::new(Body::Notify(supply))) {
            Ok(Frame {
                body: Some(Body::Ack(ack)),
            }) => {
                return if ack.ok {
                    Ok(ack.id)
                } else {
                    Err(RouterError::Publish(ack.error))
                };
            }
            Ok(_) => "unexpected reply to notify".to_string(),
            Err(e) => e.to_string(),
        };

        // Stream state is unknown now; a late reply must not reach the next request
        if let Some(stream) = slot.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        Err(RouterError::Publish(failure))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(stream) = self.subscription.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(stream) = self.request.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
