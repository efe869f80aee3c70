//! Transport abstraction: the live OS-level UDP channel and its events.

pub mod udp;

pub use udp::UdpEndpoint;

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Events surfaced by a transport endpoint to its owner.
///
/// All events for one endpoint are delivered in order through the mpsc
/// receiver handed out at construction. `DataReceived` carries raw bytes
/// only; the endpoint never parses protocol semantics.
#[derive(Debug)]
pub enum TransportEvent {
    /// The receive loop is running; the channel is usable
    Connected { local: SocketAddr },
    /// A datagram arrived
    DataReceived { data: Bytes, source: SocketAddr },
    /// A transient receive error; the channel stays open
    Error { error: String },
    /// Terminal: no further events follow
    Closed,
}

/// Narrow interface over a live packet channel
#[async_trait]
pub trait PacketTransport: Send + Sync {
    /// Address the socket is bound to
    fn local_addr(&self) -> Result<SocketAddr>;

    /// The implicit peer, if the socket is connected to one
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Write one datagram. `destination` must be given for unconnected
    /// (multicast) sockets and omitted for peer-connected ones.
    async fn send(&self, payload: &[u8], destination: Option<SocketAddr>) -> Result<()>;

    /// Close the channel; idempotent. Emits a final `Closed` event.
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}
