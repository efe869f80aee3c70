//! UDP client orchestrating socket lifecycle, codec and callback dispatch.

use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::codec::{FrameCodec, ServiceType};
use crate::error::{Error, Result};
use crate::registry::{CallbackHandle, CallbackRegistry};
use crate::socket;
use crate::transport::udp::UdpEndpoint;
use crate::transport::{PacketTransport, TransportEvent};

/// Connection lifecycle of a [`UdpClient`].
///
/// Only `Unconnected -> Connected` (via [`UdpClient::connect`]) and
/// `Connected -> Closed` (via [`UdpClient::stop`]) are possible; a stopped
/// client cannot be reconnected, create a new instance instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Unconnected,
    Connected,
    Closed,
}

/// Client for sending and receiving KNXnet/IP frames over UDP.
///
/// With `multicast` the socket is built by the multicast factory and every
/// send explicitly addresses the group; otherwise the socket is connected to
/// the remote peer and sends omit the destination. Decoded frames are routed
/// to registered callbacks by service type; callbacks run on the client's
/// dispatch task and must not block.
pub struct UdpClient<C: FrameCodec> {
    inner: Arc<ClientInner<C>>,
}

struct ClientInner<C: FrameCodec> {
    codec: C,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    multicast: bool,
    state: Mutex<TransportState>,
    endpoint: Mutex<Option<UdpEndpoint>>,
    registry: CallbackRegistry<C::Frame, UdpClient<C>>,
}

impl<C: FrameCodec> Clone for UdpClient<C> {
    fn clone(&self) -> Self {
        UdpClient {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: FrameCodec> UdpClient<C> {
    /// Create an unconnected client.
    ///
    /// Both addresses are fixed for the client's lifetime. The host part
    /// must be an IP address literal; for multicast both addresses must be
    /// IPv4. Malformed arguments fail with [`Error::InvalidAddress`].
    pub fn new(
        codec: C,
        local_addr: (&str, u16),
        remote_addr: (&str, u16),
        multicast: bool,
    ) -> Result<Self> {
        let local = parse_addr("local", local_addr)?;
        let remote = parse_addr("remote", remote_addr)?;
        if multicast && (!local.is_ipv4() || !remote.is_ipv4()) {
            let (host, port) = if local.is_ipv4() { remote_addr } else { local_addr };
            return Err(Error::InvalidAddress {
                role: "multicast",
                host: host.to_string(),
                port,
            });
        }

        Ok(UdpClient {
            inner: Arc::new(ClientInner {
                codec,
                local_addr: local,
                remote_addr: remote,
                multicast,
                state: Mutex::new(TransportState::Unconnected),
                endpoint: Mutex::new(None),
                registry: CallbackRegistry::new(),
            }),
        })
    }

    /// Open the UDP channel and start dispatching received frames.
    ///
    /// For multicast the local host is used as the own interface and the
    /// remote address as the group to join. On failure the client stays
    /// `Unconnected` and the error propagates; there is no retry and no
    /// timeout on the underlying bind/join operations.
    pub async fn connect(&self) -> Result<()> {
        match *self.inner.state.lock() {
            TransportState::Unconnected => {}
            TransportState::Connected => return Err(Error::InvalidState("already connected")),
            TransportState::Closed => return Err(Error::InvalidState("client stopped")),
        }

        let (endpoint, events_rx) = if self.inner.multicast {
            let own_ip = ipv4_of(self.inner.local_addr)?;
            let group_ip = ipv4_of(self.inner.remote_addr)?;
            let group = SocketAddrV4::new(group_ip, self.inner.remote_addr.port());
            let socket = socket::create_multicast_socket(own_ip, group)?;
            UdpEndpoint::from_std_socket(socket)?
        } else {
            UdpEndpoint::bind_peer(self.inner.local_addr, self.inner.remote_addr).await?
        };

        // Re-check under the lock: a concurrent stop() or connect() may have
        // moved the state while the socket was being set up. Only the first
        // committer wins; Closed stays terminal.
        let stale = {
            let mut state = self.inner.state.lock();
            match *state {
                TransportState::Unconnected => {
                    *self.inner.endpoint.lock() = Some(endpoint.clone());
                    *state = TransportState::Connected;
                    None
                }
                TransportState::Connected => Some("already connected"),
                TransportState::Closed => Some("client stopped"),
            }
        };
        if let Some(reason) = stale {
            let _ = endpoint.close().await;
            return Err(Error::InvalidState(reason));
        }

        self.spawn_dispatch_loop(events_rx);
        Ok(())
    }

    // Consumes endpoint events and feeds raw datagrams through the codec
    fn spawn_dispatch_loop(&self, mut events_rx: mpsc::Receiver<TransportEvent>) {
        let client = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    TransportEvent::Connected { local } => {
                        debug!("UDP endpoint ready on {}", local);
                    }
                    TransportEvent::DataReceived { data, source } => {
                        client.process_raw(&data, source);
                    }
                    TransportEvent::Error { error } => {
                        warn!("transport error: {}", error);
                    }
                    TransportEvent::Closed => break,
                }
            }
        });
    }

    /// Decode one received datagram and dispatch the frame.
    ///
    /// Empty datagrams are ignored. Malformed input is logged and dropped;
    /// the client keeps running.
    pub(crate) fn process_raw(&self, raw: &[u8], source: SocketAddr) {
        if raw.is_empty() {
            return;
        }
        match self.inner.codec.decode(raw) {
            Ok(frame) => {
                let service_type = self.inner.codec.service_type(&frame);
                debug!(
                    target: "knxip::frame",
                    "received {} frame from {}: {:?}",
                    service_type,
                    source,
                    frame
                );
                self.inner.registry.dispatch(&frame, self, service_type);
            }
            Err(e) => {
                warn!("could not parse KNXnet/IP frame from {}: {}", source, e);
            }
        }
    }

    /// Encode and send one frame.
    ///
    /// Fails with [`Error::NotConnected`] unless the client is connected.
    /// Delivery is best-effort UDP: unordered, unacknowledged, and silently
    /// droppable under socket buffer pressure.
    pub async fn send(&self, frame: &C::Frame) -> Result<()> {
        let endpoint = {
            let state = self.inner.state.lock();
            if *state != TransportState::Connected {
                return Err(Error::NotConnected);
            }
            self.inner.endpoint.lock().clone()
        };
        let Some(endpoint) = endpoint else {
            return Err(Error::NotConnected);
        };

        debug!(
            target: "knxip::frame",
            "sending {} frame: {:?}",
            self.inner.codec.service_type(frame),
            frame
        );
        let payload = self.inner.codec.encode(frame);
        let destination = if self.inner.multicast {
            Some(self.inner.remote_addr)
        } else {
            None
        };
        endpoint.send(&payload, destination).await
    }

    /// Register a callback for frames whose service type is in
    /// `service_types`; an empty set matches every frame. Registration
    /// order is dispatch order.
    pub fn register_callback(
        &self,
        handler: impl Fn(&C::Frame, &UdpClient<C>) + Send + Sync + 'static,
        service_types: HashSet<ServiceType>,
    ) -> CallbackHandle {
        self.inner.registry.register(Arc::new(handler), service_types)
    }

    /// Remove a callback registration; unknown handles are a no-op
    pub fn unregister_callback(&self, handle: CallbackHandle) {
        self.inner.registry.unregister(handle);
    }

    /// Frames that were decoded successfully but matched no registration
    pub fn unhandled_frames(&self) -> u64 {
        self.inner.registry.unhandled_frames()
    }

    pub fn state(&self) -> TransportState {
        *self.inner.state.lock()
    }

    pub fn is_multicast(&self) -> bool {
        self.inner.multicast
    }

    /// Address of the live socket; `None` before `connect`
    pub fn local_address(&self) -> Option<SocketAddr> {
        let endpoint = self.inner.endpoint.lock();
        endpoint.as_ref().and_then(|e| e.local_addr().ok())
    }

    /// The multicast group or the connected peer; `None` before `connect`
    pub fn remote_address(&self) -> Option<SocketAddr> {
        let endpoint = self.inner.endpoint.lock();
        let endpoint = endpoint.as_ref()?;
        if self.inner.multicast {
            Some(self.inner.remote_addr)
        } else {
            endpoint.peer_addr()
        }
    }

    /// Close the channel and move to `Closed`. Idempotent: repeated calls
    /// are no-ops. Frames already handed to the dispatch task may still be
    /// delivered afterwards, but no new data arrives.
    pub async fn stop(&self) {
        let endpoint = {
            let mut state = self.inner.state.lock();
            if *state == TransportState::Closed {
                return;
            }
            *state = TransportState::Closed;
            self.inner.endpoint.lock().take()
        };
        if let Some(endpoint) = endpoint {
            let _ = endpoint.close().await;
        }
    }
}

impl<C: FrameCodec> fmt::Debug for UdpClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UdpClient({} -> {}, multicast={})",
            self.inner.local_addr, self.inner.remote_addr, self.inner.multicast
        )
    }
}

fn parse_addr(role: &'static str, (host, port): (&str, u16)) -> Result<SocketAddr> {
    let ip: IpAddr = host.parse().map_err(|_| Error::InvalidAddress {
        role,
        host: host.to_string(),
        port,
    })?;
    Ok(SocketAddr::new(ip, port))
}

fn ipv4_of(addr: SocketAddr) -> Result<std::net::Ipv4Addr> {
    match addr.ip() {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(_) => Err(Error::InvalidState("multicast requires IPv4 addresses")),
    }
}
