use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, trace};

use crate::error::{Error, Result};
use crate::transport::{PacketTransport, TransportEvent};

// Maximum UDP payload size
const MAX_UDP_PAYLOAD_SIZE: usize = 65_507;
// Buffer size for receiving datagrams (KNXnet/IP frames are far smaller)
const UDP_BUFFER_SIZE: usize = 4096;
// Default event channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Live UDP channel for one client's traffic
#[derive(Clone)]
pub struct UdpEndpoint {
    inner: Arc<EndpointInner>,
}

struct EndpointInner {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    closed: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpEndpoint {
    /// Bind `local` and connect the socket to `remote`, so sends omit the
    /// destination and only datagrams from the peer are received.
    pub async fn bind_peer(
        local: SocketAddr,
        remote: SocketAddr,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| Error::BindFailed(local, e))?;
        socket.connect(remote).await?;
        Ok(Self::from_parts(socket, Some(remote)))
    }

    /// Adopt a pre-configured socket (the multicast factory path). The
    /// socket must already be non-blocking.
    pub fn from_std_socket(socket: std::net::UdpSocket) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let socket = UdpSocket::from_std(socket)?;
        Ok(Self::from_parts(socket, None))
    }

    fn from_parts(
        socket: UdpSocket,
        peer: Option<SocketAddr>,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let endpoint = UdpEndpoint {
            inner: Arc::new(EndpointInner {
                socket,
                peer,
                closed: AtomicBool::new(false),
                events_tx,
                receive_task: Mutex::new(None),
            }),
        };
        endpoint.spawn_receive_loop();
        (endpoint, events_rx)
    }

    // Spawns the task that turns incoming datagrams into events
    fn spawn_receive_loop(&self) {
        let endpoint = self.clone();
        let task = tokio::spawn(async move {
            let inner = &endpoint.inner;
            let mut buffer = vec![0u8; UDP_BUFFER_SIZE];

            if let Ok(local) = inner.socket.local_addr() {
                let _ = inner.events_tx.send(TransportEvent::Connected { local }).await;
            }

            while !inner.closed.load(Ordering::Relaxed) {
                let (len, source) = match inner.socket.recv_from(&mut buffer).await {
                    Ok(received) => received,
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        error!("error receiving UDP datagram: {}", e);
                        let _ = inner
                            .events_tx
                            .send(TransportEvent::Error {
                                error: format!("error receiving datagram: {}", e),
                            })
                            .await;
                        continue;
                    }
                };

                if inner.closed.load(Ordering::Relaxed) {
                    break;
                }

                trace!(
                    target: "knxip::raw",
                    "received from {}: {:02x?}",
                    source,
                    &buffer[..len]
                );
                let data = Bytes::copy_from_slice(&buffer[..len]);
                if inner
                    .events_tx
                    .send(TransportEvent::DataReceived { data, source })
                    .await
                    .is_err()
                {
                    // Receiver dropped, nobody is listening anymore
                    break;
                }
            }

            let _ = inner.events_tx.send(TransportEvent::Closed).await;
        });
        *self.inner.receive_task.lock() = Some(task);
    }
}

#[async_trait::async_trait]
impl PacketTransport for UdpEndpoint {
    fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.socket.local_addr().map_err(Error::from)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    async fn send(&self, payload: &[u8], destination: Option<SocketAddr>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::NotConnected);
        }
        if payload.len() > MAX_UDP_PAYLOAD_SIZE {
            return Err(Error::PacketTooLarge(payload.len(), MAX_UDP_PAYLOAD_SIZE));
        }

        match destination {
            Some(destination) => {
                self.inner
                    .socket
                    .send_to(payload, destination)
                    .await
                    .map_err(|e| Error::SendFailed {
                        destination: destination.to_string(),
                        source: e,
                    })?;
            }
            None => {
                self.inner.socket.send(payload).await.map_err(|e| Error::SendFailed {
                    destination: "peer".to_string(),
                    source: e,
                })?;
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        let task = self.inner.receive_task.lock().take();
        if let Some(task) = task {
            // Wait for the aborted loop to wind down so no DataReceived can
            // land after the terminal Closed event
            task.abort();
            let _ = task.await;
        }
        let _ = self.inner.events_tx.send(TransportEvent::Closed).await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for UdpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(addr) = self.inner.socket.local_addr() {
            write!(f, "UdpEndpoint({})", addr)
        } else {
            write!(f, "UdpEndpoint(<error>)")
        }
    }
}
