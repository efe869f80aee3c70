//! Raw multicast socket construction.
//!
//! KNXnet/IP routing uses a well-known multicast group (224.0.23.12:3671).
//! The option sequence below is interop-critical and cannot be expressed
//! through `tokio::net` alone, so the socket is built with `socket2` and
//! handed to tokio afterwards.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::debug;

use crate::error::{Error, Result};

/// Multicast datagrams are limited to 2 hops
pub const MULTICAST_TTL: u32 = 2;

/// How the multicast socket gets bound on the local platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStrategy {
    /// Bind the wildcard address with the group's port
    Wildcard,
    /// Enable `SO_REUSEPORT`, then bind wildcard + port. Required where
    /// several independent sockets (e.g. a gateway scanner) share the port.
    WildcardReusePort,
    /// Bind the group address + port directly
    Group,
}

/// Pick the bind strategy for an OS name as given by `std::env::consts::OS`
pub fn bind_strategy(os: &str) -> BindStrategy {
    match os {
        "windows" => BindStrategy::Wildcard,
        "macos" => BindStrategy::WildcardReusePort,
        _ => BindStrategy::Group,
    }
}

/// Create a UDP socket configured for KNXnet/IP multicast on `own_ip`.
///
/// The socket is non-blocking with `SO_REUSEADDR` set, pinned to `own_ip`
/// for outbound multicast, joined to `group`, TTL 2, and multicast loopback
/// disabled so the host does not receive its own transmissions. Any option
/// or bind failure is returned as-is; there is no retry.
pub fn create_multicast_socket(own_ip: Ipv4Addr, group: SocketAddrV4) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| Error::SocketOption { op: "socket", source: e })?;

    socket
        .set_reuse_address(true)
        .map_err(|e| Error::SocketOption { op: "SO_REUSEADDR", source: e })?;
    socket
        .set_nonblocking(true)
        .map_err(|e| Error::SocketOption { op: "O_NONBLOCK", source: e })?;

    socket
        .set_multicast_if_v4(&own_ip)
        .map_err(|e| Error::SocketOption { op: "IP_MULTICAST_IF", source: e })?;
    socket
        .join_multicast_v4(group.ip(), &own_ip)
        .map_err(|e| Error::JoinMulticast {
            group: *group.ip(),
            interface: own_ip,
            source: e,
        })?;
    socket
        .set_multicast_ttl_v4(MULTICAST_TTL)
        .map_err(|e| Error::SocketOption { op: "IP_MULTICAST_TTL", source: e })?;

    let bind_addr: SocketAddr = match bind_strategy(std::env::consts::OS) {
        BindStrategy::Wildcard => {
            SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port()).into()
        }
        BindStrategy::WildcardReusePort => {
            #[cfg(unix)]
            socket
                .set_reuse_port(true)
                .map_err(|e| Error::SocketOption { op: "SO_REUSEPORT", source: e })?;
            SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port()).into()
        }
        BindStrategy::Group => group.into(),
    };
    socket
        .bind(&SockAddr::from(bind_addr))
        .map_err(|e| Error::BindFailed(bind_addr, e))?;

    // Ignore multicast datagrams sent by the host itself. Re-enable only if
    // multiple routing instances must coexist on one interface (unsupported).
    socket
        .set_multicast_loop_v4(false)
        .map_err(|e| Error::SocketOption { op: "IP_MULTICAST_LOOP", source: e })?;

    debug!(
        "multicast socket bound to {} (group {}, interface {})",
        bind_addr, group, own_ip
    );
    Ok(socket.into())
}
