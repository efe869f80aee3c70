use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the KNXnet/IP transport layer
#[derive(Debug, Error)]
pub enum Error {
    /// A constructor argument was not a well-formed (host, port) pair
    #[error("invalid {role} address {host}:{port}")]
    InvalidAddress {
        role: &'static str,
        host: String,
        port: u16,
    },

    /// Binding the UDP socket failed
    #[error("failed to bind UDP socket to {0}: {1}")]
    BindFailed(SocketAddr, #[source] io::Error),

    /// Setting a socket option failed
    #[error("socket option {op} failed: {source}")]
    SocketOption {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// Joining the multicast group failed
    #[error("failed to join multicast group {group} on interface {interface}: {source}")]
    JoinMulticast {
        group: Ipv4Addr,
        interface: Ipv4Addr,
        #[source]
        source: io::Error,
    },

    /// Writing a datagram to the socket failed
    #[error("failed to send datagram to {destination}: {source}")]
    SendFailed {
        destination: String,
        #[source]
        source: io::Error,
    },

    /// Frame exceeds the maximum UDP payload
    #[error("frame of {0} bytes exceeds maximum UDP payload of {1} bytes")]
    PacketTooLarge(usize, usize),

    /// `send` was attempted while the client is not connected
    #[error("transport not connected")]
    NotConnected,

    /// Operation not valid for the client's current lifecycle state
    #[error("invalid client state: {0}")]
    InvalidState(&'static str),

    /// Other IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
