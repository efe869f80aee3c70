//! KNXnet/IP UDP transport layer for the knxip stack
//!
//! This crate owns the socket lifecycle for unicast and multicast KNXnet/IP
//! traffic and dispatches decoded frames to registered consumers filtered by
//! service type. Frame encoding and decoding stays outside the crate behind
//! the [`FrameCodec`] trait.

pub mod client;
pub mod codec;
pub mod error;
pub mod registry;
pub mod socket;
pub mod transport;

// Internal modules
#[cfg(test)]
mod tests;

// Re-export commonly used types and functions
pub use client::{TransportState, UdpClient};
pub use codec::{FrameCodec, ServiceType};
pub use error::{Error, Result};
pub use registry::{CallbackHandle, CallbackRegistry};
pub use transport::{PacketTransport, TransportEvent};
pub use transport::udp::UdpEndpoint;

// Simplified helper functions
/// Create a unicast client and connect it in one step
pub async fn connect_udp<C: FrameCodec>(
    codec: C,
    local_addr: (&str, u16),
    remote_addr: (&str, u16),
) -> Result<UdpClient<C>> {
    let client = UdpClient::new(codec, local_addr, remote_addr, false)?;
    client.connect().await?;
    Ok(client)
}

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        connect_udp, CallbackHandle, Error, FrameCodec, PacketTransport, Result, ServiceType,
        TransportEvent, TransportState, UdpClient, UdpEndpoint,
    };
}
