//! Seam between the transport and the external KNXnet/IP codec.
//!
//! The transport never interprets frame payloads. It only needs to turn raw
//! datagrams into frames (and back) and to read each frame's service type
//! discriminant for callback routing, so the whole codec sits behind
//! [`FrameCodec`].

use std::fmt;

/// KNXnet/IP service type identifier used to route received frames
/// (e.g. 0x0201 SEARCH_REQUEST, 0x0420 TUNNELLING_REQUEST).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceType(pub u16);

impl fmt::Debug for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceType(0x{:04x})", self.0)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

impl From<u16> for ServiceType {
    fn from(value: u16) -> Self {
        ServiceType(value)
    }
}

/// Encoder/decoder for KNXnet/IP frames.
///
/// `encode` is total: it never fails for a well-formed frame. `decode`
/// failures are contained at the receive path (logged and dropped) and never
/// reach transport callers.
pub trait FrameCodec: Send + Sync + 'static {
    /// Decoded frame type, opaque to the transport beyond its service type
    type Frame: fmt::Debug + Send + Sync + 'static;

    /// Parse error produced by `decode` on malformed input
    type Error: fmt::Display + Send;

    /// Decode a raw datagram into a frame
    fn decode(&self, raw: &[u8]) -> std::result::Result<Self::Frame, Self::Error>;

    /// Encode a frame into wire bytes
    fn encode(&self, frame: &Self::Frame) -> Vec<u8>;

    /// The service type discriminant of a decoded frame
    fn service_type(&self, frame: &Self::Frame) -> ServiceType;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_formatting() {
        let st = ServiceType(0x0201);
        assert_eq!(st.to_string(), "0x0201");
        assert_eq!(format!("{:?}", st), "ServiceType(0x0201)");
        assert_eq!(ServiceType::from(0x0420), ServiceType(0x0420));
    }
}
