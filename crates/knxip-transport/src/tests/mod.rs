//! Integration tests for the UDP transport layer.

mod endpoint_test;

use crate::codec::{FrameCodec, ServiceType};

/// Install the log subscriber for tests; later calls are no-ops. Run with
/// e.g. `RUST_LOG=knxip::raw=trace` to see the per-channel output.
pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Minimal KNXnet/IP-shaped codec for tests: two big-endian service type
/// bytes followed by the payload.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TestCodec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TestFrame {
    pub service_type: u16,
    pub payload: Vec<u8>,
}

impl TestFrame {
    pub fn new(service_type: u16, payload: &[u8]) -> Self {
        TestFrame {
            service_type,
            payload: payload.to_vec(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("datagram too short for a frame header")]
pub(crate) struct ShortFrame;

impl FrameCodec for TestCodec {
    type Frame = TestFrame;
    type Error = ShortFrame;

    fn decode(&self, raw: &[u8]) -> Result<TestFrame, ShortFrame> {
        if raw.len() < 2 {
            return Err(ShortFrame);
        }
        Ok(TestFrame {
            service_type: u16::from_be_bytes([raw[0], raw[1]]),
            payload: raw[2..].to_vec(),
        })
    }

    fn encode(&self, frame: &TestFrame) -> Vec<u8> {
        let mut raw = frame.service_type.to_be_bytes().to_vec();
        raw.extend_from_slice(&frame.payload);
        raw
    }

    fn service_type(&self, frame: &TestFrame) -> ServiceType {
        ServiceType(frame.service_type)
    }
}

/// Grab an ephemeral localhost UDP port. The socket is dropped before the
/// port is handed back, so a collision is possible but unlikely.
pub(crate) fn free_udp_port() -> u16 {
    std::net::UdpSocket::bind(("127.0.0.1", 0))
        .expect("bind ephemeral port")
        .local_addr()
        .expect("local addr")
        .port()
}
