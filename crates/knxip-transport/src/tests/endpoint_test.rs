//! Tests for the raw UDP endpoint: event flow and close semantics.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::timeout;

use crate::tests::free_udp_port;
use crate::transport::udp::UdpEndpoint;
use crate::transport::{PacketTransport, TransportEvent};

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[tokio::test]
async fn test_endpoint_delivers_raw_datagrams() {
    let (port_a, port_b) = (free_udp_port(), free_udp_port());
    let (endpoint_a, _events_a) = UdpEndpoint::bind_peer(localhost(port_a), localhost(port_b))
        .await
        .unwrap();
    let (endpoint_b, mut events_b) = UdpEndpoint::bind_peer(localhost(port_b), localhost(port_a))
        .await
        .unwrap();

    let connected = timeout(Duration::from_secs(5), events_b.recv())
        .await
        .expect("no event")
        .expect("channel closed");
    match connected {
        TransportEvent::Connected { local } => assert_eq!(local.port(), port_b),
        other => panic!("expected Connected, got {:?}", other),
    }

    endpoint_a.send(b"\x06\x10\x02\x01", None).await.unwrap();

    let received = timeout(Duration::from_secs(5), events_b.recv())
        .await
        .expect("no event")
        .expect("channel closed");
    match received {
        TransportEvent::DataReceived { data, source } => {
            assert_eq!(&data[..], b"\x06\x10\x02\x01");
            assert_eq!(source, endpoint_a.local_addr().unwrap());
        }
        other => panic!("expected DataReceived, got {:?}", other),
    }
}

#[tokio::test]
async fn test_endpoint_close_is_terminal_and_idempotent() {
    let (port_a, port_b) = (free_udp_port(), free_udp_port());
    let (endpoint, mut events) = UdpEndpoint::bind_peer(localhost(port_a), localhost(port_b))
        .await
        .unwrap();

    assert!(!endpoint.is_closed());
    endpoint.close().await.unwrap();
    assert!(endpoint.is_closed());

    // Skip the Connected event, then expect the terminal Closed
    loop {
        match timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no event")
        {
            Some(TransportEvent::Closed) | None => break,
            Some(_) => continue,
        }
    }

    // Nothing may follow the terminal Closed event
    assert!(events.try_recv().is_err());

    // Closing again is a no-op, and sends now fail
    endpoint.close().await.unwrap();
    assert!(endpoint.send(b"x", None).await.is_err());
}
