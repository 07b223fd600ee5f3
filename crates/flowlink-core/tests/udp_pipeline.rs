//! Datagram front end: per-peer virtual connections keyed by source
//! address, replies routed back through the shared socket, and teardown
//! via the outbound handle.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use flowlink_api::config::{ConnectionConfiguration, TransportProtocol};
use flowlink_core::{ConnectionError, ConnectionProvider};

use common::*;

async fn started_udp_provider() -> (
    Arc<ConnectionProvider>,
    Arc<RecordingHandler>,
    tokio::sync::mpsc::UnboundedReceiver<(std::net::SocketAddr, Event)>,
    std::net::SocketAddr,
) {
    init_tracing();
    let mut config = ConnectionConfiguration::new(0, TransportProtocol::Udp);
    config.address = Some("127.0.0.1".parse().unwrap());
    let provider = Arc::new(ConnectionProvider::new(config));
    register_test_codec(&provider);
    let (handler, rx) = RecordingHandler::new();
    provider.set_switch_connection_handler(handler.clone());
    let addr = provider.startup().await.expect("startup");
    (provider, handler, rx, addr)
}

async fn client_socket() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

#[tokio::test]
async fn first_datagram_creates_a_virtual_connection() {
    let (provider, _handler, mut rx, addr) = started_udp_provider().await;

    let client = client_socket().await;
    client
        .send_to(&frame_bytes(0x04, 0x00, 3, 8), addr)
        .await
        .unwrap();

    let client_addr = client.local_addr().unwrap();
    match tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap()
    {
        (peer, Event::Ready) => assert_eq!(peer, client_addr),
        other => panic!("expected ready, got {other:?}"),
    }
    match next_event(&mut rx).await {
        Event::Message(m) => assert_eq!(m.xid, 3),
        other => panic!("expected message, got {other:?}"),
    }

    provider.shutdown().await.unwrap();
}

#[tokio::test]
async fn one_datagram_may_carry_several_frames() {
    let (provider, _handler, mut rx, addr) = started_udp_provider().await;

    let client = client_socket().await;
    let mut datagram = frame_bytes(0x04, 0x02, 1, 12);
    datagram.extend_from_slice(&frame_bytes(0x04, 0x02, 2, 8));
    client.send_to(&datagram, addr).await.unwrap();

    assert!(matches!(next_event(&mut rx).await, Event::Ready));
    match next_event(&mut rx).await {
        Event::Message(m) => assert_eq!(m.xid, 1),
        other => panic!("expected first message, got {other:?}"),
    }
    match next_event(&mut rx).await {
        Event::Message(m) => assert_eq!(m.xid, 2),
        other => panic!("expected second message, got {other:?}"),
    }

    provider.shutdown().await.unwrap();
}

#[tokio::test]
async fn reply_reaches_the_originating_socket() {
    let (provider, handler, mut rx, addr) = started_udp_provider().await;

    let client = client_socket().await;
    client
        .send_to(&frame_bytes(0x04, 0x00, 1, 8), addr)
        .await
        .unwrap();
    assert!(matches!(next_event(&mut rx).await, Event::Ready));
    assert!(matches!(next_event(&mut rx).await, Event::Message(_)));

    let connection = handler.connection(0);
    assert_eq!(connection.remote_address(), client.local_addr().unwrap());
    let completion = connection
        .send(Box::new(TestMessage {
            version: 0x04,
            msg_type: 2,
            xid: 88,
            body: vec![9, 9],
        }))
        .unwrap();
    completion.await.unwrap().unwrap();

    let mut buf = [0u8; 64];
    let (n, from) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, addr);
    assert_eq!(n, 10);
    assert_eq!(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]), 88);

    provider.shutdown().await.unwrap();
}

#[tokio::test]
async fn disconnect_unbinds_and_a_new_contact_rebinds() {
    let (provider, handler, mut rx, addr) = started_udp_provider().await;

    let client = client_socket().await;
    client
        .send_to(&frame_bytes(0x04, 0x00, 1, 8), addr)
        .await
        .unwrap();
    assert!(matches!(next_event(&mut rx).await, Event::Ready));
    assert!(matches!(next_event(&mut rx).await, Event::Message(_)));

    handler.connection(0).disconnect();
    match next_event(&mut rx).await {
        Event::Disconnected(reason) => assert_eq!(reason, "channel unregistered"),
        other => panic!("expected disconnect, got {other:?}"),
    }

    // The same source address now counts as a brand-new switch.
    client
        .send_to(&frame_bytes(0x04, 0x00, 2, 8), addr)
        .await
        .unwrap();
    assert!(matches!(next_event(&mut rx).await, Event::Ready));
    match next_event(&mut rx).await {
        Event::Message(m) => assert_eq!(m.xid, 2),
        other => panic!("expected message, got {other:?}"),
    }
    assert_eq!(handler.connections.lock().unwrap().len(), 2);

    provider.shutdown().await.unwrap();
}

#[tokio::test]
async fn rejected_source_address_is_ignored() {
    let (provider, handler, mut rx, addr) = started_udp_provider().await;
    handler.set_reject_all(true);

    let client = client_socket().await;
    client
        .send_to(&frame_bytes(0x04, 0x00, 1, 8), addr)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(drain_events(&mut rx).is_empty());
    assert!(handler.connections.lock().unwrap().is_empty());

    // Lifting the rejection lets the same source through.
    handler.set_reject_all(false);
    client
        .send_to(&frame_bytes(0x04, 0x00, 2, 8), addr)
        .await
        .unwrap();
    assert!(matches!(next_event(&mut rx).await, Event::Ready));
    assert!(matches!(next_event(&mut rx).await, Event::Message(_)));

    provider.shutdown().await.unwrap();
}

#[tokio::test]
async fn runt_and_truncated_datagrams_are_dropped() {
    let (provider, _handler, mut rx, addr) = started_udp_provider().await;

    let client = client_socket().await;
    // Shorter than a header.
    client.send_to(&[0x04, 0x00, 0x00], addr).await.unwrap();
    // Declared length exceeds the datagram.
    client
        .send_to(&frame_bytes(0x04, 0x02, 1, 32)[..16], addr)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(drain_events(&mut rx).is_empty());

    // The socket is still healthy for well-formed traffic.
    client
        .send_to(&frame_bytes(0x04, 0x00, 4, 8), addr)
        .await
        .unwrap();
    assert!(matches!(next_event(&mut rx).await, Event::Ready));
    match next_event(&mut rx).await {
        Event::Message(m) => assert_eq!(m.xid, 4),
        other => panic!("expected message, got {other:?}"),
    }

    provider.shutdown().await.unwrap();
}

#[tokio::test]
async fn udp_provider_cannot_dial_out() {
    let (provider, _handler, _rx, _addr) = started_udp_provider().await;

    match provider.initiate_connection("127.0.0.1", 6653).await {
        Err(ConnectionError::UnsupportedTransport { transport }) => {
            assert_eq!(transport, "UDP");
        }
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("expected UnsupportedTransport"),
    }

    provider.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_unregisters_every_peer() {
    let (provider, _handler, mut rx, addr) = started_udp_provider().await;

    let first = client_socket().await;
    let second = client_socket().await;
    for socket in [&first, &second] {
        socket
            .send_to(&frame_bytes(0x04, 0x00, 1, 8), addr)
            .await
            .unwrap();
    }
    // Two peers come up: two readies, two messages, any interleaving.
    let mut readies = 0;
    let mut messages = 0;
    for _ in 0..4 {
        match next_event(&mut rx).await {
            Event::Ready => readies += 1,
            Event::Message(_) => messages += 1,
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!((readies, messages), (2, 2));

    provider.shutdown().await.unwrap();
    let mut disconnects = 0;
    for _ in 0..2 {
        match next_event(&mut rx).await {
            Event::Disconnected(reason) => {
                assert_eq!(reason, "channel unregistered");
                disconnects += 1;
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(disconnects, 2);
}
