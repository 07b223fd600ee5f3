//! Shared test support: a minimal header-only codec, a recording switch
//! connection handler, and frame builders.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::mpsc;

use flowlink_api::connection::{
    ConnectionEvent, MessageConsumer, OutboundConnection, SwitchConnectionHandler,
};
use flowlink_api::extensibility::{CodecError, OfDeserializer, OfMessage, OfSerializer};
use flowlink_api::keys::{DeserializerKey, MessageCodeKey, MessageTypeKey, SerializerKey};
use flowlink_core::provider::ConnectionProvider;

/// Message types the test codec is registered for.
pub const TEST_MESSAGE_TYPES: [u8; 3] = [0, 2, 10];

/// Installs the fmt subscriber for the test binary; respects `RUST_LOG`.
/// Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMessage {
    pub version: u8,
    pub msg_type: u8,
    pub xid: u32,
    pub body: Vec<u8>,
}

impl OfMessage for TestMessage {
    fn version(&self) -> u8 {
        self.version
    }
    fn message_type(&self) -> u8 {
        self.msg_type
    }
    fn xid(&self) -> u32 {
        self.xid
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Decodes just the common header; the body rides along opaque.
pub struct TestDeserializer;

impl OfDeserializer for TestDeserializer {
    fn deserialize(
        &self,
        version: u8,
        payload: &[u8],
    ) -> Result<Option<Box<dyn OfMessage>>, CodecError> {
        if payload.len() < 7 {
            return Err(CodecError::Deserialization("short payload".into()));
        }
        Ok(Some(Box::new(TestMessage {
            version,
            msg_type: payload[0],
            xid: u32::from_be_bytes([payload[3], payload[4], payload[5], payload[6]]),
            body: payload[7..].to_vec(),
        })))
    }
}

pub struct TestSerializer;

impl OfSerializer for TestSerializer {
    fn serialize(&self, message: &dyn OfMessage, out: &mut BytesMut) -> Result<(), CodecError> {
        let message = message
            .as_any()
            .downcast_ref::<TestMessage>()
            .ok_or_else(|| CodecError::Serialization("not a TestMessage".into()))?;
        let total = (8 + message.body.len()) as u16;
        out.extend_from_slice(&[message.version, message.msg_type]);
        out.extend_from_slice(&total.to_be_bytes());
        out.extend_from_slice(&message.xid.to_be_bytes());
        out.extend_from_slice(&message.body);
        Ok(())
    }
}

/// Registers the test codec for OpenFlow 1.0 and 1.3 under the types in
/// [`TEST_MESSAGE_TYPES`].
pub fn register_test_codec(provider: &ConnectionProvider) {
    for version in [0x01u8, 0x04] {
        for msg_type in TEST_MESSAGE_TYPES {
            provider.register_deserializer(
                DeserializerKey::Message(MessageCodeKey::new(version, msg_type)),
                Arc::new(TestDeserializer),
            );
            provider.register_serializer(
                SerializerKey::Message(MessageTypeKey::new(version, msg_type)),
                Arc::new(TestSerializer),
            );
        }
    }
}

/// Builds one complete wire frame of `total_len` bytes.
pub fn frame_bytes(version: u8, msg_type: u8, xid: u32, total_len: u16) -> Vec<u8> {
    assert!(total_len >= 8);
    let mut bytes = vec![version, msg_type];
    bytes.extend_from_slice(&total_len.to_be_bytes());
    bytes.extend_from_slice(&xid.to_be_bytes());
    bytes.resize(total_len as usize, 0x5a);
    bytes
}

/// Flattened, easily assertable view of consumer events.
#[derive(Debug)]
pub enum Event {
    Ready,
    Message(TestMessage),
    Idle,
    Disconnected(String),
}

pub struct RecordingConsumer {
    peer: SocketAddr,
    events: mpsc::UnboundedSender<(SocketAddr, Event)>,
}

impl MessageConsumer for RecordingConsumer {
    fn consume(&self, event: ConnectionEvent) {
        let flattened = match event {
            ConnectionEvent::ConnectionReady => Event::Ready,
            ConnectionEvent::Message(message) => Event::Message(
                message
                    .as_any()
                    .downcast_ref::<TestMessage>()
                    .expect("test codec produces TestMessage")
                    .clone(),
            ),
            ConnectionEvent::SwitchIdle => Event::Idle,
            ConnectionEvent::Disconnected { reason } => Event::Disconnected(reason),
        };
        let _ = self.events.send((self.peer, flattened));
    }
}

/// Handler recording every event and captured outbound handle.
pub struct RecordingHandler {
    reject_all: AtomicBool,
    events: mpsc::UnboundedSender<(SocketAddr, Event)>,
    pub connections: Mutex<Vec<Arc<dyn OutboundConnection>>>,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(SocketAddr, Event)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                reject_all: AtomicBool::new(false),
                events: tx,
                connections: Mutex::new(Vec::new()),
            }),
            rx,
        )
    }

    pub fn set_reject_all(&self, reject: bool) {
        self.reject_all.store(reject, Ordering::SeqCst);
    }

    pub fn connection(&self, index: usize) -> Arc<dyn OutboundConnection> {
        self.connections.lock().unwrap()[index].clone()
    }
}

impl SwitchConnectionHandler for RecordingHandler {
    fn accept(&self, _remote: SocketAddr) -> bool {
        !self.reject_all.load(Ordering::SeqCst)
    }

    fn on_switch_connected(
        &self,
        connection: Arc<dyn OutboundConnection>,
    ) -> Arc<dyn MessageConsumer> {
        let peer = connection.remote_address();
        self.connections.lock().unwrap().push(connection);
        Arc::new(RecordingConsumer {
            peer,
            events: self.events.clone(),
        })
    }
}

/// Receives the next event or panics after one second.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<(SocketAddr, Event)>) -> Event {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
        .1
}

/// Drains whatever is immediately available.
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<(SocketAddr, Event)>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok((_, event)) = rx.try_recv() {
        events.push(event);
    }
    events
}
