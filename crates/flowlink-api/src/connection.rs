//! Capability traits between the connection front end and the controller
//! core: message consumption, connection acceptance, and the outbound handle
//! given to the controller for each switch.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::extensibility::OfMessage;

/// Reason string attached to a disconnect event when the peer closed the
/// stream.
pub const DISCONNECT_CHANNEL_INACTIVE: &str = "channel inactive";
/// Reason string attached to a disconnect event when the connection was torn
/// down locally (explicit disconnect or server shutdown).
pub const DISCONNECT_CHANNEL_UNREGISTERED: &str = "channel unregistered";

/// Lifecycle events and decoded messages delivered to a consumer, in the
/// order they occurred on the connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The connection is ready for protocol traffic. For TLS connections
    /// this fires only after the handshake has completed.
    ConnectionReady,
    /// A fully decoded protocol message.
    Message(Box<dyn OfMessage>),
    /// No traffic was observed for the configured idle interval. Emitted at
    /// most once per uninterrupted idle period.
    SwitchIdle,
    /// The connection is gone; no further events follow.
    Disconnected {
        /// Why the connection ended.
        reason: String,
    },
}

/// Per-connection message consumer owned by the controller core.
///
/// Events for one connection are delivered strictly in order from a single
/// task; implementations need no internal ordering of their own.
pub trait MessageConsumer: Send + Sync {
    /// Delivers one decoded message or lifecycle event.
    fn consume(&self, event: ConnectionEvent);
}

/// Error carried by the completion signal of an outbound send.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    /// The bounded outbound queue is full; backpressure to the caller.
    #[error("outbound queue full")]
    QueueFull,
    /// The connection is closed or closing.
    #[error("connection closed")]
    ChannelClosed,
    /// The external serializer failed; partial output was discarded and the
    /// connection stays open.
    #[error("encode failed: {0}")]
    Encode(String),
    /// The transport write failed; the connection is being torn down.
    #[error("write failed: {0}")]
    Io(String),
}

/// Completion signal for one outbound message: resolved once the message has
/// been written to the transport, or failed with the causing error.
pub type SendCompletion = oneshot::Receiver<Result<(), SendError>>;

/// Outbound half of a switch connection, handed to the controller when the
/// connection becomes known.
pub trait OutboundConnection: Send + Sync {
    /// Remote peer address.
    fn remote_address(&self) -> SocketAddr;

    /// Queues `message` for transmission and returns its completion signal.
    ///
    /// Fails immediately with [`SendError::QueueFull`] when the configured
    /// outbound queue capacity is exhausted.
    fn send(&self, message: Box<dyn OfMessage>) -> Result<SendCompletion, SendError>;

    /// Requests teardown of this connection. Idempotent; the consumer
    /// receives a single disconnect event.
    fn disconnect(&self);

    /// DER-encoded certificate chain the peer presented during the TLS
    /// handshake, for post-handshake identity binding. `None` on plain
    /// transports.
    fn peer_certificates(&self) -> Option<&[Vec<u8>]>;
}

/// Controller-side hook deciding and wiring new switch connections.
pub trait SwitchConnectionHandler: Send + Sync {
    /// Acceptance policy, evaluated against the peer address before any
    /// bytes are read. Returning false closes the connection with nothing
    /// allocated.
    fn accept(&self, remote: SocketAddr) -> bool;

    /// Called once per admitted connection; returns the consumer that will
    /// receive this connection's events.
    fn on_switch_connected(
        &self,
        connection: Arc<dyn OutboundConnection>,
    ) -> Arc<dyn MessageConsumer>;
}
