//! UDP transport: per-peer demultiplexing over a single shared socket.
//!
//! UDP has no connection object, so a directory from remote address to the
//! consumer owning that peer substitutes for per-peer streams. The facade
//! owns one socket; datagrams are validated against the same header rules as
//! the TCP frame decoder, but per datagram rather than against an
//! accumulating stream.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use async_trait::async_trait;

use flowlink_api::connection::{
    ConnectionEvent, MessageConsumer, DISCONNECT_CHANNEL_UNREGISTERED,
};
use flowlink_api::protocol::{LENGTH_FIELD_OFFSET, OFP_HEADER_SIZE};

use crate::codec::{MessageDecoder, MessageEncoder};
use crate::frame::FrameDecoder;
use crate::pipeline::{ConnectionHandle, OutboundRequest, PipelineContext};
use crate::server::{OnlineResult, ServerFacade};
use crate::signal::CompletionSignal;

/// Directory from remote socket address to the consumer owning that peer.
///
/// A pure lookup structure, safe under concurrent access; it never creates
/// consumers itself. At most one binding exists per address; rebinding
/// replaces the previous entry.
#[derive(Default)]
pub struct UdpConnectionMap {
    entries: DashMap<SocketAddr, Arc<dyn MessageConsumer>>,
}

impl UdpConnectionMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the consumer bound to `address`, if any.
    pub fn lookup(&self, address: &SocketAddr) -> Option<Arc<dyn MessageConsumer>> {
        self.entries.get(address).map(|entry| entry.value().clone())
    }

    /// Binds `consumer` as the owner of `address`.
    pub fn bind(&self, address: SocketAddr, consumer: Arc<dyn MessageConsumer>) {
        self.entries.insert(address, consumer);
    }

    /// Removes the binding for `address`; returns whether one existed.
    pub fn unbind(&self, address: &SocketAddr) -> bool {
        self.entries.remove(address).is_some()
    }

    /// Number of bound peers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no peer is bound.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Server facade for the UDP transport.
pub struct UdpServerFacade {
    ctx: PipelineContext,
    map: Arc<UdpConnectionMap>,
    online: Arc<CompletionSignal<OnlineResult>>,
    terminated: Arc<CompletionSignal<()>>,
    close: watch::Sender<bool>,
}

impl UdpServerFacade {
    pub(crate) fn new(ctx: PipelineContext) -> Self {
        let (close, _) = watch::channel(false);
        Self {
            ctx,
            map: Arc::new(UdpConnectionMap::new()),
            online: Arc::new(CompletionSignal::new()),
            terminated: Arc::new(CompletionSignal::new()),
            close,
        }
    }

    /// The peer directory this facade demultiplexes with.
    pub fn connection_map(&self) -> Arc<UdpConnectionMap> {
        self.map.clone()
    }

    /// Validates one datagram and feeds its frames through the pipeline,
    /// creating a peer binding on first contact.
    fn handle_datagram(
        &self,
        datagram: &[u8],
        peer: SocketAddr,
        socket: &Arc<UdpSocket>,
        decoder: &FrameDecoder,
        message_decoder: &MessageDecoder,
        peers: &mut JoinSet<()>,
    ) {
        if datagram.len() < OFP_HEADER_SIZE {
            debug!(%peer, len = datagram.len(), "runt datagram dropped");
            return;
        }
        let declared = u16::from_be_bytes([
            datagram[LENGTH_FIELD_OFFSET],
            datagram[LENGTH_FIELD_OFFSET + 1],
        ]) as usize;
        if declared > datagram.len() {
            debug!(%peer, declared, actual = datagram.len(), "truncated datagram dropped");
            return;
        }

        let consumer = match self.map.lookup(&peer) {
            Some(consumer) => consumer,
            None => {
                if !self.ctx.handler.accept(peer) {
                    debug!(%peer, "datagram rejected by acceptance policy");
                    return;
                }
                self.spawn_peer(peer, socket.clone(), peers)
            }
        };

        // UDP delivers whole datagrams or nothing, so framing errors and
        // leftover bytes cost only this datagram.
        let mut buf = BytesMut::from(datagram);
        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(frame)) => {
                    if let Some(tagged) = self.ctx.detector.detect(frame) {
                        if let Some(message) = message_decoder.decode(tagged) {
                            consumer.consume(ConnectionEvent::Message(message));
                        }
                    }
                }
                Ok(None) => {
                    if !buf.is_empty() {
                        debug!(%peer, rest = buf.len(), "partial trailing frame in datagram dropped");
                    }
                    break;
                }
                Err(error) => {
                    debug!(%peer, %error, "malformed datagram frame dropped");
                    break;
                }
            }
        }
    }

    /// Creates the logical connection for a first-seen peer: outbound handle,
    /// consumer, directory binding and the writer task that serializes
    /// outbound messages onto the shared socket.
    fn spawn_peer(
        &self,
        peer: SocketAddr,
        socket: Arc<UdpSocket>,
        peers: &mut JoinSet<()>,
    ) -> Arc<dyn MessageConsumer> {
        let (out_tx, mut out_rx) = mpsc::channel::<OutboundRequest>(
            self.ctx.config.outbound_queue_size.max(1),
        );
        let (close_tx, mut close_rx) = watch::channel(false);
        let handle = Arc::new(ConnectionHandle::new(peer, out_tx, close_tx, None));

        let consumer = self.ctx.handler.on_switch_connected(handle);
        self.ctx.stats.inc_connections_opened();
        self.map.bind(peer, consumer.clone());
        // No handshake on UDP: the binding is the whole assembly.
        consumer.consume(ConnectionEvent::ConnectionReady);
        debug!(%peer, "udp peer bound");

        let encoder = MessageEncoder::new(self.ctx.serializers.clone(), self.ctx.stats.clone());
        let map = self.map.clone();
        let stats = self.ctx.stats.clone();
        let peer_consumer = consumer.clone();
        let mut server_close = self.close.subscribe();
        peers.spawn(async move {
            let mut out = BytesMut::with_capacity(2048);
            loop {
                tokio::select! {
                    request = out_rx.recv() => {
                        let Some(OutboundRequest { message, completion }) = request else {
                            break;
                        };
                        out.clear();
                        match encoder.encode(message.as_ref(), &mut out) {
                            Ok(()) => {
                                let result = socket
                                    .send_to(&out, peer)
                                    .await
                                    .map(|_| ())
                                    .map_err(|e| {
                                        flowlink_api::connection::SendError::Io(e.to_string())
                                    });
                                let _ = completion.send(result);
                            }
                            Err(error) => {
                                let _ = completion.send(Err(error));
                            }
                        }
                    }
                    // Dropped senders count as close requests, both the
                    // per-peer handle and the facade.
                    changed = close_rx.changed() => {
                        if changed.is_err() || *close_rx.borrow() {
                            break;
                        }
                    }
                    changed = server_close.changed() => {
                        if changed.is_err() || *server_close.borrow() {
                            break;
                        }
                    }
                }
            }
            map.unbind(&peer);
            stats.inc_connections_closed();
            peer_consumer.consume(ConnectionEvent::Disconnected {
                reason: DISCONNECT_CHANNEL_UNREGISTERED.to_string(),
            });
        });

        consumer
    }
}

#[async_trait]
impl ServerFacade for UdpServerFacade {
    fn online(&self) -> Arc<CompletionSignal<OnlineResult>> {
        self.online.clone()
    }

    fn shutdown(&self) -> Arc<CompletionSignal<()>> {
        let _ = self.close.send(true);
        self.terminated.clone()
    }

    async fn run(self: Arc<Self>) {
        if *self.close.subscribe().borrow() {
            self.terminated.complete(());
            return;
        }

        let bind_addr = self.ctx.config.bind_address();
        let socket = match UdpSocket::bind(bind_addr).await {
            Ok(socket) => Arc::new(socket),
            Err(error) => {
                self.online
                    .complete(Err(format!("bind failed on {bind_addr}: {error}")));
                self.terminated.complete(());
                return;
            }
        };
        let local = match socket.local_addr() {
            Ok(addr) => addr,
            Err(error) => {
                self.online
                    .complete(Err(format!("local address unavailable: {error}")));
                self.terminated.complete(());
                return;
            }
        };
        info!(%local, "listening for switch datagrams");
        self.online.complete(Ok(local));

        let decoder = FrameDecoder::new(self.ctx.config.max_frame_length);
        let message_decoder =
            MessageDecoder::new(self.ctx.deserializers.clone(), self.ctx.stats.clone());
        let mut peers = JoinSet::new();
        let mut close_rx = self.close.subscribe();
        let mut buf = vec![0u8; u16::MAX as usize];

        loop {
            tokio::select! {
                _ = close_rx.changed() => {
                    if *close_rx.borrow() {
                        break;
                    }
                }
                // Reap finished peer tasks as they end rather than letting
                // entries accumulate until shutdown.
                Some(_) = peers.join_next(), if !peers.is_empty() => {}
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => {
                            self.handle_datagram(
                                &buf[..len],
                                peer,
                                &socket,
                                &decoder,
                                &message_decoder,
                                &mut peers,
                            );
                        }
                        Err(error) => {
                            warn!(%error, "recv_from failed");
                        }
                    }
                }
            }
        }

        while peers.join_next().await.is_some() {}
        self.terminated.complete(());
        info!(%local, "udp server facade terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct SinkConsumer {
        events: Mutex<Vec<String>>,
    }

    impl SinkConsumer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }
    }

    impl MessageConsumer for SinkConsumer {
        fn consume(&self, event: ConnectionEvent) {
            self.events.lock().unwrap().push(format!("{event:?}"));
        }
    }

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn test_bind_then_lookup() {
        let map = UdpConnectionMap::new();
        let consumer = SinkConsumer::new();
        map.bind(addr(7001), consumer.clone());
        let found = map.lookup(&addr(7001)).unwrap();
        found.consume(ConnectionEvent::ConnectionReady);
        assert_eq!(consumer.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unbind_then_lookup_absent() {
        let map = UdpConnectionMap::new();
        map.bind(addr(7002), SinkConsumer::new());
        assert!(map.unbind(&addr(7002)));
        assert!(map.lookup(&addr(7002)).is_none());
        assert!(!map.unbind(&addr(7002)));
        assert!(map.is_empty());
    }

    #[test]
    fn test_rebind_replaces() {
        let map = UdpConnectionMap::new();
        let first = SinkConsumer::new();
        let second = SinkConsumer::new();
        map.bind(addr(7003), first.clone());
        map.bind(addr(7003), second.clone());
        assert_eq!(map.len(), 1);
        map.lookup(&addr(7003))
            .unwrap()
            .consume(ConnectionEvent::SwitchIdle);
        assert!(first.events.lock().unwrap().is_empty());
        assert_eq!(second.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_bind_unbind_lookup() {
        let map = Arc::new(UdpConnectionMap::new());
        let mut tasks = Vec::new();
        for port in 8000u16..8032 {
            let map = map.clone();
            tasks.push(tokio::spawn(async move {
                let address = addr(port);
                map.bind(address, SinkConsumer::new());
                assert!(map.lookup(&address).is_some());
                assert!(map.unbind(&address));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(map.is_empty());
    }
}
