//! Per-connection pipeline assembly.
//!
//! Wires the ordered stage chain onto a freshly accepted or dialed stream:
//! frame decoder, version detector, message decoder, idle monitor, consumer
//! dispatch, plus the encode path from a bounded outbound queue back through
//! the message encoder to the transport.
//!
//! Stage order and the ready signal are structural here: for TLS transports
//! the caller completes the handshake before assembling the pipeline, so
//! `ConnectionReady` cannot be observed before the secure channel exists,
//! and it is emitted from the same task that decodes frames, so it strictly
//! precedes the first message.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use flowlink_api::config::ConnectionConfiguration;
use flowlink_api::connection::{
    ConnectionEvent, MessageConsumer, OutboundConnection, SendCompletion, SendError,
    SwitchConnectionHandler, DISCONNECT_CHANNEL_INACTIVE, DISCONNECT_CHANNEL_UNREGISTERED,
};
use flowlink_api::extensibility::OfMessage;

use crate::codec::{MessageDecoder, MessageEncoder};
use crate::detector::VersionDetector;
use crate::frame::FrameDecoder;
use crate::idle::IdleMonitor;
use crate::registry::{DeserializerRegistry, SerializerRegistry};
use crate::stats::ConnectionStatistics;
use crate::tls::PeerCertificates;

/// Shared collaborators every connection pipeline is assembled from.
#[derive(Clone)]
pub(crate) struct PipelineContext {
    pub config: Arc<ConnectionConfiguration>,
    pub handler: Arc<dyn SwitchConnectionHandler>,
    pub serializers: Arc<SerializerRegistry>,
    pub deserializers: Arc<DeserializerRegistry>,
    pub detector: Arc<VersionDetector>,
    pub stats: Arc<ConnectionStatistics>,
}

pub(crate) struct OutboundRequest {
    pub(crate) message: Box<dyn OfMessage>,
    pub(crate) completion: oneshot::Sender<Result<(), SendError>>,
}

/// Outbound half of one stream-oriented switch connection.
///
/// Handed to the controller via
/// [`SwitchConnectionHandler::on_switch_connected`]; sending queues onto the
/// bounded outbound queue serviced by the connection's writer task.
pub struct ConnectionHandle {
    remote: SocketAddr,
    outbound: mpsc::Sender<OutboundRequest>,
    close: watch::Sender<bool>,
    peer_certificates: Option<PeerCertificates>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        remote: SocketAddr,
        outbound: mpsc::Sender<OutboundRequest>,
        close: watch::Sender<bool>,
        peer_certificates: Option<PeerCertificates>,
    ) -> Self {
        Self {
            remote,
            outbound,
            close,
            peer_certificates,
        }
    }
}

impl OutboundConnection for ConnectionHandle {
    fn remote_address(&self) -> SocketAddr {
        self.remote
    }

    fn send(&self, message: Box<dyn OfMessage>) -> Result<SendCompletion, SendError> {
        let (tx, rx) = oneshot::channel();
        self.outbound
            .try_send(OutboundRequest {
                message,
                completion: tx,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
            })?;
        Ok(rx)
    }

    fn disconnect(&self) {
        let _ = self.close.send(true);
    }

    fn peer_certificates(&self) -> Option<&[Vec<u8>]> {
        self.peer_certificates.as_deref()
    }
}

/// Assembles the stage chain onto `stream` and returns the outbound handle
/// plus the connection future the owning facade runs to completion.
///
/// For TLS transports the caller must have completed the handshake before
/// calling this; `peer_certificates` carries the captured chain. The
/// acceptance policy has already admitted the peer at this point.
pub(crate) fn assemble_pipeline<S>(
    stream: S,
    remote: SocketAddr,
    peer_certificates: Option<PeerCertificates>,
    ctx: PipelineContext,
    server_close: watch::Receiver<bool>,
) -> (Arc<ConnectionHandle>, impl Future<Output = ()> + Send)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (out_tx, out_rx) = mpsc::channel(ctx.config.outbound_queue_size.max(1));
    let (close_tx, close_rx) = watch::channel(false);
    let handle = Arc::new(ConnectionHandle {
        remote,
        outbound: out_tx,
        close: close_tx,
        peer_certificates,
    });

    let consumer = ctx.handler.on_switch_connected(handle.clone());
    ctx.stats.inc_connections_opened();
    debug!(%remote, "pipeline assembled");

    let connection = run_connection(stream, remote, ctx, consumer, out_rx, close_rx, server_close);
    (handle, connection)
}

async fn run_connection<S>(
    stream: S,
    remote: SocketAddr,
    ctx: PipelineContext,
    consumer: Arc<dyn MessageConsumer>,
    out_rx: mpsc::Receiver<OutboundRequest>,
    mut close_rx: watch::Receiver<bool>,
    mut server_close: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    // Ready strictly precedes the first decoded frame: both happen on this
    // task, and for TLS the handshake finished before assembly.
    consumer.consume(ConnectionEvent::ConnectionReady);

    let (mut reader, writer) = tokio::io::split(stream);
    let encoder = MessageEncoder::new(ctx.serializers.clone(), ctx.stats.clone());
    let writer_task = tokio::spawn(run_writer(writer, encoder, out_rx, close_rx.clone()));

    let decoder = FrameDecoder::new(ctx.config.max_frame_length);
    let message_decoder = MessageDecoder::new(ctx.deserializers.clone(), ctx.stats.clone());
    let mut idle = IdleMonitor::new(ctx.config.switch_idle_timeout());
    let mut buf = BytesMut::with_capacity(4096);

    let reason: String = 'outer: loop {
        // Drain every complete frame buffered so far before reading again.
        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(frame)) => {
                    idle.on_traffic();
                    if let Some(tagged) = ctx.detector.detect(frame) {
                        if let Some(message) = message_decoder.decode(tagged) {
                            consumer.consume(ConnectionEvent::Message(message));
                        }
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    warn!(%remote, %error, "framing error, closing connection");
                    break 'outer format!("framing error: {error}");
                }
            }
        }

        tokio::select! {
            // A dropped close sender means every outbound handle is gone;
            // treat it the same as an explicit disconnect.
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    break 'outer DISCONNECT_CHANNEL_UNREGISTERED.to_string();
                }
            }
            changed = server_close.changed() => {
                if changed.is_err() || *server_close.borrow() {
                    break 'outer DISCONNECT_CHANNEL_UNREGISTERED.to_string();
                }
            }
            // The idle deadline advances only in idle.on_traffic(), on a
            // decoded frame. Raw read progress does not count, so a peer
            // trickling bytes of a never-completing frame still goes idle.
            _ = tokio::time::sleep_until(idle.deadline()) => {
                if idle.on_timeout() {
                    ctx.stats.inc_idle_events();
                    consumer.consume(ConnectionEvent::SwitchIdle);
                }
            }
            read = reader.read_buf(&mut buf) => {
                match read {
                    Ok(0) => break 'outer DISCONNECT_CHANNEL_INACTIVE.to_string(),
                    Ok(_) => {}
                    Err(error) => {
                        debug!(%remote, %error, "read error");
                        break 'outer DISCONNECT_CHANNEL_INACTIVE.to_string();
                    }
                }
            }
        }
    };

    writer_task.abort();
    let _ = writer_task.await;
    ctx.stats.inc_connections_closed();
    debug!(%remote, reason, "connection closed");
    consumer.consume(ConnectionEvent::Disconnected { reason });
}

async fn run_writer<W>(
    mut writer: W,
    encoder: MessageEncoder,
    mut out_rx: mpsc::Receiver<OutboundRequest>,
    mut close_rx: watch::Receiver<bool>,
) where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut out = BytesMut::with_capacity(4096);
    loop {
        tokio::select! {
            request = out_rx.recv() => {
                let Some(OutboundRequest { message, completion }) = request else {
                    break;
                };
                out.clear();
                match encoder.encode(message.as_ref(), &mut out) {
                    Ok(()) => {
                        let result = async {
                            writer.write_all(&out).await?;
                            writer.flush().await
                        }
                        .await;
                        match result {
                            Ok(()) => {
                                let _ = completion.send(Ok(()));
                            }
                            Err(error) => {
                                let _ = completion.send(Err(SendError::Io(error.to_string())));
                                break;
                            }
                        }
                    }
                    // Encode failure is per-message: report it on the
                    // completion signal and keep the connection open.
                    Err(error) => {
                        let _ = completion.send(Err(error));
                    }
                }
            }
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}
