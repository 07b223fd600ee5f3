//! Active-open counterpart of the server facade: the controller dials out to
//! a switch and runs the same pipeline over the resulting stream.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;

use flowlink_api::connection::OutboundConnection;

use crate::error::{ConnectionError, Result};
use crate::pipeline::{assemble_pipeline, PipelineContext};
use crate::tls::TlsContext;

/// Dials switches on behalf of the controller.
///
/// Shares the server facade's pipeline collaborators and close watch, so
/// initiated connections wind down with the provider. Connect failures are
/// reported to the caller; any retry policy belongs there.
pub struct ConnectionInitiator {
    ctx: PipelineContext,
    tls: Option<Arc<TlsContext>>,
    server_close: watch::Receiver<bool>,
}

impl ConnectionInitiator {
    pub(crate) fn new(
        ctx: PipelineContext,
        tls: Option<Arc<TlsContext>>,
        server_close: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ctx,
            tls,
            server_close,
        }
    }

    /// Connects to `host:port`, assembles the pipeline and returns the
    /// outbound handle. The consumer receives its events exactly as for an
    /// accepted connection, ready signal ordering included.
    pub async fn initiate_connection(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Arc<dyn OutboundConnection>> {
        let addr = format!("{host}:{port}");
        // Connect with the (host, port) pair; IPv6 literals would not
        // survive naive string concatenation.
        let stream = TcpStream::connect((host, port)).await.map_err(|error| {
            debug!(%addr, %error, "outbound connection failed");
            match error.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    ConnectionError::ConnectionRefused { addr: addr.clone() }
                }
                _ => ConnectionError::Io(error),
            }
        })?;
        let _ = stream.set_nodelay(true);
        let remote = stream.peer_addr()?;

        match &self.tls {
            Some(tls) => {
                let (stream, chain) = tls.connect(host, stream).await?;
                let (handle, connection) = assemble_pipeline(
                    stream,
                    remote,
                    Some(chain),
                    self.ctx.clone(),
                    self.server_close.clone(),
                );
                tokio::spawn(connection);
                Ok(handle)
            }
            None => {
                let (handle, connection) = assemble_pipeline(
                    stream,
                    remote,
                    None,
                    self.ctx.clone(),
                    self.server_close.clone(),
                );
                tokio::spawn(connection);
                Ok(handle)
            }
        }
    }
}
