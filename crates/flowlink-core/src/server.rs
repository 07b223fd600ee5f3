//! TCP/TLS server facade: owns the accept loop and the lifecycle signals.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::pipeline::{assemble_pipeline, PipelineContext};
use crate::signal::CompletionSignal;
use crate::tls::TlsContext;

/// Resolution of the "online" signal: the bound local address, or a
/// startup-fatal failure rendered as text.
pub type OnlineResult = std::result::Result<SocketAddr, String>;

/// Lifecycle surface common to the TCP and UDP server variants.
///
/// State transitions are one-way: created, then bound and accepting, then
/// shut down. A shut-down facade is never re-bound.
#[async_trait]
pub trait ServerFacade: Send + Sync {
    /// Signal completed once the facade is bound and accepting, or failed.
    fn online(&self) -> Arc<CompletionSignal<OnlineResult>>;

    /// Requests shutdown and returns the "fully terminated" signal.
    ///
    /// Idempotent: the first call triggers graceful closure of the accept
    /// loop and every in-flight connection; subsequent calls observe the
    /// same signal without re-triggering anything.
    fn shutdown(&self) -> Arc<CompletionSignal<()>>;

    /// The accept/receive loop. Runs until shutdown; the provider spawns
    /// this exactly once.
    async fn run(self: Arc<Self>);
}

/// Server facade for plain TCP and TLS transports.
pub struct TcpServerFacade {
    ctx: PipelineContext,
    tls: Option<Arc<TlsContext>>,
    online: Arc<CompletionSignal<OnlineResult>>,
    terminated: Arc<CompletionSignal<()>>,
    close: watch::Sender<bool>,
}

impl TcpServerFacade {
    pub(crate) fn new(ctx: PipelineContext, tls: Option<Arc<TlsContext>>) -> Self {
        let (close, _) = watch::channel(false);
        Self {
            ctx,
            tls,
            online: Arc::new(CompletionSignal::new()),
            terminated: Arc::new(CompletionSignal::new()),
            close,
        }
    }

    /// Watch handle that flips when the facade shuts down; the connection
    /// initiator ties dialed connections to it.
    pub(crate) fn close_watch(&self) -> watch::Receiver<bool> {
        self.close.subscribe()
    }
}

#[async_trait]
impl ServerFacade for TcpServerFacade {
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
        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(error) => {
                self.online
                    .complete(Err(format!("bind failed on {bind_addr}: {error}")));
                self.terminated.complete(());
                return;
            }
        };
        let local = match listener.local_addr() {
            Ok(addr) => addr,
            Err(error) => {
                self.online
                    .complete(Err(format!("local address unavailable: {error}")));
                self.terminated.complete(());
                return;
            }
        };
        info!(%local, tls = self.tls.is_some(), "listening for switch connections");
        self.online.complete(Ok(local));

        let mut close_rx = self.close.subscribe();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = close_rx.changed() => {
                    if *close_rx.borrow() {
                        break;
                    }
                }
                // Reap finished connection tasks as they end rather than
                // letting entries accumulate until shutdown.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, remote)) => {
                            // Policy runs on the address alone, before TLS or
                            // any read; a rejected peer costs nothing more.
                            if !self.ctx.handler.accept(remote) {
                                debug!(%remote, "connection rejected by acceptance policy");
                                continue;
                            }
                            let _ = stream.set_nodelay(true);
                            let ctx = self.ctx.clone();
                            let tls = self.tls.clone();
                            let conn_close = self.close.subscribe();
                            connections.spawn(async move {
                                match tls {
                                    Some(tls) => match tls.accept(stream).await {
                                        Ok((stream, chain)) => {
                                            let (_handle, connection) = assemble_pipeline(
                                                stream, remote, Some(chain), ctx, conn_close,
                                            );
                                            connection.await;
                                        }
                                        Err(error) => {
                                            debug!(%remote, %error, "TLS handshake failed, dropping connection");
                                        }
                                    },
                                    None => {
                                        let (_handle, connection) =
                                            assemble_pipeline(stream, remote, None, ctx, conn_close);
                                        connection.await;
                                    }
                                }
                            });
                        }
                        Err(error) => {
                            warn!(%error, "accept failed");
                        }
                    }
                }
            }
        }

        // Stop accepting first, then drain in-flight connections; each one
        // observes the close watch and winds down on its own.
        drop(listener);
        while connections.join_next().await.is_some() {}
        self.terminated.complete(());
        info!(%local, "server facade terminated");
    }
}
