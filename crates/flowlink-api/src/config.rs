//! Connection configuration supplied once at provider construction.
//!
//! The configuration is an immutable descriptor: it is built by the embedding
//! controller, handed to the provider, and shared by reference across every
//! connection the provider manages.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::MAX_FRAME_LENGTH;

/// Transport kind selected for a listening endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportProtocol {
    /// Plain TCP.
    Tcp,
    /// TCP wrapped in TLS with mandatory client certificates.
    Tls,
    /// Connectionless UDP with per-peer demultiplexing.
    Udp,
}

/// TLS material for a [`TransportProtocol::Tls`] endpoint.
///
/// All material is PEM-encoded and loaded from disk when the provider starts;
/// a missing or malformed file fails startup before any socket is bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfiguration {
    /// PEM file holding this endpoint's certificate chain.
    pub certificate_path: PathBuf,
    /// PEM file holding this endpoint's PKCS#8 private key.
    pub private_key_path: PathBuf,
    /// PEM file holding the CA certificates used to verify peers.
    pub ca_certificate_path: PathBuf,
    /// Allowed cipher suite names; empty means the provider defaults.
    ///
    /// Names follow the rustls identifiers, e.g.
    /// `TLS13_AES_256_GCM_SHA384`.
    pub cipher_suites: Vec<String>,
}

/// Sizing hints for the acceptor and worker pools.
///
/// The tokio runtime owns readiness polling and thread scheduling; these
/// counts are advisory figures the embedding binary feeds into its runtime
/// builder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThreadConfiguration {
    /// Threads dedicated to accepting/binding.
    pub boss_threads: usize,
    /// Threads running per-connection pipeline stages.
    pub worker_threads: usize,
}

impl Default for ThreadConfiguration {
    fn default() -> Self {
        Self { boss_threads: 1, worker_threads: 0 }
    }
}

/// Immutable descriptor for one listening or dialing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfiguration {
    /// Local bind address; `None` means any interface.
    pub address: Option<IpAddr>,
    /// Local port; 0 means an ephemeral port resolved at bind time.
    pub port: u16,
    /// Transport kind.
    pub transport: TransportProtocol,
    /// TLS material, required when `transport` is [`TransportProtocol::Tls`].
    pub tls: Option<TlsConfiguration>,
    /// Silence interval after which a single switch-idle event is emitted.
    pub switch_idle_timeout_ms: u64,
    /// Capacity of the per-connection outbound message queue.
    pub outbound_queue_size: usize,
    /// Advisory thread pool sizing.
    pub threads: ThreadConfiguration,
    /// Request barrier-style flush semantics from higher layers.
    pub use_barrier: bool,
    /// Enable the group add-mod batching accommodation in the codec.
    pub group_add_mod_enabled: bool,
    /// Reject frames whose declared length exceeds this bound.
    pub max_frame_length: usize,
}

impl ConnectionConfiguration {
    /// Creates a configuration with conventional defaults for `transport`
    /// listening on `port`.
    pub fn new(port: u16, transport: TransportProtocol) -> Self {
        Self {
            address: None,
            port,
            transport,
            tls: None,
            switch_idle_timeout_ms: 15_000,
            outbound_queue_size: 1024,
            threads: ThreadConfiguration::default(),
            use_barrier: true,
            group_add_mod_enabled: false,
            max_frame_length: MAX_FRAME_LENGTH,
        }
    }

    /// Resolved local socket address to bind, with `None` address mapping to
    /// the wildcard interface.
    pub fn bind_address(&self) -> SocketAddr {
        let ip = self.address.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::new(ip, self.port)
    }

    /// Idle timeout as a [`Duration`].
    pub fn switch_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.switch_idle_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ConnectionConfiguration::new(6653, TransportProtocol::Tcp);
        assert_eq!(cfg.port, 6653);
        assert!(cfg.address.is_none());
        assert!(cfg.tls.is_none());
        assert_eq!(cfg.max_frame_length, MAX_FRAME_LENGTH);
        assert_eq!(cfg.bind_address().to_string(), "0.0.0.0:6653");
    }

    #[test]
    fn test_explicit_bind_address() {
        let mut cfg = ConnectionConfiguration::new(0, TransportProtocol::Udp);
        cfg.address = Some("127.0.0.1".parse().unwrap());
        assert_eq!(cfg.bind_address().to_string(), "127.0.0.1:0");
    }

    #[test]
    fn test_idle_timeout_conversion() {
        let mut cfg = ConnectionConfiguration::new(0, TransportProtocol::Tcp);
        cfg.switch_idle_timeout_ms = 250;
        assert_eq!(cfg.switch_idle_timeout(), Duration::from_millis(250));
    }
}
