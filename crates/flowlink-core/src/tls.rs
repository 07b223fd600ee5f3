//! TLS gate for switch connections.
//!
//! Wraps a freshly accepted or dialed TCP stream in rustls, requiring client
//! certificate authentication and optionally restricting the enabled cipher
//! suites. The peer's certificate chain is captured after the handshake for
//! post-handshake identity binding; verification failures propagate unchanged
//! and tear the connection down.
//!
//! The pipeline assembler guarantees the ordering invariant around this
//! stage: the connection-ready event is emitted only after [`TlsContext`]
//! returns a completed handshake.

use std::net::IpAddr;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use tokio::net::TcpStream;
use tokio_rustls::{client, server, TlsAcceptor, TlsConnector};
use tracing::debug;

use flowlink_api::config::TlsConfiguration;

use crate::error::{ConnectionError, Result};

/// DER-encoded certificate chain a peer presented during its handshake.
pub type PeerCertificates = Vec<Vec<u8>>;

/// Server- and client-side TLS machinery built once per provider from the
/// connection configuration.
pub struct TlsContext {
    acceptor: TlsAcceptor,
    connector: TlsConnector,
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext").finish()
    }
}

impl TlsContext {
    /// Loads TLS material from the paths in `config` and builds the acceptor
    /// and connector. Any missing or malformed file is a startup-fatal
    /// error; nothing is bound yet when this runs.
    pub fn from_configuration(config: &TlsConfiguration) -> Result<Self> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let certs = load_certs_file(&config.certificate_path)?;
        let key = load_private_key_file(&config.private_key_path)?;
        let ca_certs = load_certs_file(&config.ca_certificate_path)?;

        let mut root_store = rustls::RootCertStore::empty();
        for cert in ca_certs {
            root_store.add(cert).map_err(|e| ConnectionError::Tls {
                reason: format!("failed to add CA cert: {e}"),
            })?;
        }
        let root_store = Arc::new(root_store);

        let provider = cipher_restricted_provider(&config.cipher_suites)?;

        // Switch certificates are mandatory: the verifier rejects peers
        // presenting no chain.
        let client_verifier = WebPkiClientVerifier::builder_with_provider(
            root_store.clone(),
            provider.clone(),
        )
        .build()
        .map_err(|e| ConnectionError::Tls {
            reason: format!("failed to build client verifier: {e}"),
        })?;

        let server_config = rustls::ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| ConnectionError::Tls {
                reason: format!("unusable protocol versions: {e}"),
            })?
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(certs.clone(), key.clone_key())
            .map_err(|e| ConnectionError::Tls {
                reason: format!("failed to set server cert: {e}"),
            })?;

        let client_config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ConnectionError::Tls {
                reason: format!("unusable protocol versions: {e}"),
            })?
            .with_root_certificates(root_store.as_ref().clone())
            .with_client_auth_cert(certs, key)
            .map_err(|e| ConnectionError::Tls {
                reason: format!("failed to create client config: {e}"),
            })?;

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(server_config)),
            connector: TlsConnector::from(Arc::new(client_config)),
        })
    }

    /// Runs the server-side handshake on an accepted stream.
    ///
    /// Returns the secured stream and the peer's captured certificate chain.
    /// A handshake failure is connection-fatal and surfaces here.
    pub async fn accept(
        &self,
        stream: TcpStream,
    ) -> Result<(server::TlsStream<TcpStream>, PeerCertificates)> {
        let stream = self
            .acceptor
            .accept(stream)
            .await
            .map_err(|e| ConnectionError::Tls {
                reason: format!("handshake failed: {e}"),
            })?;
        let chain = capture_peer_chain(stream.get_ref().1.peer_certificates());
        debug!(chain_len = chain.len(), "TLS handshake complete (server)");
        Ok((stream, chain))
    }

    /// Runs the client-side handshake on a dialed stream, verifying the
    /// server as `host`.
    pub async fn connect(
        &self,
        host: &str,
        stream: TcpStream,
    ) -> Result<(client::TlsStream<TcpStream>, PeerCertificates)> {
        let server_name = if let Ok(ip) = host.parse::<IpAddr>() {
            ServerName::IpAddress(ip.into())
        } else {
            ServerName::try_from(host.to_string()).map_err(|e| ConnectionError::Tls {
                reason: format!("invalid server name: {e}"),
            })?
        };
        let stream = self
            .connector
            .connect(server_name, stream)
            .await
            .map_err(|e| ConnectionError::Tls {
                reason: format!("handshake failed: {e}"),
            })?;
        let chain = capture_peer_chain(stream.get_ref().1.peer_certificates());
        debug!(chain_len = chain.len(), "TLS handshake complete (client)");
        Ok((stream, chain))
    }
}

fn capture_peer_chain(certs: Option<&[CertificateDer<'_>]>) -> PeerCertificates {
    certs
        .map(|chain| chain.iter().map(|c| c.as_ref().to_vec()).collect())
        .unwrap_or_default()
}

/// Builds a crypto provider whose cipher suite list is restricted to
/// `allowed` names. Empty allowlist means the ring defaults.
fn cipher_restricted_provider(allowed: &[String]) -> Result<Arc<rustls::crypto::CryptoProvider>> {
    let mut provider = rustls::crypto::ring::default_provider();
    if allowed.is_empty() {
        return Ok(Arc::new(provider));
    }
    provider
        .cipher_suites
        .retain(|suite| allowed.iter().any(|name| *name == format!("{:?}", suite.suite())));
    if provider.cipher_suites.is_empty() {
        return Err(ConnectionError::Tls {
            reason: format!("cipher suite allowlist matched nothing: {allowed:?}"),
        });
    }
    Ok(Arc::new(provider))
}

fn load_certs_file(path: &std::path::Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = std::fs::read(path).map_err(|e| ConnectionError::Tls {
        reason: format!("cannot read {}: {e}", path.display()),
    })?;
    load_certs_from_pem(&pem)
}

fn load_private_key_file(path: &std::path::Path) -> Result<PrivateKeyDer<'static>> {
    let pem = std::fs::read(path).map_err(|e| ConnectionError::Tls {
        reason: format!("cannot read {}: {e}", path.display()),
    })?;
    load_private_key_from_pem(&pem)
}

/// Parses all certificates out of PEM-encoded data.
pub fn load_certs_from_pem(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut certs = Vec::new();
    let mut cursor = std::io::Cursor::new(pem);
    while let Ok(Some(item)) = rustls_pemfile::read_one(&mut cursor) {
        if let rustls_pemfile::Item::X509Certificate(cert) = item {
            certs.push(cert);
        }
    }
    if certs.is_empty() {
        return Err(ConnectionError::Tls {
            reason: "no certificates found in PEM".to_string(),
        });
    }
    Ok(certs)
}

/// Parses the first private key (PKCS#8, SEC1 or PKCS#1) out of PEM-encoded
/// data.
pub fn load_private_key_from_pem(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut cursor = std::io::Cursor::new(pem);
    while let Ok(Some(item)) = rustls_pemfile::read_one(&mut cursor) {
        match item {
            rustls_pemfile::Item::Pkcs8Key(key) => return Ok(PrivateKeyDer::Pkcs8(key)),
            rustls_pemfile::Item::Sec1Key(key) => return Ok(PrivateKeyDer::Sec1(key)),
            rustls_pemfile::Item::Pkcs1Key(key) => return Ok(PrivateKeyDer::Pkcs1(key)),
            _ => {}
        }
    }
    Err(ConnectionError::Tls {
        reason: "no private key found in PEM".to_string(),
    })
}

/// Generates a self-signed CA certificate and key pair.
///
/// Returns (CA certificate PEM, CA key PEM). Used for test material and for
/// bootstrapping a deployment without an external PKI.
pub fn generate_self_signed_ca() -> Result<(Vec<u8>, Vec<u8>)> {
    let key_pair = rcgen::KeyPair::generate().map_err(|e| ConnectionError::Tls {
        reason: format!("failed to generate CA key: {e}"),
    })?;

    let mut params = rcgen::CertificateParams::default();
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);

    let cert = params.self_signed(&key_pair).map_err(|e| ConnectionError::Tls {
        reason: format!("failed to create CA certificate: {e}"),
    })?;

    Ok((cert.pem().into_bytes(), key_pair.serialize_pem().into_bytes()))
}

/// Generates an endpoint certificate for `name`, signed by the given CA.
///
/// Returns (certificate PEM, key PEM). Works for both the controller side
/// and switch-side client certificates.
pub fn generate_endpoint_cert(
    ca_cert_pem: &[u8],
    ca_key_pem: &[u8],
    name: &str,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let ca_key = rcgen::KeyPair::from_pem(std::str::from_utf8(ca_key_pem).map_err(|e| {
        ConnectionError::Tls {
            reason: format!("invalid CA key PEM: {e}"),
        }
    })?)
    .map_err(|e| ConnectionError::Tls {
        reason: format!("failed to parse CA key: {e}"),
    })?;

    let ca_cert_pem_str = std::str::from_utf8(ca_cert_pem).map_err(|e| ConnectionError::Tls {
        reason: format!("invalid CA cert PEM: {e}"),
    })?;

    let ca_params =
        rcgen::CertificateParams::from_ca_cert_pem(ca_cert_pem_str).map_err(|e| {
            ConnectionError::Tls {
                reason: format!("failed to parse CA certificate: {e}"),
            }
        })?;

    let ca_cert = ca_params.self_signed(&ca_key).map_err(|e| ConnectionError::Tls {
        reason: format!("failed to reconstruct CA certificate: {e}"),
    })?;

    let endpoint_key = rcgen::KeyPair::generate().map_err(|e| ConnectionError::Tls {
        reason: format!("failed to generate endpoint key: {e}"),
    })?;

    let params = rcgen::CertificateParams::new(vec![name.to_string()]).map_err(|e| {
        ConnectionError::Tls {
            reason: format!("failed to create endpoint certificate params: {e}"),
        }
    })?;

    let endpoint_cert = params
        .signed_by(&endpoint_key, &ca_cert, &ca_key)
        .map_err(|e| ConnectionError::Tls {
            reason: format!("failed to sign endpoint certificate: {e}"),
        })?;

    Ok((
        endpoint_cert.pem().into_bytes(),
        endpoint_key.serialize_pem().into_bytes(),
    ))
}
