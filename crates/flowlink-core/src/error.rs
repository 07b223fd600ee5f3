//! Error types for the connection front end.

use thiserror::Error;

/// Errors surfaced by the connection front end.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// A frame declared a length above the configured bound.
    #[error("frame too large: declared {length} bytes (max {max})")]
    FrameTooLarge {
        /// Declared total frame length.
        length: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A frame declared a length smaller than the fixed header.
    #[error("frame too short: declared {length} bytes, header alone is 8")]
    FrameTooShort {
        /// Declared total frame length.
        length: usize,
    },

    /// An outbound dial was refused or failed to establish.
    #[error("connection refused to {addr}")]
    ConnectionRefused {
        /// Address dialed.
        addr: String,
    },

    /// TLS material loading, context construction or handshake failure.
    #[error("TLS error: {reason}")]
    Tls {
        /// Underlying cause.
        reason: String,
    },

    /// The listening socket could not be bound.
    #[error("bind failed on {addr}: {reason}")]
    BindFailed {
        /// Address that was being bound.
        addr: String,
        /// Underlying cause.
        reason: String,
    },

    /// The server facade never came online.
    #[error("startup failed: {reason}")]
    StartupFailed {
        /// Underlying cause.
        reason: String,
    },

    /// Startup was called on a provider that already ran.
    #[error("provider already started")]
    AlreadyStarted,

    /// An operation that needs a running provider was called too early.
    #[error("provider not started")]
    NotStarted,

    /// Startup was called before a switch connection handler was set.
    #[error("switch connection handler not set")]
    HandlerNotSet,

    /// The configured transport cannot perform the requested operation.
    #[error("transport {transport} does not support outbound connections")]
    UnsupportedTransport {
        /// Transport name.
        transport: String,
    },

    /// Transport-level I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ConnectionError>;
