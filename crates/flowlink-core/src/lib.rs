#![warn(missing_docs)]

//! Flowlink core: controller-side network front end for the OpenFlow
//! switch-control protocol.
//!
//! Accepts inbound switch connections (or dials out to switches), optionally
//! secures them with mutual TLS, splits the byte stream into length-delimited
//! frames, detects the protocol version each peer speaks, and delegates the
//! framed bytes to the external structured-message codec registered through
//! [`provider::ConnectionProvider`].

pub mod codec;
pub mod detector;
pub mod error;
pub mod frame;
pub mod idle;
pub mod initiator;
pub mod pipeline;
pub mod provider;
pub mod registry;
pub mod server;
pub mod signal;
pub mod stats;
pub mod tls;
pub mod udp;

pub use error::{ConnectionError, Result};
pub use provider::ConnectionProvider;
