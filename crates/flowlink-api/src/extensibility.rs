//! Capability traits through which the external structured-message codec is
//! consumed.
//!
//! The connection front end never interprets message bodies itself: it hands
//! length-framed byte buffers to a registered [`OfDeserializer`] and receives
//! opaque [`OfMessage`] objects, and runs the reverse path through a
//! registered [`OfSerializer`]. Registration is keyed per
//! [`crate::keys`]; the front end only reads the header bytes needed to pick
//! a key.

use std::any::Any;
use std::fmt;

use bytes::BytesMut;
use thiserror::Error;

/// Error raised by an external codec implementation.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The buffer could not be interpreted as the expected message.
    #[error("deserialization failed: {0}")]
    Deserialization(String),
    /// The message could not be rendered to the wire.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// A structured protocol message as produced or consumed by the codec.
///
/// The front end treats messages as opaque; the accessors below expose only
/// the header fields needed for serializer lookup and logging. Consumers
/// downcast via [`OfMessage::as_any`].
pub trait OfMessage: fmt::Debug + Send + Sync {
    /// Wire version the message belongs to.
    fn version(&self) -> u8;
    /// Message type code.
    fn message_type(&self) -> u8;
    /// Transaction id.
    fn xid(&self) -> u32;
    /// Downcast support for concrete consumers.
    fn as_any(&self) -> &dyn Any;
}

/// Deserializer capability: framed bytes to structured message.
///
/// `payload` starts at the message-type byte (the version byte has already
/// been consumed by the version detector) and runs to the end of the frame.
/// Returning `Ok(None)` means the codec declined the frame; the front end
/// drops it and counts a decode failure, the connection stays open.
pub trait OfDeserializer: Send + Sync {
    /// Decodes one frame.
    fn deserialize(
        &self,
        version: u8,
        payload: &[u8],
    ) -> Result<Option<Box<dyn OfMessage>>, CodecError>;
}

/// Serializer capability: structured message to framed bytes.
///
/// Implementations append the complete frame, header included, to `out`. On
/// error the front end discards whatever was partially appended.
pub trait OfSerializer: Send + Sync {
    /// Encodes one message onto `out`.
    fn serialize(&self, message: &dyn OfMessage, out: &mut BytesMut) -> Result<(), CodecError>;
}
