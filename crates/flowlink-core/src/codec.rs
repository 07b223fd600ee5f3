//! Adapters between version-tagged frames and the external structured codec.
//!
//! Both directions treat codec failures as recoverable per-message faults:
//! the offending frame or message is dropped, a counter increments, and the
//! connection stays open.

use std::sync::Arc;

use bytes::BytesMut;
use tracing::warn;

use flowlink_api::connection::SendError;
use flowlink_api::extensibility::OfMessage;
use flowlink_api::keys::{DeserializerKey, MessageCodeKey, MessageTypeKey, SerializerKey};

use crate::frame::VersionedFrame;
use crate::registry::{DeserializerRegistry, SerializerRegistry};
use crate::stats::ConnectionStatistics;

/// Decode direction: delegates a version-tagged frame to the registered
/// deserializer.
pub struct MessageDecoder {
    registry: Arc<DeserializerRegistry>,
    stats: Arc<ConnectionStatistics>,
}

impl MessageDecoder {
    /// Creates a decoder over `registry`.
    pub fn new(registry: Arc<DeserializerRegistry>, stats: Arc<ConnectionStatistics>) -> Self {
        Self { registry, stats }
    }

    /// Decodes one frame, or returns `None` when the frame must be dropped.
    ///
    /// Missing deserializer, a declined frame (`Ok(None)` from the codec) and
    /// a codec error all count as decode failures. The frame buffer is
    /// consumed on every path.
    pub fn decode(&self, frame: VersionedFrame) -> Option<Box<dyn OfMessage>> {
        let msg_type = frame.message[0];
        let key = DeserializerKey::Message(MessageCodeKey::new(frame.version, msg_type));
        let Some(deserializer) = self.registry.get(&key) else {
            warn!(
                version = frame.version,
                msg_type, "no deserializer registered, dropping frame"
            );
            self.stats.inc_decode_failures();
            return None;
        };
        match deserializer.deserialize(frame.version, &frame.message) {
            Ok(Some(message)) => {
                self.stats.inc_messages_decoded();
                Some(message)
            }
            Ok(None) => {
                warn!(version = frame.version, msg_type, "codec declined frame");
                self.stats.inc_decode_failures();
                None
            }
            Err(error) => {
                warn!(version = frame.version, msg_type, error = %error, "decode failed");
                self.stats.inc_decode_failures();
                None
            }
        }
    }
}

/// Encode direction: delegates an outbound message to the registered
/// serializer.
pub struct MessageEncoder {
    registry: Arc<SerializerRegistry>,
    stats: Arc<ConnectionStatistics>,
}

impl MessageEncoder {
    /// Creates an encoder over `registry`.
    pub fn new(registry: Arc<SerializerRegistry>, stats: Arc<ConnectionStatistics>) -> Self {
        Self { registry, stats }
    }

    /// Encodes `message` onto `out`.
    ///
    /// On failure anything the codec partially appended is truncated away, so
    /// a failed encode never corrupts the outbound byte stream.
    pub fn encode(
        &self,
        message: &dyn OfMessage,
        out: &mut BytesMut,
    ) -> Result<(), SendError> {
        let key = SerializerKey::Message(MessageTypeKey::new(
            message.version(),
            message.message_type(),
        ));
        let Some(serializer) = self.registry.get(&key) else {
            self.stats.inc_encode_failures();
            return Err(SendError::Encode(format!(
                "no serializer registered for version {} type {}",
                message.version(),
                message.message_type()
            )));
        };
        let mark = out.len();
        match serializer.serialize(message, out) {
            Ok(()) => {
                self.stats.inc_messages_encoded();
                Ok(())
            }
            Err(error) => {
                out.truncate(mark);
                self.stats.inc_encode_failures();
                warn!(
                    version = message.version(),
                    msg_type = message.message_type(),
                    error = %error,
                    "encode failed"
                );
                Err(SendError::Encode(error.to_string()))
            }
        }
    }
}
