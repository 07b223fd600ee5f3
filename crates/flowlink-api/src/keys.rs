//! Registry keys for the serializer and deserializer lookup tables.
//!
//! Deserialization is keyed by (version, wire type code); serialization by
//! (version, type code of the outbound message). Experimenter (vendor)
//! extensions register under keys that additionally carry the experimenter id,
//! so a vendor codec never collides with a standard one.

/// Key for a standard message deserializer: wire version plus type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageCodeKey {
    /// Protocol wire version.
    pub version: u8,
    /// Message type code as it appears at byte 1 of the header.
    pub msg_type: u8,
}

impl MessageCodeKey {
    /// Creates a key for `version` and `msg_type`.
    pub fn new(version: u8, msg_type: u8) -> Self {
        Self { version, msg_type }
    }
}

/// Key for a standard message serializer: wire version plus type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageTypeKey {
    /// Protocol wire version.
    pub version: u8,
    /// Message type code the serializer produces.
    pub msg_type: u8,
}

impl MessageTypeKey {
    /// Creates a key for `version` and `msg_type`.
    pub fn new(version: u8, msg_type: u8) -> Self {
        Self { version, msg_type }
    }
}

/// Key for an experimenter (vendor) codec registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExperimenterIdKey {
    /// Protocol wire version.
    pub version: u8,
    /// ONF-assigned experimenter id.
    pub experimenter_id: u32,
    /// Vendor-scoped message subtype.
    pub msg_type: u8,
}

impl ExperimenterIdKey {
    /// Creates a key for `version`, `experimenter_id` and `msg_type`.
    pub fn new(version: u8, experimenter_id: u32, msg_type: u8) -> Self {
        Self { version, experimenter_id, msg_type }
    }
}

/// Union key under which a deserializer is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeserializerKey {
    /// Standard message, keyed by wire type code.
    Message(MessageCodeKey),
    /// Experimenter message, keyed by experimenter id and subtype.
    Experimenter(ExperimenterIdKey),
}

/// Union key under which a serializer is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SerializerKey {
    /// Standard message, keyed by type code.
    Message(MessageTypeKey),
    /// Experimenter message, keyed by experimenter id and subtype.
    Experimenter(ExperimenterIdKey),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_keys_hash_distinct() {
        let mut map = HashMap::new();
        map.insert(DeserializerKey::Message(MessageCodeKey::new(4, 10)), "packet-in");
        map.insert(
            DeserializerKey::Experimenter(ExperimenterIdKey::new(4, 0x4f4e_4600, 10)),
            "vendor",
        );
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get(&DeserializerKey::Message(MessageCodeKey::new(4, 10))),
            Some(&"packet-in")
        );
    }

    #[test]
    fn test_same_code_different_version_distinct() {
        let a = MessageCodeKey::new(1, 0);
        let b = MessageCodeKey::new(4, 0);
        assert_ne!(a, b);
    }
}
