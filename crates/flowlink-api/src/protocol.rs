//! Wire-level constants shared by the framing and version-detection stages.
//!
//! Every OpenFlow message starts with the same 8-byte header:
//! byte 0 = protocol version, byte 1 = message type, bytes 2-3 = total
//! frame length (big-endian, header included), bytes 4-7 = transaction id.

/// Size of the fixed OpenFlow message header in bytes.
pub const OFP_HEADER_SIZE: usize = 8;

/// Offset of the big-endian u16 total-length field within the header.
pub const LENGTH_FIELD_OFFSET: usize = 2;

/// OpenFlow 1.0 wire version.
pub const OFP10_VERSION: u8 = 0x01;
/// OpenFlow 1.3 wire version.
pub const OFP13_VERSION: u8 = 0x04;
/// OpenFlow 1.4 wire version.
pub const OFP14_VERSION: u8 = 0x05;
/// OpenFlow 1.5 wire version.
pub const OFP15_VERSION: u8 = 0x06;

/// Protocol versions this controller front end is willing to speak.
pub const SUPPORTED_VERSIONS: [u8; 4] =
    [OFP10_VERSION, OFP13_VERSION, OFP14_VERSION, OFP15_VERSION];

/// HELLO message type code, identical across protocol versions.
///
/// HELLO frames are admitted regardless of their version byte so that
/// version negotiation with a newer switch can still take place.
pub const TYPE_HELLO: u8 = 0;

/// PACKET_IN message type code, identical across supported versions.
pub const TYPE_PACKET_IN: u8 = 10;

/// Upper bound on a declared frame length; the length field is a u16.
pub const MAX_FRAME_LENGTH: usize = u16::MAX as usize;

/// Returns true if `version` is one of [`SUPPORTED_VERSIONS`].
pub fn is_supported_version(version: u8) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_versions() {
        assert!(is_supported_version(OFP10_VERSION));
        assert!(is_supported_version(OFP13_VERSION));
        assert!(is_supported_version(OFP15_VERSION));
        assert!(!is_supported_version(0x00));
        assert!(!is_supported_version(0x02));
        assert!(!is_supported_version(0x7f));
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(OFP_HEADER_SIZE, 8);
        assert_eq!(LENGTH_FIELD_OFFSET, 2);
    }
}
