//! Protocol version detection and earliest-stage admission filtering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use flowlink_api::protocol::{is_supported_version, TYPE_HELLO, TYPE_PACKET_IN};

use crate::frame::VersionedFrame;
use crate::stats::ConnectionStatistics;

/// Classifies frames by protocol version and applies admission filtering.
///
/// One detector is shared by every connection of a provider so that the
/// PACKET_IN filter toggle takes effect process-wide.
#[derive(Debug)]
pub struct VersionDetector {
    filter_packet_in: AtomicBool,
    stats: Arc<ConnectionStatistics>,
}

impl VersionDetector {
    /// Creates a detector with PACKET_IN filtering disabled.
    pub fn new(stats: Arc<ConnectionStatistics>) -> Self {
        Self {
            filter_packet_in: AtomicBool::new(false),
            stats,
        }
    }

    /// Enables or disables PACKET_IN shedding. May be toggled at any time;
    /// in-flight frames observe the new setting on their next pass.
    pub fn set_filter_packet_in(&self, enabled: bool) {
        self.filter_packet_in.store(enabled, Ordering::Relaxed);
    }

    /// Current PACKET_IN filter setting.
    pub fn filter_packet_in(&self) -> bool {
        self.filter_packet_in.load(Ordering::Relaxed)
    }

    /// Inspects a raw frame and either tags it with its version or drops it.
    ///
    /// HELLO frames pass regardless of version byte so that negotiation with
    /// unknown versions can proceed. Anything else with an unsupported
    /// version is logged and silently dropped: an expected occurrence in
    /// multi-version networks, not a fault. While the PACKET_IN filter is
    /// enabled, matching frames are shed here, before the costlier
    /// structured decode.
    pub fn detect(&self, frame: Bytes) -> Option<VersionedFrame> {
        debug_assert!(frame.len() >= 2);
        let version = frame[0];
        let msg_type = frame[1];

        if self.filter_packet_in.load(Ordering::Relaxed) && msg_type == TYPE_PACKET_IN {
            self.stats.inc_packet_ins_filtered();
            return None;
        }

        if msg_type == TYPE_HELLO || is_supported_version(version) {
            self.stats.inc_frames_received();
            Some(VersionedFrame {
                version,
                message: frame.slice(1..),
            })
        } else {
            debug!(version, msg_type, "dropping frame with unsupported protocol version");
            self.stats.inc_frames_dropped_version();
            None
        }
    }
}
