//! Idle detection for a single connection.
//!
//! A leaf stage with no protocol knowledge: it tracks the deadline of the
//! current silence interval. Only a fully decoded frame counts as traffic;
//! raw read progress (partial or invalid bytes) must not move the deadline,
//! so a peer dripping bytes of a never-completing frame still goes idle.

use std::time::Duration;

use tokio::time::Instant;

/// Per-connection idle state.
///
/// Only touched from the connection's own task, so it needs no
/// synchronization.
#[derive(Debug)]
pub struct IdleMonitor {
    timeout: Duration,
    deadline: Instant,
    idle_notified: bool,
}

impl IdleMonitor {
    /// Creates a monitor with the given silence threshold; the first
    /// interval starts now.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: Instant::now() + timeout,
            idle_notified: false,
        }
    }

    /// The configured silence threshold.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Instant at which the current silence interval expires. The owning
    /// task sleeps until this and then calls [`IdleMonitor::on_timeout`].
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Records a successfully decoded frame; restarts the silence interval
    /// and re-arms idle notification. Callers must not invoke this for
    /// partial or invalid data.
    pub fn on_traffic(&mut self) {
        self.idle_notified = false;
        self.deadline = Instant::now() + self.timeout;
    }

    /// Records an expired silence interval and starts the next one. Returns
    /// true exactly once per uninterrupted idle period; a continuous stall
    /// keeps returning false until traffic resumes.
    pub fn on_timeout(&mut self) -> bool {
        self.deadline = Instant::now() + self.timeout;
        if self.idle_notified {
            false
        } else {
            self.idle_notified = true;
            true
        }
    }
}
