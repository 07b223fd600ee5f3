//! Single-assignment completion signals.
//!
//! "Online", "terminated" and per-handshake completion are modeled as result
//! cells that are completed exactly once and can be awaited by any number of
//! waiters, before or after completion. Later completion attempts lose.

use tokio::sync::watch;

/// A single-assignment result cell with multiple waiters.
///
/// Cheap to share behind an `Arc`; `wait` can be called concurrently from any
/// number of tasks.
#[derive(Debug)]
pub struct CompletionSignal<T: Clone> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> CompletionSignal<T> {
    /// Creates an empty, not-yet-completed signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Completes the signal with `value`. Returns false if it was already
    /// completed; the first value sticks.
    pub fn complete(&self, value: T) -> bool {
        let mut value = Some(value);
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = value.take();
                true
            } else {
                false
            }
        })
    }

    /// Returns the completed value, if any, without waiting.
    pub fn peek(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Waits until the signal is completed and returns its value.
    pub async fn wait(&self) -> T {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(value) = rx.borrow_and_update().clone() {
                return value;
            }
            // The sender lives in self, so changed() cannot fail while the
            // borrow above is held across loop iterations.
            if rx.changed().await.is_err() {
                unreachable!("completion signal sender dropped while waiting");
            }
        }
    }
}

impl<T: Clone> Default for CompletionSignal<T> {
    fn default() -> Self {
        Self::new()
    }
}
