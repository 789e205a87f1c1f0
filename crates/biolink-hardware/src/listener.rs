//! Listener bridge: turns sensor callbacks into a single awaitable outcome.
//!
//! Sensors report asynchronous capture results through a four-callback
//! interface ([`CaptureListener`]). Callbacks may arrive on any thread, more
//! than once, and after the waiter has given up. The bridge resolves exactly
//! once: the first meaningful callback wins, everything after it is counted
//! and dropped.
//!
//! # Examples
//!
//! ```
//! use biolink_core::Deadline;
//! use biolink_hardware::listener::{ListenerBridge, ListenerOutcome};
//! use biolink_hardware::traits::CaptureListener;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (bridge, wait) = ListenerBridge::new();
//!
//!     bridge.on_capture_success(vec![1, 2, 3]);
//!     bridge.on_capture_error(-8);
//!
//!     let outcome = wait.wait(Deadline::after(Duration::from_millis(100))).await;
//!     assert_eq!(outcome, Some(ListenerOutcome::Captured(vec![1, 2, 3])));
//!     assert_eq!(bridge.ignored(), 1);
//! }
//! ```

use crate::traits::CaptureListener;
use biolink_core::Deadline;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

/// What a listener delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerOutcome {
    /// Image (or template) bytes from a capture callback.
    Captured(Vec<u8>),

    /// Capture failure code.
    CaptureError(i32),

    /// Template bytes from an extraction callback.
    Extracted(Vec<u8>),

    /// Extraction failure code.
    ExtractError(i32),
}

impl ListenerOutcome {
    /// The delivered bytes, if the outcome carries any.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Self::Captured(bytes) | Self::Extracted(bytes) => Some(bytes),
            Self::CaptureError(_) | Self::ExtractError(_) => None,
        }
    }
}

/// Single-resolution [`CaptureListener`].
#[derive(Debug)]
pub struct ListenerBridge {
    tx: Mutex<Option<oneshot::Sender<ListenerOutcome>>>,
    ignored: AtomicUsize,
}

impl ListenerBridge {
    /// Create a bridge and the waiting half.
    pub fn new() -> (Arc<Self>, ListenerWait) {
        let (tx, rx) = oneshot::channel();
        let bridge = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            ignored: AtomicUsize::new(0),
        });
        (bridge, ListenerWait { rx })
    }

    /// Number of callbacks dropped: late deliveries and empty payloads.
    pub fn ignored(&self) -> usize {
        self.ignored.load(Ordering::Acquire)
    }

    /// Whether an outcome has been delivered.
    pub fn is_resolved(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn resolve(&self, outcome: ListenerOutcome) {
        let sender = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        match sender {
            // The waiter may already be gone; the outcome is still consumed.
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => {
                self.ignored.fetch_add(1, Ordering::AcqRel);
                tracing::trace!(?outcome, "late listener callback ignored");
            }
        }
    }

    fn resolve_bytes(&self, bytes: Vec<u8>, wrap: fn(Vec<u8>) -> ListenerOutcome) {
        if bytes.is_empty() {
            self.ignored.fetch_add(1, Ordering::AcqRel);
            tracing::trace!("empty listener payload ignored");
            return;
        }
        self.resolve(wrap(bytes));
    }
}

impl CaptureListener for ListenerBridge {
    fn on_capture_success(&self, payload: Vec<u8>) {
        self.resolve_bytes(payload, ListenerOutcome::Captured);
    }

    fn on_capture_error(&self, code: i32) {
        self.resolve(ListenerOutcome::CaptureError(code));
    }

    fn on_extract_success(&self, template: Vec<u8>) {
        self.resolve_bytes(template, ListenerOutcome::Extracted);
    }

    fn on_extract_error(&self, code: i32) {
        self.resolve(ListenerOutcome::ExtractError(code));
    }
}

/// Waiting half of a [`ListenerBridge`].
#[derive(Debug)]
pub struct ListenerWait {
    rx: oneshot::Receiver<ListenerOutcome>,
}

impl ListenerWait {
    /// Wait for the outcome until `deadline`.
    ///
    /// Returns `None` on timeout or if the bridge was dropped without
    /// delivering.
    pub async fn wait(self, deadline: Deadline) -> Option<ListenerOutcome> {
        tokio::time::timeout_at(deadline.instant(), self.rx)
            .await
            .ok()?
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_callback_wins() {
        let (bridge, wait) = ListenerBridge::new();

        bridge.on_capture_success(vec![0xAA; 4]);
        bridge.on_capture_success(vec![0xBB; 4]);

        let outcome = wait.wait(Deadline::after(Duration::from_millis(50))).await;
        assert_eq!(outcome, Some(ListenerOutcome::Captured(vec![0xAA; 4])));
        assert_eq!(bridge.ignored(), 1);
    }

    #[rstest]
    #[case::success_then_error(true, ListenerOutcome::Captured(vec![0xAA; 4]))]
    #[case::error_then_success(false, ListenerOutcome::CaptureError(-8))]
    #[tokio::test]
    async fn test_first_outcome_wins_across_kinds(
        #[case] success_first: bool,
        #[case] expected: ListenerOutcome,
    ) {
        let (bridge, wait) = ListenerBridge::new();

        if success_first {
            bridge.on_capture_success(vec![0xAA; 4]);
            bridge.on_capture_error(-8);
        } else {
            bridge.on_capture_error(-8);
            bridge.on_capture_success(vec![0xAA; 4]);
        }

        let outcome = wait.wait(Deadline::after(Duration::from_millis(50))).await;
        assert_eq!(outcome, Some(expected));
        assert_eq!(bridge.ignored(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_payload_alone_times_out() {
        let (bridge, wait) = ListenerBridge::new();

        bridge.on_capture_success(Vec::new());
        bridge.on_extract_success(Vec::new());

        let outcome = wait.wait(Deadline::after(Duration::from_millis(200))).await;
        assert_eq!(outcome, None);
        assert!(!bridge.is_resolved());
        assert_eq!(bridge.ignored(), 2);
    }

    #[tokio::test]
    async fn test_empty_payload_is_not_terminal() {
        let (bridge, wait) = ListenerBridge::new();

        bridge.on_capture_success(Vec::new());
        assert!(!bridge.is_resolved());

        bridge.on_extract_success(vec![7; 16]);
        let outcome = wait.wait(Deadline::after(Duration::from_millis(50))).await;
        assert_eq!(outcome, Some(ListenerOutcome::Extracted(vec![7; 16])));
    }

    #[tokio::test]
    async fn test_error_code_resolves() {
        let (bridge, wait) = ListenerBridge::new();
        bridge.on_capture_error(-8);

        let outcome = wait.wait(Deadline::after(Duration::from_millis(50))).await;
        assert_eq!(outcome.clone(), Some(ListenerOutcome::CaptureError(-8)));
        assert_eq!(outcome.and_then(ListenerOutcome::into_bytes), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let (_bridge, wait) = ListenerBridge::new();
        let outcome = wait.wait(Deadline::after(Duration::from_millis(1600))).await;
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn test_callbacks_from_other_threads() {
        let (bridge, wait) = ListenerBridge::new();

        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let bridge = Arc::clone(&bridge);
                std::thread::spawn(move || bridge.on_capture_success(vec![i + 1; 8]))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let outcome = wait.wait(Deadline::after(Duration::from_millis(100))).await;
        assert!(matches!(outcome, Some(ListenerOutcome::Captured(_))));
        assert_eq!(bridge.ignored(), 3);
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_panic() {
        let (bridge, wait) = ListenerBridge::new();
        drop(wait);
        bridge.on_capture_success(vec![1]);
        assert!(bridge.is_resolved());
    }
}
