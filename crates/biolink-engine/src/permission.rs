//! Permission broker: obtains OS access to a selected device.
//!
//! The OS answers permission requests asynchronously, from a context the
//! engine does not own. The broker ties each request to a private event
//! name (`<app-id>.USB_PERMISSION.<pid>.<seq>`), subscribes a one-shot sink
//! to it, and suspends until the answer arrives or the deadline passes.
//!
//! The subscription is held by a guard that unsubscribes on drop, so it is
//! removed exactly once whether the wait succeeds, is denied, times out, or
//! the awaiting future is dropped.

use crate::error::PermissionDenied;
use biolink_core::Deadline;
use biolink_core::constants::PERMISSION_ACTION;
use biolink_hardware::{PermissionSink, SubscriptionId, UsbDeviceDescriptor, UsbHost};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Requests and awaits USB access grants.
///
/// # Examples
///
/// ```
/// use biolink_core::Deadline;
/// use biolink_engine::permission::PermissionBroker;
/// use biolink_hardware::mock::MockUsbHost;
/// use biolink_hardware::UsbDeviceDescriptor;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let (host, handle) = MockUsbHost::new();
///     let device = UsbDeviceDescriptor::new("/dev/bus/usb/001/004", 0x1B55, 0x0120);
///     handle.attach(device.clone());
///
///     let broker = PermissionBroker::new(Arc::new(host), "biolink");
///     let granted = broker
///         .request_permission(&device, Deadline::after(Duration::from_secs(1)))
///         .await
///         .unwrap();
///
///     assert!(granted.permission_granted);
///     assert_eq!(handle.active_subscriptions(), 0);
/// }
/// ```
pub struct PermissionBroker {
    host: Arc<dyn UsbHost>,
    app_id: String,
    seq: AtomicU64,
}

impl PermissionBroker {
    pub fn new(host: Arc<dyn UsbHost>, app_id: impl Into<String>) -> Self {
        Self {
            host,
            app_id: app_id.into(),
            seq: AtomicU64::new(0),
        }
    }

    /// Build the private event name for the next request.
    pub fn next_action(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
        format!(
            "{}.{}.{}.{}",
            self.app_id,
            PERMISSION_ACTION,
            std::process::id(),
            seq
        )
    }

    /// Ensure access to `device`, asking the OS if needed.
    ///
    /// Returns the device as reported by the grant event (or unchanged if
    /// access was already recorded).
    ///
    /// # Errors
    ///
    /// Returns [`PermissionDenied`] if the OS refuses, the request cannot be
    /// issued, or no answer arrives before `deadline`.
    pub async fn request_permission(
        &self,
        device: &UsbDeviceDescriptor,
        deadline: Deadline,
    ) -> Result<UsbDeviceDescriptor, PermissionDenied> {
        if self.host.has_permission(device) {
            debug!("Permission already granted for {}", device);
            return Ok(device.clone().with_permission(true));
        }

        let action = self.next_action();
        let (sink, rx) = PermissionSink::channel();
        let id = self
            .host
            .subscribe_permission(&action, sink)
            .map_err(|e| PermissionDenied::refused(format!("cannot subscribe: {e}")))?;
        let _subscription = Subscription {
            host: self.host.clone(),
            id,
        };

        info!("Requesting USB permission for {} ({})", device, action);
        self.host
            .request_permission(device, &action)
            .map_err(|e| PermissionDenied::refused(format!("request failed: {e}")))?;

        let started = tokio::time::Instant::now();
        let event = match tokio::time::timeout_at(deadline.instant(), rx).await {
            Ok(Ok(event)) => event,
            Ok(Err(_)) => return Err(PermissionDenied::refused("permission event source closed")),
            Err(_) => {
                let waited = started.elapsed().as_millis();
                warn!("No USB permission answer for {} after {}ms", device, waited);
                return Err(PermissionDenied::timed_out(waited));
            }
        };

        info!("USB permission result: granted={}", event.granted);
        match (event.granted, event.device) {
            (true, Some(granted)) => Ok(granted.with_permission(true)),
            (true, None) => Err(PermissionDenied::refused("grant carried no device")),
            (false, _) => Err(PermissionDenied::refused("user or OS refused access")),
        }
    }
}

impl std::fmt::Debug for PermissionBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionBroker")
            .field("app_id", &self.app_id)
            .field("seq", &self.seq.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// Unsubscribes when dropped.
struct Subscription {
    host: Arc<dyn UsbHost>,
    id: SubscriptionId,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.host.unsubscribe_permission(self.id);
        debug!("Permission subscription {} removed", self.id.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biolink_hardware::mock::{MockUsbHost, MockUsbHostHandle, PermissionBehavior};
    use std::time::Duration;

    fn device() -> UsbDeviceDescriptor {
        UsbDeviceDescriptor::new("/dev/bus/usb/001/004", 0x1B55, 0x0120).with_location(1, 4)
    }

    fn broker() -> (PermissionBroker, MockUsbHostHandle) {
        let (host, handle) = MockUsbHost::new();
        handle.attach(device());
        (PermissionBroker::new(Arc::new(host), "biolink"), handle)
    }

    #[test]
    fn test_action_names_are_private_and_unique() {
        let (broker, _handle) = broker();
        let first = broker.next_action();
        let second = broker.next_action();

        let prefix = format!("biolink.USB_PERMISSION.{}.", std::process::id());
        assert_eq!(first, format!("{prefix}1"));
        assert_eq!(second, format!("{prefix}2"));
    }

    #[tokio::test]
    async fn test_existing_permission_skips_request() {
        let (broker, handle) = broker();
        handle.grant("/dev/bus/usb/001/004");

        let result = broker
            .request_permission(&device(), Deadline::after(Duration::from_millis(100)))
            .await;

        assert!(result.is_ok());
        assert_eq!(handle.permission_requests(), 0);
        assert_eq!(handle.subscribe_calls(), 0);
    }

    #[tokio::test]
    async fn test_grant_after_delay() {
        let (broker, handle) = broker();
        handle.set_permission_behavior(PermissionBehavior::GrantAfter(Duration::from_millis(20)));

        let granted = broker
            .request_permission(&device(), Deadline::after(Duration::from_secs(2)))
            .await
            .unwrap();

        assert!(granted.permission_granted);
        assert_eq!(granted.location(), (1, 4));
        assert_eq!(handle.unsubscribe_calls(), 1);
    }

    #[tokio::test]
    async fn test_denied() {
        let (broker, handle) = broker();
        handle.set_permission_behavior(PermissionBehavior::Deny);

        let err = broker
            .request_permission(&device(), Deadline::after(Duration::from_secs(1)))
            .await
            .unwrap_err();

        assert!(!err.timed_out);
        assert_eq!(handle.active_subscriptions(), 0);
        assert_eq!(handle.unsubscribe_calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_unsubscribes() {
        let (broker, handle) = broker();
        handle.set_permission_behavior(PermissionBehavior::Ignore);

        let started = tokio::time::Instant::now();
        let err = broker
            .request_permission(&device(), Deadline::after(Duration::from_millis(50)))
            .await
            .unwrap_err();

        assert!(err.timed_out);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(handle.subscribe_calls(), 1);
        assert_eq!(handle.unsubscribe_calls(), 1);
    }

    #[tokio::test]
    async fn test_dropped_future_unsubscribes() {
        let (broker, handle) = broker();
        handle.set_permission_behavior(PermissionBehavior::Ignore);

        let dev = device();
        let pending = broker.request_permission(&dev, Deadline::after(Duration::from_secs(30)));
        let raced = tokio::time::timeout(Duration::from_millis(20), pending).await;

        assert!(raced.is_err());
        assert_eq!(handle.active_subscriptions(), 0);
        assert_eq!(handle.unsubscribe_calls(), 1);
    }
}
