//! Mock USB host for testing device discovery and permission negotiation.
//!
//! The host keeps an in-memory device list and answers permission requests
//! according to a scripted [`PermissionBehavior`]. Delayed answers arrive
//! from a separate OS thread, the same way a real permission dialog reports
//! back from outside the runtime.

use crate::error::{HardwareError, Result};
use crate::traits::UsbHost;
use crate::types::{PermissionEvent, PermissionSink, SubscriptionId, UsbDeviceDescriptor};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How the mock host answers a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionBehavior {
    /// Grant immediately.
    Grant,

    /// Deny immediately.
    Deny,

    /// Never answer.
    Ignore,

    /// Grant after a delay, from another thread.
    GrantAfter(Duration),

    /// Deny after a delay, from another thread.
    DenyAfter(Duration),
}

#[derive(Debug)]
struct HostState {
    devices: Vec<UsbDeviceDescriptor>,
    granted: HashSet<String>,
    behavior: PermissionBehavior,
    transport_available: bool,
    enumeration_fails: bool,
    subscriptions: HashMap<u64, (String, PermissionSink)>,
    next_subscription: u64,
    subscribe_calls: usize,
    unsubscribe_calls: usize,
    permission_requests: usize,
}

type Shared = Arc<Mutex<HostState>>;

fn lock(state: &Shared) -> MutexGuard<'_, HostState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn answer(state: &Shared, device: &UsbDeviceDescriptor, action: &str, granted: bool) {
    let sinks: Vec<PermissionSink> = {
        let mut guard = lock(state);
        if granted {
            guard.granted.insert(device.name.clone());
        }
        guard
            .subscriptions
            .values()
            .filter(|(a, _)| a == action)
            .map(|(_, sink)| sink.clone())
            .collect()
    };

    let event = PermissionEvent {
        action: action.to_string(),
        granted,
        device: Some(device.clone().with_permission(granted)),
    };
    for sink in sinks {
        sink.deliver(event.clone());
    }
}

/// Mock implementation of [`UsbHost`].
///
/// # Examples
///
/// ```
/// use biolink_hardware::mock::MockUsbHost;
/// use biolink_hardware::traits::UsbHost;
/// use biolink_hardware::types::UsbDeviceDescriptor;
///
/// let (host, handle) = MockUsbHost::new();
/// handle.attach(UsbDeviceDescriptor::new("/dev/bus/usb/001/004", 0x1B55, 0x0120));
///
/// let devices = host.devices().unwrap();
/// assert_eq!(devices.len(), 1);
/// assert!(!host.has_permission(&devices[0]));
/// ```
#[derive(Debug, Clone)]
pub struct MockUsbHost {
    state: Shared,
}

impl MockUsbHost {
    /// Create an empty host that grants permission on request.
    ///
    /// Returns the host and a handle used to script it.
    pub fn new() -> (Self, MockUsbHostHandle) {
        let state = Arc::new(Mutex::new(HostState {
            devices: Vec::new(),
            granted: HashSet::new(),
            behavior: PermissionBehavior::Grant,
            transport_available: true,
            enumeration_fails: false,
            subscriptions: HashMap::new(),
            next_subscription: 1,
            subscribe_calls: 0,
            unsubscribe_calls: 0,
            permission_requests: 0,
        }));
        (
            Self {
                state: state.clone(),
            },
            MockUsbHostHandle { state },
        )
    }
}

impl Default for MockUsbHost {
    fn default() -> Self {
        Self::new().0
    }
}

impl UsbHost for MockUsbHost {
    fn devices(&self) -> Result<Vec<UsbDeviceDescriptor>> {
        let guard = lock(&self.state);
        if guard.enumeration_fails {
            return Err(HardwareError::usb("enumeration failed"));
        }
        Ok(guard
            .devices
            .iter()
            .map(|d| {
                let granted = guard.granted.contains(&d.name);
                d.clone().with_permission(granted)
            })
            .collect())
    }

    fn has_permission(&self, device: &UsbDeviceDescriptor) -> bool {
        lock(&self.state).granted.contains(&device.name)
    }

    fn subscribe_permission(&self, action: &str, sink: PermissionSink) -> Result<SubscriptionId> {
        let mut guard = lock(&self.state);
        let id = guard.next_subscription;
        guard.next_subscription += 1;
        guard.subscribe_calls += 1;
        guard.subscriptions.insert(id, (action.to_string(), sink));
        Ok(SubscriptionId(id))
    }

    fn unsubscribe_permission(&self, id: SubscriptionId) {
        let mut guard = lock(&self.state);
        if guard.subscriptions.remove(&id.0).is_some() {
            guard.unsubscribe_calls += 1;
        }
    }

    fn request_permission(&self, device: &UsbDeviceDescriptor, action: &str) -> Result<()> {
        let behavior = {
            let mut guard = lock(&self.state);
            guard.permission_requests += 1;
            guard.behavior
        };

        match behavior {
            PermissionBehavior::Grant => answer(&self.state, device, action, true),
            PermissionBehavior::Deny => answer(&self.state, device, action, false),
            PermissionBehavior::Ignore => {}
            PermissionBehavior::GrantAfter(delay) | PermissionBehavior::DenyAfter(delay) => {
                let granted = matches!(behavior, PermissionBehavior::GrantAfter(_));
                let state = self.state.clone();
                let device = device.clone();
                let action = action.to_string();
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    answer(&state, &device, &action, granted);
                });
            }
        }
        Ok(())
    }

    fn transport_available(&self) -> bool {
        lock(&self.state).transport_available
    }
}

/// Handle for scripting a [`MockUsbHost`].
#[derive(Debug, Clone)]
pub struct MockUsbHostHandle {
    state: Shared,
}

impl MockUsbHostHandle {
    /// Attach a device.
    pub fn attach(&self, device: UsbDeviceDescriptor) {
        lock(&self.state).devices.push(device);
    }

    /// Detach the device with the given OS name.
    pub fn detach(&self, name: &str) {
        lock(&self.state).devices.retain(|d| d.name != name);
    }

    /// Pre-grant access to the device with the given OS name.
    pub fn grant(&self, name: &str) {
        lock(&self.state).granted.insert(name.to_string());
    }

    /// Change how permission requests are answered.
    pub fn set_permission_behavior(&self, behavior: PermissionBehavior) {
        lock(&self.state).behavior = behavior;
    }

    /// Simulate a host without a removable-hardware transport.
    pub fn set_transport_available(&self, available: bool) {
        lock(&self.state).transport_available = available;
    }

    /// Make enumeration fail.
    pub fn set_enumeration_fails(&self, fails: bool) {
        lock(&self.state).enumeration_fails = fails;
    }

    /// Subscriptions still registered.
    pub fn active_subscriptions(&self) -> usize {
        lock(&self.state).subscriptions.len()
    }

    /// Total subscribe calls.
    pub fn subscribe_calls(&self) -> usize {
        lock(&self.state).subscribe_calls
    }

    /// Total effective unsubscribe calls.
    pub fn unsubscribe_calls(&self) -> usize {
        lock(&self.state).unsubscribe_calls
    }

    /// Total permission requests issued.
    pub fn permission_requests(&self) -> usize {
        lock(&self.state).permission_requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> UsbDeviceDescriptor {
        UsbDeviceDescriptor::new("/dev/bus/usb/001/004", 0x1B55, 0x0120)
    }

    #[tokio::test]
    async fn test_grant_delivers_to_matching_subscription() {
        let (host, handle) = MockUsbHost::new();
        handle.attach(device());

        let (sink, rx) = PermissionSink::channel();
        let (other, mut other_rx) = PermissionSink::channel();
        host.subscribe_permission("app.USB_PERMISSION.1", sink).unwrap();
        host.subscribe_permission("app.USB_PERMISSION.2", other).unwrap();

        host.request_permission(&device(), "app.USB_PERMISSION.1").unwrap();

        let event = rx.await.unwrap();
        assert!(event.granted);
        assert!(other_rx.try_recv().is_err());
        assert!(host.has_permission(&device()));
    }

    #[tokio::test]
    async fn test_delayed_deny_arrives_from_thread() {
        let (host, handle) = MockUsbHost::new();
        handle.set_permission_behavior(PermissionBehavior::DenyAfter(Duration::from_millis(20)));

        let (sink, rx) = PermissionSink::channel();
        host.subscribe_permission("deny", sink).unwrap();
        host.request_permission(&device(), "deny").unwrap();

        let event = rx.await.unwrap();
        assert!(!event.granted);
        assert!(!host.has_permission(&device()));
    }

    #[test]
    fn test_unsubscribe_counts_once() {
        let (host, handle) = MockUsbHost::new();
        let (sink, _rx) = PermissionSink::channel();
        let id = host.subscribe_permission("x", sink).unwrap();

        host.unsubscribe_permission(id);
        host.unsubscribe_permission(id);

        assert_eq!(handle.subscribe_calls(), 1);
        assert_eq!(handle.unsubscribe_calls(), 1);
        assert_eq!(handle.active_subscriptions(), 0);
    }

    #[test]
    fn test_enumeration_failure() {
        let (host, handle) = MockUsbHost::new();
        handle.set_enumeration_fails(true);
        assert!(host.devices().is_err());
    }
}
