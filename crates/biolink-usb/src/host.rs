//! [`UsbHost`] over libusb.

use biolink_hardware::{
    HardwareError, PermissionEvent, PermissionSink, Result, SubscriptionId, UsbDeviceDescriptor,
    UsbHost,
};
use rusb::{Context, Device, UsbContext};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where usbfs exposes device nodes.
pub const USB_DEVFS: &str = "/dev/bus/usb";

const LINUX_FOUNDATION_VID: u16 = 0x1d6b;
const HUB_CLASS: u8 = 0x09;
const STRING_TIMEOUT: Duration = Duration::from_millis(200);

/// Device node path for a bus location, e.g. `/dev/bus/usb/001/004`.
pub fn device_node(bus: u8, address: u8) -> String {
    format!("{USB_DEVFS}/{bus:03}/{address:03}")
}

/// Root hubs never carry a sensor.
pub fn is_root_hub(vendor_id: u16, class_code: u8) -> bool {
    vendor_id == LINUX_FOUNDATION_VID && class_code == HUB_CLASS
}

fn usb_error(err: rusb::Error) -> HardwareError {
    match err {
        rusb::Error::Access => HardwareError::permission_denied("usb device"),
        rusb::Error::NoDevice => HardwareError::disconnected("usb device"),
        other => HardwareError::usb(other.to_string()),
    }
}

/// libusb implementation of [`UsbHost`].
///
/// Subscriptions are kept so a request can be answered through the same
/// event path an interactive host would use.
pub struct RusbHost {
    context: Context,
    subscriptions: Mutex<HashMap<u64, (String, PermissionSink)>>,
    next_subscription: AtomicU64,
}

impl RusbHost {
    /// Create a host with a fresh libusb context.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError::Usb` if libusb cannot be initialised.
    pub fn new() -> Result<Self> {
        let context = Context::new().map_err(usb_error)?;
        Ok(Self::with_context(context))
    }

    pub fn with_context(context: Context) -> Self {
        Self {
            context,
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// The libusb context, shared with the detach watcher.
    pub fn context(&self) -> &Context {
        &self.context
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<u64, (String, PermissionSink)>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn find(&self, descriptor: &UsbDeviceDescriptor) -> Option<Device<Context>> {
        let devices = self.context.devices().ok()?;
        devices
            .iter()
            .find(|d| (d.bus_number(), d.address()) == descriptor.location())
    }

    fn describe(&self, device: &Device<Context>) -> Option<UsbDeviceDescriptor> {
        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(e) => {
                debug!(
                    "Skipping {}:{}: no device descriptor ({})",
                    device.bus_number(),
                    device.address(),
                    e
                );
                return None;
            }
        };
        if is_root_hub(desc.vendor_id(), desc.class_code()) {
            return None;
        }

        let classes = device
            .active_config_descriptor()
            .map(|config| {
                config
                    .interfaces()
                    .flat_map(|interface| {
                        interface
                            .descriptors()
                            .map(|d| d.class_code())
                            .collect::<Vec<_>>()
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut descriptor = UsbDeviceDescriptor::new(
            device_node(device.bus_number(), device.address()),
            desc.vendor_id(),
            desc.product_id(),
        )
        .with_location(device.bus_number(), device.address())
        .with_interface_classes(classes);

        // String descriptors need an open handle, which doubles as the
        // permission probe.
        match device.open() {
            Ok(handle) => {
                let language = handle
                    .read_languages(STRING_TIMEOUT)
                    .ok()
                    .and_then(|langs| langs.first().copied());
                if let Some(language) = language {
                    if let Ok(manufacturer) =
                        handle.read_manufacturer_string(language, &desc, STRING_TIMEOUT)
                    {
                        descriptor = descriptor.with_manufacturer(manufacturer);
                    }
                    if let Ok(product) = handle.read_product_string(language, &desc, STRING_TIMEOUT)
                    {
                        descriptor = descriptor.with_product(product);
                    }
                }
                descriptor = descriptor.with_permission(true);
            }
            Err(e) => debug!("Cannot open {}: {}", descriptor.name, e),
        }

        Some(descriptor)
    }
}

impl std::fmt::Debug for RusbHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusbHost")
            .field("subscriptions", &self.subscriptions().len())
            .finish_non_exhaustive()
    }
}

impl UsbHost for RusbHost {
    fn devices(&self) -> Result<Vec<UsbDeviceDescriptor>> {
        let devices = self.context.devices().map_err(usb_error)?;
        let found: Vec<_> = devices.iter().filter_map(|d| self.describe(&d)).collect();
        debug!("Enumerated {} USB devices", found.len());
        Ok(found)
    }

    fn has_permission(&self, device: &UsbDeviceDescriptor) -> bool {
        self.find(device).is_some_and(|d| d.open().is_ok())
    }

    fn subscribe_permission(&self, action: &str, sink: PermissionSink) -> Result<SubscriptionId> {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscriptions()
            .insert(id, (action.to_string(), sink));
        Ok(SubscriptionId(id))
    }

    fn unsubscribe_permission(&self, id: SubscriptionId) {
        self.subscriptions().remove(&id.0);
    }

    fn request_permission(&self, device: &UsbDeviceDescriptor, action: &str) -> Result<()> {
        let Some(found) = self.find(device) else {
            return Err(HardwareError::disconnected(&device.name));
        };

        let granted = match found.open() {
            Ok(_) => true,
            Err(e) => {
                warn!("Access to {} refused: {}", device.name, e);
                false
            }
        };
        info!("USB permission for {}: granted={}", device.name, granted);

        let sinks: Vec<PermissionSink> = self
            .subscriptions()
            .values()
            .filter(|(a, _)| a == action)
            .map(|(_, sink)| sink.clone())
            .collect();

        let event = PermissionEvent {
            action: action.to_string(),
            granted,
            device: Some(device.clone().with_permission(granted)),
        };
        for sink in sinks {
            sink.deliver(event.clone());
        }
        Ok(())
    }

    fn transport_available(&self) -> bool {
        Path::new(USB_DEVFS).is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 4, "/dev/bus/usb/001/004")]
    #[case(3, 127, "/dev/bus/usb/003/127")]
    fn test_device_node(#[case] bus: u8, #[case] address: u8, #[case] expected: &str) {
        assert_eq!(device_node(bus, address), expected);
    }

    #[rstest]
    #[case(0x1d6b, 0x09, true)]
    #[case(0x1d6b, 0x00, false)]
    #[case(0x1B55, 0x09, false)]
    fn test_root_hub_detection(#[case] vid: u16, #[case] class: u8, #[case] hub: bool) {
        assert_eq!(is_root_hub(vid, class), hub);
    }

    #[test]
    fn test_access_error_maps_to_permission() {
        assert!(matches!(
            usb_error(rusb::Error::Access),
            HardwareError::PermissionDenied { .. }
        ));
        assert!(matches!(
            usb_error(rusb::Error::NoDevice),
            HardwareError::Disconnected { .. }
        ));
    }
}
