//! Device locator: picks the capture peripheral out of the attached devices.
//!
//! Selection order, first match wins:
//!
//! 1. Vendor id on the allow-list
//! 2. Name, product or manufacturer containing a vendor hint
//! 3. Any interface with the vendor-specific class byte
//! 4. The first enumerated device
//!
//! Nothing is cached: every call enumerates again, since devices come and go
//! between operations.

use crate::config::LocatorSettings;
use biolink_hardware::{UsbDeviceDescriptor, UsbHost};
use std::sync::Arc;
use tracing::{debug, warn};

/// Which rule selected a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    VendorId,
    NameHint,
    InterfaceClass,
    Fallback,
}

impl MatchReason {
    fn matches(&self, device: &UsbDeviceDescriptor, settings: &LocatorSettings) -> bool {
        match self {
            Self::VendorId => settings.vendor_ids.contains(&device.vendor_id),
            Self::NameHint => device.matches_any_name(&settings.name_hints),
            Self::InterfaceClass => device.interface_classes.contains(&settings.interface_class),
            Self::Fallback => true,
        }
    }
}

/// Finds the capture peripheral on a [`UsbHost`].
///
/// # Examples
///
/// ```
/// use biolink_engine::locator::DeviceLocator;
/// use biolink_engine::config::LocatorSettings;
/// use biolink_hardware::mock::MockUsbHost;
/// use biolink_hardware::UsbDeviceDescriptor;
/// use std::sync::Arc;
///
/// let (host, handle) = MockUsbHost::new();
/// handle.attach(UsbDeviceDescriptor::new("/dev/bus/usb/001/002", 0x046D, 0xC077));
/// handle.attach(UsbDeviceDescriptor::new("/dev/bus/usb/001/004", 0x1B55, 0x0120));
///
/// let locator = DeviceLocator::new(Arc::new(host), LocatorSettings::default());
/// let device = locator.find_device().unwrap();
/// assert_eq!(device.vendor_id, 0x1B55);
/// ```
#[derive(Clone)]
pub struct DeviceLocator {
    host: Arc<dyn UsbHost>,
    settings: LocatorSettings,
}

impl DeviceLocator {
    pub fn new(host: Arc<dyn UsbHost>, settings: LocatorSettings) -> Self {
        Self { host, settings }
    }

    /// Every attached device. Enumeration failures are logged and yield an
    /// empty list.
    pub fn list_devices(&self) -> Vec<UsbDeviceDescriptor> {
        match self.host.devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("USB enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    /// The best candidate, or `None` if nothing is attached.
    pub fn find_device(&self) -> Option<UsbDeviceDescriptor> {
        self.locate().map(|(device, _)| device)
    }

    /// The best candidate together with the rule that selected it.
    pub fn locate(&self) -> Option<(UsbDeviceDescriptor, MatchReason)> {
        let found = select(self.list_devices(), &self.settings);
        if let Some((device, reason)) = &found {
            debug!("Selected {} by {:?}", device, reason);
        }
        found
    }
}

impl std::fmt::Debug for DeviceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLocator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Apply the selection order to an enumerated list.
pub fn select(
    devices: Vec<UsbDeviceDescriptor>,
    settings: &LocatorSettings,
) -> Option<(UsbDeviceDescriptor, MatchReason)> {
    let rules = [
        MatchReason::VendorId,
        MatchReason::NameHint,
        MatchReason::InterfaceClass,
    ];

    for reason in rules {
        if let Some(device) = devices.iter().find(|d| reason.matches(d, settings)) {
            return Some((device.clone(), reason));
        }
    }

    devices
        .into_iter()
        .next()
        .map(|device| (device, MatchReason::Fallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use biolink_hardware::mock::MockUsbHost;
    use rstest::rstest;

    fn mouse() -> UsbDeviceDescriptor {
        UsbDeviceDescriptor::new("/dev/bus/usb/001/002", 0x046D, 0xC077)
            .with_product("USB Optical Mouse")
            .with_interface_classes(vec![0x03])
    }

    fn zkteco() -> UsbDeviceDescriptor {
        UsbDeviceDescriptor::new("/dev/bus/usb/001/004", 0x1B55, 0x0120)
    }

    fn named() -> UsbDeviceDescriptor {
        UsbDeviceDescriptor::new("/dev/bus/usb/001/005", 0x2109, 0x7638)
            .with_product("USB Fingerprint Reader")
    }

    fn vendor_class() -> UsbDeviceDescriptor {
        UsbDeviceDescriptor::new("/dev/bus/usb/001/006", 0x2222, 0x0001)
            .with_interface_classes(vec![0x08, 0xFF])
    }

    #[rstest]
    #[case(vec![mouse(), named(), zkteco()], "/dev/bus/usb/001/004", MatchReason::VendorId)]
    #[case(vec![mouse(), vendor_class(), named()], "/dev/bus/usb/001/005", MatchReason::NameHint)]
    #[case(vec![mouse(), vendor_class()], "/dev/bus/usb/001/006", MatchReason::InterfaceClass)]
    #[case(vec![mouse()], "/dev/bus/usb/001/002", MatchReason::Fallback)]
    fn test_selection_order(
        #[case] devices: Vec<UsbDeviceDescriptor>,
        #[case] expected: &str,
        #[case] reason: MatchReason,
    ) {
        let (device, why) = select(devices, &LocatorSettings::default()).unwrap();
        assert_eq!(device.name, expected);
        assert_eq!(why, reason);
    }

    #[test]
    fn test_empty_list_yields_none() {
        assert!(select(Vec::new(), &LocatorSettings::default()).is_none());
    }

    #[test]
    fn test_custom_vendor_allow_list() {
        let settings = LocatorSettings {
            vendor_ids: vec![0x046D],
            ..LocatorSettings::default()
        };
        let (device, reason) = select(vec![zkteco(), mouse()], &settings).unwrap();
        assert_eq!(device.vendor_id, 0x046D);
        assert_eq!(reason, MatchReason::VendorId);
    }

    #[test]
    fn test_name_hints_match_manufacturer() {
        let device = UsbDeviceDescriptor::new("/dev/bus/usb/002/003", 0x3333, 0x0001)
            .with_manufacturer("ZKTECO CO., LTD.");
        let (found, reason) = select(vec![mouse(), device], &LocatorSettings::default()).unwrap();
        assert_eq!(found.vendor_id, 0x3333);
        assert_eq!(reason, MatchReason::NameHint);
    }

    #[test]
    fn test_enumeration_failure_is_empty() {
        let (host, handle) = MockUsbHost::new();
        handle.attach(zkteco());
        handle.set_enumeration_fails(true);

        let locator = DeviceLocator::new(Arc::new(host), LocatorSettings::default());
        assert!(locator.list_devices().is_empty());
        assert!(locator.find_device().is_none());
    }

    #[test]
    fn test_not_memoized() {
        let (host, handle) = MockUsbHost::new();
        let locator = DeviceLocator::new(Arc::new(host), LocatorSettings::default());
        assert!(locator.find_device().is_none());

        handle.attach(zkteco());
        assert!(locator.find_device().is_some());

        handle.detach("/dev/bus/usb/001/004");
        assert!(locator.find_device().is_none());
    }
}
