//! Simulated hardware for `--simulate`.
//!
//! A scripted sensor on a scripted bus, so every command can be exercised
//! without a device attached. The sensor answers through the listener path
//! with a full image, which then goes through extraction.

use biolink_hardware::UsbDeviceDescriptor;
use biolink_hardware::mock::{MockDriverFactory, MockSensor, MockUsbHost, PermissionBehavior};
use std::time::Duration;

/// Simulated sensor image size; above the template threshold.
const IMAGE_BYTES: usize = 4096;

/// Template the simulated extractor hands back.
pub fn simulated_template() -> Vec<u8> {
    (0..480u32).map(|i| (i * 7 % 251) as u8).collect()
}

/// A host with one sensor attached and a factory for that sensor.
pub fn simulated_hardware() -> (MockUsbHost, MockDriverFactory) {
    let (host, usb) = MockUsbHost::new();
    usb.attach(
        UsbDeviceDescriptor::new("/dev/bus/usb/001/004", 0x1B55, 0x0120)
            .with_location(1, 4)
            .with_manufacturer("ZKTeco Inc.")
            .with_product("SLK20R")
            .with_interface_classes(vec![0xFF]),
    );
    usb.set_permission_behavior(PermissionBehavior::GrantAfter(Duration::from_millis(150)));

    let (sensor, handle) = MockSensor::with_name("SLK20R (simulated)");
    handle.queue_listener_image(Duration::from_millis(400), vec![0x80; IMAGE_BYTES]);
    handle.set_extract_result(Some(0), simulated_template());

    (host, sensor.factory())
}

#[cfg(test)]
mod tests {
    use super::*;
    use biolink_hardware::UsbHost;

    #[test]
    fn test_simulated_bus_has_sensor() {
        let (host, _factory) = simulated_hardware();
        let devices = host.devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].location(), (1, 4));
    }

    #[test]
    fn test_template_is_below_image_size() {
        assert!(simulated_template().len() < IMAGE_BYTES);
    }
}
