//! Common types shared across hardware device implementations.
//!
//! This module defines the USB device descriptor produced by enumeration,
//! the permission event plumbing used by [`UsbHost`](crate::traits::UsbHost)
//! implementations, sensor settings applied after open, and the bitmap
//! payload some drivers hand back instead of raw bytes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Attached USB device as seen by a single enumeration.
///
/// Descriptors are ephemeral: produced fresh on every enumeration and never
/// cached beyond the operation that requested them, since attachment and
/// permission state change underneath us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDeviceDescriptor {
    /// OS device name (e.g. "/dev/bus/usb/001/004").
    pub name: String,

    /// USB vendor id.
    pub vendor_id: u16,

    /// USB product id.
    pub product_id: u16,

    /// Bus the device is attached to.
    pub bus_number: u8,

    /// Device address on the bus.
    pub address: u8,

    /// Optional manufacturer string descriptor.
    pub manufacturer: Option<String>,

    /// Optional product string descriptor.
    pub product: Option<String>,

    /// Interface class bytes of the active configuration.
    pub interface_classes: Vec<u8>,

    /// Whether the OS already granted access.
    pub permission_granted: bool,
}

impl UsbDeviceDescriptor {
    /// Create a descriptor with required fields.
    pub fn new(name: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            name: name.into(),
            vendor_id,
            product_id,
            bus_number: 0,
            address: 0,
            manufacturer: None,
            product: None,
            interface_classes: Vec::new(),
            permission_granted: false,
        }
    }

    /// Set the bus location.
    pub fn with_location(mut self, bus_number: u8, address: u8) -> Self {
        self.bus_number = bus_number;
        self.address = address;
        self
    }

    /// Set the manufacturer string.
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set the product string.
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    /// Set the interface class list.
    pub fn with_interface_classes(mut self, classes: Vec<u8>) -> Self {
        self.interface_classes = classes;
        self
    }

    /// Set the permission flag.
    pub fn with_permission(mut self, granted: bool) -> Self {
        self.permission_granted = granted;
        self
    }

    /// Bus location, used to match detach notifications.
    pub fn location(&self) -> (u8, u8) {
        (self.bus_number, self.address)
    }

    /// Whether the name, product or manufacturer contains any of `hints`,
    /// ignoring case.
    pub fn matches_any_name(&self, hints: &[String]) -> bool {
        let haystacks = [
            Some(self.name.to_lowercase()),
            self.product.as_ref().map(|p| p.to_lowercase()),
            self.manufacturer.as_ref().map(|m| m.to_lowercase()),
        ];
        hints.iter().any(|hint| {
            let hint = hint.to_lowercase();
            haystacks.iter().flatten().any(|h| h.contains(&hint))
        })
    }

    /// One-line summary used by diagnostics.
    pub fn summary(&self, permission: bool) -> String {
        format!(
            "• name={} id={}:{} VID=0x{:x} PID=0x{:x} perm={}",
            self.name, self.bus_number, self.address, self.vendor_id, self.product_id, permission
        )
    }
}

impl fmt::Display for UsbDeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:04x}:{:04x})",
            self.product.as_deref().unwrap_or(&self.name),
            self.vendor_id,
            self.product_id
        )
    }
}

/// Host-side handles a driver entry point may ask for.
///
/// Vendor SDKs commonly take the application context, the USB manager, or
/// the device itself as open/start parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostHandle {
    /// Application context.
    Context,

    /// USB manager / host service.
    Manager,

    /// The selected device.
    Device(UsbDeviceDescriptor),
}

/// Best-effort sensor setting applied after open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorSetting {
    /// Capture indicator / anti-spoof illumination.
    Led(bool),

    /// Sensor-side capture timeout in milliseconds.
    TimeoutMs(i64),

    /// Image resolution in dots per inch.
    Resolution(i64),
}

impl fmt::Display for SensorSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Led(on) => write!(f, "led={on}"),
            Self::TimeoutMs(ms) => write!(f, "timeout={ms}ms"),
            Self::Resolution(dpi) => write!(f, "resolution={dpi}dpi"),
        }
    }
}

/// Result of an OS permission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionEvent {
    /// Private event name the request was tied to.
    pub action: String,

    /// Whether the user/OS granted access.
    pub granted: bool,

    /// The device the grant applies to.
    pub device: Option<UsbDeviceDescriptor>,
}

/// Identifier of a registered permission subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// One-shot receiving end handed to a [`UsbHost`](crate::traits::UsbHost).
///
/// The host calls [`deliver`](Self::deliver) from whatever context the OS
/// event arrives on. Only the first delivery is kept.
#[derive(Debug, Clone)]
pub struct PermissionSink {
    tx: Arc<Mutex<Option<oneshot::Sender<PermissionEvent>>>>,
}

impl PermissionSink {
    /// Create a sink and the receiver the waiter suspends on.
    pub fn channel() -> (Self, oneshot::Receiver<PermissionEvent>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Deliver an event. Returns `false` if one was already delivered or
    /// the waiter is gone.
    pub fn deliver(&self, event: PermissionEvent) -> bool {
        let sender = match self.tx.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        sender.is_some_and(|tx| tx.send(event).is_ok())
    }
}

/// RGB bitmap returned by drivers that hand back images rather than bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbImage {
    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Row-major pixels packed as `0xAARRGGBB`.
    pub pixels: Vec<u32>,
}

impl RgbImage {
    /// Create a bitmap from packed pixels.
    pub fn new(width: u32, height: u32, pixels: Vec<u32>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Convert to one 8-bit luma byte per pixel (ITU-R BT.601 weights).
    ///
    /// # Examples
    ///
    /// ```
    /// use biolink_hardware::types::RgbImage;
    ///
    /// let image = RgbImage::new(2, 1, vec![0xFFFF_0000, 0xFF00_0000]);
    /// assert_eq!(image.to_grayscale(), vec![76, 0]);
    /// ```
    pub fn to_grayscale(&self) -> Vec<u8> {
        let expected = (self.width as usize) * (self.height as usize);
        self.pixels
            .iter()
            .take(expected)
            .map(|p| {
                let r = f64::from((p >> 16) & 0xff);
                let g = f64::from((p >> 8) & 0xff);
                let b = f64::from(p & 0xff);
                ((0.299 * r + 0.587 * g + 0.114 * b) as u32 & 0xff) as u8
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let device = UsbDeviceDescriptor::new("/dev/bus/usb/001/004", 0x1B55, 0x0120)
            .with_location(1, 4)
            .with_product("SLK20R")
            .with_interface_classes(vec![0xFF])
            .with_permission(true);

        assert_eq!(device.location(), (1, 4));
        assert_eq!(device.product.as_deref(), Some("SLK20R"));
        assert!(device.permission_granted);
        assert_eq!(device.to_string(), "SLK20R (1b55:0120)");
    }

    #[test]
    fn test_descriptor_name_matching_ignores_case() {
        let device = UsbDeviceDescriptor::new("usb-1", 0x1234, 0x0001).with_product("ZKTeco SLK20R");

        assert!(device.matches_any_name(&["zkteco".to_string()]));
        assert!(device.matches_any_name(&["SLK20".to_string()]));
        assert!(!device.matches_any_name(&["secugen".to_string()]));
    }

    #[test]
    fn test_descriptor_summary() {
        let device = UsbDeviceDescriptor::new("/dev/bus/usb/001/004", 0x1B55, 0x120).with_location(1, 4);
        assert_eq!(
            device.summary(false),
            "• name=/dev/bus/usb/001/004 id=1:4 VID=0x1b55 PID=0x120 perm=false"
        );
    }

    #[tokio::test]
    async fn test_permission_sink_delivers_once() {
        let (sink, rx) = PermissionSink::channel();
        let other = sink.clone();

        let event = PermissionEvent {
            action: "biolink.USB_PERMISSION".to_string(),
            granted: true,
            device: None,
        };

        assert!(sink.deliver(event.clone()));
        assert!(!other.deliver(PermissionEvent {
            granted: false,
            ..event.clone()
        }));

        assert_eq!(rx.await.unwrap(), event);
    }

    #[test]
    fn test_grayscale_weights() {
        let image = RgbImage::new(3, 1, vec![0xFFFF_0000, 0xFF00_FF00, 0xFF00_00FF]);
        assert_eq!(image.to_grayscale(), vec![76, 149, 29]);
    }

    #[test]
    fn test_setting_display() {
        assert_eq!(SensorSetting::Led(true).to_string(), "led=true");
        assert_eq!(SensorSetting::Resolution(500).to_string(), "resolution=500dpi");
    }
}
