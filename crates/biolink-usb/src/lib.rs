//! libusb-backed host for the capture engine.
//!
//! [`RusbHost`] implements [`UsbHost`](biolink_hardware::UsbHost) on top of
//! `rusb`: enumeration reads device and interface descriptors, and
//! permission is whatever the OS grants when the device node is opened.
//! Desktop hosts have no interactive grant dialog, so a permission request
//! is answered at once with the result of that probe.
//!
//! [`DetachWatcher`] runs libusb hot-plug handling on its own thread and
//! forwards device departures as `(bus, address)` pairs, which the service
//! turns into a forced session close.

pub mod host;
pub mod hotplug;

pub use host::RusbHost;
pub use hotplug::DetachWatcher;
