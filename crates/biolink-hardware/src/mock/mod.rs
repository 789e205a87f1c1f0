//! Mock device implementations for testing and development.
//!
//! This module provides simulated implementations of the USB host surface,
//! a statically known sensor, and a scriptable probe object, all of which can
//! be controlled programmatically without requiring physical hardware.

pub mod probe;
pub mod sensor;
pub mod usb;

// Re-export commonly used types
pub use probe::{MockProbe, MockProbeBuilder};
pub use sensor::{ListenerEvent, MockDriverFactory, MockSensor, MockSensorHandle};
pub use usb::{MockUsbHost, MockUsbHostHandle, PermissionBehavior};
