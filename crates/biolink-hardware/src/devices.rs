//! Enum wrapper for sensor driver dispatch.
//!
//! A session owns exactly one driver, but which one is decided at runtime:
//! the adaptive adapter probing an unknown SDK, an adapter for a statically
//! known SDK revision, or the mock sensor. [`AnyDriver`] gives the engine a
//! single concrete type to hold behind an `Arc` and dispatches every
//! capability call to the active variant.
//!
//! # Examples
//!
//! ```
//! use biolink_hardware::devices::AnyDriver;
//! use biolink_hardware::mock::MockSensor;
//! use biolink_hardware::traits::SensorDriver;
//!
//! let (sensor, _handle) = MockSensor::new();
//! let driver = AnyDriver::Mock(sensor);
//!
//! assert_eq!(driver.name(), "Mock Fingerprint Sensor");
//! ```

use crate::adaptive::AdaptiveDriver;
use crate::mock::MockSensor;
use crate::traits::{
    CaptureListener, Capturable, DriverFactory, Extractable, Openable, SensorDriver,
};
use crate::{Result, SensorSetting, UsbDeviceDescriptor};
use biolink_core::DebugTrace;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Enum wrapper for sensor driver dispatch.
#[non_exhaustive]
pub enum AnyDriver {
    /// Capability-probing adapter over an SDK of unknown shape.
    Adaptive(AdaptiveDriver),

    /// Mock sensor for development and testing.
    Mock(MockSensor),

    /// Adapter for a statically known SDK revision.
    Fixed(Box<dyn SensorDriver>),
}

impl AnyDriver {
    /// Short label of the active variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Adaptive(_) => "adaptive",
            Self::Mock(_) => "mock",
            Self::Fixed(_) => "fixed",
        }
    }
}

impl fmt::Debug for AnyDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adaptive(driver) => f.debug_tuple("Adaptive").field(driver).finish(),
            Self::Mock(driver) => f.debug_tuple("Mock").field(driver).finish(),
            Self::Fixed(driver) => f.debug_tuple("Fixed").field(&driver.name()).finish(),
        }
    }
}

impl Openable for AnyDriver {
    fn open(&self, device: &UsbDeviceDescriptor) -> Result<()> {
        match self {
            Self::Adaptive(driver) => driver.open(device),
            Self::Mock(driver) => driver.open(device),
            Self::Fixed(driver) => driver.open(device),
        }
    }

    fn configure(&self, setting: SensorSetting) -> Result<()> {
        match self {
            Self::Adaptive(driver) => driver.configure(setting),
            Self::Mock(driver) => driver.configure(setting),
            Self::Fixed(driver) => driver.configure(setting),
        }
    }

    fn close(&self) -> Result<()> {
        match self {
            Self::Adaptive(driver) => driver.close(),
            Self::Mock(driver) => driver.close(),
            Self::Fixed(driver) => driver.close(),
        }
    }
}

impl Capturable for AnyDriver {
    fn capture_sync(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Adaptive(driver) => driver.capture_sync(timeout),
            Self::Mock(driver) => driver.capture_sync(timeout),
            Self::Fixed(driver) => driver.capture_sync(timeout),
        }
    }

    fn register_listener(&self, slot: u8, listener: Arc<dyn CaptureListener>) -> Result<()> {
        match self {
            Self::Adaptive(driver) => driver.register_listener(slot, listener),
            Self::Mock(driver) => driver.register_listener(slot, listener),
            Self::Fixed(driver) => driver.register_listener(slot, listener),
        }
    }

    fn clear_listener(&self, slot: u8) -> Result<()> {
        match self {
            Self::Adaptive(driver) => driver.clear_listener(slot),
            Self::Mock(driver) => driver.clear_listener(slot),
            Self::Fixed(driver) => driver.clear_listener(slot),
        }
    }

    fn start_capture(&self, slot: u8, timeout: Duration) -> Result<()> {
        match self {
            Self::Adaptive(driver) => driver.start_capture(slot, timeout),
            Self::Mock(driver) => driver.start_capture(slot, timeout),
            Self::Fixed(driver) => driver.start_capture(slot, timeout),
        }
    }

    fn stop_capture(&self, slot: u8) -> Result<()> {
        match self {
            Self::Adaptive(driver) => driver.stop_capture(slot),
            Self::Mock(driver) => driver.stop_capture(slot),
            Self::Fixed(driver) => driver.stop_capture(slot),
        }
    }

    fn capture_template(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Adaptive(driver) => driver.capture_template(timeout),
            Self::Mock(driver) => driver.capture_template(timeout),
            Self::Fixed(driver) => driver.capture_template(timeout),
        }
    }
}

impl Extractable for AnyDriver {
    fn extract(&self, image: &[u8], format: Option<i64>) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Adaptive(driver) => driver.extract(image, format),
            Self::Mock(driver) => driver.extract(image, format),
            Self::Fixed(driver) => driver.extract(image, format),
        }
    }

    fn nested_extractor(&self) -> Option<Arc<dyn Extractable>> {
        match self {
            Self::Adaptive(driver) => driver.nested_extractor(),
            Self::Mock(driver) => driver.nested_extractor(),
            Self::Fixed(driver) => driver.nested_extractor(),
        }
    }
}

impl SensorDriver for AnyDriver {
    fn name(&self) -> String {
        match self {
            Self::Adaptive(driver) => driver.name(),
            Self::Mock(driver) => driver.name(),
            Self::Fixed(driver) => driver.name(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Adaptive(driver) => driver.describe(),
            Self::Mock(driver) => driver.describe(),
            Self::Fixed(driver) => driver.describe(),
        }
    }

    fn drain_journal(&self) -> DebugTrace {
        match self {
            Self::Adaptive(driver) => driver.drain_journal(),
            Self::Mock(driver) => driver.drain_journal(),
            Self::Fixed(driver) => driver.drain_journal(),
        }
    }
}

type Constructor =
    dyn Fn(&UsbDeviceDescriptor) -> Result<Box<dyn SensorDriver>> + Send + Sync + 'static;

/// [`DriverFactory`] for a statically linked adapter.
///
/// No probing happens: the constructor builds the adapter directly.
///
/// # Examples
///
/// ```
/// use biolink_hardware::devices::FixedFactory;
/// use biolink_hardware::mock::MockSensor;
/// use biolink_hardware::traits::{DriverFactory, SensorDriver};
/// use biolink_hardware::types::UsbDeviceDescriptor;
/// use biolink_core::DebugTrace;
///
/// let factory = FixedFactory::new("slk20r", |_device| {
///     let (sensor, _handle) = MockSensor::with_name("SLK20R");
///     Ok(Box::new(sensor) as Box<dyn SensorDriver>)
/// });
///
/// let mut trace = DebugTrace::new();
/// let device = UsbDeviceDescriptor::new("usb-1", 0x1B55, 0x0120);
/// let driver = factory.create(&device, &mut trace).unwrap();
/// assert_eq!(driver.name(), "SLK20R");
/// ```
pub struct FixedFactory {
    name: String,
    constructor: Box<Constructor>,
}

impl FixedFactory {
    /// Create a factory from an adapter constructor.
    pub fn new<F>(name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&UsbDeviceDescriptor) -> Result<Box<dyn SensorDriver>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            constructor: Box::new(constructor),
        }
    }

    /// Adapter name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for FixedFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedFactory")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl DriverFactory for FixedFactory {
    fn sdk_available(&self) -> bool {
        true
    }

    fn create(&self, device: &UsbDeviceDescriptor, trace: &mut DebugTrace) -> Result<AnyDriver> {
        let driver = (self.constructor)(device)?;
        trace.push(format!("Fixed adapter {} created: {}", self.name, driver.name()));
        Ok(AnyDriver::Fixed(driver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HardwareError;

    fn device() -> UsbDeviceDescriptor {
        UsbDeviceDescriptor::new("usb-1", 0x1B55, 0x0120)
    }

    #[test]
    fn test_any_driver_mock_dispatch() {
        let (sensor, handle) = MockSensor::new();
        let driver = AnyDriver::Mock(sensor);

        driver.open(&device()).unwrap();
        driver.configure(SensorSetting::Led(true)).unwrap();
        driver.close().unwrap();

        assert_eq!(driver.kind(), "mock");
        assert_eq!(handle.opens(), 1);
        assert_eq!(handle.closes(), 1);
        assert_eq!(handle.led(), Some(true));
    }

    #[test]
    fn test_fixed_factory_wraps_adapter() {
        let (sensor, handle) = MockSensor::with_name("SLK20R");
        let factory = FixedFactory::new("slk20r", move |_| {
            Ok(Box::new(sensor.clone()) as Box<dyn SensorDriver>)
        });

        let mut trace = DebugTrace::new();
        let driver = factory.create(&device(), &mut trace).unwrap();
        driver.open(&device()).unwrap();

        assert_eq!(driver.kind(), "fixed");
        assert!(trace.contains("Fixed adapter slk20r created: SLK20R"));
        assert!(handle.is_open());
    }

    #[test]
    fn test_fixed_factory_propagates_errors() {
        let factory = FixedFactory::new("broken", |_| {
            Err(HardwareError::initialization_failed("library not linked"))
        });

        let mut trace = DebugTrace::new();
        assert!(factory.create(&device(), &mut trace).is_err());
        assert!(trace.is_empty());
    }
}
