//! Common test utilities for engine integration tests.
//!
//! Every test drives a real [`BiometricService`] over a scripted
//! [`MockUsbHost`] and [`MockSensor`]. Timings are shrunk so the retry loop
//! runs its full course in a few hundred milliseconds.

#![allow(dead_code)]

use biolink_engine::{BiometricService, ServiceConfig, TemplateMatcher};
use biolink_hardware::UsbDeviceDescriptor;
use biolink_hardware::mock::{MockSensor, MockSensorHandle, MockUsbHost, MockUsbHostHandle};
use std::sync::Arc;

/// Device node of the scripted sensor.
pub const SENSOR_PATH: &str = "/dev/bus/usb/001/004";

/// Bus location of the scripted sensor.
pub const SENSOR_LOCATION: (u8, u8) = (1, 4);

/// A service plus the handles that script it.
pub struct Rig {
    pub service: BiometricService,
    pub usb: MockUsbHostHandle,
    pub sensor: MockSensorHandle,
}

/// Short timings: 300ms total, 100ms per attempt, 20ms backoff.
pub fn fast_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.capture.total_ms = 300;
    config.capture.per_attempt_ms = 100;
    config.capture.backoff_ms = 20;
    config.capture.direct_template_ms = 200;
    config.permission.timeout_ms = 300;
    config.session.open_timeout_ms = 1_000;
    config
}

pub fn sensor_device() -> UsbDeviceDescriptor {
    UsbDeviceDescriptor::new(SENSOR_PATH, 0x1B55, 0x0120)
        .with_location(SENSOR_LOCATION.0, SENSOR_LOCATION.1)
        .with_manufacturer("ZKTeco Inc.")
        .with_product("SLK20R")
        .with_interface_classes(vec![0xFF])
}

/// Service with the sensor attached and [`fast_config`].
pub fn rig() -> Rig {
    rig_with(fast_config(), None)
}

pub fn rig_with(config: ServiceConfig, matcher: Option<Arc<dyn TemplateMatcher>>) -> Rig {
    let (host, usb) = MockUsbHost::new();
    usb.attach(sensor_device());

    let (sensor, handle) = MockSensor::new();
    let mut builder = BiometricService::builder(Arc::new(host), Arc::new(sensor.factory()))
        .with_config(config);
    if let Some(matcher) = matcher {
        builder = builder.with_matcher(matcher);
    }

    Rig {
        service: builder.build().unwrap(),
        usb,
        sensor: handle,
    }
}

/// Poll until the session is open or `attempts` polls of 10ms pass.
pub async fn wait_until_open(service: &BiometricService, attempts: usize) -> bool {
    for _ in 0..attempts {
        if service.sessions().is_open().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}
