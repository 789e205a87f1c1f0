//! Mock fingerprint sensor implementation for testing and development.
//!
//! This module provides a simulated sensor with a statically known surface
//! that can be scripted programmatically: queued synchronous captures,
//! listener deliveries that arrive from another thread after a delay,
//! direct templates, and per-format extraction results. Every call is
//! counted so tests can assert on the exact sequence the engine drove.

use crate::devices::AnyDriver;
use crate::error::{HardwareError, Result};
use crate::traits::{
    CaptureListener, Capturable, DriverFactory, Extractable, Openable, SensorDriver,
};
use crate::types::{SensorSetting, UsbDeviceDescriptor};
use biolink_core::DebugTrace;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One callback a scripted capture delivers to the registered listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    CaptureSuccess(Vec<u8>),
    CaptureError(i32),
    ExtractSuccess(Vec<u8>),
    ExtractError(i32),
}

impl ListenerEvent {
    fn dispatch(self, listener: &dyn CaptureListener) {
        match self {
            Self::CaptureSuccess(bytes) => listener.on_capture_success(bytes),
            Self::CaptureError(code) => listener.on_capture_error(code),
            Self::ExtractSuccess(bytes) => listener.on_extract_success(bytes),
            Self::ExtractError(code) => listener.on_extract_error(code),
        }
    }
}

#[derive(Default)]
struct SensorState {
    open: bool,
    open_error: Option<String>,
    open_delay: Duration,
    configure_fails: bool,
    sync_queue: VecDeque<Vec<u8>>,
    sync_delay: Duration,
    async_queue: VecDeque<(Duration, Vec<ListenerEvent>)>,
    listener_unsupported: bool,
    start_fails: bool,
    template_queue: VecDeque<Vec<u8>>,
    extract_unsupported: bool,
    extract_results: HashMap<Option<i64>, Vec<u8>>,
    nested: Option<Arc<dyn Extractable>>,
    listeners: HashMap<u8, Arc<dyn CaptureListener>>,
    opens: usize,
    closes: usize,
    sync_calls: usize,
    starts: usize,
    stops: usize,
    registrations: usize,
    clears: usize,
    template_calls: usize,
    extract_calls: usize,
    settings: Vec<SensorSetting>,
    led: Option<bool>,
}

struct Inner {
    name: String,
    state: Mutex<SensorState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SensorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mock sensor for testing and development.
///
/// Clones share state, so the same sensor can be handed out by a
/// [`MockDriverFactory`] on every open while a test keeps a
/// [`MockSensorHandle`] to script and inspect it.
///
/// # Examples
///
/// ```
/// use biolink_hardware::mock::MockSensor;
/// use biolink_hardware::traits::{Capturable, Openable};
/// use biolink_hardware::types::UsbDeviceDescriptor;
/// use std::time::Duration;
///
/// let (sensor, handle) = MockSensor::new();
/// handle.queue_capture(vec![7; 512]);
///
/// sensor.open(&UsbDeviceDescriptor::new("usb-1", 0x1B55, 0x0120)).unwrap();
/// let bytes = sensor.capture_sync(Duration::from_millis(100)).unwrap();
/// assert_eq!(bytes.map(|b| b.len()), Some(512));
/// assert_eq!(handle.sync_calls(), 1);
/// ```
#[derive(Clone)]
pub struct MockSensor {
    inner: Arc<Inner>,
}

impl MockSensor {
    /// Create a new mock sensor with the default name.
    pub fn new() -> (Self, MockSensorHandle) {
        Self::with_name("Mock Fingerprint Sensor")
    }

    /// Create a new mock sensor with a custom name.
    pub fn with_name(name: impl Into<String>) -> (Self, MockSensorHandle) {
        let inner = Arc::new(Inner {
            name: name.into(),
            state: Mutex::new(SensorState::default()),
        });
        (
            Self {
                inner: inner.clone(),
            },
            MockSensorHandle { inner },
        )
    }

    /// A factory that hands out this sensor.
    pub fn factory(&self) -> MockDriverFactory {
        MockDriverFactory {
            sensor: self.clone(),
            sdk_available: true,
            create_error: None,
        }
    }

    fn ensure_open(&self, state: &SensorState) -> Result<()> {
        if state.open {
            Ok(())
        } else {
            Err(HardwareError::disconnected(&self.inner.name))
        }
    }
}

impl fmt::Debug for MockSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("MockSensor")
            .field("name", &self.inner.name)
            .field("open", &state.open)
            .field("listeners", &state.listeners.len())
            .finish_non_exhaustive()
    }
}

impl Openable for MockSensor {
    fn open(&self, _device: &UsbDeviceDescriptor) -> Result<()> {
        let delay = {
            let mut state = self.inner.lock();
            state.opens += 1;
            state.open_delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.inner.lock();
        if let Some(message) = state.open_error.clone() {
            return Err(HardwareError::initialization_failed(message));
        }
        state.open = true;
        Ok(())
    }

    fn configure(&self, setting: SensorSetting) -> Result<()> {
        let mut state = self.inner.lock();
        state.settings.push(setting);
        if state.configure_fails {
            return Err(HardwareError::unsupported(format!("configure {setting}")));
        }
        if let SensorSetting::Led(on) = setting {
            state.led = Some(on);
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.inner.lock();
        state.closes += 1;
        state.open = false;
        state.listeners.clear();
        Ok(())
    }
}

impl Capturable for MockSensor {
    fn capture_sync(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let delay = {
            let mut state = self.inner.lock();
            self.ensure_open(&state)?;
            state.sync_calls += 1;
            state.sync_delay.min(timeout)
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(self.inner.lock().sync_queue.pop_front())
    }

    fn register_listener(&self, slot: u8, listener: Arc<dyn CaptureListener>) -> Result<()> {
        let mut state = self.inner.lock();
        if state.listener_unsupported {
            return Err(HardwareError::unsupported("register listener"));
        }
        state.registrations += 1;
        state.listeners.insert(slot, listener);
        Ok(())
    }

    fn clear_listener(&self, slot: u8) -> Result<()> {
        let mut state = self.inner.lock();
        state.clears += 1;
        state.listeners.remove(&slot);
        Ok(())
    }

    fn start_capture(&self, slot: u8, _timeout: Duration) -> Result<()> {
        let mut state = self.inner.lock();
        self.ensure_open(&state)?;
        state.starts += 1;
        if state.start_fails {
            return Err(HardwareError::binding_failed("start capture", Vec::new()));
        }

        if let Some(listener) = state.listeners.get(&slot).cloned()
            && let Some((delay, events)) = state.async_queue.pop_front()
        {
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                for event in events {
                    event.dispatch(listener.as_ref());
                }
            });
        }
        Ok(())
    }

    fn stop_capture(&self, _slot: u8) -> Result<()> {
        self.inner.lock().stops += 1;
        Ok(())
    }

    fn capture_template(&self, _timeout: Duration) -> Result<Option<Vec<u8>>> {
        let mut state = self.inner.lock();
        self.ensure_open(&state)?;
        state.template_calls += 1;
        Ok(state.template_queue.pop_front())
    }
}

impl Extractable for MockSensor {
    fn extract(&self, _image: &[u8], format: Option<i64>) -> Result<Option<Vec<u8>>> {
        let mut state = self.inner.lock();
        state.extract_calls += 1;
        if state.extract_unsupported {
            return Err(HardwareError::unsupported("extract"));
        }
        Ok(state.extract_results.get(&format).cloned())
    }

    fn nested_extractor(&self) -> Option<Arc<dyn Extractable>> {
        self.inner.lock().nested.clone()
    }
}

impl SensorDriver for MockSensor {
    fn name(&self) -> String {
        self.inner.name.clone()
    }
}

/// Handle for scripting and inspecting a [`MockSensor`].
#[derive(Clone)]
pub struct MockSensorHandle {
    inner: Arc<Inner>,
}

impl fmt::Debug for MockSensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockSensorHandle")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl MockSensorHandle {
    /// Queue bytes for the next synchronous capture.
    pub fn queue_capture(&self, bytes: Vec<u8>) {
        self.inner.lock().sync_queue.push_back(bytes);
    }

    /// Make every synchronous capture block for `delay` (capped by its timeout).
    pub fn set_capture_delay(&self, delay: Duration) {
        self.inner.lock().sync_delay = delay;
    }

    /// Script the callbacks the next started capture delivers after `delay`.
    pub fn queue_listener_events(&self, delay: Duration, events: Vec<ListenerEvent>) {
        self.inner.lock().async_queue.push_back((delay, events));
    }

    /// Shorthand for a single capture-success delivery.
    pub fn queue_listener_image(&self, delay: Duration, bytes: Vec<u8>) {
        self.queue_listener_events(delay, vec![ListenerEvent::CaptureSuccess(bytes)]);
    }

    /// Queue bytes for the next direct-template call.
    pub fn queue_template(&self, bytes: Vec<u8>) {
        self.inner.lock().template_queue.push_back(bytes);
    }

    /// What extraction returns for a given format code (`None` = no code).
    pub fn set_extract_result(&self, format: Option<i64>, template: Vec<u8>) {
        self.inner.lock().extract_results.insert(format, template);
    }

    /// Make extraction fail as if the entry point were missing.
    pub fn set_extract_unsupported(&self, unsupported: bool) {
        self.inner.lock().extract_unsupported = unsupported;
    }

    /// Expose an inner extractor.
    pub fn set_nested_extractor(&self, nested: Arc<dyn Extractable>) {
        self.inner.lock().nested = Some(nested);
    }

    /// Make open fail with `message`.
    pub fn fail_open(&self, message: impl Into<String>) {
        self.inner.lock().open_error = Some(message.into());
    }

    /// Let open succeed again.
    pub fn clear_open_failure(&self) {
        self.inner.lock().open_error = None;
    }

    /// Make open block for `delay`.
    pub fn set_open_delay(&self, delay: Duration) {
        self.inner.lock().open_delay = delay;
    }

    /// Make every configure call fail.
    pub fn set_configure_fails(&self, fails: bool) {
        self.inner.lock().configure_fails = fails;
    }

    /// Make start-capture fail.
    pub fn set_start_fails(&self, fails: bool) {
        self.inner.lock().start_fails = fails;
    }

    /// Make listener registration fail.
    pub fn set_listener_unsupported(&self, unsupported: bool) {
        self.inner.lock().listener_unsupported = unsupported;
    }

    /// Whether the sensor is open.
    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    /// Open calls.
    pub fn opens(&self) -> usize {
        self.inner.lock().opens
    }

    /// Close calls.
    pub fn closes(&self) -> usize {
        self.inner.lock().closes
    }

    /// Synchronous capture calls.
    pub fn sync_calls(&self) -> usize {
        self.inner.lock().sync_calls
    }

    /// Start-capture calls.
    pub fn starts(&self) -> usize {
        self.inner.lock().starts
    }

    /// Stop-capture calls.
    pub fn stops(&self) -> usize {
        self.inner.lock().stops
    }

    /// Listener registrations.
    pub fn listener_registrations(&self) -> usize {
        self.inner.lock().registrations
    }

    /// Listener clears.
    pub fn listener_clears(&self) -> usize {
        self.inner.lock().clears
    }

    /// Listeners currently registered.
    pub fn active_listeners(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Direct-template calls.
    pub fn template_calls(&self) -> usize {
        self.inner.lock().template_calls
    }

    /// Extraction calls.
    pub fn extract_calls(&self) -> usize {
        self.inner.lock().extract_calls
    }

    /// Every setting applied, in order.
    pub fn settings(&self) -> Vec<SensorSetting> {
        self.inner.lock().settings.clone()
    }

    /// Last LED state applied.
    pub fn led(&self) -> Option<bool> {
        self.inner.lock().led
    }
}

/// [`DriverFactory`] that hands out a shared [`MockSensor`].
#[derive(Debug, Clone)]
pub struct MockDriverFactory {
    sensor: MockSensor,
    sdk_available: bool,
    create_error: Option<String>,
}

impl MockDriverFactory {
    /// Report the vendor SDK as present or missing.
    pub fn with_sdk_available(mut self, available: bool) -> Self {
        self.sdk_available = available;
        self
    }

    /// Make driver construction fail.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.create_error = Some(message.into());
        self
    }
}

impl DriverFactory for MockDriverFactory {
    fn sdk_available(&self) -> bool {
        self.sdk_available
    }

    fn create(&self, _device: &UsbDeviceDescriptor, trace: &mut DebugTrace) -> Result<AnyDriver> {
        if let Some(message) = &self.create_error {
            return Err(HardwareError::initialization_failed(message.clone()));
        }
        trace.push(format!("Sensor created: {}", self.sensor.name()));
        Ok(AnyDriver::Mock(self.sensor.clone()))
    }
}
