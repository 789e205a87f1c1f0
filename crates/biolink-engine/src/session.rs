//! Session manager: owns the one open driver handle.
//!
//! A single async mutex serializes open, close and detach, and guards the
//! [`StateMachine`] that tracks the lifecycle. Captures never hold that
//! lock: they take an [`ActiveSession`] snapshot (driver, device and a
//! cancellation token) and run against it, so a detach can close the
//! session underneath a running capture. The capture observes the cancelled
//! token and fails with `DeviceDetached`.
//!
//! All driver calls are blocking and run on the blocking pool.

use crate::config::SessionSettings;
use crate::state_machine::{SessionState, StateMachine};
use biolink_core::constants::DEFAULT_LISTENER_SLOT;
use biolink_core::{DebugTrace, Deadline, Error, Result};
use biolink_hardware::{
    AnyDriver, Capturable, DriverFactory, Openable, SensorDriver, SensorSetting,
    UsbDeviceDescriptor,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Snapshot of the open session handed to capture and indicator calls.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    /// The open driver.
    pub driver: Arc<AnyDriver>,

    /// The device it was opened for.
    pub device: UsbDeviceDescriptor,

    /// Cancelled when the session closes or the device detaches.
    pub cancel: CancellationToken,

    /// When the open sequence completed.
    pub opened_at: Instant,
}

#[derive(Debug)]
struct SessionSlot {
    machine: StateMachine,
    active: Option<ActiveSession>,
}

/// Owns the lifecycle of the open device session.
///
/// # Examples
///
/// ```
/// use biolink_core::{DebugTrace, Deadline};
/// use biolink_engine::session::SessionManager;
/// use biolink_engine::config::SessionSettings;
/// use biolink_engine::SessionState;
/// use biolink_hardware::mock::MockSensor;
/// use biolink_hardware::UsbDeviceDescriptor;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let (sensor, handle) = MockSensor::new();
///     let sessions = SessionManager::new(Arc::new(sensor.factory()), SessionSettings::default());
///
///     let device = UsbDeviceDescriptor::new("usb-1", 0x1B55, 0x0120);
///     let mut trace = DebugTrace::new();
///     sessions
///         .open(&device, Deadline::after(Duration::from_secs(1)), &mut trace)
///         .await
///         .unwrap();
///     assert_eq!(sessions.state().await, SessionState::Open);
///
///     sessions.close().await;
///     assert_eq!(sessions.state().await, SessionState::Closed);
///     assert_eq!(handle.closes(), 1);
/// }
/// ```
pub struct SessionManager {
    factory: Arc<dyn DriverFactory>,
    settings: SessionSettings,
    listener_slot: u8,
    slot: Mutex<SessionSlot>,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn DriverFactory>, settings: SessionSettings) -> Self {
        Self {
            factory,
            settings,
            listener_slot: DEFAULT_LISTENER_SLOT,
            slot: Mutex::new(SessionSlot {
                machine: StateMachine::new(),
                active: None,
            }),
        }
    }

    /// Listener slot cleared when the session closes.
    pub fn with_listener_slot(mut self, slot: u8) -> Self {
        self.listener_slot = slot;
        self
    }

    /// The driver factory sessions are opened with.
    pub fn factory(&self) -> &Arc<dyn DriverFactory> {
        &self.factory
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        *self.slot.lock().await.machine.current_state()
    }

    /// Whether a session is open.
    pub async fn is_open(&self) -> bool {
        self.state().await.is_open()
    }

    /// Snapshot of the open session, if any.
    pub async fn active(&self) -> Option<ActiveSession> {
        self.slot.lock().await.active.clone()
    }

    /// Open a session for `device`, or return the one already open.
    ///
    /// The driver is constructed and opened on the blocking pool, bounded by
    /// the configured open timeout and by `deadline`. Post-open settings are
    /// applied best-effort: failures are traced and logged, never returned.
    ///
    /// # Errors
    ///
    /// Returns the driver's error if construction or open fails, or
    /// `Error::HardwareError` if the open sequence overruns its budget.
    pub async fn open(
        &self,
        device: &UsbDeviceDescriptor,
        deadline: Deadline,
        trace: &mut DebugTrace,
    ) -> Result<ActiveSession> {
        let mut slot = self.slot.lock().await;
        if let Some(active) = &slot.active
            && slot.machine.current_state().is_open()
        {
            trace.push("Session already open");
            return Ok(active.clone());
        }

        slot.machine.transition_to(SessionState::Opening)?;
        let budget = deadline.child(self.settings.open_timeout());

        match self.open_driver(device, budget, trace).await {
            Ok(driver) => {
                let driver = Arc::new(driver);
                self.configure(&driver, trace).await;

                let active = ActiveSession {
                    driver,
                    device: device.clone(),
                    cancel: CancellationToken::new(),
                    opened_at: Instant::now(),
                };
                slot.machine.transition_to(SessionState::Open)?;
                slot.active = Some(active.clone());

                info!("Session open on {}", device);
                trace.push(format!("Device opened: {}", active.driver.name()));
                Ok(active)
            }
            Err(e) => {
                slot.machine.transition_to(SessionState::Closed)?;
                trace.push(format!("Open failed: {e}"));
                Err(e)
            }
        }
    }

    async fn open_driver(
        &self,
        device: &UsbDeviceDescriptor,
        budget: Deadline,
        trace: &mut DebugTrace,
    ) -> Result<AnyDriver> {
        let factory = self.factory.clone();
        let target = device.clone();
        let mut task = tokio::task::spawn_blocking(move || {
            let mut journal = DebugTrace::new();
            let opened = factory.create(&target, &mut journal).and_then(|driver| {
                let result = driver.open(&target);
                journal.extend(driver.drain_journal());
                result.map(|()| driver)
            });
            (opened, journal)
        });

        match tokio::time::timeout_at(budget.instant(), &mut task).await {
            Ok(Ok((opened, journal))) => {
                trace.extend(journal);
                opened.map_err(Error::from)
            }
            Ok(Err(join)) => Err(Error::HardwareError(format!("open task failed: {join}"))),
            Err(_) => {
                // The blocking call cannot be interrupted; release whatever it
                // eventually opens.
                tokio::spawn(async move {
                    if let Ok((Ok(driver), _)) = task.await {
                        warn!("Late open completed after timeout, closing {}", driver.name());
                        let _ = tokio::task::spawn_blocking(move || driver.close()).await;
                    }
                });
                Err(Error::HardwareError(format!(
                    "open did not complete within {}ms",
                    self.settings.open_timeout_ms
                )))
            }
        }
    }

    async fn configure(&self, driver: &Arc<AnyDriver>, trace: &mut DebugTrace) {
        let mut settings = Vec::with_capacity(3);
        if self.settings.led {
            settings.push(SensorSetting::Led(true));
        }
        settings.push(SensorSetting::TimeoutMs(self.settings.sensor_timeout_ms));
        settings.push(SensorSetting::Resolution(self.settings.resolution_dpi));

        let target = driver.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let results: Vec<_> = settings
                .into_iter()
                .map(|s| (s, target.configure(s)))
                .collect();
            (results, target.drain_journal())
        })
        .await;

        match outcome {
            Ok((results, journal)) => {
                trace.extend(journal);
                for (setting, result) in results {
                    match result {
                        Ok(()) => debug!("Applied {}", setting),
                        Err(e) => {
                            warn!("Could not apply {}: {}", setting, e);
                            trace.push(format!("Configure {setting} failed: {e}"));
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Configure task failed: {}", e);
                trace.push(format!("Configure task failed: {e}"));
            }
        }
    }

    /// Close the session. Idempotent and infallible.
    ///
    /// Cancels any in-flight capture, stops capture and clears the listener
    /// slot, then releases the driver.
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        let Some(active) = slot.active.take() else {
            if !matches!(slot.machine.current_state(), SessionState::Closed) {
                slot.machine.reset();
            }
            return;
        };

        active.cancel.cancel();
        if slot.machine.transition_to(SessionState::Closing).is_err() {
            slot.machine.reset();
        }

        self.release(active.driver, true).await;
        if slot.machine.transition_to(SessionState::Closed).is_err() {
            slot.machine.reset();
        }
        info!("Session closed");
    }

    /// Force-close because the device at `bus`/`address` went away.
    ///
    /// Returns `false` if the open session belongs to another device.
    pub async fn on_detach(&self, bus: u8, address: u8) -> bool {
        let matches = self
            .slot
            .lock()
            .await
            .active
            .as_ref()
            .is_some_and(|a| a.device.location() == (bus, address));

        if matches {
            self.detach().await;
        } else {
            debug!("Detach of {}:{} does not affect the session", bus, address);
        }
        matches
    }

    /// Force-close the session as if its device had been unplugged.
    pub async fn detach(&self) {
        let mut slot = self.slot.lock().await;
        let Some(active) = slot.active.take() else {
            return;
        };

        warn!("Device detached: {}", active.device);
        active.cancel.cancel();
        if slot.machine.transition_to(SessionState::Closed).is_err() {
            slot.machine.reset();
        }

        // The device is gone; release failures are expected.
        self.release(active.driver, false).await;
    }

    async fn release(&self, driver: Arc<AnyDriver>, stop: bool) {
        let slot = self.listener_slot;
        let result = tokio::task::spawn_blocking(move || {
            if stop {
                if let Err(e) = driver.stop_capture(slot) {
                    debug!("stop on close: {}", e);
                }
                if let Err(e) = driver.clear_listener(slot) {
                    debug!("clear listener on close: {}", e);
                }
            }
            driver.close()
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Driver close reported: {}", e),
            Err(e) => warn!("Close task failed: {}", e),
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("settings", &self.settings)
            .field("listener_slot", &self.listener_slot)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biolink_hardware::mock::{MockSensor, MockSensorHandle};
    use std::time::Duration;

    fn device() -> UsbDeviceDescriptor {
        UsbDeviceDescriptor::new("/dev/bus/usb/001/004", 0x1B55, 0x0120).with_location(1, 4)
    }

    fn manager() -> (SessionManager, MockSensorHandle) {
        let (sensor, handle) = MockSensor::new();
        let manager = SessionManager::new(Arc::new(sensor.factory()), SessionSettings::default());
        (manager, handle)
    }

    fn soon() -> Deadline {
        Deadline::after(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_second_open_is_noop() {
        let (sessions, handle) = manager();
        let mut trace = DebugTrace::new();

        sessions.open(&device(), soon(), &mut trace).await.unwrap();
        sessions.open(&device(), soon(), &mut trace).await.unwrap();

        assert_eq!(handle.opens(), 1);
        assert_eq!(trace.count("opened"), 1);
        assert!(trace.contains("Session already open"));
    }

    #[tokio::test]
    async fn test_open_applies_settings() {
        let (sessions, handle) = manager();
        let mut trace = DebugTrace::new();
        sessions.open(&device(), soon(), &mut trace).await.unwrap();

        assert_eq!(
            handle.settings(),
            vec![
                SensorSetting::Led(true),
                SensorSetting::TimeoutMs(10_000),
                SensorSetting::Resolution(500),
            ]
        );
    }

    #[tokio::test]
    async fn test_configure_failures_are_not_fatal() {
        let (sessions, handle) = manager();
        handle.set_configure_fails(true);

        let mut trace = DebugTrace::new();
        sessions.open(&device(), soon(), &mut trace).await.unwrap();

        assert!(sessions.is_open().await);
        assert_eq!(trace.count("Configure"), 3);
    }

    #[tokio::test]
    async fn test_open_failure_returns_to_closed() {
        let (sessions, handle) = manager();
        handle.fail_open("openDevice returned -1");

        let mut trace = DebugTrace::new();
        let err = sessions.open(&device(), soon(), &mut trace).await.unwrap_err();

        assert!(err.to_string().contains("openDevice returned -1"));
        assert_eq!(sessions.state().await, SessionState::Closed);
        assert!(sessions.active().await.is_none());

        handle.clear_open_failure();
        sessions.open(&device(), soon(), &mut trace).await.unwrap();
        assert!(sessions.is_open().await);
    }

    #[tokio::test]
    async fn test_open_timeout() {
        let (sessions, handle) = manager();
        handle.set_open_delay(Duration::from_millis(300));

        let mut trace = DebugTrace::new();
        let started = Instant::now();
        let result = sessions
            .open(&device(), Deadline::after(Duration::from_millis(50)), &mut trace)
            .await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(sessions.state().await, SessionState::Closed);

        // The late open is released once it completes.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!handle.is_open());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (sessions, handle) = manager();
        sessions.close().await;

        let mut trace = DebugTrace::new();
        sessions.open(&device(), soon(), &mut trace).await.unwrap();
        sessions.close().await;
        sessions.close().await;

        assert_eq!(handle.closes(), 1);
        assert_eq!(handle.stops(), 1);
        assert_eq!(handle.listener_clears(), 1);
        assert_eq!(sessions.state().await, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_on_detach_matches_location() {
        let (sessions, handle) = manager();
        let mut trace = DebugTrace::new();
        let active = sessions.open(&device(), soon(), &mut trace).await.unwrap();

        assert!(!sessions.on_detach(2, 9).await);
        assert!(sessions.is_open().await);

        assert!(sessions.on_detach(1, 4).await);
        assert!(active.cancel.is_cancelled());
        assert_eq!(sessions.state().await, SessionState::Closed);
        assert!(!handle.is_open());
    }
}
