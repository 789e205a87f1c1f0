//! Capture orchestrator: drives the multi-path capture protocol.
//!
//! One capture runs a retry loop bounded by a total deadline. Each pass
//! tries, in order:
//!
//! 1. A synchronous capture call on the blocking pool.
//! 2. An asynchronous capture: register a [`ListenerBridge`], start, wait
//!    up to the per-attempt timeout for one delivery, then stop and clear.
//! 3. A backoff sleep, capped by the time left.
//!
//! When the loop runs out of time without bytes, the direct-template entry
//! points get their own budget before the result is declared `Empty`.
//!
//! Payloads are classified by size: at or above the template threshold they
//! are images that still need extraction, below it they are templates.
//!
//! ```text
//! ┌───────────┐  none  ┌────────────────┐  none  ┌─────────┐
//! │ sync call │ ─────> │ listener + wait│ ─────> │ backoff │ ──┐
//! └───────────┘        └────────────────┘        └─────────┘   │
//!       ^                                                      │
//!       └──────────────────── until deadline ──────────────────┘
//!                                   │
//!                                   v
//!                          direct template
//! ```

use crate::config::CaptureSettings;
use crate::session::ActiveSession;
use biolink_core::{DebugTrace, Deadline, Error};
use biolink_hardware::{
    AnyDriver, Capturable, CaptureListener, HardwareError, ListenerBridge, ListenerOutcome,
    SensorDriver,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why a capture ended in error rather than bytes or `Empty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureErrorKind {
    /// Another capture is already running.
    Busy,

    /// The device went away mid-capture.
    DeviceDetached,

    /// A driver call or its task failed in a way retrying cannot fix.
    Hardware,
}

/// Outcome of one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureResult {
    /// Compact template; usable as is.
    Template(Vec<u8>),

    /// Raw image; needs extraction.
    Image(Vec<u8>),

    /// Every path came back without bytes before the deadline.
    Empty,

    /// The capture could not run to completion.
    Error {
        kind: CaptureErrorKind,
        detail: String,
    },
}

impl CaptureResult {
    fn error(kind: CaptureErrorKind, detail: impl Into<String>) -> Self {
        Self::Error {
            kind,
            detail: detail.into(),
        }
    }

    /// The engine error matching an `Error` result.
    pub fn to_error(&self) -> Option<Error> {
        match self {
            Self::Error { kind, detail } => Some(match kind {
                CaptureErrorKind::Busy => Error::CaptureBusy,
                CaptureErrorKind::DeviceDetached => Error::DeviceDetached(detail.clone()),
                CaptureErrorKind::Hardware => Error::HardwareError(detail.clone()),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for CaptureResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template(bytes) => write!(f, "Template({} bytes)", bytes.len()),
            Self::Image(bytes) => write!(f, "Image({} bytes)", bytes.len()),
            Self::Empty => write!(f, "Empty"),
            Self::Error { kind, detail } => write!(f, "Error({kind:?}: {detail})"),
        }
    }
}

/// Classify a payload by size.
///
/// # Examples
///
/// ```
/// use biolink_engine::capture::{classify, CaptureResult};
///
/// assert!(matches!(classify(vec![0; 2047], 2048), CaptureResult::Template(_)));
/// assert!(matches!(classify(vec![0; 2048], 2048), CaptureResult::Image(_)));
/// ```
pub fn classify(bytes: Vec<u8>, threshold: usize) -> CaptureResult {
    if bytes.len() >= threshold {
        CaptureResult::Image(bytes)
    } else {
        CaptureResult::Template(bytes)
    }
}

/// Run a blocking driver call on the blocking pool.
pub(crate) async fn blocking<T, F>(call: F) -> Result<T, Error>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| Error::HardwareError(format!("driver task failed: {e}")))
}

enum Attempt {
    Bytes(Vec<u8>, &'static str),
    Nothing,
    Fatal(CaptureResult),
}

/// Drives captures against an open session.
///
/// Captures are serialized: a second capture while one is running is
/// rejected with [`CaptureErrorKind::Busy`] instead of queueing behind it.
pub struct CaptureOrchestrator {
    settings: CaptureSettings,
    busy: Mutex<()>,
}

impl CaptureOrchestrator {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            busy: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Whether a capture is running.
    pub fn is_busy(&self) -> bool {
        self.busy.try_lock().is_err()
    }

    /// Capture one payload from `session`.
    ///
    /// Never fails outright: failures are reported as
    /// [`CaptureResult::Error`] and every attempt is recorded in `trace`.
    /// If the session is closed or detached mid-capture, the running attempt
    /// is abandoned and its listener cleanup still runs.
    pub async fn capture(
        &self,
        session: &ActiveSession,
        total_deadline: Deadline,
        per_attempt_timeout: Duration,
        trace: &mut DebugTrace,
    ) -> CaptureResult {
        let Ok(_running) = self.busy.try_lock() else {
            trace.push("Capture rejected: another capture is in progress");
            return CaptureResult::error(CaptureErrorKind::Busy, "capture already in progress");
        };

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => None,
            result = self.run(&session.driver, total_deadline, per_attempt_timeout, trace) => Some(result),
        };

        let result = result.unwrap_or_else(|| {
            warn!("Capture abandoned: {} detached", session.device);
            CaptureResult::error(
                CaptureErrorKind::DeviceDetached,
                format!("{} detached during capture", session.device),
            )
        });

        trace.push(format!(
            "Capture result: {} after {}ms",
            result,
            started.elapsed().as_millis()
        ));
        result
    }

    async fn run(
        &self,
        driver: &Arc<AnyDriver>,
        deadline: Deadline,
        per_attempt: Duration,
        trace: &mut DebugTrace,
    ) -> CaptureResult {
        let mut attempt = 0u32;
        let mut listener_supported = true;

        while !deadline.is_expired() {
            attempt += 1;
            let attempt_started = Instant::now();

            match self.sync_attempt(driver, deadline.cap(per_attempt), trace).await {
                Attempt::Bytes(bytes, via) => return self.accept(bytes, via, trace),
                Attempt::Fatal(result) => return result,
                Attempt::Nothing => trace.push(format!(
                    "Attempt {attempt}: sync capture returned nothing"
                )),
            }

            if listener_supported && !deadline.is_expired() {
                match self
                    .listener_attempt(driver, deadline.child(per_attempt), trace)
                    .await
                {
                    Ok(Attempt::Bytes(bytes, via)) => return self.accept(bytes, via, trace),
                    Ok(Attempt::Fatal(result)) => return result,
                    Ok(Attempt::Nothing) => {}
                    Err(e) => {
                        // No listener or start entry point: only the sync path
                        // remains for this capture.
                        trace.push(format!("Async capture unavailable: {e}"));
                        listener_supported = false;
                    }
                }
            }

            debug!(
                "Capture attempt {} finished empty in {}ms",
                attempt,
                attempt_started.elapsed().as_millis()
            );

            let pause = deadline.cap(self.settings.backoff());
            if pause.is_zero() {
                break;
            }
            tokio::time::sleep(pause).await;
        }

        trace.push(format!("Capture loop ended after {attempt} attempts"));
        self.direct_template(driver, trace).await
    }

    async fn sync_attempt(
        &self,
        driver: &Arc<AnyDriver>,
        timeout: Duration,
        trace: &mut DebugTrace,
    ) -> Attempt {
        let target = driver.clone();
        let outcome = blocking(move || {
            let result = target.capture_sync(timeout);
            (result, target.drain_journal())
        })
        .await;

        match outcome {
            Ok((result, journal)) => {
                trace.extend(journal);
                match result {
                    Ok(Some(bytes)) if !bytes.is_empty() => Attempt::Bytes(bytes, "sync"),
                    Ok(_) => Attempt::Nothing,
                    Err(e) => attempt_failed("sync capture", e, trace),
                }
            }
            Err(e) => Attempt::Fatal(CaptureResult::error(CaptureErrorKind::Hardware, e.to_string())),
        }
    }

    /// One listener round trip. `Err` means the driver has no usable
    /// asynchronous path at all.
    async fn listener_attempt(
        &self,
        driver: &Arc<AnyDriver>,
        attempt_deadline: Deadline,
        trace: &mut DebugTrace,
    ) -> Result<Attempt, HardwareError> {
        let slot = self.settings.listener_slot;
        let (bridge, wait) = ListenerBridge::new();
        let cleanup = CaptureCleanup::new(driver.clone(), slot);

        let target = driver.clone();
        let listener: Arc<dyn CaptureListener> = bridge.clone();
        let timeout = attempt_deadline.remaining();
        let started = blocking(move || {
            let result = target
                .register_listener(slot, listener)
                .and_then(|()| target.start_capture(slot, timeout));
            (result, target.drain_journal())
        })
        .await;

        let (result, journal) = match started {
            Ok(outcome) => outcome,
            Err(e) => {
                cleanup.finish(trace).await;
                return Ok(Attempt::Fatal(CaptureResult::error(
                    CaptureErrorKind::Hardware,
                    e.to_string(),
                )));
            }
        };
        trace.extend(journal);

        if let Err(e) = result {
            cleanup.finish(trace).await;
            return match e {
                HardwareError::Unsupported { .. } | HardwareError::BindingFailed { .. } => Err(e),
                other => Ok(attempt_failed("start capture", other, trace)),
            };
        }

        let outcome = wait.wait(attempt_deadline).await;
        cleanup.finish(trace).await;

        Ok(match outcome {
            Some(ListenerOutcome::Captured(bytes)) => Attempt::Bytes(bytes, "listener capture"),
            Some(ListenerOutcome::Extracted(bytes)) => Attempt::Bytes(bytes, "listener extract"),
            Some(ListenerOutcome::CaptureError(code)) => {
                trace.push(format!("Listener capture error code {code}"));
                Attempt::Nothing
            }
            Some(ListenerOutcome::ExtractError(code)) => {
                trace.push(format!("Listener extract error code {code}"));
                Attempt::Nothing
            }
            None => {
                trace.push(format!(
                    "No listener delivery within {}ms",
                    timeout.as_millis()
                ));
                Attempt::Nothing
            }
        })
    }

    async fn direct_template(&self, driver: &Arc<AnyDriver>, trace: &mut DebugTrace) -> CaptureResult {
        let budget = self.settings.direct_template();
        let deadline = Deadline::after(budget);
        trace.push(format!("Trying direct template ({}ms)", budget.as_millis()));

        let target = driver.clone();
        let call = blocking(move || {
            let result = target.capture_template(budget);
            (result, target.drain_journal())
        });

        match tokio::time::timeout_at(deadline.instant(), call).await {
            Ok(Ok((result, journal))) => {
                trace.extend(journal);
                match result {
                    Ok(Some(bytes)) if !bytes.is_empty() => {
                        info!("Direct template returned {} bytes", bytes.len());
                        CaptureResult::Template(bytes)
                    }
                    Ok(_) => {
                        trace.push("Direct template returned nothing");
                        CaptureResult::Empty
                    }
                    Err(HardwareError::Disconnected { device }) => {
                        CaptureResult::error(CaptureErrorKind::DeviceDetached, device)
                    }
                    Err(e) => {
                        trace.push(format!("Direct template failed: {e}"));
                        CaptureResult::Empty
                    }
                }
            }
            Ok(Err(e)) => CaptureResult::error(CaptureErrorKind::Hardware, e.to_string()),
            Err(_) => {
                trace.push(format!(
                    "Direct template timed out after {}ms",
                    budget.as_millis()
                ));
                CaptureResult::Empty
            }
        }
    }

    fn accept(&self, bytes: Vec<u8>, via: &str, trace: &mut DebugTrace) -> CaptureResult {
        trace.push(format!("Got {} bytes via {}", bytes.len(), via));
        classify(bytes, self.settings.template_size_threshold)
    }
}

impl fmt::Debug for CaptureOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureOrchestrator")
            .field("settings", &self.settings)
            .field("busy", &self.is_busy())
            .finish()
    }
}

fn attempt_failed(step: &str, err: HardwareError, trace: &mut DebugTrace) -> Attempt {
    if let HardwareError::Disconnected { device } = err {
        return Attempt::Fatal(CaptureResult::error(CaptureErrorKind::DeviceDetached, device));
    }
    trace.push(format!("{step} failed: {err}"));
    Attempt::Nothing
}

/// Stops the capture and clears the listener slot.
///
/// [`finish`](Self::finish) runs the cleanup and waits for it. If the guard
/// is dropped instead (the capture future was cancelled), the cleanup is
/// handed to the blocking pool.
struct CaptureCleanup {
    driver: Option<Arc<AnyDriver>>,
    slot: u8,
}

impl CaptureCleanup {
    fn new(driver: Arc<AnyDriver>, slot: u8) -> Self {
        Self {
            driver: Some(driver),
            slot,
        }
    }

    async fn finish(mut self, trace: &mut DebugTrace) {
        let Some(driver) = self.driver.take() else {
            return;
        };
        let slot = self.slot;
        match blocking(move || stop_and_clear(&driver, slot)).await {
            Ok(errors) => {
                for e in errors {
                    trace.push(format!("Capture cleanup: {e}"));
                }
            }
            Err(e) => trace.push(format!("Capture cleanup: {e}")),
        }
    }
}

impl Drop for CaptureCleanup {
    fn drop(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };
        let slot = self.slot;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || stop_and_clear(&driver, slot));
            }
            Err(_) => {
                stop_and_clear(&driver, slot);
            }
        }
    }
}

fn stop_and_clear(driver: &AnyDriver, slot: u8) -> Vec<HardwareError> {
    let mut errors = Vec::new();
    if let Err(e) = driver.stop_capture(slot) {
        debug!("stop capture: {}", e);
        errors.push(e);
    }
    if let Err(e) = driver.clear_listener(slot) {
        debug!("clear listener: {}", e);
        errors.push(e);
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use biolink_hardware::UsbDeviceDescriptor;
    use biolink_hardware::mock::{ListenerEvent, MockSensor, MockSensorHandle};
    use biolink_hardware::Openable;
    use rstest::rstest;
    use tokio_util::sync::CancellationToken;

    fn settings() -> CaptureSettings {
        CaptureSettings {
            total_ms: 600,
            per_attempt_ms: 100,
            backoff_ms: 20,
            direct_template_ms: 100,
            ..CaptureSettings::default()
        }
    }

    fn open_session() -> (ActiveSession, MockSensorHandle) {
        let (sensor, handle) = MockSensor::new();
        let device = UsbDeviceDescriptor::new("usb-1", 0x1B55, 0x0120).with_location(1, 4);
        sensor.open(&device).unwrap();
        let session = ActiveSession {
            driver: Arc::new(AnyDriver::Mock(sensor)),
            device,
            cancel: CancellationToken::new(),
            opened_at: Instant::now(),
        };
        (session, handle)
    }

    async fn run(orchestrator: &CaptureOrchestrator, session: &ActiveSession) -> (CaptureResult, DebugTrace) {
        let mut trace = DebugTrace::new();
        let s = orchestrator.settings().clone();
        let result = orchestrator
            .capture(session, Deadline::after(s.total()), s.per_attempt(), &mut trace)
            .await;
        (result, trace)
    }

    #[rstest]
    #[case(0, false)]
    #[case(2047, false)]
    #[case(2048, true)]
    #[case(65_536, true)]
    fn test_classification_threshold(#[case] len: usize, #[case] image: bool) {
        let result = classify(vec![1; len], 2048);
        assert_eq!(matches!(result, CaptureResult::Image(_)), image);
    }

    #[tokio::test]
    async fn test_sync_capture_wins() {
        let orchestrator = CaptureOrchestrator::new(settings());
        let (session, handle) = open_session();
        handle.queue_capture(vec![9; 512]);

        let (result, trace) = run(&orchestrator, &session).await;

        assert_eq!(result, CaptureResult::Template(vec![9; 512]));
        assert_eq!(handle.starts(), 0);
        assert!(trace.contains("via sync"));
    }

    #[tokio::test]
    async fn test_listener_capture_and_cleanup() {
        let orchestrator = CaptureOrchestrator::new(settings());
        let (session, handle) = open_session();
        handle.queue_listener_image(Duration::from_millis(10), vec![3; 4096]);

        let (result, _trace) = run(&orchestrator, &session).await;

        assert_eq!(result, CaptureResult::Image(vec![3; 4096]));
        assert_eq!(handle.starts(), 1);
        assert_eq!(handle.stops(), 1);
        assert_eq!(handle.listener_clears(), 1);
        assert_eq!(handle.active_listeners(), 0);
    }

    #[tokio::test]
    async fn test_error_callback_retries() {
        let orchestrator = CaptureOrchestrator::new(settings());
        let (session, handle) = open_session();
        handle.queue_listener_events(Duration::from_millis(5), vec![ListenerEvent::CaptureError(-8)]);
        handle.queue_listener_image(Duration::from_millis(5), vec![4; 256]);

        let (result, trace) = run(&orchestrator, &session).await;

        assert_eq!(result, CaptureResult::Template(vec![4; 256]));
        assert!(trace.contains("Listener capture error code -8"));
        assert_eq!(handle.starts(), 2);
        assert_eq!(handle.listener_registrations(), handle.listener_clears());
    }

    #[tokio::test]
    async fn test_direct_template_fallback() {
        let orchestrator = CaptureOrchestrator::new(settings());
        let (session, handle) = open_session();
        handle.queue_template(vec![7; 4096]);

        let (result, trace) = run(&orchestrator, &session).await;

        // Direct templates are never sent through extraction.
        assert_eq!(result, CaptureResult::Template(vec![7; 4096]));
        assert_eq!(handle.template_calls(), 1);
        assert!(trace.contains("Trying direct template"));
    }

    #[tokio::test]
    async fn test_unsupported_listener_falls_back_to_sync_only() {
        let orchestrator = CaptureOrchestrator::new(settings());
        let (session, handle) = open_session();
        handle.set_listener_unsupported(true);

        let (result, trace) = run(&orchestrator, &session).await;

        assert_eq!(result, CaptureResult::Empty);
        assert_eq!(trace.count("Async capture unavailable"), 1);
        assert!(handle.sync_calls() > 1);
        assert_eq!(handle.starts(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_capture_rejected() {
        let orchestrator = Arc::new(CaptureOrchestrator::new(settings()));
        let (session, _handle) = open_session();

        let first = {
            let orchestrator = orchestrator.clone();
            let session = session.clone();
            tokio::spawn(async move { run(&orchestrator, &session).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(orchestrator.is_busy());

        let (second, _) = run(&orchestrator, &session).await;
        assert!(matches!(
            second,
            CaptureResult::Error {
                kind: CaptureErrorKind::Busy,
                ..
            }
        ));
        assert!(matches!(second.to_error(), Some(Error::CaptureBusy)));

        let (first, _) = first.await.unwrap();
        assert_eq!(first, CaptureResult::Empty);
    }

    #[tokio::test]
    async fn test_cancelled_session_reports_detach() {
        let orchestrator = CaptureOrchestrator::new(settings());
        let (session, handle) = open_session();

        let cancel = session.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            cancel.cancel();
        });

        let (result, _trace) = run(&orchestrator, &session).await;
        assert!(matches!(
            result,
            CaptureResult::Error {
                kind: CaptureErrorKind::DeviceDetached,
                ..
            }
        ));

        // The dropped attempt hands its cleanup to the blocking pool.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.active_listeners(), 0);
        assert_eq!(handle.listener_registrations(), handle.listener_clears());
    }
}
