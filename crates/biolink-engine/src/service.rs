//! Inbound call surface.
//!
//! [`BiometricService`] wires the locator, permission broker, session
//! manager, capture orchestrator and extractor together and exposes the
//! operations a host application calls: diagnose, capture, indicator,
//! verify, driver dump and shutdown.
//!
//! Every operation runs as its own spawned task inside a tracing span with
//! a fresh operation id. The caller awaits it through an abort-on-drop
//! handle: dropping the caller's future aborts the task, which drops the
//! capture in progress and runs its cleanup guards. Panics and join errors
//! are caught here and reported as `SCAN_FAIL` / `VERIFY_FAIL`.
//!
//! A scan lights the sensor indicator for its capture step and switches it
//! off again on every exit path, cancellation included.
//!
//! # Examples
//!
//! ```
//! use biolink_engine::BiometricService;
//! use biolink_hardware::mock::{MockSensor, MockUsbHost};
//! use biolink_hardware::UsbDeviceDescriptor;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (host, usb) = MockUsbHost::new();
//!     usb.attach(UsbDeviceDescriptor::new("/dev/bus/usb/001/004", 0x1B55, 0x0120));
//!
//!     let (sensor, handle) = MockSensor::new();
//!     handle.queue_capture(vec![0x42; 512]);
//!
//!     let service = BiometricService::builder(Arc::new(host), Arc::new(sensor.factory()))
//!         .build()
//!         .unwrap();
//!
//!     let template = service.capture_template().await.unwrap();
//!     assert!(!template.is_empty());
//!     service.shutdown().await;
//! }
//! ```

use crate::capture::{CaptureErrorKind, CaptureOrchestrator, CaptureResult, blocking};
use crate::config::{DriverMode, ServiceConfig};
use crate::error::{OperationError, OperationResult};
use crate::extractor::TemplateExtractor;
use crate::locator::DeviceLocator;
use crate::matcher::TemplateMatcher;
use crate::permission::PermissionBroker;
use crate::session::SessionManager;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use biolink_core::{DebugTrace, Deadline, Error, ErrorCode, Result};
use biolink_hardware::{
    AnyDriver, DriverFactory, Openable, SensorDriver, SensorSetting, UsbDeviceDescriptor,
    UsbHost,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio_util::task::AbortOnDropHandle;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Result of [`BiometricService::diagnose_connection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    /// One summary line per attached device.
    pub devices: Vec<String>,

    /// Whether access to the selected device is already granted.
    pub has_permission: bool,

    /// Whether the driver SDK is available.
    pub sdk_available: bool,

    /// Set when the host has no removable-hardware transport.
    pub note: Option<String>,
}

/// Result of [`BiometricService::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    /// Whether any stored template scored at or above the threshold.
    pub matched: bool,

    /// Score of the match, or the best score seen when nothing matched.
    pub score: i32,

    /// Index of the matching stored template.
    pub matched_index: Option<usize>,
}

struct ServiceInner {
    config: ServiceConfig,
    host: Arc<dyn UsbHost>,
    locator: DeviceLocator,
    broker: PermissionBroker,
    sessions: SessionManager,
    orchestrator: CaptureOrchestrator,
    extractor: TemplateExtractor,
    matcher: Option<Arc<dyn TemplateMatcher>>,
}

/// The biometric capture service.
///
/// Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct BiometricService {
    inner: Arc<ServiceInner>,
}

impl BiometricService {
    /// Start building a service over `host` with driver `factory`.
    pub fn builder(
        host: Arc<dyn UsbHost>,
        factory: Arc<dyn DriverFactory>,
    ) -> BiometricServiceBuilder {
        BiometricServiceBuilder {
            host,
            factory,
            config: ServiceConfig::default(),
            matcher: None,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// The session manager, for lifecycle hooks such as detach watchers.
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    /// Forward a detach notification for the device at `bus`/`address`.
    pub async fn on_detach(&self, bus: u8, address: u8) -> bool {
        self.inner.sessions.on_detach(bus, address).await
    }

    async fn spawn_operation<T, F, Fut>(
        &self,
        name: &'static str,
        op: F,
    ) -> std::result::Result<T, String>
    where
        F: FnOnce(Arc<ServiceInner>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let span = info_span!("operation", op = name, id = %Uuid::new_v4());
        let task = tokio::spawn(op(self.inner.clone()).instrument(span));
        AbortOnDropHandle::new(task).await.map_err(|e| {
            warn!("{} task failed: {}", name, e);
            e.to_string()
        })
    }

    /// List attached devices and report permission and SDK availability.
    pub async fn diagnose_connection(&self) -> Diagnosis {
        let result = self
            .spawn_operation("diagnose", |inner| async move {
                blocking(move || inner.diagnose()).await
            })
            .await;

        match result {
            Ok(Ok(diagnosis)) => diagnosis,
            Ok(Err(e)) => failed_diagnosis(e.to_string()),
            Err(e) => failed_diagnosis(e),
        }
    }

    /// Capture a template and return it base64-encoded.
    ///
    /// # Errors
    ///
    /// - `NO_OTG` if the host has no USB transport
    /// - `NO_DEVICE` if no device is attached or permission is refused
    /// - `CAPTURE_EMPTY` if every capture path came back empty
    /// - `EXTRACT_FAIL` if an image was captured but no template extracted
    /// - `SCAN_FAIL` for anything unexpected
    pub async fn capture_template(&self) -> OperationResult<String> {
        self.capture_template_traced().await.map(|(template, _)| template)
    }

    /// Like [`capture_template`](Self::capture_template), also returning
    /// the trace of a successful capture.
    pub async fn capture_template_traced(&self) -> OperationResult<(String, DebugTrace)> {
        self.spawn_operation("capture_template", |inner| async move {
            let mut trace = DebugTrace::new();
            match inner.capture_template(&mut trace).await {
                Ok(template) => Ok((template, trace)),
                Err(mut err) => {
                    err.trace = trace;
                    Err(err)
                }
            }
        })
        .await
        .unwrap_or_else(|e| {
            Err(OperationError::new(
                ErrorCode::ScanFail,
                format!("capture task failed: {e}"),
                DebugTrace::new(),
            ))
        })
    }

    /// Toggle the capture indicator on the open session. Best-effort.
    pub async fn set_indicator(&self, on: bool) {
        let _ = self
            .spawn_operation("set_indicator", move |inner| async move {
                inner.set_indicator(on).await;
            })
            .await;
    }

    /// Match a base64 template against stored base64 templates.
    ///
    /// Stops at the first stored template that scores at or above the
    /// configured minimum.
    ///
    /// # Errors
    ///
    /// - `VERIFY_INVALID` if any template is not valid base64
    /// - `VERIFY_FAIL` if no matcher is configured or scoring failed
    pub async fn verify(&self, template: &str, stored: &[String]) -> OperationResult<VerifyResult> {
        let template = template.to_string();
        let stored = stored.to_vec();
        self.spawn_operation("verify", move |inner| async move {
            inner.verify(&template, &stored).await
        })
        .await
        .unwrap_or_else(|e| {
            Err(OperationError::new(
                ErrorCode::VerifyFail,
                format!("verify task failed: {e}"),
                DebugTrace::new(),
            ))
        })
    }

    /// Describe the driver surface: SDK availability and, for probed
    /// drivers, every member of the service and sensor objects.
    pub async fn dump_driver(&self) -> String {
        self.spawn_operation("dump_driver", |inner| async move { inner.dump_driver().await })
            .await
            .unwrap_or_else(|e| format!("Driver dump failed: {e}"))
    }

    /// Close the session. Used on host teardown.
    pub async fn shutdown(&self) {
        info!("Shutting down biometric service");
        self.inner.sessions.close().await;
    }
}

impl std::fmt::Debug for BiometricService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiometricService")
            .field("config", &self.inner.config)
            .field("sessions", &self.inner.sessions)
            .finish_non_exhaustive()
    }
}

fn failed_diagnosis(reason: String) -> Diagnosis {
    Diagnosis {
        devices: Vec::new(),
        has_permission: false,
        sdk_available: false,
        note: Some(format!("Diagnosis failed: {reason}")),
    }
}

fn scan_error(err: Error) -> OperationError {
    OperationError::from_scan(&err, DebugTrace::new())
}

/// Keeps the indicator on for the capture step and turns it off after.
///
/// Dropping the guard without [`finish`](Self::finish) (the operation was
/// cancelled) hands the reset to the blocking pool.
struct IndicatorGuard {
    driver: Option<Arc<AnyDriver>>,
}

impl IndicatorGuard {
    fn new(driver: Arc<AnyDriver>) -> Self {
        Self {
            driver: Some(driver),
        }
    }

    /// Turn the indicator on for the coming capture.
    async fn light(&self, trace: &mut DebugTrace) {
        let Some(driver) = self.driver.clone() else {
            return;
        };
        if let Ok(Err(e)) = blocking(move || driver.configure(SensorSetting::Led(true))).await {
            trace.push(format!("Indicator on failed: {e}"));
        }
    }

    fn disarm(mut self) {
        self.driver = None;
    }

    async fn finish(mut self, trace: &mut DebugTrace) {
        let Some(driver) = self.driver.take() else {
            return;
        };
        match blocking(move || driver.configure(SensorSetting::Led(false))).await {
            Ok(Ok(())) => trace.push("Indicator off"),
            Ok(Err(e)) => trace.push(format!("Indicator off failed: {e}")),
            Err(e) => trace.push(format!("Indicator off failed: {e}")),
        }
    }
}

impl Drop for IndicatorGuard {
    fn drop(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };
        let reset = move || {
            if let Err(e) = driver.configure(SensorSetting::Led(false)) {
                debug!("indicator off: {}", e);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(reset);
            }
            Err(_) => reset(),
        }
    }
}

impl ServiceInner {
    fn diagnose(&self) -> Diagnosis {
        let devices = self.locator.list_devices();
        let lines = devices
            .iter()
            .map(|d| d.summary(self.host.has_permission(d)))
            .collect();
        let has_permission = self
            .locator
            .find_device()
            .is_some_and(|d| self.host.has_permission(&d));

        let note = (!self.host.transport_available()).then(|| {
            "No USB host transport available; an emulated host cannot attach devices".to_string()
        });

        Diagnosis {
            devices: lines,
            has_permission,
            sdk_available: self.sessions.factory().sdk_available(),
            note,
        }
    }

    async fn locate(&self, trace: &mut DebugTrace) -> OperationResult<UsbDeviceDescriptor> {
        if !self.host.transport_available() {
            trace.push("USB transport: unavailable");
            return Err(scan_error(Error::TransportUnavailable(
                "no USB host transport on this system".to_string(),
            )));
        }

        let locator = self.locator.clone();
        let device = blocking(move || locator.find_device()).await.map_err(scan_error)?;
        match device {
            Some(device) => {
                trace.push(format!("Device: {device}"));
                Ok(device)
            }
            None => {
                trace.push("Device: none");
                Err(OperationError::new(
                    ErrorCode::NoDevice,
                    "Fingerprint device not found",
                    DebugTrace::new(),
                ))
            }
        }
    }

    async fn capture_template(&self, trace: &mut DebugTrace) -> OperationResult<String> {
        let device = self.locate(trace).await?;

        trace.push("Requesting USB permission");
        let device = self
            .broker
            .request_permission(&device, Deadline::after(self.config.permission.timeout()))
            .await
            .map_err(|denied| {
                trace.push(format!("USB permission result: {denied}"));
                scan_error(denied.into())
            })?;
        trace.push("USB permission result: granted=true");

        let session = self
            .sessions
            .open(&device, Deadline::after(self.config.session.open_timeout()), trace)
            .await
            .map_err(scan_error)?;

        let indicator = IndicatorGuard::new(session.driver.clone());
        if self.config.session.led {
            indicator.light(trace).await;
        }
        let capture = &self.config.capture;
        let result = self
            .orchestrator
            .capture(
                &session,
                Deadline::after(capture.total()),
                capture.per_attempt(),
                trace,
            )
            .await;
        if matches!(
            result,
            CaptureResult::Error {
                kind: CaptureErrorKind::Busy,
                ..
            }
        ) {
            // The indicator belongs to the capture already running.
            indicator.disarm();
        } else {
            indicator.finish(trace).await;
        }

        let template = match result {
            CaptureResult::Template(template) => template,
            CaptureResult::Image(image) => {
                trace.push(format!("Extracting template from {} byte image", image.len()));
                self.extractor
                    .extract_from_driver(session.driver.clone(), image, trace)
                    .await
                    .ok_or_else(|| {
                        OperationError::new(
                            ErrorCode::ExtractFail,
                            "Could not extract template from image",
                            DebugTrace::new(),
                        )
                    })?
            }
            CaptureResult::Empty => {
                return Err(OperationError::new(
                    ErrorCode::CaptureEmpty,
                    "No image captured",
                    DebugTrace::new(),
                ));
            }
            other => {
                let err = other
                    .to_error()
                    .unwrap_or_else(|| Error::HardwareError(other.to_string()));
                return Err(scan_error(err));
            }
        };

        info!("Captured template of {} bytes", template.len());
        Ok(STANDARD.encode(template))
    }

    async fn set_indicator(&self, on: bool) {
        let Some(session) = self.sessions.active().await else {
            info!("Indicator change ignored: no open session");
            return;
        };

        let driver = session.driver.clone();
        match blocking(move || driver.configure(SensorSetting::Led(on))).await {
            Ok(Ok(())) => info!("Indicator {}", if on { "on" } else { "off" }),
            Ok(Err(e)) => warn!("Indicator change failed: {}", e),
            Err(e) => warn!("Indicator task failed: {}", e),
        }
    }

    async fn verify(&self, template: &str, stored: &[String]) -> OperationResult<VerifyResult> {
        let invalid = |what: String| {
            OperationError::new(ErrorCode::VerifyInvalid, what, DebugTrace::new())
        };

        let probe = STANDARD
            .decode(template)
            .map_err(|e| invalid(format!("Invalid template encoding: {e}")))?;
        let gallery = stored
            .iter()
            .enumerate()
            .map(|(i, s)| {
                STANDARD
                    .decode(s)
                    .map_err(|e| invalid(format!("Invalid stored template {i}: {e}")))
            })
            .collect::<OperationResult<Vec<_>>>()?;

        let matcher = self.matcher.clone().ok_or_else(|| {
            OperationError::new(
                ErrorCode::VerifyFail,
                "No template matcher configured",
                DebugTrace::new(),
            )
        })?;

        let min_score = self.config.verify.min_score;
        blocking(move || best_match(matcher.as_ref(), &probe, &gallery, min_score))
            .await
            .map_err(|e| {
                OperationError::new(ErrorCode::VerifyFail, e.to_string(), DebugTrace::new())
            })
    }

    async fn dump_driver(&self) -> String {
        let mode = match self.config.driver.mode {
            DriverMode::Adaptive => "adaptive",
            DriverMode::Fixed => "fixed",
        };
        let mut out = format!(
            "SDK Present: {}\nMode: {}\n",
            self.sessions.factory().sdk_available(),
            mode
        );

        if let Some(session) = self.sessions.active().await {
            let driver = session.driver.clone();
            match blocking(move || driver.describe()).await {
                Ok(description) => out.push_str(&description),
                Err(e) => out.push_str(&format!("Driver description failed: {e}")),
            }
            return out;
        }

        // No open session: construct the driver objects just to describe them.
        let factory = self.sessions.factory().clone();
        let locator = self.locator.clone();
        let described = blocking(move || {
            let device = locator
                .find_device()
                .unwrap_or_else(|| UsbDeviceDescriptor::new("(none)", 0, 0));
            let mut trace = DebugTrace::new();
            factory.create(&device, &mut trace).map(|driver| driver.describe())
        })
        .await;

        match described {
            Ok(Ok(description)) => out.push_str(&description),
            Ok(Err(e)) => out.push_str(&format!("Driver unavailable: {e}")),
            Err(e) => out.push_str(&format!("Driver unavailable: {e}")),
        }
        out
    }
}

/// Score `gallery` entries in order, stopping at the first match.
fn best_match(
    matcher: &dyn TemplateMatcher,
    probe: &[u8],
    gallery: &[Vec<u8>],
    min_score: i32,
) -> VerifyResult {
    let mut best: Option<i32> = None;
    for (index, candidate) in gallery.iter().enumerate() {
        let score = matcher.score(probe, candidate);
        if score >= min_score {
            return VerifyResult {
                matched: true,
                score,
                matched_index: Some(index),
            };
        }
        best = Some(best.map_or(score, |b| b.max(score)));
    }

    VerifyResult {
        matched: false,
        score: best.unwrap_or(0),
        matched_index: None,
    }
}

/// Builder for [`BiometricService`].
pub struct BiometricServiceBuilder {
    host: Arc<dyn UsbHost>,
    factory: Arc<dyn DriverFactory>,
    config: ServiceConfig,
    matcher: Option<Arc<dyn TemplateMatcher>>,
}

impl BiometricServiceBuilder {
    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn TemplateMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Validate the configuration and assemble the service.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is rejected by
    /// [`ServiceConfig::validate`].
    pub fn build(self) -> Result<BiometricService> {
        self.config.validate()?;
        let config = self.config;

        let inner = ServiceInner {
            locator: DeviceLocator::new(self.host.clone(), config.locator.clone()),
            broker: PermissionBroker::new(self.host.clone(), config.permission.app_id.clone()),
            sessions: SessionManager::new(self.factory, config.session.clone())
                .with_listener_slot(config.capture.listener_slot),
            orchestrator: CaptureOrchestrator::new(config.capture.clone()),
            extractor: TemplateExtractor::new(),
            matcher: self.matcher,
            host: self.host,
            config,
        };

        Ok(BiometricService {
            inner: Arc::new(inner),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::FnMatcher;
    use rstest::rstest;

    fn scores(table: Vec<(u8, i32)>) -> FnMatcher<impl Fn(&[u8], &[u8]) -> i32 + Send + Sync> {
        FnMatcher::new(move |_: &[u8], candidate: &[u8]| {
            table
                .iter()
                .find(|(tag, _)| candidate.first() == Some(tag))
                .map_or(0, |(_, score)| *score)
        })
    }

    #[rstest]
    #[case(vec![85, 10], Some(0), 85)]
    #[case(vec![10, 85], Some(1), 85)]
    #[case(vec![10, 39], None, 39)]
    #[case(vec![], None, 0)]
    fn test_best_match(
        #[case] table: Vec<i32>,
        #[case] index: Option<usize>,
        #[case] score: i32,
    ) {
        let gallery: Vec<Vec<u8>> = (0..table.len()).map(|i| vec![i as u8]).collect();
        let matcher = scores(table.iter().enumerate().map(|(i, s)| (i as u8, *s)).collect());

        let result = best_match(&matcher, b"probe", &gallery, 40);
        assert_eq!(result.matched_index, index);
        assert_eq!(result.matched, index.is_some());
        assert_eq!(result.score, score);
    }

    #[test]
    fn test_failed_diagnosis_carries_reason() {
        let diagnosis = failed_diagnosis("enumeration panicked".into());
        assert!(diagnosis.devices.is_empty());
        assert!(diagnosis.note.unwrap().contains("enumeration panicked"));
    }
}
