//! Service configuration.
//!
//! Every section has a `Default` built from `biolink_core::constants`, and
//! every field is optional in serialized form, so an empty TOML file yields
//! the stock behaviour. Durations are stored as milliseconds.

use biolink_core::constants::*;
use biolink_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a session obtains its driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverMode {
    /// Probe an SDK of unknown shape through the capability binder.
    #[default]
    Adaptive,

    /// Use a statically linked adapter; no probing.
    Fixed,
}

/// Complete engine configuration.
///
/// # Examples
///
/// ```
/// use biolink_engine::config::{DriverMode, ServiceConfig};
/// use std::time::Duration;
///
/// let config: ServiceConfig = serde_json::from_str(
///     r#"{ "capture": { "total_ms": 4000 }, "driver": { "mode": "fixed" } }"#,
/// )
/// .unwrap();
///
/// assert_eq!(config.capture.total(), Duration::from_millis(4000));
/// assert_eq!(config.capture.per_attempt_ms, 1600);
/// assert_eq!(config.driver.mode, DriverMode::Fixed);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub locator: LocatorSettings,
    pub permission: PermissionSettings,
    pub capture: CaptureSettings,
    pub session: SessionSettings,
    pub verify: VerifySettings,
    pub driver: DriverSettings,
}

impl ServiceConfig {
    /// Reject configurations the engine cannot honour.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for zero timeouts, a per-attempt timeout
    /// longer than the total budget, or an empty threshold.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("permission.timeout_ms", self.permission.timeout_ms),
            ("capture.total_ms", self.capture.total_ms),
            ("capture.per_attempt_ms", self.capture.per_attempt_ms),
            ("capture.direct_template_ms", self.capture.direct_template_ms),
            ("session.open_timeout_ms", self.session.open_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }

        if self.capture.per_attempt_ms > self.capture.total_ms {
            return Err(Error::Config(format!(
                "capture.per_attempt_ms ({}) exceeds capture.total_ms ({})",
                self.capture.per_attempt_ms, self.capture.total_ms
            )));
        }

        if self.capture.template_size_threshold == 0 {
            return Err(Error::Config(
                "capture.template_size_threshold must be greater than zero".to_string(),
            ));
        }

        if self.permission.app_id.trim().is_empty() {
            return Err(Error::Config("permission.app_id must not be empty".to_string()));
        }

        Ok(())
    }
}

/// Device selection signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorSettings {
    /// Vendor ids accepted outright.
    pub vendor_ids: Vec<u16>,

    /// Case-insensitive name/product substrings.
    pub name_hints: Vec<String>,

    /// Interface class byte that marks a vendor-specific device.
    pub interface_class: u8,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            vendor_ids: KNOWN_VENDOR_IDS.to_vec(),
            name_hints: VENDOR_NAME_HINTS.iter().map(|s| s.to_string()).collect(),
            interface_class: VENDOR_SPECIFIC_CLASS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionSettings {
    /// How long to wait for the grant/deny event.
    pub timeout_ms: u64,

    /// Prefix of the private permission event name.
    pub app_id: String,
}

impl PermissionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for PermissionSettings {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_PERMISSION_TIMEOUT_MS,
            app_id: DEFAULT_APP_ID.to_string(),
        }
    }
}

/// Capture loop timing and payload classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Total budget across all attempts.
    pub total_ms: u64,

    /// Wait for one listener delivery.
    pub per_attempt_ms: u64,

    /// Sleep between attempts.
    pub backoff_ms: u64,

    /// Budget for the direct-template fallback.
    pub direct_template_ms: u64,

    /// Payloads at or above this size are images.
    pub template_size_threshold: usize,

    /// Listener slot used for capture callbacks.
    pub listener_slot: u8,
}

impl CaptureSettings {
    pub fn total(&self) -> Duration {
        Duration::from_millis(self.total_ms)
    }

    pub fn per_attempt(&self) -> Duration {
        Duration::from_millis(self.per_attempt_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn direct_template(&self) -> Duration {
        Duration::from_millis(self.direct_template_ms)
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            total_ms: DEFAULT_CAPTURE_TOTAL_MS,
            per_attempt_ms: DEFAULT_CAPTURE_ATTEMPT_MS,
            backoff_ms: DEFAULT_CAPTURE_BACKOFF_MS,
            direct_template_ms: DEFAULT_DIRECT_TEMPLATE_MS,
            template_size_threshold: TEMPLATE_SIZE_THRESHOLD,
            listener_slot: DEFAULT_LISTENER_SLOT,
        }
    }
}

/// Open sequence and post-open sensor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Budget for driver construction plus the open entry point.
    pub open_timeout_ms: u64,

    /// Turn the anti-spoof/LED illumination on after open.
    pub led: bool,

    /// Sensor-side capture timeout.
    pub sensor_timeout_ms: i64,

    /// Image resolution in dpi.
    pub resolution_dpi: i64,
}

impl SessionSettings {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            open_timeout_ms: DEFAULT_OPEN_TIMEOUT_MS,
            led: true,
            sensor_timeout_ms: DEFAULT_SENSOR_TIMEOUT_MS,
            resolution_dpi: DEFAULT_SENSOR_DPI,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifySettings {
    /// Minimum matcher score that counts as a match.
    pub min_score: i32,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_MIN_MATCH_SCORE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    pub mode: DriverMode,
}
