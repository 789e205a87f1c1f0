//! Core constants for device discovery and capture.
//!
//! This module defines the defaults used throughout the biolink workspace:
//! vendor signatures for locating the capture peripheral, the timing budget
//! of the capture loop, and the thresholds used to classify payloads and
//! match results. Every value here is a default; `ServiceConfig` in
//! `biolink-engine` can override each of them.
//!
//! # Usage
//!
//! ```
//! use biolink_core::constants::*;
//! use std::time::Duration;
//!
//! assert!(KNOWN_VENDOR_IDS.contains(&0x1B55));
//!
//! let total = Duration::from_millis(DEFAULT_CAPTURE_TOTAL_MS);
//! let per_attempt = Duration::from_millis(DEFAULT_CAPTURE_ATTEMPT_MS);
//! assert!(per_attempt < total);
//! ```

// ============================================================================
// Device Discovery
// ============================================================================

/// USB vendor ids of known capture peripherals.
///
/// `0x1B55` is the ZKTeco vendor id (SLK20R and siblings); any product id
/// under it is accepted.
pub const KNOWN_VENDOR_IDS: &[u16] = &[0x1B55];

/// Case-insensitive substrings that identify a capture peripheral by name.
pub const VENDOR_NAME_HINTS: &[&str] = &["zkteco", "slk20", "fingerprint"];

/// USB interface class byte reserved for vendor-specific interfaces.
pub const VENDOR_SPECIFIC_CLASS: u8 = 0xFF;

/// Application id used to build private permission event names.
pub const DEFAULT_APP_ID: &str = "biolink";

/// Suffix of the private permission event name.
pub const PERMISSION_ACTION: &str = "USB_PERMISSION";

// ============================================================================
// Timing
// ============================================================================

/// Maximum time to wait for the permission grant/deny event (milliseconds).
pub const DEFAULT_PERMISSION_TIMEOUT_MS: u64 = 30_000;

/// Maximum time for the open sequence, including service construction.
pub const DEFAULT_OPEN_TIMEOUT_MS: u64 = 8_000;

/// Total capture budget across all attempts (milliseconds).
pub const DEFAULT_CAPTURE_TOTAL_MS: u64 = 10_000;

/// Per-attempt wait for a listener delivery (milliseconds).
pub const DEFAULT_CAPTURE_ATTEMPT_MS: u64 = 1_600;

/// Sleep between capture attempts (milliseconds).
///
/// Kept within the 150-250ms window the hardware tolerates between a stop
/// and the next start.
pub const DEFAULT_CAPTURE_BACKOFF_MS: u64 = 200;

/// Budget for the direct-template fallback after the capture loop.
pub const DEFAULT_DIRECT_TEMPLATE_MS: u64 = 6_000;

// ============================================================================
// Sensor Configuration
// ============================================================================

/// Capture timeout pushed to the sensor after open (milliseconds).
pub const DEFAULT_SENSOR_TIMEOUT_MS: i64 = 10_000;

/// Resolution pushed to the sensor after open (dots per inch).
pub const DEFAULT_SENSOR_DPI: i64 = 500;

/// Listener slot used for capture callbacks.
pub const DEFAULT_LISTENER_SLOT: u8 = 0;

// ============================================================================
// Payload Classification and Matching
// ============================================================================

/// Payloads at or above this size are images and go through extraction.
///
/// Compact templates stay well under 2KB, while the smallest raw or
/// compressed image buffers the sensors return are above it.
///
/// # Examples
///
/// ```
/// use biolink_core::constants::TEMPLATE_SIZE_THRESHOLD;
///
/// assert!(2047 < TEMPLATE_SIZE_THRESHOLD);
/// assert!(2048 >= TEMPLATE_SIZE_THRESHOLD);
/// ```
pub const TEMPLATE_SIZE_THRESHOLD: usize = 2048;

/// Format codes tried, in order, when extraction needs an explicit format.
pub const EXTRACT_FORMAT_CODES: &[i64] = &[0, 1, 256];

/// Minimum matcher score that counts as a match.
pub const DEFAULT_MIN_MATCH_SCORE: i32 = 40;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_defaults_are_consistent() {
        assert!(DEFAULT_CAPTURE_ATTEMPT_MS < DEFAULT_CAPTURE_TOTAL_MS);
        assert!((150..=250).contains(&DEFAULT_CAPTURE_BACKOFF_MS));
        assert!(DEFAULT_OPEN_TIMEOUT_MS > 0);
    }

    #[test]
    fn test_vendor_hints_are_lowercase() {
        for hint in VENDOR_NAME_HINTS {
            assert_eq!(*hint, hint.to_lowercase());
        }
    }
}
