//! Engine error types.
//!
//! [`OperationError`] is the only failure shape that leaves the engine: an
//! outward [`ErrorCode`], a human-readable message and the trace of the
//! operation that failed. [`PermissionDenied`] is what the permission broker
//! resolves to when access is not granted.

use biolink_core::{DebugTrace, Error, ErrorCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Access to the device was not granted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("USB permission denied: {reason}")]
pub struct PermissionDenied {
    /// Why access was not granted.
    pub reason: String,

    /// Whether the deadline elapsed before any answer arrived.
    pub timed_out: bool,
}

impl PermissionDenied {
    /// The user or OS refused.
    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            timed_out: false,
        }
    }

    /// No answer before the deadline.
    pub fn timed_out(waited_ms: u128) -> Self {
        Self {
            reason: format!("no answer within {waited_ms}ms"),
            timed_out: true,
        }
    }
}

impl From<PermissionDenied> for Error {
    fn from(err: PermissionDenied) -> Self {
        Error::PermissionDenied { reason: err.reason }
    }
}

/// Failure returned by an inbound operation.
///
/// # Examples
///
/// ```
/// use biolink_core::{DebugTrace, ErrorCode};
/// use biolink_engine::OperationError;
///
/// let mut trace = DebugTrace::new();
/// trace.push("Device: none");
///
/// let err = OperationError::new(ErrorCode::NoDevice, "Fingerprint device not found", trace);
/// assert_eq!(err.to_string(), "NO_DEVICE: Fingerprint device not found");
/// assert!(err.trace.contains("Device: none"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct OperationError {
    /// Outward failure code.
    pub code: ErrorCode,

    /// Human-readable description.
    pub message: String,

    /// Everything the operation recorded before failing.
    pub trace: DebugTrace,
}

impl OperationError {
    pub fn new(code: ErrorCode, message: impl Into<String>, trace: DebugTrace) -> Self {
        Self {
            code,
            message: message.into(),
            trace,
        }
    }

    /// Map an internal error that ended a scan.
    ///
    /// Permission failures keep the word "permission" in the message so the
    /// host can tell them apart from an absent device.
    pub fn from_scan(err: &Error, trace: DebugTrace) -> Self {
        let message = match err {
            Error::PermissionDenied { reason } => format!("USB permission denied: {reason}"),
            other => other.to_string(),
        };
        Self::new(err.scan_code(), message, trace)
    }
}

/// Result type for inbound operations.
pub type OperationResult<T> = std::result::Result<T, OperationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_maps_to_no_device() {
        let denied = PermissionDenied::refused("user refused");
        let core: Error = denied.into();

        let err = OperationError::from_scan(&core, DebugTrace::new());
        assert_eq!(err.code, ErrorCode::NoDevice);
        assert!(err.message.contains("permission"));
    }

    #[test]
    fn test_timed_out_reason() {
        let denied = PermissionDenied::timed_out(30_000);
        assert!(denied.timed_out);
        assert_eq!(
            denied.to_string(),
            "USB permission denied: no answer within 30000ms"
        );
    }

    #[test]
    fn test_operation_error_serializes_code() {
        let err = OperationError::new(ErrorCode::CaptureEmpty, "No image captured", DebugTrace::new());
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["code"], "CAPTURE_EMPTY");
        assert_eq!(json["message"], "No image captured");
    }

    #[test]
    fn test_unexpected_errors_map_to_scan_fail() {
        let err = OperationError::from_scan(&Error::CaptureBusy, DebugTrace::new());
        assert_eq!(err.code, ErrorCode::ScanFail);
        assert_eq!(err.message, "Capture already in progress");
    }
}
