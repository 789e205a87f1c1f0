use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error codes surfaced to the host application.
///
/// These are the only failure identifiers that cross the call bridge. They
/// serialize as their wire names (`"NO_DEVICE"`, `"CAPTURE_EMPTY"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No matching device attached, or access permission was refused.
    NoDevice,
    /// No removable-hardware transport available (e.g. emulated host).
    NoOtg,
    /// Every capture path came back without bytes before the deadline.
    CaptureEmpty,
    /// An image was captured but no extractor produced a template.
    ExtractFail,
    /// Unexpected failure while scanning.
    ScanFail,
    /// Verify input could not be decoded.
    VerifyInvalid,
    /// Unexpected failure while verifying.
    VerifyFail,
}

impl ErrorCode {
    /// Wire name of the code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoDevice => "NO_DEVICE",
            Self::NoOtg => "NO_OTG",
            Self::CaptureEmpty => "CAPTURE_EMPTY",
            Self::ExtractFail => "EXTRACT_FAIL",
            Self::ScanFail => "SCAN_FAIL",
            Self::VerifyInvalid => "VERIFY_INVALID",
            Self::VerifyFail => "VERIFY_FAIL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    // Discovery errors
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("USB transport unavailable: {0}")]
    TransportUnavailable(String),

    // Permission errors
    #[error("USB permission denied: {reason}")]
    PermissionDenied { reason: String },

    // Binding errors
    #[error("No entry point matched for {operation}")]
    BindingFailed {
        operation: String,
        attempted: Vec<String>,
    },

    // Session errors
    #[error("Device detached: {0}")]
    DeviceDetached(String),

    #[error("No open session")]
    SessionClosed,

    #[error("Invalid session transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Capture errors
    #[error("Capture timed out after {0}ms")]
    CaptureTimeout(u64),

    #[error("Capture already in progress")]
    CaptureBusy,

    #[error("Hardware operation failed: {0}")]
    HardwareError(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map an internal error onto the outward code used when it ends a scan.
    #[must_use]
    pub fn scan_code(&self) -> ErrorCode {
        match self {
            Self::DeviceNotFound(_) | Self::PermissionDenied { .. } => ErrorCode::NoDevice,
            Self::TransportUnavailable(_) => ErrorCode::NoOtg,
            _ => ErrorCode::ScanFail,
        }
    }

    /// Whether a capture loop may retry after this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::CaptureTimeout(_) | Self::HardwareError(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorCode::NoDevice, "NO_DEVICE")]
    #[case(ErrorCode::NoOtg, "NO_OTG")]
    #[case(ErrorCode::CaptureEmpty, "CAPTURE_EMPTY")]
    #[case(ErrorCode::ExtractFail, "EXTRACT_FAIL")]
    #[case(ErrorCode::ScanFail, "SCAN_FAIL")]
    #[case(ErrorCode::VerifyInvalid, "VERIFY_INVALID")]
    #[case(ErrorCode::VerifyFail, "VERIFY_FAIL")]
    fn test_error_code_wire_names(#[case] code: ErrorCode, #[case] expected: &str) {
        assert_eq!(code.as_str(), expected);
        assert_eq!(code.to_string(), expected);

        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, format!("\"{expected}\""));
    }

    #[test]
    fn test_scan_code_mapping() {
        assert_eq!(
            Error::DeviceNotFound("none".into()).scan_code(),
            ErrorCode::NoDevice
        );
        assert_eq!(
            Error::PermissionDenied {
                reason: "denied".into()
            }
            .scan_code(),
            ErrorCode::NoDevice
        );
        assert_eq!(
            Error::TransportUnavailable("emulator".into()).scan_code(),
            ErrorCode::NoOtg
        );
        assert_eq!(Error::CaptureBusy.scan_code(), ErrorCode::ScanFail);
    }

    #[test]
    fn test_transient_errors() {
        assert!(Error::CaptureTimeout(1600).is_transient());
        assert!(Error::HardwareError("code -8".into()).is_transient());
        assert!(!Error::DeviceDetached("SLK20R".into()).is_transient());
        assert!(!Error::SessionClosed.is_transient());
    }

    #[test]
    fn test_permission_display() {
        let err = Error::PermissionDenied {
            reason: "user refused".into(),
        };
        assert_eq!(err.to_string(), "USB permission denied: user refused");
    }
}
