//! Error types for hardware operations.
//!
//! This module defines error types specific to device-facing operations:
//! USB host failures, driver entry points that could not be bound,
//! disconnections, timeouts, and vendor-reported capture/extract codes.

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur during hardware device operations.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Device is not connected or has been disconnected.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// Operation timed out after specified duration.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The driver exposes no entry point for this operation.
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// No candidate signature could be bound for an operation.
    #[error("No entry point matched for {operation} ({} signatures tried)", attempted.len())]
    BindingFailed {
        operation: String,
        attempted: Vec<String>,
    },

    /// USB host (enumeration, permission) failure.
    #[error("USB host error: {message}")]
    Usb { message: String },

    /// Access to the device was refused by the OS.
    #[error("Permission denied: {device}")]
    PermissionDenied { device: String },

    /// Device initialization failed.
    #[error("Initialization failed: {message}")]
    InitializationFailed { message: String },

    /// Device configuration error.
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// The sensor reported a capture failure code.
    #[error("Biometric capture error: {message}")]
    BiometricCaptureError { message: String },

    /// The sensor or service reported an extraction failure code.
    #[error("Template extraction error: {message}")]
    ExtractionError { message: String },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with custom message.
    #[error("{0}")]
    Other(String),
}

impl HardwareError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a new binding failure listing the signatures that were tried.
    pub fn binding_failed(operation: impl Into<String>, attempted: Vec<String>) -> Self {
        Self::BindingFailed {
            operation: operation.into(),
            attempted,
        }
    }

    /// Create a new USB host error.
    pub fn usb(message: impl Into<String>) -> Self {
        Self::Usb {
            message: message.into(),
        }
    }

    /// Create a new permission denied error.
    pub fn permission_denied(device: impl Into<String>) -> Self {
        Self::PermissionDenied {
            device: device.into(),
        }
    }

    /// Create a new initialization failed error.
    pub fn initialization_failed(message: impl Into<String>) -> Self {
        Self::InitializationFailed {
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Create a new biometric capture error.
    pub fn biometric_capture(message: impl Into<String>) -> Self {
        Self::BiometricCaptureError {
            message: message.into(),
        }
    }

    /// Create a new extraction error.
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::ExtractionError {
            message: message.into(),
        }
    }

    /// Create a generic error with custom message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Whether retrying the same operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::BiometricCaptureError { .. } | Self::ExtractionError { .. }
        )
    }
}

impl From<HardwareError> for biolink_core::Error {
    fn from(err: HardwareError) -> Self {
        match err {
            HardwareError::Disconnected { device } => Self::DeviceDetached(device),
            HardwareError::Timeout { duration_ms } => Self::CaptureTimeout(duration_ms),
            HardwareError::BindingFailed {
                operation,
                attempted,
            } => Self::BindingFailed {
                operation,
                attempted,
            },
            HardwareError::PermissionDenied { device } => Self::PermissionDenied {
                reason: format!("access to {device} refused"),
            },
            HardwareError::Io(e) => Self::Io(e),
            other => Self::HardwareError(other.to_string()),
        }
    }
}
