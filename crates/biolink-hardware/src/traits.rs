//! Hardware device trait definitions.
//!
//! This module defines the seams between the capture engine and the world
//! outside the process:
//!
//! - [`UsbHost`]: the OS USB surface (enumeration and permission).
//! - [`Openable`], [`Capturable`], [`Extractable`]: the capability contract
//!   every driver adapter fulfils, whether it wraps a statically known SDK
//!   revision or probes an unknown one through the
//!   [`binder`](crate::binder).
//! - [`CaptureListener`]: the four-callback interface sensors report
//!   asynchronous capture results through.
//! - [`DriverFactory`]: how a session obtains its driver.
//!
//! Driver calls are blocking. The engine runs them on the blocking pool, so
//! these traits are plain synchronous, object-safe traits.

use crate::devices::AnyDriver;
use crate::error::Result;
use crate::types::{PermissionSink, SensorSetting, SubscriptionId, UsbDeviceDescriptor};
use biolink_core::DebugTrace;
use std::sync::Arc;
use std::time::Duration;

/// OS-level USB surface.
///
/// Implementations must be callable from any thread. Permission events may
/// be delivered from any execution context, including one owned by the OS.
pub trait UsbHost: Send + Sync {
    /// Enumerate currently attached devices.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot list devices at all.
    fn devices(&self) -> Result<Vec<UsbDeviceDescriptor>>;

    /// Whether access to `device` is already granted.
    fn has_permission(&self, device: &UsbDeviceDescriptor) -> bool;

    /// Register a one-shot subscription for permission events named `action`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host refuses the registration.
    fn subscribe_permission(&self, action: &str, sink: PermissionSink) -> Result<SubscriptionId>;

    /// Remove a subscription. Unknown ids are ignored.
    fn unsubscribe_permission(&self, id: SubscriptionId);

    /// Ask the OS to grant access to `device`; the answer arrives as an
    /// event named `action`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be issued.
    fn request_permission(&self, device: &UsbDeviceDescriptor, action: &str) -> Result<()>;

    /// Whether a removable-hardware transport exists at all.
    ///
    /// Emulated and containerised hosts have no USB bus to attach to.
    fn transport_available(&self) -> bool {
        true
    }
}

/// Session lifecycle entry points.
pub trait Openable: Send + Sync {
    /// Open the sensor for `device`.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError::BindingFailed`](crate::HardwareError::BindingFailed)
    /// if no open signature matched, or the vendor failure otherwise.
    fn open(&self, device: &UsbDeviceDescriptor) -> Result<()>;

    /// Apply a sensor setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver has no entry point for the setting or
    /// the call failed. Callers treat this as non-fatal.
    fn configure(&self, setting: SensorSetting) -> Result<()>;

    /// Release sensor and service handles.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver reported a failure while releasing.
    fn close(&self) -> Result<()>;
}

/// Capture entry points.
pub trait Capturable: Send + Sync {
    /// Blocking capture that returns bytes directly, if the driver has one.
    ///
    /// `Ok(None)` means the call ran but produced nothing.
    ///
    /// # Errors
    ///
    /// Returns an error on a vendor-reported failure.
    fn capture_sync(&self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Register `listener` for asynchronous results on `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver has no listener entry point.
    fn register_listener(&self, slot: u8, listener: Arc<dyn CaptureListener>) -> Result<()>;

    /// Clear the listener registered on `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver reported a failure.
    fn clear_listener(&self, slot: u8) -> Result<()>;

    /// Start an asynchronous capture that reports through the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if no start signature matched.
    fn start_capture(&self, slot: u8, timeout: Duration) -> Result<()>;

    /// Stop an asynchronous capture. Must be safe to call when idle.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver reported a failure.
    fn stop_capture(&self, slot: u8) -> Result<()>;

    /// Alternate API family that returns a template without the image
    /// pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error on a vendor-reported failure.
    fn capture_template(&self, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

/// Feature extraction entry points.
pub trait Extractable: Send + Sync {
    /// Turn an image into a template, optionally with an explicit format
    /// code. `Ok(None)` means the entry point ran but produced nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry point does not exist or failed.
    fn extract(&self, image: &[u8], format: Option<i64>) -> Result<Option<Vec<u8>>>;

    /// Inner service object that may expose extraction when this one does
    /// not.
    fn nested_extractor(&self) -> Option<Arc<dyn Extractable>> {
        None
    }
}

/// A complete driver adapter.
pub trait SensorDriver: Openable + Capturable + Extractable {
    /// Adapter or sensor type name, for diagnostics.
    fn name(&self) -> String;

    /// Multi-line description of the driver surface, for diagnostics.
    fn describe(&self) -> String {
        self.name()
    }

    /// Take the detailed events the adapter recorded since the last call.
    ///
    /// Adapters that probe their driver keep a journal of every signature
    /// tried; the engine folds it into the operation trace.
    fn drain_journal(&self) -> DebugTrace {
        DebugTrace::new()
    }
}

/// Callback interface sensors report asynchronous results through.
///
/// Callbacks may arrive on any thread, any number of times.
pub trait CaptureListener: Send + Sync {
    /// An image (or template) was captured.
    fn on_capture_success(&self, payload: Vec<u8>);

    /// The sensor reported a capture failure code.
    fn on_capture_error(&self, code: i32);

    /// The sensor extracted a template.
    fn on_extract_success(&self, template: Vec<u8>);

    /// The sensor reported an extraction failure code.
    fn on_extract_error(&self, code: i32);
}

/// Produces the driver a session drives.
pub trait DriverFactory: Send + Sync {
    /// Whether the vendor SDK this factory needs is linked/available.
    fn sdk_available(&self) -> bool;

    /// Construct service and sensor objects for `device`. Does not open.
    ///
    /// # Errors
    ///
    /// Returns an error if no service or sensor could be constructed.
    fn create(&self, device: &UsbDeviceDescriptor, trace: &mut DebugTrace) -> Result<AnyDriver>;
}
