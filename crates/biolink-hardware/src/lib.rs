//! Hardware abstraction layer for USB biometric capture peripherals.
//!
//! This crate sits between the capture engine and everything it cannot
//! control: the OS USB surface and a vendor sensor SDK whose method names,
//! signatures and callback shapes differ between revisions.
//!
//! # Design Philosophy
//!
//! - **Capability traits**: every driver adapter implements [`Openable`],
//!   [`Capturable`] and [`Extractable`], whether it wraps a statically known
//!   SDK or probes an unknown one.
//! - **Blocking, object-safe**: vendor calls block. The traits are plain
//!   synchronous traits and the engine runs them on the blocking pool.
//! - **Thread-safe**: all traits require `Send + Sync`; sensor callbacks may
//!   arrive on any thread.
//! - **Never guess silently**: bindings that fail return `None` or a
//!   [`HardwareError::BindingFailed`] listing what was attempted.
//!
//! # Components
//!
//! ## USB host
//!
//! The [`UsbHost`] trait covers enumeration and permission negotiation. A
//! libusb-backed implementation lives in `biolink-usb`; [`mock::MockUsbHost`]
//! is a scriptable stand-in.
//!
//! ## Capability binder
//!
//! [`binder`] describes driver objects at runtime as [`Probe`]s and
//! locates the best-matching member for an operation:
//!
//! ```
//! use biolink_hardware::binder::{invoke_until, open_argument_sets, ParamKind, Value};
//! use biolink_hardware::mock::MockProbe;
//! use biolink_hardware::types::UsbDeviceDescriptor;
//! use biolink_core::DebugTrace;
//!
//! let sensor = MockProbe::builder("FingerprintSensor")
//!     .member("openDevice", vec![ParamKind::Int, ParamKind::Int], Some(ParamKind::Int), |_| {
//!         Ok(Value::Int(0))
//!     })
//!     .build();
//!
//! let device = UsbDeviceDescriptor::new("usb-1", 0x1B55, 0x0120);
//! let mut journal = DebugTrace::new();
//! let hit = invoke_until(
//!     sensor.as_ref(),
//!     "open",
//!     &["open", "openDevice"],
//!     &open_argument_sets(&device),
//!     Value::is_success_indicator,
//!     &mut journal,
//! );
//!
//! assert_eq!(hit.map(|h| h.args), Some(vec![Value::Int(0x1B55), Value::Int(0x0120)]));
//! ```
//!
//! ## Adaptive driver
//!
//! [`adaptive::AdaptiveFactory`] constructs service and sensor objects from
//! a [`adaptive::ProbeRegistry`] and wraps them in an
//! [`adaptive::AdaptiveDriver`].
//!
//! ## Listener bridge
//!
//! [`listener::ListenerBridge`] turns the four-callback sensor listener into
//! one awaitable outcome with first-delivery-wins semantics.
//!
//! # Error Handling
//!
//! All operations return [`Result<T>`][error::Result] which uses the
//! [`HardwareError`] error type. It converts into `biolink_core::Error`
//! at the engine boundary.
//!
//! [`Openable`]: traits::Openable
//! [`Capturable`]: traits::Capturable
//! [`Extractable`]: traits::Extractable
//! [`UsbHost`]: traits::UsbHost
//! [`Probe`]: binder::Probe

pub mod adaptive;
pub mod binder;
pub mod devices;
pub mod error;
pub mod listener;
pub mod mock;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use devices::{AnyDriver, FixedFactory};
pub use error::{HardwareError, Result};
pub use listener::{ListenerBridge, ListenerOutcome, ListenerWait};
pub use traits::{
    CaptureListener, Capturable, DriverFactory, Extractable, Openable, SensorDriver, UsbHost,
};
pub use types::{
    HostHandle, PermissionEvent, PermissionSink, RgbImage, SensorSetting, SubscriptionId,
    UsbDeviceDescriptor,
};
