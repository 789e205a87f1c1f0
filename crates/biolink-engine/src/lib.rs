//! Capture engine for USB fingerprint sensors.
//!
//! This crate owns everything between an inbound call and the driver
//! traits in `biolink-hardware`:
//!
//! - [`locator`]: pick the sensor among attached devices
//! - [`permission`]: negotiate access with a bounded wait
//! - [`session`]: open/close lifecycle, driven by a [`StateMachine`]
//! - [`capture`]: the multi-path capture retry loop
//! - [`extractor`]: image to template fallback chain
//! - [`service`]: the inbound operations, each run as its own task
//!
//! Every operation records a [`DebugTrace`](biolink_core::DebugTrace) that
//! travels back with its result or its [`OperationError`].

pub mod capture;
pub mod config;
pub mod error;
pub mod extractor;
pub mod locator;
pub mod matcher;
pub mod permission;
pub mod service;
pub mod session;
pub mod state_machine;

pub use capture::{CaptureErrorKind, CaptureOrchestrator, CaptureResult};
pub use config::{DriverMode, ServiceConfig};
pub use error::{OperationError, OperationResult, PermissionDenied};
pub use extractor::TemplateExtractor;
pub use locator::{DeviceLocator, MatchReason};
pub use matcher::{FnMatcher, TemplateMatcher};
pub use permission::PermissionBroker;
pub use service::{BiometricService, BiometricServiceBuilder, Diagnosis, VerifyResult};
pub use session::{ActiveSession, SessionManager};
pub use state_machine::{SessionState, StateMachine, StateTransition};
