//! Capability binder for driver objects of unknown shape.
//!
//! Vendor SDK revisions disagree on method names, arity and parameter types
//! for the same operation. A driver object is therefore described at runtime
//! as a [`Probe`]: a type name plus a list of [`Member`]s with typed
//! parameters. The binder locates and invokes the best-matching member for a
//! high-level operation by walking a ranked list of candidate names and
//! argument sets.
//!
//! Two strategies are provided:
//!
//! - [`invoke_best_match`]: first non-failing call wins. Exact-arity,
//!   type-compatible members are tried for every candidate name before any
//!   coerced call is attempted.
//! - [`invoke_until`]: tries every argument combination against every
//!   same-arity member and stops at the first result the caller accepts
//!   (used for open/start, where a returned `false` or `-1` means "keep
//!   looking").
//!
//! Neither strategy ever returns an error: a binding that fails is simply
//! `None`, and the attempted signatures land in a [`DebugTrace`].
//!
//! # Examples
//!
//! ```
//! use biolink_hardware::binder::{invoke_best_match, ParamKind, Value};
//! use biolink_hardware::mock::MockProbe;
//!
//! let sensor = MockProbe::builder("FingerprintSensor")
//!     .member("setTimeout", vec![ParamKind::Int], None, |_| Ok(Value::Unit))
//!     .build();
//!
//! let result = invoke_best_match(sensor.as_ref(), &["setTimeOut", "setTimeout"], &[Value::Int(10_000)]);
//! assert_eq!(result, Some(Value::Unit));
//! ```

use crate::traits::CaptureListener;
use crate::types::{HostHandle, RgbImage, UsbDeviceDescriptor};
use biolink_core::DebugTrace;
use std::fmt;
use std::sync::Arc;

/// Dynamically typed argument or return value.
#[derive(Clone)]
pub enum Value {
    /// No value (`void`).
    Unit,

    /// Null reference.
    Null,

    /// Boolean.
    Bool(bool),

    /// Integer of any width.
    Int(i64),

    /// String.
    Str(String),

    /// Byte array or byte buffer.
    Bytes(Vec<u8>),

    /// Bitmap image.
    Bitmap(RgbImage),

    /// Host-side handle (context, manager, device).
    Handle(HostHandle),

    /// Callback object.
    Listener(Arc<dyn CaptureListener>),

    /// Opaque driver object that can itself be probed.
    Object(Arc<dyn Probe>),
}

impl Value {
    /// Short type label used in signatures and trace lines.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Unit => "void",
            Self::Null => "null",
            Self::Bool(_) => "Bool",
            Self::Int(_) => "Int",
            Self::Str(_) => "String",
            Self::Bytes(_) => "Bytes",
            Self::Bitmap(_) => "Bitmap",
            Self::Handle(HostHandle::Context) => "Context",
            Self::Handle(HostHandle::Manager) => "UsbManager",
            Self::Handle(HostHandle::Device(_)) => "UsbDevice",
            Self::Listener(_) => "Listener",
            Self::Object(_) => "Object",
        }
    }

    /// Whether this value reads as a successful call status.
    ///
    /// `true` and `0` are success, `false` and any other integer are
    /// failure. Anything else, including `void`, counts as success.
    pub fn is_success_indicator(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(code) => *code == 0,
            _ => true,
        }
    }

    /// Borrow the bytes of a `Bytes` value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => f.write_str("Unit"),
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(i) => write!(f, "Int({i})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::Bytes(b) => write!(f, "Bytes(len={})", b.len()),
            Self::Bitmap(img) => write!(f, "Bitmap({}x{})", img.width, img.height),
            Self::Handle(h) => write!(f, "Handle({h:?})"),
            Self::Listener(_) => f.write_str("Listener(..)"),
            Self::Object(obj) => write!(f, "Object({})", obj.type_name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unit, Self::Unit) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Bitmap(a), Self::Bitmap(b)) => a == b,
            (Self::Handle(a), Self::Handle(b)) => a == b,
            (Self::Listener(a), Self::Listener(b)) => Arc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Declared parameter (or return) type of a [`Member`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Bool,
    Int,
    Str,
    Bytes,
    Bitmap,
    Context,
    Manager,
    Device,
    Listener,
    Object,
    Any,
}

impl ParamKind {
    /// Whether `value` can be passed unchanged for this parameter.
    ///
    /// Reference-typed parameters accept `Null`; primitives do not.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Any, _) => true,
            (Self::Bool | Self::Int, Value::Null) => false,
            (_, Value::Null) => true,
            (Self::Bool, Value::Bool(_)) => true,
            (Self::Int, Value::Int(_)) => true,
            (Self::Str, Value::Str(_)) => true,
            (Self::Bytes, Value::Bytes(_)) => true,
            (Self::Bitmap, Value::Bitmap(_)) => true,
            (Self::Context, Value::Handle(HostHandle::Context)) => true,
            (Self::Manager, Value::Handle(HostHandle::Manager)) => true,
            (Self::Device, Value::Handle(HostHandle::Device(_))) => true,
            (Self::Listener, Value::Listener(_)) => true,
            (Self::Object, Value::Object(_) | Value::Bitmap(_) | Value::Bytes(_)) => true,
            _ => false,
        }
    }

    /// Value used for a missing trailing parameter during coercion.
    pub fn default_value(&self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Int => Value::Int(0),
            Self::Str => Value::Str(String::new()),
            Self::Bytes => Value::Bytes(Vec::new()),
            _ => Value::Null,
        }
    }

    /// Best-effort conversion of `value` to this kind.
    fn coerce(&self, value: &Value) -> Option<Value> {
        if self.accepts(value) {
            return Some(value.clone());
        }
        match (self, value) {
            (Self::Int, Value::Bool(b)) => Some(Value::Int(i64::from(*b))),
            (Self::Bool, Value::Int(i)) => Some(Value::Bool(*i != 0)),
            (Self::Str, Value::Bool(b)) => Some(Value::Str(b.to_string())),
            (Self::Str, Value::Int(i)) => Some(Value::Str(i.to_string())),
            (Self::Int, Value::Str(s)) => s.trim().parse().ok().map(Value::Int),
            _ => None,
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "Bool",
            Self::Int => "Int",
            Self::Str => "String",
            Self::Bytes => "Bytes",
            Self::Bitmap => "Bitmap",
            Self::Context => "Context",
            Self::Manager => "UsbManager",
            Self::Device => "UsbDevice",
            Self::Listener => "Listener",
            Self::Object => "Object",
            Self::Any => "Any",
        };
        f.write_str(name)
    }
}

/// One invocable member of a [`Probe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Member name as declared by the driver.
    pub name: String,

    /// Declared parameter types.
    pub params: Vec<ParamKind>,

    /// Declared return type; `None` for `void`.
    pub returns: Option<ParamKind>,
}

impl Member {
    /// Create a `void` member.
    pub fn new(name: impl Into<String>, params: Vec<ParamKind>) -> Self {
        Self {
            name: name.into(),
            params,
            returns: None,
        }
    }

    /// Set the declared return type.
    pub fn returning(mut self, kind: ParamKind) -> Self {
        self.returns = Some(kind);
        self
    }

    /// Number of declared parameters.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Case-insensitive name comparison.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Whether `args` fit the declared parameters without conversion.
    pub fn accepts(&self, args: &[Value]) -> bool {
        self.params.len() == args.len()
            && self.params.iter().zip(args).all(|(p, a)| p.accepts(a))
    }

    /// Fit `args` to the declared parameters: pad missing trailing
    /// parameters with defaults, drop extra arguments, convert between
    /// bool, int and string.
    pub fn coerce(&self, args: &[Value]) -> Option<Vec<Value>> {
        self.params
            .iter()
            .enumerate()
            .map(|(i, param)| match args.get(i) {
                Some(arg) => param.coerce(arg),
                None => Some(param.default_value()),
            })
            .collect()
    }

    /// Rendered signature, e.g. `openDevice(Int, Int) -> Int`.
    pub fn signature(&self) -> String {
        let params = self
            .params
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let ret = self
            .returns
            .map_or_else(|| "void".to_string(), |r| r.to_string());
        format!("{}({}) -> {}", self.name, params, ret)
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// Failure raised by a single member invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    /// The probe has no such member.
    #[error("no such member: {0}")]
    NoSuchMember(String),

    /// The arguments did not fit the member.
    #[error("argument mismatch for {member}: {detail}")]
    ArgumentMismatch { member: String, detail: String },

    /// The member ran and raised.
    #[error("{member} raised: {message}")]
    Raised { member: String, message: String },
}

impl InvokeError {
    /// Create a raised error.
    pub fn raised(member: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Raised {
            member: member.into(),
            message: message.into(),
        }
    }
}

/// A driver object (or class) described at runtime.
///
/// Classes are modelled as probes too: constructors are members named
/// [`CONSTRUCTOR`] and static factory methods are ordinary members.
pub trait Probe: Send + Sync {
    /// Fully qualified type name.
    fn type_name(&self) -> String;

    /// All invocable members.
    fn members(&self) -> Vec<Member>;

    /// Invoke `member` with `args`.
    ///
    /// # Errors
    ///
    /// Returns an [`InvokeError`] if the member does not exist, the
    /// arguments do not fit, or the call itself raised.
    fn invoke(&self, member: &Member, args: &[Value]) -> Result<Value, InvokeError>;
}

/// Member name used for constructors on class probes.
pub const CONSTRUCTOR: &str = "<init>";

/// Successful binding.
#[derive(Debug, Clone)]
pub struct BindHit {
    /// Member that was invoked.
    pub member: Member,

    /// Arguments actually passed (after coercion).
    pub args: Vec<Value>,

    /// Returned value.
    pub value: Value,

    /// Whether argument coercion was needed.
    pub coerced: bool,
}

/// Render the argument types of a call, e.g. `(Int, Bool)`.
pub fn render_args(args: &[Value]) -> String {
    let kinds = args.iter().map(Value::kind_name).collect::<Vec<_>>();
    format!("({})", kinds.join(", "))
}

fn members_named(target: &dyn Probe, name: &str) -> Vec<Member> {
    target
        .members()
        .into_iter()
        .filter(|m| m.is_named(name))
        .collect()
}

/// Invoke the first member among `names` that accepts `args` and does not
/// fail, returning its value.
///
/// See [`bind`] for the search order.
pub fn invoke_best_match(target: &dyn Probe, names: &[&str], args: &[Value]) -> Option<Value> {
    bind(target, names, args).map(|hit| hit.value)
}

/// Locate and invoke the best-matching member.
///
/// For every candidate name in order, exact-arity members whose declared
/// parameters accept `args` are invoked first. Only when none of those
/// succeed for any name are same-named members retried with coerced
/// arguments. Names compare case-insensitively. The first call that does
/// not raise wins, whatever it returns.
pub fn bind(target: &dyn Probe, names: &[&str], args: &[Value]) -> Option<BindHit> {
    if let Some(hit) = bind_exact(target, names, args) {
        return Some(hit);
    }

    for name in names {
        for member in members_named(target, name) {
            if member.accepts(args) {
                continue;
            }
            let Some(coerced) = member.coerce(args) else {
                continue;
            };
            if let Ok(value) = target.invoke(&member, &coerced) {
                tracing::trace!(
                    member = %member.signature(),
                    "bound with coerced arguments"
                );
                return Some(BindHit {
                    member,
                    args: coerced,
                    value,
                    coerced: true,
                });
            }
        }
    }

    None
}

/// The exact-arity half of [`bind`]: only members whose declared
/// parameters accept `args` as given are invoked.
pub fn bind_exact(target: &dyn Probe, names: &[&str], args: &[Value]) -> Option<BindHit> {
    for name in names {
        for member in members_named(target, name) {
            if !member.accepts(args) {
                continue;
            }
            if let Ok(value) = target.invoke(&member, args) {
                return Some(BindHit {
                    member,
                    args: args.to_vec(),
                    value,
                    coerced: false,
                });
            }
        }
    }
    None
}

/// Invoke same-arity members for every combination in `combos` until one
/// returns a value `accept` agrees with.
///
/// Members are visited in candidate-name order, and for each member every
/// argument combination is tried in order. Every invocation is journaled,
/// including rejected and raised ones, so a failed binding leaves a full
/// record of what was attempted.
pub fn invoke_until<F>(
    target: &dyn Probe,
    operation: &str,
    names: &[&str],
    combos: &[Vec<Value>],
    accept: F,
    journal: &mut DebugTrace,
) -> Option<BindHit>
where
    F: Fn(&Value) -> bool,
{
    for name in names {
        for member in members_named(target, name) {
            for args in combos {
                if !member.accepts(args) {
                    continue;
                }
                match target.invoke(&member, args) {
                    Ok(value) => {
                        let accepted = accept(&value);
                        journal.push(format!(
                            "{operation} {}{} → {:?}{}",
                            member.name,
                            render_args(args),
                            value,
                            if accepted { "" } else { " (rejected)" }
                        ));
                        if accepted {
                            return Some(BindHit {
                                member,
                                args: args.clone(),
                                value,
                                coerced: false,
                            });
                        }
                    }
                    Err(err) => {
                        journal.push(format!(
                            "{operation} {}{} raised: {err}",
                            member.name,
                            render_args(args)
                        ));
                    }
                }
            }
        }
    }
    None
}

/// Argument combinations tried, in order, when opening a sensor for
/// `device`.
pub fn open_argument_sets(device: &UsbDeviceDescriptor) -> Vec<Vec<Value>> {
    let ctx = || Value::Handle(HostHandle::Context);
    let mgr = || Value::Handle(HostHandle::Manager);
    let dev = || Value::Handle(HostHandle::Device(device.clone()));
    let vid = || Value::Int(i64::from(device.vendor_id));
    let pid = || Value::Int(i64::from(device.product_id));

    vec![
        vec![],
        vec![ctx()],
        vec![mgr()],
        vec![dev()],
        vec![vid(), pid()],
        vec![pid(), vid()],
        vec![pid()],
        vec![vid()],
        vec![Value::Int(0)],
        vec![Value::Int(1)],
        vec![ctx(), dev()],
        vec![ctx(), mgr()],
        vec![ctx(), vid(), pid()],
        vec![ctx(), pid()],
        vec![mgr(), dev()],
        vec![mgr(), vid(), pid()],
        vec![dev(), mgr()],
        vec![dev(), ctx()],
        vec![mgr(), dev(), ctx()],
        vec![ctx(), mgr(), dev()],
        vec![dev(), mgr(), ctx()],
    ]
}

/// Render the members of `target` whose names contain any of `filters`
/// (case-insensitive), one signature per line. An empty filter list
/// renders every member.
pub fn describe_members(target: &dyn Probe, filters: &[&str]) -> String {
    let mut out = format!("Available methods on {}:", target.type_name());
    for member in target.members() {
        let lower = member.name.to_lowercase();
        if filters.is_empty() || filters.iter().any(|f| lower.contains(&f.to_lowercase())) {
            out.push_str("\n  ");
            out.push_str(&member.signature());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProbe;
    use rstest::rstest;

    fn device() -> UsbDeviceDescriptor {
        UsbDeviceDescriptor::new("/dev/bus/usb/001/004", 0x1B55, 0x0120)
    }

    #[rstest]
    #[case(Value::Bool(true), true)]
    #[case(Value::Bool(false), false)]
    #[case(Value::Int(0), true)]
    #[case(Value::Int(-1), false)]
    #[case(Value::Int(1), false)]
    #[case(Value::Unit, true)]
    #[case(Value::Null, true)]
    #[case(Value::Str("ok".into()), true)]
    fn test_success_indicator(#[case] value: Value, #[case] expected: bool) {
        assert_eq!(value.is_success_indicator(), expected);
    }

    #[rstest]
    #[case(ParamKind::Int, Value::Bool(true), Some(Value::Int(1)))]
    #[case(ParamKind::Bool, Value::Int(0), Some(Value::Bool(false)))]
    #[case(ParamKind::Bool, Value::Int(7), Some(Value::Bool(true)))]
    #[case(ParamKind::Str, Value::Int(500), Some(Value::Str("500".into())))]
    #[case(ParamKind::Int, Value::Str(" 42 ".into()), Some(Value::Int(42)))]
    #[case(ParamKind::Int, Value::Bytes(vec![1]), None)]
    #[case(ParamKind::Context, Value::Int(1), None)]
    fn test_param_coercion(
        #[case] kind: ParamKind,
        #[case] input: Value,
        #[case] expected: Option<Value>,
    ) {
        assert_eq!(kind.coerce(&input), expected);
    }

    #[test]
    fn test_bind_exact_skips_coercible_members() {
        let target = MockProbe::builder("FingerprintSensor")
            .member("getTemplate", vec![ParamKind::Int], Some(ParamKind::Bytes), |_| {
                Ok(Value::Bytes(vec![1; 4]))
            })
            .build();

        assert!(bind_exact(target.as_ref(), &["getTemplate"], &[]).is_none());
        assert_eq!(target.call_count("getTemplate"), 0);

        let hit = bind(target.as_ref(), &["getTemplate"], &[]).unwrap();
        assert!(hit.coerced);
        assert_eq!(hit.args, vec![Value::Int(0)]);
    }

    #[test]
    fn test_member_coerce_pads_and_drops() {
        let member = Member::new("start", vec![ParamKind::Int, ParamKind::Bool]);
        assert_eq!(
            member.coerce(&[Value::Int(1600)]),
            Some(vec![Value::Int(1600), Value::Bool(false)])
        );

        let member = Member::new("stop", vec![]);
        assert_eq!(member.coerce(&[Value::Int(1)]), Some(vec![]));
    }

    #[test]
    fn test_null_only_fits_reference_params() {
        assert!(ParamKind::Listener.accepts(&Value::Null));
        assert!(ParamKind::Bytes.accepts(&Value::Null));
        assert!(!ParamKind::Int.accepts(&Value::Null));
        assert!(!ParamKind::Bool.accepts(&Value::Null));
    }

    #[test]
    fn test_signature_rendering() {
        let member = Member::new("openDevice", vec![ParamKind::Int, ParamKind::Int])
            .returning(ParamKind::Int);
        assert_eq!(member.signature(), "openDevice(Int, Int) -> Int");
        assert_eq!(Member::new("close", vec![]).signature(), "close() -> void");
    }

    #[test]
    fn test_exact_arity_preferred_across_names() {
        let probe = MockProbe::builder("Sensor")
            .member("capture", vec![], Some(ParamKind::Bytes), |_| {
                Ok(Value::Bytes(vec![0]))
            })
            .member("getImage", vec![ParamKind::Int], Some(ParamKind::Bytes), |_| {
                Ok(Value::Bytes(vec![1]))
            })
            .build();

        // capture() would fit after dropping the argument, but getImage(Int)
        // fits exactly and wins.
        let hit = bind(probe.as_ref(), &["capture", "getImage"], &[Value::Int(1600)]).unwrap();
        assert_eq!(hit.member.name, "getImage");
        assert!(!hit.coerced);
    }

    #[test]
    fn test_falls_back_to_coercion() {
        let probe = MockProbe::builder("Sensor")
            .member("setLed", vec![ParamKind::Int], None, |args| {
                assert_eq!(args, &[Value::Int(1)]);
                Ok(Value::Unit)
            })
            .build();

        let hit = bind(probe.as_ref(), &["setLED"], &[Value::Bool(true)]).unwrap();
        assert!(hit.coerced);
        assert_eq!(hit.value, Value::Unit);
    }

    #[test]
    fn test_raising_member_is_skipped() {
        let probe = MockProbe::builder("Sensor")
            .member("close", vec![], None, |_| Err(InvokeError::raised("close", "busy")))
            .member("release", vec![], None, |_| Ok(Value::Unit))
            .build();

        let hit = bind(probe.as_ref(), &["close", "release"], &[]).unwrap();
        assert_eq!(hit.member.name, "release");
    }

    #[test]
    fn test_no_match_returns_none() {
        let probe = MockProbe::builder("Sensor").build();
        assert_eq!(invoke_best_match(probe.as_ref(), &["open"], &[]), None);
    }

    #[test]
    fn test_open_argument_sets_order() {
        let sets = open_argument_sets(&device());
        assert_eq!(sets.len(), 21);
        assert!(sets[0].is_empty());
        assert_eq!(sets[4], vec![Value::Int(0x1B55), Value::Int(0x0120)]);
        assert_eq!(sets[5], vec![Value::Int(0x0120), Value::Int(0x1B55)]);
        assert_eq!(sets[8], vec![Value::Int(0)]);
        assert_eq!(sets[20].len(), 3);
    }

    #[test]
    fn test_invoke_until_skips_rejected_results() {
        let probe = MockProbe::builder("Sensor")
            .member("openDevice", vec![ParamKind::Int], Some(ParamKind::Int), |args| {
                // Only index 1 opens.
                match args {
                    [Value::Int(1)] => Ok(Value::Int(0)),
                    _ => Ok(Value::Int(-1)),
                }
            })
            .build();

        let mut journal = DebugTrace::new();
        let hit = invoke_until(
            probe.as_ref(),
            "open",
            &["open", "openDevice"],
            &open_argument_sets(&device()),
            Value::is_success_indicator,
            &mut journal,
        )
        .unwrap();

        assert_eq!(hit.args, vec![Value::Int(1)]);
        assert_eq!(journal.count("(rejected)"), 3);
    }

    #[test]
    fn test_describe_members_filters() {
        let probe = MockProbe::builder("com.zkteco.FingerprintSensor")
            .member("open", vec![ParamKind::Int], Some(ParamKind::Bool), |_| Ok(Value::Bool(true)))
            .member("setTimeout", vec![ParamKind::Int], None, |_| Ok(Value::Unit))
            .build();

        let text = describe_members(probe.as_ref(), &["open"]);
        assert!(text.starts_with("Available methods on com.zkteco.FingerprintSensor:"));
        assert!(text.contains("open(Int) -> Bool"));
        assert!(!text.contains("setTimeout"));
    }
}
