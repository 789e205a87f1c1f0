//! Scriptable [`Probe`] for exercising the binder and the adaptive driver.

use crate::binder::{InvokeError, Member, ParamKind, Probe, Value, render_args};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

type Handler = Arc<dyn Fn(&[Value]) -> Result<Value, InvokeError> + Send + Sync>;

/// Driver object with a fixed member list and closure-backed behaviour.
///
/// Every invocation is logged as `name(Kinds...)` so tests can assert on
/// which signatures the binder actually called.
///
/// # Examples
///
/// ```
/// use biolink_hardware::binder::{Member, ParamKind, Probe, Value};
/// use biolink_hardware::mock::MockProbe;
///
/// let sensor = MockProbe::builder("FingerprintSensor")
///     .member("open", vec![], Some(ParamKind::Bool), |_| Ok(Value::Bool(true)))
///     .build();
///
/// let open = Member::new("open", vec![]).returning(ParamKind::Bool);
/// assert_eq!(sensor.invoke(&open, &[]), Ok(Value::Bool(true)));
/// assert_eq!(sensor.calls(), vec!["open()".to_string()]);
/// ```
pub struct MockProbe {
    type_name: String,
    members: Vec<(Member, Handler)>,
    calls: Mutex<Vec<String>>,
}

impl MockProbe {
    /// Start describing a probe with the given type name.
    pub fn builder(type_name: impl Into<String>) -> MockProbeBuilder {
        MockProbeBuilder {
            type_name: type_name.into(),
            members: Vec::new(),
        }
    }

    /// Every invocation so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of invocations of members named `name`.
    pub fn call_count(&self, name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split('(').next() == Some(name))
            .count()
    }
}

impl Probe for MockProbe {
    fn type_name(&self) -> String {
        self.type_name.clone()
    }

    fn members(&self) -> Vec<Member> {
        self.members.iter().map(|(m, _)| m.clone()).collect()
    }

    fn invoke(&self, member: &Member, args: &[Value]) -> Result<Value, InvokeError> {
        let (_, handler) = self
            .members
            .iter()
            .find(|(m, _)| m == member)
            .ok_or_else(|| InvokeError::NoSuchMember(member.signature()))?;

        if args.len() != member.arity() {
            return Err(InvokeError::ArgumentMismatch {
                member: member.name.clone(),
                detail: format!("expected {} arguments, got {}", member.arity(), args.len()),
            });
        }

        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{}{}", member.name, render_args(args)));
        handler(args)
    }
}

impl fmt::Debug for MockProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProbe")
            .field("type_name", &self.type_name)
            .field("members", &self.members().iter().map(Member::signature).collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`MockProbe`].
pub struct MockProbeBuilder {
    type_name: String,
    members: Vec<(Member, Handler)>,
}

impl MockProbeBuilder {
    /// Add a member and the closure that runs when it is invoked.
    pub fn member<F>(
        mut self,
        name: impl Into<String>,
        params: Vec<ParamKind>,
        returns: Option<ParamKind>,
        handler: F,
    ) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, InvokeError> + Send + Sync + 'static,
    {
        let mut member = Member::new(name, params);
        member.returns = returns;
        self.members.push((member, Arc::new(handler)));
        self
    }

    /// Finish the probe.
    pub fn build(self) -> Arc<MockProbe> {
        Arc::new(MockProbe {
            type_name: self.type_name,
            members: self.members,
            calls: Mutex::new(Vec::new()),
        })
    }
}
