//! Adaptive driver: drives a sensor SDK whose exact surface is unknown.
//!
//! The [`AdaptiveFactory`] locates the vendor service and sensor classes in a
//! [`ProbeRegistry`], constructs them, and hands back an [`AdaptiveDriver`]
//! that implements the capability traits by walking ranked candidate
//! name/argument lists through the [`binder`](crate::binder).
//!
//! Every signature tried is recorded in the driver's journal, which the
//! engine drains into the operation trace after each call.

use crate::binder::{
    self, BindHit, CONSTRUCTOR, Member, ParamKind, Probe, Value, describe_members, invoke_until,
    open_argument_sets,
};
use crate::devices::AnyDriver;
use crate::error::{HardwareError, Result};
use crate::traits::{
    CaptureListener, Capturable, DriverFactory, Extractable, Openable, SensorDriver,
};
use crate::types::{HostHandle, SensorSetting, UsbDeviceDescriptor};
use biolink_core::DebugTrace;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const OPEN_NAMES: &[&str] = &[
    "open",
    "openDevice",
    "openReader",
    "openDeviceEx",
    "connect",
    "start",
    "startDevice",
];
const CLOSE_SENSOR_NAMES: &[&str] = &["close", "release", "shutdown"];
const CLOSE_SERVICE_NAMES: &[&str] = &["close", "release", "free"];
const INIT_NAMES: &[&str] = &["init", "initialize", "Init"];
const BOOTSTRAP_NAMES: &[&str] = &["init", "initialize", "start"];
const LED_NAMES: &[&str] = &["setLed", "setLED", "enableLeds"];
const RESOLUTION_NAMES: &[&str] = &["setDPI", "setResolution"];
const TIMEOUT_NAMES: &[&str] = &["setTimeout", "setTimeOut"];
const CAPTURE_NAMES: &[&str] = &["capture"];
const IMAGE_NAMES: &[&str] = &["getImage", "acquire", "getImageEx", "acquireImage"];
const TO_BYTES_NAMES: &[&str] = &["getBytes", "toBytes", "getImage"];
const START_NAMES: &[&str] = &[
    "startCapture",
    "start",
    "beginCapture",
    "startImage",
    "acquireStart",
    "startAutoCapture",
    "startCaptureImage",
];
const STOP_NAMES: &[&str] = &["stopCapture", "stop", "end"];
const LISTENER_FALLBACK_NAMES: &[&str] = &["setCaptureListener", "addCaptureListener"];
const LISTENER_CLEAR_NAMES: &[&str] = &[
    "removeCaptureListener",
    "removeListener",
    "clearCaptureListener",
    "clearListener",
];
const DIRECT_TEMPLATE_NAMES: &[&str] = &[
    "acquireTemplate",
    "getTemplate",
    "captureTemplate",
    "getFPTemplate",
    "acquireFingerTemplate",
    "generateTemplate",
];
const EXTRACT_NAMES: &[&str] = &["extract", "createTemplate", "process"];
const NESTED_SERVICE_NAMES: &[&str] = &["getService"];

/// Class names the adaptive factory looks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptiveConfig {
    /// Vendor service classes, in preference order.
    pub service_classes: Vec<String>,

    /// Optional bootstrap services initialised before the sensor.
    pub bootstrap_classes: Vec<String>,

    /// Sensor factory classes probed for static `create*`/`get*` members.
    pub factory_classes: Vec<String>,

    /// Sensor classes constructed directly when no factory produced one.
    pub sensor_classes: Vec<String>,

    /// Substring a factory product's type name must contain.
    pub sensor_type_hint: String,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        const PKG: &str = "com.zkteco.android.biometric.module.fingerprintreader";
        Self {
            service_classes: vec![
                format!("{PKG}.ZKFingerService"),
                "com.zkteco.zkfinger.FingerprintService".to_string(),
                "com.zkteco.zkfinger.ZKIDFprService".to_string(),
                "com.zkteco.biometric.IDFprService".to_string(),
            ],
            bootstrap_classes: vec!["com.zkteco.android.biometric.util.SilkidService".to_string()],
            factory_classes: vec![
                format!("{PKG}.FingprintFactory"),
                format!("{PKG}.FingerprintFactory"),
            ],
            sensor_classes: vec![
                format!("{PKG}.FingerprintSensor"),
                "com.zkteco.fingerprintreader.FingerprintSensor".to_string(),
            ],
            sensor_type_hint: "FingerprintSensor".to_string(),
        }
    }
}

/// Loadable driver classes, keyed by fully qualified name.
#[derive(Default, Clone)]
pub struct ProbeRegistry {
    classes: HashMap<String, Arc<dyn Probe>>,
}

impl ProbeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class probe under its type name.
    pub fn register(&mut self, class: Arc<dyn Probe>) {
        self.classes.insert(class.type_name(), class);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_class(mut self, class: Arc<dyn Probe>) -> Self {
        self.register(class);
        self
    }

    /// Look up a class by name.
    pub fn load(&self, name: &str) -> Option<Arc<dyn Probe>> {
        self.classes.get(name).cloned()
    }

    /// Whether a class is loadable.
    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.classes.keys().collect();
        names.sort();
        f.debug_struct("ProbeRegistry").field("classes", &names).finish()
    }
}

fn short_name(type_name: &str) -> &str {
    type_name.rsplit('.').next().unwrap_or(type_name)
}

fn as_object(value: Value) -> Option<Arc<dyn Probe>> {
    match value {
        Value::Object(obj) => Some(obj),
        _ => None,
    }
}

/// Instantiate `class`, preferring a constructor that takes the context.
fn construct(class: &dyn Probe) -> Option<Arc<dyn Probe>> {
    let ctors: Vec<Member> = class
        .members()
        .into_iter()
        .filter(|m| m.name == CONSTRUCTOR)
        .collect();

    let with_ctx = [Value::Handle(HostHandle::Context)];
    let by_ctx = ctors
        .iter()
        .filter(|m| m.arity() == 1 && m.accepts(&with_ctx))
        .find_map(|m| class.invoke(m, &with_ctx).ok().and_then(as_object));

    by_ctx.or_else(|| {
        ctors
            .iter()
            .filter(|m| m.arity() == 0)
            .find_map(|m| class.invoke(m, &[]).ok().and_then(as_object))
    })
}

/// Builds [`AdaptiveDriver`]s from a [`ProbeRegistry`].
#[derive(Debug, Clone)]
pub struct AdaptiveFactory {
    registry: ProbeRegistry,
    config: AdaptiveConfig,
}

impl AdaptiveFactory {
    /// Create a factory with the default class names.
    pub fn new(registry: ProbeRegistry) -> Self {
        Self::with_config(registry, AdaptiveConfig::default())
    }

    /// Create a factory with explicit class names.
    pub fn with_config(registry: ProbeRegistry, config: AdaptiveConfig) -> Self {
        Self { registry, config }
    }

    /// Configured class names.
    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    fn create_service(&self, trace: &mut DebugTrace) -> Option<Arc<dyn Probe>> {
        for name in &self.config.service_classes {
            let Some(class) = self.registry.load(name) else {
                continue;
            };
            let Some(service) = construct(class.as_ref()) else {
                trace.push(format!("Service class {name} is not constructible"));
                continue;
            };

            let ctx = [Value::Handle(HostHandle::Context)];
            let initialised = binder::bind(service.as_ref(), INIT_NAMES, &ctx)
                .or_else(|| binder::bind(service.as_ref(), INIT_NAMES, &[]));
            match initialised {
                Some(hit) => trace.push(format!("Service initialized with {name} via {}", hit.member.name)),
                None => trace.push(format!("Service constructed (no init) with {name}")),
            }
            return Some(service);
        }
        None
    }

    fn bootstrap(&self, trace: &mut DebugTrace) {
        for name in &self.config.bootstrap_classes {
            let Some(instance) = self.registry.load(name).and_then(|c| construct(c.as_ref())) else {
                continue;
            };
            let ctx = [Value::Handle(HostHandle::Context)];
            if binder::bind(instance.as_ref(), BOOTSTRAP_NAMES, &ctx).is_some() {
                trace.push(format!("{} initialized", short_name(name)));
            }
        }
    }

    fn create_sensor(&self, trace: &mut DebugTrace) -> Option<Arc<dyn Probe>> {
        let hint = self.config.sensor_type_hint.to_lowercase();

        for factory_name in &self.config.factory_classes {
            let Some(factory) = self.registry.load(factory_name) else {
                continue;
            };
            for member in factory.members() {
                let lower = member.name.to_lowercase();
                if !(lower.starts_with("create") || lower.starts_with("get")) {
                    continue;
                }
                let args = match member.arity() {
                    0 => vec![],
                    1 => vec![Value::Handle(HostHandle::Context)],
                    2 => vec![
                        Value::Handle(HostHandle::Context),
                        Value::Handle(HostHandle::Manager),
                    ],
                    _ => continue,
                };
                let Some(sensor) = factory.invoke(&member, &args).ok().and_then(as_object) else {
                    continue;
                };
                if sensor.type_name().to_lowercase().contains(&hint) {
                    trace.push(format!(
                        "Sensor created via {factory_name}.{}({} args)",
                        member.name,
                        args.len()
                    ));
                    return Some(sensor);
                }
            }
        }

        for name in &self.config.sensor_classes {
            if let Some(sensor) = self.registry.load(name).and_then(|c| construct(c.as_ref())) {
                trace.push(format!("Sensor constructed with {name}"));
                return Some(sensor);
            }
        }
        None
    }
}

impl DriverFactory for AdaptiveFactory {
    fn sdk_available(&self) -> bool {
        let has_service = self
            .config
            .service_classes
            .iter()
            .any(|c| self.registry.contains(c));
        let has_sensor = self
            .config
            .sensor_classes
            .iter()
            .chain(&self.config.factory_classes)
            .any(|c| self.registry.contains(c));
        has_service && has_sensor
    }

    fn create(&self, _device: &UsbDeviceDescriptor, trace: &mut DebugTrace) -> Result<AnyDriver> {
        let service = self
            .create_service(trace)
            .ok_or_else(|| HardwareError::initialization_failed("No finger service class available"))?;

        self.bootstrap(trace);

        let sensor = self.create_sensor(trace).ok_or_else(|| {
            HardwareError::initialization_failed(
                "Could not create FingerprintSensor (no factory/constructor matched)",
            )
        })?;
        trace.push(format!("Sensor created: {}", sensor.type_name()));

        Ok(AnyDriver::Adaptive(AdaptiveDriver::new(Some(service), sensor)))
    }
}

/// Converts whatever a capture entry point returned into raw bytes.
///
/// Byte buffers pass through, bitmaps become 8-bit grayscale, and opaque
/// objects are asked for their bytes.
fn payload_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Bytes(bytes) => Some(bytes.clone()),
        Value::Bitmap(image) => Some(image.to_grayscale()),
        Value::Object(obj) => match binder::invoke_best_match(obj.as_ref(), TO_BYTES_NAMES, &[]) {
            Some(Value::Bytes(bytes)) => Some(bytes),
            _ => None,
        },
        _ => None,
    }
}

/// Run the extraction entry points of `target`.
fn extract_from(target: &dyn Probe, image: &[u8], format: Option<i64>) -> Result<Option<Vec<u8>>> {
    let mut args = vec![Value::Bytes(image.to_vec())];
    if let Some(code) = format {
        args.push(Value::Int(code));
    }

    match binder::bind(target, EXTRACT_NAMES, &args) {
        Some(BindHit {
            value: Value::Bytes(template),
            ..
        }) if !template.is_empty() => Ok(Some(template)),
        Some(_) => Ok(None),
        None => Err(HardwareError::extraction(format!(
            "no extract entry point on {} accepted {}",
            target.type_name(),
            binder::render_args(&args)
        ))),
    }
}

/// Driver adapter over probed service and sensor objects.
pub struct AdaptiveDriver {
    service: Option<Arc<dyn Probe>>,
    sensor: Arc<dyn Probe>,
    listener_setter: Mutex<Option<Member>>,
    journal: Mutex<DebugTrace>,
}

impl AdaptiveDriver {
    /// Wrap already constructed service and sensor objects.
    pub fn new(service: Option<Arc<dyn Probe>>, sensor: Arc<dyn Probe>) -> Self {
        Self {
            service,
            sensor,
            listener_setter: Mutex::new(None),
            journal: Mutex::new(DebugTrace::new()),
        }
    }

    /// The probed sensor object.
    pub fn sensor(&self) -> &Arc<dyn Probe> {
        &self.sensor
    }

    /// The probed service object, if any.
    pub fn service(&self) -> Option<&Arc<dyn Probe>> {
        self.service.as_ref()
    }

    fn note(&self, message: impl Into<String>) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    fn record(&self, entries: DebugTrace) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(entries);
    }

    fn attempted(&self, names: &[&str]) -> Vec<String> {
        self.sensor
            .members()
            .iter()
            .filter(|m| names.iter().any(|n| m.is_named(n)))
            .map(Member::signature)
            .collect()
    }

    /// First one-argument listener setter on the sensor.
    ///
    /// Setter-like names (`set*`, `add*`, `register*`) mentioning a
    /// listener, capture, image or finger are preferred. Slot-indexed
    /// setters `(Int, Listener)` are accepted as a last resort.
    fn find_listener_setter(&self) -> Option<Member> {
        let members = self.sensor.members();
        let setter_like = |m: &Member| {
            let n = m.name.to_lowercase();
            (n.starts_with("set") || n.starts_with("add") || n.starts_with("register"))
                && ["listener", "capture", "image", "finger"]
                    .iter()
                    .any(|k| n.contains(k))
        };

        members
            .iter()
            .find(|m| setter_like(m) && m.params == [ParamKind::Listener])
            .or_else(|| {
                members.iter().find(|m| {
                    LISTENER_FALLBACK_NAMES.iter().any(|n| m.is_named(n)) && m.arity() == 1
                })
            })
            .or_else(|| {
                members
                    .iter()
                    .find(|m| setter_like(m) && m.params == [ParamKind::Int, ParamKind::Listener])
            })
            .cloned()
    }

    fn setter_args(setter: &Member, slot: u8, listener: Value) -> Vec<Value> {
        if setter.arity() == 2 {
            vec![Value::Int(i64::from(slot)), listener]
        } else {
            vec![listener]
        }
    }

    fn direct_template_from(
        &self,
        label: &str,
        target: &dyn Probe,
        timeout: Duration,
    ) -> Option<Vec<u8>> {
        let t = Value::Int(duration_ms(timeout));
        let ctx = Value::Handle(HostHandle::Context);
        let arg_sets = [vec![], vec![t.clone()], vec![ctx.clone()], vec![ctx, t]];

        // Coercion is a last resort, and never from the empty set: it would
        // pad a timeout parameter with 0.
        let template_of = |name: &str, hit: Option<BindHit>| match hit {
            Some(BindHit {
                value: Value::Bytes(bytes),
                ..
            }) if !bytes.is_empty() => {
                self.note(format!("{label}.{name} returned {} bytes", bytes.len()));
                Some(bytes)
            }
            _ => None,
        };

        DIRECT_TEMPLATE_NAMES
            .iter()
            .find_map(|&name| {
                arg_sets
                    .iter()
                    .find_map(|args| template_of(name, binder::bind_exact(target, &[name], args)))
            })
            .or_else(|| {
                DIRECT_TEMPLATE_NAMES.iter().find_map(|&name| {
                    arg_sets[1..]
                        .iter()
                        .find_map(|args| template_of(name, binder::bind(target, &[name], args)))
                })
            })
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

impl fmt::Debug for AdaptiveDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveDriver")
            .field("service", &self.service.as_ref().map(|s| s.type_name()))
            .field("sensor", &self.sensor.type_name())
            .finish_non_exhaustive()
    }
}

impl Openable for AdaptiveDriver {
    fn open(&self, device: &UsbDeviceDescriptor) -> Result<()> {
        let mut journal = DebugTrace::new();
        let hit = invoke_until(
            self.sensor.as_ref(),
            "open",
            OPEN_NAMES,
            &open_argument_sets(device),
            Value::is_success_indicator,
            &mut journal,
        );

        match hit {
            Some(hit) => {
                journal.push(format!(
                    "FingerprintSensor opened via {}{}",
                    hit.member.name,
                    binder::render_args(&hit.args)
                ));
                self.record(journal);
                Ok(())
            }
            None => {
                journal.push(describe_members(
                    self.sensor.as_ref(),
                    &["open", "openDevice", "openReader", "openDeviceEx", "connect", "start"],
                ));
                self.record(journal);
                Err(HardwareError::binding_failed("open", self.attempted(OPEN_NAMES)))
            }
        }
    }

    fn configure(&self, setting: SensorSetting) -> Result<()> {
        let (names, arg) = match setting {
            SensorSetting::Led(on) => (LED_NAMES, Value::Bool(on)),
            SensorSetting::Resolution(dpi) => (RESOLUTION_NAMES, Value::Int(dpi)),
            SensorSetting::TimeoutMs(ms) => (TIMEOUT_NAMES, Value::Int(ms)),
        };

        match binder::bind(self.sensor.as_ref(), names, &[arg]) {
            Some(hit) if hit.value.is_success_indicator() => {
                self.note(format!("{setting} applied via {}", hit.member.name));
                Ok(())
            }
            Some(hit) => Err(HardwareError::configuration(format!(
                "{} rejected {setting}: {:?}",
                hit.member.name, hit.value
            ))),
            None => Err(HardwareError::unsupported(format!("configure {setting}"))),
        }
    }

    fn close(&self) -> Result<()> {
        if let Some(hit) = binder::bind(self.sensor.as_ref(), CLOSE_SENSOR_NAMES, &[]) {
            self.note(format!("Sensor released via {}", hit.member.name));
        }
        if let Some(service) = &self.service
            && let Some(hit) = binder::bind(service.as_ref(), CLOSE_SERVICE_NAMES, &[])
        {
            self.note(format!("Service released via {}", hit.member.name));
        }
        Ok(())
    }
}

impl Capturable for AdaptiveDriver {
    fn capture_sync(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let t = Value::Int(duration_ms(timeout));
        let attempts: [(&[&str], Vec<Value>); 4] = [
            (CAPTURE_NAMES, vec![t.clone()]),
            (CAPTURE_NAMES, vec![]),
            (IMAGE_NAMES, vec![t]),
            (IMAGE_NAMES, vec![]),
        ];

        for (names, args) in &attempts {
            let Some(hit) = binder::bind(self.sensor.as_ref(), names, args) else {
                continue;
            };
            if let Some(bytes) = payload_bytes(&hit.value) {
                self.note(format!(
                    "{}{} → {} ({} bytes)",
                    hit.member.name,
                    binder::render_args(&hit.args),
                    hit.value.kind_name(),
                    bytes.len()
                ));
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }

    fn register_listener(&self, slot: u8, listener: Arc<dyn CaptureListener>) -> Result<()> {
        let Some(setter) = self.find_listener_setter() else {
            self.note(format!(
                "No listener setter found on {}",
                short_name(&self.sensor.type_name())
            ));
            return Err(HardwareError::unsupported("register listener"));
        };

        let args = Self::setter_args(&setter, slot, Value::Listener(listener));
        match self.sensor.invoke(&setter, &args) {
            Ok(_) => {
                self.note(format!("Listener registered via {}", setter.signature()));
                *self
                    .listener_setter
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(setter);
                Ok(())
            }
            Err(err) => {
                self.note(format!("Failed to register listener: {err}"));
                Err(HardwareError::biometric_capture(err.to_string()))
            }
        }
    }

    fn clear_listener(&self, slot: u8) -> Result<()> {
        let setter = self
            .listener_setter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if binder::bind(self.sensor.as_ref(), LISTENER_CLEAR_NAMES, &[Value::Int(i64::from(slot))])
            .is_some()
        {
            return Ok(());
        }

        if let Some(setter) = setter {
            let args = Self::setter_args(&setter, slot, Value::Null);
            self.sensor
                .invoke(&setter, &args)
                .map_err(|e| HardwareError::other(e.to_string()))?;
        }
        Ok(())
    }

    fn start_capture(&self, _slot: u8, timeout: Duration) -> Result<()> {
        let t = Value::Int(duration_ms(timeout));
        let ctx = Value::Handle(HostHandle::Context);
        let combos = vec![
            vec![],
            vec![Value::Bool(false)],
            vec![Value::Bool(true)],
            vec![t.clone()],
            vec![t.clone(), Value::Bool(false)],
            vec![t, Value::Bool(true)],
            vec![ctx.clone()],
            vec![ctx.clone(), Value::Bool(false)],
            vec![ctx, Value::Bool(true)],
        ];

        let mut journal = DebugTrace::new();
        let hit = invoke_until(
            self.sensor.as_ref(),
            "start",
            START_NAMES,
            &combos,
            |_| true,
            &mut journal,
        );

        match hit {
            Some(hit) => {
                journal.push(format!(
                    "Started async via {}{}",
                    hit.member.name,
                    binder::render_args(&hit.args)
                ));
                self.record(journal);
                Ok(())
            }
            None => {
                journal.push("Could not start async capture with any known signature.");
                journal.push(describe_members(self.sensor.as_ref(), &["start", "capture", "begin"]));
                self.record(journal);
                Err(HardwareError::binding_failed(
                    "start capture",
                    self.attempted(START_NAMES),
                ))
            }
        }
    }

    fn stop_capture(&self, _slot: u8) -> Result<()> {
        binder::bind(self.sensor.as_ref(), STOP_NAMES, &[]);
        Ok(())
    }

    fn capture_template(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        if let Some(bytes) = self.direct_template_from("Sensor", self.sensor.as_ref(), timeout) {
            return Ok(Some(bytes));
        }
        Ok(self
            .service
            .as_ref()
            .and_then(|svc| self.direct_template_from("Service", svc.as_ref(), timeout)))
    }
}

impl Extractable for AdaptiveDriver {
    fn extract(&self, image: &[u8], format: Option<i64>) -> Result<Option<Vec<u8>>> {
        let service = self
            .service
            .as_ref()
            .ok_or_else(|| HardwareError::unsupported("extract without a service"))?;
        extract_from(service.as_ref(), image, format)
    }

    fn nested_extractor(&self) -> Option<Arc<dyn Extractable>> {
        let service = self.service.as_ref()?;
        let inner = as_object(binder::invoke_best_match(service.as_ref(), NESTED_SERVICE_NAMES, &[])?)?;
        Some(Arc::new(ProbeExtractor::new(inner)))
    }
}

impl SensorDriver for AdaptiveDriver {
    fn name(&self) -> String {
        self.sensor.type_name()
    }

    fn describe(&self) -> String {
        let mut out = format!(
            "Service: {}\nSensor : {}",
            self.service
                .as_ref()
                .map_or_else(|| "(null)".to_string(), |s| s.type_name()),
            self.sensor.type_name()
        );

        for obj in self.service.iter().chain(std::iter::once(&self.sensor)) {
            let mut members = obj.members();
            members.sort_by(|a, b| a.name.cmp(&b.name));
            out.push_str(&format!("\n\nMethods of {}:", obj.type_name()));
            for member in members {
                out.push_str("\n  ");
                out.push_str(&member.signature());
            }
        }
        out
    }

    fn drain_journal(&self) -> DebugTrace {
        std::mem::take(&mut *self.journal.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Extraction over an inner service object.
pub struct ProbeExtractor {
    target: Arc<dyn Probe>,
}

impl ProbeExtractor {
    /// Wrap a probed object.
    pub fn new(target: Arc<dyn Probe>) -> Self {
        Self { target }
    }
}

impl fmt::Debug for ProbeExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProbeExtractor")
            .field(&self.target.type_name())
            .finish()
    }
}

impl Extractable for ProbeExtractor {
    fn extract(&self, image: &[u8], format: Option<i64>) -> Result<Option<Vec<u8>>> {
        extract_from(self.target.as_ref(), image, format)
    }
}
