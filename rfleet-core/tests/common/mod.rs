//! Shared test fixtures: an in-memory fleet of fake devices.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rfleet_core::{
    AttributeSet, AuditLogger, DeviceTarget, FanoutConfig, FanoutExecutor, FleetError,
    RecordingSink, Reconciler, ResourceDescriptor, Result, Transport,
};

/// Kind of request a fake device received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    List,
    Create,
    Update,
    Query,
}

/// One recorded request.
#[derive(Debug, Clone)]
pub struct Call {
    pub device: String,
    pub kind: CallKind,
    pub path: String,
    pub id: Option<String>,
    pub attrs: Option<AttributeSet>,
    pub fields: Vec<String>,
}

/// Behaviour and contents of one fake device.
#[derive(Debug, Default)]
pub struct FakeDevice {
    collections: HashMap<String, Vec<AttributeSet>>,
    delay: Duration,
    fail_status: Option<u16>,
    fail_writes_status: Option<u16>,
    fail_query_status: Option<u16>,
    echo_payload_in_errors: bool,
    echo_on_create: bool,
    hidden_in_list: HashSet<String>,
    hidden_in_query: HashSet<String>,
    generate: Vec<(String, String)>,
    next_id: u32,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request takes this long.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every request fails with this status.
    pub fn failing(mut self, status: u16) -> Self {
        self.fail_status = Some(status);
        self
    }

    /// Create/update fail with this status; reads work.
    pub fn failing_writes(mut self, status: u16) -> Self {
        self.fail_writes_status = Some(status);
        self
    }

    /// Explicit field queries fail with this status; listings and writes work.
    pub fn failing_queries(mut self, status: u16) -> Self {
        self.fail_query_status = Some(status);
        self
    }

    /// Error bodies quote the rejected payload back.
    pub fn echoing_payload_in_errors(mut self) -> Self {
        self.echo_payload_in_errors = true;
        self
    }

    /// Create responses include the stored resource.
    pub fn echoing_creates(mut self) -> Self {
        self.echo_on_create = true;
        self
    }

    /// Leave `field` out of plain listings.
    pub fn hiding_in_list(mut self, field: &str) -> Self {
        self.hidden_in_list.insert(field.to_string());
        self
    }

    /// Leave `field` out of explicit queries too.
    pub fn hiding_in_query(mut self, field: &str) -> Self {
        self.hidden_in_query.insert(field.to_string());
        self
    }

    /// Fill `field` on create when the request leaves it out.
    pub fn generating(mut self, field: &str, prefix: &str) -> Self {
        self.generate.push((field.to_string(), prefix.to_string()));
        self
    }

    pub fn seeded(mut self, path: &str, entries: Vec<AttributeSet>) -> Self {
        self.next_id += entries.len() as u32;
        self.collections.insert(path.to_string(), entries);
        self
    }
}

#[derive(Default)]
struct State {
    devices: HashMap<String, FakeDevice>,
    calls: Vec<Call>,
}

/// In-memory [`Transport`] serving a set of fake devices.
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<State>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, name: &str, device: FakeDevice) -> DeviceTarget {
        self.state
            .lock()
            .unwrap()
            .devices
            .insert(name.to_string(), device);
        target(name)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, device: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.device == device)
            .collect()
    }

    pub fn writes_for(&self, device: &str) -> Vec<Call> {
        self.calls_for(device)
            .into_iter()
            .filter(|c| matches!(c.kind, CallKind::Create | CallKind::Update))
            .collect()
    }

    pub fn resources(&self, device: &str, path: &str) -> Vec<AttributeSet> {
        self.state
            .lock()
            .unwrap()
            .devices
            .get(device)
            .and_then(|d| d.collections.get(path).cloned())
            .unwrap_or_default()
    }

    /// Record the call and return the delay to apply, or a canned failure.
    fn begin(&self, call: Call, write: bool) -> Result<Duration> {
        let mut state = self.state.lock().unwrap();
        let device_name = call.device.clone();
        let kind = call.kind;
        let payload = call.attrs.clone();
        state.calls.push(call);
        let device = state
            .devices
            .get(&device_name)
            .ok_or_else(|| unreachable_device(&device_name))?;

        let status = device
            .fail_status
            .or(if write { device.fail_writes_status } else { None })
            .or(if kind == CallKind::Query {
                device.fail_query_status
            } else {
                None
            });
        if let Some(status) = status {
            let body = match (&payload, device.echo_payload_in_errors) {
                (Some(attrs), true) => format!("rejected {}", attrs.to_json()),
                _ => format!("device {device_name} rejected request"),
            };
            return Err(FleetError::http(status, body));
        }
        Ok(device.delay)
    }

    fn with_device<T>(&self, name: &str, f: impl FnOnce(&mut FakeDevice) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock().unwrap();
        let device = state
            .devices
            .get_mut(name)
            .ok_or_else(|| unreachable_device(name))?;
        f(device)
    }
}

fn unreachable_device(name: &str) -> FleetError {
    FleetError::transport(
        format!("no route to {name}"),
        io::Error::new(io::ErrorKind::ConnectionRefused, "unreachable"),
    )
}

fn call(device: &DeviceTarget, kind: CallKind, resource: &ResourceDescriptor) -> Call {
    Call {
        device: device.name().to_string(),
        kind,
        path: resource.path().to_string(),
        id: None,
        attrs: None,
        fields: Vec::new(),
    }
}

fn visible(entry: &AttributeSet, hidden: &HashSet<String>) -> AttributeSet {
    entry
        .iter()
        .filter(|(k, _)| !hidden.contains(*k))
        .collect()
}

#[async_trait]
impl Transport for FakeTransport {
    async fn list(&self, device: &DeviceTarget, resource: &ResourceDescriptor) -> Result<Vec<AttributeSet>> {
        let delay = self.begin(call(device, CallKind::List, resource), false)?;
        tokio::time::sleep(delay).await;
        self.with_device(device.name(), |d| {
            Ok(d.collections
                .get(resource.path())
                .map(|entries| {
                    entries
                        .iter()
                        .map(|e| visible(e, &d.hidden_in_list))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default())
        })
    }

    async fn create(
        &self,
        device: &DeviceTarget,
        resource: &ResourceDescriptor,
        attrs: &AttributeSet,
    ) -> Result<Option<AttributeSet>> {
        let mut c = call(device, CallKind::Create, resource);
        c.attrs = Some(attrs.clone());
        let delay = self.begin(c, true)?;
        tokio::time::sleep(delay).await;

        let name = device.name().to_string();
        self.with_device(device.name(), |d| {
            d.next_id += 1;
            let id = format!("*{}", d.next_id);
            let mut stored = attrs.clone().with(resource.id_field(), id.clone());
            for (field, prefix) in &d.generate {
                if !stored.contains_key(field) {
                    stored.insert(field.clone(), format!("{prefix}-{name}-{}", d.next_id));
                }
            }
            d.collections
                .entry(resource.path().to_string())
                .or_default()
                .push(stored.clone());
            Ok(d.echo_on_create.then_some(stored))
        })
    }

    async fn update(
        &self,
        device: &DeviceTarget,
        resource: &ResourceDescriptor,
        id: &str,
        attrs: &AttributeSet,
    ) -> Result<()> {
        let mut c = call(device, CallKind::Update, resource);
        c.id = Some(id.to_string());
        c.attrs = Some(attrs.clone());
        let delay = self.begin(c, true)?;
        tokio::time::sleep(delay).await;

        let id_field = resource.id_field().to_string();
        self.with_device(device.name(), |d| {
            let entry = d
                .collections
                .get_mut(resource.path())
                .and_then(|entries| entries.iter_mut().find(|e| e.get(&id_field) == Some(id)))
                .ok_or_else(|| FleetError::http(404, "no such item"))?;
            entry.extend(attrs.iter());
            Ok(())
        })
    }

    async fn query(
        &self,
        device: &DeviceTarget,
        resource: &ResourceDescriptor,
        fields: &[String],
    ) -> Result<Vec<AttributeSet>> {
        let mut c = call(device, CallKind::Query, resource);
        c.fields = fields.to_vec();
        let delay = self.begin(c, false)?;
        tokio::time::sleep(delay).await;

        self.with_device(device.name(), |d| {
            Ok(d.collections
                .get(resource.path())
                .map(|entries| {
                    entries
                        .iter()
                        .map(|e| {
                            visible(e, &d.hidden_in_query)
                                .iter()
                                .filter(|(k, _)| fields.iter().any(|f| f.as_str() == *k))
                                .collect::<AttributeSet>()
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default())
        })
    }
}

pub fn target(name: &str) -> DeviceTarget {
    DeviceTarget::new(name, format!("fake://{name}"), None)
}

/// Reconciler and fan-out executor wired to `transport`, with events captured.
pub struct Harness {
    pub reconciler: Reconciler,
    pub fanout: FanoutExecutor,
    pub sink: Arc<RecordingSink>,
}

pub fn harness(transport: Arc<FakeTransport>, fanout: FanoutConfig) -> Harness {
    let sink = Arc::new(RecordingSink::new());
    let audit = Arc::new(AuditLogger::with_sink("test", sink.clone()));
    Harness {
        reconciler: Reconciler::new(transport, Arc::clone(&audit)),
        fanout: FanoutExecutor::new(fanout, audit),
        sink,
    }
}

/// Collects everything written through a tracing subscriber.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route all tracing output at every level on this thread into a buffer.
pub fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (buffer, guard)
}

pub fn wg() -> ResourceDescriptor {
    ResourceDescriptor::named("interface/wireguard").unwrap()
}

pub fn attrs(pairs: &[(&str, &str)]) -> AttributeSet {
    pairs.iter().map(|(k, v)| (*k, *v)).collect()
}
