//! Structured audit events for fleet operations
//!
//! Every reconcile, fan-out slot and propagation phase produces one event.
//! Events are always logged locally via tracing and forwarded to an injected
//! sink if one is configured. Events only carry attribute *names*, never
//! values, so secret-bearing fields cannot end up in a log line.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::error::{ErrorKind, FleetError};

/// What kind of operation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Ensure,
    Lookup,
    FanoutTask,
    PrimaryCreate,
    SecretRetrieve,
    PeerReplicate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Ensure => "ensure",
            Operation::Lookup => "lookup",
            Operation::FanoutTask => "fanout-task",
            Operation::PrimaryCreate => "primary-create",
            Operation::SecretRetrieve => "secret-retrieve",
            Operation::PeerReplicate => "peer-replicate",
        };
        f.write_str(s)
    }
}

/// Coarse result of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "class", content = "kind")]
pub enum OutcomeClass {
    Unchanged,
    Created,
    Updated,
    Succeeded,
    Failed(ErrorKind),
}

impl OutcomeClass {
    pub fn from_error(err: &FleetError) -> Self {
        OutcomeClass::Failed(err.kind())
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, OutcomeClass::Failed(_))
    }
}

impl fmt::Display for OutcomeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeClass::Unchanged => f.write_str("unchanged"),
            OutcomeClass::Created => f.write_str("created"),
            OutcomeClass::Updated => f.write_str("updated"),
            OutcomeClass::Succeeded => f.write_str("succeeded"),
            OutcomeClass::Failed(kind) => write!(f, "failed({kind})"),
        }
    }
}

/// One structured audit event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetEvent {
    pub operation: Operation,
    pub target: String,
    /// Collection path plus identity, e.g. `interface/wireguard name=wg0`.
    pub resource: Option<String>,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    pub outcome: OutcomeClass,
    /// Names of attributes written, if any.
    pub fields: Vec<String>,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl FleetEvent {
    pub fn new(
        operation: Operation,
        target: impl Into<String>,
        duration: Duration,
        outcome: OutcomeClass,
    ) -> Self {
        Self {
            operation,
            target: target.into(),
            resource: None,
            duration,
            outcome,
            fields: Vec::new(),
        }
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// Destination for audit events besides the local tracing output.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &FleetEvent);
}

/// Keeps every event in memory. Useful for tests and for callers that want
/// to attach the event trail to a report.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<FleetEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FleetEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: &FleetEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Audit logger shared by the reconciler, fan-out executor and secret workflow
pub struct AuditLogger {
    component: String,
    sink: Option<Arc<dyn EventSink>>,
    quiet: bool,
}

impl AuditLogger {
    /// Create a new audit logger for a specific component
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            sink: None,
            quiet: false,
        }
    }

    /// Create an audit logger that also forwards events to `sink`
    pub fn with_sink(component: &str, sink: Arc<dyn EventSink>) -> Self {
        Self {
            component: component.to_string(),
            sink: Some(sink),
            quiet: false,
        }
    }

    /// Create a noop audit logger (for testing)
    pub fn new_noop() -> Self {
        Self {
            component: String::new(),
            sink: None,
            quiet: true,
        }
    }

    /// Log an audit event
    pub fn record(&self, event: FleetEvent) {
        if !self.quiet {
            let resource = event.resource.as_deref().unwrap_or("-");
            let duration_ms = event.duration.as_millis() as u64;
            if event.outcome.is_failure() {
                tracing::warn!(
                    target: "audit",
                    component = %self.component,
                    operation = %event.operation,
                    device = %event.target,
                    resource = %resource,
                    duration_ms,
                    outcome = %event.outcome,
                    "{} failed", event.operation
                );
            } else {
                tracing::info!(
                    target: "audit",
                    component = %self.component,
                    operation = %event.operation,
                    device = %event.target,
                    resource = %resource,
                    duration_ms,
                    outcome = %event.outcome,
                    fields = ?event.fields,
                    "{} {}", event.operation, event.outcome
                );
            }
        }

        if let Some(sink) = &self.sink {
            sink.record(&event);
        }
    }
}

/// Create a shared audit logger
pub fn create_audit_logger(component: &str) -> Arc<AuditLogger> {
    Arc::new(AuditLogger::new(component))
}
