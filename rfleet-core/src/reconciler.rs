//! Reconciler - makes one named resource on one device match a desired state.
//!
//! Fetch, match, diff, then at most one write. Current state is always
//! re-read; nothing is cached between calls.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::attrs::AttributeSet;
use crate::audit::{AuditLogger, FleetEvent, Operation, OutcomeClass};
use crate::diff::{changed_names, diff};
use crate::error::{FleetError, Result};
use crate::matcher;
use crate::resource::{ExistingResource, IdentityKey, Lookup, ResourceDescriptor};
use crate::transport::{DeviceTarget, Transport};

/// What the reconciler did to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Created,
    Updated,
    Unchanged,
}

/// Result of a single ensure call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Device-assigned identifier, or the identity value when the device
    /// did not echo one on create.
    pub identifier: String,
    pub identity: IdentityKey,
    /// Attribute names actually sent to the device. Empty means up to date.
    pub changed: BTreeSet<String>,
    pub action: Action,
}

impl ReconcileOutcome {
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }

    fn outcome_class(&self) -> OutcomeClass {
        match self.action {
            Action::Created => OutcomeClass::Created,
            Action::Updated => OutcomeClass::Updated,
            Action::Unchanged => OutcomeClass::Unchanged,
        }
    }
}

/// Reconciles resources through a [`Transport`]. Cheap to clone.
#[derive(Clone)]
pub struct Reconciler {
    transport: Arc<dyn Transport>,
    audit: Arc<AuditLogger>,
}

impl Reconciler {
    pub fn new(transport: Arc<dyn Transport>, audit: Arc<AuditLogger>) -> Self {
        Self { transport, audit }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// Make the resource identified by `desired` match `desired`.
    pub async fn ensure(
        &self,
        device: &DeviceTarget,
        descriptor: &ResourceDescriptor,
        desired: &AttributeSet,
    ) -> Result<ReconcileOutcome> {
        let started = Instant::now();
        let (label, result) = match descriptor.identity().key_from(desired) {
            Ok(key) => (
                format!("{} {}", descriptor.path(), key),
                self.ensure_inner(device, descriptor, &key, desired).await,
            ),
            // No I/O happens, but the rejection is still audited.
            Err(e) => (descriptor.path().to_string(), Err(e)),
        };

        let event = match &result {
            Ok(outcome) => FleetEvent::new(
                Operation::Ensure,
                device.name(),
                started.elapsed(),
                outcome.outcome_class(),
            )
            .fields(outcome.changed.iter().cloned()),
            Err(e) => FleetEvent::new(
                Operation::Ensure,
                device.name(),
                started.elapsed(),
                OutcomeClass::from_error(e),
            ),
        };
        self.audit.record(event.resource(label));

        result
    }

    /// Like [`ensure`](Self::ensure) for collections keyed by a single field,
    /// injecting `name` as that field's value.
    pub async fn ensure_named(
        &self,
        device: &DeviceTarget,
        descriptor: &ResourceDescriptor,
        name: &str,
        attrs: &AttributeSet,
    ) -> Result<ReconcileOutcome> {
        let desired = match inject_identity(descriptor, name, attrs) {
            Ok(desired) => desired,
            Err(e) => {
                self.audit.record(
                    FleetEvent::new(
                        Operation::Ensure,
                        device.name(),
                        Duration::ZERO,
                        OutcomeClass::from_error(&e),
                    )
                    .resource(format!("{} {name}", descriptor.path())),
                );
                return Err(e);
            }
        };
        self.ensure(device, descriptor, &desired).await
    }

    /// Lookup-only: fetch the resource without ever creating it.
    pub async fn lookup(
        &self,
        device: &DeviceTarget,
        descriptor: &ResourceDescriptor,
        lookup: &Lookup,
    ) -> Result<ExistingResource> {
        let started = Instant::now();
        let result: Result<ExistingResource> = async {
            let listing = self.transport.list(device, descriptor).await?;
            matcher::find(&listing, descriptor, lookup)?
                .into_unique(lookup)?
                .ok_or_else(|| {
                    FleetError::not_found(format!(
                        "{} {} on {}",
                        descriptor.path(),
                        lookup,
                        device.name()
                    ))
                })
        }
        .await;

        let outcome = match &result {
            Ok(_) => OutcomeClass::Succeeded,
            Err(e) => OutcomeClass::from_error(e),
        };
        self.audit.record(
            FleetEvent::new(Operation::Lookup, device.name(), started.elapsed(), outcome)
                .resource(format!("{} {}", descriptor.path(), lookup)),
        );

        result
    }

    async fn ensure_inner(
        &self,
        device: &DeviceTarget,
        descriptor: &ResourceDescriptor,
        key: &IdentityKey,
        desired: &AttributeSet,
    ) -> Result<ReconcileOutcome> {
        let listing = self.transport.list(device, descriptor).await?;
        let lookup = Lookup::Key(key.clone());
        let existing = matcher::find(&listing, descriptor, &lookup)?.into_unique(&lookup)?;

        let Some(existing) = existing else {
            info!(
                device = %device,
                path = %descriptor.path(),
                identity = %key,
                "Creating resource"
            );
            let echo = self.transport.create(device, descriptor, desired).await?;
            let identifier = echo
                .as_ref()
                .and_then(|attrs| attrs.get(descriptor.id_field()))
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| fallback_identifier(key));
            return Ok(ReconcileOutcome {
                identifier,
                identity: key.clone(),
                changed: desired.keys().map(str::to_string).collect(),
                action: Action::Created,
            });
        };

        let patch = diff(desired, existing.attrs());
        if patch.is_empty() {
            debug!(
                device = %device,
                path = %descriptor.path(),
                identity = %key,
                "Resource up to date"
            );
            return Ok(ReconcileOutcome {
                identifier: existing.id().to_string(),
                identity: key.clone(),
                changed: BTreeSet::new(),
                action: Action::Unchanged,
            });
        }

        let changed = changed_names(&patch);
        info!(
            device = %device,
            path = %descriptor.path(),
            identity = %key,
            id = %existing.id(),
            fields = ?changed,
            "Updating resource"
        );
        self.transport
            .update(device, descriptor, existing.id(), &patch)
            .await?;

        Ok(ReconcileOutcome {
            identifier: existing.id().to_string(),
            identity: key.clone(),
            changed,
            action: Action::Updated,
        })
    }
}

/// Identity value used as identifier when the device does not echo one.
fn fallback_identifier(key: &IdentityKey) -> String {
    match key.pairs() {
        [(_, value)] => value.clone(),
        _ => key.to_string(),
    }
}

/// Merge a single identity value into `attrs`.
fn inject_identity(
    descriptor: &ResourceDescriptor,
    value: &str,
    attrs: &AttributeSet,
) -> Result<AttributeSet> {
    let [field] = descriptor.identity().fields() else {
        return Err(FleetError::invalid_argument(format!(
            "{} is identified by {} fields, a single name is not enough",
            descriptor.path(),
            descriptor.identity().fields().len()
        )));
    };
    match attrs.get(field) {
        Some(existing) if existing != value => Err(FleetError::invalid_argument(format!(
            "attribute '{field}' conflicts with identity value '{value}'"
        ))),
        _ => Ok(attrs.clone().with(field.clone(), value)),
    }
}
