//! rfleet core library
//!
//! Idempotent reconciliation of resources on router configuration APIs, and
//! coordinated application of that reconciliation across a fleet.
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use rfleet_core::{AttributeSet, Reconciler, ResourceDescriptor, RestOptions, RestTransport};
//!
//! let transport = Arc::new(RestTransport::new(&RestOptions::default())?);
//! let reconciler = Reconciler::new(transport, rfleet_core::create_audit_logger("cli"));
//! let wg = ResourceDescriptor::named("interface/wireguard")?;
//! let desired = AttributeSet::new().with("name", "wg0").with("listen-port", "51820");
//! let outcome = reconciler.ensure(&device, &wg, &desired).await?;
//! ```

pub mod attrs;
pub mod audit;
pub mod config;
pub mod diff;
pub mod error;
pub mod fanout;
pub mod matcher;
pub mod reconciler;
pub mod resource;
pub mod rest;
pub mod secret;
pub mod transport;

// Re-export commonly used types at crate root
pub use attrs::AttributeSet;
pub use audit::{
    AuditLogger, EventSink, FleetEvent, Operation, OutcomeClass, RecordingSink,
    create_audit_logger,
};
pub use config::{DeviceConfig, FleetConfig};
pub use error::{ErrorKind, FleetError, Result};
pub use fanout::{ClusterOutcome, DEFAULT_TASK_TIMEOUT, FanoutConfig, FanoutExecutor, TargetOutcome};
pub use matcher::Match;
pub use reconciler::{Action, ReconcileOutcome, Reconciler};
pub use resource::{ExistingResource, IdentityKey, IdentitySpec, Lookup, ResourceDescriptor};
pub use rest::{RestOptions, RestTransport};
pub use secret::{PropagationOutcome, SecretPropagation, SecretSpec};
pub use transport::{Credentials, DeviceTarget, Transport};
