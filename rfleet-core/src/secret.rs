//! Secret propagation - let one device generate a secret, then replicate it.
//!
//! Phase 1 reconciles the primary without the secret field so the device
//! generates one. The secret is then read back, first from the plain listing
//! and, if the device hides it there, through an explicit field query.
//! A read that fails after the primary accepted the resource is reported as
//! secret-unreadable with the failure attached. Phase 2 reconciles every peer
//! with the same secret via the fan-out executor. The secret is never logged
//! or returned.

use std::fmt;
use std::time::Instant;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::attrs::AttributeSet;
use crate::audit::{FleetEvent, Operation, OutcomeClass};
use crate::error::{FleetError, Result};
use crate::fanout::{ClusterOutcome, FanoutExecutor};
use crate::matcher;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::resource::{IdentityKey, Lookup, ResourceDescriptor};
use crate::transport::DeviceTarget;

/// Which fields carry the secret and its public counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSpec {
    pub secret_field: String,
    /// Field derived from the secret that is safe to return, e.g. a public key.
    pub public_field: Option<String>,
}

impl SecretSpec {
    pub fn new(secret_field: impl Into<String>) -> Self {
        Self {
            secret_field: secret_field.into(),
            public_field: None,
        }
    }

    pub fn with_public_field(mut self, field: impl Into<String>) -> Self {
        self.public_field = Some(field.into());
        self
    }

    /// WireGuard interface key pair.
    pub fn wireguard() -> Self {
        Self::new("private-key").with_public_field("public-key")
    }

    fn validate(&self, descriptor: &ResourceDescriptor) -> Result<()> {
        if self.secret_field.trim().is_empty() {
            return Err(FleetError::invalid_argument("secret field name is blank"));
        }
        if descriptor.identity().contains(&self.secret_field) {
            return Err(FleetError::invalid_argument(format!(
                "secret field '{}' cannot be part of the identity",
                self.secret_field
            )));
        }
        if self.public_field.as_deref() == Some(self.secret_field.as_str()) {
            return Err(FleetError::invalid_argument(
                "public field must differ from the secret field",
            ));
        }
        Ok(())
    }
}

/// A secret read back from a device. Redacted in debug output and zeroized on drop.
pub struct SecretMaterial(SecretString);

impl SecretMaterial {
    fn new(value: &str) -> Self {
        Self(SecretString::from(value.to_string()))
    }

    fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretMaterial([REDACTED])")
    }
}

/// Which read path secret retrieval is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPath {
    /// The regular collection listing.
    Listing,
    /// Explicit query for identity and secret fields only.
    Extended,
}

impl fmt::Display for ReadPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadPath::Listing => f.write_str("listing"),
            ReadPath::Extended => f.write_str("extended query"),
        }
    }
}

/// Workflow state.
#[derive(Debug)]
enum Phase {
    Start,
    AwaitSecret {
        primary: ReconcileOutcome,
        path: ReadPath,
        public_identifier: Option<String>,
    },
    HaveSecret {
        primary: ReconcileOutcome,
        secret: SecretMaterial,
        public_identifier: Option<String>,
    },
    Done(PropagationOutcome),
}

/// Terminal result of a successful workflow.
#[derive(Debug)]
pub struct PropagationOutcome {
    pub primary: ReconcileOutcome,
    /// Public value derived from the secret, if the device reports one.
    pub public_identifier: Option<String>,
    /// Per-peer results in the order peers were given. Failures are per peer.
    pub peers: ClusterOutcome<ReconcileOutcome>,
}

/// Generate-on-primary, replicate-to-peers workflow.
pub struct SecretPropagation {
    reconciler: Reconciler,
    fanout: FanoutExecutor,
    spec: SecretSpec,
}

impl SecretPropagation {
    pub fn new(reconciler: Reconciler, fanout: FanoutExecutor, spec: SecretSpec) -> Self {
        Self {
            reconciler,
            fanout,
            spec,
        }
    }

    pub fn spec(&self) -> &SecretSpec {
        &self.spec
    }

    /// Run the workflow.
    ///
    /// Fails as a whole if the primary cannot be reconciled or will not
    /// disclose the secret. Peer failures are reported in `peers`.
    pub async fn run(
        &self,
        primary: &DeviceTarget,
        peers: &[DeviceTarget],
        descriptor: &ResourceDescriptor,
        desired: &AttributeSet,
    ) -> Result<PropagationOutcome> {
        self.spec.validate(descriptor)?;
        let key = descriptor.identity().key_from(desired)?;
        if peers.iter().any(|p| p == primary) {
            return Err(FleetError::invalid_argument(format!(
                "primary {} is also listed as a peer",
                primary.name()
            )));
        }

        let label = format!("{} {}", descriptor.path(), key);
        let mut phase = Phase::Start;

        loop {
            phase = match phase {
                Phase::Start => {
                    let outcome = self.primary_create(primary, descriptor, desired, &label).await?;
                    Phase::AwaitSecret {
                        primary: outcome,
                        path: ReadPath::Listing,
                        public_identifier: None,
                    }
                }
                Phase::AwaitSecret {
                    primary: outcome,
                    path,
                    public_identifier,
                } => {
                    // The primary has accepted the resource, so from here on a
                    // failed read means the secret is unreadable, not rejected.
                    let (read, cause) = match self
                        .read_secret(primary, descriptor, &key, path, &label)
                        .await
                    {
                        Ok(read) => (read, None),
                        Err(e) => {
                            warn!(
                                device = %primary,
                                resource = %label,
                                path = %path,
                                error = %e,
                                "Secret read failed"
                            );
                            (SecretRead::default(), Some(e))
                        }
                    };
                    let public_identifier = public_identifier.or(read.public_identifier);
                    match (read.secret, path) {
                        (Some(secret), _) => Phase::HaveSecret {
                            primary: outcome,
                            secret,
                            public_identifier,
                        },
                        (None, ReadPath::Listing) => {
                            debug!(
                                device = %primary,
                                field = %self.spec.secret_field,
                                "Secret not in listing, querying explicitly"
                            );
                            Phase::AwaitSecret {
                                primary: outcome,
                                path: ReadPath::Extended,
                                public_identifier,
                            }
                        }
                        (None, ReadPath::Extended) => {
                            warn!(
                                device = %primary,
                                resource = %label,
                                field = %self.spec.secret_field,
                                "Device accepted resource but will not disclose secret"
                            );
                            return Err(FleetError::SecretUnreadable {
                                resource: label,
                                field: self.spec.secret_field.clone(),
                                cause: cause.map(Box::new),
                            });
                        }
                    }
                }
                Phase::HaveSecret {
                    primary: outcome,
                    secret,
                    public_identifier,
                } => {
                    let peers = self
                        .replicate(peers, descriptor, desired, &secret, &label)
                        .await?;
                    Phase::Done(PropagationOutcome {
                        primary: outcome,
                        public_identifier,
                        peers,
                    })
                }
                Phase::Done(outcome) => return Ok(outcome),
            };
        }
    }

    /// Phase 1: reconcile the primary without the secret field.
    async fn primary_create(
        &self,
        primary: &DeviceTarget,
        descriptor: &ResourceDescriptor,
        desired: &AttributeSet,
        label: &str,
    ) -> Result<ReconcileOutcome> {
        let started = Instant::now();
        let stripped = desired.without(&self.spec.secret_field);
        let result = self.reconciler.ensure(primary, descriptor, &stripped).await;

        let outcome = match &result {
            Ok(_) => OutcomeClass::Succeeded,
            Err(e) => OutcomeClass::from_error(e),
        };
        self.reconciler.audit().record(
            FleetEvent::new(Operation::PrimaryCreate, primary.name(), started.elapsed(), outcome)
                .resource(label),
        );
        result
    }

    /// Read the secret (and public value) from the primary on one read path.
    async fn read_secret(
        &self,
        primary: &DeviceTarget,
        descriptor: &ResourceDescriptor,
        key: &IdentityKey,
        path: ReadPath,
        label: &str,
    ) -> Result<SecretRead> {
        let started = Instant::now();
        let transport = self.reconciler.transport();

        let result: Result<SecretRead> = async {
            let listing = match path {
                ReadPath::Listing => transport.list(primary, descriptor).await?,
                ReadPath::Extended => {
                    let mut fields: Vec<String> = descriptor.identity().fields().to_vec();
                    fields.push(descriptor.id_field().to_string());
                    fields.push(self.spec.secret_field.clone());
                    transport.query(primary, descriptor, &fields).await?
                }
            };
            let lookup = Lookup::Key(key.clone());
            let Some(resource) = matcher::find(&listing, descriptor, &lookup)?.into_unique(&lookup)?
            else {
                // The primary just reconciled it, so a missing entry means the
                // device is not exposing it on this path.
                return Ok(SecretRead::default());
            };
            Ok(SecretRead {
                secret: resource
                    .get(&self.spec.secret_field)
                    .filter(|s| !s.is_empty())
                    .map(SecretMaterial::new),
                public_identifier: self
                    .spec
                    .public_field
                    .as_deref()
                    .and_then(|f| resource.get(f))
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            })
        }
        .await;

        let outcome = match &result {
            Ok(read) if read.secret.is_some() => OutcomeClass::Succeeded,
            Ok(_) => OutcomeClass::Failed(crate::error::ErrorKind::SecretUnreadable),
            Err(e) => OutcomeClass::from_error(e),
        };
        self.reconciler.audit().record(
            FleetEvent::new(Operation::SecretRetrieve, primary.name(), started.elapsed(), outcome)
                .resource(format!("{label} via {path}")),
        );
        result
    }

    /// Phase 2: reconcile peers with the retrieved secret.
    async fn replicate(
        &self,
        peers: &[DeviceTarget],
        descriptor: &ResourceDescriptor,
        desired: &AttributeSet,
        secret: &SecretMaterial,
        label: &str,
    ) -> Result<ClusterOutcome<ReconcileOutcome>> {
        if peers.is_empty() {
            info!(resource = %label, "No peers to replicate to");
            return Ok(ClusterOutcome::empty());
        }

        let started = Instant::now();
        // The peer payload is a plain attribute set. Each peer task holds its
        // own copy, and one that timed out keeps it until its request ends.
        let with_secret = desired
            .clone()
            .with(self.spec.secret_field.clone(), secret.expose());
        let result = self
            .fanout
            .ensure(&self.reconciler, peers, descriptor, &with_secret)
            .await;

        let outcome = result?.map_err(|e| e.scrub(secret.expose()));
        let failed = outcome.failed().count();
        let class = if failed == 0 {
            OutcomeClass::Succeeded
        } else {
            // Report the first peer failure kind; details are per peer.
            outcome
                .failed()
                .next()
                .map(|(_, e)| OutcomeClass::from_error(e))
                .unwrap_or(OutcomeClass::Succeeded)
        };
        self.reconciler.audit().record(
            FleetEvent::new(Operation::PeerReplicate, "cluster", started.elapsed(), class)
                .resource(label),
        );
        info!(
            resource = %label,
            peers = peers.len(),
            failed,
            "Secret replicated to peers"
        );
        Ok(outcome)
    }
}

#[derive(Default)]
struct SecretRead {
    secret: Option<SecretMaterial>,
    public_identifier: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::IdentitySpec;

    #[test]
    fn test_secret_material_debug_is_redacted() {
        let s = SecretMaterial::new("cGxhaW50ZXh0LWtleQ==");
        assert_eq!(format!("{s:?}"), "SecretMaterial([REDACTED])");
        assert_eq!(s.expose(), "cGxhaW50ZXh0LWtleQ==");
    }

    #[test]
    fn test_spec_validation() {
        let d = ResourceDescriptor::named("interface/wireguard").unwrap();
        assert!(SecretSpec::wireguard().validate(&d).is_ok());
        assert!(SecretSpec::new("name").validate(&d).is_err());
        assert!(SecretSpec::new(" ").validate(&d).is_err());
        assert!(
            SecretSpec::new("k")
                .with_public_field("k")
                .validate(&d)
                .is_err()
        );

        let composite = ResourceDescriptor::new(
            "ip/ipsec/peer",
            IdentitySpec::new(["name", "secret"]).unwrap(),
        )
        .unwrap();
        assert!(SecretSpec::new("secret").validate(&composite).is_err());
    }
}
