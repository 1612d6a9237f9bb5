//! Device handles and the transport seam the reconciler talks through.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::attrs::AttributeSet;
use crate::error::Result;
use crate::resource::ResourceDescriptor;

/// Login for a device API. The password never shows up in debug output.
pub struct Credentials {
    pub username: String,
    password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn with_secret(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    /// Only for building the authorization header.
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self::with_secret(self.username.clone(), self.password.clone())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug)]
struct TargetInner {
    name: String,
    endpoint: String,
    credentials: Option<Credentials>,
}

/// One device of the fleet.
///
/// Cheap to clone; clones share the same read-only handle so concurrent
/// workers can use it without coordination.
#[derive(Debug, Clone)]
pub struct DeviceTarget(Arc<TargetInner>);

impl DeviceTarget {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        credentials: Option<Credentials>,
    ) -> Self {
        Self(Arc::new(TargetInner {
            name: name.into(),
            endpoint: endpoint.into(),
            credentials,
        }))
    }

    /// Label used in logs and outcomes.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn endpoint(&self) -> &str {
        &self.0.endpoint
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.0.credentials.as_ref()
    }
}

impl PartialEq for DeviceTarget {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.name == other.0.name && self.0.endpoint == other.0.endpoint)
    }
}

impl Eq for DeviceTarget {}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

/// I/O against a single device's configuration API.
///
/// Implementations own the wire format and verb mapping; every method is a
/// single request with no retry at this layer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Read the full collection.
    async fn list(
        &self,
        device: &DeviceTarget,
        resource: &ResourceDescriptor,
    ) -> Result<Vec<AttributeSet>>;

    /// Create a resource. Returns the device's echo of it, if any.
    async fn create(
        &self,
        device: &DeviceTarget,
        resource: &ResourceDescriptor,
        attrs: &AttributeSet,
    ) -> Result<Option<AttributeSet>>;

    /// Partially update the resource with identifier `id`.
    async fn update(
        &self,
        device: &DeviceTarget,
        resource: &ResourceDescriptor,
        id: &str,
        attrs: &AttributeSet,
    ) -> Result<()>;

    /// Read the collection asking explicitly for `fields`, including ones
    /// the plain listing leaves out.
    async fn query(
        &self,
        device: &DeviceTarget,
        resource: &ResourceDescriptor,
        fields: &[String],
    ) -> Result<Vec<AttributeSet>>;
}
