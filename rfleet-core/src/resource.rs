//! Resource descriptors and identity specifications.

use std::fmt;

use crate::attrs::AttributeSet;
use crate::error::{FleetError, Result};

/// Identifier field used by the device API unless a descriptor overrides it.
pub const DEFAULT_ID_FIELD: &str = ".id";

/// Human-readable name field most collections are keyed by.
pub const NAME_FIELD: &str = "name";

/// Ordered list of attribute names that together identify a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySpec {
    fields: Vec<String>,
}

impl IdentitySpec {
    /// Build an identity from one or more distinct, non-blank field names.
    pub fn new<I, S>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for field in fields {
            let field = field.into();
            if field.trim().is_empty() {
                return Err(FleetError::invalid_argument("identity field name is blank"));
            }
            if out.contains(&field) {
                return Err(FleetError::invalid_argument(format!(
                    "identity field '{field}' listed twice"
                )));
            }
            out.push(field);
        }
        if out.is_empty() {
            return Err(FleetError::invalid_argument(
                "identity specification needs at least one field",
            ));
        }
        Ok(Self { fields: out })
    }

    /// Identity keyed by the `name` field.
    pub fn name() -> Self {
        Self {
            fields: vec![NAME_FIELD.to_string()],
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    /// Resolve the identity values from a desired attribute set.
    pub fn key_from(&self, desired: &AttributeSet) -> Result<IdentityKey> {
        let mut pairs = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            match desired.get(field) {
                Some(value) if !value.is_empty() => pairs.push((field.clone(), value.to_string())),
                Some(_) => {
                    return Err(FleetError::invalid_argument(format!(
                        "identity field '{field}' is empty"
                    )));
                }
                None => {
                    return Err(FleetError::invalid_argument(format!(
                        "desired state is missing identity field '{field}'"
                    )));
                }
            }
        }
        Ok(IdentityKey { pairs })
    }
}

/// Resolved identity: field/value pairs in identity order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityKey {
    pairs: Vec<(String, String)>,
}

impl IdentityKey {
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Whether a listing entry carries exactly these identity values.
    pub fn matches(&self, attrs: &AttributeSet) -> bool {
        self.pairs
            .iter()
            .all(|(field, value)| attrs.get(field) == Some(value.as_str()))
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{field}={value}")?;
        }
        Ok(())
    }
}

/// A resource collection on a device plus how instances are identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    path: String,
    identity: IdentitySpec,
    id_field: String,
}

impl ResourceDescriptor {
    pub fn new(path: impl Into<String>, identity: IdentitySpec) -> Result<Self> {
        let path = path.into().trim_matches('/').to_string();
        if path.is_empty() {
            return Err(FleetError::invalid_argument("resource path is empty"));
        }
        Ok(Self {
            path,
            identity,
            id_field: DEFAULT_ID_FIELD.to_string(),
        })
    }

    /// Collection keyed by `name`.
    pub fn named(path: impl Into<String>) -> Result<Self> {
        Self::new(path, IdentitySpec::name())
    }

    /// Override the device identifier field.
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn identity(&self) -> &IdentitySpec {
        &self.identity
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }
}

/// How to find an existing resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// By identity field values.
    Key(IdentityKey),
    /// By device-assigned identifier.
    Id(String),
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Key(key) => key.fmt(f),
            Lookup::Id(id) => write!(f, "id={id}"),
        }
    }
}

/// A resource as reported by the device, with its identifier resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingResource {
    id: String,
    attrs: AttributeSet,
}

impl ExistingResource {
    /// Wrap a listing entry; the identifier field must be present.
    pub fn from_attrs(attrs: AttributeSet, id_field: &str) -> Result<Self> {
        let id = attrs
            .get(id_field)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                FleetError::malformed(format!("resource is missing identifier field '{id_field}'"))
            })?
            .to_string();
        Ok(Self { id, attrs })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn attrs(&self) -> &AttributeSet {
        &self.attrs
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.attrs.get(field)
    }

    pub fn into_attrs(self) -> AttributeSet {
        self.attrs
    }
}
