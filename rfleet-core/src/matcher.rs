//! Locate an existing resource in a device listing.

use crate::attrs::AttributeSet;
use crate::error::{FleetError, Result};
use crate::resource::{ExistingResource, Lookup, ResourceDescriptor};

/// Result of matching a lookup against a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    NotFound,
    Unique(ExistingResource),
    /// More than one entry matched. `first` is the earliest in listing order.
    Ambiguous {
        first: ExistingResource,
        count: usize,
    },
}

impl Match {
    /// The single matching resource, `None` if nothing matched.
    ///
    /// Ambiguous matches are an identity-specification error.
    pub fn into_unique(self, lookup: &Lookup) -> Result<Option<ExistingResource>> {
        match self {
            Match::NotFound => Ok(None),
            Match::Unique(res) => Ok(Some(res)),
            Match::Ambiguous { count, .. } => Err(FleetError::invalid_argument(format!(
                "identity {lookup} matches {count} resources"
            ))),
        }
    }
}

/// Find the entry of `listing` selected by `lookup`.
pub fn find(
    listing: &[AttributeSet],
    descriptor: &ResourceDescriptor,
    lookup: &Lookup,
) -> Result<Match> {
    let id_field = descriptor.id_field();
    let mut hits = listing.iter().filter(|entry| match lookup {
        Lookup::Key(key) => key.matches(entry),
        Lookup::Id(id) => entry.get(id_field) == Some(id.as_str()),
    });

    let Some(first) = hits.next() else {
        return Ok(Match::NotFound);
    };
    let first = ExistingResource::from_attrs(first.clone(), id_field)?;
    let extra = hits.count();

    if extra == 0 {
        Ok(Match::Unique(first))
    } else {
        Ok(Match::Ambiguous {
            first,
            count: extra + 1,
        })
    }
}
