//! Minimal attribute diff between desired and existing state.

use std::collections::BTreeSet;

use crate::attrs::AttributeSet;

/// Desired attributes whose value differs from, or is absent in, `existing`.
///
/// Comparison is exact on the wire string. Attributes only present on the
/// device are never part of the result; this is a patch, not a replace.
pub fn diff(desired: &AttributeSet, existing: &AttributeSet) -> AttributeSet {
    desired
        .iter()
        .filter(|(key, value)| existing.get(key) != Some(*value))
        .collect()
}

/// Names of the attributes in a diff.
pub fn changed_names(diff: &AttributeSet) -> BTreeSet<String> {
    diff.keys().map(str::to_string).collect()
}
