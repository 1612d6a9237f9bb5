//! AttributeSet: the string-to-string representation of a device resource.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FleetError, Result};

/// Unordered attribute map using the device's wire representation.
///
/// Backed by a `BTreeMap` so iteration order (and anything rendered from it)
/// is deterministic; equality is by key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSet(BTreeMap<String, String>);

impl AttributeSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy of this set without `key`.
    pub fn without(&self, key: &str) -> Self {
        let mut copy = self.clone();
        copy.0.remove(key);
        copy
    }

    /// Convert a JSON object returned by a device.
    ///
    /// Strings are kept verbatim, numbers and booleans become their JSON
    /// text, `null` is dropped and nested values are kept as compact JSON.
    pub fn from_json_object(map: &Map<String, Value>) -> Self {
        map.iter()
            .filter_map(|(k, v)| {
                let v = match v {
                    Value::Null => return None,
                    Value::String(s) => s.clone(),
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    other => other.to_string(),
                };
                Some((k.clone(), v))
            })
            .collect()
    }

    /// Convert a JSON value that must be an object.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_json_object(map)),
            other => Err(FleetError::malformed(format!(
                "expected JSON object, got {}",
                json_type(other)
            ))),
        }
    }

    /// Render as a JSON object with string values.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }
}

/// Parse a `key=value` pair. The value may itself contain `=`.
pub fn parse_pair(s: &str) -> Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| FleetError::invalid_argument(format!("expected key=value, got '{s}'")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(FleetError::invalid_argument(format!(
            "empty attribute name in '{s}'"
        )));
    }
    Ok((key.to_string(), value.to_string()))
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for AttributeSet {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.0
            .extend(iter.into_iter().map(|(k, v)| (k.into(), v.into())));
    }
}

impl<'a> IntoIterator for &'a AttributeSet {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
