//! Driver option maps.
//!
//! Requests carry free-form JSON option objects. Before any of it reaches a
//! statement, values are normalized to their textual form so the rendered DDL
//! and a later catalog read agree on a single representation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::identifier::validate_identifier;
use crate::error::{ProvisionError, Result};

/// Ordered option map with string values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionMap(BTreeMap<String, String>);

impl OptionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize a JSON object of options.
    ///
    /// Strings pass through, integers and floats use their shortest decimal
    /// form, booleans become `true`/`false`. `null`, arrays and nested
    /// objects have no unambiguous text form and are rejected.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => {
                let mut options = Self::new();
                for (key, value) in map {
                    options.insert(key.clone(), normalize_value(key, value)?)?;
                }
                Ok(options)
            }
            other => Err(ProvisionError::InvalidOption {
                key: String::new(),
                reason: format!("options must be a JSON object, got {}", other),
            }),
        }
    }

    /// Insert a normalized value; the key must be a valid identifier.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        validate_identifier(&key).map_err(|e| ProvisionError::InvalidOption {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.0.insert(key, value.into());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
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

    /// Keep only the listed keys.
    pub fn restricted_to(&self, keys: &[&str]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| keys.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Fail if any of `keys` is present.
    pub fn reject_reserved(&self, keys: &[&str]) -> Result<()> {
        match keys.iter().find(|k| self.contains_key(k)) {
            Some(key) => Err(ProvisionError::InvalidOption {
                key: key.to_string(),
                reason: "reserved option is set by the provisioner".to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for OptionMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

fn normalize_value(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Err(ProvisionError::InvalidOption {
            key: key.to_string(),
            reason: "null has no option value".to_string(),
        }),
        Value::Array(_) | Value::Object(_) => Err(ProvisionError::InvalidOption {
            key: key.to_string(),
            reason: "nested values are not supported".to_string(),
        }),
    }
}
