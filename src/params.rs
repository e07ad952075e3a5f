//! Hyperparameter values and step-qualified configurations.
//!
//! A configuration is a flat mapping from `"stepName__paramName"` to a value. Nested
//! composites extend the path: `"branch__PCA__n_components"`.

use crate::error::{ElementError, PipelineError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Separator between path segments of a parameter key.
pub const SEPARATOR: &str = "__";

/// A single hyperparameter value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    IntList(Vec<i64>),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Non-negative integer, as used for sizes and counts.
    pub fn as_usize(&self) -> Option<usize> {
        self.as_i64().and_then(|v| usize::try_from(v).ok())
    }

    /// Like [`as_usize`](Self::as_usize) but with an element error naming the parameter.
    pub fn expect_usize(&self, param: &str) -> Result<usize, ElementError> {
        self.as_usize().ok_or_else(|| {
            ElementError::InvalidParameter(format!("{param} must be a non-negative integer, got {self}"))
        })
    }

    pub fn expect_f64(&self, param: &str) -> Result<f64, ElementError> {
        self.as_f64()
            .ok_or_else(|| ElementError::InvalidParameter(format!("{param} must be numeric, got {self}")))
    }

    pub fn expect_bool(&self, param: &str) -> Result<bool, ElementError> {
        self.as_bool()
            .ok_or_else(|| ElementError::InvalidParameter(format!("{param} must be a bool, got {self}")))
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Str(v) => write!(f, "'{v}'"),
            ParamValue::IntList(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl From<Vec<i64>> for ParamValue {
    fn from(v: Vec<i64>) -> Self {
        ParamValue::IntList(v)
    }
}

/// Parameter values keyed by plain (unqualified) parameter name.
pub type Params = BTreeMap<String, ParamValue>;

/// Search space: fully-qualified key to candidate values.
pub type Hyperparameters = BTreeMap<String, Vec<ParamValue>>;

/// A resolved configuration for one trial, keyed by step path.
///
/// Backed by a `BTreeMap`, so iteration order (and therefore any encoding of it) is
/// independent of insertion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(BTreeMap<String, ParamValue>);

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries whose first path segment is `step`, with that segment stripped.
    pub fn scoped(&self, step: &str) -> Configuration {
        self.0
            .iter()
            .filter_map(|(k, v)| match split_key(k) {
                Some((head, rest)) if head == step => Some((rest.to_string(), v.clone())),
                _ => None,
            })
            .collect()
    }

    /// Parse a configuration from a JSON object such as `{"PCA__n_components": 5}`.
    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(json)
            .map_err(|e| PipelineError::config(format!("invalid configuration JSON: {e}")))
    }

    pub(crate) fn as_map(&self) -> &BTreeMap<String, ParamValue> {
        &self.0
    }
}

impl FromIterator<(String, ParamValue)> for Configuration {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Configuration(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Configuration {
    type Item = (&'a String, &'a ParamValue);
    type IntoIter = std::collections::btree_map::Iter<'a, String, ParamValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Split `"head__rest"` at the first separator.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(SEPARATOR)
}

/// Join path segments with the separator.
pub fn join_key(head: &str, rest: &str) -> String {
    format!("{head}{SEPARATOR}{rest}")
}

/// Prefix every key of a search space with `name`.
pub fn prefix_hyperparameters(name: &str, inner: &Hyperparameters) -> Hyperparameters {
    inner
        .iter()
        .map(|(k, v)| (join_key(name, k), v.clone()))
        .collect()
}
