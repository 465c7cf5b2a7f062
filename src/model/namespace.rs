// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared variable namespaces
//!
//! A [`Namespace`] is a cheaply clonable handle to an ordered, lock-protected
//! variable map. Clones share storage, which is what the "shared" context
//! construction mode relies on: a context built over a shared namespace sees
//! later writes made through any other handle.

use super::value::Value;
use crate::error::{Result, TemplateError};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Shared, ordered variable map
#[derive(Clone, Default)]
pub struct Namespace(Arc<RwLock<IndexMap<String, Value>>>);

impl Namespace {
    /// Create an empty namespace
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Build a namespace from a JSON object
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(map) => Ok(map
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect()),
            other => Err(TemplateError::invalid_argument(format!(
                "template variables must be a JSON object, got {other}"
            ))),
        }
    }

    /// Insert or replace a variable, returning the previous value
    pub fn insert(&self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.write().insert(name.into(), value.into())
    }

    /// Look up a variable
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.read().get(name).cloned()
    }

    /// Check whether a variable is present
    pub fn contains(&self, name: &str) -> bool {
        self.0.read().contains_key(name)
    }

    /// Remove a variable
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.write().shift_remove(name)
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Check if the namespace is empty
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Variable names in insertion order
    pub fn keys(&self) -> Vec<String> {
        self.0.read().keys().cloned().collect()
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> IndexMap<String, Value> {
        self.0.read().clone()
    }

    /// Fresh namespace holding `base` overridden by the contents of `self`
    pub fn merged_over(&self, base: &IndexMap<String, Value>) -> Namespace {
        let mut combined = base.clone();
        for (k, v) in self.0.read().iter() {
            combined.insert(k.clone(), v.clone());
        }
        Namespace::from(combined)
    }

    /// Check whether two handles share storage
    pub fn ptr_eq(&self, other: &Namespace) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.read().iter()).finish()
    }
}

impl From<IndexMap<String, Value>> for Namespace {
    fn from(map: IndexMap<String, Value>) -> Self {
        Namespace(Arc::new(RwLock::new(map)))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Namespace {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Namespace::from(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect::<IndexMap<String, Value>>(),
        )
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Namespace {
    fn from(items: [(K, V); N]) -> Self {
        items.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clones_share_storage() {
        let ns = Namespace::new().with("x", 1i64);
        let alias = ns.clone();
        alias.insert("x", 2i64);
        assert_eq!(ns.get("x"), Some(Value::from(2i64)));
        assert!(ns.ptr_eq(&alias));
    }

    #[test]
    fn test_merged_over_copies() {
        let mut globals = IndexMap::new();
        globals.insert("site".to_string(), Value::from("docs"));
        globals.insert("x".to_string(), Value::from(0i64));

        let vars = Namespace::from([("x", 1i64)]);
        let merged = vars.merged_over(&globals);

        assert_eq!(merged.get("x"), Some(Value::from(1i64)));
        assert_eq!(merged.get("site"), Some(Value::from("docs")));
        assert!(!merged.ptr_eq(&vars));
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn test_from_json_requires_object() {
        let ns = Namespace::from_json(json!({"name": "World"})).unwrap();
        assert_eq!(ns.get("name"), Some(Value::from("World")));
        assert!(Namespace::from_json(json!([1, 2])).is_err());
    }
}
