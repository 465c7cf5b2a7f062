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

//! Attribute and item resolution
//!
//! Lookups never fail: when neither the named-field capability nor the
//! keyed-item capability of a value produces a result, the configured
//! undefined policy is substituted.

use crate::model::{Undefined, UndefinedPolicy, Value};

/// Named-field capability of a value
fn field(obj: &Value, name: &str) -> Option<Value> {
    match obj {
        Value::Object(object) => object.get_field(name),
        _ => None,
    }
}

/// Keyed-item capability of a value
fn item(obj: &Value, key: &Value) -> Option<Value> {
    match (obj, key) {
        (Value::Map(map), key) => key.as_str().and_then(|k| map.get(k).cloned()),
        (Value::List(items), Value::Integer(index)) => {
            wrap_index(*index, items.len()).map(|i| items[i].clone())
        }
        (Value::String(s) | Value::Markup(s), Value::Integer(index)) => {
            let count = s.chars().count();
            wrap_index(*index, count)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::from(c.to_string()))
        }
        (Value::Object(object), key) => object.get_item(key),
        _ => None,
    }
}

/// Resolve a possibly negative index against a length
fn wrap_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { index + len } else { index };
    if (0..len).contains(&resolved) {
        usize::try_from(resolved).ok()
    } else {
        None
    }
}

fn key_description(key: &Value) -> String {
    key.as_str().map_or_else(|| key.repr(), str::to_string)
}

fn missing(policy: UndefinedPolicy, obj: &Value, key: &Value) -> Value {
    Value::Undefined(Undefined::new(
        policy,
        Some(obj.clone()),
        Some(key_description(key)),
    ))
}

/// Resolve `key` on `obj`: field access first, then item access, then undefined.
///
/// Only string keys are tried as field names; any other key goes straight to
/// item access.
pub fn resolve(policy: UndefinedPolicy, obj: &Value, key: &Value) -> Value {
    if let Some(value) = key.as_str().and_then(|name| field(obj, name)) {
        return value;
    }
    item(obj, key).unwrap_or_else(|| missing(policy, obj, key))
}

/// `obj.name` lookup
pub fn getattr(policy: UndefinedPolicy, obj: &Value, name: &str) -> Value {
    resolve(policy, obj, &Value::from(name))
}

/// `obj[key]` lookup: item access first, then field access for string keys
pub fn getitem(policy: UndefinedPolicy, obj: &Value, key: &Value) -> Value {
    if let Some(value) = item(obj, key) {
        return value;
    }
    key.as_str()
        .and_then(|name| field(obj, name))
        .unwrap_or_else(|| missing(policy, obj, key))
}
