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

//! Core value type for template evaluation
//!
//! [`Value`] is the dynamic value every expression evaluates to. Host data
//! enters as plain variants (converted from Rust primitives or `serde_json`
//! values) or as an [`Object`], which exposes named-field and keyed-item access
//! to the resolver.

use super::undefined::Undefined;
use crate::error::{Result, TemplateError};
use crate::runtime::Macro;
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Keyword arguments passed to calls, filters and macros
pub type Kwargs = IndexMap<String, Value>;

/// Global variables of an environment or template
pub type Globals = IndexMap<String, Value>;

/// Signature of native functions callable from templates
pub type NativeFn = dyn Fn(&[Value], &Kwargs) -> Result<Value> + Send + Sync;

/// Host object exposed to templates.
///
/// `get_field` is the named-field capability used by `obj.name`, `get_item`
/// the keyed-item capability used by `obj[key]`. The resolver tries fields
/// first, then items, and falls back to an undefined value.
pub trait Object: Send + Sync + fmt::Debug {
    /// Type name shown in diagnostics
    fn type_name(&self) -> &str {
        "object"
    }

    /// Named field access
    fn get_field(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Keyed item access
    fn get_item(&self, _key: &Value) -> Option<Value> {
        None
    }

    /// String form used when the object is printed
    fn render(&self) -> Result<String> {
        Ok(format!("<{}>", self.type_name()))
    }
}

/// A named native function
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    func: Arc<NativeFn>,
}

impl Function {
    /// Wrap a closure as a template-callable function
    pub fn new<F>(name: impl Into<Arc<str>>, func: F) -> Self
    where
        F: Fn(&[Value], &Kwargs) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the function
    pub fn call(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
        (self.func)(args, kwargs)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

/// Dynamic template value
#[derive(Clone)]
pub enum Value {
    /// Result of a failed lookup
    Undefined(Undefined),
    /// Explicit null
    None,
    /// Boolean value
    Bool(bool),
    /// Integer value (64-bit signed)
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(Arc<str>),
    /// String that is safe to emit without escaping
    Markup(Arc<str>),
    /// Ordered sequence
    List(Arc<Vec<Value>>),
    /// String-keyed mapping preserving insertion order
    Map(Arc<IndexMap<String, Value>>),
    /// Native function
    Function(Function),
    /// Macro defined in a template
    Macro(Arc<Macro>),
    /// Host object
    Object(Arc<dyn Object>),
}

impl Value {
    /// Create a safe string that bypasses autoescaping
    pub fn safe(s: impl Into<Arc<str>>) -> Self {
        Value::Markup(s.into())
    }

    /// Create a host object value
    pub fn from_object<T: Object + 'static>(obj: T) -> Self {
        Value::Object(Arc::new(obj))
    }

    /// Create a function value
    pub fn function<F>(name: &str, func: F) -> Self
    where
        F: Fn(&[Value], &Kwargs) -> Result<Value> + Send + Sync + 'static,
    {
        Value::Function(Function::new(name, func))
    }

    /// Type name used in diagnostics
    pub fn type_name(&self) -> &str {
        match self {
            Value::Undefined(_) => "undefined",
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "str",
            Value::Markup(_) => "markup",
            Value::List(_) => "list",
            Value::Map(_) => "dict",
            Value::Function(_) => "function",
            Value::Macro(_) => "macro",
            Value::Object(obj) => obj.type_name(),
        }
    }

    /// Check if this is an undefined value
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined(_))
    }

    /// Check if this is the null value
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Check if this string is marked safe
    pub fn is_safe(&self) -> bool {
        matches!(self, Value::Markup(_))
    }

    /// Check if this value can be called
    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Macro(_))
    }

    /// Truthiness used by conditionals and logical operators
    pub fn is_true(&self) -> bool {
        match self {
            Value::Undefined(_) | Value::None => false,
            Value::Bool(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) | Value::Markup(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Function(_) | Value::Macro(_) | Value::Object(_) => true,
        }
    }

    /// Get as string slice if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Markup(s) => Some(s),
            _ => None,
        }
    }

    /// Get as integer if this is an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as float if this is numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as slice if this is a list
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Get as map if this is a mapping
    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Get the host object if this wraps one
    pub fn as_object(&self) -> Option<&Arc<dyn Object>> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Number of elements for sized values
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) | Value::Markup(s) => Some(s.chars().count()),
            Value::List(items) => Some(items.len()),
            Value::Map(map) => Some(map.len()),
            _ => None,
        }
    }

    /// Render the value to the text that ends up in template output
    pub fn render(&self) -> Result<String> {
        match self {
            Value::Undefined(undefined) => undefined.render(),
            Value::None => Ok(String::new()),
            Value::String(s) | Value::Markup(s) => Ok(s.to_string()),
            Value::Object(obj) => obj.render(),
            other => Ok(other.repr()),
        }
    }

    /// Literal-style representation; strings are quoted
    pub fn repr(&self) -> String {
        match self {
            Value::Undefined(_) => String::new(),
            Value::None => "none".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::String(s) | Value::Markup(s) => format!("'{}'", s.replace('\'', "\\'")),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Map(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("'{}': {}", k, v.repr()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Function(func) => format!("<function {}>", func.name()),
            Value::Macro(m) => format!("<macro {}>", m.name()),
            Value::Object(obj) => format!("<{}>", obj.type_name()),
        }
    }

    /// Items produced when iterating this value in a `for` loop
    pub fn iterate(&self) -> Result<Vec<Value>> {
        match self {
            Value::Undefined(undefined) => undefined.iterate(),
            Value::List(items) => Ok(items.as_ref().clone()),
            Value::Map(map) => Ok(map.keys().map(|k| Value::from(k.as_str())).collect()),
            Value::String(s) | Value::Markup(s) => {
                Ok(s.chars().map(|c| Value::from(c.to_string())).collect())
            }
            other => Err(TemplateError::evaluation(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    /// Call this value with positional and keyword arguments
    pub fn call(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
        match self {
            Value::Function(func) => func.call(args, kwargs),
            Value::Macro(m) => m.invoke(args, kwargs),
            Value::Undefined(undefined) => Err(undefined.error()),
            other => Err(TemplateError::evaluation(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    /// Ordering between comparable values
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => {
                a.as_f64()?.partial_cmp(&b.as_f64()?)
            }
            (a, b) => match (a.as_str(), b.as_str()) {
                (Some(x), Some(y)) => Some(x.cmp(y)),
                _ => match (a.as_list(), b.as_list()) {
                    (Some(x), Some(y)) => {
                        for (l, r) in x.iter().zip(y.iter()) {
                            match l.compare(r)? {
                                Ordering::Equal => continue,
                                ord => return Some(ord),
                            }
                        }
                        Some(x.len().cmp(&y.len()))
                    }
                    _ => None,
                },
            },
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined(_), Value::Undefined(_)) => true,
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(&a.func, &b.func),
            (Value::Macro(a), Value::Macro(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            (a, b) => match (a.as_str(), b.as_str()) {
                (Some(x), Some(y)) => x == y,
                _ => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x == y,
                    _ => false,
                },
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render() {
            Ok(s) => f.write_str(&s),
            Err(_) => Ok(()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined(u) => write!(f, "Undefined({})", u.hint()),
            Value::Markup(s) => write!(f, "Markup({s:?})"),
            Value::Object(obj) => write!(f, "{obj:?}"),
            other => f.write_str(&other.repr()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        match i64::try_from(value) {
            Ok(i) => Value::Integer(i),
            Err(_) => Value::Float(value as f64),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value.into())
    }
}

impl From<Arc<str>> for Value {
    fn from(value: Arc<str>) -> Self {
        Value::String(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(Arc::new(values.into_iter().map(Into::into).collect()))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::None)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Value::Map(Arc::new(map))
    }
}

impl From<Function> for Value {
    fn from(func: Function) -> Self {
        Value::Function(func)
    }
}

impl From<Undefined> for Value {
    fn from(undefined: Undefined) -> Self {
        Value::Undefined(undefined)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => {
                Value::List(Arc::new(items.into_iter().map(Value::from).collect()))
            }
            serde_json::Value::Object(map) => Value::Map(Arc::new(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UndefinedPolicy;
    use serde_json::json;

    #[test]
    fn test_value_truthiness() {
        assert!(!Value::None.is_true());
        assert!(!Value::from(0i64).is_true());
        assert!(!Value::from("").is_true());
        assert!(!Value::from(Vec::<Value>::new()).is_true());
        assert!(!Value::Undefined(Undefined::named(UndefinedPolicy::Lenient, "x")).is_true());
        assert!(Value::from("x").is_true());
        assert!(Value::from(1.5).is_true());
    }

    #[test]
    fn test_json_conversion() {
        let value = Value::from(json!({"name": "World", "tags": ["a", "b"], "n": 2}));
        let map = value.as_map().unwrap();
        assert_eq!(map["name"], Value::from("World"));
        assert_eq!(map["tags"], Value::from(vec!["a", "b"]));
        assert_eq!(map["n"], Value::from(2i64));
    }

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert_eq!(Value::from(2i64), Value::from(2.0));
        assert_ne!(Value::from(2i64), Value::from("2"));
        assert_eq!(Value::from("a"), Value::safe("a"));
    }

    #[test]
    fn test_render_and_repr() {
        assert_eq!(Value::from(3.0).render().unwrap(), "3.0");
        assert_eq!(Value::from(true).render().unwrap(), "true");
        assert_eq!(Value::None.render().unwrap(), "");
        assert_eq!(Value::from(vec!["a", "b"]).render().unwrap(), "['a', 'b']");
    }

    #[test]
    fn test_iterate_map_yields_keys() {
        let mut map = IndexMap::new();
        map.insert("b".to_string(), Value::from(1i64));
        map.insert("a".to_string(), Value::from(2i64));
        let keys = Value::from(map).iterate().unwrap();
        assert_eq!(keys, vec![Value::from("b"), Value::from("a")]);
    }

    #[test]
    fn test_call_non_callable_fails() {
        let err = Value::from(1i64).call(&[], &Kwargs::new()).unwrap_err();
        assert_eq!(err, TemplateError::evaluation("'int' object is not callable"));
    }

    #[test]
    fn test_function_call() {
        let double = Value::function("double", |args, _| {
            Ok(Value::from(args[0].as_i64().unwrap_or(0) * 2))
        });
        assert_eq!(
            double.call(&[Value::from(21i64)], &Kwargs::new()).unwrap(),
            Value::from(42i64)
        );
    }
}
