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

//! Undefined values and the policies that govern them
//!
//! Lookups that fail never raise. They produce an [`Undefined`] carrying the
//! object and key that were asked for, and the environment's
//! [`UndefinedPolicy`] decides what happens when that value is later used.

use super::value::Value;
use crate::error::{Result, TemplateError};
use serde::{Deserialize, Serialize};

/// How undefined values behave when rendered or iterated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UndefinedPolicy {
    /// Renders as an empty string and iterates as an empty sequence
    #[default]
    Lenient,
    /// Renders a placeholder naming the missing value
    Debug,
    /// Fails on rendering and iteration
    Strict,
}

/// A value standing in for a failed lookup
#[derive(Debug, Clone, PartialEq)]
pub struct Undefined {
    policy: UndefinedPolicy,
    obj: Option<Box<Value>>,
    name: Option<String>,
}

impl Undefined {
    /// Create an undefined value for `name` looked up on `obj`
    pub fn new(policy: UndefinedPolicy, obj: Option<Value>, name: Option<String>) -> Self {
        Self {
            policy,
            obj: obj.map(Box::new),
            name,
        }
    }

    /// Undefined value for a plain variable name
    pub fn named(policy: UndefinedPolicy, name: impl Into<String>) -> Self {
        Self::new(policy, None, Some(name.into()))
    }

    /// The policy this value was created under
    pub fn policy(&self) -> UndefinedPolicy {
        self.policy
    }

    /// The object the failed lookup was performed on
    pub fn obj(&self) -> Option<&Value> {
        self.obj.as_deref()
    }

    /// The key or variable name that was missing
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Human-readable description of what is missing
    pub fn hint(&self) -> String {
        match (&self.obj, &self.name) {
            (Some(obj), Some(name)) => {
                format!("'{}' has no attribute '{}'", obj.type_name(), name)
            }
            (None, Some(name)) => format!("'{name}' is undefined"),
            (Some(obj), None) => format!("'{}' has no such element", obj.type_name()),
            (None, None) => "value is undefined".to_string(),
        }
    }

    /// The error raised when a strict undefined is used
    pub fn error(&self) -> TemplateError {
        TemplateError::undefined(self.hint())
    }

    /// Render according to the policy
    pub fn render(&self) -> Result<String> {
        match self.policy {
            UndefinedPolicy::Lenient => Ok(String::new()),
            UndefinedPolicy::Debug => Ok(match (&self.obj, &self.name) {
                (Some(obj), Some(name)) => {
                    format!("{{{{ no such element: {}['{}'] }}}}", obj.type_name(), name)
                }
                (None, Some(name)) => format!("{{{{ {name} }}}}"),
                _ => "{{ undefined value }}".to_string(),
            }),
            UndefinedPolicy::Strict => Err(self.error()),
        }
    }

    /// Iterate according to the policy; lenient policies behave like an empty sequence
    pub fn iterate(&self) -> Result<Vec<Value>> {
        match self.policy {
            UndefinedPolicy::Strict => Err(self.error()),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_renders_empty() {
        let undefined = Undefined::named(UndefinedPolicy::Lenient, "user");
        assert_eq!(undefined.render().unwrap(), "");
        assert!(undefined.iterate().unwrap().is_empty());
    }

    #[test]
    fn test_debug_renders_placeholder() {
        let undefined = Undefined::named(UndefinedPolicy::Debug, "user");
        assert_eq!(undefined.render().unwrap(), "{{ user }}");

        let on_map = Undefined::new(
            UndefinedPolicy::Debug,
            Some(Value::from(vec![1i64])),
            Some("name".into()),
        );
        assert_eq!(on_map.render().unwrap(), "{{ no such element: list['name'] }}");
    }

    #[test]
    fn test_strict_fails_on_use() {
        let undefined = Undefined::named(UndefinedPolicy::Strict, "user");
        let err = undefined.render().unwrap_err();
        assert_eq!(err, TemplateError::undefined("'user' is undefined"));
        assert!(undefined.iterate().is_err());
    }
}
