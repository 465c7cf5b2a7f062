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

use super::Template;
use crate::error::Result;
use crate::model::{Object, Value};
use crate::runtime::{Context, Vm};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// A fully evaluated template: its exported names plus its output
#[derive(Debug, Clone)]
pub struct TemplateModule {
    name: Option<String>,
    body: String,
    exports: IndexMap<String, Value>,
}

impl TemplateModule {
    /// Run `template` to completion in `context` and capture its exports
    pub(crate) fn new(template: &Template, context: Context) -> Result<Self> {
        let mut vm = Vm::new(context, Arc::clone(template.code()));
        let mut body = String::new();
        while let Some(chunk) = vm.next_chunk() {
            body.push_str(&chunk?);
        }
        let exports = vm.into_context().get_exported();
        log::trace!(
            "Built module for {} with {} export(s)",
            template.name().unwrap_or("<template>"),
            exports.len()
        );
        Ok(Self {
            name: template.name().map(str::to_string),
            body,
            exports,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Concatenated output of the template
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Exported value by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.exports.get(name)
    }

    pub fn exports(&self) -> &IndexMap<String, Value> {
        &self.exports
    }
}

impl Object for TemplateModule {
    fn type_name(&self) -> &str {
        "module"
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        self.exports.get(name).cloned()
    }

    fn render(&self) -> Result<String> {
        Ok(self.body.clone())
    }
}

impl fmt::Display for TemplateModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use crate::environment::Environment;
    use crate::model::{Kwargs, Namespace, Value};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_macro_export() {
        let env = Environment::new();
        let template = env
            .from_string("{% macro foo() %}42{% endmacro %}23", None)
            .unwrap();
        let module = template.module().unwrap();
        assert_eq!(module.body(), "23");
        assert_eq!(module.to_string(), "23");

        let foo = module.get("foo").unwrap();
        assert!(foo.is_callable());
        assert_eq!(foo.call(&[], &Kwargs::new()).unwrap().render().unwrap(), "42");
    }

    #[test]
    fn test_private_names_are_not_exported() {
        let env = Environment::new();
        let template = env
            .from_string("{% set public = 1 %}{% set _private = 2 %}", None)
            .unwrap();
        let module = template.make_module(Namespace::new(), false).unwrap();
        assert_eq!(module.get("public"), Some(&Value::from(1)));
        assert!(module.get("_private").is_none());
    }

    #[test]
    fn test_exported_macros_see_module_variables() {
        let env = Environment::new();
        let template = env
            .from_string(
                "{% set greeting = 'hi' %}{% macro greet(who) %}{{ greeting }} {{ who }}{% endmacro %}",
                None,
            )
            .unwrap();
        let module = template.make_module([("unused", 0)], false).unwrap();
        let greet = module.get("greet").unwrap();
        let out = greet.call(&[Value::from("bob")], &Kwargs::new()).unwrap();
        assert_eq!(out.render().unwrap(), "hi bob");
    }
}
