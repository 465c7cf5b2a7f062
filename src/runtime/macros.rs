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

//! Template macros as callable values

use super::context::Context;
use super::vm::Vm;
use crate::compiler::{Bytecode, MacroInfo};
use crate::environment::Environment;
use crate::error::{Result, TemplateError};
use crate::model::{Kwargs, Namespace, Undefined, Value};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// A macro bound to the render that defined it.
///
/// The macro keeps handles to the defining context's namespaces, so names it
/// reads resolve against the template it was written in, even after being
/// imported elsewhere.
pub struct Macro {
    info: MacroInfo,
    program: Arc<Bytecode>,
    environment: Arc<Environment>,
    parent: Namespace,
    vars: Namespace,
    template_name: Option<String>,
}

impl Macro {
    pub(crate) fn new(info: MacroInfo, program: Arc<Bytecode>, context: &Context) -> Self {
        Self {
            info,
            program,
            environment: Arc::clone(context.environment()),
            parent: context.parent().clone(),
            vars: context.vars().clone(),
            template_name: context.name().map(str::to_string),
        }
    }

    /// Macro name
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Parameter names
    pub fn arguments(&self) -> impl Iterator<Item = &str> {
        self.info.params.iter().map(|(name, _)| name.as_str())
    }

    pub(crate) fn program(&self) -> &Arc<Bytecode> {
        &self.program
    }

    pub(crate) fn entry(&self) -> usize {
        self.info.entry
    }

    /// Whether the macro was defined by the render owning `vars`
    pub(crate) fn defined_in(&self, vars: &Namespace) -> bool {
        self.vars.ptr_eq(vars)
    }

    /// Bind call arguments to parameters.
    ///
    /// Parameters with a default that the caller omitted stay unbound so the
    /// routine's prologue evaluates the default; other omitted parameters are
    /// undefined.
    pub(crate) fn bind_arguments(
        &self,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> Result<IndexMap<String, Value>> {
        let params = &self.info.params;
        if args.len() > params.len() {
            return Err(TemplateError::evaluation(format!(
                "macro '{}' takes not more than {} argument(s), got {}",
                self.name(),
                params.len(),
                args.len()
            )));
        }

        let mut scope = IndexMap::with_capacity(params.len());
        for ((name, _), value) in params.iter().zip(args) {
            scope.insert(name.clone(), value.clone());
        }

        for (key, value) in kwargs {
            if !params.iter().any(|(name, _)| name == key) {
                return Err(TemplateError::evaluation(format!(
                    "macro '{}' takes no keyword argument '{key}'",
                    self.name()
                )));
            }
            if scope.insert(key.clone(), value.clone()).is_some() {
                return Err(TemplateError::evaluation(format!(
                    "macro '{}' got multiple values for argument '{key}'",
                    self.name()
                )));
            }
        }

        let policy = self.environment.undefined_policy();
        for (name, has_default) in params {
            if !has_default && !scope.contains_key(name) {
                scope.insert(name.clone(), Value::Undefined(Undefined::named(policy, name)));
            }
        }
        Ok(scope)
    }

    /// Call the macro from outside its defining render and return its output
    pub fn invoke(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
        let scope = self.bind_arguments(args, kwargs)?;
        let context = Context::sharing(
            Arc::clone(&self.environment),
            self.parent.clone(),
            self.vars.clone(),
            self.template_name.clone(),
        );
        Vm::for_macro(context, self, scope).run_macro()
    }
}

impl fmt::Debug for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Macro")
            .field("name", &self.info.name)
            .field("params", &self.info.params)
            .field("template", &self.template_name)
            .finish()
    }
}
