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

//! Execution context for one render

use crate::compiler::Bytecode;
use crate::environment::Environment;
use crate::model::{Namespace, Undefined, Value};
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;

/// Entry point of a block routine
#[derive(Debug, Clone)]
pub struct BlockRef {
    /// Program holding the routine
    pub program: Arc<Bytecode>,
    /// First instruction of the routine
    pub entry: usize,
}

/// Per-render variable and block state.
///
/// Lookups check the template's own top-level assignments (`vars`) first,
/// then the `parent` namespace holding globals and render variables.
#[derive(Debug, Clone)]
pub struct Context {
    environment: Arc<Environment>,
    parent: Namespace,
    vars: Namespace,
    exported: IndexSet<String>,
    name: Option<String>,
    blocks: IndexMap<String, Vec<BlockRef>>,
    /// Templates of enclosing renders still in progress, outermost first
    nesting: Vec<String>,
}

impl Context {
    /// Create a context over `parent`, registering the blocks of `program`
    pub fn new(
        environment: Arc<Environment>,
        parent: Namespace,
        name: Option<String>,
        program: &Arc<Bytecode>,
    ) -> Self {
        let blocks = program
            .blocks
            .iter()
            .map(|(block, entry)| {
                (
                    block.clone(),
                    vec![BlockRef {
                        program: Arc::clone(program),
                        entry: *entry,
                    }],
                )
            })
            .collect();

        Self {
            environment,
            parent,
            vars: Namespace::new(),
            exported: IndexSet::new(),
            name,
            blocks,
            nesting: Vec::new(),
        }
    }

    /// Context that shares another context's variables (used by macro calls)
    pub(crate) fn sharing(
        environment: Arc<Environment>,
        parent: Namespace,
        vars: Namespace,
        name: Option<String>,
    ) -> Self {
        Self {
            environment,
            parent,
            vars,
            exported: IndexSet::new(),
            name,
            blocks: IndexMap::new(),
            nesting: Vec::new(),
        }
    }

    /// Mark this context as evaluated on behalf of the templates in `nesting`
    pub(crate) fn within(mut self, nesting: Vec<String>) -> Self {
        self.nesting = nesting;
        self
    }

    pub(crate) fn nesting(&self) -> &[String] {
        &self.nesting
    }

    /// Environment the template belongs to
    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    /// Template name
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Globals and render variables
    pub fn parent(&self) -> &Namespace {
        &self.parent
    }

    /// Top-level assignments made while rendering
    pub fn vars(&self) -> &Namespace {
        &self.vars
    }

    /// Look up a variable without an undefined fallback
    pub fn get(&self, key: &str) -> Option<Value> {
        self.vars.get(key).or_else(|| self.parent.get(key))
    }

    /// Check whether a variable is visible
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains(key) || self.parent.contains(key)
    }

    /// Look up a variable, substituting the environment's undefined policy
    pub fn resolve(&self, key: &str) -> Value {
        self.get(key).unwrap_or_else(|| {
            Value::Undefined(Undefined::named(self.environment.undefined_policy(), key))
        })
    }

    /// Assign a top-level variable
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.vars.insert(key, value);
    }

    /// Mark a top-level name as exported; names starting with `_` stay private
    pub fn export(&mut self, key: &str) {
        if !key.starts_with('_') {
            self.exported.insert(key.to_string());
        }
    }

    /// Exported names in definition order
    pub fn exported_names(&self) -> impl Iterator<Item = &str> {
        self.exported.iter().map(String::as_str)
    }

    /// Exported variables and their current values
    pub fn get_exported(&self) -> IndexMap<String, Value> {
        self.exported
            .iter()
            .filter_map(|key| self.vars.get(key).map(|v| (key.clone(), v)))
            .collect()
    }

    /// Every visible variable, top-level assignments overriding the parent
    pub fn get_all(&self) -> IndexMap<String, Value> {
        let mut all = self.parent.snapshot();
        all.extend(self.vars.snapshot());
        all
    }

    /// Innermost override of a block
    pub fn block(&self, name: &str) -> Option<&BlockRef> {
        self.blocks.get(name).and_then(|stack| stack.first())
    }

    /// Register a parent template's blocks behind the ones already known
    pub(crate) fn push_parent_blocks(&mut self, program: &Arc<Bytecode>) {
        for (name, entry) in &program.blocks {
            self.blocks.entry(name.clone()).or_default().push(BlockRef {
                program: Arc::clone(program),
                entry: *entry,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(parent: Namespace) -> Context {
        Context::new(Environment::new(), parent, Some("t".into()), &Arc::new(Bytecode::new()))
    }

    #[test]
    fn test_vars_shadow_parent() {
        let ctx = context(Namespace::from([("x", 1), ("y", 2)]));
        ctx.set("x", Value::Integer(10));
        assert_eq!(ctx.resolve("x"), Value::Integer(10));
        assert_eq!(ctx.resolve("y"), Value::Integer(2));
        assert!(ctx.resolve("z").is_undefined());
        assert_eq!(ctx.get_all()["x"], Value::Integer(10));
    }

    #[test]
    fn test_exports_skip_private_names() {
        let mut ctx = context(Namespace::new());
        ctx.set("public", Value::Integer(1));
        ctx.set("_private", Value::Integer(2));
        ctx.export("public");
        ctx.export("_private");
        assert_eq!(ctx.exported_names().collect::<Vec<_>>(), vec!["public"]);
        assert_eq!(ctx.get_exported().len(), 1);
    }

    #[test]
    fn test_assignments_do_not_touch_parent() {
        let parent = Namespace::from([("x", 1)]);
        let ctx = context(parent.clone());
        ctx.set("x", Value::Integer(2));
        assert_eq!(parent.get("x"), Some(Value::Integer(1)));
    }

    #[test]
    fn test_block_stack_prefers_child() {
        let mut child = Bytecode::new();
        child.blocks.insert("body".into(), 4);
        let mut parent = Bytecode::new();
        parent.blocks.insert("body".into(), 9);
        parent.blocks.insert("footer".into(), 12);

        let mut ctx = Context::new(Environment::new(), Namespace::new(), None, &Arc::new(child));
        ctx.push_parent_blocks(&Arc::new(parent));
        assert_eq!(ctx.block("body").map(|b| b.entry), Some(4));
        assert_eq!(ctx.block("footer").map(|b| b.entry), Some(12));
        assert!(ctx.block("missing").is_none());
    }
}
