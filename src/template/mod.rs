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

//! Compiled templates
//!
//! A [`Template`] pairs compiled bytecode with the environment it was
//! compiled for. Every render builds a fresh [`Context`] and drives a
//! [`Vm`] over the bytecode; nothing about a render is stored on the
//! template except the memoized default [`TemplateModule`].

mod module;
mod stream;

pub use module::TemplateModule;
pub use stream::TemplateStream;

use crate::compiler::Bytecode;
use crate::environment::{Environment, TemplateOptions, spontaneous_environment};
use crate::error::Result;
use crate::model::{Globals, Namespace};
use crate::runtime::{Context, Vm};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

/// Check telling whether a template's source is unchanged
pub type UpToDate = Arc<dyn Fn() -> bool + Send + Sync>;

/// A compiled template
pub struct Template {
    environment: Arc<Environment>,
    code: Arc<Bytecode>,
    globals: Arc<Globals>,
    uptodate: Option<UpToDate>,
    module: OnceCell<Arc<TemplateModule>>,
}

impl Template {
    /// Compile `source` with default settings.
    ///
    /// The environment comes from the process-wide pool, so repeated calls
    /// share one environment.
    pub fn new(source: &str) -> Result<Arc<Self>> {
        Self::with_options(source, &TemplateOptions::default())
    }

    /// Compile `source` with the pooled environment for `options`
    pub fn with_options(source: &str, options: &TemplateOptions) -> Result<Arc<Self>> {
        spontaneous_environment(options)?.from_string(source, None)
    }

    /// Wrap compiled bytecode
    pub fn from_code(
        environment: Arc<Environment>,
        code: Arc<Bytecode>,
        globals: Arc<Globals>,
        uptodate: Option<UpToDate>,
    ) -> Arc<Self> {
        Arc::new(Self {
            environment,
            code,
            globals,
            uptodate,
            module: OnceCell::new(),
        })
    }

    /// Template name, `None` for templates built from strings
    pub fn name(&self) -> Option<&str> {
        self.code.metadata.name.as_deref()
    }

    pub fn filename(&self) -> &str {
        &self.code.metadata.filename
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    pub fn code(&self) -> &Arc<Bytecode> {
        &self.code
    }

    pub fn globals(&self) -> &Arc<Globals> {
        &self.globals
    }

    /// Names of the blocks this template defines
    pub fn block_names(&self) -> impl Iterator<Item = &str> {
        self.code.blocks.keys().map(String::as_str)
    }

    /// `(source line, instruction index)` pairs
    pub fn debug_info(&self) -> &[(usize, usize)] {
        &self.code.debug_info
    }

    /// Source line of the instruction at `index`
    pub fn get_corresponding_lineno(&self, index: usize) -> usize {
        self.code.source_line(index)
    }

    /// Whether the source this template was compiled from is unchanged
    pub fn is_up_to_date(&self) -> bool {
        self.uptodate.as_ref().is_none_or(|check| check())
    }

    /// Build the context for one render.
    ///
    /// Unless `shared` is set, the variables are copied over the template
    /// globals into a new namespace. A shared context reads `vars` directly,
    /// so later changes to it are visible to the render.
    pub fn new_context(&self, vars: impl Into<Namespace>, shared: bool) -> Context {
        let vars = vars.into();
        let parent = if shared {
            vars
        } else {
            vars.merged_over(&self.globals)
        };
        Context::new(
            Arc::clone(&self.environment),
            parent,
            self.name().map(str::to_string),
            &self.code,
        )
    }

    /// Lazily render, one chunk per output instruction
    pub fn generate(&self, vars: impl Into<Namespace>) -> TemplateGenerator {
        let context = self.new_context(vars, false);
        TemplateGenerator {
            vm: Vm::new(context, Arc::clone(&self.code)),
        }
    }

    /// Render to a string
    pub fn render(&self, vars: impl Into<Namespace>) -> Result<String> {
        self.generate(vars).collect()
    }

    /// Render as a [`TemplateStream`]
    pub fn stream(&self, vars: impl Into<Namespace>) -> TemplateStream {
        TemplateStream::new(self.generate(vars))
    }

    /// Evaluate the template as a module; runs the template on every call
    pub fn make_module(
        &self,
        vars: impl Into<Namespace>,
        shared: bool,
    ) -> Result<Arc<TemplateModule>> {
        let context = self.new_context(vars, shared);
        TemplateModule::new(self, context).map(Arc::new)
    }

    /// Module evaluated without variables, built once and then reused
    pub fn module(&self) -> Result<Arc<TemplateModule>> {
        self.module_within(Vec::new())
    }

    /// Memoized module built on behalf of the enclosing templates in `nesting`.
    ///
    /// The module is evaluated outside the cell so a nested import of a
    /// template still being evaluated reaches the cycle check in the VM
    /// instead of re-entering the cell.
    pub(crate) fn module_within(&self, nesting: Vec<String>) -> Result<Arc<TemplateModule>> {
        if let Some(module) = self.module.get() {
            return Ok(Arc::clone(module));
        }
        let context = self.new_context(Namespace::new(), false).within(nesting);
        let module = Arc::new(TemplateModule::new(self, context)?);
        Ok(Arc::clone(self.module.get_or_init(|| module)))
    }

    /// Full render on behalf of the enclosing templates in `nesting`
    pub(crate) fn render_within(
        &self,
        vars: impl Into<Namespace>,
        nesting: Vec<String>,
    ) -> Result<String> {
        let context = self.new_context(vars, false).within(nesting);
        let mut vm = Vm::new(context, Arc::clone(&self.code));
        let mut out = String::new();
        while let Some(chunk) = vm.next_chunk() {
            out.push_str(&chunk?);
        }
        Ok(out)
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name())
            .field("filename", &self.filename())
            .field("blocks", &self.code.blocks.len())
            .finish()
    }
}

/// Lazy render of a template; yields output chunks as the VM produces them
pub struct TemplateGenerator {
    vm: Vm,
}

impl TemplateGenerator {
    /// Context of the running render
    pub fn context(&self) -> &Context {
        self.vm.context()
    }
}

impl Iterator for TemplateGenerator {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.vm.next_chunk()
    }
}

impl fmt::Debug for TemplateGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateGenerator").field("vm", &self.vm).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TemplateError;
    use crate::model::Value;
    use pretty_assertions::assert_eq;

    fn template(source: &str) -> Arc<Template> {
        Environment::new().from_string(source, None).unwrap()
    }

    #[test]
    fn test_render_hello() {
        let template = template("Hello {{ name }}!");
        assert_eq!(template.render([("name", "World")]).unwrap(), "Hello World!");
    }

    #[test]
    fn test_generate_is_lazy() {
        let template = template("a{{ x }}b{{ 1 // 0 }}c");
        let mut chunks = template.generate([("x", 1)]);
        assert_eq!(chunks.next().unwrap().unwrap(), "a");
        assert_eq!(chunks.next().unwrap().unwrap(), "1");
        assert_eq!(chunks.next().unwrap().unwrap(), "b");
        assert!(chunks.next().unwrap().is_err());
        assert!(chunks.next().is_none());
    }

    #[test]
    fn test_context_copies_variables() {
        let template = template("{% set x = 2 %}{{ x }}");
        let vars = Namespace::from([("x", 1)]);
        assert_eq!(template.render(vars.clone()).unwrap(), "2");
        assert_eq!(vars.get("x"), Some(Value::from(1)));
    }

    #[test]
    fn test_shared_context_sees_later_changes() {
        let template = template("{{ x }}");
        let vars = Namespace::from([("x", 1)]);
        let context = template.new_context(vars.clone(), true);
        vars.insert("x", 2);
        assert_eq!(context.resolve("x"), Value::from(2));

        let copied = template.new_context(vars.clone(), false);
        vars.insert("x", 3);
        assert_eq!(copied.resolve("x"), Value::from(2));
    }

    #[test]
    fn test_globals_are_overridden_by_variables() {
        let env = Environment::new();
        let mut globals = Globals::new();
        globals.insert("who".into(), Value::from("globals"));
        let template = env.from_string("{{ who }}", Some(&globals)).unwrap();
        assert_eq!(template.render(Namespace::new()).unwrap(), "globals");
        assert_eq!(template.render([("who", "vars")]).unwrap(), "vars");
    }

    #[test]
    fn test_runtime_errors_report_template_lines() {
        let template = template("line one\n{{ 1 // 0 }}");
        let err = template.render(Namespace::new()).unwrap_err();
        assert!(matches!(err, TemplateError::Evaluation { .. }));
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn test_module_is_memoized() {
        let template = template("{% set x = 1 %}body");
        let a = template.module().unwrap();
        let b = template.module().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = template.make_module(Namespace::new(), false).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.body(), "body");
    }

    #[test]
    fn test_up_to_date_without_check() {
        assert!(template("x").is_up_to_date());
    }

    #[test]
    fn test_spontaneous_templates_share_environment() {
        let a = Template::new("{{ 1 }}").unwrap();
        let b = Template::new("{{ 2 }}").unwrap();
        assert!(Arc::ptr_eq(a.environment(), b.environment()));
        assert_eq!(b.render(Namespace::new()).unwrap(), "2");
    }
}
