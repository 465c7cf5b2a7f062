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

//! Template environment
//!
//! The [`Environment`] owns syntax settings, the filter/test/global
//! registries, the loader and the template cache, and drives the
//! parse → optimize → generate pipeline.
//!
//! Environments are handed out as `Arc<Environment>` and configured through
//! `&self`. Registries are copy-on-write and become immutable once the first
//! template compiled successfully; later registration fails with
//! [`TemplateError::Frozen`]. Pooled environments (see [`spontaneous`]) never
//! accept registration.

pub mod cache;
pub mod extension;
pub mod i18n;
pub mod options;
pub mod spontaneous;

pub use cache::{CacheStats, TemplateCache};
pub use extension::{Extension, ExtensionRef};
pub use i18n::{Catalogue, I18nExtension};
pub use options::{EnvironmentOptions, Finalizer, OverlayOptions, Syntax, TemplateOptions};
pub use spontaneous::spontaneous_environment;

use crate::ast;
use crate::compiler::{self, Bytecode, OptimizationConfig, TemplateOptimizer};
use crate::error::{Result, TemplateError};
use crate::loader::Loader;
use crate::model::{Globals, Kwargs, UndefinedPolicy, Value};
use crate::parser::{self, Token};
use crate::registry::{Filter, Registries, Test, escape_html};
use crate::runtime::resolver;
use crate::template::Template;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Filename reported for templates compiled without one
pub const DEFAULT_FILENAME: &str = "<template>";

/// Hook turning a template name referenced from `parent` into a loader name
pub type PathJoiner = dyn Fn(&str, &str) -> String + Send + Sync;

/// Template configuration and template factory
pub struct Environment {
    syntax: Syntax,
    trim_blocks: bool,
    optimize: bool,
    undefined: UndefinedPolicy,
    finalize: Option<Finalizer>,
    autoescape: bool,
    auto_reload: bool,
    registries: RwLock<Arc<Registries>>,
    loader: RwLock<Option<Arc<dyn Loader>>>,
    path_joiner: RwLock<Option<Arc<PathJoiner>>>,
    cache: TemplateCache,
    extensions: IndexMap<String, Arc<dyn Extension>>,
    extension_data: RwLock<IndexMap<String, Value>>,
    overlayed: bool,
    shared: bool,
    linked_to: Option<Arc<Environment>>,
    frozen: AtomicBool,
}

impl Environment {
    /// Environment with default settings
    pub fn new() -> Arc<Self> {
        Arc::new(Self::assemble(&EnvironmentOptions::default()))
    }

    /// Environment with custom settings.
    ///
    /// Fails with [`TemplateError::Config`] when two of the block, variable
    /// and comment start markers coincide.
    pub fn with_options(options: EnvironmentOptions) -> Result<Arc<Self>> {
        Self::build(options, false)
    }

    pub(crate) fn build(options: EnvironmentOptions, shared: bool) -> Result<Arc<Self>> {
        let mut environment = Self::assemble(&options);
        environment.check()?;
        environment.bind_extensions(&options.extensions)?;
        environment.shared = shared;
        log::debug!(
            "Created environment (cache_size={}, extensions={}, shared={shared})",
            options.cache_size,
            environment.extensions.len()
        );
        Ok(Arc::new(environment))
    }

    fn assemble(options: &EnvironmentOptions) -> Self {
        Self {
            syntax: options.syntax.clone(),
            trim_blocks: options.trim_blocks,
            optimize: options.optimize,
            undefined: options.undefined,
            finalize: options.finalize.clone(),
            autoescape: options.autoescape,
            auto_reload: options.auto_reload,
            registries: RwLock::new(Registries::builtin()),
            loader: RwLock::new(options.loader.clone()),
            path_joiner: RwLock::new(None),
            cache: TemplateCache::new(options.cache_size),
            extensions: IndexMap::new(),
            extension_data: RwLock::new(IndexMap::new()),
            overlayed: false,
            shared: false,
            linked_to: None,
            frozen: AtomicBool::new(false),
        }
    }

    fn bind_extensions(&mut self, extensions: &[ExtensionRef]) -> Result<()> {
        for extension in extensions {
            let bound = extension.bind(self)?;
            self.extensions
                .insert(extension.identifier().to_string(), bound);
        }
        Ok(())
    }

    /// Marker sanity check run by every constructor
    fn check(&self) -> Result<()> {
        let syntax = &self.syntax;
        let markers = [
            ("block_start", &syntax.block_start),
            ("block_end", &syntax.block_end),
            ("variable_start", &syntax.variable_start),
            ("variable_end", &syntax.variable_end),
            ("comment_start", &syntax.comment_start),
            ("comment_end", &syntax.comment_end),
        ];
        if let Some((name, _)) = markers.iter().find(|(_, marker)| marker.is_empty()) {
            return Err(TemplateError::config(format!("{name} must not be empty")));
        }

        let starts = &markers[..];
        for (i, (a_name, a)) in starts.iter().enumerate().step_by(2) {
            for (b_name, b) in starts.iter().skip(i + 2).step_by(2) {
                if a == b {
                    return Err(TemplateError::config(format!(
                        "{a_name} and {b_name} must be different, both are '{a}'"
                    )));
                }
            }
        }
        if syntax.line_statement_prefix.as_deref() == Some("") {
            return Err(TemplateError::config(
                "line_statement_prefix must not be empty",
            ));
        }
        Ok(())
    }

    /// Derive an environment that shares this one's registries and loader.
    ///
    /// Fields not set in `overrides` are copied from this environment. The
    /// overlay always gets its own cache and its own extension bindings.
    pub fn overlay(self: &Arc<Self>, overrides: OverlayOptions) -> Result<Arc<Self>> {
        let cache = match overrides.cache_size {
            Some(size) => TemplateCache::new(size),
            None => self.cache.empty_copy(),
        };
        let mut environment = Self {
            syntax: overrides.syntax.unwrap_or_else(|| self.syntax.clone()),
            trim_blocks: overrides.trim_blocks.unwrap_or(self.trim_blocks),
            optimize: overrides.optimize.unwrap_or(self.optimize),
            undefined: overrides.undefined.unwrap_or(self.undefined),
            finalize: overrides.finalize.or_else(|| self.finalize.clone()),
            autoescape: overrides.autoescape.unwrap_or(self.autoescape),
            auto_reload: overrides.auto_reload.unwrap_or(self.auto_reload),
            registries: RwLock::new(Arc::clone(&self.registries.read())),
            loader: RwLock::new(overrides.loader.or_else(|| self.loader.read().clone())),
            path_joiner: RwLock::new(self.path_joiner.read().clone()),
            cache,
            extensions: IndexMap::new(),
            extension_data: RwLock::new(self.extension_data.read().clone()),
            overlayed: true,
            shared: false,
            linked_to: Some(Arc::clone(self)),
            frozen: AtomicBool::new(false),
        };
        environment.check()?;

        let inherited: Vec<ExtensionRef> = self
            .extensions
            .values()
            .map(|ext| ExtensionRef::from(Arc::clone(ext)))
            .collect();
        environment.bind_extensions(&inherited)?;
        environment.bind_extensions(&overrides.extensions)?;

        log::debug!(
            "Created overlay environment (extensions={})",
            environment.extensions.len()
        );
        Ok(Arc::new(environment))
    }

    // === Settings ===

    pub fn syntax(&self) -> &Syntax {
        &self.syntax
    }

    /// Whether the newline right after a block tag is dropped, also known as
    /// trim-leading-newline
    pub fn trim_blocks(&self) -> bool {
        self.trim_blocks
    }

    pub fn optimize(&self) -> bool {
        self.optimize
    }

    pub fn undefined_policy(&self) -> UndefinedPolicy {
        self.undefined
    }

    pub fn finalize(&self) -> Option<&Finalizer> {
        self.finalize.as_ref()
    }

    pub fn autoescape(&self) -> bool {
        self.autoescape
    }

    pub fn auto_reload(&self) -> bool {
        self.auto_reload
    }

    pub fn cache_size(&self) -> i64 {
        self.cache.size()
    }

    /// Whether this environment was derived with [`Environment::overlay`]
    pub fn is_overlay(&self) -> bool {
        self.overlayed
    }

    /// Whether this environment comes from the spontaneous pool
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Parent of an overlay
    pub fn linked_to(&self) -> Option<&Arc<Environment>> {
        self.linked_to.as_ref()
    }

    /// Whether registries no longer accept changes
    pub fn is_frozen(&self) -> bool {
        self.shared || self.frozen.load(Ordering::Acquire)
    }

    // === Registries ===

    fn ensure_mutable(&self, what: &str) -> Result<()> {
        if self.shared {
            return Err(TemplateError::frozen(format!(
                "cannot add {what} to a shared environment; build a private environment or an overlay"
            )));
        }
        if self.frozen.load(Ordering::Acquire) {
            return Err(TemplateError::frozen(format!(
                "cannot add {what} after templates were compiled"
            )));
        }
        Ok(())
    }

    fn update_registries(&self, what: &str, update: impl FnOnce(&mut Registries)) -> Result<()> {
        self.ensure_mutable(what)?;
        let mut registries = self.registries.write();
        update(Arc::make_mut(&mut registries));
        Ok(())
    }

    /// Register a filter
    pub fn add_filter<F>(&self, name: &str, filter: F) -> Result<()>
    where
        F: Fn(&Environment, Value, &[Value], &Kwargs) -> Result<Value> + Send + Sync + 'static,
    {
        self.update_registries(&format!("filter '{name}'"), |r| {
            r.add_filter(Filter::new(name, filter))
        })
    }

    /// Register a test
    pub fn add_test<F>(&self, name: &str, test: F) -> Result<()>
    where
        F: Fn(&Environment, &Value, &[Value]) -> Result<bool> + Send + Sync + 'static,
    {
        self.update_registries(&format!("test '{name}'"), |r| {
            r.add_test(Test::new(name, test))
        })
    }

    /// Set a global variable
    pub fn add_global(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.update_registries(&format!("global '{name}'"), |r| r.add_global(name, value))
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.registries.read().filter(name).is_some()
    }

    pub fn has_test(&self, name: &str) -> bool {
        self.registries.read().test(name).is_some()
    }

    /// Snapshot of the global variables
    pub fn globals(&self) -> Arc<Globals> {
        Arc::clone(&self.registries.read().globals)
    }

    /// Apply a registered filter
    pub fn apply_filter(
        &self,
        name: &str,
        value: Value,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> Result<Value> {
        let filter = self.registries.read().filter(name).cloned();
        match filter {
            Some(filter) => filter.apply(self, value, args, kwargs),
            None => Err(TemplateError::evaluation(format!("no filter named '{name}'"))),
        }
    }

    /// Run a registered test
    pub fn apply_test(&self, name: &str, value: &Value, args: &[Value]) -> Result<bool> {
        let test = self.registries.read().test(name).cloned();
        match test {
            Some(test) => test.check(self, value, args),
            None => Err(TemplateError::evaluation(format!("no test named '{name}'"))),
        }
    }

    /// Globals of this environment, overridden by `extra` when given
    pub fn make_globals(&self, extra: Option<&Globals>) -> Arc<Globals> {
        let globals = self.globals();
        match extra {
            Some(extra) if !extra.is_empty() => {
                let mut merged = (*globals).clone();
                merged.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
                Arc::new(merged)
            }
            _ => globals,
        }
    }

    // === Extensions ===

    /// Store extension data unless the key is already set.
    ///
    /// Shared environments reject this with [`TemplateError::Frozen`].
    pub fn extend(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        if self.shared {
            return Err(TemplateError::frozen(format!(
                "cannot set extension data '{key}' on a shared environment"
            )));
        }
        self.extension_data
            .write()
            .entry(key.to_string())
            .or_insert_with(|| value.into());
        Ok(())
    }

    pub fn extension_data(&self, key: &str) -> Option<Value> {
        self.extension_data.read().get(key).cloned()
    }

    /// Bound extension by identifier
    pub fn extension(&self, identifier: &str) -> Option<&Arc<dyn Extension>> {
        self.extensions.get(identifier)
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.extensions.keys().map(String::as_str)
    }

    // === Lookup ===

    /// Attribute-style lookup falling back to item lookup, then undefined
    pub fn getattr(&self, obj: &Value, name: &str) -> Value {
        resolver::getattr(self.undefined, obj, name)
    }

    /// Item-style lookup falling back to attribute lookup, then undefined
    pub fn getitem(&self, obj: &Value, key: &Value) -> Value {
        resolver::getitem(self.undefined, obj, key)
    }

    /// Text written for an output expression's value
    pub fn format_output(&self, value: &Value) -> Result<String> {
        let finalized;
        let value = match &self.finalize {
            Some(finalize) => {
                finalized = finalize.apply(value)?;
                &finalized
            }
            None => value,
        };
        if self.autoescape && !value.is_safe() {
            Ok(escape_html(&value.render()?))
        } else {
            value.render()
        }
    }

    // === Compilation ===

    /// Tokenize source with this environment's syntax
    pub fn lex(&self, source: &str) -> Result<Vec<Token>> {
        parser::tokenize(source, &self.syntax, self.trim_blocks)
    }

    /// Parse source into an AST
    pub fn parse(
        &self,
        source: &str,
        name: Option<&str>,
        filename: Option<&str>,
    ) -> Result<ast::Template> {
        parser::parse(source, &self.syntax, self.trim_blocks)
            .map_err(|e| e.with_template(name, filename.unwrap_or(DEFAULT_FILENAME)))
    }

    fn optimizer(&self) -> TemplateOptimizer {
        TemplateOptimizer::with_config(OptimizationConfig {
            inline_constant_output: self.finalize.is_none() && !self.autoescape,
            ..OptimizationConfig::default()
        })
    }

    /// Optimize (when enabled) and generate bytecode for a parsed template
    pub fn compile_ast(
        &self,
        template: ast::Template,
        name: Option<&str>,
        filename: Option<&str>,
    ) -> Result<Bytecode> {
        let filename = filename.unwrap_or(DEFAULT_FILENAME);
        let template = if self.optimize {
            self.optimizer().optimize(template)
        } else {
            template
        };
        let code = compiler::generate(&template, self, name, filename)
            .map_err(|e| e.with_template(name, filename))?;
        if !self.frozen.swap(true, Ordering::AcqRel) {
            log::trace!("Environment registries frozen after first compile");
        }
        Ok(code)
    }

    /// Compile source text into bytecode
    pub fn compile(
        &self,
        source: &str,
        name: Option<&str>,
        filename: Option<&str>,
    ) -> Result<Arc<Bytecode>> {
        log::debug!("Compiling template {}", name.unwrap_or(DEFAULT_FILENAME));
        let ast = self.parse(source, name, filename)?;
        Ok(Arc::new(self.compile_ast(ast, name, filename)?))
    }

    /// Disassembly of the bytecode `compile` would produce
    pub fn compile_raw(
        &self,
        source: &str,
        name: Option<&str>,
        filename: Option<&str>,
    ) -> Result<String> {
        Ok(self.compile(source, name, filename)?.disassemble())
    }

    /// Compile source into a template bound to this environment
    pub fn from_string(
        self: &Arc<Self>,
        source: &str,
        globals: Option<&Globals>,
    ) -> Result<Arc<Template>> {
        let code = self.compile(source, None, None)?;
        Ok(Template::from_code(
            Arc::clone(self),
            code,
            self.make_globals(globals),
            None,
        ))
    }

    // === Loading ===

    /// Replace the loader; cached templates are dropped
    pub fn set_loader(&self, loader: impl Loader + 'static) -> Result<()> {
        if self.shared {
            return Err(TemplateError::frozen(
                "cannot set the loader of a shared environment",
            ));
        }
        *self.loader.write() = Some(Arc::new(loader));
        self.cache.clear();
        Ok(())
    }

    pub fn loader(&self) -> Option<Arc<dyn Loader>> {
        self.loader.read().clone()
    }

    /// Install the hook resolving names referenced from other templates
    pub fn set_path_joiner<F>(&self, joiner: F) -> Result<()>
    where
        F: Fn(&str, &str) -> String + Send + Sync + 'static,
    {
        if self.shared {
            return Err(TemplateError::frozen(
                "cannot set the path joiner of a shared environment",
            ));
        }
        *self.path_joiner.write() = Some(Arc::new(joiner));
        self.cache.clear();
        Ok(())
    }

    /// Loader name of `template` referenced from `parent`; identity by default
    pub fn join_path(&self, template: &str, parent: &str) -> String {
        match self.path_joiner.read().as_ref() {
            Some(joiner) => joiner(template, parent),
            None => template.to_string(),
        }
    }

    /// Load a template through the cache.
    ///
    /// A cached template is returned while `auto_reload` is off or the
    /// template reports itself up to date; otherwise the loader compiles it
    /// again and the new template replaces the cached one.
    pub fn get_template(
        self: &Arc<Self>,
        name: &str,
        parent: Option<&str>,
        globals: Option<&Globals>,
    ) -> Result<Arc<Template>> {
        let name = match parent {
            Some(parent) => self.join_path(name, parent),
            None => name.to_string(),
        };

        if let Some(template) = self.cache.get(&name) {
            if !self.auto_reload || template.is_up_to_date() {
                log::trace!("Template cache hit for '{name}'");
                return Ok(template);
            }
            log::debug!("Template '{name}' is stale, reloading");
        }

        let template = self.load_template(&name, globals)?;
        self.cache.insert(name, Arc::clone(&template));
        Ok(template)
    }

    fn load_template(self: &Arc<Self>, name: &str, globals: Option<&Globals>) -> Result<Arc<Template>> {
        let loader = self.loader().ok_or(TemplateError::NoLoaderConfigured)?;
        log::debug!("Loading template '{name}'");
        loader.load(self, name, globals)
    }

    /// First template of `names` the loader can find
    pub fn select_template<S: AsRef<str>>(
        self: &Arc<Self>,
        names: &[S],
        parent: Option<&str>,
        globals: Option<&Globals>,
    ) -> Result<Arc<Template>> {
        if names.is_empty() {
            return Err(TemplateError::invalid_argument(
                "select_template needs at least one template name",
            ));
        }
        for name in names {
            match self.get_template(name.as_ref(), parent, globals) {
                Err(TemplateError::TemplateNotFound { .. }) => continue,
                other => return other,
            }
        }
        let tried: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
        Err(TemplateError::not_found(tried.join(", ")))
    }

    /// Drop every cached template
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_template_count(&self) -> usize {
        self.cache.len()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("syntax", &self.syntax)
            .field("trim_blocks", &self.trim_blocks)
            .field("optimize", &self.optimize)
            .field("undefined", &self.undefined)
            .field("autoescape", &self.autoescape)
            .field("auto_reload", &self.auto_reload)
            .field("cache", &self.cache)
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .field("overlay", &self.overlayed)
            .field("shared", &self.shared)
            .finish()
    }
}
