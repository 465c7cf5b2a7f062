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

//! Environment configuration types

use super::extension::ExtensionRef;
use crate::error::Result;
use crate::loader::Loader;
use crate::model::{UndefinedPolicy, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Marker strings that delimit template syntax
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Syntax {
    pub block_start: String,
    pub block_end: String,
    pub variable_start: String,
    pub variable_end: String,
    pub comment_start: String,
    pub comment_end: String,
    /// Lines starting with this prefix are statements
    pub line_statement_prefix: Option<String>,
}

impl Default for Syntax {
    fn default() -> Self {
        Self {
            block_start: "{%".to_string(),
            block_end: "%}".to_string(),
            variable_start: "{{".to_string(),
            variable_end: "}}".to_string(),
            comment_start: "{#".to_string(),
            comment_end: "#}".to_string(),
            line_statement_prefix: None,
        }
    }
}

/// Post-processor applied to every value an output expression produces
#[derive(Clone)]
pub struct Finalizer(Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>);

impl Finalizer {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(func))
    }

    pub fn apply(&self, value: &Value) -> Result<Value> {
        (self.0)(value)
    }
}

impl PartialEq for Finalizer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Finalizer {}

impl Hash for Finalizer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const () as usize).hash(state);
    }
}

impl fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Finalizer")
    }
}

/// Options for [`Environment::with_options`](super::Environment::with_options)
#[derive(Clone)]
pub struct EnvironmentOptions {
    pub syntax: Syntax,
    /// Remove the first newline after a block tag (trim-leading-newline)
    pub trim_blocks: bool,
    pub extensions: Vec<ExtensionRef>,
    /// Run the constant folder before code generation
    pub optimize: bool,
    pub undefined: UndefinedPolicy,
    pub finalize: Option<Finalizer>,
    /// HTML-escape output values that are not marked safe
    pub autoescape: bool,
    pub loader: Option<Arc<dyn Loader>>,
    /// `0` disables caching, a negative size never evicts
    pub cache_size: i64,
    /// Recompile cached templates whose source changed
    pub auto_reload: bool,
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            syntax: Syntax::default(),
            trim_blocks: false,
            extensions: Vec::new(),
            optimize: true,
            undefined: UndefinedPolicy::default(),
            finalize: None,
            autoescape: false,
            loader: None,
            cache_size: 50,
            auto_reload: true,
        }
    }
}

impl fmt::Debug for EnvironmentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentOptions")
            .field("syntax", &self.syntax)
            .field("trim_blocks", &self.trim_blocks)
            .field("extensions", &self.extensions)
            .field("optimize", &self.optimize)
            .field("undefined", &self.undefined)
            .field("finalize", &self.finalize)
            .field("autoescape", &self.autoescape)
            .field("loader", &self.loader.is_some())
            .field("cache_size", &self.cache_size)
            .field("auto_reload", &self.auto_reload)
            .finish()
    }
}

/// Overrides for [`Environment::overlay`](super::Environment::overlay).
///
/// `None` keeps the parent's setting. Extensions are added to the parent's,
/// never removed.
#[derive(Clone, Default)]
pub struct OverlayOptions {
    pub syntax: Option<Syntax>,
    pub trim_blocks: Option<bool>,
    pub extensions: Vec<ExtensionRef>,
    pub optimize: Option<bool>,
    pub undefined: Option<UndefinedPolicy>,
    pub finalize: Option<Finalizer>,
    pub autoescape: Option<bool>,
    pub loader: Option<Arc<dyn Loader>>,
    /// A new size gives the overlay a fresh cache of that size
    pub cache_size: Option<i64>,
    pub auto_reload: Option<bool>,
}

impl fmt::Debug for OverlayOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayOptions")
            .field("syntax", &self.syntax)
            .field("trim_blocks", &self.trim_blocks)
            .field("extensions", &self.extensions)
            .field("optimize", &self.optimize)
            .field("undefined", &self.undefined)
            .field("autoescape", &self.autoescape)
            .field("loader", &self.loader.is_some())
            .field("cache_size", &self.cache_size)
            .field("auto_reload", &self.auto_reload)
            .finish()
    }
}

/// Settings of templates built straight from source.
///
/// Every field compares by value (or `Arc` identity), so identical settings
/// resolve to one pooled environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TemplateOptions {
    pub syntax: Syntax,
    pub trim_blocks: bool,
    pub extensions: Vec<ExtensionRef>,
    /// `None` means the environment default
    pub optimize: Option<bool>,
    pub undefined: UndefinedPolicy,
    pub finalize: Option<Finalizer>,
    pub autoescape: bool,
}

impl From<TemplateOptions> for EnvironmentOptions {
    fn from(options: TemplateOptions) -> Self {
        Self {
            syntax: options.syntax,
            trim_blocks: options.trim_blocks,
            extensions: options.extensions,
            optimize: options.optimize.unwrap_or(true),
            undefined: options.undefined,
            finalize: options.finalize,
            autoescape: options.autoescape,
            loader: None,
            cache_size: 0,
            auto_reload: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_reads_partial_json() {
        let syntax: Syntax = serde_json::from_str(r#"{"variable_start": "${", "variable_end": "}"}"#)
            .unwrap();
        assert_eq!(syntax.variable_start, "${");
        assert_eq!(syntax.block_start, "{%");
    }

    #[test]
    fn test_finalizer_compares_by_identity() {
        let a = Finalizer::new(|v| Ok(v.clone()));
        let b = Finalizer::new(|v| Ok(v.clone()));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_template_options_disable_caching() {
        let options = EnvironmentOptions::from(TemplateOptions::default());
        assert_eq!(options.cache_size, 0);
        assert!(!options.auto_reload);
        assert!(options.optimize);
    }
}
