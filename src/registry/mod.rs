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

//! Filter, test and global registries
//!
//! Every environment starts from a copy of [`Registries::builtin`]. The copy is
//! held behind an `Arc` and cloned on first write, so environments and
//! overlays that never register anything share one allocation.

#![warn(missing_docs)]

pub mod filters;
pub mod globals;
pub mod test_functions;

use crate::environment::Environment;
use crate::error::Result;
use crate::model::{Globals, Kwargs, Value};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;

pub use filters::escape_html;

/// Signature of filter implementations: `value|name(args, kwargs)`
pub type FilterFn = dyn Fn(&Environment, Value, &[Value], &Kwargs) -> Result<Value> + Send + Sync;

/// Signature of test implementations: `value is name(args)`
pub type TestFn = dyn Fn(&Environment, &Value, &[Value]) -> Result<bool> + Send + Sync;

/// A registered filter
#[derive(Clone)]
pub struct Filter {
    name: Arc<str>,
    func: Arc<FilterFn>,
}

impl Filter {
    /// Create a filter from a closure
    pub fn new<F>(name: impl Into<Arc<str>>, func: F) -> Self
    where
        F: Fn(&Environment, Value, &[Value], &Kwargs) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Filter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply the filter
    pub fn apply(
        &self,
        env: &Environment,
        value: Value,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> Result<Value> {
        (self.func)(env, value, args, kwargs)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter({})", self.name)
    }
}

/// A registered test
#[derive(Clone)]
pub struct Test {
    name: Arc<str>,
    func: Arc<TestFn>,
}

impl Test {
    /// Create a test from a closure
    pub fn new<F>(name: impl Into<Arc<str>>, func: F) -> Self
    where
        F: Fn(&Environment, &Value, &[Value]) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Test name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the test
    pub fn check(&self, env: &Environment, value: &Value, args: &[Value]) -> Result<bool> {
        (self.func)(env, value, args)
    }
}

impl fmt::Debug for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Test({})", self.name)
    }
}

/// Filters, tests and globals of one environment
#[derive(Debug, Clone, Default)]
pub struct Registries {
    /// Filters by name
    pub filters: IndexMap<String, Filter>,
    /// Tests by name
    pub tests: IndexMap<String, Test>,
    /// Global variables visible to every template
    pub globals: Arc<Globals>,
}

static BUILTIN: Lazy<Arc<Registries>> = Lazy::new(|| {
    let mut registries = Registries::default();
    filters::register_builtin_filters(&mut registries);
    test_functions::register_builtin_tests(&mut registries);
    globals::register_builtin_globals(&mut registries);
    Arc::new(registries)
});

impl Registries {
    /// Shared handle to the built-in registries
    pub fn builtin() -> Arc<Registries> {
        Arc::clone(&BUILTIN)
    }

    /// Register a filter, replacing any filter with the same name
    pub fn add_filter(&mut self, filter: Filter) {
        self.filters.insert(filter.name().to_string(), filter);
    }

    /// Register a test, replacing any test with the same name
    pub fn add_test(&mut self, test: Test) {
        self.tests.insert(test.name().to_string(), test);
    }

    /// Set a global variable
    pub fn add_global(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        Arc::make_mut(&mut self.globals).insert(name.into(), value.into());
    }

    /// Look up a filter
    pub fn filter(&self, name: &str) -> Option<&Filter> {
        self.filters.get(name)
    }

    /// Look up a test
    pub fn test(&self, name: &str) -> Option<&Test> {
        self.tests.get(name)
    }
}

/// Positional argument `index`, or keyword argument `name`
pub(crate) fn argument<'a>(
    args: &'a [Value],
    kwargs: &'a Kwargs,
    index: usize,
    name: &str,
) -> Option<&'a Value> {
    args.get(index).or_else(|| kwargs.get(name))
}
