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

//! Template loaders
//!
//! A loader turns a template name into source text. The provided
//! [`Loader::load`] compiles that source through the environment and attaches
//! the loader's up-to-date check, which the environment consults before
//! serving a cached template when `auto_reload` is on.

mod filesystem;
mod function;
mod map;

pub use filesystem::FileSystemLoader;
pub use function::FunctionLoader;
pub use map::MapLoader;

use crate::environment::Environment;
use crate::error::{Result, TemplateError};
use crate::model::Globals;
use crate::template::{Template, UpToDate};
use std::fmt;
use std::sync::Arc;

/// Source text of a template plus how to tell whether it changed
#[derive(Clone)]
pub struct LoaderSource {
    pub source: String,
    /// Filename shown in error messages
    pub filename: Option<String>,
    pub uptodate: Option<UpToDate>,
}

impl LoaderSource {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            filename: None,
            uptodate: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_uptodate<F>(mut self, check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.uptodate = Some(Arc::new(check));
        self
    }
}

impl fmt::Debug for LoaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderSource")
            .field("filename", &self.filename)
            .field("len", &self.source.len())
            .field("uptodate", &self.uptodate.is_some())
            .finish()
    }
}

/// Source of templates for [`Environment::get_template`]
pub trait Loader: Send + Sync {
    /// Source of the named template; [`TemplateError::TemplateNotFound`] when
    /// there is none
    fn get_source(&self, environment: &Environment, name: &str) -> Result<LoaderSource>;

    /// Names of every template this loader can find, if it can enumerate them
    fn list_templates(&self) -> Result<Vec<String>> {
        Err(TemplateError::invalid_argument(
            "this loader cannot list its templates",
        ))
    }

    /// Compile the named template
    fn load(
        &self,
        environment: &Arc<Environment>,
        name: &str,
        globals: Option<&Globals>,
    ) -> Result<Arc<Template>> {
        let source = self.get_source(environment, name)?;
        let code = environment.compile(&source.source, Some(name), source.filename.as_deref())?;
        Ok(Template::from_code(
            Arc::clone(environment),
            code,
            environment.make_globals(globals),
            source.uptodate,
        ))
    }
}

/// Split a template name into path segments, refusing to leave the search path
pub(crate) fn split_template_path(name: &str) -> Result<Vec<&str>> {
    let mut segments = Vec::new();
    for segment in name.split(['/', '\\']) {
        match segment {
            ".." => return Err(TemplateError::not_found(name)),
            "" | "." => {}
            other if other.contains(std::path::MAIN_SEPARATOR) => {
                return Err(TemplateError::not_found(name));
            }
            other => segments.push(other),
        }
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_template_path() {
        assert_eq!(split_template_path("a/./b//c.html").unwrap(), vec!["a", "b", "c.html"]);
        assert!(matches!(
            split_template_path("../secret"),
            Err(TemplateError::TemplateNotFound { .. })
        ));
        assert!(split_template_path("a/../../b").is_err());
    }
}
