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

use super::{Loader, LoaderSource};
use crate::environment::Environment;
use crate::error::{Result, TemplateError};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Entry {
    source: String,
    version: u64,
}

/// In-memory loader.
///
/// Clones share their templates, so a handle kept after installing the loader
/// can still edit them. Each edit bumps a version and templates compiled from
/// an older version report themselves stale.
#[derive(Debug, Clone, Default)]
pub struct MapLoader {
    templates: Arc<RwLock<IndexMap<String, Entry>>>,
}

impl MapLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MapLoader::insert`]
    pub fn with(self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(name, source);
        self
    }

    /// Add or replace a template
    pub fn insert(&self, name: impl Into<String>, source: impl Into<String>) {
        let mut templates = self.templates.write();
        let entry = templates.entry(name.into()).or_insert(Entry {
            source: String::new(),
            version: 0,
        });
        entry.source = source.into();
        entry.version += 1;
    }

    pub fn remove(&self, name: &str) -> bool {
        self.templates.write().shift_remove(name).is_some()
    }

    fn version(&self, name: &str) -> Option<u64> {
        self.templates.read().get(name).map(|e| e.version)
    }
}

impl Loader for MapLoader {
    fn get_source(&self, _: &Environment, name: &str) -> Result<LoaderSource> {
        let entry = self
            .templates
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::not_found(name))?;

        let loader = self.clone();
        let key = name.to_string();
        Ok(LoaderSource::new(entry.source)
            .with_uptodate(move || loader.version(&key) == Some(entry.version)))
    }

    fn list_templates(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.templates.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Namespace;

    #[test]
    fn test_edits_invalidate_cached_templates() {
        let loader = MapLoader::new().with("page", "v1");
        let env = Environment::new();
        env.set_loader(loader.clone()).unwrap();

        let first = env.get_template("page", None, None).unwrap();
        assert!(first.is_up_to_date());
        assert!(Arc::ptr_eq(&first, &env.get_template("page", None, None).unwrap()));

        loader.insert("page", "v2");
        assert!(!first.is_up_to_date());
        let second = env.get_template("page", None, None).unwrap();
        assert_eq!(second.render(Namespace::new()).unwrap(), "v2");
    }

    #[test]
    fn test_missing_and_listing() {
        let loader = MapLoader::new().with("b", "").with("a", "");
        let env = Environment::new();
        assert!(matches!(
            loader.get_source(&env, "c"),
            Err(TemplateError::TemplateNotFound { .. })
        ));
        assert_eq!(loader.list_templates().unwrap(), vec!["a", "b"]);
        assert!(loader.remove("a"));
        assert!(!loader.remove("a"));
    }
}
