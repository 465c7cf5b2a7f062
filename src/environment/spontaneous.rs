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

//! Process-wide pool of environments for templates built from source

use super::Environment;
use super::options::TemplateOptions;
use crate::error::Result;
use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

const POOL_CAPACITY: NonZeroUsize = NonZeroUsize::MIN.saturating_add(9);

static POOL: Lazy<Mutex<LruCache<TemplateOptions, Arc<Environment>>>> =
    Lazy::new(|| Mutex::new(LruCache::new(POOL_CAPACITY)));

/// Return the pooled environment for `options`, building it on first use.
///
/// Pooled environments are shared: registering filters, tests or globals on
/// them fails with [`TemplateError::Frozen`](crate::TemplateError::Frozen).
pub fn spontaneous_environment(options: &TemplateOptions) -> Result<Arc<Environment>> {
    let mut pool = POOL.lock();
    if let Some(environment) = pool.get(options) {
        log::trace!("Spontaneous environment pool hit");
        return Ok(Arc::clone(environment));
    }

    log::debug!("Spontaneous environment pool miss, building environment");
    let environment = Environment::build(options.clone().into(), true)?;
    pool.put(options.clone(), Arc::clone(&environment));
    Ok(environment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Syntax;

    #[test]
    fn test_identical_options_share_an_environment() {
        let options = TemplateOptions {
            trim_blocks: true,
            ..TemplateOptions::default()
        };
        let a = spontaneous_environment(&options).unwrap();
        let b = spontaneous_environment(&options.clone()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_shared());
        assert_eq!(a.cache_size(), 0);
    }

    #[test]
    fn test_different_options_get_different_environments() {
        let a = spontaneous_environment(&TemplateOptions::default()).unwrap();
        let b = spontaneous_environment(&TemplateOptions {
            syntax: Syntax {
                variable_start: "${".into(),
                variable_end: "}".into(),
                ..Syntax::default()
            },
            ..TemplateOptions::default()
        })
        .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_invalid_options_are_not_pooled() {
        let options = TemplateOptions {
            syntax: Syntax {
                comment_start: "{%".into(),
                ..Syntax::default()
            },
            ..TemplateOptions::default()
        };
        assert!(spontaneous_environment(&options).is_err());
    }

    #[test]
    fn test_shared_environment_rejects_registration() {
        let env = spontaneous_environment(&TemplateOptions::default()).unwrap();
        assert!(env.add_global("x", 1).is_err());
    }

    #[test]
    fn test_shared_environment_rejects_extension_data() {
        let env = spontaneous_environment(&TemplateOptions::default()).unwrap();
        assert!(matches!(
            env.extend("pooled.marker", 1),
            Err(crate::TemplateError::Frozen { .. })
        ));

        let again = spontaneous_environment(&TemplateOptions::default()).unwrap();
        assert_eq!(again.extension_data("pooled.marker"), None);
    }
}
