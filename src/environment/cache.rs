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

//! Compiled template cache
//!
//! Sized the way the environment's `cache_size` option says: `0` disables
//! caching, a negative size keeps every template, a positive size evicts the
//! least recently used template once full.

use crate::template::Template;
use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

enum Store {
    Disabled,
    Bounded(LruCache<String, Arc<Template>>),
    Unbounded(FxHashMap<String, Arc<Template>>),
}

/// Basic cache statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of templates evicted to make room
    pub evictions: u64,
}

impl CacheStats {
    /// Hit ratio as percentage
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

struct Inner {
    store: Store,
    stats: CacheStats,
}

/// Thread-safe template cache keyed by template name
pub struct TemplateCache {
    size: i64,
    inner: Mutex<Inner>,
}

impl TemplateCache {
    /// Create a cache for the given `cache_size` option
    pub fn new(size: i64) -> Self {
        let store = match size {
            0 => Store::Disabled,
            n if n < 0 => Store::Unbounded(FxHashMap::default()),
            n => match NonZeroUsize::new(n as usize) {
                Some(capacity) => Store::Bounded(LruCache::new(capacity)),
                None => Store::Disabled,
            },
        };
        Self {
            size,
            inner: Mutex::new(Inner {
                store,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Fresh empty cache of the same kind and size
    pub fn empty_copy(&self) -> Self {
        Self::new(self.size)
    }

    /// The `cache_size` this cache was created with
    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn is_enabled(&self) -> bool {
        self.size != 0
    }

    /// Look up a template, refreshing its recency
    pub fn get(&self, name: &str) -> Option<Arc<Template>> {
        let mut inner = self.inner.lock();
        let found = match &mut inner.store {
            Store::Disabled => None,
            Store::Bounded(lru) => lru.get(name).cloned(),
            Store::Unbounded(map) => map.get(name).cloned(),
        };
        if found.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        found
    }

    /// Store a template, replacing any entry with the same name
    pub fn insert(&self, name: String, template: Arc<Template>) {
        let mut inner = self.inner.lock();
        let evicted = match &mut inner.store {
            Store::Disabled => return,
            Store::Bounded(lru) => match lru.push(name.clone(), template) {
                Some((old, _)) if old != name => Some(old),
                _ => None,
            },
            Store::Unbounded(map) => {
                map.insert(name, template);
                None
            }
        };
        if let Some(old) = evicted {
            log::debug!("Evicted template '{old}' from cache");
            inner.stats.evictions += 1;
        }
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Template>> {
        let mut inner = self.inner.lock();
        match &mut inner.store {
            Store::Disabled => None,
            Store::Bounded(lru) => lru.pop(name),
            Store::Unbounded(map) => map.remove(name),
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        match &mut inner.store {
            Store::Disabled => {}
            Store::Bounded(lru) => lru.clear(),
            Store::Unbounded(map) => map.clear(),
        }
    }

    /// Number of cached templates
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        match &inner.store {
            Store::Disabled => 0,
            Store::Bounded(lru) => lru.len(),
            Store::Unbounded(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of cached templates, most recently used first for bounded caches
    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.lock();
        match &inner.store {
            Store::Disabled => Vec::new(),
            Store::Bounded(lru) => lru.iter().map(|(k, _)| k.clone()).collect(),
            Store::Unbounded(map) => map.keys().cloned().collect(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }
}

impl std::fmt::Debug for TemplateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateCache")
            .field("size", &self.size)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;

    fn template(source: &str) -> Arc<Template> {
        Environment::new().from_string(source, None).unwrap()
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = TemplateCache::new(0);
        cache.insert("a".into(), template("a"));
        assert!(cache.get("a").is_none());
        assert!(!cache.is_enabled());
    }

    #[test]
    fn test_unbounded_cache_never_evicts() {
        let cache = TemplateCache::new(-1);
        for i in 0..100 {
            cache.insert(format!("t{i}"), template("x"));
        }
        assert_eq!(cache.len(), 100);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_bounded_cache_evicts_least_recently_used() {
        let cache = TemplateCache::new(2);
        cache.insert("a".into(), template("a"));
        cache.insert("b".into(), template("b"));
        assert!(cache.get("a").is_some());
        cache.insert("c".into(), template("c"));

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_replacing_an_entry_is_not_an_eviction() {
        let cache = TemplateCache::new(2);
        let first = template("1");
        let second = template("2");
        cache.insert("a".into(), first);
        cache.insert("a".into(), Arc::clone(&second));
        assert!(Arc::ptr_eq(&cache.get("a").unwrap(), &second));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_stats_count_hits_and_misses() {
        let cache = TemplateCache::new(5);
        cache.insert("a".into(), template("a"));
        cache.get("a");
        cache.get("missing");
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.hit_ratio(), 50.0);
    }
}
