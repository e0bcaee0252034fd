//! Identity-keyed module storage with cache reuse.
//!
//! The store owns the module arena, keeps the identifier table that makes
//! module identity unique per compilation, and talks to the optional
//! persistent cache. [`ModuleStore::add_module`] has a deliberately
//! three-valued result; collapsing it to a boolean loses the distinction
//! between "already present, use the existing instance" and "a cached
//! instance was reused, skip the build".

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap as HashMap;

use crate::module::{Module, ModuleId, ModuleNode};
use crate::source::Source;

/// Modification times keyed by path, provided by the embedder for rebuild
/// checks.
pub type TimestampMap = HashMap<PathBuf, u64>;

/// Result of [`ModuleStore::add_module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddModuleOutcome {
    /// Newly inserted; the module must now be built.
    Inserted(ModuleId),
    /// The identifier is already present; the offered instance was discarded
    /// and callers must use the existing module.
    Duplicate(ModuleId),
    /// A fresh-enough cached instance was inserted instead of the offered
    /// one; skip the build.
    CacheHit(ModuleId),
}

impl AddModuleOutcome {
    pub fn module(self) -> ModuleId {
        match self {
            AddModuleOutcome::Inserted(id)
            | AddModuleOutcome::Duplicate(id)
            | AddModuleOutcome::CacheHit(id) => id,
        }
    }
}

/// A cached render result for one manifest entry.
#[derive(Debug, Clone)]
pub struct CachedAsset {
    /// Content identity of the render; reused only on exact match.
    pub hash: String,
    pub source: Arc<dyn Source>,
}

/// Optional persistent side-table surviving across compilations.
///
/// Module entries are moved in and out (`take`/`put`) because built modules
/// are exclusively owned while a compilation runs; asset entries are cheap
/// clones.
pub trait ModuleCache: Send + Sync + std::fmt::Debug {
    fn take_module(&self, key: &str) -> Option<Box<dyn Module>>;
    fn put_module(&self, key: &str, module: Box<dyn Module>);
    fn get_asset(&self, key: &str) -> Option<CachedAsset>;
    fn put_asset(&self, key: &str, asset: CachedAsset);
}

/// In-memory [`ModuleCache`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    modules: Mutex<HashMap<String, Box<dyn Module>>>,
    assets: Mutex<HashMap<String, CachedAsset>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModuleCache for MemoryCache {
    fn take_module(&self, key: &str) -> Option<Box<dyn Module>> {
        self.modules.lock().remove(key)
    }

    fn put_module(&self, key: &str, module: Box<dyn Module>) {
        self.modules.lock().insert(key.to_string(), module);
    }

    fn get_asset(&self, key: &str) -> Option<CachedAsset> {
        self.assets.lock().get(key).cloned()
    }

    fn put_asset(&self, key: &str, asset: CachedAsset) {
        self.assets.lock().insert(key.to_string(), asset);
    }
}

/// Outcome of the cache probe inside [`ModuleStore::add_module`].
enum CacheProbe {
    Miss,
    /// Cached instance is fresh; it replaces the offered module.
    Fresh(Box<dyn Module>),
    /// Cached instance was stale and dropped; the offered module must be
    /// unbuilt before insertion.
    Stale,
}

/// Identity-keyed module table plus insertion order.
#[derive(Debug, Default)]
pub struct ModuleStore {
    nodes: Vec<ModuleNode>,
    by_identifier: HashMap<String, ModuleId>,
    /// Publication order of modules; insertion order until sealing sorts it.
    order: Vec<ModuleId>,
    cache: Option<Arc<dyn ModuleCache>>,
}

impl ModuleStore {
    pub fn new(cache: Option<Arc<dyn ModuleCache>>) -> Self {
        Self {
            nodes: Vec::new(),
            by_identifier: HashMap::default(),
            order: Vec::new(),
            cache,
        }
    }

    /// Insert a module, preferring a fresh cached instance when timestamps
    /// prove it does not need a rebuild.
    pub fn add_module(
        &mut self,
        mut module: Box<dyn Module>,
        cache_group: Option<&str>,
        file_timestamps: Option<&TimestampMap>,
        context_timestamps: Option<&TimestampMap>,
    ) -> AddModuleOutcome {
        let identifier = module.identifier().to_string();
        if let Some(&existing) = self.by_identifier.get(&identifier) {
            return AddModuleOutcome::Duplicate(existing);
        }

        let cache_key = format!("{}{}", cache_group.unwrap_or("m"), identifier);
        match self.probe_cache(&cache_key, file_timestamps, context_timestamps) {
            CacheProbe::Fresh(cached) => {
                let id = self.insert(identifier, cached, Some(cache_key));
                self.node_mut(id).disconnect();
                AddModuleOutcome::CacheHit(id)
            }
            CacheProbe::Stale => {
                module.unbuild();
                let id = self.insert(identifier, module, Some(cache_key));
                AddModuleOutcome::Inserted(id)
            }
            CacheProbe::Miss => {
                let key = self.cache.is_some().then_some(cache_key);
                let id = self.insert(identifier, module, key);
                AddModuleOutcome::Inserted(id)
            }
        }
    }

    fn probe_cache(
        &self,
        cache_key: &str,
        file_timestamps: Option<&TimestampMap>,
        context_timestamps: Option<&TimestampMap>,
    ) -> CacheProbe {
        let Some(cache) = &self.cache else {
            return CacheProbe::Miss;
        };
        let Some(cached) = cache.take_module(cache_key) else {
            return CacheProbe::Miss;
        };
        let fresh = match (file_timestamps, context_timestamps) {
            (Some(files), Some(contexts)) => !cached.needs_rebuild(files, contexts),
            _ => false,
        };
        if fresh {
            CacheProbe::Fresh(cached)
        } else {
            CacheProbe::Stale
        }
    }

    fn insert(
        &mut self,
        identifier: String,
        module: Box<dyn Module>,
        cache_key: Option<String>,
    ) -> ModuleId {
        let id = ModuleId::from_index(self.nodes.len());
        let mut node = ModuleNode::new(id, module);
        node.cache_key = cache_key;
        self.nodes.push(node);
        self.by_identifier.insert(identifier, id);
        self.order.push(id);
        id
    }

    pub fn get(&self, identifier: &str) -> Option<ModuleId> {
        self.by_identifier.get(identifier).copied()
    }

    pub fn node(&self, id: ModuleId) -> &ModuleNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: ModuleId) -> &mut ModuleNode {
        &mut self.nodes[id.index()]
    }

    /// Module ids in publication order.
    pub fn order(&self) -> &[ModuleId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ModuleNode> {
        self.order.iter().map(|id| &self.nodes[id.index()])
    }

    /// Replace publication order by ascending `index`.
    pub(crate) fn sort_order_by_index(&mut self) {
        let nodes = &self.nodes;
        self.order
            .sort_by_key(|id| nodes[id.index()].index.unwrap_or(u32::MAX));
    }

    /// Sort publication order by assigned output id.
    pub(crate) fn sort_order_by_module_id(&mut self) {
        let nodes = &self.nodes;
        self.order
            .sort_by_key(|id| nodes[id.index()].module_id.unwrap_or(u32::MAX));
    }

    /// Move every module that has a cache slot back into the cache. Call
    /// after the compilation is done with its modules.
    pub fn store_cached_modules(&mut self) {
        let Some(cache) = self.cache.clone() else {
            return;
        };
        for node in &mut self.nodes {
            if let (Some(key), Some(module)) = (node.cache_key.clone(), node.module.take()) {
                cache.put_module(&key, module);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{module, ModuleSpec, StubModule};

    fn boxed(spec: ModuleSpec) -> Box<dyn Module> {
        Box::new(StubModule::from_spec(spec))
    }

    #[test]
    fn duplicate_identifiers_are_rejected() {
        let mut store = ModuleStore::new(None);
        let first = store.add_module(boxed(module("src/a.js")), None, None, None);
        let AddModuleOutcome::Inserted(id) = first else {
            panic!("expected insertion, got {first:?}");
        };
        let second = store.add_module(boxed(module("src/a.js")), None, None, None);
        assert_eq!(second, AddModuleOutcome::Duplicate(id));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn cache_hit_reuses_a_fresh_instance() {
        let cache: Arc<dyn ModuleCache> = Arc::new(MemoryCache::new());

        let mut store = ModuleStore::new(Some(cache.clone()));
        store.add_module(boxed(module("src/a.js").cacheable()), None, None, None);
        store.store_cached_modules();

        let mut store = ModuleStore::new(Some(cache));
        let timestamps = TimestampMap::default();
        let outcome = store.add_module(
            boxed(module("src/a.js").cacheable()),
            None,
            Some(&timestamps),
            Some(&timestamps),
        );
        assert!(matches!(outcome, AddModuleOutcome::CacheHit(_)));
    }

    #[test]
    fn stale_cache_entries_are_dropped() {
        let cache: Arc<dyn ModuleCache> = Arc::new(MemoryCache::new());

        let mut store = ModuleStore::new(Some(cache.clone()));
        // needs_rebuild defaults to true, so the cached copy is stale.
        store.add_module(boxed(module("src/a.js")), None, None, None);
        store.store_cached_modules();

        let mut store = ModuleStore::new(Some(cache.clone()));
        let timestamps = TimestampMap::default();
        let outcome = store.add_module(
            boxed(module("src/a.js")),
            None,
            Some(&timestamps),
            Some(&timestamps),
        );
        assert!(matches!(outcome, AddModuleOutcome::Inserted(_)));
        // The stale entry was consumed, not left behind.
        assert!(cache.take_module("msrc/a.js").is_none());
    }

    #[test]
    fn missing_timestamps_disable_cache_reuse() {
        let cache: Arc<dyn ModuleCache> = Arc::new(MemoryCache::new());

        let mut store = ModuleStore::new(Some(cache.clone()));
        store.add_module(boxed(module("src/a.js").cacheable()), None, None, None);
        store.store_cached_modules();

        let mut store = ModuleStore::new(Some(cache));
        let outcome = store.add_module(boxed(module("src/a.js").cacheable()), None, None, None);
        assert!(matches!(outcome, AddModuleOutcome::Inserted(_)));
    }

    #[test]
    fn cache_group_prefixes_the_key() {
        let cache: Arc<dyn ModuleCache> = Arc::new(MemoryCache::new());
        let mut store = ModuleStore::new(Some(cache.clone()));
        store.add_module(boxed(module("src/a.js")), Some("g"), None, None);
        store.store_cached_modules();
        assert!(cache.take_module("gsrc/a.js").is_some());
    }
}
