//! The compilation aggregate.
//!
//! A `Compilation` is single-shot: entries go in through
//! [`add_entry`](Compilation::add_entry), [`finish`](Compilation::finish)
//! closes the build phase, [`seal`](Compilation::seal) runs partitioning,
//! ids, hashes and asset rendering. [`unseal`](Compilation::unseal) reverts
//! to the built state so sealing can run again.
//!
//! All graph mutation happens through `&mut self` on one logical task;
//! factory calls and module builds are the only work that runs concurrently,
//! and they hand their results back to the owning driver loop.

mod assets;
mod build;
mod chunks;
mod hashing;
mod ids;
mod labels;
mod reasons;
mod seal;

use std::any::TypeId;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

use crate::chunk::{Chunk, ChunkId, Entrypoint};
use crate::dependency::Dependency;
use crate::diagnostics::{Diagnostic, SourceLocation};
use crate::factory::ModuleFactory;
use crate::module::{BuildContext, InputFileSystem, ModuleId, ModuleNode, Resolver};
use crate::options::CompilationOptions;
use crate::plugin::PluginDriver;
use crate::source::Source;
use crate::store::{ModuleCache, ModuleStore, TimestampMap};
use crate::template::TemplateSet;
use crate::util::SortableSet;
use crate::{Error, Result};

pub(crate) use build::BuildGate;

/// Entry slot reserved by [`Compilation::add_entry`] before its module chain
/// runs, so entry ordering is stable under concurrency and failures.
#[derive(Debug, Clone)]
pub struct PreparedChunk {
    pub name: String,
    pub module: Option<ModuleId>,
}

/// Injected collaborators and configuration for one compilation.
#[derive(Debug)]
pub struct CompilationParams {
    pub options: CompilationOptions,
    pub plugins: PluginDriver,
    pub templates: TemplateSet,
    pub cache: Option<Arc<dyn ModuleCache>>,
    /// Name of the owning compiler, surfaced to factories.
    pub name: Option<String>,
    pub resolver: Option<Arc<dyn Resolver>>,
    pub input_fs: Option<Arc<dyn InputFileSystem>>,
    pub file_timestamps: Option<TimestampMap>,
    pub context_timestamps: Option<TimestampMap>,
}

impl CompilationParams {
    /// Defaults: no cache, no resolver, and the standard optimizer plugins
    /// pre-registered. Replace `plugins` for a bare pipeline.
    pub fn new(templates: TemplateSet) -> Self {
        let mut plugins = PluginDriver::new();
        plugins.add(crate::optimize::RemoveAvailableModulesPlugin);
        Self {
            options: CompilationOptions::default(),
            plugins,
            templates,
            cache: None,
            name: None,
            resolver: None,
            input_fs: None,
            file_timestamps: None,
            context_timestamps: None,
        }
    }
}

/// One bundling run: modules, chunks, diagnostics and output assets.
#[derive(Debug)]
pub struct Compilation {
    pub options: Arc<CompilationOptions>,
    pub(crate) plugins: Arc<PluginDriver>,
    pub(crate) factories: HashMap<TypeId, Arc<dyn ModuleFactory>>,
    pub(crate) templates: TemplateSet,
    pub(crate) cache: Option<Arc<dyn ModuleCache>>,
    pub(crate) store: ModuleStore,
    pub(crate) chunk_arena: Vec<Chunk>,
    /// Live chunks in creation (later: id) order.
    pub chunks: Vec<ChunkId>,
    pub named_chunks: HashMap<String, ChunkId>,
    /// Entry modules in the order their chains completed.
    pub entries: Vec<ModuleId>,
    pub prepared_chunks: Vec<PreparedChunk>,
    /// Entrypoints in entry registration order.
    pub entrypoints: Vec<(String, Entrypoint)>,
    pub assets: BTreeMap<String, Arc<dyn Source>>,
    pub additional_chunk_assets: Vec<String>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub children: Vec<Compilation>,
    pub file_timestamps: Option<TimestampMap>,
    pub context_timestamps: Option<TimestampMap>,
    /// Summarized input paths, filled by `summarize_dependencies`.
    pub file_dependencies: SortableSet<PathBuf>,
    pub context_dependencies: SortableSet<PathBuf>,
    /// Output ids reserved by the embedder (e.g. from records).
    pub used_module_ids: HashSet<u32>,
    pub used_chunk_ids: HashSet<u32>,
    /// Truncated compilation hash.
    pub hash: Option<String>,
    pub full_hash: Option<String>,
    pub name: Option<String>,
    pub(crate) resolver: Option<Arc<dyn Resolver>>,
    pub(crate) input_fs: Option<Arc<dyn InputFileSystem>>,
    pub(crate) gate: BuildGate,
    pub(crate) next_free_module_index: u32,
    pub(crate) next_free_module_index2: u32,
    next_chunk_debug_id: u32,
}

impl Compilation {
    pub fn new(params: CompilationParams) -> Self {
        let parallelism = params.options.parallelism.max(1);
        Self {
            options: Arc::new(params.options),
            plugins: Arc::new(params.plugins),
            factories: HashMap::default(),
            templates: params.templates,
            cache: params.cache.clone(),
            store: ModuleStore::new(params.cache),
            chunk_arena: Vec::new(),
            chunks: Vec::new(),
            named_chunks: HashMap::default(),
            entries: Vec::new(),
            prepared_chunks: Vec::new(),
            entrypoints: Vec::new(),
            assets: BTreeMap::new(),
            additional_chunk_assets: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            children: Vec::new(),
            file_timestamps: params.file_timestamps,
            context_timestamps: params.context_timestamps,
            file_dependencies: SortableSet::new(),
            context_dependencies: SortableSet::new(),
            used_module_ids: HashSet::default(),
            used_chunk_ids: HashSet::default(),
            hash: None,
            full_hash: None,
            name: params.name,
            resolver: params.resolver,
            input_fs: params.input_fs,
            gate: BuildGate::new(parallelism),
            next_free_module_index: 0,
            next_free_module_index2: 0,
            next_chunk_debug_id: 0,
        }
    }

    /// Register the factory used for dependencies of concrete type `D`.
    pub fn set_dependency_factory<D: Dependency + 'static>(
        &mut self,
        factory: Arc<dyn ModuleFactory>,
    ) {
        self.factories.insert(TypeId::of::<D>(), factory);
    }

    pub(crate) fn factory_for(&self, dependency: &dyn Dependency) -> Result<Arc<dyn ModuleFactory>> {
        self.factories
            .get(&dependency.factory_id())
            .cloned()
            .ok_or_else(|| Error::FactoryLookup {
                type_name: dependency.type_name().to_string(),
            })
    }

    pub fn module(&self, id: ModuleId) -> &ModuleNode {
        self.store.node(id)
    }

    pub(crate) fn module_mut(&mut self, id: ModuleId) -> &mut ModuleNode {
        self.store.node_mut(id)
    }

    /// Module ids in publication order.
    pub fn modules(&self) -> &[ModuleId] {
        self.store.order()
    }

    pub fn get_module(&self, identifier: &str) -> Option<ModuleId> {
        self.store.get(identifier)
    }

    pub fn chunk(&self, id: ChunkId) -> &Chunk {
        &self.chunk_arena[id.index()]
    }

    pub(crate) fn chunk_mut(&mut self, id: ChunkId) -> &mut Chunk {
        &mut self.chunk_arena[id.index()]
    }

    pub fn entrypoint(&self, name: &str) -> Option<&Entrypoint> {
        self.entrypoints
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
    }

    /// Get or create a chunk. A named chunk is created at most once; later
    /// calls return the existing chunk and only record the new origin.
    pub(crate) fn add_chunk(
        &mut self,
        name: Option<&str>,
        module: Option<ModuleId>,
        loc: Option<SourceLocation>,
    ) -> ChunkId {
        if let Some(name) = name {
            if let Some(&existing) = self.named_chunks.get(name) {
                if module.is_some() {
                    self.chunk_mut(existing).add_origin(module, loc);
                }
                return existing;
            }
        }
        let id = ChunkId::from_index(self.chunk_arena.len());
        let debug_id = self.next_chunk_debug_id;
        self.next_chunk_debug_id += 1;
        let mut chunk = Chunk::new(id, name.map(str::to_string), debug_id);
        if module.is_some() {
            chunk.add_origin(module, loc);
        }
        self.chunk_arena.push(chunk);
        self.chunks.push(id);
        if let Some(name) = name {
            self.named_chunks.insert(name.to_string(), id);
        }
        id
    }

    /// Detach a chunk from the graph, reconnecting its children to its
    /// parents, and drop it from the live chunk list.
    pub(crate) fn remove_chunk_from_graph(&mut self, id: ChunkId, reason: &str) {
        tracing::debug!(chunk = %id, reason, "removing chunk");
        for module in self.chunk(id).modules.to_vec() {
            self.module_mut(module).remove_chunk(&id);
        }
        let parents = self.chunk(id).parents.to_vec();
        let children = self.chunk(id).children.to_vec();
        for &parent in &parents {
            self.chunk_mut(parent).remove_child(&id);
            for &child in &children {
                self.chunk_mut(parent).add_child(child);
            }
        }
        for &child in &children {
            self.chunk_mut(child).remove_parent(&id);
            for &parent in &parents {
                self.chunk_mut(child).add_parent(parent);
            }
        }
        self.chunks.retain(|c| *c != id);
        if let Some(name) = self.chunk(id).name.clone() {
            if self.named_chunks.get(&name) == Some(&id) {
                self.named_chunks.remove(&name);
            }
        }
    }

    /// Revert to the built state: chunks and assets are dropped, modules
    /// survive. Sealing can then run again.
    pub fn unseal(&mut self) {
        tracing::debug!("unsealing compilation");
        let plugins = Arc::clone(&self.plugins);
        plugins.each(|p| p.unseal(self));
        self.chunks.clear();
        self.chunk_arena.clear();
        self.named_chunks.clear();
        self.additional_chunk_assets.clear();
        self.assets.clear();
        self.entrypoints.clear();
        self.next_chunk_debug_id = 0;
        for id in self.store.order().to_vec() {
            self.store.node_mut(id).unseal();
        }
    }

    /// Move built modules back into the persistent cache. Call once the
    /// embedder is done with this compilation.
    pub fn store_cached_modules(&mut self) {
        self.store.store_cached_modules();
    }

    pub(crate) fn build_context(&self) -> BuildContext {
        BuildContext {
            options: Arc::clone(&self.options),
            resolver: self.resolver.clone(),
            input_fs: self.input_fs.clone(),
        }
    }

    /// Verify the invariants later phases rely on: unique identifiers,
    /// unique output ids, symmetric chunk membership and parent/child edges.
    pub fn check_constraints(&self) -> Result<()> {
        let mut identifiers: HashSet<&str> = HashSet::default();
        for node in self.store.nodes() {
            if !identifiers.insert(node.identifier()) {
                return Err(Error::Constraint(format!(
                    "duplicate module identifier {}",
                    node.identifier()
                )));
            }
        }
        let mut module_ids: HashSet<u32> = HashSet::default();
        for node in self.store.nodes() {
            if let Some(id) = node.module_id {
                if !module_ids.insert(id) {
                    return Err(Error::Constraint(format!("duplicate module id {id}")));
                }
            }
        }
        let mut chunk_ids: HashSet<u32> = HashSet::default();
        for &chunk in &self.chunks {
            if let Some(id) = self.chunk(chunk).chunk_id {
                if !chunk_ids.insert(id) {
                    return Err(Error::Constraint(format!("duplicate chunk id {id}")));
                }
            }
        }
        for &chunk in &self.chunks {
            for &module in self.chunk(chunk).modules.iter() {
                if !self.module(module).in_chunk(chunk) {
                    return Err(Error::Constraint(format!(
                        "{module} is in {chunk} but does not know it"
                    )));
                }
            }
            for &parent in self.chunk(chunk).parents.iter() {
                if !self.chunk(parent).children.contains(&chunk) {
                    return Err(Error::Constraint(format!(
                        "{chunk} has parent {parent} without matching child edge"
                    )));
                }
            }
            for &child in self.chunk(chunk).children.iter() {
                if !self.chunk(child).parents.contains(&chunk) {
                    return Err(Error::Constraint(format!(
                        "{chunk} has child {child} without matching parent edge"
                    )));
                }
            }
        }
        Ok(())
    }
}
