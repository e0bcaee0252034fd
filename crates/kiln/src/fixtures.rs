//! Stub collaborators for tests and examples.
//!
//! Real embedders bring their own parsers, factories and templates; the
//! stubs here are enough to drive every phase of a compilation from a
//! declarative graph description. They are shipped as a public module so
//! integration tests and downstream smoke tests can share them.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

use crate::chunk::ChunkId;
use crate::compilation::Compilation;
use crate::dependency::{
    AsyncBlock, Dependency, DependencyBlock, DependencyVariable, ResolvedTarget,
};
use crate::diagnostics::{Diagnostic, DiagnosticKind, SourceLocation};
use crate::factory::{FactoryContext, ModuleFactory};
use crate::hasher::ContentHasher;
use crate::module::{BuildContext, Module};
use crate::source::{RawSource, Source};
use crate::store::TimestampMap;
use crate::template::{
    ChunkTemplate, MainTemplate, ModuleTemplate, PathData, RenderManifestEntry, TemplateSet,
};

/// A scripted dependency. Resource identity is the request string.
#[derive(Debug)]
pub struct StubDependency {
    pub request: String,
    pub optional: bool,
    pub weak: bool,
    pub loc: Option<SourceLocation>,
    target: ResolvedTarget,
}

impl StubDependency {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            optional: false,
            weak: false,
            loc: None,
            target: ResolvedTarget::new(),
        }
    }
}

impl Dependency for StubDependency {
    fn factory_id(&self) -> TypeId {
        TypeId::of::<Self>()
    }

    fn type_name(&self) -> &'static str {
        "StubDependency"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn resource(&self) -> Option<&str> {
        Some(&self.request)
    }

    fn target(&self) -> &ResolvedTarget {
        &self.target
    }

    fn optional(&self) -> bool {
        self.optional
    }

    fn weak(&self) -> bool {
        self.weak
    }

    fn loc(&self) -> Option<SourceLocation> {
        self.loc
    }
}

/// Dependency description inside a [`ModuleSpec`].
#[derive(Debug, Clone)]
pub struct DepSpec {
    pub request: String,
    pub optional: bool,
    pub weak: bool,
    pub loc: Option<SourceLocation>,
}

impl DepSpec {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            optional: false,
            weak: false,
            loc: None,
        }
    }

    fn instantiate(&self) -> Arc<dyn Dependency> {
        let mut dep = StubDependency::new(self.request.clone());
        dep.optional = self.optional;
        dep.weak = self.weak;
        dep.loc = self.loc;
        Arc::new(dep)
    }
}

/// Async split description inside a [`ModuleSpec`].
#[derive(Debug, Clone, Default)]
pub struct BlockSpec {
    pub chunk_name: Option<String>,
    pub loc: Option<SourceLocation>,
    pub dependencies: Vec<DepSpec>,
    pub blocks: Vec<BlockSpec>,
}

impl BlockSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            chunk_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn dep(mut self, request: &str) -> Self {
        self.dependencies.push(DepSpec::new(request));
        self
    }

    pub fn block(mut self, block: BlockSpec) -> Self {
        self.blocks.push(block);
        self
    }

    fn instantiate(&self) -> AsyncBlock {
        let mut block = AsyncBlock::new(self.chunk_name.clone(), self.loc);
        block.inner.dependencies = self.dependencies.iter().map(DepSpec::instantiate).collect();
        block.inner.blocks = self.blocks.iter().map(BlockSpec::instantiate).collect();
        block
    }
}

/// Declarative description of a module: what its build produces.
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    pub identifier: String,
    pub source: String,
    pub dependencies: Vec<DepSpec>,
    pub variables: Vec<(String, Vec<DepSpec>)>,
    pub blocks: Vec<BlockSpec>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub assets: Vec<(String, String)>,
    /// What `needs_rebuild` answers when this module comes out of a cache.
    pub needs_rebuild: bool,
    /// Makes `build` itself fail with this message.
    pub fail_build: Option<String>,
}

/// Start a module description; the request that reaches the factory doubles
/// as the identifier.
pub fn module(identifier: &str) -> ModuleSpec {
    ModuleSpec {
        identifier: identifier.to_string(),
        source: format!("// {identifier}\n"),
        dependencies: Vec::new(),
        variables: Vec::new(),
        blocks: Vec::new(),
        errors: Vec::new(),
        warnings: Vec::new(),
        assets: Vec::new(),
        needs_rebuild: true,
        fail_build: None,
    }
}

impl ModuleSpec {
    pub fn dep(mut self, request: &str) -> Self {
        self.dependencies.push(DepSpec::new(request));
        self
    }

    pub fn dep_at(mut self, request: &str, line: u32) -> Self {
        let mut dep = DepSpec::new(request);
        dep.loc = Some(SourceLocation::new(line, 0));
        self.dependencies.push(dep);
        self
    }

    pub fn optional_dep(mut self, request: &str) -> Self {
        let mut dep = DepSpec::new(request);
        dep.optional = true;
        self.dependencies.push(dep);
        self
    }

    pub fn weak_dep(mut self, request: &str) -> Self {
        let mut dep = DepSpec::new(request);
        dep.weak = true;
        self.dependencies.push(dep);
        self
    }

    /// Add an async split with plain dependencies.
    pub fn split(mut self, chunk_name: &str, requests: &[&str]) -> Self {
        let mut block = BlockSpec::named(chunk_name);
        for request in requests {
            block = block.dep(request);
        }
        self.blocks.push(block);
        self
    }

    pub fn block(mut self, block: BlockSpec) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn variable(mut self, name: &str, requests: &[&str]) -> Self {
        self.variables.push((
            name.to_string(),
            requests.iter().map(|r| DepSpec::new(*r)).collect(),
        ));
        self
    }

    pub fn source(mut self, text: &str) -> Self {
        self.source = text.to_string();
        self
    }

    pub fn error(mut self, message: &str) -> Self {
        self.errors.push(message.to_string());
        self
    }

    pub fn warning(mut self, message: &str) -> Self {
        self.warnings.push(message.to_string());
        self
    }

    pub fn asset(mut self, name: &str, content: &str) -> Self {
        self.assets.push((name.to_string(), content.to_string()));
        self
    }

    /// Mark the module reusable from cache without a rebuild.
    pub fn cacheable(mut self) -> Self {
        self.needs_rebuild = false;
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.fail_build = Some(message.to_string());
        self
    }
}

/// Module driven by a [`ModuleSpec`]; its build materialises the scripted
/// dependency structure.
#[derive(Debug)]
pub struct StubModule {
    spec: ModuleSpec,
    block: DependencyBlock,
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
    pub build_count: u32,
}

impl StubModule {
    pub fn from_spec(spec: ModuleSpec) -> Self {
        Self {
            spec,
            block: DependencyBlock::default(),
            errors: Vec::new(),
            warnings: Vec::new(),
            build_count: 0,
        }
    }

    pub fn source_text(&self) -> &str {
        &self.spec.source
    }
}

#[async_trait]
impl Module for StubModule {
    fn identifier(&self) -> &str {
        &self.spec.identifier
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn build(&mut self, _ctx: &BuildContext) -> Result<(), Diagnostic> {
        self.build_count += 1;
        self.block = DependencyBlock {
            dependencies: self.spec.dependencies.iter().map(DepSpec::instantiate).collect(),
            variables: self
                .spec
                .variables
                .iter()
                .map(|(name, deps)| DependencyVariable {
                    name: name.clone(),
                    dependencies: deps.iter().map(DepSpec::instantiate).collect(),
                })
                .collect(),
            blocks: self.spec.blocks.iter().map(BlockSpec::instantiate).collect(),
        };
        self.errors = self
            .spec
            .errors
            .iter()
            .map(|m| Diagnostic::new(DiagnosticKind::ModuleBuildError, m.clone()))
            .collect();
        self.warnings = self
            .spec
            .warnings
            .iter()
            .map(|m| Diagnostic::new(DiagnosticKind::ModuleBuildWarning, m.clone()))
            .collect();
        if let Some(message) = &self.spec.fail_build {
            return Err(Diagnostic::new(
                DiagnosticKind::ModuleBuildError,
                message.clone(),
            ));
        }
        Ok(())
    }

    fn unbuild(&mut self) {
        self.block = DependencyBlock::default();
        self.errors.clear();
        self.warnings.clear();
    }

    fn needs_rebuild(
        &self,
        _file_timestamps: &TimestampMap,
        _context_timestamps: &TimestampMap,
    ) -> bool {
        self.spec.needs_rebuild
    }

    fn block(&self) -> &DependencyBlock {
        &self.block
    }

    fn block_mut(&mut self) -> &mut DependencyBlock {
        &mut self.block
    }

    fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    fn assets(&self) -> Vec<(String, Arc<dyn Source>)> {
        self.spec
            .assets
            .iter()
            .map(|(name, content)| {
                (
                    name.clone(),
                    Arc::new(RawSource::new(content.clone())) as Arc<dyn Source>,
                )
            })
            .collect()
    }

    fn update_hash(&self, hasher: &mut ContentHasher) {
        hasher.update(&self.spec.identifier);
        hasher.update(&self.spec.source);
    }
}

/// Factory serving [`ModuleSpec`]s by request. Unregistered requests get a
/// leaf module whose identifier is the request itself.
#[derive(Debug, Default)]
pub struct StubFactory {
    specs: Mutex<HashMap<String, ModuleSpec>>,
    failures: Mutex<HashMap<String, String>>,
    dropped: Mutex<HashSet<String>>,
    /// Every request this factory saw, in call order.
    created: Mutex<Vec<String>>,
}

impl StubFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, spec: ModuleSpec) {
        self.specs.lock().insert(spec.identifier.clone(), spec);
    }

    /// Make requests for `request` fail with `message`.
    pub fn fail(&self, request: &str, message: &str) {
        self.failures
            .lock()
            .insert(request.to_string(), message.to_string());
    }

    /// Make requests for `request` produce no module at all.
    pub fn drop_request(&self, request: &str) {
        self.dropped.lock().insert(request.to_string());
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl ModuleFactory for StubFactory {
    async fn create(&self, ctx: FactoryContext) -> Result<Option<Box<dyn Module>>, Diagnostic> {
        let request = ctx.resource().unwrap_or("").to_string();
        self.created.lock().push(request.clone());
        if let Some(message) = self.failures.lock().get(&request) {
            return Err(Diagnostic::new(
                DiagnosticKind::ModuleNotFound,
                message.clone(),
            ));
        }
        if self.dropped.lock().contains(&request) {
            return Ok(None);
        }
        let spec = self
            .specs
            .lock()
            .get(&request)
            .cloned()
            .unwrap_or_else(|| module(&request));
        Ok(Some(Box::new(StubModule::from_spec(spec))))
    }
}

/// Concatenating template used for both runtime and non-runtime chunks.
#[derive(Debug, Default)]
pub struct PlainTemplate {
    /// Runtime templates render with the entry filename template.
    runtime: bool,
}

impl PlainTemplate {
    fn manifest(
        &self,
        compilation: &Compilation,
        chunk: ChunkId,
    ) -> Result<Vec<RenderManifestEntry>, Diagnostic> {
        let chunk_ref = compilation.chunk(chunk);
        let output = &compilation.options.output;
        let body: String = chunk_ref
            .modules()
            .iter()
            .map(|&m| {
                let node = compilation.module(m);
                node.module()
                    .as_any()
                    .downcast_ref::<StubModule>()
                    .map(|s| s.source_text().to_string())
                    .unwrap_or_else(|| format!("// {}\n", node.identifier()))
            })
            .collect();
        let filename_template = if self.runtime {
            output.filename.clone()
        } else {
            output.chunk_filename.clone()
        };
        let entry = RenderManifestEntry {
            identifier: format!("chunk{}", chunk_ref.debug_id),
            hash: chunk_ref.hash.clone().unwrap_or_default(),
            filename_template,
            path_data: PathData {
                name: chunk_ref.name.clone(),
                id: chunk_ref.chunk_id.map(|id| id.to_string()),
                hash: compilation.hash.clone(),
                chunk_hash: chunk_ref.hash.clone(),
                module_hash: None,
            },
            render: Box::new(move || Ok(Arc::new(RawSource::new(body)) as Arc<dyn Source>)),
        };
        Ok(vec![entry])
    }

    fn chunk_hash_input(
        &self,
        compilation: &Compilation,
        chunk: ChunkId,
        hasher: &mut ContentHasher,
    ) {
        if self.runtime {
            // Runtime output embeds references to the other chunks, so
            // their hashes feed the runtime chunk's hash.
            for &other in &compilation.chunks {
                if other != chunk {
                    if let Some(hash) = &compilation.chunk(other).hash {
                        hasher.update(hash);
                    }
                }
            }
        }
    }
}

impl MainTemplate for PlainTemplate {
    fn update_hash(&self, hasher: &mut ContentHasher) {
        hasher.update("plain-main/1");
    }

    fn update_hash_for_chunk(
        &self,
        compilation: &Compilation,
        chunk: ChunkId,
        hasher: &mut ContentHasher,
    ) {
        self.chunk_hash_input(compilation, chunk, hasher);
    }

    fn render_manifest(
        &self,
        compilation: &Compilation,
        chunk: ChunkId,
    ) -> Result<Vec<RenderManifestEntry>, Diagnostic> {
        self.manifest(compilation, chunk)
    }
}

impl ChunkTemplate for PlainTemplate {
    fn update_hash(&self, hasher: &mut ContentHasher) {
        hasher.update("plain-chunk/1");
    }

    fn update_hash_for_chunk(
        &self,
        compilation: &Compilation,
        chunk: ChunkId,
        hasher: &mut ContentHasher,
    ) {
        self.chunk_hash_input(compilation, chunk, hasher);
    }

    fn render_manifest(
        &self,
        compilation: &Compilation,
        chunk: ChunkId,
    ) -> Result<Vec<RenderManifestEntry>, Diagnostic> {
        self.manifest(compilation, chunk)
    }
}

/// Module template stub; only participates in hashing.
#[derive(Debug, Default)]
pub struct PlainModuleTemplate;

impl ModuleTemplate for PlainModuleTemplate {
    fn update_hash(&self, hasher: &mut ContentHasher) {
        hasher.update("plain-module/1");
    }
}

/// The default template set used by tests and examples.
pub fn plain_templates() -> TemplateSet {
    let mut module_templates: BTreeMap<String, Arc<dyn ModuleTemplate>> = BTreeMap::new();
    module_templates.insert("javascript".to_string(), Arc::new(PlainModuleTemplate));
    TemplateSet {
        main: Arc::new(PlainTemplate { runtime: true }),
        chunk: Arc::new(PlainTemplate { runtime: false }),
        module_templates,
    }
}
