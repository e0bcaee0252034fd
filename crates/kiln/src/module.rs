//! The module contract and the graph-side record kept per module.
//!
//! Concrete modules (and the parsers behind them) live outside this crate;
//! the compilation consumes them through the [`Module`] trait. Everything
//! the graph algorithms track per module (ids, orderings, reasons, chunk
//! membership, build state) lives on [`ModuleNode`], which the compilation
//! owns in an arena indexed by [`ModuleId`].

use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::chunk::ChunkId;
use crate::dependency::{Dependency, DependencyBlock};
use crate::diagnostics::Diagnostic;
use crate::hasher::ContentHasher;
use crate::options::{CompilationOptions, ResolveOptions};
use crate::source::Source;
use crate::store::TimestampMap;
use crate::util::SortableSet;

/// Stable arena index of a module within one compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u32);

impl ModuleId {
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// Host-provided module resolution service, opaque to the core.
pub trait Resolver: Send + Sync + fmt::Debug {
    fn resolve(&self, context: &str, request: &str) -> Result<String, String>;
}

/// Host-provided read access to input files.
pub trait InputFileSystem: Send + Sync + fmt::Debug {
    fn read(&self, path: &str) -> std::io::Result<Vec<u8>>;
}

/// Everything a module build may consult. The compilation itself is not
/// reachable from here; builds run concurrently and must not touch shared
/// graph state.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub options: Arc<CompilationOptions>,
    pub resolver: Option<Arc<dyn Resolver>>,
    pub input_fs: Option<Arc<dyn InputFileSystem>>,
}

/// A buildable compilation unit.
#[async_trait]
pub trait Module: Send + fmt::Debug {
    /// Stable unique identity, e.g. canonicalised path plus query.
    fn identifier(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    /// Produce dependencies, blocks, variables, diagnostics and assets.
    /// Returning `Err` marks the build as failed; recoverable problems go to
    /// [`errors`](Module::errors) / [`warnings`](Module::warnings) instead.
    async fn build(&mut self, ctx: &BuildContext) -> Result<(), Diagnostic>;

    /// Drop everything a previous build produced.
    fn unbuild(&mut self);

    /// Drop everything sealing produced. Build results survive.
    fn unseal(&mut self) {}

    /// Whether a cached instance must be rebuilt given current timestamps.
    fn needs_rebuild(&self, file_timestamps: &TimestampMap, context_timestamps: &TimestampMap)
        -> bool {
        let _ = (file_timestamps, context_timestamps);
        true
    }

    fn block(&self) -> &DependencyBlock;

    fn block_mut(&mut self) -> &mut DependencyBlock;

    fn errors(&self) -> &[Diagnostic] {
        &[]
    }

    fn warnings(&self) -> &[Diagnostic] {
        &[]
    }

    fn context(&self) -> Option<&str> {
        None
    }

    fn resolve_options(&self) -> Option<&ResolveOptions> {
        None
    }

    fn file_dependencies(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn context_dependencies(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Named assets emitted by the build, installed during sealing.
    fn assets(&self) -> Vec<(String, Arc<dyn Source>)> {
        Vec::new()
    }

    /// Readable name used for chunk naming heuristics.
    fn name_for_condition(&self) -> Option<String> {
        None
    }

    fn update_hash(&self, hasher: &mut ContentHasher) {
        hasher.update(self.identifier());
    }
}

/// Why a module is part of the graph: the origin module (if any) and the
/// dependency that pulled it in.
#[derive(Debug, Clone)]
pub struct Reason {
    pub origin: Option<ModuleId>,
    pub dependency: Arc<dyn Dependency>,
}

/// Wall-clock timings recorded when profiling is enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleProfile {
    pub factory: Duration,
    pub building: Duration,
}

/// Externally observable build progress of a module, a snapshot of the
/// internal build state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildProgress {
    /// No build has run in this compilation (fresh insert or cache reuse).
    NotStarted,
    /// A build is in flight.
    Building,
    /// The build finished; `failed` is its terminal status.
    Finished { failed: bool },
}

/// Build progress of one module within this compilation.
#[derive(Debug, Default)]
pub(crate) enum BuildState {
    /// Not built in this compilation (fresh insert or cache reuse).
    #[default]
    Fresh,
    /// Build in flight; the module box is checked out into the build task.
    Building {
        waiters: Vec<oneshot::Sender<bool>>,
    },
    /// Build finished; `failed` is the terminal status waiters observed.
    Done { failed: bool },
}

/// Arena record: one module plus all graph-side bookkeeping.
#[derive(Debug)]
pub struct ModuleNode {
    id: ModuleId,
    identifier: String,
    pub(crate) module: Option<Box<dyn Module>>,
    pub(crate) state: BuildState,
    /// Cache slot this module is written back to, if caching is active.
    pub(crate) cache_key: Option<String>,
    /// True once this compilation actually (re)built the module.
    pub built: bool,
    /// Assigned output id.
    pub module_id: Option<u32>,
    pub index: Option<u32>,
    pub index2: Option<u32>,
    pub depth: Option<u32>,
    pub hash: Option<String>,
    pub rendered_hash: Option<String>,
    pub issuer: Option<ModuleId>,
    pub profile: Option<ModuleProfile>,
    pub(crate) reasons: Vec<Reason>,
    pub(crate) chunks: SortableSet<ChunkId>,
}

impl ModuleNode {
    pub(crate) fn new(id: ModuleId, module: Box<dyn Module>) -> Self {
        let identifier = module.identifier().to_string();
        Self {
            id,
            identifier,
            module: Some(module),
            state: BuildState::Fresh,
            cache_key: None,
            built: false,
            module_id: None,
            index: None,
            index2: None,
            depth: None,
            hash: None,
            rendered_hash: None,
            issuer: None,
            profile: None,
            reasons: Vec::new(),
            chunks: SortableSet::new(),
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The module itself. Panics only if called while the module is checked
    /// out into a build task, which the build driver never allows to escape.
    pub fn module(&self) -> &dyn Module {
        self.module
            .as_deref()
            .expect("module is checked out into a build task")
    }

    pub fn module_mut(&mut self) -> &mut dyn Module {
        self.module
            .as_deref_mut()
            .expect("module is checked out into a build task")
    }

    pub fn is_building(&self) -> bool {
        matches!(self.state, BuildState::Building { .. })
    }

    /// Snapshot of the build state machine; distinguishes a module that was
    /// never built this compilation from one whose build finished.
    pub fn build_progress(&self) -> BuildProgress {
        match &self.state {
            BuildState::Fresh => BuildProgress::NotStarted,
            BuildState::Building { .. } => BuildProgress::Building,
            BuildState::Done { failed } => BuildProgress::Finished { failed: *failed },
        }
    }

    pub fn reasons(&self) -> &[Reason] {
        &self.reasons
    }

    pub fn has_reasons(&self) -> bool {
        !self.reasons.is_empty()
    }

    /// Record why this module is included. Re-adding an identical
    /// (origin, dependency) pair is a no-op.
    pub(crate) fn add_reason(&mut self, origin: Option<ModuleId>, dependency: Arc<dyn Dependency>) {
        let exists = self
            .reasons
            .iter()
            .any(|r| r.origin == origin && Arc::ptr_eq(&r.dependency, &dependency));
        if !exists {
            self.reasons.push(Reason { origin, dependency });
        }
    }

    /// Remove the reason recorded for `(origin, dependency)`. Returns whether
    /// a reason was removed. Identity is pointer identity of the dependency.
    pub(crate) fn remove_reason(
        &mut self,
        origin: Option<ModuleId>,
        dependency: &Arc<dyn Dependency>,
    ) -> bool {
        let before = self.reasons.len();
        self.reasons
            .retain(|r| !(r.origin == origin && Arc::ptr_eq(&r.dependency, dependency)));
        self.reasons.len() != before
    }

    pub fn chunks(&self) -> &SortableSet<ChunkId> {
        &self.chunks
    }

    pub(crate) fn add_chunk(&mut self, chunk: ChunkId) -> bool {
        self.chunks.insert(chunk)
    }

    pub(crate) fn remove_chunk(&mut self, chunk: &ChunkId) -> bool {
        self.chunks.remove(chunk)
    }

    pub fn in_chunk(&self, chunk: ChunkId) -> bool {
        self.chunks.contains(&chunk)
    }

    /// Reset graph edges of a reused cached instance before reconnecting it.
    /// Resolved targets point into the arena of the previous compilation and
    /// must not leak into this one.
    pub(crate) fn disconnect(&mut self) {
        self.reasons.clear();
        self.issuer = None;
        if let Some(module) = self.module.as_deref() {
            module.block().clear_resolved();
        }
        self.unseal();
    }

    /// Drop everything sealing produced; build results survive.
    pub(crate) fn unseal(&mut self) {
        self.module_id = None;
        self.index = None;
        self.index2 = None;
        self.depth = None;
        self.hash = None;
        self.rendered_hash = None;
        self.chunks.clear();
        if let Some(module) = self.module.as_deref_mut() {
            module.block_mut().clear_block_chunks();
            module.unseal();
        }
    }
}
