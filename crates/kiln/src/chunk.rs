//! Output units and named entry groupings.

use std::fmt;

use crate::dependency::BlockRef;
use crate::diagnostics::SourceLocation;
use crate::module::ModuleId;
use crate::util::SortableSet;

/// Stable arena index of a chunk within one compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(u32);

impl ChunkId {
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk#{}", self.0)
    }
}

/// Where a chunk came from, for reporting.
#[derive(Debug, Clone)]
pub struct ChunkOrigin {
    pub module: Option<ModuleId>,
    pub loc: Option<SourceLocation>,
}

/// A unit of output: the smallest thing rendered to an asset.
#[derive(Debug)]
pub struct Chunk {
    id: ChunkId,
    pub name: Option<String>,
    /// Assigned output id.
    pub chunk_id: Option<u32>,
    pub ids: Option<Vec<u32>>,
    /// Process-unique id for debugging; independent of output ids.
    pub debug_id: u32,
    /// Files emitted for this chunk.
    pub files: Vec<String>,
    pub origins: Vec<ChunkOrigin>,
    pub entry_module: Option<ModuleId>,
    pub hash: Option<String>,
    pub rendered_hash: Option<String>,
    pub(crate) modules: SortableSet<ModuleId>,
    pub(crate) parents: SortableSet<ChunkId>,
    pub(crate) children: SortableSet<ChunkId>,
    /// Async blocks this chunk fulfils.
    pub(crate) blocks: SortableSet<BlockRef>,
    pub(crate) is_initial: bool,
    pub(crate) has_runtime: bool,
}

impl Chunk {
    pub(crate) fn new(id: ChunkId, name: Option<String>, debug_id: u32) -> Self {
        Self {
            id,
            name,
            chunk_id: None,
            ids: None,
            debug_id,
            files: Vec::new(),
            origins: Vec::new(),
            entry_module: None,
            hash: None,
            rendered_hash: None,
            modules: SortableSet::new(),
            parents: SortableSet::new(),
            children: SortableSet::new(),
            blocks: SortableSet::new(),
            is_initial: false,
            has_runtime: false,
        }
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// Seeded from a top-level entry, as opposed to created for a split.
    pub fn is_initial(&self) -> bool {
        self.is_initial
    }

    /// Carries the bootstrap runtime; its hash depends on other chunks'.
    pub fn has_runtime(&self) -> bool {
        self.has_runtime
    }

    pub fn modules(&self) -> &SortableSet<ModuleId> {
        &self.modules
    }

    pub fn parents(&self) -> &SortableSet<ChunkId> {
        &self.parents
    }

    pub fn children(&self) -> &SortableSet<ChunkId> {
        &self.children
    }

    pub fn blocks(&self) -> &SortableSet<BlockRef> {
        &self.blocks
    }

    pub(crate) fn add_origin(&mut self, module: Option<ModuleId>, loc: Option<SourceLocation>) {
        self.origins.push(ChunkOrigin { module, loc });
    }

    /// Returns true when the module was not already present.
    pub(crate) fn add_module(&mut self, module: ModuleId) -> bool {
        self.modules.insert(module)
    }

    pub(crate) fn remove_module(&mut self, module: &ModuleId) -> bool {
        self.modules.remove(module)
    }

    pub fn has_module(&self, module: ModuleId) -> bool {
        self.modules.contains(&module)
    }

    pub(crate) fn add_parent(&mut self, parent: ChunkId) -> bool {
        self.parents.insert(parent)
    }

    pub(crate) fn remove_parent(&mut self, parent: &ChunkId) -> bool {
        self.parents.remove(parent)
    }

    /// Record `child` as reachable from this chunk. Returns true on first
    /// insertion.
    pub(crate) fn add_child(&mut self, child: ChunkId) -> bool {
        self.children.insert(child)
    }

    pub(crate) fn remove_child(&mut self, child: &ChunkId) -> bool {
        self.children.remove(child)
    }

    /// Record that this chunk fulfils an async block. Returns true on first
    /// insertion.
    pub(crate) fn add_block(&mut self, block: BlockRef) -> bool {
        self.blocks.insert(block)
    }
}

/// Ordered list of chunks for one named entry. The first chunk carries the
/// runtime.
#[derive(Debug, Clone, Default)]
pub struct Entrypoint {
    pub name: String,
    pub chunks: Vec<ChunkId>,
}

impl Entrypoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chunks: Vec::new(),
        }
    }

    /// Put a chunk at the front; it becomes the runtime chunk.
    pub fn unshift_chunk(&mut self, chunk: ChunkId) {
        self.chunks.retain(|c| *c != chunk);
        self.chunks.insert(0, chunk);
    }

    pub fn runtime_chunk(&self) -> Option<ChunkId> {
        self.chunks.first().copied()
    }
}
