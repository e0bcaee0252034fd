//! Module → chunk partitioning.
//!
//! Phase 1 walks dependency blocks from the input chunks, filling chunks
//! with modules and creating one chunk per async split point. Phase 2
//! connects chunks along recorded block edges while pruning edges whose
//! target would only re-deliver modules already available on every path to
//! it; the per-chunk minimal availability set shrinks monotonically, which
//! both breaks cycles and guarantees termination. Chunks created in phase 1
//! that end up without parents are removed.

use std::collections::hash_map::Entry;
use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use tracing::{debug, trace};

use super::Compilation;
use crate::chunk::ChunkId;
use crate::dependency::{BlockRef, DependencyBlock};
use crate::diagnostics::{Diagnostic, DiagnosticKind, SourceLocation};
use crate::module::ModuleId;
use crate::util::SortableSet;

/// A work item source: a module's root block or one of its async blocks.
#[derive(Debug, Clone, Copy)]
enum BlockSource {
    Module(ModuleId),
    Block(BlockRef),
}

/// Owned view of one block level, so graph mutation does not alias module
/// storage.
struct BlockSnapshot {
    origin: ModuleId,
    /// Surviving dependency edges: resolved, referenced, not weak.
    targets: Vec<ModuleId>,
    children: Vec<ChildBlock>,
}

struct ChildBlock {
    ordinal: u32,
    chunk_name: Option<String>,
    loc: Option<SourceLocation>,
}

impl Compilation {
    /// Partition modules reachable from the input chunks into the chunk
    /// graph.
    pub(crate) fn process_dependencies_blocks_for_chunks(&mut self, input_chunks: Vec<ChunkId>) {
        debug!(inputs = input_chunks.len(), "building chunk graph");

        // Phase 1: discover chunks and record block edges.
        let mut block_chunks: HashMap<BlockRef, ChunkId> = HashMap::default();
        let mut chunk_dependencies: HashMap<ChunkId, Vec<(BlockRef, ChunkId)>> = HashMap::default();
        let mut all_created_chunks: SortableSet<ChunkId> = SortableSet::new();

        let mut queue: Vec<(BlockSource, ChunkId)> = input_chunks
            .iter()
            .filter_map(|&chunk| {
                self.chunk(chunk)
                    .entry_module
                    .map(|module| (BlockSource::Module(module), chunk))
            })
            .collect();

        while let Some((source, chunk)) = queue.pop() {
            let snapshot = self.block_snapshot(source);

            for target in snapshot.targets {
                if self.chunk_mut(chunk).add_module(target) {
                    self.module_mut(target).add_chunk(chunk);
                    queue.push((BlockSource::Module(target), chunk));
                }
            }

            for child in snapshot.children {
                let block = BlockRef {
                    module: snapshot.origin,
                    ordinal: child.ordinal,
                };
                let target_chunk = match block_chunks.get(&block) {
                    Some(&existing) => existing,
                    None => {
                        let named = child
                            .chunk_name
                            .as_deref()
                            .and_then(|name| self.named_chunks.get(name).copied());
                        match named {
                            Some(initial) if self.chunk(initial).is_initial() => {
                                // Legacy fold-in: the split lands in its
                                // parent chunk instead of the entry chunk it
                                // collides with.
                                let name = child.chunk_name.clone().unwrap_or_default();
                                let identifier =
                                    self.module(snapshot.origin).identifier().to_string();
                                self.warnings.push(
                                    Diagnostic::new(
                                        DiagnosticKind::AsyncDependencyToInitialChunk,
                                        format!(
                                            "async dependency wants chunk name \"{name}\", which belongs to an entry chunk; it is kept in the requesting chunk"
                                        ),
                                    )
                                    .with_module(snapshot.origin, identifier)
                                    .with_loc(child.loc),
                                );
                                chunk
                            }
                            _ => {
                                let fresh = self.add_chunk(
                                    child.chunk_name.as_deref(),
                                    Some(snapshot.origin),
                                    child.loc,
                                );
                                block_chunks.insert(block, fresh);
                                all_created_chunks.insert(fresh);
                                if let Some(async_block) = self
                                    .module_mut(snapshot.origin)
                                    .module_mut()
                                    .block_mut()
                                    .async_block_mut(child.ordinal)
                                {
                                    async_block.chunks.clear();
                                }
                                fresh
                            }
                        }
                    }
                };
                chunk_dependencies
                    .entry(chunk)
                    .or_default()
                    .push((block, target_chunk));
                queue.push((BlockSource::Block(block), target_chunk));
            }
        }

        // Phase 2: availability-pruned connection.
        let mut min_available: HashMap<ChunkId, HashSet<ModuleId>> = HashMap::default();
        let mut queue: VecDeque<(ChunkId, Arc<HashSet<ModuleId>>)> = input_chunks
            .iter()
            .map(|&chunk| (chunk, Arc::new(HashSet::default())))
            .collect();

        while let Some((chunk, available)) = queue.pop_front() {
            let available: HashSet<ModuleId> = match min_available.entry(chunk) {
                Entry::Vacant(slot) => {
                    slot.insert((*available).clone());
                    (*available).clone()
                }
                Entry::Occupied(mut slot) => {
                    let stored = slot.get_mut();
                    let before = stored.len();
                    stored.retain(|m| available.contains(m));
                    if stored.len() == before {
                        // No shrink, no new information.
                        continue;
                    }
                    stored.clone()
                }
            };

            let Some(edges) = chunk_dependencies.get(&chunk).cloned() else {
                continue;
            };

            let mut new_available = available;
            for &module in self.chunk(chunk).modules.iter() {
                new_available.insert(module);
            }
            let new_available = Arc::new(new_available);

            let mut next_chunks: Vec<ChunkId> = Vec::new();
            let mut enqueued: HashSet<ChunkId> = HashSet::default();
            for (block, dep_chunk) in edges {
                let delivers_anything = self
                    .chunk(dep_chunk)
                    .modules
                    .iter()
                    .any(|m| !new_available.contains(m));
                if !delivers_anything {
                    trace!(from = %chunk, to = %dep_chunk, "dropping fully-available chunk edge");
                    continue;
                }
                if self.chunk_mut(dep_chunk).add_block(block) {
                    if let Some(async_block) = self
                        .module_mut(block.module)
                        .module_mut()
                        .block_mut()
                        .async_block_mut(block.ordinal)
                    {
                        async_block.chunks.push(dep_chunk);
                    }
                }
                if self.chunk_mut(chunk).add_child(dep_chunk) {
                    self.chunk_mut(dep_chunk).add_parent(chunk);
                }
                if enqueued.insert(dep_chunk) {
                    next_chunks.push(dep_chunk);
                }
            }
            for dep_chunk in next_chunks {
                queue.push_back((dep_chunk, Arc::clone(&new_available)));
            }
        }

        // Cleanup: drop phase-1 chunks nothing connected to.
        for &chunk in all_created_chunks.iter() {
            if self.chunks.contains(&chunk) && self.chunk(chunk).parents.is_empty() {
                self.remove_chunk_from_graph(chunk, "unconnected");
            }
        }
    }

    /// Capture one block level: resolved non-weak dependency targets
    /// (variables inlined first) and the direct nested blocks.
    fn block_snapshot(&self, source: BlockSource) -> BlockSnapshot {
        let (origin, parent) = match source {
            BlockSource::Module(module) => (module, None),
            BlockSource::Block(block) => (block.module, Some(block.ordinal)),
        };
        let root = self.module(origin).module().block();
        let block = match parent {
            None => root,
            Some(ordinal) => {
                let Some(found) = root.async_block(ordinal) else {
                    return BlockSnapshot {
                        origin,
                        targets: Vec::new(),
                        children: Vec::new(),
                    };
                };
                &found.inner
            }
        };

        let mut targets = Vec::new();
        let mut record = |dep: &dyn crate::dependency::Dependency| {
            let Some(reference) = dep.reference() else {
                return;
            };
            let Some(module) = reference.module else {
                return;
            };
            if reference.weak {
                return;
            }
            targets.push(module);
        };
        for variable in &block.variables {
            for dep in &variable.dependencies {
                record(dep.as_ref());
            }
        }
        for dep in &block.dependencies {
            record(dep.as_ref());
        }

        let children = direct_children(root, parent)
            .into_iter()
            .map(|(ordinal, async_block)| ChildBlock {
                ordinal,
                chunk_name: async_block.chunk_name.clone(),
                loc: async_block.loc,
            })
            .collect();

        BlockSnapshot {
            origin,
            targets,
            children,
        }
    }
}

/// Direct child blocks of the block at `parent` (`None` = the root block),
/// with their pre-order ordinals.
fn direct_children(
    root: &DependencyBlock,
    parent: Option<u32>,
) -> Vec<(u32, &crate::dependency::AsyncBlock)> {
    fn walk<'a>(
        block: &'a DependencyBlock,
        parent: Option<u32>,
        want: Option<u32>,
        counter: &mut u32,
        out: &mut Vec<(u32, &'a crate::dependency::AsyncBlock)>,
    ) {
        for nested in &block.blocks {
            let ordinal = *counter;
            *counter += 1;
            if parent == want {
                out.push((ordinal, nested));
            }
            walk(&nested.inner, Some(ordinal), want, counter, out);
        }
    }
    let mut out = Vec::new();
    let mut counter = 0;
    walk(root, None, parent, &mut counter, &mut out);
    out
}
