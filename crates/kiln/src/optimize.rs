//! Built-in optimizer plugins.
//!
//! These run through the same hook pipeline as embedder plugins.
//! [`CompilationParams::new`](crate::CompilationParams::new) installs the
//! standard set; embedders that want a bare pipeline can construct their own
//! [`PluginDriver`](crate::PluginDriver).

use crate::compilation::Compilation;
use crate::plugin::CompilationPlugin;

/// Drops modules from a chunk when every parent chunk already carries them:
/// any path reaching the chunk has loaded those modules before, so shipping
/// them again is pure weight.
///
/// Returns `Some(true)` from `optimize_chunks_basic` when it changed the
/// graph, restarting the fixed-point loop; the follow-up pass finds nothing
/// and converges.
#[derive(Debug, Default)]
pub struct RemoveAvailableModulesPlugin;

impl CompilationPlugin for RemoveAvailableModulesPlugin {
    fn optimize_chunks_basic(&self, compilation: &mut Compilation) -> Option<bool> {
        let mut removals: Vec<(crate::ChunkId, crate::ModuleId)> = Vec::new();
        for &chunk in &compilation.chunks {
            let chunk_ref = compilation.chunk(chunk);
            if chunk_ref.is_initial() || chunk_ref.parents().is_empty() {
                continue;
            }
            for &module in chunk_ref.modules().iter() {
                if chunk_ref.entry_module == Some(module) {
                    continue;
                }
                let in_every_parent = chunk_ref
                    .parents()
                    .iter()
                    .all(|&parent| compilation.chunk(parent).has_module(module));
                if in_every_parent {
                    removals.push((chunk, module));
                }
            }
        }
        if removals.is_empty() {
            return None;
        }
        for (chunk, module) in removals {
            compilation.chunk_mut(chunk).remove_module(&module);
            compilation.module_mut(module).remove_chunk(&chunk);
        }
        Some(true)
    }
}
