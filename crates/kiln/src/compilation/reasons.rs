//! Reason bookkeeping and finish-time dependency reporting.
//!
//! Reasons are the back-edges that keep modules in the graph. When a rebuild
//! replaces a module's dependency set, the reasons recorded by the old set
//! are removed; a module whose reasons for a chunk disappear is detached
//! from that chunk, which can cascade through its own dependencies and
//! across async block edges.

use std::sync::Arc;

use tracing::debug;

use super::Compilation;
use crate::chunk::ChunkId;
use crate::dependency::DependencyBlock;
use crate::diagnostics::DiagnosticKind;
use crate::module::ModuleId;

impl Compilation {
    /// Close the build phase: fire `finish_modules` and surface the
    /// diagnostics dependencies accumulated during building.
    pub fn finish(&mut self) {
        debug!(modules = self.modules().len(), "finishing build phase");
        let plugins = Arc::clone(&self.plugins);
        plugins.each(|p| p.finish_modules(self));
        for id in self.store.order().to_vec() {
            self.report_dependency_diagnostics(id);
        }
    }

    fn report_dependency_diagnostics(&mut self, id: ModuleId) {
        let identifier = self.module(id).identifier().to_string();
        let dependencies = self.module(id).module().block().collect_dependencies();
        for dependency in dependencies {
            for mut diagnostic in dependency.errors() {
                diagnostic.kind = DiagnosticKind::ModuleDependencyError;
                if diagnostic.loc.is_none() {
                    diagnostic.loc = dependency.loc();
                }
                self.errors
                    .push(diagnostic.with_module(id, identifier.clone()));
            }
            for mut diagnostic in dependency.warnings() {
                diagnostic.kind = DiagnosticKind::ModuleDependencyWarning;
                if diagnostic.loc.is_none() {
                    diagnostic.loc = dependency.loc();
                }
                self.warnings
                    .push(diagnostic.with_module(id, identifier.clone()));
            }
        }
    }

    /// Remove the reasons `origin`'s given dependency set recorded on its
    /// targets, repairing chunk membership where reasons ran out.
    pub(crate) fn remove_reasons_of_block(&mut self, origin: ModuleId, block: &DependencyBlock) {
        for dependency in block.collect_dependencies() {
            let Some(target) = dependency.target().get() else {
                continue;
            };
            if self.module_mut(target).remove_reason(Some(origin), &dependency) {
                for chunk in self.module(target).chunks.to_vec() {
                    self.patch_chunks_after_reason_removal(target, chunk);
                }
            }
        }
    }

    /// A module that lost a reason may no longer belong to a chunk; a module
    /// with no reasons at all takes its own outgoing reasons with it.
    pub(crate) fn patch_chunks_after_reason_removal(&mut self, module: ModuleId, chunk: ChunkId) {
        if !self.module(module).has_reasons() {
            let block = self.module(module).module().block().clone();
            self.remove_reasons_of_block(module, &block);
        }
        if !self.has_reason_for_chunk(module, chunk)
            && self.module_mut(module).remove_chunk(&chunk)
        {
            self.chunk_mut(chunk).remove_module(&module);
            self.remove_chunk_from_dependencies(module, chunk);
        }
    }

    /// A module belongs in a chunk when it is the chunk's entry module or
    /// some reason's origin is itself in the chunk.
    pub(crate) fn has_reason_for_chunk(&self, module: ModuleId, chunk: ChunkId) -> bool {
        if self.chunk(chunk).entry_module == Some(module) {
            return true;
        }
        self.module(module)
            .reasons
            .iter()
            .any(|reason| match reason.origin {
                Some(origin) => self.module(origin).in_chunk(chunk),
                None => false,
            })
    }

    /// Cascade a chunk detachment through a module's dependencies and its
    /// async block edges.
    fn remove_chunk_from_dependencies(&mut self, module: ModuleId, chunk: ChunkId) {
        let (block_chunks, targets) = {
            let block = self.module(module).module().block();
            let block_chunks: Vec<ChunkId> = block
                .flat_blocks()
                .iter()
                .flat_map(|b| b.chunks.clone())
                .collect();
            let mut targets: Vec<ModuleId> = Vec::new();
            for variable in &block.variables {
                for dep in &variable.dependencies {
                    if let Some(target) = dep.target().get() {
                        targets.push(target);
                    }
                }
            }
            for dep in &block.dependencies {
                if let Some(target) = dep.target().get() {
                    targets.push(target);
                }
            }
            (block_chunks, targets)
        };

        for block_chunk in block_chunks {
            self.chunk_mut(chunk).remove_child(&block_chunk);
            self.chunk_mut(block_chunk).remove_parent(&chunk);
        }
        for target in targets {
            if !self.has_reason_for_chunk(target, chunk)
                && self.module_mut(target).remove_chunk(&chunk)
            {
                self.chunk_mut(chunk).remove_module(&target);
                self.remove_chunk_from_dependencies(target, chunk);
            }
        }
    }

    /// Aggregate sorted, deduplicated input paths from all modules and child
    /// compilations.
    pub fn summarize_dependencies(&mut self) {
        self.file_dependencies.clear();
        self.context_dependencies.clear();

        let child_files: Vec<_> = self
            .children
            .iter()
            .flat_map(|child| child.file_dependencies.to_vec())
            .collect();
        let child_contexts: Vec<_> = self
            .children
            .iter()
            .flat_map(|child| child.context_dependencies.to_vec())
            .collect();
        self.file_dependencies.extend(child_files);
        self.context_dependencies.extend(child_contexts);

        for id in self.store.order().to_vec() {
            let files = self.module(id).module().file_dependencies();
            let contexts = self.module(id).module().context_dependencies();
            self.file_dependencies.extend(files);
            self.context_dependencies.extend(contexts);
        }

        self.file_dependencies.sort();
        self.context_dependencies.sort();
    }
}
