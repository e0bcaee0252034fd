//! The seal state machine.
//!
//! Sealing turns the built module graph into output: entry chunks and
//! entrypoints come first, then chunk partitioning, the optimization hook
//! phases (bail hooks looping to a fixed point), id assignment, hashing and
//! asset rendering, and finally the async asset-optimization series. A
//! plugin may request another full pass through `need_additional_seal`,
//! which unseals and re-enters.

use std::sync::Arc;

use rustc_hash::FxHashMap as HashMap;
use tracing::debug;

use super::Compilation;
use crate::chunk::{ChunkId, Entrypoint};
use crate::module::ModuleId;
use crate::plugin::{CompilationPlugin, PluginDriver};
use crate::{Error, Result};

/// Defensive cap for the fixed-point optimize loops; a plugin set that keeps
/// returning "restart" past this is reported instead of spinning forever.
const MAX_OPTIMIZE_PASSES: usize = 10_000;

type BailHook = fn(&dyn CompilationPlugin, &mut Compilation) -> Option<bool>;

impl Compilation {
    /// Seal the compilation. With `bail` enabled, a pre-existing error fails
    /// the seal before any phase runs and leaves assets untouched. Runs
    /// again from a clean slate while a plugin keeps requesting an
    /// additional seal.
    pub async fn seal(&mut self) -> Result<()> {
        loop {
            if self.options.bail {
                if let Some(first) = self.errors.first() {
                    return Err(Error::Bail(first.clone()));
                }
            }
            self.seal_pass().await?;
            let plugins = Arc::clone(&self.plugins);
            if plugins.bail(|p| p.need_additional_seal(self)) == Some(true) {
                debug!("plugin requested an additional seal");
                self.unseal();
                continue;
            }
            plugins.after_seal(self).await?;
            debug!(
                chunks = self.chunks.len(),
                assets = self.assets.len(),
                hash = ?self.hash,
                "sealed"
            );
            return Ok(());
        }
    }

    /// One full pass of the seal phases, up to (excluding) the
    /// additional-seal decision.
    async fn seal_pass(&mut self) -> Result<()> {
        debug!(modules = self.modules().len(), "sealing");
        let plugins = Arc::clone(&self.plugins);
        plugins.each(|p| p.seal(self));

        self.optimize_loop(
            "optimize-dependencies",
            &plugins,
            [
                |p, c| p.optimize_dependencies_basic(c),
                |p, c| p.optimize_dependencies(c),
                |p, c| p.optimize_dependencies_advanced(c),
            ],
        )?;
        plugins.each(|p| p.after_optimize_dependencies(self));

        // Entry chunks, entrypoints, graph labelling.
        self.next_free_module_index = 0;
        self.next_free_module_index2 = 0;
        for prepared in self.prepared_chunks.clone() {
            let Some(module) = prepared.module else {
                continue;
            };
            let chunk = self.install_entry_chunk(&prepared.name, module);
            self.assign_index(module);
            self.assign_depth(module);
            debug!(entry = %prepared.name, chunk = %chunk, "entry chunk ready");
        }
        let inputs = self.chunks.clone();
        self.process_dependencies_blocks_for_chunks(inputs);
        self.store.sort_order_by_index();

        plugins.each(|p| p.optimize(self));
        self.optimize_loop(
            "optimize-modules",
            &plugins,
            [
                |p, c| p.optimize_modules_basic(c),
                |p, c| p.optimize_modules(c),
                |p, c| p.optimize_modules_advanced(c),
            ],
        )?;
        plugins.each(|p| p.after_optimize_modules(self));
        self.optimize_loop(
            "optimize-chunks",
            &plugins,
            [
                |p, c| p.optimize_chunks_basic(c),
                |p, c| p.optimize_chunks(c),
                |p, c| p.optimize_chunks_advanced(c),
            ],
        )?;
        plugins.each(|p| p.after_optimize_chunks(self));

        plugins.optimize_tree(self).await?;
        plugins.each(|p| p.after_optimize_tree(self));
        self.optimize_loop(
            "optimize-chunk-modules",
            &plugins,
            [
                |p, c| p.optimize_chunk_modules_basic(c),
                |p, c| p.optimize_chunk_modules(c),
                |p, c| p.optimize_chunk_modules_advanced(c),
            ],
        )?;
        plugins.each(|p| p.after_optimize_chunk_modules(self));

        let should_record = plugins.bail(|p| p.should_record(self)) != Some(false);

        plugins.each(|p| p.revive_modules(self));
        plugins.each(|p| p.optimize_module_order(self));
        plugins.each(|p| p.advanced_optimize_module_order(self));
        plugins.each(|p| p.before_module_ids(self));
        plugins.each(|p| p.module_ids(self));
        self.apply_module_ids();
        plugins.each(|p| p.optimize_module_ids(self));
        plugins.each(|p| p.after_optimize_module_ids(self));
        self.sort_items_with_module_ids();

        plugins.each(|p| p.revive_chunks(self));
        plugins.each(|p| p.optimize_chunk_order(self));
        plugins.each(|p| p.before_chunk_ids(self));
        self.apply_chunk_ids();
        plugins.each(|p| p.optimize_chunk_ids(self));
        plugins.each(|p| p.after_optimize_chunk_ids(self));
        self.sort_items_with_chunk_ids();

        if should_record {
            plugins.each(|p| p.record_modules(self));
            plugins.each(|p| p.record_chunks(self));
        }

        plugins.each(|p| p.before_hash(self));
        self.create_hash();
        plugins.each(|p| p.after_hash(self));
        if should_record {
            plugins.each(|p| p.record_hash(self));
        }

        plugins.each(|p| p.before_module_assets(self));
        self.create_module_assets();
        if plugins.bail(|p| p.should_generate_chunk_assets(self)) != Some(false) {
            plugins.each(|p| p.before_chunk_assets(self));
            self.create_chunk_assets();
        }
        plugins.each(|p| p.additional_chunk_assets(self));
        self.summarize_dependencies();
        if should_record {
            plugins.each(|p| p.record(self));
        }

        plugins.additional_assets(self).await?;
        plugins.optimize_chunk_assets(self).await?;
        plugins.after_optimize_chunk_assets(self).await?;
        plugins.optimize_assets(self).await?;
        plugins.after_optimize_assets(self).await?;
        Ok(())
    }

    /// Get-or-create the chunk for a named entry, wire up its entrypoint and
    /// attach the entry module.
    fn install_entry_chunk(&mut self, name: &str, module: ModuleId) -> ChunkId {
        let chunk = self.add_chunk(Some(name), Some(module), None);
        {
            let chunk = self.chunk_mut(chunk);
            chunk.is_initial = true;
            chunk.has_runtime = true;
            chunk.entry_module = Some(module);
        }
        let mut entrypoint = Entrypoint::new(name);
        entrypoint.unshift_chunk(chunk);
        if let Some(slot) = self.entrypoints.iter_mut().find(|(n, _)| n == name) {
            slot.1 = entrypoint;
        } else {
            self.entrypoints.push((name.to_string(), entrypoint));
        }
        self.chunk_mut(chunk).add_module(module);
        self.module_mut(module).add_chunk(chunk);
        chunk
    }

    /// Run the basic/main/advanced bail hooks of one optimize phase until a
    /// whole round reports nothing to do.
    fn optimize_loop(
        &mut self,
        phase: &'static str,
        plugins: &Arc<PluginDriver>,
        hooks: [BailHook; 3],
    ) -> Result<()> {
        let mut passes = 0;
        loop {
            let mut again = false;
            for hook in hooks {
                if plugins.bail(|p| hook(p, self)).unwrap_or(false) {
                    again = true;
                    break;
                }
            }
            if !again {
                return Ok(());
            }
            passes += 1;
            if passes >= MAX_OPTIMIZE_PASSES {
                return Err(Error::OptimizeLoopStuck { phase, passes });
            }
        }
    }

    /// Order-sensitive bookkeeping once module ids exist: publication order
    /// and per-module reasons follow the ids.
    fn sort_items_with_module_ids(&mut self) {
        self.store.sort_order_by_module_id();
        let ids: HashMap<ModuleId, u32> = self
            .store
            .order()
            .iter()
            .filter_map(|&id| self.module(id).module_id.map(|mid| (id, mid)))
            .collect();
        for id in self.store.order().to_vec() {
            let node = self.module_mut(id);
            node.reasons.sort_by_key(|reason| {
                reason
                    .origin
                    .and_then(|origin| ids.get(&origin).copied())
                    .map_or(u32::MAX, |v| v)
            });
        }
    }

    /// Order-sensitive bookkeeping once chunk ids exist: the chunk list,
    /// per-chunk member lists, per-module chunk lists, entrypoint chunk
    /// lists, and finally the diagnostic lists get their published order.
    fn sort_items_with_chunk_ids(&mut self) {
        let chunk_ids: HashMap<ChunkId, u32> = self
            .chunks
            .iter()
            .filter_map(|&c| self.chunk(c).chunk_id.map(|cid| (c, cid)))
            .collect();
        let module_ids: HashMap<ModuleId, u32> = self
            .store
            .order()
            .iter()
            .filter_map(|&id| self.module(id).module_id.map(|mid| (id, mid)))
            .collect();
        let chunk_key = move |c: &ChunkId| chunk_ids.get(c).copied().unwrap_or(u32::MAX);
        let module_key = move |m: &ModuleId| module_ids.get(m).copied().unwrap_or(u32::MAX);

        let mut chunks = std::mem::take(&mut self.chunks);
        chunks.sort_by_key(&chunk_key);
        self.chunks = chunks;

        for id in self.store.order().to_vec() {
            self.module_mut(id)
                .chunks
                .sort_by(|a, b| chunk_key(a).cmp(&chunk_key(b)));
        }
        for chunk in self.chunks.clone() {
            let chunk = self.chunk_mut(chunk);
            chunk
                .modules
                .sort_by(|a, b| module_key(a).cmp(&module_key(b)));
            chunk
                .parents
                .sort_by(|a, b| chunk_key(a).cmp(&chunk_key(b)));
            chunk
                .children
                .sort_by(|a, b| chunk_key(a).cmp(&chunk_key(b)));
        }
        for (_, entrypoint) in self.entrypoints.iter_mut() {
            entrypoint
                .chunks
                .sort_by(|a, b| chunk_key(a).cmp(&chunk_key(b)));
        }

        self.errors.sort_by(|a, b| a.message.cmp(&b.message));
        self.warnings.sort_by(|a, b| a.message.cmp(&b.message));
    }
}
