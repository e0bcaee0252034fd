//! Deterministic content hashing.
//!
//! Three layers of hashes are produced in a fixed order: per-module, then
//! per-chunk with runtime chunks last (their templates fold other chunks'
//! hashes in), then the compilation hash that everything else feeds into.

use std::sync::Arc;

use tracing::debug;

use super::Compilation;
use crate::chunk::ChunkId;
use crate::hasher::{self, ContentHasher};

impl Compilation {
    /// Compute module, chunk and compilation hashes.
    pub(crate) fn create_hash(&mut self) {
        let output = self.options.output.clone();
        let templates = self.templates.clone();
        let plugins = Arc::clone(&self.plugins);

        let mut compilation_hash = hasher::create_hash(output.hash_function);
        if let Some(salt) = &output.hash_salt {
            compilation_hash.update(salt);
        }
        templates.main.update_hash(&mut compilation_hash);
        templates.chunk.update_hash(&mut compilation_hash);
        for template in templates.module_templates.values() {
            template.update_hash(&mut compilation_hash);
        }
        for child in &self.children {
            if let Some(hash) = &child.hash {
                compilation_hash.update(hash);
            }
        }
        for warning in &self.warnings {
            compilation_hash.update(&warning.message);
        }
        for error in &self.errors {
            compilation_hash.update(&error.message);
        }

        for id in self.store.order().to_vec() {
            let mut module_hash = hasher::create_hash(output.hash_function);
            self.module(id).module().update_hash(&mut module_hash);
            let digest = module_hash.digest(output.hash_digest);
            let node = self.module_mut(id);
            node.rendered_hash =
                Some(hasher::truncate_digest(&digest, output.hash_digest_length).to_string());
            node.hash = Some(digest);
        }

        // Runtime chunks last: their hash may fold in the others'.
        let mut chunk_order = self.chunks.clone();
        chunk_order.sort_by_key(|&c| self.chunk(c).has_runtime());
        for chunk in chunk_order {
            let mut chunk_hash = hasher::create_hash(output.hash_function);
            if let Some(salt) = &output.hash_salt {
                chunk_hash.update(salt);
            }
            self.chunk_update_hash(chunk, &mut chunk_hash);
            if self.chunk(chunk).has_runtime() {
                templates
                    .main
                    .update_hash_for_chunk(self, chunk, &mut chunk_hash);
            } else {
                templates
                    .chunk
                    .update_hash_for_chunk(self, chunk, &mut chunk_hash);
            }
            plugins.each(|p| p.chunk_hash(self, chunk, &mut chunk_hash));
            let digest = chunk_hash.digest(output.hash_digest);
            compilation_hash.update(&digest);
            let chunk = self.chunk_mut(chunk);
            chunk.rendered_hash =
                Some(hasher::truncate_digest(&digest, output.hash_digest_length).to_string());
            chunk.hash = Some(digest);
        }

        let full = compilation_hash.digest(output.hash_digest);
        self.hash = Some(hasher::truncate_digest(&full, output.hash_digest_length).to_string());
        self.full_hash = Some(full);
        debug!(hash = ?self.hash, "compilation hash ready");
    }

    /// Fold an additional update into the compilation hash.
    pub fn modify_hash(&mut self, update: &str) {
        let output = &self.options.output;
        let mut hash = hasher::create_hash(output.hash_function);
        if let Some(full) = &self.full_hash {
            hash.update(full);
        }
        hash.update(update);
        let full = hash.digest(output.hash_digest);
        self.hash = Some(hasher::truncate_digest(&full, output.hash_digest_length).to_string());
        self.full_hash = Some(full);
    }

    /// Chunk-intrinsic hash input: id, ids, name and member module hashes.
    fn chunk_update_hash(&self, id: ChunkId, hasher: &mut ContentHasher) {
        let chunk = self.chunk(id);
        if let Some(chunk_id) = chunk.chunk_id {
            hasher.update(format!("{chunk_id} "));
        }
        if let Some(ids) = &chunk.ids {
            let joined = ids
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(",");
            hasher.update(joined);
        }
        hasher.update(format!("{} ", chunk.name.as_deref().unwrap_or("")));
        for &module in chunk.modules.iter() {
            if let Some(hash) = &self.module(module).hash {
                hasher.update(hash);
            }
        }
    }
}
