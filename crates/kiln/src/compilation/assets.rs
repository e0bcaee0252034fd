//! Asset production.
//!
//! Module assets are installed directly; chunk assets go through the
//! template render manifest, with an optional cache short-circuiting
//! unchanged renders. Failures are scoped: one broken chunk records one
//! diagnostic and the remaining chunks still render.

use std::sync::Arc;

use tracing::debug;

use super::Compilation;
use crate::chunk::ChunkId;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::source::{same_content, CachedSource};
use crate::store::CachedAsset;
use crate::template::{render_path, PathData};

impl Compilation {
    /// Install assets emitted by module builds, firing `module_asset` per
    /// file.
    pub(crate) fn create_module_assets(&mut self) {
        let plugins = Arc::clone(&self.plugins);
        for id in self.store.order().to_vec() {
            for (name, source) in self.module(id).module().assets() {
                let data = PathData {
                    name: Some(name.clone()),
                    hash: self.hash.clone(),
                    ..PathData::default()
                };
                let file = plugins.asset_path(render_path(&name, &data), &data);
                debug!(module = %self.module(id).identifier(), file = %file, "module asset");
                self.assets.insert(file.clone(), source);
                plugins.each(|p| p.module_asset(self, id, &file));
            }
        }
    }

    /// Render every chunk through its template's manifest, firing
    /// `chunk_asset` per emitted file.
    pub(crate) fn create_chunk_assets(&mut self) {
        for chunk in self.chunks.clone() {
            if let Err(diagnostic) = self.render_chunk(chunk) {
                self.errors.push(diagnostic);
            }
        }
    }

    fn render_chunk(&mut self, chunk: ChunkId) -> Result<(), Diagnostic> {
        let templates = self.templates.clone();
        let plugins = Arc::clone(&self.plugins);
        let manifest = if self.chunk(chunk).has_runtime() {
            templates.main.render_manifest(self, chunk)
        } else {
            templates.chunk.render_manifest(self, chunk)
        }
        .map_err(|diagnostic| self.chunk_render_failure(chunk, diagnostic))?;

        for entry in manifest {
            let cached = self
                .cache
                .as_ref()
                .and_then(|cache| cache.get_asset(&entry.identifier));
            let source = match cached {
                Some(cached) if cached.hash == entry.hash => cached.source,
                _ => {
                    let rendered = (entry.render)()
                        .map_err(|diagnostic| self.chunk_render_failure(chunk, diagnostic))?;
                    let wrapped = CachedSource::wrap(rendered);
                    if let Some(cache) = &self.cache {
                        cache.put_asset(
                            &entry.identifier,
                            CachedAsset {
                                hash: entry.hash.clone(),
                                source: Arc::clone(&wrapped),
                            },
                        );
                    }
                    wrapped
                }
            };

            let file = plugins.asset_path(
                render_path(&entry.filename_template, &entry.path_data),
                &entry.path_data,
            );
            if let Some(existing) = self.assets.get(&file) {
                if !same_content(existing.as_ref(), source.as_ref()) {
                    return Err(Diagnostic::new(
                        DiagnosticKind::AssetConflict,
                        format!("two chunks emit different content to the same filename {file}"),
                    ));
                }
            } else {
                self.assets.insert(file.clone(), source);
            }
            if !self.chunk(chunk).files.contains(&file) {
                self.chunk_mut(chunk).files.push(file.clone());
            }
            debug!(chunk = %chunk, file = %file, "chunk asset");
            plugins.each(|p| p.chunk_asset(self, chunk, &file));
        }
        Ok(())
    }

    fn chunk_render_failure(&self, chunk: ChunkId, diagnostic: Diagnostic) -> Diagnostic {
        let label = self
            .chunk(chunk)
            .name
            .clone()
            .unwrap_or_else(|| chunk.to_string());
        Diagnostic {
            kind: DiagnosticKind::ChunkRender,
            message: format!("chunk {label} failed to render: {}", diagnostic.message),
            ..diagnostic
        }
    }
}
