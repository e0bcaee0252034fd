//! Rendering seams.
//!
//! Templates are injected collaborators that know how to turn chunks into
//! output. The core drives them in two places: hashing (templates contribute
//! to chunk and compilation hashes) and asset creation (templates produce a
//! render manifest per chunk). Filename templates are expanded by
//! [`render_path`] and may then be rewritten by the `asset_path` plugin
//! waterfall.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::chunk::ChunkId;
use crate::compilation::Compilation;
use crate::diagnostics::Diagnostic;
use crate::hasher::{truncate_digest, ContentHasher};
use crate::source::Source;

/// Values available to filename interpolation.
#[derive(Debug, Clone, Default)]
pub struct PathData {
    pub name: Option<String>,
    pub id: Option<String>,
    /// Compilation hash.
    pub hash: Option<String>,
    pub chunk_hash: Option<String>,
    pub module_hash: Option<String>,
}

/// One file a template wants emitted for a chunk.
pub struct RenderManifestEntry {
    /// Cache identity of this entry, stable across seals.
    pub identifier: String,
    /// Content identity; a cached render is reused only on exact match.
    pub hash: String,
    pub filename_template: String,
    pub path_data: PathData,
    /// Deferred render; only invoked on cache miss.
    pub render: Box<dyn FnOnce() -> Result<Arc<dyn Source>, Diagnostic> + Send>,
}

impl fmt::Debug for RenderManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderManifestEntry")
            .field("identifier", &self.identifier)
            .field("hash", &self.hash)
            .field("filename_template", &self.filename_template)
            .finish_non_exhaustive()
    }
}

/// Template for runtime chunks.
pub trait MainTemplate: Send + Sync + fmt::Debug {
    fn update_hash(&self, hasher: &mut ContentHasher);

    fn update_hash_for_chunk(
        &self,
        compilation: &Compilation,
        chunk: ChunkId,
        hasher: &mut ContentHasher,
    );

    fn render_manifest(
        &self,
        compilation: &Compilation,
        chunk: ChunkId,
    ) -> Result<Vec<RenderManifestEntry>, Diagnostic>;
}

/// Template for non-runtime chunks.
pub trait ChunkTemplate: Send + Sync + fmt::Debug {
    fn update_hash(&self, hasher: &mut ContentHasher);

    fn update_hash_for_chunk(
        &self,
        compilation: &Compilation,
        chunk: ChunkId,
        hasher: &mut ContentHasher,
    );

    fn render_manifest(
        &self,
        compilation: &Compilation,
        chunk: ChunkId,
    ) -> Result<Vec<RenderManifestEntry>, Diagnostic>;
}

/// Per-language module rendering; the core only folds it into hashes.
pub trait ModuleTemplate: Send + Sync + fmt::Debug {
    fn update_hash(&self, hasher: &mut ContentHasher);
}

/// The injected template collaborators. Module templates are keyed by
/// language name; the map is sorted so hashing sees a stable order.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    pub main: Arc<dyn MainTemplate>,
    pub chunk: Arc<dyn ChunkTemplate>,
    pub module_templates: BTreeMap<String, Arc<dyn ModuleTemplate>>,
}

/// Expand `[name]`, `[id]`, `[hash]`, `[chunkhash]` and `[modulehash]`
/// placeholders, each optionally truncated with `:len` (e.g.
/// `[chunkhash:8]`). Unknown placeholders are left as-is; `[name]` falls
/// back to the id when no name is available.
pub fn render_path(template: &str, data: &PathData) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('[') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find(']') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let token = &after[..end];
        let (key, len) = match token.split_once(':') {
            Some((key, len)) => (key, len.parse::<usize>().ok()),
            None => (token, None),
        };
        let value = match key {
            "name" => data.name.as_deref().or(data.id.as_deref()),
            "id" => data.id.as_deref(),
            "hash" => data.hash.as_deref(),
            "chunkhash" => data.chunk_hash.as_deref(),
            "modulehash" => data.module_hash.as_deref(),
            _ => None,
        };
        match value {
            Some(value) => {
                let rendered = match len {
                    Some(len) => truncate_digest(value, len),
                    None => value,
                };
                out.push_str(rendered);
            }
            None => {
                out.push_str(&rest[start..start + end + 2]);
            }
        }
        rest = &rest[start + end + 2..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> PathData {
        PathData {
            name: Some("main".into()),
            id: Some("0".into()),
            hash: Some("aabbccddeeff".into()),
            chunk_hash: Some("1122334455".into()),
            module_hash: None,
        }
    }

    #[test]
    fn expands_name_and_id() {
        assert_eq!(render_path("[name].js", &data()), "main.js");
        assert_eq!(render_path("[id].[name].js", &data()), "0.main.js");
    }

    #[test]
    fn name_falls_back_to_id() {
        let mut d = data();
        d.name = None;
        assert_eq!(render_path("[name].js", &d), "0.js");
    }

    #[test]
    fn hash_truncation() {
        assert_eq!(render_path("[hash:4].js", &data()), "aabb.js");
        assert_eq!(render_path("[chunkhash:2].[hash].js", &data()), "11.aabbccddeeff.js");
    }

    #[test]
    fn unknown_placeholders_survive() {
        assert_eq!(render_path("[query].js", &data()), "[query].js");
        assert_eq!(render_path("[modulehash].js", &data()), "[modulehash].js");
        assert_eq!(render_path("plain.js", &data()), "plain.js");
    }

    #[test]
    fn unterminated_bracket_is_literal() {
        assert_eq!(render_path("[name", &data()), "[name");
    }
}
