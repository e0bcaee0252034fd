//! Compilation configuration.
//!
//! Embedders usually deserialize these from their own config surface; every
//! field has a default so partial configs work.

use serde::{Deserialize, Serialize};

use crate::hasher::{HashDigest, HashFunction};

/// Default permit count for concurrent factory and build work.
pub const DEFAULT_PARALLELISM: usize = 100;

/// Top-level knobs consulted by the compilation core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompilationOptions {
    /// Upper bound on concurrent factory calls plus module builds.
    pub parallelism: usize,
    /// Abort on the first error instead of accumulating diagnostics.
    pub bail: bool,
    /// Record per-module factory/build timings.
    pub profile: bool,
    /// Size budget hints. The core carries these for size-limit plugins and
    /// does not interpret them itself.
    pub performance: PerformanceOptions,
    pub output: OutputOptions,
}

impl Default for CompilationOptions {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            bail: false,
            profile: false,
            performance: PerformanceOptions::default(),
            output: OutputOptions::default(),
        }
    }
}

/// Budget hints consumed by size-limit plugins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PerformanceOptions {
    pub hints: bool,
    pub max_asset_size: Option<u64>,
    pub max_entrypoint_size: Option<u64>,
}

/// Hints forwarded to the host resolver through factories and builds. The
/// core never interprets these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolveOptions {
    pub extensions: Vec<String>,
    pub main_fields: Vec<String>,
    pub condition_names: Vec<String>,
}

/// Output naming and hashing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutputOptions {
    /// Filename template for entry chunks, e.g. `[name].js`.
    pub filename: String,
    /// Filename template for non-entry chunks, e.g. `[id].js`.
    pub chunk_filename: String,
    pub hash_function: HashFunction,
    pub hash_digest: HashDigest,
    /// Prefix length used for `rendered_hash` values.
    pub hash_digest_length: usize,
    /// Optional salt folded into every hash.
    pub hash_salt: Option<String>,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            filename: "[name].js".to_string(),
            chunk_filename: "[id].js".to_string(),
            hash_function: HashFunction::default(),
            hash_digest: HashDigest::default(),
            hash_digest_length: 20,
            hash_salt: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let options = CompilationOptions::default();
        assert_eq!(options.parallelism, DEFAULT_PARALLELISM);
        assert!(!options.bail);
        assert_eq!(options.output.filename, "[name].js");
        assert_eq!(options.output.hash_digest_length, 20);
    }

    #[test]
    fn chunk_filename_default_uses_id() {
        assert_eq!(OutputOptions::default().chunk_filename, "[id].js");
    }
}
