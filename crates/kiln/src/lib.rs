//! # kiln
//!
//! Compilation core for a module bundler: starting from entry dependencies,
//! kiln builds a module graph through pluggable factories under a bounded
//! parallelism budget, partitions it into chunks with availability-pruned
//! async splits, assigns deterministic ids and content hashes, and renders
//! chunks into named output assets through injected templates.
//!
//! kiln is a library with no I/O of its own: parsers, resolvers, file
//! systems, concrete dependency types and render templates are all injected
//! collaborators. The crate emits `tracing` events; install a subscriber to
//! see them.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use kiln::fixtures::{plain_templates, StubDependency, StubFactory};
//! use kiln::{Compilation, CompilationParams, Source};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut params = CompilationParams::new(plain_templates());
//! params.name = Some("demo".to_string());
//! let mut compilation = Compilation::new(params);
//!
//! let factory = Arc::new(StubFactory::new());
//! compilation.set_dependency_factory::<StubDependency>(factory);
//!
//! compilation
//!     .add_entry(None, Arc::new(StubDependency::new("./src/index.js")), "main")
//!     .await?;
//! compilation.finish();
//! compilation.seal().await?;
//!
//! for (file, source) in &compilation.assets {
//!     println!("{file}: {} bytes", source.size());
//! }
//! # Ok(()) }
//! ```

mod compilation;
pub mod chunk;
pub mod dependency;
pub mod diagnostics;
pub mod factory;
pub mod fixtures;
pub mod hasher;
pub mod module;
pub mod optimize;
pub mod options;
pub mod plugin;
pub mod source;
pub mod store;
pub mod template;
pub mod util;

pub use chunk::{Chunk, ChunkId, ChunkOrigin, Entrypoint};
pub use compilation::{Compilation, CompilationParams, PreparedChunk};
pub use dependency::{
    AsyncBlock, BlockRef, Dependency, DependencyBlock, DependencyReference, DependencyVariable,
    ResolvedTarget,
};
pub use diagnostics::{Diagnostic, DiagnosticKind, SourceLocation};
pub use factory::{FactoryContext, ModuleFactory};
pub use hasher::{create_hash, ContentHasher, HashDigest, HashFunction};
pub use module::{
    BuildContext, BuildProgress, InputFileSystem, Module, ModuleId, ModuleNode, ModuleProfile,
    Reason, Resolver,
};
pub use optimize::RemoveAvailableModulesPlugin;
pub use options::{CompilationOptions, OutputOptions, PerformanceOptions, ResolveOptions};
pub use plugin::{CompilationPlugin, PluginDriver};
pub use source::{CachedSource, RawSource, Source};
pub use store::{
    AddModuleOutcome, CachedAsset, MemoryCache, ModuleCache, ModuleStore, TimestampMap,
};
pub use template::{
    render_path, ChunkTemplate, MainTemplate, ModuleTemplate, PathData, RenderManifestEntry,
    TemplateSet,
};
pub use util::SortableSet;

/// Fatal failures. Everything recoverable is a [`Diagnostic`] on
/// `Compilation::errors` / `Compilation::warnings` instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No factory registered for a dependency type. Raised before any
    /// asynchronous work starts.
    #[error("no module factory registered for dependencies of type {type_name}")]
    FactoryLookup { type_name: String },

    /// First recorded error, surfaced because `bail` is enabled.
    #[error("{0}")]
    Bail(Diagnostic),

    /// A factory or build task panicked.
    #[error("build task panicked: {0}")]
    BuildPanic(String),

    /// A fixed-point optimize loop never converged.
    #[error("{phase} did not reach a fixed point after {passes} passes")]
    OptimizeLoopStuck { phase: &'static str, passes: usize },

    /// A post-seal constraint check failed.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// A plugin aborted an async series hook.
    #[error("{message}")]
    Plugin { message: String },
}

impl Error {
    /// Convenience constructor for plugins failing an async series hook.
    pub fn plugin(message: impl Into<String>) -> Self {
        Error::Plugin {
            message: message.into(),
        }
    }
}

impl miette::Diagnostic for Error {
    fn code(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        Some(Box::new(match self {
            Error::FactoryLookup { .. } => "FACTORY_LOOKUP",
            Error::Bail(_) => "BAIL",
            Error::BuildPanic(_) => "BUILD_PANIC",
            Error::OptimizeLoopStuck { .. } => "OPTIMIZE_LOOP_STUCK",
            Error::Constraint(_) => "CONSTRAINT",
            Error::Plugin { .. } => "PLUGIN",
        }))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(miette::Severity::Error)
    }

    fn help(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        match self {
            Error::FactoryLookup { type_name } => Some(Box::new(format!(
                "Register a factory with set_dependency_factory::<{type_name}>() before adding entries."
            ))),
            Error::OptimizeLoopStuck { phase, .. } => Some(Box::new(format!(
                "A plugin keeps returning Some(true) from a {phase} hook; make it converge."
            ))),
            _ => None,
        }
    }
}

/// Result type alias for kiln operations.
pub type Result<T> = std::result::Result<T, Error>;
