//! Recoverable problems accumulated during a compilation.
//!
//! Diagnostics never abort the pipeline by themselves: they are collected on
//! `Compilation::errors` / `Compilation::warnings` and reported at the end.
//! Which list a diagnostic lands in decides its severity; with `bail`
//! enabled the first entry on the error list aborts the surrounding phase.

use std::fmt;

use crate::module::ModuleId;

/// Where in a source file a dependency points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The kinds of recoverable problems the compilation can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// An entry dependency could not be turned into a module.
    EntryModuleNotFound,
    /// A non-entry dependency factory failed.
    ModuleNotFound,
    /// A module build reported an error.
    ModuleBuildError,
    /// A module build reported a warning.
    ModuleBuildWarning,
    /// A dependency reported an error after building finished.
    ModuleDependencyError,
    /// A dependency reported a warning after building finished.
    ModuleDependencyWarning,
    /// An async split names a chunk that is already an initial chunk; the
    /// split is folded into the parent chunk instead of creating a new one.
    AsyncDependencyToInitialChunk,
    /// Rendering a chunk failed; scoped to that chunk.
    ChunkRender,
    /// Two render results want the same filename with different content.
    AssetConflict,
    /// Anything a plugin wants to report.
    Other(String),
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::EntryModuleNotFound => write!(f, "EntryModuleNotFound"),
            DiagnosticKind::ModuleNotFound => write!(f, "ModuleNotFound"),
            DiagnosticKind::ModuleBuildError => write!(f, "ModuleBuildError"),
            DiagnosticKind::ModuleBuildWarning => write!(f, "ModuleBuildWarning"),
            DiagnosticKind::ModuleDependencyError => write!(f, "ModuleDependencyError"),
            DiagnosticKind::ModuleDependencyWarning => write!(f, "ModuleDependencyWarning"),
            DiagnosticKind::AsyncDependencyToInitialChunk => {
                write!(f, "AsyncDependencyToInitialChunk")
            }
            DiagnosticKind::ChunkRender => write!(f, "ChunkRender"),
            DiagnosticKind::AssetConflict => write!(f, "AssetConflict"),
            DiagnosticKind::Other(name) => write!(f, "{name}"),
        }
    }
}

/// One recoverable problem.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// Module the problem is attributed to, when known.
    pub module: Option<ModuleId>,
    /// Identifier of that module, for reporting without graph access.
    pub module_identifier: Option<String>,
    pub loc: Option<SourceLocation>,
    /// Extra context, e.g. the dependency requests a factory failed on.
    pub details: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            module: None,
            module_identifier: None,
            loc: None,
            details: None,
        }
    }

    pub fn with_module(mut self, module: ModuleId, identifier: impl Into<String>) -> Self {
        self.module = Some(module);
        self.module_identifier = Some(identifier.into());
        self
    }

    pub fn with_loc(mut self, loc: Option<SourceLocation>) -> Self {
        self.loc = loc;
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(identifier) = &self.module_identifier {
            write!(f, " (in {identifier}")?;
            if let Some(loc) = &self.loc {
                write!(f, " at {loc}")?;
            }
            write!(f, ")")?;
        } else if let Some(loc) = &self.loc {
            write!(f, " (at {loc})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_module_and_loc() {
        let d = Diagnostic::new(DiagnosticKind::ModuleNotFound, "cannot resolve './missing'")
            .with_module(ModuleId::from_index(3), "src/index.js")
            .with_loc(Some(SourceLocation::new(4, 2)));
        let rendered = d.to_string();
        assert!(rendered.contains("ModuleNotFound"));
        assert!(rendered.contains("src/index.js"));
        assert!(rendered.contains("4:2"));
    }

    #[test]
    fn display_without_attribution() {
        let d = Diagnostic::new(DiagnosticKind::ChunkRender, "render failed");
        assert_eq!(d.to_string(), "ChunkRender: render failed");
    }
}
