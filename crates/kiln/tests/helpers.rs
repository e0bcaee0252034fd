//! Shared harness for the compilation integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use kiln::fixtures::{plain_templates, ModuleSpec, StubDependency, StubFactory};
use kiln::{ChunkId, Compilation, CompilationParams, ModuleFactory, ModuleId};

pub struct TestBuild {
    pub factory: Arc<StubFactory>,
    pub compilation: Compilation,
}

/// A compilation wired to a [`StubFactory`] with default options.
pub fn compilation() -> TestBuild {
    compilation_with(|_| {})
}

/// Same, with a hook to adjust params before construction.
pub fn compilation_with(configure: impl FnOnce(&mut CompilationParams)) -> TestBuild {
    let mut params = CompilationParams::new(plain_templates());
    configure(&mut params);
    let mut compilation = Compilation::new(params);
    let factory = Arc::new(StubFactory::new());
    compilation.set_dependency_factory::<StubDependency>(factory.clone() as Arc<dyn ModuleFactory>);
    TestBuild {
        factory,
        compilation,
    }
}

impl TestBuild {
    pub fn register(&self, specs: impl IntoIterator<Item = ModuleSpec>) {
        for spec in specs {
            self.factory.register(spec);
        }
    }

    pub async fn entry(&mut self, request: &str, name: &str) -> kiln::Result<()> {
        self.compilation
            .add_entry(None, Arc::new(StubDependency::new(request)), name)
            .await
    }

    /// Finish and seal.
    pub async fn run(&mut self) -> kiln::Result<()> {
        self.compilation.finish();
        self.compilation.seal().await
    }

    pub fn module_id(&self, identifier: &str) -> ModuleId {
        self.compilation
            .get_module(identifier)
            .unwrap_or_else(|| panic!("module {identifier} not in graph"))
    }

    pub fn chunk_named(&self, name: &str) -> ChunkId {
        *self
            .compilation
            .named_chunks
            .get(name)
            .unwrap_or_else(|| panic!("chunk {name} not in graph"))
    }

    /// Identifiers of a chunk's modules, in chunk order.
    pub fn chunk_members(&self, chunk: ChunkId) -> Vec<String> {
        self.compilation
            .chunk(chunk)
            .modules()
            .iter()
            .map(|&m| self.compilation.module(m).identifier().to_string())
            .collect()
    }

    pub fn chunk_has(&self, chunk: ChunkId, identifier: &str) -> bool {
        self.chunk_members(chunk).iter().any(|i| i == identifier)
    }
}
