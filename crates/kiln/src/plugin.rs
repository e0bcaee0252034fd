//! The hook pipeline.
//!
//! Every named phase of the compilation is a default-implemented method on
//! [`CompilationPlugin`]; plugins override the phases they care about and are
//! invoked in registration order through [`PluginDriver`]. Four invocation
//! styles exist:
//!
//! - **sync**: all plugins run, return values ignored;
//! - **bail**: the first `Some(..)` short-circuits and is returned
//!   ([`PluginDriver::bail`]); an empty pipeline yields `None`;
//! - **waterfall**: a value is folded through all plugins
//!   ([`PluginDriver::asset_path`]);
//! - **async series**: plugins run sequentially, the first `Err`
//!   short-circuits; an empty pipeline completes immediately.

use async_trait::async_trait;

use crate::chunk::ChunkId;
use crate::compilation::Compilation;
use crate::hasher::ContentHasher;
use crate::module::ModuleId;
use crate::template::PathData;
use crate::Result;

/// A participant in the compilation pipeline.
///
/// Bail-style optimize hooks return `Some(true)` to request another
/// fixed-point pass; `None` means "nothing to do".
#[allow(unused_variables)]
#[async_trait]
pub trait CompilationPlugin: Send + Sync {
    // Build phase.
    fn build_module(&self, compilation: &mut Compilation, module: ModuleId) {}
    fn succeed_module(&self, compilation: &mut Compilation, module: ModuleId) {}
    fn failed_module(&self, compilation: &mut Compilation, module: ModuleId) {}
    fn finish_modules(&self, compilation: &mut Compilation) {}

    // Seal lifecycle.
    fn seal(&self, compilation: &mut Compilation) {}
    fn unseal(&self, compilation: &mut Compilation) {}
    async fn after_seal(&self, compilation: &mut Compilation) -> Result<()> {
        Ok(())
    }
    fn need_additional_seal(&self, compilation: &mut Compilation) -> Option<bool> {
        None
    }

    // Dependency optimization.
    fn optimize_dependencies_basic(&self, compilation: &mut Compilation) -> Option<bool> {
        None
    }
    fn optimize_dependencies(&self, compilation: &mut Compilation) -> Option<bool> {
        None
    }
    fn optimize_dependencies_advanced(&self, compilation: &mut Compilation) -> Option<bool> {
        None
    }
    fn after_optimize_dependencies(&self, compilation: &mut Compilation) {}

    // Module and chunk optimization.
    fn optimize(&self, compilation: &mut Compilation) {}
    fn optimize_modules_basic(&self, compilation: &mut Compilation) -> Option<bool> {
        None
    }
    fn optimize_modules(&self, compilation: &mut Compilation) -> Option<bool> {
        None
    }
    fn optimize_modules_advanced(&self, compilation: &mut Compilation) -> Option<bool> {
        None
    }
    fn after_optimize_modules(&self, compilation: &mut Compilation) {}
    fn optimize_chunks_basic(&self, compilation: &mut Compilation) -> Option<bool> {
        None
    }
    fn optimize_chunks(&self, compilation: &mut Compilation) -> Option<bool> {
        None
    }
    fn optimize_chunks_advanced(&self, compilation: &mut Compilation) -> Option<bool> {
        None
    }
    fn after_optimize_chunks(&self, compilation: &mut Compilation) {}
    async fn optimize_tree(&self, compilation: &mut Compilation) -> Result<()> {
        Ok(())
    }
    fn after_optimize_tree(&self, compilation: &mut Compilation) {}
    fn optimize_chunk_modules_basic(&self, compilation: &mut Compilation) -> Option<bool> {
        None
    }
    fn optimize_chunk_modules(&self, compilation: &mut Compilation) -> Option<bool> {
        None
    }
    fn optimize_chunk_modules_advanced(&self, compilation: &mut Compilation) -> Option<bool> {
        None
    }
    fn after_optimize_chunk_modules(&self, compilation: &mut Compilation) {}

    // Records.
    fn should_record(&self, compilation: &mut Compilation) -> Option<bool> {
        None
    }
    fn revive_modules(&self, compilation: &mut Compilation) {}
    fn revive_chunks(&self, compilation: &mut Compilation) {}
    fn record_modules(&self, compilation: &mut Compilation) {}
    fn record_chunks(&self, compilation: &mut Compilation) {}
    fn record_hash(&self, compilation: &mut Compilation) {}
    fn record(&self, compilation: &mut Compilation) {}

    // Id assignment.
    fn optimize_module_order(&self, compilation: &mut Compilation) {}
    fn advanced_optimize_module_order(&self, compilation: &mut Compilation) {}
    fn before_module_ids(&self, compilation: &mut Compilation) {}
    fn module_ids(&self, compilation: &mut Compilation) {}
    fn optimize_module_ids(&self, compilation: &mut Compilation) {}
    fn after_optimize_module_ids(&self, compilation: &mut Compilation) {}
    fn optimize_chunk_order(&self, compilation: &mut Compilation) {}
    fn before_chunk_ids(&self, compilation: &mut Compilation) {}
    fn optimize_chunk_ids(&self, compilation: &mut Compilation) {}
    fn after_optimize_chunk_ids(&self, compilation: &mut Compilation) {}

    // Hashing.
    fn before_hash(&self, compilation: &mut Compilation) {}
    fn chunk_hash(&self, compilation: &Compilation, chunk: ChunkId, hasher: &mut ContentHasher) {}
    fn after_hash(&self, compilation: &mut Compilation) {}

    // Assets.
    fn before_module_assets(&self, compilation: &mut Compilation) {}
    fn module_asset(&self, compilation: &mut Compilation, module: ModuleId, filename: &str) {}
    fn should_generate_chunk_assets(&self, compilation: &mut Compilation) -> Option<bool> {
        None
    }
    fn before_chunk_assets(&self, compilation: &mut Compilation) {}
    fn chunk_asset(&self, compilation: &mut Compilation, chunk: ChunkId, filename: &str) {}
    fn additional_chunk_assets(&self, compilation: &mut Compilation) {}
    async fn additional_assets(&self, compilation: &mut Compilation) -> Result<()> {
        Ok(())
    }
    async fn optimize_chunk_assets(&self, compilation: &mut Compilation) -> Result<()> {
        Ok(())
    }
    async fn after_optimize_chunk_assets(&self, compilation: &mut Compilation) -> Result<()> {
        Ok(())
    }
    async fn optimize_assets(&self, compilation: &mut Compilation) -> Result<()> {
        Ok(())
    }
    async fn after_optimize_assets(&self, compilation: &mut Compilation) -> Result<()> {
        Ok(())
    }

    /// Waterfall over expanded asset paths.
    fn asset_path(&self, path: String, data: &PathData) -> String {
        path
    }
}

/// Invokes plugins in registration order.
#[derive(Default)]
pub struct PluginDriver {
    plugins: Vec<Box<dyn CompilationPlugin>>,
}

impl std::fmt::Debug for PluginDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDriver")
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

impl PluginDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, plugin: impl CompilationPlugin + 'static) {
        self.plugins.push(Box::new(plugin));
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Sync style: run every plugin.
    pub fn each(&self, mut f: impl FnMut(&dyn CompilationPlugin)) {
        for plugin in &self.plugins {
            f(plugin.as_ref());
        }
    }

    /// Bail style: the first `Some(..)` wins.
    pub fn bail<R>(&self, mut f: impl FnMut(&dyn CompilationPlugin) -> Option<R>) -> Option<R> {
        for plugin in &self.plugins {
            if let Some(result) = f(plugin.as_ref()) {
                return Some(result);
            }
        }
        None
    }

    /// Waterfall style over asset paths.
    pub fn asset_path(&self, path: String, data: &PathData) -> String {
        self.plugins
            .iter()
            .fold(path, |path, plugin| plugin.asset_path(path, data))
    }

    // Async-series drivers. Plugins run sequentially; the first error
    // short-circuits.

    pub async fn optimize_tree(&self, compilation: &mut Compilation) -> Result<()> {
        for plugin in &self.plugins {
            plugin.optimize_tree(compilation).await?;
        }
        Ok(())
    }

    pub async fn additional_assets(&self, compilation: &mut Compilation) -> Result<()> {
        for plugin in &self.plugins {
            plugin.additional_assets(compilation).await?;
        }
        Ok(())
    }

    pub async fn optimize_chunk_assets(&self, compilation: &mut Compilation) -> Result<()> {
        for plugin in &self.plugins {
            plugin.optimize_chunk_assets(compilation).await?;
        }
        Ok(())
    }

    pub async fn after_optimize_chunk_assets(&self, compilation: &mut Compilation) -> Result<()> {
        for plugin in &self.plugins {
            plugin.after_optimize_chunk_assets(compilation).await?;
        }
        Ok(())
    }

    pub async fn optimize_assets(&self, compilation: &mut Compilation) -> Result<()> {
        for plugin in &self.plugins {
            plugin.optimize_assets(compilation).await?;
        }
        Ok(())
    }

    pub async fn after_optimize_assets(&self, compilation: &mut Compilation) -> Result<()> {
        for plugin in &self.plugins {
            plugin.after_optimize_assets(compilation).await?;
        }
        Ok(())
    }

    pub async fn after_seal(&self, compilation: &mut Compilation) -> Result<()> {
        for plugin in &self.plugins {
            plugin.after_seal(compilation).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::compilation::CompilationParams;
    use crate::fixtures::plain_templates;
    use crate::Error;

    struct Recorder {
        label: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
        bail_value: Option<bool>,
    }

    impl CompilationPlugin for Recorder {
        fn seal(&self, _compilation: &mut Compilation) {
            self.calls.lock().push(format!("{}:seal", self.label));
        }

        fn optimize_modules(&self, _compilation: &mut Compilation) -> Option<bool> {
            self.calls
                .lock()
                .push(format!("{}:optimize_modules", self.label));
            self.bail_value
        }

        fn asset_path(&self, path: String, _data: &PathData) -> String {
            format!("{path}.{}", self.label)
        }
    }

    struct FailingTreeOptimizer;

    #[async_trait::async_trait]
    impl CompilationPlugin for FailingTreeOptimizer {
        async fn optimize_tree(&self, _compilation: &mut Compilation) -> Result<()> {
            Err(Error::plugin("tree optimizer exploded"))
        }
    }

    fn compilation() -> Compilation {
        Compilation::new(CompilationParams::new(plain_templates()))
    }

    fn recorder(
        label: &'static str,
        calls: &Arc<Mutex<Vec<String>>>,
        bail_value: Option<bool>,
    ) -> Recorder {
        Recorder {
            label,
            calls: Arc::clone(calls),
            bail_value,
        }
    }

    #[test]
    fn sync_hooks_run_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut driver = PluginDriver::new();
        driver.add(recorder("a", &calls, None));
        driver.add(recorder("b", &calls, None));
        let mut compilation = compilation();
        driver.each(|p| p.seal(&mut compilation));
        assert_eq!(calls.lock().as_slice(), ["a:seal", "b:seal"]);
    }

    #[test]
    fn bail_returns_first_some_and_skips_the_rest() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut driver = PluginDriver::new();
        driver.add(recorder("a", &calls, Some(false)));
        driver.add(recorder("b", &calls, Some(true)));
        let mut compilation = compilation();
        let result = driver.bail(|p| p.optimize_modules(&mut compilation));
        assert_eq!(result, Some(false));
        assert_eq!(calls.lock().as_slice(), ["a:optimize_modules"]);
    }

    #[test]
    fn empty_bail_yields_none() {
        let driver = PluginDriver::new();
        let mut compilation = compilation();
        assert_eq!(driver.bail(|p| p.optimize_modules(&mut compilation)), None);
    }

    #[test]
    fn waterfall_folds_left_to_right() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut driver = PluginDriver::new();
        driver.add(recorder("a", &calls, None));
        driver.add(recorder("b", &calls, None));
        let path = driver.asset_path("main.js".to_string(), &PathData::default());
        assert_eq!(path, "main.js.a.b");
    }

    #[tokio::test]
    async fn empty_async_series_completes_immediately() {
        let driver = PluginDriver::new();
        let mut compilation = compilation();
        driver.optimize_tree(&mut compilation).await.unwrap();
    }

    #[tokio::test]
    async fn async_series_short_circuits_on_error() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut driver = PluginDriver::new();
        driver.add(FailingTreeOptimizer);
        driver.add(recorder("after", &calls, None));
        let mut compilation = compilation();
        let error = driver.optimize_tree(&mut compilation).await.unwrap_err();
        assert!(error.to_string().contains("tree optimizer exploded"));
    }
}
