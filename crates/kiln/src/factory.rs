//! Module creation.
//!
//! Factories turn a group of equal-resource dependencies into a module. They
//! are registered per concrete dependency type on the compilation and run
//! concurrently under the parallelism gate.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::dependency::Dependency;
use crate::diagnostics::Diagnostic;
use crate::module::Module;
use crate::options::ResolveOptions;

/// Everything a factory gets to look at for one creation.
#[derive(Debug, Clone)]
pub struct FactoryContext {
    /// Identifier of the module whose dependencies triggered this call;
    /// `None` for entries.
    pub issuer: Option<String>,
    /// Name of the owning compiler, when it has one.
    pub compiler: Option<String>,
    /// Directory the request should be resolved against.
    pub context: Option<String>,
    pub resolve_options: Option<ResolveOptions>,
    /// The equal-resource dependency group; never empty.
    pub dependencies: Vec<Arc<dyn Dependency>>,
}

impl FactoryContext {
    /// The request shared by the group.
    pub fn resource(&self) -> Option<&str> {
        self.dependencies.first().and_then(|d| d.resource())
    }
}

/// Creates modules from dependency groups.
#[async_trait]
pub trait ModuleFactory: Send + Sync + fmt::Debug {
    /// Create a module for the given group. `Ok(None)` silently drops the
    /// group; `Err` is recorded as a module-not-found problem (or a warning
    /// when every dependency in the group is optional).
    async fn create(&self, ctx: FactoryContext) -> Result<Option<Box<dyn Module>>, Diagnostic>;
}
