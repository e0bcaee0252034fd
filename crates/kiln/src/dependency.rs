//! Typed references between modules.
//!
//! Concrete dependency types live outside this crate (import statements,
//! context requests, entry descriptors, ...). The compilation core only needs
//! the contract below: a factory discriminant, a resource identity for
//! grouping, an edge for the chunk builder, and a shared slot that records
//! which module the dependency resolved to.

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::chunk::ChunkId;
use crate::diagnostics::{Diagnostic, SourceLocation};
use crate::module::ModuleId;

/// Shared slot holding the module a dependency resolved to.
///
/// Dependencies are shared (`Arc`) between the module that owns them, the
/// reasons recorded on their target, and in-flight factory calls; the target
/// module is therefore stored behind a lock instead of requiring mutable
/// access to the dependency itself.
#[derive(Debug, Default)]
pub struct ResolvedTarget(Mutex<Option<ModuleId>>);

impl ResolvedTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<ModuleId> {
        *self.0.lock()
    }

    pub fn set(&self, module: Option<ModuleId>) {
        *self.0.lock() = module;
    }
}

/// The edge the chunk builder should follow for a dependency.
///
/// Usually this mirrors the resolved target, but a dependency may point the
/// reference at a different module, mark it weak, or return no reference at
/// all (the dependency is then not materialised in the chunk graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyReference {
    pub module: Option<ModuleId>,
    pub weak: bool,
}

/// A typed reference from one module (or block) to another.
pub trait Dependency: Send + Sync + fmt::Debug {
    /// Discriminant used to look up the module factory. Concrete types
    /// return `TypeId::of::<Self>()`.
    fn factory_id(&self) -> TypeId;

    /// Human-readable name of the dependency type, used in error messages.
    fn type_name(&self) -> &'static str;

    /// Downcast support for factories that inspect concrete dependencies.
    fn as_any(&self) -> &dyn Any;

    /// The resource this dependency requests. Dependencies of the same type
    /// with equal resources share one factory call.
    fn resource(&self) -> Option<&str>;

    /// The slot recording the resolved target module.
    fn target(&self) -> &ResolvedTarget;

    fn optional(&self) -> bool {
        false
    }

    fn weak(&self) -> bool {
        false
    }

    fn loc(&self) -> Option<SourceLocation> {
        None
    }

    /// Edge for the chunk builder. `None` means the dependency carries no
    /// graph edge at all.
    fn reference(&self) -> Option<DependencyReference> {
        Some(DependencyReference {
            module: self.target().get(),
            weak: self.weak(),
        })
    }

    /// Problems this dependency wants reported once building has finished.
    fn errors(&self) -> Vec<Diagnostic> {
        Vec::new()
    }

    fn warnings(&self) -> Vec<Diagnostic> {
        Vec::new()
    }
}

/// Total order used to publish a module's dependencies to later phases.
pub fn compare(a: &dyn Dependency, b: &dyn Dependency) -> Ordering {
    let loc_key = |d: &dyn Dependency| d.loc().unwrap_or(SourceLocation::new(u32::MAX, u32::MAX));
    loc_key(a)
        .cmp(&loc_key(b))
        .then_with(|| a.resource().cmp(&b.resource()))
        .then_with(|| a.type_name().cmp(b.type_name()))
}

/// Two dependencies request the same resource through the same factory.
pub fn is_equal_resource(a: &dyn Dependency, b: &dyn Dependency) -> bool {
    if a.factory_id() != b.factory_id() {
        return false;
    }
    match (a.resource(), b.resource()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// An injected variable with its own dependencies.
#[derive(Debug, Clone, Default)]
pub struct DependencyVariable {
    pub name: String,
    pub dependencies: Vec<Arc<dyn Dependency>>,
}

/// An asynchronous split point nested inside a module.
#[derive(Debug, Clone, Default)]
pub struct AsyncBlock {
    /// Requested name for the chunk fulfilling this split.
    pub chunk_name: Option<String>,
    pub loc: Option<SourceLocation>,
    /// Chunks fulfilling this split; filled during chunk graph construction.
    pub chunks: Vec<ChunkId>,
    pub inner: DependencyBlock,
}

impl AsyncBlock {
    pub fn new(chunk_name: Option<String>, loc: Option<SourceLocation>) -> Self {
        Self {
            chunk_name,
            loc,
            chunks: Vec::new(),
            inner: DependencyBlock::default(),
        }
    }
}

/// The recursive dependency container shared by modules and async blocks.
#[derive(Debug, Clone, Default)]
pub struct DependencyBlock {
    pub dependencies: Vec<Arc<dyn Dependency>>,
    pub variables: Vec<DependencyVariable>,
    pub blocks: Vec<AsyncBlock>,
}

/// Addresses one async block inside a module: `ordinal` indexes the
/// pre-order flattening of the module's nested blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef {
    pub module: ModuleId,
    pub ordinal: u32,
}

impl DependencyBlock {
    /// Visit every dependency reachable from this block, in collection
    /// order: own dependencies, then nested blocks, then variables.
    pub fn for_each_dependency<'a>(&'a self, f: &mut impl FnMut(&'a Arc<dyn Dependency>)) {
        for dep in &self.dependencies {
            f(dep);
        }
        for block in &self.blocks {
            block.inner.for_each_dependency(f);
        }
        for variable in &self.variables {
            for dep in &variable.dependencies {
                f(dep);
            }
        }
    }

    /// All dependencies reachable from this block, in collection order.
    pub fn collect_dependencies(&self) -> Vec<Arc<dyn Dependency>> {
        let mut out = Vec::new();
        self.for_each_dependency(&mut |dep| out.push(dep.clone()));
        out
    }

    /// Pre-order flattening of every nested async block.
    pub fn flat_blocks(&self) -> Vec<&AsyncBlock> {
        fn walk<'a>(block: &'a DependencyBlock, out: &mut Vec<&'a AsyncBlock>) {
            for nested in &block.blocks {
                out.push(nested);
                walk(&nested.inner, out);
            }
        }
        let mut out = Vec::new();
        walk(self, &mut out);
        out
    }

    /// Async block at a pre-order ordinal.
    pub fn async_block(&self, ordinal: u32) -> Option<&AsyncBlock> {
        self.flat_blocks().into_iter().nth(ordinal as usize)
    }

    /// Mutable access to the async block at a pre-order ordinal.
    pub fn async_block_mut(&mut self, ordinal: u32) -> Option<&mut AsyncBlock> {
        fn walk<'a>(
            block: &'a mut DependencyBlock,
            ordinal: u32,
            counter: &mut u32,
        ) -> Option<&'a mut AsyncBlock> {
            for nested in &mut block.blocks {
                if *counter == ordinal {
                    return Some(nested);
                }
                *counter += 1;
                if let Some(found) = walk(&mut nested.inner, ordinal, counter) {
                    return Some(found);
                }
            }
            None
        }
        let mut counter = 0;
        walk(self, ordinal, &mut counter)
    }

    /// Clear every resolved target reachable from this block.
    pub fn clear_resolved(&self) {
        self.for_each_dependency(&mut |dep| dep.target().set(None));
    }

    /// Forget which chunks fulfil the nested async blocks. Chunk ids do not
    /// survive unsealing.
    pub fn clear_block_chunks(&mut self) {
        for nested in &mut self.blocks {
            nested.chunks.clear();
            nested.inner.clear_block_chunks();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::StubDependency;

    fn dep(resource: &str) -> Arc<dyn Dependency> {
        Arc::new(StubDependency::new(resource))
    }

    fn block_with(names: &[&str]) -> DependencyBlock {
        DependencyBlock {
            dependencies: names.iter().map(|n| dep(n)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn collection_order_is_deps_blocks_variables() {
        let mut block = block_with(&["a", "b"]);
        block.blocks.push(AsyncBlock {
            inner: block_with(&["c"]),
            ..AsyncBlock::new(Some("split".into()), None)
        });
        block.variables.push(DependencyVariable {
            name: "v".into(),
            dependencies: vec![dep("d")],
        });

        let order: Vec<_> = block
            .collect_dependencies()
            .iter()
            .map(|d| d.resource().unwrap_or("").to_string())
            .collect();
        assert_eq!(order, ["a", "b", "c", "d"]);
    }

    #[test]
    fn flat_blocks_is_pre_order() {
        let mut inner = AsyncBlock::new(Some("inner".into()), None);
        inner
            .inner
            .blocks
            .push(AsyncBlock::new(Some("innermost".into()), None));
        let mut block = DependencyBlock::default();
        block.blocks.push(inner);
        block.blocks.push(AsyncBlock::new(Some("second".into()), None));

        let names: Vec<_> = block
            .flat_blocks()
            .iter()
            .map(|b| b.chunk_name.clone().unwrap_or_default())
            .collect();
        assert_eq!(names, ["inner", "innermost", "second"]);
        assert_eq!(
            block.async_block(1).and_then(|b| b.chunk_name.clone()),
            Some("innermost".to_string())
        );
        assert!(block.async_block_mut(2).is_some());
        assert!(block.async_block(3).is_none());
    }

    #[test]
    fn resolved_targets_can_be_cleared() {
        let block = block_with(&["a"]);
        block.dependencies[0]
            .target()
            .set(Some(ModuleId::from_index(7)));
        assert!(block.dependencies[0].target().get().is_some());
        block.clear_resolved();
        assert!(block.dependencies[0].target().get().is_none());
    }

    #[test]
    fn equal_resource_requires_same_factory_and_resource() {
        let a = dep("x");
        let b = dep("x");
        let c = dep("y");
        assert!(is_equal_resource(a.as_ref(), b.as_ref()));
        assert!(!is_equal_resource(a.as_ref(), c.as_ref()));
    }

    #[test]
    fn compare_orders_by_location_first() {
        let mut early = StubDependency::new("z");
        early.loc = Some(SourceLocation::new(1, 0));
        let mut late = StubDependency::new("a");
        late.loc = Some(SourceLocation::new(9, 0));
        assert_eq!(compare(&early, &late), Ordering::Less);
    }
}
