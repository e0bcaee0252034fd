//! Topological labelling of the module graph.
//!
//! `assign_index` produces two orderings in one pass (`index` on first
//! entry, `index2` after a module's subtree), driven by an explicit action
//! stack so arbitrarily deep graphs cannot overflow the call stack. Both
//! labellings are idempotent per module, which makes cycles safe: a module
//! that already carries a label is skipped on re-entry.

use super::Compilation;
use crate::dependency::DependencyBlock;
use crate::module::ModuleId;

/// Successors of one block level: resolved dependency targets in source
/// order (variables inlined first), plus nested blocks whose contents are
/// visited after the targets.
struct BlockPlan {
    targets: Vec<ModuleId>,
    blocks: Vec<BlockPlan>,
}

fn block_plan(block: &DependencyBlock) -> BlockPlan {
    let mut targets = Vec::new();
    for variable in &block.variables {
        for dep in &variable.dependencies {
            if let Some(target) = dep.target().get() {
                targets.push(target);
            }
        }
    }
    for dep in &block.dependencies {
        if let Some(target) = dep.target().get() {
            targets.push(target);
        }
    }
    let blocks = block.blocks.iter().map(|b| block_plan(&b.inner)).collect();
    BlockPlan { targets, blocks }
}

enum Action {
    Enter(ModuleId),
    Leave(ModuleId),
    Block(BlockPlan),
}

impl Compilation {
    /// Assign pre-order `index` and post-order `index2` to every module
    /// reachable from `root`. Modules already labelled are skipped.
    pub(crate) fn assign_index(&mut self, root: ModuleId) {
        let mut stack = vec![Action::Enter(root)];
        while let Some(action) = stack.pop() {
            match action {
                Action::Enter(id) => {
                    if self.module(id).index.is_some() {
                        continue;
                    }
                    let index = self.next_free_module_index;
                    self.next_free_module_index += 1;
                    self.module_mut(id).index = Some(index);
                    stack.push(Action::Leave(id));
                    let plan = block_plan(self.module(id).module().block());
                    push_block(&mut stack, plan);
                }
                Action::Leave(id) => {
                    if self.module(id).index2.is_none() {
                        let index2 = self.next_free_module_index2;
                        self.next_free_module_index2 += 1;
                        self.module_mut(id).index2 = Some(index2);
                    }
                }
                Action::Block(plan) => {
                    push_block(&mut stack, plan);
                }
            }
        }
    }

    /// Assign `depth` as the minimum edge count from `root`. Relaxation only
    /// ever lowers a depth, so the pass terminates on cyclic graphs.
    pub(crate) fn assign_depth(&mut self, root: ModuleId) {
        use std::collections::VecDeque;

        self.module_mut(root).depth = Some(0);
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            let depth = self.module(id).depth.unwrap_or(0) + 1;
            let targets = collect_targets(self.module(id).module().block());
            for target in targets {
                let node = self.module_mut(target);
                match node.depth {
                    Some(existing) if existing <= depth => {}
                    _ => {
                        node.depth = Some(depth);
                        queue.push_back(target);
                    }
                }
            }
        }
    }
}

/// Push a block's contents so that popping yields targets left-to-right,
/// then nested blocks left-to-right.
fn push_block(stack: &mut Vec<Action>, plan: BlockPlan) {
    for nested in plan.blocks.into_iter().rev() {
        stack.push(Action::Block(nested));
    }
    for target in plan.targets.into_iter().rev() {
        stack.push(Action::Enter(target));
    }
}

/// Every resolved dependency target in the block tree, in traversal order.
fn collect_targets(block: &DependencyBlock) -> Vec<ModuleId> {
    let mut out = Vec::new();
    fn walk(block: &DependencyBlock, out: &mut Vec<ModuleId>) {
        for variable in &block.variables {
            for dep in &variable.dependencies {
                if let Some(target) = dep.target().get() {
                    out.push(target);
                }
            }
        }
        for dep in &block.dependencies {
            if let Some(target) = dep.target().get() {
                out.push(target);
            }
        }
        for nested in &block.blocks {
            walk(&nested.inner, out);
        }
    }
    walk(block, &mut out);
    out
}
