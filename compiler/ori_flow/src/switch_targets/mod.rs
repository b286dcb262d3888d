//! Lazily created blocks for `case` statements.
//!
//! A `goto case` may be emitted before the case it names, so whichever of
//! the two comes first creates the block.

use rustc_hash::FxHashMap;

use crate::backend::FlowBuilder;
use crate::ir::BlockId;
use crate::source::StmtId;

/// Maps case statements to their basic blocks, within one function.
#[derive(Default)]
pub struct SwitchCaseTargets {
    target_blocks: FxHashMap<StmtId, BlockId>,
}

impl SwitchCaseTargets {
    pub fn new() -> Self {
        Self::default()
    }

    /// The block of a case statement that must already have one.
    ///
    /// # Panics
    ///
    /// Panics if no block was created for `stmt`.
    pub fn get(&self, stmt: StmtId) -> BlockId {
        match self.target_blocks.get(&stmt) {
            Some(&block) => block,
            None => panic!("no block created for case statement {stmt:?}"),
        }
    }

    /// The block of a case statement, creating it (named `name`) on first
    /// request.
    pub fn get_or_create<B: FlowBuilder>(&mut self, ir: &mut B, stmt: StmtId, name: &str) -> BlockId {
        *self.target_blocks.entry(stmt).or_insert_with(|| {
            let block = ir.new_block(name);
            tracing::trace!(stmt = stmt.raw(), block = block.raw(), "created case block");
            block
        })
    }

    /// Number of case blocks created so far.
    pub fn len(&self) -> usize {
        self.target_blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target_blocks.is_empty()
    }
}
