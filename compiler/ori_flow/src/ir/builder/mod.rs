//! In-memory reference backend implementing [`FlowBuilder`].

use crate::backend::FlowBuilder;

use super::{
    AllocaPoint, BlockId, Callee, FlowBlock, FlowFunction, FlowInstr, FlowTerminator, FnAttrs,
    FuncId, FunctionDecl, LandingPadValues, SlotId, TypeInfoId, ValueId,
};

// BlockBuilder

/// In-progress basic block being constructed.
struct BlockBuilder {
    id: BlockId,
    name: String,
    body: Vec<FlowInstr>,
    terminator: Option<FlowTerminator>,
    erased: bool,
}

impl BlockBuilder {
    fn new(id: BlockId, name: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
            body: Vec::new(),
            terminator: None,
            erased: false,
        }
    }
}

// IrBuilder

/// Builder for an in-progress [`FlowFunction`].
///
/// Follows the same "position at a block, emit instructions, terminate"
/// pattern as LLVM's `IRBuilder`. Unlike LLVM, erasing a block only marks
/// it; IDs are never reused, so stale handles stay distinguishable.
pub struct IrBuilder {
    name: String,
    blocks: Vec<BlockBuilder>,
    current_block: BlockId,
    next_value: u32,
    slots: Vec<String>,
    functions: Vec<FunctionDecl>,
    type_infos: Vec<String>,
}

impl IrBuilder {
    /// Create a builder with an entry block already allocated.
    pub fn new(name: impl Into<String>) -> Self {
        let entry = BlockBuilder::new(BlockId::new(0), "entry");
        Self {
            name: name.into(),
            blocks: vec![entry],
            current_block: BlockId::new(0),
            next_value: 0,
            slots: Vec::new(),
            functions: Vec::new(),
            type_infos: Vec::new(),
        }
    }

    /// Get the entry block (always block 0).
    #[inline]
    pub fn entry_block(&self) -> BlockId {
        BlockId::new(0)
    }

    /// Declare a function that calls and invokes can target.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "function indices never exceed u32"
    )]
    pub fn declare_function(&mut self, name: impl Into<String>, attrs: FnAttrs) -> FuncId {
        let id = FuncId::new(self.functions.len() as u32);
        self.functions.push(FunctionDecl {
            name: name.into(),
            attrs,
        });
        id
    }

    /// Declare a runtime type descriptor for catch clauses.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "type info indices never exceed u32"
    )]
    pub fn declare_type_info(&mut self, name: impl Into<String>) -> TypeInfoId {
        let id = TypeInfoId::new(self.type_infos.len() as u32);
        self.type_infos.push(name.into());
        id
    }

    /// Allocate a value defined outside this builder's instructions
    /// (function parameters, constants materialized by the caller).
    pub fn fresh_value(&mut self) -> ValueId {
        let id = ValueId::new(self.next_value);
        self.next_value += 1;
        id
    }

    /// Check whether the current block already has a terminator.
    #[inline]
    pub fn is_current_terminated(&self) -> bool {
        self.is_terminated(self.current_block)
    }

    fn block(&self, block: BlockId) -> &BlockBuilder {
        debug_assert!(
            block.index() < self.blocks.len(),
            "BlockId {} out of bounds (have {} blocks)",
            block.raw(),
            self.blocks.len(),
        );
        &self.blocks[block.index()]
    }

    fn block_mut(&mut self, block: BlockId) -> &mut BlockBuilder {
        debug_assert!(
            block.index() < self.blocks.len(),
            "BlockId {} out of bounds (have {} blocks)",
            block.raw(),
            self.blocks.len(),
        );
        let bb = &mut self.blocks[block.index()];
        debug_assert!(!bb.erased, "block {} was erased", block.raw());
        bb
    }

    fn push_instr(&mut self, instr: FlowInstr) {
        let block = self.block_mut(self.current_block);
        debug_assert!(
            block.terminator.is_none(),
            "block {} already terminated",
            block.id.raw()
        );
        block.body.push(instr);
    }

    fn terminate(&mut self, terminator: FlowTerminator) {
        let block = self.block_mut(self.current_block);
        debug_assert!(
            block.terminator.is_none(),
            "block {} already terminated",
            block.id.raw()
        );
        block.terminator = Some(terminator);
    }

    fn has_uses(&self, target: BlockId) -> bool {
        self.blocks.iter().any(|bb| {
            !bb.erased
                && bb
                    .terminator
                    .as_ref()
                    .is_some_and(|t| t.successors().contains(&target))
        })
    }

    /// Consume the builder and produce a finished [`FlowFunction`].
    ///
    /// Erased blocks are dropped. Unterminated blocks get `Unreachable`
    /// as a fallback (with a tracing warning); cleanup blocks that no jump
    /// ever crossed end up here.
    pub fn finish(self) -> FlowFunction {
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for bb in self.blocks {
            if bb.erased {
                continue;
            }
            let terminator = bb.terminator.unwrap_or_else(|| {
                tracing::warn!(
                    block = bb.id.raw(),
                    name = %bb.name,
                    "unterminated block in flow IR, adding Unreachable"
                );
                FlowTerminator::Unreachable
            });
            blocks.push(FlowBlock {
                id: bb.id,
                name: bb.name,
                body: bb.body,
                terminator,
            });
        }

        FlowFunction {
            name: self.name,
            entry: BlockId::new(0),
            blocks,
            slots: self.slots,
            functions: self.functions,
            type_infos: self.type_infos,
        }
    }
}

impl FlowBuilder for IrBuilder {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "block indices never exceed u32"
    )]
    fn new_block(&mut self, name: &str) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(BlockBuilder::new(id, name));
        id
    }

    #[inline]
    fn current_block(&self) -> BlockId {
        self.current_block
    }

    fn position_at(&mut self, block: BlockId) {
        debug_assert!(
            !self.block(block).erased,
            "cannot position at erased block {}",
            block.raw()
        );
        self.current_block = block;
    }

    #[inline]
    fn is_terminated(&self, block: BlockId) -> bool {
        self.block(block).terminator.is_some()
    }

    fn replace_block_uses(&mut self, old: BlockId, new: BlockId) {
        for bb in &mut self.blocks {
            if bb.erased {
                continue;
            }
            if let Some(terminator) = &mut bb.terminator {
                terminator.replace_successor(old, new);
            }
        }
    }

    fn erase_block(&mut self, block: BlockId) {
        debug_assert!(
            !self.has_uses(block),
            "erasing block {} that still has predecessors",
            block.raw()
        );
        debug_assert!(
            block != self.current_block,
            "erasing the current insertion block {}",
            block.raw()
        );
        let bb = self.block_mut(block);
        bb.erased = true;
        bb.body.clear();
        bb.terminator = None;
    }

    fn br(&mut self, target: BlockId) {
        self.terminate(FlowTerminator::Jump { target });
    }

    fn cond_br(&mut self, cond: ValueId, then_block: BlockId, else_block: BlockId) {
        self.terminate(FlowTerminator::Branch {
            cond,
            then_block,
            else_block,
        });
    }

    fn switch(&mut self, value: ValueId, default: BlockId) {
        self.terminate(FlowTerminator::Switch {
            value,
            cases: Vec::new(),
            default,
        });
    }

    fn add_switch_case(&mut self, block: BlockId, value: u32, target: BlockId) {
        if let Some(FlowTerminator::Switch { cases, .. }) = &mut self.block_mut(block).terminator {
            cases.push((value, target));
        } else {
            tracing::error!(block = block.raw(), "add_switch_case on a block without a switch");
        }
    }

    fn remove_terminator(&mut self, block: BlockId) {
        self.block_mut(block).terminator = None;
    }

    fn unreachable(&mut self) {
        self.terminate(FlowTerminator::Unreachable);
    }

    fn resume(&mut self, exception: ValueId) {
        self.terminate(FlowTerminator::Resume { exception });
    }

    fn ret(&mut self, value: Option<ValueId>) {
        self.terminate(FlowTerminator::Return { value });
    }

    fn alloca_point(&mut self) -> AllocaPoint {
        let entry = self.entry_block();
        let block = self.block_mut(entry);
        if !block.body.contains(&FlowInstr::AllocaPoint) {
            block.body.insert(0, FlowInstr::AllocaPoint);
        }
        AllocaPoint::new(entry)
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "slot indices never exceed u32"
    )]
    fn entry_alloca(&mut self, at: AllocaPoint, name: &str) -> SlotId {
        let slot = SlotId::new(self.slots.len() as u32);
        self.slots.push(name.to_owned());
        let body = &mut self.block_mut(at.block()).body;
        let pos = body
            .iter()
            .position(|instr| *instr == FlowInstr::AllocaPoint)
            .unwrap_or(0);
        body.insert(pos, FlowInstr::Alloca { slot });
        slot
    }

    fn load(&mut self, slot: SlotId, _name: &str) -> ValueId {
        let dst = self.fresh_value();
        self.push_instr(FlowInstr::Load { dst, slot });
        dst
    }

    fn store(&mut self, value: ValueId, slot: SlotId) {
        self.push_instr(FlowInstr::Store { value, slot });
    }

    fn store_const_before_terminator(&mut self, block: BlockId, value: u32, slot: SlotId) {
        // The terminator is held apart from the body, so appending places
        // the store right before it.
        let bb = self.block_mut(block);
        debug_assert!(
            bb.terminator.is_some(),
            "block {} has no terminator to insert before",
            block.raw()
        );
        bb.body.push(FlowInstr::StoreConst { value, slot });
    }

    fn function_attrs(&self, func: FuncId) -> FnAttrs {
        self.functions
            .get(func.index())
            .map_or(FnAttrs::empty(), |decl| decl.attrs)
    }

    fn call(&mut self, callee: Callee, args: &[ValueId], attrs: FnAttrs, _name: &str) -> ValueId {
        let dst = self.fresh_value();
        self.push_instr(FlowInstr::Call {
            dst,
            callee,
            args: args.to_vec(),
            attrs,
        });
        dst
    }

    fn invoke(
        &mut self,
        callee: Callee,
        args: &[ValueId],
        attrs: FnAttrs,
        normal: BlockId,
        unwind: BlockId,
        _name: &str,
    ) -> ValueId {
        let dst = self.fresh_value();
        self.terminate(FlowTerminator::Invoke {
            dst,
            callee,
            args: args.to_vec(),
            attrs,
            normal,
            unwind,
        });
        dst
    }

    fn landing_pad(&mut self, _name: &str) -> LandingPadValues {
        debug_assert!(
            self.block(self.current_block).body.is_empty(),
            "landing pad must be the first instruction of block {}",
            self.current_block.raw()
        );
        let exception = self.fresh_value();
        let selector = self.fresh_value();
        self.push_instr(FlowInstr::LandingPad {
            exception,
            selector,
            cleanup: false,
            clauses: Vec::new(),
        });
        LandingPadValues {
            exception,
            selector,
        }
    }

    fn add_landing_pad_clause(&mut self, pad: BlockId, type_info: TypeInfoId) {
        if let Some(FlowInstr::LandingPad { clauses, .. }) = self.block_mut(pad).body.first_mut() {
            clauses.push(type_info);
        } else {
            tracing::error!(block = pad.raw(), "clause added to a block without a landing pad");
        }
    }

    fn set_landing_pad_cleanup(&mut self, pad: BlockId) {
        if let Some(FlowInstr::LandingPad { cleanup, .. }) = self.block_mut(pad).body.first_mut() {
            *cleanup = true;
        } else {
            tracing::error!(block = pad.raw(), "cleanup flag set on a block without a landing pad");
        }
    }

    fn eh_typeid_for(&mut self, type_info: TypeInfoId) -> ValueId {
        let dst = self.fresh_value();
        self.push_instr(FlowInstr::TypeIdFor { dst, type_info });
        dst
    }

    fn icmp_eq(&mut self, lhs: ValueId, rhs: ValueId, _name: &str) -> ValueId {
        let dst = self.fresh_value();
        self.push_instr(FlowInstr::CmpEq { dst, lhs, rhs });
        dst
    }
}

// Tests

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
