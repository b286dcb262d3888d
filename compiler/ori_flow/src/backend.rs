//! Backend seam for control-flow lowering.
//!
//! Follows the `BuilderMethods` pattern of the LLVM backend: the lowering
//! core never owns IR objects, it only asks a builder to create blocks,
//! move the insertion point and append instructions. Handles are the
//! `Copy` IDs from [`crate::ir`], so a backend maps them onto its own
//! objects (an arena of `BasicBlock`s, for example).
//!
//! The builder is passed into every emitting operation instead of being
//! stored in the scope stack. There is no back-reference from the scope
//! bookkeeping to the builder.

use crate::ir::{
    AllocaPoint, BlockId, Callee, FnAttrs, FuncId, LandingPadValues, SlotId, TypeInfoId, ValueId,
};

/// Instruction-builder operations consumed by the lowering core.
///
/// All emission happens at the current insertion block unless a method
/// takes an explicit `block`.
pub trait FlowBuilder {
    // -- Blocks --

    /// Create a new, empty block with a diagnostic name.
    fn new_block(&mut self, name: &str) -> BlockId;

    /// The current insertion block.
    fn current_block(&self) -> BlockId;

    /// Move the insertion point to the end of `block`.
    fn position_at(&mut self, block: BlockId);

    /// Whether `block` already has a terminator.
    fn is_terminated(&self, block: BlockId) -> bool;

    /// Redirect every branch edge to `old` so it targets `new`.
    fn replace_block_uses(&mut self, old: BlockId, new: BlockId);

    /// Remove a block that no longer has predecessors.
    fn erase_block(&mut self, block: BlockId);

    // -- Terminators --

    /// Terminate the current block with an unconditional branch.
    fn br(&mut self, target: BlockId);

    /// Terminate the current block with a conditional branch.
    fn cond_br(&mut self, cond: ValueId, then_block: BlockId, else_block: BlockId);

    /// Terminate the current block with a switch that has no cases yet.
    fn switch(&mut self, value: ValueId, default: BlockId);

    /// Append a case to the switch terminating `block`.
    fn add_switch_case(&mut self, block: BlockId, value: u32, target: BlockId);

    /// Drop the terminator of `block` so it can be rewritten.
    fn remove_terminator(&mut self, block: BlockId);

    /// Terminate the current block with `unreachable`.
    fn unreachable(&mut self);

    /// Terminate the current block by resuming unwinding.
    fn resume(&mut self, exception: ValueId);

    /// Terminate the current block with a return.
    fn ret(&mut self, value: Option<ValueId>);

    // -- Stack slots --

    /// The entry-block marker before which slots are allocated, created on
    /// first use.
    fn alloca_point(&mut self) -> AllocaPoint;

    /// Allocate a stack slot at `at`, leaving the insertion point alone.
    fn entry_alloca(&mut self, at: AllocaPoint, name: &str) -> SlotId;

    /// Load from a slot.
    fn load(&mut self, slot: SlotId, name: &str) -> ValueId;

    /// Store a value into a slot.
    fn store(&mut self, value: ValueId, slot: SlotId);

    /// Store a constant into a slot, right before the terminator of `block`.
    fn store_const_before_terminator(&mut self, block: BlockId, value: u32, slot: SlotId);

    // -- Calls --

    /// Attributes of a declared function.
    fn function_attrs(&self, func: FuncId) -> FnAttrs;

    /// Emit a call that cannot unwind into a landing pad.
    fn call(&mut self, callee: Callee, args: &[ValueId], attrs: FnAttrs, name: &str) -> ValueId;

    /// Terminate the current block with an invoke.
    ///
    /// The result is defined at the entry of `normal`.
    fn invoke(
        &mut self,
        callee: Callee,
        args: &[ValueId],
        attrs: FnAttrs,
        normal: BlockId,
        unwind: BlockId,
        name: &str,
    ) -> ValueId;

    // -- Exception handling --

    /// Emit a landing pad as the first instruction of the current block.
    fn landing_pad(&mut self, name: &str) -> LandingPadValues;

    /// Register a catch clause on the landing pad heading `pad`.
    fn add_landing_pad_clause(&mut self, pad: BlockId, type_info: TypeInfoId);

    /// Mark the landing pad heading `pad` as running cleanups.
    fn set_landing_pad_cleanup(&mut self, pad: BlockId);

    /// The selector value the unwinder uses for `type_info`.
    fn eh_typeid_for(&mut self, type_info: TypeInfoId) -> ValueId;

    /// Integer equality comparison.
    fn icmp_eq(&mut self, lhs: ValueId, rhs: ValueId, name: &str) -> ValueId;
}
