//! Per-function control-flow generation state.
//!
//! [`FunctionState`] owns the builder and everything the statement emitter
//! needs while generating one function body: the scope stack, case blocks,
//! the alloca point and the lazily created exception-handling and return
//! plumbing.

use crate::backend::FlowBuilder;
use crate::cleanup::{CatchClause, CleanupCursor};
use crate::config::FlowConfig;
use crate::error::FlowError;
use crate::ir::{AllocaPoint, BlockId, Callee, SlotId, ValueId};
use crate::scope_stack::{CallSite, ScopeStack};
use crate::source::{Name, Span, StmtId};
use crate::switch_targets::SwitchCaseTargets;

// EhSlots

/// Exception-handling slots and the resume block, each created at most once
/// per function.
pub struct EhSlots {
    alloca_point: AllocaPoint,
    ptr_slot: Option<SlotId>,
    selector_slot: Option<SlotId>,
    resume_block: Option<BlockId>,
}

impl EhSlots {
    pub fn new(alloca_point: AllocaPoint) -> Self {
        Self {
            alloca_point,
            ptr_slot: None,
            selector_slot: None,
            resume_block: None,
        }
    }

    /// Slot holding the in-flight exception object.
    pub fn ptr_slot<B: FlowBuilder>(&mut self, ir: &mut B) -> SlotId {
        let at = self.alloca_point;
        *self
            .ptr_slot
            .get_or_insert_with(|| ir.entry_alloca(at, "eh.ptr"))
    }

    /// Slot holding the landing pad's type selector.
    pub fn selector_slot<B: FlowBuilder>(&mut self, ir: &mut B) -> SlotId {
        let at = self.alloca_point;
        *self
            .selector_slot
            .get_or_insert_with(|| ir.entry_alloca(at, "eh.selector"))
    }

    /// Block that reloads the exception object and resumes unwinding.
    ///
    /// The insertion point is left where it was.
    pub fn resume_unwind_block<B: FlowBuilder>(&mut self, ir: &mut B) -> BlockId {
        if let Some(block) = self.resume_block {
            return block;
        }
        let ptr_slot = self.ptr_slot(ir);
        let saved = ir.current_block();
        let block = ir.new_block("eh.resume");
        ir.position_at(block);
        let exception = ir.load(ptr_slot, "eh.ptr");
        ir.resume(exception);
        ir.position_at(saved);
        self.resume_block = Some(block);
        block
    }
}

// FunctionState

/// State of the function currently being generated.
///
/// The builder and the scope stack are public fields so an emitter can
/// borrow them side by side; the methods below cover the common paths.
pub struct FunctionState<B: FlowBuilder> {
    pub ir: B,
    pub scopes: ScopeStack,
    pub switch_targets: SwitchCaseTargets,
    /// Marker in the entry block before which all slots are allocated.
    pub alloca_point: AllocaPoint,
    /// Context pointer of an enclosing function, for nested functions.
    pub nested_context: Option<ValueId>,
    eh: EhSlots,
    return_block: Option<BlockId>,
    return_value_slot: Option<SlotId>,
}

impl<B: FlowBuilder> FunctionState<B> {
    /// Start generating a function. Creates the alloca point.
    pub fn new(mut ir: B, config: FlowConfig) -> Self {
        let alloca_point = ir.alloca_point();
        Self {
            ir,
            scopes: ScopeStack::new(config),
            switch_targets: SwitchCaseTargets::new(),
            alloca_point,
            nested_context: None,
            eh: EhSlots::new(alloca_point),
            return_block: None,
            return_value_slot: None,
        }
    }

    // -- Lazy slots and blocks --

    pub fn get_or_create_eh_ptr_slot(&mut self) -> SlotId {
        self.eh.ptr_slot(&mut self.ir)
    }

    pub fn get_or_create_eh_selector_slot(&mut self) -> SlotId {
        self.eh.selector_slot(&mut self.ir)
    }

    /// The `eh.resume` block; see [`EhSlots::resume_unwind_block`].
    pub fn get_or_create_resume_unwind_block(&mut self) -> BlockId {
        self.eh.resume_unwind_block(&mut self.ir)
    }

    /// The shared return block. Its body is emitted by the caller.
    pub fn get_or_create_return_block(&mut self) -> BlockId {
        let ir = &mut self.ir;
        *self
            .return_block
            .get_or_insert_with(|| ir.new_block("return"))
    }

    /// Slot a `return expr` stores into before jumping to the return block.
    pub fn get_or_create_return_value_slot(&mut self) -> SlotId {
        let ir = &mut self.ir;
        let at = self.alloca_point;
        *self
            .return_value_slot
            .get_or_insert_with(|| ir.entry_alloca(at, "retval"))
    }

    /// Leave the function: run every active cleanup, then jump to the return
    /// block.
    pub fn branch_to_return(&mut self) {
        let return_block = self.get_or_create_return_block();
        self.scopes
            .run_cleanups(&mut self.ir, CleanupCursor::ROOT, return_block);
    }

    // -- Cleanups and try/catch --

    pub fn push_cleanup(&mut self, begin_block: BlockId, end_block: BlockId) {
        self.scopes.push_cleanup(begin_block, end_block);
    }

    pub fn push_finally(&mut self, begin_block: BlockId, end_block: BlockId) {
        self.scopes.push_finally(begin_block, end_block);
    }

    pub fn run_cleanups(&mut self, target: CleanupCursor, continue_with: BlockId) {
        self.scopes.run_cleanups(&mut self.ir, target, continue_with);
    }

    pub fn pop_cleanups(&mut self, target: CleanupCursor) {
        self.scopes.pop_cleanups(&mut self.ir, target);
    }

    #[inline]
    pub fn current_cleanup_scope(&self) -> CleanupCursor {
        self.scopes.current_cleanup_scope()
    }

    pub fn push_try_catch(&mut self, stmt: StmtId, catches: Vec<CatchClause>, end_block: BlockId) {
        self.scopes.push_try_catch(stmt, catches, end_block);
    }

    pub fn pop_try_catch(&mut self) {
        self.scopes.pop_try_catch();
    }

    pub fn get_landing_pad(&mut self) -> BlockId {
        self.scopes.get_landing_pad(&mut self.ir, &mut self.eh)
    }

    /// Emit a call or invoke; see [`ScopeStack::call_or_invoke`].
    pub fn call_or_invoke(
        &mut self,
        callee: Callee,
        args: &[ValueId],
        name: &str,
        is_nothrow: bool,
    ) -> CallSite {
        self.scopes
            .call_or_invoke(&mut self.ir, &mut self.eh, callee, args, name, is_nothrow)
    }

    // -- Loops, switches and labels --

    pub fn push_loop_target(&mut self, loop_stmt: StmtId, continue_target: BlockId, break_target: BlockId) {
        self.scopes
            .push_loop_target(loop_stmt, continue_target, break_target);
    }

    pub fn pop_loop_target(&mut self) {
        self.scopes.pop_loop_target();
    }

    pub fn push_break_target(&mut self, stmt: StmtId, target_block: BlockId) {
        self.scopes.push_break_target(stmt, target_block);
    }

    pub fn pop_break_target(&mut self) {
        self.scopes.pop_break_target();
    }

    pub fn continue_with_loop(&mut self, span: Span, loop_stmt: StmtId) -> Result<(), FlowError> {
        self.scopes.continue_with_loop(&mut self.ir, span, loop_stmt)
    }

    pub fn continue_with_closest(&mut self, span: Span) -> Result<(), FlowError> {
        self.scopes.continue_with_closest(&mut self.ir, span)
    }

    pub fn break_to_statement(&mut self, span: Span, stmt: StmtId) -> Result<(), FlowError> {
        self.scopes.break_to_statement(&mut self.ir, span, stmt)
    }

    pub fn break_to_closest(&mut self, span: Span) -> Result<(), FlowError> {
        self.scopes.break_to_closest(&mut self.ir, span)
    }

    pub fn add_label_target(&mut self, label: Name, target_block: BlockId) -> Result<(), FlowError> {
        self.scopes.add_label_target(&mut self.ir, label, target_block)
    }

    pub fn jump_to_label(&mut self, span: Span, label: Name) -> Result<(), FlowError> {
        self.scopes.jump_to_label(&mut self.ir, span, label)
    }

    /// The block of a case statement, created on first request.
    pub fn case_block(&mut self, case_stmt: StmtId) -> BlockId {
        self.switch_targets
            .get_or_create(&mut self.ir, case_stmt, "case")
    }

    /// `goto case`: jump to another case of `switch_stmt`, running the
    /// cleanups entered since the switch.
    pub fn goto_case(
        &mut self,
        span: Span,
        switch_stmt: StmtId,
        case_stmt: StmtId,
    ) -> Result<(), FlowError> {
        let target = self
            .scopes
            .break_target_for(switch_stmt)
            .ok_or(FlowError::UnknownBreakTarget {
                stmt: switch_stmt,
                span,
            })?;
        let case_block = self.case_block(case_stmt);
        self.scopes
            .run_cleanups(&mut self.ir, target.cleanup_scope, case_block);
        Ok(())
    }

    /// Finish the function, handing back the builder.
    ///
    /// Fails with one error per goto whose label was never defined, or was
    /// defined inside a scope the goto does not belong to.
    pub fn finish(self) -> Result<B, Vec<FlowError>> {
        self.scopes.finish()?;
        tracing::debug!(
            has_return_block = self.return_block.is_some(),
            has_resume_block = self.eh.resume_block.is_some(),
            "finished function control flow"
        );
        Ok(self.ir)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
