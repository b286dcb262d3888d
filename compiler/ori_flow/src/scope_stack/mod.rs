//! Jump targets and structured control flow over cleanup scopes.
//!
//! [`ScopeStack`] layers `break`/`continue`/`goto` handling on top of
//! [`TryCatchFinallyScopes`]. Every jump leaving a cleanup scope is routed
//! through the cleanups between the jump and its target.
//!
//! # Forward gotos
//!
//! A goto to a label not yet seen branches to a fresh *tentative* block and
//! is parked in the pending list of the current cleanup depth. Two things
//! can happen next:
//!
//! - The label is defined at the same depth: every use of the tentative
//!   block is redirected to the label block and the tentative block is
//!   erased.
//! - The depth's cleanup scope is popped first: the goto's edge now leads
//!   into that cleanup (whose continuation is the tentative block), and the
//!   goto moves to the parent depth's list to wait for its label there.
//!
//! Pending gotos left over when the function is finished are errors.

use rustc_hash::FxHashMap;

use crate::backend::FlowBuilder;
use crate::cleanup::{CatchClause, CleanupCursor, ScopeTag, TryCatchFinallyScopes};
use crate::config::FlowConfig;
use crate::error::{FlowError, ScopeKind};
use crate::func_state::EhSlots;
use crate::ir::{BlockId, Callee, FnAttrs, ValueId};
use crate::source::{Name, Span, StmtId};

/// A resolved destination for `break`, `continue` or `goto`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JumpTarget {
    pub target_block: BlockId,
    /// Cleanup depth the target lives at.
    pub cleanup_scope: CleanupCursor,
    /// Loop or switch statement the target belongs to (`None` for labels).
    pub target_statement: Option<StmtId>,
    /// Innermost cleanup scope active where the target was registered.
    pub owner: Option<ScopeTag>,
}

/// A forward goto whose label has not been defined at its depth yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GotoJump {
    pub source_span: Span,
    /// Block terminated by the goto.
    pub source_block: BlockId,
    /// Placeholder successor until the label is known.
    pub tentative_target: BlockId,
    pub target_label: Name,
}

/// What [`ScopeStack::call_or_invoke`] emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallSite {
    /// Plain call; the insertion point is unchanged.
    Call { result: ValueId },
    /// Invoke; the insertion point moved to `normal`.
    Invoke {
        result: ValueId,
        normal: BlockId,
        unwind: BlockId,
    },
}

impl CallSite {
    /// The call's return value.
    pub fn result(self) -> ValueId {
        match self {
            CallSite::Call { result } | CallSite::Invoke { result, .. } => result,
        }
    }

    #[inline]
    pub fn is_invoke(self) -> bool {
        matches!(self, CallSite::Invoke { .. })
    }
}

/// Control-flow scopes of the function being generated.
pub struct ScopeStack {
    config: FlowConfig,
    scopes: TryCatchFinallyScopes,
    label_targets: FxHashMap<Name, JumpTarget>,
    break_targets: Vec<JumpTarget>,
    continue_targets: Vec<JumpTarget>,
    /// Pending forward gotos, one list per cleanup depth (index = depth).
    unresolved_gotos: Vec<Vec<GotoJump>>,
}

impl ScopeStack {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            scopes: TryCatchFinallyScopes::new(),
            label_targets: FxHashMap::default(),
            break_targets: Vec::new(),
            continue_targets: Vec::new(),
            unresolved_gotos: vec![Vec::new()],
        }
    }

    #[inline]
    pub fn config(&self) -> FlowConfig {
        self.config
    }

    /// The underlying cleanup and try/catch stack.
    #[inline]
    pub fn cleanup_scopes(&self) -> &TryCatchFinallyScopes {
        &self.scopes
    }

    #[inline]
    pub fn current_cleanup_scope(&self) -> CleanupCursor {
        self.scopes.current_cleanup_scope()
    }

    // -- Cleanups --

    /// Register a destructor-style cleanup; see
    /// [`TryCatchFinallyScopes::push_cleanup`].
    pub fn push_cleanup(&mut self, begin_block: BlockId, end_block: BlockId) {
        self.scopes.push_cleanup(begin_block, end_block);
        self.unresolved_gotos.push(Vec::new());
    }

    /// Register a `finally` clause.
    pub fn push_finally(&mut self, begin_block: BlockId, end_block: BlockId) {
        self.scopes.push_finally(begin_block, end_block);
        self.unresolved_gotos.push(Vec::new());
    }

    /// Terminate the current block, running cleanups down to `target`.
    pub fn run_cleanups<B: FlowBuilder>(
        &mut self,
        ir: &mut B,
        target: CleanupCursor,
        continue_with: BlockId,
    ) {
        self.scopes.run_cleanups(ir, target, continue_with);
    }

    /// Pop every cleanup scope above `target`.
    ///
    /// Pending gotos of a popped depth are routed through its cleanup and
    /// handed to the parent depth, where their label may still appear.
    ///
    /// # Panics
    ///
    /// Panics if `target` is deeper than the current depth.
    pub fn pop_cleanups<B: FlowBuilder>(&mut self, ir: &mut B, target: CleanupCursor) {
        let current = self.current_cleanup_scope();
        assert!(
            target <= current,
            "cleanup cursor {} is not an ancestor of depth {}",
            target.depth(),
            current.depth()
        );

        while self.current_cleanup_scope() > target {
            let index = self.current_cleanup_scope().depth() - 1;
            let gotos = self.unresolved_gotos.pop().unwrap_or_default();
            let begin = self.scopes.begin_block(index);
            for goto in &gotos {
                ir.replace_block_uses(goto.tentative_target, begin);
                self.scopes
                    .execute_cleanup(ir, index, goto.source_block, goto.tentative_target);
            }
            if !gotos.is_empty() {
                tracing::debug!(
                    count = gotos.len(),
                    depth = index + 1,
                    "forward gotos left a cleanup scope unresolved"
                );
            }
            self.scopes.pop_cleanup();
            if let Some(parent) = self.unresolved_gotos.last_mut() {
                parent.extend(gotos);
            }
        }
    }

    // -- Try/catch --

    pub fn push_try_catch(&mut self, stmt: StmtId, catches: Vec<CatchClause>, end_block: BlockId) {
        self.scopes.push_try_catch(stmt, catches, end_block);
    }

    pub fn pop_try_catch(&mut self) {
        self.scopes.pop_try_catch();
    }

    #[inline]
    pub fn is_catching_non_exceptions(&self) -> bool {
        self.scopes.is_catching_non_exceptions()
    }

    /// The landing pad for the current position, built on first request.
    pub fn get_landing_pad<B: FlowBuilder>(&mut self, ir: &mut B, eh: &mut EhSlots) -> BlockId {
        self.scopes.get_landing_pad(ir, eh)
    }

    // -- Loops and switches --

    /// Register the `continue` and `break` destinations of a loop.
    pub fn push_loop_target(
        &mut self,
        loop_stmt: StmtId,
        continue_target: BlockId,
        break_target: BlockId,
    ) {
        let continue_target = self.jump_target(continue_target, Some(loop_stmt));
        let break_target = self.jump_target(break_target, Some(loop_stmt));
        self.continue_targets.push(continue_target);
        self.break_targets.push(break_target);
    }

    /// # Panics
    ///
    /// Panics if no loop target is registered.
    pub fn pop_loop_target(&mut self) {
        assert!(
            self.continue_targets.pop().is_some() && self.break_targets.pop().is_some(),
            "pop_loop_target with no active loop"
        );
    }

    /// Register the `break` destination of a switch (or a labeled block).
    pub fn push_break_target(&mut self, stmt: StmtId, target_block: BlockId) {
        let target = self.jump_target(target_block, Some(stmt));
        self.break_targets.push(target);
    }

    /// # Panics
    ///
    /// Panics if no break target is registered.
    pub fn pop_break_target(&mut self) {
        assert!(
            self.break_targets.pop().is_some(),
            "pop_break_target with no active break target"
        );
    }

    /// The innermost break target registered for `stmt`.
    pub fn break_target_for(&self, stmt: StmtId) -> Option<JumpTarget> {
        find_statement(&self.break_targets, stmt)
    }

    /// `continue` to the loop `loop_stmt`.
    pub fn continue_with_loop<B: FlowBuilder>(
        &mut self,
        ir: &mut B,
        span: Span,
        loop_stmt: StmtId,
    ) -> Result<(), FlowError> {
        let target = find_statement(&self.continue_targets, loop_stmt).ok_or(
            FlowError::UnknownContinueTarget {
                stmt: loop_stmt,
                span,
            },
        )?;
        self.jump_to(ir, target);
        Ok(())
    }

    /// Unlabeled `continue`.
    pub fn continue_with_closest<B: FlowBuilder>(
        &mut self,
        ir: &mut B,
        span: Span,
    ) -> Result<(), FlowError> {
        let target = self
            .continue_targets
            .last()
            .copied()
            .ok_or(FlowError::ContinueOutsideLoop { span })?;
        self.jump_to(ir, target);
        Ok(())
    }

    /// `break` out of `stmt` (a loop, switch or labeled block).
    pub fn break_to_statement<B: FlowBuilder>(
        &mut self,
        ir: &mut B,
        span: Span,
        stmt: StmtId,
    ) -> Result<(), FlowError> {
        let target = self
            .break_target_for(stmt)
            .ok_or(FlowError::UnknownBreakTarget { stmt, span })?;
        self.jump_to(ir, target);
        Ok(())
    }

    /// Unlabeled `break`.
    pub fn break_to_closest<B: FlowBuilder>(
        &mut self,
        ir: &mut B,
        span: Span,
    ) -> Result<(), FlowError> {
        let target = self
            .break_targets
            .last()
            .copied()
            .ok_or(FlowError::BreakOutsideLoop { span })?;
        self.jump_to(ir, target);
        Ok(())
    }

    fn jump_to<B: FlowBuilder>(&mut self, ir: &mut B, target: JumpTarget) {
        self.scopes
            .run_cleanups(ir, target.cleanup_scope, target.target_block);
    }

    fn jump_target(&self, target_block: BlockId, target_statement: Option<StmtId>) -> JumpTarget {
        JumpTarget {
            target_block,
            cleanup_scope: self.current_cleanup_scope(),
            target_statement,
            owner: self.scopes.innermost_tag(),
        }
    }

    // -- Labels and gotos --

    /// Define `label` at `target_block`, resolving pending gotos to it from
    /// the current depth.
    pub fn add_label_target<B: FlowBuilder>(
        &mut self,
        ir: &mut B,
        label: Name,
        target_block: BlockId,
    ) -> Result<(), FlowError> {
        if self.label_targets.contains_key(&label) {
            return Err(FlowError::DuplicateLabel { label });
        }
        let target = self.jump_target(target_block, None);
        self.label_targets.insert(label, target);

        let pending = self.current_unresolved_gotos();
        let mut resolved = 0_usize;
        pending.retain(|goto| {
            if goto.target_label != label {
                return true;
            }
            ir.replace_block_uses(goto.tentative_target, target_block);
            ir.erase_block(goto.tentative_target);
            resolved += 1;
            false
        });
        if resolved > 0 {
            tracing::trace!(?label, resolved, "resolved forward gotos");
        }
        Ok(())
    }

    /// Emit `goto label`.
    ///
    /// Backward gotos run the cleanups down to the label's depth. Forward
    /// gotos are parked until the label shows up (see the module docs).
    pub fn jump_to_label<B: FlowBuilder>(
        &mut self,
        ir: &mut B,
        span: Span,
        label: Name,
    ) -> Result<(), FlowError> {
        if let Some(target) = self.label_targets.get(&label).copied() {
            if !self.is_enclosing(target) {
                return Err(FlowError::GotoIntoScope {
                    label,
                    kind: owner_kind(target),
                    span,
                });
            }
            self.jump_to(ir, target);
            return Ok(());
        }

        let tentative = ir.new_block("goto.unresolved");
        ir.br(tentative);
        let source_block = ir.current_block();
        self.current_unresolved_gotos().push(GotoJump {
            source_span: span,
            source_block,
            tentative_target: tentative,
            target_label: label,
        });
        Ok(())
    }

    /// A label's scope encloses the current position if the cleanup scope it
    /// was defined in is still the one active at that depth.
    fn is_enclosing(&self, target: JumpTarget) -> bool {
        target.cleanup_scope <= self.current_cleanup_scope()
            && self.scopes.tag_at(target.cleanup_scope) == target.owner
    }

    fn current_unresolved_gotos(&mut self) -> &mut Vec<GotoJump> {
        let depth = self.current_cleanup_scope().depth();
        &mut self.unresolved_gotos[depth]
    }

    /// Number of forward gotos still waiting for their label.
    pub fn pending_goto_count(&self) -> usize {
        self.unresolved_gotos.iter().map(Vec::len).sum()
    }

    // -- Calls --

    /// Emit a call, or an invoke when unwinding out of it must run cleanups
    /// or reach a catch.
    ///
    /// `is_nothrow` is ignored while a try catches throwables outside the
    /// exception hierarchy, since those may escape non-throwing callees.
    pub fn call_or_invoke<B: FlowBuilder>(
        &mut self,
        ir: &mut B,
        eh: &mut EhSlots,
        callee: Callee,
        args: &[ValueId],
        name: &str,
        is_nothrow: bool,
    ) -> CallSite {
        let callee_attrs = callee.direct().map(|func| ir.function_attrs(func));
        let is_nothrow = is_nothrow && !self.is_catching_non_exceptions();
        let does_not_throw = is_nothrow || callee_attrs.is_some_and(FnAttrs::cannot_unwind);
        let attrs = callee_attrs.unwrap_or_default();

        if does_not_throw || self.scopes.is_empty() || !self.config.use_exceptions {
            let result = ir.call(callee, args, attrs, name);
            return CallSite::Call { result };
        }

        let unwind = self.get_landing_pad(ir, eh);
        let normal = ir.new_block("postinvoke");
        let result = ir.invoke(callee, args, attrs, normal, unwind, name);
        ir.position_at(normal);
        CallSite::Invoke {
            result,
            normal,
            unwind,
        }
    }

    // -- Finish --

    /// Report gotos that never found their label.
    ///
    /// # Panics
    ///
    /// Panics if any cleanup, try/catch, loop or break target is still
    /// registered.
    pub fn finish(self) -> Result<(), Vec<FlowError>> {
        assert_eq!(
            self.current_cleanup_scope(),
            CleanupCursor::ROOT,
            "function finished with active cleanup scopes"
        );
        assert_eq!(
            self.scopes.try_catch_depth(),
            0,
            "function finished with active try/catch scopes"
        );
        assert!(
            self.break_targets.is_empty() && self.continue_targets.is_empty(),
            "function finished with active loop or break targets"
        );

        let errors: Vec<FlowError> = self
            .unresolved_gotos
            .into_iter()
            .flatten()
            .map(|goto| match self.label_targets.get(&goto.target_label) {
                Some(&target) => FlowError::GotoIntoScope {
                    label: goto.target_label,
                    kind: owner_kind(target),
                    span: goto.source_span,
                },
                None => FlowError::UndefinedLabel {
                    label: goto.target_label,
                    span: goto.source_span,
                },
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn find_statement(targets: &[JumpTarget], stmt: StmtId) -> Option<JumpTarget> {
    targets
        .iter()
        .rev()
        .find(|t| t.target_statement == Some(stmt))
        .copied()
}

fn owner_kind(target: JumpTarget) -> ScopeKind {
    target.owner.map_or(ScopeKind::Cleanup, |tag| tag.kind)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
mod tests;
