//! Cleanup and try/catch scope management.
//!
//! [`TryCatchFinallyScopes`] keeps the stack of active cleanup regions
//! (destructor scopes, `finally` clauses) and try/catch registrations of a
//! function. It knows how to chain cleanups when control leaves a scope and
//! how to build the landing pad that unwinding enters.
//!
//! # Cleanup continuations
//!
//! A cleanup's code is emitted once, but control may leave it toward
//! several places (the loop exit for a `break`, a label for a `goto`, the
//! resume block while unwinding). The end block of each cleanup therefore
//! dispatches on a per-scope *branch selector*:
//!
//! - The first continuation is wired as a plain branch; no slot is needed.
//! - On the second distinct continuation, a selector slot is allocated in
//!   the entry block, every earlier source block stores `0` into it, and
//!   the end block's branch becomes `switch (load selector)` defaulting to
//!   the first continuation.
//! - Every later continuation gets the next case index; its source block
//!   stores that index right before its terminator.
//!
//! All stores for a jump go into the jump's own source block, which
//! dominates the whole cleanup chain it enters.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::backend::FlowBuilder;
use crate::error::ScopeKind;
use crate::func_state::EhSlots;
use crate::ir::{BlockId, SlotId, TypeInfoId};
use crate::source::StmtId;

// ── Cursors and tags ────────────────────────────────────────────────

/// Identifies a depth in the stack of active cleanup scopes.
///
/// [`CleanupCursor::ROOT`] is the function body outside any cleanup. A
/// cursor stays valid only while the scope it denotes (and every scope
/// above it) remains pushed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CleanupCursor(u32);

impl CleanupCursor {
    /// Depth 0: no cleanup active.
    pub const ROOT: CleanupCursor = CleanupCursor(0);

    #[expect(
        clippy::cast_possible_truncation,
        reason = "cleanup nesting never exceeds u32"
    )]
    pub(crate) fn from_depth(depth: usize) -> Self {
        CleanupCursor(depth as u32)
    }

    /// Number of cleanup scopes active at this cursor.
    #[inline]
    pub fn depth(self) -> usize {
        self.0 as usize
    }
}

/// Identity of one pushed cleanup scope.
///
/// Serials are unique per function, so two scopes pushed at the same depth
/// one after the other are told apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScopeTag {
    pub serial: u32,
    pub kind: ScopeKind,
}

// ── Scope entries ───────────────────────────────────────────────────

/// One place control continues at after a cleanup ran.
struct CleanupExitTarget {
    branch_target: BlockId,
    /// Blocks whose jumps go through the cleanup toward `branch_target`.
    source_blocks: SmallVec<[BlockId; 2]>,
}

impl CleanupExitTarget {
    fn new(branch_target: BlockId, source_block: BlockId) -> Self {
        let mut source_blocks = SmallVec::new();
        source_blocks.push(source_block);
        Self {
            branch_target,
            source_blocks,
        }
    }
}

/// A registered piece of cleanup code.
struct CleanupScope {
    begin_block: BlockId,
    /// Left without a terminator by the caller; wired up here.
    end_block: BlockId,
    tag: ScopeTag,
    branch_selector: Option<SlotId>,
    exit_targets: Vec<CleanupExitTarget>,
}

/// A `catch` clause of a registered try statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CatchClause {
    /// Type descriptor the landing pad matches against.
    pub type_info: TypeInfoId,
    /// First block of the catch body.
    pub body: BlockId,
    /// Catches a throwable outside the conventional exception hierarchy
    /// (errors, assertion failures). Such catches must also observe unwinds
    /// out of calls annotated as non-throwing.
    pub catches_non_exceptions: bool,
}

struct TryCatchScope {
    stmt: StmtId,
    catches: Vec<CatchClause>,
    end_block: BlockId,
    /// Cleanup depth at which the try was pushed.
    cleanup_scope: CleanupCursor,
}

// ── TryCatchFinallyScopes ───────────────────────────────────────────

/// Stack of active cleanup regions and try/catch registrations.
///
/// Both kinds are pushed and popped in strict LIFO order matching the
/// lexical nesting. Only cleanups contribute to the [`CleanupCursor`]; a
/// try/catch remembers the cursor it was pushed at.
pub struct TryCatchFinallyScopes {
    cleanup_scopes: Vec<CleanupScope>,
    try_catch_scopes: Vec<TryCatchScope>,
    /// Landing pads per cleanup depth (index = cursor depth). Pushing a
    /// try/catch adds an entry at the current depth so a fresh pad is
    /// built inside it; popping restores the outer pad.
    landing_pads: Vec<SmallVec<[Option<BlockId>; 2]>>,
    /// How often each try statement was registered (debug bookkeeping).
    try_statements: FxHashMap<StmtId, u32>,
    next_serial: u32,
}

impl TryCatchFinallyScopes {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self {
            cleanup_scopes: Vec::new(),
            try_catch_scopes: Vec::new(),
            landing_pads: vec![SmallVec::new()],
            try_statements: FxHashMap::default(),
            next_serial: 0,
        }
    }

    /// Cursor for the current cleanup depth.
    #[inline]
    pub fn current_cleanup_scope(&self) -> CleanupCursor {
        CleanupCursor::from_depth(self.cleanup_scopes.len())
    }

    /// True if no cleanup and no try/catch is active.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cleanup_scopes.is_empty() && self.try_catch_scopes.is_empty()
    }

    /// Number of active try/catch registrations.
    #[inline]
    pub fn try_catch_depth(&self) -> usize {
        self.try_catch_scopes.len()
    }

    /// Tag of the innermost cleanup scope active at `cursor`
    /// (`None` at the root).
    pub fn tag_at(&self, cursor: CleanupCursor) -> Option<ScopeTag> {
        cursor
            .depth()
            .checked_sub(1)
            .and_then(|index| self.cleanup_scopes.get(index))
            .map(|scope| scope.tag)
    }

    /// Tag of the innermost active cleanup scope.
    #[inline]
    pub fn innermost_tag(&self) -> Option<ScopeTag> {
        self.cleanup_scopes.last().map(|scope| scope.tag)
    }

    // -- Cleanups --

    /// Register a destructor-style cleanup.
    ///
    /// `end_block` must not have a terminator yet; it is added as soon as a
    /// jump leaving the scope is emitted.
    pub fn push_cleanup(&mut self, begin_block: BlockId, end_block: BlockId) {
        self.push_scope(ScopeKind::Cleanup, begin_block, end_block);
    }

    /// Register the `finally` clause of a try statement.
    pub fn push_finally(&mut self, begin_block: BlockId, end_block: BlockId) {
        self.push_scope(ScopeKind::Finally, begin_block, end_block);
    }

    fn push_scope(&mut self, kind: ScopeKind, begin_block: BlockId, end_block: BlockId) {
        let tag = ScopeTag {
            serial: self.next_serial,
            kind,
        };
        self.next_serial += 1;
        self.cleanup_scopes.push(CleanupScope {
            begin_block,
            end_block,
            tag,
            branch_selector: None,
            exit_targets: Vec::new(),
        });
        self.landing_pads.push(SmallVec::new());
        tracing::trace!(
            depth = self.cleanup_scopes.len(),
            serial = tag.serial,
            ?kind,
            "pushed cleanup scope"
        );
    }

    /// First block of the cleanup at `index` (depth `index + 1`).
    pub(crate) fn begin_block(&self, index: usize) -> BlockId {
        self.cleanup_scopes[index].begin_block
    }

    /// Terminate the current block and run every cleanup between the
    /// current depth and `target`, innermost first, then continue at
    /// `continue_with`.
    ///
    /// # Panics
    ///
    /// Panics if `target` is deeper than the current depth.
    pub fn run_cleanups<B: FlowBuilder>(
        &mut self,
        ir: &mut B,
        target: CleanupCursor,
        continue_with: BlockId,
    ) {
        let source = self.current_cleanup_scope();
        self.run_cleanups_from(ir, source, target, continue_with);
    }

    fn run_cleanups_from<B: FlowBuilder>(
        &mut self,
        ir: &mut B,
        source: CleanupCursor,
        target: CleanupCursor,
        continue_with: BlockId,
    ) {
        assert!(
            target <= source,
            "cleanup cursor {} is not an ancestor of depth {}",
            target.depth(),
            source.depth()
        );

        if target == source {
            ir.br(continue_with);
            return;
        }

        ir.br(self.cleanup_scopes[source.depth() - 1].begin_block);

        let source_block = ir.current_block();
        for index in (target.depth()..source.depth()).rev() {
            let next = if index > target.depth() {
                self.cleanup_scopes[index - 1].begin_block
            } else {
                continue_with
            };
            self.execute_cleanup(ir, index, source_block, next);
        }
    }

    /// Make the cleanup at `index` continue at `continue_with` for jumps
    /// originating in `source_block`.
    ///
    /// `source_block` must already be terminated (its terminator leads into
    /// the cleanup chain).
    pub(crate) fn execute_cleanup<B: FlowBuilder>(
        &mut self,
        ir: &mut B,
        index: usize,
        source_block: BlockId,
        continue_with: BlockId,
    ) {
        let scope = &mut self.cleanup_scopes[index];

        if scope.exit_targets.is_empty() {
            // First way out of this cleanup: a direct branch suffices.
            debug_assert!(scope.branch_selector.is_none());
            scope
                .exit_targets
                .push(CleanupExitTarget::new(continue_with, source_block));
            let saved = ir.current_block();
            ir.position_at(scope.end_block);
            ir.br(continue_with);
            ir.position_at(saved);
            return;
        }

        if scope.exit_targets.len() == 1 && scope.exit_targets[0].branch_target == continue_with {
            debug_assert!(scope.branch_selector.is_none());
            scope.exit_targets[0].source_blocks.push(source_block);
            return;
        }

        let selector = match scope.branch_selector {
            Some(slot) => slot,
            None => Self::create_branch_selector(ir, scope),
        };

        if let Some(pos) = scope
            .exit_targets
            .iter()
            .position(|t| t.branch_target == continue_with)
        {
            ir.store_const_before_terminator(source_block, selector_value(pos), selector);
            scope.exit_targets[pos].source_blocks.push(source_block);
            return;
        }

        let case = selector_value(scope.exit_targets.len());
        ir.add_switch_case(scope.end_block, case, continue_with);
        ir.store_const_before_terminator(source_block, case, selector);
        scope
            .exit_targets
            .push(CleanupExitTarget::new(continue_with, source_block));
    }

    /// Turn the direct branch at the end of `scope` into a switch on a new
    /// selector slot.
    fn create_branch_selector<B: FlowBuilder>(ir: &mut B, scope: &mut CleanupScope) -> SlotId {
        // Slots live at the function's alloca point; the backend knows it.
        let at = ir.alloca_point();
        let selector = ir.entry_alloca(at, "branchsel");
        tracing::debug!(
            serial = scope.tag.serial,
            end = scope.end_block.raw(),
            "cleanup needs a branch selector"
        );

        // Keep the jumps to the only existing target going there.
        for &block in &scope.exit_targets[0].source_blocks {
            ir.store_const_before_terminator(block, 0, selector);
        }

        let saved = ir.current_block();
        ir.remove_terminator(scope.end_block);
        ir.position_at(scope.end_block);
        let value = ir.load(selector, "branchsel.cur");
        ir.switch(value, scope.exit_targets[0].branch_target);
        ir.position_at(saved);

        scope.branch_selector = Some(selector);
        selector
    }

    /// Remove the innermost cleanup scope without emitting anything.
    ///
    /// # Panics
    ///
    /// Panics if no cleanup is active or a try/catch pushed inside the
    /// cleanup is still active.
    pub(crate) fn pop_cleanup(&mut self) {
        let depth = self.cleanup_scopes.len();
        assert!(depth > 0, "pop_cleanup with no active cleanup scope");
        assert!(
            !self
                .try_catch_scopes
                .last()
                .is_some_and(|tc| tc.cleanup_scope.depth() >= depth),
            "cleanup scope popped while a try/catch inside it is active"
        );
        self.cleanup_scopes.pop();
        self.landing_pads.pop();
    }

    /// Remove every cleanup scope above `target` without emitting branches.
    ///
    /// Callers must already have run the cleanups for any jump leaving
    /// these scopes.
    ///
    /// # Panics
    ///
    /// Panics if `target` is deeper than the current depth.
    pub fn pop_cleanups(&mut self, target: CleanupCursor) {
        let current = self.current_cleanup_scope();
        assert!(
            target <= current,
            "cleanup cursor {} is not an ancestor of depth {}",
            target.depth(),
            current.depth()
        );
        while self.current_cleanup_scope() > target {
            self.pop_cleanup();
        }
    }

    // -- Try/catch --

    /// Register a try statement whose catch clauses are already emitted.
    pub fn push_try_catch(&mut self, stmt: StmtId, catches: Vec<CatchClause>, end_block: BlockId) {
        let cleanup_scope = self.current_cleanup_scope();
        *self.try_statements.entry(stmt).or_insert(0) += 1;
        self.try_catch_scopes.push(TryCatchScope {
            stmt,
            catches,
            end_block,
            cleanup_scope,
        });
        self.landing_pads[cleanup_scope.depth()].push(None);
    }

    /// Unregister the innermost try statement.
    ///
    /// # Panics
    ///
    /// Panics if no try/catch is active or cleanups pushed inside it are
    /// still active.
    pub fn pop_try_catch(&mut self) {
        let Some(scope) = self.try_catch_scopes.pop() else {
            panic!("pop_try_catch with no active try/catch");
        };
        assert_eq!(
            scope.cleanup_scope,
            self.current_cleanup_scope(),
            "try/catch popped while cleanups pushed inside it are active"
        );
        if let Some(count) = self.try_statements.get_mut(&scope.stmt) {
            *count -= 1;
            if *count == 0 {
                self.try_statements.remove(&scope.stmt);
            }
        }
        self.landing_pads[scope.cleanup_scope.depth()].pop();
    }

    /// Whether `stmt` is a currently registered try statement.
    pub fn is_try_active(&self, stmt: StmtId) -> bool {
        self.try_statements.contains_key(&stmt)
    }

    /// Block following the innermost try statement, where catch bodies
    /// continue.
    pub fn innermost_try_end(&self) -> Option<BlockId> {
        self.try_catch_scopes.last().map(|tc| tc.end_block)
    }

    /// True if any active try catches a throwable outside the exception
    /// hierarchy.
    pub fn is_catching_non_exceptions(&self) -> bool {
        self.try_catch_scopes
            .iter()
            .any(|tc| tc.catches.iter().any(|c| c.catches_non_exceptions))
    }

    // -- Landing pads --

    /// The landing pad for calls emitted at the current position, built on
    /// first request and cached until the scope structure changes.
    pub fn get_landing_pad<B: FlowBuilder>(&mut self, ir: &mut B, eh: &mut EhSlots) -> BlockId {
        let depth = self.current_cleanup_scope().depth();
        let pads = &mut self.landing_pads[depth];
        if pads.is_empty() {
            // No try/catch at this depth and no throwing call seen yet.
            pads.push(None);
        }
        if let Some(Some(pad)) = pads.last() {
            return *pad;
        }

        let pad = self.emit_landing_pad(ir, eh);
        if let Some(slot) = self.landing_pads[depth].last_mut() {
            *slot = Some(pad);
        }
        pad
    }

    fn emit_landing_pad<B: FlowBuilder>(&mut self, ir: &mut B, eh: &mut EhSlots) -> BlockId {
        let saved = ir.current_block();
        let pad = ir.new_block("landingPad");
        ir.position_at(pad);

        let values = ir.landing_pad("landing_pad");
        let ptr_slot = eh.ptr_slot(ir);
        ir.store(values.exception, ptr_slot);
        let selector_slot = eh.selector_slot(ir);
        ir.store(values.selector, selector_slot);

        // Walk outwards: cleanups between two try statements run before the
        // outer try's catches are tested.
        let mut last_cleanup = self.current_cleanup_scope();
        let mut last_mismatch = None;
        for index in (0..self.try_catch_scopes.len()).rev() {
            let try_scope = self.try_catch_scopes[index].cleanup_scope;
            debug_assert!(last_cleanup >= try_scope);
            if last_cleanup > try_scope {
                ir.set_landing_pad_cleanup(pad);
                let after = ir.new_block("landingPad.afterCleanup");
                self.run_cleanups_from(ir, last_cleanup, try_scope, after);
                ir.position_at(after);
                last_cleanup = try_scope;
                last_mismatch = None;
            }

            let catches = self.try_catch_scopes[index].catches.clone();
            for clause in catches {
                ir.add_landing_pad_clause(pad, clause.type_info);
                let mismatch = ir.new_block("catch.mismatch");
                let type_id = ir.eh_typeid_for(clause.type_info);
                let selector = ir.load(selector_slot, "eh.selector");
                let matches = ir.icmp_eq(selector, type_id, "eh.matches");
                ir.cond_br(matches, clause.body, mismatch);
                ir.position_at(mismatch);
                last_mismatch = Some(mismatch);
            }
        }

        // Nothing matched: run the remaining cleanups and keep unwinding.
        let resume = eh.resume_unwind_block(ir);
        if last_cleanup > CleanupCursor::ROOT {
            ir.set_landing_pad_cleanup(pad);
            self.run_cleanups_from(ir, last_cleanup, CleanupCursor::ROOT, resume);
        } else if let Some(mismatch) = last_mismatch.filter(|&m| m == ir.current_block()) {
            // Fold the empty trailing mismatch block into the resume block.
            ir.position_at(saved);
            ir.replace_block_uses(mismatch, resume);
            ir.erase_block(mismatch);
        } else {
            ir.br(resume);
        }

        ir.position_at(saved);
        tracing::debug!(
            pad = pad.raw(),
            cleanup_depth = self.cleanup_scopes.len(),
            try_depth = self.try_catch_scopes.len(),
            "emitted landing pad"
        );
        pad
    }
}

impl Default for TryCatchFinallyScopes {
    fn default() -> Self {
        Self::new()
    }
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "a cleanup never has more than u32::MAX exit targets"
)]
fn selector_value(index: usize) -> u32 {
    index as u32
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
