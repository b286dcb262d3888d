use pretty_assertions::assert_eq;

use crate::backend::FlowBuilder;
use crate::cleanup::{CatchClause, CleanupCursor};
use crate::config::FlowConfig;
use crate::error::{FlowError, ScopeKind};
use crate::func_state::EhSlots;
use crate::ir::{Callee, FlowTerminator, FnAttrs, IrBuilder};
use crate::test_helpers::{label, marker_block, sp, stmt, throwing_fn, walk, walk_uncaught};

use super::{CallSite, ScopeStack};

fn setup() -> (IrBuilder, ScopeStack) {
    (IrBuilder::new("f"), ScopeStack::new(FlowConfig::default()))
}

// Break and continue

#[test]
fn break_and_continue_outside_loop_are_errors() {
    let (mut ir, mut scopes) = setup();

    assert_eq!(
        scopes.break_to_closest(&mut ir, sp(1)),
        Err(FlowError::BreakOutsideLoop { span: sp(1) })
    );
    assert_eq!(
        scopes.continue_with_closest(&mut ir, sp(2)),
        Err(FlowError::ContinueOutsideLoop { span: sp(2) })
    );
    assert!(!ir.is_current_terminated());
}

#[test]
fn labeled_jump_to_unknown_statement_is_error() {
    let (mut ir, mut scopes) = setup();
    let end = ir.new_block("switch.end");
    scopes.push_break_target(stmt(7), end);

    assert_eq!(
        scopes.break_to_statement(&mut ir, sp(3), stmt(8)),
        Err(FlowError::UnknownBreakTarget {
            stmt: stmt(8),
            span: sp(3)
        })
    );
    // A switch is a break target but not a continue target.
    assert_eq!(
        scopes.continue_with_loop(&mut ir, sp(4), stmt(7)),
        Err(FlowError::UnknownContinueTarget {
            stmt: stmt(7),
            span: sp(4)
        })
    );
    scopes.pop_break_target();
}

#[test]
fn break_runs_cleanups_inside_loop() {
    let (mut ir, mut scopes) = setup();
    let cont = ir.new_block("loop.cond");
    let brk = ir.new_block("loop.end");
    scopes.push_loop_target(stmt(1), cont, brk);
    let c = marker_block(&mut ir, "c");
    scopes.push_cleanup(c, c);

    scopes.break_to_closest(&mut ir, sp(0)).unwrap();

    let func = ir.finish();
    let trace = walk(&func, func.entry, &[cont, brk]);
    assert_eq!(trace.markers(), ["c"]);
    assert_eq!(trace.end, brk);
}

#[test]
fn break_and_continue_share_one_cleanup() {
    let (mut ir, mut scopes) = setup();
    let cont = ir.new_block("loop.cond");
    let brk = ir.new_block("loop.end");
    scopes.push_loop_target(stmt(1), cont, brk);
    let c = marker_block(&mut ir, "c");
    scopes.push_cleanup(c, c);
    let else_branch = ir.new_block("if.else");

    scopes.continue_with_closest(&mut ir, sp(0)).unwrap();
    ir.position_at(else_branch);
    scopes.break_to_statement(&mut ir, sp(1), stmt(1)).unwrap();

    let func = ir.finish();
    let stops = [cont, brk];
    let to_cont = walk(&func, func.entry, &stops);
    assert_eq!(to_cont.markers(), ["c"]);
    assert_eq!(to_cont.end, cont);
    let to_brk = walk(&func, else_branch, &stops);
    assert_eq!(to_brk.markers(), ["c"]);
    assert_eq!(to_brk.end, brk);
}

#[test]
fn labeled_break_leaves_inner_loop_and_cleanups() {
    let (mut ir, mut scopes) = setup();
    let outer_cont = ir.new_block("outer.cond");
    let outer_brk = ir.new_block("outer.end");
    scopes.push_loop_target(stmt(1), outer_cont, outer_brk);
    let c1 = marker_block(&mut ir, "c1");
    scopes.push_cleanup(c1, c1);
    let inner_cont = ir.new_block("inner.cond");
    let inner_brk = ir.new_block("inner.end");
    scopes.push_loop_target(stmt(2), inner_cont, inner_brk);
    let c2 = marker_block(&mut ir, "c2");
    scopes.push_cleanup(c2, c2);
    let other = ir.new_block("other");

    scopes.break_to_statement(&mut ir, sp(0), stmt(1)).unwrap();
    ir.position_at(other);
    scopes.break_to_closest(&mut ir, sp(1)).unwrap();

    let func = ir.finish();
    let stops = [outer_cont, outer_brk, inner_cont, inner_brk];
    let labeled = walk(&func, func.entry, &stops);
    assert_eq!(labeled.markers(), ["c2", "c1"]);
    assert_eq!(labeled.end, outer_brk);
    let closest = walk(&func, other, &stops);
    assert_eq!(closest.markers(), ["c2"]);
    assert_eq!(closest.end, inner_brk);
}

#[test]
fn break_target_lookup_prefers_innermost() {
    let (mut ir, mut scopes) = setup();
    let outer = ir.new_block("outer.end");
    let inner = ir.new_block("inner.end");
    scopes.push_break_target(stmt(5), outer);
    scopes.push_break_target(stmt(5), inner);

    assert_eq!(scopes.break_target_for(stmt(5)).unwrap().target_block, inner);
    scopes.pop_break_target();
    assert_eq!(scopes.break_target_for(stmt(5)).unwrap().target_block, outer);
}

// Gotos and labels

#[test]
fn backward_goto_runs_cleanups() {
    let (mut ir, mut scopes) = setup();
    let head = ir.new_block("head");
    scopes.add_label_target(&mut ir, label(1), head).unwrap();
    let c = marker_block(&mut ir, "c");
    scopes.push_cleanup(c, c);

    scopes.jump_to_label(&mut ir, sp(0), label(1)).unwrap();

    let func = ir.finish();
    let trace = walk(&func, func.entry, &[head]);
    assert_eq!(trace.markers(), ["c"]);
    assert_eq!(trace.end, head);
}

#[test]
fn forward_goto_at_same_depth_is_patched() {
    let (mut ir, mut scopes) = setup();
    let target = ir.new_block("target");

    scopes.jump_to_label(&mut ir, sp(0), label(1)).unwrap();
    assert_eq!(scopes.pending_goto_count(), 1);
    scopes.add_label_target(&mut ir, label(1), target).unwrap();
    assert_eq!(scopes.pending_goto_count(), 0);
    scopes.finish().unwrap();

    let func = ir.finish();
    assert_eq!(
        func.block(func.entry).unwrap().terminator,
        FlowTerminator::Jump { target }
    );
    assert!(func.blocks_named("goto.unresolved").is_empty());
}

#[test]
fn forward_goto_out_of_cleanup_resolves_after_pop() {
    let (mut ir, mut scopes) = setup();
    let c = marker_block(&mut ir, "c");
    scopes.push_cleanup(c, c);

    scopes.jump_to_label(&mut ir, sp(0), label(1)).unwrap();
    scopes.pop_cleanups(&mut ir, CleanupCursor::ROOT);
    assert_eq!(scopes.pending_goto_count(), 1);

    let target = ir.new_block("target");
    scopes.add_label_target(&mut ir, label(1), target).unwrap();
    scopes.finish().unwrap();

    let func = ir.finish();
    let trace = walk(&func, func.entry, &[target]);
    assert_eq!(trace.markers(), ["c"]);
    assert_eq!(trace.end, target);
    assert!(func.blocks_named("goto.unresolved").is_empty());
}

#[test]
fn forward_goto_shares_cleanup_with_other_exit() {
    let (mut ir, mut scopes) = setup();
    let c = marker_block(&mut ir, "c");
    scopes.push_cleanup(c, c);
    let other = ir.new_block("other");
    let src2 = ir.new_block("src2");

    scopes.jump_to_label(&mut ir, sp(0), label(1)).unwrap();
    ir.position_at(src2);
    scopes.run_cleanups(&mut ir, CleanupCursor::ROOT, other);
    scopes.pop_cleanups(&mut ir, CleanupCursor::ROOT);

    let target = ir.new_block("target");
    scopes.add_label_target(&mut ir, label(1), target).unwrap();

    let func = ir.finish();
    let stops = [other, target];
    let goto = walk(&func, func.entry, &stops);
    assert_eq!(goto.markers(), ["c"]);
    assert_eq!(goto.end, target);
    let exit = walk(&func, src2, &stops);
    assert_eq!(exit.markers(), ["c"]);
    assert_eq!(exit.end, other);
}

#[test]
fn forward_goto_climbs_several_scopes() {
    let (mut ir, mut scopes) = setup();
    let outer = marker_block(&mut ir, "outer");
    scopes.push_cleanup(outer, outer);
    let inner = marker_block(&mut ir, "inner");
    scopes.push_finally(inner, inner);

    scopes.jump_to_label(&mut ir, sp(0), label(4)).unwrap();
    scopes.pop_cleanups(&mut ir, CleanupCursor::from_depth(1));
    scopes.pop_cleanups(&mut ir, CleanupCursor::ROOT);

    let target = ir.new_block("target");
    scopes.add_label_target(&mut ir, label(4), target).unwrap();
    scopes.finish().unwrap();

    let func = ir.finish();
    let trace = walk(&func, func.entry, &[target]);
    assert_eq!(trace.markers(), ["inner", "outer"]);
    assert_eq!(trace.end, target);
}

#[test]
fn duplicate_label_is_error() {
    let (mut ir, mut scopes) = setup();
    let a = ir.new_block("a");
    let b = ir.new_block("b");
    scopes.add_label_target(&mut ir, label(1), a).unwrap();

    assert_eq!(
        scopes.add_label_target(&mut ir, label(1), b),
        Err(FlowError::DuplicateLabel { label: label(1) })
    );
}

#[test]
fn backward_goto_into_popped_scope_is_error() {
    let (mut ir, mut scopes) = setup();
    let f = marker_block(&mut ir, "finally");
    scopes.push_finally(f, f);
    let inside = ir.new_block("inside");
    scopes.add_label_target(&mut ir, label(1), inside).unwrap();
    scopes.pop_cleanups(&mut ir, CleanupCursor::ROOT);

    assert_eq!(
        scopes.jump_to_label(&mut ir, sp(9), label(1)),
        Err(FlowError::GotoIntoScope {
            label: label(1),
            kind: ScopeKind::Finally,
            span: sp(9)
        })
    );
}

#[test]
fn backward_goto_into_sibling_scope_is_error() {
    let (mut ir, mut scopes) = setup();
    let a = marker_block(&mut ir, "a");
    scopes.push_cleanup(a, a);
    let inside = ir.new_block("inside");
    scopes.add_label_target(&mut ir, label(1), inside).unwrap();
    scopes.pop_cleanups(&mut ir, CleanupCursor::ROOT);
    let b = marker_block(&mut ir, "b");
    scopes.push_cleanup(b, b);

    let err = scopes.jump_to_label(&mut ir, sp(0), label(1)).unwrap_err();
    assert!(matches!(
        err,
        FlowError::GotoIntoScope {
            kind: ScopeKind::Cleanup,
            ..
        }
    ));
}

#[test]
fn finish_reports_undefined_labels() {
    let (mut ir, mut scopes) = setup();
    scopes.jump_to_label(&mut ir, sp(3), label(2)).unwrap();

    assert_eq!(
        scopes.finish(),
        Err(vec![FlowError::UndefinedLabel {
            label: label(2),
            span: sp(3)
        }])
    );
}

#[test]
fn forward_goto_into_nested_scope_is_reported_at_finish() {
    let (mut ir, mut scopes) = setup();
    scopes.jump_to_label(&mut ir, sp(5), label(1)).unwrap();

    let c = marker_block(&mut ir, "c");
    scopes.push_cleanup(c, c);
    let inside = ir.new_block("inside");
    scopes.add_label_target(&mut ir, label(1), inside).unwrap();
    scopes.pop_cleanups(&mut ir, CleanupCursor::ROOT);

    assert_eq!(
        scopes.finish(),
        Err(vec![FlowError::GotoIntoScope {
            label: label(1),
            kind: ScopeKind::Cleanup,
            span: sp(5)
        }])
    );
}

#[test]
#[should_panic(expected = "active cleanup scopes")]
fn finish_with_active_cleanup_panics() {
    let (mut ir, mut scopes) = setup();
    let c = marker_block(&mut ir, "c");
    scopes.push_cleanup(c, c);
    let _ = scopes.finish();
}

// Calls

fn eh_slots(ir: &mut IrBuilder) -> EhSlots {
    let at = ir.alloca_point();
    EhSlots::new(at)
}

#[test]
fn call_without_scopes_is_plain() {
    let (mut ir, mut scopes) = setup();
    let mut eh = eh_slots(&mut ir);
    let f = throwing_fn(&mut ir, "may_throw");

    let site = scopes.call_or_invoke(&mut ir, &mut eh, Callee::Direct(f), &[], "r", false);

    assert!(matches!(site, CallSite::Call { .. }));
    assert!(!ir.is_current_terminated());
}

#[test]
fn call_inside_cleanup_becomes_invoke() {
    let (mut ir, mut scopes) = setup();
    let mut eh = eh_slots(&mut ir);
    let f = throwing_fn(&mut ir, "may_throw");
    let c = marker_block(&mut ir, "c");
    scopes.push_cleanup(c, c);

    let site = scopes.call_or_invoke(&mut ir, &mut eh, Callee::Direct(f), &[], "r", false);

    let CallSite::Invoke { normal, unwind, .. } = site else {
        panic!("expected an invoke, got {site:?}");
    };
    assert_eq!(ir.current_block(), normal);
    let func = ir.finish();
    assert_eq!(func.block(normal).unwrap().name, "postinvoke");
    let trace = walk_uncaught(&func, unwind, &[]);
    assert_eq!(trace.markers(), ["c"]);
    assert!(matches!(
        func.block(trace.end).unwrap().terminator,
        FlowTerminator::Resume { .. }
    ));
}

#[test]
fn nothrow_and_nounwind_calls_stay_plain() {
    let (mut ir, mut scopes) = setup();
    let mut eh = eh_slots(&mut ir);
    let may_throw = throwing_fn(&mut ir, "may_throw");
    let intrinsic = ir.declare_function("llvm.memcpy", FnAttrs::INTRINSIC);
    let c = marker_block(&mut ir, "c");
    scopes.push_cleanup(c, c);

    let nothrow = scopes.call_or_invoke(&mut ir, &mut eh, Callee::Direct(may_throw), &[], "", true);
    let nounwind = scopes.call_or_invoke(&mut ir, &mut eh, Callee::Direct(intrinsic), &[], "", false);

    assert!(!nothrow.is_invoke());
    assert!(!nounwind.is_invoke());
    assert!(ir.finish().blocks_named("landingPad").is_empty());
}

#[test]
fn indirect_call_uses_no_attributes() {
    let (mut ir, mut scopes) = setup();
    let mut eh = eh_slots(&mut ir);
    let ptr = ir.fresh_value();
    let c = marker_block(&mut ir, "c");
    scopes.push_cleanup(c, c);

    let site = scopes.call_or_invoke(&mut ir, &mut eh, Callee::Indirect(ptr), &[], "", false);

    assert!(site.is_invoke());
    let func = ir.finish();
    let FlowTerminator::Invoke { attrs, .. } = &func.block(func.entry).unwrap().terminator else {
        panic!("entry should end in an invoke");
    };
    assert_eq!(*attrs, FnAttrs::empty());
}

#[test]
fn catching_non_exceptions_overrides_nothrow() {
    let (mut ir, mut scopes) = setup();
    let mut eh = eh_slots(&mut ir);
    let f = throwing_fn(&mut ir, "nothrow_fn");
    let end = ir.new_block("try.end");
    let catch = CatchClause {
        type_info: ir.declare_type_info("Throwable"),
        body: ir.new_block("catch"),
        catches_non_exceptions: true,
    };
    scopes.push_try_catch(stmt(1), vec![catch], end);

    let site = scopes.call_or_invoke(&mut ir, &mut eh, Callee::Direct(f), &[], "", true);

    assert!(site.is_invoke());
}

#[test]
fn disabled_exceptions_never_invoke() {
    let mut ir = IrBuilder::new("f");
    let mut scopes = ScopeStack::new(FlowConfig::without_exceptions());
    let mut eh = eh_slots(&mut ir);
    let f = throwing_fn(&mut ir, "may_throw");
    let c = marker_block(&mut ir, "c");
    scopes.push_cleanup(c, c);

    let site = scopes.call_or_invoke(&mut ir, &mut eh, Callee::Direct(f), &[], "", false);

    assert!(!site.is_invoke());
    assert!(!scopes.config().use_exceptions);
    // Cleanups still run on ordinary exits.
    let exit = ir.new_block("exit");
    scopes.run_cleanups(&mut ir, CleanupCursor::ROOT, exit);
    let func = ir.finish();
    assert_eq!(
        walk(&func, func.entry, &[exit]).markers(),
        ["may_throw", "c"]
    );
}
