//! Structured control-flow lowering for the Ori compiler.
//!
//! Turns lexically nested control flow (cleanup scopes, `try`/`catch`/
//! `finally`, `break`/`continue`, `goto`, `goto case`, `return`) into a
//! basic-block graph with explicit branches, switches on per-cleanup
//! selector slots, invokes and landing pads.
//!
//! This crate provides:
//!
//! - **Scope bookkeeping**: [`TryCatchFinallyScopes`] (cleanups, try/catch,
//!   landing pads) and [`ScopeStack`] (jump targets, labels, forward gotos,
//!   call-vs-invoke).
//! - **Per-function state**: [`FunctionState`], which owns the builder and
//!   creates the exception-handling slots, the resume block and the return
//!   block on demand.
//! - **Backend seam**: [`FlowBuilder`], the builder operations the lowering
//!   core needs, plus [`IrBuilder`], an in-memory implementation producing
//!   a [`FlowFunction`].
//!
//! # Design
//!
//! The scope stack never holds a reference to the builder. Every emitting
//! operation takes it as `&mut B`, so the function state can own both and
//! lend them out side by side. Blocks, values and slots are `Copy` IDs.
//!
//! User errors (undefined labels, gotos into a scope, `break` outside a
//! loop) come back as [`FlowError`]. Broken nesting (popping a scope that
//! is not on top, stale cursors) is a compiler bug and panics.

pub mod backend;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod func_state;
pub mod ir;
pub mod scope_stack;
pub mod source;
pub mod switch_targets;

use std::sync::Once;

pub use backend::FlowBuilder;
pub use cleanup::{CatchClause, CleanupCursor, ScopeTag, TryCatchFinallyScopes};
pub use config::FlowConfig;
pub use error::{ErrorCode, FlowError, ScopeKind};
pub use func_state::{EhSlots, FunctionState};
pub use ir::{
    AllocaPoint, BlockId, Callee, FlowBlock, FlowFunction, FlowInstr, FlowTerminator, FnAttrs,
    FuncId, IrBuilder, SlotId, TypeInfoId, ValueId,
};
pub use scope_stack::{CallSite, GotoJump, JumpTarget, ScopeStack};
pub use source::{Name, Span, StmtId};
pub use switch_targets::SwitchCaseTargets;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing subscriber for debugging.
///
/// Call this once at startup. Safe to call multiple times.
/// Enable with `RUST_LOG=ori_flow=debug` or `RUST_LOG=ori_flow=trace`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}

#[cfg(test)]
mod test_helpers;

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
