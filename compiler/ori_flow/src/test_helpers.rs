//! Shared test utilities for the lowering core.
//!
//! Besides ID shorthands, this provides [`walk`], a tiny interpreter over a
//! finished [`FlowFunction`] that tracks constant stores into slots, so
//! tests can follow a jump through chained cleanups and their selector
//! switches and observe which cleanups ran in which order. Only compiled in
//! test builds.

use rustc_hash::FxHashMap;

use crate::backend::FlowBuilder;
use crate::config::FlowConfig;
use crate::func_state::FunctionState;
use crate::ir::{
    BlockId, Callee, FlowFunction, FlowInstr, FlowTerminator, FnAttrs, FuncId, IrBuilder, SlotId,
    ValueId,
};
use crate::source::{Name, Span, StmtId};

const STEP_LIMIT: usize = 1000;

/// Shorthand for `StmtId::new(n)`.
pub(crate) fn stmt(n: u32) -> StmtId {
    StmtId::new(n)
}

/// Shorthand for `Name::from_raw(n)`.
pub(crate) fn label(n: u32) -> Name {
    Name::from_raw(n)
}

/// Shorthand for a span starting at `n`.
pub(crate) fn sp(n: u32) -> Span {
    Span::new(n, n + 1)
}

/// A fresh function state over the in-memory builder.
pub(crate) fn new_state() -> FunctionState<IrBuilder> {
    FunctionState::new(IrBuilder::new("test_fn"), FlowConfig::default())
}

/// Create a block that calls the nounwind marker function `name`.
///
/// The block is left without a terminator (ready to be pushed as a
/// single-block cleanup) and the insertion point is restored.
pub(crate) fn marker_block(ir: &mut IrBuilder, name: &str) -> BlockId {
    let marker = ir.declare_function(name, FnAttrs::NOUNWIND);
    let saved = ir.current_block();
    let block = ir.new_block(name);
    ir.position_at(block);
    ir.call(Callee::Direct(marker), &[], FnAttrs::NOUNWIND, "");
    ir.position_at(saved);
    block
}

/// Declare a function that may unwind.
pub(crate) fn throwing_fn(ir: &mut IrBuilder, name: &str) -> FuncId {
    ir.declare_function(name, FnAttrs::empty())
}

/// Result of [`walk`].
#[derive(Debug)]
pub(crate) struct Trace {
    /// Names of directly called functions, in execution order.
    pub markers: Vec<String>,
    /// Block the walk stopped at.
    pub end: BlockId,
}

impl Trace {
    pub(crate) fn markers(&self) -> Vec<&str> {
        self.markers.iter().map(String::as_str).collect()
    }
}

/// Follow control flow from `from` until a block in `stop` is reached, or a
/// conditional branch, return, resume or `unreachable`.
pub(crate) fn walk(func: &FlowFunction, from: BlockId, stop: &[BlockId]) -> Trace {
    walk_impl(func, from, stop, false)
}

/// Like [`walk`], but conditional branches take their `else` edge. Starting
/// at a landing pad this simulates an exception no catch clause matches.
pub(crate) fn walk_uncaught(func: &FlowFunction, from: BlockId, stop: &[BlockId]) -> Trace {
    walk_impl(func, from, stop, true)
}

fn walk_impl(func: &FlowFunction, from: BlockId, stop: &[BlockId], take_else: bool) -> Trace {
    let mut slots: FxHashMap<SlotId, u32> = FxHashMap::default();
    let mut values: FxHashMap<ValueId, u32> = FxHashMap::default();
    let mut markers = Vec::new();
    let mut current = from;
    let record = |markers: &mut Vec<String>, callee: &Callee| {
        if let Callee::Direct(f) = callee {
            markers.push(func.functions[f.index()].name.clone());
        }
    };

    for _ in 0..STEP_LIMIT {
        if current != from && stop.contains(&current) {
            return Trace {
                markers,
                end: current,
            };
        }
        let block = func
            .block(current)
            .unwrap_or_else(|| panic!("walk reached missing block {}", current.raw()));

        for instr in &block.body {
            match instr {
                FlowInstr::StoreConst { value, slot } => {
                    slots.insert(*slot, *value);
                }
                FlowInstr::Load { dst, slot } => {
                    if let Some(&v) = slots.get(slot) {
                        values.insert(*dst, v);
                    }
                }
                FlowInstr::Store { value, slot } => match values.get(value) {
                    Some(&v) => {
                        slots.insert(*slot, v);
                    }
                    None => {
                        slots.remove(slot);
                    }
                },
                FlowInstr::Call { callee, .. } => record(&mut markers, callee),
                _ => {}
            }
        }

        current = match &block.terminator {
            FlowTerminator::Jump { target } => *target,
            FlowTerminator::Switch {
                value,
                cases,
                default,
            } => {
                let Some(&v) = values.get(value) else {
                    panic!("switch in block {} on a value never stored", current.raw());
                };
                cases
                    .iter()
                    .find(|&&(case, _)| case == v)
                    .map_or(*default, |&(_, target)| target)
            }
            FlowTerminator::Invoke { callee, normal, .. } => {
                record(&mut markers, callee);
                *normal
            }
            FlowTerminator::Branch { else_block, .. } if take_else => *else_block,
            FlowTerminator::Branch { .. }
            | FlowTerminator::Return { .. }
            | FlowTerminator::Resume { .. }
            | FlowTerminator::Unreachable => {
                return Trace {
                    markers,
                    end: current,
                }
            }
        };
    }
    panic!("walk from block {} did not terminate", from.raw());
}
