//! Flow IR: the basic-block representation produced by control-flow lowering.
//!
//! The lowering core talks to its backend exclusively through the
//! [`FlowBuilder`](crate::FlowBuilder) trait. This module provides the
//! in-memory reference backend: ID handles, instructions, terminators,
//! blocks and the finished [`FlowFunction`].
//!
//! # Architecture
//!
//! - **[`FlowFunction`]**: a finished function body: blocks and stack slots
//! - **[`FlowBlock`]**: a basic block: body instructions plus one terminator
//! - **[`FlowInstr`]**: loads, stores, calls, landing pads, comparisons
//! - **[`FlowTerminator`]**: jump, branch, switch, invoke, return, resume
//!
//! Handles ([`BlockId`], [`ValueId`], [`SlotId`], [`FuncId`],
//! [`TypeInfoId`]) are `Copy` `u32` newtypes, so callers never hold
//! references into the builder.

mod builder;
mod display;

use bitflags::bitflags;

pub use self::builder::IrBuilder;

// ── ID newtypes ─────────────────────────────────────────────────────

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Create an ID from a raw index.
            #[inline]
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Get the raw `u32` value.
            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }

            /// Get the index as `usize` (for indexing into `Vec`s).
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

define_id!(
    /// Basic block within a function. Allocated sequentially from 0 (entry).
    BlockId
);
define_id!(
    /// SSA value produced by an instruction or an invoke.
    ValueId
);
define_id!(
    /// Stack slot allocated in the entry block.
    SlotId
);
define_id!(
    /// Declared function (callee of calls and invokes).
    FuncId
);
define_id!(
    /// Runtime type descriptor matched by catch clauses.
    TypeInfoId
);

/// Position in the entry block before which stack slots are inserted.
///
/// Every slot allocated through the marker precedes all other entry-block
/// instructions, so it dominates every use in the function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AllocaPoint(BlockId);

impl AllocaPoint {
    /// Wrap the block a backend placed its marker in.
    #[inline]
    pub fn new(block: BlockId) -> Self {
        Self(block)
    }

    /// The block holding the marker (always the entry block).
    #[inline]
    pub fn block(self) -> BlockId {
        self.0
    }
}

// ── Callees ─────────────────────────────────────────────────────────

bitflags! {
    /// Attributes of a declared function, copied onto each call site.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct FnAttrs: u8 {
        /// The callee never unwinds.
        const NOUNWIND = 1 << 0;
        /// Backend intrinsic; cannot be invoked.
        const INTRINSIC = 1 << 1;
        /// The callee never returns normally.
        const NORETURN = 1 << 2;
        /// Rarely executed (catch-path runtime hooks).
        const COLD = 1 << 3;
    }
}

impl FnAttrs {
    /// Calls to a function with these attributes can never unwind.
    #[inline]
    pub fn cannot_unwind(self) -> bool {
        self.intersects(FnAttrs::NOUNWIND | FnAttrs::INTRINSIC)
    }
}

/// The target of a call or invoke.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Callee {
    /// A statically known function.
    Direct(FuncId),
    /// A function pointer value.
    Indirect(ValueId),
}

impl Callee {
    /// The directly known function, if any.
    #[inline]
    pub fn direct(self) -> Option<FuncId> {
        match self {
            Callee::Direct(func) => Some(func),
            Callee::Indirect(_) => None,
        }
    }
}

/// A function declaration known to the builder.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FunctionDecl {
    pub name: String,
    pub attrs: FnAttrs,
}

/// The two values a landing pad produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LandingPadValues {
    /// Pointer to the in-flight exception object.
    pub exception: ValueId,
    /// Selector identifying the matched clause.
    pub selector: ValueId,
}

// ── Instructions ────────────────────────────────────────────────────

/// A single non-terminator instruction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FlowInstr {
    /// Stack slot allocation (entry block only, before the alloca point).
    Alloca { slot: SlotId },

    /// Marker after which ordinary entry-block code starts.
    AllocaPoint,

    /// `let dst = *slot`.
    Load { dst: ValueId, slot: SlotId },

    /// `*slot = value`.
    Store { value: ValueId, slot: SlotId },

    /// `*slot = constant` (branch selector updates).
    StoreConst { value: u32, slot: SlotId },

    /// Call that cannot unwind into this function's landing pads.
    Call {
        dst: ValueId,
        callee: Callee,
        args: Vec<ValueId>,
        attrs: FnAttrs,
    },

    /// Landing pad. Always the first instruction of its block.
    LandingPad {
        exception: ValueId,
        selector: ValueId,
        cleanup: bool,
        clauses: Vec<TypeInfoId>,
    },

    /// Selector value the unwinder reports for `type_info`.
    TypeIdFor { dst: ValueId, type_info: TypeInfoId },

    /// Integer equality.
    CmpEq {
        dst: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    },
}

// ── Terminators ─────────────────────────────────────────────────────

/// Block terminator: how control leaves a basic block.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FlowTerminator {
    /// Unconditional jump.
    Jump { target: BlockId },

    /// Conditional branch on a boolean.
    Branch {
        cond: ValueId,
        then_block: BlockId,
        else_block: BlockId,
    },

    /// Multi-way branch on an integer, used by cleanup branch selectors.
    Switch {
        value: ValueId,
        cases: Vec<(u32, BlockId)>,
        default: BlockId,
    },

    /// Call that may unwind. On success, continues at `normal`; on unwind,
    /// at the landing pad `unwind`.
    Invoke {
        dst: ValueId,
        callee: Callee,
        args: Vec<ValueId>,
        attrs: FnAttrs,
        normal: BlockId,
        unwind: BlockId,
    },

    /// Return from the function.
    Return { value: Option<ValueId> },

    /// Resume unwinding with the given exception object.
    Resume { exception: ValueId },

    /// Marks a block as unreachable.
    Unreachable,
}

impl FlowTerminator {
    /// All successor blocks, in operand order (duplicates preserved).
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            FlowTerminator::Jump { target } => vec![*target],
            FlowTerminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            FlowTerminator::Switch { cases, default, .. } => {
                let mut succs = Vec::with_capacity(cases.len() + 1);
                succs.push(*default);
                succs.extend(cases.iter().map(|&(_, target)| target));
                succs
            }
            FlowTerminator::Invoke { normal, unwind, .. } => vec![*normal, *unwind],
            FlowTerminator::Return { .. }
            | FlowTerminator::Resume { .. }
            | FlowTerminator::Unreachable => vec![],
        }
    }

    /// Redirect every edge to `old` so that it targets `new`.
    pub fn replace_successor(&mut self, old: BlockId, new: BlockId) {
        fn sub(b: &mut BlockId, old: BlockId, new: BlockId) {
            if *b == old {
                *b = new;
            }
        }
        match self {
            FlowTerminator::Jump { target } => sub(target, old, new),
            FlowTerminator::Branch {
                then_block,
                else_block,
                ..
            } => {
                sub(then_block, old, new);
                sub(else_block, old, new);
            }
            FlowTerminator::Switch { cases, default, .. } => {
                sub(default, old, new);
                for (_, target) in cases {
                    sub(target, old, new);
                }
            }
            FlowTerminator::Invoke { normal, unwind, .. } => {
                sub(normal, old, new);
                sub(unwind, old, new);
            }
            FlowTerminator::Return { .. }
            | FlowTerminator::Resume { .. }
            | FlowTerminator::Unreachable => {}
        }
    }
}

// ── Blocks and functions ────────────────────────────────────────────

/// A finished basic block.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FlowBlock {
    pub id: BlockId,
    /// Diagnostic name (`landingPad`, `postinvoke`, `eh.resume`, ...).
    pub name: String,
    pub body: Vec<FlowInstr>,
    pub terminator: FlowTerminator,
}

/// A finished function body.
///
/// Erased blocks (resolved `goto.unresolved` placeholders, folded mismatch
/// blocks) are absent from `blocks`; IDs of the remaining blocks are kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowFunction {
    pub name: String,
    pub entry: BlockId,
    pub blocks: Vec<FlowBlock>,
    /// Slot names, indexed by [`SlotId`].
    pub slots: Vec<String>,
    /// Declared functions, indexed by [`FuncId`].
    pub functions: Vec<FunctionDecl>,
    /// Type descriptor names, indexed by [`TypeInfoId`].
    pub type_infos: Vec<String>,
}

impl FlowFunction {
    /// Look up a live block by ID.
    pub fn block(&self, id: BlockId) -> Option<&FlowBlock> {
        self.blocks
            .binary_search_by_key(&id, |b| b.id)
            .ok()
            .map(|pos| &self.blocks[pos])
    }

    /// All live blocks whose terminator targets `id`.
    pub fn predecessors(&self, id: BlockId) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|b| b.terminator.successors().contains(&id))
            .map(|b| b.id)
            .collect()
    }

    /// IDs of all live blocks with the given diagnostic name.
    pub fn blocks_named(&self, name: &str) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|b| b.name == name)
            .map(|b| b.id)
            .collect()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]
