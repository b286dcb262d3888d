//! Per-function lowering options.

/// Options controlling control-flow lowering.
///
/// Set once per function; `Copy` so the scope stack can keep its own.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct FlowConfig {
    /// Whether calls may unwind into landing pads.
    ///
    /// When `false` (no-runtime builds), every call is a plain call and no
    /// landing pad is ever emitted. Cleanups still run on
    /// `break`/`continue`/`goto`/`return`.
    pub use_exceptions: bool,
}

impl FlowConfig {
    /// Configuration for targets without exception support.
    pub const fn without_exceptions() -> Self {
        Self {
            use_exceptions: false,
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            use_exceptions: true,
        }
    }
}
