//! Errors reported while lowering a function's control flow.
//!
//! Every variant is fatal for the function being generated: a control-flow
//! graph whose nesting or dominance invariants are broken cannot be patched
//! afterwards. Internal-consistency violations (stale cleanup cursors and
//! the like) are compiler bugs and panic instead of surfacing here.

use std::fmt;

use thiserror::Error;

use crate::source::{Name, Span, StmtId};

/// Error codes for control-flow lowering diagnostics.
///
/// Codes in the E6xxx range belong to code generation.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ErrorCode {
    /// Goto to a label that is never defined in the function
    E6001,
    /// Goto into a cleanup or `finally` scope from outside it
    E6002,
    /// `break` outside of any loop or switch
    E6003,
    /// `continue` outside of any loop
    E6004,
    /// Labeled `break`/`continue` naming a statement that is not a target
    E6005,
    /// Label defined twice in one function
    E6006,
}

impl ErrorCode {
    /// Get the string representation of this error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::E6001 => "E6001",
            ErrorCode::E6002 => "E6002",
            ErrorCode::E6003 => "E6003",
            ErrorCode::E6004 => "E6004",
            ErrorCode::E6005 => "E6005",
            ErrorCode::E6006 => "E6006",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a cleanup region guards.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ScopeKind {
    /// Destructor-style cleanup (scope guards, RAII locals).
    Cleanup,
    /// The `finally` clause of a try statement.
    Finally,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKind::Cleanup => f.write_str("cleanup"),
            ScopeKind::Finally => f.write_str("try/finally"),
        }
    }
}

/// A fatal control-flow lowering error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    /// A goto names a label that was never defined.
    #[error("goto targets undefined label {label:?}")]
    UndefinedLabel { label: Name, span: Span },

    /// A goto enters a scope it is not nested in.
    #[error("goto into {kind} scope is not allowed")]
    GotoIntoScope {
        label: Name,
        kind: ScopeKind,
        span: Span,
    },

    /// Unlabeled `break` with no enclosing loop or switch.
    #[error("`break` is not inside a loop or switch")]
    BreakOutsideLoop { span: Span },

    /// Unlabeled `continue` with no enclosing loop.
    #[error("`continue` is not inside a loop")]
    ContinueOutsideLoop { span: Span },

    /// Labeled `break` (or `goto case`) naming a statement that is not an
    /// enclosing loop or switch.
    #[error("no enclosing loop or switch {stmt:?} to break out of")]
    UnknownBreakTarget { stmt: StmtId, span: Span },

    /// Labeled `continue` naming a statement that is not an enclosing loop.
    #[error("no enclosing loop {stmt:?} to continue")]
    UnknownContinueTarget { stmt: StmtId, span: Span },

    /// The same label was registered twice.
    #[error("label {label:?} is already defined in this function")]
    DuplicateLabel { label: Name },
}

impl FlowError {
    /// Stable diagnostic code.
    pub fn code(&self) -> ErrorCode {
        match self {
            FlowError::UndefinedLabel { .. } => ErrorCode::E6001,
            FlowError::GotoIntoScope { .. } => ErrorCode::E6002,
            FlowError::BreakOutsideLoop { .. } => ErrorCode::E6003,
            FlowError::ContinueOutsideLoop { .. } => ErrorCode::E6004,
            FlowError::UnknownBreakTarget { .. } | FlowError::UnknownContinueTarget { .. } => {
                ErrorCode::E6005
            }
            FlowError::DuplicateLabel { .. } => ErrorCode::E6006,
        }
    }

    /// Source location to report, if the error has one.
    pub fn span(&self) -> Option<Span> {
        match self {
            FlowError::UndefinedLabel { span, .. }
            | FlowError::GotoIntoScope { span, .. }
            | FlowError::BreakOutsideLoop { span }
            | FlowError::ContinueOutsideLoop { span }
            | FlowError::UnknownBreakTarget { span, .. }
            | FlowError::UnknownContinueTarget { span, .. } => Some(*span),
            FlowError::DuplicateLabel { .. } => None,
        }
    }
}
