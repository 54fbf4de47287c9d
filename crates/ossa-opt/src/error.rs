//! Error types for the optimizer
//!
//! These are internal invariant violations: they point at a bug in an
//! earlier stage or in the pass itself, and the embedding compiler is
//! expected to abort on them. User-facing problems such as circular
//! inlining are reported through diagnostics instead.

use ossa_ir::{IrError, ValueId};
use thiserror::Error;

pub type InlineResult<T> = Result<T, InlineError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InlineError {
    #[error("IR error: {0}")]
    Ir(#[from] IrError),

    #[error("cannot inline resilient function '{callee}' into fragile function '{caller}'")]
    ResilientIntoFragile { caller: String, callee: String },

    #[error(
        "closure called in '{function}' captures {value} as indirect owned; \
         its copy cannot be balanced"
    )]
    UnbalancedIndirectCapture { function: String, value: ValueId },

    #[error("function '{0}' has no body to inline")]
    MissingCalleeBody(String),
}
