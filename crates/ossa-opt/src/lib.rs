//! Ossa Optimizer - Mandatory Passes
//!
//! Passes that must run on every function before the IR leaves the
//! mandatory pipeline. Currently this is mandatory inlining.

pub mod diagnostic;
pub mod error;
pub mod mandatory;
pub mod options;
pub mod stats;

pub use diagnostic::{DiagnosticSink, InlineDiagnostic, InlineDiagnosticKind};
pub use error::{InlineError, InlineResult};
pub use mandatory::{
    AnalysisInvalidator, Devirtualizer, InlineStatus, MandatoryInlining, NoDevirtualization,
    NoopInvalidator, VTableDevirtualizer,
};
pub use options::MandatoryInlineOptions;
pub use stats::InlineStats;
