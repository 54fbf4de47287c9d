//! Mandatory inlining
//!
//! Replaces every call to a must-inline function with the callee body,
//! including calls made through closures, so that no such call survives
//! the mandatory phase.

mod balance;
mod cleanup;
mod devirt;
mod driver;
mod engine;
mod resolve;
mod shape;

pub use balance::balance_reference_counts;
pub use cleanup::ClosureCleanup;
pub use devirt::{Devirtualizer, NoDevirtualization, VTableDevirtualizer};
pub use driver::{AnalysisInvalidator, MandatoryInlining, NoopInvalidator};
pub use engine::{CallSite, InlineStatus, InliningEngine, InliningStack};
pub use resolve::{resolve_callee, ResolvedCallee};
