//! Ownership SSA IR
//!
//! An SSA intermediate representation with block parameters, explicit
//! reference-counting operations and closure values. Functions, blocks,
//! instructions and values are addressed by stable handles so passes can
//! keep positions across splicing and erasure.

pub mod block;
pub mod builder;
pub mod cfg;
pub mod error;
pub mod function;
pub mod inliner;
pub mod instr;
pub mod module;
pub mod notify;
pub mod pretty;
pub mod span;
pub mod types;
pub mod value;

pub use block::{BasicBlock, BasicBlockId, Terminator};
pub use builder::FunctionBuilder;
pub use cfg::merge_basic_blocks;
pub use error::{IrError, IrResult};
pub use function::{FunctionAttrs, FunctionBody, IrFunction};
pub use inliner::{InlineSplice, Inliner};
pub use instr::{FunctionId, InstrId, Instruction, IrInstr};
pub use module::{FunctionLoader, IrModule, MapLoader};
pub use notify::{DeleteObserver, NoopObserver};
pub use pretty::PrettyPrint;
pub use span::Span;
pub use types::{FunctionRepr, FunctionType, IrType, Param, ParamConvention};
pub use value::{UseSite, ValueData, ValueDef, ValueId};
