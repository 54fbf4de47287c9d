//! IR Instructions
//!
//! Instructions live in the function's arena and are addressed by `InstrId`.
//! Each instruction produces zero or one value.

use super::block::BasicBlockId;
use super::span::Span;
use super::value::ValueId;

/// Function identifier in the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

impl FunctionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for FunctionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// Instruction identifier within a function body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

impl InstrId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for InstrId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "i{}", self.0)
    }
}

/// Instruction operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrInstr {
    /// Direct reference to a function: result = @func
    FunctionRef { func: FunctionId },

    /// Closure construction capturing trailing arguments of `callee`
    PartialApply { callee: ValueId, args: Vec<ValueId> },

    /// Promote a thin function to a thick one with an empty context
    ThinToThick { operand: ValueId },

    /// Change the representation of a function value
    ConvertFunction { operand: ValueId },

    /// Convert an escaping closure into a non-escaping one
    ConvertEscapeToNoEscape { operand: ValueId },

    /// `value` must not outlive `base`; forwards `value`
    MarkDependence { value: ValueId, base: ValueId },

    /// Allocate a reference-counted box (type carried by the result)
    AllocBox,

    /// Address of the storage inside a box
    ProjectBox { boxed: ValueId },

    /// Load a value from an address
    Load { addr: ValueId },

    /// Store `src` into `dest`
    Store { src: ValueId, dest: ValueId },

    /// Increment a reference count
    StrongRetain { operand: ValueId },

    /// Decrement a reference count
    StrongRelease { operand: ValueId },

    /// Call through a function value: result = callee(args)
    Apply { callee: ValueId, args: Vec<ValueId> },

    /// Allocate a class instance
    AllocRef { class: String },

    /// Dynamically dispatched method lookup: result = object.method
    ClassMethod { object: ValueId, method: String },

    /// Integer literal
    IntLiteral { value: i64 },

    /// Opaque operation with side effects
    Builtin { name: String, args: Vec<ValueId> },
}

impl IrInstr {
    /// Collect the operand values in order
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            IrInstr::FunctionRef { .. }
            | IrInstr::AllocBox
            | IrInstr::AllocRef { .. }
            | IrInstr::IntLiteral { .. } => Vec::new(),
            IrInstr::ThinToThick { operand }
            | IrInstr::ConvertFunction { operand }
            | IrInstr::ConvertEscapeToNoEscape { operand }
            | IrInstr::StrongRetain { operand }
            | IrInstr::StrongRelease { operand } => vec![*operand],
            IrInstr::MarkDependence { value, base } => vec![*value, *base],
            IrInstr::ProjectBox { boxed } => vec![*boxed],
            IrInstr::Load { addr } => vec![*addr],
            IrInstr::Store { src, dest } => vec![*src, *dest],
            IrInstr::ClassMethod { object, .. } => vec![*object],
            IrInstr::PartialApply { callee, args } | IrInstr::Apply { callee, args } => {
                let mut ops = Vec::with_capacity(args.len() + 1);
                ops.push(*callee);
                ops.extend(args.iter().copied());
                ops
            }
            IrInstr::Builtin { args, .. } => args.clone(),
        }
    }

    /// Visit every operand slot mutably
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut ValueId)) {
        match self {
            IrInstr::FunctionRef { .. }
            | IrInstr::AllocBox
            | IrInstr::AllocRef { .. }
            | IrInstr::IntLiteral { .. } => {}
            IrInstr::ThinToThick { operand }
            | IrInstr::ConvertFunction { operand }
            | IrInstr::ConvertEscapeToNoEscape { operand }
            | IrInstr::StrongRetain { operand }
            | IrInstr::StrongRelease { operand } => f(operand),
            IrInstr::MarkDependence { value, base } => {
                f(value);
                f(base);
            }
            IrInstr::ProjectBox { boxed } => f(boxed),
            IrInstr::Load { addr } => f(addr),
            IrInstr::Store { src, dest } => {
                f(src);
                f(dest);
            }
            IrInstr::ClassMethod { object, .. } => f(object),
            IrInstr::PartialApply { callee, args } | IrInstr::Apply { callee, args } => {
                f(callee);
                args.iter_mut().for_each(f);
            }
            IrInstr::Builtin { args, .. } => args.iter_mut().for_each(f),
        }
    }

    /// Check if this instruction must be kept even when its result is unused
    ///
    /// `PartialApply` consumes its owned captures, so dropping it would leak
    /// them; it is removed only by passes that compensate.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            IrInstr::Store { .. }
                | IrInstr::StrongRetain { .. }
                | IrInstr::StrongRelease { .. }
                | IrInstr::Apply { .. }
                | IrInstr::Builtin { .. }
                | IrInstr::PartialApply { .. }
        )
    }

    pub fn is_apply(&self) -> bool {
        matches!(self, IrInstr::Apply { .. })
    }

    /// Get the callee operand of an application
    pub fn callee(&self) -> Option<ValueId> {
        match self {
            IrInstr::Apply { callee, .. } | IrInstr::PartialApply { callee, .. } => Some(*callee),
            _ => None,
        }
    }

    /// Short mnemonic used by the pretty-printer and logs
    pub fn mnemonic(&self) -> &'static str {
        match self {
            IrInstr::FunctionRef { .. } => "function_ref",
            IrInstr::PartialApply { .. } => "partial_apply",
            IrInstr::ThinToThick { .. } => "thin_to_thick_function",
            IrInstr::ConvertFunction { .. } => "convert_function",
            IrInstr::ConvertEscapeToNoEscape { .. } => "convert_escape_to_noescape",
            IrInstr::MarkDependence { .. } => "mark_dependence",
            IrInstr::AllocBox => "alloc_box",
            IrInstr::ProjectBox { .. } => "project_box",
            IrInstr::Load { .. } => "load",
            IrInstr::Store { .. } => "store",
            IrInstr::StrongRetain { .. } => "strong_retain",
            IrInstr::StrongRelease { .. } => "strong_release",
            IrInstr::Apply { .. } => "apply",
            IrInstr::AllocRef { .. } => "alloc_ref",
            IrInstr::ClassMethod { .. } => "class_method",
            IrInstr::IntLiteral { .. } => "integer_literal",
            IrInstr::Builtin { .. } => "builtin",
        }
    }
}

/// An instruction placed in a block
#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: IrInstr,
    pub result: Option<ValueId>,
    /// Block currently containing this instruction
    pub block: BasicBlockId,
    pub span: Option<Span>,
}

impl Instruction {
    pub fn operands(&self) -> Vec<ValueId> {
        self.op.operands()
    }
}
