//! Basic Blocks and Control Flow
//!
//! Basic blocks are sequences of instructions with a single entry point
//! and a single exit point (the terminator). Values flowing across edges
//! are passed as block arguments.

use super::instr::InstrId;
use super::value::ValueId;

/// Basic block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BasicBlockId(pub u32);

impl BasicBlockId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for BasicBlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A basic block: sequence of instructions with single entry and exit
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Unique identifier for this block
    pub id: BasicBlockId,
    /// Optional label for debugging
    pub label: Option<String>,
    /// Block parameters (SSA values bound by incoming branches)
    pub params: Vec<ValueId>,
    /// Instructions in program order (excluding terminator)
    pub instructions: Vec<InstrId>,
    /// How this block exits
    pub terminator: Terminator,
}

impl BasicBlock {
    /// Create a new empty basic block
    pub fn new(id: BasicBlockId) -> Self {
        Self {
            id,
            label: None,
            params: Vec::new(),
            instructions: Vec::new(),
            terminator: Terminator::Unreachable,
        }
    }

    /// Get the successor blocks
    pub fn successors(&self) -> Vec<BasicBlockId> {
        self.terminator.successors()
    }

    /// Get the number of instructions (excluding terminator)
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Check if this block has no instructions
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Position of an instruction within this block, searching from the end
    /// where passes walking backwards find their instruction immediately
    pub fn position(&self, instr: InstrId) -> Option<usize> {
        self.instructions.iter().rposition(|&i| i == instr)
    }
}

/// Control flow terminator (ends a basic block)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    /// Return from function with optional value
    Return(Option<ValueId>),

    /// Unconditional jump passing block arguments
    Branch {
        target: BasicBlockId,
        args: Vec<ValueId>,
    },

    /// Conditional branch on an integer condition (non-zero is true)
    CondBranch {
        cond: ValueId,
        then_block: BasicBlockId,
        then_args: Vec<ValueId>,
        else_block: BasicBlockId,
        else_args: Vec<ValueId>,
    },

    /// Control never reaches the end of the block
    Unreachable,
}

impl Terminator {
    /// Unconditional branch without arguments
    pub fn jump(target: BasicBlockId) -> Self {
        Terminator::Branch {
            target,
            args: Vec::new(),
        }
    }

    /// Get all successor blocks
    pub fn successors(&self) -> Vec<BasicBlockId> {
        match self {
            Terminator::Branch { target, .. } => vec![*target],
            Terminator::CondBranch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Return(_) | Terminator::Unreachable => vec![],
        }
    }

    /// Collect the operand values in order
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Terminator::Return(value) => value.iter().copied().collect(),
            Terminator::Branch { args, .. } => args.clone(),
            Terminator::CondBranch {
                cond,
                then_args,
                else_args,
                ..
            } => {
                let mut ops = vec![*cond];
                ops.extend(then_args.iter().copied());
                ops.extend(else_args.iter().copied());
                ops
            }
            Terminator::Unreachable => Vec::new(),
        }
    }

    /// Visit every operand slot mutably
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut ValueId)) {
        match self {
            Terminator::Return(Some(value)) => f(value),
            Terminator::Branch { args, .. } => args.iter_mut().for_each(f),
            Terminator::CondBranch {
                cond,
                then_args,
                else_args,
                ..
            } => {
                f(cond);
                then_args.iter_mut().for_each(&mut f);
                else_args.iter_mut().for_each(&mut f);
            }
            Terminator::Return(None) | Terminator::Unreachable => {}
        }
    }

    /// Visit every successor slot mutably
    pub fn for_each_successor_mut(&mut self, mut f: impl FnMut(&mut BasicBlockId)) {
        match self {
            Terminator::Branch { target, .. } => f(target),
            Terminator::CondBranch {
                then_block,
                else_block,
                ..
            } => {
                f(then_block);
                f(else_block);
            }
            Terminator::Return(_) | Terminator::Unreachable => {}
        }
    }
}

impl std::fmt::Display for Terminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn args(values: &[ValueId]) -> String {
            let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            parts.join(", ")
        }

        match self {
            Terminator::Return(None) => write!(f, "return"),
            Terminator::Return(Some(value)) => write!(f, "return {}", value),
            Terminator::Branch { target, args: a } => write!(f, "br {}({})", target, args(a)),
            Terminator::CondBranch {
                cond,
                then_block,
                then_args,
                else_block,
                else_args,
            } => write!(
                f,
                "cond_br {}, {}({}), {}({})",
                cond,
                then_block,
                args(then_args),
                else_block,
                args(else_args)
            ),
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_block_new() {
        let block = BasicBlock::new(BasicBlockId(0));
        assert_eq!(block.id, BasicBlockId(0));
        assert!(block.is_empty());
        assert!(matches!(block.terminator, Terminator::Unreachable));
    }

    #[test]
    fn test_terminator_successors() {
        let jump = Terminator::jump(BasicBlockId(1));
        assert_eq!(jump.successors(), vec![BasicBlockId(1)]);

        let branch = Terminator::CondBranch {
            cond: ValueId(0),
            then_block: BasicBlockId(1),
            then_args: vec![],
            else_block: BasicBlockId(2),
            else_args: vec![ValueId(4)],
        };
        assert_eq!(branch.successors(), vec![BasicBlockId(1), BasicBlockId(2)]);
        assert_eq!(branch.operands(), vec![ValueId(0), ValueId(4)]);

        assert!(Terminator::Return(None).successors().is_empty());
    }

    #[test]
    fn test_terminator_display() {
        let jump = Terminator::Branch {
            target: BasicBlockId(1),
            args: vec![ValueId(2)],
        };
        assert_eq!(format!("{}", jump), "br bb1(%2)");
        assert_eq!(format!("{}", Terminator::Return(None)), "return");
        assert_eq!(format!("{}", Terminator::Return(Some(ValueId(0)))), "return %0");
    }
}
