//! IR manipulation errors

use thiserror::Error;

use crate::block::BasicBlockId;
use crate::instr::{FunctionId, InstrId};
use crate::value::ValueId;

pub type IrResult<T> = Result<T, IrError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("Instruction {0} does not exist")]
    UnknownInstr(InstrId),

    #[error("Block {0} does not exist")]
    UnknownBlock(BasicBlockId),

    #[error("Function {0} does not exist")]
    UnknownFunction(FunctionId),

    #[error("Value {value} is still used {uses} time(s)")]
    ValueStillUsed { value: ValueId, uses: usize },

    #[error("Function '{0}' has no body")]
    MissingBody(String),

    #[error("Function '{0}' is already checked out")]
    AlreadyCheckedOut(String),

    #[error("Verification failed: {0}")]
    Verification(String),
}
