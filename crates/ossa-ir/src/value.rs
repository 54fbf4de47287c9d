//! IR Values
//!
//! Every SSA value is defined exactly once, either by an instruction result
//! or by a block parameter, and keeps a list of the places that use it.

use super::block::BasicBlockId;
use super::instr::InstrId;
use super::types::IrType;

/// SSA value identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Where a value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueDef {
    /// Result of an instruction
    Instr(InstrId),
    /// Parameter `index` of a block
    BlockParam(BasicBlockId, usize),
}

/// A single use of a value
///
/// A user that mentions the same value twice appears twice in the use-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UseSite {
    /// Operand of an instruction
    Instr(InstrId),
    /// Operand of a block terminator
    Terminator(BasicBlockId),
}

/// Per-value bookkeeping
#[derive(Debug, Clone)]
pub struct ValueData {
    pub ty: IrType,
    pub def: ValueDef,
    pub(crate) uses: Vec<UseSite>,
    /// Set once the defining instruction or block is erased
    pub(crate) dead: bool,
}

impl ValueData {
    pub(crate) fn new(ty: IrType, def: ValueDef) -> Self {
        Self {
            ty,
            def,
            uses: Vec::new(),
            dead: false,
        }
    }

    pub fn uses(&self) -> &[UseSite] {
        &self.uses
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub(crate) fn add_use(&mut self, site: UseSite) {
        self.uses.push(site);
    }

    /// Remove one occurrence of `site` from the use-list
    pub(crate) fn remove_use(&mut self, site: UseSite) {
        if let Some(pos) = self.uses.iter().rposition(|u| *u == site) {
            self.uses.swap_remove(pos);
        }
    }
}
