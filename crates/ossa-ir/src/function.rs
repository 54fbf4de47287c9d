//! IR Functions
//!
//! A function is a named signature plus attributes, optionally carrying a
//! body. Bodies are arenas: instructions, values and blocks are addressed by
//! stable handles that survive splitting, splicing and erasure. Erased slots
//! are tombstoned and never reused.

use super::block::{BasicBlock, BasicBlockId, Terminator};
use super::error::{IrError, IrResult};
use super::instr::{InstrId, Instruction, IrInstr};
use super::notify::DeleteObserver;
use super::span::Span;
use super::types::{FunctionType, IrType};
use super::value::{UseSite, ValueData, ValueDef, ValueId};
use rustc_hash::{FxHashMap, FxHashSet};

/// Attributes that govern how passes may treat a function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionAttrs {
    /// Every call must be replaced by the body before mandatory optimization ends
    pub must_inline: bool,
    /// Forwarding stub; never inlined into
    pub is_thunk: bool,
    /// May be referenced from outside the module
    pub externally_visible: bool,
    /// Invoked by a runtime outside the IR (alive without IR references)
    pub foreign_dispatched: bool,
    /// Body is serialized for inlining into other modules
    pub serialized: bool,
    /// Linkage permits copying the body into a serialized caller
    pub fragile_inline_linkage: bool,
    /// Linkage permits referencing the symbol from a serialized caller
    pub fragile_ref_linkage: bool,
    /// Deserialized from another module in already-canonical form
    pub deserialized_canonical: bool,
}

impl Default for FunctionAttrs {
    fn default() -> Self {
        Self {
            must_inline: false,
            is_thunk: false,
            externally_visible: false,
            foreign_dispatched: false,
            serialized: false,
            fragile_inline_linkage: true,
            fragile_ref_linkage: true,
            deserialized_canonical: false,
        }
    }
}

/// An IR function
#[derive(Debug, Clone)]
pub struct IrFunction {
    /// Function name
    pub name: String,
    /// Signature
    pub ty: FunctionType,
    /// Attributes
    pub attrs: FunctionAttrs,
    /// Source span covering the function definition
    pub span: Span,
    body: Option<FunctionBody>,
    /// Body temporarily moved out for mutation
    checked_out: bool,
}

impl IrFunction {
    /// Create a declaration (no body)
    pub fn new(name: impl Into<String>, ty: FunctionType) -> Self {
        Self {
            name: name.into(),
            ty,
            attrs: FunctionAttrs::default(),
            span: Span::default(),
            body: None,
            checked_out: false,
        }
    }

    /// Create a definition
    pub fn with_body(name: impl Into<String>, ty: FunctionType, body: FunctionBody) -> Self {
        let mut func = Self::new(name, ty);
        func.body = Some(body);
        func
    }

    pub fn body(&self) -> Option<&FunctionBody> {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> Option<&mut FunctionBody> {
        self.body.as_mut()
    }

    /// Install a body, replacing any existing one
    pub fn set_body(&mut self, body: FunctionBody) {
        self.body = Some(body);
    }

    /// A function is a definition if its body is loaded, even while checked out
    pub fn is_definition(&self) -> bool {
        self.body.is_some() || self.checked_out
    }

    pub fn is_checked_out(&self) -> bool {
        self.checked_out
    }

    pub(crate) fn take_body(&mut self) -> IrResult<Option<FunctionBody>> {
        if self.checked_out {
            return Err(IrError::AlreadyCheckedOut(self.name.clone()));
        }
        let body = self.body.take();
        self.checked_out = body.is_some();
        Ok(body)
    }

    pub(crate) fn restore_body(&mut self, body: FunctionBody) {
        self.body = Some(body);
        self.checked_out = false;
    }
}

/// Neighbours of a block in program order
#[derive(Debug, Clone, Copy, Default)]
struct BlockLink {
    prev: Option<BasicBlockId>,
    next: Option<BasicBlockId>,
}

/// Arena holding a function's blocks, instructions and values
///
/// Program order is a doubly linked list threaded through block handles, so
/// inserting or removing a block never shifts the others.
#[derive(Debug, Clone, Default)]
pub struct FunctionBody {
    values: Vec<ValueData>,
    instrs: Vec<Option<Instruction>>,
    blocks: Vec<Option<BasicBlock>>,
    links: Vec<BlockLink>,
    /// The entry block
    head: Option<BasicBlockId>,
    tail: Option<BasicBlockId>,
    live_blocks: usize,
}

impl FunctionBody {
    /// Create an empty body
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------------
    // Blocks
    // ---------------------------------------------------------------------

    /// Create a block at the end of the layout
    pub fn create_block(&mut self) -> BasicBlockId {
        let id = self.alloc_block();
        match self.tail {
            Some(tail) => self.link_after(tail, id),
            None => {
                self.head = Some(id);
                self.tail = Some(id);
            }
        }
        id
    }

    /// Create a block placed directly after `after` in the layout
    pub fn insert_block_after(&mut self, after: BasicBlockId) -> IrResult<BasicBlockId> {
        if self.block(after).is_none() {
            return Err(IrError::UnknownBlock(after));
        }
        let id = self.alloc_block();
        self.link_after(after, id);
        Ok(id)
    }

    fn alloc_block(&mut self) -> BasicBlockId {
        let id = BasicBlockId(self.blocks.len() as u32);
        self.blocks.push(Some(BasicBlock::new(id)));
        self.links.push(BlockLink::default());
        self.live_blocks += 1;
        id
    }

    fn link_after(&mut self, after: BasicBlockId, id: BasicBlockId) {
        let next = self.links[after.0 as usize].next;
        self.links[id.0 as usize] = BlockLink {
            prev: Some(after),
            next,
        };
        self.links[after.0 as usize].next = Some(id);
        match next {
            Some(next) => self.links[next.0 as usize].prev = Some(id),
            None => self.tail = Some(id),
        }
    }

    fn unlink(&mut self, id: BasicBlockId) {
        let BlockLink { prev, next } = std::mem::take(&mut self.links[id.0 as usize]);
        match prev {
            Some(prev) => self.links[prev.0 as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.links[next.0 as usize].prev = prev,
            None => self.tail = prev,
        }
    }

    /// Append a parameter to a block
    pub fn add_block_param(&mut self, block: BasicBlockId, ty: IrType) -> IrResult<ValueId> {
        let index = self.block(block).ok_or(IrError::UnknownBlock(block))?.params.len();
        let value = self.alloc_value(ty, ValueDef::BlockParam(block, index));
        self.block_mut(block)?.params.push(value);
        Ok(value)
    }

    pub fn entry_block(&self) -> Option<BasicBlockId> {
        self.head
    }

    /// Last block in program order
    pub fn last_block(&self) -> Option<BasicBlockId> {
        self.tail
    }

    /// Block following `id` in program order
    pub fn next_block(&self, id: BasicBlockId) -> Option<BasicBlockId> {
        self.block(id)?;
        self.links[id.0 as usize].next
    }

    /// Block preceding `id` in program order
    pub fn prev_block(&self, id: BasicBlockId) -> Option<BasicBlockId> {
        self.block(id)?;
        self.links[id.0 as usize].prev
    }

    pub fn block(&self, id: BasicBlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0 as usize).and_then(|b| b.as_ref())
    }

    fn block_mut(&mut self, id: BasicBlockId) -> IrResult<&mut BasicBlock> {
        self.blocks
            .get_mut(id.0 as usize)
            .and_then(|b| b.as_mut())
            .ok_or(IrError::UnknownBlock(id))
    }

    /// Set a block's debug label
    pub fn set_block_label(&mut self, id: BasicBlockId, label: impl Into<String>) -> IrResult<()> {
        self.block_mut(id)?.label = Some(label.into());
        Ok(())
    }

    /// Block IDs in program order
    pub fn layout(&self) -> impl Iterator<Item = BasicBlockId> + '_ {
        std::iter::successors(self.head, move |id| self.links[id.0 as usize].next)
    }

    /// Index of `id` in program order. Walks the layout.
    pub fn layout_position(&self, id: BasicBlockId) -> Option<usize> {
        self.layout().position(|b| b == id)
    }

    /// Iterate over live blocks in program order
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.layout().filter_map(move |id| self.block(id))
    }

    pub fn block_count(&self) -> usize {
        self.live_blocks
    }

    /// Number of branch edges into each block
    pub fn predecessor_counts(&self) -> FxHashMap<BasicBlockId, usize> {
        let mut counts = FxHashMap::default();
        for block in self.blocks() {
            for succ in block.successors() {
                *counts.entry(succ).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Replace a block's terminator, keeping use-lists in sync
    pub fn set_terminator(&mut self, block: BasicBlockId, term: Terminator) -> IrResult<()> {
        let old = std::mem::replace(&mut self.block_mut(block)?.terminator, term.clone());
        for value in old.operands() {
            self.values[value.0 as usize].remove_use(UseSite::Terminator(block));
        }
        for value in term.operands() {
            self.values[value.0 as usize].add_use(UseSite::Terminator(block));
        }
        Ok(())
    }

    pub fn terminator(&self, block: BasicBlockId) -> Option<&Terminator> {
        self.block(block).map(|b| &b.terminator)
    }

    /// Split `block` after `instr`: every later instruction and the terminator
    /// move into a new block placed directly after `block`. The original
    /// block is left with an `Unreachable` terminator.
    pub fn split_block_after(&mut self, instr: InstrId) -> IrResult<BasicBlockId> {
        let block = self.instr(instr).ok_or(IrError::UnknownInstr(instr))?.block;
        let pos = self
            .block(block)
            .and_then(|b| b.position(instr))
            .ok_or(IrError::UnknownInstr(instr))?;
        let tail_block = self.insert_block_after(block)?;

        let tail: Vec<InstrId> = self.block_mut(block)?.instructions.split_off(pos + 1);
        for &moved in &tail {
            if let Some(node) = self.instrs[moved.0 as usize].as_mut() {
                node.block = tail_block;
            }
        }
        self.block_mut(tail_block)?.instructions = tail;

        let term = self.take_terminator(block)?;
        self.set_terminator(tail_block, term)?;
        Ok(tail_block)
    }

    fn take_terminator(&mut self, block: BasicBlockId) -> IrResult<Terminator> {
        let term = self.terminator(block).cloned().ok_or(IrError::UnknownBlock(block))?;
        self.set_terminator(block, Terminator::Unreachable)?;
        Ok(term)
    }

    /// Merge `succ` into `pred`, which must end in an unconditional branch
    /// to `succ`. Block parameters of `succ` are replaced by the branch
    /// arguments.
    pub fn merge_into_predecessor(&mut self, pred: BasicBlockId, succ: BasicBlockId) -> IrResult<()> {
        let args = match self.terminator(pred) {
            Some(Terminator::Branch { target, args }) if *target == succ => args.clone(),
            _ => {
                return Err(IrError::Verification(format!(
                    "{} does not branch unconditionally to {}",
                    pred, succ
                )))
            }
        };
        self.set_terminator(pred, Terminator::Unreachable)?;

        let params = std::mem::take(&mut self.block_mut(succ)?.params);
        for (param, arg) in params.into_iter().zip(args) {
            self.replace_all_uses(param, arg);
            self.values[param.0 as usize].dead = true;
        }

        let moved = std::mem::take(&mut self.block_mut(succ)?.instructions);
        for &instr in &moved {
            if let Some(node) = self.instrs[instr.0 as usize].as_mut() {
                node.block = pred;
            }
        }
        self.block_mut(pred)?.instructions.extend(moved);

        let term = self.take_terminator(succ)?;
        self.set_terminator(pred, term)?;

        self.unlink(succ);
        self.blocks[succ.0 as usize] = None;
        self.live_blocks -= 1;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Values
    // ---------------------------------------------------------------------

    fn alloc_value(&mut self, ty: IrType, def: ValueDef) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData::new(ty, def));
        id
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.0 as usize]
    }

    pub fn value_type(&self, id: ValueId) -> &IrType {
        &self.values[id.0 as usize].ty
    }

    /// Instruction that defines `value`, if it is not a block parameter
    pub fn defining_instr(&self, value: ValueId) -> Option<InstrId> {
        match self.value(value).def {
            ValueDef::Instr(instr) if self.instr(instr).is_some() => Some(instr),
            _ => None,
        }
    }

    /// Operation defining `value`
    pub fn defining_op(&self, value: ValueId) -> Option<&IrInstr> {
        self.defining_instr(value)
            .and_then(|i| self.instr(i))
            .map(|node| &node.op)
    }

    pub fn uses(&self, value: ValueId) -> &[UseSite] {
        self.value(value).uses()
    }

    pub fn has_uses(&self, value: ValueId) -> bool {
        !self.value(value).uses.is_empty()
    }

    pub fn use_count(&self, value: ValueId) -> usize {
        self.value(value).uses.len()
    }

    /// Instructions using `value`, deduplicated, in use-list order
    pub fn instr_users(&self, value: ValueId) -> Vec<InstrId> {
        let mut seen = FxHashSet::default();
        self.uses(value)
            .iter()
            .filter_map(|u| match u {
                UseSite::Instr(i) => Some(*i),
                UseSite::Terminator(_) => None,
            })
            .filter(|i| seen.insert(*i))
            .collect()
    }

    /// Rewire every use of `old` to `new`
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        let sites = std::mem::take(&mut self.values[old.0 as usize].uses);
        let mut visited = FxHashSet::default();
        for site in sites {
            if !visited.insert(site) {
                continue;
            }
            let mut rewired = 0usize;
            match site {
                UseSite::Instr(instr) => {
                    if let Some(node) = self.instrs[instr.0 as usize].as_mut() {
                        node.op.for_each_operand_mut(|v| {
                            if *v == old {
                                *v = new;
                                rewired += 1;
                            }
                        });
                    }
                }
                UseSite::Terminator(block) => {
                    if let Some(b) = self.blocks[block.0 as usize].as_mut() {
                        b.terminator.for_each_operand_mut(|v| {
                            if *v == old {
                                *v = new;
                                rewired += 1;
                            }
                        });
                    }
                }
            }
            for _ in 0..rewired {
                self.values[new.0 as usize].add_use(site);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Instructions
    // ---------------------------------------------------------------------

    pub fn instr(&self, id: InstrId) -> Option<&Instruction> {
        self.instrs.get(id.0 as usize).and_then(|i| i.as_ref())
    }

    /// Operation of a live instruction
    pub fn op(&self, id: InstrId) -> Option<&IrInstr> {
        self.instr(id).map(|node| &node.op)
    }

    /// Result value of a live instruction
    pub fn result(&self, id: InstrId) -> Option<ValueId> {
        self.instr(id).and_then(|node| node.result)
    }

    /// Append an instruction to the end of `block`
    pub fn append_instr(
        &mut self,
        block: BasicBlockId,
        op: IrInstr,
        result_ty: Option<IrType>,
        span: Option<Span>,
    ) -> IrResult<InstrId> {
        let index = self.block(block).ok_or(IrError::UnknownBlock(block))?.len();
        self.insert_instr_at(block, index, op, result_ty, span)
    }

    /// Insert an instruction immediately before `before`
    pub fn insert_instr_before(
        &mut self,
        before: InstrId,
        op: IrInstr,
        result_ty: Option<IrType>,
        span: Option<Span>,
    ) -> IrResult<InstrId> {
        let block = self.instr(before).ok_or(IrError::UnknownInstr(before))?.block;
        let index = self
            .block(block)
            .and_then(|b| b.position(before))
            .ok_or(IrError::UnknownInstr(before))?;
        self.insert_instr_at(block, index, op, result_ty, span)
    }

    fn insert_instr_at(
        &mut self,
        block: BasicBlockId,
        index: usize,
        op: IrInstr,
        result_ty: Option<IrType>,
        span: Option<Span>,
    ) -> IrResult<InstrId> {
        let id = InstrId(self.instrs.len() as u32);
        for value in op.operands() {
            self.values[value.0 as usize].add_use(UseSite::Instr(id));
        }
        let result = result_ty.map(|ty| self.alloc_value(ty, ValueDef::Instr(id)));
        self.instrs.push(Some(Instruction {
            op,
            result,
            block,
            span,
        }));
        self.block_mut(block)?.instructions.insert(index, id);
        Ok(id)
    }

    /// Erase an instruction whose result is unused
    pub fn erase_instr(&mut self, id: InstrId, observer: &mut dyn DeleteObserver) -> IrResult<()> {
        let node = self.instr(id).ok_or(IrError::UnknownInstr(id))?;
        if let Some(result) = node.result {
            let uses = self.use_count(result);
            if uses > 0 {
                return Err(IrError::ValueStillUsed { value: result, uses });
            }
        }

        observer.will_erase(self, id);

        let node = self.instrs[id.0 as usize]
            .take()
            .ok_or(IrError::UnknownInstr(id))?;
        let block = self.block_mut(node.block)?;
        if let Some(pos) = block.position(id) {
            block.instructions.remove(pos);
        }
        for value in node.op.operands() {
            self.values[value.0 as usize].remove_use(UseSite::Instr(id));
        }
        if let Some(result) = node.result {
            self.values[result.0 as usize].dead = true;
        }
        Ok(())
    }

    /// Check if an instruction can be removed without changing behavior
    pub fn is_trivially_dead(&self, id: InstrId) -> bool {
        match self.instr(id) {
            Some(node) => {
                !node.op.has_side_effects() && node.result.map_or(true, |r| !self.has_uses(r))
            }
            None => false,
        }
    }

    /// Erase `root` if trivially dead, then any operand producers that become
    /// trivially dead as a consequence. Returns the number of erased instructions.
    pub fn erase_trivially_dead(
        &mut self,
        root: InstrId,
        observer: &mut dyn DeleteObserver,
    ) -> IrResult<usize> {
        let mut worklist = vec![root];
        let mut erased = 0;
        while let Some(id) = worklist.pop() {
            if !self.is_trivially_dead(id) {
                continue;
            }
            let producers: Vec<InstrId> = self
                .op(id)
                .map(|op| op.operands())
                .unwrap_or_default()
                .into_iter()
                .filter_map(|v| self.defining_instr(v))
                .collect();
            self.erase_instr(id, observer)?;
            erased += 1;
            worklist.extend(producers);
        }
        Ok(erased)
    }

    /// Total number of live instructions
    pub fn instruction_count(&self) -> usize {
        self.blocks().map(|b| b.len()).sum()
    }

    /// Live instructions in program order
    pub fn instructions(&self) -> impl Iterator<Item = (InstrId, &Instruction)> {
        self.blocks().flat_map(move |b| {
            b.instructions
                .iter()
                .filter_map(move |&id| self.instr(id).map(|node| (id, node)))
        })
    }

    // ---------------------------------------------------------------------
    // Verification
    // ---------------------------------------------------------------------

    /// Check structural invariants: use-lists match operands, blocks are
    /// terminated, branch targets exist with matching argument counts and no
    /// operand refers to an erased value.
    pub fn verify(&self) -> IrResult<()> {
        if self.head.is_none() {
            return Err(IrError::Verification("function has no blocks".to_string()));
        }

        let mut expected: FxHashMap<ValueId, Vec<UseSite>> = FxHashMap::default();
        for block in self.blocks() {
            for &id in &block.instructions {
                let node = self.instr(id).ok_or_else(|| {
                    IrError::Verification(format!("{} lists erased instruction {}", block.id, id))
                })?;
                if node.block != block.id {
                    return Err(IrError::Verification(format!(
                        "{} thinks it lives in {} but is listed in {}",
                        id, node.block, block.id
                    )));
                }
                for value in node.op.operands() {
                    expected.entry(value).or_default().push(UseSite::Instr(id));
                }
            }

            for value in block.terminator.operands() {
                expected
                    .entry(value)
                    .or_default()
                    .push(UseSite::Terminator(block.id));
            }
            for succ in block.successors() {
                let target = self.block(succ).ok_or_else(|| {
                    IrError::Verification(format!("{} branches to missing {}", block.id, succ))
                })?;
                let passed = match &block.terminator {
                    Terminator::Branch { args, .. } => args.len(),
                    Terminator::CondBranch {
                        then_block,
                        then_args,
                        else_args,
                        ..
                    } => {
                        if *then_block == succ {
                            then_args.len()
                        } else {
                            else_args.len()
                        }
                    }
                    _ => 0,
                };
                if passed != target.params.len() {
                    return Err(IrError::Verification(format!(
                        "{} passes {} argument(s) to {} which takes {}",
                        block.id,
                        passed,
                        succ,
                        target.params.len()
                    )));
                }
            }
        }

        for (index, data) in self.values.iter().enumerate() {
            let value = ValueId(index as u32);
            let mut actual = data.uses.clone();
            let mut wanted = expected.remove(&value).unwrap_or_default();
            if data.dead && !wanted.is_empty() {
                return Err(IrError::Verification(format!("erased value {} is still used", value)));
            }
            actual.sort_by_key(use_key);
            wanted.sort_by_key(use_key);
            if actual != wanted {
                return Err(IrError::Verification(format!(
                    "use-list of {} is out of sync ({} recorded, {} actual)",
                    value,
                    actual.len(),
                    wanted.len()
                )));
            }
        }
        Ok(())
    }
}

fn use_key(site: &UseSite) -> (u8, u32) {
    match site {
        UseSite::Instr(i) => (0, i.0),
        UseSite::Terminator(b) => (1, b.0),
    }
}
