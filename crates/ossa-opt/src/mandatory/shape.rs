//! Producers of callee values
//!
//! Callee resolution and closure cleanup both look at the instruction that
//! produced a function value. `classify` folds every producer they care
//! about into one enum so each step is an exhaustive match.

use ossa_ir::{FunctionBody, FunctionId, InstrId, IrInstr, UseSite, ValueId};

/// Conversion instruction kinds that wrap a function value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConversionKind {
    /// `convert_function`
    Function,
    /// `convert_escape_to_noescape`
    EscapeToNoEscape,
    /// `mark_dependence`
    Dependence,
}

/// `load (project_box (alloc_box))`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BoxedLoad {
    pub load: InstrId,
    pub projection: InstrId,
    pub slot: ValueId,
    pub alloc: InstrId,
    pub boxed: ValueId,
}

/// Shape of the instruction producing a function value
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CalleeShape {
    BoxedLoad(BoxedLoad),
    PartialApply {
        instr: InstrId,
        callee: ValueId,
        args: Vec<ValueId>,
    },
    ThinToThick {
        instr: InstrId,
        operand: ValueId,
    },
    Conversion {
        instr: InstrId,
        kind: ConversionKind,
        operand: ValueId,
        /// Leaves ownership and calling convention untouched
        neutral: bool,
    },
    FunctionRef {
        instr: InstrId,
        func: FunctionId,
    },
    /// Block parameter, or an instruction nothing here understands
    Opaque,
}

/// Classify the producer of `value`
pub(crate) fn classify(body: &FunctionBody, value: ValueId) -> CalleeShape {
    let Some(instr) = body.defining_instr(value) else {
        return CalleeShape::Opaque;
    };
    let Some(op) = body.op(instr) else {
        return CalleeShape::Opaque;
    };

    match op {
        IrInstr::Load { addr } => match boxed_load(body, instr, *addr) {
            Some(shape) => CalleeShape::BoxedLoad(shape),
            None => CalleeShape::Opaque,
        },
        IrInstr::PartialApply { callee, args } => CalleeShape::PartialApply {
            instr,
            callee: *callee,
            args: args.clone(),
        },
        IrInstr::ThinToThick { operand } => CalleeShape::ThinToThick {
            instr,
            operand: *operand,
        },
        IrInstr::ConvertFunction { operand } => {
            // Only a thin escaping -> noescape change is transparent.
            let neutral = match (
                body.value_type(*operand).as_function(),
                body.value_type(value).as_function(),
            ) {
                (Some(from), Some(to)) => {
                    !from.has_context() && from.with_noescape(false) == to.with_noescape(false)
                }
                _ => false,
            };
            CalleeShape::Conversion {
                instr,
                kind: ConversionKind::Function,
                operand: *operand,
                neutral,
            }
        }
        IrInstr::ConvertEscapeToNoEscape { operand } => {
            let neutral = match (
                body.value_type(*operand).as_function(),
                body.value_type(value).as_function(),
            ) {
                (Some(from), Some(to)) => from.same_ignoring_escape(to),
                _ => false,
            };
            CalleeShape::Conversion {
                instr,
                kind: ConversionKind::EscapeToNoEscape,
                operand: *operand,
                neutral,
            }
        }
        IrInstr::MarkDependence { value, .. } => CalleeShape::Conversion {
            instr,
            kind: ConversionKind::Dependence,
            operand: *value,
            neutral: true,
        },
        IrInstr::FunctionRef { func } => CalleeShape::FunctionRef { instr, func: *func },
        IrInstr::AllocBox
        | IrInstr::ProjectBox { .. }
        | IrInstr::Store { .. }
        | IrInstr::StrongRetain { .. }
        | IrInstr::StrongRelease { .. }
        | IrInstr::Apply { .. }
        | IrInstr::AllocRef { .. }
        | IrInstr::ClassMethod { .. }
        | IrInstr::IntLiteral { .. }
        | IrInstr::Builtin { .. } => CalleeShape::Opaque,
    }
}

fn boxed_load(body: &FunctionBody, load: InstrId, slot: ValueId) -> Option<BoxedLoad> {
    let projection = body.defining_instr(slot)?;
    let IrInstr::ProjectBox { boxed } = body.op(projection)? else {
        return None;
    };
    let alloc = body.defining_instr(*boxed)?;
    if !matches!(body.op(alloc)?, IrInstr::AllocBox) {
        return None;
    }
    Some(BoxedLoad {
        load,
        projection,
        slot,
        alloc,
        boxed: *boxed,
    })
}

impl BoxedLoad {
    /// The store whose value this load observes, if the box is simple
    /// enough to see through: the box is used only by the projection and
    /// reference counting, the first store into the slot after the
    /// allocation (in the same block) precedes the load, and the slot has
    /// no users besides that store and this load.
    pub fn stored_value(&self, body: &FunctionBody) -> Option<(InstrId, ValueId)> {
        for site in body.uses(self.boxed) {
            let UseSite::Instr(user) = site else {
                return None;
            };
            if *user == self.projection {
                continue;
            }
            match body.op(*user)? {
                IrInstr::StrongRetain { .. } | IrInstr::StrongRelease { .. } => {}
                _ => return None,
            }
        }

        let block = body.instr(self.alloc)?.block;
        let instructions = &body.block(block)?.instructions;
        let start = body.block(block)?.position(self.alloc)? + 1;
        let mut store = None;
        for &id in &instructions[start..] {
            if id == self.load {
                return None;
            }
            match body.op(id)? {
                IrInstr::Store { src, dest } if *dest == self.slot => {
                    store = Some((id, *src));
                    break;
                }
                IrInstr::Load { addr } if *addr == self.slot => return None,
                _ => {}
            }
        }
        let (store_id, src) = store?;

        let slot_users_ok = body.uses(self.slot).iter().all(|site| {
            matches!(site, UseSite::Instr(user) if *user == store_id || *user == self.load)
        });
        slot_users_ok.then_some((store_id, src))
    }
}
