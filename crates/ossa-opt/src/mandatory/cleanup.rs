//! Dead closure cleanup
//!
//! After a call has been replaced by its callee's body, the chain that
//! produced the callee value is often dead: a `function_ref`, possibly
//! wrapped in a closure, possibly parked in a box. `ClosureCleanup` watches
//! deletions through `DeleteObserver`, collects function-typed producers
//! whose users went away, and removes them with a few narrow patterns.
//! Anything that does not match exactly is left alone.

use super::shape::{classify, BoxedLoad, CalleeShape, ConversionKind};
use crate::error::InlineResult;
use ossa_ir::{
    DeleteObserver, FunctionBody, InstrId, IrInstr, ParamConvention, UseSite, ValueId,
};
use rustc_hash::FxHashMap;

/// Insertion-ordered set whose removed entries leave holes, so it can be
/// iterated by index while being modified
#[derive(Debug, Default)]
struct BlotSet {
    items: Vec<Option<InstrId>>,
    index: FxHashMap<InstrId, usize>,
}

impl BlotSet {
    fn insert(&mut self, instr: InstrId) {
        if self.index.contains_key(&instr) {
            return;
        }
        self.index.insert(instr, self.items.len());
        self.items.push(Some(instr));
    }

    fn erase(&mut self, instr: InstrId) {
        if let Some(slot) = self.index.remove(&instr) {
            self.items[slot] = None;
        }
    }

    fn get(&self, slot: usize) -> Option<InstrId> {
        self.items.get(slot).copied().flatten()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Candidate function-value producers, fed by deletion notifications
#[derive(Debug, Default)]
pub struct ClosureCleanup {
    candidates: BlotSet,
    erased: usize,
}

impl DeleteObserver for ClosureCleanup {
    fn will_erase(&mut self, body: &FunctionBody, instr: InstrId) {
        self.erased += 1;
        self.candidates.erase(instr);
        let Some(op) = body.op(instr) else { return };
        for value in op.operands() {
            if !body.value_type(value).is_function() {
                continue;
            }
            if let Some(producer) = body.defining_instr(value) {
                self.candidates.insert(producer);
            }
        }
    }
}

impl ClosureCleanup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instructions erased while this cleanup was observing
    pub fn erased(&self) -> usize {
        self.erased
    }

    /// Process every candidate, including those discovered on the way
    pub fn run(&mut self, body: &mut FunctionBody) -> InlineResult<()> {
        let mut slot = 0;
        while slot < self.candidates.len() {
            if let Some(instr) = self.candidates.get(slot) {
                if body.instr(instr).is_some() {
                    self.cleanup_callee_value(body, instr)?;
                }
            }
            slot += 1;
        }
        Ok(())
    }

    fn cleanup_callee_value(&mut self, body: &mut FunctionBody, instr: InstrId) -> InlineResult<()> {
        let Some(mut value) = body.result(instr) else {
            return Ok(());
        };

        if let CalleeShape::BoxedLoad(shape) = classify(body, value) {
            match self.cleanup_loaded_value(body, shape)? {
                Some(stored) => value = stored,
                None => return Ok(()),
            }
        }

        let source = match classify(body, value) {
            CalleeShape::Conversion {
                kind: ConversionKind::Function | ConversionKind::EscapeToNoEscape,
                operand,
                ..
            } => operand,
            _ => value,
        };

        match classify(body, source) {
            CalleeShape::PartialApply { instr, callee, .. } => {
                if !self.try_delete_dead_closure(body, instr)? {
                    return Ok(());
                }
                value = callee;
            }
            CalleeShape::ThinToThick { instr, operand } => {
                if !self.try_delete_dead_closure(body, instr)? {
                    return Ok(());
                }
                value = operand;
            }
            CalleeShape::BoxedLoad(_)
            | CalleeShape::Conversion { .. }
            | CalleeShape::FunctionRef { .. }
            | CalleeShape::Opaque => {}
        }

        match classify(body, value) {
            CalleeShape::Conversion {
                instr,
                kind: ConversionKind::Function | ConversionKind::EscapeToNoEscape,
                ..
            } => {
                if body.is_trivially_dead(instr) {
                    body.erase_trivially_dead(instr, self)?;
                }
            }
            CalleeShape::FunctionRef { instr, .. } => {
                if !body.has_uses(value) {
                    body.erase_instr(instr, self)?;
                }
            }
            CalleeShape::BoxedLoad(_)
            | CalleeShape::PartialApply { .. }
            | CalleeShape::ThinToThick { .. }
            | CalleeShape::Conversion { .. }
            | CalleeShape::Opaque => {}
        }
        Ok(())
    }

    /// Remove a dead `load (project_box (alloc_box))` together with the box.
    /// The store's source takes over the box's release. Returns the source.
    fn cleanup_loaded_value(
        &mut self,
        body: &mut FunctionBody,
        shape: BoxedLoad,
    ) -> InlineResult<Option<ValueId>> {
        if body.result(shape.load).is_some_and(|v| body.has_uses(v)) {
            return Ok(None);
        }
        body.erase_instr(shape.load, self)?;

        let mut release = None;
        for site in body.uses(shape.boxed) {
            let UseSite::Instr(user) = *site else {
                return Ok(None);
            };
            if user == shape.projection {
                continue;
            }
            match body.op(user) {
                Some(IrInstr::StrongRelease { .. }) if release.is_none() => release = Some(user),
                _ => return Ok(None),
            }
        }

        let mut store = None;
        for site in body.uses(shape.slot) {
            let UseSite::Instr(user) = *site else {
                return Ok(None);
            };
            match body.op(user) {
                Some(IrInstr::Store { src, dest }) if store.is_none() && *dest == shape.slot => {
                    store = Some((user, *src));
                }
                _ => return Ok(None),
            }
        }
        // An uninitialized box has nothing that could take over its release.
        let Some((store, source)) = store else {
            return Ok(None);
        };
        body.erase_instr(store, self)?;

        if let Some(release) = release {
            self.release_and_fold(body, release, source)?;
            body.erase_instr(release, self)?;
        }
        body.erase_instr(shape.projection, self)?;
        body.erase_instr(shape.alloc, self)?;
        Ok(Some(source))
    }

    /// Release `value` right before `at`, or cancel it against a retain of
    /// the same value immediately preceding `at`
    fn release_and_fold(
        &mut self,
        body: &mut FunctionBody,
        at: InstrId,
        value: ValueId,
    ) -> InlineResult<()> {
        let previous = body.instr(at).and_then(|node| {
            let block = body.block(node.block)?;
            let pos = block.position(at)?;
            pos.checked_sub(1).map(|p| block.instructions[p])
        });
        if let Some(previous) = previous {
            if body.op(previous) == Some(&IrInstr::StrongRetain { operand: value }) {
                body.erase_instr(previous, self)?;
                return Ok(());
            }
        }
        let span = body.instr(at).and_then(|node| node.span);
        body.insert_instr_before(at, IrInstr::StrongRelease { operand: value }, None, span)?;
        Ok(())
    }

    /// Delete a closure whose only remaining users are releases, directly or
    /// through unused conversions. Each release of the closure becomes a
    /// release of its owned captures.
    fn try_delete_dead_closure(&mut self, body: &mut FunctionBody, closure: InstrId) -> InlineResult<bool> {
        let Some(result) = body.result(closure) else {
            return Ok(false);
        };
        let Some((releases, conversions)) = closure_users(body, result) else {
            return Ok(false);
        };

        let captures: Vec<(ValueId, ParamConvention)> = match body.op(closure) {
            Some(IrInstr::PartialApply { callee, args }) => {
                let Some(params) = body.value_type(*callee).as_function().map(|t| &t.params) else {
                    return Ok(false);
                };
                let Some(first) = params.len().checked_sub(args.len()) else {
                    return Ok(false);
                };
                args.iter()
                    .zip(&params[first..])
                    .map(|(v, p)| (*v, p.convention))
                    .collect()
            }
            _ => Vec::new(),
        };
        if captures
            .iter()
            .any(|(_, convention)| *convention == ParamConvention::IndirectIn)
        {
            return Ok(false);
        }

        for release in releases {
            let span = body.instr(release).and_then(|node| node.span);
            for &(value, convention) in &captures {
                if body.value_type(value).is_address() || !convention.is_consumed() {
                    continue;
                }
                body.insert_instr_before(release, IrInstr::StrongRelease { operand: value }, None, span)?;
            }
            body.erase_instr(release, self)?;
        }
        for conversion in conversions.into_iter().rev() {
            body.erase_instr(conversion, self)?;
        }
        body.erase_instr(closure, self)?;
        Ok(true)
    }
}

/// Releases of `value` and conversions forwarding it, if nothing else uses
/// it. Conversions come before their own users.
fn closure_users(body: &FunctionBody, value: ValueId) -> Option<(Vec<InstrId>, Vec<InstrId>)> {
    let mut releases = Vec::new();
    let mut conversions = Vec::new();
    let mut worklist = vec![value];
    while let Some(value) = worklist.pop() {
        for user in users_of(body, value)? {
            match body.op(user)? {
                IrInstr::StrongRelease { .. } => releases.push(user),
                IrInstr::ConvertFunction { .. }
                | IrInstr::ConvertEscapeToNoEscape { .. } => {
                    conversions.push(user);
                    worklist.push(body.result(user)?);
                }
                IrInstr::MarkDependence { value: forwarded, .. } if *forwarded == value => {
                    conversions.push(user);
                    worklist.push(body.result(user)?);
                }
                _ => return None,
            }
        }
    }
    Some((releases, conversions))
}

/// Instruction users of `value`; `None` if a terminator uses it
fn users_of(body: &FunctionBody, value: ValueId) -> Option<Vec<InstrId>> {
    if body
        .uses(value)
        .iter()
        .any(|site| matches!(site, UseSite::Terminator(_)))
    {
        return None;
    }
    Some(body.instr_users(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ossa_ir::{FunctionBuilder, FunctionId, FunctionType, IrType, Param};

    fn closure_ty() -> FunctionType {
        FunctionType::thin(vec![Param::owned(IrType::Object)], None)
    }

    /// Type of `closure_ty` with its only parameter captured
    fn captured_closure_ty() -> IrType {
        IrType::function(FunctionType::thick(vec![], None))
    }

    /// Erase `instr` with a fresh cleanup observing, then run it
    fn erase_and_cleanup(body: &mut FunctionBody, instr: InstrId) -> ClosureCleanup {
        let mut cleanup = ClosureCleanup::new();
        body.erase_instr(instr, &mut cleanup).unwrap();
        cleanup.run(body).unwrap();
        cleanup
    }

    #[test]
    fn test_dead_function_ref_is_removed() {
        let ty = FunctionType::thin(vec![], None);
        let mut body = FunctionBody::new();
        let mut b = FunctionBuilder::new(&mut body);
        let f = b.function_ref(FunctionId(0), &ty).unwrap();
        let (call, _) = b.apply(f, vec![]).unwrap();
        b.ret(None).unwrap();

        erase_and_cleanup(&mut body, call);
        assert_eq!(body.instruction_count(), 0);
        assert!(body.verify().is_ok());
    }

    #[test]
    fn test_dead_partial_apply_releases_captures() {
        let mut body = FunctionBody::new();
        let mut b = FunctionBuilder::new(&mut body);
        let obj = b.alloc_ref("C").unwrap();
        let f = b.function_ref(FunctionId(0), &closure_ty()).unwrap();
        let pa = b.partial_apply(f, vec![obj]).unwrap();
        let (call, _) = b.apply(pa, vec![]).unwrap();
        b.release(pa).unwrap();
        b.ret(None).unwrap();

        erase_and_cleanup(&mut body, call);
        let ops: Vec<IrInstr> = body.instructions().map(|(_, n)| n.op.clone()).collect();
        assert_eq!(
            ops,
            vec![
                IrInstr::AllocRef { class: "C".to_string() },
                IrInstr::StrongRelease { operand: obj },
            ]
        );
        assert!(body.verify().is_ok());
    }

    #[test]
    fn test_live_closure_is_kept() {
        let mut body = FunctionBody::new();
        let mut b = FunctionBuilder::new(&mut body);
        let obj = b.alloc_ref("C").unwrap();
        let f = b.function_ref(FunctionId(0), &closure_ty()).unwrap();
        let pa = b.partial_apply(f, vec![obj]).unwrap();
        let (call, _) = b.apply(pa, vec![]).unwrap();
        b.builtin("escape", vec![pa], None).unwrap();
        b.ret(None).unwrap();

        let before = body.instruction_count();
        erase_and_cleanup(&mut body, call);
        assert_eq!(body.instruction_count(), before - 1);
    }

    #[test]
    fn test_boxed_closure_release_moves_to_source() {
        let mut body = FunctionBody::new();
        let mut b = FunctionBuilder::new(&mut body);
        let obj = b.alloc_ref("C").unwrap();
        let f = b.function_ref(FunctionId(0), &closure_ty()).unwrap();
        let pa = b.partial_apply(f, vec![obj]).unwrap();
        b.builtin("keep", vec![pa], None).unwrap();
        let bx = b.alloc_box(captured_closure_ty()).unwrap();
        let slot = b.project_box(bx).unwrap();
        b.store(pa, slot).unwrap();
        let loaded = b.load(slot).unwrap();
        let (call, _) = b.apply(loaded, vec![]).unwrap();
        b.release(bx).unwrap();
        b.ret(None).unwrap();

        erase_and_cleanup(&mut body, call);
        // The box is gone; its release now applies to the stored closure,
        // which stays alive because something else uses it.
        let ops: Vec<IrInstr> = body.instructions().map(|(_, n)| n.op.clone()).collect();
        assert!(!ops
            .iter()
            .any(|op| matches!(op, IrInstr::AllocBox | IrInstr::ProjectBox { .. } | IrInstr::Load { .. })));
        assert_eq!(ops.last(), Some(&IrInstr::StrongRelease { operand: pa }));
        assert!(body.verify().is_ok());
    }

    #[test]
    fn test_release_folds_into_preceding_retain() {
        let ty = FunctionType::thin(vec![], None);
        let mut body = FunctionBody::new();
        let mut b = FunctionBuilder::new(&mut body);
        let bx = b.alloc_box(IrType::function(ty.clone())).unwrap();
        let slot = b.project_box(bx).unwrap();
        let f = b.function_ref(FunctionId(0), &ty).unwrap();
        b.store(f, slot).unwrap();
        let loaded = b.load(slot).unwrap();
        let (call, _) = b.apply(loaded, vec![]).unwrap();
        b.retain(f).unwrap();
        b.release(bx).unwrap();
        b.ret(None).unwrap();

        erase_and_cleanup(&mut body, call);
        // retain f; release box  =>  nothing, and the function_ref dies too
        assert_eq!(body.instruction_count(), 0);
        assert!(body.verify().is_ok());
    }
}
