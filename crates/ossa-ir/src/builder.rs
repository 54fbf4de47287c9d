//! Function body builder
//!
//! Convenience layer over `FunctionBody` for constructing IR by hand, mostly
//! in tests and front-end lowering.

use super::block::{BasicBlockId, Terminator};
use super::error::{IrError, IrResult};
use super::function::FunctionBody;
use super::instr::{FunctionId, InstrId, IrInstr};
use super::span::Span;
use super::types::{FunctionRepr, FunctionType, IrType};
use super::value::ValueId;

/// Builder that appends to one block of a body at a time
pub struct FunctionBuilder<'a> {
    body: &'a mut FunctionBody,
    current_block: BasicBlockId,
    span: Option<Span>,
}

impl<'a> FunctionBuilder<'a> {
    /// Create a builder positioned at the entry block, creating it if needed
    pub fn new(body: &'a mut FunctionBody) -> Self {
        let current_block = match body.entry_block() {
            Some(entry) => entry,
            None => body.create_block(),
        };
        FunctionBuilder {
            body,
            current_block,
            span: None,
        }
    }

    /// Switch to emitting into a different block
    pub fn switch_to_block(&mut self, block: BasicBlockId) {
        self.current_block = block;
    }

    pub fn current_block(&self) -> BasicBlockId {
        self.current_block
    }

    /// Attach `span` to every instruction emitted from now on
    pub fn set_span(&mut self, span: Option<Span>) {
        self.span = span;
    }

    /// Create a new block at the end of the layout
    pub fn create_block(&mut self) -> BasicBlockId {
        self.body.create_block()
    }

    /// Add a parameter to `block`
    pub fn block_param(&mut self, block: BasicBlockId, ty: IrType) -> IrResult<ValueId> {
        self.body.add_block_param(block, ty)
    }

    /// Emit an instruction without a result
    pub fn emit(&mut self, op: IrInstr) -> IrResult<InstrId> {
        self.body.append_instr(self.current_block, op, None, self.span)
    }

    /// Emit an instruction producing a value of type `ty`
    pub fn emit_value(&mut self, op: IrInstr, ty: IrType) -> IrResult<ValueId> {
        let id = self
            .body
            .append_instr(self.current_block, op, Some(ty), self.span)?;
        self.body.result(id).ok_or(IrError::UnknownInstr(id))
    }

    /// Set the terminator for the current block
    pub fn terminate(&mut self, term: Terminator) -> IrResult<()> {
        self.body.set_terminator(self.current_block, term)
    }

    pub fn ret(&mut self, value: Option<ValueId>) -> IrResult<()> {
        self.terminate(Terminator::Return(value))
    }

    pub fn br(&mut self, target: BasicBlockId, args: Vec<ValueId>) -> IrResult<()> {
        self.terminate(Terminator::Branch { target, args })
    }

    pub fn int(&mut self, value: i64) -> IrResult<ValueId> {
        self.emit_value(IrInstr::IntLiteral { value }, IrType::Int)
    }

    /// Reference `func`, whose signature is `ty`
    pub fn function_ref(&mut self, func: FunctionId, ty: &FunctionType) -> IrResult<ValueId> {
        self.emit_value(IrInstr::FunctionRef { func }, IrType::function(ty.clone()))
    }

    /// Build a closure over `callee` capturing `args` as its trailing
    /// parameters. The closure type is thick and drops the captured params.
    pub fn partial_apply(&mut self, callee: ValueId, args: Vec<ValueId>) -> IrResult<ValueId> {
        let fn_ty = self.function_type_of(callee)?;
        let kept = fn_ty.params.len().saturating_sub(args.len());
        let closure_ty = FunctionType::thick(fn_ty.params[..kept].to_vec(), fn_ty.result.clone());
        self.emit_value(
            IrInstr::PartialApply { callee, args },
            IrType::function(closure_ty),
        )
    }

    /// Like `partial_apply`, but the closure context is borrowed by callers
    pub fn partial_apply_guaranteed(&mut self, callee: ValueId, args: Vec<ValueId>) -> IrResult<ValueId> {
        let fn_ty = self.function_type_of(callee)?;
        let kept = fn_ty.params.len().saturating_sub(args.len());
        let closure_ty = FunctionType::thick(fn_ty.params[..kept].to_vec(), fn_ty.result.clone())
            .with_callee_guaranteed(true);
        self.emit_value(
            IrInstr::PartialApply { callee, args },
            IrType::function(closure_ty),
        )
    }

    pub fn thin_to_thick(&mut self, operand: ValueId) -> IrResult<ValueId> {
        let ty = self.function_type_of(operand)?.with_repr(FunctionRepr::Thick);
        self.emit_value(IrInstr::ThinToThick { operand }, IrType::function(ty))
    }

    /// Convert a function value to `to`
    pub fn convert_function(&mut self, operand: ValueId, to: FunctionType) -> IrResult<ValueId> {
        self.emit_value(IrInstr::ConvertFunction { operand }, IrType::function(to))
    }

    /// Produce the non-escaping form of a function value
    pub fn convert_to_noescape(&mut self, operand: ValueId) -> IrResult<ValueId> {
        let ty = self.function_type_of(operand)?.with_noescape(true);
        self.emit_value(IrInstr::ConvertEscapeToNoEscape { operand }, IrType::function(ty))
    }

    pub fn mark_dependence(&mut self, value: ValueId, base: ValueId) -> IrResult<ValueId> {
        let ty = self.body.value_type(value).clone();
        self.emit_value(IrInstr::MarkDependence { value, base }, ty)
    }

    /// Allocate a box holding a value of type `element`
    pub fn alloc_box(&mut self, element: IrType) -> IrResult<ValueId> {
        self.emit_value(IrInstr::AllocBox, IrType::boxed(element))
    }

    pub fn project_box(&mut self, boxed: ValueId) -> IrResult<ValueId> {
        let element = self
            .body
            .value_type(boxed)
            .element()
            .cloned()
            .ok_or_else(|| IrError::Verification(format!("{} is not a box", boxed)))?;
        self.emit_value(IrInstr::ProjectBox { boxed }, IrType::address(element))
    }

    pub fn load(&mut self, addr: ValueId) -> IrResult<ValueId> {
        let element = self
            .body
            .value_type(addr)
            .element()
            .cloned()
            .ok_or_else(|| IrError::Verification(format!("{} is not an address", addr)))?;
        self.emit_value(IrInstr::Load { addr }, element)
    }

    pub fn store(&mut self, src: ValueId, dest: ValueId) -> IrResult<InstrId> {
        self.emit(IrInstr::Store { src, dest })
    }

    pub fn retain(&mut self, operand: ValueId) -> IrResult<InstrId> {
        self.emit(IrInstr::StrongRetain { operand })
    }

    pub fn release(&mut self, operand: ValueId) -> IrResult<InstrId> {
        self.emit(IrInstr::StrongRelease { operand })
    }

    /// Call `callee`; the result type comes from its signature
    pub fn apply(&mut self, callee: ValueId, args: Vec<ValueId>) -> IrResult<(InstrId, Option<ValueId>)> {
        let result_ty = self.function_type_of(callee)?.result.clone();
        let id = self.body.append_instr(
            self.current_block,
            IrInstr::Apply { callee, args },
            result_ty,
            self.span,
        )?;
        Ok((id, self.body.result(id)))
    }

    pub fn alloc_ref(&mut self, class: impl Into<String>) -> IrResult<ValueId> {
        self.emit_value(IrInstr::AllocRef { class: class.into() }, IrType::Object)
    }

    /// Look up `method` on `object`; `ty` is the method's signature
    pub fn class_method(
        &mut self,
        object: ValueId,
        method: impl Into<String>,
        ty: &FunctionType,
    ) -> IrResult<ValueId> {
        self.emit_value(
            IrInstr::ClassMethod {
                object,
                method: method.into(),
            },
            IrType::function(ty.clone()),
        )
    }

    /// Opaque operation with side effects
    pub fn builtin(
        &mut self,
        name: impl Into<String>,
        args: Vec<ValueId>,
        ty: Option<IrType>,
    ) -> IrResult<(InstrId, Option<ValueId>)> {
        let id = self.body.append_instr(
            self.current_block,
            IrInstr::Builtin {
                name: name.into(),
                args,
            },
            ty,
            self.span,
        )?;
        Ok((id, self.body.result(id)))
    }

    fn function_type_of(&self, value: ValueId) -> IrResult<FunctionType> {
        self.body
            .value_type(value)
            .as_function()
            .cloned()
            .ok_or_else(|| IrError::Verification(format!("{} is not a function value", value)))
    }
}
