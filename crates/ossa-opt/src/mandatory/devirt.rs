//! Devirtualization bridge
//!
//! Gives a devirtualizer the chance to turn a dynamically dispatched call
//! into a direct one before callee resolution. A devirtualizer only builds
//! the replacement; the engine rewires uses and deletes the original call.

use crate::error::InlineResult;
use ossa_ir::{
    FunctionBody, FunctionId, InstrId, IrError, IrInstr, IrModule, IrType, NoopObserver, ValueId,
};

/// Rewrites dynamically dispatched calls into direct calls
pub trait Devirtualizer {
    /// Insert a direct replacement for `call` and return it, or `None` when
    /// the call cannot be devirtualized. The original call must be left in
    /// place. An error aborts the pass.
    fn try_devirtualize(
        &mut self,
        module: &IrModule,
        body: &mut FunctionBody,
        call: InstrId,
    ) -> InlineResult<Option<InstrId>>;
}

/// Devirtualizer that never rewrites anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDevirtualization;

impl Devirtualizer for NoDevirtualization {
    fn try_devirtualize(
        &mut self,
        _: &IrModule,
        _: &mut FunctionBody,
        _: InstrId,
    ) -> InlineResult<Option<InstrId>> {
        Ok(None)
    }
}

/// Resolves `class_method` lookups on freshly allocated objects through
/// the module's vtables
#[derive(Debug, Default, Clone, Copy)]
pub struct VTableDevirtualizer;

impl VTableDevirtualizer {
    pub fn new() -> Self {
        Self
    }

    fn dispatch_target(
        module: &IrModule,
        body: &FunctionBody,
        call: InstrId,
    ) -> Option<(FunctionId, Vec<ValueId>)> {
        let IrInstr::Apply { callee, args } = body.op(call)? else {
            return None;
        };
        let IrInstr::ClassMethod { object, method } = body.defining_op(*callee)? else {
            return None;
        };
        // The dynamic type is only known for objects allocated right here.
        let IrInstr::AllocRef { class } = body.defining_op(*object)? else {
            return None;
        };
        let target = module.vtable_lookup(class, method)?;
        Some((target, args.clone()))
    }
}

impl Devirtualizer for VTableDevirtualizer {
    fn try_devirtualize(
        &mut self,
        module: &IrModule,
        body: &mut FunctionBody,
        call: InstrId,
    ) -> InlineResult<Option<InstrId>> {
        let Some((target, args)) = Self::dispatch_target(module, body, call) else {
            return Ok(None);
        };
        let Some(target_ty) = module.function(target).map(|f| f.ty.clone()) else {
            return Ok(None);
        };
        let Some(node) = body.instr(call) else {
            return Ok(None);
        };
        let span = node.span;
        let result_ty = node.result.map(|r| body.value_type(r).clone());

        let fref = body.insert_instr_before(
            call,
            IrInstr::FunctionRef { func: target },
            Some(IrType::function(target_ty)),
            span,
        )?;
        let direct = body.result(fref).ok_or(IrError::UnknownInstr(fref))?;
        match body.insert_instr_before(call, IrInstr::Apply { callee: direct, args }, result_ty, span) {
            Ok(new_call) => Ok(Some(new_call)),
            Err(err) => {
                body.erase_instr(fref, &mut NoopObserver)?;
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InlineError;
    use crate::mandatory::MandatoryInlining;
    use ossa_ir::{FunctionBuilder, FunctionType, IrFunction, Param};

    #[test]
    fn test_devirtualize_known_class() {
        let method_ty = FunctionType::thin(vec![Param::guaranteed(IrType::Object)], Some(IrType::Int));
        let mut module = IrModule::new("test");
        let imp = module.add_function(IrFunction::new("Dog.speak", method_ty.clone()));
        module.add_vtable_entry("Dog", "speak", imp);

        let mut body = FunctionBody::new();
        let mut b = FunctionBuilder::new(&mut body);
        let obj = b.alloc_ref("Dog").unwrap();
        let m = b.class_method(obj, "speak", &method_ty).unwrap();
        let (call, _) = b.apply(m, vec![obj]).unwrap();
        b.ret(None).unwrap();

        let new_call = VTableDevirtualizer::new()
            .try_devirtualize(&module, &mut body, call)
            .unwrap()
            .unwrap();
        let Some(IrInstr::Apply { callee, args }) = body.op(new_call) else {
            panic!("expected apply");
        };
        assert_eq!(args, &vec![obj]);
        assert_eq!(body.defining_op(*callee), Some(&IrInstr::FunctionRef { func: imp }));
        assert_eq!(body.value_type(body.result(new_call).unwrap()), &IrType::Int);
        // The original call is still there for the caller to remove.
        assert!(body.instr(call).is_some());
    }

    #[test]
    fn test_unknown_class_is_left_alone() {
        let method_ty = FunctionType::thin(vec![Param::guaranteed(IrType::Object)], None);
        let module = IrModule::new("test");

        let mut body = FunctionBody::new();
        let mut b = FunctionBuilder::new(&mut body);
        let obj = b.alloc_ref("Cat").unwrap();
        let m = b.class_method(obj, "speak", &method_ty).unwrap();
        let (call, _) = b.apply(m, vec![obj]).unwrap();
        b.ret(None).unwrap();

        let count = body.instruction_count();
        assert!(VTableDevirtualizer::new()
            .try_devirtualize(&module, &mut body, call)
            .unwrap()
            .is_none());
        assert_eq!(body.instruction_count(), count);
    }

    struct Failing;

    impl Devirtualizer for Failing {
        fn try_devirtualize(
            &mut self,
            _: &IrModule,
            _: &mut FunctionBody,
            call: InstrId,
        ) -> InlineResult<Option<InstrId>> {
            Err(IrError::UnknownInstr(call).into())
        }
    }

    #[test]
    fn test_devirtualizer_error_aborts_the_pass() {
        let ty = FunctionType::thin(vec![], None);
        let mut module = IrModule::new("test");
        let leaf = module.add_function(IrFunction::new("leaf", ty.clone()));
        let main = module.add_function(IrFunction::new("main", ty.clone()));

        let mut body = FunctionBody::new();
        FunctionBuilder::new(&mut body).ret(None).unwrap();
        let func = module.function_mut(leaf).unwrap();
        func.set_body(body);
        func.attrs.must_inline = true;

        let mut body = FunctionBody::new();
        let mut b = FunctionBuilder::new(&mut body);
        let f = b.function_ref(leaf, &ty).unwrap();
        b.apply(f, vec![]).unwrap();
        b.ret(None).unwrap();
        module.function_mut(main).unwrap().set_body(body);

        let mut pass = MandatoryInlining::default().with_devirtualizer(Failing);
        let err = pass.run_module(&mut module).unwrap_err();
        assert!(matches!(err, InlineError::Ir(IrError::UnknownInstr(_))));
        // The body is checked back in even though processing failed.
        let main_body = module.function(main).unwrap().body().unwrap();
        assert!(main_body.verify().is_ok());
        assert_eq!(main_body.instruction_count(), 2);
    }
}
