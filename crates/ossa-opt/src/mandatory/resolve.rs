//! Callee resolution
//!
//! Finds the must-inline function behind a call site by walking the
//! callee operand back through the shapes front ends produce for closures:
//! a box holding the closure, ownership-neutral conversions, one
//! `partial_apply` or `thin_to_thick_function`, and finally a
//! `function_ref`.

use super::shape::{classify, CalleeShape};
use crate::error::{InlineError, InlineResult};
use ossa_ir::{FunctionBody, FunctionId, InstrId, IrInstr, IrModule, ParamConvention, ValueId};
use tracing::trace;

/// A call site whose callee is a known must-inline function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCallee {
    /// The function to inline
    pub callee: FunctionId,
    /// The call goes through a closure context
    pub is_thick: bool,
    /// Values captured by the closure with the convention of the parameter
    /// they are bound to
    pub captures: Vec<(ValueId, ParamConvention)>,
    /// Call arguments followed by captured values
    pub args: Vec<ValueId>,
    /// The closure construction the call goes through, if any
    pub partial_apply: Option<InstrId>,
    /// Callee operand of the call
    pub callee_value: ValueId,
}

/// Resolve the must-inline callee of `call` in `caller`.
///
/// Returns `Ok(None)` when the call cannot be inlined: the callee is not a
/// direct must-inline function, uses a foreign calling convention, has no
/// loadable body, or may not be referenced from a serialized caller. The
/// only mutation is lazy loading of the callee's body.
pub fn resolve_callee(
    module: &mut IrModule,
    caller: FunctionId,
    body: &FunctionBody,
    call: InstrId,
) -> InlineResult<Option<ResolvedCallee>> {
    let Some(IrInstr::Apply { callee, args }) = body.op(call) else {
        return Ok(None);
    };
    let callee_value = *callee;
    let mut full_args = args.clone();
    let mut value = callee_value;

    if let CalleeShape::BoxedLoad(shape) = classify(body, value) {
        match shape.stored_value(body) {
            Some((_, stored)) => value = stored,
            None => {
                trace!(%call, "box holding the callee is not simple enough");
                return Ok(None);
            }
        }
    }

    value = skip_neutral_conversions(body, value);

    let mut is_thick = false;
    let mut captures = Vec::new();
    let mut partial_apply = None;
    match classify(body, value) {
        CalleeShape::PartialApply {
            instr,
            callee,
            args: captured,
        } => {
            let Some(callee_ty) = body.value_type(callee).as_function() else {
                return Ok(None);
            };
            let Some(first) = callee_ty.params.len().checked_sub(captured.len()) else {
                return Ok(None);
            };
            for (value, param) in captured.iter().zip(&callee_ty.params[first..]) {
                captures.push((*value, param.convention));
            }
            full_args.extend(captured.iter().copied());
            is_thick = true;
            partial_apply = Some(instr);
            value = callee;
        }
        CalleeShape::ThinToThick { operand, .. } => {
            is_thick = true;
            value = operand;
        }
        CalleeShape::BoxedLoad(_)
        | CalleeShape::Conversion { .. }
        | CalleeShape::FunctionRef { .. }
        | CalleeShape::Opaque => {}
    }

    value = skip_neutral_conversions(body, value);

    let CalleeShape::FunctionRef { func: callee, .. } = classify(body, value) else {
        return Ok(None);
    };
    let Some(callee_fn) = module.function(callee) else {
        return Ok(None);
    };
    if callee_fn.ty.repr.is_foreign() {
        trace!(callee = %callee_fn.name, repr = %callee_fn.ty.repr, "foreign callee");
        return Ok(None);
    }
    if !callee_fn.attrs.must_inline {
        return Ok(None);
    }

    if !module.load_function(callee) {
        trace!(%callee, "callee body is not available");
        return Ok(None);
    }

    let (Some(caller_fn), Some(callee_fn)) = (module.function(caller), module.function(callee)) else {
        return Ok(None);
    };
    if caller_fn.attrs.serialized && !callee_fn.attrs.fragile_inline_linkage {
        if !callee_fn.attrs.fragile_ref_linkage {
            return Err(InlineError::ResilientIntoFragile {
                caller: caller_fn.name.clone(),
                callee: callee_fn.name.clone(),
            });
        }
        trace!(caller = %caller_fn.name, callee = %callee_fn.name, "linkage forbids fragile inlining");
        return Ok(None);
    }

    Ok(Some(ResolvedCallee {
        callee,
        is_thick,
        captures,
        args: full_args,
        partial_apply,
        callee_value,
    }))
}

/// Look through conversions that change neither ownership nor convention
fn skip_neutral_conversions(body: &FunctionBody, mut value: ValueId) -> ValueId {
    while let CalleeShape::Conversion {
        operand,
        neutral: true,
        ..
    } = classify(body, value)
    {
        value = operand;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use ossa_ir::{
        FunctionBuilder, FunctionRepr, FunctionType, IrFunction, IrType, MapLoader, Param,
        ParamConvention,
    };

    fn returning_body() -> FunctionBody {
        let mut body = FunctionBody::new();
        FunctionBuilder::new(&mut body).ret(None).unwrap();
        body
    }

    fn must_inline(name: &str, ty: FunctionType) -> IrFunction {
        let mut func = IrFunction::with_body(name, ty, returning_body());
        func.attrs.must_inline = true;
        func
    }

    /// Build `caller` calling through whatever `build` produces
    fn caller_with(
        module: &mut IrModule,
        build: impl FnOnce(&mut FunctionBuilder) -> ValueId,
    ) -> (FunctionId, InstrId) {
        let mut body = FunctionBody::new();
        let mut b = FunctionBuilder::new(&mut body);
        let callee = build(&mut b);
        let (call, _) = b.apply(callee, vec![]).unwrap();
        b.ret(None).unwrap();
        let id = module.add_function(IrFunction::with_body(
            "caller",
            FunctionType::thin(vec![], None),
            body,
        ));
        (id, call)
    }

    fn resolve(module: &mut IrModule, caller: FunctionId, call: InstrId) -> InlineResult<Option<ResolvedCallee>> {
        let body = module.check_out_body(caller).unwrap().unwrap();
        let result = resolve_callee(module, caller, &body, call);
        module.check_in_body(caller, body).unwrap();
        result
    }

    #[test]
    fn test_resolve_direct_call() {
        let ty = FunctionType::thin(vec![], None);
        let mut module = IrModule::new("test");
        let callee = module.add_function(must_inline("callee", ty.clone()));
        let (caller, call) = caller_with(&mut module, |b| b.function_ref(callee, &ty).unwrap());

        let resolved = resolve(&mut module, caller, call).unwrap().unwrap();
        assert_eq!(resolved.callee, callee);
        assert!(!resolved.is_thick);
        assert!(resolved.captures.is_empty());
        assert!(resolved.partial_apply.is_none());
    }

    #[test]
    fn test_resolve_ignores_plain_functions() {
        let ty = FunctionType::thin(vec![], None);
        let mut module = IrModule::new("test");
        let callee = module.add_function(IrFunction::with_body("plain", ty.clone(), returning_body()));
        let (caller, call) = caller_with(&mut module, |b| b.function_ref(callee, &ty).unwrap());
        assert_eq!(resolve(&mut module, caller, call).unwrap(), None);
    }

    #[test]
    fn test_resolve_through_partial_apply() {
        let ty = FunctionType::thin(
            vec![
                Param::owned(IrType::Int),
                Param::new(IrType::Object, ParamConvention::DirectGuaranteed),
            ],
            None,
        );
        let mut module = IrModule::new("test");
        let callee = module.add_function(must_inline("closure", ty.clone()));

        let mut body = FunctionBody::new();
        let mut b = FunctionBuilder::new(&mut body);
        let x = b.int(1).unwrap();
        let obj = b.alloc_ref("C").unwrap();
        let f = b.function_ref(callee, &ty).unwrap();
        let pa = b.partial_apply(f, vec![obj]).unwrap();
        let noescape = b.convert_to_noescape(pa).unwrap();
        let (call, _) = b.apply(noescape, vec![x]).unwrap();
        b.ret(None).unwrap();
        let caller = module.add_function(IrFunction::with_body(
            "caller",
            FunctionType::thin(vec![], None),
            body,
        ));

        let resolved = resolve(&mut module, caller, call).unwrap().unwrap();
        assert_eq!(resolved.callee, callee);
        assert!(resolved.is_thick);
        assert_eq!(resolved.captures, vec![(obj, ParamConvention::DirectGuaranteed)]);
        assert_eq!(resolved.args, vec![x, obj]);
        assert_eq!(resolved.callee_value, noescape);
        assert!(resolved.partial_apply.is_some());
    }

    #[test]
    fn test_resolve_rejects_foreign_callee() {
        let ty = FunctionType::new(FunctionRepr::CFunctionPointer, vec![], None);
        let mut module = IrModule::new("test");
        let callee = module.add_function(must_inline("c_fn", ty.clone()));
        let (caller, call) = caller_with(&mut module, |b| b.function_ref(callee, &ty).unwrap());
        assert_eq!(resolve(&mut module, caller, call).unwrap(), None);
    }

    #[test]
    fn test_resolve_loads_lazy_body() {
        let ty = FunctionType::thin(vec![], None);
        let mut module = IrModule::new("test");
        let mut decl = IrFunction::new("lazy", ty.clone());
        decl.attrs.must_inline = true;
        let lazy = module.add_function(decl);
        let mut missing = IrFunction::new("missing", ty.clone());
        missing.attrs.must_inline = true;
        let missing = module.add_function(missing);

        let mut loader = MapLoader::new();
        loader.insert("lazy", returning_body());
        module.set_loader(Box::new(loader));

        let (caller, call) = caller_with(&mut module, |b| b.function_ref(lazy, &ty).unwrap());
        assert!(resolve(&mut module, caller, call).unwrap().is_some());
        assert!(module.function(lazy).unwrap().body().is_some());

        let mut body = FunctionBody::new();
        let mut b = FunctionBuilder::new(&mut body);
        let f = b.function_ref(missing, &ty).unwrap();
        let (call, _) = b.apply(f, vec![]).unwrap();
        b.ret(None).unwrap();
        let other = module.add_function(IrFunction::with_body("other", ty, body));
        assert_eq!(resolve(&mut module, other, call).unwrap(), None);
    }

    #[test]
    fn test_resolve_fragile_linkage() {
        let ty = FunctionType::thin(vec![], None);
        let mut module = IrModule::new("test");
        let mut refable = must_inline("refable", ty.clone());
        refable.attrs.fragile_inline_linkage = false;
        let refable = module.add_function(refable);
        let mut resilient = must_inline("resilient", ty.clone());
        resilient.attrs.fragile_inline_linkage = false;
        resilient.attrs.fragile_ref_linkage = false;
        let resilient = module.add_function(resilient);

        let (caller, call) = caller_with(&mut module, |b| b.function_ref(refable, &ty).unwrap());
        module.function_mut(caller).unwrap().attrs.serialized = true;
        assert_eq!(resolve(&mut module, caller, call).unwrap(), None);

        let (caller, call) = caller_with(&mut module, |b| b.function_ref(resilient, &ty).unwrap());
        module.function_mut(caller).unwrap().attrs.serialized = true;
        assert!(matches!(
            resolve(&mut module, caller, call),
            Err(InlineError::ResilientIntoFragile { .. })
        ));
    }
}
