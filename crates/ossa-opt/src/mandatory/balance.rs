//! Reference count balancing for closure calls
//!
//! Applying a thick function consumes the closure, and the closure hands
//! owned copies of its captures to the implementation. Once the call is
//! replaced by the body both effects have to be made explicit.

use crate::error::{InlineError, InlineResult};
use ossa_ir::{FunctionBody, InstrId, IrInstr, ParamConvention, ValueId};

/// Insert compensating reference counting operations before `call`:
/// a retain of every owned, non-address capture and, unless the context is
/// guaranteed, a release of `callee_value`. Returns the number of inserted
/// instructions.
///
/// Address captures passed as `IndirectIn` would need an indirect copy,
/// which is not modelled; they are rejected before anything is inserted.
pub fn balance_reference_counts(
    body: &mut FunctionBody,
    function: &str,
    call: InstrId,
    callee_value: ValueId,
    captures: &[(ValueId, ParamConvention)],
    context_guaranteed: bool,
) -> InlineResult<usize> {
    if let Some((value, _)) = captures.iter().find(|(value, convention)| {
        *convention == ParamConvention::IndirectIn && body.value_type(*value).is_address()
    }) {
        return Err(InlineError::UnbalancedIndirectCapture {
            function: function.to_string(),
            value: *value,
        });
    }

    let span = body.instr(call).and_then(|node| node.span);
    let mut inserted = 0;
    for &(value, convention) in captures {
        if body.value_type(value).is_address() {
            continue;
        }
        if matches!(
            convention,
            ParamConvention::DirectGuaranteed | ParamConvention::DirectUnowned
        ) {
            continue;
        }
        body.insert_instr_before(call, IrInstr::StrongRetain { operand: value }, None, span)?;
        inserted += 1;
    }

    if !context_guaranteed {
        body.insert_instr_before(
            call,
            IrInstr::StrongRelease {
                operand: callee_value,
            },
            None,
            span,
        )?;
        inserted += 1;
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ossa_ir::{FunctionBuilder, FunctionId, FunctionType, IrType, Param};

    fn closure_call(conventions: &[ParamConvention], address: bool) -> (FunctionBody, InstrId, ValueId, Vec<(ValueId, ParamConvention)>) {
        let capture_ty = if address {
            IrType::address(IrType::Object)
        } else {
            IrType::Object
        };
        let params = conventions
            .iter()
            .map(|c| Param::new(capture_ty.clone(), *c))
            .collect();
        let ty = FunctionType::thin(params, None);

        let mut body = FunctionBody::new();
        let mut b = FunctionBuilder::new(&mut body);
        let mut captures = Vec::new();
        for &convention in conventions {
            let value = if address {
                let bx = b.alloc_box(IrType::Object).unwrap();
                b.project_box(bx).unwrap()
            } else {
                b.alloc_ref("C").unwrap()
            };
            captures.push((value, convention));
        }
        let f = b.function_ref(FunctionId(0), &ty).unwrap();
        let pa = b
            .partial_apply(f, captures.iter().map(|(v, _)| *v).collect())
            .unwrap();
        let (call, _) = b.apply(pa, vec![]).unwrap();
        b.ret(None).unwrap();
        (body, call, pa, captures)
    }

    fn ops_before(body: &FunctionBody, call: InstrId) -> Vec<IrInstr> {
        let block = body.instr(call).unwrap().block;
        let b = body.block(block).unwrap();
        let pos = b.position(call).unwrap();
        b.instructions[..pos]
            .iter()
            .map(|id| body.op(*id).unwrap().clone())
            .collect()
    }

    #[test]
    fn test_owned_capture_retained_then_context_released() {
        let (mut body, call, pa, captures) = closure_call(&[ParamConvention::DirectOwned], false);
        let inserted =
            balance_reference_counts(&mut body, "f", call, pa, &captures, false).unwrap();
        assert_eq!(inserted, 2);

        let ops = ops_before(&body, call);
        let n = ops.len();
        assert_eq!(ops[n - 2], IrInstr::StrongRetain { operand: captures[0].0 });
        assert_eq!(ops[n - 1], IrInstr::StrongRelease { operand: pa });
        assert!(body.verify().is_ok());
    }

    #[test]
    fn test_guaranteed_capture_and_context_need_nothing() {
        let (mut body, call, pa, captures) =
            closure_call(&[ParamConvention::DirectGuaranteed, ParamConvention::DirectUnowned], false);
        let before = body.instruction_count();
        let inserted = balance_reference_counts(&mut body, "f", call, pa, &captures, true).unwrap();
        assert_eq!(inserted, 0);
        assert_eq!(body.instruction_count(), before);
    }

    #[test]
    fn test_indirect_owned_address_capture_is_fatal() {
        let (mut body, call, pa, captures) = closure_call(&[ParamConvention::IndirectIn], true);
        let before = body.instruction_count();
        let err = balance_reference_counts(&mut body, "f", call, pa, &captures, false).unwrap_err();
        assert_eq!(
            err,
            InlineError::UnbalancedIndirectCapture {
                function: "f".to_string(),
                value: captures[0].0,
            }
        );
        assert_eq!(body.instruction_count(), before);
    }

    #[test]
    fn test_inout_address_capture_is_skipped() {
        let (mut body, call, pa, captures) = closure_call(&[ParamConvention::IndirectInout], true);
        let inserted = balance_reference_counts(&mut body, "f", call, pa, &captures, false).unwrap();
        assert_eq!(inserted, 1);
    }
}
