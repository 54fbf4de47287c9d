//! Function body splicing
//!
//! Replaces an `apply` with a copy of the callee's body. The call's block is
//! split after the call; the tail moves into a continuation block whose
//! parameter takes over the call's result. Callee blocks are cloned between
//! the two halves, entry parameters are bound directly to the arguments and
//! every `return` becomes a branch to the continuation.
//!
//! ```text
//! bb0:                          bb0:
//!   %r = apply %f(%a)             br bb3
//!   use %r                      bb3:                 ; cloned callee entry
//!   return                        ... %a ...
//!                                 br bb4(%x)
//!                               bb4(%r'):            ; continuation
//!                                 use %r'
//!                                 return
//! ```

use super::block::{BasicBlockId, Terminator};
use super::error::{IrError, IrResult};
use super::function::FunctionBody;
use super::instr::{InstrId, IrInstr};
use super::notify::DeleteObserver;
use super::value::ValueId;
use rustc_hash::{FxHashMap, FxHashSet};

/// Outcome of splicing a callee into a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineSplice {
    /// First instruction copied from the callee, if it had any
    pub first_inlined: Option<InstrId>,
    /// Last block holding copied callee code; everything after it in the
    /// layout was already present before the splice
    pub last_block: BasicBlockId,
}

/// Body splicer
#[derive(Debug, Default, Clone, Copy)]
pub struct Inliner;

impl Inliner {
    pub fn new() -> Self {
        Self
    }

    /// Check that `call` can be replaced by `callee` applied to `args`
    pub fn can_inline(
        &self,
        caller: &FunctionBody,
        call: InstrId,
        callee: &FunctionBody,
        args: &[ValueId],
    ) -> bool {
        if !matches!(caller.op(call), Some(IrInstr::Apply { .. })) {
            return false;
        }
        let Some(entry) = callee.entry_block().and_then(|b| callee.block(b)) else {
            return false;
        };
        entry.params.len() == args.len()
    }

    /// Splice `callee` in place of `call`, binding its entry parameters to
    /// `args`. The call is erased through `observer`.
    pub fn inline_function(
        &self,
        caller: &mut FunctionBody,
        callee: &FunctionBody,
        call: InstrId,
        args: &[ValueId],
        observer: &mut dyn DeleteObserver,
    ) -> IrResult<InlineSplice> {
        let node = caller.instr(call).ok_or(IrError::UnknownInstr(call))?;
        let call_block = node.block;
        let call_span = node.span;
        let call_result = node.result;
        let callee_entry = callee
            .entry_block()
            .ok_or_else(|| IrError::Verification("callee has no entry block".to_string()))?;

        let continuation = caller.split_block_after(call)?;
        if let Some(result) = call_result {
            let ty = caller.value_type(result).clone();
            let param = caller.add_block_param(continuation, ty)?;
            caller.replace_all_uses(result, param);
        }

        let order = reverse_post_order(callee, callee_entry);
        let reachable: FxHashSet<BasicBlockId> = order.iter().copied().collect();

        // Create blocks in callee layout order so the copy reads like the original.
        let mut block_map: FxHashMap<BasicBlockId, BasicBlockId> = FxHashMap::default();
        let mut value_map: FxHashMap<ValueId, ValueId> = FxHashMap::default();
        let mut prev = call_block;
        for cb in callee.layout() {
            if !reachable.contains(&cb) {
                continue;
            }
            let nb = caller.insert_block_after(prev)?;
            let Some(block) = callee.block(cb) else { continue };
            if cb == callee_entry {
                if block.params.len() != args.len() {
                    return Err(IrError::Verification(format!(
                        "callee entry takes {} argument(s), {} supplied",
                        block.params.len(),
                        args.len()
                    )));
                }
                value_map.extend(block.params.iter().copied().zip(args.iter().copied()));
            } else {
                for &param in &block.params {
                    let new_param = caller.add_block_param(nb, callee.value_type(param).clone())?;
                    value_map.insert(param, new_param);
                }
            }
            block_map.insert(cb, nb);
            prev = nb;
        }
        let last_block = prev;

        let map_value = |value_map: &FxHashMap<ValueId, ValueId>, v: ValueId| -> IrResult<ValueId> {
            value_map
                .get(&v)
                .copied()
                .ok_or_else(|| IrError::Verification(format!("callee value {} used before definition", v)))
        };

        let mut first_inlined = None;
        for &cb in &order {
            let Some(block) = callee.block(cb) else { continue };
            let nb = block_map[&cb];
            for &ci in &block.instructions {
                let Some(src) = callee.instr(ci) else { continue };
                let mut op = src.op.clone();
                let mut missing = None;
                op.for_each_operand_mut(|v| match value_map.get(v) {
                    Some(mapped) => *v = *mapped,
                    None => missing = Some(*v),
                });
                if let Some(v) = missing {
                    return Err(IrError::Verification(format!(
                        "callee value {} used before definition",
                        v
                    )));
                }
                let ty = src.result.map(|r| callee.value_type(r).clone());
                let new_id = caller.append_instr(nb, op, ty, src.span.or(call_span))?;
                if let (Some(old), Some(new)) = (src.result, caller.result(new_id)) {
                    value_map.insert(old, new);
                }
                if cb == callee_entry && first_inlined.is_none() {
                    first_inlined = Some(new_id);
                }
            }
        }

        for &cb in &order {
            let Some(block) = callee.block(cb) else { continue };
            let term = match &block.terminator {
                Terminator::Return(value) => Terminator::Branch {
                    target: continuation,
                    args: match (value, call_result) {
                        (Some(v), Some(_)) => vec![map_value(&value_map, *v)?],
                        _ => Vec::new(),
                    },
                },
                other => {
                    let mut term = other.clone();
                    let mut missing = None;
                    term.for_each_operand_mut(|v| match value_map.get(v) {
                        Some(mapped) => *v = *mapped,
                        None => missing = Some(*v),
                    });
                    if let Some(v) = missing {
                        return Err(IrError::Verification(format!(
                            "callee value {} used before definition",
                            v
                        )));
                    }
                    term.for_each_successor_mut(|b| {
                        if let Some(mapped) = block_map.get(b) {
                            *b = *mapped;
                        }
                    });
                    term
                }
            };
            caller.set_terminator(block_map[&cb], term)?;
        }

        caller.set_terminator(call_block, Terminator::jump(block_map[&callee_entry]))?;
        caller.erase_instr(call, observer)?;

        Ok(InlineSplice {
            first_inlined,
            last_block,
        })
    }
}

/// Blocks reachable from `entry`, definitions before uses
fn reverse_post_order(body: &FunctionBody, entry: BasicBlockId) -> Vec<BasicBlockId> {
    let mut visited = FxHashSet::default();
    let mut post = Vec::new();
    let mut stack: Vec<(BasicBlockId, usize)> = vec![(entry, 0)];
    visited.insert(entry);
    while let Some((block, next)) = stack.pop() {
        let succs = body.block(block).map(|b| b.successors()).unwrap_or_default();
        if next < succs.len() {
            stack.push((block, next + 1));
            let succ = succs[next];
            if visited.insert(succ) {
                stack.push((succ, 0));
            }
        } else {
            post.push(block);
        }
    }
    post.reverse();
    post
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::FunctionId;
    use crate::notify::NoopObserver;
    use crate::types::{FunctionType, IrType, Param};

    fn int_to_int() -> FunctionType {
        FunctionType::thin(vec![Param::owned(IrType::Int)], Some(IrType::Int))
    }

    /// callee(%x) { %y = builtin "inc"(%x); return %y }
    fn make_callee() -> FunctionBody {
        let mut body = FunctionBody::new();
        let bb0 = body.create_block();
        let x = body.add_block_param(bb0, IrType::Int).unwrap();
        let inc = body
            .append_instr(
                bb0,
                IrInstr::Builtin {
                    name: "inc".to_string(),
                    args: vec![x],
                },
                Some(IrType::Int),
                None,
            )
            .unwrap();
        let y = body.result(inc).unwrap();
        body.set_terminator(bb0, Terminator::Return(Some(y))).unwrap();
        body
    }

    /// caller { %a = 1; %f = @callee; %r = apply %f(%a); return %r }
    fn make_caller() -> (FunctionBody, InstrId, ValueId) {
        let mut body = FunctionBody::new();
        let bb0 = body.create_block();
        let lit = body
            .append_instr(bb0, IrInstr::IntLiteral { value: 1 }, Some(IrType::Int), None)
            .unwrap();
        let a = body.result(lit).unwrap();
        let fref = body
            .append_instr(
                bb0,
                IrInstr::FunctionRef { func: FunctionId(0) },
                Some(IrType::function(int_to_int())),
                None,
            )
            .unwrap();
        let f = body.result(fref).unwrap();
        let call = body
            .append_instr(bb0, IrInstr::Apply { callee: f, args: vec![a] }, Some(IrType::Int), None)
            .unwrap();
        let r = body.result(call).unwrap();
        body.set_terminator(bb0, Terminator::Return(Some(r))).unwrap();
        (body, call, a)
    }

    #[test]
    fn test_can_inline_checks_arity() {
        let callee = make_callee();
        let (caller, call, a) = make_caller();
        let inliner = Inliner::new();
        assert!(inliner.can_inline(&caller, call, &callee, &[a]));
        assert!(!inliner.can_inline(&caller, call, &callee, &[]));
    }

    #[test]
    fn test_inline_single_block_callee() {
        let callee = make_callee();
        let (mut caller, call, a) = make_caller();
        let inliner = Inliner::new();

        let mut erased = Vec::new();
        let mut observer = |_: &FunctionBody, id: InstrId| erased.push(id);
        let splice = inliner
            .inline_function(&mut caller, &callee, call, &[a], &mut observer)
            .unwrap();
        assert_eq!(erased, vec![call]);
        assert!(caller.instr(call).is_none());
        assert!(caller.verify().is_ok());

        // bb0 -> cloned entry -> continuation
        assert_eq!(caller.block_count(), 3);
        assert_eq!(caller.layout().nth(1).unwrap(), splice.last_block);

        let first = splice.first_inlined.unwrap();
        match caller.op(first) {
            Some(IrInstr::Builtin { name, args }) => {
                assert_eq!(name, "inc");
                assert_eq!(args, &vec![a]);
            }
            other => panic!("unexpected first inlined instruction {:?}", other),
        }

        let continuation = caller.layout().nth(2).unwrap();
        let param = caller.block(continuation).unwrap().params[0];
        assert_eq!(caller.terminator(continuation), Some(&Terminator::Return(Some(param))));
    }

    #[test]
    fn test_inline_multi_block_callee() {
        // callee(%x) { cond_br %x, bb1, bb2 ; bb1: br bb3(%x) ; bb2: %z = 0; br bb3(%z) ; bb3(%p): return %p }
        let mut callee = FunctionBody::new();
        let bb0 = callee.create_block();
        let bb1 = callee.create_block();
        let bb2 = callee.create_block();
        let bb3 = callee.create_block();
        let x = callee.add_block_param(bb0, IrType::Int).unwrap();
        let p = callee.add_block_param(bb3, IrType::Int).unwrap();
        callee
            .set_terminator(
                bb0,
                Terminator::CondBranch {
                    cond: x,
                    then_block: bb1,
                    then_args: vec![],
                    else_block: bb2,
                    else_args: vec![],
                },
            )
            .unwrap();
        callee
            .set_terminator(bb1, Terminator::Branch { target: bb3, args: vec![x] })
            .unwrap();
        let zero = callee
            .append_instr(bb2, IrInstr::IntLiteral { value: 0 }, Some(IrType::Int), None)
            .unwrap();
        let z = callee.result(zero).unwrap();
        callee
            .set_terminator(bb2, Terminator::Branch { target: bb3, args: vec![z] })
            .unwrap();
        callee.set_terminator(bb3, Terminator::Return(Some(p))).unwrap();
        assert!(callee.verify().is_ok());

        let (mut caller, call, a) = make_caller();
        let splice = Inliner::new()
            .inline_function(&mut caller, &callee, call, &[a], &mut NoopObserver)
            .unwrap();
        assert!(caller.verify().is_ok());
        assert_eq!(caller.block_count(), 6);
        assert_eq!(caller.layout_position(splice.last_block), Some(4));
        assert!(splice.first_inlined.is_none());
    }
}
