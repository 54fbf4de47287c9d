//! Recursive mandatory inliner
//!
//! `InliningEngine::process` flattens every must-inline call in a function,
//! processing each callee first so it is spliced in already flattened.
//! Blocks are visited from last to first and instructions from last to
//! first: splicing splits the current block after the call, so everything
//! past the call has already been seen and only the freshly cloned blocks
//! need visiting. The walk resumes at the last cloned block.

use super::balance::balance_reference_counts;
use super::cleanup::ClosureCleanup;
use super::devirt::Devirtualizer;
use super::resolve::resolve_callee;
use crate::diagnostic::{DiagnosticSink, InlineDiagnostic};
use crate::error::{InlineError, InlineResult};
use crate::stats::InlineStats;
use ossa_ir::{FunctionBody, FunctionId, Inliner, InstrId, IrError, IrModule, NoopObserver, Span};
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

/// Outcome of processing a function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineStatus {
    /// Every inlinable must-inline call has been inlined
    Complete,
    /// A circular must-inline dependency was found below this function
    Cycle,
}

/// Functions currently being processed, innermost first. Each frame lives
/// on the Rust stack of the `process` call that pushed it, so a frame is
/// popped on every exit path.
#[derive(Debug, Clone, Copy)]
pub struct InliningStack<'a> {
    func: FunctionId,
    parent: Option<&'a InliningStack<'a>>,
}

impl<'a> InliningStack<'a> {
    pub fn new(func: FunctionId, parent: Option<&'a InliningStack<'a>>) -> Self {
        Self { func, parent }
    }

    pub fn contains(&self, func: FunctionId) -> bool {
        let mut frame = Some(self);
        while let Some(f) = frame {
            if f.func == func {
                return true;
            }
            frame = f.parent;
        }
        false
    }

    pub fn depth(&self) -> usize {
        1 + self.parent.map_or(0, |p| p.depth())
    }
}

/// The call that led to processing a function
#[derive(Debug, Clone)]
pub struct CallSite {
    /// Function containing the call
    pub caller: String,
    pub span: Option<Span>,
}

/// State shared by one run over a module
pub struct InliningEngine<'a> {
    module: &'a mut IrModule,
    devirtualizer: &'a mut dyn Devirtualizer,
    diagnostics: &'a mut DiagnosticSink,
    stats: &'a mut InlineStats,
    fully_inlined: &'a mut FxHashSet<FunctionId>,
    inliner: Inliner,
}

impl<'a> InliningEngine<'a> {
    pub fn new(
        module: &'a mut IrModule,
        devirtualizer: &'a mut dyn Devirtualizer,
        diagnostics: &'a mut DiagnosticSink,
        stats: &'a mut InlineStats,
        fully_inlined: &'a mut FxHashSet<FunctionId>,
    ) -> Self {
        Self {
            module,
            devirtualizer,
            diagnostics,
            stats,
            fully_inlined,
            inliner: Inliner::new(),
        }
    }

    /// Inline all must-inline calls in `func`.
    ///
    /// `site` is the call that required processing `func` (`None` at top
    /// level) and `stack` the functions being processed above it.
    pub fn process(
        &mut self,
        func: FunctionId,
        site: Option<&CallSite>,
        stack: Option<&InliningStack<'_>>,
    ) -> InlineResult<InlineStatus> {
        if self.fully_inlined.contains(&func) {
            return Ok(InlineStatus::Complete);
        }

        if stack.is_some_and(|s| s.contains(func)) {
            let (caller, span) = match site {
                Some(site) => (site.caller.clone(), site.span),
                None => (self.function_name(func)?, None),
            };
            debug!(function = %caller, "circular must-inline dependency");
            self.diagnostics.push(InlineDiagnostic::circular(caller, span));
            self.stats.cycles_reported += 1;
            return Ok(InlineStatus::Cycle);
        }

        let frame = InliningStack::new(func, stack);
        let Some(mut body) = self.module.check_out_body(func)? else {
            // Declarations contain no calls.
            self.fully_inlined.insert(func);
            return Ok(InlineStatus::Complete);
        };

        let result = self.process_body(func, &mut body, site, &frame);
        self.module.check_in_body(func, body)?;

        let status = result?;
        if status == InlineStatus::Complete {
            self.fully_inlined.insert(func);
        }
        Ok(status)
    }

    fn process_body(
        &mut self,
        func: FunctionId,
        body: &mut FunctionBody,
        site: Option<&CallSite>,
        frame: &InliningStack<'_>,
    ) -> InlineResult<InlineStatus> {
        let caller_name = self.function_name(func)?;
        trace!(function = %caller_name, depth = frame.depth(), "processing");

        let mut cursor = body.last_block();
        'blocks: while let Some(block) = cursor {
            let mut idx = body.block(block).map_or(0, |b| b.len());

            while idx > 0 {
                idx -= 1;
                let Some(&instr) = body.block(block).and_then(|b| b.instructions.get(idx)) else {
                    continue;
                };
                if !body.op(instr).is_some_and(|op| op.is_apply()) {
                    continue;
                }

                let Some(call) = self.devirtualize(body, instr)? else {
                    idx = idx.min(body.block(block).map_or(0, |b| b.len()));
                    continue;
                };
                if call != instr {
                    let Some(position) = body.block(block).and_then(|b| b.position(call)) else {
                        idx = idx.min(body.block(block).map_or(0, |b| b.len()));
                        continue;
                    };
                    idx = position;
                }

                let Some(resolved) = resolve_callee(self.module, func, body, call)? else {
                    continue;
                };

                let call_site = CallSite {
                    caller: caller_name.clone(),
                    span: body.instr(call).and_then(|node| node.span),
                };
                if self.process(resolved.callee, Some(&call_site), Some(frame))?
                    == InlineStatus::Cycle
                {
                    if let Some(site) = site {
                        self.diagnostics
                            .push(InlineDiagnostic::while_inlining(site.caller.clone(), site.span));
                    }
                    return Ok(InlineStatus::Cycle);
                }

                let callee_fn = self
                    .module
                    .function(resolved.callee)
                    .ok_or(IrError::UnknownFunction(resolved.callee))?;
                let callee_body = callee_fn
                    .body()
                    .ok_or_else(|| InlineError::MissingCalleeBody(callee_fn.name.clone()))?;
                if !self
                    .inliner
                    .can_inline(body, call, callee_body, &resolved.args)
                {
                    trace!(callee = %callee_fn.name, "call site cannot be inlined");
                    continue;
                }

                debug!(callee = %callee_fn.name, caller = %caller_name, "inlining");

                if resolved.is_thick {
                    let context_guaranteed = resolved
                        .partial_apply
                        .and_then(|pa| body.result(pa))
                        .and_then(|closure| body.value_type(closure).as_function())
                        .is_some_and(|ty| ty.callee_guaranteed);
                    balance_reference_counts(
                        body,
                        &caller_name,
                        call,
                        resolved.callee_value,
                        &resolved.captures,
                        context_guaranteed,
                    )?;
                }

                let mut cleanup = ClosureCleanup::new();
                let splice = self.inliner.inline_function(
                    body,
                    callee_body,
                    call,
                    &resolved.args,
                    &mut cleanup,
                )?;
                cleanup.run(body)?;
                trace!(erased = cleanup.erased(), "closure cleanup");
                self.stats.inlined_call_sites += 1;

                // Resume at the last cloned block.
                cursor = Some(splice.last_block);
                continue 'blocks;
            }
            cursor = body.prev_block(block);
        }

        Ok(InlineStatus::Complete)
    }

    /// Offer `call` to the devirtualizer. Returns the call to continue with,
    /// or `None` when the rewritten form is no call in this block.
    fn devirtualize(&mut self, body: &mut FunctionBody, call: InstrId) -> InlineResult<Option<InstrId>> {
        let block = body.instr(call).ok_or(IrError::UnknownInstr(call))?.block;
        let Some(new_call) = self.devirtualizer.try_devirtualize(self.module, body, call)? else {
            return Ok(Some(call));
        };
        self.stats.devirtualized_call_sites += 1;

        if let (Some(old), Some(new)) = (body.result(call), body.result(new_call)) {
            body.replace_all_uses(old, new);
        }
        let producer = body
            .op(call)
            .and_then(|op| op.callee())
            .and_then(|callee| body.defining_instr(callee));
        body.erase_instr(call, &mut NoopObserver)?;
        if let Some(producer) = producer {
            body.erase_trivially_dead(producer, &mut NoopObserver)?;
        }

        match body.instr(new_call) {
            Some(node) if node.block == block && node.op.is_apply() => Ok(Some(new_call)),
            _ => Ok(None),
        }
    }

    fn function_name(&self, func: FunctionId) -> InlineResult<String> {
        Ok(self
            .module
            .function(func)
            .ok_or(IrError::UnknownFunction(func))?
            .name
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_contains_parents() {
        let root = InliningStack::new(FunctionId(0), None);
        let child = InliningStack::new(FunctionId(1), Some(&root));
        let sibling = InliningStack::new(FunctionId(2), Some(&root));

        assert!(child.contains(FunctionId(0)));
        assert!(child.contains(FunctionId(1)));
        assert!(!child.contains(FunctionId(2)));
        assert!(sibling.contains(FunctionId(2)));
        assert!(!root.contains(FunctionId(1)));
        assert_eq!(child.depth(), 2);
    }
}
