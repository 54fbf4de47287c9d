//! Module-level mandatory inlining pass

use super::devirt::{Devirtualizer, VTableDevirtualizer};
use super::engine::{InlineStatus, InliningEngine};
use crate::diagnostic::{DiagnosticSink, InlineDiagnostic};
use crate::error::InlineResult;
use crate::options::MandatoryInlineOptions;
use crate::stats::InlineStats;
use ossa_ir::{merge_basic_blocks, FunctionId, FunctionRepr, IrError, IrInstr, IrModule};
use rustc_hash::FxHashSet;
use tracing::debug;

/// Receives the functions whose analyses are stale after the pass
pub trait AnalysisInvalidator {
    fn invalidate(&mut self, func: FunctionId);
}

/// Invalidator for pipelines without cached analyses
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidator;

impl AnalysisInvalidator for NoopInvalidator {
    fn invalidate(&mut self, _func: FunctionId) {}
}

impl<F> AnalysisInvalidator for F
where
    F: FnMut(FunctionId),
{
    fn invalidate(&mut self, func: FunctionId) {
        self(func)
    }
}

/// Mandatory inlining pass
///
/// Inlines every call to a must-inline function, reports circular
/// must-inline dependencies and removes must-inline functions that are no
/// longer referenced.
pub struct MandatoryInlining {
    options: MandatoryInlineOptions,
    devirtualizer: Box<dyn Devirtualizer>,
    diagnostics: DiagnosticSink,
    stats: InlineStats,
    fully_inlined: FxHashSet<FunctionId>,
}

impl MandatoryInlining {
    pub fn new(options: MandatoryInlineOptions) -> Self {
        Self {
            options,
            devirtualizer: Box::new(VTableDevirtualizer::new()),
            diagnostics: DiagnosticSink::new(),
            stats: InlineStats::default(),
            fully_inlined: FxHashSet::default(),
        }
    }

    /// Replace the devirtualizer consulted before resolving each call
    pub fn with_devirtualizer(mut self, devirtualizer: impl Devirtualizer + 'static) -> Self {
        self.devirtualizer = Box::new(devirtualizer);
        self
    }

    pub fn options(&self) -> &MandatoryInlineOptions {
        &self.options
    }

    /// Diagnostics recorded so far
    pub fn diagnostics(&self) -> &[InlineDiagnostic] {
        self.diagnostics.diagnostics()
    }

    pub fn diagnostic_sink(&self) -> &DiagnosticSink {
        &self.diagnostics
    }

    /// Drain the recorded diagnostics
    pub fn take_diagnostics(&mut self) -> Vec<InlineDiagnostic> {
        self.diagnostics.take()
    }

    /// Counters accumulated over every run of this pass
    pub fn stats(&self) -> InlineStats {
        self.stats
    }

    /// Run the pass over `module` without analysis invalidation
    pub fn run_module(&mut self, module: &mut IrModule) -> InlineResult<InlineStats> {
        self.run(module, &mut NoopInvalidator)
    }

    /// Run the pass over `module`.
    ///
    /// Returns the counters of this run. An `Err` is an internal invariant
    /// violation and leaves the module partially transformed; circular
    /// dependencies are reported as diagnostics instead.
    pub fn run(
        &mut self,
        module: &mut IrModule,
        invalidator: &mut dyn AnalysisInvalidator,
    ) -> InlineResult<InlineStats> {
        let mut run_stats = InlineStats::default();
        self.fully_inlined.clear();

        for id in module.function_ids() {
            let Some(func) = module.function(id) else {
                continue;
            };
            if func.attrs.is_thunk || func.attrs.deserialized_canonical {
                continue;
            }
            self.process_with(module, id, &mut run_stats)?;

            let func = module.function_mut(id).ok_or(IrError::UnknownFunction(id))?;
            if let Some(body) = func.body_mut() {
                if self.options.merge_blocks {
                    merge_basic_blocks(body)?;
                }
                if self.options.verify {
                    body.verify()?;
                }
            }
        }

        if !self.options.preserve_for_serialization {
            run_stats.dead_functions_erased = erase_dead_functions(module, invalidator)?;
        }

        debug!(
            module = %module.name,
            inlined = run_stats.inlined_call_sites,
            devirtualized = run_stats.devirtualized_call_sites,
            cycles = run_stats.cycles_reported,
            erased = run_stats.dead_functions_erased,
            "mandatory inlining finished"
        );
        self.stats.accumulate(&run_stats);
        Ok(run_stats)
    }

    /// Inline every must-inline call in a single function
    pub fn process_function(&mut self, module: &mut IrModule, id: FunctionId) -> InlineResult<InlineStatus> {
        let mut run_stats = InlineStats::default();
        let status = self.process_with(module, id, &mut run_stats)?;
        self.stats.accumulate(&run_stats);
        Ok(status)
    }

    fn process_with(
        &mut self,
        module: &mut IrModule,
        id: FunctionId,
        stats: &mut InlineStats,
    ) -> InlineResult<InlineStatus> {
        let mut engine = InliningEngine::new(
            module,
            &mut *self.devirtualizer,
            &mut self.diagnostics,
            stats,
            &mut self.fully_inlined,
        );
        engine.process(id, None, None)
    }
}

impl Default for MandatoryInlining {
    fn default() -> Self {
        Self::new(MandatoryInlineOptions::default())
    }
}

/// Invalidate every function and erase must-inline functions left without
/// references. Returns the number of erased functions.
fn erase_dead_functions(
    module: &mut IrModule,
    invalidator: &mut dyn AnalysisInvalidator,
) -> InlineResult<usize> {
    let mut counts = module.reference_counts();
    let mut erased = 0;

    for id in module.function_ids() {
        invalidator.invalidate(id);

        let Some(func) = module.function(id) else {
            continue;
        };
        let referenced = counts.get(&id).copied().unwrap_or(0) > 0;
        if !func.attrs.must_inline
            || referenced
            || func.attrs.externally_visible
            || func.attrs.foreign_dispatched
            || func.ty.repr == FunctionRepr::ObjCMethod
        {
            continue;
        }

        let func = module.erase_function(id)?;
        debug!(function = %func.name, "erasing dead must-inline function");
        erased += 1;

        // References held by the erased body go away with it.
        if let Some(body) = func.body() {
            for (_, node) in body.instructions() {
                if let IrInstr::FunctionRef { func: target } = node.op {
                    if let Some(count) = counts.get_mut(&target) {
                        *count = count.saturating_sub(1);
                    }
                }
            }
        }
    }
    Ok(erased)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ossa_ir::{FunctionBody, FunctionBuilder, FunctionType, IrFunction};

    fn leaf(name: &str, must_inline: bool) -> IrFunction {
        let mut body = FunctionBody::new();
        FunctionBuilder::new(&mut body).ret(None).unwrap();
        let mut func = IrFunction::with_body(name, FunctionType::thin(vec![], None), body);
        func.attrs.must_inline = must_inline;
        func
    }

    #[test]
    fn test_unreferenced_must_inline_functions_are_erased() {
        let mut module = IrModule::new("test");
        let dead = module.add_function(leaf("dead", true));
        let mut visible = leaf("visible", true);
        visible.attrs.externally_visible = true;
        let visible = module.add_function(visible);
        let plain = module.add_function(leaf("plain", false));

        let mut invalidated = Vec::new();
        let mut invalidator = |id: FunctionId| invalidated.push(id);
        let stats = MandatoryInlining::default()
            .run(&mut module, &mut invalidator)
            .unwrap();

        assert_eq!(stats.dead_functions_erased, 1);
        assert!(module.function(dead).is_none());
        assert!(module.function(visible).is_some());
        assert!(module.function(plain).is_some());
        assert_eq!(invalidated, vec![dead, visible, plain]);
    }

    #[test]
    fn test_erasure_releases_references_of_erased_body() {
        let ty = FunctionType::thin(vec![], None);
        let mut module = IrModule::new("test");
        let inner = module.add_function(leaf("inner", true));

        // `outer` only takes the address of `inner`, so nothing is inlined.
        let mut body = FunctionBody::new();
        let mut b = FunctionBuilder::new(&mut body);
        b.function_ref(inner, &ty).unwrap();
        b.ret(None).unwrap();
        let mut outer = IrFunction::with_body("outer", ty, body);
        outer.attrs.must_inline = true;
        let outer = module.add_function(outer);

        // `inner` is visited first while `outer` still references it.
        let stats = MandatoryInlining::default().run_module(&mut module).unwrap();
        assert_eq!(stats.dead_functions_erased, 1);
        assert!(module.function(outer).is_none());
        assert!(module.function(inner).is_some());
    }

    #[test]
    fn test_preserve_for_serialization_keeps_functions() {
        let mut module = IrModule::new("test");
        let dead = module.add_function(leaf("dead", true));
        let options = MandatoryInlineOptions {
            preserve_for_serialization: true,
            ..Default::default()
        };
        let stats = MandatoryInlining::new(options).run_module(&mut module).unwrap();
        assert_eq!(stats.dead_functions_erased, 0);
        assert!(module.function(dead).is_some());
    }
}
