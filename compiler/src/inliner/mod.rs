//! Call-Site Inliner
//!
//! Inlines callees into a root flow graph one depth at a time:
//!
//! 1. the catalogue collects the calls sitting at the current depth
//! 2. early heuristics reject on cached statistics
//! 3. the callee graph is acquired, seeded with constant actuals and optimized
//! 4. late heuristics measure the optimized callee
//! 5. the splicer (or the polymorphic dispatch builder) wires it in
//!
//! Calls that came from bodies inlined at depth `d` are considered at depth
//! `d + 1`, until the depth limit, the caller growth ceiling or a fixed point
//! is reached. Every decision lands in an `InliningTrace`.
//!
//! A background-compilation abort during acquisition restores the graph to
//! its state before the depth iteration and ends the run with `InlineAbort`.

pub mod acquisition;
pub mod call_sites;
pub mod error;
pub mod heuristics;
pub mod polymorphic;
pub mod recognized;
pub mod splicer;
pub mod substitution;
pub mod trace;

pub use acquisition::{CalleeGraphCache, CalleeOptimizer, FrontEnd, FunctionRegistry, NoOptimization};
pub use call_sites::{CallKind, CallSiteCatalogue, CallSiteInfo};
pub use error::{AcquisitionError, AttemptFailure, BailoutReason, HeuristicPhase, InlineAbort};
pub use heuristics::GraphStats;
pub use trace::{InliningTrace, TraceOutcome, TraceRecord};

use crate::config::InliningConfig;
use crate::ir::optimization::PassManager;
use crate::ir::{CallInfo, CidRange, FunctionId, FunctionInfo, IrFunction, IrId, IrInstruction};
use heuristics::EarlyContext;
use log::{debug, info};
use rayon::prelude::*;
use recognized::TemplateOutcome;
use serde::{Deserialize, Serialize};
use splicer::ReceiverRefinement;
use substitution::StubSource;

/// Outcome of one driver run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InliningSummary {
    /// Bodies spliced in (a shared polymorphic body counts once)
    pub inlined: usize,
    /// Calls replaced by recognized-method templates
    pub recognized: usize,
    pub rejected: usize,
    /// Deepest depth at which something was inlined
    pub max_depth: u32,
    pub initial_instructions: usize,
    pub final_instructions: usize,
}

impl InliningSummary {
    pub fn growth_factor(&self) -> f64 {
        if self.initial_instructions == 0 {
            return 1.0;
        }
        self.final_instructions as f64 / self.initial_instructions as f64
    }
}

enum Optimizer<'a> {
    Pipeline(PassManager),
    Custom(&'a dyn CalleeOptimizer),
}

impl Optimizer<'_> {
    fn get(&self) -> &dyn CalleeOptimizer {
        match self {
            Optimizer::Pipeline(pipeline) => pipeline,
            Optimizer::Custom(custom) => *custom,
        }
    }
}

/// A callee accepted by every heuristic, ready to be spliced
pub(crate) struct PreparedCallee<'a> {
    pub(crate) info: &'a FunctionInfo,
    pub(crate) graph: IrFunction,
    pub(crate) sources: Vec<StubSource>,
    pub(crate) stats: GraphStats,
    pub(crate) recursive: bool,
}

/// Counters saved before a depth iteration so an abort can roll them back
#[derive(Clone)]
struct Checkpoint {
    graph: IrFunction,
    trace_len: usize,
    growth: usize,
    recursive_inlines: u32,
    summary: InliningSummary,
}

/// Inliner for one root graph
pub struct FlowGraphInliner<'a> {
    config: &'a InliningConfig,
    registry: &'a dyn FunctionRegistry,
    front_end: &'a dyn FrontEnd,
    optimizer: Optimizer<'a>,
    cache: CalleeGraphCache,
    catalogue: CallSiteCatalogue,
    trace: InliningTrace,
    /// Instructions inlined into the caller so far
    growth: usize,
    recursive_inlines: u32,
    summary: InliningSummary,
}

impl<'a> FlowGraphInliner<'a> {
    pub fn new(
        config: &'a InliningConfig,
        registry: &'a dyn FunctionRegistry,
        front_end: &'a dyn FrontEnd,
    ) -> Self {
        Self {
            config,
            registry,
            front_end,
            optimizer: Optimizer::Pipeline(PassManager::default_pipeline()),
            cache: CalleeGraphCache::new(),
            catalogue: CallSiteCatalogue::new(),
            trace: InliningTrace::new(),
            growth: 0,
            recursive_inlines: 0,
            summary: InliningSummary::default(),
        }
    }

    /// Use `optimizer` on callee graphs instead of the default pipeline
    pub fn with_optimizer(mut self, optimizer: &'a dyn CalleeOptimizer) -> Self {
        self.optimizer = Optimizer::Custom(optimizer);
        self
    }

    pub fn trace(&self) -> &InliningTrace {
        &self.trace
    }

    pub fn into_trace(self) -> InliningTrace {
        self.trace
    }

    pub fn cache(&self) -> &CalleeGraphCache {
        &self.cache
    }

    /// Inline into `graph` until no depth makes progress.
    ///
    /// Records the deepest inlining on the caller's statistics.
    pub fn inline(&mut self, graph: &mut IrFunction) -> Result<InliningSummary, InlineAbort> {
        self.summary.initial_instructions = graph.instruction_count();
        graph.cfg.discover_blocks();

        if self.config.enabled {
            let max_depth = self.config.depth_threshold + 1;
            for depth in 1..=max_depth {
                let span = tracing::debug_span!("inline_depth", depth, caller = %graph.name);
                let _enter = span.enter();

                self.catalogue.collect(graph, depth);
                if self.catalogue.is_empty() {
                    break;
                }
                for site in self.catalogue.apply_budget(self.config.max_call_sites_per_depth) {
                    self.reject(graph, &site, site.target, BailoutReason::CallSiteBudgetExceeded);
                }

                let checkpoint = self.checkpoint(graph);
                if let Err(abort) = self.inline_depth(graph, depth) {
                    self.restore(graph, checkpoint);
                    info!("{}: {}", graph.name, abort);
                    return Err(abort);
                }
            }
        }

        if let Some(info) = self.registry.function(graph.function) {
            info.stats.set_inlining_depth(self.summary.max_depth);
        }
        self.summary.final_instructions = graph.instruction_count();
        info!(
            "{}: inlined {} bodies and {} templates, rejected {}, depth {}, {} -> {} instructions",
            graph.name,
            self.summary.inlined,
            self.summary.recognized,
            self.summary.rejected,
            self.summary.max_depth,
            self.summary.initial_instructions,
            self.summary.final_instructions
        );
        Ok(self.summary.clone())
    }

    fn checkpoint(&self, graph: &IrFunction) -> Checkpoint {
        Checkpoint {
            graph: graph.clone(),
            trace_len: self.trace.len(),
            growth: self.growth,
            recursive_inlines: self.recursive_inlines,
            summary: self.summary.clone(),
        }
    }

    fn restore(&mut self, graph: &mut IrFunction, checkpoint: Checkpoint) {
        *graph = checkpoint.graph;
        self.trace.truncate(checkpoint.trace_len);
        self.growth = checkpoint.growth;
        self.recursive_inlines = checkpoint.recursive_inlines;
        self.summary = checkpoint.summary;
    }

    fn inline_depth(&mut self, graph: &mut IrFunction, depth: u32) -> Result<(), InlineAbort> {
        debug!(
            "{}: depth {} with {} call sites",
            graph.name,
            depth,
            self.catalogue.len()
        );
        let sites = self.catalogue.current().clone();

        for site in &sites.static_calls {
            self.inline_direct_call(graph, site)?;
        }
        for site in &sites.closure_calls {
            self.inline_direct_call(graph, site)?;
        }
        for site in &sites.instance_calls {
            match site.kind {
                CallKind::Polymorphic => self.inline_polymorphic_call(graph, site)?,
                _ => self.inline_monomorphic_call(graph, site)?,
            }
        }
        Ok(())
    }

    fn abort(&self, graph: &IrFunction, site: &CallSiteInfo) -> InlineAbort {
        InlineAbort::BackgroundCompilation {
            caller: graph.function,
            depth: site.depth,
        }
    }

    fn call_info(graph: &IrFunction, site: &CallSiteInfo) -> Option<CallInfo> {
        let (block, index) = graph.locate_call(site.call_id)?;
        graph
            .cfg
            .get_block(block)?
            .instructions
            .get(index)?
            .call_info()
            .cloned()
    }

    fn callee_name(&self, target: Option<FunctionId>) -> String {
        match target.and_then(|t| self.registry.function(t)) {
            Some(info) => info.name.clone(),
            None => match target {
                Some(t) => t.to_string(),
                None => "<unknown>".to_string(),
            },
        }
    }

    pub(crate) fn record(
        &mut self,
        graph: &IrFunction,
        site: &CallSiteInfo,
        callee: Option<FunctionId>,
        outcome: TraceOutcome,
    ) -> usize {
        let parent = graph.frame(site.frame).and_then(|f| f.trace);
        let callee_name = self.callee_name(callee);
        self.trace.record(TraceRecord {
            parent,
            depth: site.depth,
            call_id: site.call_id,
            callee,
            callee_name,
            outcome,
        })
    }

    pub(crate) fn reject(
        &mut self,
        graph: &IrFunction,
        site: &CallSiteInfo,
        callee: Option<FunctionId>,
        reason: BailoutReason,
    ) {
        debug!(
            "{}: not inlining {} at {}: {}",
            graph.name,
            self.callee_name(callee),
            site.call_id,
            reason
        );
        self.summary.rejected += 1;
        self.record(graph, site, callee, TraceOutcome::Rejected(reason));
    }

    /// Run every admission step for `target` at `site` without touching the
    /// caller graph
    pub(crate) fn prepare_callee(
        &mut self,
        graph: &IrFunction,
        site: &CallSiteInfo,
        target: FunctionId,
        call: &CallInfo,
    ) -> Result<PreparedCallee<'a>, AttemptFailure> {
        let registry: &'a dyn FunctionRegistry = self.registry;
        let config = self.config;
        let info = registry
            .function(target)
            .ok_or_else(|| BailoutReason::ParseOrCompileError(format!("unknown function {}", target)))?;

        heuristics::check_hotness(info, site.ratio, config)?;
        heuristics::check_markers(info, config)?;
        let sources = substitution::bind_actuals(graph, info, call)?;
        let chain = graph.frame_chain(site.frame);
        let recursive = heuristics::check_recursion(&chain, target, self.recursive_inlines, config)?;
        heuristics::check_depth(info, site.depth, config)?;

        let constants = substitution::constant_actual_count(&sources);
        let context = EarlyContext {
            caller_growth: self.growth,
            constant_arguments: constants,
        };
        heuristics::early_decision(info, context, config)?;

        let mut callee = self.cache.acquire(self.front_end, info)?;
        substitution::seed_constants(&mut callee, &sources);
        self.optimizer.get().optimize(&mut callee);
        substitution::check_stubs(&callee, &sources)?;

        let stats = heuristics::collect_graph_stats(&callee);
        heuristics::late_decision(info, stats, constants, config)?;

        Ok(PreparedCallee {
            info,
            graph: callee,
            sources,
            stats,
            recursive,
        })
    }

    /// Bookkeeping after a body was accepted
    pub(crate) fn note_inlined(&mut self, prepared: &PreparedCallee<'_>, depth: u32) {
        self.growth += prepared.stats.instructions as usize;
        self.summary.inlined += 1;
        self.summary.max_depth = self.summary.max_depth.max(depth);
        if prepared.recursive {
            self.recursive_inlines += 1;
        }
        debug!(
            "inlining {} at depth {} ({} instructions)",
            prepared.info.name, depth, prepared.stats.instructions
        );
    }

    /// Splice an accepted callee over the call at `site`. Returns false
    /// (and traces a rejection) when the splice failed.
    fn commit(
        &mut self,
        graph: &mut IrFunction,
        site: &CallSiteInfo,
        prepared: PreparedCallee<'a>,
        receiver: Option<ReceiverRefinement>,
    ) -> bool {
        let record = self.record(
            graph,
            site,
            Some(prepared.info.id),
            TraceOutcome::Inlined {
                instructions: prepared.stats.instructions,
            },
        );
        let frame = graph.push_frame(prepared.info.id, site.frame, Some(record));
        match splicer::inline_call(graph, site.call_id, &prepared.graph, &prepared.sources, frame, receiver) {
            Ok(_) => {
                self.note_inlined(&prepared, site.depth);
                true
            }
            Err(reason) => {
                self.trace.truncate(record);
                self.reject(graph, site, Some(prepared.info.id), reason);
                false
            }
        }
    }

    /// Try a recognized-method template; true when the call was replaced
    fn try_recognized(
        &mut self,
        graph: &mut IrFunction,
        site: &CallSiteInfo,
        target: FunctionId,
        guard: Option<(IrId, CidRange)>,
    ) -> bool {
        let Some(method) = self.registry.function(target).and_then(|info| info.recognized) else {
            return false;
        };
        match recognized::try_inline_recognized(graph, site.call_id, method, self.config, guard) {
            TemplateOutcome::Applied { instructions } => {
                self.growth += instructions;
                self.summary.recognized += 1;
                self.record(graph, site, Some(target), TraceOutcome::Recognized);
                true
            }
            TemplateOutcome::Declined(reason) => {
                debug!("template for {:?} declined: {}", method, reason);
                false
            }
        }
    }

    /// Static and closure calls
    fn inline_direct_call(&mut self, graph: &mut IrFunction, site: &CallSiteInfo) -> Result<(), InlineAbort> {
        let Some(call) = Self::call_info(graph, site) else {
            return Ok(());
        };
        let Some(target) = site.target else {
            self.reject(graph, site, None, BailoutReason::early("closure target not known"));
            return Ok(());
        };
        if site.kind == CallKind::Static && self.try_recognized(graph, site, target, None) {
            return Ok(());
        }

        match self.prepare_callee(graph, site, target, &call) {
            Ok(prepared) => {
                self.commit(graph, site, prepared, None);
            }
            Err(AttemptFailure::Bailout(reason)) => self.reject(graph, site, Some(target), reason),
            Err(AttemptFailure::BackgroundAbort) => return Err(self.abort(graph, site)),
        }
        Ok(())
    }

    /// Instance call with a single feedback entry: guard the receiver class
    /// (unless the feedback is complete) and inline like a static call
    fn inline_monomorphic_call(&mut self, graph: &mut IrFunction, site: &CallSiteInfo) -> Result<(), InlineAbort> {
        let Some((block, index)) = graph.locate_call(site.call_id) else {
            return Ok(());
        };
        let Some(IrInstruction::InstanceCall { call, targets, .. }) = graph
            .cfg
            .get_block(block)
            .and_then(|b| b.instructions.get(index))
            .cloned()
        else {
            return Ok(());
        };
        let (Some(entry), Some(receiver)) = (targets.targets.first().cloned(), call.receiver()) else {
            return Ok(());
        };

        let guard = (!targets.complete).then_some((receiver, entry.cids));
        if self.try_recognized(graph, site, entry.target, guard) {
            return Ok(());
        }

        match self.prepare_callee(graph, site, entry.target, &call) {
            Ok(prepared) => {
                if let Some((value, cids)) = guard {
                    insert_class_guard(graph, site, value, cids);
                }
                let refinement = ReceiverRefinement {
                    index: prepared.info.signature.parameter_offset(),
                    refined: entry.cids.is_single().then_some(entry.cids.lo),
                };
                if !self.commit(graph, site, prepared, Some(refinement)) {
                    if let Some((value, cids)) = guard {
                        remove_class_guard(graph, site, value, cids);
                    }
                }
            }
            Err(AttemptFailure::Bailout(reason)) => self.reject(graph, site, Some(entry.target), reason),
            Err(AttemptFailure::BackgroundAbort) => return Err(self.abort(graph, site)),
        }
        Ok(())
    }
}

/// Deoptimizing class check placed right before the call at `site`
fn insert_class_guard(graph: &mut IrFunction, site: &CallSiteInfo, value: IrId, cids: CidRange) {
    if let Some((block, index)) = graph.locate_call(site.call_id) {
        if let Some(block) = graph.cfg.get_block_mut(block) {
            block
                .instructions
                .insert(index, IrInstruction::CheckClassId { value, cids });
        }
    }
}

/// Undo `insert_class_guard` when the guarded call was left in place
fn remove_class_guard(graph: &mut IrFunction, site: &CallSiteInfo, value: IrId, cids: CidRange) {
    let Some((block, index)) = graph.locate_call(site.call_id) else {
        return;
    };
    let Some(block) = graph.cfg.get_block_mut(block) else {
        return;
    };
    let Some(guard) = index.checked_sub(1) else {
        return;
    };
    let ours = matches!(
        block.instructions.get(guard),
        Some(IrInstruction::CheckClassId { value: v, cids: c }) if *v == value && *c == cids
    );
    if ours {
        block.instructions.remove(guard);
    }
}

/// Inline into several independent callers on the rayon pool.
///
/// Each caller gets its own inliner, callee cache and trace; only the
/// function statistics are shared.
pub fn inline_all_parallel(
    graphs: &mut [IrFunction],
    config: &InliningConfig,
    registry: &dyn FunctionRegistry,
    front_end: &dyn FrontEnd,
) -> Vec<Result<(InliningSummary, InliningTrace), InlineAbort>> {
    graphs
        .par_iter_mut()
        .map(|graph| {
            let mut inliner = FlowGraphInliner::new(config, registry, front_end);
            let summary = inliner.inline(graph)?;
            Ok((summary, inliner.into_trace()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::dump::dump_function;
    use crate::ir::{ClassId, InlineFrameId, IrBuilder, TargetInfo, TargetSet};

    fn guarded_call() -> (IrFunction, CallSiteInfo, IrId) {
        let mut b = IrBuilder::new(FunctionId(0), "main");
        let p = b.build_parameter(0);
        let targets = TargetSet::new(vec![TargetInfo {
            cids: CidRange::single(ClassId(16)),
            target: FunctionId(1),
            count: 10,
        }]);
        let r = b.build_instance_call("x", &[p], targets);
        b.build_return(Some(r));
        let call_id = b.call_id_of(r).unwrap();
        let graph = b.finish();
        let (block, _) = graph.locate_call(call_id).unwrap();
        let site = CallSiteInfo {
            call_id,
            kind: CallKind::Instance,
            block,
            frame: InlineFrameId::ROOT,
            depth: 1,
            nesting_depth: 0,
            count: 1,
            ratio: 1.0,
            target: Some(FunctionId(1)),
        };
        (graph, site, p)
    }

    #[test]
    fn test_class_guard_removed_when_call_stays() {
        let (mut graph, site, receiver) = guarded_call();
        let before = dump_function(&graph);
        let cids = CidRange::single(ClassId(16));

        insert_class_guard(&mut graph, &site, receiver, cids);
        let (block, index) = graph.locate_call(site.call_id).unwrap();
        assert!(matches!(
            graph.cfg.get_block(block).unwrap().instructions[index - 1],
            IrInstruction::CheckClassId { .. }
        ));

        remove_class_guard(&mut graph, &site, receiver, cids);
        assert_eq!(dump_function(&graph), before);
    }

    #[test]
    fn test_unrelated_class_check_is_kept() {
        let (mut graph, site, receiver) = guarded_call();
        insert_class_guard(&mut graph, &site, receiver, CidRange::single(ClassId(16)));
        let with_guard = dump_function(&graph);

        remove_class_guard(&mut graph, &site, receiver, CidRange::single(ClassId(17)));
        assert_eq!(dump_function(&graph), with_guard);
    }

    #[test]
    fn test_summary_growth_factor() {
        let summary = InliningSummary {
            initial_instructions: 10,
            final_instructions: 25,
            ..Default::default()
        };
        assert_eq!(summary.growth_factor(), 2.5);
        assert_eq!(InliningSummary::default().growth_factor(), 1.0);
    }
}
