//! Polymorphic Dispatch
//!
//! An instance call with several feedback entries is replaced by a class-id
//! test cascade. Variants are visited hottest first; each one is either
//! inlined or left to a residual `PolymorphicInstanceCall` whose target set
//! holds exactly the variants that were not inlined. Variants sharing a
//! target share one inlined body.
//!
//! ```text
//!   block:  cid = load_cid receiver
//!           br (cid == A) body_A, test_1
//!   test_1: br (cid - B_lo <=u B_hi - B_lo) body_B, residual
//!   residual: r = poly .selector(...)
//!   body_A, body_B, residual ──► continuation (phi of results)
//! ```

use super::error::{AttemptFailure, BailoutReason};
use super::splicer::{self, ExitCollector, ReceiverRefinement};
use super::trace::TraceOutcome;
use super::{CallSiteInfo, FlowGraphInliner, InlineAbort, PreparedCallee};
use crate::ir::{
    BinaryOp, CallInfo, CidRange, CompareOp, FunctionId, IrBlockId, IrFunction, IrId, IrInstruction,
    IrTerminator, IrValue, TargetInfo, TargetSet,
};
use fxhash::FxHashMap;
use log::{debug, trace};

/// Progress of one polymorphic call through the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PolyState {
    CollectingVariants,
    Partitioning,
    BuildingTree,
    Spliced,
}

/// Where a variant's class test jumps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlinedEntry {
    /// Body reached from a single test
    Unshared { entry: IrBlockId },
    /// Body reached from several tests; the entry acts as their join
    Shared { join: IrBlockId, predecessors: usize },
}

impl InlinedEntry {
    pub fn block(&self) -> IrBlockId {
        match self {
            InlinedEntry::Unshared { entry } => *entry,
            InlinedEntry::Shared { join, .. } => *join,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VariantDecision {
    /// Index into the accepted bodies
    Inline(usize),
    Residual,
}

struct AcceptedBody<'a> {
    prepared: PreparedCallee<'a>,
    trace: usize,
    /// Trace records of the variants that reuse this body
    shared_traces: Vec<usize>,
    /// Variants dispatching to this body
    variants: Vec<usize>,
}

/// The polymorphic call being replaced
struct DispatchSite {
    block: IrBlockId,
    index: usize,
    receiver: IrId,
    selector: String,
    call: CallInfo,
    complete: bool,
}

/// Driver counters touched while partitioning, restored if the tree
/// cannot be built
struct PartitionMark {
    growth: usize,
    recursive_inlines: u32,
    inlined: usize,
    max_depth: u32,
}

struct PolymorphicDispatch<'a> {
    state: PolyState,
    variants: Vec<TargetInfo>,
    decisions: Vec<VariantDecision>,
    bodies: Vec<AcceptedBody<'a>>,
}

impl<'a> PolymorphicDispatch<'a> {
    fn new(mut targets: TargetSet) -> Self {
        targets.sort_by_count();
        Self {
            state: PolyState::CollectingVariants,
            variants: targets.targets,
            decisions: Vec::new(),
            bodies: Vec::new(),
        }
    }

    fn advance(&mut self, next: PolyState) {
        debug_assert!(next > self.state, "{:?} -> {:?}", self.state, next);
        trace!("polymorphic dispatch: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn body_for(&self, target: FunctionId) -> Option<usize> {
        self.bodies.iter().position(|b| b.prepared.info.id == target)
    }

    fn has_residual(&self) -> bool {
        self.decisions.contains(&VariantDecision::Residual)
    }

    fn residual_targets(&self, complete: bool) -> TargetSet {
        let targets = self
            .variants
            .iter()
            .zip(&self.decisions)
            .filter(|(_, d)| **d == VariantDecision::Residual)
            .map(|(v, _)| v.clone())
            .collect();
        TargetSet { targets, complete }
    }
}

impl<'a> FlowGraphInliner<'a> {
    pub(super) fn inline_polymorphic_call(
        &mut self,
        graph: &mut IrFunction,
        site: &CallSiteInfo,
    ) -> Result<(), InlineAbort> {
        let Some((block, index)) = graph.locate_call(site.call_id) else {
            return Ok(());
        };
        let Some(IrInstruction::InstanceCall {
            selector, call, targets, ..
        }) = graph
            .cfg
            .get_block(block)
            .and_then(|b| b.instructions.get(index))
            .cloned()
        else {
            return Ok(());
        };
        let Some(receiver) = call.receiver() else {
            return Ok(());
        };
        let shape = DispatchSite {
            block,
            index,
            receiver,
            selector,
            complete: targets.complete,
            call,
        };
        let total = targets.aggregate_count();

        let mut dispatch = PolymorphicDispatch::new(targets);
        dispatch.advance(PolyState::Partitioning);
        let mark = self.partition_mark();
        self.partition_variants(graph, site, &shape.call, total, &mut dispatch)?;

        if dispatch.bodies.is_empty() {
            debug!("{}: no variant of .{} inlined", graph.name, shape.selector);
            return Ok(());
        }
        self.splice_dispatch(graph, site, &shape, dispatch, mark);
        Ok(())
    }

    fn partition_mark(&self) -> PartitionMark {
        PartitionMark {
            growth: self.growth,
            recursive_inlines: self.recursive_inlines,
            inlined: self.summary.inlined,
            max_depth: self.summary.max_depth,
        }
    }

    /// Build the tree for the partitioned variants. If the call cannot be
    /// split, the accepted bodies are traced as rejected and the counters
    /// they bumped are put back.
    fn splice_dispatch(
        &mut self,
        graph: &mut IrFunction,
        site: &CallSiteInfo,
        shape: &DispatchSite,
        mut dispatch: PolymorphicDispatch<'a>,
        mark: PartitionMark,
    ) {
        dispatch.advance(PolyState::BuildingTree);
        if self.build_dispatch_tree(graph, site, shape, &dispatch) {
            dispatch.advance(PolyState::Spliced);
            return;
        }

        self.growth = mark.growth;
        self.recursive_inlines = mark.recursive_inlines;
        self.summary.inlined = mark.inlined;
        self.summary.max_depth = mark.max_depth;
        let reason = BailoutReason::ParseOrCompileError(format!("cannot split at {}", site.call_id));
        for body in &dispatch.bodies {
            for index in std::iter::once(body.trace).chain(body.shared_traces.iter().copied()) {
                self.trace.set_outcome(index, TraceOutcome::Rejected(reason.clone()));
                self.summary.rejected += 1;
            }
        }
        debug!("{}: {}", graph.name, reason);
    }

    fn partition_variants(
        &mut self,
        graph: &IrFunction,
        site: &CallSiteInfo,
        call: &CallInfo,
        total: u64,
        dispatch: &mut PolymorphicDispatch<'a>,
    ) -> Result<(), InlineAbort> {
        let mut rejected: FxHashMap<FunctionId, BailoutReason> = FxHashMap::default();
        let variant_count = dispatch.variants.len();

        for idx in 0..variant_count {
            let variant = dispatch.variants[idx].clone();

            if let Some(body) = dispatch.body_for(variant.target) {
                let trace = self.record(graph, site, Some(variant.target), TraceOutcome::SharedBody);
                dispatch.bodies[body].variants.push(idx);
                dispatch.bodies[body].shared_traces.push(trace);
                dispatch.decisions.push(VariantDecision::Inline(body));
                continue;
            }
            if let Some(reason) = rejected.get(&variant.target).cloned() {
                dispatch.decisions.push(VariantDecision::Residual);
                self.reject(graph, site, Some(variant.target), reason);
                continue;
            }

            let try_harder = idx + 2 >= variant_count && rejected.is_empty();
            let small = self
                .registry
                .function(variant.target)
                .map(|info| info.stats.instruction_count() <= self.config.size_threshold)
                .unwrap_or(false);
            let checks = dispatch.bodies.len();

            let outcome = super::heuristics::check_polymorphic_variant(
                variant.count,
                total,
                small,
                try_harder,
                checks,
                self.config,
            )
            .map_err(AttemptFailure::from)
            .and_then(|()| self.prepare_callee(graph, site, variant.target, call));

            match outcome {
                Ok(prepared) => {
                    let trace = self.record(
                        graph,
                        site,
                        Some(variant.target),
                        TraceOutcome::Inlined {
                            instructions: prepared.stats.instructions,
                        },
                    );
                    self.note_inlined(&prepared, site.depth);
                    dispatch.decisions.push(VariantDecision::Inline(dispatch.bodies.len()));
                    dispatch.bodies.push(AcceptedBody {
                        prepared,
                        trace,
                        shared_traces: Vec::new(),
                        variants: vec![idx],
                    });
                }
                Err(AttemptFailure::Bailout(reason)) => {
                    rejected.insert(variant.target, reason.clone());
                    dispatch.decisions.push(VariantDecision::Residual);
                    self.reject(graph, site, Some(variant.target), reason);
                }
                Err(AttemptFailure::BackgroundAbort) => {
                    return Err(InlineAbort::BackgroundCompilation {
                        caller: graph.function,
                        depth: site.depth,
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns false, leaving `graph` untouched, when the call cannot be split
    fn build_dispatch_tree(
        &mut self,
        graph: &mut IrFunction,
        site: &CallSiteInfo,
        shape: &DispatchSite,
        dispatch: &PolymorphicDispatch<'a>,
    ) -> bool {
        let DispatchSite {
            block,
            index,
            receiver,
            ref selector,
            ref call,
            complete,
        } = *shape;
        let call_try = graph.cfg.get_block(block).and_then(|b| b.try_index);
        let Some((continuation, removed)) = splicer::split_block_at(graph, block, index) else {
            return false;
        };
        let result = removed.dest();

        let mut collector = ExitCollector::new();
        let mut entries = Vec::with_capacity(dispatch.bodies.len());
        for body in &dispatch.bodies {
            let info = body.prepared.info;
            let refined = match body.variants.as_slice() {
                [single] => {
                    let cids = dispatch.variants[*single].cids;
                    cids.is_single().then_some(cids.lo)
                }
                _ => None,
            };
            let frame = graph.push_frame(info.id, site.frame, Some(body.trace));
            let imported = splicer::import_callee(
                graph,
                &body.prepared.graph,
                &body.prepared.sources,
                frame,
                call_try,
                Some(ReceiverRefinement {
                    index: info.signature.parameter_offset(),
                    refined,
                }),
            );
            collector.add_body(&imported);
            entries.push(match body.variants.len() {
                1 => InlinedEntry::Unshared { entry: imported.entry },
                n => InlinedEntry::Shared {
                    join: imported.entry,
                    predecessors: n,
                },
            });
        }

        let class_id = graph.alloc_reg();
        push_instruction(
            graph,
            block,
            IrInstruction::LoadClassId {
                dest: class_id,
                object: receiver,
            },
        );

        let inlined: Vec<(usize, usize)> = dispatch
            .decisions
            .iter()
            .enumerate()
            .filter_map(|(variant, d)| match d {
                VariantDecision::Inline(body) => Some((variant, *body)),
                VariantDecision::Residual => None,
            })
            .collect();
        let has_residual = dispatch.has_residual();

        let mut current = block;
        for (position, (variant, body)) in inlined.iter().enumerate() {
            let cids = dispatch.variants[*variant].cids;
            let target = entries[*body].block();
            let last = position + 1 == inlined.len();

            if last && !has_residual {
                if !complete {
                    push_instruction(graph, current, IrInstruction::CheckClassId { value: receiver, cids });
                }
                set_terminator(graph, current, IrTerminator::Branch { target });
            } else {
                let condition = emit_class_test(graph, current, class_id, cids);
                let next = graph.cfg.create_block_in(call_try);
                set_terminator(
                    graph,
                    current,
                    IrTerminator::CondBranch {
                        condition,
                        true_target: target,
                        false_target: next,
                    },
                );
                current = next;
            }
        }

        if has_residual {
            let dest = graph.alloc_reg();
            let residual = dispatch.residual_targets(complete);
            debug!(
                "{}: {} variants of .{} left to the residual call",
                graph.name,
                residual.len(),
                selector
            );
            push_instruction(
                graph,
                current,
                IrInstruction::PolymorphicInstanceCall {
                    dest,
                    selector: selector.to_string(),
                    call: call.clone(),
                    targets: residual,
                },
            );
            collector.add(current, Some(dest));
        }

        let value = collector.join(graph, continuation);
        if let Some(result) = result {
            graph.replace_all_uses(result, value);
        }
        graph.cfg.discover_blocks();
        trace!(
            "{}: built dispatch over {} bodies for {}",
            graph.name,
            entries.len(),
            site.call_id
        );
        true
    }
}

fn push_instruction(graph: &mut IrFunction, block: IrBlockId, inst: IrInstruction) {
    if let Some(block) = graph.cfg.get_block_mut(block) {
        block.instructions.push(inst);
    }
}

fn set_terminator(graph: &mut IrFunction, block: IrBlockId, terminator: IrTerminator) {
    if let Some(block) = graph.cfg.get_block_mut(block) {
        block.terminator = terminator;
    }
}

/// Emit `class_id in cids` at the end of `block` and return the condition.
/// Ranges use one unsigned comparison: `class_id - lo <=u hi - lo`.
fn emit_class_test(graph: &mut IrFunction, block: IrBlockId, class_id: IrId, cids: CidRange) -> IrId {
    let lo = graph.get_or_insert_constant(IrValue::Int(cids.lo.0 as i64));
    let condition = graph.alloc_reg();
    if cids.is_single() {
        push_instruction(
            graph,
            block,
            IrInstruction::Cmp {
                dest: condition,
                op: CompareOp::Eq,
                left: class_id,
                right: lo,
            },
        );
        return condition;
    }

    let span = graph.get_or_insert_constant(IrValue::Int(cids.hi.0 as i64 - cids.lo.0 as i64));
    let offset = graph.alloc_reg();
    push_instruction(
        graph,
        block,
        IrInstruction::BinOp {
            dest: offset,
            op: BinaryOp::Sub,
            left: class_id,
            right: lo,
        },
    );
    push_instruction(
        graph,
        block,
        IrInstruction::Cmp {
            dest: condition,
            op: CompareOp::ULe,
            left: offset,
            right: span,
        },
    );
    condition
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InliningConfig;
    use crate::inliner::CallKind;
    use crate::ir::dump::dump_function;
    use crate::ir::{ClassId, FunctionInfo, InlineFrameId, IrBuilder, Signature};
    use crate::program::Program;

    fn target(cid: u32, function: u32, count: u64) -> TargetInfo {
        TargetInfo {
            cids: CidRange::single(ClassId(cid)),
            target: FunctionId(function),
            count,
        }
    }

    #[test]
    fn test_dispatch_sorts_variants_hottest_first() {
        let dispatch = PolymorphicDispatch::new(TargetSet::new(vec![
            target(10, 1, 2),
            target(11, 2, 90),
            target(12, 3, 8),
        ]));
        let counts: Vec<u64> = dispatch.variants.iter().map(|v| v.count).collect();
        assert_eq!(counts, vec![90, 8, 2]);
        assert_eq!(dispatch.state, PolyState::CollectingVariants);
    }

    #[test]
    fn test_residual_targets_keep_only_rejected_variants() {
        let mut dispatch = PolymorphicDispatch::new(TargetSet::new(vec![
            target(10, 1, 90),
            target(11, 2, 8),
            target(12, 3, 2),
        ]));
        dispatch.decisions = vec![
            VariantDecision::Inline(0),
            VariantDecision::Residual,
            VariantDecision::Residual,
        ];
        let residual = dispatch.residual_targets(false);
        let functions: Vec<FunctionId> = residual.targets.iter().map(|t| t.target).collect();
        assert_eq!(functions, vec![FunctionId(2), FunctionId(3)]);
        assert!(dispatch.has_residual());
    }

    #[test]
    fn test_class_range_test_uses_unsigned_compare() {
        let mut graph = IrFunction::new(FunctionId(0), "f");
        let entry = graph.entry_block();
        let cid = graph.alloc_reg();
        let cond = emit_class_test(&mut graph, entry, cid, CidRange::new(ClassId(20), ClassId(24)));

        let block = graph.cfg.get_block(entry).unwrap();
        let last = block.instructions.last().unwrap();
        assert!(matches!(
            last,
            IrInstruction::Cmp { dest, op: CompareOp::ULe, .. } if *dest == cond
        ));
        assert!(block
            .instructions
            .iter()
            .any(|i| matches!(i, IrInstruction::BinOp { op: BinaryOp::Sub, .. })));
        assert!(block
            .instructions
            .iter()
            .any(|i| matches!(i, IrInstruction::Const { value: IrValue::Int(4), .. })));
    }

    fn area_program() -> Program {
        let mut program = Program::new();
        for (id, name, factor) in [(1, "area_a", 2), (2, "area_b", 3)] {
            let mut b = IrBuilder::new(FunctionId(id), name);
            let this = b.build_parameter(0);
            let side = b.build_load_field(this, 0);
            let k = b.build_int(factor);
            let area = b.build_binop(BinaryOp::Mul, side, k);
            b.build_return(Some(area));
            program.define(FunctionInfo::new(FunctionId(id), name, Signature::fixed(1)), b.finish());
        }
        program
    }

    #[test]
    fn test_unsplittable_call_rolls_back_accepted_variants() {
        let program = area_program();
        let config = InliningConfig::default();
        let mut inliner = FlowGraphInliner::new(&config, &program, &program);

        let mut b = IrBuilder::new(FunctionId(0), "main");
        let p = b.build_parameter(0);
        let r = b.build_instance_call("area", &[p], TargetSet::new(vec![target(16, 1, 50), target(17, 2, 50)]));
        b.build_return(Some(r));
        let call_id = b.call_id_of(r).unwrap();
        let mut graph = b.finish();

        let (block, index) = graph.locate_call(call_id).unwrap();
        let IrInstruction::InstanceCall { call, targets, .. } =
            graph.cfg.get_block(block).unwrap().instructions[index].clone()
        else {
            panic!("expected an instance call");
        };
        let site = CallSiteInfo {
            call_id,
            kind: CallKind::Polymorphic,
            block,
            frame: InlineFrameId::ROOT,
            depth: 1,
            nesting_depth: 0,
            count: 1,
            ratio: 1.0,
            target: None,
        };
        let shape = DispatchSite {
            block,
            index: index + 40,
            receiver: p,
            selector: "area".to_string(),
            call: call.clone(),
            complete: false,
        };

        let total = targets.aggregate_count();
        let mut dispatch = PolymorphicDispatch::new(targets);
        dispatch.advance(PolyState::Partitioning);
        let mark = inliner.partition_mark();
        inliner
            .partition_variants(&graph, &site, &call, total, &mut dispatch)
            .unwrap();
        assert_eq!(dispatch.bodies.len(), 2);
        assert_eq!(inliner.summary.inlined, 2);

        let before = dump_function(&graph);
        inliner.splice_dispatch(&mut graph, &site, &shape, dispatch, mark);

        assert_eq!(dump_function(&graph), before);
        assert_eq!(inliner.summary.inlined, 0);
        assert_eq!(inliner.summary.max_depth, 0);
        assert_eq!(inliner.growth, 0);
        assert_eq!(inliner.trace.inlined_count(), 0);
        assert_eq!(inliner.trace.rejected_count(), 2);
    }

    #[test]
    fn test_shared_entry_reports_join() {
        let join = IrBlockId::new(7);
        let entry = InlinedEntry::Shared { join, predecessors: 2 };
        assert_eq!(entry.block(), join);
    }
}
