//! Admission Heuristics
//!
//! Decides whether a callee may be inlined at a call site. The early phase
//! runs before the callee is parsed and only sees cached statistics; the late
//! phase sees the optimized callee graph and measures it precisely. Both
//! phases write their conclusions back into the callee's `FunctionStats`.

use super::error::BailoutReason;
use crate::config::{CompilerMode, InliningConfig};
use crate::ir::{FunctionId, FunctionInfo, FunctionKind, InlineHint, IrFunction, IrInstruction};
use log::debug;
use serde::{Deserialize, Serialize};

/// Precise size of a graph as the heuristics see it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub instructions: u32,
    pub call_sites: u32,
}

/// Count the instructions that will produce code.
///
/// Parameters, constants and other pseudo-instructions are free. An
/// allocation costs one unit per initialized field.
pub fn collect_graph_stats(graph: &IrFunction) -> GraphStats {
    let mut stats = GraphStats::default();
    for block in graph.cfg.blocks.values() {
        for inst in &block.instructions {
            if inst.is_pseudo() {
                continue;
            }
            if let IrInstruction::Allocate { fields, .. } = inst {
                stats.instructions += fields.len() as u32;
                continue;
            }
            if inst.is_call() {
                stats.call_sites += 1;
            }
            stats.instructions += 1;
        }
    }
    stats
}

/// Callees inlined whenever the hard bailouts allow it.
///
/// `size` is the best known instruction count (0 if never measured).
pub fn is_always_inline(info: &FunctionInfo, size: u32, config: &InliningConfig) -> bool {
    if info.hint == InlineHint::Always {
        return true;
    }
    match info.kind {
        FunctionKind::Dispatcher
        | FunctionKind::ImplicitGetter
        | FunctionKind::ImplicitSetter
        | FunctionKind::ConstFieldGetter => true,
        FunctionKind::Getter | FunctionKind::Setter => size <= config.getter_setter_size_threshold,
        FunctionKind::Operator => size <= config.operator_size_threshold,
        _ => false,
    }
}

/// Dispatchers and accessors are exempt from the depth limit
fn is_depth_exempt(info: &FunctionInfo) -> bool {
    info.kind == FunctionKind::Dispatcher || info.kind.is_accessor()
}

/// Markers that rule a callee out regardless of its size
pub fn check_markers(info: &FunctionInfo, config: &InliningConfig) -> Result<(), BailoutReason> {
    if info.hint == InlineHint::Never {
        return Err(BailoutReason::NeverInlinePragma);
    }
    if !info.stats.is_inlinable() {
        return Err(BailoutReason::NotInlinable);
    }
    if info.is_intrinsic && config.mode == CompilerMode::Aot {
        return Err(BailoutReason::Intrinsic);
    }
    if config.mode == CompilerMode::Jit {
        if !info.stats.was_compiled() {
            return Err(BailoutReason::NotYetCompiled);
        }
        if !info.stats.has_feedback() {
            return Err(BailoutReason::FeedbackCleared);
        }
    }
    let deopts = info.stats.deopt_count();
    if deopts >= config.deopt_threshold {
        info.stats.mark_not_inlinable();
        return Err(BailoutReason::DeoptThresholdExceeded { deopts });
    }
    Ok(())
}

/// Reject when `depth` plus the depth the callee itself reached would pass
/// the limit
pub fn check_depth(info: &FunctionInfo, depth: u32, config: &InliningConfig) -> Result<(), BailoutReason> {
    let total = depth + info.stats.inlining_depth();
    if total > config.depth_threshold && !is_depth_exempt(info) {
        return Err(BailoutReason::TooDeep { depth: total });
    }
    Ok(())
}

/// Returns whether the call is recursive; rejects it once the number of
/// recursive inlines performed so far has reached the threshold.
///
/// `chain` lists the functions of the enclosing inline frames, innermost first.
pub fn check_recursion(
    chain: &[FunctionId],
    target: FunctionId,
    recursive_inlines: u32,
    config: &InliningConfig,
) -> Result<bool, BailoutReason> {
    if !chain.contains(&target) {
        return Ok(false);
    }
    if recursive_inlines >= config.recursion_depth_threshold {
        return Err(BailoutReason::RecursiveBeyondThreshold);
    }
    Ok(true)
}

/// Reject call sites that run rarely compared with the hottest site
pub fn check_hotness(info: &FunctionInfo, ratio: f64, config: &InliningConfig) -> Result<(), BailoutReason> {
    if ratio * 100.0 >= config.hotness_percent as f64 {
        return Ok(());
    }
    let size = info.stats.instruction_count();
    let small_leaf = size <= config.small_leaf_size_threshold && info.stats.call_site_count() == 0;
    if is_always_inline(info, size, config) || small_leaf {
        return Ok(());
    }
    Err(BailoutReason::early(format!("too cold ({:.1}% of hottest site)", ratio * 100.0)))
}

/// Inputs of the early decision that come from the call site and caller
#[derive(Debug, Clone, Copy, Default)]
pub struct EarlyContext {
    /// Instructions inlined into the caller so far
    pub caller_growth: usize,
    /// Actual arguments that are constants
    pub constant_arguments: u32,
}

/// Decide from cached statistics whether the callee is worth parsing.
///
/// Markers are not looked at here; `check_markers` runs once before.
pub fn early_decision(
    info: &FunctionInfo,
    context: EarlyContext,
    config: &InliningConfig,
) -> Result<(), BailoutReason> {
    let size = info.stats.instruction_count();
    let call_sites = info.stats.call_site_count();

    if is_always_inline(info, size, config) {
        return Ok(());
    }
    if context.caller_growth > config.caller_size_threshold as usize {
        return Err(BailoutReason::early("caller size ceiling reached"));
    }
    if context.constant_arguments >= config.constant_arguments_count
        && size <= config.constant_arguments_max_size_threshold
    {
        return Ok(());
    }
    // Zero means never measured; the late phase measures it
    if size == 0 || size <= config.size_threshold || call_sites <= config.callee_call_sites_threshold {
        return Ok(());
    }
    Err(BailoutReason::early(format!(
        "{} instructions and {} call sites",
        size, call_sites
    )))
}

/// Decide from the measured callee graph. The measurement is cached on the
/// callee; a callee over every threshold is never considered again.
pub fn late_decision(
    info: &FunctionInfo,
    measured: GraphStats,
    constant_arguments: u32,
    config: &InliningConfig,
) -> Result<(), BailoutReason> {
    info.stats.record_size(measured.instructions, measured.call_sites);
    let size = measured.instructions;

    if is_always_inline(info, size, config) {
        return Ok(());
    }
    if constant_arguments >= config.constant_arguments_count
        && size <= config.constant_arguments_min_size_threshold
    {
        return Ok(());
    }
    if size <= config.size_threshold || measured.call_sites <= config.callee_call_sites_threshold {
        return Ok(());
    }

    if size > config.size_threshold && measured.call_sites > config.callee_call_sites_threshold {
        debug!("{} is oversized in every threshold, marking never-inline", info.name);
        info.stats.mark_not_inlinable();
    }
    Err(BailoutReason::late(format!(
        "{} instructions and {} call sites",
        size, measured.call_sites
    )))
}

/// Frequency gate for one polymorphic variant.
///
/// `index` is the variant's position in descending-count order and
/// `try_harder` lets the last variants through the relative frequency test.
pub fn check_polymorphic_variant(
    count: u64,
    total: u64,
    small_callee: bool,
    try_harder: bool,
    index: usize,
    config: &InliningConfig,
) -> Result<(), BailoutReason> {
    if count.saturating_mul(32) < total {
        return Err(BailoutReason::early("way too infrequent"));
    }
    let factor = if small_callee { 16 } else { 8 };
    if count.saturating_mul(factor) < total && !try_harder {
        return Err(BailoutReason::early("too infrequent"));
    }
    if index >= config.max_polymorphic_checks {
        return Err(BailoutReason::early("too many polymorphic checks"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, ClassId, IrBuilder, Signature};

    fn info(kind: FunctionKind) -> FunctionInfo {
        FunctionInfo::new(FunctionId(1), "callee", Signature::fixed(1)).with_kind(kind)
    }

    #[test]
    fn test_graph_stats_excludes_pseudo_instructions() {
        let mut b = IrBuilder::new(FunctionId(1), "f");
        let x = b.build_parameter(0);
        let one = b.build_int(1);
        let sum = b.build_binop(BinaryOp::Add, x, one);
        let copy = b.build_copy(sum);
        b.build_allocate(ClassId(20), &[copy, x, one]);
        b.build_allocate(ClassId(21), &[]);
        b.build_static_call(FunctionId(2), &[copy]);
        b.build_return(Some(sum));
        let stats = collect_graph_stats(&b.finish());

        // add + 3 allocation inputs + call
        assert_eq!(stats, GraphStats { instructions: 5, call_sites: 1 });
    }

    #[test]
    fn test_always_inline_kinds() {
        let config = InliningConfig::default();
        assert!(is_always_inline(&info(FunctionKind::ImplicitGetter), 500, &config));
        assert!(is_always_inline(&info(FunctionKind::Getter), 10, &config));
        assert!(!is_always_inline(&info(FunctionKind::Getter), 11, &config));
        assert!(is_always_inline(&info(FunctionKind::Operator), 3, &config));
        assert!(!is_always_inline(&info(FunctionKind::Regular), 1, &config));
        assert!(is_always_inline(
            &info(FunctionKind::Regular).with_hint(InlineHint::Always),
            1000,
            &config
        ));
    }

    #[test]
    fn test_markers() {
        let config = InliningConfig::default();
        let f = info(FunctionKind::Regular).with_hint(InlineHint::Never);
        assert_eq!(check_markers(&f, &config), Err(BailoutReason::NeverInlinePragma));

        let f = info(FunctionKind::Regular);
        f.stats.set_was_compiled(false);
        assert_eq!(check_markers(&f, &config), Err(BailoutReason::NotYetCompiled));
        // AOT compiles everything up front
        assert_eq!(check_markers(&f, &InliningConfig::aot()), Ok(()));

        let f = info(FunctionKind::Regular).intrinsic();
        assert_eq!(check_markers(&f, &config), Ok(()));
        assert_eq!(check_markers(&f, &InliningConfig::aot()), Err(BailoutReason::Intrinsic));

        let f = info(FunctionKind::Regular);
        f.stats.set_has_feedback(false);
        assert_eq!(check_markers(&f, &config), Err(BailoutReason::FeedbackCleared));
    }

    #[test]
    fn test_deopt_threshold_persists_marker() {
        let config = InliningConfig::default();
        let f = info(FunctionKind::Regular);
        f.stats.set_deopt_count(12);
        assert_eq!(
            check_markers(&f, &config),
            Err(BailoutReason::DeoptThresholdExceeded { deopts: 12 })
        );
        f.stats.set_deopt_count(0);
        assert_eq!(check_markers(&f, &config), Err(BailoutReason::NotInlinable));
    }

    #[test]
    fn test_early_decision_on_cached_counts() {
        let config = InliningConfig::default();
        let f = info(FunctionKind::Regular);
        assert!(early_decision(&f, EarlyContext::default(), &config).is_ok());

        f.stats.record_size(80, 4);
        assert!(early_decision(&f, EarlyContext::default(), &config).is_err());
        let with_constant = EarlyContext {
            caller_growth: 0,
            constant_arguments: 1,
        };
        assert!(early_decision(&f, with_constant, &config).is_ok());

        f.stats.record_size(80, 1);
        assert!(early_decision(&f, EarlyContext::default(), &config).is_ok());

        let grown = EarlyContext {
            caller_growth: 50_001,
            constant_arguments: 0,
        };
        assert_eq!(
            early_decision(&f, grown, &config),
            Err(BailoutReason::early("caller size ceiling reached"))
        );
        assert!(early_decision(&info(FunctionKind::ImplicitGetter), grown, &config).is_ok());
    }

    #[test]
    fn test_late_decision_marks_oversized() {
        let config = InliningConfig::default();
        let f = info(FunctionKind::Regular);

        let ok = GraphStats { instructions: 20, call_sites: 5 };
        assert!(late_decision(&f, ok, 0, &config).is_ok());
        assert_eq!(f.stats.instruction_count(), 20);

        let constant_folded = GraphStats { instructions: 50, call_sites: 3 };
        assert!(late_decision(&f, constant_folded, 1, &config).is_ok());
        assert!(late_decision(&f, constant_folded, 0, &config).is_err());
        assert!(!f.stats.is_inlinable());
    }

    #[test]
    fn test_late_decision_call_site_exemption() {
        let config = InliningConfig::default();
        let f = info(FunctionKind::Regular);
        let leafish = GraphStats { instructions: 40, call_sites: 1 };
        assert!(late_decision(&f, leafish, 0, &config).is_ok());
        assert!(f.stats.is_inlinable());

        let large_leaf = GraphStats { instructions: 200, call_sites: 1 };
        assert!(late_decision(&f, large_leaf, 0, &config).is_ok());
        assert!(early_decision(&f, EarlyContext::default(), &config).is_ok());
        assert!(f.stats.is_inlinable());
    }

    #[test]
    fn test_early_decision_leaves_markers_alone() {
        let config = InliningConfig::default();
        let f = info(FunctionKind::Regular);
        f.stats.set_deopt_count(12);
        assert!(early_decision(&f, EarlyContext::default(), &config).is_ok());
        assert!(f.stats.is_inlinable());
        assert!(check_markers(&f, &config).is_err());
        assert!(!f.stats.is_inlinable());
    }

    #[test]
    fn test_depth_and_recursion() {
        let config = InliningConfig::default();
        let f = info(FunctionKind::Regular);
        assert!(check_depth(&f, 6, &config).is_ok());
        f.stats.set_inlining_depth(2);
        assert_eq!(check_depth(&f, 5, &config), Err(BailoutReason::TooDeep { depth: 7 }));
        assert!(check_depth(&info(FunctionKind::ImplicitGetter), 7, &config).is_ok());

        let chain = [FunctionId(1), FunctionId(0)];
        assert_eq!(check_recursion(&chain, FunctionId(5), 0, &config), Ok(false));
        assert_eq!(check_recursion(&chain, FunctionId(1), 0, &config), Ok(true));
        assert_eq!(
            check_recursion(&chain, FunctionId(0), 1, &config),
            Err(BailoutReason::RecursiveBeyondThreshold)
        );
    }

    #[test]
    fn test_cold_sites() {
        let config = InliningConfig::default();
        let f = info(FunctionKind::Regular);
        f.stats.record_size(80, 0);
        assert!(check_hotness(&f, 0.5, &config).is_ok());
        assert!(check_hotness(&f, 0.05, &config).is_err());

        f.stats.record_size(30, 0);
        assert!(check_hotness(&f, 0.05, &config).is_ok());
        f.stats.record_size(30, 2);
        assert!(check_hotness(&f, 0.05, &config).is_err());
    }

    #[test]
    fn test_polymorphic_gates() {
        let config = InliningConfig::default();
        assert!(check_polymorphic_variant(90, 100, false, false, 0, &config).is_ok());
        assert!(check_polymorphic_variant(8, 100, false, false, 1, &config).is_err());
        assert!(check_polymorphic_variant(8, 100, true, false, 1, &config).is_ok());
        assert!(check_polymorphic_variant(8, 100, false, true, 1, &config).is_ok());
        assert_eq!(
            check_polymorphic_variant(2, 100, true, true, 2, &config),
            Err(BailoutReason::early("way too infrequent"))
        );
        assert!(check_polymorphic_variant(25, 100, false, false, 4, &config).is_err());
    }
}
