//! End-to-end inlining scenarios on small programs
mod common;

use common::*;
use jit_inliner::inliner::{BailoutReason, HeuristicPhase, TraceOutcome};
use jit_inliner::ir::interpreter::Value;
use jit_inliner::ir::{
    BinaryOp, CidRange, CompareOp, FunctionKind, IrInstruction, IrValue, Signature, TargetInfo, TargetSet,
};
use jit_inliner::InliningConfig;

fn feedback(entries: &[(jit_inliner::ir::ClassId, jit_inliner::ir::FunctionId, u64)]) -> TargetSet {
    TargetSet::new(
        entries
            .iter()
            .map(|&(cid, target, count)| TargetInfo {
                cids: CidRange::single(cid),
                target,
                count,
            })
            .collect(),
    )
}

#[test]
fn test_getter_inlined_behind_class_guard() {
    let mut fx = Fixture::new();
    let getter = fx.function_with(
        "get:x",
        Signature::fixed(1),
        |info| info.with_kind(FunctionKind::ImplicitGetter),
        |b| {
            let this = b.build_parameter(0);
            let x = b.build_load_field(this, 0);
            b.build_return(Some(x));
        },
    );
    fx.program.add_method(CLASS_A, "x", getter);
    let main = fx.function("main", Signature::fixed(1), |b| {
        let p = b.build_parameter(0);
        let x = b.build_instance_call("x", &[p], feedback(&[(CLASS_A, getter, 10)]));
        b.build_return(Some(x));
    });

    let compiled = fx.program.compile(main, &InliningConfig::default()).unwrap();
    let graph = &compiled.graph;

    assert_eq!(compiled.summary.inlined, 1);
    assert_eq!(graph.call_count(), 0);
    assert_eq!(count(graph, |i| matches!(i, IrInstruction::CheckClassId { .. })), 1);
    assert_eq!(
        count(graph, |i| matches!(i, IrInstruction::Redefinition { refined: Some(cid), .. } if *cid == CLASS_A)),
        1
    );
    assert_eq!(run(&fx.program, graph, vec![object(CLASS_A, 7)]), Value::Int(7));
}

#[test]
fn test_complete_feedback_needs_no_guard() {
    let mut fx = Fixture::new();
    let getter = fx.function_with(
        "get:x",
        Signature::fixed(1),
        |info| info.with_kind(FunctionKind::ImplicitGetter),
        |b| {
            let this = b.build_parameter(0);
            let x = b.build_load_field(this, 0);
            b.build_return(Some(x));
        },
    );
    let main = fx.function("main", Signature::fixed(1), |b| {
        let p = b.build_parameter(0);
        let x = b.build_instance_call("x", &[p], feedback(&[(CLASS_A, getter, 10)]).complete());
        b.build_return(Some(x));
    });

    let compiled = fx.program.compile(main, &InliningConfig::default()).unwrap();
    assert_eq!(count(&compiled.graph, |i| matches!(i, IrInstruction::CheckClassId { .. })), 0);
    assert_eq!(compiled.graph.call_count(), 0);
}

#[test]
fn test_single_call_site_callee_exempt_from_size() {
    let mut fx = Fixture::new();
    let native = fx.native("log", Signature::fixed(1));
    let one_call = fx.chain("one_call", 200, 1, native);
    let two_calls = fx.chain("two_calls", 40, 2, native);
    let main = fx.function("main", Signature::fixed(1), |b| {
        let x = b.build_parameter(0);
        let a = b.build_static_call(one_call, &[x]);
        let r = b.build_static_call(two_calls, &[a]);
        b.build_return(Some(r));
    });

    let compiled = fx.program.compile(main, &InliningConfig::default()).unwrap();
    let trace = &compiled.trace;

    assert_eq!(compiled.summary.inlined, 1);
    assert!(trace.rejections_of(one_call).is_empty());
    assert_eq!(fx.program.info(one_call).unwrap().stats.instruction_count(), 201);
    let rejected = trace.rejections_of(two_calls);
    assert_eq!(rejected.len(), 1);
    assert!(matches!(
        rejected[0],
        BailoutReason::HeuristicRejected { phase: HeuristicPhase::Early, .. }
    ));
    // Early rejection leaves the callee eligible for other callers
    assert!(fx.program.info(two_calls).unwrap().stats.is_inlinable());

    // The native call that came with one_call is considered one level deeper
    let native_records: Vec<_> = trace.records().iter().filter(|r| r.callee == Some(native)).collect();
    assert!(native_records.iter().any(|r| r.depth == 2
        && matches!(r.outcome, TraceOutcome::Rejected(BailoutReason::ParseOrCompileError(_)))));
}

#[test]
fn test_constant_argument_unlocks_large_callee() {
    let mut fx = Fixture::new();
    let native = fx.native("log", Signature::fixed(1));
    let two_calls = fx.chain("two_calls", 40, 2, native);
    let main = fx.function("main", Signature::fixed(0), |b| {
        let five = b.build_int(5);
        let r = b.build_static_call(two_calls, &[five]);
        b.build_return(Some(r));
    });

    let compiled = fx.program.compile(main, &InliningConfig::default()).unwrap();
    assert!(compiled
        .trace
        .records()
        .iter()
        .any(|r| r.callee == Some(two_calls) && matches!(r.outcome, TraceOutcome::Inlined { .. })));
    assert!(compiled.trace.rejections_of(two_calls).is_empty());
}

#[test]
fn test_polymorphic_90_8_2_keeps_rare_variant_in_residual() {
    let mut fx = Fixture::new();
    let area_a = fx.area_method("A.area", 2);
    let area_b = fx.area_method("B.area", 3);
    let area_c = fx.area_method("C.area", 4);
    fx.program.add_method(CLASS_A, "area", area_a);
    fx.program.add_method(CLASS_B, "area", area_b);
    fx.program.add_method(CLASS_C, "area", area_c);

    let main = fx.function("main", Signature::fixed(1), |b| {
        let shape = b.build_parameter(0);
        let targets = feedback(&[(CLASS_C, area_c, 2), (CLASS_A, area_a, 90), (CLASS_B, area_b, 8)]);
        let area = b.build_instance_call("area", &[shape], targets);
        b.build_return(Some(area));
    });

    let compiled = fx.program.compile(main, &InliningConfig::default()).unwrap();
    let graph = &compiled.graph;

    assert_eq!(compiled.summary.inlined, 2);
    assert_eq!(
        compiled.trace.rejections_of(area_c),
        vec![&BailoutReason::early("way too infrequent")]
    );

    let residual: Vec<_> = graph
        .cfg
        .blocks
        .values()
        .flat_map(|b| b.instructions.iter())
        .filter_map(|i| match i {
            IrInstruction::PolymorphicInstanceCall { targets, .. } => Some(targets.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(residual.len(), 1);
    let residual_targets: Vec<_> = residual[0].targets.iter().map(|t| t.target).collect();
    assert_eq!(residual_targets, vec![area_c]);
    assert_eq!(count(graph, |i| matches!(i, IrInstruction::InstanceCall { .. })), 0);
    assert_eq!(count(graph, |i| matches!(i, IrInstruction::LoadClassId { .. })), 1);

    for (cid, expected) in [(CLASS_A, 10), (CLASS_B, 15), (CLASS_C, 20)] {
        assert_eq!(run(&fx.program, graph, vec![object(cid, 5)]), Value::Int(expected));
    }
}

#[test]
fn test_recursion_stops_at_threshold() {
    let mut fx = Fixture::new();
    let fact = fx.factorial();
    let main = fx.function("main", Signature::fixed(1), |b| {
        let n = b.build_parameter(0);
        let r = b.build_static_call(fact, &[n]);
        b.build_return(Some(r));
    });

    let config = InliningConfig::default();
    assert_eq!(config.recursion_depth_threshold, 1);
    let compiled = fx.program.compile(main, &config).unwrap();

    let inlined = compiled
        .trace
        .records()
        .iter()
        .filter(|r| r.callee == Some(fact) && r.outcome.is_inlined())
        .count();
    assert_eq!(inlined, 2);
    assert_eq!(
        compiled.trace.rejections_of(fact),
        vec![&BailoutReason::RecursiveBeyondThreshold]
    );
    assert_eq!(compiled.summary.max_depth, 2);
    assert_eq!(fx.program.info(main).unwrap().stats.inlining_depth(), 2);

    for n in [0, 1, 2, 5, 7] {
        assert_eq!(
            run(&fx.program, &compiled.graph, vec![Value::Int(n)]),
            run_original(&fx.program, main, vec![Value::Int(n)])
        );
    }
}

#[test]
fn test_named_arguments_bind_defaults() {
    let mut fx = Fixture::new();
    let scale = fx.function("scale", Signature::fixed(1).with_named(vec![("factor", IrValue::Int(2))]), |b| {
        let x = b.build_parameter(0);
        let factor = b.build_parameter(1);
        let r = b.build_binop(BinaryOp::Mul, x, factor);
        b.build_return(Some(r));
    });
    let main = fx.function("main", Signature::fixed(1), |b| {
        let x = b.build_parameter(0);
        let doubled = b.build_static_call(scale, &[x]);
        let five = b.build_int(5);
        let scaled = b.build_static_call_named(scale, &[x, five], &["factor"]);
        let sum = b.build_binop(BinaryOp::Add, doubled, scaled);
        b.build_return(Some(sum));
    });

    let compiled = fx.program.compile(main, &InliningConfig::default()).unwrap();
    assert_eq!(compiled.summary.inlined, 2);
    assert_eq!(compiled.graph.call_count(), 0);
    assert_eq!(run(&fx.program, &compiled.graph, vec![Value::Int(3)]), Value::Int(21));
}

#[test]
fn test_argument_mismatch_marks_callee() {
    let mut fx = Fixture::new();
    let scale = fx.function("scale", Signature::fixed(1).with_named(vec![("factor", IrValue::Int(2))]), |b| {
        let x = b.build_parameter(0);
        let factor = b.build_parameter(1);
        let r = b.build_binop(BinaryOp::Mul, x, factor);
        b.build_return(Some(r));
    });
    let bad = fx.function("bad", Signature::fixed(1), |b| {
        let x = b.build_parameter(0);
        let five = b.build_int(5);
        let r = b.build_static_call_named(scale, &[x, five], &["scale_by"]);
        b.build_return(Some(r));
    });
    let good = fx.function("good", Signature::fixed(1), |b| {
        let x = b.build_parameter(0);
        let r = b.build_static_call(scale, &[x]);
        b.build_return(Some(r));
    });

    let compiled = fx.program.compile(bad, &InliningConfig::default()).unwrap();
    assert!(matches!(
        compiled.trace.rejections_of(scale).as_slice(),
        [BailoutReason::OptionalArgumentMismatch(_)]
    ));
    assert!(!fx.program.info(scale).unwrap().stats.is_inlinable());

    let compiled = fx.program.compile(good, &InliningConfig::default()).unwrap();
    assert_eq!(
        compiled.trace.rejections_of(scale),
        vec![&BailoutReason::NotInlinable]
    );
}

#[test]
fn test_closure_call_through_known_closure() {
    let mut fx = Fixture::new();
    let add_one = fx.function("add_one", Signature::fixed(2), |b| {
        let _closure = b.build_parameter(0);
        let x = b.build_parameter(1);
        let one = b.build_int(1);
        let r = b.build_binop(BinaryOp::Add, x, one);
        b.build_return(Some(r));
    });
    let main = fx.function("main", Signature::fixed(1), |b| {
        let x = b.build_parameter(0);
        let closure = b.build_make_closure(add_one);
        let r = b.build_closure_call(closure, &[x]);
        b.build_return(Some(r));
    });

    let compiled = fx.program.compile(main, &InliningConfig::default()).unwrap();
    assert_eq!(compiled.summary.inlined, 1);
    assert_eq!(compiled.graph.call_count(), 0);
    assert_eq!(run(&fx.program, &compiled.graph, vec![Value::Int(41)]), Value::Int(42));
}

#[test]
fn test_throw_in_callee_reaches_caller_handler() {
    let mut fx = Fixture::new();
    let checked = fx.function("checked", Signature::fixed(1), |b| {
        let x = b.build_parameter(0);
        let zero = b.build_int(0);
        let fail = b.create_block_with_label("fail");
        let ok = b.create_block_with_label("ok");
        let negative = b.build_cmp(CompareOp::Lt, x, zero);
        b.build_cond_branch(negative, fail, ok);
        b.switch_to_block(fail);
        let message = b.build_string("negative");
        b.build_throw(message);
        b.switch_to_block(ok);
        b.build_return(Some(x));
    });
    let main = fx.function("main", Signature::fixed(1), |b| {
        let x = b.build_parameter(0);
        let handler = b.create_block_with_label("handler");
        b.begin_try(handler);
        let body = b.create_block_with_label("body");
        b.end_try();
        b.build_branch(body);

        b.switch_to_block(body);
        let r = b.build_static_call(checked, &[x]);
        b.build_return(Some(r));

        b.switch_to_block(handler);
        b.build_catch_parameter();
        let fallback = b.build_int(-1);
        b.build_return(Some(fallback));
    });

    let compiled = fx.program.compile(main, &InliningConfig::default()).unwrap();
    assert_eq!(compiled.graph.call_count(), 0);
    for x in [-3, 0, 4] {
        assert_eq!(
            run(&fx.program, &compiled.graph, vec![Value::Int(x)]),
            run_original(&fx.program, main, vec![Value::Int(x)])
        );
    }
    assert_eq!(run(&fx.program, &compiled.graph, vec![Value::Int(-3)]), Value::Int(-1));
}

#[test]
fn test_recognized_list_access_replaces_call() {
    use jit_inliner::ir::RecognizedMethod;

    let mut fx = Fixture::new();
    let get = fx.function_with(
        "List.[]",
        Signature::fixed(2),
        |info| info.recognized(RecognizedMethod::ListGetIndexed),
        |b| {
            let list = b.build_parameter(0);
            let index = b.build_parameter(1);
            let length = b.build_load_length(list);
            b.build_check_bounds(length, index);
            let r = b.build_load_indexed(list, index);
            b.build_return(Some(r));
        },
    );
    let main = fx.function("main", Signature::fixed(1), |b| {
        let list = b.build_parameter(0);
        let one = b.build_int(1);
        let r = b.build_static_call(get, &[list, one]);
        b.build_return(Some(r));
    });

    let compiled = fx.program.compile(main, &InliningConfig::default()).unwrap();
    assert_eq!(compiled.summary.recognized, 1);
    assert_eq!(compiled.summary.inlined, 0);
    assert_eq!(count(&compiled.graph, |i| matches!(i, IrInstruction::CheckBounds { .. })), 1);

    let list = Value::array(vec![Value::Int(10), Value::Int(20)]);
    assert_eq!(run(&fx.program, &compiled.graph, vec![list]), Value::Int(20));
}

#[test]
fn test_aot_rejects_intrinsics_jit_accepts() {
    let mut fx = Fixture::new();
    let intrinsic = fx.function_with(
        "intrinsic",
        Signature::fixed(1),
        |info| info.intrinsic(),
        |b| {
            let x = b.build_parameter(0);
            b.build_return(Some(x));
        },
    );
    let main = fx.function("main", Signature::fixed(1), |b| {
        let x = b.build_parameter(0);
        let r = b.build_static_call(intrinsic, &[x]);
        b.build_return(Some(r));
    });

    let aot = fx.program.compile(main, &InliningConfig::aot()).unwrap();
    assert_eq!(aot.trace.rejections_of(intrinsic), vec![&BailoutReason::Intrinsic]);

    let jit = fx.program.compile(main, &InliningConfig::default()).unwrap();
    assert_eq!(jit.summary.inlined, 1);
}
