//! Benchmarks for the call-site inliner

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use jit_inliner::inliner::{inline_all_parallel, FlowGraphInliner};
use jit_inliner::ir::{
    BinaryOp, CidRange, ClassId, FunctionId, FunctionInfo, IrBuilder, IrFunction, Signature, TargetInfo, TargetSet,
};
use jit_inliner::{InliningConfig, Program};

/// `width` leaf helpers, each called once from the root, each calling the
/// next `depth` levels down
fn generate_call_tree(width: usize, depth: usize) -> (Program, FunctionId) {
    let mut program = Program::new();
    let mut next_id = 1;
    let mut roots = Vec::new();

    for w in 0..width {
        let mut callee: Option<FunctionId> = None;
        for d in 0..depth {
            let id = FunctionId(next_id);
            next_id += 1;
            let mut b = IrBuilder::new(id, format!("f{}_{}", w, d));
            let x = b.build_parameter(0);
            let k = b.build_int(d as i64 + 1);
            let mut acc = b.build_binop(BinaryOp::Add, x, k);
            acc = b.build_binop(BinaryOp::Mul, acc, k);
            if let Some(callee) = callee {
                acc = b.build_static_call(callee, &[acc]);
            }
            b.build_return(Some(acc));
            program.define(FunctionInfo::new(id, format!("f{}_{}", w, d), Signature::fixed(1)), b.finish());
            callee = Some(id);
        }
        roots.extend(callee);
    }

    let main = FunctionId(next_id);
    let mut b = IrBuilder::new(main, "main");
    let mut acc = b.build_parameter(0);
    for root in roots {
        acc = b.build_static_call(root, &[acc]);
    }
    b.build_return(Some(acc));
    program.define(FunctionInfo::new(main, "main", Signature::fixed(1)), b.finish());
    (program, main)
}

/// One instance call with `variants` receiver classes of equal weight
fn generate_polymorphic(variants: u32) -> (Program, FunctionId) {
    let mut program = Program::new();
    let mut targets = Vec::new();
    for v in 0..variants {
        let id = FunctionId(v + 1);
        let mut b = IrBuilder::new(id, format!("area{}", v));
        let this = b.build_parameter(0);
        let side = b.build_load_field(this, 0);
        let k = b.build_int(v as i64 + 2);
        let r = b.build_binop(BinaryOp::Mul, side, k);
        b.build_return(Some(r));
        program.define(FunctionInfo::new(id, format!("area{}", v), Signature::fixed(1)), b.finish());
        targets.push(TargetInfo {
            cids: CidRange::single(ClassId(16 + v)),
            target: id,
            count: 100,
        });
    }

    let main = FunctionId(variants + 1);
    let mut b = IrBuilder::new(main, "main");
    let shape = b.build_parameter(0);
    let r = b.build_instance_call("area", &[shape], TargetSet::new(targets));
    b.build_return(Some(r));
    program.define(FunctionInfo::new(main, "main", Signature::fixed(1)), b.finish());
    (program, main)
}

fn benchmark_call_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("call_tree");
    let config = InliningConfig::default();

    for width in [4, 16, 64] {
        let (program, main) = generate_call_tree(width, 4);
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                let mut graph = program.body(main).cloned().unwrap_or_else(|| IrFunction::new(main, "main"));
                let mut inliner = FlowGraphInliner::new(&config, &program, &program);
                black_box(inliner.inline(black_box(&mut graph)).ok());
            });
        });
    }

    group.finish();
}

fn benchmark_polymorphic(c: &mut Criterion) {
    let mut group = c.benchmark_group("polymorphic_dispatch");
    let config = InliningConfig::default();

    for variants in [2, 4, 8] {
        let (program, main) = generate_polymorphic(variants);
        group.bench_with_input(BenchmarkId::from_parameter(variants), &variants, |b, _| {
            b.iter(|| {
                let compiled = program.compile(main, &config);
                black_box(compiled.ok());
            });
        });
    }

    group.finish();
}

fn benchmark_parallel_callers(c: &mut Criterion) {
    let (program, main) = generate_call_tree(16, 4);
    let config = InliningConfig::default();
    let Some(body) = program.body(main).cloned() else {
        return;
    };

    c.bench_function("parallel_callers_32", |b| {
        b.iter(|| {
            let mut graphs = vec![body.clone(); 32];
            black_box(inline_all_parallel(&mut graphs, &config, &program, &program));
        });
    });
}

criterion_group!(
    benches,
    benchmark_call_tree,
    benchmark_polymorphic,
    benchmark_parallel_callers
);

criterion_main!(benches);
