//! Shared fixtures for the inliner integration tests
#![allow(dead_code)]

use jit_inliner::ir::interpreter::{Interpreter, Value};
use jit_inliner::ir::{
    BinaryOp, ClassId, CompareOp, FunctionId, FunctionInfo, IrBuilder, IrFunction, IrInstruction, Signature,
};
use jit_inliner::{logging, Program};

pub const CLASS_A: ClassId = ClassId(16);
pub const CLASS_B: ClassId = ClassId(17);
pub const CLASS_C: ClassId = ClassId(18);

/// Builds a program one function at a time, handing out ids in order
pub struct Fixture {
    pub program: Program,
    next_id: u32,
}

impl Fixture {
    pub fn new() -> Self {
        logging::init_test();
        Self {
            program: Program::new(),
            next_id: 1,
        }
    }

    /// Id the next defined function will receive
    pub fn peek_id(&self) -> FunctionId {
        FunctionId(self.next_id)
    }

    pub fn function(
        &mut self,
        name: &str,
        signature: Signature,
        build: impl FnOnce(&mut IrBuilder),
    ) -> FunctionId {
        self.function_with(name, signature, |info| info, build)
    }

    /// Like `function`, with a hook to adjust the metadata (kind, hint, ...)
    pub fn function_with(
        &mut self,
        name: &str,
        signature: Signature,
        adjust: impl FnOnce(FunctionInfo) -> FunctionInfo,
        build: impl FnOnce(&mut IrBuilder),
    ) -> FunctionId {
        let id = FunctionId(self.next_id);
        self.next_id += 1;
        let mut b = IrBuilder::new(id, name);
        build(&mut b);
        let info = adjust(FunctionInfo::new(id, name, signature));
        self.program.define(info, b.finish())
    }

    /// Function without a body
    pub fn native(&mut self, name: &str, signature: Signature) -> FunctionId {
        let id = FunctionId(self.next_id);
        self.next_id += 1;
        self.program.declare(FunctionInfo::new(id, name, signature))
    }

    /// `fact(n) = n <= 1 ? 1 : n * fact(n - 1)`
    pub fn factorial(&mut self) -> FunctionId {
        let id = self.peek_id();
        self.function("fact", Signature::fixed(1), |b| {
            let n = b.build_parameter(0);
            let one = b.build_int(1);
            let base = b.create_block_with_label("base");
            let step = b.create_block_with_label("step");
            let done = b.build_cmp(CompareOp::Le, n, one);
            b.build_cond_branch(done, base, step);

            b.switch_to_block(base);
            b.build_return(Some(one));

            b.switch_to_block(step);
            let prev = b.build_binop(BinaryOp::Sub, n, one);
            let rec = b.build_static_call(id, &[prev]);
            let product = b.build_binop(BinaryOp::Mul, n, rec);
            b.build_return(Some(product));
        })
    }

    /// `area(this) = this.field0 * factor`
    pub fn area_method(&mut self, name: &str, factor: i64) -> FunctionId {
        self.function(name, Signature::fixed(1), |b| {
            let this = b.build_parameter(0);
            let side = b.build_load_field(this, 0);
            let k = b.build_int(factor);
            let area = b.build_binop(BinaryOp::Mul, side, k);
            b.build_return(Some(area));
        })
    }

    /// Straight-line arithmetic of `ops` instructions, making `calls` calls
    /// to `callee`
    pub fn chain(&mut self, name: &str, ops: usize, calls: usize, callee: FunctionId) -> FunctionId {
        self.function(name, Signature::fixed(1), |b| {
            let x = b.build_parameter(0);
            let one = b.build_int(1);
            let mut acc = x;
            for _ in 0..ops {
                acc = b.build_binop(BinaryOp::Add, acc, one);
            }
            for _ in 0..calls {
                acc = b.build_static_call(callee, &[acc]);
            }
            b.build_return(Some(acc));
        })
    }
}

pub fn run(program: &Program, graph: &IrFunction, args: Vec<Value>) -> Value {
    Interpreter::new(program)
        .run(graph, args)
        .unwrap_or_else(|e| panic!("{} failed: {}", graph.name, e))
}

/// Run the uninlined body of `id`
pub fn run_original(program: &Program, id: FunctionId, args: Vec<Value>) -> Value {
    let body = program.body(id).expect("body").clone();
    run(program, &body, args)
}

pub fn count(graph: &IrFunction, pred: impl Fn(&IrInstruction) -> bool) -> usize {
    graph
        .cfg
        .blocks
        .values()
        .flat_map(|b| b.instructions.iter())
        .filter(|i| pred(i))
        .count()
}

pub fn object(class_id: ClassId, field: i64) -> Value {
    Value::object(class_id, vec![Value::Int(field)])
}
