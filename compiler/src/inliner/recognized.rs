//! Recognized-method templates
//!
//! Well-known primitives are replaced by a fixed instruction sequence instead
//! of their body: indexed access becomes a bounds check plus the access, int
//! arithmetic becomes unbox/op/box, and so on. Every template is checked for
//! applicability before the graph is touched; the last emitted instruction
//! defines the call's result.

use crate::config::InliningConfig;
use crate::ir::{
    BinaryOp, CallId, CidRange, FloatOp, IrFunction, IrId, IrInstruction, IrValue, RecognizedMethod,
    Representation,
};
use log::trace;

/// Result of a template attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateOutcome {
    /// The call was replaced; `instructions` counts the emitted instructions
    Applied { instructions: usize },
    /// The graph was left untouched
    Declined(&'static str),
}

/// Largest constant exponent `MathIntPow` expands into multiplications
pub const MAX_POW_EXPONENT: i64 = 8;

fn expected_arity(method: RecognizedMethod) -> usize {
    match method {
        RecognizedMethod::ListLength | RecognizedMethod::StringLength | RecognizedMethod::ClassIdOf => 1,
        RecognizedMethod::ListSetIndexed => 3,
        _ => 2,
    }
}

/// Check whether `method` can be expanded for a call with `args`
fn applicable(
    graph: &IrFunction,
    method: RecognizedMethod,
    args: &[IrId],
    named: bool,
    config: &InliningConfig,
) -> Result<(), &'static str> {
    if !config.capabilities.can_inline_recognized {
        return Err("recognized methods disabled");
    }
    if named {
        return Err("named arguments");
    }
    if args.len() != expected_arity(method) {
        return Err("unexpected argument count");
    }
    match method {
        RecognizedMethod::DoubleArith(_) if !config.capabilities.can_unbox_doubles => {
            Err("target cannot unbox doubles")
        }
        RecognizedMethod::Float64x2Arith(_) if !config.capabilities.can_unbox_simd128 => {
            Err("target cannot unbox simd values")
        }
        RecognizedMethod::MathIntPow => match graph.constant_value(args[1]).and_then(IrValue::as_int) {
            Some(exponent) if (0..=MAX_POW_EXPONENT).contains(&exponent) => Ok(()),
            Some(_) => Err("exponent out of range"),
            None => Err("exponent not constant"),
        },
        _ => Ok(()),
    }
}

/// Accumulates template instructions; values come from the caller's arena
struct Emitter<'g> {
    graph: &'g mut IrFunction,
    out: Vec<IrInstruction>,
}

impl Emitter<'_> {
    fn value(&mut self, make: impl FnOnce(IrId) -> IrInstruction) -> IrId {
        let dest = self.graph.alloc_reg();
        self.out.push(make(dest));
        dest
    }

    fn effect(&mut self, inst: IrInstruction) {
        self.out.push(inst);
    }

    /// The instruction defining the call's result
    fn result(&mut self, dest: IrId, make: impl FnOnce(IrId) -> IrInstruction) {
        self.out.push(make(dest));
    }

    fn checked_length(&mut self, object: IrId, index: IrId) {
        let length = self.value(|dest| IrInstruction::LoadLength { dest, object });
        self.effect(IrInstruction::CheckBounds { length, index });
    }

    fn boxed_arith(
        &mut self,
        dest: IrId,
        rep: Representation,
        left: IrId,
        right: IrId,
        op: impl FnOnce(IrId, IrId, IrId) -> IrInstruction,
    ) {
        let l = self.value(|dest| IrInstruction::Unbox { dest, value: left, rep });
        let r = self.value(|dest| IrInstruction::Unbox { dest, value: right, rep });
        let raw = self.value(|dest| op(dest, l, r));
        self.result(dest, |dest| IrInstruction::Box { dest, value: raw, rep });
    }
}

fn emit(emitter: &mut Emitter<'_>, method: RecognizedMethod, args: &[IrId], dest: IrId) {
    match method {
        RecognizedMethod::ListGetIndexed => {
            let (array, index) = (args[0], args[1]);
            emitter.checked_length(array, index);
            emitter.result(dest, |dest| IrInstruction::LoadIndexed { dest, array, index });
        }
        RecognizedMethod::ListSetIndexed => {
            let (array, index, value) = (args[0], args[1], args[2]);
            emitter.checked_length(array, index);
            emitter.effect(IrInstruction::StoreIndexed { array, index, value });
            let null = emitter.graph.get_or_insert_constant(IrValue::Null);
            emitter.result(dest, |dest| IrInstruction::Copy { dest, src: null });
        }
        RecognizedMethod::ListLength | RecognizedMethod::StringLength => {
            let object = args[0];
            emitter.result(dest, |dest| IrInstruction::LoadLength { dest, object });
        }
        RecognizedMethod::StringCodeUnitAt => {
            let (string, index) = (args[0], args[1]);
            emitter.checked_length(string, index);
            emitter.result(dest, |dest| IrInstruction::LoadCodeUnit { dest, string, index });
        }
        RecognizedMethod::IntArith(op) => {
            emitter.boxed_arith(dest, Representation::UnboxedInt64, args[0], args[1], |dest, left, right| {
                IrInstruction::BinOp { dest, op, left, right }
            });
        }
        RecognizedMethod::DoubleArith(op) => {
            emitter.boxed_arith(dest, Representation::UnboxedDouble, args[0], args[1], |dest, left, right| {
                IrInstruction::DoubleOp { dest, op, left, right }
            });
        }
        RecognizedMethod::Float64x2Arith(op) => {
            emitter.boxed_arith(dest, Representation::UnboxedFloat64x2, args[0], args[1], |dest, left, right| {
                IrInstruction::SimdOp { dest, op, left, right }
            });
        }
        RecognizedMethod::MathIntPow => {
            let base = args[0];
            let exponent = emitter
                .graph
                .constant_value(args[1])
                .and_then(IrValue::as_int)
                .unwrap_or(0);
            emit_pow(emitter, base, exponent, dest);
        }
        RecognizedMethod::ClassIdOf => {
            let object = args[0];
            emitter.result(dest, |dest| IrInstruction::LoadClassId { dest, object });
        }
    }
}

/// `base ** exponent` as a chain of multiplications
fn emit_pow(emitter: &mut Emitter<'_>, base: IrId, exponent: i64, dest: IrId) {
    if exponent == 0 {
        let one = emitter.graph.get_or_insert_constant(IrValue::Int(1));
        emitter.result(dest, |dest| IrInstruction::Copy { dest, src: one });
        return;
    }
    if exponent == 1 {
        emitter.result(dest, |dest| IrInstruction::Copy { dest, src: base });
        return;
    }
    let mut acc = base;
    for _ in 2..exponent {
        acc = emitter.value(|dest| IrInstruction::BinOp {
            dest,
            op: BinaryOp::Mul,
            left: acc,
            right: base,
        });
    }
    emitter.result(dest, |dest| IrInstruction::BinOp {
        dest,
        op: BinaryOp::Mul,
        left: acc,
        right: base,
    });
}

/// Replace call `call_id` with the template of `method`.
///
/// `guard` is a receiver class check to emit ahead of the template (used for
/// incomplete monomorphic feedback).
pub fn try_inline_recognized(
    graph: &mut IrFunction,
    call_id: CallId,
    method: RecognizedMethod,
    config: &InliningConfig,
    guard: Option<(IrId, CidRange)>,
) -> TemplateOutcome {
    let Some((block, index)) = graph.locate_call(call_id) else {
        return TemplateOutcome::Declined("call not found");
    };
    let Some((dest, call)) = graph
        .cfg
        .get_block(block)
        .and_then(|b| b.instructions.get(index))
        .and_then(|inst| Some((inst.dest()?, inst.call_info()?.clone())))
    else {
        return TemplateOutcome::Declined("not a call");
    };
    if let Err(reason) = applicable(graph, method, &call.args, !call.arg_names.is_empty(), config) {
        return TemplateOutcome::Declined(reason);
    }

    let mut emitter = Emitter {
        graph,
        out: Vec::new(),
    };
    if let Some((value, cids)) = guard {
        emitter.effect(IrInstruction::CheckClassId { value, cids });
    }
    emit(&mut emitter, method, &call.args, dest);
    let template = emitter.out;
    let instructions = template.len();

    // Constants pooled above may have moved the call
    let Some((block, index)) = graph.locate_call(call_id) else {
        return TemplateOutcome::Declined("call not found");
    };
    if let Some(block) = graph.cfg.get_block_mut(block) {
        block.instructions.splice(index..=index, template);
    }
    trace!("{}: {} expanded to {:?} ({} instructions)", graph.name, call_id, method, instructions);
    TemplateOutcome::Applied { instructions }
}
