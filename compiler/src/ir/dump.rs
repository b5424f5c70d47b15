//! Flow-graph Dump Utility
//!
//! Pretty-prints graphs in a compact textual form, one instruction per line.
//! Used for debug logging around inlining and in test failure messages.

use super::{
    BinaryOp, CompareOp, FloatOp, IrBasicBlock, IrFunction, IrInstruction, IrTerminator, UnaryOp,
};
use std::fmt;

/// Dump a single function to a string.
pub fn dump_function(func: &IrFunction) -> String {
    FunctionDump(func).to_string()
}

struct FunctionDump<'a>(&'a IrFunction);

impl fmt::Display for FunctionDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let func = self.0;
        writeln!(f, "fn @{} ({}) {{", func.name, func.function)?;

        // Blocks in discovery order first, then any not yet discovered
        let mut ids: Vec<_> = func.cfg.block_order().to_vec();
        let mut rest: Vec<_> = func
            .cfg
            .blocks
            .keys()
            .filter(|id| !ids.contains(id))
            .copied()
            .collect();
        rest.sort();
        ids.extend(rest);

        for id in ids {
            if let Some(block) = func.cfg.get_block(id) {
                write_block(f, block)?;
            }
        }

        for (index, entry) in &func.cfg.catch_handlers {
            match entry.outer {
                Some(outer) => writeln!(f, "  ; {} -> {} (in {})", index, entry.handler, outer)?,
                None => writeln!(f, "  ; {} -> {}", index, entry.handler)?,
            }
        }
        writeln!(f, "}}")
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, block: &IrBasicBlock) -> fmt::Result {
    write!(f, "{}", block.id)?;
    if let Some(label) = &block.label {
        write!(f, " ({})", label)?;
    }
    if let Some(index) = block.try_index {
        write!(f, " [{}]", index)?;
    }
    if !block.predecessors.is_empty() {
        let preds: Vec<String> = block.predecessors.iter().map(|p| p.to_string()).collect();
        write!(f, "  ; preds: {}", preds.join(", "))?;
    }
    writeln!(f, ":")?;

    for phi in &block.phi_nodes {
        let incoming: Vec<String> = phi
            .incoming
            .iter()
            .map(|(b, v)| format!("[{}, {}]", b, v))
            .collect();
        writeln!(f, "    {} = phi {}", phi.dest, incoming.join(", "))?;
    }
    for inst in &block.instructions {
        writeln!(f, "    {}", inst)?;
    }
    writeln!(f, "    {}", block.terminator)
}

fn list<T: fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn binop_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "mul",
        BinaryOp::Div => "div",
        BinaryOp::Rem => "rem",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
        BinaryOp::Xor => "xor",
        BinaryOp::Shl => "shl",
        BinaryOp::Shr => "shr",
    }
}

fn cmp_name(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "eq",
        CompareOp::Ne => "ne",
        CompareOp::Lt => "lt",
        CompareOp::Le => "le",
        CompareOp::Gt => "gt",
        CompareOp::Ge => "ge",
        CompareOp::ULt => "ult",
        CompareOp::ULe => "ule",
    }
}

fn float_name(op: FloatOp) -> &'static str {
    match op {
        FloatOp::Add => "fadd",
        FloatOp::Sub => "fsub",
        FloatOp::Mul => "fmul",
        FloatOp::Div => "fdiv",
    }
}

impl fmt::Display for IrInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use IrInstruction::*;
        match self {
            Parameter { dest, index } => write!(f, "{} = param {}", dest, index),
            Const { dest, value } => write!(f, "{} = const {}", dest, value),
            CatchParameter { dest } => write!(f, "{} = catch_param", dest),
            Copy { dest, src } => write!(f, "{} = copy {}", dest, src),
            Redefinition { dest, value, refined } => match refined {
                Some(cid) => write!(f, "{} = redefine {} as {}", dest, value, cid),
                None => write!(f, "{} = redefine {}", dest, value),
            },
            BinOp { dest, op, left, right } => {
                write!(f, "{} = {} {}, {}", dest, binop_name(*op), left, right)
            }
            UnOp { dest, op, operand } => {
                let name = match op {
                    UnaryOp::Neg => "neg",
                    UnaryOp::Not => "not",
                };
                write!(f, "{} = {} {}", dest, name, operand)
            }
            Cmp { dest, op, left, right } => {
                write!(f, "{} = cmp {} {}, {}", dest, cmp_name(*op), left, right)
            }
            DoubleOp { dest, op, left, right } => {
                write!(f, "{} = {} {}, {}", dest, float_name(*op), left, right)
            }
            SimdOp { dest, op, left, right } => {
                write!(f, "{} = simd.{} {}, {}", dest, float_name(*op), left, right)
            }
            Box { dest, value, rep } => write!(f, "{} = box {} from {:?}", dest, value, rep),
            Unbox { dest, value, rep } => write!(f, "{} = unbox {} to {:?}", dest, value, rep),
            LoadClassId { dest, object } => write!(f, "{} = load_cid {}", dest, object),
            Allocate { dest, class_id, fields } => {
                write!(f, "{} = allocate {}({})", dest, class_id, list(fields.iter()))
            }
            LoadField { dest, object, field } => write!(f, "{} = {}.field{}", dest, object, field),
            StoreField { object, field, value } => write!(f, "{}.field{} = {}", object, field, value),
            MakeArray { dest, elements } => write!(f, "{} = [{}]", dest, list(elements.iter())),
            MakeClosure { dest, function } => write!(f, "{} = closure {}", dest, function),
            LoadLength { dest, object } => write!(f, "{} = length {}", dest, object),
            LoadIndexed { dest, array, index } => write!(f, "{} = {}[{}]", dest, array, index),
            StoreIndexed { array, index, value } => write!(f, "{}[{}] = {}", array, index, value),
            LoadCodeUnit { dest, string, index } => {
                write!(f, "{} = code_unit {}[{}]", dest, string, index)
            }
            CheckBounds { length, index } => write!(f, "check_bounds {} < {}", index, length),
            CheckClassId { value, cids } => write!(f, "check_cid {} in {}", value, cids),
            StaticCall { dest, target, call } => {
                write!(f, "{} = {} {}({})", dest, call.call_id, target, list(call.args.iter()))?;
                if !call.arg_names.is_empty() {
                    write!(f, " names=[{}]", call.arg_names.join(", "))?;
                }
                Ok(())
            }
            InstanceCall { dest, selector, call, targets } => write!(
                f,
                "{} = {} .{}({}) targets={}",
                dest,
                call.call_id,
                selector,
                list(call.args.iter()),
                targets.len()
            ),
            PolymorphicInstanceCall { dest, selector, call, targets } => write!(
                f,
                "{} = {} poly .{}({}) [{}]",
                dest,
                call.call_id,
                selector,
                list(call.args.iter()),
                list(targets.targets.iter().map(|t| format!("{}->{}", t.cids, t.target)))
            ),
            ClosureCall { dest, call } => {
                write!(f, "{} = {} closure_call({})", dest, call.call_id, list(call.args.iter()))
            }
        }
    }
}

impl fmt::Display for IrTerminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrTerminator::Branch { target } => write!(f, "br {}", target),
            IrTerminator::CondBranch {
                condition,
                true_target,
                false_target,
            } => write!(f, "br {}, {}, {}", condition, true_target, false_target),
            IrTerminator::Return { value: Some(v) } => write!(f, "ret {}", v),
            IrTerminator::Return { value: None } => write!(f, "ret"),
            IrTerminator::Throw { exception } => write!(f, "throw {}", exception),
            IrTerminator::Deoptimize { reason } => write!(f, "deopt \"{}\"", reason),
            IrTerminator::Unreachable => write!(f, "unreachable"),
        }
    }
}
