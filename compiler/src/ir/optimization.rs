//! Optimization Passes
//!
//! The small pipeline run over callee graphs before the late inlining
//! heuristics measure them. Passes are stateless so one pipeline can be
//! shared by every compiler thread.

use super::{BinaryOp, CompareOp, IrFunction, IrId, IrInstruction, IrTerminator, IrValue, UnaryOp};
use fxhash::{FxHashMap, FxHashSet};
use log::trace;

/// Optimization pass trait
pub trait OptimizationPass: Send + Sync {
    /// Get the name of this pass
    fn name(&self) -> &'static str;

    /// Run the pass on a function
    fn run_on_function(&self, function: &mut IrFunction) -> OptimizationResult;
}

/// Result of an optimization pass
#[derive(Debug, Clone, Default)]
pub struct OptimizationResult {
    /// Whether the IR was modified
    pub modified: bool,

    /// Number of instructions eliminated
    pub instructions_eliminated: usize,

    /// Number of blocks eliminated
    pub blocks_eliminated: usize,
}

impl OptimizationResult {
    /// Create a result indicating no changes
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Combine results
    pub fn combine(mut self, other: OptimizationResult) -> Self {
        self.modified |= other.modified;
        self.instructions_eliminated += other.instructions_eliminated;
        self.blocks_eliminated += other.blocks_eliminated;
        self
    }
}

/// Optimization pass manager
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pass to the manager
    pub fn add_pass<P: OptimizationPass + 'static>(&mut self, pass: P) {
        self.passes.push(Box::new(pass));
    }

    /// Build the default callee pipeline
    pub fn default_pipeline() -> Self {
        let mut manager = Self::new();
        manager.add_pass(ConstantFoldingPass);
        manager.add_pass(CopyPropagationPass);
        manager.add_pass(ControlFlowSimplificationPass);
        manager.add_pass(DeadCodeEliminationPass);
        manager
    }

    /// Run all passes once, in order
    pub fn run(&self, function: &mut IrFunction) -> OptimizationResult {
        let mut total = OptimizationResult::unchanged();
        for pass in &self.passes {
            let result = pass.run_on_function(function);
            if result.modified {
                trace!("{}: {} modified the graph", function.name, pass.name());
            }
            total = total.combine(result);
        }
        total
    }
}

/// Dead code elimination pass
pub struct DeadCodeEliminationPass;

impl DeadCodeEliminationPass {
    fn find_used_registers(function: &IrFunction) -> FxHashSet<IrId> {
        let mut used = FxHashSet::default();

        for block in function.cfg.blocks.values() {
            for phi in &block.phi_nodes {
                used.extend(phi.incoming.iter().map(|&(_, value)| value));
            }
            for inst in &block.instructions {
                inst.visit_uses(|id| {
                    used.insert(id);
                });
            }
            used.extend(block.terminator.uses());
        }

        used
    }
}

impl OptimizationPass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn run_on_function(&self, function: &mut IrFunction) -> OptimizationResult {
        let mut result = OptimizationResult::unchanged();

        // Removing one dead value can make its operands dead
        loop {
            let used = Self::find_used_registers(function);
            let mut eliminated = 0;

            for block in function.cfg.blocks.values_mut() {
                let phis = block.phi_nodes.len();
                block.phi_nodes.retain(|phi| used.contains(&phi.dest));

                let original_len = block.instructions.len();
                block.instructions.retain(|inst| match inst.dest() {
                    Some(dest) => used.contains(&dest) || inst.has_side_effects(),
                    None => true,
                });
                eliminated += original_len - block.instructions.len() + phis - block.phi_nodes.len();
            }

            if eliminated == 0 {
                break;
            }
            result.modified = true;
            result.instructions_eliminated += eliminated;
        }

        result
    }
}

/// Constant folding pass
pub struct ConstantFoldingPass;

impl ConstantFoldingPass {
    fn fold_binary_op(op: BinaryOp, left: &IrValue, right: &IrValue) -> Option<IrValue> {
        use BinaryOp::*;
        let (IrValue::Int(a), IrValue::Int(b)) = (left, right) else {
            return None;
        };
        let (a, b) = (*a, *b);

        let value = match op {
            Add => a.wrapping_add(b),
            Sub => a.wrapping_sub(b),
            Mul => a.wrapping_mul(b),
            Div if b != 0 => a.wrapping_div(b),
            Rem if b != 0 => a.wrapping_rem(b),
            And => a & b,
            Or => a | b,
            Xor => a ^ b,
            Shl if (0..64).contains(&b) => a.wrapping_shl(b as u32),
            Shr if (0..64).contains(&b) => a >> b,
            _ => return None,
        };
        Some(IrValue::Int(value))
    }

    fn fold_comparison(op: CompareOp, left: &IrValue, right: &IrValue) -> Option<IrValue> {
        use CompareOp::*;

        let result = match (left, right) {
            (IrValue::Int(a), IrValue::Int(b)) => match op {
                Eq => a == b,
                Ne => a != b,
                Lt => a < b,
                Le => a <= b,
                Gt => a > b,
                Ge => a >= b,
                ULt => (*a as u64) < (*b as u64),
                ULe => (*a as u64) <= (*b as u64),
            },
            (IrValue::Bool(a), IrValue::Bool(b)) => match op {
                Eq => a == b,
                Ne => a != b,
                _ => return None,
            },
            _ => return None,
        };
        Some(IrValue::Bool(result))
    }

    fn fold_unary_op(op: UnaryOp, operand: &IrValue) -> Option<IrValue> {
        match (op, operand) {
            (UnaryOp::Neg, IrValue::Int(a)) => Some(IrValue::Int(a.wrapping_neg())),
            (UnaryOp::Neg, IrValue::Double(a)) => Some(IrValue::Double(-a)),
            (UnaryOp::Not, IrValue::Bool(b)) => Some(IrValue::Bool(!b)),
            _ => None,
        }
    }
}

impl OptimizationPass for ConstantFoldingPass {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn run_on_function(&self, function: &mut IrFunction) -> OptimizationResult {
        let mut result = OptimizationResult::unchanged();
        let mut constants: FxHashMap<IrId, IrValue> = FxHashMap::default();

        for block in function.cfg.blocks.values() {
            for inst in &block.instructions {
                if let IrInstruction::Const { dest, value } = inst {
                    constants.insert(*dest, value.clone());
                }
            }
        }

        // Blocks are visited in reverse postorder so folded operands are
        // known before their users.
        let order: Vec<_> = function.cfg.reverse_postorder();
        for block_id in order {
            let Some(block) = function.cfg.get_block_mut(block_id) else {
                continue;
            };
            for inst in &mut block.instructions {
                let folded = match &*inst {
                    IrInstruction::BinOp { dest, op, left, right } => constants
                        .get(left)
                        .zip(constants.get(right))
                        .and_then(|(l, r)| Self::fold_binary_op(*op, l, r))
                        .map(|v| (*dest, v)),
                    IrInstruction::Cmp { dest, op, left, right } => constants
                        .get(left)
                        .zip(constants.get(right))
                        .and_then(|(l, r)| Self::fold_comparison(*op, l, r))
                        .map(|v| (*dest, v)),
                    IrInstruction::UnOp { dest, op, operand } => constants
                        .get(operand)
                        .and_then(|v| Self::fold_unary_op(*op, v))
                        .map(|v| (*dest, v)),
                    _ => None,
                };

                if let Some((dest, value)) = folded {
                    *inst = IrInstruction::Const { dest, value: value.clone() };
                    constants.insert(dest, value);
                    result.modified = true;
                }
            }
        }

        result
    }
}

/// Copy propagation pass
pub struct CopyPropagationPass;

impl OptimizationPass for CopyPropagationPass {
    fn name(&self) -> &'static str {
        "copy-propagation"
    }

    fn run_on_function(&self, function: &mut IrFunction) -> OptimizationResult {
        let mut copies: FxHashMap<IrId, IrId> = FxHashMap::default();
        for block in function.cfg.blocks.values() {
            for inst in &block.instructions {
                if let IrInstruction::Copy { dest, src } = inst {
                    copies.insert(*dest, *src);
                }
            }
        }

        if copies.is_empty() {
            return OptimizationResult::unchanged();
        }

        // Resolve chains of copies to their root
        let resolve = |mut id: IrId| {
            let mut steps = 0;
            while let Some(&src) = copies.get(&id) {
                id = src;
                steps += 1;
                if steps > copies.len() {
                    break;
                }
            }
            id
        };

        for block in function.cfg.blocks.values_mut() {
            for phi in &mut block.phi_nodes {
                for (_, value) in &mut phi.incoming {
                    *value = resolve(*value);
                }
            }
            for inst in &mut block.instructions {
                inst.for_each_use_mut(|id| *id = resolve(*id));
            }
            block.terminator.for_each_use_mut(|id| *id = resolve(*id));
        }

        OptimizationResult {
            modified: true,
            ..Default::default()
        }
    }
}

/// Branches on constant conditions become unconditional
pub struct ControlFlowSimplificationPass;

impl OptimizationPass for ControlFlowSimplificationPass {
    fn name(&self) -> &'static str {
        "control-flow-simplification"
    }

    fn run_on_function(&self, function: &mut IrFunction) -> OptimizationResult {
        let mut constants: FxHashMap<IrId, bool> = FxHashMap::default();
        for block in function.cfg.blocks.values() {
            for inst in &block.instructions {
                if let IrInstruction::Const { dest, value: IrValue::Bool(b) } = inst {
                    constants.insert(*dest, *b);
                }
            }
        }

        let mut modified = false;
        for block in function.cfg.blocks.values_mut() {
            if let IrTerminator::CondBranch {
                condition,
                true_target,
                false_target,
            } = &block.terminator
            {
                if let Some(&value) = constants.get(condition) {
                    let target = if value { *true_target } else { *false_target };
                    block.terminator = IrTerminator::Branch { target };
                    modified = true;
                }
            }
        }

        if !modified {
            return OptimizationResult::unchanged();
        }

        let before = function.cfg.blocks.len();
        function.cfg.discover_blocks();
        OptimizationResult {
            modified: true,
            instructions_eliminated: 0,
            blocks_eliminated: before - function.cfg.blocks.len(),
        }
    }
}
