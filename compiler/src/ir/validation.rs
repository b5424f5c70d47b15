//! Flow-graph Validation
//!
//! Structural checks run after graph surgery: block reachability, edge and
//! predecessor agreement, phi arity, SSA single definition, dominance of
//! uses by definitions, try-region consistency and leftover parameter stubs.

use super::loop_analysis::DominatorTree;
use super::{CallId, IrBlockId, IrFunction, IrId, IrInstruction, TryIndex};
use fxhash::{FxHashMap, FxHashSet};
use log::warn;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub block: Option<IrBlockId>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.block {
            Some(block) => write!(f, "{}: {}", block, self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Types of validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationErrorKind {
    #[error("entry block missing or has predecessors")]
    InvalidEntry,

    #[error("block is unreachable from the entry")]
    UnreachableBlock,

    #[error("edge to non-existent block {target}")]
    DanglingEdge { target: IrBlockId },

    #[error("predecessor list does not match incoming edges")]
    PredecessorMismatch,

    #[error("phi {dest} does not have exactly one input per predecessor")]
    InvalidPhiNode { dest: IrId },

    #[error("{register} defined more than once")]
    MultipleDefinitions { register: IrId },

    #[error("{register} used but never defined")]
    UndefinedUse { register: IrId },

    #[error("use of {register} not dominated by its definition")]
    UseNotDominated { register: IrId },

    #[error("edge to {target} crosses unrelated try regions")]
    InconsistentTryChain { target: IrBlockId },

    #[error("unknown try region {0}")]
    UnknownTryIndex(TryIndex),

    #[error("handler of {0} is missing or runs in the wrong region")]
    InvalidHandler(TryIndex),

    #[error("parameter stub {register} outside the entry block or duplicated")]
    StrayParameter { register: IrId },

    #[error("catch parameter outside a handler block")]
    StrayCatchParameter,

    #[error("{0} appears twice")]
    DuplicateCallId(CallId),
}

struct Validator<'a> {
    function: &'a IrFunction,
    errors: Vec<ValidationError>,
}

impl<'a> Validator<'a> {
    fn error(&mut self, block: Option<IrBlockId>, kind: ValidationErrorKind) {
        self.errors.push(ValidationError { kind, block });
    }

    fn check_structure(&mut self) -> Option<DominatorTree> {
        let function = self.function;
        let cfg = &function.cfg;
        let entry_ok = cfg
            .get_block(cfg.entry_block)
            .map(|b| b.predecessors.is_empty())
            .unwrap_or(false);
        if !entry_ok {
            self.error(None, ValidationErrorKind::InvalidEntry);
            return None;
        }

        let mut expected_preds: FxHashMap<IrBlockId, FxHashSet<IrBlockId>> = FxHashMap::default();
        for (id, block) in &cfg.blocks {
            for succ in block.successors() {
                if !cfg.blocks.contains_key(&succ) {
                    self.error(Some(*id), ValidationErrorKind::DanglingEdge { target: succ });
                }
                expected_preds.entry(succ).or_default().insert(*id);
            }
        }

        let domtree = DominatorTree::compute(cfg);
        for (id, block) in &cfg.blocks {
            if !domtree.is_reachable(*id) {
                self.error(Some(*id), ValidationErrorKind::UnreachableBlock);
            }

            let actual: FxHashSet<IrBlockId> = block.predecessors.iter().copied().collect();
            let expected = expected_preds.remove(id).unwrap_or_default();
            if actual != expected || actual.len() != block.predecessors.len() {
                self.error(Some(*id), ValidationErrorKind::PredecessorMismatch);
            }

            for phi in &block.phi_nodes {
                let incoming: FxHashSet<IrBlockId> = phi.incoming.iter().map(|(b, _)| *b).collect();
                if incoming != actual || phi.incoming.len() != block.predecessors.len() {
                    self.error(Some(*id), ValidationErrorKind::InvalidPhiNode { dest: phi.dest });
                }
            }
        }

        Some(domtree)
    }

    fn check_try_regions(&mut self) {
        let function = self.function;
        let cfg = &function.cfg;

        for (index, entry) in &cfg.catch_handlers {
            let handler_ok = cfg
                .get_block(entry.handler)
                .map(|b| b.try_index == entry.outer)
                .unwrap_or(false);
            if !handler_ok {
                self.error(None, ValidationErrorKind::InvalidHandler(*index));
            }
        }

        let handlers: FxHashSet<IrBlockId> = cfg.catch_handlers.values().map(|e| e.handler).collect();

        for (id, block) in &cfg.blocks {
            if let Some(index) = block.try_index {
                if !cfg.catch_handlers.contains_key(&index) {
                    self.error(Some(*id), ValidationErrorKind::UnknownTryIndex(index));
                }
            }

            for succ in block.successors() {
                let Some(target) = cfg.get_block(succ) else {
                    continue;
                };
                let entering = cfg.try_nested_in(target.try_index, block.try_index);
                let leaving = cfg.try_nested_in(block.try_index, target.try_index);
                if !entering && !leaving {
                    self.error(Some(*id), ValidationErrorKind::InconsistentTryChain { target: succ });
                }
            }

            let stray_catch = block
                .instructions
                .iter()
                .any(|inst| matches!(inst, IrInstruction::CatchParameter { .. }));
            if stray_catch && !handlers.contains(id) {
                self.error(Some(*id), ValidationErrorKind::StrayCatchParameter);
            }
        }
    }

    fn check_ssa(&mut self, domtree: &DominatorTree) {
        let function = self.function;
        let entry = function.entry_block();

        // Definition sites: (block, position); phis sit before position 0
        let mut defs: FxHashMap<IrId, (IrBlockId, isize)> = FxHashMap::default();
        let mut parameter_indices = FxHashSet::default();
        let mut call_ids = FxHashSet::default();

        for (id, block) in &function.cfg.blocks {
            let phi_defs = block.phi_nodes.iter().map(|phi| (phi.dest, -1));
            let inst_defs = block
                .instructions
                .iter()
                .enumerate()
                .filter_map(|(i, inst)| inst.dest().map(|d| (d, i as isize)));
            for (dest, position) in phi_defs.chain(inst_defs).collect::<Vec<_>>() {
                if defs.insert(dest, (*id, position)).is_some() {
                    self.error(Some(*id), ValidationErrorKind::MultipleDefinitions { register: dest });
                }
            }

            for inst in &block.instructions {
                if let IrInstruction::Parameter { dest, index } = inst {
                    if *id != entry || !parameter_indices.insert(*index) {
                        self.error(Some(*id), ValidationErrorKind::StrayParameter { register: *dest });
                    }
                }
                if let Some(call) = inst.call_info() {
                    if !call_ids.insert(call.call_id) {
                        self.error(Some(*id), ValidationErrorKind::DuplicateCallId(call.call_id));
                    }
                }
            }
        }

        let check_use = |errors: &mut Vec<ValidationError>, register: IrId, block: IrBlockId, position: isize| {
            match defs.get(&register) {
                None => errors.push(ValidationError {
                    kind: ValidationErrorKind::UndefinedUse { register },
                    block: Some(block),
                }),
                Some(&(def_block, def_position)) => {
                    let dominated = if def_block == block {
                        def_position < position
                    } else {
                        domtree.dominates(def_block, block)
                    };
                    if !dominated {
                        errors.push(ValidationError {
                            kind: ValidationErrorKind::UseNotDominated { register },
                            block: Some(block),
                        });
                    }
                }
            }
        };

        for (id, block) in &function.cfg.blocks {
            for phi in &block.phi_nodes {
                for &(pred, value) in &phi.incoming {
                    // A phi input is used at the end of its predecessor
                    check_use(&mut self.errors, value, pred, isize::MAX);
                }
            }
            for (i, inst) in block.instructions.iter().enumerate() {
                inst.visit_uses(|register| check_use(&mut self.errors, register, *id, i as isize));
            }
            for register in block.terminator.uses() {
                check_use(&mut self.errors, register, *id, isize::MAX);
            }
        }
    }
}

/// Validate a flow graph, returning every violation found
pub fn validate_function(function: &IrFunction) -> Result<(), Vec<ValidationError>> {
    let mut validator = Validator {
        function,
        errors: Vec::new(),
    };

    if let Some(domtree) = validator.check_structure() {
        validator.check_try_regions();
        validator.check_ssa(&domtree);
    }

    if validator.errors.is_empty() {
        Ok(())
    } else {
        for error in &validator.errors {
            warn!("{}: invalid graph: {}", function.name, error);
        }
        Err(validator.errors)
    }
}
