//! Graph Splicer
//!
//! Copies a callee graph into the caller's block arena and wires it in place
//! of a call. Callee values, blocks, call ids, inline frames and try regions
//! are all renumbered into the caller's id spaces. Callee blocks outside any
//! try region join the region of the call.
//!
//! A callee that is a single returning block is pasted over the call
//! instruction and the block order is left alone. Anything larger splits the
//! call's block, routes every return into the continuation block through an
//! `ExitCollector` and rediscovers the block order.

use super::error::BailoutReason;
use super::substitution::StubSource;
use crate::ir::{
    CallId, ClassId, InlineFrameId, IrBlockId, IrFunction, IrId, IrInstruction, IrPhiNode,
    IrTerminator, IrValue, TryIndex,
};
use fxhash::FxHashMap;
use log::trace;
use std::mem;

/// Receiver redefinition placed at the entry of an inlined instance method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverRefinement {
    /// Callee parameter index of the receiver
    pub index: u32,
    /// Class proven by the dispatch guard, when it proves a single class
    pub refined: Option<ClassId>,
}

/// A callee body copied into the caller arena but not yet linked
#[derive(Debug, Clone)]
pub struct ImportedBody {
    pub entry: IrBlockId,
    /// Blocks that returned in the callee, with the returned value.
    /// Their terminators are `Unreachable` until the exits are collected.
    pub exits: Vec<(IrBlockId, Option<IrId>)>,
    pub blocks: Vec<IrBlockId>,
    pub has_handlers: bool,
}

impl ImportedBody {
    /// Single block that falls straight through to its return
    fn is_linear(&self) -> bool {
        self.blocks.len() == 1
            && !self.has_handlers
            && matches!(self.exits.as_slice(), [(block, _)] if *block == self.entry)
    }
}

/// Copy `callee` into `caller`.
///
/// Parameters are resolved through `sources`; constants move to the caller's
/// pool. `frame` is the caller frame the callee's own code belongs to and
/// `call_try` the try region of the call being replaced.
pub fn import_callee(
    caller: &mut IrFunction,
    callee: &IrFunction,
    sources: &[StubSource],
    frame: InlineFrameId,
    call_try: Option<TryIndex>,
    receiver: Option<ReceiverRefinement>,
) -> ImportedBody {
    // Blocks
    let mut block_map: FxHashMap<IrBlockId, IrBlockId> = FxHashMap::default();
    let mut blocks = Vec::with_capacity(callee.cfg.blocks.len());
    for (old_id, old_block) in &callee.cfg.blocks {
        let new_id = caller.cfg.create_block();
        if let Some(block) = caller.cfg.get_block_mut(new_id) {
            block.label = Some(match &old_block.label {
                Some(label) => format!("{}.{}", callee.name, label),
                None => format!("{}.{}", callee.name, old_id),
            });
        }
        block_map.insert(*old_id, new_id);
        blocks.push(new_id);
    }

    // Try regions
    let mut try_map: FxHashMap<TryIndex, TryIndex> = FxHashMap::default();
    for old_index in callee.cfg.catch_handlers.keys() {
        try_map.insert(*old_index, caller.cfg.alloc_try_index());
    }
    let remap_try = |index: Option<TryIndex>| match index {
        Some(index) => try_map.get(&index).copied().or(call_try),
        None => call_try,
    };

    // Inline frames: the callee's root frame becomes `frame`
    let mut frame_map: Vec<InlineFrameId> = Vec::with_capacity(callee.inline_frames.len());
    for (i, callee_frame) in callee.inline_frames.iter().enumerate() {
        if i == 0 {
            frame_map.push(frame);
            continue;
        }
        let parent = callee_frame
            .parent
            .and_then(|p| frame_map.get(p.0 as usize).copied())
            .unwrap_or(frame);
        frame_map.push(caller.push_frame(callee_frame.function, parent, None));
    }

    // Values
    let mut value_map: FxHashMap<IrId, IrId> = FxHashMap::default();
    let mut redefinition: Option<IrInstruction> = None;
    for block in callee.cfg.blocks.values() {
        for phi in &block.phi_nodes {
            value_map.insert(phi.dest, caller.alloc_reg());
        }
        for inst in &block.instructions {
            let Some(dest) = inst.dest() else {
                continue;
            };
            let mapped = match inst {
                IrInstruction::Parameter { index, .. } => {
                    match sources.get(*index as usize) {
                        Some(StubSource::Actual(actual)) => match receiver {
                            Some(refinement) if refinement.index == *index => {
                                let redefined = caller.alloc_reg();
                                redefinition = Some(IrInstruction::Redefinition {
                                    dest: redefined,
                                    value: *actual,
                                    refined: refinement.refined,
                                });
                                redefined
                            }
                            _ => *actual,
                        },
                        Some(StubSource::Constant(value)) | Some(StubSource::Default(value)) => {
                            caller.get_or_insert_constant(value.clone())
                        }
                        // Rejected by `check_stubs` before any splice
                        None => caller.get_or_insert_constant(IrValue::Null),
                    }
                }
                IrInstruction::Const { value, .. } => caller.get_or_insert_constant(value.clone()),
                _ => caller.alloc_reg(),
            };
            value_map.insert(dest, mapped);
        }
    }
    let remap = |id: &mut IrId| {
        if let Some(mapped) = value_map.get(id) {
            *id = *mapped;
        }
    };
    let remap_block = |id: IrBlockId| block_map.get(&id).copied().unwrap_or(id);

    // Copy
    let mut exits = Vec::new();
    for (old_id, old_block) in &callee.cfg.blocks {
        let new_id = remap_block(*old_id);

        let phi_nodes: Vec<IrPhiNode> = old_block
            .phi_nodes
            .iter()
            .map(|phi| {
                let mut dest = phi.dest;
                remap(&mut dest);
                IrPhiNode {
                    dest,
                    incoming: phi
                        .incoming
                        .iter()
                        .map(|(pred, value)| {
                            let mut value = *value;
                            remap(&mut value);
                            (remap_block(*pred), value)
                        })
                        .collect(),
                }
            })
            .collect();

        let mut instructions = Vec::with_capacity(old_block.instructions.len());
        for inst in &old_block.instructions {
            if matches!(inst, IrInstruction::Parameter { .. } | IrInstruction::Const { .. }) {
                continue;
            }
            let mut inst = inst.clone();
            if let Some(dest) = inst.dest_mut() {
                remap(dest);
            }
            inst.for_each_use_mut(remap);
            if let Some(call) = inst.call_info_mut() {
                call.call_id = caller.alloc_call_id();
                call.frame = frame_map.get(call.frame.0 as usize).copied().unwrap_or(frame);
            }
            instructions.push(inst);
        }

        let terminator = match &old_block.terminator {
            IrTerminator::Return { value } => {
                let mut value = *value;
                if let Some(v) = value.as_mut() {
                    remap(v);
                }
                exits.push((new_id, value));
                IrTerminator::Unreachable
            }
            other => {
                let mut term = other.clone();
                term.for_each_use_mut(remap);
                term.map_targets(remap_block);
                term
            }
        };

        let try_index = remap_try(old_block.try_index);
        if let Some(block) = caller.cfg.get_block_mut(new_id) {
            block.phi_nodes = phi_nodes;
            block.instructions = instructions;
            block.terminator = terminator;
            block.try_index = try_index;
        }
    }

    for (old_index, entry) in &callee.cfg.catch_handlers {
        if let Some(new_index) = try_map.get(old_index) {
            let outer = remap_try(entry.outer);
            caller
                .cfg
                .register_handler(*new_index, remap_block(entry.handler), outer);
        }
    }

    let entry = remap_block(callee.cfg.entry_block);
    if let Some(redefinition) = redefinition {
        if let Some(block) = caller.cfg.get_block_mut(entry) {
            block.instructions.insert(0, redefinition);
        }
    }

    trace!(
        "imported {} into {}: {} blocks, {} exits",
        callee.name,
        caller.name,
        blocks.len(),
        exits.len()
    );
    ImportedBody {
        entry,
        exits,
        blocks,
        has_handlers: !callee.cfg.catch_handlers.is_empty(),
    }
}

/// Split `block` at instruction `index`.
///
/// The instruction at `index` is removed and returned; everything after it
/// moves to a new continuation block together with the terminator. The
/// original block is left ending in `Unreachable` for the caller to relink.
pub fn split_block_at(
    caller: &mut IrFunction,
    block_id: IrBlockId,
    index: usize,
) -> Option<(IrBlockId, IrInstruction)> {
    let try_index = caller.cfg.get_block(block_id)?.try_index;
    if index >= caller.cfg.get_block(block_id)?.instructions.len() {
        return None;
    }
    let continuation = caller.cfg.create_block_in(try_index);

    let block = caller.cfg.get_block_mut(block_id)?;
    let tail = block.instructions.split_off(index + 1);
    let removed = block.instructions.pop()?;
    let terminator = mem::replace(&mut block.terminator, IrTerminator::Unreachable);
    let successors = terminator.successors();

    if let Some(cont) = caller.cfg.get_block_mut(continuation) {
        cont.instructions = tail;
        cont.terminator = terminator;
    }
    for succ in successors {
        if let Some(succ_block) = caller.cfg.get_block_mut(succ) {
            succ_block.rename_phi_predecessor(block_id, continuation);
        }
    }
    Some((continuation, removed))
}

/// Unifies the returns of one or more inlined bodies (and residual calls)
/// into a join block
#[derive(Debug, Default)]
pub struct ExitCollector {
    exits: Vec<(IrBlockId, Option<IrId>)>,
}

impl ExitCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, block: IrBlockId, value: Option<IrId>) {
        self.exits.push((block, value));
    }

    pub fn add_body(&mut self, body: &ImportedBody) {
        self.exits.extend(body.exits.iter().copied());
    }

    pub fn len(&self) -> usize {
        self.exits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exits.is_empty()
    }

    /// Branch every exit to `join` and return the merged result value,
    /// adding a phi when the exits disagree.
    pub fn join(self, caller: &mut IrFunction, join: IrBlockId) -> IrId {
        let null = caller.get_or_insert_constant(IrValue::Null);
        let values: Vec<(IrBlockId, IrId)> = self
            .exits
            .iter()
            .map(|(block, value)| (*block, value.unwrap_or(null)))
            .collect();

        for (block, _) in &values {
            if let Some(exit) = caller.cfg.get_block_mut(*block) {
                exit.terminator = IrTerminator::Branch { target: join };
            }
        }

        match values.as_slice() {
            [] => null,
            [(_, value)] => *value,
            [(_, first), rest @ ..] if rest.iter().all(|(_, v)| v == first) => *first,
            _ => {
                let dest = caller.alloc_reg();
                if let Some(block) = caller.cfg.get_block_mut(join) {
                    block.phi_nodes.push(IrPhiNode {
                        dest,
                        incoming: values,
                    });
                }
                dest
            }
        }
    }
}

/// Size of the spliced body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceOutcome {
    pub blocks: usize,
    pub linear: bool,
}

/// Replace call `call_id` with the body of `callee`
pub fn inline_call(
    caller: &mut IrFunction,
    call_id: CallId,
    callee: &IrFunction,
    sources: &[StubSource],
    frame: InlineFrameId,
    receiver: Option<ReceiverRefinement>,
) -> Result<SpliceOutcome, BailoutReason> {
    let (block_id, _) = caller
        .locate_call(call_id)
        .ok_or_else(|| BailoutReason::ParseOrCompileError(format!("{} vanished", call_id)))?;
    let call_try = caller.cfg.get_block(block_id).and_then(|b| b.try_index);

    let body = import_callee(caller, callee, sources, frame, call_try, receiver);
    let outcome = SpliceOutcome {
        blocks: body.blocks.len(),
        linear: body.is_linear(),
    };
    let linear_value = match body.exits.first() {
        Some((_, Some(value))) if outcome.linear => Some(*value),
        _ if outcome.linear => Some(caller.get_or_insert_constant(IrValue::Null)),
        _ => None,
    };

    // Pooling constants may have shifted the call within the entry block
    let (block_id, index) = caller
        .locate_call(call_id)
        .ok_or_else(|| BailoutReason::ParseOrCompileError(format!("{} vanished", call_id)))?;
    let result = caller
        .cfg
        .get_block(block_id)
        .and_then(|b| b.instructions.get(index))
        .and_then(|inst| inst.dest());

    if let Some(value) = linear_value {
        let pasted = caller
            .cfg
            .blocks
            .shift_remove(&body.entry)
            .map(|b| b.instructions)
            .unwrap_or_default();
        if let Some(block) = caller.cfg.get_block_mut(block_id) {
            let tail = block.instructions.split_off(index + 1);
            block.instructions.pop();
            block.instructions.extend(pasted);
            block.instructions.extend(tail);
        }
        if let Some(result) = result {
            caller.replace_all_uses(result, value);
        }
        trace!("{}: pasted {} in place", caller.name, callee.name);
        return Ok(outcome);
    }

    let (continuation, _call) = split_block_at(caller, block_id, index)
        .ok_or_else(|| BailoutReason::ParseOrCompileError(format!("cannot split at {}", call_id)))?;
    if let Some(block) = caller.cfg.get_block_mut(block_id) {
        block.terminator = IrTerminator::Branch { target: body.entry };
    }

    let mut collector = ExitCollector::new();
    collector.add_body(&body);
    let value = collector.join(caller, continuation);
    if let Some(result) = result {
        caller.replace_all_uses(result, value);
    }
    caller.cfg.discover_blocks();
    trace!(
        "{}: spliced {} ({} blocks, continuation {})",
        caller.name,
        callee.name,
        body.blocks.len(),
        continuation
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::validation::validate_function;
    use crate::ir::{BinaryOp, CompareOp, FunctionId, IrBuilder};

    fn max_function() -> IrFunction {
        let mut b = IrBuilder::new(FunctionId(1), "max");
        let x = b.build_parameter(0);
        let y = b.build_parameter(1);
        let then_bb = b.create_block();
        let else_bb = b.create_block();
        let cond = b.build_cmp(CompareOp::Gt, x, y);
        b.build_cond_branch(cond, then_bb, else_bb);
        b.switch_to_block(then_bb);
        b.build_return(Some(x));
        b.switch_to_block(else_bb);
        b.build_return(Some(y));
        b.finish()
    }

    fn caller_of(target: FunctionId) -> (IrFunction, CallId, IrId, IrId) {
        let mut b = IrBuilder::new(FunctionId(0), "main");
        let a = b.build_parameter(0);
        let ten = b.build_int(10);
        let r = b.build_static_call(target, &[a, ten]);
        let doubled = b.build_binop(BinaryOp::Add, r, r);
        b.build_return(Some(doubled));
        let call = b.call_id_of(r).unwrap();
        (b.finish(), call, a, doubled)
    }

    #[test]
    fn test_linear_callee_pasted_in_place() {
        let mut b = IrBuilder::new(FunctionId(1), "add1");
        let x = b.build_parameter(0);
        let one = b.build_int(1);
        let s = b.build_binop(BinaryOp::Add, x, one);
        b.build_return(Some(s));
        let callee = b.finish();

        let (mut caller, call, a, _) = caller_of(FunctionId(1));
        let frame = caller.push_frame(FunctionId(1), InlineFrameId::ROOT, None);
        let sources = vec![StubSource::Actual(a)];
        let outcome = inline_call(&mut caller, call, &callee, &sources, frame, None).unwrap();

        assert!(outcome.linear);
        assert_eq!(caller.cfg.blocks.len(), 1);
        assert_eq!(caller.call_count(), 0);
        assert!(validate_function(&caller).is_ok());
    }

    #[test]
    fn test_multi_exit_callee_gets_join_phi() {
        let callee = max_function();
        let (mut caller, call, a, _) = caller_of(FunctionId(1));
        let frame = caller.push_frame(FunctionId(1), InlineFrameId::ROOT, None);
        let ten = caller.get_or_insert_constant(IrValue::Int(10));
        let sources = vec![StubSource::Actual(a), StubSource::Constant(IrValue::Int(10))];
        let outcome = inline_call(&mut caller, call, &callee, &sources, frame, None).unwrap();

        assert!(!outcome.linear);
        // entry, 3 callee blocks, continuation
        assert_eq!(caller.cfg.blocks.len(), 5);
        let join = caller
            .cfg
            .blocks
            .values()
            .find(|b| !b.phi_nodes.is_empty())
            .unwrap();
        let incoming: Vec<IrId> = join.phi_nodes[0].incoming.iter().map(|(_, v)| *v).collect();
        assert!(incoming.contains(&a));
        assert!(incoming.contains(&ten));
        assert!(validate_function(&caller).is_ok(), "{:?}", validate_function(&caller));
    }

    #[test]
    fn test_callee_blocks_inherit_call_try_region() {
        let callee = max_function();

        let mut b = IrBuilder::new(FunctionId(0), "guarded");
        let a = b.build_parameter(0);
        let handler = b.create_block();
        let region = b.begin_try(handler);
        let body = b.create_block();
        b.end_try();
        b.build_branch(body);
        b.switch_to_block(body);
        let r = b.build_static_call(FunctionId(1), &[a, a]);
        b.build_return(Some(r));
        b.switch_to_block(handler);
        let e = b.build_catch_parameter();
        b.build_return(Some(e));
        let call = b.call_id_of(r).unwrap();
        let mut caller = b.finish();

        let frame = caller.push_frame(FunctionId(1), InlineFrameId::ROOT, None);
        let sources = vec![StubSource::Actual(a), StubSource::Actual(a)];
        inline_call(&mut caller, call, &callee, &sources, frame, None).unwrap();

        let in_region = caller
            .cfg
            .blocks
            .values()
            .filter(|b| b.try_index == Some(region))
            .count();
        // original body, 3 callee blocks, continuation
        assert_eq!(in_region, 5);
        assert!(validate_function(&caller).is_ok());
    }

    #[test]
    fn test_receiver_redefinition() {
        let mut b = IrBuilder::new(FunctionId(1), "getX");
        let this = b.build_parameter(0);
        let x = b.build_load_field(this, 0);
        b.build_return(Some(x));
        let callee = b.finish();

        let (mut caller, call, a, _) = caller_of(FunctionId(1));
        let frame = caller.push_frame(FunctionId(1), InlineFrameId::ROOT, None);
        let refinement = ReceiverRefinement {
            index: 0,
            refined: Some(ClassId(20)),
        };
        inline_call(&mut caller, call, &callee, &[StubSource::Actual(a)], frame, Some(refinement)).unwrap();

        let entry = caller.cfg.get_block(caller.entry_block()).unwrap();
        let redefined = entry.instructions.iter().find_map(|inst| match inst {
            IrInstruction::Redefinition { value, refined, dest } => Some((*value, *refined, *dest)),
            _ => None,
        });
        let (value, refined, dest) = redefined.unwrap();
        assert_eq!((value, refined), (a, Some(ClassId(20))));
        assert!(entry.instructions.iter().any(|inst| matches!(
            inst,
            IrInstruction::LoadField { object, .. } if *object == dest
        )));
    }

    #[test]
    fn test_nested_calls_get_fresh_ids_and_frames() {
        let mut b = IrBuilder::new(FunctionId(1), "wrapper");
        let x = b.build_parameter(0);
        let r = b.build_static_call(FunctionId(2), &[x]);
        b.build_return(Some(r));
        let callee = b.finish();

        let (mut caller, call, a, _) = caller_of(FunctionId(1));
        let frame = caller.push_frame(FunctionId(1), InlineFrameId::ROOT, None);
        inline_call(&mut caller, call, &callee, &[StubSource::Actual(a)], frame, None).unwrap();

        let nested: Vec<_> = caller
            .cfg
            .blocks
            .values()
            .flat_map(|b| b.instructions.iter())
            .filter_map(|i| i.call_info())
            .collect();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].frame, frame);
        assert_ne!(nested[0].call_id, call);
        assert_eq!(caller.frame_depth(nested[0].frame), 1);
    }
}
