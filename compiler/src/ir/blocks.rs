//! Basic Blocks and the Block Arena
//!
//! Blocks are stored in an insertion-ordered arena keyed by dense ids. A block
//! may belong to a try region; every block of region `t` has an exceptional
//! edge to the handler registered for `t`. Handlers themselves sit in the
//! region's outer try (or in none).

use super::{IrId, IrInstruction, TryIndex};
use fxhash::{FxBuildHasher, FxHashSet};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub type BlockArena = IndexMap<IrBlockId, IrBasicBlock, FxBuildHasher>;

/// A basic block in the flow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrBasicBlock {
    /// Unique identifier for this block
    pub id: IrBlockId,

    /// Human-readable label (for debugging)
    pub label: Option<String>,

    /// Phi nodes at the beginning of this block
    pub phi_nodes: Vec<IrPhiNode>,

    /// Instructions in this block (executed sequentially)
    pub instructions: Vec<IrInstruction>,

    /// Terminator instruction (branch, return, etc.)
    pub terminator: IrTerminator,

    /// Normal-flow predecessors; exceptional edges are not listed
    pub predecessors: Vec<IrBlockId>,

    /// Innermost try region containing this block
    pub try_index: Option<TryIndex>,
}

/// Unique identifier for basic blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IrBlockId(pub u32);

impl IrBlockId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn entry() -> Self {
        Self(0)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for IrBlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Phi node for merging values from different control flow paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrPhiNode {
    /// Destination register for the phi result
    pub dest: IrId,

    /// Incoming values from predecessor blocks
    pub incoming: Vec<(IrBlockId, IrId)>,
}

impl IrPhiNode {
    pub fn incoming_from(&self, pred: IrBlockId) -> Option<IrId> {
        self.incoming
            .iter()
            .find(|(block, _)| *block == pred)
            .map(|(_, value)| *value)
    }
}

/// Terminator instructions that end a basic block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrTerminator {
    /// Unconditional branch to another block
    Branch { target: IrBlockId },

    /// Conditional branch based on a boolean value
    CondBranch {
        condition: IrId,
        true_target: IrBlockId,
        false_target: IrBlockId,
    },

    /// Return from function
    Return { value: Option<IrId> },

    /// Raise `exception` to the enclosing handler or the caller
    Throw { exception: IrId },

    /// Transfer to unoptimized code
    Deoptimize { reason: String },

    /// Unreachable code (also the state of a freshly created block)
    Unreachable,
}

impl IrTerminator {
    pub fn uses(&self) -> Vec<IrId> {
        match self {
            IrTerminator::CondBranch { condition, .. } => vec![*condition],
            IrTerminator::Return { value: Some(v) } => vec![*v],
            IrTerminator::Throw { exception } => vec![*exception],
            _ => Vec::new(),
        }
    }

    pub fn for_each_use_mut(&mut self, mut f: impl FnMut(&mut IrId)) {
        match self {
            IrTerminator::CondBranch { condition, .. } => f(condition),
            IrTerminator::Return { value: Some(v) } => f(v),
            IrTerminator::Throw { exception } => f(exception),
            _ => {}
        }
    }

    /// Normal-flow successors, without duplicates
    pub fn successors(&self) -> Vec<IrBlockId> {
        match self {
            IrTerminator::Branch { target } => vec![*target],
            IrTerminator::CondBranch {
                true_target,
                false_target,
                ..
            } => {
                if true_target == false_target {
                    vec![*true_target]
                } else {
                    vec![*true_target, *false_target]
                }
            }
            IrTerminator::Return { .. }
            | IrTerminator::Throw { .. }
            | IrTerminator::Deoptimize { .. }
            | IrTerminator::Unreachable => Vec::new(),
        }
    }

    /// Rewrite every edge target through `f`
    pub fn map_targets(&mut self, mut f: impl FnMut(IrBlockId) -> IrBlockId) {
        match self {
            IrTerminator::Branch { target } => *target = f(*target),
            IrTerminator::CondBranch {
                true_target,
                false_target,
                ..
            } => {
                *true_target = f(*true_target);
                *false_target = f(*false_target);
            }
            _ => {}
        }
    }
}

impl IrBasicBlock {
    /// Create a new basic block
    pub fn new(id: IrBlockId) -> Self {
        Self {
            id,
            label: None,
            phi_nodes: Vec::new(),
            instructions: Vec::new(),
            terminator: IrTerminator::Unreachable,
            predecessors: Vec::new(),
            try_index: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add an instruction to this block
    pub fn add_instruction(&mut self, inst: IrInstruction) {
        self.instructions.push(inst);
    }

    /// Add a phi node to this block
    pub fn add_phi(&mut self, phi: IrPhiNode) {
        self.phi_nodes.push(phi);
    }

    /// Set the terminator for this block
    pub fn set_terminator(&mut self, term: IrTerminator) {
        self.terminator = term;
    }

    /// Normal-flow successors based on the terminator
    pub fn successors(&self) -> Vec<IrBlockId> {
        self.terminator.successors()
    }

    /// Rename the predecessor `from` to `to` in every phi
    pub fn rename_phi_predecessor(&mut self, from: IrBlockId, to: IrBlockId) {
        for phi in &mut self.phi_nodes {
            for (pred, _) in &mut phi.incoming {
                if *pred == from {
                    *pred = to;
                }
            }
        }
    }
}

/// A registered catch handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchEntry {
    pub handler: IrBlockId,
    /// Region enclosing the protected region (where the handler itself runs)
    pub outer: Option<TryIndex>,
}

/// Control flow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrControlFlowGraph {
    /// All basic blocks in the function
    pub blocks: BlockArena,

    /// Entry block ID
    pub entry_block: IrBlockId,

    /// Next available block ID
    pub next_block_id: u32,

    /// Try regions and their handlers
    pub catch_handlers: IndexMap<TryIndex, CatchEntry, FxBuildHasher>,

    pub next_try_index: u32,

    /// Reachable blocks in reverse postorder, as of the last `discover_blocks`
    #[serde(skip)]
    block_order: Vec<IrBlockId>,
}

impl Default for IrControlFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl IrControlFlowGraph {
    /// Create a new CFG with an entry block
    pub fn new() -> Self {
        let mut blocks = BlockArena::default();
        let entry_block = IrBlockId::entry();
        blocks.insert(entry_block, IrBasicBlock::new(entry_block).with_label("entry"));

        Self {
            blocks,
            entry_block,
            next_block_id: 1,
            catch_handlers: IndexMap::default(),
            next_try_index: 0,
            block_order: vec![entry_block],
        }
    }

    /// Create a new basic block
    pub fn create_block(&mut self) -> IrBlockId {
        let id = IrBlockId::new(self.next_block_id);
        self.next_block_id += 1;
        self.blocks.insert(id, IrBasicBlock::new(id));
        id
    }

    /// Create a new basic block in try region `try_index`
    pub fn create_block_in(&mut self, try_index: Option<TryIndex>) -> IrBlockId {
        let id = self.create_block();
        self.blocks[&id].try_index = try_index;
        id
    }

    pub fn alloc_try_index(&mut self) -> TryIndex {
        let index = TryIndex(self.next_try_index);
        self.next_try_index += 1;
        index
    }

    /// Register `handler` for `try_index`; the handler runs in `outer`
    pub fn register_handler(&mut self, try_index: TryIndex, handler: IrBlockId, outer: Option<TryIndex>) {
        self.catch_handlers.insert(try_index, CatchEntry { handler, outer });
        if let Some(block) = self.blocks.get_mut(&handler) {
            block.try_index = outer;
        }
    }

    pub fn handler_for(&self, try_index: TryIndex) -> Option<IrBlockId> {
        self.catch_handlers.get(&try_index).map(|entry| entry.handler)
    }

    /// Is `inner` nested in (or equal to) `outer`? `None` is the outermost region.
    pub fn try_nested_in(&self, inner: Option<TryIndex>, outer: Option<TryIndex>) -> bool {
        let mut current = inner;
        let mut steps = 0;
        loop {
            if current == outer {
                return true;
            }
            match current {
                None => return false,
                Some(index) => {
                    current = self.catch_handlers.get(&index).and_then(|entry| entry.outer);
                }
            }
            steps += 1;
            if steps > self.catch_handlers.len() {
                return false;
            }
        }
    }

    /// Get a block by ID
    pub fn get_block(&self, id: IrBlockId) -> Option<&IrBasicBlock> {
        self.blocks.get(&id)
    }

    /// Get a mutable block by ID
    pub fn get_block_mut(&mut self, id: IrBlockId) -> Option<&mut IrBasicBlock> {
        self.blocks.get_mut(&id)
    }

    /// Normal successors plus the exceptional edge to the block's handler
    pub fn all_successors(&self, id: IrBlockId) -> Vec<IrBlockId> {
        let Some(block) = self.blocks.get(&id) else {
            return Vec::new();
        };
        let mut succs = block.successors();
        if let Some(handler) = block.try_index.and_then(|t| self.handler_for(t)) {
            if !succs.contains(&handler) {
                succs.push(handler);
            }
        }
        succs
    }

    /// Rebuild the normal-flow predecessor lists from terminators
    pub fn recompute_predecessors(&mut self) {
        for block in self.blocks.values_mut() {
            block.predecessors.clear();
        }
        let edges: Vec<(IrBlockId, IrBlockId)> = self
            .blocks
            .values()
            .flat_map(|block| block.successors().into_iter().map(move |s| (block.id, s)))
            .collect();
        for (from, to) in edges {
            if let Some(block) = self.blocks.get_mut(&to) {
                if !block.predecessors.contains(&from) {
                    block.predecessors.push(from);
                }
            }
        }
    }

    /// Reachable blocks in reverse postorder, following exceptional edges too
    pub fn reverse_postorder(&self) -> Vec<IrBlockId> {
        let mut visited = FxHashSet::default();
        let mut postorder = Vec::with_capacity(self.blocks.len());
        // (block, successors already expanded)
        let mut stack = vec![(self.entry_block, false)];

        while let Some((block, expanded)) = stack.pop() {
            if expanded {
                postorder.push(block);
                continue;
            }
            if !self.blocks.contains_key(&block) || !visited.insert(block) {
                continue;
            }
            stack.push((block, true));
            for succ in self.all_successors(block).into_iter().rev() {
                if !visited.contains(&succ) {
                    stack.push((succ, false));
                }
            }
        }

        postorder.reverse();
        postorder
    }

    /// Recompute block order and predecessors after structural edits,
    /// dropping unreachable blocks and phi inputs from vanished edges.
    pub fn discover_blocks(&mut self) {
        let order = self.reverse_postorder();
        let reachable: FxHashSet<IrBlockId> = order.iter().copied().collect();

        self.blocks.retain(|id, _| reachable.contains(id));
        self.catch_handlers
            .retain(|_, entry| reachable.contains(&entry.handler));
        self.recompute_predecessors();

        for block in self.blocks.values_mut() {
            let preds = &block.predecessors;
            for phi in &mut block.phi_nodes {
                phi.incoming.retain(|(pred, _)| preds.contains(pred));
            }
        }

        self.block_order = order;
    }

    /// Blocks in reverse postorder as of the last discovery
    pub fn block_order(&self) -> &[IrBlockId] {
        &self.block_order
    }

    /// Verify CFG integrity
    pub fn verify(&self) -> Result<(), String> {
        if !self.blocks.contains_key(&self.entry_block) {
            return Err("Entry block not found".to_string());
        }

        for (id, block) in &self.blocks {
            for succ in block.successors() {
                if !self.blocks.contains_key(&succ) {
                    return Err(format!(
                        "Block {} references non-existent successor {}",
                        id, succ
                    ));
                }
            }

            for phi in &block.phi_nodes {
                for (pred_block, _) in &phi.incoming {
                    if !block.predecessors.contains(pred_block) {
                        return Err(format!(
                            "Phi node in block {} references non-predecessor block {}",
                            id, pred_block
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_block_creation() {
        let mut block = IrBasicBlock::new(IrBlockId::new(1));
        assert_eq!(block.id.0, 1);
        assert!(block.instructions.is_empty());
        assert!(block.successors().is_empty());

        block.set_terminator(IrTerminator::Branch { target: IrBlockId::new(2) });
        assert_eq!(block.successors(), vec![IrBlockId::new(2)]);
    }

    #[test]
    fn test_discover_blocks_drops_unreachable() {
        let mut cfg = IrControlFlowGraph::new();
        let bb1 = cfg.create_block();
        let dead = cfg.create_block();

        cfg.blocks[&IrBlockId::entry()].terminator = IrTerminator::Branch { target: bb1 };
        cfg.blocks[&bb1].terminator = IrTerminator::Return { value: None };
        cfg.blocks[&dead].terminator = IrTerminator::Branch { target: bb1 };
        cfg.blocks[&bb1].add_phi(IrPhiNode {
            dest: IrId::new(9),
            incoming: vec![(IrBlockId::entry(), IrId::new(1)), (dead, IrId::new(2))],
        });

        cfg.discover_blocks();

        assert!(cfg.get_block(dead).is_none());
        assert_eq!(cfg.block_order(), &[IrBlockId::entry(), bb1]);
        assert_eq!(cfg.blocks[&bb1].predecessors, vec![IrBlockId::entry()]);
        assert_eq!(cfg.blocks[&bb1].phi_nodes[0].incoming.len(), 1);
        assert!(cfg.verify().is_ok());
    }

    #[test]
    fn test_exceptional_edges_reach_handler() {
        let mut cfg = IrControlFlowGraph::new();
        let body = cfg.create_block();
        let handler = cfg.create_block();
        let t = cfg.alloc_try_index();
        cfg.blocks[&body].try_index = Some(t);
        cfg.register_handler(t, handler, None);

        cfg.blocks[&IrBlockId::entry()].terminator = IrTerminator::Branch { target: body };
        cfg.blocks[&body].terminator = IrTerminator::Return { value: None };
        cfg.blocks[&handler].terminator = IrTerminator::Return { value: None };

        assert_eq!(cfg.all_successors(body), vec![handler]);
        cfg.discover_blocks();
        assert!(cfg.get_block(handler).is_some());
        assert!(cfg.blocks[&handler].predecessors.is_empty());
        assert!(cfg.try_nested_in(Some(t), None));
        assert!(!cfg.try_nested_in(None, Some(t)));
    }
}
