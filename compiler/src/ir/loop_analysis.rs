//! Dominance and Loop Analysis
//!
//! - Dominator tree computation (iterative dataflow algorithm)
//! - Natural loop detection via back-edge identification
//! - Per-block loop depth, used to estimate call frequencies
//!
//! Both analyses treat the exceptional edge from a try block to its handler
//! as an ordinary edge.

use super::{IrBlockId, IrControlFlowGraph};
use fxhash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

/// Dominator tree for a control flow graph.
///
/// A block D dominates block B if every path from the entry to B goes through D.
/// The immediate dominator (idom) of B is the closest strict dominator.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// Immediate dominator for each block (entry block has no idom)
    idom: FxHashMap<IrBlockId, IrBlockId>,

    /// Children in the dominator tree
    children: FxHashMap<IrBlockId, Vec<IrBlockId>>,

    /// Dominator tree depth for each block (entry = 0)
    depth: FxHashMap<IrBlockId, usize>,

    /// Predecessors over normal and exceptional edges
    predecessors: FxHashMap<IrBlockId, Vec<IrBlockId>>,

    entry: IrBlockId,
}

impl DominatorTree {
    /// Compute the dominator tree using Cooper, Harvey, and Kennedy's
    /// simple iterative algorithm.
    pub fn compute(cfg: &IrControlFlowGraph) -> Self {
        let entry = cfg.entry_block;

        let rpo = cfg.reverse_postorder();
        let rpo_index: FxHashMap<IrBlockId, usize> =
            rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();

        let mut predecessors: FxHashMap<IrBlockId, Vec<IrBlockId>> = FxHashMap::default();
        for &block in &rpo {
            for succ in cfg.all_successors(block) {
                predecessors.entry(succ).or_default().push(block);
            }
        }

        // Initialize idom: entry dominates itself, others undefined
        let mut idom: FxHashMap<IrBlockId, Option<IrBlockId>> =
            rpo.iter().map(|&b| (b, None)).collect();
        idom.insert(entry, Some(entry));

        let mut changed = true;
        while changed {
            changed = false;

            for &block in &rpo {
                if block == entry {
                    continue;
                }

                let mut new_idom: Option<IrBlockId> = None;
                for &pred in predecessors.get(&block).map(|v| v.as_slice()).unwrap_or(&[]) {
                    if idom.get(&pred).copied().flatten().is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => Self::intersect(current, pred, &idom, &rpo_index),
                    });
                }

                if new_idom != idom[&block] {
                    idom.insert(block, new_idom);
                    changed = true;
                }
            }
        }

        let final_idom: FxHashMap<IrBlockId, IrBlockId> = idom
            .iter()
            .filter(|(&block, _)| block != entry)
            .filter_map(|(&block, &dom)| dom.map(|d| (block, d)))
            .collect();

        let mut children: FxHashMap<IrBlockId, Vec<IrBlockId>> = FxHashMap::default();
        for &block in &rpo {
            if let Some(&dom) = final_idom.get(&block) {
                children.entry(dom).or_default().push(block);
            }
        }

        // Compute depths via BFS from entry
        let mut depth: FxHashMap<IrBlockId, usize> = FxHashMap::default();
        depth.insert(entry, 0);
        let mut queue: VecDeque<IrBlockId> = VecDeque::new();
        queue.push_back(entry);

        while let Some(block) = queue.pop_front() {
            let d = depth[&block];
            for &child in children.get(&block).map(|v| v.as_slice()).unwrap_or(&[]) {
                depth.insert(child, d + 1);
                queue.push_back(child);
            }
        }

        Self {
            idom: final_idom,
            children,
            depth,
            predecessors,
            entry,
        }
    }

    /// Walk both fingers up the tree until they meet
    fn intersect(
        mut b1: IrBlockId,
        mut b2: IrBlockId,
        idom: &FxHashMap<IrBlockId, Option<IrBlockId>>,
        rpo_index: &FxHashMap<IrBlockId, usize>,
    ) -> IrBlockId {
        let index = |b: IrBlockId| rpo_index.get(&b).copied().unwrap_or(usize::MAX);
        while b1 != b2 {
            while index(b1) > index(b2) {
                match idom.get(&b1).copied().flatten() {
                    Some(dom) => b1 = dom,
                    None => return b1,
                }
            }
            while index(b2) > index(b1) {
                match idom.get(&b2).copied().flatten() {
                    Some(dom) => b2 = dom,
                    None => return b2,
                }
            }
        }
        b1
    }

    /// Get the immediate dominator of a block.
    pub fn idom(&self, block: IrBlockId) -> Option<IrBlockId> {
        self.idom.get(&block).copied()
    }

    /// Get children of a block in the dominator tree.
    pub fn children(&self, block: IrBlockId) -> &[IrBlockId] {
        self.children.get(&block).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Get the depth of a block in the dominator tree.
    pub fn depth(&self, block: IrBlockId) -> usize {
        self.depth.get(&block).copied().unwrap_or(0)
    }

    /// Was the block reached when the tree was computed?
    pub fn is_reachable(&self, block: IrBlockId) -> bool {
        self.depth.contains_key(&block)
    }

    /// Predecessors including exceptional edges
    pub fn predecessors(&self, block: IrBlockId) -> &[IrBlockId] {
        self.predecessors.get(&block).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Check if block A dominates block B.
    pub fn dominates(&self, a: IrBlockId, b: IrBlockId) -> bool {
        if a == b {
            return true;
        }
        if !self.is_reachable(b) {
            return false;
        }

        let mut current = b;
        while let Some(dom) = self.idom.get(&current) {
            if *dom == a {
                return true;
            }
            current = *dom;
        }

        a == self.entry
    }

    /// Check if block A strictly dominates block B (A dominates B and A != B).
    pub fn strictly_dominates(&self, a: IrBlockId, b: IrBlockId) -> bool {
        a != b && self.dominates(a, b)
    }
}

/// A natural loop in the control flow graph.
///
/// Defined by back edges (B to H where H dominates B). All back edges to the
/// same header are merged into one loop.
#[derive(Debug, Clone)]
pub struct NaturalLoop {
    pub header: IrBlockId,

    /// All blocks in the loop body (including header)
    pub blocks: FxHashSet<IrBlockId>,
}

/// Loop nest information for a function.
#[derive(Debug, Clone, Default)]
pub struct LoopNestInfo {
    /// All natural loops indexed by header block
    pub loops: FxHashMap<IrBlockId, NaturalLoop>,

    /// Number of loops containing each block
    block_depth: FxHashMap<IrBlockId, usize>,

    /// Maximum nesting depth in the function
    pub max_depth: usize,
}

impl LoopNestInfo {
    pub fn analyze(cfg: &IrControlFlowGraph, domtree: &DominatorTree) -> Self {
        let mut loops: FxHashMap<IrBlockId, NaturalLoop> = FxHashMap::default();

        for &block_id in cfg.blocks.keys() {
            if !domtree.is_reachable(block_id) {
                continue;
            }
            for succ in cfg.all_successors(block_id) {
                if domtree.dominates(succ, block_id) {
                    let body = Self::find_loop_blocks(domtree, succ, block_id);
                    loops
                        .entry(succ)
                        .or_insert_with(|| NaturalLoop {
                            header: succ,
                            blocks: FxHashSet::default(),
                        })
                        .blocks
                        .extend(body);
                }
            }
        }

        let mut block_depth: FxHashMap<IrBlockId, usize> = FxHashMap::default();
        for natural_loop in loops.values() {
            for &block in &natural_loop.blocks {
                *block_depth.entry(block).or_default() += 1;
            }
        }
        let max_depth = block_depth.values().copied().max().unwrap_or(0);

        Self {
            loops,
            block_depth,
            max_depth,
        }
    }

    /// Work backwards from the back-edge source to the header
    fn find_loop_blocks(
        domtree: &DominatorTree,
        header: IrBlockId,
        back_edge_source: IrBlockId,
    ) -> FxHashSet<IrBlockId> {
        let mut loop_blocks = FxHashSet::default();
        loop_blocks.insert(header);

        if header == back_edge_source {
            return loop_blocks;
        }

        let mut worklist = vec![back_edge_source];
        loop_blocks.insert(back_edge_source);

        while let Some(block) = worklist.pop() {
            for &pred in domtree.predecessors(block) {
                if loop_blocks.insert(pred) {
                    worklist.push(pred);
                }
            }
        }

        loop_blocks
    }

    /// Get loop depth for a block (0 if not in any loop).
    pub fn loop_depth(&self, block: IrBlockId) -> usize {
        self.block_depth.get(&block).copied().unwrap_or(0)
    }

    pub fn is_loop_header(&self, block: IrBlockId) -> bool {
        self.loops.contains_key(&block)
    }
}
