//! Call-Site Catalogue
//!
//! Walks the reachable blocks of a graph once per inlining depth and records
//! every call whose enclosing inline frame sits at that depth. Sites are kept
//! in three lists (static, instance, closure) in block order. The previous
//! depth's lists are kept in a second buffer and reused on the next collection.

use crate::ir::loop_analysis::{DominatorTree, LoopNestInfo};
use crate::ir::{CallId, FunctionId, InlineFrameId, IrBlockId, IrFunction, IrInstruction, IrValue};
use fxhash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::mem;

/// Classification of a call, computed once per site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    Static,
    /// Instance call with a single feedback entry
    Instance,
    Polymorphic,
    Closure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallSiteInfo {
    pub call_id: CallId,
    pub kind: CallKind,
    pub block: IrBlockId,
    /// Inline frame of the code containing the call
    pub frame: InlineFrameId,
    /// Inlining depth the callee would be inlined at (1 for the root's calls)
    pub depth: u32,
    /// Number of loops enclosing the call
    pub nesting_depth: usize,
    /// Profiled or estimated execution count
    pub count: u64,
    /// `count` relative to the hottest collected site
    pub ratio: f64,
    /// Static target, resolved closure target, or the monomorphic target
    pub target: Option<FunctionId>,
}

/// Execution count guessed from loop nesting when there is no profile
pub fn estimated_count(nesting_depth: usize) -> u64 {
    match nesting_depth {
        0 => 1,
        1 => 10,
        2 => 100,
        _ => 1000,
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallSites {
    pub static_calls: Vec<CallSiteInfo>,
    pub instance_calls: Vec<CallSiteInfo>,
    pub closure_calls: Vec<CallSiteInfo>,
}

impl CallSites {
    pub fn len(&self) -> usize {
        self.static_calls.len() + self.instance_calls.len() + self.closure_calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.static_calls.clear();
        self.instance_calls.clear();
        self.closure_calls.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &CallSiteInfo> {
        self.static_calls
            .iter()
            .chain(&self.instance_calls)
            .chain(&self.closure_calls)
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut CallSiteInfo> {
        self.static_calls
            .iter_mut()
            .chain(self.instance_calls.iter_mut())
            .chain(self.closure_calls.iter_mut())
    }

    fn push(&mut self, site: CallSiteInfo) {
        match site.kind {
            CallKind::Static => self.static_calls.push(site),
            CallKind::Instance | CallKind::Polymorphic => self.instance_calls.push(site),
            CallKind::Closure => self.closure_calls.push(site),
        }
    }
}

#[derive(Debug, Default)]
pub struct CallSiteCatalogue {
    current: CallSites,
    previous: CallSites,
}

impl CallSiteCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the calls of `graph` that would be inlined at `depth`.
    ///
    /// The graph is only read. Residual polymorphic calls left by an earlier
    /// dispatch and instance calls without feedback are not collected.
    pub fn collect(&mut self, graph: &IrFunction, depth: u32) {
        mem::swap(&mut self.current, &mut self.previous);
        self.current.clear();

        let domtree = DominatorTree::compute(&graph.cfg);
        let loops = LoopNestInfo::analyze(&graph.cfg, &domtree);

        for block_id in graph.cfg.reverse_postorder() {
            let Some(block) = graph.cfg.get_block(block_id) else {
                continue;
            };
            let nesting_depth = loops.loop_depth(block_id);

            for inst in &block.instructions {
                let Some(call) = inst.call_info() else {
                    continue;
                };
                if graph.frame_depth(call.frame) + 1 != depth as usize {
                    continue;
                }

                let (kind, target) = match inst {
                    IrInstruction::StaticCall { target, .. } => (CallKind::Static, Some(*target)),
                    IrInstruction::InstanceCall { targets, .. } => match targets.len() {
                        0 => continue,
                        1 => (CallKind::Instance, Some(targets.targets[0].target)),
                        _ => (CallKind::Polymorphic, None),
                    },
                    IrInstruction::ClosureCall { .. } => {
                        (CallKind::Closure, call.receiver().and_then(|c| closure_target(graph, c)))
                    }
                    _ => continue,
                };

                self.current.push(CallSiteInfo {
                    call_id: call.call_id,
                    kind,
                    block: block_id,
                    frame: call.frame,
                    depth,
                    nesting_depth,
                    count: call
                        .profile_count
                        .unwrap_or_else(|| estimated_count(nesting_depth)),
                    ratio: 0.0,
                    target,
                });
            }
        }

        let max_count = self.current.iter().map(|s| s.count).max().unwrap_or(0);
        for site in self.current.iter_mut() {
            site.ratio = if max_count == 0 {
                0.0
            } else {
                site.count as f64 / max_count as f64
            };
        }
    }

    /// Keep the `max` hottest sites; the rest are removed and returned
    pub fn apply_budget(&mut self, max: usize) -> Vec<CallSiteInfo> {
        if self.current.len() <= max {
            return Vec::new();
        }

        let mut by_count: Vec<(CallId, u64)> = self.current.iter().map(|s| (s.call_id, s.count)).collect();
        by_count.sort_by(|a, b| b.1.cmp(&a.1));
        let keep: FxHashSet<CallId> = by_count.iter().take(max).map(|(id, _)| *id).collect();

        let mut dropped = Vec::new();
        for list in [
            &mut self.current.static_calls,
            &mut self.current.instance_calls,
            &mut self.current.closure_calls,
        ] {
            let (kept, rest): (Vec<_>, Vec<_>) = list.drain(..).partition(|s| keep.contains(&s.call_id));
            *list = kept;
            dropped.extend(rest);
        }
        dropped
    }

    pub fn current(&self) -> &CallSites {
        &self.current
    }

    /// Sites collected for the preceding depth
    pub fn previous(&self) -> &CallSites {
        &self.previous
    }

    pub fn static_calls(&self) -> &[CallSiteInfo] {
        &self.current.static_calls
    }

    pub fn instance_calls(&self) -> &[CallSiteInfo] {
        &self.current.instance_calls
    }

    pub fn closure_calls(&self) -> &[CallSiteInfo] {
        &self.current.closure_calls
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

/// Function a closure value is statically known to be
fn closure_target(graph: &IrFunction, closure: crate::ir::IrId) -> Option<FunctionId> {
    match graph.definition(closure)? {
        IrInstruction::MakeClosure { function, .. } => Some(*function),
        IrInstruction::Const {
            value: IrValue::Function(function),
            ..
        } => Some(*function),
        IrInstruction::Redefinition { value, .. } | IrInstruction::Copy { src: value, .. } => {
            closure_target(graph, *value)
        }
        _ => None,
    }
}
