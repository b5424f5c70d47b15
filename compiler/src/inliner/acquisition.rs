//! Callee Graph Acquisition
//!
//! The inliner never builds graphs itself. A `FrontEnd` turns a function into
//! a fresh SSA graph whose formal parameters are `Parameter` instructions in
//! the entry block; those are the stubs substitution later resolves. Parsed
//! graphs are cached per compilation so every call to the same callee pays
//! for parsing once.

use super::error::AcquisitionError;
use crate::ir::optimization::PassManager;
use crate::ir::{FunctionId, FunctionInfo, IrFunction};
use fxhash::FxHashMap;
use log::trace;

/// Read-only view of the runtime's function metadata
pub trait FunctionRegistry: Sync {
    fn function(&self, id: FunctionId) -> Option<&FunctionInfo>;
}

/// Builds callee graphs on demand
pub trait FrontEnd: Sync {
    /// Build the SSA graph of `function`.
    ///
    /// May fail with `AcquisitionError::BackgroundAbort` when the compilation
    /// this request belongs to was cancelled.
    fn build_graph(&self, function: &FunctionInfo) -> Result<IrFunction, AcquisitionError>;
}

/// Optimization pipeline run on a callee graph before it is measured
pub trait CalleeOptimizer: Sync {
    fn optimize(&self, graph: &mut IrFunction);
}

impl CalleeOptimizer for PassManager {
    fn optimize(&self, graph: &mut IrFunction) {
        let result = self.run(graph);
        trace!(
            "optimized callee {}: {} instructions eliminated",
            graph.name,
            result.instructions_eliminated
        );
    }
}

/// Leaves callee graphs exactly as the front end built them
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOptimization;

impl CalleeOptimizer for NoOptimization {
    fn optimize(&self, _graph: &mut IrFunction) {}
}

/// Per-compilation cache of parsed callee graphs
#[derive(Debug, Default)]
pub struct CalleeGraphCache {
    graphs: FxHashMap<FunctionId, IrFunction>,
    hits: usize,
    misses: usize,
}

impl CalleeGraphCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A private copy of the parsed graph of `info`, parsing it on first use.
    /// Failed parses are not cached.
    pub fn acquire(
        &mut self,
        front_end: &dyn FrontEnd,
        info: &FunctionInfo,
    ) -> Result<IrFunction, AcquisitionError> {
        if let Some(graph) = self.graphs.get(&info.id) {
            self.hits += 1;
            return Ok(graph.clone());
        }

        self.misses += 1;
        let mut graph = front_end.build_graph(info)?;
        graph.cfg.discover_blocks();
        trace!(
            "parsed {} ({} blocks)",
            info.name,
            graph.cfg.blocks.len()
        );
        self.graphs.insert(info.id, graph.clone());
        Ok(graph)
    }

    pub fn contains(&self, function: FunctionId) -> bool {
        self.graphs.contains_key(&function)
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }
}
