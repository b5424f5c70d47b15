//! Program
//!
//! In-memory function table standing in for the runtime: function metadata,
//! unoptimized bodies and the method dispatch table. It is the registry and
//! the front end the inliner consults, and the environment the reference
//! interpreter executes against.

use crate::config::InliningConfig;
use crate::inliner::heuristics::collect_graph_stats;
use crate::inliner::{
    AcquisitionError, FlowGraphInliner, FrontEnd, FunctionRegistry, InlineAbort, InliningSummary, InliningTrace,
};
use crate::ir::interpreter::ExecutionEnv;
use crate::ir::validation::{validate_function, ValidationError};
use crate::ir::{ClassId, FunctionId, FunctionInfo, IrFunction};
use fxhash::FxHashMap;
use indexmap::IndexMap;
use log::debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("unknown function {0}")]
    UnknownFunction(FunctionId),

    #[error(transparent)]
    Aborted(#[from] InlineAbort),

    #[error("inlined graph of {function} is malformed: {}", .errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Malformed {
        function: FunctionId,
        errors: Vec<ValidationError>,
    },
}

/// Root graph after inlining, with the decisions that shaped it
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub graph: IrFunction,
    pub summary: InliningSummary,
    pub trace: InliningTrace,
}

#[derive(Debug, Default)]
pub struct Program {
    functions: IndexMap<FunctionId, FunctionInfo>,
    bodies: FxHashMap<FunctionId, IrFunction>,
    methods: FxHashMap<(ClassId, String), FunctionId>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function with its body. The body's measured size is
    /// recorded on the function's statistics.
    pub fn define(&mut self, info: FunctionInfo, mut body: IrFunction) -> FunctionId {
        body.cfg.discover_blocks();
        let stats = collect_graph_stats(&body);
        info.stats.record_size(stats.instructions, stats.call_sites);

        let id = info.id;
        self.functions.insert(id, info);
        self.bodies.insert(id, body);
        id
    }

    /// Register a function whose body cannot be built
    pub fn declare(&mut self, info: FunctionInfo) -> FunctionId {
        let id = info.id;
        self.functions.insert(id, info);
        id
    }

    /// Route `selector` on instances of `class_id` to `function`
    pub fn add_method(&mut self, class_id: ClassId, selector: &str, function: FunctionId) {
        self.methods.insert((class_id, selector.to_string()), function);
    }

    pub fn info(&self, id: FunctionId) -> Option<&FunctionInfo> {
        self.functions.get(&id)
    }

    pub fn body(&self, id: FunctionId) -> Option<&IrFunction> {
        self.bodies.get(&id)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Function ids in registration order
    pub fn function_ids(&self) -> impl Iterator<Item = FunctionId> + '_ {
        self.functions.keys().copied()
    }

    /// Inline into a fresh copy of `id`'s body and validate the result
    pub fn compile(&self, id: FunctionId, config: &InliningConfig) -> Result<CompiledFunction, CompileError> {
        let mut graph = self.bodies.get(&id).cloned().ok_or(CompileError::UnknownFunction(id))?;

        let mut inliner = FlowGraphInliner::new(config, self, self);
        let summary = inliner.inline(&mut graph)?;
        validate_function(&graph).map_err(|errors| CompileError::Malformed { function: id, errors })?;

        debug!(
            "compiled {} with growth factor {:.2}",
            graph.name,
            summary.growth_factor()
        );
        Ok(CompiledFunction {
            graph,
            summary,
            trace: inliner.into_trace(),
        })
    }
}

impl FunctionRegistry for Program {
    fn function(&self, id: FunctionId) -> Option<&FunctionInfo> {
        self.functions.get(&id)
    }
}

impl FrontEnd for Program {
    fn build_graph(&self, function: &FunctionInfo) -> Result<IrFunction, AcquisitionError> {
        self.bodies
            .get(&function.id)
            .cloned()
            .ok_or_else(|| AcquisitionError::Parse {
                function: function.id,
                message: format!("no body for {}", function.name),
            })
    }
}

impl ExecutionEnv for Program {
    fn body(&self, function: FunctionId) -> Option<&IrFunction> {
        self.bodies.get(&function)
    }

    fn info(&self, function: FunctionId) -> Option<&FunctionInfo> {
        self.functions.get(&function)
    }

    fn resolve_method(&self, class_id: ClassId, selector: &str) -> Option<FunctionId> {
        self.methods.get(&(class_id, selector.to_string())).copied()
    }
}
