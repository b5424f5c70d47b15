//! Functions
//!
//! `FunctionInfo` is the runtime's view of a function: identity, kind,
//! signature and the statistics the compiler caches on it. `IrFunction` is
//! one flow graph under compilation, together with its inline-frame table.

use super::{
    BinaryOp, CallId, FloatOp, InlineFrameId, IrBlockId, IrControlFlowGraph, IrId, IrInstruction,
    IrValue,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use thiserror::Error;

/// Unique identifier for functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

impl std::fmt::Display for FunctionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// Classification of a function by origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    Regular,
    Getter,
    Setter,
    /// Compiler-synthesised field getter
    ImplicitGetter,
    /// Compiler-synthesised field setter
    ImplicitSetter,
    /// Getter of a field with a constant initializer
    ConstFieldGetter,
    /// Forwarder that only dispatches to another function
    Dispatcher,
    Operator,
    Constructor,
    Closure,
}

impl FunctionKind {
    pub fn is_accessor(&self) -> bool {
        matches!(
            self,
            FunctionKind::Getter
                | FunctionKind::Setter
                | FunctionKind::ImplicitGetter
                | FunctionKind::ImplicitSetter
                | FunctionKind::ConstFieldGetter
        )
    }
}

/// Source-level inlining pragma
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InlineHint {
    Never,
    #[default]
    Auto,
    Hint,
    Always,
}

/// Well-known primitives with a fixed inline template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecognizedMethod {
    ListGetIndexed,
    ListSetIndexed,
    ListLength,
    StringLength,
    StringCodeUnitAt,
    IntArith(BinaryOp),
    DoubleArith(FloatOp),
    Float64x2Arith(FloatOp),
    /// `pow(int base, int exponent)`
    MathIntPow,
    ClassIdOf,
}

/// A named optional parameter and its default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedParameter {
    pub name: String,
    pub default: IrValue,
}

/// Optional parameters; positional and named are mutually exclusive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum OptionalParameters {
    #[default]
    None,
    Positional(Vec<IrValue>),
    Named(Vec<NamedParameter>),
}

impl OptionalParameters {
    pub fn len(&self) -> usize {
        match self {
            OptionalParameters::None => 0,
            OptionalParameters::Positional(defaults) => defaults.len(),
            OptionalParameters::Named(params) => params.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parameter shape of a function
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Required parameters, including the receiver of instance methods
    pub fixed_parameters: usize,
    pub optional: OptionalParameters,
    /// Generic functions take a type-argument vector as parameter 0
    pub is_generic: bool,
}

/// How one formal parameter receives its value at a particular call
#[derive(Debug, Clone, PartialEq)]
pub enum BoundArgument {
    /// Index into the call's argument list
    Actual(usize),
    Default(IrValue),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentMismatch {
    #[error("expected {expected} positional arguments, got {actual}")]
    PositionalCount { expected: usize, actual: usize },
    #[error("function takes no named arguments")]
    NamedNotAccepted,
    #[error("no parameter named '{0}'")]
    UnknownName(String),
    #[error("named argument '{0}' passed twice")]
    DuplicateName(String),
}

impl Signature {
    pub fn fixed(count: usize) -> Self {
        Self {
            fixed_parameters: count,
            ..Default::default()
        }
    }

    pub fn with_positional(mut self, defaults: Vec<IrValue>) -> Self {
        self.optional = OptionalParameters::Positional(defaults);
        self
    }

    pub fn with_named(mut self, named: Vec<(&str, IrValue)>) -> Self {
        self.optional = OptionalParameters::Named(
            named
                .into_iter()
                .map(|(name, default)| NamedParameter {
                    name: name.to_string(),
                    default,
                })
                .collect(),
        );
        self
    }

    pub fn generic(mut self) -> Self {
        self.is_generic = true;
        self
    }

    /// Formal parameters excluding the type-argument vector
    pub fn formal_count(&self) -> usize {
        self.fixed_parameters + self.optional.len()
    }

    /// Parameter index of the first formal
    pub fn parameter_offset(&self) -> u32 {
        self.is_generic as u32
    }

    /// Match a call's argument shape against this signature.
    ///
    /// The call passes `args_len` arguments whose last `names.len()` are named.
    /// Returns one binding per formal in declaration order.
    pub fn bind_arguments(
        &self,
        args_len: usize,
        names: &[String],
    ) -> Result<Vec<BoundArgument>, ArgumentMismatch> {
        let positional = args_len.saturating_sub(names.len());
        let mut bound: Vec<BoundArgument> = Vec::with_capacity(self.formal_count());

        match &self.optional {
            OptionalParameters::None | OptionalParameters::Positional(_) if !names.is_empty() => {
                Err(ArgumentMismatch::NamedNotAccepted)
            }
            OptionalParameters::None => {
                if positional != self.fixed_parameters {
                    return Err(ArgumentMismatch::PositionalCount {
                        expected: self.fixed_parameters,
                        actual: positional,
                    });
                }
                bound.extend((0..positional).map(BoundArgument::Actual));
                Ok(bound)
            }
            OptionalParameters::Positional(defaults) => {
                let max = self.fixed_parameters + defaults.len();
                if positional < self.fixed_parameters || positional > max {
                    return Err(ArgumentMismatch::PositionalCount {
                        expected: self.fixed_parameters,
                        actual: positional,
                    });
                }
                bound.extend((0..positional).map(BoundArgument::Actual));
                bound.extend(
                    defaults[positional - self.fixed_parameters..]
                        .iter()
                        .cloned()
                        .map(BoundArgument::Default),
                );
                Ok(bound)
            }
            OptionalParameters::Named(params) => {
                if positional != self.fixed_parameters {
                    return Err(ArgumentMismatch::PositionalCount {
                        expected: self.fixed_parameters,
                        actual: positional,
                    });
                }
                for (i, name) in names.iter().enumerate() {
                    if !params.iter().any(|p| &p.name == name) {
                        return Err(ArgumentMismatch::UnknownName(name.clone()));
                    }
                    if names[..i].contains(name) {
                        return Err(ArgumentMismatch::DuplicateName(name.clone()));
                    }
                }
                bound.extend((0..positional).map(BoundArgument::Actual));
                for param in params {
                    match names.iter().position(|n| n == &param.name) {
                        Some(i) => bound.push(BoundArgument::Actual(positional + i)),
                        None => bound.push(BoundArgument::Default(param.default.clone())),
                    }
                }
                Ok(bound)
            }
        }
    }
}

/// Statistics the compiler caches on a function.
///
/// Shared between concurrently compiling callers. Every field is an
/// independent relaxed atomic: readers may observe a mix of old and new
/// values and the last writer wins, which only affects heuristic quality.
#[derive(Debug, Default)]
pub struct FunctionStats {
    /// Measured instruction count (0 if never measured)
    instruction_count: AtomicU32,
    call_site_count: AtomicU32,
    deopt_count: AtomicU32,
    /// Deepest inlining performed when this function was last compiled
    inlining_depth: AtomicU32,
    never_inline: AtomicBool,
    not_yet_compiled: AtomicBool,
    feedback_cleared: AtomicBool,
}

/// Plain copy of `FunctionStats` for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub instruction_count: u32,
    pub call_site_count: u32,
    pub deopt_count: u32,
    pub inlining_depth: u32,
    pub never_inline: bool,
}

impl FunctionStats {
    pub fn instruction_count(&self) -> u32 {
        self.instruction_count.load(Ordering::Relaxed)
    }

    pub fn call_site_count(&self) -> u32 {
        self.call_site_count.load(Ordering::Relaxed)
    }

    pub fn record_size(&self, instructions: u32, call_sites: u32) {
        self.instruction_count.store(instructions, Ordering::Relaxed);
        self.call_site_count.store(call_sites, Ordering::Relaxed);
    }

    pub fn deopt_count(&self) -> u32 {
        self.deopt_count.load(Ordering::Relaxed)
    }

    pub fn set_deopt_count(&self, count: u32) {
        self.deopt_count.store(count, Ordering::Relaxed);
    }

    pub fn inlining_depth(&self) -> u32 {
        self.inlining_depth.load(Ordering::Relaxed)
    }

    pub fn set_inlining_depth(&self, depth: u32) {
        self.inlining_depth.store(depth, Ordering::Relaxed);
    }

    pub fn is_inlinable(&self) -> bool {
        !self.never_inline.load(Ordering::Relaxed)
    }

    /// Persist a never-inline marker
    pub fn mark_not_inlinable(&self) {
        self.never_inline.store(true, Ordering::Relaxed);
    }

    pub fn was_compiled(&self) -> bool {
        !self.not_yet_compiled.load(Ordering::Relaxed)
    }

    pub fn set_was_compiled(&self, compiled: bool) {
        self.not_yet_compiled.store(!compiled, Ordering::Relaxed);
    }

    pub fn has_feedback(&self) -> bool {
        !self.feedback_cleared.load(Ordering::Relaxed)
    }

    pub fn set_has_feedback(&self, present: bool) {
        self.feedback_cleared.store(!present, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            instruction_count: self.instruction_count(),
            call_site_count: self.call_site_count(),
            deopt_count: self.deopt_count(),
            inlining_depth: self.inlining_depth(),
            never_inline: !self.is_inlinable(),
        }
    }
}

/// Runtime metadata of one function
#[derive(Debug)]
pub struct FunctionInfo {
    pub id: FunctionId,
    pub name: String,
    pub kind: FunctionKind,
    pub hint: InlineHint,
    pub signature: Signature,
    pub is_intrinsic: bool,
    pub recognized: Option<RecognizedMethod>,
    pub stats: FunctionStats,
}

impl FunctionInfo {
    pub fn new(id: FunctionId, name: impl Into<String>, signature: Signature) -> Self {
        Self {
            id,
            name: name.into(),
            kind: FunctionKind::Regular,
            hint: InlineHint::Auto,
            signature,
            is_intrinsic: false,
            recognized: None,
            stats: FunctionStats::default(),
        }
    }

    pub fn with_kind(mut self, kind: FunctionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_hint(mut self, hint: InlineHint) -> Self {
        self.hint = hint;
        self
    }

    pub fn intrinsic(mut self) -> Self {
        self.is_intrinsic = true;
        self
    }

    pub fn recognized(mut self, method: RecognizedMethod) -> Self {
        self.recognized = Some(method);
        self
    }
}

/// One entry of a graph's caller chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineFrame {
    /// Function whose body this frame's code came from
    pub function: FunctionId,
    /// Frame of the call that was inlined (None for the root)
    pub parent: Option<InlineFrameId>,
    /// Trace record of the inlining decision that created the frame
    pub trace: Option<usize>,
}

/// A flow graph under compilation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrFunction {
    pub function: FunctionId,
    pub name: String,
    pub cfg: IrControlFlowGraph,
    pub next_reg_id: u32,
    pub next_call_id: u32,
    pub inline_frames: Vec<InlineFrame>,
}

impl IrFunction {
    pub fn new(function: FunctionId, name: impl Into<String>) -> Self {
        Self {
            function,
            name: name.into(),
            cfg: IrControlFlowGraph::new(),
            next_reg_id: 0,
            next_call_id: 0,
            inline_frames: vec![InlineFrame {
                function,
                parent: None,
                trace: None,
            }],
        }
    }

    /// Allocate a new register
    pub fn alloc_reg(&mut self) -> IrId {
        let id = IrId::new(self.next_reg_id);
        self.next_reg_id += 1;
        id
    }

    pub fn alloc_call_id(&mut self) -> CallId {
        let id = CallId(self.next_call_id);
        self.next_call_id += 1;
        id
    }

    /// Get the entry block
    pub fn entry_block(&self) -> IrBlockId {
        self.cfg.entry_block
    }

    pub fn push_frame(
        &mut self,
        function: FunctionId,
        parent: InlineFrameId,
        trace: Option<usize>,
    ) -> InlineFrameId {
        let id = InlineFrameId(self.inline_frames.len() as u32);
        self.inline_frames.push(InlineFrame {
            function,
            parent: Some(parent),
            trace,
        });
        id
    }

    pub fn frame(&self, id: InlineFrameId) -> Option<&InlineFrame> {
        self.inline_frames.get(id.0 as usize)
    }

    /// Number of inlined calls enclosing code of frame `id`
    pub fn frame_depth(&self, id: InlineFrameId) -> usize {
        let mut depth = 0;
        let mut current = self.frame(id).and_then(|f| f.parent);
        while let Some(parent) = current {
            depth += 1;
            current = self.frame(parent).and_then(|f| f.parent);
        }
        depth
    }

    /// Functions of frame `id` and all enclosing frames, innermost first
    pub fn frame_chain(&self, id: InlineFrameId) -> Vec<FunctionId> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(frame_id) = current {
            match self.frame(frame_id) {
                Some(frame) => {
                    chain.push(frame.function);
                    current = frame.parent;
                }
                None => break,
            }
        }
        chain
    }

    /// Formal parameters by index, as defined in the entry block
    pub fn parameters(&self) -> Vec<(u32, IrId)> {
        let mut params: Vec<(u32, IrId)> = self
            .cfg
            .get_block(self.entry_block())
            .map(|block| {
                block
                    .instructions
                    .iter()
                    .filter_map(|inst| match inst {
                        IrInstruction::Parameter { dest, index } => Some((*index, *dest)),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        params.sort_by_key(|(index, _)| *index);
        params
    }

    /// Find the instruction defining `id`
    pub fn definition(&self, id: IrId) -> Option<&IrInstruction> {
        self.cfg
            .blocks
            .values()
            .flat_map(|block| block.instructions.iter())
            .find(|inst| inst.dest() == Some(id))
    }

    /// The constant `id` was defined with, if it is a constant
    pub fn constant_value(&self, id: IrId) -> Option<&IrValue> {
        match self.definition(id)? {
            IrInstruction::Const { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Return the pooled constant for `value`, creating it in the entry block.
    ///
    /// Constants live in the entry block right after the parameters so they
    /// dominate every use.
    pub fn get_or_insert_constant(&mut self, value: IrValue) -> IrId {
        let entry = self.entry_block();
        if let Some(block) = self.cfg.get_block(entry) {
            for inst in &block.instructions {
                if let IrInstruction::Const { dest, value: existing } = inst {
                    if existing.same_constant(&value) {
                        return *dest;
                    }
                }
            }
        }

        let dest = self.alloc_reg();
        if let Some(block) = self.cfg.get_block_mut(entry) {
            let position = block
                .instructions
                .iter()
                .position(|inst| {
                    !matches!(
                        inst,
                        IrInstruction::Parameter { .. } | IrInstruction::Const { .. }
                    )
                })
                .unwrap_or(block.instructions.len());
            block
                .instructions
                .insert(position, IrInstruction::Const { dest, value });
        }
        dest
    }

    /// Locate a call instruction by its id
    pub fn locate_call(&self, call_id: CallId) -> Option<(IrBlockId, usize)> {
        self.cfg.blocks.values().find_map(|block| {
            block
                .instructions
                .iter()
                .position(|inst| inst.call_info().map(|c| c.call_id) == Some(call_id))
                .map(|index| (block.id, index))
        })
    }

    /// Rewrite every use of `from` to `to`
    pub fn replace_all_uses(&mut self, from: IrId, to: IrId) {
        let rewrite = |id: &mut IrId| {
            if *id == from {
                *id = to;
            }
        };
        for block in self.cfg.blocks.values_mut() {
            for phi in &mut block.phi_nodes {
                for (_, value) in &mut phi.incoming {
                    rewrite(value);
                }
            }
            for inst in &mut block.instructions {
                inst.for_each_use_mut(rewrite);
            }
            block.terminator.for_each_use_mut(rewrite);
        }
    }

    /// Total instructions over all blocks
    pub fn instruction_count(&self) -> usize {
        self.cfg.blocks.values().map(|b| b.instructions.len()).sum()
    }

    /// Number of call instructions
    pub fn call_count(&self) -> usize {
        self.cfg
            .blocks
            .values()
            .flat_map(|b| b.instructions.iter())
            .filter(|inst| inst.is_call())
            .count()
    }
}
