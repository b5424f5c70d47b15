//! Call-site inliner for an SSA flow-graph compiler.
//!
//! See `inliner` for the driver and `ir` for the graph it rewrites.

pub mod config;
pub mod inliner;
pub mod ir;
pub mod logging;
pub mod program;

pub use config::{Capabilities, CompilerMode, ConfigError, InliningConfig};
pub use inliner::{
    inline_all_parallel, BailoutReason, FlowGraphInliner, InlineAbort, InliningSummary, InliningTrace,
    TraceOutcome,
};
pub use program::{CompileError, CompiledFunction, Program};
