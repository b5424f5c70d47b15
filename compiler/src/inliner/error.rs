//! Inlining failure reasons
//!
//! Every per-call-site failure is a `BailoutReason`: it is traced and the
//! driver moves on to the next site. A background-compilation abort is
//! different in kind and unwinds the whole run for the caller.

use crate::ir::FunctionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which admission phase rejected a callee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeuristicPhase {
    /// Decided from cached statistics, before the callee is parsed
    Early,
    /// Decided from the measured, optimized callee graph
    Late,
}

impl fmt::Display for HeuristicPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeuristicPhase::Early => write!(f, "early"),
            HeuristicPhase::Late => write!(f, "late"),
        }
    }
}

/// Why a single call site was not inlined
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum BailoutReason {
    #[error("function is marked as not inlinable")]
    NotInlinable,

    #[error("never-inline pragma")]
    NeverInlinePragma,

    #[error("intrinsic function")]
    Intrinsic,

    #[error("function was never compiled")]
    NotYetCompiled,

    #[error("type feedback was cleared")]
    FeedbackCleared,

    #[error("deoptimized {deopts} times")]
    DeoptThresholdExceeded { deopts: u32 },

    #[error("inlining depth {depth} exceeds threshold")]
    TooDeep { depth: u32 },

    #[error("recursive call beyond recursion threshold")]
    RecursiveBeyondThreshold,

    #[error("too many call sites at this depth")]
    CallSiteBudgetExceeded,

    #[error("{phase} heuristic: {reason}")]
    HeuristicRejected {
        phase: HeuristicPhase,
        reason: String,
    },

    #[error("argument mismatch: {0}")]
    OptionalArgumentMismatch(String),

    #[error("could not build callee graph: {0}")]
    ParseOrCompileError(String),
}

impl BailoutReason {
    pub fn early(reason: impl Into<String>) -> Self {
        BailoutReason::HeuristicRejected {
            phase: HeuristicPhase::Early,
            reason: reason.into(),
        }
    }

    pub fn late(reason: impl Into<String>) -> Self {
        BailoutReason::HeuristicRejected {
            phase: HeuristicPhase::Late,
            reason: reason.into(),
        }
    }
}

/// Failure of the callee acquisition step
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("failed to build graph for {function}: {message}")]
    Parse { function: FunctionId, message: String },

    /// Background compilation was cancelled; the whole attempt must be retried
    #[error("background compilation aborted")]
    BackgroundAbort,
}

/// Unwinds a driver run; the caller graph is restored to its state before the
/// depth iteration that was in progress.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InlineAbort {
    #[error("background compilation aborted while inlining into {caller} at depth {depth}")]
    BackgroundCompilation { caller: FunctionId, depth: u32 },
}

/// Outcome of one inlining attempt that did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    Bailout(BailoutReason),
    /// Retryable; propagated out of the driver
    BackgroundAbort,
}

impl From<BailoutReason> for AttemptFailure {
    fn from(reason: BailoutReason) -> Self {
        AttemptFailure::Bailout(reason)
    }
}

impl From<AcquisitionError> for AttemptFailure {
    fn from(error: AcquisitionError) -> Self {
        match error {
            AcquisitionError::BackgroundAbort => AttemptFailure::BackgroundAbort,
            AcquisitionError::Parse { .. } => {
                AttemptFailure::Bailout(BailoutReason::ParseOrCompileError(error.to_string()))
            }
        }
    }
}
