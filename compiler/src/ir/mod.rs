//! Flow-graph Intermediate Representation
//!
//! This module defines the SSA flow graph the inliner operates on. Every
//! entity is addressed by a dense integer id scoped to one compilation:
//! - `IrId` names an SSA value (one definition, any number of uses)
//! - `IrBlockId` names a basic block in the per-function block arena
//! - `CallId` names a call instruction, stable across graph surgery
//! - `InlineFrameId` names an entry in the caller-chain table of a graph
//!
//! Graphs are mutated in place; the analyses in `loop_analysis` and the
//! checks in `validation` are recomputed from the block arena on demand.

pub mod types;
pub mod instructions;
pub mod blocks;
pub mod functions;
pub mod builder;
pub mod loop_analysis;
pub mod optimization;
pub mod validation;
pub mod dump;
pub mod interpreter;

pub use types::*;
pub use instructions::*;
pub use blocks::*;
pub use functions::*;
pub use builder::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an SSA value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IrId(u32);

impl IrId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn invalid() -> Self {
        Self(u32::MAX)
    }

    pub fn is_valid(&self) -> bool {
        self.0 != u32::MAX
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for IrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// Identifier of a call instruction.
///
/// Call ids survive block splitting, so a call site recorded by the catalogue
/// can still be found after earlier call sites in the same block were spliced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub u32);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call{}", self.0)
    }
}

/// Index into a graph's inline-frame table. Frame 0 is the graph's own function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InlineFrameId(pub u32);

impl InlineFrameId {
    pub const ROOT: InlineFrameId = InlineFrameId(0);

    pub fn is_root(&self) -> bool {
        self.0 == 0
    }
}

/// Index of a protected (try) region within one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TryIndex(pub u32);

impl fmt::Display for TryIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "try{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ir_id() {
        let id = IrId::new(42);
        assert_eq!(format!("{}", id), "$42");
        assert!(id.is_valid());

        let invalid = IrId::invalid();
        assert!(!invalid.is_valid());
    }

    #[test]
    fn test_root_frame() {
        assert!(InlineFrameId::ROOT.is_root());
        assert!(!InlineFrameId(3).is_root());
    }
}
