//! IR Value and Class System
//!
//! Constants, class ids and receiver-class target sets. Class ids are the
//! runtime's dense numbering of classes; predefined ids below cover the
//! builtin value kinds and user classes start at `ClassId::FIRST_USER`.

use super::FunctionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime class identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassId(pub u32);

impl ClassId {
    pub const NULL: ClassId = ClassId(1);
    pub const BOOL: ClassId = ClassId(2);
    pub const INT: ClassId = ClassId(3);
    pub const DOUBLE: ClassId = ClassId(4);
    pub const STRING: ClassId = ClassId(5);
    pub const ARRAY: ClassId = ClassId(6);
    pub const CLOSURE: ClassId = ClassId(7);
    pub const FLOAT64X2: ClassId = ClassId(8);
    pub const FIRST_USER: ClassId = ClassId(16);
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cid{}", self.0)
    }
}

/// Inclusive range of class ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CidRange {
    pub lo: ClassId,
    pub hi: ClassId,
}

impl CidRange {
    pub fn new(lo: ClassId, hi: ClassId) -> Self {
        debug_assert!(lo <= hi, "empty class id range");
        Self { lo, hi }
    }

    pub fn single(cid: ClassId) -> Self {
        Self { lo: cid, hi: cid }
    }

    pub fn is_single(&self) -> bool {
        self.lo == self.hi
    }

    pub fn contains(&self, cid: ClassId) -> bool {
        self.lo <= cid && cid <= self.hi
    }
}

impl fmt::Display for CidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.lo)
        } else {
            write!(f, "{}..={}", self.lo, self.hi)
        }
    }
}

/// Compile-time constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    /// Reference to a function object (tear-off)
    Function(FunctionId),
}

impl IrValue {
    /// Constant identity: doubles compare by bit pattern so that NaN constants
    /// are pooled and `0.0`/`-0.0` stay distinct.
    pub fn same_constant(&self, other: &IrValue) -> bool {
        match (self, other) {
            (IrValue::Double(a), IrValue::Double(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }

    pub fn class_id(&self) -> ClassId {
        match self {
            IrValue::Null => ClassId::NULL,
            IrValue::Bool(_) => ClassId::BOOL,
            IrValue::Int(_) => ClassId::INT,
            IrValue::Double(_) => ClassId::DOUBLE,
            IrValue::Str(_) => ClassId::STRING,
            IrValue::Function(_) => ClassId::CLOSURE,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            IrValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for IrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrValue::Null => write!(f, "null"),
            IrValue::Bool(b) => write!(f, "{}", b),
            IrValue::Int(i) => write!(f, "{}", i),
            IrValue::Double(d) => write!(f, "{:?}", d),
            IrValue::Str(s) => write!(f, "{:?}", s),
            IrValue::Function(id) => write!(f, "&{}", id),
        }
    }
}

/// Value representation for box/unbox operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Representation {
    Tagged,
    UnboxedInt64,
    UnboxedDouble,
    UnboxedFloat64x2,
}

impl Representation {
    /// Class whose instances box values of this representation
    pub fn boxed_class(&self) -> Option<ClassId> {
        match self {
            Representation::Tagged => None,
            Representation::UnboxedInt64 => Some(ClassId::INT),
            Representation::UnboxedDouble => Some(ClassId::DOUBLE),
            Representation::UnboxedFloat64x2 => Some(ClassId::FLOAT64X2),
        }
    }
}

/// One observed receiver class range and the function it dispatches to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub cids: CidRange,
    pub target: FunctionId,
    pub count: u64,
}

/// Receiver-class type feedback attached to an instance call.
///
/// `complete` means the set is statically known to cover every class that
/// can reach the call, so dispatch on the last entry needs no guard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSet {
    pub targets: Vec<TargetInfo>,
    pub complete: bool,
}

impl TargetSet {
    pub fn new(targets: Vec<TargetInfo>) -> Self {
        Self { targets, complete: false }
    }

    pub fn complete(mut self) -> Self {
        self.complete = true;
        self
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn aggregate_count(&self) -> u64 {
        self.targets.iter().map(|t| t.count).sum()
    }

    /// Sort by descending call count; ties keep their feedback order.
    pub fn sort_by_count(&mut self) {
        self.targets.sort_by(|a, b| b.count.cmp(&a.count));
    }

    /// The one target function every entry dispatches to, if there is exactly one.
    pub fn single_target(&self) -> Option<FunctionId> {
        let first = self.targets.first()?.target;
        self.targets
            .iter()
            .all(|t| t.target == first)
            .then_some(first)
    }

    pub fn lookup(&self, cid: ClassId) -> Option<&TargetInfo> {
        self.targets.iter().find(|t| t.cids.contains(cid))
    }
}
