//! IR Instructions
//!
//! Defines the instruction set of the flow graph. Every value-producing
//! instruction defines exactly one `IrId`; calls always define a result even
//! when the callee returns nothing (the result is then `null`).

use super::{CallId, CidRange, ClassId, FunctionId, InlineFrameId, IrId, IrValue, Representation, TargetSet};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Argument list of a call; receivers and closures are argument 0.
pub type CallArgs = SmallVec<[IrId; 4]>;

/// Operands and metadata shared by every call instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInfo {
    /// Stable identity of this call within its graph
    pub call_id: CallId,

    /// Actual arguments (receiver/closure first where applicable)
    pub args: CallArgs,

    /// Names of the trailing named arguments, in call order
    pub arg_names: Vec<String>,

    /// Incoming type-argument vector for generic targets
    pub type_args: Option<IrId>,

    /// Inline frame of the code containing this call (caller chain)
    pub frame: InlineFrameId,

    /// Observed execution count from the runtime profile, if any
    pub profile_count: Option<u64>,
}

impl CallInfo {
    pub fn new(call_id: CallId, args: CallArgs) -> Self {
        Self {
            call_id,
            args,
            arg_names: Vec::new(),
            type_args: None,
            frame: InlineFrameId::ROOT,
            profile_count: None,
        }
    }

    /// Number of positional arguments (named arguments trail them)
    pub fn positional_count(&self) -> usize {
        self.args.len() - self.arg_names.len()
    }

    pub fn receiver(&self) -> Option<IrId> {
        self.args.first().copied()
    }
}

/// IR instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrInstruction {
    // === Prologue ===

    /// Formal parameter `index` of the enclosing function
    Parameter { dest: IrId, index: u32 },

    /// Load constant value
    Const { dest: IrId, value: IrValue },

    /// Exception object delivered to a catch handler
    CatchParameter { dest: IrId },

    // === Value Operations ===

    /// Copy value from one register to another
    Copy { dest: IrId, src: IrId },

    /// Same value as `value`, with a narrower class once a guard has run
    Redefinition {
        dest: IrId,
        value: IrId,
        refined: Option<ClassId>,
    },

    // === Arithmetic Operations ===

    /// Integer binary operation
    BinOp {
        dest: IrId,
        op: BinaryOp,
        left: IrId,
        right: IrId,
    },

    /// Unary operation
    UnOp {
        dest: IrId,
        op: UnaryOp,
        operand: IrId,
    },

    /// Compare operation
    Cmp {
        dest: IrId,
        op: CompareOp,
        left: IrId,
        right: IrId,
    },

    /// Arithmetic on unboxed doubles
    DoubleOp {
        dest: IrId,
        op: FloatOp,
        left: IrId,
        right: IrId,
    },

    /// Lane-wise arithmetic on unboxed float64x2 values
    SimdOp {
        dest: IrId,
        op: FloatOp,
        left: IrId,
        right: IrId,
    },

    Box {
        dest: IrId,
        value: IrId,
        rep: Representation,
    },

    Unbox {
        dest: IrId,
        value: IrId,
        rep: Representation,
    },

    // === Object Operations ===

    LoadClassId { dest: IrId, object: IrId },

    /// Allocate an instance of `class_id` with initial field values
    Allocate {
        dest: IrId,
        class_id: ClassId,
        fields: SmallVec<[IrId; 4]>,
    },

    LoadField { dest: IrId, object: IrId, field: u32 },

    StoreField { object: IrId, field: u32, value: IrId },

    MakeArray { dest: IrId, elements: Vec<IrId> },

    MakeClosure { dest: IrId, function: FunctionId },

    /// Length of an array or string
    LoadLength { dest: IrId, object: IrId },

    LoadIndexed { dest: IrId, array: IrId, index: IrId },

    StoreIndexed { array: IrId, index: IrId, value: IrId },

    /// UTF-16 code unit of a string
    LoadCodeUnit { dest: IrId, string: IrId, index: IrId },

    // === Checks ===

    /// Throws a range error unless `0 <= index < length`
    CheckBounds { length: IrId, index: IrId },

    /// Deoptimizes unless the class of `value` lies in `cids`
    CheckClassId { value: IrId, cids: CidRange },

    // === Calls ===

    StaticCall {
        dest: IrId,
        target: FunctionId,
        call: CallInfo,
    },

    /// Dynamically dispatched call with receiver-class feedback
    InstanceCall {
        dest: IrId,
        selector: String,
        call: CallInfo,
        targets: TargetSet,
    },

    /// Instance call specialised to a known list of receiver classes
    PolymorphicInstanceCall {
        dest: IrId,
        selector: String,
        call: CallInfo,
        targets: TargetSet,
    },

    /// Call through a closure object (argument 0)
    ClosureCall { dest: IrId, call: CallInfo },
}

/// Integer binary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// Floating point binary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Unary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Comparison operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Unsigned comparisons (used by class-id range tests)
    ULt,
    ULe,
}

impl IrInstruction {
    /// Get the destination register if this instruction produces a value
    pub fn dest(&self) -> Option<IrId> {
        match self {
            IrInstruction::Parameter { dest, .. }
            | IrInstruction::Const { dest, .. }
            | IrInstruction::CatchParameter { dest }
            | IrInstruction::Copy { dest, .. }
            | IrInstruction::Redefinition { dest, .. }
            | IrInstruction::BinOp { dest, .. }
            | IrInstruction::UnOp { dest, .. }
            | IrInstruction::Cmp { dest, .. }
            | IrInstruction::DoubleOp { dest, .. }
            | IrInstruction::SimdOp { dest, .. }
            | IrInstruction::Box { dest, .. }
            | IrInstruction::Unbox { dest, .. }
            | IrInstruction::LoadClassId { dest, .. }
            | IrInstruction::Allocate { dest, .. }
            | IrInstruction::LoadField { dest, .. }
            | IrInstruction::MakeArray { dest, .. }
            | IrInstruction::MakeClosure { dest, .. }
            | IrInstruction::LoadLength { dest, .. }
            | IrInstruction::LoadIndexed { dest, .. }
            | IrInstruction::LoadCodeUnit { dest, .. }
            | IrInstruction::StaticCall { dest, .. }
            | IrInstruction::InstanceCall { dest, .. }
            | IrInstruction::PolymorphicInstanceCall { dest, .. }
            | IrInstruction::ClosureCall { dest, .. } => Some(*dest),

            IrInstruction::StoreField { .. }
            | IrInstruction::StoreIndexed { .. }
            | IrInstruction::CheckBounds { .. }
            | IrInstruction::CheckClassId { .. } => None,
        }
    }

    pub fn dest_mut(&mut self) -> Option<&mut IrId> {
        match self {
            IrInstruction::Parameter { dest, .. }
            | IrInstruction::Const { dest, .. }
            | IrInstruction::CatchParameter { dest }
            | IrInstruction::Copy { dest, .. }
            | IrInstruction::Redefinition { dest, .. }
            | IrInstruction::BinOp { dest, .. }
            | IrInstruction::UnOp { dest, .. }
            | IrInstruction::Cmp { dest, .. }
            | IrInstruction::DoubleOp { dest, .. }
            | IrInstruction::SimdOp { dest, .. }
            | IrInstruction::Box { dest, .. }
            | IrInstruction::Unbox { dest, .. }
            | IrInstruction::LoadClassId { dest, .. }
            | IrInstruction::Allocate { dest, .. }
            | IrInstruction::LoadField { dest, .. }
            | IrInstruction::MakeArray { dest, .. }
            | IrInstruction::MakeClosure { dest, .. }
            | IrInstruction::LoadLength { dest, .. }
            | IrInstruction::LoadIndexed { dest, .. }
            | IrInstruction::LoadCodeUnit { dest, .. }
            | IrInstruction::StaticCall { dest, .. }
            | IrInstruction::InstanceCall { dest, .. }
            | IrInstruction::PolymorphicInstanceCall { dest, .. }
            | IrInstruction::ClosureCall { dest, .. } => Some(dest),

            IrInstruction::StoreField { .. }
            | IrInstruction::StoreIndexed { .. }
            | IrInstruction::CheckBounds { .. }
            | IrInstruction::CheckClassId { .. } => None,
        }
    }

    /// Get all registers used by this instruction
    pub fn uses(&self) -> Vec<IrId> {
        let mut uses = Vec::new();
        self.visit_uses(|id| uses.push(id));
        uses
    }

    /// Visit every used register in operand order
    pub fn visit_uses(&self, mut f: impl FnMut(IrId)) {
        match self {
            IrInstruction::Parameter { .. }
            | IrInstruction::Const { .. }
            | IrInstruction::CatchParameter { .. }
            | IrInstruction::MakeClosure { .. } => {}
            IrInstruction::Copy { src, .. } => f(*src),
            IrInstruction::Redefinition { value, .. } => f(*value),
            IrInstruction::BinOp { left, right, .. }
            | IrInstruction::Cmp { left, right, .. }
            | IrInstruction::DoubleOp { left, right, .. }
            | IrInstruction::SimdOp { left, right, .. } => {
                f(*left);
                f(*right);
            }
            IrInstruction::UnOp { operand, .. } => f(*operand),
            IrInstruction::Box { value, .. } | IrInstruction::Unbox { value, .. } => f(*value),
            IrInstruction::LoadClassId { object, .. }
            | IrInstruction::LoadField { object, .. }
            | IrInstruction::LoadLength { object, .. } => f(*object),
            IrInstruction::Allocate { fields, .. } => fields.iter().copied().for_each(f),
            IrInstruction::StoreField { object, value, .. } => {
                f(*object);
                f(*value);
            }
            IrInstruction::MakeArray { elements, .. } => elements.iter().copied().for_each(f),
            IrInstruction::LoadIndexed { array, index, .. } => {
                f(*array);
                f(*index);
            }
            IrInstruction::StoreIndexed { array, index, value } => {
                f(*array);
                f(*index);
                f(*value);
            }
            IrInstruction::LoadCodeUnit { string, index, .. } => {
                f(*string);
                f(*index);
            }
            IrInstruction::CheckBounds { length, index } => {
                f(*length);
                f(*index);
            }
            IrInstruction::CheckClassId { value, .. } => f(*value),
            IrInstruction::StaticCall { call, .. }
            | IrInstruction::InstanceCall { call, .. }
            | IrInstruction::PolymorphicInstanceCall { call, .. }
            | IrInstruction::ClosureCall { call, .. } => {
                if let Some(type_args) = call.type_args {
                    f(type_args);
                }
                call.args.iter().copied().for_each(f);
            }
        }
    }

    /// Rewrite every used register in place
    pub fn for_each_use_mut(&mut self, mut f: impl FnMut(&mut IrId)) {
        match self {
            IrInstruction::Parameter { .. }
            | IrInstruction::Const { .. }
            | IrInstruction::CatchParameter { .. }
            | IrInstruction::MakeClosure { .. } => {}
            IrInstruction::Copy { src, .. } => f(src),
            IrInstruction::Redefinition { value, .. } => f(value),
            IrInstruction::BinOp { left, right, .. }
            | IrInstruction::Cmp { left, right, .. }
            | IrInstruction::DoubleOp { left, right, .. }
            | IrInstruction::SimdOp { left, right, .. } => {
                f(left);
                f(right);
            }
            IrInstruction::UnOp { operand, .. } => f(operand),
            IrInstruction::Box { value, .. } | IrInstruction::Unbox { value, .. } => f(value),
            IrInstruction::LoadClassId { object, .. }
            | IrInstruction::LoadField { object, .. }
            | IrInstruction::LoadLength { object, .. } => f(object),
            IrInstruction::Allocate { fields, .. } => fields.iter_mut().for_each(f),
            IrInstruction::StoreField { object, value, .. } => {
                f(object);
                f(value);
            }
            IrInstruction::MakeArray { elements, .. } => elements.iter_mut().for_each(f),
            IrInstruction::LoadIndexed { array, index, .. } => {
                f(array);
                f(index);
            }
            IrInstruction::StoreIndexed { array, index, value } => {
                f(array);
                f(index);
                f(value);
            }
            IrInstruction::LoadCodeUnit { string, index, .. } => {
                f(string);
                f(index);
            }
            IrInstruction::CheckBounds { length, index } => {
                f(length);
                f(index);
            }
            IrInstruction::CheckClassId { value, .. } => f(value),
            IrInstruction::StaticCall { call, .. }
            | IrInstruction::InstanceCall { call, .. }
            | IrInstruction::PolymorphicInstanceCall { call, .. }
            | IrInstruction::ClosureCall { call, .. } => {
                if let Some(type_args) = call.type_args.as_mut() {
                    f(type_args);
                }
                call.args.iter_mut().for_each(f);
            }
        }
    }

    /// Number of value inputs
    pub fn input_count(&self) -> usize {
        let mut count = 0;
        self.visit_uses(|_| count += 1);
        count
    }

    pub fn call_info(&self) -> Option<&CallInfo> {
        match self {
            IrInstruction::StaticCall { call, .. }
            | IrInstruction::InstanceCall { call, .. }
            | IrInstruction::PolymorphicInstanceCall { call, .. }
            | IrInstruction::ClosureCall { call, .. } => Some(call),
            _ => None,
        }
    }

    pub fn call_info_mut(&mut self) -> Option<&mut CallInfo> {
        match self {
            IrInstruction::StaticCall { call, .. }
            | IrInstruction::InstanceCall { call, .. }
            | IrInstruction::PolymorphicInstanceCall { call, .. }
            | IrInstruction::ClosureCall { call, .. } => Some(call),
            _ => None,
        }
    }

    pub fn is_call(&self) -> bool {
        self.call_info().is_some()
    }

    /// Instructions that emit no machine code of their own: prologue
    /// definitions, copies and redefinitions.
    pub fn is_pseudo(&self) -> bool {
        matches!(
            self,
            IrInstruction::Parameter { .. }
                | IrInstruction::Const { .. }
                | IrInstruction::CatchParameter { .. }
                | IrInstruction::Copy { .. }
                | IrInstruction::Redefinition { .. }
        )
    }

    /// Check if this instruction has side effects (or may throw/deoptimize)
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            IrInstruction::StoreField { .. }
                | IrInstruction::StoreIndexed { .. }
                | IrInstruction::CheckBounds { .. }
                | IrInstruction::CheckClassId { .. }
                | IrInstruction::StaticCall { .. }
                | IrInstruction::InstanceCall { .. }
                | IrInstruction::PolymorphicInstanceCall { .. }
                | IrInstruction::ClosureCall { .. }
                | IrInstruction::LoadIndexed { .. }
                | IrInstruction::LoadCodeUnit { .. }
                | IrInstruction::LoadField { .. }
                | IrInstruction::LoadLength { .. }
                | IrInstruction::Unbox { .. }
                | IrInstruction::BinOp { op: BinaryOp::Div | BinaryOp::Rem, .. }
                | IrInstruction::CatchParameter { .. }
                | IrInstruction::Parameter { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_instruction_properties() {
        let add = IrInstruction::BinOp {
            dest: IrId::new(1),
            op: BinaryOp::Add,
            left: IrId::new(2),
            right: IrId::new(3),
        };

        assert_eq!(add.dest(), Some(IrId::new(1)));
        assert_eq!(add.uses(), vec![IrId::new(2), IrId::new(3)]);
        assert!(!add.has_side_effects());
        assert!(!add.is_pseudo());

        let div = IrInstruction::BinOp {
            dest: IrId::new(1),
            op: BinaryOp::Div,
            left: IrId::new(2),
            right: IrId::new(3),
        };
        assert!(div.has_side_effects());
    }

    #[test]
    fn test_call_uses_include_type_arguments() {
        let mut info = CallInfo::new(CallId(0), smallvec![IrId::new(4), IrId::new(5)]);
        info.type_args = Some(IrId::new(9));
        let mut call = IrInstruction::StaticCall {
            dest: IrId::new(10),
            target: FunctionId(1),
            call: info,
        };

        assert_eq!(call.uses(), vec![IrId::new(9), IrId::new(4), IrId::new(5)]);
        assert_eq!(call.input_count(), 3);

        call.for_each_use_mut(|id| *id = IrId::new(id.as_u32() + 100));
        assert_eq!(call.uses(), vec![IrId::new(109), IrId::new(104), IrId::new(105)]);
        assert!(call.is_call());
    }

    #[test]
    fn test_positional_count() {
        let mut info = CallInfo::new(CallId(0), smallvec![IrId::new(1), IrId::new(2), IrId::new(3)]);
        info.arg_names = vec!["b".to_string()];
        assert_eq!(info.positional_count(), 2);
        assert_eq!(info.receiver(), Some(IrId::new(1)));
    }
}
