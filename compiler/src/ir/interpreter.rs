//! Reference Interpreter
//!
//! Executes flow graphs directly so that a graph can be compared against its
//! inlined counterpart by running both on the same inputs.
//!
//! ## Design
//! - Register file per activation, keyed by `IrId`
//! - Phis are evaluated on block entry from the edge actually taken
//! - Exceptions unwind to the handler of the current block's try region,
//!   then to the caller
//! - A failing class check stops execution with `Deoptimized`; the
//!   interpreter has no unoptimized tier to continue in

use super::{
    ArgumentMismatch, BinaryOp, BoundArgument, ClassId, CompareOp, FloatOp, FunctionId,
    FunctionInfo, IrBlockId, IrFunction, IrId, IrInstruction, IrTerminator, IrValue,
    UnaryOp,
};
use fxhash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;

/// What the interpreter needs from the runtime
pub trait ExecutionEnv {
    /// Unoptimized body of a function
    fn body(&self, function: FunctionId) -> Option<&IrFunction>;

    fn info(&self, function: FunctionId) -> Option<&FunctionInfo>;

    /// Method lookup for dynamic dispatch
    fn resolve_method(&self, class_id: ClassId, selector: &str) -> Option<FunctionId>;
}

/// Heap object instance
#[derive(Debug, PartialEq)]
pub struct Object {
    pub class_id: ClassId,
    pub fields: RefCell<Vec<Value>>,
}

/// Interpreter value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<Object>),
    Closure(FunctionId),
    Float64x2([f64; 2]),
}

impl Value {
    pub fn class_id(&self) -> ClassId {
        match self {
            Value::Null => ClassId::NULL,
            Value::Bool(_) => ClassId::BOOL,
            Value::Int(_) => ClassId::INT,
            Value::Double(_) => ClassId::DOUBLE,
            Value::Str(_) => ClassId::STRING,
            Value::Array(_) => ClassId::ARRAY,
            Value::Object(obj) => obj.class_id,
            Value::Closure(_) => ClassId::CLOSURE,
            Value::Float64x2(_) => ClassId::FLOAT64X2,
        }
    }

    pub fn object(class_id: ClassId, fields: Vec<Value>) -> Self {
        Value::Object(Rc::new(Object {
            class_id,
            fields: RefCell::new(fields),
        }))
    }

    pub fn array(elements: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(elements)))
    }

    pub fn string(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    fn as_int(&self) -> Result<i64, InterpreterError> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(InterpreterError::TypeError(format!("expected int, got {:?}", other))),
        }
    }

    fn as_double(&self) -> Result<f64, InterpreterError> {
        match self {
            Value::Double(v) => Ok(*v),
            other => Err(InterpreterError::TypeError(format!("expected double, got {:?}", other))),
        }
    }

    fn as_bool(&self) -> Result<bool, InterpreterError> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(InterpreterError::TypeError(format!("expected bool, got {:?}", other))),
        }
    }
}

impl From<&IrValue> for Value {
    fn from(value: &IrValue) -> Self {
        match value {
            IrValue::Null => Value::Null,
            IrValue::Bool(b) => Value::Bool(*b),
            IrValue::Int(i) => Value::Int(*i),
            IrValue::Double(d) => Value::Double(*d),
            IrValue::Str(s) => Value::string(s),
            IrValue::Function(f) => Value::Closure(*f),
        }
    }
}

/// Interpreter error types
#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("uncaught exception: {0:?}")]
    Thrown(Value),

    #[error("deoptimized: {0}")]
    Deoptimized(String),

    #[error("type error: {0}")]
    TypeError(String),

    #[error("function not found: {0}")]
    UnknownFunction(FunctionId),

    #[error("no method '{selector}' for class {class_id}")]
    NoSuchMethod { class_id: ClassId, selector: String },

    #[error("bad call shape: {0}")]
    ArgumentMismatch(#[from] ArgumentMismatch),

    #[error("read of undefined register {0}")]
    UndefinedRegister(IrId),

    #[error("block not found: {0}")]
    BlockNotFound(IrBlockId),

    #[error("reached unreachable code")]
    Unreachable,

    #[error("step limit exceeded")]
    StepLimitExceeded,

    #[error("stack overflow")]
    StackOverflow,
}

fn throw(kind: &str) -> InterpreterError {
    InterpreterError::Thrown(Value::string(kind))
}

/// Flow-graph interpreter over an execution environment
pub struct Interpreter<'e, E: ExecutionEnv> {
    env: &'e E,
    steps: u64,
    step_limit: u64,
    depth: usize,
    max_depth: usize,
}

/// One activation of a graph
struct Activation {
    registers: FxHashMap<IrId, Value>,
    parameters: Vec<Value>,
    exception: Option<Value>,
}

impl Activation {
    fn get(&self, id: IrId) -> Result<Value, InterpreterError> {
        self.registers
            .get(&id)
            .cloned()
            .ok_or(InterpreterError::UndefinedRegister(id))
    }
}

enum Flow {
    Next(IrBlockId),
    Return(Value),
}

impl<'e, E: ExecutionEnv> Interpreter<'e, E> {
    pub fn new(env: &'e E) -> Self {
        Self {
            env,
            steps: 0,
            step_limit: 1_000_000,
            depth: 0,
            max_depth: 256,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Instructions executed so far
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Call `function` through the environment with positional arguments
    pub fn call(&mut self, function: FunctionId, args: Vec<Value>) -> Result<Value, InterpreterError> {
        self.invoke(function, args, &[], None)
    }

    /// Execute `graph` as the body of its function, binding `args` positionally.
    /// Calls made by the graph go through the environment.
    pub fn run(&mut self, graph: &IrFunction, args: Vec<Value>) -> Result<Value, InterpreterError> {
        let parameters = self.bind(graph.function, args, &[], None)?;
        self.execute(graph, parameters)
    }

    fn bind(
        &self,
        function: FunctionId,
        args: Vec<Value>,
        names: &[String],
        type_args: Option<Value>,
    ) -> Result<Vec<Value>, InterpreterError> {
        let Some(info) = self.env.info(function) else {
            return Ok(args);
        };
        let bound = info.signature.bind_arguments(args.len(), names)?;

        let mut parameters = Vec::with_capacity(bound.len() + 1);
        if info.signature.is_generic {
            parameters.push(type_args.unwrap_or(Value::Null));
        }
        for binding in bound {
            match binding {
                BoundArgument::Actual(i) => parameters.push(args[i].clone()),
                BoundArgument::Default(value) => parameters.push(Value::from(&value)),
            }
        }
        Ok(parameters)
    }

    fn invoke(
        &mut self,
        function: FunctionId,
        args: Vec<Value>,
        names: &[String],
        type_args: Option<Value>,
    ) -> Result<Value, InterpreterError> {
        let env = self.env;
        let body = env
            .body(function)
            .ok_or(InterpreterError::UnknownFunction(function))?;
        let parameters = self.bind(function, args, names, type_args)?;
        self.execute(body, parameters)
    }

    fn execute(&mut self, graph: &IrFunction, parameters: Vec<Value>) -> Result<Value, InterpreterError> {
        if self.depth >= self.max_depth {
            return Err(InterpreterError::StackOverflow);
        }
        self.depth += 1;
        let result = self.execute_graph(graph, parameters);
        self.depth -= 1;
        result
    }

    fn execute_graph(&mut self, graph: &IrFunction, parameters: Vec<Value>) -> Result<Value, InterpreterError> {
        let mut act = Activation {
            registers: FxHashMap::default(),
            parameters,
            exception: None,
        };
        let mut current = graph.cfg.entry_block;
        let mut previous: Option<IrBlockId> = None;

        loop {
            let block = graph
                .cfg
                .get_block(current)
                .ok_or(InterpreterError::BlockNotFound(current))?;

            // Phis read their inputs simultaneously
            if let Some(prev) = previous {
                let mut values = Vec::with_capacity(block.phi_nodes.len());
                for phi in &block.phi_nodes {
                    if let Some(input) = phi.incoming_from(prev) {
                        values.push((phi.dest, act.get(input)?));
                    }
                }
                act.registers.extend(values);
            }

            let outcome = self.execute_block(graph, current, &mut act);
            match outcome {
                Ok(Flow::Next(next)) => {
                    previous = Some(current);
                    current = next;
                }
                Ok(Flow::Return(value)) => return Ok(value),
                Err(InterpreterError::Thrown(exception)) => {
                    let handler = block.try_index.and_then(|t| graph.cfg.handler_for(t));
                    match handler {
                        Some(handler) => {
                            act.exception = Some(exception);
                            previous = None;
                            current = handler;
                        }
                        None => return Err(InterpreterError::Thrown(exception)),
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    fn execute_block(
        &mut self,
        graph: &IrFunction,
        id: IrBlockId,
        act: &mut Activation,
    ) -> Result<Flow, InterpreterError> {
        let block = graph
            .cfg
            .get_block(id)
            .ok_or(InterpreterError::BlockNotFound(id))?;

        for inst in &block.instructions {
            self.steps += 1;
            if self.steps > self.step_limit {
                return Err(InterpreterError::StepLimitExceeded);
            }
            let value = self.execute_instruction(inst, act)?;
            if let (Some(dest), Some(value)) = (inst.dest(), value) {
                act.registers.insert(dest, value);
            }
        }

        match &block.terminator {
            IrTerminator::Branch { target } => Ok(Flow::Next(*target)),
            IrTerminator::CondBranch {
                condition,
                true_target,
                false_target,
            } => {
                if act.get(*condition)?.as_bool()? {
                    Ok(Flow::Next(*true_target))
                } else {
                    Ok(Flow::Next(*false_target))
                }
            }
            IrTerminator::Return { value } => match value {
                Some(v) => Ok(Flow::Return(act.get(*v)?)),
                None => Ok(Flow::Return(Value::Null)),
            },
            IrTerminator::Throw { exception } => Err(InterpreterError::Thrown(act.get(*exception)?)),
            IrTerminator::Deoptimize { reason } => Err(InterpreterError::Deoptimized(reason.clone())),
            IrTerminator::Unreachable => Err(InterpreterError::Unreachable),
        }
    }

    fn execute_instruction(
        &mut self,
        inst: &IrInstruction,
        act: &mut Activation,
    ) -> Result<Option<Value>, InterpreterError> {
        let value = match inst {
            IrInstruction::Parameter { index, .. } => act
                .parameters
                .get(*index as usize)
                .cloned()
                .ok_or_else(|| InterpreterError::TypeError(format!("missing parameter {}", index)))?,
            IrInstruction::Const { value, .. } => Value::from(value),
            IrInstruction::CatchParameter { .. } => act.exception.clone().unwrap_or(Value::Null),
            IrInstruction::Copy { src, .. } => act.get(*src)?,
            IrInstruction::Redefinition { value, .. } => act.get(*value)?,
            IrInstruction::BinOp { op, left, right, .. } => {
                Value::Int(int_binop(*op, act.get(*left)?.as_int()?, act.get(*right)?.as_int()?)?)
            }
            IrInstruction::UnOp { op, operand, .. } => match (op, act.get(*operand)?) {
                (UnaryOp::Neg, Value::Int(v)) => Value::Int(v.wrapping_neg()),
                (UnaryOp::Neg, Value::Double(v)) => Value::Double(-v),
                (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
                (_, other) => return Err(InterpreterError::TypeError(format!("bad unary operand {:?}", other))),
            },
            IrInstruction::Cmp { op, left, right, .. } => {
                Value::Bool(compare(*op, &act.get(*left)?, &act.get(*right)?)?)
            }
            IrInstruction::DoubleOp { op, left, right, .. } => {
                Value::Double(float_op(*op, act.get(*left)?.as_double()?, act.get(*right)?.as_double()?))
            }
            IrInstruction::SimdOp { op, left, right, .. } => match (act.get(*left)?, act.get(*right)?) {
                (Value::Float64x2(a), Value::Float64x2(b)) => {
                    Value::Float64x2([float_op(*op, a[0], b[0]), float_op(*op, a[1], b[1])])
                }
                (a, b) => return Err(InterpreterError::TypeError(format!("bad simd operands {:?}, {:?}", a, b))),
            },
            IrInstruction::Box { value, rep, .. } | IrInstruction::Unbox { value, rep, .. } => {
                let v = act.get(*value)?;
                match rep.boxed_class() {
                    Some(expected) if v.class_id() != expected => {
                        return Err(InterpreterError::TypeError(format!("cannot convert {:?} as {:?}", v, rep)));
                    }
                    _ => v,
                }
            }
            IrInstruction::LoadClassId { object, .. } => Value::Int(act.get(*object)?.class_id().0 as i64),
            IrInstruction::Allocate { class_id, fields, .. } => {
                let values = fields.iter().map(|f| act.get(*f)).collect::<Result<Vec<_>, _>>()?;
                Value::object(*class_id, values)
            }
            IrInstruction::LoadField { object, field, .. } => match act.get(*object)? {
                Value::Object(obj) => obj
                    .fields
                    .borrow()
                    .get(*field as usize)
                    .cloned()
                    .ok_or_else(|| InterpreterError::TypeError(format!("no field {}", field)))?,
                Value::Null => return Err(throw("NoSuchMethodError")),
                other => return Err(InterpreterError::TypeError(format!("field load from {:?}", other))),
            },
            IrInstruction::StoreField { object, field, value } => {
                let stored = act.get(*value)?;
                match act.get(*object)? {
                    Value::Object(obj) => {
                        let mut fields = obj.fields.borrow_mut();
                        let slot = fields
                            .get_mut(*field as usize)
                            .ok_or_else(|| InterpreterError::TypeError(format!("no field {}", field)))?;
                        *slot = stored;
                    }
                    Value::Null => return Err(throw("NoSuchMethodError")),
                    other => return Err(InterpreterError::TypeError(format!("field store to {:?}", other))),
                }
                return Ok(None);
            }
            IrInstruction::MakeArray { elements, .. } => {
                let values = elements.iter().map(|e| act.get(*e)).collect::<Result<Vec<_>, _>>()?;
                Value::array(values)
            }
            IrInstruction::MakeClosure { function, .. } => Value::Closure(*function),
            IrInstruction::LoadLength { object, .. } => match act.get(*object)? {
                Value::Array(elements) => Value::Int(elements.borrow().len() as i64),
                Value::Str(s) => Value::Int(s.encode_utf16().count() as i64),
                other => return Err(InterpreterError::TypeError(format!("length of {:?}", other))),
            },
            IrInstruction::LoadIndexed { array, index, .. } => {
                let i = act.get(*index)?.as_int()?;
                match act.get(*array)? {
                    Value::Array(elements) => usize::try_from(i)
                        .ok()
                        .and_then(|i| elements.borrow().get(i).cloned())
                        .ok_or_else(|| InterpreterError::TypeError(format!("unchecked index {}", i)))?,
                    other => return Err(InterpreterError::TypeError(format!("indexed load from {:?}", other))),
                }
            }
            IrInstruction::StoreIndexed { array, index, value } => {
                let i = act.get(*index)?.as_int()?;
                let stored = act.get(*value)?;
                match act.get(*array)? {
                    Value::Array(elements) => {
                        let mut elements = elements.borrow_mut();
                        let slot = usize::try_from(i)
                            .ok()
                            .and_then(|i| elements.get_mut(i))
                            .ok_or_else(|| InterpreterError::TypeError(format!("unchecked index {}", i)))?;
                        *slot = stored;
                    }
                    other => return Err(InterpreterError::TypeError(format!("indexed store to {:?}", other))),
                }
                return Ok(None);
            }
            IrInstruction::LoadCodeUnit { string, index, .. } => {
                let i = act.get(*index)?.as_int()?;
                match act.get(*string)? {
                    Value::Str(s) => usize::try_from(i)
                        .ok()
                        .and_then(|i| s.encode_utf16().nth(i))
                        .map(|unit| Value::Int(unit as i64))
                        .ok_or_else(|| InterpreterError::TypeError(format!("unchecked index {}", i)))?,
                    other => return Err(InterpreterError::TypeError(format!("code unit of {:?}", other))),
                }
            }
            IrInstruction::CheckBounds { length, index } => {
                let length = act.get(*length)?.as_int()?;
                let index = act.get(*index)?.as_int()?;
                if index < 0 || index >= length {
                    return Err(throw("RangeError"));
                }
                return Ok(None);
            }
            IrInstruction::CheckClassId { value, cids } => {
                let cid = act.get(*value)?.class_id();
                if !cids.contains(cid) {
                    return Err(InterpreterError::Deoptimized(format!("class check failed: {} not in {}", cid, cids)));
                }
                return Ok(None);
            }
            IrInstruction::StaticCall { target, call, .. } => {
                let args = call.args.iter().map(|a| act.get(*a)).collect::<Result<Vec<_>, _>>()?;
                let type_args = call.type_args.map(|t| act.get(t)).transpose()?;
                self.invoke(*target, args, &call.arg_names, type_args)?
            }
            IrInstruction::InstanceCall { selector, call, .. }
            | IrInstruction::PolymorphicInstanceCall { selector, call, .. } => {
                let args = call.args.iter().map(|a| act.get(*a)).collect::<Result<Vec<_>, _>>()?;
                let receiver = args.first().cloned().unwrap_or(Value::Null);
                let class_id = receiver.class_id();
                let target = self
                    .env
                    .resolve_method(class_id, selector)
                    .ok_or_else(|| InterpreterError::NoSuchMethod {
                        class_id,
                        selector: selector.clone(),
                    })?;
                let type_args = call.type_args.map(|t| act.get(t)).transpose()?;
                self.invoke(target, args, &call.arg_names, type_args)?
            }
            IrInstruction::ClosureCall { call, .. } => {
                let args = call.args.iter().map(|a| act.get(*a)).collect::<Result<Vec<_>, _>>()?;
                match args.first() {
                    Some(Value::Closure(function)) => {
                        let function = *function;
                        self.invoke(function, args, &call.arg_names, None)?
                    }
                    Some(Value::Null) | None => return Err(throw("NoSuchMethodError")),
                    Some(other) => return Err(InterpreterError::TypeError(format!("call of {:?}", other))),
                }
            }
        };
        Ok(Some(value))
    }
}

fn int_binop(op: BinaryOp, a: i64, b: i64) -> Result<i64, InterpreterError> {
    Ok(match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div if b == 0 => return Err(throw("IntegerDivisionByZeroException")),
        BinaryOp::Rem if b == 0 => return Err(throw("IntegerDivisionByZeroException")),
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::Rem => a.wrapping_rem(b),
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Shl | BinaryOp::Shr if b < 0 => return Err(throw("ArgumentError")),
        BinaryOp::Shl => a.checked_shl(b.min(64) as u32).unwrap_or(0),
        BinaryOp::Shr => a >> b.min(63),
    })
}

fn float_op(op: FloatOp, a: f64, b: f64) -> f64 {
    match op {
        FloatOp::Add => a + b,
        FloatOp::Sub => a - b,
        FloatOp::Mul => a * b,
        FloatOp::Div => a / b,
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, InterpreterError> {
    use CompareOp::*;
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(match op {
            Eq => a == b,
            Ne => a != b,
            Lt => a < b,
            Le => a <= b,
            Gt => a > b,
            Ge => a >= b,
            ULt => (*a as u64) < (*b as u64),
            ULe => (*a as u64) <= (*b as u64),
        }),
        (Value::Double(a), Value::Double(b)) => Ok(match op {
            Eq => a == b,
            Ne => a != b,
            Lt | ULt => a < b,
            Le | ULe => a <= b,
            Gt => a > b,
            Ge => a >= b,
        }),
        _ => match op {
            Eq => Ok(left == right),
            Ne => Ok(left != right),
            _ => Err(InterpreterError::TypeError(format!(
                "cannot order {:?} and {:?}",
                left, right
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrBuilder, Signature};

    struct Env {
        bodies: Vec<IrFunction>,
        infos: Vec<FunctionInfo>,
    }

    impl ExecutionEnv for Env {
        fn body(&self, function: FunctionId) -> Option<&IrFunction> {
            self.bodies.iter().find(|b| b.function == function)
        }

        fn info(&self, function: FunctionId) -> Option<&FunctionInfo> {
            self.infos.iter().find(|i| i.id == function)
        }

        fn resolve_method(&self, _class_id: ClassId, _selector: &str) -> Option<FunctionId> {
            None
        }
    }

    #[test]
    fn test_loop_and_call() {
        // sum(n) = 0 + 1 + ... + (n - 1) computed through add(a, b)
        let mut add = IrBuilder::new(FunctionId(1), "add");
        let a = add.build_parameter(0);
        let b = add.build_parameter(1);
        let s = add.build_binop(BinaryOp::Add, a, b);
        add.build_return(Some(s));

        let mut sum = IrBuilder::new(FunctionId(0), "sum");
        let n = sum.build_parameter(0);
        let zero = sum.build_int(0);
        let one = sum.build_int(1);
        let header = sum.create_block();
        let body = sum.create_block();
        let exit = sum.create_block();
        let entry = sum.current_block();
        sum.build_branch(header);
        sum.switch_to_block(header);
        let i = sum.build_phi(header, vec![]);
        let acc = sum.build_phi(header, vec![]);
        let cond = sum.build_cmp(CompareOp::Lt, i, n);
        sum.build_cond_branch(cond, body, exit);
        sum.switch_to_block(body);
        let next_acc = sum.build_static_call(FunctionId(1), &[acc, i]);
        let next_i = sum.build_binop(BinaryOp::Add, i, one);
        sum.build_branch(header);
        sum.switch_to_block(exit);
        sum.build_return(Some(acc));
        let mut sum = sum.finish();
        let phis = &mut sum.cfg.blocks[&header].phi_nodes;
        phis[0].incoming = vec![(entry, zero), (body, next_i)];
        phis[1].incoming = vec![(entry, zero), (body, next_acc)];

        let env = Env {
            bodies: vec![add.finish(), sum],
            infos: vec![
                FunctionInfo::new(FunctionId(0), "sum", Signature::fixed(1)),
                FunctionInfo::new(FunctionId(1), "add", Signature::fixed(2)),
            ],
        };
        let mut interp = Interpreter::new(&env);
        let result = interp.call(FunctionId(0), vec![Value::Int(5)]).unwrap();
        assert_eq!(result, Value::Int(10));
    }

    #[test]
    fn test_exception_reaches_handler() {
        let mut b = IrBuilder::new(FunctionId(0), "guarded");
        let arr = b.build_parameter(0);
        let idx = b.build_parameter(1);
        let handler = b.create_block();
        b.begin_try(handler);
        let body = b.create_block();
        b.end_try();
        b.build_branch(body);
        b.switch_to_block(body);
        let len = b.build_load_length(arr);
        b.build_check_bounds(len, idx);
        let value = b.build_load_indexed(arr, idx);
        b.build_return(Some(value));
        b.switch_to_block(handler);
        let e = b.build_catch_parameter();
        b.build_return(Some(e));
        let func = b.finish();

        let env = Env { bodies: vec![], infos: vec![] };
        let mut interp = Interpreter::new(&env);
        let arr_value = Value::array(vec![Value::Int(7)]);
        assert_eq!(interp.run(&func, vec![arr_value.clone(), Value::Int(0)]).unwrap(), Value::Int(7));
        assert_eq!(
            interp.run(&func, vec![arr_value, Value::Int(3)]).unwrap(),
            Value::string("RangeError")
        );
    }

    #[test]
    fn test_step_limit() {
        let mut b = IrBuilder::new(FunctionId(0), "spin");
        let spin = b.create_block();
        b.build_branch(spin);
        b.switch_to_block(spin);
        let x = b.build_int(1);
        let _ = b.build_binop(BinaryOp::Add, x, x);
        b.build_branch(spin);
        let func = b.finish();

        let env = Env { bodies: vec![], infos: vec![] };
        let mut interp = Interpreter::new(&env).with_step_limit(100);
        assert!(matches!(interp.run(&func, vec![]), Err(InterpreterError::StepLimitExceeded)));
    }
}
