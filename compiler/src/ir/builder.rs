//! Flow-graph Builder
//!
//! Convenience interface for constructing an `IrFunction` block by block.
//! Used by front ends to materialise callee bodies and by tests.

use tracing::debug;

use super::{
    BinaryOp, CallArgs, CallId, CallInfo, CidRange, ClassId, CompareOp, FloatOp, FunctionId,
    IrBlockId, IrFunction, IrId, IrInstruction, IrPhiNode, IrTerminator, IrValue,
    Representation, TargetSet, TryIndex, UnaryOp,
};
use smallvec::SmallVec;

/// Builder for one function's flow graph
pub struct IrBuilder {
    function: IrFunction,

    /// Current basic block being built
    current_block: IrBlockId,

    /// Try region assigned to newly created blocks
    current_try: Option<TryIndex>,
}

impl IrBuilder {
    pub fn new(function: FunctionId, name: impl Into<String>) -> Self {
        let function = IrFunction::new(function, name);
        let current_block = function.entry_block();
        Self {
            function,
            current_block,
            current_try: None,
        }
    }

    /// Finish the graph: compute block order and predecessors
    pub fn finish(mut self) -> IrFunction {
        self.function.cfg.discover_blocks();
        debug!(
            "built {} ({} blocks, {} instructions)",
            self.function.name,
            self.function.cfg.blocks.len(),
            self.function.instruction_count()
        );
        self.function
    }

    pub fn function(&self) -> &IrFunction {
        &self.function
    }

    // === Block Building ===

    /// Create a new basic block in the current try region
    pub fn create_block(&mut self) -> IrBlockId {
        self.function.cfg.create_block_in(self.current_try)
    }

    /// Create a new basic block with a label
    pub fn create_block_with_label(&mut self, label: &str) -> IrBlockId {
        let id = self.create_block();
        if let Some(block) = self.function.cfg.get_block_mut(id) {
            block.label = Some(label.to_string());
        }
        id
    }

    /// Switch to building in a different block
    pub fn switch_to_block(&mut self, block: IrBlockId) {
        self.current_block = block;
    }

    pub fn current_block(&self) -> IrBlockId {
        self.current_block
    }

    /// Open a try region handled by `handler`; blocks created until
    /// `end_try` belong to it.
    pub fn begin_try(&mut self, handler: IrBlockId) -> TryIndex {
        let index = self.function.cfg.alloc_try_index();
        self.function
            .cfg
            .register_handler(index, handler, self.current_try);
        self.current_try = Some(index);
        index
    }

    /// Close the innermost open try region
    pub fn end_try(&mut self) {
        self.current_try = self
            .current_try
            .and_then(|index| self.function.cfg.catch_handlers.get(&index))
            .and_then(|entry| entry.outer);
    }

    // === Instruction Building ===

    fn add_instruction(&mut self, inst: IrInstruction) {
        if let Some(block) = self.function.cfg.get_block_mut(self.current_block) {
            block.add_instruction(inst);
        }
    }

    fn build_value(&mut self, make: impl FnOnce(IrId) -> IrInstruction) -> IrId {
        let dest = self.function.alloc_reg();
        self.add_instruction(make(dest));
        dest
    }

    /// Define formal parameter `index` in the entry block
    pub fn build_parameter(&mut self, index: u32) -> IrId {
        let dest = self.function.alloc_reg();
        let entry = self.function.entry_block();
        if let Some(block) = self.function.cfg.get_block_mut(entry) {
            let position = block
                .instructions
                .iter()
                .position(|inst| !matches!(inst, IrInstruction::Parameter { .. }))
                .unwrap_or(block.instructions.len());
            block
                .instructions
                .insert(position, IrInstruction::Parameter { dest, index });
        }
        dest
    }

    /// Constants are pooled in the entry block
    pub fn build_const(&mut self, value: IrValue) -> IrId {
        self.function.get_or_insert_constant(value)
    }

    pub fn build_int(&mut self, value: i64) -> IrId {
        self.build_const(IrValue::Int(value))
    }

    pub fn build_double(&mut self, value: f64) -> IrId {
        self.build_const(IrValue::Double(value))
    }

    pub fn build_bool(&mut self, value: bool) -> IrId {
        self.build_const(IrValue::Bool(value))
    }

    pub fn build_string(&mut self, value: &str) -> IrId {
        self.build_const(IrValue::Str(value.to_string()))
    }

    pub fn build_null(&mut self) -> IrId {
        self.build_const(IrValue::Null)
    }

    pub fn build_copy(&mut self, src: IrId) -> IrId {
        self.build_value(|dest| IrInstruction::Copy { dest, src })
    }

    pub fn build_binop(&mut self, op: BinaryOp, left: IrId, right: IrId) -> IrId {
        self.build_value(|dest| IrInstruction::BinOp { dest, op, left, right })
    }

    pub fn build_unop(&mut self, op: UnaryOp, operand: IrId) -> IrId {
        self.build_value(|dest| IrInstruction::UnOp { dest, op, operand })
    }

    pub fn build_cmp(&mut self, op: CompareOp, left: IrId, right: IrId) -> IrId {
        self.build_value(|dest| IrInstruction::Cmp { dest, op, left, right })
    }

    pub fn build_double_op(&mut self, op: FloatOp, left: IrId, right: IrId) -> IrId {
        self.build_value(|dest| IrInstruction::DoubleOp { dest, op, left, right })
    }

    pub fn build_simd_op(&mut self, op: FloatOp, left: IrId, right: IrId) -> IrId {
        self.build_value(|dest| IrInstruction::SimdOp { dest, op, left, right })
    }

    pub fn build_box(&mut self, value: IrId, rep: Representation) -> IrId {
        self.build_value(|dest| IrInstruction::Box { dest, value, rep })
    }

    pub fn build_unbox(&mut self, value: IrId, rep: Representation) -> IrId {
        self.build_value(|dest| IrInstruction::Unbox { dest, value, rep })
    }

    pub fn build_load_class_id(&mut self, object: IrId) -> IrId {
        self.build_value(|dest| IrInstruction::LoadClassId { dest, object })
    }

    pub fn build_allocate(&mut self, class_id: ClassId, fields: &[IrId]) -> IrId {
        let fields: SmallVec<[IrId; 4]> = fields.iter().copied().collect();
        self.build_value(|dest| IrInstruction::Allocate { dest, class_id, fields })
    }

    pub fn build_load_field(&mut self, object: IrId, field: u32) -> IrId {
        self.build_value(|dest| IrInstruction::LoadField { dest, object, field })
    }

    pub fn build_store_field(&mut self, object: IrId, field: u32, value: IrId) {
        self.add_instruction(IrInstruction::StoreField { object, field, value });
    }

    pub fn build_make_array(&mut self, elements: &[IrId]) -> IrId {
        let elements = elements.to_vec();
        self.build_value(|dest| IrInstruction::MakeArray { dest, elements })
    }

    pub fn build_make_closure(&mut self, function: FunctionId) -> IrId {
        self.build_value(|dest| IrInstruction::MakeClosure { dest, function })
    }

    pub fn build_load_length(&mut self, object: IrId) -> IrId {
        self.build_value(|dest| IrInstruction::LoadLength { dest, object })
    }

    pub fn build_load_indexed(&mut self, array: IrId, index: IrId) -> IrId {
        self.build_value(|dest| IrInstruction::LoadIndexed { dest, array, index })
    }

    pub fn build_store_indexed(&mut self, array: IrId, index: IrId, value: IrId) {
        self.add_instruction(IrInstruction::StoreIndexed { array, index, value });
    }

    pub fn build_load_code_unit(&mut self, string: IrId, index: IrId) -> IrId {
        self.build_value(|dest| IrInstruction::LoadCodeUnit { dest, string, index })
    }

    pub fn build_check_bounds(&mut self, length: IrId, index: IrId) {
        self.add_instruction(IrInstruction::CheckBounds { length, index });
    }

    pub fn build_check_class_id(&mut self, value: IrId, cids: CidRange) {
        self.add_instruction(IrInstruction::CheckClassId { value, cids });
    }

    pub fn build_catch_parameter(&mut self) -> IrId {
        self.build_value(|dest| IrInstruction::CatchParameter { dest })
    }

    // === Calls ===

    fn new_call(&mut self, args: &[IrId]) -> CallInfo {
        let call_id = self.function.alloc_call_id();
        CallInfo::new(call_id, args.iter().copied().collect::<CallArgs>())
    }

    /// Direct call; instance methods take the receiver as `args[0]`
    pub fn build_static_call(&mut self, target: FunctionId, args: &[IrId]) -> IrId {
        let call = self.new_call(args);
        self.build_value(|dest| IrInstruction::StaticCall { dest, target, call })
    }

    /// Direct call whose last `names.len()` arguments are named
    pub fn build_static_call_named(
        &mut self,
        target: FunctionId,
        args: &[IrId],
        names: &[&str],
    ) -> IrId {
        let mut call = self.new_call(args);
        call.arg_names = names.iter().map(|n| n.to_string()).collect();
        self.build_value(|dest| IrInstruction::StaticCall { dest, target, call })
    }

    /// Direct call to a generic function
    pub fn build_generic_static_call(
        &mut self,
        target: FunctionId,
        type_args: IrId,
        args: &[IrId],
    ) -> IrId {
        let mut call = self.new_call(args);
        call.type_args = Some(type_args);
        self.build_value(|dest| IrInstruction::StaticCall { dest, target, call })
    }

    pub fn build_instance_call(&mut self, selector: &str, args: &[IrId], targets: TargetSet) -> IrId {
        let call = self.new_call(args);
        let selector = selector.to_string();
        self.build_value(|dest| IrInstruction::InstanceCall {
            dest,
            selector,
            call,
            targets,
        })
    }

    /// Call through `closure` with `args`
    pub fn build_closure_call(&mut self, closure: IrId, args: &[IrId]) -> IrId {
        let mut all: CallArgs = CallArgs::new();
        all.push(closure);
        all.extend(args.iter().copied());
        let call_id = self.function.alloc_call_id();
        let call = CallInfo::new(call_id, all);
        self.build_value(|dest| IrInstruction::ClosureCall { dest, call })
    }

    /// Attach an observed execution count to the call defining `dest`
    pub fn set_call_profile(&mut self, dest: IrId, count: u64) {
        for block in self.function.cfg.blocks.values_mut() {
            for inst in &mut block.instructions {
                if inst.dest() == Some(dest) {
                    if let Some(call) = inst.call_info_mut() {
                        call.profile_count = Some(count);
                    }
                }
            }
        }
    }

    /// Call id of the call defining `dest`
    pub fn call_id_of(&self, dest: IrId) -> Option<CallId> {
        self.function
            .definition(dest)
            .and_then(|inst| inst.call_info())
            .map(|call| call.call_id)
    }

    // === Control Flow ===

    fn terminate(&mut self, term: IrTerminator) {
        if let Some(block) = self.function.cfg.get_block_mut(self.current_block) {
            block.set_terminator(term);
        }
    }

    pub fn build_branch(&mut self, target: IrBlockId) {
        self.terminate(IrTerminator::Branch { target });
    }

    pub fn build_cond_branch(&mut self, condition: IrId, true_target: IrBlockId, false_target: IrBlockId) {
        self.terminate(IrTerminator::CondBranch {
            condition,
            true_target,
            false_target,
        });
    }

    pub fn build_return(&mut self, value: Option<IrId>) {
        self.terminate(IrTerminator::Return { value });
    }

    pub fn build_throw(&mut self, exception: IrId) {
        self.terminate(IrTerminator::Throw { exception });
    }

    pub fn build_deoptimize(&mut self, reason: &str) {
        self.terminate(IrTerminator::Deoptimize {
            reason: reason.to_string(),
        });
    }

    /// Add a phi to `block` merging `incoming`
    pub fn build_phi(&mut self, block: IrBlockId, incoming: Vec<(IrBlockId, IrId)>) -> IrId {
        let dest = self.function.alloc_reg();
        if let Some(b) = self.function.cfg.get_block_mut(block) {
            b.add_phi(IrPhiNode { dest, incoming });
        }
        dest
    }

    /// Add an incoming value to an existing phi, typically for a loop back edge
    pub fn add_phi_incoming(&mut self, phi: IrId, pred: IrBlockId, value: IrId) {
        for block in self.function.cfg.blocks.values_mut() {
            if let Some(node) = block.phi_nodes.iter_mut().find(|p| p.dest == phi) {
                node.incoming.push((pred, value));
                return;
            }
        }
    }
}
