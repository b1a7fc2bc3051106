//! ============================================================
//!                          Builder
//! ============================================================
//! Append-only construction API used by every pass to synthesize new
//! instructions and splice them into the graph. A builder holds an
//! insertion cursor (block + position); every emitted instruction lands
//! at the cursor and advances it, so a sequence of calls produces a
//! contiguous run of instructions.
//!
//! The builder registers operand usages and allocates result values as
//! it goes; callers never touch those tables directly.

use crate::ir::function::BlockId;
use crate::ir::instructions::{
    BinaryOp, BindingPoint, BuiltinFn, InstId, InstKind, Instruction, SwitchCase, UnaryOp, VarDecl,
};
use crate::ir::module::Module;
use crate::ir::symbols::Symbol;
use crate::ir::types::{AccessMode, AddressSpace, TypeId, TypeKind};
use crate::ir::values::{ValueId, ValueKind};
use crate::ir::function::FuncId;

pub struct Builder<'m> {
    pub module: &'m mut Module,
    block: BlockId,
    at: usize,
}

impl<'m> Builder<'m> {
    /// Cursor at the end of a block.
    pub fn append(module: &'m mut Module, block: BlockId) -> Builder<'m> {
        let at = module.block(block).len();
        Builder { module, block, at }
    }

    /// Cursor at the start of a block.
    pub fn prepend(module: &'m mut Module, block: BlockId) -> Builder<'m> {
        Builder {
            module,
            block,
            at: 0,
        }
    }

    /// Cursor immediately before an existing instruction.
    pub fn insert_before(module: &'m mut Module, anchor: InstId) -> Builder<'m> {
        let block = module
            .inst(anchor)
            .block
            .expect("insert_before anchor is not in a block");
        let at = module
            .block(block)
            .position_of(anchor)
            .expect("anchor's block back-pointer is stale");
        Builder { module, block, at }
    }

    /// Cursor immediately after an existing instruction.
    pub fn insert_after(module: &'m mut Module, anchor: InstId) -> Builder<'m> {
        let mut builder = Builder::insert_before(module, anchor);
        builder.at += 1;
        builder
    }

    pub fn current_block(&self) -> BlockId {
        self.block
    }

    fn emit(&mut self, kind: InstKind, operands: &[ValueId], result_types: &[TypeId]) -> InstId {
        let inst = self.module.push_inst(Instruction {
            kind,
            operands: Vec::new(),
            results: Vec::new(),
            block: None,
        });
        for &operand in operands {
            self.module.push_operand(inst, operand);
        }
        for &ty in result_types {
            let result = self
                .module
                .new_value(ValueKind::InstResult { inst, index: 0 }, ty, None);
            self.module.attach_result(inst, result);
        }
        self.module.insert_into_block(self.block, self.at, inst);
        self.at += 1;
        inst
    }

    fn emit_single(
        &mut self,
        kind: InstKind,
        operands: &[ValueId],
        result_type: TypeId,
    ) -> ValueId {
        let inst = self.emit(kind, operands, &[result_type]);
        self.module.single_result(inst).unwrap()
    }

    // ========================================================
    // Declarations and memory
    // ========================================================

    pub fn var(
        &mut self,
        name: Option<Symbol>,
        space: AddressSpace,
        access: AccessMode,
        store_type: TypeId,
        binding: Option<BindingPoint>,
        initializer: Option<ValueId>,
    ) -> ValueId {
        let ptr = self.module.types.pointer(space, store_type, access);
        let operands: Vec<ValueId> = initializer.into_iter().collect();
        let result = self.emit_single(
            InstKind::Var(VarDecl {
                space,
                access,
                binding,
            }),
            &operands,
            ptr,
        );
        self.module.value_mut(result).name = name;
        result
    }

    pub fn let_(&mut self, name: Symbol, value: ValueId) -> ValueId {
        let ty = self.module.value(value).ty;
        let result = self.emit_single(InstKind::Let, &[value], ty);
        self.module.value_mut(result).name = Some(name);
        result
    }

    pub fn load(&mut self, pointer: ValueId) -> ValueId {
        let ptr_ty = self.module.value(pointer).ty;
        let (_, store, _) = self
            .module
            .types
            .pointer_info(ptr_ty)
            .expect("load from a non-pointer value");
        self.emit_single(InstKind::Load, &[pointer], store)
    }

    pub fn store(&mut self, pointer: ValueId, value: ValueId) -> InstId {
        self.emit(InstKind::Store, &[pointer, value], &[])
    }

    pub fn load_vector_element(&mut self, pointer: ValueId, index: ValueId) -> ValueId {
        let ptr_ty = self.module.value(pointer).ty;
        let (_, store, _) = self
            .module
            .types
            .pointer_info(ptr_ty)
            .expect("load_vector_element from a non-pointer value");
        let TypeKind::Vector { element, .. } = *self.module.types.kind(store) else {
            panic!("load_vector_element from a non-vector store type");
        };
        self.emit_single(InstKind::LoadVectorElement, &[pointer, index], element)
    }

    pub fn store_vector_element(
        &mut self,
        pointer: ValueId,
        index: ValueId,
        value: ValueId,
    ) -> InstId {
        self.emit(InstKind::StoreVectorElement, &[pointer, index, value], &[])
    }

    pub fn access(&mut self, result_type: TypeId, base: ValueId, indices: &[ValueId]) -> ValueId {
        let mut operands = vec![base];
        operands.extend_from_slice(indices);
        self.emit_single(InstKind::Access, &operands, result_type)
    }

    /// Access a single constant member/element index.
    pub fn access_member(&mut self, result_type: TypeId, base: ValueId, index: u32) -> ValueId {
        let index = self.module.const_u32(index);
        self.access(result_type, base, &[index])
    }

    // ========================================================
    // Computation
    // ========================================================

    pub fn binary(
        &mut self,
        op: BinaryOp,
        result_type: TypeId,
        lhs: ValueId,
        rhs: ValueId,
    ) -> ValueId {
        self.emit_single(InstKind::CoreBinary(op), &[lhs, rhs], result_type)
    }

    /// Like [`Builder::binary`] but returns the instruction id, for
    /// callers that need to re-home results.
    pub fn binary_inst(
        &mut self,
        op: BinaryOp,
        result_type: TypeId,
        lhs: ValueId,
        rhs: ValueId,
    ) -> InstId {
        self.emit(InstKind::CoreBinary(op), &[lhs, rhs], &[result_type])
    }

    pub fn unary(&mut self, op: UnaryOp, result_type: TypeId, operand: ValueId) -> ValueId {
        self.emit_single(InstKind::CoreUnary(op), &[operand], result_type)
    }

    pub fn builtin_call(
        &mut self,
        result_type: TypeId,
        builtin: BuiltinFn,
        args: &[ValueId],
    ) -> ValueId {
        self.emit_single(InstKind::CoreBuiltinCall(builtin), args, result_type)
    }

    /// A builtin call with no result (e.g. `textureStore`, `atomicStore`).
    pub fn builtin_call_void(&mut self, builtin: BuiltinFn, args: &[ValueId]) -> InstId {
        self.emit(InstKind::CoreBuiltinCall(builtin), args, &[])
    }

    pub fn user_call(&mut self, result_type: TypeId, callee: FuncId, args: &[ValueId]) -> ValueId {
        self.emit_single(InstKind::UserCall(callee), args, result_type)
    }

    pub fn user_call_inst(&mut self, callee: FuncId, args: &[ValueId]) -> InstId {
        self.emit(InstKind::UserCall(callee), args, &[])
    }

    pub fn construct(&mut self, result_type: TypeId, args: &[ValueId]) -> ValueId {
        self.emit_single(InstKind::Construct, args, result_type)
    }

    pub fn convert(&mut self, result_type: TypeId, value: ValueId) -> ValueId {
        self.emit_single(InstKind::Convert, &[value], result_type)
    }

    // ========================================================
    // Control flow
    // ========================================================

    pub fn if_(
        &mut self,
        condition: ValueId,
        then_block: BlockId,
        else_block: Option<BlockId>,
        result_types: &[TypeId],
    ) -> InstId {
        self.emit(
            InstKind::If {
                then_block,
                else_block,
            },
            &[condition],
            result_types,
        )
    }

    pub fn loop_(
        &mut self,
        initializer: Option<BlockId>,
        body: BlockId,
        continuing: Option<BlockId>,
        result_types: &[TypeId],
    ) -> InstId {
        self.emit(
            InstKind::Loop {
                initializer,
                body,
                continuing,
            },
            &[],
            result_types,
        )
    }

    pub fn switch(
        &mut self,
        condition: ValueId,
        cases: Vec<SwitchCase>,
        result_types: &[TypeId],
    ) -> InstId {
        self.emit(InstKind::Switch { cases }, &[condition], result_types)
    }

    pub fn discard(&mut self) -> InstId {
        self.emit(InstKind::Discard, &[], &[])
    }

    // ========================================================
    // Terminators
    // ========================================================

    pub fn ret(&mut self, value: Option<ValueId>) -> InstId {
        let operands: Vec<ValueId> = value.into_iter().collect();
        self.emit(InstKind::Return, &operands, &[])
    }

    pub fn unreachable_(&mut self) -> InstId {
        self.emit(InstKind::Unreachable, &[], &[])
    }

    pub fn exit_if(&mut self, values: &[ValueId]) -> InstId {
        self.emit(InstKind::ExitIf, values, &[])
    }

    pub fn exit_loop(&mut self, values: &[ValueId]) -> InstId {
        self.emit(InstKind::ExitLoop, values, &[])
    }

    pub fn exit_switch(&mut self, values: &[ValueId]) -> InstId {
        self.emit(InstKind::ExitSwitch, values, &[])
    }

    pub fn next_iteration(&mut self, values: &[ValueId]) -> InstId {
        self.emit(InstKind::NextIteration, values, &[])
    }

    pub fn continue_loop(&mut self, values: &[ValueId]) -> InstId {
        self.emit(InstKind::Continue, values, &[])
    }

    pub fn terminate_invocation(&mut self) -> InstId {
        self.emit(InstKind::TerminateInvocation, &[], &[])
    }
}
