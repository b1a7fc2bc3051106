//! ============================================================
//!                          Module
//! ============================================================
//! The top-level owned IR graph: flat arenas for instructions, values,
//! blocks and functions, a root block holding module-scope variable
//! declarations, the type manager, the symbol table, and the ordinal
//! counter that labels anonymous values in diagnostics.
//!
//! All mutation primitives that touch operand slots go through this
//! type so the per-value usage lists stay consistent with the actual
//! operand slots. A pass that bypasses them and edits operands directly
//! would leave later passes operating on stale use sets.
//!
//! The module is exclusively owned by the single thread running the
//! pass pipeline; nothing here is shared or concurrent.

use crate::ir::function::{Block, BlockId, FuncId, Function, ShaderStage};
use crate::ir::instructions::{InstId, InstKind, Instruction};
use crate::ir::symbols::{Symbol, SymbolTable};
use crate::ir::types::{TypeId, TypeManager};
use crate::ir::values::{ConstId, ConstKind, ConstantPool, Usage, ValueData, ValueId, ValueKind};
use rustc_hash::FxHashMap;

#[derive(Debug)]
pub struct Module {
    pub types: TypeManager,
    pub symbols: SymbolTable,

    pub(crate) constants: ConstantPool,
    pub(crate) functions: Vec<Function>,
    pub(crate) blocks: Vec<Block>,
    pub(crate) insts: Vec<Instruction>,
    pub(crate) values: Vec<ValueData>,

    /// Each interned constant materializes as exactly one value, so all
    /// of its uses share one usage list.
    const_values: FxHashMap<ConstId, ValueId>,

    /// Module-scope variable declarations.
    pub root_block: BlockId,

    next_ordinal: u32,
}

impl Module {
    pub fn new() -> Module {
        let mut module = Module {
            types: TypeManager::new(),
            symbols: SymbolTable::new(),
            constants: ConstantPool::new(),
            functions: Vec::new(),
            blocks: Vec::new(),
            insts: Vec::new(),
            values: Vec::new(),
            const_values: FxHashMap::default(),
            root_block: BlockId(0),
            next_ordinal: 0,
        };
        module.root_block = module.new_block();
        module
    }

    // ========================================================
    // Arena accessors
    // ========================================================

    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id.0 as usize]
    }

    /// Direct kind mutation is legitimate only for edits that do not
    /// touch operand slots (e.g. attaching a synthesized continuing
    /// block to a loop). Operand edits must go through `set_operand`.
    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.insts[id.0 as usize]
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.0 as usize]
    }

    pub(crate) fn value_mut(&mut self, id: ValueId) -> &mut ValueData {
        &mut self.values[id.0 as usize]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }

    /// Functions in insertion order.
    pub fn function_ids(&self) -> Vec<FuncId> {
        (0..self.functions.len() as u32).map(FuncId).collect()
    }

    // ========================================================
    // Construction
    // ========================================================

    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        id
    }

    pub fn new_function(
        &mut self,
        name: Symbol,
        return_type: TypeId,
        stage: Option<ShaderStage>,
    ) -> FuncId {
        let entry = self.new_block();
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(Function {
            name,
            params: Vec::new(),
            return_type,
            stage,
            entry,
        });
        id
    }

    pub fn add_function_param(&mut self, function: FuncId, name: Symbol, ty: TypeId) -> ValueId {
        let index = self.function(function).params.len() as u32;
        let value = self.new_value(
            ValueKind::FunctionParam { function, index },
            ty,
            Some(name),
        );
        self.function_mut(function).params.push(value);
        value
    }

    /// Insert a function parameter at a specific position, shifting the
    /// indices of every later parameter. Used by the multiplanar pass
    /// when a single external-texture parameter expands to three.
    pub fn insert_function_param(
        &mut self,
        function: FuncId,
        position: usize,
        name: Symbol,
        ty: TypeId,
    ) -> ValueId {
        let value = self.new_value(
            ValueKind::FunctionParam {
                function,
                index: position as u32,
            },
            ty,
            Some(name),
        );
        self.function_mut(function).params.insert(position, value);
        self.renumber_function_params(function);
        value
    }

    pub fn remove_function_param(&mut self, function: FuncId, position: usize) -> ValueId {
        let removed = self.function_mut(function).params.remove(position);
        self.renumber_function_params(function);
        removed
    }

    fn renumber_function_params(&mut self, function: FuncId) {
        let params = self.function(function).params.clone();
        for (index, param) in params.into_iter().enumerate() {
            if let ValueKind::FunctionParam { index: slot, .. } = &mut self.value_mut(param).kind {
                *slot = index as u32;
            }
        }
    }

    pub fn add_block_param(&mut self, block: BlockId, name: Option<Symbol>, ty: TypeId) -> ValueId {
        let index = self.block(block).params.len() as u32;
        let value = self.new_value(ValueKind::BlockParam { block, index }, ty, name);
        self.block_mut(block).params.push(value);
        value
    }

    pub fn new_value(&mut self, kind: ValueKind, ty: TypeId, name: Option<Symbol>) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData {
            kind,
            ty,
            name,
            ordinal: self.next_ordinal,
            uses: Vec::new(),
        });
        self.next_ordinal += 1;
        id
    }

    pub(crate) fn push_inst(&mut self, inst: Instruction) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(inst);
        id
    }

    // ========================================================
    // Constants
    // ========================================================

    pub fn const_of(&mut self, kind: ConstKind) -> ConstId {
        self.constants.intern(kind)
    }

    pub fn const_kind(&self, id: ConstId) -> &ConstKind {
        self.constants.kind(id)
    }

    /// The interned value for a constant, creating it on first use.
    pub fn constant_value(&mut self, kind: ConstKind) -> ValueId {
        let id = self.constants.intern(kind);
        if let Some(&existing) = self.const_values.get(&id) {
            return existing;
        }

        let ty = self.const_ty(id);
        let value = self.new_value(ValueKind::Constant(id), ty, None);
        self.const_values.insert(id, value);
        value
    }

    pub fn const_ty(&self, id: ConstId) -> TypeId {
        match self.constants.kind(id) {
            ConstKind::Bool(_) => self.types.bool_(),
            ConstKind::I32(_) => self.types.i32_(),
            ConstKind::U32(_) => self.types.u32_(),
            ConstKind::F32(_) => self.types.f32_(),
            ConstKind::Splat { ty, .. } => *ty,
            ConstKind::Composite { ty, .. } => *ty,
            ConstKind::Undef(ty) => *ty,
        }
    }

    pub fn const_bool(&mut self, v: bool) -> ValueId {
        self.constant_value(ConstKind::Bool(v))
    }

    pub fn const_i32(&mut self, v: i32) -> ValueId {
        self.constant_value(ConstKind::I32(v))
    }

    pub fn const_u32(&mut self, v: u32) -> ValueId {
        self.constant_value(ConstKind::U32(v))
    }

    pub fn const_f32(&mut self, v: f32) -> ValueId {
        self.constant_value(ConstKind::F32(v.to_bits()))
    }

    pub fn const_splat(&mut self, ty: TypeId, element: ConstKind) -> ValueId {
        let value = self.constants.intern(element);
        self.constant_value(ConstKind::Splat { ty, value })
    }

    pub fn const_composite(&mut self, ty: TypeId, elements: Vec<ConstKind>) -> ValueId {
        let elements = elements
            .into_iter()
            .map(|kind| self.constants.intern(kind))
            .collect();
        self.constant_value(ConstKind::Composite { ty, elements })
    }

    pub fn const_undef(&mut self, ty: TypeId) -> ValueId {
        self.constant_value(ConstKind::Undef(ty))
    }

    /// The constant kind behind a value, if the value is a constant.
    pub fn as_const(&self, value: ValueId) -> Option<&ConstKind> {
        match self.value(value).kind {
            ValueKind::Constant(id) => Some(self.constants.kind(id)),
            _ => None,
        }
    }

    // ========================================================
    // Use bookkeeping and operand mutation
    // ========================================================

    pub(crate) fn record_use(&mut self, value: ValueId, usage: Usage) {
        self.value_mut(value).uses.push(usage);
    }

    pub(crate) fn remove_use(&mut self, value: ValueId, usage: Usage) {
        let uses = &mut self.value_mut(value).uses;
        if let Some(position) = uses.iter().position(|&u| u == usage) {
            uses.swap_remove(position);
        } else {
            panic!("removing a use that was never recorded: {usage:?}");
        }
    }

    /// Redirect one operand slot, keeping both usage lists consistent.
    pub fn set_operand(&mut self, inst: InstId, operand_index: usize, new_value: ValueId) {
        let old_value = self.inst(inst).operands[operand_index];
        if old_value == new_value {
            return;
        }

        let usage = Usage {
            inst,
            operand_index: operand_index as u32,
        };
        self.remove_use(old_value, usage);
        self.inst_mut(inst).operands[operand_index] = new_value;
        self.record_use(new_value, usage);
    }

    pub fn push_operand(&mut self, inst: InstId, value: ValueId) {
        let operand_index = self.inst(inst).operands.len() as u32;
        self.inst_mut(inst).operands.push(value);
        self.record_use(
            value,
            Usage {
                inst,
                operand_index,
            },
        );
    }

    /// Insert an operand at a specific slot, shifting every later slot
    /// (and its recorded usage index) up by one. The multiplanar pass
    /// uses this to expand one call argument into three in place.
    pub fn insert_operand(&mut self, inst: InstId, operand_index: usize, value: ValueId) {
        let shifted: Vec<(usize, ValueId)> = self
            .inst(inst)
            .operands
            .iter()
            .copied()
            .enumerate()
            .skip(operand_index)
            .collect();
        // Highest slot first, so a value occupying two adjacent slots
        // never has the same usage bumped twice.
        for (index, operand) in shifted.into_iter().rev() {
            let uses = &mut self.value_mut(operand).uses;
            let recorded = uses
                .iter_mut()
                .find(|usage| usage.inst == inst && usage.operand_index == index as u32)
                .unwrap_or_else(|| panic!("operand slot {index} has no recorded usage"));
            recorded.operand_index += 1;
        }

        self.inst_mut(inst).operands.insert(operand_index, value);
        self.record_use(
            value,
            Usage {
                inst,
                operand_index: operand_index as u32,
            },
        );
    }

    /// Atomically redirect every recorded usage of `old` to `new` and
    /// clear `old`'s usage set.
    pub fn replace_all_uses_with(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }

        let usages = std::mem::take(&mut self.value_mut(old).uses);
        for usage in usages {
            self.inst_mut(usage.inst).operands[usage.operand_index as usize] = new;
            self.record_use(new, usage);
        }
    }

    /// Remove an instruction's single result without destroying the
    /// instruction, so the result's identity (and every existing use)
    /// can be re-attached to a replacement instruction.
    pub fn detach_result(&mut self, inst: InstId) -> Option<ValueId> {
        let result = self.inst(inst).results.first().copied()?;
        self.inst_mut(inst).results.clear();
        Some(result)
    }

    /// Attach a previously detached result to a new defining instruction.
    pub fn attach_result(&mut self, inst: InstId, result: ValueId) {
        let index = self.inst(inst).results.len() as u32;
        self.value_mut(result).kind = ValueKind::InstResult { inst, index };
        self.inst_mut(inst).results.push(result);
    }

    pub fn single_result(&self, inst: InstId) -> Option<ValueId> {
        match self.inst(inst).results.as_slice() {
            [result] => Some(*result),
            _ => None,
        }
    }

    // ========================================================
    // Block membership
    // ========================================================

    pub(crate) fn insert_into_block(&mut self, block: BlockId, position: usize, inst: InstId) {
        debug_assert!(self.inst(inst).block.is_none());
        self.block_mut(block).insts.insert(position, inst);
        self.inst_mut(inst).block = Some(block);
    }

    /// Detach an instruction from its block without destroying it.
    pub fn remove_from_block(&mut self, inst: InstId) {
        let Some(block) = self.inst(inst).block else {
            return;
        };
        let position = self
            .block(block)
            .position_of(inst)
            .expect("instruction's block back-pointer is stale");
        self.block_mut(block).insts.remove(position);
        self.inst_mut(inst).block = None;
    }

    /// Move an instruction to the end of another block. The demote pass
    /// uses this to hoist guarded stores into synthesized `if` arms.
    pub fn move_to_block_end(&mut self, inst: InstId, block: BlockId) {
        self.remove_from_block(inst);
        let position = self.block(block).len();
        self.insert_into_block(block, position, inst);
    }

    /// Destroy an instruction. Its results must have no remaining uses;
    /// violating that is a bug in the calling pass, not a user-facing
    /// failure, so this panics.
    pub fn destroy_instruction(&mut self, inst: InstId) {
        for &result in &self.insts[inst.0 as usize].results {
            assert!(
                self.values[result.0 as usize].uses.is_empty(),
                "destroying an instruction whose result still has uses"
            );
        }

        let operands: Vec<ValueId> = self.inst(inst).operands.clone();
        for (operand_index, operand) in operands.into_iter().enumerate() {
            self.remove_use(
                operand,
                Usage {
                    inst,
                    operand_index: operand_index as u32,
                },
            );
        }

        self.remove_from_block(inst);
        let data = self.inst_mut(inst);
        data.kind = InstKind::Nop;
        data.operands.clear();
        data.results.clear();
    }

    // ========================================================
    // Walking
    // ========================================================

    /// All blocks reachable from `root`, recursing through control
    /// instructions, in deterministic pre-order.
    pub fn collect_blocks(&self, root: BlockId) -> Vec<BlockId> {
        let mut out = vec![root];
        let mut next = 0;
        while next < out.len() {
            let block = out[next];
            next += 1;
            for &inst in self.block(block).insts() {
                out.extend(self.inst(inst).kind.child_blocks());
            }
        }
        out
    }

    /// All instructions under `root` matching a predicate, in
    /// deterministic order. Scan phase of scan-then-rewrite passes.
    pub fn collect_insts(
        &self,
        root: BlockId,
        mut predicate: impl FnMut(&Module, InstId) -> bool,
    ) -> Vec<InstId> {
        let mut out = Vec::new();
        for block in self.collect_blocks(root) {
            for &inst in self.block(block).insts() {
                if predicate(self, inst) {
                    out.push(inst);
                }
            }
        }
        out
    }

    /// Module-scope variable declarations, in declaration order.
    pub fn root_vars(&self) -> Vec<InstId> {
        self.block(self.root_block)
            .insts()
            .iter()
            .copied()
            .filter(|&inst| matches!(self.inst(inst).kind, InstKind::Var(_)))
            .collect()
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::instructions::BinaryOp;

    #[test]
    fn test_replace_all_uses_with_redirects_every_slot() {
        let mut module = Module::new();
        let name = module.symbols.intern("f");
        let i32_ty = module.types.i32_();
        let func = module.new_function(name, i32_ty, None);
        let param = {
            let p = module.symbols.intern("p");
            module.add_function_param(func, p, i32_ty)
        };

        let entry = module.function(func).entry;
        {
            let mut builder = Builder::append(&mut module, entry);
            let sum = builder.binary(BinaryOp::Add, i32_ty, param, param);
            builder.ret(Some(sum));
        }

        assert_eq!(module.value(param).uses().len(), 2);

        let one = module.const_i32(1);
        module.replace_all_uses_with(param, one);
        assert!(module.value(param).uses().is_empty());
        assert_eq!(module.value(one).uses().len(), 2);
    }

    #[test]
    fn test_detach_and_reattach_preserves_result_identity() {
        let mut module = Module::new();
        let name = module.symbols.intern("f");
        let i32_ty = module.types.i32_();
        let func = module.new_function(name, i32_ty, None);
        let entry = module.function(func).entry;

        let (add_inst, sum) = {
            let mut builder = Builder::append(&mut module, entry);
            let one = builder.module.const_i32(1);
            let two = builder.module.const_i32(2);
            let sum = builder.binary(BinaryOp::Add, i32_ty, one, two);
            builder.ret(Some(sum));
            (builder.module.value(sum).kind, sum)
        };

        let ValueKind::InstResult { inst, .. } = add_inst else {
            panic!("expected an instruction result");
        };

        let detached = module.detach_result(inst).unwrap();
        assert_eq!(detached, sum);

        // Re-home the result on a fresh instruction; the return's
        // operand slot needs no rewriting.
        let replacement = {
            let mut builder = Builder::insert_before(&mut module, inst);
            let three = builder.module.const_i32(3);
            let four = builder.module.const_i32(4);
            builder.binary_inst(BinaryOp::Multiply, i32_ty, three, four)
        };
        let fresh = module.detach_result(replacement).unwrap();
        assert!(module.value(fresh).uses().is_empty());
        module.attach_result(replacement, detached);
        module.destroy_instruction(inst);

        assert_eq!(module.value(sum).uses().len(), 1);
        let ValueKind::InstResult { inst: new_home, .. } = module.value(sum).kind else {
            panic!("result lost its defining instruction");
        };
        assert_eq!(new_home, replacement);
    }

    #[test]
    #[should_panic(expected = "result still has uses")]
    fn test_destroy_with_live_uses_panics() {
        let mut module = Module::new();
        let name = module.symbols.intern("f");
        let i32_ty = module.types.i32_();
        let func = module.new_function(name, i32_ty, None);
        let entry = module.function(func).entry;

        let sum = {
            let mut builder = Builder::append(&mut module, entry);
            let one = builder.module.const_i32(1);
            let two = builder.module.const_i32(2);
            let sum = builder.binary(BinaryOp::Add, i32_ty, one, two);
            builder.ret(Some(sum));
            sum
        };

        let ValueKind::InstResult { inst, .. } = module.value(sum).kind else {
            panic!("expected an instruction result");
        };
        module.destroy_instruction(inst);
    }
}
