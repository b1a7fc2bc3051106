//! ============================================================
//!                         Validator
//! ============================================================
//! Structural and semantic well-formedness checks over a whole module.
//! Passes run the validator before and after transforming (in debug
//! pipelines) to catch graph corruption at the pass boundary instead of
//! in a backend.
//!
//! Some passes deliberately produce shapes that are invalid by default,
//! so the rules they break are gated behind [`Capability`] entries the
//! caller opts into.

use crate::ir::function::{BlockId, FuncId};
use crate::ir::instructions::{BindingPoint, InstId, InstKind};
use crate::ir::module::Module;
use crate::ir::types::{TypeId, TypeKind};
use crate::ir::values::{ConstKind, ValueId, ValueKind};
use crate::errors::TransformError;
use crate::return_validation_error;
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Permit two module-scope resources to share a `(group, binding)`
    /// pair. Required while running the binding remapper, which may
    /// route through colliding intermediate states.
    AllowDuplicateBindings,
    /// Permit an access chain to produce a pointer to a single vector
    /// element, an address no portable backend can form.
    AllowVectorElementPointer,
}

pub type Capabilities = FxHashSet<Capability>;

/// Validate a whole module under the default (empty) capability set.
pub fn validate_default(module: &Module) -> Result<(), TransformError> {
    validate(module, &Capabilities::default())
}

pub fn validate(module: &Module, capabilities: &Capabilities) -> Result<(), TransformError> {
    let mut validator = Validator {
        module,
        capabilities,
        scopes: Vec::new(),
        control_stack: Vec::new(),
        current_function: None,
    };
    validator.run()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlKind {
    If,
    Loop,
    Switch,
}

struct Validator<'m> {
    module: &'m Module,
    capabilities: &'m Capabilities,
    /// One entry per open lexical scope. A value is in scope when any
    /// entry contains it, which is exactly structural dominance.
    scopes: Vec<FxHashSet<ValueId>>,
    control_stack: Vec<ControlKind>,
    current_function: Option<FuncId>,
}

impl<'m> Validator<'m> {
    fn run(&mut self) -> Result<(), TransformError> {
        self.check_root_block()?;

        for function in self.module.function_ids() {
            self.current_function = Some(function);
            let data = self.module.function(function);

            let mut scope = FxHashSet::default();
            scope.extend(data.params.iter().copied());
            self.scopes.push(scope);

            self.check_block(data.entry, true)?;

            self.scopes.truncate(1);
        }
        Ok(())
    }

    // ========================================================
    // Module scope
    // ========================================================

    fn check_root_block(&mut self) -> Result<(), TransformError> {
        let mut root_scope = FxHashSet::default();
        let mut seen_bindings: FxHashMap<BindingPoint, usize> = FxHashMap::default();

        for &inst in self.module.block(self.module.root_block).insts() {
            let data = self.module.inst(inst);
            let InstKind::Var(decl) = &data.kind else {
                return_validation_error!(
                    "module scope may only contain var declarations, found {:?}",
                    data.kind
                );
            };

            if let Some(point) = decl.binding {
                let count = seen_bindings.entry(point).or_insert(0);
                *count += 1;
                if *count > 1 && !self.capabilities.contains(&Capability::AllowDuplicateBindings) {
                    return_validation_error!(
                        "duplicate resource binding @group({}) @binding({})",
                        point.group,
                        point.binding
                    );
                }
            }

            for &result in &data.results {
                root_scope.insert(result);
            }
        }

        self.scopes.push(root_scope);
        Ok(())
    }

    // ========================================================
    // Blocks and instructions
    // ========================================================

    /// Validate a block's contents. When `require_terminator` the block
    /// must end in exactly one terminator in final position. Pushes a
    /// scope for the block and pops it before returning.
    fn check_block(&mut self, block: BlockId, require_terminator: bool) -> Result<(), TransformError> {
        let depth = self.scopes.len();
        self.enter_block(block, require_terminator)?;
        self.scopes.truncate(depth);
        Ok(())
    }

    /// Like [`Validator::check_block`] but leaves the block's scope on
    /// the stack, so a loop's continuing block can see body definitions.
    fn enter_block(&mut self, block: BlockId, require_terminator: bool) -> Result<(), TransformError> {
        let mut scope = FxHashSet::default();
        scope.extend(self.module.block(block).params.iter().copied());
        self.scopes.push(scope);

        let insts: Vec<InstId> = self.module.block(block).insts().to_vec();
        if require_terminator && insts.is_empty() {
            return_validation_error!("block has no terminator");
        }

        for (position, inst) in insts.iter().copied().enumerate() {
            let data = self.module.inst(inst);
            let is_last = position + 1 == insts.len();

            if matches!(data.kind, InstKind::Nop) {
                return_validation_error!("destroyed instruction still present in a block");
            }
            if data.block != Some(block) {
                return_validation_error!("instruction block back-pointer is stale");
            }
            if data.kind.is_terminator() && !is_last {
                return_validation_error!("terminator is not the last instruction in its block");
            }
            if require_terminator && is_last && !data.kind.is_terminator() {
                return_validation_error!("block does not end in a terminator");
            }

            for (operand_index, &operand) in data.operands.iter().enumerate() {
                self.check_operand(inst, operand_index, operand)?;
            }

            self.check_inst(inst)?;

            for &result in &self.module.inst(inst).results {
                if let Some(top) = self.scopes.last_mut() {
                    top.insert(result);
                }
            }
        }
        Ok(())
    }

    fn check_operand(
        &self,
        inst: InstId,
        operand_index: usize,
        operand: ValueId,
    ) -> Result<(), TransformError> {
        let data = self.module.value(operand);

        // Constants are in scope everywhere.
        if matches!(data.kind, ValueKind::Constant(_)) {
            // Fall through to the usage-list check below.
        } else if !self.scopes.iter().any(|scope| scope.contains(&operand)) {
            return_validation_error!(
                "operand %{} of {:?} does not dominate its use",
                data.ordinal,
                self.module.inst(inst).kind
            );
        }

        let usage_recorded = data.uses().iter().any(|usage| {
            usage.inst == inst && usage.operand_index == operand_index as u32
        });
        if !usage_recorded {
            return_validation_error!(
                "operand slot {} of an instruction is missing from %{}'s usage list",
                operand_index,
                data.ordinal
            );
        }
        Ok(())
    }

    fn check_inst(&mut self, inst: InstId) -> Result<(), TransformError> {
        let data = self.module.inst(inst);
        match &data.kind {
            InstKind::Load => {
                let (_, store, _) = self.pointer_operand(inst, 0, "load")?;
                if self.result_type(inst) != Some(store) {
                    return_validation_error!("load result type does not match the store type");
                }
            }
            InstKind::Store => {
                let (_, store, _) = self.pointer_operand(inst, 0, "store")?;
                let value = self.module.inst(inst).operands[1];
                if self.module.value(value).ty != store {
                    return_validation_error!("store value type does not match the store type");
                }
            }
            InstKind::LoadVectorElement | InstKind::StoreVectorElement => {
                let (_, store, _) = self.pointer_operand(inst, 0, "vector element access")?;
                if !matches!(self.module.types.kind(store), TypeKind::Vector { .. }) {
                    return_validation_error!("vector element access into a non-vector store type");
                }
            }
            InstKind::Access => self.check_access(inst)?,
            InstKind::If {
                then_block,
                else_block,
            } => {
                let (then_block, else_block) = (*then_block, *else_block);
                let condition = data.operands[0];
                if self.module.value(condition).ty != self.module.types.bool_() {
                    return_validation_error!("if condition is not bool");
                }
                self.control_stack.push(ControlKind::If);
                self.check_block(then_block, true)?;
                if let Some(else_block) = else_block {
                    self.check_block(else_block, true)?;
                }
                self.control_stack.pop();
            }
            InstKind::Loop {
                initializer,
                body,
                continuing,
            } => {
                let (initializer, body, continuing) = (*initializer, *body, *continuing);
                self.control_stack.push(ControlKind::Loop);
                let depth = self.scopes.len();
                if let Some(initializer) = initializer {
                    self.enter_block(initializer, true)?;
                }
                // The continuing block sees everything the body defines.
                self.enter_block(body, true)?;
                if let Some(continuing) = continuing {
                    self.check_block(continuing, true)?;
                }
                self.scopes.truncate(depth);
                self.control_stack.pop();
            }
            InstKind::Switch { cases } => {
                let blocks: Vec<BlockId> = cases.iter().map(|case| case.block).collect();
                let default_count = cases.iter().filter(|case| case.is_default).count();
                if default_count != 1 {
                    return_validation_error!("switch must have exactly one default case");
                }
                self.control_stack.push(ControlKind::Switch);
                for block in blocks {
                    self.check_block(block, true)?;
                }
                self.control_stack.pop();
            }
            InstKind::ExitIf => self.require_control(ControlKind::If, "exit_if")?,
            InstKind::ExitLoop => self.require_control(ControlKind::Loop, "exit_loop")?,
            InstKind::ExitSwitch => self.require_control(ControlKind::Switch, "exit_switch")?,
            InstKind::NextIteration => self.require_control(ControlKind::Loop, "next_iteration")?,
            InstKind::Continue => self.require_control(ControlKind::Loop, "continue")?,
            InstKind::Return => {
                let function = self
                    .current_function
                    .map(|id| self.module.function(id));
                let Some(function) = function else {
                    return_validation_error!("return outside of a function");
                };
                let returned = data.operands.first().map(|&value| self.module.value(value).ty);
                let expected = (function.return_type != self.module.types.void())
                    .then_some(function.return_type);
                if returned != expected {
                    return_validation_error!(
                        "return value does not match the function's return type"
                    );
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn require_control(&self, kind: ControlKind, name: &str) -> Result<(), TransformError> {
        if self.control_stack.contains(&kind) {
            return Ok(());
        }
        return_validation_error!("{name} used outside of a matching control instruction")
    }

    fn result_type(&self, inst: InstId) -> Option<TypeId> {
        self.module
            .single_result(inst)
            .map(|result| self.module.value(result).ty)
    }

    fn pointer_operand(
        &self,
        inst: InstId,
        operand_index: usize,
        what: &str,
    ) -> Result<(crate::ir::types::AddressSpace, TypeId, crate::ir::types::AccessMode), TransformError>
    {
        let operand = self.module.inst(inst).operands[operand_index];
        let ty = self.module.value(operand).ty;
        match self.module.types.pointer_info(ty) {
            Some(info) => Ok(info),
            None => return_validation_error!("{what} requires a pointer operand"),
        }
    }

    /// Walk an access chain's index steps and check the declared result
    /// type against the walked type, preserving pointer-ness.
    fn check_access(&self, inst: InstId) -> Result<(), TransformError> {
        let data = self.module.inst(inst);
        let base = data.operands[0];
        let base_ty = self.module.value(base).ty;

        let pointer = self.module.types.pointer_info(base_ty);
        let mut current = match pointer {
            Some((_, store, _)) => store,
            None => base_ty,
        };

        for &index in &data.operands[1..] {
            current = match *self.module.types.kind(current) {
                TypeKind::Struct(id) => {
                    let member = self.constant_index(index).ok_or_else(|| {
                        TransformError::validation(
                            "struct member access requires a constant index".to_string(),
                        )
                    })?;
                    let decl = self.module.types.struct_decl(id);
                    match decl.members.get(member as usize) {
                        Some(member) => member.ty,
                        None => return_validation_error!(
                            "struct member index {member} is out of bounds"
                        ),
                    }
                }
                TypeKind::Array { element, .. } => element,
                TypeKind::Matrix { element, rows, .. } => {
                    match self.module.types.find(&TypeKind::Vector {
                        element,
                        width: rows,
                    }) {
                        Some(column) => column,
                        None => return_validation_error!(
                            "matrix column type is not declared in this module"
                        ),
                    }
                }
                TypeKind::Vector { element, .. } => {
                    if pointer.is_some()
                        && !self
                            .capabilities
                            .contains(&Capability::AllowVectorElementPointer)
                    {
                        return_validation_error!(
                            "access chain forms a pointer to a vector element"
                        );
                    }
                    element
                }
                _ => return_validation_error!(
                    "access chain indexes into a non-composite type {}",
                    self.module.types.name_of(current, &self.module.symbols)
                ),
            };
        }

        let expected = match pointer {
            Some((space, _, access)) => {
                match self.module.types.find(&TypeKind::Pointer {
                    space,
                    store: current,
                    access,
                }) {
                    Some(ty) => ty,
                    // The result type itself proves the pointer type was
                    // interned, so a miss here is a genuine mismatch.
                    None => return_validation_error!(
                        "access result pointer type is not declared in this module"
                    ),
                }
            }
            None => current,
        };
        if self.result_type(inst) != Some(expected) {
            return_validation_error!(
                "access result type does not match the walked chain type {}",
                self.module.types.name_of(expected, &self.module.symbols)
            );
        }
        Ok(())
    }

    fn constant_index(&self, value: ValueId) -> Option<u32> {
        match self.module.as_const(value)? {
            ConstKind::U32(index) => Some(*index),
            ConstKind::I32(index) if *index >= 0 => Some(*index as u32),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::Builder;
    use crate::ir::types::{AccessMode, AddressSpace};

    fn fragment_with_empty_body(module: &mut Module) -> FuncId {
        let name = module.symbols.intern("main");
        let void = module.types.void();
        let func = module.new_function(name, void, Some(crate::ir::function::ShaderStage::Fragment));
        func
    }

    #[test]
    fn test_valid_minimal_module_passes() {
        let mut module = Module::new();
        let func = fragment_with_empty_body(&mut module);
        let entry = module.function(func).entry;
        Builder::append(&mut module, entry).ret(None);

        assert!(validate_default(&module).is_ok());
    }

    #[test]
    fn test_missing_terminator_is_rejected() {
        let mut module = Module::new();
        let _ = fragment_with_empty_body(&mut module);

        let error = validate_default(&module).unwrap_err();
        assert!(error.to_string().contains("terminator"));
    }

    #[test]
    fn test_duplicate_bindings_gated_by_capability() {
        let mut module = Module::new();
        let i32_ty = module.types.i32_();
        let root = module.root_block;
        {
            let mut builder = Builder::append(&mut module, root);
            let point = Some(BindingPoint::new(0, 0));
            builder.var(
                None,
                AddressSpace::Storage,
                AccessMode::ReadWrite,
                i32_ty,
                point,
                None,
            );
            builder.var(
                None,
                AddressSpace::Storage,
                AccessMode::ReadWrite,
                i32_ty,
                point,
                None,
            );
        }

        assert!(validate_default(&module).is_err());

        let mut capabilities = Capabilities::default();
        capabilities.insert(Capability::AllowDuplicateBindings);
        assert!(validate(&module, &capabilities).is_ok());
    }

    #[test]
    fn test_vector_element_pointer_gated_by_capability() {
        let mut module = Module::new();
        let f32_ty = module.types.f32_();
        let v4f = module.types.vector(f32_ty, 4);
        let root = module.root_block;
        let func = fragment_with_empty_body(&mut module);
        let entry = module.function(func).entry;

        {
            let mut builder = Builder::append(&mut module, root);
            let vec_ptr = builder.var(
                None,
                AddressSpace::Private,
                AccessMode::ReadWrite,
                v4f,
                None,
                None,
            );
            let elem_ptr = builder
                .module
                .types
                .pointer(AddressSpace::Private, f32_ty, AccessMode::ReadWrite);

            let mut body = Builder::append(builder.module, entry);
            body.access_member(elem_ptr, vec_ptr, 0);
            body.ret(None);
        }

        assert!(validate_default(&module).is_err());

        let mut capabilities = Capabilities::default();
        capabilities.insert(Capability::AllowVectorElementPointer);
        assert!(validate(&module, &capabilities).is_ok());
    }

    #[test]
    fn test_use_before_definition_is_rejected() {
        let mut module = Module::new();
        let name = module.symbols.intern("f");
        let i32_ty = module.types.i32_();
        let func = module.new_function(name, i32_ty, None);
        let entry = module.function(func).entry;

        let (early, late) = {
            let mut builder = Builder::append(&mut module, entry);
            let one = builder.module.const_i32(1);
            let two = builder.module.const_i32(2);
            let late = builder.binary(crate::ir::instructions::BinaryOp::Add, i32_ty, one, two);
            let early = builder.binary(crate::ir::instructions::BinaryOp::Add, i32_ty, late, late);
            builder.ret(Some(early));
            (early, late)
        };

        // Swap the two instructions so `early` reads `late` before it
        // is defined.
        let ValueKind::InstResult { inst: early_inst, .. } = module.value(early).kind else {
            panic!("expected an instruction result");
        };
        let ValueKind::InstResult { inst: late_inst, .. } = module.value(late).kind else {
            panic!("expected an instruction result");
        };
        module.remove_from_block(early_inst);
        let position = module.block(entry).position_of(late_inst).unwrap();
        module.insert_into_block(entry, position, early_inst);

        let error = validate_default(&module).unwrap_err();
        assert!(error.to_string().contains("dominate"));
    }
}
