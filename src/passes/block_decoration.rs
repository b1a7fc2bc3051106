//! ============================================================
//!                Block-Decorated Struct Wrapping
//! ============================================================
//! Backends that require an explicit "block" decoration on buffer store
//! types get one here: every host-shareable module-scope var ends up
//! with a block-decorated struct as its store type.
//!
//! A struct whose only use in the module is as one buffer's store type
//! is marked in place. Anything else (scalars, arrays, matrices,
//! structs shared between buffers or with non-buffer consumers such as
//! function signatures, struct members or non-buffer vars) is wrapped
//! in a synthesized single-member `_block` struct, and every use of the
//! old var is routed through a zero-index member access so downstream
//! access chains keep working unchanged. Wrapping in the shared case
//! keeps the decoration from leaking into the type's other uses.

use crate::ir::builder::Builder;
use crate::ir::instructions::{InstId, InstKind};
use crate::ir::module::Module;
use crate::ir::types::{StructMember, TypeId, TypeKind};
use crate::ir::validator::validate_default;
use crate::passes::PassResult;
use rustc_hash::{FxHashMap, FxHashSet};

pub fn run(module: &mut Module) -> PassResult {
    validate_default(module)?;

    // Scan phase: count buffer store types, and collect every other
    // declared consumer of a type. A store type with any consumer
    // outside its one buffer must be wrapped, not marked.
    let mut store_counts: FxHashMap<TypeId, usize> = FxHashMap::default();
    let mut buffers: Vec<InstId> = Vec::new();
    let mut other_uses: FxHashSet<TypeId> = FxHashSet::default();
    for inst in module.root_vars() {
        let Some(result) = module.single_result(inst) else {
            continue;
        };
        let Some((space, store, _)) = module.types.pointer_info(module.value(result).ty) else {
            continue;
        };
        if !space.is_host_shareable() {
            other_uses.insert(store);
            continue;
        }
        *store_counts.entry(store).or_insert(0) += 1;
        buffers.push(inst);
    }
    for function in module.function_ids() {
        other_uses.insert(module.function(function).return_type);
        for &param in &module.function(function).params {
            other_uses.insert(module.value(param).ty);
        }
    }
    for id in module.types.struct_ids() {
        for member in &module.types.struct_decl(id).members {
            other_uses.insert(member.ty);
        }
    }

    for inst in buffers {
        let result = module.single_result(inst).unwrap_or_else(|| {
            panic!("buffer var lost its result mid-pass");
        });
        let (space, store, access) = module
            .types
            .pointer_info(module.value(result).ty)
            .unwrap_or_else(|| panic!("buffer var result is not a pointer"));

        if let TypeKind::Struct(id) = *module.types.kind(store) {
            if module.types.struct_decl(id).block_decorated {
                continue;
            }
            if store_counts[&store] == 1 && !other_uses.contains(&store) {
                module.types.struct_decl_mut(id).block_decorated = true;
                continue;
            }
        }

        wrap_in_block_struct(module, inst, result, space, store, access);
    }

    validate_default(module)
}

fn wrap_in_block_struct(
    module: &mut Module,
    old_inst: InstId,
    old_result: crate::ir::values::ValueId,
    space: crate::ir::types::AddressSpace,
    store: TypeId,
    access: crate::ir::types::AccessMode,
) {
    let base = match module.value(old_result).name {
        Some(name) => format!("{}_block", module.symbols.resolve(name)),
        None => "tint_symbol_block".to_string(),
    };
    let struct_name = module.symbols.unique(&base);
    let member_name = module.symbols.intern("inner");
    let wrapper = module.types.declare_struct(
        struct_name,
        vec![StructMember {
            name: member_name,
            ty: store,
        }],
    );
    let id = module
        .types
        .as_struct(wrapper)
        .unwrap_or_else(|| panic!("declare_struct did not produce a struct type"));
    module.types.struct_decl_mut(id).block_decorated = true;

    let InstKind::Var(decl) = &module.inst(old_inst).kind else {
        panic!("wrapping a non-var instruction");
    };
    let decl = *decl;
    let name = module.value(old_result).name;
    let new_result = {
        let mut builder = Builder::insert_before(module, old_inst);
        builder.var(name, decl.space, decl.access, wrapper, decl.binding, None)
    };

    // Route every existing use through a zero-index member access at
    // the use site, so chained accesses past the var stay intact.
    let inner_ptr = module.types.pointer(space, store, access);
    for usage in module.value(old_result).uses().to_vec() {
        let accessed = {
            let mut builder = Builder::insert_before(module, usage.inst);
            builder.access_member(inner_ptr, new_result, 0)
        };
        module.set_operand(usage.inst, usage.operand_index as usize, accessed);
    }

    module.destroy_instruction(old_inst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::display::print_module;
    use crate::ir::function::ShaderStage;
    use crate::ir::instructions::BindingPoint;
    use crate::ir::types::{AccessMode, AddressSpace};

    /// Scenario: a storage `i32` buffer at `(0, 0)` with one load.
    fn scalar_buffer_module() -> Module {
        let mut module = Module::new();
        let i32_ty = module.types.i32_();
        let root = module.root_block;
        let buffer = {
            let name = module.symbols.intern("counter");
            let mut builder = Builder::append(&mut module, root);
            builder.var(
                Some(name),
                AddressSpace::Storage,
                AccessMode::ReadWrite,
                i32_ty,
                Some(BindingPoint::new(0, 0)),
                None,
            )
        };

        let name = module.symbols.intern("main");
        let void = module.types.void();
        let func = module.new_function(name, void, Some(ShaderStage::Fragment));
        let entry = module.function(func).entry;
        let mut builder = Builder::append(&mut module, entry);
        builder.load(buffer);
        builder.ret(None);
        module
    }

    #[test]
    fn test_scalar_buffer_gets_wrapped() {
        let mut module = scalar_buffer_module();
        run(&mut module).unwrap();

        let vars = module.root_vars();
        assert_eq!(vars.len(), 1);
        let result = module.single_result(vars[0]).unwrap();
        let (_, store, _) = module.types.pointer_info(module.value(result).ty).unwrap();
        let id = module.types.as_struct(store).expect("store must be a struct");
        let decl = module.types.struct_decl(id);
        assert!(decl.block_decorated);
        assert_eq!(module.symbols.resolve(decl.name), "counter_block");
        assert_eq!(decl.members.len(), 1);
        assert_eq!(decl.members[0].ty, module.types.i32_());

        // Each original use now goes through a zero-index access.
        let printed = print_module(&module);
        assert!(printed.contains("access %counter, 0u"));
        assert!(printed.contains("@binding(0, 0)"));
    }

    #[test]
    fn test_sole_use_struct_is_marked_in_place() {
        let mut module = Module::new();
        let member = module.symbols.intern("value");
        let struct_name = module.symbols.intern("Params");
        let f32_ty = module.types.f32_();
        let params = module.types.declare_struct(
            struct_name,
            vec![StructMember {
                name: member,
                ty: f32_ty,
            }],
        );
        let root = module.root_block;
        {
            let name = module.symbols.intern("params");
            let mut builder = Builder::append(&mut module, root);
            builder.var(
                Some(name),
                AddressSpace::Uniform,
                AccessMode::Read,
                params,
                Some(BindingPoint::new(0, 0)),
                None,
            );
        }

        run(&mut module).unwrap();

        let id = module.types.as_struct(params).unwrap();
        assert!(module.types.struct_decl(id).block_decorated);
        // Still a single var, pointing at the original struct.
        let vars = module.root_vars();
        assert_eq!(vars.len(), 1);
        let result = module.single_result(vars[0]).unwrap();
        let (_, store, _) = module.types.pointer_info(module.value(result).ty).unwrap();
        assert_eq!(store, params);
    }

    #[test]
    fn test_struct_shared_with_function_param_is_wrapped() {
        let mut module = Module::new();
        let member = module.symbols.intern("value");
        let struct_name = module.symbols.intern("Params");
        let f32_ty = module.types.f32_();
        let params = module.types.declare_struct(
            struct_name,
            vec![StructMember {
                name: member,
                ty: f32_ty,
            }],
        );
        let root = module.root_block;
        {
            let name = module.symbols.intern("params");
            let mut builder = Builder::append(&mut module, root);
            builder.var(
                Some(name),
                AddressSpace::Uniform,
                AccessMode::Read,
                params,
                Some(BindingPoint::new(0, 0)),
                None,
            );
        }

        // The same struct also travels by value through a function
        // signature; decorating it in place would leak into that use.
        {
            let name = module.symbols.intern("consume");
            let func = module.new_function(name, f32_ty, None);
            let s = module.symbols.intern("s");
            let param = module.add_function_param(func, s, params);
            let entry = module.function(func).entry;
            let mut builder = Builder::append(&mut module, entry);
            let value = builder.access_member(f32_ty, param, 0);
            builder.ret(Some(value));
        }

        run(&mut module).unwrap();

        let id = module.types.as_struct(params).unwrap();
        assert!(!module.types.struct_decl(id).block_decorated);

        // The buffer now stores a decorated wrapper with the original
        // struct as its single member.
        let vars = module.root_vars();
        assert_eq!(vars.len(), 1);
        let result = module.single_result(vars[0]).unwrap();
        let (_, store, _) = module.types.pointer_info(module.value(result).ty).unwrap();
        assert_ne!(store, params);
        let wrapper = module.types.as_struct(store).unwrap();
        assert!(module.types.struct_decl(wrapper).block_decorated);
        assert_eq!(module.types.struct_decl(wrapper).members.len(), 1);
        assert_eq!(module.types.struct_decl(wrapper).members[0].ty, params);
    }

    #[test]
    fn test_pass_is_idempotent() {
        let mut module = scalar_buffer_module();
        run(&mut module).unwrap();
        let first = print_module(&module);
        run(&mut module).unwrap();
        assert_eq!(first, print_module(&module));
    }

    #[test]
    fn test_non_host_shareable_vars_untouched() {
        let mut module = Module::new();
        let i32_ty = module.types.i32_();
        let root = module.root_block;
        {
            let name = module.symbols.intern("scratch");
            let mut builder = Builder::append(&mut module, root);
            builder.var(
                Some(name),
                AddressSpace::Private,
                AccessMode::ReadWrite,
                i32_ty,
                None,
                None,
            );
        }

        let before = print_module(&module);
        run(&mut module).unwrap();
        assert_eq!(before, print_module(&module));
    }
}
