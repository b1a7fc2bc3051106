//! ============================================================
//!               Demote Discard To Helper Invocation
//! ============================================================
//! Backends that terminate an invocation outright on `discard` corrupt
//! derivative (`dpdx`/`dpdy`) results for the neighboring invocations
//! in the same quad. This pass emulates "demote to helper invocation"
//! semantics instead:
//!
//! - one module-scope private `continue_execution` flag, initialized
//!   `true`;
//! - every `Discard` becomes a store of `false` to the flag;
//! - every storage-space store (whole or single vector lane) and
//!   side-effecting builtin in a
//!   (transitively) discarding function is wrapped in
//!   `if (load continue_execution)`, threading any result through the
//!   `if` via `exit_if` with `undef` on the else arm;
//! - every `Return` in a discarding fragment entry point is preceded by
//!   `if (!continue_execution) { terminate_invocation }`, so the
//!   invocation dies only after its quad neighbors are done with it.
//!
//! A function shared between discarding and non-discarding entry points
//! is rewritten once, globally; the flag defaults `true`, so paths that
//! never discard behave identically apart from the branch cost.

use crate::ir::builder::Builder;
use crate::ir::function::{FuncId, ShaderStage};
use crate::ir::instructions::{InstId, InstKind, UnaryOp};
use crate::ir::module::Module;
use crate::ir::types::{AccessMode, AddressSpace};
use crate::ir::validator::validate_default;
use crate::ir::values::{ValueId, ValueKind};
use crate::passes::PassResult;
use rustc_hash::FxHashMap;

pub fn run(module: &mut Module) -> PassResult {
    validate_default(module)?;

    let mut discards = DiscardMemo::default();
    let targets: Vec<FuncId> = module
        .function_ids()
        .into_iter()
        .filter(|&function| discards.transitively_discards(module, function))
        .collect();
    if targets.is_empty() {
        return Ok(());
    }

    let flag = {
        let name = module.symbols.unique("continue_execution");
        let bool_ty = module.types.bool_();
        let init = module.const_bool(true);
        let root = module.root_block;
        let mut builder = Builder::append(module, root);
        builder.var(
            Some(name),
            AddressSpace::Private,
            AccessMode::ReadWrite,
            bool_ty,
            None,
            Some(init),
        )
    };

    for function in targets {
        rewrite_function(module, function, flag);
    }
    Ok(())
}

/// Memoized "does this function transitively contain a discard" query:
/// a reachability fixpoint over the call graph, with an in-progress
/// marker as the cycle guard.
#[derive(Default)]
struct DiscardMemo {
    known: FxHashMap<FuncId, bool>,
    in_progress: Vec<FuncId>,
}

impl DiscardMemo {
    fn transitively_discards(&mut self, module: &Module, function: FuncId) -> bool {
        if let Some(&known) = self.known.get(&function) {
            return known;
        }
        if self.in_progress.contains(&function) {
            // A cycle cannot introduce a discard on its own.
            return false;
        }

        self.in_progress.push(function);
        let entry = module.function(function).entry;
        let mut found = false;
        for block in module.collect_blocks(entry) {
            for &inst in module.block(block).insts() {
                match &module.inst(inst).kind {
                    InstKind::Discard => found = true,
                    InstKind::UserCall(callee) => {
                        if self.transitively_discards(module, *callee) {
                            found = true;
                        }
                    }
                    _ => {}
                }
                if found {
                    break;
                }
            }
            if found {
                break;
            }
        }
        self.in_progress.pop();
        self.known.insert(function, found);
        found
    }
}

fn rewrite_function(module: &mut Module, function: FuncId, flag: ValueId) {
    let is_fragment = module.function(function).stage == Some(ShaderStage::Fragment);
    let entry = module.function(function).entry;

    // Scan once; block surgery below never invalidates collected ids.
    let mut discard_insts = Vec::new();
    let mut guarded_insts = Vec::new();
    let mut returns = Vec::new();
    for inst in module.collect_insts(entry, |_, _| true) {
        match &module.inst(inst).kind {
            InstKind::Discard => discard_insts.push(inst),
            InstKind::Store | InstKind::StoreVectorElement => {
                let pointer = module.inst(inst).operands[0];
                let space = module
                    .types
                    .pointer_info(module.value(pointer).ty)
                    .map(|(space, _, _)| space);
                if space == Some(AddressSpace::Storage) {
                    guarded_insts.push(inst);
                }
            }
            InstKind::CoreBuiltinCall(builtin) if builtin.has_side_effects() => {
                guarded_insts.push(inst);
            }
            InstKind::Return if is_fragment => returns.push(inst),
            _ => {}
        }
    }

    for inst in discard_insts {
        {
            let mut builder = Builder::insert_before(module, inst);
            let falsehood = builder.module.const_bool(false);
            builder.store(flag, falsehood);
        }
        module.destroy_instruction(inst);
    }

    for inst in guarded_insts {
        guard_behind_flag(module, inst, flag);
    }

    for inst in returns {
        let mut builder = Builder::insert_before(module, inst);
        let bool_ty = builder.module.types.bool_();
        let loaded = builder.load(flag);
        let discarded = builder.unary(UnaryOp::Not, bool_ty, loaded);
        let terminate_block = builder.module.new_block();
        builder.if_(discarded, terminate_block, None, &[]);
        Builder::append(module, terminate_block).terminate_invocation();
    }
}

/// Move one side-effecting instruction into the true arm of a fresh
/// `if (load continue_execution)`. When the instruction has a result,
/// the result's identity migrates to the `if` and the value is threaded
/// out through `exit_if`, with `undef` on the suppressed arm.
fn guard_behind_flag(module: &mut Module, inst: InstId, flag: ValueId) {
    let forwarded = module.single_result(inst);

    let (if_inst, then_block) = {
        let mut builder = Builder::insert_before(module, inst);
        let cond = builder.load(flag);
        let then_block = builder.module.new_block();
        let else_block = forwarded.map(|_| builder.module.new_block());
        let if_inst = builder.if_(cond, then_block, else_block, &[]);
        (if_inst, then_block)
    };

    module.move_to_block_end(inst, then_block);

    match forwarded {
        None => {
            Builder::append(module, then_block).exit_if(&[]);
        }
        Some(result) => {
            let ty = module.value(result).ty;
            let detached = module
                .detach_result(inst)
                .unwrap_or_else(|| panic!("guarded instruction lost its result"));
            debug_assert_eq!(detached, result);
            module.attach_result(if_inst, detached);

            // Fresh result for the moved instruction, forwarded out.
            let fresh = module.new_value(
                ValueKind::InstResult {
                    inst,
                    index: 0,
                },
                ty,
                None,
            );
            module.attach_result(inst, fresh);
            Builder::append(module, then_block).exit_if(&[fresh]);

            let InstKind::If { else_block, .. } = &module.inst(if_inst).kind else {
                panic!("guard instruction is not an if");
            };
            let else_block =
                else_block.unwrap_or_else(|| panic!("guarded result requires an else arm"));
            let undef = module.const_undef(ty);
            Builder::append(module, else_block).exit_if(&[undef]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::display::print_module;
    use crate::ir::instructions::{BindingPoint, BuiltinFn};

    /// Fragment entry that discards, then stores to a storage buffer.
    fn discarding_module() -> (Module, ValueId) {
        let mut module = Module::new();
        let i32_ty = module.types.i32_();
        let root = module.root_block;
        let buffer = {
            let name = module.symbols.intern("output");
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
        builder.discard();
        let value = builder.module.const_i32(42);
        builder.store(buffer, value);
        builder.ret(None);
        (module, buffer)
    }

    #[test]
    fn test_discard_becomes_flag_store() {
        let (mut module, _) = discarding_module();
        run(&mut module).unwrap();
        assert!(validate_default(&module).is_ok());

        let printed = print_module(&module);
        assert!(printed.contains("%continue_execution:ptr<private, bool, read_write> = var"));
        assert!(printed.contains("store %continue_execution, false"));
        assert!(!printed.contains("discard"));
    }

    #[test]
    fn test_storage_store_guarded_and_return_terminated() {
        let (mut module, _) = discarding_module();
        run(&mut module).unwrap();

        let printed = print_module(&module);
        // The storage store sits inside an if over the flag.
        assert!(printed.contains("load %continue_execution"));
        assert!(printed.contains("store %output, 42i"));
        assert!(printed.contains("terminate_invocation"));
        // The terminate guard tests the negated flag.
        assert!(printed.contains("not %"));
    }

    #[test]
    fn test_side_effecting_builtin_result_is_threaded() {
        let mut module = Module::new();
        let i32_ty = module.types.i32_();
        let root = module.root_block;
        let counter = {
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
        let old = {
            let mut builder = Builder::append(&mut module, entry);
            builder.discard();
            let one = builder.module.const_i32(1);
            let old = builder.builtin_call(i32_ty, BuiltinFn::AtomicAdd, &[counter, one]);
            let private_sink = builder.var(
                None,
                AddressSpace::Function,
                AccessMode::ReadWrite,
                i32_ty,
                None,
                None,
            );
            builder.store(private_sink, old);
            builder.ret(None);
            old
        };

        run(&mut module).unwrap();
        assert!(validate_default(&module).is_ok());

        // The atomic's old result is now defined by the wrapping if and
        // the downstream store needed no rewriting.
        let ValueKind::InstResult { inst, .. } = module.value(old).kind else {
            panic!("threaded result lost its definition");
        };
        assert!(matches!(module.inst(inst).kind, InstKind::If { .. }));
        assert_eq!(module.value(old).uses().len(), 1);

        let printed = print_module(&module);
        assert!(printed.contains("atomicAdd"));
        assert!(printed.contains("undef<i32>"));
    }

    #[test]
    fn test_storage_vector_lane_store_is_guarded() {
        let mut module = Module::new();
        let f32_ty = module.types.f32_();
        let v4f = module.types.vector(f32_ty, 4);
        let root = module.root_block;
        let out = {
            let name = module.symbols.intern("out");
            let mut builder = Builder::append(&mut module, root);
            builder.var(
                Some(name),
                AddressSpace::Storage,
                AccessMode::ReadWrite,
                v4f,
                Some(BindingPoint::new(0, 0)),
                None,
            )
        };

        let name = module.symbols.intern("main");
        let void = module.types.void();
        let func = module.new_function(name, void, Some(ShaderStage::Fragment));
        let entry = module.function(func).entry;
        {
            let mut builder = Builder::append(&mut module, entry);
            builder.discard();
            let lane = builder.module.const_u32(0);
            let value = builder.module.const_f32(1.0);
            builder.store_vector_element(out, lane, value);
            builder.ret(None);
        }

        run(&mut module).unwrap();
        assert!(validate_default(&module).is_ok());

        let printed = print_module(&module);
        assert!(printed.contains("store_vector_element %out, 0u, 1f"));
        // One flag load guards the lane store, one the pre-return
        // terminate.
        assert_eq!(printed.matches("load %continue_execution").count(), 2);
    }

    #[test]
    fn test_discard_through_callee_rewrites_both() {
        let mut module = Module::new();
        let void = module.types.void();

        let helper_name = module.symbols.intern("maybe_bail");
        let helper = module.new_function(helper_name, void, None);
        let helper_entry = module.function(helper).entry;
        {
            let mut builder = Builder::append(&mut module, helper_entry);
            builder.discard();
            builder.ret(None);
        }

        let name = module.symbols.intern("main");
        let func = module.new_function(name, void, Some(ShaderStage::Fragment));
        let entry = module.function(func).entry;
        {
            let mut builder = Builder::append(&mut module, entry);
            builder.user_call_inst(helper, &[]);
            builder.ret(None);
        }

        run(&mut module).unwrap();
        assert!(validate_default(&module).is_ok());

        let printed = print_module(&module);
        assert!(!printed.contains("discard"));
        // Only the fragment entry point gets the pre-return terminate.
        assert_eq!(printed.matches("terminate_invocation").count(), 1);
    }

    #[test]
    fn test_no_discard_is_a_no_op() {
        let mut module = Module::new();
        let name = module.symbols.intern("main");
        let void = module.types.void();
        let func = module.new_function(name, void, Some(ShaderStage::Fragment));
        let entry = module.function(func).entry;
        Builder::append(&mut module, entry).ret(None);

        let before = print_module(&module);
        run(&mut module).unwrap();
        assert_eq!(before, print_module(&module));
        assert!(!print_module(&module).contains("continue_execution"));
    }

    #[test]
    fn test_function_space_stores_stay_unguarded() {
        let mut module = Module::new();
        let i32_ty = module.types.i32_();
        let name = module.symbols.intern("main");
        let void = module.types.void();
        let func = module.new_function(name, void, Some(ShaderStage::Fragment));
        let entry = module.function(func).entry;
        {
            let mut builder = Builder::append(&mut module, entry);
            builder.discard();
            let local = builder.var(
                None,
                AddressSpace::Function,
                AccessMode::ReadWrite,
                i32_ty,
                None,
                None,
            );
            let one = builder.module.const_i32(1);
            builder.store(local, one);
            builder.ret(None);
        }

        run(&mut module).unwrap();
        let printed = print_module(&module);
        // Exactly two ifs: none around the function-space store, one
        // around nothing else but the pre-return terminate... the flag
        // load appears only for the terminate guard.
        assert_eq!(printed.matches("if ").count(), 1);
        assert!(printed.contains("terminate_invocation"));
    }
}
