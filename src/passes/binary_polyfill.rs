//! ============================================================
//!                Binary Operator Polyfill
//! ============================================================
//! Integer divide/modulo by zero, and signed `i32::MIN / -1`, trap or
//! have undefined results on several backends; shift amounts likewise
//! are not implicitly taken modulo the bit width everywhere. This pass
//! rewrites both into well-defined forms:
//!
//! - Divide/modulo calls go through one memoized helper per exact
//!   operand type (`tint_div_i32`, `tint_mod_vec3_u32`, ...) that
//!   swaps a guarded divisor in via `select`. Modulo is computed as
//!   `lhs - (lhs / safe_rhs) * safe_rhs` because native modulo with
//!   negative operands is backend-undefined.
//! - Shift amounts get an in-place `and` mask of `bit_width - 1`,
//!   preserving the shift instruction's result identity.

use crate::ir::builder::Builder;
use crate::ir::function::FuncId;
use crate::ir::instructions::{BinaryOp, BuiltinFn, InstId, InstKind};
use crate::ir::module::Module;
use crate::ir::types::{ScalarKind, TypeId, TypeKind};
use crate::ir::validator::validate_default;
use crate::ir::values::{ConstKind, ValueId};
use crate::passes::PassResult;
use crate::passes::helper_cache::HelperCache;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryPolyfillConfig {
    pub bitshift_modulo: bool,
    pub int_div_mod: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum GuardedOp {
    Divide,
    Modulo,
}

impl GuardedOp {
    fn name(self) -> &'static str {
        match self {
            GuardedOp::Divide => "div",
            GuardedOp::Modulo => "mod",
        }
    }
}

pub fn run(module: &mut Module, config: &BinaryPolyfillConfig) -> PassResult {
    validate_default(module)?;

    // Scan phase, before any helper exists, so synthesized helper
    // bodies are never themselves polyfilled.
    let mut shifts: Vec<InstId> = Vec::new();
    let mut guarded: Vec<(InstId, GuardedOp)> = Vec::new();
    for function in module.function_ids() {
        let entry = module.function(function).entry;
        for inst in module.collect_insts(entry, |_, _| true) {
            let InstKind::CoreBinary(op) = &module.inst(inst).kind else {
                continue;
            };
            let op = *op;
            let Some(result) = module.single_result(inst) else {
                continue;
            };
            if !module.types.is_integer(module.value(result).ty) {
                continue;
            }
            match op {
                BinaryOp::ShiftLeft | BinaryOp::ShiftRight if config.bitshift_modulo => {
                    shifts.push(inst);
                }
                BinaryOp::Divide if config.int_div_mod => {
                    guarded.push((inst, GuardedOp::Divide));
                }
                BinaryOp::Modulo if config.int_div_mod => {
                    guarded.push((inst, GuardedOp::Modulo));
                }
                _ => {}
            }
        }
    }

    for inst in shifts {
        mask_shift_amount(module, inst);
    }

    let mut helpers: HelperCache<(GuardedOp, TypeId)> = HelperCache::new();
    for (inst, op) in guarded {
        let ty = module
            .value(module.single_result(inst).unwrap_or_else(|| {
                panic!("guarded binary lost its result mid-pass")
            }))
            .ty;
        let helper = helpers.get_or_build((op, ty), module, |module| {
            build_guarded_helper(module, op, ty)
        });
        call_helper(module, inst, helper, ty);
    }
    Ok(())
}

/// Mask the shift amount with `bit_width(lhs element) - 1`, splatted to
/// the amount's width. The shift instruction itself is untouched apart
/// from its amount operand, so its result identity is preserved.
fn mask_shift_amount(module: &mut Module, inst: InstId) {
    let lhs = module.inst(inst).operands[0];
    let amount = module.inst(inst).operands[1];
    let mask_bits = module.types.element_bit_width(module.value(lhs).ty) - 1;
    let amount_ty = module.value(amount).ty;

    let mask = typed_const(module, amount_ty, mask_bits as i32);
    let masked = {
        let mut builder = Builder::insert_before(module, inst);
        builder.binary(BinaryOp::And, amount_ty, amount, mask)
    };
    module.set_operand(inst, 1, masked);
}

/// A constant of the given integer scalar/vector type.
fn typed_const(module: &mut Module, ty: TypeId, value: i32) -> ValueId {
    let element = match module.types.scalar_of(ty) {
        Some(ScalarKind::I32) => ConstKind::I32(value),
        Some(ScalarKind::U32) => ConstKind::U32(value as u32),
        _ => panic!("typed_const on a non-integer type"),
    };
    match module.types.kind(ty) {
        TypeKind::Vector { .. } => module.const_splat(ty, element),
        _ => module.constant_value(element),
    }
}

fn helper_name(module: &mut Module, op: GuardedOp, ty: TypeId) -> String {
    let suffix = match *module.types.kind(ty) {
        TypeKind::Scalar(ScalarKind::I32) => "i32".to_string(),
        TypeKind::Scalar(ScalarKind::U32) => "u32".to_string(),
        TypeKind::Vector { element, width } => {
            let element = match module.types.scalar_of(element) {
                Some(ScalarKind::I32) => "i32",
                _ => "u32",
            };
            format!("vec{width}_{element}")
        }
        _ => panic!("guarded helper on a non-integer type"),
    };
    format!("tint_{}_{}", op.name(), suffix)
}

/// `fn tint_div_T(lhs: T, rhs: T) -> T` with a select-guarded divisor.
fn build_guarded_helper(module: &mut Module, op: GuardedOp, ty: TypeId) -> FuncId {
    let name = helper_name(module, op, ty);
    let name = module.symbols.unique(&name);
    let function = module.new_function(name, ty, None);

    let lhs_name = module.symbols.intern("lhs");
    let rhs_name = module.symbols.intern("rhs");
    let lhs = module.add_function_param(function, lhs_name, ty);
    let rhs = module.add_function_param(function, rhs_name, ty);

    let bool_ty = module.types.bool_();
    let cond_ty = module.types.match_width(bool_ty, ty);
    let signed = module.types.is_signed_integer(ty);
    let entry = module.function(function).entry;

    let zero = typed_const(module, ty, 0);
    let one = typed_const(module, ty, 1);

    let mut builder = Builder::append(module, entry);
    let mut unsafe_rhs = builder.binary(BinaryOp::Equal, cond_ty, rhs, zero);
    if signed {
        let lowest = typed_const(builder.module, ty, i32::MIN);
        let minus_one = typed_const(builder.module, ty, -1);
        let lhs_lowest = builder.binary(BinaryOp::Equal, cond_ty, lhs, lowest);
        let rhs_minus_one = builder.binary(BinaryOp::Equal, cond_ty, rhs, minus_one);
        let overflow = builder.binary(BinaryOp::And, cond_ty, lhs_lowest, rhs_minus_one);
        unsafe_rhs = builder.binary(BinaryOp::Or, cond_ty, unsafe_rhs, overflow);
    }
    let safe_rhs = builder.builtin_call(ty, BuiltinFn::Select, &[rhs, one, unsafe_rhs]);

    let quotient = builder.binary(BinaryOp::Divide, ty, lhs, safe_rhs);
    match op {
        GuardedOp::Divide => {
            builder.ret(Some(quotient));
        }
        GuardedOp::Modulo => {
            let scaled = builder.binary(BinaryOp::Multiply, ty, quotient, safe_rhs);
            let remainder = builder.binary(BinaryOp::Subtract, ty, lhs, scaled);
            builder.ret(Some(remainder));
        }
    }
    function
}

/// Replace a guarded binary with a call to its helper, splatting any
/// scalar operand paired with a vector operand first. The original
/// result keeps its identity, so no use needs rewriting.
fn call_helper(module: &mut Module, inst: InstId, helper: FuncId, ty: TypeId) {
    let lhs = module.inst(inst).operands[0];
    let rhs = module.inst(inst).operands[1];

    let call = {
        let mut builder = Builder::insert_before(module, inst);
        let lhs = splat_to(&mut builder, lhs, ty);
        let rhs = splat_to(&mut builder, rhs, ty);
        builder.user_call_inst(helper, &[lhs, rhs])
    };

    let result = module
        .detach_result(inst)
        .unwrap_or_else(|| panic!("guarded binary has no result"));
    module.attach_result(call, result);
    module.destroy_instruction(inst);
}

fn splat_to(builder: &mut Builder<'_>, value: ValueId, ty: TypeId) -> ValueId {
    if builder.module.value(value).ty == ty {
        return value;
    }
    builder.construct(ty, &[value])
}
