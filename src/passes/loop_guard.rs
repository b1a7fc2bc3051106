//! ============================================================
//!                   Infinite Loop Guard
//! ============================================================
//! Downstream native compilers may assume loops terminate and perform
//! invalid transformations on ones that do not. This pass injects a
//! 64-bit iteration counter (as a 2-lane u32 vector, since this path
//! has no native 64-bit integers) into every loop and forces an exit
//! when the counter saturates:
//!
//! - `tint_loop_idx : vec2<u32>` declared zero in the initializer block
//!   (synthesized if absent);
//! - at body entry, an equality test against `(0xFFFFFFFF, 0xFFFFFFFF)`
//!   guarding an unconditional `exit_loop`, with `undef` for every
//!   loop-carried result since the loop is being abnormally ended;
//! - in the continuing block (synthesized if absent), a carry-
//!   propagating two-lane increment over lanes 0 and 1.
//!
//! Nested loops each get their own independent counter.

use crate::ir::builder::Builder;
use crate::ir::instructions::{BinaryOp, BuiltinFn, InstId, InstKind};
use crate::ir::module::Module;
use crate::ir::types::{AccessMode, AddressSpace};
use crate::ir::validator::validate_default;
use crate::ir::values::ConstKind;
use crate::passes::PassResult;

/// A 64-bit unsigned counter split across two 32-bit lanes, the exact
/// arithmetic the synthesized IR performs. Modeled once as a value type
/// so the carry logic is written and tested in one place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitU64 {
    pub low: u32,
    pub high: u32,
}

impl SplitU64 {
    pub const ZERO: SplitU64 = SplitU64 { low: 0, high: 0 };
    pub const MAX: SplitU64 = SplitU64 {
        low: u32::MAX,
        high: u32::MAX,
    };

    pub fn from_u64(value: u64) -> SplitU64 {
        SplitU64 {
            low: value as u32,
            high: (value >> 32) as u32,
        }
    }

    pub fn to_u64(self) -> u64 {
        (u64::from(self.high) << 32) | u64::from(self.low)
    }

    /// Add-with-carry: a carry occurs exactly when the low lane wraps
    /// to zero. The high lane is never itself checked for overflow;
    /// the combined 2^64 iteration space is unreachable in practice.
    pub fn increment(self) -> SplitU64 {
        let low = self.low.wrapping_add(1);
        let carry = u32::from(low == 0);
        SplitU64 {
            low,
            high: self.high.wrapping_add(carry),
        }
    }

    pub fn is_saturated(self) -> bool {
        self == SplitU64::MAX
    }
}

pub fn run(module: &mut Module) -> PassResult {
    validate_default(module)?;

    let mut loops: Vec<InstId> = Vec::new();
    for function in module.function_ids() {
        let entry = module.function(function).entry;
        loops.extend(module.collect_insts(entry, |module, inst| {
            matches!(module.inst(inst).kind, InstKind::Loop { .. })
        }));
    }

    for inst in loops {
        guard_loop(module, inst);
    }
    Ok(())
}

fn guard_loop(module: &mut Module, loop_inst: InstId) {
    let InstKind::Loop {
        initializer,
        body,
        continuing,
    } = &module.inst(loop_inst).kind
    else {
        panic!("guard_loop on a non-loop instruction");
    };
    let (initializer, body, mut continuing) = (*initializer, *body, *continuing);

    // Synthesize the blocks the rewrite needs before touching any of
    // them, re-pointing the loop at the new blocks.
    let initializer = match initializer {
        Some(block) => block,
        None => {
            let block = module.new_block();
            Builder::append(module, block).next_iteration(&[]);
            block
        }
    };
    if continuing.is_none() {
        let block = module.new_block();
        Builder::append(module, block).next_iteration(&[]);
        continuing = Some(block);
    }
    let continuing = continuing.unwrap_or_else(|| panic!("continuing block just synthesized"));
    if let InstKind::Loop {
        initializer: init_slot,
        continuing: cont_slot,
        ..
    } = &mut module.inst_mut(loop_inst).kind
    {
        *init_slot = Some(initializer);
        *cont_slot = Some(continuing);
    }

    let u32_ty = module.types.u32_();
    let v2u = module.types.vector(u32_ty, 2);

    // Counter var, zero-initialized, before the initializer terminator.
    let counter = {
        let name = module.symbols.unique("tint_loop_idx");
        let zero = module.const_splat(v2u, ConstKind::U32(SplitU64::ZERO.low));
        let terminator = module
            .block(initializer)
            .last()
            .unwrap_or_else(|| panic!("initializer block has no terminator"));
        let mut builder = Builder::insert_before(module, terminator);
        builder.var(
            Some(name),
            AddressSpace::Function,
            AccessMode::ReadWrite,
            v2u,
            None,
            Some(zero),
        )
    };

    // Saturation check at body entry.
    {
        let results: Vec<_> = module.inst(loop_inst).results.clone();
        let undefs: Vec<_> = results
            .iter()
            .map(|&result| {
                let ty = module.value(result).ty;
                module.const_undef(ty)
            })
            .collect();

        let saturated = module.const_splat(v2u, ConstKind::U32(SplitU64::MAX.low));
        let bool_ty = module.types.bool_();
        let v2b = module.types.vector(bool_ty, 2);
        let exit_block = module.new_block();
        Builder::append(module, exit_block).exit_loop(&undefs);

        let mut builder = Builder::prepend(module, body);
        let count = builder.load(counter);
        let lanes_equal = builder.binary(BinaryOp::Equal, v2b, count, saturated);
        let all_equal = builder.builtin_call(bool_ty, BuiltinFn::All, &[lanes_equal]);
        builder.if_(all_equal, exit_block, None, &[]);
    }

    // Carry-propagating increment before the continuing terminator.
    {
        let terminator = module
            .block(continuing)
            .last()
            .unwrap_or_else(|| panic!("continuing block has no terminator"));
        let lane0 = module.const_u32(0);
        let lane1 = module.const_u32(1);
        let one = module.const_u32(1);
        let zero = module.const_u32(0);
        let bool_ty = module.types.bool_();

        let mut builder = Builder::insert_before(module, terminator);
        let low = builder.load_vector_element(counter, lane0);
        let new_low = builder.binary(BinaryOp::Add, u32_ty, low, one);
        builder.store_vector_element(counter, lane0, new_low);
        let wrapped = builder.binary(BinaryOp::Equal, bool_ty, new_low, zero);
        let carry = builder.convert(u32_ty, wrapped);
        let high = builder.load_vector_element(counter, lane1);
        let new_high = builder.binary(BinaryOp::Add, u32_ty, high, carry);
        builder.store_vector_element(counter, lane1, new_high);
    }
}
