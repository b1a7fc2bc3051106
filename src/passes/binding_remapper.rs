//! ============================================================
//!                     Binding Remapper
//! ============================================================
//! Rewrites `(group, binding)` pairs on module-scope resource vars
//! according to a caller-supplied old-to-new map. The whole map is
//! applied as one pointwise function over the pre-pass snapshot, so
//! swap maps (`{A->B, B->A}`) exchange the two points instead of
//! chasing each other.
//!
//! Points absent from the map pass through unchanged. Post-pass
//! collisions fail validation unless the caller asserts
//! `AllowDuplicateBindings`.

use crate::ir::instructions::{BindingPoint, InstId, InstKind};
use crate::ir::module::Module;
use crate::ir::validator::{Capabilities, validate};
use crate::passes::PassResult;
use rustc_hash::FxHashMap;

pub type BindingRemap = FxHashMap<BindingPoint, BindingPoint>;

pub fn run(module: &mut Module, map: &BindingRemap, capabilities: &Capabilities) -> PassResult {
    validate(module, capabilities)?;
    if map.is_empty() {
        return Ok(());
    }

    // Snapshot phase: pair each var with its mapped target before any
    // point is overwritten.
    let edits: Vec<(InstId, BindingPoint)> = module
        .root_vars()
        .into_iter()
        .filter_map(|inst| {
            let InstKind::Var(decl) = &module.inst(inst).kind else {
                return None;
            };
            let point = decl.binding?;
            map.get(&point).map(|&target| (inst, target))
        })
        .collect();

    for (inst, target) in edits {
        if let InstKind::Var(decl) = &mut module.inst_mut(inst).kind {
            decl.binding = Some(target);
        }
    }

    validate(module, capabilities)
}
