//! ============================================================
//!                    Values and Constants
//! ============================================================
//! A [`ValueId`] names anything an instruction operand can reference:
//! an instruction result, a function or block parameter, or an
//! interned constant.
//!
//! Every value carries its live usage set: the exact
//! `(instruction, operand index)` slots that currently reference it.
//! The usage set is updated transactionally by the module's mutation
//! primitives and is never recomputed by scanning, so passes can
//! redirect or count uses in O(uses) rather than O(module).

use crate::ir::function::{BlockId, FuncId};
use crate::ir::instructions::InstId;
use crate::ir::symbols::Symbol;
use crate::ir::types::TypeId;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstId(pub(crate) u32);

/// One live reference to a value: which instruction, which operand slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Usage {
    pub inst: InstId,
    pub operand_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Output of an instruction. `index` distinguishes multi-result
    /// opcodes like atomic compare-exchange.
    InstResult { inst: InstId, index: u32 },
    FunctionParam { function: FuncId, index: u32 },
    BlockParam { block: BlockId, index: u32 },
    Constant(ConstId),
}

#[derive(Debug, Clone)]
pub struct ValueData {
    pub kind: ValueKind,
    pub ty: TypeId,
    /// Optional debug name. Anonymous values print as their ordinal.
    pub name: Option<Symbol>,
    /// Module-wide label for diagnostics and deterministic printing.
    pub ordinal: u32,
    pub(crate) uses: Vec<Usage>,
}

impl ValueData {
    pub fn uses(&self) -> &[Usage] {
        &self.uses
    }

    pub fn is_used(&self) -> bool {
        !self.uses.is_empty()
    }
}

// ============================================================
// Constants
// ============================================================

/// Structurally interned literal. f32 payloads are stored as raw bits
/// so the kind can be hashed and deduplicated exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstKind {
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(u32),
    /// A vector with every lane equal to `value`.
    Splat { ty: TypeId, value: ConstId },
    /// An aggregate (vector with distinct lanes, array, struct).
    Composite { ty: TypeId, elements: Vec<ConstId> },
    /// An unspecified value of the given type, used when a loop is
    /// abnormally terminated and its carried results never materialize.
    Undef(TypeId),
}

#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    kinds: Vec<ConstKind>,
    interner: FxHashMap<ConstKind, ConstId>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, kind: ConstKind) -> ConstId {
        if let Some(&existing) = self.interner.get(&kind) {
            return existing;
        }

        let id = ConstId(self.kinds.len() as u32);
        self.kinds.push(kind.clone());
        self.interner.insert(kind, id);
        id
    }

    pub fn kind(&self, id: ConstId) -> &ConstKind {
        &self.kinds[id.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::TypeManager;

    #[test]
    fn test_constants_deduplicate_structurally() {
        let mut pool = ConstantPool::new();
        let a = pool.intern(ConstKind::U32(7));
        let b = pool.intern(ConstKind::U32(7));
        assert_eq!(a, b);
        assert_ne!(a, pool.intern(ConstKind::I32(7)));
    }

    #[test]
    fn test_splats_deduplicate_through_element() {
        let mut pool = ConstantPool::new();
        let mut types = TypeManager::new();
        let v2u = types.vector(types.u32_(), 2);

        let zero = pool.intern(ConstKind::U32(0));
        let a = pool.intern(ConstKind::Splat { ty: v2u, value: zero });
        let zero_again = pool.intern(ConstKind::U32(0));
        let b = pool.intern(ConstKind::Splat {
            ty: v2u,
            value: zero_again,
        });
        assert_eq!(a, b);
    }

    #[test]
    fn test_f32_constants_compare_by_bits() {
        let mut pool = ConstantPool::new();
        let a = pool.intern(ConstKind::F32(1.0f32.to_bits()));
        let b = pool.intern(ConstKind::F32(1.0f32.to_bits()));
        assert_eq!(a, b);
    }
}
