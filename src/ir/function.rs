//! Functions and blocks.
//!
//! A function owns a single entry block; nested control instructions
//! own their child blocks. Blocks are exclusively-owned, ordered
//! instruction sequences ending in exactly one terminator. A block may
//! declare parameters, used by loop bodies to carry per-iteration
//! values (the structured equivalent of phi nodes).

use crate::ir::instructions::InstId;
use crate::ir::symbols::Symbol;
use crate::ir::types::TypeId;
use crate::ir::values::ValueId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub params: Vec<ValueId>,
    pub(crate) insts: Vec<InstId>,
}

impl Block {
    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn first(&self) -> Option<InstId> {
        self.insts.first().copied()
    }

    pub fn last(&self) -> Option<InstId> {
        self.insts.last().copied()
    }

    pub fn position_of(&self, inst: InstId) -> Option<usize> {
        self.insts.iter().position(|&candidate| candidate == inst)
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Symbol,
    pub params: Vec<ValueId>,
    pub return_type: TypeId,
    /// `None` for non-entry "value" functions.
    pub stage: Option<ShaderStage>,
    pub entry: BlockId,
}

impl Function {
    pub fn is_entry_point(&self) -> bool {
        self.stage.is_some()
    }
}
