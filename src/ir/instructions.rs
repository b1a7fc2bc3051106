//! ============================================================
//!                        Instructions
//! ============================================================
//! The instruction set of the raise IR: memory access, arithmetic,
//! builtin and user calls, structured control flow, and the terminator
//! family. Instructions live in a flat module arena and are referenced
//! by [`InstId`]; a destroyed instruction is tombstoned as `Nop` so
//! ids held by in-flight passes stay stable.

use crate::ir::function::{BlockId, FuncId};
use crate::ir::types::{AccessMode, AddressSpace};
use crate::ir::values::{ConstId, ValueId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstId(pub(crate) u32);

/// A `(group, binding)` pair identifying a resource binding slot.
/// Used as a map key for remapping and collision detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindingPoint {
    pub group: u32,
    pub binding: u32,
}

impl BindingPoint {
    pub fn new(group: u32, binding: u32) -> BindingPoint {
        BindingPoint { group, binding }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    And,
    Or,
    Xor,
    ShiftLeft,
    ShiftRight,
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
}

impl BinaryOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Subtract => "sub",
            BinaryOp::Multiply => "mul",
            BinaryOp::Divide => "div",
            BinaryOp::Modulo => "mod",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::ShiftLeft => "shl",
            BinaryOp::ShiftRight => "shr",
            BinaryOp::Equal => "eq",
            BinaryOp::NotEqual => "neq",
            BinaryOp::LessThan => "lt",
            BinaryOp::LessThanEqual => "lte",
            BinaryOp::GreaterThan => "gt",
            BinaryOp::GreaterThanEqual => "gte",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinFn {
    Select,
    Min,
    Max,
    Clamp,
    Abs,
    Sign,
    Pow,
    All,
    Any,
    Dpdx,
    Dpdy,
    TextureLoad,
    TextureStore,
    TextureDimensions,
    TextureSampleLevel,
    TextureSampleBaseClampToEdge,
    AtomicLoad,
    AtomicStore,
    AtomicAdd,
    AtomicCompareExchangeWeak,
}

impl BuiltinFn {
    /// Builtins that write through memory. The demote pass must guard
    /// these behind the continue-execution flag; pure builtins it may
    /// leave running in helper invocations.
    pub fn has_side_effects(self) -> bool {
        matches!(
            self,
            BuiltinFn::TextureStore
                | BuiltinFn::AtomicStore
                | BuiltinFn::AtomicAdd
                | BuiltinFn::AtomicCompareExchangeWeak
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinFn::Select => "select",
            BuiltinFn::Min => "min",
            BuiltinFn::Max => "max",
            BuiltinFn::Clamp => "clamp",
            BuiltinFn::Abs => "abs",
            BuiltinFn::Sign => "sign",
            BuiltinFn::Pow => "pow",
            BuiltinFn::All => "all",
            BuiltinFn::Any => "any",
            BuiltinFn::Dpdx => "dpdx",
            BuiltinFn::Dpdy => "dpdy",
            BuiltinFn::TextureLoad => "textureLoad",
            BuiltinFn::TextureStore => "textureStore",
            BuiltinFn::TextureDimensions => "textureDimensions",
            BuiltinFn::TextureSampleLevel => "textureSampleLevel",
            BuiltinFn::TextureSampleBaseClampToEdge => "textureSampleBaseClampToEdge",
            BuiltinFn::AtomicLoad => "atomicLoad",
            BuiltinFn::AtomicStore => "atomicStore",
            BuiltinFn::AtomicAdd => "atomicAdd",
            BuiltinFn::AtomicCompareExchangeWeak => "atomicCompareExchangeWeak",
        }
    }
}

/// Storage allocation attributes for a `Var` instruction. The optional
/// initializer, when present, is the instruction's only operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarDecl {
    pub space: AddressSpace,
    pub access: AccessMode,
    pub binding: Option<BindingPoint>,
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub selectors: Vec<ConstId>,
    pub is_default: bool,
    pub block: BlockId,
}

#[derive(Debug, Clone)]
pub enum InstKind {
    /// Allocates storage. Result is a pointer into `decl.space`.
    Var(VarDecl),
    /// Binds a value to a (named) result without re-evaluating it.
    Let,
    Load,
    Store,
    LoadVectorElement,
    StoreVectorElement,
    /// Struct-member / array-index chain: operands are the base
    /// followed by one value per index step.
    Access,
    CoreBinary(BinaryOp),
    CoreUnary(UnaryOp),
    CoreBuiltinCall(BuiltinFn),
    UserCall(FuncId),
    /// Builds a vector/struct/array value from per-element operands.
    Construct,
    /// Value conversion between scalar/vector types (e.g. bool -> u32).
    Convert,
    If {
        then_block: BlockId,
        else_block: Option<BlockId>,
    },
    Loop {
        initializer: Option<BlockId>,
        body: BlockId,
        continuing: Option<BlockId>,
    },
    Switch {
        cases: Vec<SwitchCase>,
    },
    /// Demotes the fragment invocation; execution continues so quad
    /// derivatives stay valid. Rewritten away by the demote pass.
    Discard,

    // ------------------------
    // Terminators
    // ------------------------
    Return,
    Unreachable,
    ExitIf,
    ExitLoop,
    ExitSwitch,
    NextIteration,
    Continue,
    /// Ends the invocation outright. Unlike `Discard` this is a
    /// terminator: nothing after it executes.
    TerminateInvocation,

    /// Tombstone left behind by `destroy_instruction`.
    Nop,
}

impl InstKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Return
                | InstKind::Unreachable
                | InstKind::ExitIf
                | InstKind::ExitLoop
                | InstKind::ExitSwitch
                | InstKind::NextIteration
                | InstKind::Continue
                | InstKind::TerminateInvocation
        )
    }

    /// Child blocks owned by this instruction, for recursive walks.
    pub fn child_blocks(&self) -> Vec<BlockId> {
        match self {
            InstKind::If {
                then_block,
                else_block,
            } => {
                let mut blocks = vec![*then_block];
                blocks.extend(else_block);
                blocks
            }
            InstKind::Loop {
                initializer,
                body,
                continuing,
            } => {
                let mut blocks = Vec::new();
                blocks.extend(initializer);
                blocks.push(*body);
                blocks.extend(continuing);
                blocks
            }
            InstKind::Switch { cases } => cases.iter().map(|case| case.block).collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub kind: InstKind,
    pub operands: Vec<ValueId>,
    pub results: Vec<ValueId>,
    /// Back-pointer to the containing block, `None` while detached.
    pub block: Option<BlockId>,
}
