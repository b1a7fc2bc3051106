//! ============================================================
//!                           PRISM
//! ============================================================
//! A shader IR raise pipeline.
//!
//! The front end (WGSL parser/resolver) hands this crate a fully
//! resolved [`ir::Module`]. A backend-specific sequencer then runs an
//! ordered list of transform passes over it until every construct the
//! target shading language cannot express natively has been rewritten
//! away. The raised module is handed to the backend emitter, which is
//! not part of this crate.
//!
//! Passes are independent, synchronous, and mutate the module in
//! place. Each pass validates the module at entry against the
//! capability set it requires, is a no-op when its target construct is
//! absent, and either fully completes its rewrite or fails without
//! partially committing.

pub mod errors;

pub mod dev_logging;

pub mod ir {
    pub mod builder;
    pub mod display;
    pub mod function;
    pub mod instructions;
    pub mod module;
    pub mod symbols;
    pub mod types;
    pub mod validator;
    pub mod values;

    pub use builder::Builder;
    pub use function::{Block, BlockId, FuncId, Function, ShaderStage};
    pub use instructions::{
        BinaryOp, BindingPoint, BuiltinFn, InstId, InstKind, Instruction, SwitchCase, UnaryOp,
        VarDecl,
    };
    pub use module::Module;
    pub use symbols::{Symbol, SymbolTable};
    pub use types::{
        AccessMode, AddressSpace, ScalarKind, StructDecl, StructId, StructMember, TextureKind,
        TypeId, TypeKind, TypeManager,
    };
    pub use validator::{Capabilities, Capability, validate, validate_default};
    pub use values::{ConstId, ConstKind, Usage, ValueData, ValueId, ValueKind};
}

pub mod passes {
    pub mod binary_polyfill;
    pub mod binding_remapper;
    pub mod block_decoration;
    pub mod demote_to_helper;
    pub(crate) mod helper_cache;
    pub mod loop_guard;
    pub mod multiplanar;

    mod sequencer;
    pub use sequencer::{PassEntry, run_sequence};

    use crate::errors::TransformError;

    /// Every pass reports through the same result type: success, or the
    /// first configuration/validation failure it hit. Programming
    /// invariant violations inside a pass panic instead, since they are
    /// pass bugs rather than bad input.
    pub type PassResult = Result<(), TransformError>;
}

pub use errors::{ErrorKind, TransformError};
