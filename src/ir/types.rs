//! ============================================================
//!                        Type Manager
//! ============================================================
//! Interned, immutable, structurally hash-consed type descriptors.
//!
//! Two structurally equal types always intern to the same [`TypeId`],
//! so every pass compares types with plain id equality instead of deep
//! structural comparison. Struct types are the one exception: they have
//! nominal identity ([`StructId`]) and carry mutable metadata (the
//! block decoration flag), so `Struct(a) == Struct(b)` only when the
//! declarations are the same declaration.

use crate::ir::symbols::{Symbol, SymbolTable};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    I32,
    U32,
    F32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    Function,
    Private,
    Workgroup,
    Uniform,
    Storage,
    PushConstant,
    Handle,
}

impl AddressSpace {
    /// Host-shareable spaces are the ones backends may require a
    /// block-decorated store type for.
    pub fn is_host_shareable(self) -> bool {
        matches!(
            self,
            AddressSpace::Uniform | AddressSpace::Storage | AddressSpace::PushConstant
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// A native 2-D sampled texture (f32 sampled type).
    Sampled2d,
    /// A logical external texture backed by up to two hardware planes.
    /// Lowered away by the multiplanar pass before any backend sees it.
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Void,
    Scalar(ScalarKind),
    Vector {
        element: TypeId,
        width: u8,
    },
    Matrix {
        element: TypeId,
        columns: u8,
        rows: u8,
    },
    Array {
        element: TypeId,
        /// `None` for runtime-unsized arrays.
        count: Option<u32>,
    },
    Struct(StructId),
    Pointer {
        space: AddressSpace,
        store: TypeId,
        access: AccessMode,
    },
    Texture(TextureKind),
    Sampler,
}

#[derive(Debug, Clone)]
pub struct StructMember {
    pub name: Symbol,
    pub ty: TypeId,
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: Symbol,
    pub members: Vec<StructMember>,
    /// Set by the block-decoration pass for buffer store types.
    pub block_decorated: bool,
}

#[derive(Debug, Clone)]
pub struct TypeManager {
    kinds: Vec<TypeKind>,
    interner: FxHashMap<TypeKind, TypeId>,
    structs: Vec<StructDecl>,

    // Pre-interned primitives, in hot paths everywhere.
    void_ty: TypeId,
    bool_ty: TypeId,
    i32_ty: TypeId,
    u32_ty: TypeId,
    f32_ty: TypeId,
}

impl TypeManager {
    pub fn new() -> Self {
        let mut manager = TypeManager {
            kinds: Vec::new(),
            interner: FxHashMap::default(),
            structs: Vec::new(),
            void_ty: TypeId(0),
            bool_ty: TypeId(0),
            i32_ty: TypeId(0),
            u32_ty: TypeId(0),
            f32_ty: TypeId(0),
        };

        manager.void_ty = manager.intern(TypeKind::Void);
        manager.bool_ty = manager.intern(TypeKind::Scalar(ScalarKind::Bool));
        manager.i32_ty = manager.intern(TypeKind::Scalar(ScalarKind::I32));
        manager.u32_ty = manager.intern(TypeKind::Scalar(ScalarKind::U32));
        manager.f32_ty = manager.intern(TypeKind::Scalar(ScalarKind::F32));
        manager
    }

    /// Canonicalizing factory: structurally equal kinds return the same id.
    pub fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(&existing) = self.interner.get(&kind) {
            return existing;
        }

        let id = TypeId(self.kinds.len() as u32);
        self.kinds.push(kind.clone());
        self.interner.insert(kind, id);
        id
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.kinds[id.0 as usize]
    }

    /// Non-allocating interner lookup, for read-only callers such as
    /// the validator.
    pub fn find(&self, kind: &TypeKind) -> Option<TypeId> {
        self.interner.get(kind).copied()
    }

    // ------------------------
    // Primitive accessors
    // ------------------------
    pub fn void(&self) -> TypeId {
        self.void_ty
    }

    pub fn bool_(&self) -> TypeId {
        self.bool_ty
    }

    pub fn i32_(&self) -> TypeId {
        self.i32_ty
    }

    pub fn u32_(&self) -> TypeId {
        self.u32_ty
    }

    pub fn f32_(&self) -> TypeId {
        self.f32_ty
    }

    pub fn scalar(&self, kind: ScalarKind) -> TypeId {
        match kind {
            ScalarKind::Bool => self.bool_ty,
            ScalarKind::I32 => self.i32_ty,
            ScalarKind::U32 => self.u32_ty,
            ScalarKind::F32 => self.f32_ty,
        }
    }

    // ------------------------
    // Composite constructors
    // ------------------------
    pub fn vector(&mut self, element: TypeId, width: u8) -> TypeId {
        debug_assert!((2..=4).contains(&width), "vector width must be 2..=4");
        self.intern(TypeKind::Vector { element, width })
    }

    pub fn matrix(&mut self, element: TypeId, columns: u8, rows: u8) -> TypeId {
        self.intern(TypeKind::Matrix {
            element,
            columns,
            rows,
        })
    }

    pub fn array(&mut self, element: TypeId, count: u32) -> TypeId {
        self.intern(TypeKind::Array {
            element,
            count: Some(count),
        })
    }

    pub fn runtime_array(&mut self, element: TypeId) -> TypeId {
        self.intern(TypeKind::Array {
            element,
            count: None,
        })
    }

    pub fn pointer(&mut self, space: AddressSpace, store: TypeId, access: AccessMode) -> TypeId {
        self.intern(TypeKind::Pointer {
            space,
            store,
            access,
        })
    }

    pub fn sampled_2d(&mut self) -> TypeId {
        self.intern(TypeKind::Texture(TextureKind::Sampled2d))
    }

    pub fn external_texture(&mut self) -> TypeId {
        self.intern(TypeKind::Texture(TextureKind::External))
    }

    pub fn sampler(&mut self) -> TypeId {
        self.intern(TypeKind::Sampler)
    }

    // ------------------------
    // Struct declarations
    // ------------------------

    /// Declare a new nominal struct type. Two calls always produce two
    /// distinct types, regardless of member shape.
    pub fn declare_struct(&mut self, name: Symbol, members: Vec<StructMember>) -> TypeId {
        let id = StructId(self.structs.len() as u32);
        self.structs.push(StructDecl {
            name,
            members,
            block_decorated: false,
        });
        self.intern(TypeKind::Struct(id))
    }

    /// Declared structs in declaration order.
    pub fn struct_ids(&self) -> Vec<StructId> {
        (0..self.structs.len() as u32).map(StructId).collect()
    }

    pub fn struct_decl(&self, id: StructId) -> &StructDecl {
        &self.structs[id.0 as usize]
    }

    pub fn struct_decl_mut(&mut self, id: StructId) -> &mut StructDecl {
        &mut self.structs[id.0 as usize]
    }

    pub fn as_struct(&self, ty: TypeId) -> Option<StructId> {
        match self.kind(ty) {
            TypeKind::Struct(id) => Some(*id),
            _ => None,
        }
    }

    // ------------------------
    // Shape helpers
    // ------------------------

    /// The scalar kind of a scalar or vector type.
    pub fn scalar_of(&self, ty: TypeId) -> Option<ScalarKind> {
        match self.kind(ty) {
            TypeKind::Scalar(kind) => Some(*kind),
            TypeKind::Vector { element, .. } => self.scalar_of(*element),
            _ => None,
        }
    }

    /// Lane count: 1 for scalars, N for vectors.
    pub fn width_of(&self, ty: TypeId) -> u8 {
        match self.kind(ty) {
            TypeKind::Vector { width, .. } => *width,
            _ => 1,
        }
    }

    /// Splat a scalar type to the vector width of a sibling operand.
    /// Returns the scalar unchanged when the sibling is scalar.
    pub fn match_width(&mut self, scalar: TypeId, sibling: TypeId) -> TypeId {
        let width = match self.kind(sibling) {
            TypeKind::Vector { width, .. } => Some(*width),
            _ => None,
        };
        match width {
            Some(width) => self.vector(scalar, width),
            None => scalar,
        }
    }

    pub fn is_integer(&self, ty: TypeId) -> bool {
        matches!(self.scalar_of(ty), Some(ScalarKind::I32 | ScalarKind::U32))
    }

    pub fn is_signed_integer(&self, ty: TypeId) -> bool {
        matches!(self.scalar_of(ty), Some(ScalarKind::I32))
    }

    /// Bit width of the element scalar, used for shift-amount masking.
    /// All scalars in this IR are 32-bit.
    pub fn element_bit_width(&self, ty: TypeId) -> u32 {
        match self.scalar_of(ty) {
            Some(ScalarKind::Bool) => 1,
            Some(_) => 32,
            None => panic!("element_bit_width on non-scalar/vector type"),
        }
    }

    /// For a pointer type, the (space, store type, access) triple.
    pub fn pointer_info(&self, ty: TypeId) -> Option<(AddressSpace, TypeId, AccessMode)> {
        match self.kind(ty) {
            TypeKind::Pointer {
                space,
                store,
                access,
            } => Some((*space, *store, *access)),
            _ => None,
        }
    }

    /// Human-readable type name for diagnostics and IR printing.
    pub fn name_of(&self, ty: TypeId, symbols: &SymbolTable) -> String {
        match self.kind(ty) {
            TypeKind::Void => "void".to_string(),
            TypeKind::Scalar(ScalarKind::Bool) => "bool".to_string(),
            TypeKind::Scalar(ScalarKind::I32) => "i32".to_string(),
            TypeKind::Scalar(ScalarKind::U32) => "u32".to_string(),
            TypeKind::Scalar(ScalarKind::F32) => "f32".to_string(),
            TypeKind::Vector { element, width } => {
                format!("vec{}<{}>", width, self.name_of(*element, symbols))
            }
            TypeKind::Matrix {
                element,
                columns,
                rows,
            } => format!("mat{}x{}<{}>", columns, rows, self.name_of(*element, symbols)),
            TypeKind::Array {
                element,
                count: Some(count),
            } => format!("array<{}, {}>", self.name_of(*element, symbols), count),
            TypeKind::Array {
                element,
                count: None,
            } => format!("array<{}>", self.name_of(*element, symbols)),
            TypeKind::Struct(id) => symbols.resolve(self.struct_decl(*id).name).to_string(),
            TypeKind::Pointer {
                space,
                store,
                access,
            } => {
                let space = match space {
                    AddressSpace::Function => "function",
                    AddressSpace::Private => "private",
                    AddressSpace::Workgroup => "workgroup",
                    AddressSpace::Uniform => "uniform",
                    AddressSpace::Storage => "storage",
                    AddressSpace::PushConstant => "push_constant",
                    AddressSpace::Handle => "handle",
                };
                let access = match access {
                    AccessMode::Read => "read",
                    AccessMode::Write => "write",
                    AccessMode::ReadWrite => "read_write",
                };
                format!("ptr<{}, {}, {}>", space, self.name_of(*store, symbols), access)
            }
            TypeKind::Texture(TextureKind::Sampled2d) => "texture_2d<f32>".to_string(),
            TypeKind::Texture(TextureKind::External) => "texture_external".to_string(),
            TypeKind::Sampler => "sampler".to_string(),
        }
    }
}

impl Default for TypeManager {
    fn default() -> Self {
        Self::new()
    }
}
