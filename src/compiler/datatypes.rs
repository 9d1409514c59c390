//! Type representation for the compiler.
//!
//! Types are indices into a dense [`TypeTable`]; the primitive types sit at
//! fixed indices so identity comparison is just id equality. Pointer types
//! are interned by `(pointee, mutability)` and struct types by their struct
//! id, so interning preserves reference equality across the compilation.

use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Bool,
    Int { bits: u16, signed: bool },
    Float { bits: u16 },
    Pointer { pointee: TypeId, mutable: bool },
    Struct(StructId),
}

// Fixed ids for the primitive singletons, in registration order.
pub const VOID: TypeId = TypeId(0);
pub const BOOL: TypeId = TypeId(1);
pub const I8: TypeId = TypeId(2);
pub const U8: TypeId = TypeId(3);
pub const I16: TypeId = TypeId(4);
pub const U16: TypeId = TypeId(5);
pub const I32: TypeId = TypeId(6);
pub const U32: TypeId = TypeId(7);
pub const I64: TypeId = TypeId(8);
pub const U64: TypeId = TypeId(9);
pub const F32: TypeId = TypeId(10);
pub const F64: TypeId = TypeId(11);

/// `usize` and `isize` are aliases of the 64-bit integers on every target
/// this compiler emits for.
pub const USIZE: TypeId = U64;
pub const ISIZE: TypeId = I64;

#[derive(Debug)]
pub struct TypeTable {
    types: Vec<TypeKind>,
    pointers: FxHashMap<(TypeId, bool), TypeId>,
    struct_types: FxHashMap<StructId, TypeId>,
}

impl TypeTable {
    pub fn new() -> Self {
        let types = vec![
            TypeKind::Void,
            TypeKind::Bool,
            TypeKind::Int { bits: 8, signed: true },
            TypeKind::Int { bits: 8, signed: false },
            TypeKind::Int { bits: 16, signed: true },
            TypeKind::Int { bits: 16, signed: false },
            TypeKind::Int { bits: 32, signed: true },
            TypeKind::Int { bits: 32, signed: false },
            TypeKind::Int { bits: 64, signed: true },
            TypeKind::Int { bits: 64, signed: false },
            TypeKind::Float { bits: 32 },
            TypeKind::Float { bits: 64 },
        ];
        TypeTable {
            types,
            pointers: FxHashMap::default(),
            struct_types: FxHashMap::default(),
        }
    }

    pub fn kind(&self, id: TypeId) -> TypeKind {
        self.types[id.0 as usize]
    }

    /// Interned pointer constructor: equal `(pointee, mutability)` always
    /// yields the identical type id.
    pub fn pointer_to(&mut self, pointee: TypeId, mutable: bool) -> TypeId {
        if let Some(&existing) = self.pointers.get(&(pointee, mutable)) {
            return existing;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeKind::Pointer { pointee, mutable });
        self.pointers.insert((pointee, mutable), id);
        id
    }

    pub fn struct_type(&mut self, sid: StructId) -> TypeId {
        if let Some(&existing) = self.struct_types.get(&sid) {
            return existing;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeKind::Struct(sid));
        self.struct_types.insert(sid, id);
        id
    }

    /// The signed integer of the given width.
    pub fn int(&self, bits: u16, signed: bool) -> TypeId {
        match (bits, signed) {
            (8, true) => I8,
            (8, false) => U8,
            (16, true) => I16,
            (16, false) => U16,
            (32, true) => I32,
            (32, false) => U32,
            (64, true) => I64,
            _ => U64,
        }
    }

    pub fn float(&self, bits: u16) -> TypeId {
        if bits == 64 { F64 } else { F32 }
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Pointer { .. })
    }

    pub fn is_struct(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Struct(_))
    }

    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Pointer { pointee, .. } => Some(pointee),
            _ => None,
        }
    }

    pub fn pointer_is_mutable(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Pointer { mutable: true, .. })
    }

    pub fn size(&self, id: TypeId, structs: &[StructDef]) -> usize {
        match self.kind(id) {
            TypeKind::Void => 0,
            TypeKind::Bool => 1,
            TypeKind::Int { bits, .. } | TypeKind::Float { bits } => bits as usize / 8,
            TypeKind::Pointer { .. } => 8,
            TypeKind::Struct(sid) => structs[sid.0 as usize].size,
        }
    }

    pub fn align(&self, id: TypeId, structs: &[StructDef]) -> usize {
        match self.kind(id) {
            TypeKind::Void => 1,
            TypeKind::Bool => 1,
            TypeKind::Int { bits, .. } | TypeKind::Float { bits } => bits as usize / 8,
            TypeKind::Pointer { .. } => 8,
            TypeKind::Struct(sid) => structs[sid.0 as usize].align,
        }
    }

    /// The textual-IR spelling of a type. Struct values are only ever
    /// addressed through their storage, so they print as `ptr`.
    pub fn llvm_ty(&self, id: TypeId) -> &'static str {
        match self.kind(id) {
            TypeKind::Void => "void",
            TypeKind::Bool => "i1",
            TypeKind::Pointer { .. } => "ptr",
            TypeKind::Float { bits } => {
                if bits == 64 {
                    "double"
                } else {
                    "float"
                }
            }
            TypeKind::Int { bits, .. } => match bits {
                8 => "i8",
                16 => "i16",
                32 => "i32",
                _ => "i64",
            },
            TypeKind::Struct(_) => "ptr",
        }
    }

    /// A human-readable spelling for diagnostics.
    pub fn display(&self, id: TypeId, structs: &[StructDef]) -> String {
        match self.kind(id) {
            TypeKind::Void => "void".to_string(),
            TypeKind::Bool => "bool".to_string(),
            TypeKind::Int { bits, signed } => {
                format!("{}{bits}", if signed { "i" } else { "u" })
            }
            TypeKind::Float { bits } => format!("f{bits}"),
            TypeKind::Pointer { pointee, mutable } => {
                let prefix = if mutable { "mut ref " } else { "ref " };
                format!("{prefix}{}", self.display(pointee, structs))
            }
            TypeKind::Struct(sid) => structs[sid.0 as usize].name.to_string(),
        }
    }
}

/// Maps a primitive type name to its id. `String`, `MutString` and `File`
/// are pointer compatibility aliases handled by the type parser, not here.
pub fn primitive_by_name(name: &str) -> Option<TypeId> {
    let id = match name {
        "i8" => I8,
        "u8" => U8,
        "i16" => I16,
        "u16" => U16,
        "i32" => I32,
        "u32" => U32,
        "i64" => I64,
        "u64" => U64,
        "usize" => USIZE,
        "isize" => ISIZE,
        "f32" => F32,
        "f64" => F64,
        "void" => VOID,
        "bool" => BOOL,
        _ => return None,
    };
    Some(id)
}

#[derive(Debug, Clone)]
pub struct FieldDef<'u> {
    pub name: &'u str,
    pub ty: TypeId,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct StructDef<'u> {
    pub name: &'u str,
    pub size: usize,
    pub align: usize,
    pub fields: Vec<FieldDef<'u>>,
}

impl<'u> StructDef<'u> {
    pub fn field(&self, name: &str) -> Option<&FieldDef<'u>> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// C-like layout: each field at the next offset aligned to its alignment,
/// total size rounded up to the max field alignment. Field order is
/// declaration order, offsets monotonically non-decreasing.
pub fn layout_fields(
    fields: &mut [FieldDef],
    types: &TypeTable,
    structs: &[StructDef],
) -> (usize, usize) {
    let mut offset = 0usize;
    let mut align = 1usize;
    for field in fields.iter_mut() {
        let field_align = types.align(field.ty, structs).max(1);
        let field_size = types.size(field.ty, structs);
        if field_align > align {
            align = field_align;
        }
        offset = (offset + field_align - 1) & !(field_align - 1);
        field.offset = offset;
        offset += field_size;
    }
    let size = (offset + align - 1) & !(align - 1);
    (size, align)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_interning_preserves_identity() {
        let mut types = TypeTable::new();
        let a = types.pointer_to(I32, false);
        let b = types.pointer_to(I32, false);
        assert_eq!(a, b);

        let mutable = types.pointer_to(I32, true);
        assert_ne!(a, mutable);

        let other = types.pointer_to(U8, false);
        assert_ne!(a, other);
        assert_eq!(types.pointer_to(U8, false), other);
    }

    #[test]
    fn nested_pointers_intern_by_pointee_identity() {
        let mut types = TypeTable::new();
        let inner = types.pointer_to(U8, true);
        let a = types.pointer_to(inner, false);
        let inner_again = types.pointer_to(U8, true);
        let b = types.pointer_to(inner_again, false);
        assert_eq!(a, b);
    }

    #[test]
    fn layout_packs_with_alignment_padding() {
        let types = TypeTable::new();
        let structs: Vec<StructDef> = Vec::new();
        let mut fields = vec![
            FieldDef { name: "a", ty: U8, offset: 0 },
            FieldDef { name: "b", ty: I32, offset: 0 },
            FieldDef { name: "c", ty: U16, offset: 0 },
        ];
        let (size, align) = layout_fields(&mut fields, &types, &structs);
        assert_eq!(fields[0].offset, 0);
        assert_eq!(fields[1].offset, 4);
        assert_eq!(fields[2].offset, 8);
        assert_eq!(align, 4);
        assert_eq!(size, 12);
    }

    #[test]
    fn layout_is_idempotent() {
        let types = TypeTable::new();
        let structs: Vec<StructDef> = Vec::new();
        let mut fields = vec![
            FieldDef { name: "x", ty: I64, offset: 0 },
            FieldDef { name: "y", ty: U8, offset: 0 },
            FieldDef { name: "z", ty: I16, offset: 0 },
        ];
        let first = layout_fields(&mut fields, &types, &structs);
        let offsets: Vec<usize> = fields.iter().map(|f| f.offset).collect();
        let second = layout_fields(&mut fields, &types, &structs);
        assert_eq!(first, second);
        assert_eq!(offsets, fields.iter().map(|f| f.offset).collect::<Vec<_>>());
    }

    proptest::proptest! {
        #[test]
        fn layout_is_idempotent_and_offsets_monotone(
            picks in proptest::collection::vec(0usize..10, 1..12)
        ) {
            let types = TypeTable::new();
            let structs: Vec<StructDef> = Vec::new();
            let palette = [BOOL, I8, U8, I16, U16, I32, U32, I64, U64, F64];
            let mut fields: Vec<FieldDef> = picks
                .iter()
                .map(|&p| FieldDef { name: "f", ty: palette[p], offset: 0 })
                .collect();

            let first = layout_fields(&mut fields, &types, &structs);
            let offsets: Vec<usize> = fields.iter().map(|f| f.offset).collect();
            proptest::prop_assert!(offsets.windows(2).all(|w| w[0] <= w[1]));

            let second = layout_fields(&mut fields, &types, &structs);
            proptest::prop_assert_eq!(first, second);
            let offsets_again: Vec<usize> = fields.iter().map(|f| f.offset).collect();
            proptest::prop_assert_eq!(offsets, offsets_again);
        }
    }

    #[test]
    fn llvm_spellings() {
        let mut types = TypeTable::new();
        assert_eq!(types.llvm_ty(VOID), "void");
        assert_eq!(types.llvm_ty(BOOL), "i1");
        assert_eq!(types.llvm_ty(I32), "i32");
        assert_eq!(types.llvm_ty(F32), "float");
        assert_eq!(types.llvm_ty(F64), "double");
        let p = types.pointer_to(U8, true);
        assert_eq!(types.llvm_ty(p), "ptr");
    }
}
