//! Pre-registered structs and host constants.
//!
//! The built-in struct layouts mirror the host ABI the emitted code links
//! against (poll/stat/attrlist/fts on the reference platform); the constant
//! table mirrors the platform header values. Both are fixed: user code can
//! reference them without declaring anything.

use crate::compiler::datatypes::{
    FieldDef, StructDef, TypeId, TypeTable, I16, I32, I64, U16, U32, U64, U8,
};

/// Registers the built-in structs in a fixed order. Layouts are spelled out
/// explicitly rather than computed: several of them carry platform padding
/// that field-by-field layout would not reproduce (`Stat`, `FTSENT`).
pub fn register_builtin_structs<'u>(types: &mut TypeTable, structs: &mut Vec<StructDef<'u>>) {
    // PollFd: struct pollfd (fd i32 @0, events i16 @4, revents i16 @6)
    structs.push(StructDef {
        name: "PollFd",
        size: 8,
        align: 4,
        fields: vec![
            FieldDef { name: "fd", ty: I32, offset: 0 },
            FieldDef { name: "events", ty: I16, offset: 4 },
            FieldDef { name: "revents", ty: I16, offset: 6 },
        ],
    });

    // TimeSpec: struct timespec (tv_sec i64 @0, tv_nsec i64 @8)
    structs.push(StructDef {
        name: "TimeSpec",
        size: 16,
        align: 8,
        fields: vec![
            FieldDef { name: "tv_sec", ty: I64, offset: 0 },
            FieldDef { name: "tv_nsec", ty: I64, offset: 8 },
        ],
    });

    // Stat: struct stat, partial layout (only the fields user code touches)
    let stat_index = structs.len() as u32;
    structs.push(StructDef {
        name: "Stat",
        size: 144,
        align: 8,
        fields: vec![
            FieldDef { name: "st_mode", ty: U16, offset: 4 },
            FieldDef { name: "st_size", ty: I64, offset: 96 },
        ],
    });

    // AttrList: struct attrlist (u16, u16, u32 x 5)
    structs.push(StructDef {
        name: "AttrList",
        size: 24,
        align: 4,
        fields: vec![
            FieldDef { name: "bitmapcount", ty: U16, offset: 0 },
            FieldDef { name: "reserved", ty: U16, offset: 2 },
            FieldDef { name: "commonattr", ty: U32, offset: 4 },
            FieldDef { name: "volattr", ty: U32, offset: 8 },
            FieldDef { name: "dirattr", ty: U32, offset: 12 },
            FieldDef { name: "fileattr", ty: U32, offset: 16 },
            FieldDef { name: "forkattr", ty: U32, offset: 20 },
        ],
    });

    // AttrRef: attrreference_t (i32 @0, u32 @4)
    structs.push(StructDef {
        name: "AttrRef",
        size: 8,
        align: 4,
        fields: vec![
            FieldDef { name: "attr_dataoffset", ty: I32, offset: 0 },
            FieldDef { name: "attr_length", ty: U32, offset: 4 },
        ],
    });

    // FTS: opaque, only used behind pointers
    structs.push(StructDef {
        name: "FTS",
        size: 8,
        align: 8,
        fields: Vec::new(),
    });

    // FTSENT: partial layout for the fields walkers use
    let byte_ptr = types.pointer_to(U8, true);
    let stat_ty = types.struct_type(crate::compiler::datatypes::StructId(stat_index));
    let stat_ptr = types.pointer_to(stat_ty, true);
    structs.push(StructDef {
        name: "FTSENT",
        size: 112,
        align: 8,
        fields: vec![
            FieldDef { name: "fts_path", ty: byte_ptr, offset: 48 },
            FieldDef { name: "fts_level", ty: I16, offset: 86 },
            FieldDef { name: "fts_info", ty: U16, offset: 88 },
            FieldDef { name: "fts_statp", ty: stat_ptr, offset: 96 },
        ],
    });
}

/// Host-provided compile-time constants, resolved after user declarations.
/// Values are the reference platform's header values.
pub fn builtin_const(name: &str) -> Option<(TypeId, u64)> {
    let entry = match name {
        "O_RDONLY" => (I32, 0x0000_0000),
        "O_DIRECTORY" => (I32, 0x0010_0000),
        "O_NOFOLLOW" => (I32, 0x0000_0100),

        "ATTR_BIT_MAP_COUNT" => (U16, 5),
        "ATTR_CMN_RETURNED_ATTRS" => (U32, 0x8000_0000),
        "ATTR_CMN_NAME" => (U32, 0x0000_0001),
        "ATTR_CMN_OBJTYPE" => (U32, 0x0000_0008),
        "ATTR_FILE_DATALENGTH" => (U32, 0x0000_0200),

        "FSOPT_PACK_INVAL_ATTRS" => (U64, 0x0000_0008),
        "FSOPT_NOINMEMUPDATE" => (U64, 0x0000_0002),
        "FSOPT_NOFOLLOW" => (U64, 0x0000_0001),

        "VREG" => (U32, 1),
        "VDIR" => (U32, 2),
        "VLNK" => (U32, 5),

        "CLOCK_MONOTONIC" => (I32, 6),

        "FTS_LOGICAL" => (I32, 0x002),
        "FTS_NOCHDIR" => (I32, 0x004),
        "FTS_PHYSICAL" => (I32, 0x010),
        "FTS_D" => (I32, 1),
        "FTS_F" => (I32, 8),
        "FTS_SL" => (I32, 12),
        "FTS_SKIP" => (I32, 4),

        _ => return None,
    };
    Some(entry)
}

/// Functions whose direct call marks the caller as allocating.
pub fn is_known_alloc_fn(name: &str) -> bool {
    matches!(name, "malloc" | "calloc" | "realloc" | "posix_memalign")
}

/// A conservative whitelist so `noalloc` code can still call common libc
/// helpers.
pub fn is_known_nonalloc_extern(name: &str) -> bool {
    matches!(
        name,
        "memcpy"
            | "memset"
            | "strlen"
            | "printf"
            | "puts"
            | "write"
            | "clock_gettime"
            | "getenv"
            | "atoi"
    )
}

/// Externs declared with a fixed prefix but truly variadic.
pub fn is_varargs_name(name: &str) -> bool {
    matches!(name, "printf" | "open" | "openat")
}
