//! Expression compilation: the value model, casts, operators and calls.
//!
//! Every expression yields a small [`Value`] record. Lvalues carry the
//! storage address of their declared type; a load is synthesized lazily
//! when an rvalue is needed. All emission goes through the emitter's
//! discard-aware `write`, so the same parser doubles as the dry-run used
//! for type inference.

use crate::compiler::builtins::{builtin_const, is_known_alloc_fn};
use crate::compiler::codegen::FuncEmitter;
use crate::compiler::compiler_errors::{CompileError, ErrorLocation};
use crate::compiler::datatypes::{TypeId, TypeKind, BOOL, F64, I32, I64, U8, VOID};
use crate::compiler::declarations::{
    ConstPayload, FuncId, StrId, parse_uint_lit, unescape_char, unescape_string,
};
use crate::compiler::resolver::ModuleId;
use crate::compiler::tokenizer::tokens::TokenKind;
use crate::settings::MAX_CALL_ARGS;

/// What a call expression resolves to. The `calloc`/`memcpy` variants are
/// synthesized on demand so the code generator can emit calls to them
/// without user declarations; they carry no function id and can never enter
/// the call graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    User(FuncId),
    Calloc,
    Memcpy,
}

#[derive(Debug, Clone, Copy)]
pub enum ValueKind<'u> {
    Int(u64),
    /// Float constants carry their lexical text and are emitted verbatim.
    Float(&'u str),
    Null,
    Temp(u32),
    Param(u32),
    Local(u32),
    Func(Callee),
    Module(ModuleId),
}

#[derive(Debug, Clone, Copy)]
pub struct Value<'u> {
    pub ty: TypeId,
    pub kind: ValueKind<'u>,
    /// Lvalues represent the storage address of their declared type.
    pub is_lvalue: bool,
    /// Whether a store through this lvalue is permitted (locals yes,
    /// loads through immutable pointers no).
    pub assignable: bool,
}

impl<'u> Value<'u> {
    pub fn rvalue(ty: TypeId, kind: ValueKind<'u>) -> Self {
        Value {
            ty,
            kind,
            is_lvalue: false,
            assignable: false,
        }
    }

    pub fn int(ty: TypeId, value: u64) -> Self {
        Value::rvalue(ty, ValueKind::Int(value))
    }

    pub fn temp(ty: TypeId, id: u32) -> Self {
        Value::rvalue(ty, ValueKind::Temp(id))
    }
}

pub fn tok_prec(kind: TokenKind) -> i32 {
    match kind {
        TokenKind::Or => 1,
        TokenKind::And => 2,
        TokenKind::EqEq | TokenKind::NotEq | TokenKind::Is => 3,
        TokenKind::Lt | TokenKind::LtEq | TokenKind::Gt | TokenKind::GtEq => 4,
        TokenKind::Bar => 5,
        TokenKind::Caret => 6,
        TokenKind::Amp => 7,
        TokenKind::Shl | TokenKind::Shr => 8,
        TokenKind::Plus | TokenKind::Minus => 9,
        TokenKind::Star | TokenKind::Slash => 10,
        _ => 0,
    }
}

impl<'a, 'u> FuncEmitter<'a, 'u> {
    /// The textual spelling of a value operand. A zero integer constant of
    /// pointer or struct type prints as `null` (a literal `ptr 0` would be
    /// invalid IR).
    pub fn val(&self, v: &Value) -> String {
        match v.kind {
            ValueKind::Int(value) => {
                if value == 0
                    && matches!(
                        self.c.types.kind(v.ty),
                        TypeKind::Pointer { .. } | TypeKind::Struct(_)
                    )
                {
                    "null".to_string()
                } else {
                    value.to_string()
                }
            }
            ValueKind::Float(text) => text.to_string(),
            ValueKind::Null => "null".to_string(),
            ValueKind::Temp(id) => format!("%t{id}"),
            ValueKind::Param(id) => format!("%p{id}"),
            ValueKind::Local(id) => format!("%l{id}"),
            ValueKind::Func(callee) => format!("@{}", self.callee_ir_name(callee)),
            // Module references are compile-time only; they never reach
            // emission (a diagnostic has already fired if one does).
            ValueKind::Module(_) => "null".to_string(),
        }
    }

    fn callee_ir_name(&self, callee: Callee) -> String {
        match callee {
            Callee::User(fid) => self.c.funcs[fid.0 as usize].ir_name.clone(),
            Callee::Calloc => "calloc".to_string(),
            Callee::Memcpy => "memcpy".to_string(),
        }
    }

    fn callee_source_name(&self, callee: Callee) -> &'u str {
        match callee {
            Callee::User(fid) => self.c.funcs[fid.0 as usize].name,
            Callee::Calloc => "calloc",
            Callee::Memcpy => "memcpy",
        }
    }

    /// Records a type error with no source position attached.
    pub fn error_generic(&mut self, msg: impl Into<String>) {
        if self.discard {
            return;
        }
        self.c.record_error(CompileError::new_type_error(
            msg,
            ErrorLocation::default(),
        ));
    }

    fn record_call(&mut self, callee: FuncId) {
        if self.discard {
            return;
        }
        let caller = &mut self.c.funcs[self.fid.0 as usize];
        if !caller.callees.contains(&callee) {
            caller.callees.push(callee);
        }
    }

    /// Synthesizes the lazy load when an lvalue is used as an rvalue.
    pub fn load_if_needed(&mut self, v: Value<'u>) -> Value<'u> {
        if !v.is_lvalue {
            return v;
        }
        if self.c.types.is_struct(v.ty) {
            self.error_generic("Unsupported struct rvalue load");
            return Value::int(I32, 0);
        }
        let t = self.new_temp();
        let ty = self.c.types.llvm_ty(v.ty);
        let align = self.c.types.align(v.ty, &self.c.structs);
        let mut ptr = v;
        ptr.is_lvalue = false;
        let ptr_text = self.val(&ptr);
        self.write(&format!("  %t{t} = load {ty}, ptr {ptr_text}, align {align}\n"));
        Value::temp(v.ty, t)
    }

    fn type_mismatch(&mut self, dst: TypeId, src: TypeId) {
        let from = self.c.types.display(src, &self.c.structs);
        let to = self.c.types.display(dst, &self.c.structs);
        self.error_generic(format!("Type mismatch: cannot cast `{from}` to `{to}`"));
    }

    /// Casts a value to `dst`, emitting conversion instructions as needed.
    ///
    /// int↔int (sext/zext/trunc), int↔float, float↔float (fpext/fptrunc),
    /// bool→int (zext), int/ptr/float→bool (≠0 / ≠null). Struct values are
    /// never cast. Casting a mutable pointer to an immutable pointer is
    /// implicit; the reverse requires the source to be the null literal.
    pub fn cast_to(&mut self, dst: TypeId, v: Value<'u>) -> Value<'u> {
        let dst_kind = self.c.types.kind(dst);

        if let TypeKind::Struct(dst_sid) = dst_kind {
            // Struct values are represented by their storage.
            if let TypeKind::Struct(src_sid) = self.c.types.kind(v.ty) {
                if src_sid == dst_sid {
                    let mut v = v;
                    v.ty = dst;
                    return v;
                }
            }
            self.type_mismatch(dst, v.ty);
            return Value::int(dst, 0);
        }

        let v = self.load_if_needed(v);
        let src_kind = self.c.types.kind(v.ty);

        match dst_kind {
            TypeKind::Pointer { mutable: dst_mut, .. } => {
                if matches!(v.kind, ValueKind::Null) {
                    let mut v = v;
                    v.ty = dst;
                    return v;
                }
                if let TypeKind::Pointer { mutable: src_mut, .. } = src_kind {
                    if dst_mut && !src_mut {
                        self.error_generic(
                            "Cannot cast an immutable pointer to a mutable pointer",
                        );
                        return Value::rvalue(dst, ValueKind::Null);
                    }
                    let mut v = v;
                    v.ty = dst;
                    return v;
                }
                self.type_mismatch(dst, v.ty);
                Value::rvalue(dst, ValueKind::Null)
            }

            TypeKind::Bool => match src_kind {
                TypeKind::Bool => v,
                TypeKind::Pointer { .. } => {
                    let t = self.new_temp();
                    let text = self.val(&v);
                    self.write(&format!("  %t{t} = icmp ne ptr {text}, null\n"));
                    Value::temp(BOOL, t)
                }
                TypeKind::Float { .. } => {
                    let t = self.new_temp();
                    let ty = self.c.types.llvm_ty(v.ty);
                    let text = self.val(&v);
                    self.write(&format!("  %t{t} = fcmp one {ty} {text}, 0.0\n"));
                    Value::temp(BOOL, t)
                }
                TypeKind::Int { .. } => {
                    let t = self.new_temp();
                    let ty = self.c.types.llvm_ty(v.ty);
                    let text = self.val(&v);
                    self.write(&format!("  %t{t} = icmp ne {ty} {text}, 0\n"));
                    Value::temp(BOOL, t)
                }
                _ => {
                    self.type_mismatch(dst, v.ty);
                    Value::int(BOOL, 0)
                }
            },

            TypeKind::Int { bits: dst_bits, .. } => match src_kind {
                TypeKind::Bool => {
                    let t = self.new_temp();
                    let to = self.c.types.llvm_ty(dst);
                    let text = self.val(&v);
                    self.write(&format!("  %t{t} = zext i1 {text} to {to}\n"));
                    Value::temp(dst, t)
                }
                TypeKind::Int { bits: src_bits, signed: src_signed } => {
                    if dst_bits == src_bits {
                        let mut v = v;
                        v.ty = dst;
                        return v;
                    }
                    let op = if dst_bits > src_bits {
                        if src_signed { "sext" } else { "zext" }
                    } else {
                        "trunc"
                    };
                    let t = self.new_temp();
                    let from = self.c.types.llvm_ty(v.ty);
                    let to = self.c.types.llvm_ty(dst);
                    let text = self.val(&v);
                    self.write(&format!("  %t{t} = {op} {from} {text} to {to}\n"));
                    Value::temp(dst, t)
                }
                TypeKind::Float { .. } => {
                    let signed = matches!(dst_kind, TypeKind::Int { signed: true, .. });
                    let op = if signed { "fptosi" } else { "fptoui" };
                    let t = self.new_temp();
                    let from = self.c.types.llvm_ty(v.ty);
                    let to = self.c.types.llvm_ty(dst);
                    let text = self.val(&v);
                    self.write(&format!("  %t{t} = {op} {from} {text} to {to}\n"));
                    Value::temp(dst, t)
                }
                _ => {
                    self.type_mismatch(dst, v.ty);
                    Value::int(dst, 0)
                }
            },

            TypeKind::Float { bits: dst_bits } => match src_kind {
                TypeKind::Float { bits: src_bits } => {
                    if dst_bits == src_bits {
                        let mut v = v;
                        v.ty = dst;
                        return v;
                    }
                    let op = if dst_bits > src_bits { "fpext" } else { "fptrunc" };
                    let t = self.new_temp();
                    let from = self.c.types.llvm_ty(v.ty);
                    let to = self.c.types.llvm_ty(dst);
                    let text = self.val(&v);
                    self.write(&format!("  %t{t} = {op} {from} {text} to {to}\n"));
                    Value::temp(dst, t)
                }
                TypeKind::Int { signed, .. } => {
                    let op = if signed { "sitofp" } else { "uitofp" };
                    let t = self.new_temp();
                    let from = self.c.types.llvm_ty(v.ty);
                    let to = self.c.types.llvm_ty(dst);
                    let text = self.val(&v);
                    self.write(&format!("  %t{t} = {op} {from} {text} to {to}\n"));
                    Value::temp(dst, t)
                }
                TypeKind::Bool => {
                    let widened = self.cast_to(U8, v);
                    self.cast_to(dst, widened)
                }
                _ => {
                    self.type_mismatch(dst, v.ty);
                    Value::rvalue(dst, ValueKind::Float("0.0"))
                }
            },

            _ => {
                self.type_mismatch(dst, v.ty);
                Value::int(dst, 0)
            }
        }
    }

    /// Whole-struct assignment: a byte-wise copy between the two storage
    /// addresses via libc memcpy. Both sides must be struct lvalues of
    /// equal size.
    pub fn emit_struct_copy(&mut self, dst: Value<'u>, src: Value<'u>) {
        if !dst.is_lvalue || !src.is_lvalue {
            self.error_generic("Unsupported struct copy (non-lvalue)");
            return;
        }
        let (TypeKind::Struct(dst_sid), TypeKind::Struct(src_sid)) =
            (self.c.types.kind(dst.ty), self.c.types.kind(src.ty))
        else {
            self.error_generic("Unsupported struct copy (non-struct)");
            return;
        };
        let dst_size = self.c.structs[dst_sid.0 as usize].size;
        let src_size = self.c.structs[src_sid.0 as usize].size;
        if dst_size != src_size {
            self.error_generic("Unsupported struct copy (size mismatch)");
            return;
        }

        let mut dst_ptr = dst;
        dst_ptr.is_lvalue = false;
        let mut src_ptr = src;
        src_ptr.is_lvalue = false;
        let dst_text = self.val(&dst_ptr);
        let src_text = self.val(&src_ptr);
        self.write(&format!(
            "  call ptr @memcpy(ptr {dst_text}, ptr {src_text}, i64 {dst_size})\n"
        ));
    }

    /// Addresses a string constant: GEP to its first byte.
    fn str_gep(&mut self, id: StrId) -> Value<'u> {
        let len = self.c.strings[id.0 as usize].bytes.len();
        let t = self.new_temp();
        self.write(&format!(
            "  %t{t} = getelementptr inbounds [{len} x i8], ptr @.str{}, i64 0, i64 0\n",
            id.0
        ));
        let ty = self.c.types.pointer_to(U8, true);
        Value::temp(ty, t)
    }

    fn const_value(&mut self, def_index: usize) -> Value<'u> {
        let def = &self.c.consts[def_index];
        let (ty, payload) = (def.ty, def.payload);
        match payload {
            ConstPayload::Int(value) => Value::int(ty, value),
            ConstPayload::Float(text) => Value::rvalue(ty, ValueKind::Float(text)),
            ConstPayload::Str(id) => self.str_gep(id),
        }
    }

    /// Resolution for an identifier in a function body: local, parameter,
    /// module constants, imported constants (ambiguity is an error), module
    /// functions, imported functions, the synthetic builtins, host
    /// constants, then module qualification.
    fn resolve_ident(&mut self, name: &'u str, tok_index: usize) -> Value<'u> {
        if let Some(local) = self.find_local(name) {
            return Value {
                ty: local.ty,
                kind: ValueKind::Local(local.slot),
                is_lvalue: true,
                assignable: true,
            };
        }

        let func = &self.c.funcs[self.fid.0 as usize];
        if let Some(index) = func.params.iter().position(|p| p.name == name) {
            return Value::rvalue(func.params[index].ty, ValueKind::Param(index as u32));
        }
        let module = func.module;

        if let Some(cid) = self.c.find_const_in(module, name) {
            return self.const_value(cid.0 as usize);
        }
        match self.c.lookup_imported_const(module, name) {
            Ok(Some(cid)) => return self.const_value(cid.0 as usize),
            Ok(None) => {}
            Err((a, b)) => {
                let first = self.c.unit.module(self.c.consts[a.0 as usize].module).name.clone();
                let second = self.c.unit.module(self.c.consts[b.0 as usize].module).name.clone();
                let tok = self.c.toks[tok_index];
                self.error_at_tok(
                    tok_index,
                    CompileError::new_rule_error(
                        format!(
                            "Ambiguous reference: `{name}` is defined in both `{first}` and `{second}`"
                        ),
                        self.c.locate_token(&tok),
                    ),
                );
                let cid = a;
                return self.const_value(cid.0 as usize);
            }
        }

        if let Some(fid) = self.c.find_func_in(module, name) {
            return Value::rvalue(VOID, ValueKind::Func(Callee::User(fid)));
        }
        match self.c.lookup_imported_func(module, name) {
            Ok(Some(fid)) => {
                return Value::rvalue(VOID, ValueKind::Func(Callee::User(fid)));
            }
            Ok(None) => {}
            Err((a, b)) => {
                let first = self.c.unit.module(self.c.funcs[a.0 as usize].module).name.clone();
                let second = self.c.unit.module(self.c.funcs[b.0 as usize].module).name.clone();
                let tok = self.c.toks[tok_index];
                self.error_at_tok(
                    tok_index,
                    CompileError::new_rule_error(
                        format!(
                            "Ambiguous reference: `{name}` is defined in both `{first}` and `{second}`"
                        ),
                        self.c.locate_token(&tok),
                    ),
                );
                return Value::rvalue(VOID, ValueKind::Func(Callee::User(a)));
            }
        }

        // Implicitly-declared builtins, synthesized on demand.
        if name == "calloc" {
            return Value::rvalue(VOID, ValueKind::Func(Callee::Calloc));
        }
        if name == "memcpy" {
            return Value::rvalue(VOID, ValueKind::Func(Callee::Memcpy));
        }

        if let Some((ty, value)) = builtin_const(name) {
            return Value::int(ty, value);
        }

        // Module qualification: the first segment of an imported module.
        for &import in &self.c.unit.module(module).imports {
            let import_name = &self.c.unit.module(import).name;
            let first_segment = import_name.split('.').next().unwrap_or("");
            if first_segment == name {
                if let Some(mid) = self.c.unit.module_named(name) {
                    return Value::rvalue(VOID, ValueKind::Module(mid));
                }
            }
        }

        let tok = self.c.toks[tok_index];
        self.error_at_tok(
            tok_index,
            CompileError::new_rule_error(
                format!("Unknown identifier `{name}`"),
                self.c.locate_token(&tok),
            ),
        );
        Value::int(I32, 0)
    }

    /// One `.<name>` step off a module value: a constant or function from
    /// the module, or a traversal into a submodule.
    fn module_member(&mut self, mid: ModuleId, name: &'u str, tok_index: usize) -> Value<'u> {
        if let Some(cid) = self.c.find_const_in(mid, name) {
            return self.const_value(cid.0 as usize);
        }
        if let Some(fid) = self.c.find_func_in(mid, name) {
            return Value::rvalue(VOID, ValueKind::Func(Callee::User(fid)));
        }
        let qualified = format!("{}.{name}", self.c.unit.module(mid).name);
        if let Some(sub) = self.c.unit.module_named(&qualified) {
            return Value::rvalue(VOID, ValueKind::Module(sub));
        }

        let module_name = self.c.unit.module(mid).name.clone();
        let tok = self.c.toks[tok_index];
        self.error_at_tok(
            tok_index,
            CompileError::new_rule_error(
                format!("Module `{module_name}` has no member `{name}`"),
                self.c.locate_token(&tok),
            ),
        );
        Value::int(I32, 0)
    }

    pub fn parse_primary(&mut self, io_i: &mut usize) -> Value<'u> {
        let i = *io_i;
        let tok = self.c.toks[i];
        match tok.kind {
            TokenKind::Int => {
                *io_i = i + 1;
                Value::int(I64, parse_uint_lit(self.c.tok_text(&tok)))
            }
            TokenKind::Float => {
                *io_i = i + 1;
                Value::rvalue(F64, ValueKind::Float(self.c.tok_text(&tok)))
            }
            TokenKind::Str => {
                *io_i = i + 1;
                let text = self.c.tok_text(&tok);
                match unescape_string(text) {
                    Some(bytes) => {
                        let id = self.c.new_str_const(bytes);
                        self.str_gep(id)
                    }
                    None => {
                        self.error_at_tok(
                            i,
                            CompileError::new_syntax_error(
                                "Invalid string literal",
                                self.c.locate_token(&tok),
                            ),
                        );
                        let ty = self.c.types.pointer_to(U8, true);
                        Value::rvalue(ty, ValueKind::Null)
                    }
                }
            }
            TokenKind::Char => {
                *io_i = i + 1;
                match unescape_char(self.c.tok_text(&tok)) {
                    Some(byte) => Value::int(U8, byte as u64),
                    None => {
                        self.error_at_tok(
                            i,
                            CompileError::new_syntax_error(
                                "Invalid char literal",
                                self.c.locate_token(&tok),
                            ),
                        );
                        Value::int(U8, 0)
                    }
                }
            }
            TokenKind::Null => {
                *io_i = i + 1;
                let ty = self.c.types.pointer_to(VOID, true);
                Value::rvalue(ty, ValueKind::Null)
            }
            TokenKind::True | TokenKind::False => {
                *io_i = i + 1;
                Value::int(BOOL, (tok.kind == TokenKind::True) as u64)
            }
            TokenKind::LParen => {
                let mut i = i + 1;
                let value = self.parse_expr(&mut i, 1);
                if self.c.toks[i].kind == TokenKind::RParen {
                    i += 1;
                }
                *io_i = i;
                value
            }
            TokenKind::Ident => {
                *io_i = i + 1;
                let name = self.c.tok_text(&tok);
                self.resolve_ident(name, i)
            }
            _ => {
                self.error_at_tok(
                    i,
                    CompileError::new_syntax_error(
                        "Expected an expression",
                        self.c.locate_token(&tok),
                    ),
                );
                // Never step past EOF; every caller stops on it.
                *io_i = if tok.kind == TokenKind::Eof { i } else { i + 1 };
                Value::int(I32, 0)
            }
        }
    }

    pub fn parse_postfix(&mut self, io_i: &mut usize, mut base: Value<'u>) -> Value<'u> {
        let mut i = *io_i;
        loop {
            match self.c.toks[i].kind {
                TokenKind::LParen => {
                    let ValueKind::Func(callee) = base.kind else {
                        break;
                    };
                    base = self.compile_call(&mut i, callee);
                }
                TokenKind::LBracket => {
                    base = self.compile_index(&mut i, base);
                }
                TokenKind::Dot => {
                    let dot_i = i;
                    i += 1;
                    if self.c.toks[i].kind != TokenKind::Ident {
                        let tok = self.c.toks[dot_i];
                        self.error_at_tok(
                            dot_i,
                            CompileError::new_syntax_error(
                                "Expected a field name after `.`",
                                self.c.locate_token(&tok),
                            ),
                        );
                        base = Value::int(I32, 0);
                        continue;
                    }
                    let name = self.c.tok_text(&self.c.toks[i]);
                    let name_i = i;
                    i += 1;

                    if let ValueKind::Module(mid) = base.kind {
                        base = self.module_member(mid, name, name_i);
                        continue;
                    }

                    // Field access requires a struct lvalue; the result's
                    // assignability is inherited from the base.
                    let TypeKind::Struct(sid) = self.c.types.kind(base.ty) else {
                        let tok = self.c.toks[dot_i];
                        self.error_at_tok(
                            dot_i,
                            CompileError::new_type_error(
                                "Field access requires a struct lvalue",
                                self.c.locate_token(&tok),
                            ),
                        );
                        base = Value::int(I32, 0);
                        continue;
                    };
                    if !base.is_lvalue {
                        let tok = self.c.toks[dot_i];
                        self.error_at_tok(
                            dot_i,
                            CompileError::new_type_error(
                                "Field access requires a struct lvalue",
                                self.c.locate_token(&tok),
                            ),
                        );
                        base = Value::int(I32, 0);
                        continue;
                    }
                    let Some(field) = self.c.structs[sid.0 as usize].field(name) else {
                        let tok = self.c.toks[dot_i];
                        let struct_name = self.c.structs[sid.0 as usize].name;
                        self.error_at_tok(
                            dot_i,
                            CompileError::new_type_error(
                                format!("Unknown field `{name}` on struct `{struct_name}`"),
                                self.c.locate_token(&tok),
                            ),
                        );
                        base = Value::int(I32, 0);
                        continue;
                    };
                    let field_ty = field.ty;
                    let offset = field.offset;
                    let t = self.new_temp();
                    let mut ptr = base;
                    ptr.is_lvalue = false;
                    let ptr_text = self.val(&ptr);
                    self.write(&format!(
                        "  %t{t} = getelementptr inbounds i8, ptr {ptr_text}, i64 {offset}\n"
                    ));
                    base = Value {
                        ty: field_ty,
                        kind: ValueKind::Temp(t),
                        is_lvalue: true,
                        assignable: base.assignable,
                    };
                }
                _ => break,
            }
        }
        *io_i = i;
        base
    }

    fn compile_call(&mut self, io_i: &mut usize, callee: Callee) -> Value<'u> {
        let mut i = *io_i;
        let call_i = i;
        i += 1; // '('

        let mut args: Vec<Value<'u>> = Vec::new();
        if self.c.toks[i].kind != TokenKind::RParen {
            loop {
                let arg = self.parse_expr(&mut i, 1);
                if args.len() >= MAX_CALL_ARGS {
                    let tok = self.c.toks[call_i];
                    self.error_at_tok(
                        call_i,
                        CompileError::new_rule_error(
                            "Too many call arguments",
                            self.c.locate_token(&tok),
                        ),
                    );
                    break;
                }
                let arg = self.load_if_needed(arg);
                args.push(arg);
                if self.c.toks[i].kind == TokenKind::Comma {
                    i += 1;
                    continue;
                }
                break;
            }
        }
        if self.c.toks[i].kind == TokenKind::RParen {
            i += 1;
        }
        *io_i = i;

        // Call-graph edges for the `noalloc` analysis. A direct call to a
        // known allocator marks the caller; the synthetic builtins have no
        // ids and never enter the graph.
        let source_name = self.callee_source_name(callee);
        if is_known_alloc_fn(source_name) {
            if !self.discard {
                self.c.funcs[self.fid.0 as usize].direct_alloc = true;
            }
        } else if let Callee::User(fid) = callee {
            self.record_call(fid);
        }

        let ret = match callee {
            Callee::User(fid) => self.c.funcs[fid.0 as usize].ret,
            Callee::Calloc | Callee::Memcpy => self.c.types.pointer_to(VOID, true),
        };

        // Arity checks.
        let (param_count, is_varargs) = match callee {
            Callee::User(fid) => {
                let func = &self.c.funcs[fid.0 as usize];
                (func.params.len(), func.is_varargs)
            }
            Callee::Calloc => (2, false),
            Callee::Memcpy => (3, false),
        };
        let arity_ok = if is_varargs {
            let min_args = if source_name == "printf" { 1 } else { param_count };
            args.len() >= min_args
        } else {
            args.len() == param_count
        };
        if !arity_ok {
            let tok = self.c.toks[call_i];
            let expected = if is_varargs {
                format!("at least {}", if source_name == "printf" { 1 } else { param_count })
            } else {
                param_count.to_string()
            };
            self.error_at_tok(
                call_i,
                CompileError::new_rule_error(
                    format!(
                        "Call arity mismatch: expected {expected} args, got {}",
                        args.len()
                    ),
                    self.c.locate_token(&tok),
                ),
            );
            return self.zero_value(ret);
        }

        // Cast the fixed arguments to the declared (or builtin) signature.
        match callee {
            Callee::User(fid) => {
                for index in 0..args.len().min(param_count) {
                    let param_ty = self.c.funcs[fid.0 as usize].params[index].ty;
                    args[index] = self.cast_to(param_ty, args[index]);
                }
            }
            Callee::Calloc => {
                for arg in args.iter_mut().take(2) {
                    *arg = self.cast_to(I64, *arg);
                }
            }
            Callee::Memcpy => {
                let void_ptr = self.c.types.pointer_to(VOID, false);
                for (index, arg) in args.iter_mut().enumerate().take(3) {
                    *arg = if index < 2 {
                        self.cast_to(void_ptr, *arg)
                    } else {
                        self.cast_to(I64, *arg)
                    };
                }
            }
        }

        let ret_ty = self.c.types.llvm_ty(ret);
        let ir_name = self.callee_ir_name(callee);
        let mut line = String::from("  ");
        let t = if ret != VOID {
            let t = self.new_temp();
            line.push_str(&format!("%t{t} = "));
            Some(t)
        } else {
            None
        };

        if is_varargs {
            if source_name == "printf" {
                line.push_str(&format!("call {ret_ty} (ptr, ...) @{ir_name}("));
            } else {
                let Callee::User(fid) = callee else { unreachable!() };
                let mut proto = String::new();
                for (index, param) in self.c.funcs[fid.0 as usize].params.iter().enumerate() {
                    if index > 0 {
                        proto.push_str(", ");
                    }
                    proto.push_str(self.c.types.llvm_ty(param.ty));
                }
                if param_count > 0 {
                    proto.push_str(", ");
                }
                proto.push_str("...");
                line.push_str(&format!("call {ret_ty} ({proto}) @{ir_name}("));
            }
        } else {
            line.push_str(&format!("call {ret_ty} @{ir_name}("));
        }

        for (index, arg) in args.iter().enumerate() {
            if index > 0 {
                line.push_str(", ");
            }
            line.push_str(&format!("{} {}", self.c.types.llvm_ty(arg.ty), self.val(arg)));
        }
        line.push_str(")\n");
        self.write(&line);

        match t {
            Some(t) => Value::temp(ret, t),
            None => Value::int(ret, 0),
        }
    }

    fn compile_index(&mut self, io_i: &mut usize, base: Value<'u>) -> Value<'u> {
        let mut i = *io_i;
        let bracket_i = i;
        i += 1; // '['
        let index = self.parse_expr(&mut i, 1);
        let index = self.cast_to(I64, index);
        if self.c.toks[i].kind == TokenKind::RBracket {
            i += 1;
        }
        *io_i = i;

        let TypeKind::Pointer { pointee, mutable } = self.c.types.kind(base.ty) else {
            let tok = self.c.toks[bracket_i];
            self.error_at_tok(
                bracket_i,
                CompileError::new_type_error(
                    "Indexing requires a pointer or slice type",
                    self.c.locate_token(&tok),
                ),
            );
            return Value::int(I32, 0);
        };
        let elem = if pointee == VOID { U8 } else { pointee };
        let ptr = self.load_if_needed(base);

        // Fast path: `p[0]` is just `*p`, no GEP needed.
        if let ValueKind::Int(0) = index.kind {
            return Value {
                ty: elem,
                kind: ptr.kind,
                is_lvalue: true,
                assignable: mutable,
            };
        }

        if let TypeKind::Struct(sid) = self.c.types.kind(elem) {
            // Struct elements are byte-addressed: scale by the struct size
            // explicitly, otherwise the GEP would scale by pointer size
            // (struct values spell as `ptr`).
            let size = self.c.structs[sid.0 as usize].size;
            let scaled = self.new_temp();
            let index_text = self.val(&index);
            self.write(&format!("  %t{scaled} = mul i64 {index_text}, {size}\n"));

            let t = self.new_temp();
            let ptr_text = self.val(&ptr);
            self.write(&format!(
                "  %t{t} = getelementptr inbounds i8, ptr {ptr_text}, i64 %t{scaled}\n"
            ));
            return Value {
                ty: elem,
                kind: ValueKind::Temp(t),
                is_lvalue: true,
                assignable: mutable,
            };
        }

        let t = self.new_temp();
        let elem_ty = self.c.types.llvm_ty(elem);
        let ptr_text = self.val(&ptr);
        let index_text = self.val(&index);
        self.write(&format!(
            "  %t{t} = getelementptr inbounds {elem_ty}, ptr {ptr_text}, i64 {index_text}\n"
        ));
        Value {
            ty: elem,
            kind: ValueKind::Temp(t),
            is_lvalue: true,
            assignable: mutable,
        }
    }

    pub fn parse_unary(&mut self, io_i: &mut usize) -> Value<'u> {
        let mut i = *io_i;
        match self.c.toks[i].kind {
            TokenKind::Minus => {
                i += 1;
                let v = self.parse_unary(&mut i);
                let v = self.load_if_needed(v);
                let t = self.new_temp();
                let ty = self.c.types.llvm_ty(v.ty);
                let text = self.val(&v);
                if matches!(self.c.types.kind(v.ty), TypeKind::Float { .. }) {
                    // Contraction only (fmul+fadd -> fma), not full fast-math.
                    self.write(&format!("  %t{t} = fneg contract {ty} {text}\n"));
                } else {
                    self.write(&format!("  %t{t} = sub {ty} 0, {text}\n"));
                }
                *io_i = i;
                Value::temp(v.ty, t)
            }
            TokenKind::Amp => {
                i += 1;
                let lv = self.parse_lvalue(&mut i);
                *io_i = i;
                // Address-of yields a pointer rvalue whose mutability is the
                // source lvalue's assignability.
                let ty = self.c.types.pointer_to(lv.ty, lv.assignable);
                Value::rvalue(ty, lv.kind)
            }
            TokenKind::Star => {
                i += 1;
                let pv = self.parse_unary(&mut i);
                let pv = self.load_if_needed(pv);
                let TypeKind::Pointer { pointee, mutable } = self.c.types.kind(pv.ty) else {
                    let tok = self.c.toks[i.saturating_sub(1)];
                    self.error_at_tok(
                        i - 1,
                        CompileError::new_type_error(
                            "Dereference requires a pointer type",
                            self.c.locate_token(&tok),
                        ),
                    );
                    *io_i = i;
                    return Value::int(I32, 0);
                };
                let elem = if pointee == VOID { U8 } else { pointee };
                *io_i = i;
                Value {
                    ty: elem,
                    kind: pv.kind,
                    is_lvalue: true,
                    assignable: mutable,
                }
            }
            TokenKind::Not => {
                i += 1;
                let v = self.parse_unary(&mut i);
                let v = self.cast_to(BOOL, v);
                let t = self.new_temp();
                let text = self.val(&v);
                self.write(&format!("  %t{t} = xor i1 {text}, true\n"));
                *io_i = i;
                Value::temp(BOOL, t)
            }
            _ => {
                let base = self.parse_primary(&mut i);
                let base = self.parse_postfix(&mut i, base);
                *io_i = i;
                base
            }
        }
    }

    pub fn parse_lvalue(&mut self, io_i: &mut usize) -> Value<'u> {
        let start = *io_i;
        let mut i = *io_i;
        let v = self.parse_unary(&mut i);
        if !v.is_lvalue {
            let tok = self.c.toks[start];
            self.error_at_tok(
                start,
                CompileError::new_type_error(
                    "Expected an assignable lvalue",
                    self.c.locate_token(&tok),
                ),
            );
            *io_i = i;
            return Value::int(I32, 0);
        }
        *io_i = i;
        v
    }

    pub fn parse_expr(&mut self, io_i: &mut usize, min_prec: i32) -> Value<'u> {
        let mut i = *io_i;
        let mut lhs = self.parse_unary(&mut i);
        loop {
            let mut op = self.c.toks[i].kind;
            let mut consumed = 1usize;
            // `is not` is canonicalized to `!=`
            if op == TokenKind::Is
                && self.c.toks.get(i + 1).map(|t| t.kind) == Some(TokenKind::Not)
            {
                op = TokenKind::NotEq;
                consumed = 2;
            }
            let prec = tok_prec(op);
            if prec < min_prec || prec == 0 {
                break;
            }
            i += consumed;
            let rhs = self.parse_expr(&mut i, prec + 1);
            lhs = self.emit_binop(op, lhs, rhs);
        }
        *io_i = i;
        lhs
    }

    pub fn emit_binop(&mut self, op: TokenKind, a: Value<'u>, b: Value<'u>) -> Value<'u> {
        let a = self.load_if_needed(a);
        let b = self.load_if_needed(b);

        // Pointer equality.
        if matches!(op, TokenKind::EqEq | TokenKind::NotEq | TokenKind::Is)
            && self.c.types.is_pointer(a.ty)
            && self.c.types.is_pointer(b.ty)
        {
            let t = self.new_temp();
            let pred = if op == TokenKind::NotEq { "ne" } else { "eq" };
            let a_text = self.val(&a);
            let b_text = self.val(&b);
            self.write(&format!("  %t{t} = icmp {pred} ptr {a_text}, {b_text}\n"));
            return Value::temp(BOOL, t);
        }

        // Numeric promotion: floats promote to the wider operand; integer
        // pairs widen to the wider bit-width with the left operand's
        // signedness.
        let a_kind = self.c.types.kind(a.ty);
        let b_kind = self.c.types.kind(b.ty);
        let (a, b) = match (a_kind, b_kind) {
            (TypeKind::Float { bits: ab }, TypeKind::Float { bits: bb }) => {
                let target = self.c.types.float(ab.max(bb));
                (self.cast_to(target, a), self.cast_to(target, b))
            }
            (TypeKind::Float { bits }, TypeKind::Int { .. }) => {
                let target = self.c.types.float(bits);
                (a, self.cast_to(target, b))
            }
            (TypeKind::Int { .. }, TypeKind::Float { bits }) => {
                let target = self.c.types.float(bits);
                (self.cast_to(target, a), b)
            }
            (
                TypeKind::Int { bits: ab, signed },
                TypeKind::Int { bits: bb, .. },
            ) => {
                let target = self.c.types.int(ab.max(bb), signed);
                (self.cast_to(target, a), self.cast_to(target, b))
            }
            _ => (a, b),
        };

        let a_ty = self.c.types.llvm_ty(a.ty);

        if matches!(
            op,
            TokenKind::Plus | TokenKind::Minus | TokenKind::Star | TokenKind::Slash
        ) {
            // Pointer difference: byte distance divided by the element
            // size, in units of the pointee; the result is a signed size.
            if op == TokenKind::Minus
                && self.c.types.is_pointer(a.ty)
                && self.c.types.is_pointer(b.ty)
            {
                let a_elem = self.c.types.pointee(a.ty).unwrap_or(U8);
                let b_elem = self.c.types.pointee(b.ty).unwrap_or(U8);
                let a_elem = if a_elem == VOID { U8 } else { a_elem };
                let b_elem = if b_elem == VOID { U8 } else { b_elem };
                if a_elem != b_elem {
                    self.error_generic("Pointer subtraction requires matching element types");
                    return Value::int(I64, 0);
                }
                let elem_size = self.c.types.size(a_elem, &self.c.structs).max(1);

                let ta = self.new_temp();
                let a_text = self.val(&a);
                self.write(&format!("  %t{ta} = ptrtoint ptr {a_text} to i64\n"));
                let tb = self.new_temp();
                let b_text = self.val(&b);
                self.write(&format!("  %t{tb} = ptrtoint ptr {b_text} to i64\n"));
                let td = self.new_temp();
                self.write(&format!("  %t{td} = sub i64 %t{ta}, %t{tb}\n"));

                if elem_size == 1 {
                    return Value::temp(I64, td);
                }
                let te = self.new_temp();
                self.write(&format!("  %t{te} = sdiv i64 %t{td}, {elem_size}\n"));
                return Value::temp(I64, te);
            }

            // Pointer arithmetic: element-indexed in units of the pointee.
            if matches!(op, TokenKind::Plus | TokenKind::Minus)
                && self.c.types.is_pointer(a.ty)
                && matches!(self.c.types.kind(b.ty), TypeKind::Int { .. })
            {
                let pointee = self.c.types.pointee(a.ty).unwrap_or(U8);
                let elem = if pointee == VOID { U8 } else { pointee };
                let mut index = self.cast_to(I64, b);
                if op == TokenKind::Minus {
                    // ptr - n == ptr + (-n)
                    let negated = self.new_temp();
                    let index_text = self.val(&index);
                    self.write(&format!("  %t{negated} = sub i64 0, {index_text}\n"));
                    index = Value::temp(I64, negated);
                }
                let t = self.new_temp();
                let elem_ty = self.c.types.llvm_ty(elem);
                let a_text = self.val(&a);
                let index_text = self.val(&index);
                self.write(&format!(
                    "  %t{t} = getelementptr inbounds {elem_ty}, ptr {a_text}, i64 {index_text}\n"
                ));
                return Value::temp(a.ty, t);
            }

            let is_float = matches!(self.c.types.kind(a.ty), TypeKind::Float { .. });
            let op_str = if is_float {
                match op {
                    TokenKind::Plus => "fadd",
                    TokenKind::Minus => "fsub",
                    TokenKind::Star => "fmul",
                    _ => "fdiv",
                }
            } else {
                let signed = matches!(self.c.types.kind(a.ty), TypeKind::Int { signed: true, .. });
                match op {
                    TokenKind::Plus => "add",
                    TokenKind::Minus => "sub",
                    TokenKind::Star => "mul",
                    _ => {
                        if signed {
                            "sdiv"
                        } else {
                            "udiv"
                        }
                    }
                }
            };
            let t = self.new_temp();
            let a_text = self.val(&a);
            let b_text = self.val(&b);
            if is_float {
                // The "contract" flag only; no reassociation, no nnan.
                self.write(&format!(
                    "  %t{t} = {op_str} contract {a_ty} {a_text}, {b_text}\n"
                ));
            } else {
                self.write(&format!("  %t{t} = {op_str} {a_ty} {a_text}, {b_text}\n"));
            }
            return Value::temp(a.ty, t);
        }

        if matches!(op, TokenKind::Shl | TokenKind::Shr) {
            let signed = matches!(self.c.types.kind(a.ty), TypeKind::Int { signed: true, .. });
            let op_str = if op == TokenKind::Shl {
                "shl"
            } else if signed {
                "ashr"
            } else {
                "lshr"
            };
            let b = self.cast_to(a.ty, b);
            let t = self.new_temp();
            let a_text = self.val(&a);
            let b_text = self.val(&b);
            self.write(&format!("  %t{t} = {op_str} {a_ty} {a_text}, {b_text}\n"));
            return Value::temp(a.ty, t);
        }

        if matches!(op, TokenKind::Amp | TokenKind::Bar | TokenKind::Caret) {
            let op_str = match op {
                TokenKind::Amp => "and",
                TokenKind::Bar => "or",
                _ => "xor",
            };
            let t = self.new_temp();
            let a_text = self.val(&a);
            let b_text = self.val(&b);
            self.write(&format!("  %t{t} = {op_str} {a_ty} {a_text}, {b_text}\n"));
            return Value::temp(a.ty, t);
        }

        if matches!(
            op,
            TokenKind::Lt
                | TokenKind::LtEq
                | TokenKind::Gt
                | TokenKind::GtEq
                | TokenKind::EqEq
                | TokenKind::NotEq
                | TokenKind::Is
        ) {
            let t = self.new_temp();
            let a_text = self.val(&a);
            let b_text = self.val(&b);
            if matches!(self.c.types.kind(a.ty), TypeKind::Float { .. }) {
                // Ordered float predicates.
                let pred = match op {
                    TokenKind::NotEq => "one",
                    TokenKind::Lt => "olt",
                    TokenKind::LtEq => "ole",
                    TokenKind::Gt => "ogt",
                    TokenKind::GtEq => "oge",
                    _ => "oeq",
                };
                self.write(&format!("  %t{t} = fcmp {pred} {a_ty} {a_text}, {b_text}\n"));
            } else {
                let signed = matches!(self.c.types.kind(a.ty), TypeKind::Int { signed: true, .. });
                let pred = match op {
                    TokenKind::NotEq => "ne",
                    TokenKind::Lt => {
                        if signed { "slt" } else { "ult" }
                    }
                    TokenKind::LtEq => {
                        if signed { "sle" } else { "ule" }
                    }
                    TokenKind::Gt => {
                        if signed { "sgt" } else { "ugt" }
                    }
                    TokenKind::GtEq => {
                        if signed { "sge" } else { "uge" }
                    }
                    _ => "eq",
                };
                self.write(&format!("  %t{t} = icmp {pred} {a_ty} {a_text}, {b_text}\n"));
            }
            return Value::temp(BOOL, t);
        }

        // Boolean operators in value context (short-circuit emission only
        // applies inside conditions).
        let a = self.cast_to(BOOL, a);
        let b = self.cast_to(BOOL, b);
        let op_str = if op == TokenKind::And { "and" } else { "or" };
        let t = self.new_temp();
        let a_text = self.val(&a);
        let b_text = self.val(&b);
        self.write(&format!("  %t{t} = {op_str} i1 {a_text}, {b_text}\n"));
        Value::temp(BOOL, t)
    }
}
