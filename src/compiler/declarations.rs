//! Top-level declaration parsing.
//!
//! Operates directly on the tagged token stream with a cursor. The four
//! top-level forms (`const`, `struct`, `extern def`, `[noalloc] def`) may
//! appear in any order within a module. Function bodies are *not* parsed
//! here — only their token range is captured (balanced on INDENT/DEDENT)
//! for the code generator's single pass.

use crate::compiler::Compiler;
use crate::compiler::builtins::is_varargs_name;
use crate::compiler::compiler_errors::CompileError;
use crate::compiler::datatypes::{
    FieldDef, StructDef, TypeId, layout_fields, primitive_by_name, U8, VOID,
};
use crate::compiler::resolver::{ModuleId, ModuleKind};
use crate::compiler::tokenizer::tokens::{Token, TokenKind};
use crate::return_syntax_error;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrId(pub u32);

/// A string constant's bytes, NUL-terminated, with a stable emission id.
#[derive(Debug)]
pub struct StrConst {
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub enum ConstPayload<'u> {
    Int(u64),
    /// Float constants keep their lexical text and are emitted verbatim.
    Float(&'u str),
    Str(StrId),
}

#[derive(Debug)]
pub struct ConstDef<'u> {
    pub name: &'u str,
    pub module: ModuleId,
    pub ty: TypeId,
    pub payload: ConstPayload<'u>,
}

#[derive(Debug, Clone)]
pub struct ParamDef<'u> {
    pub name: &'u str,
    pub ty: TypeId,
}

#[derive(Debug)]
pub struct FuncDef<'u> {
    pub id: FuncId,
    pub name: &'u str,
    pub module: ModuleId,
    /// The symbol emitted in the target dialect: `main` for the entry
    /// module's `main`, the bare name for externs, a mangled name otherwise.
    pub ir_name: String,
    pub ret: TypeId,
    pub params: Vec<ParamDef<'u>>,
    pub is_extern: bool,
    pub is_varargs: bool,
    pub is_noalloc: bool,
    /// Set during codegen when the body directly calls a known allocator.
    pub direct_alloc: bool,
    /// Unique callee ids recorded during codegen.
    pub callees: Vec<FuncId>,
    /// Token index of the declaration start, for diagnostics.
    pub decl_tok: usize,
    /// Body token range (start inclusive, end exclusive of the closing
    /// DEDENT); `None` for externs.
    pub body: Option<(usize, usize)>,
}

/// Maps a module's dotted name into the flat symbol namespace:
/// `aster_<module>__<name>` with non-identifier characters as underscores.
pub fn mangle_ir_name(module_name: &str, fn_name: &str) -> String {
    let mangled: String = module_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("aster_{mangled}__{fn_name}")
}

pub fn parse_uint_lit(text: &str) -> u64 {
    let (digits, base) = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (text, 10),
    };
    let mut acc: u64 = 0;
    for c in digits.chars() {
        let value = match c.to_digit(base) {
            Some(value) => value as u64,
            None => break,
        };
        acc = acc.wrapping_mul(base as u64).wrapping_add(value);
    }
    acc
}

/// Unescapes a quoted string token (quotes included) into NUL-terminated
/// bytes. Unknown escapes keep the escaped character.
pub fn unescape_string(text: &str) -> Option<Vec<u8>> {
    let inner = text.strip_prefix('"')?.strip_suffix('"')?;
    let mut bytes = Vec::with_capacity(inner.len() + 1);
    let mut chars = inner.bytes();
    while let Some(b) = chars.next() {
        if b == b'\\' {
            match chars.next() {
                Some(b'n') => bytes.push(10),
                Some(b'r') => bytes.push(13),
                Some(b't') => bytes.push(9),
                Some(other) => bytes.push(other),
                None => bytes.push(b'\\'),
            }
        } else {
            bytes.push(b);
        }
    }
    bytes.push(0);
    Some(bytes)
}

/// Unescapes a char token (quotes included) to a single byte.
pub fn unescape_char(text: &str) -> Option<u8> {
    let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
    let bytes = inner.as_bytes();
    match bytes {
        [b'\\', b'n'] => Some(10),
        [b'\\', b'r'] => Some(13),
        [b'\\', b't'] => Some(9),
        [b'\\', other] => Some(*other),
        [single] => Some(*single),
        _ => None,
    }
}

/// Parses a type at `*io_i`, advancing past it on success.
///
/// `Type := '(' ')' | 'slice' 'of' Type | 'ptr' 'of' Type | 'ref' Type
///        | 'mut' 'ref' Type | <prim> | <struct-name>`
///
/// The legacy `ptr of`/`slice of` forms produce mutable pointers; `ref` is
/// immutable unless prefixed with `mut`.
pub fn parse_type_at<'u>(c: &mut Compiler<'u>, io_i: &mut usize) -> Option<TypeId> {
    let mut i = *io_i;
    if i >= c.toks.len() {
        return None;
    }
    let tok = c.toks[i];
    match tok.kind {
        TokenKind::LParen => {
            if c.toks.get(i + 1).map(|t| t.kind) == Some(TokenKind::RParen) {
                *io_i = i + 2;
                return Some(VOID);
            }
            None
        }
        TokenKind::Slice | TokenKind::Ptr => {
            i += 1;
            if c.toks.get(i).map(|t| t.kind) != Some(TokenKind::Of) {
                return None;
            }
            i += 1;
            let elem = parse_type_at(c, &mut i)?;
            *io_i = i;
            Some(c.types.pointer_to(elem, true))
        }
        TokenKind::Ref => {
            i += 1;
            let elem = parse_type_at(c, &mut i)?;
            *io_i = i;
            Some(c.types.pointer_to(elem, false))
        }
        TokenKind::Mut => {
            i += 1;
            if c.toks.get(i).map(|t| t.kind) != Some(TokenKind::Ref) {
                return None;
            }
            i += 1;
            let elem = parse_type_at(c, &mut i)?;
            *io_i = i;
            Some(c.types.pointer_to(elem, true))
        }
        TokenKind::Ident => {
            let name = c.tok_text(&tok);
            *io_i = i + 1;
            if let Some(primitive) = primitive_by_name(name) {
                return Some(primitive);
            }
            match name {
                "String" | "MutString" => return Some(c.types.pointer_to(U8, true)),
                "File" => return Some(c.types.pointer_to(VOID, false)),
                _ => {}
            }
            if let Some(sid) = c.find_struct(name) {
                return Some(c.types.struct_type(sid));
            }
            None
        }
        _ => None,
    }
}

/// Parses every top-level declaration in the unit, accumulating non-fatal
/// errors on the compiler and synchronizing to the next top-level form.
pub fn parse_declarations(c: &mut Compiler) {
    let mut parser = DeclParser { c, i: 0 };
    loop {
        parser.skip_newlines();
        let tok = parser.cur();
        let result = match tok.kind {
            TokenKind::Eof => break,
            TokenKind::Const => parser.parse_const_decl(),
            TokenKind::Extern => parser.parse_extern_decl(),
            TokenKind::Struct => parser.parse_struct_decl(),
            TokenKind::Def | TokenKind::Noalloc => parser.parse_def_decl(),
            _ => {
                let location = parser.c.locate_token(&tok);
                parser.i += 1;
                Err(CompileError::new_syntax_error(
                    "Expected a top-level declaration (const, struct, extern or def)",
                    location,
                ))
            }
        };
        if let Err(error) = result {
            parser.c.record_error(error);
            parser.synchronize();
        }
    }
}

struct DeclParser<'c, 'u> {
    c: &'c mut Compiler<'u>,
    i: usize,
}

impl<'c, 'u> DeclParser<'c, 'u> {
    fn cur(&self) -> Token {
        let last = self.c.toks.len() - 1;
        self.c.toks[self.i.min(last)]
    }

    fn accept(&mut self, kind: TokenKind) -> bool {
        if self.cur().kind == kind {
            self.i += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), CompileError> {
        let tok = self.cur();
        if tok.kind != kind {
            return_syntax_error!(
                format!("Expected {what}, found {:?}", tok.kind),
                self.c.locate_token(&tok),
                {
                    CompilationStage => "Declaration Parsing",
                }
            );
        }
        self.i += 1;
        Ok(())
    }

    fn skip_newlines(&mut self) {
        while self.cur().kind == TokenKind::Newline {
            self.i += 1;
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<(&'u str, Token), CompileError> {
        let tok = self.cur();
        if tok.kind != TokenKind::Ident {
            return_syntax_error!(
                format!("Expected {what}, found {:?}", tok.kind),
                self.c.locate_token(&tok),
                {
                    CompilationStage => "Declaration Parsing",
                }
            );
        }
        self.i += 1;
        Ok((self.c.tok_text(&tok), tok))
    }

    fn parse_type(&mut self) -> Result<TypeId, CompileError> {
        let mut i = self.i;
        match parse_type_at(self.c, &mut i) {
            Some(ty) => {
                self.i = i;
                Ok(ty)
            }
            None => {
                let tok = self.cur();
                Err(CompileError::new_syntax_error(
                    "Expected a type",
                    self.c.locate_token(&tok),
                ))
            }
        }
    }

    /// Rejects a second const or function with the same name in a module.
    fn check_duplicate(&mut self, name: &'u str, module: ModuleId, tok: &Token) {
        if self.c.find_const_in(module, name).is_some()
            || self.c.find_func_in(module, name).is_some()
        {
            let location = self.c.locate_token(tok);
            self.c.record_error(CompileError::new_rule_error(
                format!(
                    "Duplicate declaration of `{name}` in module `{}`",
                    self.c.unit.module(module).name
                ),
                location,
            ));
        }
    }

    fn parse_const_decl(&mut self) -> Result<(), CompileError> {
        let module = ModuleId(self.cur().module);
        self.expect(TokenKind::Const, "`const`")?;
        let (name, name_tok) = self.expect_ident("a constant name")?;
        self.expect(TokenKind::Is, "`is`")?;
        let ty = self.parse_type()?;
        self.expect(TokenKind::Eq, "`=`")?;

        let lit = self.cur();
        let payload = match lit.kind {
            TokenKind::Int => {
                self.i += 1;
                ConstPayload::Int(parse_uint_lit(self.c.tok_text(&lit)))
            }
            TokenKind::Float => {
                self.i += 1;
                ConstPayload::Float(self.c.tok_text(&lit))
            }
            TokenKind::Str => {
                self.i += 1;
                let text = self.c.tok_text(&lit);
                let Some(bytes) = unescape_string(text) else {
                    return_syntax_error!(
                        "Invalid string literal",
                        self.c.locate_token(&lit),
                        {
                            CompilationStage => "Declaration Parsing",
                        }
                    );
                };
                ConstPayload::Str(self.c.new_str_const(bytes))
            }
            TokenKind::Char => {
                self.i += 1;
                let Some(byte) = unescape_char(self.c.tok_text(&lit)) else {
                    return_syntax_error!(
                        "Invalid char literal",
                        self.c.locate_token(&lit),
                        {
                            CompilationStage => "Declaration Parsing",
                        }
                    );
                };
                ConstPayload::Int(byte as u64)
            }
            _ => {
                return_syntax_error!(
                    "Constants must be initialized with an int, float, string or char literal",
                    self.c.locate_token(&lit),
                    {
                        CompilationStage => "Declaration Parsing",
                    }
                );
            }
        };

        self.check_duplicate(name, module, &name_tok);
        self.c.consts.push(ConstDef {
            name,
            module,
            ty,
            payload,
        });
        self.accept(TokenKind::Newline);
        Ok(())
    }

    fn parse_struct_decl(&mut self) -> Result<(), CompileError> {
        self.expect(TokenKind::Struct, "`struct`")?;
        let (name, _) = self.expect_ident("a struct name")?;
        self.expect(TokenKind::Newline, "a newline")?;
        self.expect(TokenKind::Indent, "an indented field block")?;

        let mut fields: Vec<FieldDef<'u>> = Vec::with_capacity(8);
        loop {
            self.skip_newlines();
            let tok = self.cur();
            if tok.kind == TokenKind::Dedent || tok.kind == TokenKind::Eof {
                break;
            }
            self.expect(TokenKind::Var, "`var` to declare a field")?;
            let (field_name, _) = self.expect_ident("a field name")?;
            self.expect(TokenKind::Is, "`is`")?;
            let ty = self.parse_type()?;
            self.accept(TokenKind::Newline);
            fields.push(FieldDef {
                name: field_name,
                ty,
                offset: 0,
            });
        }
        self.expect(TokenKind::Dedent, "a dedent to close the struct")?;

        let (size, align) = layout_fields(&mut fields, &self.c.types, &self.c.structs);
        self.c.structs.push(StructDef {
            name,
            size,
            align,
            fields,
        });
        self.accept(TokenKind::Newline);
        Ok(())
    }

    fn parse_params(&mut self) -> Result<Vec<ParamDef<'u>>, CompileError> {
        self.expect(TokenKind::LParen, "`(`")?;
        let mut params = Vec::new();
        if self.cur().kind != TokenKind::RParen {
            loop {
                // `ptr` is allowed as a parameter name for source
                // compatibility with older code.
                let tok = self.cur();
                let name = match tok.kind {
                    TokenKind::Ident | TokenKind::Ptr => {
                        self.i += 1;
                        self.c.tok_text(&tok)
                    }
                    _ => {
                        return_syntax_error!(
                            format!("Expected a parameter name, found {:?}", tok.kind),
                            self.c.locate_token(&tok),
                            {
                                CompilationStage => "Declaration Parsing",
                            }
                        );
                    }
                };
                self.expect(TokenKind::Is, "`is`")?;
                let ty = self.parse_type()?;
                params.push(ParamDef { name, ty });
                if self.accept(TokenKind::Comma) {
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen, "`)`")?;
        Ok(params)
    }

    fn parse_extern_decl(&mut self) -> Result<(), CompileError> {
        let decl_tok = self.i;
        let module = ModuleId(self.cur().module);
        self.expect(TokenKind::Extern, "`extern`")?;
        self.expect(TokenKind::Def, "`def`")?;
        let (name, name_tok) = self.expect_ident("a function name")?;

        let params = self.parse_params()?;
        let mut ret = VOID;
        if self.accept(TokenKind::Returns) {
            ret = self.parse_type()?;
        }
        self.accept(TokenKind::Newline);

        self.check_duplicate(name, module, &name_tok);
        let id = FuncId(self.c.funcs.len() as u32);
        self.c.funcs.push(FuncDef {
            id,
            name,
            module,
            ir_name: name.to_string(),
            ret,
            params,
            is_extern: true,
            is_varargs: is_varargs_name(name),
            is_noalloc: false,
            direct_alloc: false,
            callees: Vec::new(),
            decl_tok,
            body: None,
        });
        Ok(())
    }

    fn parse_def_decl(&mut self) -> Result<(), CompileError> {
        let decl_tok = self.i;
        let module = ModuleId(self.cur().module);
        let is_noalloc = self.accept(TokenKind::Noalloc);
        self.expect(TokenKind::Def, "`def`")?;
        let (name, name_tok) = self.expect_ident("a function name")?;

        let params = self.parse_params()?;
        let mut ret = VOID;
        if self.accept(TokenKind::Returns) {
            ret = self.parse_type()?;
        }

        self.expect(TokenKind::Newline, "a newline")?;
        self.expect(TokenKind::Indent, "an indented function body")?;

        // Capture the body token range; the matching DEDENT is found by
        // depth counting, the body itself is compiled later.
        let body_start = self.i;
        let mut depth = 1i32;
        while self.i < self.c.toks.len() && depth > 0 {
            match self.c.toks[self.i].kind {
                TokenKind::Indent => depth += 1,
                TokenKind::Dedent => depth -= 1,
                TokenKind::Eof => break,
                _ => {}
            }
            self.i += 1;
        }
        if depth != 0 {
            return_syntax_error!(
                format!("Unbalanced block in function `{name}`"),
                self.c.locate_token(&name_tok),
                {
                    CompilationStage => "Declaration Parsing",
                }
            );
        }
        let body_end = self.i - 1; // exclude the closing DEDENT

        let is_entry_main =
            self.c.unit.module(module).kind == ModuleKind::Root && name == "main";
        let ir_name = if is_entry_main {
            "main".to_string()
        } else {
            mangle_ir_name(&self.c.unit.module(module).name, name)
        };

        self.check_duplicate(name, module, &name_tok);
        let id = FuncId(self.c.funcs.len() as u32);
        self.c.funcs.push(FuncDef {
            id,
            name,
            module,
            ir_name,
            ret,
            params,
            is_extern: false,
            is_varargs: false,
            is_noalloc,
            direct_alloc: false,
            callees: Vec::new(),
            decl_tok,
            body: Some((body_start, body_end)),
        });
        self.accept(TokenKind::Newline);
        Ok(())
    }

    /// Skips ahead to the next top-level form after a parse error.
    fn synchronize(&mut self) {
        let mut depth = 0i32;
        loop {
            let tok = self.cur();
            match tok.kind {
                TokenKind::Eof => return,
                TokenKind::Indent => depth += 1,
                TokenKind::Dedent => depth = (depth - 1).max(0),
                TokenKind::Newline if depth == 0 => {
                    self.i += 1;
                    if matches!(
                        self.cur().kind,
                        TokenKind::Const
                            | TokenKind::Extern
                            | TokenKind::Struct
                            | TokenKind::Def
                            | TokenKind::Noalloc
                            | TokenKind::Eof
                    ) {
                        return;
                    }
                    continue;
                }
                _ => {}
            }
            self.i += 1;
        }
    }
}

// --- DUMP_AST debug model -------------------------------------------------

#[derive(Serialize)]
pub struct UnitDump {
    pub modules: Vec<ModuleDump>,
    pub structs: Vec<StructDump>,
    pub consts: Vec<ConstDump>,
    pub functions: Vec<FunctionDump>,
}

#[derive(Serialize)]
pub struct ModuleDump {
    pub name: String,
    pub path: Option<String>,
    pub imports: Vec<String>,
}

#[derive(Serialize)]
pub struct StructDump {
    pub name: String,
    pub size: usize,
    pub align: usize,
    pub fields: Vec<(String, String, usize)>,
}

#[derive(Serialize)]
pub struct ConstDump {
    pub name: String,
    pub module: String,
    pub ty: String,
    pub value: String,
}

#[derive(Serialize)]
pub struct FunctionDump {
    pub name: String,
    pub module: String,
    pub ir_name: String,
    pub ret: String,
    pub params: Vec<(String, String)>,
    pub is_extern: bool,
    pub is_varargs: bool,
    pub is_noalloc: bool,
}

/// Snapshot of the parsed declarations for `DUMP_AST`.
pub fn dump_declarations(c: &Compiler) -> UnitDump {
    let module_name = |id: ModuleId| c.unit.module(id).name.clone();
    UnitDump {
        modules: c
            .unit
            .modules()
            .iter()
            .map(|m| ModuleDump {
                name: m.name.clone(),
                path: m.rel_path.as_ref().map(|p| p.display().to_string()),
                imports: m.imports.iter().map(|&i| module_name(i)).collect(),
            })
            .collect(),
        structs: c
            .structs
            .iter()
            .map(|s| StructDump {
                name: s.name.to_string(),
                size: s.size,
                align: s.align,
                fields: s
                    .fields
                    .iter()
                    .map(|f| {
                        (
                            f.name.to_string(),
                            c.types.display(f.ty, &c.structs),
                            f.offset,
                        )
                    })
                    .collect(),
            })
            .collect(),
        consts: c
            .consts
            .iter()
            .map(|k| ConstDump {
                name: k.name.to_string(),
                module: module_name(k.module),
                ty: c.types.display(k.ty, &c.structs),
                value: match k.payload {
                    ConstPayload::Int(v) => v.to_string(),
                    ConstPayload::Float(text) => text.to_string(),
                    ConstPayload::Str(id) => format!("@.str{}", id.0),
                },
            })
            .collect(),
        functions: c
            .funcs
            .iter()
            .map(|f| FunctionDump {
                name: f.name.to_string(),
                module: module_name(f.module),
                ir_name: f.ir_name.clone(),
                ret: c.types.display(f.ret, &c.structs),
                params: f
                    .params
                    .iter()
                    .map(|p| (p.name.to_string(), c.types.display(p.ty, &c.structs)))
                    .collect(),
                is_extern: f.is_extern,
                is_varargs: f.is_varargs,
                is_noalloc: f.is_noalloc,
            })
            .collect(),
    }
}
