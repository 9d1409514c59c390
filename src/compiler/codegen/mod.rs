//! Single-pass textual SSA emission.
//!
//! Function bodies are compiled straight off the token stream: no AST is
//! built. The emitter tracks a monotone temporary counter (`%tN`), a label
//! counter (`bbN`), the loop-context stack and whether the current basic
//! block already ends in a terminator. Value namespaces in the output:
//! `%pN` parameters, `%lN` stack slots, `%tN` SSA temporaries, `bbN:`
//! labels and `@.strN` string globals.
//!
//! Structural errors (type mismatches, unknown identifiers, bad arity) are
//! recorded on the compiler and codegen continues with locally-plausible
//! placeholder values, so one pass reports many errors.

pub mod conditions;
pub mod expressions;

use crate::codegen_log;
use crate::compiler::Compiler;
use crate::compiler::compiler_errors::CompileError;
use crate::compiler::datatypes::{TypeId, TypeKind, VOID};
use crate::compiler::declarations::{FuncId, parse_type_at, parse_uint_lit};
use crate::compiler::tokenizer::tokens::TokenKind;
use self::expressions::{Value, ValueKind};

#[derive(Debug, Clone, Copy)]
pub struct LocalSlot<'u> {
    pub name: &'u str,
    pub ty: TypeId,
    pub slot: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct LoopCtx {
    pub cond_bb: u32,
    pub end_bb: u32,
}

/// Per-function emission state. Writes through [`FuncEmitter::write`] so a
/// dry-run type inference pass can discard everything it would emit.
pub struct FuncEmitter<'a, 'u> {
    pub c: &'a mut Compiler<'u>,
    pub fid: FuncId,
    pub out: &'a mut String,
    pub locals: Vec<LocalSlot<'u>>,
    pub next_temp: u32,
    pub next_label: u32,
    pub loops: Vec<LoopCtx>,
    pub terminated: bool,
    /// Discard sink: suppress all observable side effects (text, errors,
    /// strings, call edges). Used for `var x = expr` type inference.
    pub discard: bool,
}

impl<'a, 'u> FuncEmitter<'a, 'u> {
    pub fn new(c: &'a mut Compiler<'u>, fid: FuncId, out: &'a mut String) -> Self {
        FuncEmitter {
            c,
            fid,
            out,
            locals: Vec::new(),
            next_temp: 0,
            next_label: 0,
            loops: Vec::new(),
            terminated: false,
            discard: false,
        }
    }

    pub fn write(&mut self, text: &str) {
        if !self.discard {
            self.out.push_str(text);
        }
    }

    pub fn new_temp(&mut self) -> u32 {
        let t = self.next_temp;
        self.next_temp += 1;
        t
    }

    pub fn new_label(&mut self) -> u32 {
        let l = self.next_label;
        self.next_label += 1;
        l
    }

    pub fn emit_label(&mut self, id: u32) {
        self.write(&format!("bb{id}:\n"));
        self.terminated = false;
    }

    pub fn find_local(&self, name: &str) -> Option<LocalSlot<'u>> {
        self.locals.iter().find(|l| l.name == name).copied()
    }

    /// Records a non-fatal error at a token, unless running in discard mode
    /// (the real pass will re-report it identically).
    pub fn error_at_tok(&mut self, tok_index: usize, error: CompileError) {
        if self.discard {
            return;
        }
        let _ = tok_index;
        self.c.record_error(error);
    }

    /// Runs the expression parser with the discard sink to learn an
    /// initializer's type. Counters, recorded strings, call edges and the
    /// allocation flag are restored afterwards, so inference never leaves a
    /// trace — allocator calls included.
    pub fn infer_expr_type(&mut self, start: usize) -> (TypeId, usize) {
        let saved_temp = self.next_temp;
        let saved_label = self.next_label;
        let saved_strings = self.c.strings.len();
        let saved_errors = self.c.errors.len();
        let saved_callees = self.c.funcs[self.fid.0 as usize].callees.len();
        let saved_direct_alloc = self.c.funcs[self.fid.0 as usize].direct_alloc;
        let saved_terminated = self.terminated;
        let was_discarding = self.discard;

        self.discard = true;
        let mut i = start;
        let value = self.parse_expr(&mut i, 1);
        self.discard = was_discarding;

        self.next_temp = saved_temp;
        self.next_label = saved_label;
        self.c.strings.truncate(saved_strings);
        self.c.errors.truncate(saved_errors);
        let func = &mut self.c.funcs[self.fid.0 as usize];
        func.callees.truncate(saved_callees);
        func.direct_alloc = saved_direct_alloc;
        self.terminated = saved_terminated;

        (value.ty, i)
    }

    /// Prepass over the body recording every `var`/`let` introduction so
    /// stack slots can be allocated in the entry block. Types come from the
    /// explicit `is <Type>` annotation or from a dry-run of the initializer.
    pub fn scan_locals(&mut self, start: usize, end: usize) -> Result<(), CompileError> {
        let mut i = start;
        while i < end {
            let kind = self.c.toks[i].kind;
            if kind != TokenKind::Var && kind != TokenKind::Let {
                i += 1;
                continue;
            }
            let kw_i = i;
            i += 1;
            if i >= end || self.c.toks[i].kind != TokenKind::Ident {
                return Err(CompileError::new_syntax_error(
                    "Expected an identifier after `var`/`let`",
                    self.c.locate_token(&self.c.toks[kw_i]),
                ));
            }
            let name_tok = self.c.toks[i];
            let name = self.c.tok_text(&name_tok);
            i += 1;

            let ty = if i < end && self.c.toks[i].kind == TokenKind::Is {
                i += 1;
                match parse_type_at(self.c, &mut i) {
                    Some(ty) => ty,
                    None => {
                        return Err(CompileError::new_syntax_error(
                            "Expected a type after `is`",
                            self.c.locate_token(&self.c.toks[i.min(end - 1)]),
                        ));
                    }
                }
            } else if i < end && self.c.toks[i].kind == TokenKind::Eq {
                let (inferred, after) = self.infer_expr_type(i + 1);
                i = after;
                inferred
            } else {
                return Err(CompileError::new_syntax_error(
                    format!("Local `{name}` needs `is <Type>` or an initializer"),
                    self.c.locate_token(&name_tok),
                ));
            };

            if self.find_local(name).is_none() {
                let slot = self.locals.len() as u32;
                self.locals.push(LocalSlot { name, ty, slot });
            }
        }
        Ok(())
    }

    /// True when the rest of the line holds a top-level `=` (an assignment
    /// rather than an expression statement).
    fn line_has_assign_eq(&self, mut i: usize, end: usize) -> bool {
        let mut parens = 0i32;
        let mut brackets = 0i32;
        while i < end {
            match self.c.toks[i].kind {
                TokenKind::Newline => return false,
                TokenKind::LParen => parens += 1,
                TokenKind::RParen => parens -= 1,
                TokenKind::LBracket => brackets += 1,
                TokenKind::RBracket => brackets -= 1,
                TokenKind::Eq if parens == 0 && brackets == 0 => return true,
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn compile_if(&mut self, io_i: &mut usize, end: usize) {
        let mut i = *io_i;
        i += 1; // consume `if`
        let then_bb = self.new_label();
        let else_bb = self.new_label();
        let end_bb = self.new_label();

        self.emit_cond_or(&mut i, then_bb, else_bb);
        if self.c.toks[i].kind == TokenKind::Then {
            i += 1;
        }

        // then block
        if self.c.toks[i].kind == TokenKind::Newline {
            i += 1;
        }
        if self.c.toks[i].kind == TokenKind::Indent {
            i += 1;
        }
        self.emit_label(then_bb);
        self.compile_stmt_list(&mut i, end);
        if self.c.toks[i].kind == TokenKind::Dedent {
            i += 1;
        }
        if !self.terminated {
            self.write(&format!("  br label %bb{end_bb}\n"));
        }

        // else / else-if / no-else
        self.emit_label(else_bb);

        if self.c.toks[i].kind == TokenKind::Else {
            i += 1;
            if self.c.toks[i].kind == TokenKind::If {
                // else-if chain: nested if inside the else block
                self.compile_if(&mut i, end);
            } else {
                if self.c.toks[i].kind == TokenKind::Newline {
                    i += 1;
                }
                if self.c.toks[i].kind == TokenKind::Indent {
                    i += 1;
                }
                self.compile_stmt_list(&mut i, end);
                if self.c.toks[i].kind == TokenKind::Dedent {
                    i += 1;
                }
            }
        }
        if !self.terminated {
            self.write(&format!("  br label %bb{end_bb}\n"));
        }

        self.emit_label(end_bb);
        *io_i = i;
    }

    fn compile_while(&mut self, io_i: &mut usize, end: usize) {
        let mut i = *io_i;
        i += 1; // consume `while`

        // `while 1 do` is an infinite loop: no end block is created and no
        // trailing `return` is required after it.
        let mut infinite = false;
        if self.c.toks[i].kind == TokenKind::Int {
            let text = self.c.tok_text(&self.c.toks[i]);
            if parse_uint_lit(text) == 1 && self.c.toks[i + 1].kind == TokenKind::Do {
                infinite = true;
            }
        }

        let cond_bb = self.new_label();
        let body_bb = self.new_label();
        let end_bb = if infinite { None } else { Some(self.new_label()) };

        self.write(&format!("  br label %bb{cond_bb}\n"));
        self.emit_label(cond_bb);
        if infinite {
            i += 1; // consume the literal
            self.write(&format!("  br label %bb{body_bb}\n"));
            self.terminated = true;
        } else {
            self.emit_cond_or(&mut i, body_bb, end_bb.unwrap());
        }
        if self.c.toks[i].kind == TokenKind::Do {
            i += 1;
        }
        if self.c.toks[i].kind == TokenKind::Newline {
            i += 1;
        }
        if self.c.toks[i].kind == TokenKind::Indent {
            i += 1;
        }

        self.emit_label(body_bb);
        self.loops.push(LoopCtx {
            cond_bb,
            end_bb: end_bb.unwrap_or(cond_bb),
        });
        self.compile_stmt_list(&mut i, end);
        if self.c.toks[i].kind == TokenKind::Dedent {
            i += 1;
        }
        self.loops.pop();

        if !self.terminated {
            self.write(&format!("  br label %bb{cond_bb}\n"));
        }

        match end_bb {
            Some(end_bb) => self.emit_label(end_bb),
            // No fallthrough: the loop terminates the surrounding flow.
            None => self.terminated = true,
        }
        *io_i = i;
    }

    pub fn compile_stmt_list(&mut self, io_i: &mut usize, end: usize) {
        let mut i = *io_i;
        while i < end
            && self.c.toks[i].kind != TokenKind::Dedent
            && self.c.toks[i].kind != TokenKind::Eof
        {
            if self.c.toks[i].kind == TokenKind::Newline {
                i += 1;
                continue;
            }
            // If the prior statement terminated the block, open a fresh
            // (possibly unreachable) one so the IR stays well-formed.
            if self.terminated {
                let label = self.new_label();
                self.emit_label(label);
            }

            match self.c.toks[i].kind {
                TokenKind::Var | TokenKind::Let => {
                    self.compile_var_stmt(&mut i, end);
                }
                TokenKind::If => self.compile_if(&mut i, end),
                TokenKind::While => self.compile_while(&mut i, end),
                TokenKind::Return => {
                    i += 1;
                    let ret_ty = self.c.funcs[self.fid.0 as usize].ret;
                    if self.c.toks[i].kind == TokenKind::Newline {
                        if ret_ty != VOID {
                            let tok = self.c.toks[i];
                            self.error_at_tok(
                                i,
                                CompileError::new_type_error(
                                    "`return` without a value in a function returning a value",
                                    self.c.locate_token(&tok),
                                ),
                            );
                            let zero = self.zero_value(ret_ty);
                            let ty = self.c.types.llvm_ty(ret_ty);
                            let text = self.val(&zero);
                            self.write(&format!("  ret {ty} {text}\n"));
                        } else {
                            self.write("  ret void\n");
                        }
                        self.terminated = true;
                        i += 1;
                        continue;
                    }
                    let value = self.parse_expr(&mut i, 1);
                    let value = self.cast_to(ret_ty, value);
                    let value = self.load_if_needed(value);
                    let ty = self.c.types.llvm_ty(ret_ty);
                    let text = self.val(&value);
                    self.write(&format!("  ret {ty} {text}\n"));
                    self.terminated = true;
                    if self.c.toks[i].kind == TokenKind::Newline {
                        i += 1;
                    }
                }
                TokenKind::Break => {
                    let tok = self.c.toks[i];
                    i += 1;
                    match self.loops.last() {
                        Some(ctx) => {
                            let target = ctx.end_bb;
                            self.write(&format!("  br label %bb{target}\n"));
                        }
                        None => self.error_at_tok(
                            i - 1,
                            CompileError::new_rule_error(
                                "`break` outside of a loop",
                                self.c.locate_token(&tok),
                            ),
                        ),
                    }
                    self.terminated = true;
                    if self.c.toks[i].kind == TokenKind::Newline {
                        i += 1;
                    }
                }
                TokenKind::Continue => {
                    let tok = self.c.toks[i];
                    i += 1;
                    match self.loops.last() {
                        Some(ctx) => {
                            let target = ctx.cond_bb;
                            self.write(&format!("  br label %bb{target}\n"));
                        }
                        None => self.error_at_tok(
                            i - 1,
                            CompileError::new_rule_error(
                                "`continue` outside of a loop",
                                self.c.locate_token(&tok),
                            ),
                        ),
                    }
                    self.terminated = true;
                    if self.c.toks[i].kind == TokenKind::Newline {
                        i += 1;
                    }
                }
                _ if self.line_has_assign_eq(i, end) => {
                    let lhs_tok = i;
                    let lv = self.parse_lvalue(&mut i);
                    if self.c.toks[i].kind == TokenKind::Eq {
                        i += 1;
                    }
                    let rhs = self.parse_expr(&mut i, 1);
                    if lv.is_lvalue && !lv.assignable {
                        let tok = self.c.toks[lhs_tok];
                        self.error_at_tok(
                            lhs_tok,
                            CompileError::new_type_error(
                                "Cannot assign through an immutable reference",
                                self.c.locate_token(&tok),
                            ),
                        );
                    }
                    let rhs = self.cast_to(lv.ty, rhs);
                    if self.c.types.is_struct(lv.ty) {
                        self.emit_struct_copy(lv, rhs);
                    } else {
                        let rhs = self.load_if_needed(rhs);
                        let ty = self.c.types.llvm_ty(lv.ty);
                        let align = self.c.types.align(lv.ty, &self.c.structs);
                        let rhs_text = self.val(&rhs);
                        let mut ptr = lv;
                        ptr.is_lvalue = false;
                        let ptr_text = self.val(&ptr);
                        self.write(&format!(
                            "  store {ty} {rhs_text}, ptr {ptr_text}, align {align}\n"
                        ));
                    }
                    if self.c.toks[i].kind == TokenKind::Newline {
                        i += 1;
                    }
                }
                _ => {
                    // expression statement
                    let value = self.parse_expr(&mut i, 1);
                    let _ = self.load_if_needed(value);
                    if self.c.toks[i].kind == TokenKind::Newline {
                        i += 1;
                    }
                }
            }
        }
        *io_i = i;
    }

    fn compile_var_stmt(&mut self, io_i: &mut usize, end: usize) {
        let mut i = *io_i;
        let kw_i = i;
        i += 1;
        if i >= end || self.c.toks[i].kind != TokenKind::Ident {
            let tok = self.c.toks[kw_i];
            self.error_at_tok(
                kw_i,
                CompileError::new_syntax_error(
                    "Expected an identifier after `var`/`let`",
                    self.c.locate_token(&tok),
                ),
            );
            *io_i = i;
            return;
        }
        let name = self.c.tok_text(&self.c.toks[i]);
        i += 1;

        if i < end && self.c.toks[i].kind == TokenKind::Is {
            i += 1;
            // The type was recorded by the prepass; skip over it here.
            if parse_type_at(self.c, &mut i).is_none() {
                let tok = self.c.toks[i.min(end - 1)];
                self.error_at_tok(
                    i,
                    CompileError::new_syntax_error(
                        "Expected a type after `is`",
                        self.c.locate_token(&tok),
                    ),
                );
                *io_i = i;
                return;
            }
        }

        let local = self.find_local(name);
        if self.c.toks[i].kind == TokenKind::Eq {
            i += 1;
            let rhs = self.parse_expr(&mut i, 1);
            if let Some(local) = local {
                let rhs = self.cast_to(local.ty, rhs);
                if self.c.types.is_struct(local.ty) {
                    let dst = Value {
                        ty: local.ty,
                        kind: ValueKind::Local(local.slot),
                        is_lvalue: true,
                        assignable: true,
                    };
                    self.emit_struct_copy(dst, rhs);
                } else {
                    let rhs = self.load_if_needed(rhs);
                    let ty = self.c.types.llvm_ty(local.ty);
                    let align = self.c.types.align(local.ty, &self.c.structs);
                    let rhs_text = self.val(&rhs);
                    let slot = local.slot;
                    self.write(&format!(
                        "  store {ty} {rhs_text}, ptr %l{slot}, align {align}\n"
                    ));
                }
            }
        }
        if self.c.toks[i].kind == TokenKind::Newline {
            i += 1;
        }
        *io_i = i;
    }

    pub fn zero_value(&mut self, ty: TypeId) -> Value<'u> {
        match self.c.types.kind(ty) {
            TypeKind::Float { .. } => Value {
                ty,
                kind: ValueKind::Float("0.0"),
                is_lvalue: false,
                assignable: false,
            },
            TypeKind::Pointer { .. } => Value {
                ty,
                kind: ValueKind::Null,
                is_lvalue: false,
                assignable: false,
            },
            _ => Value {
                ty,
                kind: ValueKind::Int(0),
                is_lvalue: false,
                assignable: false,
            },
        }
    }
}

/// Compiles one non-extern function into `out`.
pub fn compile_function(c: &mut Compiler, fid: FuncId, out: &mut String) {
    let func = &c.funcs[fid.0 as usize];
    let Some((body_start, body_end)) = func.body else {
        return;
    };
    let decl_tok = func.decl_tok;

    codegen_log!("compiling {}", c.funcs[fid.0 as usize].ir_name);

    let mut emitter = FuncEmitter::new(c, fid, out);
    if let Err(error) = emitter.scan_locals(body_start, body_end) {
        emitter.c.record_error(error);
        return;
    }

    // define header
    let func = &emitter.c.funcs[fid.0 as usize];
    let ret_ty = func.ret;
    let mut header = format!(
        "define {} @{}(",
        emitter.c.types.llvm_ty(ret_ty),
        func.ir_name
    );
    for (index, param) in func.params.iter().enumerate() {
        if index > 0 {
            header.push_str(", ");
        }
        header.push_str(&format!(
            "{} %p{index}",
            emitter.c.types.llvm_ty(param.ty)
        ));
    }
    header.push_str(") {\nentry:\n");
    emitter.write(&header);

    // stack slots
    for local in emitter.locals.clone() {
        let line = match emitter.c.types.kind(local.ty) {
            TypeKind::Struct(sid) => {
                let sdef = &emitter.c.structs[sid.0 as usize];
                format!(
                    "  %l{} = alloca [{} x i8], align {}\n",
                    local.slot, sdef.size, sdef.align
                )
            }
            _ => format!(
                "  %l{} = alloca {}, align {}\n",
                local.slot,
                emitter.c.types.llvm_ty(local.ty),
                emitter.c.types.align(local.ty, &emitter.c.structs)
            ),
        };
        emitter.write(&line);
    }

    let mut i = body_start;
    emitter.compile_stmt_list(&mut i, body_end);

    if !emitter.terminated {
        if ret_ty == VOID {
            emitter.write("  ret void\n");
        } else {
            let name = emitter.c.funcs[fid.0 as usize].name;
            let tok = emitter.c.toks[decl_tok];
            let location = emitter.c.locate_token(&tok);
            emitter.c.record_error(CompileError::new_type_error(
                format!("Missing return in function `{name}`"),
                location,
            ));
            let zero = emitter.zero_value(ret_ty);
            let ty = emitter.c.types.llvm_ty(ret_ty);
            let text = emitter.val(&zero);
            emitter.write(&format!("  ret {ty} {text}\n"));
        }
    }
    emitter.write("}\n\n");
}

/// Emits the whole unit: module header, builtin declares, externs, function
/// bodies, then the string globals.
pub fn emit_unit(c: &mut Compiler) -> String {
    let mut out = String::new();
    out.push_str("; ModuleID = 'aster'\nsource_filename = \"aster\"\n\n");

    // Builtins, unless user code declared them itself.
    let mut have_calloc = false;
    let mut have_memcpy = false;
    for func in &c.funcs {
        if !func.is_extern {
            continue;
        }
        match func.name {
            "calloc" => have_calloc = true,
            "memcpy" => have_memcpy = true,
            _ => {}
        }
    }
    if !have_calloc {
        out.push_str("declare noalias ptr @calloc(i64, i64)\n");
    }
    if !have_memcpy {
        out.push_str("declare ptr @memcpy(ptr, ptr, i64)\n");
    }
    out.push('\n');

    for index in 0..c.funcs.len() {
        if c.funcs[index].is_extern {
            emit_extern_decl(c, index, &mut out);
        }
    }
    out.push('\n');

    for index in 0..c.funcs.len() {
        if !c.funcs[index].is_extern {
            compile_function(c, FuncId(index as u32), &mut out);
        }
    }

    emit_string_globals(c, &mut out);
    out
}

fn emit_extern_decl(c: &Compiler, index: usize, out: &mut String) {
    let func = &c.funcs[index];
    let ret = c.types.llvm_ty(func.ret);

    // printf is truly variadic with a single fixed prefix, however the
    // source spelled the common call shape.
    if func.is_varargs && func.name == "printf" {
        out.push_str(&format!("declare {ret} @printf(ptr, ...)\n"));
        return;
    }
    // Aliasing info for the common allocators unlocks downstream
    // optimizations on the emitted IR.
    if c.types.is_pointer(func.ret) && func.name == "malloc" && func.params.len() == 1 {
        out.push_str(&format!(
            "declare noalias {ret} @malloc({})\n",
            c.types.llvm_ty(func.params[0].ty)
        ));
        return;
    }
    if c.types.is_pointer(func.ret) && func.name == "calloc" && func.params.len() == 2 {
        out.push_str(&format!(
            "declare noalias {ret} @calloc({}, {})\n",
            c.types.llvm_ty(func.params[0].ty),
            c.types.llvm_ty(func.params[1].ty)
        ));
        return;
    }

    out.push_str(&format!("declare {ret} @{}(", func.ir_name));
    for (i, param) in func.params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(c.types.llvm_ty(param.ty));
    }
    if func.is_varargs {
        if !func.params.is_empty() {
            out.push_str(", ");
        }
        out.push_str("...");
    }
    out.push_str(")\n");
}

fn emit_string_globals(c: &Compiler, out: &mut String) {
    for (id, string) in c.strings.iter().enumerate() {
        out.push_str(&format!(
            "@.str{id} = private constant [{} x i8] c\"",
            string.bytes.len()
        ));
        for byte in &string.bytes {
            out.push_str(&format!("\\{byte:02X}"));
        }
        out.push_str("\", align 1\n");
    }
}
