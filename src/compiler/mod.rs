//! The compiler pipeline: resolve → lex → tag → parse → emit → cache.
//!
//! Data flows strictly left to right. The resolver exclusively owns the
//! unit bytes; [`Compiler`] borrows them for the entire parse + emit phase.
//! Cross-references (types, functions, constants, modules) are indices into
//! dense vectors, never pointers.

pub mod builtins;
pub mod cache;
pub mod codegen;
pub mod compiler_dev_logging;
pub mod compiler_errors;
pub mod datatypes;
pub mod declarations;
pub mod display_messages;
pub mod noalloc;
pub mod resolver;
pub mod tokenizer;

use crate::compiler::cache::{BuildFlags, Cache};
use crate::compiler::compiler_errors::{CompileError, CompilerMessages, ErrorLocation};
use crate::compiler::datatypes::{StructId, TypeTable};
use crate::compiler::declarations::{
    ConstDef, ConstId, FuncDef, FuncId, StrConst, StrId, dump_declarations, parse_declarations,
};
use crate::compiler::noalloc::analyze_noalloc;
use crate::compiler::resolver::{ModuleId, SourceUnit, resolve_unit};
use crate::compiler::tokenizer::tokenizer::tokenize;
use crate::compiler::tokenizer::tokens::{Token, locate, tag_modules};
use crate::settings::{ENV_DUMP_AST, ENV_DUMP_HIR, env_flag};
use crate::timer_log;
use std::fs;
use std::path::Path;
use std::time::Instant;

/// All compilation state for one unit. Scoped to a single compilation and
/// released when it finishes or fails.
pub struct Compiler<'u> {
    pub unit: &'u SourceUnit,
    pub toks: Vec<Token>,
    pub types: TypeTable,
    pub structs: Vec<datatypes::StructDef<'u>>,
    pub funcs: Vec<FuncDef<'u>>,
    pub consts: Vec<ConstDef<'u>>,
    pub strings: Vec<StrConst>,
    /// Non-fatal errors accumulated across parse and codegen. Their
    /// presence fails the compilation after the full pass has reported
    /// everything it can.
    pub errors: Vec<CompileError>,
}

impl<'u> Compiler<'u> {
    pub fn new(unit: &'u SourceUnit, toks: Vec<Token>) -> Self {
        let mut types = TypeTable::new();
        let mut structs = Vec::new();
        builtins::register_builtin_structs(&mut types, &mut structs);
        Compiler {
            unit,
            toks,
            types,
            structs,
            funcs: Vec::new(),
            consts: Vec::new(),
            strings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn tok_text(&self, tok: &Token) -> &'u str {
        tok.text(self.unit.bytes())
    }

    pub fn locate_token(&self, tok: &Token) -> ErrorLocation {
        locate(self.unit, tok.start, tok.end)
    }

    pub fn record_error(&mut self, error: CompileError) {
        self.errors.push(error);
    }

    pub fn had_error(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Structs live in a single flat namespace (builtins included).
    pub fn find_struct(&self, name: &str) -> Option<StructId> {
        self.structs
            .iter()
            .position(|s| s.name == name)
            .map(|index| StructId(index as u32))
    }

    pub fn find_const_in(&self, module: ModuleId, name: &str) -> Option<ConstId> {
        self.consts
            .iter()
            .position(|k| k.module == module && k.name == name)
            .map(|index| ConstId(index as u32))
    }

    pub fn find_func_in(&self, module: ModuleId, name: &str) -> Option<FuncId> {
        self.funcs
            .iter()
            .position(|f| f.module == module && f.name == name)
            .map(|index| FuncId(index as u32))
    }

    /// Looks a constant up across the modules directly imported by
    /// `module`. Two distinct hits are an ambiguity.
    pub fn lookup_imported_const(
        &self,
        module: ModuleId,
        name: &str,
    ) -> Result<Option<ConstId>, (ConstId, ConstId)> {
        let mut found: Option<ConstId> = None;
        for &import in &self.unit.module(module).imports {
            if let Some(cid) = self.find_const_in(import, name) {
                match found {
                    None => found = Some(cid),
                    Some(first) if first != cid => return Err((first, cid)),
                    Some(_) => {}
                }
            }
        }
        Ok(found)
    }

    /// Same ambiguity rule for functions.
    pub fn lookup_imported_func(
        &self,
        module: ModuleId,
        name: &str,
    ) -> Result<Option<FuncId>, (FuncId, FuncId)> {
        let mut found: Option<FuncId> = None;
        for &import in &self.unit.module(module).imports {
            if let Some(fid) = self.find_func_in(import, name) {
                match found {
                    None => found = Some(fid),
                    Some(first) if first != fid => return Err((first, fid)),
                    Some(_) => {}
                }
            }
        }
        Ok(found)
    }

    pub fn new_str_const(&mut self, bytes: Vec<u8>) -> StrId {
        let id = StrId(self.strings.len() as u32);
        self.strings.push(StrConst { bytes });
        id
    }
}

/// Lexes, parses and emits one assembled unit. Returns the IR text along
/// with every error the pass collected (the IR is only usable when the
/// error list is empty).
pub fn compile_to_ir(unit: &SourceUnit) -> (String, Vec<CompileError>) {
    let mut toks = match tokenize(unit) {
        Ok(toks) => toks,
        Err(error) => return (String::new(), vec![error]),
    };
    tag_modules(&mut toks, unit);

    let mut c = Compiler::new(unit, toks);
    parse_declarations(&mut c);

    if env_flag(ENV_DUMP_AST) {
        match serde_json::to_string_pretty(&dump_declarations(&c)) {
            Ok(json) => eprintln!("{json}"),
            Err(_) => eprintln!("(DUMP_AST serialization failed)"),
        }
    }

    let ir = codegen::emit_unit(&mut c);
    analyze_noalloc(&mut c);

    (ir, c.errors)
}

/// Full build of one entry file: resolve the module graph, check the
/// cache, compile, write the textual IR to `output`, store to the cache.
pub fn build(entry: &Path, output: &Path) -> CompilerMessages {
    let mut messages = CompilerMessages::new();
    let start = Instant::now();

    let unit = match resolve_unit(entry) {
        Ok(unit) => unit,
        Err(error) => {
            messages.errors.push(error);
            return messages;
        }
    };
    timer_log!(start, "Module resolution: ");

    let flags = BuildFlags::from_env(unit.features);
    let cache = Cache::from_env();
    let key = cache
        .as_ref()
        .and_then(|_| Cache::key(&unit.hash, &flags));

    if let (Some(cache), Some(key)) = (&cache, &key) {
        if cache.load(key, None, Some(output)) {
            return messages;
        }
    }

    let (ir, errors) = compile_to_ir(&unit);
    if !errors.is_empty() {
        messages.errors = errors;
        return messages;
    }

    if env_flag(ENV_DUMP_HIR) {
        eprint!("{ir}");
    }

    if let Err(e) = fs::write(output, &ir) {
        messages.errors.push(CompileError::file_error(
            output,
            format!("Could not write output: {e}"),
        ));
        return messages;
    }
    timer_log!(start, "Compilation: ");

    if let (Some(cache), Some(key)) = (&cache, &key) {
        cache.store(key, None, Some(output));
    }

    messages
}
