//! Transitive `noalloc` analysis.
//!
//! During codegen every function accumulates a `direct_alloc` flag (set on
//! a direct call to a known allocator) and a deduplicated callee-id list.
//! After all functions are compiled, a fixpoint over the call graph
//! propagates may-allocate; any `noalloc` function whose transitive closure
//! reaches a may-allocate function is diagnosed at its declaration.
//!
//! The analysis is monotone (marking a function never unmarks another) and
//! terminates within at most N rounds for N functions.

use crate::compiler::Compiler;
use crate::compiler::builtins::{is_known_alloc_fn, is_known_nonalloc_extern};
use crate::compiler::compiler_errors::CompileError;

pub fn analyze_noalloc(c: &mut Compiler) {
    let n = c.funcs.len();
    let mut may_alloc = vec![false; n];

    for (index, func) in c.funcs.iter().enumerate() {
        let mut alloc = func.direct_alloc;
        if func.is_extern {
            // Externs are conservative: assume alloc unless whitelisted.
            if is_known_alloc_fn(func.name) {
                alloc = true;
            } else if !is_known_nonalloc_extern(func.name) {
                alloc = true;
            }
        }
        may_alloc[index] = alloc;
    }

    // Fixpoint: propagate alloc effects through the call graph.
    let mut changed = true;
    while changed {
        changed = false;
        for index in 0..n {
            if may_alloc[index] {
                continue;
            }
            let reaches_alloc = c.funcs[index]
                .callees
                .iter()
                .any(|callee| may_alloc[callee.0 as usize]);
            if reaches_alloc {
                may_alloc[index] = true;
                changed = true;
            }
        }
    }

    let mut errors = Vec::new();
    for (index, func) in c.funcs.iter().enumerate() {
        if func.is_noalloc && may_alloc[index] {
            let tok = c.toks[func.decl_tok.min(c.toks.len() - 1)];
            errors.push(CompileError::new_analysis_error(
                format!("`noalloc` function `{}` may allocate", func.name),
                c.locate_token(&tok),
            ));
        }
    }
    for error in errors {
        c.record_error(error);
    }
}
