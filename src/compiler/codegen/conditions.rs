//! Short-circuit condition lowering.
//!
//! `if`/`while` conditions are not evaluated to a bool followed by a
//! branch; nested `or`/`and`/`not` are flattened directly into branches to
//! the caller's true/false labels. Atoms parse at precedence strictly above
//! `and`, `not` swaps its caller's targets, so evaluation is left-to-right
//! and operands whose result cannot affect the outcome are never evaluated.

use crate::compiler::codegen::FuncEmitter;
use crate::compiler::datatypes::BOOL;
use crate::compiler::tokenizer::tokens::TokenKind;

impl<'a, 'u> FuncEmitter<'a, 'u> {
    fn emit_cond_atom(&mut self, io_i: &mut usize, true_bb: u32, false_bb: u32) {
        let mut i = *io_i;
        // Stop before `and`/`or`; those belong to the condition structure.
        let v = self.parse_expr(&mut i, 3);
        let v = self.cast_to(BOOL, v);
        let text = self.val(&v);
        self.write(&format!(
            "  br i1 {text}, label %bb{true_bb}, label %bb{false_bb}\n"
        ));
        self.terminated = true;
        *io_i = i;
    }

    fn emit_cond_not(&mut self, io_i: &mut usize, true_bb: u32, false_bb: u32) {
        let mut i = *io_i;
        if self.c.toks[i].kind == TokenKind::Not {
            i += 1;
            // `not` swaps the caller's targets.
            self.emit_cond_not(&mut i, false_bb, true_bb);
            *io_i = i;
            return;
        }
        self.emit_cond_atom(&mut i, true_bb, false_bb);
        *io_i = i;
    }

    fn emit_cond_and(&mut self, io_i: &mut usize, true_bb: u32, false_bb: u32) {
        let mut i = *io_i;
        let mut next_true = self.new_label();
        self.emit_cond_not(&mut i, next_true, false_bb);
        while self.c.toks[i].kind == TokenKind::And {
            self.emit_label(next_true);
            i += 1;
            next_true = self.new_label();
            self.emit_cond_not(&mut i, next_true, false_bb);
        }
        self.emit_label(next_true);
        self.write(&format!("  br label %bb{true_bb}\n"));
        self.terminated = true;
        *io_i = i;
    }

    pub fn emit_cond_or(&mut self, io_i: &mut usize, true_bb: u32, false_bb: u32) {
        let mut i = *io_i;
        let mut next_false = self.new_label();
        self.emit_cond_and(&mut i, true_bb, next_false);
        while self.c.toks[i].kind == TokenKind::Or {
            self.emit_label(next_false);
            i += 1;
            next_false = self.new_label();
            self.emit_cond_and(&mut i, true_bb, next_false);
        }
        self.emit_label(next_false);
        self.write(&format!("  br label %bb{false_bb}\n"));
        self.terminated = true;
        *io_i = i;
    }
}
