//! Indentation-sensitive lexer over the assembled unit.
//!
//! Produces byte-range tokens; INDENT/DEDENT come from a column stack the
//! way the block structure of the language requires. Lexing stops at the
//! unit's NUL terminator.

use crate::compiler::compiler_errors::CompileError;
use crate::compiler::resolver::SourceUnit;
use crate::compiler::tokenizer::tokens::{Token, TokenKind, keyword_kind, locate};
use crate::settings::SRC_TO_TOKEN_RATIO;
use crate::{return_syntax_error, token_log};

pub fn tokenize(unit: &SourceUnit) -> Result<Vec<Token>, CompileError> {
    let src = unit.bytes();
    // The NUL terminator (and anything after it) is not part of the source.
    let len = src.iter().position(|&b| b == 0).unwrap_or(src.len());

    let mut tokens: Vec<Token> = Vec::with_capacity(len / SRC_TO_TOKEN_RATIO);
    let mut indents: Vec<usize> = vec![0];
    let mut pos = 0usize;

    'lines: while pos < len {
        // Measure this line's indentation.
        let mut column = 0usize;
        while pos < len && src[pos] == b' ' {
            pos += 1;
            column += 1;
        }
        if pos < len && src[pos] == b'\t' {
            return_syntax_error!(
                "Tabs are not allowed in indentation",
                locate(unit, pos as u32, pos as u32 + 1),
                {
                    CompilationStage => "Tokenization",
                    PrimarySuggestion => "Indent with spaces only",
                }
            );
        }
        if pos >= len {
            break;
        }

        // Blank and comment-only lines never change the indentation level.
        if src[pos] == b'\n' {
            tokens.push(Token::new(TokenKind::Newline, pos as u32, pos as u32 + 1));
            pos += 1;
            continue;
        }
        if src[pos] == b'#' {
            while pos < len && src[pos] != b'\n' {
                pos += 1;
            }
            continue;
        }

        let line_indent_at = pos as u32;
        if column > *indents.last().unwrap() {
            indents.push(column);
            tokens.push(Token::new(TokenKind::Indent, line_indent_at, line_indent_at));
        } else {
            while column < *indents.last().unwrap() {
                indents.pop();
                tokens.push(Token::new(TokenKind::Dedent, line_indent_at, line_indent_at));
            }
            if column != *indents.last().unwrap() {
                return_syntax_error!(
                    "Inconsistent indentation: dedent does not match any outer level",
                    locate(unit, line_indent_at, line_indent_at + 1),
                    {
                        CompilationStage => "Tokenization",
                    }
                );
            }
        }

        // Lex the tokens on this line.
        while pos < len {
            if src[pos] == b' ' {
                pos += 1;
                continue;
            }
            if src[pos] == b'\n' {
                tokens.push(Token::new(TokenKind::Newline, pos as u32, pos as u32 + 1));
                pos += 1;
                continue 'lines;
            }
            if src[pos] == b'#' {
                while pos < len && src[pos] != b'\n' {
                    pos += 1;
                }
                continue;
            }

            let token = next_token(unit, src, len, &mut pos)?;
            token_log!("{:?} {}..{}", token.kind, token.start, token.end);
            tokens.push(token);
        }
    }

    // Flush: synthesize a final newline if the unit did not end with one,
    // then close any open blocks.
    if !matches!(
        tokens.last().map(|t| t.kind),
        Some(TokenKind::Newline) | None
    ) {
        tokens.push(Token::new(TokenKind::Newline, len as u32, len as u32));
    }
    while indents.len() > 1 {
        indents.pop();
        tokens.push(Token::new(TokenKind::Dedent, len as u32, len as u32));
    }
    tokens.push(Token::new(TokenKind::Eof, len as u32, len as u32));

    Ok(tokens)
}

fn next_token(
    unit: &SourceUnit,
    src: &[u8],
    len: usize,
    pos: &mut usize,
) -> Result<Token, CompileError> {
    let start = *pos;
    let b = src[start];

    if b.is_ascii_alphabetic() || b == b'_' {
        let mut end = start + 1;
        while end < len && (src[end].is_ascii_alphanumeric() || src[end] == b'_') {
            end += 1;
        }
        *pos = end;
        let text = std::str::from_utf8(&src[start..end]).unwrap_or("");
        let kind = keyword_kind(text).unwrap_or(TokenKind::Ident);
        return Ok(Token::new(kind, start as u32, end as u32));
    }

    if b.is_ascii_digit() {
        let mut end = start + 1;
        if b == b'0' && end < len && (src[end] == b'x' || src[end] == b'X') {
            end += 1;
            while end < len && src[end].is_ascii_hexdigit() {
                end += 1;
            }
            *pos = end;
            return Ok(Token::new(TokenKind::Int, start as u32, end as u32));
        }
        while end < len && src[end].is_ascii_digit() {
            end += 1;
        }
        let mut kind = TokenKind::Int;
        if end + 1 < len && src[end] == b'.' && src[end + 1].is_ascii_digit() {
            kind = TokenKind::Float;
            end += 1;
            while end < len && src[end].is_ascii_digit() {
                end += 1;
            }
            if end < len && (src[end] == b'e' || src[end] == b'E') {
                let mut exp = end + 1;
                if exp < len && (src[exp] == b'+' || src[exp] == b'-') {
                    exp += 1;
                }
                if exp < len && src[exp].is_ascii_digit() {
                    end = exp + 1;
                    while end < len && src[end].is_ascii_digit() {
                        end += 1;
                    }
                }
            }
        }
        *pos = end;
        return Ok(Token::new(kind, start as u32, end as u32));
    }

    if b == b'"' || b == b'\'' {
        let quote = b;
        let mut end = start + 1;
        while end < len && src[end] != quote && src[end] != b'\n' {
            if src[end] == b'\\' && end + 1 < len {
                end += 1;
            }
            end += 1;
        }
        if end >= len || src[end] != quote {
            let what = if quote == b'"' { "string" } else { "char" };
            return_syntax_error!(
                format!("Unterminated {what} literal"),
                locate(unit, start as u32, end as u32),
                {
                    CompilationStage => "Tokenization",
                    PrimarySuggestion => "Close the literal before the end of the line",
                }
            );
        }
        end += 1;
        *pos = end;
        let kind = if quote == b'"' {
            TokenKind::Str
        } else {
            TokenKind::Char
        };
        return Ok(Token::new(kind, start as u32, end as u32));
    }

    // Two-character operators first.
    let two = if start + 1 < len {
        match (b, src[start + 1]) {
            (b'=', b'=') => Some(TokenKind::EqEq),
            (b'!', b'=') => Some(TokenKind::NotEq),
            (b'<', b'=') => Some(TokenKind::LtEq),
            (b'>', b'=') => Some(TokenKind::GtEq),
            (b'<', b'<') => Some(TokenKind::Shl),
            (b'>', b'>') => Some(TokenKind::Shr),
            _ => None,
        }
    } else {
        None
    };
    if let Some(kind) = two {
        *pos = start + 2;
        return Ok(Token::new(kind, start as u32, start as u32 + 2));
    }

    let single = match b {
        b'(' => Some(TokenKind::LParen),
        b')' => Some(TokenKind::RParen),
        b'[' => Some(TokenKind::LBracket),
        b']' => Some(TokenKind::RBracket),
        b',' => Some(TokenKind::Comma),
        b'.' => Some(TokenKind::Dot),
        b'+' => Some(TokenKind::Plus),
        b'-' => Some(TokenKind::Minus),
        b'*' => Some(TokenKind::Star),
        b'/' => Some(TokenKind::Slash),
        b'=' => Some(TokenKind::Eq),
        b'<' => Some(TokenKind::Lt),
        b'>' => Some(TokenKind::Gt),
        b'&' => Some(TokenKind::Amp),
        b'|' => Some(TokenKind::Bar),
        b'^' => Some(TokenKind::Caret),
        _ => None,
    };
    if let Some(kind) = single {
        *pos = start + 1;
        return Ok(Token::new(kind, start as u32, start as u32 + 1));
    }

    return_syntax_error!(
        format!("Unexpected character `{}`", b as char),
        locate(unit, start as u32, start as u32 + 1),
        {
            CompilationStage => "Tokenization",
        }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::resolver::test_support::unit_from_source;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let unit = unit_from_source(source);
        tokenize(&unit)
            .expect("tokenization should succeed")
            .iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_a_function_header() {
        let kinds = kinds("def main() returns i32\n    return 0\n");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Def,
                TokenKind::Ident,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Returns,
                TokenKind::Ident,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Return,
                TokenKind::Int,
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn indent_and_dedent_are_balanced() {
        let source = "def f()\n    if true then\n        return\n    return\n";
        let kinds = kinds(source);
        let indents = kinds.iter().filter(|k| **k == TokenKind::Indent).count();
        let dedents = kinds.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(indents, 2);
        assert_eq!(dedents, 2);
    }

    #[test]
    fn blank_and_comment_lines_do_not_change_indentation() {
        let source = "def f()\n    var x is i32 = 1\n\n    # note\n    x = 2\n";
        let kinds = kinds(source);
        assert_eq!(
            kinds.iter().filter(|k| **k == TokenKind::Indent).count(),
            1
        );
        assert_eq!(
            kinds.iter().filter(|k| **k == TokenKind::Dedent).count(),
            1
        );
    }

    #[test]
    fn two_char_operators_win_over_single() {
        let kinds = kinds("a == b != c <= d >= e << f >> g\n");
        assert!(kinds.contains(&TokenKind::EqEq));
        assert!(kinds.contains(&TokenKind::NotEq));
        assert!(kinds.contains(&TokenKind::LtEq));
        assert!(kinds.contains(&TokenKind::GtEq));
        assert!(kinds.contains(&TokenKind::Shl));
        assert!(kinds.contains(&TokenKind::Shr));
    }

    #[test]
    fn hex_and_float_literals() {
        let unit = unit_from_source("0x1F 42 3.25 1.5e3\n");
        let tokens = tokenize(&unit).unwrap();
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            &kinds[..4],
            &[
                TokenKind::Int,
                TokenKind::Int,
                TokenKind::Float,
                TokenKind::Float
            ]
        );
        assert_eq!(tokens[2].text(unit.bytes()), "3.25");
        assert_eq!(tokens[3].text(unit.bytes()), "1.5e3");
    }

    #[test]
    fn string_and_char_literals_keep_quotes_and_escapes() {
        let unit = unit_from_source("\"a\\n\" '\\t'\n");
        let tokens = tokenize(&unit).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].text(unit.bytes()), "\"a\\n\"");
        assert_eq!(tokens[1].kind, TokenKind::Char);
        assert_eq!(tokens[1].text(unit.bytes()), "'\\t'");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let unit = unit_from_source("\"oops\n");
        assert!(tokenize(&unit).is_err());
    }

    #[test]
    fn inconsistent_dedent_is_an_error() {
        let unit = unit_from_source("def f()\n        return\n   return\n");
        assert!(tokenize(&unit).is_err());
    }

    #[test]
    fn lexing_stops_at_the_nul_terminator() {
        let unit = unit_from_source("const A is i32 = 1\n");
        let tokens = tokenize(&unit).unwrap();
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
        assert!(tokens.iter().all(|t| (t.end as usize) < unit.bytes().len()));
    }

    #[test]
    fn missing_trailing_newline_is_synthesized() {
        let kinds = kinds("def f()\n    return");
        assert_eq!(
            &kinds[kinds.len() - 3..],
            &[TokenKind::Newline, TokenKind::Dedent, TokenKind::Eof]
        );
    }
}
