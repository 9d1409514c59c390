use crate::compiler::compiler_errors::ErrorLocation;
use crate::compiler::resolver::SourceUnit;
use crate::settings::ERROR_EXCERPT_LIMIT;

/// Token kinds produced by the lexer.
///
/// The set is fixed and shared with every consumer of the token stream; all
/// textual content is recovered from the token's byte range in the unit, so
/// kinds carry no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Eof,
    Ident,
    Int,
    Float,
    Str,
    Char,
    Newline,
    Indent,
    Dedent,

    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,

    Plus,
    Minus,
    Star,
    Slash,
    Eq,
    Lt,
    Gt,
    EqEq,
    NotEq,
    LtEq,
    GtEq,
    Amp,
    Bar,
    Caret,
    Shl,
    Shr,

    // Keywords
    Def,
    Extern,
    Struct,
    Const,
    Let,
    Var,
    If,
    Else,
    While,
    Do,
    Then,
    Return,
    Returns,
    Break,
    Continue,
    And,
    Or,
    Not,
    Is,
    Of,
    Ref,
    Mut,
    Ptr,
    Slice,
    True,
    False,
    Null,
    Noalloc,
}

/// One lexed token: kind plus the byte range it covers in the assembled unit.
///
/// `module` is filled in by [`tag_modules`] after lexing and is only used for
/// diagnostics and name-resolution scoping.
#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub kind: TokenKind,
    pub start: u32,
    pub end: u32,
    pub module: u32,
}

impl Token {
    pub fn new(kind: TokenKind, start: u32, end: u32) -> Self {
        Token {
            kind,
            start,
            end,
            module: 0,
        }
    }

    pub fn text<'u>(&self, unit: &'u [u8]) -> &'u str {
        let start = self.start as usize;
        let end = (self.end as usize).min(unit.len());
        if end < start {
            return "";
        }
        std::str::from_utf8(&unit[start..end]).unwrap_or("")
    }
}

/// Maps an identifier to its keyword kind, if any.
pub fn keyword_kind(ident: &str) -> Option<TokenKind> {
    let kind = match ident {
        "def" => TokenKind::Def,
        "extern" => TokenKind::Extern,
        "struct" => TokenKind::Struct,
        "const" => TokenKind::Const,
        "let" => TokenKind::Let,
        "var" => TokenKind::Var,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "do" => TokenKind::Do,
        "then" => TokenKind::Then,
        "return" => TokenKind::Return,
        "returns" => TokenKind::Returns,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "is" => TokenKind::Is,
        "of" => TokenKind::Of,
        "ref" => TokenKind::Ref,
        "mut" => TokenKind::Mut,
        "ptr" => TokenKind::Ptr,
        "slice" => TokenKind::Slice,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        "noalloc" => TokenKind::Noalloc,
        _ => return None,
    };
    Some(kind)
}

/// Resolves a unit byte range to a displayable location: the owning
/// module's relative path, a 1-based line/column counted from the module's
/// start offset, and the token text truncated to 40 bytes.
pub fn locate(unit: &SourceUnit, start: u32, end: u32) -> ErrorLocation {
    let mut owner = 0usize;
    for (index, module) in unit.file_modules().enumerate() {
        if module.start <= start {
            owner = index;
        } else {
            break;
        }
    }

    let bytes = unit.bytes();
    let module = unit.module(crate::compiler::resolver::ModuleId(owner as u32));
    let from = (module.start as usize).min(bytes.len());
    let to = (start as usize).min(bytes.len());

    let mut line = 1usize;
    let mut column = 1usize;
    for &b in &bytes[from..to] {
        if b == b'\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }

    let excerpt_end = (end as usize).min(bytes.len()).max(to);
    let excerpt_bytes = &bytes[to..excerpt_end.min(to + ERROR_EXCERPT_LIMIT)];
    let excerpt = String::from_utf8_lossy(excerpt_bytes).to_string();

    ErrorLocation::new(
        module.rel_path.clone().unwrap_or_default(),
        line,
        column,
        excerpt,
    )
}

/// Assigns each token the module that owns its start offset.
///
/// One linear sweep: a monotone cursor over the file modules' start offsets
/// (which are in unit order by construction) picks the last module whose
/// start is at or before the token. Tokens preceding the first marker fall
/// into module 0.
pub fn tag_modules(tokens: &mut [Token], unit: &SourceUnit) {
    let starts: Vec<u32> = unit
        .file_modules()
        .map(|module| module.start)
        .collect();
    if starts.is_empty() {
        return;
    }

    let mut cursor = 0usize;
    for token in tokens.iter_mut() {
        while cursor + 1 < starts.len() && starts[cursor + 1] <= token.start {
            cursor += 1;
        }
        token.module = cursor as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::resolver::test_support::unit_with_module_starts;

    #[test]
    fn tagging_is_monotone_and_respects_starts() {
        let unit = unit_with_module_starts(&[0, 10, 25]);
        let mut tokens = vec![
            Token::new(TokenKind::Ident, 2, 4),
            Token::new(TokenKind::Int, 9, 10),
            Token::new(TokenKind::Ident, 10, 12),
            Token::new(TokenKind::Ident, 24, 25),
            Token::new(TokenKind::Ident, 25, 30),
            Token::new(TokenKind::Eof, 40, 40),
        ];
        tag_modules(&mut tokens, &unit);

        let modules: Vec<u32> = tokens.iter().map(|t| t.module).collect();
        assert_eq!(modules, vec![0, 0, 1, 1, 2, 2]);
        assert!(modules.windows(2).all(|w| w[0] <= w[1]));
    }

    proptest::proptest! {
        #[test]
        fn tagging_is_monotone_for_any_module_layout(
            raw_starts in proptest::collection::vec(0u32..1000, 1..8),
            raw_positions in proptest::collection::vec(0u32..1200, 0..64),
        ) {
            let mut starts = raw_starts;
            starts.sort_unstable();
            starts.dedup();
            let unit = unit_with_module_starts(&starts);

            let mut positions = raw_positions;
            positions.sort_unstable();
            let mut tokens: Vec<Token> = positions
                .iter()
                .map(|&p| Token::new(TokenKind::Ident, p, p + 1))
                .collect();
            tag_modules(&mut tokens, &unit);

            let modules: Vec<u32> = tokens.iter().map(|t| t.module).collect();
            proptest::prop_assert!(modules.windows(2).all(|w| w[0] <= w[1]));
            for token in &tokens {
                let owner = token.module as usize;
                proptest::prop_assert!(
                    starts[owner] <= token.start || owner == 0
                );
                if owner + 1 < starts.len() {
                    proptest::prop_assert!(token.start < starts[owner + 1]);
                }
            }
        }
    }

    #[test]
    fn tokens_before_first_marker_belong_to_module_zero() {
        let unit = unit_with_module_starts(&[5, 20]);
        let mut tokens = vec![Token::new(TokenKind::Ident, 0, 3)];
        tag_modules(&mut tokens, &unit);
        assert_eq!(tokens[0].module, 0);
    }
}
