//! Table-driven scanner for PArL
//!
//! A single DFA over the raw source bytes. Scanning always returns the
//! longest accepting prefix from the requested offset, packaged as a typed
//! token carrying its start offset and lexeme length; a byte with no
//! accepting prefix yields a one-byte error token so the caller can move
//! past it. The scanner itself never fails.
//!
//! Reserved words that act as operators or literals (`and`, `or`, `not`,
//! `true`, `false` and the four type words) are promoted to their
//! operational token category so the parser can dispatch on category
//! alone.

use crate::builtins::Builtin;
use crate::types::Kind;

/// Character categories the transition table is indexed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cat {
    HexLetter = 0,
    Letter,
    Digit,
    Whitespace,
    Equals,
    GreaterThan,
    LessThan,
    Exclamation,
    Plus,
    Dash,
    Asterisk,
    ForwardSlash,
    Percent,
    OpenParen,
    CloseParen,
    OpenSquare,
    CloseSquare,
    OpenCurly,
    CloseCurly,
    Underscore,
    Comma,
    FullStop,
    Colon,
    Semicolon,
    Hashtag,
    NewLine,
    Other,
}

const NUM_CATS: usize = Cat::Other as usize + 1;
const NUM_STATES: usize = 39;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Let,
    If,
    Else,
    For,
    While,
    Return,
    As,
    Fun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultOp {
    Mul,
    Div,
    Mod,
    And,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOp {
    Add,
    Sub,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bracket {
    OpenParen,
    CloseParen,
    OpenSquare,
    CloseSquare,
    OpenCurly,
    CloseCurly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    Semicolon,
    Colon,
    Comma,
    Arrow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Error,
    Whitespace,
    NewLine,
    LineComment,
    BlockComment { open: bool },
    IntLiteral(i64),
    FloatLiteral(f64),
    ColourLiteral(u32),
    BooleanLiteral(bool),
    VarType(Kind),
    Identifier(String),
    Keyword(Keyword),
    MultOp(MultOp),
    AddOp(AddOp),
    RelOp(RelOp),
    UnaryOp,
    Assign,
    Bracket(Bracket),
    Punct(Punct),
    Builtin(Builtin),
    Eof,
}

/// A scanned token. The lexeme itself is only retained where later phases
/// need it (identifiers and literal values); `start` and `length` locate
/// it in the source for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub length: usize,
}

pub struct Lexer {
    transitions: [[i8; NUM_CATS]; NUM_STATES],
}

impl Lexer {
    pub fn new() -> Self {
        Lexer {
            transitions: build_transitions(),
        }
    }

    /// Raw scan: the longest accepting token starting at `index`. Returns
    /// an EOF token (length 0) past the end of input and a one-byte error
    /// token when no accepting state is ever reached.
    pub fn token_at(&self, source: &str, index: usize) -> Token {
        let bytes = source.as_bytes();
        if index >= bytes.len() {
            return Token {
                kind: TokenKind::Eof,
                start: index,
                length: 0,
            };
        }

        let mut state = 0usize;
        let mut last_accept: Option<(usize, usize)> = None;

        let mut i = index;
        while i < bytes.len() {
            let cat = categorize(bytes[i]);
            let next = self.transitions[state][cat as usize];
            if next < 0 {
                break;
            }
            state = next as usize;
            if is_accepting(state) {
                last_accept = Some((state, i));
            }
            i += 1;
        }

        match last_accept {
            Some((state, end)) => Token {
                kind: token_by_final_state(state, &source[index..=end]),
                start: index,
                length: end + 1 - index,
            },
            None => Token {
                kind: TokenKind::Error,
                start: index,
                length: 1,
            },
        }
    }

    /// Scan forward from `index`, transparently dropping whitespace,
    /// newlines, line comments (up to the terminating newline) and block
    /// comments. Returns the first remaining token together with the
    /// offset it starts at; the token itself is not consumed.
    pub fn peek(
        &self,
        source: &str,
        mut index: usize,
        skip_whitespace: bool,
        skip_comments: bool,
    ) -> (Token, usize) {
        let mut token = self.token_at(source, index);
        let mut in_line_comment = matches!(token.kind, TokenKind::LineComment);
        let mut in_block_comment = matches!(token.kind, TokenKind::BlockComment { open: true });

        while (skip_whitespace
            && matches!(token.kind, TokenKind::Whitespace | TokenKind::NewLine))
            || (skip_comments
                && (matches!(token.kind, TokenKind::BlockComment { .. })
                    || in_line_comment
                    || in_block_comment))
        {
            index += token.length;
            token = self.token_at(source, index);
            if matches!(token.kind, TokenKind::Eof) {
                break;
            }

            if in_line_comment {
                if matches!(token.kind, TokenKind::NewLine) {
                    in_line_comment = false;
                }
            } else {
                in_line_comment = matches!(token.kind, TokenKind::LineComment);
            }

            if in_block_comment {
                if matches!(token.kind, TokenKind::BlockComment { open: false }) {
                    in_block_comment = false;
                }
            } else {
                in_block_comment = matches!(token.kind, TokenKind::BlockComment { open: true });
            }
        }

        (token, index)
    }

    /// Advancing variant of [`peek`](Self::peek): updates `index` past the
    /// returned token.
    pub fn next(
        &self,
        source: &str,
        index: &mut usize,
        skip_whitespace: bool,
        skip_comments: bool,
    ) -> Token {
        let (token, start) = self.peek(source, *index, skip_whitespace, skip_comments);
        *index = start + token.length;
        token
    }
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new()
    }
}

fn categorize(byte: u8) -> Cat {
    match byte {
        b'a'..=b'f' | b'A'..=b'F' => Cat::HexLetter,
        b'g'..=b'z' | b'G'..=b'Z' => Cat::Letter,
        b'0'..=b'9' => Cat::Digit,
        b'\n' => Cat::NewLine,
        b' ' | b'\t' | b'\r' | 0x0b | 0x0c => Cat::Whitespace,
        b'=' => Cat::Equals,
        b'>' => Cat::GreaterThan,
        b'<' => Cat::LessThan,
        b'!' => Cat::Exclamation,
        b'+' => Cat::Plus,
        b'-' => Cat::Dash,
        b'*' => Cat::Asterisk,
        b'/' => Cat::ForwardSlash,
        b'%' => Cat::Percent,
        b'(' => Cat::OpenParen,
        b')' => Cat::CloseParen,
        b'[' => Cat::OpenSquare,
        b']' => Cat::CloseSquare,
        b'{' => Cat::OpenCurly,
        b'}' => Cat::CloseCurly,
        b'_' => Cat::Underscore,
        b',' => Cat::Comma,
        b'.' => Cat::FullStop,
        b':' => Cat::Colon,
        b';' => Cat::Semicolon,
        b'#' => Cat::Hashtag,
        _ => Cat::Other,
    }
}

/// Build the DFA. State 0 is the start state; -1 marks a missing
/// transition.
///
/// State map: 1 integer, 2 integer-dot, 3 float, 4 identifier, 5 `+`,
/// 6 `/`, 7 `//`, 8 `/*`, 9 `*`, 10 `*/`, 11 `<`/`>`, 12 `=`, 13 `!`,
/// 14 two-char relational, 15 `,`, 16 `:`, 17 `;`, 18-23 brackets,
/// 24 `-`, 25 `->`, 26 newline, 27 `#`, 28-32 partial colour, 33 colour,
/// 34 whitespace, 35 `_`, 36 `__`, 37 builtin, 38 `%`.
fn build_transitions() -> [[i8; NUM_CATS]; NUM_STATES] {
    let mut t = [[-1i8; NUM_CATS]; NUM_STATES];
    let mut set = |state: usize, cat: Cat, next: i8| t[state][cat as usize] = next;

    // Integers and floats
    set(0, Cat::Digit, 1);
    set(1, Cat::Digit, 1);
    set(1, Cat::FullStop, 2);
    set(2, Cat::Digit, 3);
    set(3, Cat::Digit, 3);

    // Identifiers
    set(0, Cat::Letter, 4);
    set(0, Cat::HexLetter, 4);
    set(4, Cat::Letter, 4);
    set(4, Cat::HexLetter, 4);
    set(4, Cat::Digit, 4);
    set(4, Cat::Underscore, 4);

    // Additive operators and the arrow
    set(0, Cat::Plus, 5);
    set(0, Cat::Dash, 24);
    set(24, Cat::GreaterThan, 25);

    // Multiplicative operators, comments
    set(0, Cat::Asterisk, 9);
    set(9, Cat::ForwardSlash, 10);
    set(0, Cat::ForwardSlash, 6);
    set(6, Cat::ForwardSlash, 7);
    set(6, Cat::Asterisk, 8);
    set(0, Cat::Percent, 38);

    // Relational operators and assignment
    set(0, Cat::GreaterThan, 11);
    set(0, Cat::LessThan, 11);
    set(0, Cat::Equals, 12);
    set(0, Cat::Exclamation, 13);
    set(11, Cat::Equals, 14);
    set(12, Cat::Equals, 14);
    set(13, Cat::Equals, 14);

    // Punctuation
    set(0, Cat::Comma, 15);
    set(0, Cat::Colon, 16);
    set(0, Cat::Semicolon, 17);

    // Brackets
    set(0, Cat::OpenParen, 18);
    set(0, Cat::CloseParen, 19);
    set(0, Cat::OpenSquare, 20);
    set(0, Cat::CloseSquare, 21);
    set(0, Cat::OpenCurly, 22);
    set(0, Cat::CloseCurly, 23);

    // Layout
    set(0, Cat::NewLine, 26);
    set(0, Cat::Whitespace, 34);
    set(34, Cat::Whitespace, 34);

    // Colour literals: '#' then exactly six hex digits
    set(0, Cat::Hashtag, 27);
    for (from, to) in [(27, 28), (28, 29), (29, 30), (30, 31), (31, 32), (32, 33)] {
        set(from, Cat::HexLetter, to as i8);
        set(from, Cat::Digit, to as i8);
    }

    // Builtins: '__' then letters and underscores
    set(0, Cat::Underscore, 35);
    set(35, Cat::Underscore, 36);
    for cat in [Cat::Underscore, Cat::HexLetter, Cat::Letter] {
        set(36, cat, 37);
        set(37, cat, 37);
    }

    t
}

fn is_accepting(state: usize) -> bool {
    matches!(
        state,
        1 | 3
            | 4
            | 5
            | 6
            | 7
            | 8
            | 9
            | 10
            | 11
            | 12
            | 14
            | 15
            | 16
            | 17
            | 18..=26
            | 33
            | 34
            | 37
            | 38
    )
}

fn token_by_final_state(state: usize, lexeme: &str) -> TokenKind {
    match state {
        1 => match lexeme.parse::<i64>() {
            Ok(value) => TokenKind::IntLiteral(value),
            Err(_) => TokenKind::Error,
        },
        3 => match lexeme.parse::<f64>() {
            Ok(value) => TokenKind::FloatLiteral(value),
            Err(_) => TokenKind::Error,
        },
        4 => identifier_token(lexeme),
        5 => TokenKind::AddOp(AddOp::Add),
        6 => TokenKind::MultOp(MultOp::Div),
        7 => TokenKind::LineComment,
        8 => TokenKind::BlockComment { open: true },
        9 => TokenKind::MultOp(MultOp::Mul),
        10 => TokenKind::BlockComment { open: false },
        11 => match lexeme {
            "<" => TokenKind::RelOp(RelOp::Lt),
            _ => TokenKind::RelOp(RelOp::Gt),
        },
        12 => TokenKind::Assign,
        14 => match lexeme {
            "==" => TokenKind::RelOp(RelOp::Eq),
            "!=" => TokenKind::RelOp(RelOp::Ne),
            "<=" => TokenKind::RelOp(RelOp::Le),
            ">=" => TokenKind::RelOp(RelOp::Ge),
            _ => TokenKind::Error,
        },
        15 => TokenKind::Punct(Punct::Comma),
        16 => TokenKind::Punct(Punct::Colon),
        17 => TokenKind::Punct(Punct::Semicolon),
        18 => TokenKind::Bracket(Bracket::OpenParen),
        19 => TokenKind::Bracket(Bracket::CloseParen),
        20 => TokenKind::Bracket(Bracket::OpenSquare),
        21 => TokenKind::Bracket(Bracket::CloseSquare),
        22 => TokenKind::Bracket(Bracket::OpenCurly),
        23 => TokenKind::Bracket(Bracket::CloseCurly),
        24 => TokenKind::AddOp(AddOp::Sub),
        25 => TokenKind::Punct(Punct::Arrow),
        26 => TokenKind::NewLine,
        33 => match u32::from_str_radix(&lexeme[1..], 16) {
            Ok(value) => TokenKind::ColourLiteral(value),
            Err(_) => TokenKind::Error,
        },
        34 => TokenKind::Whitespace,
        37 => match Builtin::from_lexeme(lexeme) {
            Some(builtin) => TokenKind::Builtin(builtin),
            None => TokenKind::Error,
        },
        38 => TokenKind::MultOp(MultOp::Mod),
        _ => TokenKind::Error,
    }
}

/// Identifier creation with keyword promotion: reserved words that behave
/// as operators or literals come back in their operational category.
fn identifier_token(lexeme: &str) -> TokenKind {
    match lexeme {
        "float" => TokenKind::VarType(Kind::Float),
        "int" => TokenKind::VarType(Kind::Int),
        "bool" => TokenKind::VarType(Kind::Bool),
        "colour" => TokenKind::VarType(Kind::Colour),
        "true" => TokenKind::BooleanLiteral(true),
        "false" => TokenKind::BooleanLiteral(false),
        "and" => TokenKind::MultOp(MultOp::And),
        "or" => TokenKind::AddOp(AddOp::Or),
        "not" => TokenKind::UnaryOp,
        "let" => TokenKind::Keyword(Keyword::Let),
        "if" => TokenKind::Keyword(Keyword::If),
        "else" => TokenKind::Keyword(Keyword::Else),
        "for" => TokenKind::Keyword(Keyword::For),
        "while" => TokenKind::Keyword(Keyword::While),
        "return" => TokenKind::Keyword(Keyword::Return),
        "as" => TokenKind::Keyword(Keyword::As),
        "fun" => TokenKind::Keyword(Keyword::Fun),
        _ => TokenKind::Identifier(lexeme.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(source: &str) -> Vec<Token> {
        let lexer = Lexer::new();
        let mut tokens = Vec::new();
        let mut index = 0;
        loop {
            let token = lexer.token_at(source, index);
            if matches!(token.kind, TokenKind::Eof) {
                break;
            }
            index += token.length;
            tokens.push(token);
        }
        tokens
    }

    #[test]
    fn test_lexeme_lengths_cover_the_source() {
        let source = "let x : int = 12 + 3.5; // done\nwhile (x >= 0) { x = x - 1; }";
        let tokens = scan_all(source);
        let total: usize = tokens.iter().map(|t| t.length).sum();
        assert_eq!(total, source.len());
        // Offsets are contiguous.
        let mut expected_start = 0;
        for token in &tokens {
            assert_eq!(token.start, expected_start);
            expected_start += token.length;
        }
    }

    #[test]
    fn test_literals() {
        let lexer = Lexer::new();
        assert_eq!(lexer.token_at("42", 0).kind, TokenKind::IntLiteral(42));
        assert_eq!(lexer.token_at("3.25", 0).kind, TokenKind::FloatLiteral(3.25));
        assert_eq!(
            lexer.token_at("#ff00Aa", 0).kind,
            TokenKind::ColourLiteral(0xff00aa)
        );
        assert_eq!(lexer.token_at("true", 0).kind, TokenKind::BooleanLiteral(true));
        assert_eq!(lexer.token_at("false", 0).kind, TokenKind::BooleanLiteral(false));
    }

    #[test]
    fn test_longest_match_wins() {
        let lexer = Lexer::new();
        // "1." is not a float; the integer is the longest accepting prefix.
        let token = lexer.token_at("1.x", 0);
        assert_eq!(token.kind, TokenKind::IntLiteral(1));
        assert_eq!(token.length, 1);

        let token = lexer.token_at("<=", 0);
        assert_eq!(token.kind, TokenKind::RelOp(RelOp::Le));
        assert_eq!(token.length, 2);

        let token = lexer.token_at("->", 0);
        assert_eq!(token.kind, TokenKind::Punct(Punct::Arrow));
    }

    #[test]
    fn test_keyword_promotion() {
        let lexer = Lexer::new();
        assert_eq!(lexer.token_at("and", 0).kind, TokenKind::MultOp(MultOp::And));
        assert_eq!(lexer.token_at("or", 0).kind, TokenKind::AddOp(AddOp::Or));
        assert_eq!(lexer.token_at("not", 0).kind, TokenKind::UnaryOp);
        assert_eq!(lexer.token_at("int", 0).kind, TokenKind::VarType(Kind::Int));
        assert_eq!(
            lexer.token_at("colour", 0).kind,
            TokenKind::VarType(Kind::Colour)
        );
        assert_eq!(lexer.token_at("fun", 0).kind, TokenKind::Keyword(Keyword::Fun));
        assert_eq!(lexer.token_at("else", 0).kind, TokenKind::Keyword(Keyword::Else));
    }

    #[test]
    fn test_identifiers_may_contain_hex_letters_and_digits() {
        let lexer = Lexer::new();
        let token = lexer.token_at("face_2b", 0);
        assert_eq!(token.kind, TokenKind::Identifier("face_2b".to_string()));
        assert_eq!(token.length, 7);
    }

    #[test]
    fn test_builtins() {
        let lexer = Lexer::new();
        assert_eq!(
            lexer.token_at("__width", 0).kind,
            TokenKind::Builtin(Builtin::Width)
        );
        assert_eq!(
            lexer.token_at("__write_box", 0).kind,
            TokenKind::Builtin(Builtin::WriteBox)
        );
        // A __-prefixed lexeme that is not a builtin spelling is an error
        // token spanning the whole lexeme.
        let token = lexer.token_at("__bogus", 0);
        assert_eq!(token.kind, TokenKind::Error);
        assert_eq!(token.length, 7);
    }

    #[test]
    fn test_unrecognized_byte_is_a_one_byte_error() {
        let lexer = Lexer::new();
        let token = lexer.token_at("?x", 0);
        assert_eq!(token.kind, TokenKind::Error);
        assert_eq!(token.length, 1);
        // A single underscore cannot start an identifier.
        let token = lexer.token_at("_x", 0);
        assert_eq!(token.kind, TokenKind::Error);
        assert_eq!(token.length, 1);
    }

    #[test]
    fn test_colour_needs_exactly_six_hex_digits() {
        let lexer = Lexer::new();
        assert_eq!(lexer.token_at("#12345", 0).kind, TokenKind::Error);
        let token = lexer.token_at("#1234567", 0);
        assert_eq!(token.kind, TokenKind::ColourLiteral(0x123456));
        assert_eq!(token.length, 7);
    }

    #[test]
    fn test_peek_skips_whitespace_and_comments() {
        let lexer = Lexer::new();
        let source = "  // a comment\n  /* block\n comment */  let";
        let (token, start) = lexer.peek(source, 0, true, true);
        assert_eq!(token.kind, TokenKind::Keyword(Keyword::Let));
        assert_eq!(start, source.len() - 3);
    }

    #[test]
    fn test_peek_without_skipping_returns_whitespace() {
        let lexer = Lexer::new();
        let (token, _) = lexer.peek("  x", 0, false, false);
        assert_eq!(token.kind, TokenKind::Whitespace);
        assert_eq!(token.length, 2);
    }

    #[test]
    fn test_line_comment_interior_is_dropped() {
        let lexer = Lexer::new();
        let source = "// let x = ?? 1\ny";
        let (token, _) = lexer.peek(source, 0, true, true);
        assert_eq!(token.kind, TokenKind::Identifier("y".to_string()));
    }

    #[test]
    fn test_unterminated_block_comment_reaches_eof() {
        let lexer = Lexer::new();
        let (token, _) = lexer.peek("/* never closed", 0, true, true);
        assert_eq!(token.kind, TokenKind::Eof);
    }

    #[test]
    fn test_next_advances_past_token() {
        let lexer = Lexer::new();
        let mut index = 0;
        let token = lexer.next("let x", &mut index, true, true);
        assert_eq!(token.kind, TokenKind::Keyword(Keyword::Let));
        assert_eq!(index, 3);
        let token = lexer.next("let x", &mut index, true, true);
        assert_eq!(token.kind, TokenKind::Identifier("x".to_string()));
        assert_eq!(index, 5);
    }

    #[test]
    fn test_mod_operator() {
        let lexer = Lexer::new();
        assert_eq!(lexer.token_at("%", 0).kind, TokenKind::MultOp(MultOp::Mod));
    }
}
