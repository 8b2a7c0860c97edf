//! Display builtins of the PArL language
//!
//! Every builtin is spelled with a `__` prefix in source text and maps to
//! a single VM instruction. Builtins split into two groups: the ones that
//! produce a value (`__width`, `__height`, `__read`, `__random_int`) appear
//! in expressions; the rest are statements.

/// One of the language's `__`-prefixed builtins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Width,
    Height,
    Read,
    RandomInt,
    Print,
    Delay,
    Write,
    WriteBox,
    Clear,
}

/// Source spelling for each builtin. The scanner consults this table when
/// it finishes a `__`-prefixed lexeme; anything not listed here is not a
/// legal token.
pub const BUILTIN_SPELLINGS: &[(&str, Builtin)] = &[
    ("__width", Builtin::Width),
    ("__height", Builtin::Height),
    ("__read", Builtin::Read),
    ("__random_int", Builtin::RandomInt),
    ("__print", Builtin::Print),
    ("__delay", Builtin::Delay),
    ("__write", Builtin::Write),
    ("__write_box", Builtin::WriteBox),
    ("__clear", Builtin::Clear),
];

impl Builtin {
    pub fn from_lexeme(lexeme: &str) -> Option<Builtin> {
        BUILTIN_SPELLINGS
            .iter()
            .find(|(spelling, _)| *spelling == lexeme)
            .map(|(_, builtin)| *builtin)
    }

    pub fn name(self) -> &'static str {
        BUILTIN_SPELLINGS
            .iter()
            .find(|(_, builtin)| *builtin == self)
            .map(|(spelling, _)| *spelling)
            .expect("builtin missing from spelling table")
    }

    /// Whether this builtin yields a value (usable in expression position).
    pub fn is_expression(self) -> bool {
        matches!(
            self,
            Builtin::Width | Builtin::Height | Builtin::Read | Builtin::RandomInt
        )
    }
}
