//! Token types for the lexer.
//!
//! [`TokenKind`] covers every lexeme of the supported subset plus the
//! keywords that are recognised only so they can be rejected with a clear
//! message (`class`, `with`, `yield`, ...).

use evalbox_types::Span;
use std::fmt;

/// Every reserved word. None of these can be used as a name.
pub const ALL_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

// ─────────────────────────────────────────────────────────────────────
// Token
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

// ─────────────────────────────────────────────────────────────────────
// TokenKind
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // ── Literals ──────────────────────────────────────────────
    Int(i64),
    Float(f64),
    /// A complete, escape-processed string literal.
    Str(String),

    // ── f-strings ────────────────────────────────────────────
    /// Opening `f"` of a formatted string.
    FStringStart,
    /// Literal text between replacement fields, with `{{`/`}}` collapsed.
    FStringText(String),
    /// `{` opening a replacement field.
    FieldStart,
    /// `!r`, `!s` or `!a` after a field expression.
    Conversion(char),
    /// Raw text after `:` in a replacement field.
    FormatSpec(String),
    /// `}` closing a replacement field.
    FieldEnd,
    /// Closing quote of a formatted string.
    FStringEnd,

    Identifier(String),

    // ── Keywords ─────────────────────────────────────────────
    False,
    None,
    True,
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Nonlocal,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
    With,
    Yield,

    // ── Operators ────────────────────────────────────────────
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Pipe,
    Amp,
    Caret,
    Tilde,
    LShift,
    RShift,
    Assign,
    EqEq,
    NotEq,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    Arrow,
    Walrus,
    At,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    DoubleSlashEq,
    PercentEq,
    DoubleStarEq,
    PipeEq,
    AmpEq,
    CaretEq,
    LShiftEq,
    RShiftEq,

    // ── Punctuation ──────────────────────────────────────────
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Ellipsis,

    // ── Layout ───────────────────────────────────────────────
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl TokenKind {
    pub fn from_keyword(word: &str) -> Option<Self> {
        let kind = match word {
            "False" => Self::False,
            "None" => Self::None,
            "True" => Self::True,
            "and" => Self::And,
            "as" => Self::As,
            "assert" => Self::Assert,
            "async" => Self::Async,
            "await" => Self::Await,
            "break" => Self::Break,
            "class" => Self::Class,
            "continue" => Self::Continue,
            "def" => Self::Def,
            "del" => Self::Del,
            "elif" => Self::Elif,
            "else" => Self::Else,
            "except" => Self::Except,
            "finally" => Self::Finally,
            "for" => Self::For,
            "from" => Self::From,
            "global" => Self::Global,
            "if" => Self::If,
            "import" => Self::Import,
            "in" => Self::In,
            "is" => Self::Is,
            "lambda" => Self::Lambda,
            "nonlocal" => Self::Nonlocal,
            "not" => Self::Not,
            "or" => Self::Or,
            "pass" => Self::Pass,
            "raise" => Self::Raise,
            "return" => Self::Return,
            "try" => Self::Try,
            "while" => Self::While,
            "with" => Self::With,
            "yield" => Self::Yield,
            _ => return None,
        };
        Some(kind)
    }

    /// Source text for fixed tokens; `None` for literals and layout.
    pub fn lexeme(&self) -> Option<&'static str> {
        let s = match self {
            Self::False => "False",
            Self::None => "None",
            Self::True => "True",
            Self::And => "and",
            Self::As => "as",
            Self::Assert => "assert",
            Self::Async => "async",
            Self::Await => "await",
            Self::Break => "break",
            Self::Class => "class",
            Self::Continue => "continue",
            Self::Def => "def",
            Self::Del => "del",
            Self::Elif => "elif",
            Self::Else => "else",
            Self::Except => "except",
            Self::Finally => "finally",
            Self::For => "for",
            Self::From => "from",
            Self::Global => "global",
            Self::If => "if",
            Self::Import => "import",
            Self::In => "in",
            Self::Is => "is",
            Self::Lambda => "lambda",
            Self::Nonlocal => "nonlocal",
            Self::Not => "not",
            Self::Or => "or",
            Self::Pass => "pass",
            Self::Raise => "raise",
            Self::Return => "return",
            Self::Try => "try",
            Self::While => "while",
            Self::With => "with",
            Self::Yield => "yield",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::DoubleStar => "**",
            Self::Slash => "/",
            Self::DoubleSlash => "//",
            Self::Percent => "%",
            Self::Pipe => "|",
            Self::Amp => "&",
            Self::Caret => "^",
            Self::Tilde => "~",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::Assign => "=",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Less => "<",
            Self::Greater => ">",
            Self::LessEq => "<=",
            Self::GreaterEq => ">=",
            Self::Arrow => "->",
            Self::Walrus => ":=",
            Self::At => "@",
            Self::PlusEq => "+=",
            Self::MinusEq => "-=",
            Self::StarEq => "*=",
            Self::SlashEq => "/=",
            Self::DoubleSlashEq => "//=",
            Self::PercentEq => "%=",
            Self::DoubleStarEq => "**=",
            Self::PipeEq => "|=",
            Self::AmpEq => "&=",
            Self::CaretEq => "^=",
            Self::LShiftEq => "<<=",
            Self::RShiftEq => ">>=",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::Comma => ",",
            Self::Colon => ":",
            Self::Dot => ".",
            Self::Semicolon => ";",
            Self::Ellipsis => "...",
            _ => return None,
        };
        Some(s)
    }

    pub fn is_keyword(&self) -> bool {
        self.lexeme()
            .is_some_and(|s| s.starts_with(|c: char| c.is_ascii_alphabetic()))
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(lexeme) = self.lexeme() {
            return write!(f, "'{lexeme}'");
        }
        match self {
            Self::Int(n) => write!(f, "integer {n}"),
            Self::Float(n) => write!(f, "number {n}"),
            Self::Str(_) => write!(f, "string literal"),
            Self::FStringStart => write!(f, "f-string"),
            Self::FStringText(_) => write!(f, "f-string text"),
            Self::FieldStart => write!(f, "'{{'"),
            Self::FieldEnd => write!(f, "'}}'"),
            Self::Conversion(c) => write!(f, "'!{c}'"),
            Self::FormatSpec(_) => write!(f, "format specifier"),
            Self::FStringEnd => write!(f, "end of f-string"),
            Self::Identifier(name) => write!(f, "name '{name}'"),
            Self::Newline => write!(f, "end of line"),
            Self::Indent => write!(f, "indent"),
            Self::Dedent => write!(f, "dedent"),
            Self::Eof => write!(f, "end of input"),
            _ => write!(f, "{self:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_keyword_round_trips_through_lexeme() {
        for word in ALL_KEYWORDS {
            let kind = TokenKind::from_keyword(word).unwrap();
            assert_eq!(kind.lexeme(), Some(*word));
            assert!(kind.is_keyword(), "{word}");
        }
    }

    #[test]
    fn test_operators_are_not_keywords() {
        assert!(!TokenKind::DoubleStar.is_keyword());
        assert!(!TokenKind::Identifier("x".into()).is_keyword());
    }

    #[test]
    fn test_display() {
        assert_eq!(TokenKind::Def.to_string(), "'def'");
        assert_eq!(TokenKind::Identifier("n".into()).to_string(), "name 'n'");
        assert_eq!(TokenKind::Indent.to_string(), "indent");
    }
}
