//! Lexer tests: layout tokens, literals, f-strings and error recovery.

use evalbox_lexer::{Lexer, TokenKind};
use evalbox_types::SourceFile;

// ─────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────

/// Lex source text and return the token kinds including the final Eof.
fn kinds(source: &str) -> Vec<TokenKind> {
    let sf = SourceFile::new("test.py", source);
    Lexer::new(&sf).lex().tokens.into_iter().map(|t| t.kind).collect()
}

/// Lex source text and return the diagnostic messages.
fn errors(source: &str) -> Vec<String> {
    let sf = SourceFile::new("test.py", source);
    Lexer::new(&sf)
        .lex()
        .errors
        .errors
        .into_iter()
        .map(|e| e.message)
        .collect()
}

fn ident(name: &str) -> TokenKind {
    TokenKind::Identifier(name.to_string())
}

fn single(source: &str) -> TokenKind {
    let mut all = kinds(source);
    assert_eq!(all.len(), 3, "expected one token, newline and eof: {all:?}");
    all.remove(0)
}

// ─────────────────────────────────────────────────────────────────────
// Layout
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_empty_source_is_just_eof() {
    assert_eq!(kinds(""), vec![TokenKind::Eof]);
    assert_eq!(kinds("\n\n# only a comment\n"), vec![TokenKind::Eof]);
}

#[test]
fn test_block_produces_indent_and_dedent() {
    assert_eq!(
        kinds("if x:\n    y\nz\n"),
        vec![
            TokenKind::If,
            ident("x"),
            TokenKind::Colon,
            TokenKind::Newline,
            TokenKind::Indent,
            ident("y"),
            TokenKind::Newline,
            TokenKind::Dedent,
            ident("z"),
            TokenKind::Newline,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_nested_blocks_close_at_eof() {
    let tokens = kinds("def f():\n    if x:\n        return 1");
    let dedents = tokens.iter().filter(|k| **k == TokenKind::Dedent).count();
    assert_eq!(dedents, 2);
    assert_eq!(tokens.last(), Some(&TokenKind::Eof));
}

#[test]
fn test_blank_and_comment_lines_do_not_affect_indentation() {
    let tokens = kinds("def f():\n\n    # note\n    return 1\n");
    assert_eq!(tokens.iter().filter(|k| **k == TokenKind::Indent).count(), 1);
}

#[test]
fn test_brackets_join_lines() {
    assert_eq!(
        kinds("x = [1,\n     2]\n"),
        vec![
            ident("x"),
            TokenKind::Assign,
            TokenKind::LBracket,
            TokenKind::Int(1),
            TokenKind::Comma,
            TokenKind::Int(2),
            TokenKind::RBracket,
            TokenKind::Newline,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_backslash_continuation() {
    let tokens = kinds("x = 1 + \\\n    2\n");
    assert!(!tokens.contains(&TokenKind::Indent));
    assert_eq!(tokens.iter().filter(|k| **k == TokenKind::Newline).count(), 1);
}

#[test]
fn test_inconsistent_dedent_is_an_error() {
    let errs = errors("if x:\n        a\n    b\n");
    assert_eq!(errs, vec!["unindent does not match any outer indentation level"]);
}

// ─────────────────────────────────────────────────────────────────────
// Literals
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_integer_literals() {
    assert_eq!(single("42"), TokenKind::Int(42));
    assert_eq!(single("1_000_000"), TokenKind::Int(1_000_000));
    assert_eq!(single("0xff"), TokenKind::Int(255));
    assert_eq!(single("0o17"), TokenKind::Int(15));
    assert_eq!(single("0b101"), TokenKind::Int(5));
}

#[test]
fn test_integer_overflow_is_an_error() {
    assert_eq!(errors("99999999999999999999"), vec!["integer literal is too large"]);
}

#[test]
fn test_float_literals() {
    assert_eq!(single("3.5"), TokenKind::Float(3.5));
    assert_eq!(single(".5"), TokenKind::Float(0.5));
    assert_eq!(single("1e3"), TokenKind::Float(1000.0));
    assert_eq!(single("2.5E-1"), TokenKind::Float(0.25));
}

#[test]
fn test_string_escapes() {
    assert_eq!(single(r#""a\tb\n""#), TokenKind::Str("a\tb\n".into()));
    assert_eq!(single(r#"'\x41\u00e9'"#), TokenKind::Str("Aé".into()));
    assert_eq!(single(r#"r'\d+'"#), TokenKind::Str("\\d+".into()));
    assert_eq!(single("'''multi\nline'''"), TokenKind::Str("multi\nline".into()));
}

#[test]
fn test_unterminated_string_is_an_error() {
    assert_eq!(errors("x = 'abc\n"), vec!["unterminated string literal"]);
}

#[test]
fn test_keywords_and_identifiers() {
    assert_eq!(
        kinds("lambda x: not x"),
        vec![
            TokenKind::Lambda,
            ident("x"),
            TokenKind::Colon,
            TokenKind::Not,
            ident("x"),
            TokenKind::Newline,
            TokenKind::Eof,
        ]
    );
    assert_eq!(single("None"), TokenKind::None);
    assert_eq!(single("_private"), ident("_private"));
}

#[test]
fn test_compound_operators() {
    let tokens = kinds("a //= b ** 2 != c");
    assert_eq!(
        &tokens[..6],
        &[
            ident("a"),
            TokenKind::DoubleSlashEq,
            ident("b"),
            TokenKind::DoubleStar,
            TokenKind::Int(2),
            TokenKind::NotEq,
        ]
    );
}

// ─────────────────────────────────────────────────────────────────────
// f-strings
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_fstring_fields() {
    assert_eq!(
        kinds("f'a{x}b'"),
        vec![
            TokenKind::FStringStart,
            TokenKind::FStringText("a".into()),
            TokenKind::FieldStart,
            ident("x"),
            TokenKind::FieldEnd,
            TokenKind::FStringText("b".into()),
            TokenKind::FStringEnd,
            TokenKind::Newline,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_fstring_conversion_and_spec() {
    let tokens = kinds("f'{v!r:>8}'");
    assert!(tokens.contains(&TokenKind::Conversion('r')));
    assert!(tokens.contains(&TokenKind::FormatSpec(">8".into())));
}

#[test]
fn test_fstring_doubled_braces_are_literal() {
    let tokens = kinds("f'{{x}}'");
    assert!(tokens.contains(&TokenKind::FStringText("{x}".into())));
    assert!(!tokens.contains(&TokenKind::FieldStart));
}

#[test]
fn test_fstring_single_close_brace_is_an_error() {
    assert_eq!(errors("f'a}b'"), vec!["f-string: single '}' is not allowed"]);
}

// ─────────────────────────────────────────────────────────────────────
// Recovery
// ─────────────────────────────────────────────────────────────────────

#[test]
fn test_invalid_character_is_reported_and_skipped() {
    let sf = SourceFile::new("test.py", "x = 1 $ 2\n");
    let result = Lexer::new(&sf).lex();
    assert_eq!(result.errors.total, 1);
    assert_eq!(result.errors.errors[0].message, "invalid character '$'");
    assert_eq!(result.errors.errors[0].span.start_col, 7);
    assert_eq!(result.tokens.last().map(|t| &t.kind), Some(&TokenKind::Eof));
}

#[test]
fn test_lexing_is_deterministic() {
    let source = "def f(xs):\n    return [x * 2 for x in xs if x]\n";
    let first = kinds(source);
    for _ in 0..50 {
        assert_eq!(kinds(source), first);
    }
}
