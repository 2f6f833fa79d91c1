//! Core lexer: source text to token stream.
//!
//! Features:
//! - Indentation tracked with a width stack, emitted as `Indent`/`Dedent`
//! - Blank and comment-only lines skipped entirely
//! - Implicit line joining inside `()`, `[]`, `{}` and backslash continuation
//! - f-string replacement fields scanned through a mode stack
//! - Error recovery: collects up to 20 diagnostics instead of stopping at the first

use std::collections::VecDeque;

use evalbox_types::{Diagnostics, SourceFile, Span, SyntaxDiagnostic};

use crate::token::{Token, TokenKind};

const TAB_WIDTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    /// Literal text of an f-string.
    FString { quote: char, triple: bool, raw: bool },
    /// Inside `{...}` of an f-string; `depth` counts brackets opened in the field.
    Field { depth: u32 },
}

pub struct Lexer<'src> {
    chars: Vec<char>,
    source_file: &'src SourceFile,
    pos: usize,
    line: u32,
    col: u32,
    errors: Diagnostics,
    mode_stack: Vec<Mode>,
    pending: VecDeque<Token>,
    indent_stack: Vec<usize>,
    bracket_depth: u32,
    at_line_start: bool,
}

/// Tokens plus any diagnostics collected while producing them.
pub struct LexResult {
    /// Always ends with [`TokenKind::Eof`].
    pub tokens: Vec<Token>,
    pub errors: Diagnostics,
}

impl<'src> Lexer<'src> {
    pub fn new(source_file: &'src SourceFile) -> Self {
        Self {
            chars: source_file.source.chars().collect(),
            source_file,
            pos: 0,
            line: 1,
            col: 1,
            errors: Diagnostics::empty(),
            mode_stack: vec![Mode::Normal],
            pending: VecDeque::new(),
            indent_stack: vec![0],
            bracket_depth: 0,
            at_line_start: true,
        }
    }

    pub fn lex(mut self) -> LexResult {
        let mut tokens = Vec::new();

        loop {
            if self.errors.is_saturated() {
                break;
            }

            let token = match self.pending.pop_front() {
                Some(token) => token,
                None => match self.current_mode() {
                    Mode::Normal | Mode::Field { .. } => self.scan_code(),
                    Mode::FString { quote, triple, raw } => self.scan_fstring_text(quote, triple, raw),
                },
            };

            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }

        if tokens.last().is_none_or(|t| t.kind != TokenKind::Eof) {
            tokens.push(Token::new(TokenKind::Eof, self.current_span()));
        }

        LexResult {
            tokens,
            errors: self.errors,
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Mode stack helpers
    // ─────────────────────────────────────────────────────────────

    fn current_mode(&self) -> Mode {
        self.mode_stack.last().copied().unwrap_or(Mode::Normal)
    }

    fn pop_mode(&mut self) {
        if self.mode_stack.len() > 1 {
            self.mode_stack.pop();
        }
    }

    fn set_field_depth(&mut self, depth: u32) {
        if let Some(Mode::Field { depth: d }) = self.mode_stack.last_mut() {
            *d = depth;
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Character-level helpers
    // ─────────────────────────────────────────────────────────────

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn current_span(&self) -> Span {
        Span::point(self.line, self.col)
    }

    fn span_from(&self, start_line: u32, start_col: u32) -> Span {
        Span::new(start_line, start_col, self.line, self.col.saturating_sub(1).max(1))
    }

    fn emit_error(&mut self, message: impl Into<String>, span: Span) {
        let source_line = self.source_file.line(span.start_line).unwrap_or("");
        self.errors
            .push(SyntaxDiagnostic::new(message, span, source_line));
    }

    fn skip_to_line_end(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Indentation
    // ─────────────────────────────────────────────────────────────

    /// Measure the next non-blank line's indentation and queue layout tokens.
    fn handle_indentation(&mut self) {
        let width = loop {
            let mut width = 0;
            while let Some(ch) = self.peek() {
                match ch {
                    ' ' => width += 1,
                    '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                    '\r' | '\x0c' => {}
                    _ => break,
                }
                self.advance();
            }
            match self.peek() {
                Some('\n') => {
                    self.advance();
                }
                Some('#') => {
                    self.skip_to_line_end();
                    self.advance();
                }
                None => return,
                Some(_) => break width,
            }
        };
        self.at_line_start = false;

        let current = self.indent_stack.last().copied().unwrap_or(0);
        let span = self.current_span();
        if width > current {
            self.indent_stack.push(width);
            self.pending.push_back(Token::new(TokenKind::Indent, span));
            return;
        }
        while self.indent_stack.last().is_some_and(|&w| w > width) {
            self.indent_stack.pop();
            self.pending.push_back(Token::new(TokenKind::Dedent, span));
        }
        if self.indent_stack.last().copied().unwrap_or(0) != width {
            self.emit_error("unindent does not match any outer indentation level", span);
            self.indent_stack.push(width);
        }
    }

    /// Layout tokens that close the final logical line.
    fn finish(&mut self) -> Token {
        if matches!(self.current_mode(), Mode::Field { .. }) {
            self.emit_error("unterminated f-string replacement field", self.current_span());
            self.mode_stack.truncate(1);
        }
        let span = self.current_span();
        if !self.at_line_start {
            self.at_line_start = true;
            return Token::new(TokenKind::Newline, span);
        }
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.pending.push_back(Token::new(TokenKind::Dedent, span));
        }
        self.pending.push_back(Token::new(TokenKind::Eof, span));
        self.pending
            .pop_front()
            .unwrap_or_else(|| Token::new(TokenKind::Eof, span))
    }

    // ─────────────────────────────────────────────────────────────
    // Code scanning
    // ─────────────────────────────────────────────────────────────

    fn scan_code(&mut self) -> Token {
        loop {
            let in_field = matches!(self.current_mode(), Mode::Field { .. });
            if self.at_line_start && !in_field && self.bracket_depth == 0 {
                self.handle_indentation();
                if let Some(token) = self.pending.pop_front() {
                    return token;
                }
            }

            while matches!(self.peek(), Some(' ' | '\t' | '\r' | '\x0c')) {
                self.advance();
            }

            match self.peek() {
                None => return self.finish(),
                Some('#') => self.skip_to_line_end(),
                Some('\\') if self.peek_at(1) == Some('\n') => {
                    self.advance();
                    self.advance();
                }
                Some('\\') if self.peek_at(1) == Some('\r') && self.peek_at(2) == Some('\n') => {
                    self.advance();
                    self.advance();
                    self.advance();
                }
                Some('\n') => {
                    let start = self.current_span();
                    self.advance();
                    if self.bracket_depth == 0 && !in_field {
                        self.at_line_start = true;
                        return Token::new(TokenKind::Newline, start);
                    }
                }
                Some(_) => return self.scan_token(),
            }
        }
    }

    fn scan_token(&mut self) -> Token {
        let start_line = self.line;
        let start_col = self.col;
        let Some(ch) = self.advance() else {
            return Token::new(TokenKind::Eof, self.current_span());
        };

        if let Mode::Field { depth: 0 } = self.current_mode() {
            match ch {
                '}' => {
                    self.pop_mode();
                    return Token::new(TokenKind::FieldEnd, self.span_from(start_line, start_col));
                }
                ':' => return self.scan_format_spec(start_line, start_col),
                '!' if matches!(self.peek(), Some('r' | 's' | 'a'))
                    && matches!(self.peek_at(1), Some(':' | '}')) =>
                {
                    let conv = self.advance().unwrap_or('s');
                    return Token::new(TokenKind::Conversion(conv), self.span_from(start_line, start_col));
                }
                _ => {}
            }
        }

        let kind = match ch {
            '"' | '\'' => return self.scan_string(ch, "", start_line, start_col),
            c if c.is_ascii_digit() => return self.scan_number(c, start_line, start_col),
            '.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => {
                return self.scan_number('.', start_line, start_col)
            }
            c if c == '_' || c.is_alphabetic() => return self.scan_word(c, start_line, start_col),

            '(' | '[' | '{' => {
                self.open_bracket();
                match ch {
                    '(' => TokenKind::LParen,
                    '[' => TokenKind::LBracket,
                    _ => TokenKind::LBrace,
                }
            }
            ')' | ']' | '}' => {
                self.close_bracket();
                match ch {
                    ')' => TokenKind::RParen,
                    ']' => TokenKind::RBracket,
                    _ => TokenKind::RBrace,
                }
            }
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '~' => TokenKind::Tilde,
            '@' => TokenKind::At,
            '.' => {
                if self.peek() == Some('.') && self.peek_at(1) == Some('.') {
                    self.advance();
                    self.advance();
                    TokenKind::Ellipsis
                } else {
                    TokenKind::Dot
                }
            }
            ':' => self.pick('=', TokenKind::Walrus, TokenKind::Colon),
            '+' => self.pick('=', TokenKind::PlusEq, TokenKind::Plus),
            '%' => self.pick('=', TokenKind::PercentEq, TokenKind::Percent),
            '|' => self.pick('=', TokenKind::PipeEq, TokenKind::Pipe),
            '&' => self.pick('=', TokenKind::AmpEq, TokenKind::Amp),
            '^' => self.pick('=', TokenKind::CaretEq, TokenKind::Caret),
            '=' => self.pick('=', TokenKind::EqEq, TokenKind::Assign),
            '-' => {
                if self.eat('>') {
                    TokenKind::Arrow
                } else {
                    self.pick('=', TokenKind::MinusEq, TokenKind::Minus)
                }
            }
            '*' => {
                if self.eat('*') {
                    self.pick('=', TokenKind::DoubleStarEq, TokenKind::DoubleStar)
                } else {
                    self.pick('=', TokenKind::StarEq, TokenKind::Star)
                }
            }
            '/' => {
                if self.eat('/') {
                    self.pick('=', TokenKind::DoubleSlashEq, TokenKind::DoubleSlash)
                } else {
                    self.pick('=', TokenKind::SlashEq, TokenKind::Slash)
                }
            }
            '<' => {
                if self.eat('<') {
                    self.pick('=', TokenKind::LShiftEq, TokenKind::LShift)
                } else {
                    self.pick('=', TokenKind::LessEq, TokenKind::Less)
                }
            }
            '>' => {
                if self.eat('>') {
                    self.pick('=', TokenKind::RShiftEq, TokenKind::RShift)
                } else {
                    self.pick('=', TokenKind::GreaterEq, TokenKind::Greater)
                }
            }
            '!' if self.eat('=') => TokenKind::NotEq,
            other => {
                let span = self.span_from(start_line, start_col);
                self.emit_error(format!("invalid character '{other}'"), span);
                return self.scan_code();
            }
        };

        Token::new(kind, self.span_from(start_line, start_col))
    }

    fn pick(&mut self, next: char, joined: TokenKind, single: TokenKind) -> TokenKind {
        if self.eat(next) {
            joined
        } else {
            single
        }
    }

    fn open_bracket(&mut self) {
        self.bracket_depth += 1;
        if let Mode::Field { depth } = self.current_mode() {
            self.set_field_depth(depth + 1);
        }
    }

    fn close_bracket(&mut self) {
        self.bracket_depth = self.bracket_depth.saturating_sub(1);
        if let Mode::Field { depth } = self.current_mode() {
            self.set_field_depth(depth.saturating_sub(1));
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Names and numbers
    // ─────────────────────────────────────────────────────────────

    fn scan_word(&mut self, first: char, start_line: u32, start_col: u32) -> Token {
        let mut word = String::from(first);
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                word.push(c);
                self.advance();
            } else {
                break;
            }
        }

        if matches!(self.peek(), Some('"' | '\'')) && is_string_prefix(&word) {
            let quote = self.advance().unwrap_or('"');
            return self.scan_string(quote, &word, start_line, start_col);
        }

        let kind = TokenKind::from_keyword(&word).unwrap_or(TokenKind::Identifier(word));
        Token::new(kind, self.span_from(start_line, start_col))
    }

    fn scan_number(&mut self, first: char, start_line: u32, start_col: u32) -> Token {
        if first == '0' {
            let radix = match self.peek() {
                Some('x' | 'X') => Some(16),
                Some('o' | 'O') => Some(8),
                Some('b' | 'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.advance();
                let digits = self.take_digits(|c| c.is_digit(radix));
                let span = self.span_from(start_line, start_col);
                return match i64::from_str_radix(&digits, radix) {
                    Ok(n) => Token::new(TokenKind::Int(n), span),
                    Err(_) if digits.is_empty() => {
                        self.emit_error("invalid integer literal", span);
                        Token::new(TokenKind::Int(0), span)
                    }
                    Err(_) => {
                        self.emit_error("integer literal is too large", span);
                        Token::new(TokenKind::Int(0), span)
                    }
                };
            }
        }

        let mut text = String::new();
        let mut is_float = false;
        if first == '.' {
            is_float = true;
            text.push_str("0.");
        } else {
            text.push(first);
            text.push_str(&self.take_digits(|c| c.is_ascii_digit()));
            if self.peek() == Some('.') && self.peek_at(1) != Some('.') {
                self.advance();
                is_float = true;
                text.push('.');
            }
        }
        if is_float {
            text.push_str(&self.take_digits(|c| c.is_ascii_digit()));
        }
        if matches!(self.peek(), Some('e' | 'E'))
            && (self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
                || (matches!(self.peek_at(1), Some('+' | '-'))
                    && self.peek_at(2).is_some_and(|c| c.is_ascii_digit())))
        {
            is_float = true;
            text.push('e');
            self.advance();
            if let Some(sign @ ('+' | '-')) = self.peek() {
                text.push(sign);
                self.advance();
            }
            text.push_str(&self.take_digits(|c| c.is_ascii_digit()));
        }

        if matches!(self.peek(), Some('j' | 'J')) {
            self.advance();
            let span = self.span_from(start_line, start_col);
            self.emit_error("complex literals are not supported", span);
            return Token::new(TokenKind::Int(0), span);
        }

        let span = self.span_from(start_line, start_col);
        if is_float {
            match text.parse::<f64>() {
                Ok(n) => Token::new(TokenKind::Float(n), span),
                Err(_) => {
                    self.emit_error("invalid float literal", span);
                    Token::new(TokenKind::Float(0.0), span)
                }
            }
        } else {
            match text.parse::<i64>() {
                Ok(n) => Token::new(TokenKind::Int(n), span),
                Err(_) => {
                    self.emit_error("integer literal is too large", span);
                    Token::new(TokenKind::Int(0), span)
                }
            }
        }
    }

    /// Digits accepted by `accept`, with single `_` separators removed.
    fn take_digits(&mut self, accept: impl Fn(char) -> bool) -> String {
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if accept(c) {
                digits.push(c);
                self.advance();
            } else if c == '_' && self.peek_at(1).is_some_and(&accept) {
                self.advance();
            } else {
                break;
            }
        }
        digits
    }

    // ─────────────────────────────────────────────────────────────
    // Strings
    // ─────────────────────────────────────────────────────────────

    /// Called with the opening quote already consumed.
    fn scan_string(&mut self, quote: char, prefix: &str, start_line: u32, start_col: u32) -> Token {
        let lower = prefix.to_ascii_lowercase();
        let raw = lower.contains('r');
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.advance();
            self.advance();
        }

        if lower.contains('b') {
            let span = self.span_from(start_line, start_col);
            self.emit_error("bytes literals are not supported", span);
        }
        if lower.contains('f') {
            self.mode_stack.push(Mode::FString { quote, triple, raw });
            return Token::new(TokenKind::FStringStart, self.span_from(start_line, start_col));
        }

        let mut value = String::new();
        loop {
            match self.peek() {
                None => {
                    let span = self.span_from(start_line, start_col);
                    self.emit_error("unterminated string literal", span);
                    break;
                }
                Some('\n') if !triple => {
                    let span = self.span_from(start_line, start_col);
                    self.emit_error("unterminated string literal", span);
                    break;
                }
                Some(c) if c == quote && self.closes(quote, triple) => {
                    self.consume_close(triple);
                    break;
                }
                Some('\\') => self.scan_escape(&mut value, raw),
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
        Token::new(TokenKind::Str(value), self.span_from(start_line, start_col))
    }

    fn closes(&self, quote: char, triple: bool) -> bool {
        !triple || (self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote))
    }

    fn consume_close(&mut self, triple: bool) {
        let n = if triple { 3 } else { 1 };
        for _ in 0..n {
            self.advance();
        }
    }

    /// Append the escape at the cursor (a backslash) to `out`.
    fn scan_escape(&mut self, out: &mut String, raw: bool) {
        let start = self.current_span();
        self.advance();
        let Some(c) = self.peek() else {
            out.push('\\');
            return;
        };
        if raw {
            out.push('\\');
            out.push(c);
            self.advance();
            return;
        }
        self.advance();
        match c {
            '\n' => {}
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '\\' | '\'' | '"' => out.push(c),
            'x' | 'u' | 'U' => {
                let len = match c {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let mut hex = String::new();
                for _ in 0..len {
                    match self.peek() {
                        Some(h) if h.is_ascii_hexdigit() => {
                            hex.push(h);
                            self.advance();
                        }
                        _ => break,
                    }
                }
                match u32::from_str_radix(&hex, 16).ok().filter(|_| hex.len() == len).and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => self.emit_error(format!("truncated \\{c} escape"), start),
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }

    /// Scan literal text of an f-string up to the next field or the closing quote.
    fn scan_fstring_text(&mut self, quote: char, triple: bool, raw: bool) -> Token {
        let start_line = self.line;
        let start_col = self.col;
        let mut text = String::new();

        loop {
            match self.peek() {
                None => {
                    let span = self.span_from(start_line, start_col);
                    self.emit_error("unterminated f-string", span);
                    self.pop_mode();
                    break;
                }
                Some('\n') if !triple => {
                    let span = self.span_from(start_line, start_col);
                    self.emit_error("unterminated f-string", span);
                    self.pop_mode();
                    break;
                }
                Some('{') if self.peek_at(1) == Some('{') => {
                    text.push('{');
                    self.advance();
                    self.advance();
                }
                Some('}') if self.peek_at(1) == Some('}') => {
                    text.push('}');
                    self.advance();
                    self.advance();
                }
                Some('}') => {
                    let span = self.current_span();
                    self.emit_error("f-string: single '}' is not allowed", span);
                    self.advance();
                }
                Some('{') => {
                    if !text.is_empty() {
                        return Token::new(TokenKind::FStringText(text), self.span_from(start_line, start_col));
                    }
                    self.advance();
                    self.mode_stack.push(Mode::Field { depth: 0 });
                    return Token::new(TokenKind::FieldStart, self.span_from(start_line, start_col));
                }
                Some(c) if c == quote && self.closes(quote, triple) => {
                    if !text.is_empty() {
                        return Token::new(TokenKind::FStringText(text), self.span_from(start_line, start_col));
                    }
                    self.consume_close(triple);
                    self.pop_mode();
                    return Token::new(TokenKind::FStringEnd, self.span_from(start_line, start_col));
                }
                Some('\\') => self.scan_escape(&mut text, raw),
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }

        if text.is_empty() {
            Token::new(TokenKind::FStringEnd, self.span_from(start_line, start_col))
        } else {
            self.pending
                .push_back(Token::new(TokenKind::FStringEnd, self.current_span()));
            Token::new(TokenKind::FStringText(text), self.span_from(start_line, start_col))
        }
    }

    /// Raw text between `:` and the field's closing `}`.
    fn scan_format_spec(&mut self, start_line: u32, start_col: u32) -> Token {
        let mut spec = String::new();
        while let Some(c) = self.peek() {
            match c {
                '}' | '\n' => break,
                '{' => {
                    let span = self.current_span();
                    self.emit_error("nested format specifiers are not supported", span);
                    self.advance();
                }
                _ => {
                    spec.push(c);
                    self.advance();
                }
            }
        }
        Token::new(TokenKind::FormatSpec(spec), self.span_from(start_line, start_col))
    }
}

fn is_string_prefix(word: &str) -> bool {
    matches!(
        word.to_ascii_lowercase().as_str(),
        "r" | "u" | "f" | "b" | "rf" | "fr" | "rb" | "br"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let sf = SourceFile::new("<test>", source);
        Lexer::new(&sf).lex().tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_minimal_function_layout() {
        use TokenKind::*;
        assert_eq!(
            kinds("def f():\n    return 1\n"),
            vec![
                Def,
                Identifier("f".into()),
                LParen,
                RParen,
                Colon,
                Newline,
                Indent,
                Return,
                Int(1),
                Newline,
                Dedent,
                Eof
            ]
        );
    }

    #[test]
    fn test_missing_trailing_newline_still_closes_blocks() {
        let k = kinds("if x:\n  y");
        assert_eq!(&k[k.len() - 3..], &[TokenKind::Newline, TokenKind::Dedent, TokenKind::Eof]);
    }
}
