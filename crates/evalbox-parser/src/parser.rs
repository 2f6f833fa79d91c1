//! Core parser infrastructure: token cursor, error reporting, blocks.

use evalbox_lexer::{Token, TokenKind};
use evalbox_types::ast::{Ident, Module, Stmt};
use evalbox_types::{Diagnostics, SourceFile, Span, SyntaxDiagnostic};

/// Deepest expression or block nesting accepted before parsing stops.
pub const MAX_NESTING: u32 = 100;

/// Consumes a token stream produced by the lexer and builds a [`Module`].
///
/// Collects diagnostics and resynchronises at line boundaries so several
/// independent mistakes can be reported from one pass.
pub struct Parser<'src> {
    tokens: Vec<Token>,
    pos: usize,
    source_file: &'src SourceFile,
    errors: Diagnostics,
    depth: u32,
    pub(crate) in_function: bool,
    pub(crate) loop_depth: u32,
}

pub struct ParseResult {
    /// `None` only when no statement could be recovered.
    pub module: Option<Module>,
    pub errors: Diagnostics,
}

impl<'src> Parser<'src> {
    pub fn new(tokens: Vec<Token>, source_file: &'src SourceFile) -> Self {
        let mut tokens = tokens;
        if tokens.last().is_none_or(|t| t.kind != TokenKind::Eof) {
            tokens.push(Token::new(TokenKind::Eof, Span::point(1, 1)));
        }
        Self {
            tokens,
            pos: 0,
            source_file,
            errors: Diagnostics::empty(),
            depth: 0,
            in_function: false,
            loop_depth: 0,
        }
    }

    pub fn parse(mut self) -> ParseResult {
        let start = self.current_span();
        let mut body = Vec::new();

        loop {
            self.skip_newlines();
            if self.at_end() || self.too_many_errors() {
                break;
            }
            if self.check(&TokenKind::Indent) {
                self.error_at_current("unexpected indent");
                self.skip_block();
                continue;
            }
            if self.check(&TokenKind::Dedent) {
                self.advance();
                continue;
            }
            self.parse_statement(&mut body);
        }

        let span = start.merge(self.previous_span());
        let module = (!body.is_empty() || !self.errors.has_errors()).then(|| Module { body, span });
        ParseResult {
            module,
            errors: self.errors,
        }
    }

    // ── Token Cursor ──────────────────────────────────────────────────────────

    pub(crate) fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    pub(crate) fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn previous_span(&self) -> Span {
        match self.pos.checked_sub(1) {
            Some(prev) => self.tokens[prev].span,
            None => Span::point(1, 1),
        }
    }

    pub(crate) fn current_span(&self) -> Span {
        self.peek().span
    }

    pub(crate) fn at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    pub(crate) fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    pub(crate) fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn look_ahead(&self, n: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + n)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    pub(crate) fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    // ── Expect Helpers ────────────────────────────────────────────────────────

    pub(crate) fn expect(&mut self, expected: &TokenKind) -> Option<Token> {
        if self.check(expected) {
            Some(self.advance())
        } else {
            self.error_at_current(format!("expected {}, got {}", expected, self.peek_kind()));
            None
        }
    }

    pub(crate) fn expect_identifier(&mut self) -> Option<Ident> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                let span = self.advance().span;
                Some(Ident::new(name, span))
            }
            other if other.is_keyword() => {
                self.error_at_current(format!("{other} is a reserved word and cannot be used as a name"));
                None
            }
            other => {
                self.error_at_current(format!("expected a name, got {other}"));
                None
            }
        }
    }

    /// Consume the `Newline` that ends a simple statement line.
    pub(crate) fn expect_line_end(&mut self) {
        match self.peek_kind() {
            TokenKind::Newline => {
                self.advance();
            }
            TokenKind::Eof | TokenKind::Dedent => {}
            other => {
                let message = format!("invalid syntax: unexpected {other}");
                self.error_at_current(message);
                self.synchronize();
            }
        }
    }

    // ── Blocks ────────────────────────────────────────────────────────────────

    /// Parse the suite after a compound statement's `:`.
    pub(crate) fn parse_block(&mut self, owner: &str) -> Vec<Stmt> {
        let mut body = Vec::new();
        if self.expect(&TokenKind::Colon).is_none() {
            self.synchronize();
            return body;
        }

        if !self.eat(&TokenKind::Newline) {
            self.parse_simple_line(&mut body);
            return body;
        }

        if !self.eat(&TokenKind::Indent) {
            self.error_at_current(format!("expected an indented block after {owner}"));
            return body;
        }

        if !self.enter_nesting() {
            self.skip_indented_rest();
            return body;
        }
        loop {
            self.skip_newlines();
            if self.eat(&TokenKind::Dedent) || self.at_end() || self.too_many_errors() {
                break;
            }
            if self.check(&TokenKind::Indent) {
                self.error_at_current("unexpected indent");
                self.skip_block();
                continue;
            }
            self.parse_statement(&mut body);
        }
        self.leave_nesting();
        body
    }

    /// Parse a loop body with `break` and `continue` allowed.
    pub(crate) fn parse_loop_body(&mut self, owner: &str) -> Vec<Stmt> {
        self.loop_depth += 1;
        let body = self.parse_block(owner);
        self.loop_depth -= 1;
        body
    }

    pub(crate) fn enter_nesting(&mut self) -> bool {
        if self.depth >= MAX_NESTING {
            self.error_at_current("too many nested blocks or parentheses");
            return false;
        }
        self.depth += 1;
        true
    }

    pub(crate) fn leave_nesting(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // ── Error Reporting ───────────────────────────────────────────────────────

    pub(crate) fn error_at_current(&mut self, message: impl Into<String>) {
        let span = self.current_span();
        self.error_at(message, span);
    }

    pub(crate) fn error_at(&mut self, message: impl Into<String>, span: Span) {
        let source_line = self.source_file.line(span.start_line).unwrap_or("");
        self.errors
            .push(SyntaxDiagnostic::new(message, span, source_line));
    }

    pub(crate) fn too_many_errors(&self) -> bool {
        self.errors.is_saturated()
    }

    // ── Synchronization ───────────────────────────────────────────────────────

    /// Skip to the start of the next logical line, dropping any block that
    /// hangs off the broken one.
    pub(crate) fn synchronize(&mut self) {
        while !self.at_end() {
            match self.peek_kind() {
                TokenKind::Newline => {
                    self.advance();
                    if self.check(&TokenKind::Indent) {
                        self.skip_block();
                    }
                    return;
                }
                TokenKind::Dedent => return,
                TokenKind::Indent => {
                    self.skip_block();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Skip an `Indent ... Dedent` run, including nested blocks.
    pub(crate) fn skip_block(&mut self) {
        if self.eat(&TokenKind::Indent) {
            self.skip_indented_rest();
        }
    }

    fn skip_indented_rest(&mut self) {
        let mut depth = 1usize;
        while depth > 0 && !self.at_end() {
            match self.advance().kind {
                TokenKind::Indent => depth += 1,
                TokenKind::Dedent => depth -= 1,
                _ => {}
            }
        }
    }
}
