//! Statement parsing: compound statements, simple lines, targets.

use std::sync::Arc;

use evalbox_lexer::TokenKind;
use evalbox_types::ast::*;
use evalbox_types::Span;

use crate::parser::Parser;

impl<'src> Parser<'src> {
    /// Parse one statement line (or compound statement) into `out`.
    pub(crate) fn parse_statement(&mut self, out: &mut Vec<Stmt>) {
        let start = self.current_span();
        let stmt = match self.peek_kind() {
            TokenKind::Def => self.parse_function_def(),
            TokenKind::If => {
                self.advance();
                self.parse_if(start)
            }
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Try => self.parse_try(),
            TokenKind::Class => return self.unsupported("class definitions"),
            TokenKind::With => return self.unsupported("'with' statements"),
            TokenKind::Async => return self.unsupported("async code"),
            TokenKind::At => return self.unsupported("decorators"),
            TokenKind::Else | TokenKind::Elif | TokenKind::Except | TokenKind::Finally => {
                let message = format!("invalid syntax: {} without a matching block", self.peek_kind());
                self.error_at_current(message);
                self.synchronize();
                return;
            }
            _ => {
                self.parse_simple_line(out);
                return;
            }
        };
        match stmt {
            Some(stmt) => out.push(stmt),
            None => self.synchronize(),
        }
    }

    fn unsupported(&mut self, what: &str) {
        self.error_at_current(format!("{what} are not supported"));
        self.synchronize();
    }

    /// `small (';' small)* NEWLINE`
    pub(crate) fn parse_simple_line(&mut self, out: &mut Vec<Stmt>) {
        loop {
            match self.parse_small_statement() {
                Some(stmt) => out.push(stmt),
                None => {
                    self.synchronize();
                    return;
                }
            }
            if !self.eat(&TokenKind::Semicolon) {
                break;
            }
            if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Eof) {
                break;
            }
        }
        self.expect_line_end();
    }

    fn parse_small_statement(&mut self) -> Option<Stmt> {
        let start = self.current_span();
        let kind = match self.peek_kind() {
            TokenKind::Pass => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Break | TokenKind::Continue => {
                let is_break = self.check(&TokenKind::Break);
                if self.loop_depth == 0 {
                    let word = if is_break { "break" } else { "continue" };
                    self.error_at_current(format!("'{word}' outside loop"));
                    return None;
                }
                self.advance();
                if is_break {
                    StmtKind::Break
                } else {
                    StmtKind::Continue
                }
            }
            TokenKind::Return => {
                if !self.in_function {
                    self.error_at_current("'return' outside function");
                    return None;
                }
                self.advance();
                let value = if self.at_line_end() {
                    None
                } else {
                    Some(self.parse_testlist()?)
                };
                StmtKind::Return(value)
            }
            TokenKind::Raise => {
                self.advance();
                let value = if self.at_line_end() {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                if self.check(&TokenKind::From) {
                    self.error_at_current("'raise ... from' is not supported");
                    return None;
                }
                StmtKind::Raise(value)
            }
            TokenKind::Global | TokenKind::Nonlocal => {
                let is_global = self.check(&TokenKind::Global);
                self.advance();
                let mut names = vec![self.expect_identifier()?];
                while self.eat(&TokenKind::Comma) {
                    names.push(self.expect_identifier()?);
                }
                if is_global {
                    StmtKind::Global(names)
                } else if !self.in_function {
                    self.error_at(
                        "nonlocal declaration not allowed at module level",
                        start,
                    );
                    return None;
                } else {
                    StmtKind::Nonlocal(names)
                }
            }
            TokenKind::Import => {
                self.advance();
                let module = self.parse_dotted_name()?;
                let mut names = Vec::new();
                self.skip_alias()?;
                while self.eat(&TokenKind::Comma) {
                    names.push(self.parse_dotted_name()?);
                    self.skip_alias()?;
                }
                StmtKind::Import(Import { module, names })
            }
            TokenKind::From => {
                self.advance();
                let module = self.parse_dotted_name()?;
                self.expect(&TokenKind::Import)?;
                let parenthesized = self.eat(&TokenKind::LParen);
                let mut names = Vec::new();
                loop {
                    if self.eat(&TokenKind::Star) {
                        names.push("*".to_string());
                    } else {
                        names.push(self.expect_identifier()?.name);
                        self.skip_alias()?;
                    }
                    if !self.eat(&TokenKind::Comma) || (parenthesized && self.check(&TokenKind::RParen)) {
                        break;
                    }
                }
                if parenthesized {
                    self.expect(&TokenKind::RParen)?;
                }
                StmtKind::Import(Import { module, names })
            }
            TokenKind::Del => {
                self.advance();
                let targets = self.parse_target_list()?;
                let targets = match targets.kind {
                    ExprKind::Tuple(items) => items,
                    _ => vec![targets],
                };
                for target in &targets {
                    self.check_target(target, "delete")?;
                }
                StmtKind::Delete(targets)
            }
            TokenKind::Assert => {
                self.advance();
                let test = self.parse_expr()?;
                let message = if self.eat(&TokenKind::Comma) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                StmtKind::Assert { test, message }
            }
            TokenKind::Yield => {
                self.error_at_current("generators ('yield') are not supported");
                return None;
            }
            _ => return self.parse_expression_statement(),
        };
        Some(Stmt::new(kind, start.merge(self.previous_span())))
    }

    fn at_line_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof | TokenKind::Dedent
        )
    }

    fn parse_dotted_name(&mut self) -> Option<String> {
        let mut name = self.expect_identifier()?.name;
        while self.eat(&TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.expect_identifier()?.name);
        }
        Some(name)
    }

    fn skip_alias(&mut self) -> Option<()> {
        if self.eat(&TokenKind::As) {
            self.expect_identifier()?;
        }
        Some(())
    }

    // ── Assignment & expression statements ───────────────────────────────────

    fn parse_expression_statement(&mut self) -> Option<Stmt> {
        let start = self.current_span();
        let first = self.parse_testlist_star()?;

        if let Some(op) = augmented_op(self.peek_kind()) {
            self.advance();
            if !matches!(
                first.kind,
                ExprKind::Name(_) | ExprKind::Subscript { .. } | ExprKind::Attribute { .. }
            ) {
                self.error_at(
                    "illegal expression for augmented assignment",
                    first.span,
                );
                return None;
            }
            let value = self.parse_testlist()?;
            let span = start.merge(value.span);
            return Some(Stmt::new(StmtKind::AugAssign { target: first, op, value }, span));
        }

        if self.check(&TokenKind::Colon) {
            self.advance();
            if !matches!(first.kind, ExprKind::Name(_) | ExprKind::Subscript { .. }) {
                self.error_at("only single targets can be annotated", first.span);
                return None;
            }
            let annotation = self.parse_expr()?;
            let value = if self.eat(&TokenKind::Assign) {
                Some(self.parse_testlist()?)
            } else {
                None
            };
            let span = start.merge(self.previous_span());
            return Some(Stmt::new(
                StmtKind::AnnAssign {
                    target: first,
                    annotation,
                    value,
                },
                span,
            ));
        }

        if !self.check(&TokenKind::Assign) {
            if let ExprKind::Starred(_) = first.kind {
                self.error_at("can't use starred expression here", first.span);
                return None;
            }
            let span = first.span;
            return Some(Stmt::new(StmtKind::Expr(first), span));
        }

        let mut chain = vec![first];
        while self.eat(&TokenKind::Assign) {
            if self.check(&TokenKind::Yield) {
                self.error_at_current("generators ('yield') are not supported");
                return None;
            }
            chain.push(self.parse_testlist_star()?);
        }
        let value = chain.pop()?;
        for target in &chain {
            self.check_target(target, "assign to")?;
        }
        let span = start.merge(value.span);
        Some(Stmt::new(
            StmtKind::Assign {
                targets: chain,
                value,
            },
            span,
        ))
    }

    /// Reject anything that cannot be stored into.
    pub(crate) fn check_target(&mut self, target: &Expr, verb: &str) -> Option<()> {
        match &target.kind {
            ExprKind::Name(_) | ExprKind::Subscript { .. } | ExprKind::Attribute { .. } => Some(()),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                let starred = items
                    .iter()
                    .filter(|i| matches!(i.kind, ExprKind::Starred(_)))
                    .count();
                if starred > 1 {
                    self.error_at("multiple starred expressions in assignment", target.span);
                    return None;
                }
                for item in items {
                    self.check_target(item, verb)?;
                }
                Some(())
            }
            ExprKind::Starred(inner) => self.check_target(inner, verb),
            _ => {
                self.error_at(format!("cannot {verb} {}", describe(target)), target.span);
                None
            }
        }
    }

    /// Comma-separated targets for `for` and comprehensions; stops before `in`.
    pub(crate) fn parse_target_list(&mut self) -> Option<Expr> {
        let start = self.current_span();
        let mut items = vec![self.parse_target_item()?];
        let mut trailing_comma = false;
        while self.eat(&TokenKind::Comma) {
            trailing_comma = true;
            if matches!(
                self.peek_kind(),
                TokenKind::In | TokenKind::Newline | TokenKind::Assign | TokenKind::Eof
            ) {
                break;
            }
            items.push(self.parse_target_item()?);
            trailing_comma = false;
        }
        if items.len() == 1 && !trailing_comma {
            return items.pop();
        }
        let span = start.merge(self.previous_span());
        Some(Expr::new(ExprKind::Tuple(items), span))
    }

    fn parse_target_item(&mut self) -> Option<Expr> {
        if self.check(&TokenKind::Star) {
            let start = self.advance().span;
            let inner = self.parse_bit_or()?;
            let span = start.merge(inner.span);
            return Some(Expr::new(ExprKind::Starred(Box::new(inner)), span));
        }
        self.parse_bit_or()
    }

    // ── Compound statements ──────────────────────────────────────────────────

    fn parse_function_def(&mut self) -> Option<Stmt> {
        let start = self.advance().span;
        let name = self.expect_identifier()?;
        self.expect(&TokenKind::LParen)?;
        let params = self.parse_params(&TokenKind::RParen, true)?;
        self.expect(&TokenKind::RParen)?;
        if self.eat(&TokenKind::Arrow) {
            self.parse_expr()?;
        }
        let outer = (self.in_function, self.loop_depth);
        self.in_function = true;
        self.loop_depth = 0;
        let body = self.parse_block("function definition");
        (self.in_function, self.loop_depth) = outer;
        let span = start.merge(self.previous_span());
        let def = FunctionDef {
            name,
            params,
            body,
            span,
        };
        Some(Stmt::new(StmtKind::FunctionDef(Arc::new(def)), span))
    }

    /// Parameter list up to (not including) `close`.
    pub(crate) fn parse_params(&mut self, close: &TokenKind, annotations: bool) -> Option<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        let mut seen_default = false;
        let mut keyword_only = false;

        while !self.check(close) {
            if self.eat(&TokenKind::Slash) {
                // positional-only marker; every parameter here is positional already
            } else if self.eat(&TokenKind::DoubleStar) {
                let name = self.expect_identifier()?;
                self.skip_annotation(annotations)?;
                params.push(Param {
                    name,
                    kind: ParamKind::VarKeywords,
                    default: None,
                });
            } else if self.eat(&TokenKind::Star) {
                keyword_only = true;
                if let TokenKind::Identifier(_) = self.peek_kind() {
                    let name = self.expect_identifier()?;
                    self.skip_annotation(annotations)?;
                    params.push(Param {
                        name,
                        kind: ParamKind::VarArgs,
                        default: None,
                    });
                }
            } else {
                if params.iter().any(|p| p.kind == ParamKind::VarKeywords) {
                    self.error_at_current("parameter after '**' parameter");
                    return None;
                }
                let name = self.expect_identifier()?;
                if params.iter().any(|p| p.name.name == name.name) {
                    self.error_at(
                        format!("duplicate argument '{}' in function definition", name.name),
                        name.span,
                    );
                    return None;
                }
                self.skip_annotation(annotations)?;
                let default = if self.eat(&TokenKind::Assign) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                if !keyword_only {
                    if default.is_some() {
                        seen_default = true;
                    } else if seen_default {
                        self.error_at(
                            "non-default argument follows default argument",
                            name.span,
                        );
                        return None;
                    }
                }
                let kind = if keyword_only {
                    ParamKind::KeywordOnly
                } else {
                    ParamKind::Positional
                };
                params.push(Param { name, kind, default });
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Some(params)
    }

    fn skip_annotation(&mut self, annotations: bool) -> Option<()> {
        if annotations && self.eat(&TokenKind::Colon) {
            self.parse_expr()?;
        }
        Some(())
    }

    /// After `if` or `elif` has been consumed.
    fn parse_if(&mut self, start: Span) -> Option<Stmt> {
        let test = self.parse_named_test()?;
        let body = self.parse_block("'if' statement");
        let orelse = self.parse_else_chain()?;
        let span = start.merge(self.previous_span());
        Some(Stmt::new(StmtKind::If(IfStmt { test, body, orelse }), span))
    }

    fn parse_else_chain(&mut self) -> Option<Vec<Stmt>> {
        if self.check(&TokenKind::Elif) {
            let start = self.advance().span;
            // Each `elif` nests one level deeper in the tree.
            if !self.enter_nesting() {
                return None;
            }
            let nested = self.parse_if(start);
            self.leave_nesting();
            return Some(vec![nested?]);
        }
        if self.eat(&TokenKind::Else) {
            return Some(self.parse_block("'else'"));
        }
        Some(Vec::new())
    }

    fn parse_while(&mut self) -> Option<Stmt> {
        let start = self.advance().span;
        let test = self.parse_named_test()?;
        let body = self.parse_loop_body("'while' statement");
        let orelse = if self.eat(&TokenKind::Else) {
            self.parse_block("'else'")
        } else {
            Vec::new()
        };
        let span = start.merge(self.previous_span());
        Some(Stmt::new(StmtKind::While(WhileLoop { test, body, orelse }), span))
    }

    fn parse_for(&mut self) -> Option<Stmt> {
        let start = self.advance().span;
        let target = self.parse_target_list()?;
        self.check_target(&target, "assign to")?;
        self.expect(&TokenKind::In)?;
        let iter = self.parse_testlist()?;
        let body = self.parse_loop_body("'for' statement");
        let orelse = if self.eat(&TokenKind::Else) {
            self.parse_block("'else'")
        } else {
            Vec::new()
        };
        let span = start.merge(self.previous_span());
        Some(Stmt::new(
            StmtKind::For(ForLoop {
                target,
                iter,
                body,
                orelse,
            }),
            span,
        ))
    }

    fn parse_try(&mut self) -> Option<Stmt> {
        let start = self.advance().span;
        let body = self.parse_block("'try' statement");
        let mut handlers = Vec::new();

        while self.check(&TokenKind::Except) {
            let handler_start = self.advance().span;
            let mut class = None;
            let mut name = None;
            if !self.check(&TokenKind::Colon) {
                class = Some(self.parse_expr()?);
                if self.eat(&TokenKind::As) {
                    name = Some(self.expect_identifier()?);
                }
            }
            let handler_body = self.parse_block("'except' statement");
            handlers.push(ExceptHandler {
                class,
                name,
                body: handler_body,
                span: handler_start.merge(self.previous_span()),
            });
        }

        let orelse = if !handlers.is_empty() && self.eat(&TokenKind::Else) {
            self.parse_block("'else'")
        } else {
            Vec::new()
        };
        let finalbody = if self.eat(&TokenKind::Finally) {
            self.parse_block("'finally'")
        } else {
            Vec::new()
        };

        if handlers.is_empty() && finalbody.is_empty() {
            self.error_at(
                "expected 'except' or 'finally' block",
                start.merge(self.previous_span()),
            );
            return None;
        }

        let span = start.merge(self.previous_span());
        Some(Stmt::new(
            StmtKind::Try(TryStmt {
                body,
                handlers,
                orelse,
                finalbody,
            }),
            span,
        ))
    }

    /// A condition, rejecting the walrus operator with a clear message.
    fn parse_named_test(&mut self) -> Option<Expr> {
        let test = self.parse_expr()?;
        if self.check(&TokenKind::Walrus) {
            self.error_at_current("assignment expressions (':=') are not supported");
            return None;
        }
        Some(test)
    }
}

fn augmented_op(kind: &TokenKind) -> Option<BinOp> {
    let op = match kind {
        TokenKind::PlusEq => BinOp::Add,
        TokenKind::MinusEq => BinOp::Sub,
        TokenKind::StarEq => BinOp::Mul,
        TokenKind::SlashEq => BinOp::Div,
        TokenKind::DoubleSlashEq => BinOp::FloorDiv,
        TokenKind::PercentEq => BinOp::Mod,
        TokenKind::DoubleStarEq => BinOp::Pow,
        TokenKind::PipeEq => BinOp::BitOr,
        TokenKind::AmpEq => BinOp::BitAnd,
        TokenKind::CaretEq => BinOp::BitXor,
        TokenKind::LShiftEq => BinOp::LShift,
        TokenKind::RShiftEq => BinOp::RShift,
        _ => return None,
    };
    Some(op)
}

fn describe(expr: &Expr) -> &'static str {
    match expr.kind {
        ExprKind::Call { .. } => "function call",
        ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Str(_) | ExprKind::FString(_) => "literal",
        ExprKind::None | ExprKind::Bool(_) => "keyword",
        ExprKind::Binary { .. } | ExprKind::Unary { .. } => "expression",
        ExprKind::Compare { .. } => "comparison",
        ExprKind::Lambda(_) => "lambda",
        ExprKind::Conditional { .. } => "conditional expression",
        ExprKind::Comprehension(_) => "comprehension",
        ExprKind::Dict(_) => "dict literal",
        ExprKind::Set(_) => "set display",
        _ => "expression",
    }
}
