//! Expression parsing with Python precedence.
//!
//! Precedence (lowest to highest):
//! 1. `lambda`, `x if c else y`
//! 2. `or`
//! 3. `and`
//! 4. `not`
//! 5. comparisons, `in`, `not in`, `is`, `is not` (chained)
//! 6. `|`
//! 7. `^`
//! 8. `&`
//! 9. `<<` `>>`
//! 10. `+` `-`
//! 11. `*` `/` `//` `%`
//! 12. unary `+` `-` `~`
//! 13. `**` (right-associative, binds tighter than a unary operator on its left)
//! 14. calls, subscripts, attribute access

use std::sync::Arc;

use evalbox_lexer::TokenKind;
use evalbox_types::ast::*;
use evalbox_types::Span;

use crate::parser::Parser;

impl<'src> Parser<'src> {
    /// A single expression (`test` in the grammar).
    pub(crate) fn parse_expr(&mut self) -> Option<Expr> {
        if !self.enter_nesting() {
            return None;
        }
        let result = self.parse_expr_inner();
        self.leave_nesting();
        result
    }

    fn parse_expr_inner(&mut self) -> Option<Expr> {
        if self.check(&TokenKind::Lambda) {
            return self.parse_lambda();
        }
        let body = self.parse_or()?;
        if !self.check(&TokenKind::If) {
            return Some(body);
        }
        self.advance();
        let test = self.parse_or()?;
        if !self.eat(&TokenKind::Else) {
            self.error_at_current("expected 'else' after 'if' expression");
            return None;
        }
        let orelse = self.parse_expr()?;
        let span = body.span.merge(orelse.span);
        Some(Expr::new(
            ExprKind::Conditional {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
            span,
        ))
    }

    fn parse_lambda(&mut self) -> Option<Expr> {
        let start = self.advance().span;
        let params = self.parse_params(&TokenKind::Colon, false)?;
        self.expect(&TokenKind::Colon)?;
        let body = self.parse_expr()?;
        let span = start.merge(body.span);
        Some(Expr::new(
            ExprKind::Lambda(Arc::new(Lambda { params, body, span })),
            span,
        ))
    }

    /// `expr (',' expr)* [',']`, producing a tuple when a comma appears.
    pub(crate) fn parse_testlist(&mut self) -> Option<Expr> {
        self.parse_expr_list(false)
    }

    /// Like [`Self::parse_testlist`] but also accepts `*expr` items.
    pub(crate) fn parse_testlist_star(&mut self) -> Option<Expr> {
        self.parse_expr_list(true)
    }

    fn parse_expr_list(&mut self, allow_star: bool) -> Option<Expr> {
        let first = self.parse_list_item(allow_star)?;
        if !self.check(&TokenKind::Comma) {
            return Some(first);
        }
        let start = first.span;
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if !self.starts_expression() {
                break;
            }
            items.push(self.parse_list_item(allow_star)?);
        }
        let span = start.merge(self.previous_span());
        Some(Expr::new(ExprKind::Tuple(items), span))
    }

    fn parse_list_item(&mut self, allow_star: bool) -> Option<Expr> {
        if allow_star && self.check(&TokenKind::Star) {
            let start = self.advance().span;
            let inner = self.parse_bit_or()?;
            let span = start.merge(inner.span);
            return Some(Expr::new(ExprKind::Starred(Box::new(inner)), span));
        }
        self.parse_expr()
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Identifier(_)
                | TokenKind::Int(_)
                | TokenKind::Float(_)
                | TokenKind::Str(_)
                | TokenKind::FStringStart
                | TokenKind::None
                | TokenKind::True
                | TokenKind::False
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::Minus
                | TokenKind::Plus
                | TokenKind::Tilde
                | TokenKind::Not
                | TokenKind::Lambda
                | TokenKind::Star
        )
    }

    // ── Boolean operators ────────────────────────────────────────────────────

    pub(crate) fn parse_or(&mut self) -> Option<Expr> {
        self.left_chain(
            Self::parse_and,
            |p| p.eat(&TokenKind::Or).then_some(LogicalOp::Or),
            logical,
        )
    }

    fn parse_and(&mut self) -> Option<Expr> {
        self.left_chain(
            Self::parse_not,
            |p| p.eat(&TokenKind::And).then_some(LogicalOp::And),
            logical,
        )
    }

    fn parse_not(&mut self) -> Option<Expr> {
        if !self.check(&TokenKind::Not) {
            return self.parse_comparison();
        }
        let start = self.advance().span;
        if !self.enter_nesting() {
            return None;
        }
        let operand = self.parse_not();
        self.leave_nesting();
        let operand = operand?;
        let span = start.merge(operand.span);
        Some(Expr::new(
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_comparison(&mut self) -> Option<Expr> {
        let left = self.parse_bit_or()?;
        let mut links = Vec::new();
        while let Some(op) = self.comparison_op() {
            links.push((op, self.parse_bit_or()?));
        }
        if links.is_empty() {
            return Some(left);
        }
        let span = links
            .last()
            .map_or(left.span, |(_, last)| left.span.merge(last.span));
        Some(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                links,
            },
            span,
        ))
    }

    /// Consume a comparison operator, including the two-word forms.
    fn comparison_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek_kind() {
            TokenKind::EqEq => CmpOp::Eq,
            TokenKind::NotEq => CmpOp::NotEq,
            TokenKind::Less => CmpOp::Lt,
            TokenKind::LessEq => CmpOp::LtE,
            TokenKind::Greater => CmpOp::Gt,
            TokenKind::GreaterEq => CmpOp::GtE,
            TokenKind::In => CmpOp::In,
            TokenKind::Not if self.look_ahead(1) == &TokenKind::In => {
                self.advance();
                CmpOp::NotIn
            }
            TokenKind::Is if self.look_ahead(1) == &TokenKind::Not => {
                self.advance();
                CmpOp::IsNot
            }
            TokenKind::Is => CmpOp::Is,
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    // ── Bitwise and arithmetic ───────────────────────────────────────────────

    pub(crate) fn parse_bit_or(&mut self) -> Option<Expr> {
        self.left_chain(
            Self::parse_bit_xor,
            |p| p.eat(&TokenKind::Pipe).then_some(BinOp::BitOr),
            binary,
        )
    }

    fn parse_bit_xor(&mut self) -> Option<Expr> {
        self.left_chain(
            Self::parse_bit_and,
            |p| p.eat(&TokenKind::Caret).then_some(BinOp::BitXor),
            binary,
        )
    }

    fn parse_bit_and(&mut self) -> Option<Expr> {
        self.left_chain(
            Self::parse_shift,
            |p| p.eat(&TokenKind::Amp).then_some(BinOp::BitAnd),
            binary,
        )
    }

    fn parse_shift(&mut self) -> Option<Expr> {
        self.left_chain(
            Self::parse_arith,
            |p| {
                let op = match p.peek_kind() {
                    TokenKind::LShift => BinOp::LShift,
                    TokenKind::RShift => BinOp::RShift,
                    _ => return None,
                };
                p.advance();
                Some(op)
            },
            binary,
        )
    }

    fn parse_arith(&mut self) -> Option<Expr> {
        self.left_chain(
            Self::parse_term,
            |p| {
                let op = match p.peek_kind() {
                    TokenKind::Plus => BinOp::Add,
                    TokenKind::Minus => BinOp::Sub,
                    _ => return None,
                };
                p.advance();
                Some(op)
            },
            binary,
        )
    }

    fn parse_term(&mut self) -> Option<Expr> {
        let expr = self.left_chain(
            Self::parse_factor,
            |p| {
                let op = match p.peek_kind() {
                    TokenKind::Star => BinOp::Mul,
                    TokenKind::Slash => BinOp::Div,
                    TokenKind::DoubleSlash => BinOp::FloorDiv,
                    TokenKind::Percent => BinOp::Mod,
                    _ => return None,
                };
                p.advance();
                Some(op)
            },
            binary,
        )?;
        if self.check(&TokenKind::At) {
            self.error_at_current("matrix multiplication ('@') is not supported");
            return None;
        }
        Some(expr)
    }

    /// `operand (op operand)*`, folded to the left.
    ///
    /// Each link holds one nesting level until the chain ends, so a long
    /// flat chain is refused like deeply nested parentheses instead of
    /// building a tree too deep to walk.
    fn left_chain<O>(
        &mut self,
        operand: fn(&mut Self) -> Option<Expr>,
        operator: fn(&mut Self) -> Option<O>,
        combine: fn(O, Expr, Expr) -> Expr,
    ) -> Option<Expr> {
        let mut left = operand(self)?;
        let mut links = 0;
        let result = loop {
            let Some(op) = operator(self) else {
                break Some(left);
            };
            if !self.enter_nesting() {
                break None;
            }
            links += 1;
            match operand(self) {
                Some(right) => left = combine(op, left, right),
                None => break None,
            }
        };
        for _ in 0..links {
            self.leave_nesting();
        }
        result
    }

    fn parse_factor(&mut self) -> Option<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            TokenKind::Tilde => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        let start = self.advance().span;
        if !self.enter_nesting() {
            return None;
        }
        let operand = self.parse_factor();
        self.leave_nesting();
        let operand = operand?;
        let span = start.merge(operand.span);
        Some(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_power(&mut self) -> Option<Expr> {
        if self.check(&TokenKind::Await) {
            self.error_at_current("'await' is not supported");
            return None;
        }
        let base = self.parse_postfix()?;
        if !self.eat(&TokenKind::DoubleStar) {
            return Some(base);
        }
        let exponent = self.nested(Self::parse_factor)?;
        Some(binary(BinOp::Pow, base, exponent))
    }

    // ── Postfix: calls, subscripts, attributes ───────────────────────────────

    fn parse_postfix(&mut self) -> Option<Expr> {
        let base = self.parse_atom()?;
        let mut links = 0;
        let result = self.parse_trailers(base, &mut links);
        for _ in 0..links {
            self.leave_nesting();
        }
        result
    }

    /// Calls, subscripts and attribute accesses after an atom, each holding
    /// one nesting level.
    fn parse_trailers(&mut self, mut expr: Expr, links: &mut u32) -> Option<Expr> {
        loop {
            if !matches!(
                self.peek_kind(),
                TokenKind::LParen | TokenKind::LBracket | TokenKind::Dot
            ) {
                return Some(expr);
            }
            if !self.enter_nesting() {
                return None;
            }
            *links += 1;
            match self.peek_kind() {
                TokenKind::LParen => {
                    self.advance();
                    let args = self.parse_call_args()?;
                    self.expect(&TokenKind::RParen)?;
                    let span = expr.span.merge(self.previous_span());
                    expr = Expr::new(
                        ExprKind::Call {
                            func: Box::new(expr),
                            args,
                        },
                        span,
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_subscript()?;
                    self.expect(&TokenKind::RBracket)?;
                    let span = expr.span.merge(self.previous_span());
                    expr = Expr::new(
                        ExprKind::Subscript {
                            value: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    let attr = self.expect_identifier()?;
                    let span = expr.span.merge(attr.span);
                    expr = Expr::new(
                        ExprKind::Attribute {
                            value: Box::new(expr),
                            attr,
                        },
                        span,
                    );
                }
                _ => return Some(expr),
            }
        }
    }

    fn parse_call_args(&mut self) -> Option<Vec<Argument>> {
        let mut args = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let arg = match self.peek_kind() {
                TokenKind::Star => {
                    self.advance();
                    Argument::Unpack(self.parse_expr()?)
                }
                TokenKind::DoubleStar => {
                    self.advance();
                    Argument::UnpackMapping(self.parse_expr()?)
                }
                TokenKind::Identifier(_) if self.look_ahead(1) == &TokenKind::Assign => {
                    let name = self.expect_identifier()?;
                    self.advance();
                    Argument::Keyword(name, self.parse_expr()?)
                }
                _ => {
                    let value = self.parse_expr()?;
                    if self.check(&TokenKind::For) {
                        let generators = self.parse_comprehension_clauses()?;
                        let span = value.span.merge(self.previous_span());
                        let comp = Comprehension {
                            kind: ComprehensionKind::Generator(value),
                            generators,
                        };
                        Argument::Positional(Expr::new(ExprKind::Comprehension(Box::new(comp)), span))
                    } else {
                        Argument::Positional(value)
                    }
                }
            };
            if let Argument::Positional(_) | Argument::Unpack(_) = arg {
                if args.iter().any(|a| matches!(a, Argument::Keyword(..) | Argument::UnpackMapping(_))) {
                    self.error_at(
                        "positional argument follows keyword argument",
                        self.previous_span(),
                    );
                    return None;
                }
            }
            args.push(arg);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Some(args)
    }

    /// The inside of `[...]` after a value: an index, a slice, or a tuple of them.
    fn parse_subscript(&mut self) -> Option<Expr> {
        let start = self.current_span();
        let first = self.parse_slice_item()?;
        if !self.check(&TokenKind::Comma) {
            return Some(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_slice_item()?);
        }
        Some(Expr::new(ExprKind::Tuple(items), start.merge(self.previous_span())))
    }

    fn parse_slice_item(&mut self) -> Option<Expr> {
        let start = self.current_span();
        let lower = if self.check(&TokenKind::Colon) {
            None
        } else {
            let value = self.parse_expr()?;
            if !self.check(&TokenKind::Colon) {
                return Some(value);
            }
            Some(Box::new(value))
        };
        self.expect(&TokenKind::Colon)?;
        let upper = self.parse_slice_bound()?;
        let step = if self.eat(&TokenKind::Colon) {
            self.parse_slice_bound()?
        } else {
            None
        };
        let span = start.merge(self.previous_span());
        Some(Expr::new(ExprKind::Slice { lower, upper, step }, span))
    }

    fn parse_slice_bound(&mut self) -> Option<Option<Box<Expr>>> {
        if matches!(
            self.peek_kind(),
            TokenKind::Colon | TokenKind::RBracket | TokenKind::Comma
        ) {
            return Some(None);
        }
        Some(Some(Box::new(self.parse_expr()?)))
    }

    // ── Atoms ────────────────────────────────────────────────────────────────

    fn parse_atom(&mut self) -> Option<Expr> {
        let token = self.peek().clone();
        let span = token.span;
        let kind = match token.kind {
            TokenKind::Int(n) => {
                self.advance();
                ExprKind::Int(n)
            }
            TokenKind::Float(n) => {
                self.advance();
                ExprKind::Float(n)
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::None => {
                self.advance();
                ExprKind::None
            }
            TokenKind::Identifier(name) => {
                self.advance();
                ExprKind::Name(name)
            }
            TokenKind::Str(_) | TokenKind::FStringStart => return self.parse_strings(),
            TokenKind::LParen => return self.nested(Self::parse_paren),
            TokenKind::LBracket => return self.nested(Self::parse_list_display),
            TokenKind::LBrace => return self.nested(Self::parse_brace_display),
            TokenKind::Ellipsis => {
                self.error_at_current("'...' is not supported; use 'pass'");
                return None;
            }
            TokenKind::Yield => {
                self.error_at_current("generators ('yield') are not supported");
                return None;
            }
            TokenKind::Newline | TokenKind::Eof => {
                self.error_at_current("invalid syntax: unexpected end of line");
                return None;
            }
            TokenKind::Indent => {
                self.error_at_current("unexpected indent");
                return None;
            }
            other => {
                self.error_at_current(format!("invalid syntax: unexpected {other}"));
                return None;
            }
        };
        Some(Expr::new(kind, span))
    }

    fn nested(&mut self, parse: fn(&mut Self) -> Option<Expr>) -> Option<Expr> {
        if !self.enter_nesting() {
            return None;
        }
        let result = parse(self);
        self.leave_nesting();
        result
    }

    /// Adjacent string literals, concatenated; any f-string makes the whole an f-string.
    fn parse_strings(&mut self) -> Option<Expr> {
        let start = self.current_span();
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;
        loop {
            match self.peek_kind().clone() {
                TokenKind::Str(s) => {
                    self.advance();
                    push_literal(&mut parts, s);
                }
                TokenKind::FStringStart => {
                    self.advance();
                    formatted = true;
                    self.parse_fstring_body(&mut parts)?;
                }
                _ => break,
            }
        }
        let span = start.merge(self.previous_span());
        if formatted {
            return Some(Expr::new(ExprKind::FString(parts), span));
        }
        let text = parts
            .into_iter()
            .map(|p| match p {
                FStringPart::Literal(s) => s,
                FStringPart::Field { .. } => String::new(),
            })
            .collect();
        Some(Expr::new(ExprKind::Str(text), span))
    }

    fn parse_fstring_body(&mut self, parts: &mut Vec<FStringPart>) -> Option<()> {
        loop {
            match self.peek_kind().clone() {
                TokenKind::FStringText(text) => {
                    self.advance();
                    push_literal(parts, text);
                }
                TokenKind::FieldStart => {
                    self.advance();
                    let value = self.parse_testlist()?;
                    let conversion = match self.peek_kind() {
                        TokenKind::Conversion(c) => {
                            let c = *c;
                            self.advance();
                            Some(c)
                        }
                        _ => None,
                    };
                    let spec = match self.peek_kind() {
                        TokenKind::FormatSpec(s) => {
                            let s = s.clone();
                            self.advance();
                            Some(s)
                        }
                        _ => None,
                    };
                    self.expect(&TokenKind::FieldEnd)?;
                    parts.push(FStringPart::Field {
                        value,
                        conversion,
                        spec,
                    });
                }
                TokenKind::FStringEnd => {
                    self.advance();
                    return Some(());
                }
                other => {
                    self.error_at_current(format!("invalid syntax in f-string: unexpected {other}"));
                    return None;
                }
            }
        }
    }

    /// `()`, `(expr)`, `(a, b)`, or a generator expression.
    fn parse_paren(&mut self) -> Option<Expr> {
        let start = self.advance().span;
        if self.eat(&TokenKind::RParen) {
            return Some(Expr::new(ExprKind::Tuple(Vec::new()), start.merge(self.previous_span())));
        }
        if self.check(&TokenKind::Yield) {
            self.error_at_current("generators ('yield') are not supported");
            return None;
        }
        let first = self.parse_list_item(true)?;
        if self.check(&TokenKind::For) {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(&TokenKind::RParen)?;
            let comp = Comprehension {
                kind: ComprehensionKind::Generator(first),
                generators,
            };
            return Some(Expr::new(
                ExprKind::Comprehension(Box::new(comp)),
                start.merge(self.previous_span()),
            ));
        }
        if self.eat(&TokenKind::RParen) {
            return Some(first);
        }
        let items = self.parse_display_rest(first, &TokenKind::RParen)?;
        Some(Expr::new(ExprKind::Tuple(items), start.merge(self.previous_span())))
    }

    fn parse_list_display(&mut self) -> Option<Expr> {
        let start = self.advance().span;
        if self.eat(&TokenKind::RBracket) {
            return Some(Expr::new(ExprKind::List(Vec::new()), start.merge(self.previous_span())));
        }
        let first = self.parse_list_item(true)?;
        if self.check(&TokenKind::For) {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(&TokenKind::RBracket)?;
            let comp = Comprehension {
                kind: ComprehensionKind::List(first),
                generators,
            };
            return Some(Expr::new(
                ExprKind::Comprehension(Box::new(comp)),
                start.merge(self.previous_span()),
            ));
        }
        let items = if self.eat(&TokenKind::RBracket) {
            vec![first]
        } else {
            self.parse_display_rest(first, &TokenKind::RBracket)?
        };
        Some(Expr::new(ExprKind::List(items), start.merge(self.previous_span())))
    }

    /// Remaining `, item` entries after `first`, through the closing token.
    fn parse_display_rest(&mut self, first: Expr, close: &TokenKind) -> Option<Vec<Expr>> {
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(close) {
                break;
            }
            items.push(self.parse_list_item(true)?);
        }
        self.expect(close)?;
        Some(items)
    }

    /// `{}` dicts, sets, and their comprehensions.
    fn parse_brace_display(&mut self) -> Option<Expr> {
        let start = self.advance().span;
        if self.eat(&TokenKind::RBrace) {
            return Some(Expr::new(ExprKind::Dict(Vec::new()), start.merge(self.previous_span())));
        }

        if self.eat(&TokenKind::DoubleStar) {
            let mapping = self.parse_bit_or()?;
            let items = self.parse_dict_rest(DictItem::Unpack(mapping))?;
            return Some(Expr::new(ExprKind::Dict(items), start.merge(self.previous_span())));
        }

        let first = self.parse_list_item(true)?;
        if self.eat(&TokenKind::Colon) {
            let value = self.parse_expr()?;
            if self.check(&TokenKind::For) {
                let generators = self.parse_comprehension_clauses()?;
                self.expect(&TokenKind::RBrace)?;
                let comp = Comprehension {
                    kind: ComprehensionKind::Dict(first, value),
                    generators,
                };
                return Some(Expr::new(
                    ExprKind::Comprehension(Box::new(comp)),
                    start.merge(self.previous_span()),
                ));
            }
            let items = self.parse_dict_rest(DictItem::Pair(first, value))?;
            return Some(Expr::new(ExprKind::Dict(items), start.merge(self.previous_span())));
        }

        if self.check(&TokenKind::For) {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(&TokenKind::RBrace)?;
            let comp = Comprehension {
                kind: ComprehensionKind::Set(first),
                generators,
            };
            return Some(Expr::new(
                ExprKind::Comprehension(Box::new(comp)),
                start.merge(self.previous_span()),
            ));
        }
        let items = self.parse_display_rest(first, &TokenKind::RBrace)?;
        Some(Expr::new(ExprKind::Set(items), start.merge(self.previous_span())))
    }

    fn parse_dict_rest(&mut self, first: DictItem) -> Option<Vec<DictItem>> {
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBrace) {
                break;
            }
            if self.eat(&TokenKind::DoubleStar) {
                items.push(DictItem::Unpack(self.parse_bit_or()?));
                continue;
            }
            let key = self.parse_expr()?;
            self.expect(&TokenKind::Colon)?;
            let value = self.parse_expr()?;
            items.push(DictItem::Pair(key, value));
        }
        self.expect(&TokenKind::RBrace)?;
        Some(items)
    }

    /// One or more `for target in iter [if cond]*` clauses.
    fn parse_comprehension_clauses(&mut self) -> Option<Vec<Generator>> {
        let mut generators = Vec::new();
        while self.eat(&TokenKind::For) {
            let target = self.parse_target_list()?;
            self.check_target(&target, "assign to")?;
            self.expect(&TokenKind::In)?;
            let iter = self.parse_or()?;
            let mut conditions = Vec::new();
            while self.eat(&TokenKind::If) {
                conditions.push(self.parse_or()?);
            }
            generators.push(Generator {
                target,
                iter,
                conditions,
            });
        }
        if self.check(&TokenKind::Async) {
            self.error_at_current("async comprehensions are not supported");
            return None;
        }
        Some(generators)
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: String) {
    if let Some(FStringPart::Literal(prev)) = parts.last_mut() {
        prev.push_str(&text);
    } else {
        parts.push(FStringPart::Literal(text));
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    let span: Span = left.span.merge(right.span);
    Expr::new(
        ExprKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
        span,
    )
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    let span = left.span.merge(right.span);
    Expr::new(
        ExprKind::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}
