//! Read-only AST traversal.
//!
//! Implementors override the hooks they care about and call the matching
//! `walk_*` function to keep descending. The walkers match every variant
//! exhaustively, so adding a node kind forces every analysis to be revisited.

use crate::ast::*;

pub trait Visitor {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    /// Called for every function declaration, nested ones included.
    fn visit_function(&mut self, def: &FunctionDef) {
        walk_body(self, &def.body);
        walk_params(self, &def.params);
    }
}

pub fn walk_body<V: Visitor + ?Sized>(v: &mut V, body: &[Stmt]) {
    for stmt in body {
        v.visit_stmt(stmt);
    }
}

pub fn walk_params<V: Visitor + ?Sized>(v: &mut V, params: &[Param]) {
    for default in params.iter().filter_map(|p| p.default.as_ref()) {
        v.visit_expr(default);
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(v: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::FunctionDef(def) => v.visit_function(def),
        StmtKind::Return(value) | StmtKind::Raise(value) => {
            if let Some(value) = value {
                v.visit_expr(value);
            }
        }
        StmtKind::Assign { targets, value } => {
            for target in targets {
                v.visit_expr(target);
            }
            v.visit_expr(value);
        }
        StmtKind::AugAssign { target, value, .. } => {
            v.visit_expr(target);
            v.visit_expr(value);
        }
        StmtKind::AnnAssign {
            target,
            annotation,
            value,
        } => {
            v.visit_expr(target);
            v.visit_expr(annotation);
            if let Some(value) = value {
                v.visit_expr(value);
            }
        }
        StmtKind::If(s) => {
            v.visit_expr(&s.test);
            walk_body(v, &s.body);
            walk_body(v, &s.orelse);
        }
        StmtKind::While(s) => {
            v.visit_expr(&s.test);
            walk_body(v, &s.body);
            walk_body(v, &s.orelse);
        }
        StmtKind::For(s) => {
            v.visit_expr(&s.target);
            v.visit_expr(&s.iter);
            walk_body(v, &s.body);
            walk_body(v, &s.orelse);
        }
        StmtKind::Try(s) => {
            walk_body(v, &s.body);
            for handler in &s.handlers {
                if let Some(class) = &handler.class {
                    v.visit_expr(class);
                }
                walk_body(v, &handler.body);
            }
            walk_body(v, &s.orelse);
            walk_body(v, &s.finalbody);
        }
        StmtKind::Assert { test, message } => {
            v.visit_expr(test);
            if let Some(message) = message {
                v.visit_expr(message);
            }
        }
        StmtKind::Delete(targets) => {
            for target in targets {
                v.visit_expr(target);
            }
        }
        StmtKind::Expr(expr) => v.visit_expr(expr),
        StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Pass
        | StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Import(_) => {}
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::None
        | ExprKind::Bool(_)
        | ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Name(_) => {}
        ExprKind::FString(parts) => {
            for part in parts {
                if let FStringPart::Field { value, .. } = part {
                    v.visit_expr(value);
                }
            }
        }
        ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
            for item in items {
                v.visit_expr(item);
            }
        }
        ExprKind::Dict(items) => {
            for item in items {
                match item {
                    DictItem::Pair(key, value) => {
                        v.visit_expr(key);
                        v.visit_expr(value);
                    }
                    DictItem::Unpack(mapping) => v.visit_expr(mapping),
                }
            }
        }
        ExprKind::Comprehension(comp) => {
            for generator in &comp.generators {
                v.visit_expr(&generator.target);
                v.visit_expr(&generator.iter);
                for cond in &generator.conditions {
                    v.visit_expr(cond);
                }
            }
            match &comp.kind {
                ComprehensionKind::List(elt)
                | ComprehensionKind::Set(elt)
                | ComprehensionKind::Generator(elt) => v.visit_expr(elt),
                ComprehensionKind::Dict(key, value) => {
                    v.visit_expr(key);
                    v.visit_expr(value);
                }
            }
        }
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        ExprKind::Unary { operand, .. } => v.visit_expr(operand),
        ExprKind::Compare { left, links } => {
            v.visit_expr(left);
            for (_, right) in links {
                v.visit_expr(right);
            }
        }
        ExprKind::Conditional { test, body, orelse } => {
            v.visit_expr(test);
            v.visit_expr(body);
            v.visit_expr(orelse);
        }
        ExprKind::Lambda(lambda) => {
            walk_params(v, &lambda.params);
            v.visit_expr(&lambda.body);
        }
        ExprKind::Call { func, args } => {
            v.visit_expr(func);
            for arg in args {
                match arg {
                    Argument::Positional(e)
                    | Argument::Keyword(_, e)
                    | Argument::Unpack(e)
                    | Argument::UnpackMapping(e) => v.visit_expr(e),
                }
            }
        }
        ExprKind::Attribute { value, .. } | ExprKind::Starred(value) => v.visit_expr(value),
        ExprKind::Subscript { value, index } => {
            v.visit_expr(value);
            v.visit_expr(index);
        }
        ExprKind::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                v.visit_expr(part);
            }
        }
    }
}
