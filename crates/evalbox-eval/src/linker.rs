//! Construction-time capability check.
//!
//! The evaluator has no filesystem, network, process or reflection
//! primitives at all. The linker additionally rejects, before anything
//! runs, every reference that could only be an attempt to reach one, so a
//! probing submission fails the same way on every test case.

use crate::allow::AllowList;
use evalbox_types::ast::*;
use evalbox_types::visit::{self, Visitor};
use evalbox_types::{ErrorKind, ErrorRecord, Span};
use std::collections::HashSet;

/// Names that name a host capability in the reference language.
pub const CAPABILITY_NAMES: &[&str] = &[
    "open",
    "exec",
    "eval",
    "compile",
    "__import__",
    "globals",
    "locals",
    "vars",
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
    "input",
    "exit",
    "quit",
    "breakpoint",
    "help",
    "dir",
    "id",
    "type",
    "object",
    "super",
    "memoryview",
    "classmethod",
    "staticmethod",
    "property",
];

/// Check a parsed module against `allow`; the first violation in source
/// order is reported as `DisallowedOperation`.
pub fn link(module: &Module, allow: &AllowList) -> Result<(), ErrorRecord> {
    let mut bindings = Bindings::default();
    visit::walk_body(&mut bindings, &module.body);
    let mut checker = Checker {
        allow,
        bound: bindings.names,
        violation: None,
    };
    visit::walk_body(&mut checker, &module.body);
    match checker.violation {
        Some(record) => Err(record),
        None => Ok(()),
    }
}

// ── Binding pass ──────────────────────────────────────────────────────────────

/// Every name the submission binds anywhere, in any scope.
#[derive(Default)]
struct Bindings {
    names: HashSet<String>,
}

impl Bindings {
    fn bind_params(&mut self, params: &[Param]) {
        self.names
            .extend(params.iter().map(|p| p.name.name.clone()));
    }

    fn bind_target(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Name(name) => {
                self.names.insert(name.clone());
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.bind_target(item);
                }
            }
            ExprKind::Starred(inner) => self.bind_target(inner),
            _ => {}
        }
    }
}

impl Visitor for Bindings {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => {
                for target in targets {
                    self.bind_target(target);
                }
            }
            StmtKind::AugAssign { target, .. } | StmtKind::AnnAssign { target, .. } => {
                self.bind_target(target)
            }
            StmtKind::For(s) => self.bind_target(&s.target),
            StmtKind::Try(s) => {
                for handler in &s.handlers {
                    if let Some(name) = &handler.name {
                        self.names.insert(name.name.clone());
                    }
                }
            }
            _ => {}
        }
        visit::walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Lambda(lambda) => self.bind_params(&lambda.params),
            ExprKind::Comprehension(comp) => {
                for generator in &comp.generators {
                    self.bind_target(&generator.target);
                }
            }
            _ => {}
        }
        visit::walk_expr(self, expr);
    }

    fn visit_function(&mut self, def: &FunctionDef) {
        self.names.insert(def.name.name.clone());
        self.bind_params(&def.params);
        visit::walk_body(self, &def.body);
        visit::walk_params(self, &def.params);
    }
}

// ── Checking pass ─────────────────────────────────────────────────────────────

struct Checker<'a> {
    allow: &'a AllowList,
    bound: HashSet<String>,
    violation: Option<ErrorRecord>,
}

impl Checker<'_> {
    fn reject(&mut self, message: String, span: Span) {
        if self.violation.is_none() {
            self.violation = Some(
                ErrorRecord::new(ErrorKind::DisallowedOperation, message)
                    .with_detail(span.to_string())
                    .at(span),
            );
        }
    }

    fn check_name(&mut self, name: &str, span: Span) {
        if self.bound.contains(name) {
            return;
        }
        if CAPABILITY_NAMES.contains(&name) || name.starts_with("__") {
            self.reject(format!("use of '{name}' is not allowed"), span);
        } else if AllowList::is_known(name) && self.allow.resolve(name).is_none() {
            self.reject(format!("'{name}' is not in the allow-list"), span);
        }
    }
}

impl Visitor for Checker<'_> {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        if self.violation.is_some() {
            return;
        }
        if let StmtKind::Import(import) = &stmt.kind {
            self.reject(
                format!("import of module '{}' is not allowed", import.module),
                stmt.span,
            );
            return;
        }
        visit::walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if self.violation.is_some() {
            return;
        }
        match &expr.kind {
            ExprKind::Name(name) => self.check_name(name, expr.span),
            ExprKind::Attribute { attr, .. } if attr.name.starts_with('_') => {
                self.reject(
                    format!("access to attribute '{}' is not allowed", attr.name),
                    attr.span,
                );
                return;
            }
            _ => {}
        }
        visit::walk_expr(self, expr);
    }
}
