//! Lexical scopes and runtime frames.
//!
//! A [`Scope`] is computed once per function definition from its body:
//! every name assigned anywhere in the body is local unless declared
//! `global` or `nonlocal`. A [`Frame`] holds the bindings of one activation
//! and links to the frame it was defined in.

use crate::heap::{self, Reclaim};
use crate::value::{self, Value};
use evalbox_types::ast::{Expr, ExprKind, Param, Stmt, StmtKind};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Comprehension,
}

#[derive(Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    locals: HashSet<String>,
    globals: HashSet<String>,
    nonlocals: HashSet<String>,
}

impl Scope {
    pub fn module() -> Rc<Scope> {
        Rc::new(Self {
            kind: ScopeKind::Module,
            locals: HashSet::new(),
            globals: HashSet::new(),
            nonlocals: HashSet::new(),
        })
    }

    /// Resolve the local names of a function or lambda body.
    pub fn function(params: &[Param], body: &[Stmt]) -> Rc<Scope> {
        let mut scope = Self {
            kind: ScopeKind::Function,
            locals: params.iter().map(|p| p.name.name.clone()).collect(),
            globals: HashSet::new(),
            nonlocals: HashSet::new(),
        };
        scope.collect(body);
        for name in scope.globals.iter().chain(scope.nonlocals.iter()) {
            scope.locals.remove(name);
        }
        Rc::new(scope)
    }

    pub fn comprehension<'a>(targets: impl IntoIterator<Item = &'a Expr>) -> Rc<Scope> {
        let mut scope = Self {
            kind: ScopeKind::Comprehension,
            locals: HashSet::new(),
            globals: HashSet::new(),
            nonlocals: HashSet::new(),
        };
        for target in targets {
            scope.bind_target(target);
        }
        Rc::new(scope)
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.locals.contains(name)
    }

    pub fn is_global(&self, name: &str) -> bool {
        self.globals.contains(name)
    }

    pub fn is_nonlocal(&self, name: &str) -> bool {
        self.nonlocals.contains(name)
    }

    pub fn nonlocals(&self) -> impl Iterator<Item = &str> {
        self.nonlocals.iter().map(String::as_str)
    }

    fn collect(&mut self, body: &[Stmt]) {
        for stmt in body {
            match &stmt.kind {
                StmtKind::FunctionDef(def) => {
                    self.locals.insert(def.name.name.clone());
                }
                StmtKind::Assign { targets, .. } => {
                    for target in targets {
                        self.bind_target(target);
                    }
                }
                StmtKind::AugAssign { target, .. } | StmtKind::AnnAssign { target, .. } => {
                    self.bind_target(target);
                }
                StmtKind::For(s) => {
                    self.bind_target(&s.target);
                    self.collect(&s.body);
                    self.collect(&s.orelse);
                }
                StmtKind::If(s) => {
                    self.collect(&s.body);
                    self.collect(&s.orelse);
                }
                StmtKind::While(s) => {
                    self.collect(&s.body);
                    self.collect(&s.orelse);
                }
                StmtKind::Try(s) => {
                    self.collect(&s.body);
                    for handler in &s.handlers {
                        if let Some(name) = &handler.name {
                            self.locals.insert(name.name.clone());
                        }
                        self.collect(&handler.body);
                    }
                    self.collect(&s.orelse);
                    self.collect(&s.finalbody);
                }
                StmtKind::Delete(targets) => {
                    for target in targets {
                        self.bind_target(target);
                    }
                }
                StmtKind::Global(names) => {
                    self.globals.extend(names.iter().map(|n| n.name.clone()));
                }
                StmtKind::Nonlocal(names) => {
                    self.nonlocals.extend(names.iter().map(|n| n.name.clone()));
                }
                StmtKind::Return(_)
                | StmtKind::Break
                | StmtKind::Continue
                | StmtKind::Pass
                | StmtKind::Raise(_)
                | StmtKind::Assert { .. }
                | StmtKind::Import(_)
                | StmtKind::Expr(_) => {}
            }
        }
    }

    fn bind_target(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Name(name) => {
                self.locals.insert(name.clone());
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

/// Bindings of one module, call or comprehension activation.
pub struct Frame {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Frame>>,
    scope: Rc<Scope>,
}

impl Frame {
    pub fn module() -> Rc<Frame> {
        Self::register(Self {
            vars: RefCell::new(HashMap::new()),
            parent: None,
            scope: Scope::module(),
        })
    }

    pub fn child(parent: &Rc<Frame>, scope: Rc<Scope>) -> Rc<Frame> {
        Self::register(Self {
            vars: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
            scope,
        })
    }

    fn register(frame: Frame) -> Rc<Frame> {
        let frame = Rc::new(frame);
        let weak: Weak<dyn Reclaim> = Rc::downgrade(&frame) as Weak<dyn Reclaim>;
        heap::track(weak);
        frame
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn parent(&self) -> Option<&Rc<Frame>> {
        self.parent.as_ref()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    pub fn set(&self, name: &str, value: Value) {
        let previous = self.vars.borrow_mut().insert(name.to_owned(), value);
        drop(previous);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.vars.borrow_mut().remove(name)
    }

    pub(crate) fn take_vars(&self) -> Vec<Value> {
        match self.vars.try_borrow_mut() {
            Ok(mut vars) => vars.drain().map(|(_, v)| v).collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Reclaim for Frame {
    fn reclaim(&self) {
        value::drain(self.take_vars());
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        value::drain(self.vars.get_mut().drain().map(|(_, v)| v).collect());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalbox_types::ast::{Ident, ParamKind};
    use evalbox_types::Span;

    fn name(n: &str) -> Expr {
        Expr::new(ExprKind::Name(n.into()), Span::default())
    }

    fn stmt(kind: StmtKind) -> Stmt {
        Stmt::new(kind, Span::default())
    }

    #[test]
    fn test_assigned_names_are_local() {
        let params = vec![Param {
            name: Ident::new("n", Span::default()),
            kind: ParamKind::Positional,
            default: None,
        }];
        let body = vec![
            stmt(StmtKind::Assign {
                targets: vec![Expr::new(
                    ExprKind::Tuple(vec![name("a"), name("b")]),
                    Span::default(),
                )],
                value: name("n"),
            }),
            stmt(StmtKind::Global(vec![Ident::new("b", Span::default())])),
        ];
        let scope = Scope::function(&params, &body);
        assert!(scope.is_local("n"));
        assert!(scope.is_local("a"));
        assert!(!scope.is_local("b"));
        assert!(scope.is_global("b"));
    }

    #[test]
    fn test_frame_bindings() {
        let module = Frame::module();
        module.set("x", Value::Int(1));
        let child = Frame::child(&module, Scope::comprehension([&name("i")]));
        assert!(child.scope().is_local("i"));
        assert!(child.get("x").is_none());
        assert!(child.parent().is_some_and(|p| p.contains("x")));
        assert!(module.remove("x").is_some());
    }
}
