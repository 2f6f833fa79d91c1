//! Tree-walking evaluator for the learner language.
//!
//! One [`Evaluator`] runs one invocation on one thread. Every statement and
//! expression passes through [`Evaluator::tick`], which is where the
//! supervisor's interrupt flag and the optional step budget are observed.

use crate::allow::AllowList;
use crate::bind::{self, BindError};
use crate::env::{Frame, Scope, ScopeKind};
use crate::error::{EvalError, EvalResult, ExcKind, Exception};
use crate::format;
use crate::heap;
use crate::ops;
use crate::value::{
    FunctionBody, FunctionObj, ListObj, RangeObj, StrObj, Table, TableObj, Value,
};
use evalbox_types::ast::*;
use evalbox_types::Span;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-invocation execution limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    /// Deepest chain of learner function calls.
    pub recursion_limit: usize,
    /// Statements plus expressions evaluated before giving up.
    pub max_steps: Option<u64>,
    /// Native stack available to the evaluating thread.
    pub stack_bytes: usize,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            recursion_limit: 1000,
            max_steps: None,
            stack_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Control flow out of a statement.
pub(crate) enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Failure of the entry-point call made by the sandbox.
#[derive(Debug)]
pub enum CallError {
    /// The test input does not fit the entry point's parameters.
    Binding(String),
    Eval(EvalError),
}

#[inline(never)]
fn stack_marker() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

/// Cursor over an iterable value.
pub(crate) enum ValueIter {
    /// Live view: items appended during iteration are visited.
    List { list: Rc<ListObj>, index: usize },
    Items(std::vec::IntoIter<Value>),
    Chars { text: Rc<StrObj>, offset: usize },
    Range { next: i128, stop: i128, step: i128 },
}

impl ValueIter {
    pub(crate) fn next(&mut self) -> EvalResult<Option<Value>> {
        match self {
            Self::List { list, index } => {
                let item = list.get(*index);
                *index += 1;
                Ok(item)
            }
            Self::Items(items) => Ok(items.next()),
            Self::Chars { text, offset } => {
                let Some(c) = text[*offset..].chars().next() else {
                    return Ok(None);
                };
                *offset += c.len_utf8();
                Value::str(c.to_string()).map(Some)
            }
            Self::Range { next, stop, step } => {
                let more = if *step > 0 { *next < *stop } else { *next > *stop };
                if !more {
                    return Ok(None);
                }
                let value = *next as i64;
                *next += *step;
                Ok(Some(Value::Int(value)))
            }
        }
    }

    /// Remaining element count when it is known up front.
    pub(crate) fn len_hint(&self) -> Option<usize> {
        match self {
            Self::List { list, index } => Some(list.len().saturating_sub(*index)),
            Self::Items(items) => Some(items.len()),
            Self::Chars { .. } => None,
            Self::Range { next, stop, step } => {
                let n = if *step > 0 {
                    (*stop - *next + *step - 1) / *step
                } else {
                    (*next - *stop - *step - 1) / -*step
                };
                Some(usize::try_from(n.max(0)).unwrap_or(usize::MAX))
            }
        }
    }
}

pub struct Evaluator {
    globals: Rc<Frame>,
    frame: Rc<Frame>,
    allow: Arc<AllowList>,
    interrupt: Arc<AtomicBool>,
    budget: Budget,
    steps: u64,
    depth: usize,
    stack_base: usize,
    stack_limit: usize,
    output: String,
    /// Names of the active learner functions, innermost last.
    call_names: Vec<String>,
    /// Exceptions being handled by enclosing `except` blocks, for bare `raise`.
    handling: Vec<Rc<Exception>>,
    scopes: HashMap<usize, Rc<Scope>>,
}

impl Evaluator {
    pub fn new(allow: Arc<AllowList>, interrupt: Arc<AtomicBool>, budget: Budget) -> Self {
        let globals = Frame::module();
        let margin = (budget.stack_bytes / 4).clamp(64 * 1024, 4 * 1024 * 1024);
        Self {
            frame: Rc::clone(&globals),
            globals,
            allow,
            interrupt,
            budget,
            steps: 0,
            depth: 0,
            stack_base: stack_marker(),
            stack_limit: budget.stack_bytes.saturating_sub(margin),
            output: String::new(),
            call_names: Vec::new(),
            handling: Vec::new(),
            scopes: HashMap::new(),
        }
    }

    /// Run the top-level statements, defining the module's functions.
    pub fn exec_module(&mut self, module: &Module) -> EvalResult<()> {
        for stmt in &module.body {
            self.exec_stmt(stmt)?;
        }
        Ok(())
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name)
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Text written by `print` so far.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn take_output(&mut self) -> String {
        let text = std::mem::take(&mut self.output);
        heap::release(text.len());
        text
    }

    /// Call the entry point, keeping binding failures apart from failures
    /// raised while the body runs.
    pub fn call_entry(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, CallError> {
        match callee {
            Value::Function(func) => {
                let bindings = bind::bind_arguments(func, args, kwargs).map_err(|e| match e {
                    BindError::Mismatch(message) => CallError::Binding(message),
                    BindError::Eval(e) => CallError::Eval(e),
                })?;
                self.invoke(func, bindings).map_err(CallError::Eval)
            }
            other => self.call(other, args, kwargs).map_err(CallError::Eval),
        }
    }

    // ── Budgets ───────────────────────────────────────────────────────────────

    #[inline]
    pub(crate) fn tick(&mut self) -> EvalResult<()> {
        self.steps += 1;
        if self.interrupt.load(Ordering::Relaxed) {
            return Err(EvalError::Interrupted);
        }
        if let Some(max) = self.budget.max_steps {
            if self.steps > max {
                return Err(EvalError::StepBudget(max));
            }
        }
        Ok(())
    }

    fn check_stack(&self) -> EvalResult<()> {
        let used = self.stack_base.saturating_sub(stack_marker());
        if used > self.stack_limit {
            return Err(EvalError::RecursionLimit);
        }
        Ok(())
    }

    pub(crate) fn write_output(&mut self, text: &str) -> EvalResult<()> {
        heap::charge(text.len())?;
        self.output.push_str(text);
        Ok(())
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Names
    // ══════════════════════════════════════════════════════════════════════════

    fn load_global(&self, name: &str) -> EvalResult<Value> {
        if let Some(value) = self.globals.get(name) {
            return Ok(value);
        }
        self.allow.resolve(name).ok_or_else(|| {
            EvalError::raise(ExcKind::NameError, format!("name '{name}' is not defined"))
        })
    }

    pub(crate) fn load_name(&self, name: &str) -> EvalResult<Value> {
        let frame = &self.frame;
        let scope = frame.scope();
        if scope.kind == ScopeKind::Module || scope.is_global(name) {
            return self.load_global(name);
        }
        if scope.is_local(name) {
            return frame.get(name).ok_or_else(|| {
                EvalError::raise(
                    ExcKind::UnboundLocalError,
                    format!("cannot access local variable '{name}' where it is not associated with a value"),
                )
            });
        }
        let mut current = frame.parent();
        while let Some(outer) = current {
            if outer.scope().kind == ScopeKind::Module {
                break;
            }
            if outer.scope().is_global(name) {
                return self.load_global(name);
            }
            if let Some(value) = outer.get(name) {
                return Ok(value);
            }
            if outer.scope().is_local(name) {
                return Err(EvalError::raise(
                    ExcKind::NameError,
                    format!("cannot access free variable '{name}' where it is not associated with a value in enclosing scope"),
                ));
            }
            current = outer.parent();
        }
        self.load_global(name)
    }

    /// The frame a `nonlocal` name lives in.
    fn enclosing_binding(&self, name: &str) -> EvalResult<Rc<Frame>> {
        let mut current = self.frame.parent().cloned();
        while let Some(outer) = current {
            if outer.scope().kind == ScopeKind::Module {
                break;
            }
            if outer.scope().is_local(name) {
                return Ok(outer);
            }
            current = outer.parent().cloned();
        }
        Err(EvalError::raise(
            ExcKind::NameError,
            format!("no binding for nonlocal '{name}' found"),
        ))
    }

    pub(crate) fn store_name(&mut self, name: &str, value: Value) -> EvalResult<()> {
        let scope = self.frame.scope();
        if scope.kind == ScopeKind::Module || scope.is_global(name) {
            self.globals.set(name, value);
        } else if scope.is_nonlocal(name) {
            self.enclosing_binding(name)?.set(name, value);
        } else {
            self.frame.set(name, value);
        }
        Ok(())
    }

    fn delete_name(&mut self, name: &str) -> EvalResult<()> {
        let scope = self.frame.scope();
        let removed = if scope.kind == ScopeKind::Module || scope.is_global(name) {
            self.globals.remove(name)
        } else if scope.is_nonlocal(name) {
            self.enclosing_binding(name)?.remove(name)
        } else {
            self.frame.remove(name)
        };
        match removed {
            Some(_) => Ok(()),
            None => Err(EvalError::raise(
                ExcKind::NameError,
                format!("name '{name}' is not defined"),
            )),
        }
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Statements
    // ══════════════════════════════════════════════════════════════════════════

    pub(crate) fn exec_block(&mut self, body: &[Stmt]) -> EvalResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        self.tick()?;
        self.exec_stmt_kind(stmt).map_err(|e| self.locate(e, stmt.span))
    }

    /// Stamp the first statement an exception escapes with its position.
    fn locate(&self, error: EvalError, span: Span) -> EvalError {
        match error {
            EvalError::Raised(mut exc) if exc.line == 0 => {
                exc.line = span.start_line;
                exc.function = self.call_names.last().cloned();
                EvalError::Raised(exc)
            }
            other => other,
        }
    }

    fn exec_stmt_kind(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                let scope = self.scope_for(Arc::as_ptr(def) as usize, &def.params, &def.body);
                let func = self.make_function(
                    def.name.name.clone(),
                    FunctionBody::Def(Arc::clone(def)),
                    scope,
                )?;
                self.store_name(&def.name.name, func)?;
                Ok(Flow::Normal)
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr)?,
                    None => Value::None,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval_expr(value)?;
                for target in targets {
                    self.assign_target(target, value.clone())?;
                }
                Ok(Flow::Normal)
            }
            StmtKind::AugAssign { target, op, value } => {
                self.exec_aug_assign(target, *op, value)?;
                Ok(Flow::Normal)
            }
            StmtKind::AnnAssign { target, value, .. } => {
                if let Some(value) = value {
                    let value = self.eval_expr(value)?;
                    self.assign_target(target, value)?;
                }
                Ok(Flow::Normal)
            }
            StmtKind::If(s) => {
                if self.eval_expr(&s.test)?.truthy() {
                    self.exec_block(&s.body)
                } else {
                    self.exec_block(&s.orelse)
                }
            }
            StmtKind::While(s) => {
                loop {
                    self.tick()?;
                    if !self.eval_expr(&s.test)?.truthy() {
                        return self.exec_block(&s.orelse);
                    }
                    match self.exec_block(&s.body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                }
            }
            StmtKind::For(s) => {
                let iterable = self.eval_expr(&s.iter)?;
                let mut iter = self.iterate(&iterable)?;
                while let Some(item) = self.next_item(&mut iter)? {
                    self.assign_target(&s.target, item)?;
                    match self.exec_block(&s.body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                }
                self.exec_block(&s.orelse)
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Pass => Ok(Flow::Normal),
            StmtKind::Try(s) => self.exec_try(s),
            StmtKind::Raise(None) => match self.handling.last() {
                Some(exc) => Err(EvalError::Raised(Box::new((**exc).clone()))),
                None => Err(EvalError::raise(
                    ExcKind::RuntimeError,
                    "No active exception to reraise",
                )),
            },
            StmtKind::Raise(Some(expr)) => {
                let value = self.eval_expr(expr)?;
                Err(raise_value(value))
            }
            StmtKind::Assert { test, message } => {
                if self.eval_expr(test)?.truthy() {
                    return Ok(Flow::Normal);
                }
                let message = match message {
                    Some(expr) => format::display(&self.eval_expr(expr)?)?,
                    None => String::new(),
                };
                Err(EvalError::raise(ExcKind::AssertionError, message))
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete_target(target)?;
                }
                Ok(Flow::Normal)
            }
            StmtKind::Global(_) | StmtKind::Nonlocal(_) => Ok(Flow::Normal),
            StmtKind::Import(import) => Err(EvalError::Disallowed(format!(
                "import of module '{}' is not allowed",
                import.module
            ))),
            StmtKind::Expr(expr) => {
                self.eval_expr(expr)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn exec_aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr) -> EvalResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                let current = self.load_name(name)?;
                let rhs = self.eval_expr(value)?;
                let updated = self.inplace(op, current, &rhs)?;
                self.store_name(name, updated)
            }
            ExprKind::Subscript { value: object, index } => {
                let object = self.eval_expr(object)?;
                let index = self.eval_expr(index)?;
                let current = self.get_item(&object, &index)?;
                let rhs = self.eval_expr(value)?;
                let updated = self.inplace(op, current, &rhs)?;
                self.set_item(&object, &index, updated)
            }
            _ => Err(EvalError::raise(
                ExcKind::AttributeError,
                "attributes cannot be assigned",
            )),
        }
    }

    /// `list += iterable` extends in place; every other operator rebinds.
    fn inplace(&mut self, op: BinOp, current: Value, rhs: &Value) -> EvalResult<Value> {
        if let (BinOp::Add, Value::List(list)) = (op, &current) {
            let items = self.collect(rhs)?;
            list.extend(items)?;
            return Ok(current);
        }
        ops::binary(op, &current, rhs)
    }

    fn exec_try(&mut self, s: &TryStmt) -> EvalResult<Flow> {
        let outcome = match self.exec_block(&s.body) {
            Err(EvalError::Raised(exc)) => self.handle_exception(s, Rc::new(*exc)),
            Ok(Flow::Normal) => self.exec_block(&s.orelse),
            other => other,
        };
        if s.finalbody.is_empty() {
            return outcome;
        }
        if matches!(&outcome, Err(e) if e.is_fatal()) {
            return outcome;
        }
        match self.exec_block(&s.finalbody)? {
            Flow::Normal => outcome,
            overriding => Ok(overriding),
        }
    }

    fn handle_exception(&mut self, s: &TryStmt, exc: Rc<Exception>) -> EvalResult<Flow> {
        for handler in &s.handlers {
            let matched = match &handler.class {
                None => true,
                Some(class) => {
                    let class = self.eval_expr(class)?;
                    exception_matches(&class, exc.kind)?
                }
            };
            if !matched {
                continue;
            }
            if let Some(name) = &handler.name {
                self.store_name(&name.name, Value::Exception(Rc::clone(&exc)))?;
            }
            self.handling.push(Rc::clone(&exc));
            let result = self.exec_block(&handler.body);
            self.handling.pop();
            if let Some(name) = &handler.name {
                let _ = self.delete_name(&name.name);
            }
            return result;
        }
        Err(EvalError::Raised(Box::new((*exc).clone())))
    }

    // ── Assignment targets ───────────────────────────────────────────────────

    pub(crate) fn assign_target(&mut self, target: &Expr, value: Value) -> EvalResult<()> {
        match &target.kind {
            ExprKind::Name(name) => self.store_name(name, value),
            ExprKind::Tuple(items) | ExprKind::List(items) => self.unpack(items, value),
            ExprKind::Subscript { value: object, index } => {
                let object = self.eval_expr(object)?;
                if let ExprKind::Slice { lower, upper, step } = &index.kind {
                    let bounds = self.eval_slice(lower, upper, step)?;
                    return self.set_slice(&object, bounds, value);
                }
                let index = self.eval_expr(index)?;
                self.set_item(&object, &index, value)
            }
            ExprKind::Attribute { value: object, attr } => {
                let object = self.eval_expr(object)?;
                Err(EvalError::raise(
                    ExcKind::AttributeError,
                    format!(
                        "'{}' object attribute '{}' is read-only",
                        object.type_name(),
                        attr.name
                    ),
                ))
            }
            _ => Err(EvalError::type_error("cannot assign to expression")),
        }
    }

    fn unpack(&mut self, targets: &[Expr], value: Value) -> EvalResult<()> {
        let items = self.collect(&value)?;
        let star = targets
            .iter()
            .position(|t| matches!(t.kind, ExprKind::Starred(_)));
        match star {
            None => {
                if items.len() < targets.len() {
                    return Err(EvalError::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                if items.len() > targets.len() {
                    return Err(EvalError::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign_target(target, item)?;
                }
            }
            Some(star) => {
                let after = targets.len() - star - 1;
                if items.len() < star + after {
                    return Err(EvalError::value_error(format!(
                        "not enough values to unpack (expected at least {}, got {})",
                        star + after,
                        items.len()
                    )));
                }
                let mut items = items;
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(star);
                for (target, item) in targets[..star].iter().zip(items) {
                    self.assign_target(target, item)?;
                }
                if let ExprKind::Starred(inner) = &targets[star].kind {
                    self.assign_target(inner, Value::list(middle)?)?;
                }
                for (target, item) in targets[star + 1..].iter().zip(tail) {
                    self.assign_target(target, item)?;
                }
            }
        }
        Ok(())
    }

    fn delete_target(&mut self, target: &Expr) -> EvalResult<()> {
        match &target.kind {
            ExprKind::Name(name) => self.delete_name(name),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.delete_target(item)?;
                }
                Ok(())
            }
            ExprKind::Subscript { value: object, index } => {
                let object = self.eval_expr(object)?;
                if let ExprKind::Slice { lower, upper, step } = &index.kind {
                    let bounds = self.eval_slice(lower, upper, step)?;
                    return self.delete_slice(&object, bounds);
                }
                let index = self.eval_expr(index)?;
                self.delete_item(&object, &index)
            }
            _ => Err(EvalError::type_error("cannot delete expression")),
        }
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Expressions
    // ══════════════════════════════════════════════════════════════════════════

    pub(crate) fn eval_expr(&mut self, expr: &Expr) -> EvalResult<Value> {
        self.tick()?;
        self.check_stack()?;
        match &expr.kind {
            // ── Literals ──
            ExprKind::None => Ok(Value::None),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Int(n) => Ok(Value::Int(*n)),
            ExprKind::Float(x) => Ok(Value::Float(*x)),
            ExprKind::Str(s) => Value::str(s.clone()),
            ExprKind::FString(parts) => self.eval_fstring(parts),

            // ── Names ──
            ExprKind::Name(name) => self.load_name(name),

            // ── Displays ──
            ExprKind::List(items) => {
                let items = self.eval_display(items)?;
                Value::list(items)
            }
            ExprKind::Tuple(items) => {
                let items = self.eval_display(items)?;
                Value::tuple(items)
            }
            ExprKind::Set(items) => {
                let items = self.eval_display(items)?;
                let mut table = Table::new();
                for item in items {
                    table.insert(item.hash_key()?, item, Value::None);
                }
                Value::set(table)
            }
            ExprKind::Dict(items) => self.eval_dict(items),
            ExprKind::Comprehension(comp) => self.eval_comprehension(comp),

            // ── Operators ──
            ExprKind::Binary { left, op, right } => {
                let left = self.eval_expr(left)?;
                let right = self.eval_expr(right)?;
                ops::binary(*op, &left, &right)
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.eval_expr(operand)?;
                ops::unary(*op, &operand)
            }
            ExprKind::Logical { op, left, right } => {
                let left = self.eval_expr(left)?;
                match (op, left.truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval_expr(right),
                }
            }
            ExprKind::Compare { left, links } => {
                let mut current = self.eval_expr(left)?;
                for (op, right) in links {
                    let right = self.eval_expr(right)?;
                    if !ops::compare(*op, &current, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    current = right;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::Conditional { test, body, orelse } => {
                if self.eval_expr(test)?.truthy() {
                    self.eval_expr(body)
                } else {
                    self.eval_expr(orelse)
                }
            }

            // ── Functions and calls ──
            ExprKind::Lambda(lambda) => {
                let scope = self.scope_for(Arc::as_ptr(lambda) as usize, &lambda.params, &[]);
                self.make_function(
                    "<lambda>".to_owned(),
                    FunctionBody::Lambda(Arc::clone(lambda)),
                    scope,
                )
            }
            ExprKind::Call { func, args } => self.eval_call(func, args),

            // ── Access ──
            ExprKind::Attribute { value, attr } => {
                let object = self.eval_expr(value)?;
                self.get_attribute(object, &attr.name)
            }
            ExprKind::Subscript { value, index } => {
                let object = self.eval_expr(value)?;
                if let ExprKind::Slice { lower, upper, step } = &index.kind {
                    let bounds = self.eval_slice(lower, upper, step)?;
                    return self.get_slice(&object, bounds);
                }
                let index = self.eval_expr(index)?;
                self.get_item(&object, &index)
            }
            ExprKind::Slice { .. } => Err(EvalError::type_error(
                "slices are only valid inside a subscript",
            )),
            ExprKind::Starred(_) => Err(EvalError::type_error(
                "can't use starred expression here",
            )),
        }
    }

    fn eval_display(&mut self, items: &[Expr]) -> EvalResult<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match &item.kind {
                ExprKind::Starred(inner) => {
                    let iterable = self.eval_expr(inner)?;
                    out.extend(self.collect(&iterable)?);
                }
                _ => out.push(self.eval_expr(item)?),
            }
        }
        Ok(out)
    }

    fn eval_dict(&mut self, items: &[DictItem]) -> EvalResult<Value> {
        let mut table = Table::new();
        for item in items {
            match item {
                DictItem::Pair(key, value) => {
                    let key = self.eval_expr(key)?;
                    let value = self.eval_expr(value)?;
                    table.insert(key.hash_key()?, key, value);
                }
                DictItem::Unpack(mapping) => match self.eval_expr(mapping)? {
                    Value::Dict(other) => {
                        for (key, value) in other.borrow().iter() {
                            table.insert(key.hash_key()?, key.clone(), value.clone());
                        }
                    }
                    other => {
                        return Err(EvalError::type_error(format!(
                            "'{}' object is not a mapping",
                            other.type_name()
                        )))
                    }
                },
            }
        }
        Value::dict(table)
    }

    fn eval_fstring(&mut self, parts: &[FStringPart]) -> EvalResult<Value> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => out.push_str(text),
                FStringPart::Field {
                    value,
                    conversion,
                    spec,
                } => {
                    let value = self.eval_expr(value)?;
                    let value = match conversion {
                        Some('r') | Some('a') => Value::str(format::repr(&value)?)?,
                        Some(_) => Value::str(format::display(&value)?)?,
                        None => value,
                    };
                    let text = format::apply_spec(&value, spec.as_deref().unwrap_or(""))?;
                    heap::ensure_available(out.len().saturating_add(text.len()))?;
                    out.push_str(&text);
                }
            }
        }
        Value::str(out)
    }

    fn eval_comprehension(&mut self, comp: &Comprehension) -> EvalResult<Value> {
        let Some(first) = comp.generators.first() else {
            return Value::list(Vec::new());
        };
        let outermost = self.eval_expr(&first.iter)?;
        let accumulator = match &comp.kind {
            ComprehensionKind::List(_) | ComprehensionKind::Generator(_) => {
                Value::list(Vec::new())?
            }
            ComprehensionKind::Set(_) => Value::set(Table::new())?,
            ComprehensionKind::Dict(..) => Value::dict(Table::new())?,
        };
        let scope = Scope::comprehension(comp.generators.iter().map(|g| &g.target));
        let frame = Frame::child(&self.frame, scope);
        let saved = std::mem::replace(&mut self.frame, frame);
        let result = self.run_generators(comp, 0, Some(outermost), &accumulator);
        self.frame = saved;
        result?;
        Ok(accumulator)
    }

    fn run_generators(
        &mut self,
        comp: &Comprehension,
        level: usize,
        iterable: Option<Value>,
        accumulator: &Value,
    ) -> EvalResult<()> {
        let generator = &comp.generators[level];
        let iterable = match iterable {
            Some(value) => value,
            None => self.eval_expr(&generator.iter)?,
        };
        let mut iter = self.iterate(&iterable)?;
        'items: while let Some(item) = self.next_item(&mut iter)? {
            self.assign_target(&generator.target, item)?;
            for condition in &generator.conditions {
                if !self.eval_expr(condition)?.truthy() {
                    continue 'items;
                }
            }
            if level + 1 < comp.generators.len() {
                self.run_generators(comp, level + 1, None, accumulator)?;
                continue;
            }
            match (&comp.kind, accumulator) {
                (ComprehensionKind::List(elt) | ComprehensionKind::Generator(elt), Value::List(list)) => {
                    let value = self.eval_expr(elt)?;
                    list.push(value)?;
                }
                (ComprehensionKind::Set(elt), Value::Set(set)) => {
                    let value = self.eval_expr(elt)?;
                    insert_entry(set, value, Value::None)?;
                }
                (ComprehensionKind::Dict(key, value), Value::Dict(dict)) => {
                    let key = self.eval_expr(key)?;
                    let value = self.eval_expr(value)?;
                    insert_entry(dict, key, value)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ── Slices ───────────────────────────────────────────────────────────────

    fn eval_slice(
        &mut self,
        lower: &Option<Box<Expr>>,
        upper: &Option<Box<Expr>>,
        step: &Option<Box<Expr>>,
    ) -> EvalResult<SliceArgs> {
        let mut part = |expr: &Option<Box<Expr>>| -> EvalResult<Option<i64>> {
            let Some(expr) = expr else {
                return Ok(None);
            };
            match self.eval_expr(expr)? {
                Value::None => Ok(None),
                value => value.as_int().map(Some).ok_or_else(|| {
                    EvalError::type_error(
                        "slice indices must be integers or None or have an __index__ method",
                    )
                }),
            }
        };
        let lower = part(lower)?;
        let upper = part(upper)?;
        let step = part(step)?.unwrap_or(1);
        if step == 0 {
            return Err(EvalError::value_error("slice step cannot be zero"));
        }
        Ok(SliceArgs { lower, upper, step })
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Calls
    // ══════════════════════════════════════════════════════════════════════════

    fn eval_call(&mut self, func: &Expr, args: &[Argument]) -> EvalResult<Value> {
        if let ExprKind::Attribute { value, attr } = &func.kind {
            let receiver = self.eval_expr(value)?;
            let (positional, keywords) = self.eval_arguments(args)?;
            return self.call_method(&receiver, &attr.name, positional, keywords);
        }
        let callee = self.eval_expr(func)?;
        let (positional, keywords) = self.eval_arguments(args)?;
        self.call(&callee, positional, keywords)
    }

    fn eval_arguments(
        &mut self,
        args: &[Argument],
    ) -> EvalResult<(Vec<Value>, Vec<(String, Value)>)> {
        let mut positional = Vec::with_capacity(args.len());
        let mut keywords: Vec<(String, Value)> = Vec::new();
        for arg in args {
            match arg {
                Argument::Positional(expr) => positional.push(self.eval_expr(expr)?),
                Argument::Unpack(expr) => {
                    let iterable = self.eval_expr(expr)?;
                    positional.extend(self.collect(&iterable)?);
                }
                Argument::Keyword(name, expr) => {
                    let value = self.eval_expr(expr)?;
                    add_keyword(&mut keywords, name.name.clone(), value)?;
                }
                Argument::UnpackMapping(expr) => match self.eval_expr(expr)? {
                    Value::Dict(dict) => {
                        let entries: Vec<(Value, Value)> = dict
                            .borrow()
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect();
                        for (key, value) in entries {
                            let Value::Str(key) = key else {
                                return Err(EvalError::type_error("keywords must be strings"));
                            };
                            add_keyword(&mut keywords, key.as_str().to_owned(), value)?;
                        }
                    }
                    other => {
                        return Err(EvalError::type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            other.type_name()
                        )))
                    }
                },
            }
        }
        Ok((positional, keywords))
    }

    /// Call any callable value.
    pub fn call(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> EvalResult<Value> {
        match callee {
            Value::Function(func) => {
                let bindings =
                    bind::bind_arguments(func, args, kwargs).map_err(BindError::into_eval)?;
                self.invoke(func, bindings)
            }
            Value::Builtin(builtin) => self.call_builtin(*builtin, args, kwargs),
            Value::Method(method) => {
                let receiver = method.receiver.clone();
                self.call_method(&receiver, &method.name, args, kwargs)
            }
            Value::ExceptionClass(kind) => {
                if !kwargs.is_empty() {
                    return Err(EvalError::type_error(format!(
                        "{kind}() takes no keyword arguments"
                    )));
                }
                let message = match args.as_slice() {
                    [] => String::new(),
                    [one] => format::display(one)?,
                    _ => format::repr(&Value::tuple(args)?)?,
                };
                Ok(Value::exception(*kind, message))
            }
            other => Err(EvalError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn call1(&mut self, callee: &Value, arg: Value) -> EvalResult<Value> {
        self.call(callee, vec![arg], Vec::new())
    }

    fn invoke(&mut self, func: &Rc<FunctionObj>, bindings: Vec<(String, Value)>) -> EvalResult<Value> {
        if self.depth >= self.budget.recursion_limit {
            return Err(EvalError::RecursionLimit);
        }
        self.check_stack()?;
        let frame = Frame::child(&func.closure, Rc::clone(&func.scope));
        for (name, value) in bindings {
            frame.set(&name, value);
        }
        let saved = std::mem::replace(&mut self.frame, frame);
        self.depth += 1;
        self.call_names.push(func.name.clone());
        let result = match &func.body {
            FunctionBody::Def(def) => self.exec_block(&def.body).map(|flow| match flow {
                Flow::Return(value) => value,
                _ => Value::None,
            }),
            FunctionBody::Lambda(lambda) => self.eval_expr(&lambda.body),
        };
        self.call_names.pop();
        self.depth -= 1;
        self.frame = saved;
        result
    }

    fn scope_for(&mut self, key: usize, params: &[Param], body: &[Stmt]) -> Rc<Scope> {
        Rc::clone(
            self.scopes
                .entry(key)
                .or_insert_with(|| Scope::function(params, body)),
        )
    }

    fn make_function(
        &mut self,
        name: String,
        body: FunctionBody,
        scope: Rc<Scope>,
    ) -> EvalResult<Value> {
        let mut defaults = Vec::with_capacity(body.params().len());
        for param in body.params() {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval_expr(expr)?),
                None => None,
            });
        }
        Ok(Value::Function(Rc::new(FunctionObj {
            name,
            body,
            defaults,
            closure: Rc::clone(&self.frame),
            scope,
        })))
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Iteration
    // ══════════════════════════════════════════════════════════════════════════

    pub(crate) fn iterate(&mut self, value: &Value) -> EvalResult<ValueIter> {
        Ok(match value {
            Value::List(list) => ValueIter::List {
                list: Rc::clone(list),
                index: 0,
            },
            Value::Tuple(items) => ValueIter::Items(items.to_vec().into_iter()),
            Value::Str(text) => ValueIter::Chars {
                text: Rc::clone(text),
                offset: 0,
            },
            Value::Dict(table) | Value::Set(table) => {
                let keys: Vec<Value> = table.borrow().keys().cloned().collect();
                ValueIter::Items(keys.into_iter())
            }
            Value::Range(range) => ValueIter::Range {
                next: i128::from(range.start),
                stop: i128::from(range.stop),
                step: i128::from(range.step),
            },
            other => {
                return Err(EvalError::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        })
    }

    pub(crate) fn next_item(&mut self, iter: &mut ValueIter) -> EvalResult<Option<Value>> {
        self.tick()?;
        iter.next()
    }

    /// Materialise an iterable, metering the result before it is built.
    pub(crate) fn collect(&mut self, value: &Value) -> EvalResult<Vec<Value>> {
        let mut iter = self.iterate(value)?;
        let hint = iter.len_hint().unwrap_or(0);
        heap::ensure_available(hint.saturating_mul(crate::value::SLOT))?;
        let mut out = Vec::with_capacity(hint);
        while let Some(item) = self.next_item(&mut iter)? {
            out.push(item);
        }
        Ok(out)
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Attributes and Items
    // ══════════════════════════════════════════════════════════════════════════

    fn get_attribute(&mut self, object: Value, name: &str) -> EvalResult<Value> {
        if let Value::Exception(exc) = &object {
            if name == "args" {
                let args = if exc.message.is_empty() {
                    Vec::new()
                } else {
                    vec![Value::str(exc.message.clone())?]
                };
                return Value::tuple(args);
            }
        }
        if crate::methods::has_method(&object, name) {
            return Ok(Value::Method(Rc::new(crate::value::BoundMethod {
                receiver: object,
                name: name.to_owned(),
            })));
        }
        Err(no_attribute(&object, name))
    }

    pub(crate) fn get_item(&mut self, object: &Value, index: &Value) -> EvalResult<Value> {
        match object {
            Value::List(list) => {
                let items = list.borrow();
                let i = sequence_index(index, items.len(), "list")?;
                Ok(items[i].clone())
            }
            Value::Tuple(items) => {
                let i = sequence_index(index, items.len(), "tuple")?;
                Ok(items[i].clone())
            }
            Value::Str(text) => {
                let len = if text.is_ascii() {
                    text.len()
                } else {
                    text.chars().count()
                };
                let i = sequence_index(index, len, "string")?;
                let c = if text.is_ascii() {
                    char::from(text.as_bytes()[i])
                } else {
                    text.chars().nth(i).unwrap_or_default()
                };
                Value::str(c.to_string())
            }
            Value::Range(range) => {
                let i = sequence_index(index, range.len(), "range object")?;
                Ok(Value::Int(range.get(i).unwrap_or(0)))
            }
            Value::Dict(table) => {
                let found = table.borrow().get(&index.hash_key()?).cloned();
                match found {
                    Some(value) => Ok(value),
                    None => Err(EvalError::raise(ExcKind::KeyError, format::repr(index)?)),
                }
            }
            other => Err(EvalError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn set_item(&mut self, object: &Value, index: &Value, value: Value) -> EvalResult<()> {
        match object {
            Value::List(list) => {
                let mut items = list.borrow_mut();
                let i = sequence_index(index, items.len(), "list assignment")?;
                let previous = std::mem::replace(&mut items[i], value);
                drop(items);
                drop(previous);
                Ok(())
            }
            Value::Dict(table) => insert_entry(table, index.clone(), value),
            other => Err(EvalError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn delete_item(&mut self, object: &Value, index: &Value) -> EvalResult<()> {
        match object {
            Value::List(list) => {
                let removed = {
                    let mut items = list.borrow_mut();
                    let i = sequence_index(index, items.len(), "list assignment")?;
                    items.remove(i)
                };
                drop(removed);
                list.sync()
            }
            Value::Dict(table) => {
                let removed = table.borrow_mut().remove(&index.hash_key()?);
                match removed {
                    Some(entry) => {
                        drop(entry);
                        table.sync()
                    }
                    None => Err(EvalError::raise(ExcKind::KeyError, format::repr(index)?)),
                }
            }
            other => Err(EvalError::type_error(format!(
                "'{}' object doesn't support item deletion",
                other.type_name()
            ))),
        }
    }

    fn get_slice(&mut self, object: &Value, args: SliceArgs) -> EvalResult<Value> {
        match object {
            Value::List(list) => {
                let items = list.borrow();
                let picked: Vec<Value> = args
                    .indices(items.len())
                    .map(|i| items[i].clone())
                    .collect();
                drop(items);
                Value::list(picked)
            }
            Value::Tuple(items) => {
                Value::tuple(args.indices(items.len()).map(|i| items[i].clone()).collect())
            }
            Value::Str(text) => {
                let chars: Vec<char> = text.chars().collect();
                Value::str(args.indices(chars.len()).map(|i| chars[i]).collect::<String>())
            }
            Value::Range(range) => {
                let (start, stop, step) = args.adjust(range.len());
                let at = |i: i64| -> EvalResult<i64> {
                    let v = i128::from(range.start) + i128::from(range.step) * i128::from(i);
                    i64::try_from(v).map_err(|_| EvalError::overflow())
                };
                let step = range
                    .step
                    .checked_mul(step)
                    .ok_or_else(EvalError::overflow)?;
                Ok(Value::Range(RangeObj::new(at(start)?, at(stop)?, step)?))
            }
            other => Err(EvalError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn set_slice(&mut self, object: &Value, args: SliceArgs, value: Value) -> EvalResult<()> {
        let Value::List(list) = object else {
            return Err(EvalError::type_error(format!(
                "'{}' object does not support item assignment",
                object.type_name()
            )));
        };
        let replacement = self.collect(&value)?;
        let len = list.len();
        if args.step == 1 {
            let (start, stop, _) = args.adjust(len);
            let start = usize::try_from(start).unwrap_or(0);
            let stop = usize::try_from(stop).unwrap_or(0).max(start);
            list.reserve(replacement.len())?;
            let removed: Vec<Value> = list
                .borrow_mut()
                .splice(start..stop, replacement)
                .collect();
            drop(removed);
            return list.sync();
        }
        let indices: Vec<usize> = args.indices(len).collect();
        if indices.len() != replacement.len() {
            return Err(EvalError::value_error(format!(
                "attempt to assign sequence of size {} to extended slice of size {}",
                replacement.len(),
                indices.len()
            )));
        }
        let mut items = list.borrow_mut();
        let mut previous = Vec::with_capacity(indices.len());
        for (i, value) in indices.into_iter().zip(replacement) {
            previous.push(std::mem::replace(&mut items[i], value));
        }
        drop(items);
        drop(previous);
        Ok(())
    }

    fn delete_slice(&mut self, object: &Value, args: SliceArgs) -> EvalResult<()> {
        let Value::List(list) = object else {
            return Err(EvalError::type_error(format!(
                "'{}' object doesn't support item deletion",
                object.type_name()
            )));
        };
        let doomed: std::collections::HashSet<usize> = args.indices(list.len()).collect();
        let removed: Vec<Value> = {
            let mut items = list.borrow_mut();
            let kept: Vec<Value> = std::mem::take(&mut *items);
            let (gone, keep): (Vec<(usize, Value)>, Vec<(usize, Value)>) =
                kept.into_iter().enumerate().partition(|(i, _)| doomed.contains(i));
            *items = keep.into_iter().map(|(_, v)| v).collect();
            gone.into_iter().map(|(_, v)| v).collect()
        };
        drop(removed);
        list.sync()
    }
}

impl Drop for Evaluator {
    fn drop(&mut self) {
        heap::release(self.output.len());
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

/// Evaluated `lower:upper:step`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SliceArgs {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
    pub step: i64,
}

impl SliceArgs {
    /// Clamp to `len` the way sequence slicing does.
    pub(crate) fn adjust(&self, len: usize) -> (i64, i64, i64) {
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        let step = self.step;
        let clamp = |bound: Option<i64>, default: i64| -> i64 {
            match bound {
                None => default,
                Some(mut b) => {
                    if b < 0 {
                        b += len;
                        if b < 0 {
                            b = if step < 0 { -1 } else { 0 };
                        }
                    } else if b >= len {
                        b = if step < 0 { len - 1 } else { len };
                    }
                    b
                }
            }
        };
        if step > 0 {
            (clamp(self.lower, 0), clamp(self.upper, len), step)
        } else {
            (clamp(self.lower, len - 1), clamp(self.upper, -1), step)
        }
    }

    pub(crate) fn indices(&self, len: usize) -> impl Iterator<Item = usize> {
        let (start, stop, step) = self.adjust(len);
        let mut i = start;
        std::iter::from_fn(move || {
            let more = if step > 0 { i < stop } else { i > stop };
            if !more {
                return None;
            }
            let current = i;
            i += step;
            usize::try_from(current).ok()
        })
    }
}

/// Normalise a possibly negative index against `len`.
pub(crate) fn sequence_index(index: &Value, len: usize, what: &str) -> EvalResult<usize> {
    let Some(n) = index.as_int() else {
        let noun = what.split(' ').next().unwrap_or(what);
        return Err(EvalError::type_error(format!(
            "{noun} indices must be integers or slices, not {}",
            index.type_name()
        )));
    };
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if n < 0 { n + len_i } else { n };
    if resolved < 0 || resolved >= len_i {
        return Err(EvalError::raise(
            ExcKind::IndexError,
            format!("{what} index out of range"),
        ));
    }
    Ok(resolved as usize)
}

/// Insert into a dict or set, charging for a new entry first.
pub(crate) fn insert_entry(table: &TableObj, key: Value, value: Value) -> EvalResult<()> {
    let hash = key.hash_key()?;
    if !table.borrow().contains(&hash) {
        table.reserve(1)?;
    }
    let previous = table.borrow_mut().insert(hash, key, value);
    drop(previous);
    Ok(())
}

fn add_keyword(keywords: &mut Vec<(String, Value)>, name: String, value: Value) -> EvalResult<()> {
    if keywords.iter().any(|(k, _)| *k == name) {
        return Err(EvalError::type_error(format!(
            "keyword argument repeated: {name}"
        )));
    }
    keywords.push((name, value));
    Ok(())
}

fn no_attribute(object: &Value, name: &str) -> EvalError {
    EvalError::raise(
        ExcKind::AttributeError,
        format!("'{}' object has no attribute '{name}'", object.type_name()),
    )
}

fn raise_value(value: Value) -> EvalError {
    match value {
        Value::ExceptionClass(kind) => EvalError::raise(kind, ""),
        Value::Exception(exc) => {
            let mut exc = (*exc).clone();
            exc.line = 0;
            exc.function = None;
            EvalError::Raised(Box::new(exc))
        }
        _ => EvalError::type_error("exceptions must derive from BaseException"),
    }
}

fn exception_matches(class: &Value, kind: ExcKind) -> EvalResult<bool> {
    match class {
        Value::ExceptionClass(target) => Ok(kind.is_subclass_of(*target)),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if exception_matches(class, kind)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(EvalError::type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}
