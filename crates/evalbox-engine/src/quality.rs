//! Quality Analyzer: static, advisory metrics over a parsed submission.

use evalbox_types::ast::*;
use evalbox_types::visit::{self, Visitor};
use evalbox_types::{QualityMetrics, StructuralUnit};

/// Calls that count as leaning on a builtin.
pub const NOTABLE_BUILTINS: &[&str] = &["sorted", "min", "max", "sum", "len"];

/// Extra complexity charged for a self-recursive function.
const RECURSION_WEIGHT: usize = 5;

pub fn analyze(unit: &StructuralUnit) -> QualityMetrics {
    let source = &unit.source().source;
    let mut counter = Counter::default();
    visit::walk_body(&mut counter, &unit.module().body);

    QualityMetrics {
        syntax_valid: true,
        lines_of_code: source.matches('\n').count() + 1,
        character_count: source.chars().count(),
        function_count: counter.functions,
        loop_count: counter.loops,
        conditional_count: counter.conditionals,
        has_recursion: counter.recursive,
        has_base_case: counter.guarded_exit,
        uses_builtin: counter.uses_builtin,
        complexity_estimate: counter.loops
            + counter.conditionals
            + if counter.recursive { RECURSION_WEIGHT } else { 0 },
    }
}

#[derive(Default)]
struct Counter {
    functions: usize,
    loops: usize,
    conditionals: usize,
    recursive: bool,
    guarded_exit: bool,
    uses_builtin: bool,
    /// `if` statements enclosing the current node inside the current function.
    if_depth: usize,
}

impl Visitor for Counter {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::If(s) => {
                self.conditionals += 1;
                self.visit_expr(&s.test);
                self.if_depth += 1;
                visit::walk_body(self, &s.body);
                visit::walk_body(self, &s.orelse);
                self.if_depth -= 1;
                return;
            }
            StmtKind::For(_) | StmtKind::While(_) => self.loops += 1,
            StmtKind::Return(_) | StmtKind::Break if self.if_depth > 0 => self.guarded_exit = true,
            _ => {}
        }
        visit::walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprKind::Call { func, .. } = &expr.kind {
            if let ExprKind::Name(name) = &func.kind {
                if NOTABLE_BUILTINS.contains(&name.as_str()) {
                    self.uses_builtin = true;
                }
            }
        }
        visit::walk_expr(self, expr);
    }

    fn visit_function(&mut self, def: &FunctionDef) {
        self.functions += 1;
        if calls_itself(def) {
            self.recursive = true;
        }
        let outer = std::mem::take(&mut self.if_depth);
        visit::walk_body(self, &def.body);
        visit::walk_params(self, &def.params);
        self.if_depth = outer;
    }
}

/// True when `def`'s body, nested scopes included, calls `def.name` by name.
///
/// Only direct self-calls are found; mutual recursion is not.
fn calls_itself(def: &FunctionDef) -> bool {
    struct SelfCall<'a> {
        name: &'a str,
        found: bool,
    }

    impl Visitor for SelfCall<'_> {
        fn visit_expr(&mut self, expr: &Expr) {
            if let ExprKind::Call { func, .. } = &expr.kind {
                if matches!(&func.kind, ExprKind::Name(n) if n == self.name) {
                    self.found = true;
                    return;
                }
            }
            visit::walk_expr(self, expr);
        }
    }

    let mut finder = SelfCall {
        name: &def.name.name,
        found: false,
    };
    visit::walk_body(&mut finder, &def.body);
    finder.found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::validate;

    fn metrics(source: &str) -> QualityMetrics {
        analyze(&validate(source).unwrap())
    }

    #[test]
    fn test_counts_and_complexity() {
        let m = metrics(
            "def f(xs):\n    total = 0\n    for x in xs:\n        if x > 0:\n            total += x\n        elif x < -5:\n            break\n    while total > 10:\n        total -= 1\n    return total\n",
        );
        assert!(m.syntax_valid);
        assert_eq!(m.function_count, 1);
        assert_eq!(m.loop_count, 2);
        assert_eq!(m.conditional_count, 2);
        assert!(!m.has_recursion);
        assert!(m.has_base_case);
        assert_eq!(m.complexity_estimate, 4);
        assert_eq!(m.lines_of_code, 11);
    }

    #[test]
    fn test_self_recursion_is_detected() {
        let m = metrics("def fact(n):\n    if n <= 1:\n        return 1\n    return n * fact(n - 1)\n");
        assert!(m.has_recursion);
        assert!(m.has_base_case);
        assert_eq!(m.complexity_estimate, 1 + 5);
    }

    #[test]
    fn test_mutual_recursion_is_not_detected() {
        let m = metrics(
            "def even(n):\n    return True if n == 0 else odd(n - 1)\ndef odd(n):\n    return False if n == 0 else even(n - 1)\n",
        );
        assert!(!m.has_recursion);
        assert_eq!(m.function_count, 2);
    }

    #[test]
    fn test_unguarded_return_is_not_a_base_case() {
        let m = metrics("def f(n):\n    return f(n - 1)\n");
        assert!(m.has_recursion);
        assert!(!m.has_base_case);
    }

    #[test]
    fn test_return_in_nested_function_under_if_is_not_guarded() {
        let m = metrics("def f(flag):\n    if flag:\n        def g():\n            return 1\n    return 0\n");
        assert!(!m.has_base_case);
        assert_eq!(m.function_count, 2);
    }

    #[test]
    fn test_builtin_use_is_structural() {
        assert!(metrics("def f(xs):\n    return sorted(xs)\n").uses_builtin);
        assert!(!metrics("def f(xs):\n    lengths = xs\n    return lengths\n").uses_builtin);
    }
}
