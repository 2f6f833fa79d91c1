//! Parser tests: statement and expression shapes, block structure and
//! diagnostics for the constructs the learner language leaves out.

use evalbox_parser::parse;
use evalbox_types::ast::*;
use evalbox_types::SourceFile;

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn parse_ok(source: &str) -> Module {
    let sf = SourceFile::new("test.py", source);
    let result = parse(&sf);
    assert!(
        !result.errors.has_errors(),
        "unexpected errors: {:?}",
        result.errors.errors
    );
    result.module.expect("module is present without errors")
}

fn first_error(source: &str) -> String {
    let sf = SourceFile::new("test.py", source);
    let result = parse(&sf);
    assert!(result.errors.has_errors(), "expected a diagnostic for {source:?}");
    result.errors.errors[0].message.clone()
}

/// The expression of a single expression statement.
fn expr(source: &str) -> ExprKind {
    let module = parse_ok(source);
    match module.body.into_iter().next().map(|s| s.kind) {
        Some(StmtKind::Expr(e)) => e.kind,
        other => panic!("expected an expression statement, got {other:?}"),
    }
}

fn int(kind: &ExprKind) -> i64 {
    match kind {
        ExprKind::Int(n) => *n,
        other => panic!("expected an int literal, got {other:?}"),
    }
}

fn function(module: &Module, index: usize) -> &FunctionDef {
    match &module.body[index].kind {
        StmtKind::FunctionDef(def) => def,
        other => panic!("expected a function definition, got {other:?}"),
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Expressions
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_multiplication_binds_tighter_than_addition() {
    let ExprKind::Binary { left, op, right } = expr("1 + 2 * 3") else {
        panic!("expected a binary expression");
    };
    assert_eq!(op, BinOp::Add);
    assert_eq!(int(&left.kind), 1);
    let ExprKind::Binary { left, op, right } = right.kind else {
        panic!("expected the product on the right");
    };
    assert_eq!(op, BinOp::Mul);
    assert_eq!((int(&left.kind), int(&right.kind)), (2, 3));
}

#[test]
fn test_subtraction_is_left_associative() {
    let ExprKind::Binary { left, op, right } = expr("10 - 4 - 3") else {
        panic!("expected a binary expression");
    };
    assert_eq!(op, BinOp::Sub);
    assert_eq!(int(&right.kind), 3);
    assert!(matches!(left.kind, ExprKind::Binary { op: BinOp::Sub, .. }));
}

#[test]
fn test_power_is_right_associative_and_binds_tighter_than_negation() {
    let ExprKind::Unary { op, operand } = expr("-2 ** 3 ** 2") else {
        panic!("expected a unary negation");
    };
    assert_eq!(op, UnaryOp::Neg);
    let ExprKind::Binary { op, right, .. } = operand.kind else {
        panic!("expected a power");
    };
    assert_eq!(op, BinOp::Pow);
    assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Pow, .. }));
}

#[test]
fn test_comparison_chain_is_one_node() {
    let ExprKind::Compare { left, links } = expr("a < b <= c != d") else {
        panic!("expected a comparison");
    };
    assert_eq!(left.kind, ExprKind::Name("a".into()));
    let ops: Vec<CmpOp> = links.iter().map(|(op, _)| *op).collect();
    assert_eq!(ops, vec![CmpOp::Lt, CmpOp::LtE, CmpOp::NotEq]);
}

#[test]
fn test_negated_membership_and_identity() {
    let ExprKind::Compare { links, .. } = expr("x not in ys") else {
        panic!("expected a comparison");
    };
    assert_eq!(links[0].0, CmpOp::NotIn);
    let ExprKind::Compare { links, .. } = expr("x is not None") else {
        panic!("expected a comparison");
    };
    assert_eq!(links[0].0, CmpOp::IsNot);
}

#[test]
fn test_and_binds_tighter_than_or() {
    let ExprKind::Logical { op, right, .. } = expr("a or b and c") else {
        panic!("expected a logical expression");
    };
    assert_eq!(op, LogicalOp::Or);
    assert!(matches!(right.kind, ExprKind::Logical { op: LogicalOp::And, .. }));
}

#[test]
fn test_conditional_expression() {
    let ExprKind::Conditional { test, body, orelse } = expr("1 if ok else 2") else {
        panic!("expected a conditional expression");
    };
    assert_eq!(test.kind, ExprKind::Name("ok".into()));
    assert_eq!((int(&body.kind), int(&orelse.kind)), (1, 2));
}

#[test]
fn test_list_comprehension_with_condition() {
    let ExprKind::Comprehension(comp) = expr("[x * x for x in xs if x % 2]") else {
        panic!("expected a comprehension");
    };
    assert!(matches!(comp.kind, ComprehensionKind::List(_)));
    assert_eq!(comp.generators.len(), 1);
    assert_eq!(comp.generators[0].conditions.len(), 1);
    assert_eq!(comp.generators[0].iter.kind, ExprKind::Name("xs".into()));
}

#[test]
fn test_dict_comprehension_and_nested_generators() {
    let ExprKind::Comprehension(comp) = expr("{k: v for row in grid for k, v in row}") else {
        panic!("expected a comprehension");
    };
    assert!(matches!(comp.kind, ComprehensionKind::Dict(_, _)));
    assert_eq!(comp.generators.len(), 2);
    assert!(matches!(comp.generators[1].target.kind, ExprKind::Tuple(_)));
}

#[test]
fn test_displays() {
    assert!(matches!(expr("[]"), ExprKind::List(items) if items.is_empty()));
    assert!(matches!(expr("()"), ExprKind::Tuple(items) if items.is_empty()));
    assert!(matches!(expr("(1,)"), ExprKind::Tuple(items) if items.len() == 1));
    assert!(matches!(expr("{1, 2}"), ExprKind::Set(items) if items.len() == 2));
    assert!(matches!(expr("{}"), ExprKind::Dict(items) if items.is_empty()));
    assert!(matches!(expr("{'a': 1, **rest}"), ExprKind::Dict(items)
        if matches!(items[1], DictItem::Unpack(_))));
}

#[test]
fn test_call_arguments() {
    let ExprKind::Call { func, args } = expr("f(1, *xs, key=2, **kw)") else {
        panic!("expected a call");
    };
    assert_eq!(func.kind, ExprKind::Name("f".into()));
    assert!(matches!(args[0], Argument::Positional(_)));
    assert!(matches!(args[1], Argument::Unpack(_)));
    assert!(matches!(&args[2], Argument::Keyword(name, _) if name.name == "key"));
    assert!(matches!(args[3], Argument::UnpackMapping(_)));
}

#[test]
fn test_method_call_and_slice() {
    let ExprKind::Call { func, .. } = expr("s.strip()") else {
        panic!("expected a call");
    };
    assert!(matches!(&func.kind, ExprKind::Attribute { attr, .. } if attr.name == "strip"));

    let ExprKind::Subscript { index, .. } = expr("xs[::-1]") else {
        panic!("expected a subscript");
    };
    let ExprKind::Slice { lower, upper, step } = index.kind else {
        panic!("expected a slice");
    };
    assert!(lower.is_none() && upper.is_none());
    assert!(step.is_some());
}

#[test]
fn test_lambda() {
    let ExprKind::Lambda(lambda) = expr("lambda a, b=1: a + b") else {
        panic!("expected a lambda");
    };
    assert_eq!(lambda.params.len(), 2);
    assert!(lambda.params[1].default.is_some());
    assert!(matches!(lambda.body.kind, ExprKind::Binary { op: BinOp::Add, .. }));
}

#[test]
fn test_fstring_parts() {
    let ExprKind::FString(parts) = expr("f'n={n!r:>4} done'") else {
        panic!("expected an f-string");
    };
    assert_eq!(parts[0], FStringPart::Literal("n=".into()));
    assert!(matches!(&parts[1], FStringPart::Field { conversion: Some('r'), spec: Some(s), .. } if s == ">4"));
    assert_eq!(parts[2], FStringPart::Literal(" done".into()));
}

// ══════════════════════════════════════════════════════════════════════════════
// Statements
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_function_definition_with_parameter_kinds() {
    let module = parse_ok("def f(a, b=2, *args, c, **kw) -> int:\n    return a\n");
    let def = function(&module, 0);
    assert_eq!(def.name.name, "f");
    let kinds: Vec<ParamKind> = def.params.iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ParamKind::Positional,
            ParamKind::Positional,
            ParamKind::VarArgs,
            ParamKind::KeywordOnly,
            ParamKind::VarKeywords,
        ]
    );
    assert!(def.params[1].default.is_some());
    assert!(matches!(def.body[0].kind, StmtKind::Return(Some(_))));
}

#[test]
fn test_annotated_parameters_are_accepted() {
    let module = parse_ok("def f(xs: list[int], n: int = 0):\n    return n\n");
    assert_eq!(function(&module, 0).params.len(), 2);
}

#[test]
fn test_elif_folds_into_nested_if() {
    let module = parse_ok("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
    let StmtKind::If(outer) = &module.body[0].kind else {
        panic!("expected an if statement");
    };
    assert_eq!(outer.orelse.len(), 1);
    let StmtKind::If(inner) = &outer.orelse[0].kind else {
        panic!("elif becomes a nested if");
    };
    assert_eq!(inner.test.kind, ExprKind::Name("b".into()));
    assert_eq!(inner.orelse.len(), 1);
}

#[test]
fn test_chained_and_unpacking_assignment() {
    let module = parse_ok("a = b = 0\nfirst, *rest = xs\n");
    let StmtKind::Assign { targets, .. } = &module.body[0].kind else {
        panic!("expected an assignment");
    };
    assert_eq!(targets.len(), 2);
    let StmtKind::Assign { targets, .. } = &module.body[1].kind else {
        panic!("expected an assignment");
    };
    let ExprKind::Tuple(items) = &targets[0].kind else {
        panic!("expected a tuple target");
    };
    assert!(matches!(items[1].kind, ExprKind::Starred(_)));
}

#[test]
fn test_augmented_and_annotated_assignment() {
    let module = parse_ok("total += n\ncount: int = 0\n");
    assert!(matches!(module.body[0].kind, StmtKind::AugAssign { op: BinOp::Add, .. }));
    assert!(matches!(module.body[1].kind, StmtKind::AnnAssign { value: Some(_), .. }));
}

#[test]
fn test_loops_with_else_and_control_flow() {
    let module = parse_ok(
        "for i in range(3):\n    if i:\n        continue\n    break\nelse:\n    pass\nwhile x:\n    x -= 1\n",
    );
    let StmtKind::For(for_loop) = &module.body[0].kind else {
        panic!("expected a for loop");
    };
    assert_eq!(for_loop.body.len(), 2);
    assert!(matches!(for_loop.body[1].kind, StmtKind::Break));
    assert!(matches!(for_loop.orelse[0].kind, StmtKind::Pass));
    assert!(matches!(module.body[1].kind, StmtKind::While(_)));
}

#[test]
fn test_try_statement() {
    let module = parse_ok(
        "try:\n    f()\nexcept (ValueError, KeyError) as e:\n    pass\nexcept:\n    raise\nelse:\n    g()\nfinally:\n    h()\n",
    );
    let StmtKind::Try(stmt) = &module.body[0].kind else {
        panic!("expected a try statement");
    };
    assert_eq!(stmt.handlers.len(), 2);
    assert_eq!(stmt.handlers[0].name.as_ref().map(|n| n.name.as_str()), Some("e"));
    assert!(stmt.handlers[1].class.is_none());
    assert_eq!(stmt.orelse.len(), 1);
    assert_eq!(stmt.finalbody.len(), 1);
}

#[test]
fn test_simple_statements_on_one_line() {
    let module = parse_ok("x = 1; y = 2; del x\n");
    assert_eq!(module.body.len(), 3);
    assert!(matches!(module.body[2].kind, StmtKind::Delete(_)));
}

#[test]
fn test_import_is_parsed_for_later_rejection() {
    let module = parse_ok("import os.path\nfrom math import sqrt, pi\n");
    let StmtKind::Import(import) = &module.body[0].kind else {
        panic!("expected an import");
    };
    assert_eq!(import.module, "os.path");
    let StmtKind::Import(import) = &module.body[1].kind else {
        panic!("expected an import");
    };
    assert_eq!(import.names, vec!["sqrt".to_string(), "pi".to_string()]);
}

#[test]
fn test_nested_functions_and_scope_declarations() {
    let module = parse_ok(
        "def outer():\n    n = 0\n    def inner():\n        nonlocal n\n        n += 1\n    return inner\n",
    );
    let def = function(&module, 0);
    let StmtKind::FunctionDef(inner) = &def.body[1].kind else {
        panic!("expected a nested function");
    };
    assert!(matches!(inner.body[0].kind, StmtKind::Nonlocal(_)));
}

#[test]
fn test_spans_point_at_source_lines() {
    let module = parse_ok("x = 1\n\ndef f():\n    return x\n");
    assert_eq!(module.body[0].span.start_line, 1);
    assert_eq!(module.body[1].span.start_line, 3);
}

// ══════════════════════════════════════════════════════════════════════════════
// Diagnostics
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_control_flow_outside_its_context() {
    assert_eq!(first_error("return 1\n"), "'return' outside function");
    assert_eq!(first_error("break\n"), "'break' outside loop");
    assert_eq!(
        first_error("for x in xs:\n    def f():\n        continue\n"),
        "'continue' outside loop"
    );
    assert_eq!(first_error("nonlocal x\n"), "nonlocal declaration not allowed at module level");
}

#[test]
fn test_unsupported_constructs() {
    assert_eq!(first_error("class A:\n    pass\n"), "class definitions are not supported");
    assert_eq!(first_error("@wrap\ndef f():\n    pass\n"), "decorators are not supported");
    assert_eq!(
        first_error("with open('f') as fh:\n    pass\n"),
        "'with' statements are not supported"
    );
    assert_eq!(
        first_error("def f():\n    yield 1\n"),
        "generators ('yield') are not supported"
    );
    assert_eq!(
        first_error("if n := 3:\n    pass\n"),
        "assignment expressions (':=') are not supported"
    );
}

#[test]
fn test_missing_indented_block() {
    let message = first_error("def f():\nreturn 1\n");
    assert!(message.starts_with("expected an indented block after"), "{message}");
}

#[test]
fn test_invalid_assignment_target() {
    let message = first_error("f() = 1\n");
    assert!(message.contains("function call"), "{message}");
}

#[test]
fn test_unbalanced_parenthesis() {
    let sf = SourceFile::new("test.py", "def f(:\n    return 1\n");
    let result = parse(&sf);
    assert!(result.errors.has_errors());
    assert_eq!(result.errors.errors[0].span.start_line, 1);
}

#[test]
fn test_errors_are_collected_past_the_first() {
    let sf = SourceFile::new("test.py", "break\nx = = 1\nreturn 2\n");
    let result = parse(&sf);
    assert!(result.errors.total >= 3, "{:?}", result.errors.errors);
}

#[test]
fn test_lexer_errors_come_first() {
    let sf = SourceFile::new("test.py", "return 1\nx = 'open\n");
    let result = parse(&sf);
    assert_eq!(result.errors.errors[0].message, "unterminated string literal");
}

#[test]
fn test_long_arithmetic_chain_is_refused() {
    let chain = vec!["1"; 20_000].join(" + ");
    let message = first_error(&format!("def f():\n    return {chain}\n"));
    assert_eq!(message, "too many nested blocks or parentheses");
}

#[test]
fn test_long_boolean_chain_is_refused() {
    let chain = vec!["x"; 200_000].join(" and ");
    let message = first_error(&format!("def f(x):\n    return {chain}\n"));
    assert_eq!(message, "too many nested blocks or parentheses");
}

#[test]
fn test_long_trailer_and_power_chains_are_refused() {
    let calls = format!("f{}\n", "()".repeat(20_000));
    assert_eq!(first_error(&calls), "too many nested blocks or parentheses");
    let powers = format!("{}2\n", "2 ** ".repeat(20_000));
    assert_eq!(first_error(&powers), "too many nested blocks or parentheses");
}

#[test]
fn test_long_elif_ladder_is_refused() {
    let mut source = String::from("if x == 0:\n    pass\n");
    for n in 1..5_000 {
        source.push_str(&format!("elif x == {n}:\n    pass\n"));
    }
    assert_eq!(first_error(&source), "too many nested blocks or parentheses");
}

#[test]
fn test_moderate_chains_still_parse() {
    let chain = vec!["1"; 50].join(" + ");
    let module = parse_ok(&format!("x = {chain}\ny = a.b.c(1)[0].d\n"));
    assert_eq!(module.body.len(), 2);
}
