//! Language-level tests: each submission's `f` is run once and its JSON
//! result checked.

use evalbox_eval::{AllowList, Limits, Sandbox};
use evalbox_types::ast::StmtKind;
use evalbox_types::{Callable, ExecutionOutcome, SourceFile, StructuralUnit, TestCase};
use serde_json::{json, Value as Json};
use std::sync::Arc;

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn outcome(source: &str, input: Json) -> ExecutionOutcome {
    let file = SourceFile::new("submission.py", source);
    let parsed = evalbox_parser::parse(&file);
    assert!(!parsed.errors.has_errors(), "parse errors: {:?}", parsed.errors);
    let unit = StructuralUnit::new(file, parsed.module.expect("no module"));
    let callable = unit
        .module()
        .body
        .iter()
        .enumerate()
        .find_map(|(i, stmt)| match &stmt.kind {
            StmtKind::FunctionDef(def) if def.name.name == "f" => Some(Callable::new(def, i)),
            _ => None,
        })
        .expect("submission defines no `f`");
    let sandbox = Sandbox::new(Arc::new(AllowList::standard()), Limits::default());
    sandbox.run(&unit, callable, &TestCase::new(input, Json::Null), 0)
}

/// Run `f` with no arguments and return its result.
fn eval(source: &str) -> Json {
    let outcome = outcome(source, json!({}));
    match (outcome.actual_output, outcome.error) {
        (Some(value), None) => value,
        (_, error) => panic!("`f` failed: {error:?}"),
    }
}

fn exception(source: &str) -> String {
    outcome(source, json!({}))
        .error
        .and_then(|e| e.exception)
        .expect("expected a raised exception")
}

// ══════════════════════════════════════════════════════════════════════════════
// Arithmetic and strings
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_integer_arithmetic_follows_floor_semantics() {
    assert_eq!(eval("def f():\n    return [7 // 2, -7 // 2, -7 % 3, 2 ** 10]\n"), json!([3, -4, 2, 1024]));
}

#[test]
fn test_true_division_yields_float() {
    assert_eq!(eval("def f():\n    return 7 / 2\n"), json!(3.5));
}

#[test]
fn test_overflow_is_an_exception() {
    assert_eq!(exception("def f():\n    return 2 ** 64\n"), "OverflowError");
}

#[test]
fn test_out_of_range_int_literal_text_overflows() {
    assert_eq!(exception("def f():\n    return int('99999999999999999999')\n"), "OverflowError");
    assert_eq!(exception("def f():\n    return int('12x')\n"), "ValueError");
    assert_eq!(eval("def f():\n    return int(' -9223372036854775808 ')\n"), json!(i64::MIN));
}

#[test]
fn test_swapcase() {
    assert_eq!(eval("def f():\n    return 'Hello World'.swapcase()\n"), json!("hELLO wORLD"));
}

#[test]
fn test_string_operations() {
    let source = "\
def f():
    s = 'Hello, World'
    return [s.lower(), s[::-1], s[7:], s.split(', '), '-'.join(['a', 'b']), s.find('o')]
";
    assert_eq!(
        eval(source),
        json!(["hello, world", "dlroW ,olleH", "World", ["Hello", "World"], "a-b", 4])
    );
}

#[test]
fn test_fstrings_and_format() {
    let source = "\
def f():
    x = 3.14159
    return [f'{x:.2f}', f'{1 + 1}!', '{} and {}'.format(1, 'b'), f'{\"ab\"!r}']
";
    assert_eq!(eval(source), json!(["3.14", "2!", "1 and b", "'ab'"]));
}

// ══════════════════════════════════════════════════════════════════════════════
// Containers
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_list_methods() {
    let source = "\
def f():
    xs = [3, 1, 2]
    xs.append(5)
    xs.sort(reverse=True)
    y = xs.pop(0)
    xs.insert(0, 9)
    return [xs, y, xs.index(2)]
";
    assert_eq!(eval(source), json!([[9, 3, 2, 1], 5, 2]));
}

#[test]
fn test_dict_iteration_keeps_insertion_order() {
    let source = "\
def f():
    d = {'b': 1}
    d['a'] = 2
    d['b'] += 10
    return [list(d), [v for v in d.values()], d.get('z', 0)]
";
    assert_eq!(eval(source), json!([["b", "a"], [11, 2], 0]));
}

#[test]
fn test_comprehensions() {
    let source = "\
def f():
    squares = [x * x for x in range(5) if x % 2 == 0]
    table = {k: len(k) for k in ['a', 'bb']}
    return [squares, table, sorted({c for c in 'banana'})]
";
    assert_eq!(eval(source), json!([[0, 4, 16], {"a": 1, "bb": 2}, ["a", "b", "n"]]));
}

#[test]
fn test_unpacking_and_swaps() {
    let source = "\
def f():
    a, b = 1, 2
    a, b = b, a
    first, *rest = [1, 2, 3]
    return [a, b, first, rest]
";
    assert_eq!(eval(source), json!([2, 1, 1, [2, 3]]));
}

#[test]
fn test_aliasing_is_by_reference() {
    let source = "\
def f():
    xs = []
    ys = xs
    ys.append(1)
    return xs
";
    assert_eq!(eval(source), json!([1]));
}

#[test]
fn test_cyclic_structures_do_not_hang() {
    let source = "\
def f():
    xs = [1]
    xs.append(xs)
    return len(xs)
";
    assert_eq!(eval(source), json!(2));
}

#[test]
fn test_missing_key_raises() {
    assert_eq!(exception("def f():\n    return {}['x']\n"), "KeyError");
    assert_eq!(exception("def f():\n    return [1][3]\n"), "IndexError");
}

// ══════════════════════════════════════════════════════════════════════════════
// Functions and control flow
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_closures_and_nonlocal() {
    let source = "\
def f():
    def counter():
        count = 0
        def bump():
            nonlocal count
            count += 1
            return count
        return bump
    c = counter()
    c()
    return c()
";
    assert_eq!(eval(source), json!(2));
}

#[test]
fn test_defaults_varargs_and_kwargs() {
    let source = "\
def g(a, b=10, *rest, **extra):
    return [a, b, list(rest), sorted(extra)]

def f():
    return [g(1), g(1, 2, 3, 4, z=1, y=2)]
";
    assert_eq!(eval(source), json!([[1, 10, [], []], [1, 2, [3, 4], ["y", "z"]]]));
}

#[test]
fn test_lambda_as_sort_key() {
    let source = "\
def f():
    words = ['ccc', 'a', 'bb']
    return sorted(words, key=lambda w: len(w))
";
    assert_eq!(eval(source), json!(["a", "bb", "ccc"]));
}

#[test]
fn test_loop_else_branches() {
    let source = "\
def f():
    found = []
    for n in [1, 2, 3]:
        if n == 5:
            break
    else:
        found.append('no break')
    while False:
        pass
    else:
        found.append('while else')
    return found
";
    assert_eq!(eval(source), json!(["no break", "while else"]));
}

#[test]
fn test_try_except_finally() {
    let source = "\
def f():
    log = []
    try:
        1 / 0
    except ZeroDivisionError as e:
        log.append('caught')
    else:
        log.append('else')
    finally:
        log.append('finally')
    try:
        raise KeyError('k')
    except LookupError:
        log.append('parent class')
    return log
";
    assert_eq!(eval(source), json!(["caught", "finally", "parent class"]));
}

#[test]
fn test_assert_failure() {
    assert_eq!(exception("def f():\n    assert 1 == 2, 'nope'\n"), "AssertionError");
}

#[test]
fn test_globals_are_visible_inside_functions() {
    let source = "\
LIMIT = 3
total = 0

def f():
    global total
    for i in range(LIMIT):
        total += i
    return total
";
    assert_eq!(eval(source), json!(3));
}

#[test]
fn test_unbound_local() {
    let source = "\
x = 1
def f():
    y = x
    x = 2
    return y
";
    assert_eq!(exception(source), "UnboundLocalError");
}

#[test]
fn test_builtins_assortment() {
    let source = "\
def f():
    return [
        abs(-3), min([4, 2, 8]), max(1, 5), sum(range(5)),
        any([0, 1]), all([]), round(2.5), round(3.14159, 2),
        divmod(7, 2), pow(2, 10, 1000), chr(65), ord('a'),
        int('42'), float('1.5'), str(12), bool(''), isinstance(1, int),
        list(zip([1, 2], 'ab')), list(enumerate('xy', 1)),
    ]
";
    assert_eq!(
        eval(source),
        json!([
            3, 2, 5, 10, true, true, 2, 3.14, [3, 1], 24, "A", 97, 42, 1.5, "12",
            false, true, [[1, "a"], [2, "b"]], [[1, "x"], [2, "y"]]
        ])
    );
}
