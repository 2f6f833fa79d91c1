//! End-to-end tests through the evaluation façade.
//!
//! Tests verify:
//! - top-level rejections produce zero outcomes
//! - scoring and overall success over mixed batches
//! - argument binding by name, by position and as a scalar
//! - outcome order and run-to-run determinism
//! - deadline and resource stops stay contained to their test case

use assert_matches::assert_matches;
use evalbox_engine::{
    CancellationToken, Engine, EngineConfig, EvaluationRequest, EvaluationResponse, SOME_TESTS_FAILED,
};
use evalbox_types::{ErrorKind, ErrorRecord, TestCase, TestId};
use serde_json::{json, Value as Json};
use std::time::Instant;

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).expect("default config is valid")
}

fn case(input: Json, expected: Json) -> TestCase {
    TestCase::new(input, expected)
}

fn evaluate(code: &str, cases: Vec<TestCase>) -> EvaluationResponse {
    engine().evaluate(&EvaluationRequest::new(code, cases))
}

fn kinds(response: &EvaluationResponse) -> Vec<Option<ErrorKind>> {
    response.test_results.iter().map(|o| o.error_kind()).collect()
}

const TWO_SUM: &str = r#"
def two_sum(nums, target):
    seen = {}
    for i, n in enumerate(nums):
        if target - n in seen:
            return [seen[target - n], i]
        seen[n] = i
    return []
"#;

// ══════════════════════════════════════════════════════════════════════════════
// Top-level rejections
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_syntax_error_yields_no_outcomes() {
    for cases in [vec![], vec![case(json!([1]), json!(1)); 3]] {
        let response = evaluate("def broken(:\n    return 1\n", cases);
        assert!(!response.success);
        assert!(response.test_results.is_empty());
        assert_eq!(response.error_kind, Some(ErrorKind::SyntaxError));
        assert_matches!(response.error.as_deref(), Some(msg) if msg.starts_with("Syntax error: "));
        let quality = response.code_quality.expect("syntax errors carry a quality stub");
        assert!(!quality.syntax_valid);
    }
}

#[test]
fn test_source_without_function_is_rejected() {
    let response = evaluate("x = 1\nprint(x)\n", vec![case(json!({}), json!(1))]);
    assert_eq!(response.error_kind, Some(ErrorKind::NoCallableFound));
    assert_eq!(response.error.as_deref(), Some("No function definition found"));
    assert!(response.test_results.is_empty());
}

#[test]
fn test_unknown_language_is_rejected() {
    let request = EvaluationRequest::new("def f(): return 1", vec![case(json!({}), json!(1))])
        .with_language("javascript");
    let response = engine().evaluate(&request);
    assert_eq!(response.error.as_deref(), Some("Language javascript not supported yet"));
    assert!(response.test_results.is_empty());
}

#[test]
fn test_cancelled_batch_is_a_top_level_failure() {
    let token = CancellationToken::new();
    token.cancel();
    let request = EvaluationRequest::new("def f(): return 1", vec![case(json!({}), json!(1)); 4]);
    let result = engine().evaluate_with(&request, &token);
    assert!(result.outcomes.is_empty());
    assert_matches!(result.top_level_error, Some(ErrorRecord { kind: ErrorKind::Cancelled, .. }));
}

// ══════════════════════════════════════════════════════════════════════════════
// Scoring
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_score_is_rounded_percentage() {
    let code = "def double(x):\n    return x * 2\n";
    let response = evaluate(
        code,
        vec![
            case(json!([1]), json!(2)),
            case(json!([2]), json!(4)),
            case(json!([3]), json!(7)),
        ],
    );
    assert!(!response.success);
    assert_eq!(response.score, 67);
    assert_eq!(response.error.as_deref(), Some(SOME_TESTS_FAILED));
    assert!(response.code_quality.is_some_and(|q| q.syntax_valid));
}

#[test]
fn test_all_passing_batch_succeeds() {
    let response = evaluate(
        TWO_SUM,
        vec![
            case(json!({"nums": [2, 7, 11, 15], "target": 9}), json!([0, 1])),
            case(json!([[3, 2, 4], 6]), json!([1, 2])),
        ],
    );
    assert!(response.success, "{:?}", response.test_results);
    assert_eq!(response.score, 100);
    assert_eq!(response.error, None);
    assert!(response.execution_time.is_some());
    assert!(response.memory_used.is_some_and(|m| m > 0));
}

#[test]
fn test_empty_batch_is_vacuously_successful() {
    let response = evaluate(TWO_SUM, vec![]);
    assert!(response.success);
    assert_eq!(response.score, 0);
    assert_eq!(response.execution_time, None);
}

// ══════════════════════════════════════════════════════════════════════════════
// Binding
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_binding_priority() {
    let code = "def show(nums, target=None):\n    return [nums, target]\n";
    let response = evaluate(
        code,
        vec![
            case(json!({"nums": [2, 7, 11, 15], "target": 9}), json!([[2, 7, 11, 15], 9])),
            case(json!([3, 3]), json!([3, 3])),
            case(json!(5), json!([5, null])),
        ],
    );
    assert!(response.success, "{:?}", response.test_results);
}

#[test]
fn test_list_concatenation_scenario() {
    let response = evaluate(
        "def concat(a, b):\n    return a + b\n",
        vec![case(json!({"a": [1, 2], "b": [3]}), json!([1, 2, 3]))],
    );
    let outcome = &response.test_results[0];
    assert!(outcome.passed);
    assert_eq!(outcome.actual_output, Some(json!([1, 2, 3])));
}

#[test]
fn test_binding_failure_is_contained() {
    let response = evaluate(
        "def add(a, b):\n    return a + b\n",
        vec![
            case(json!({"a": 1, "c": 2}), json!(3)),
            case(json!({"a": 1, "b": 2}), json!(3)),
        ],
    );
    assert_eq!(kinds(&response), vec![Some(ErrorKind::ArgumentBindingError), None]);
    assert!(response.test_results[1].passed);
}

// ══════════════════════════════════════════════════════════════════════════════
// Ordering and determinism
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_outcomes_keep_case_order_and_ids() {
    let cases: Vec<TestCase> = (0..10)
        .map(|n| case(json!([n]), json!(n + 1)).with_id(TestId::Name(format!("case-{n}"))))
        .collect();
    let response = evaluate("def inc(n):\n    return n + 1\n", cases);
    let ids: Vec<String> = response.test_results.iter().map(|o| o.test_id.to_string()).collect();
    let expected: Vec<String> = (0..10).map(|n| format!("case-{n}")).collect();
    assert_eq!(ids, expected);
}

#[test]
fn test_repeated_evaluation_is_identical() {
    let engine = engine();
    let request = EvaluationRequest::new(
        TWO_SUM,
        vec![
            case(json!({"nums": [1, 5, 3], "target": 8}), json!([1, 2])),
            case(json!({"nums": [1], "target": 2}), json!([])),
        ],
    );
    let strip = |mut r: EvaluationResponse| {
        r.execution_time = None;
        for outcome in &mut r.test_results {
            outcome.elapsed_time = 0.0;
        }
        serde_json::to_string(&r).expect("response serializes")
    };
    let first = strip(engine.evaluate(&request));
    let second = strip(engine.evaluate(&request));
    assert_eq!(first, second);
}

// ══════════════════════════════════════════════════════════════════════════════
// Containment
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_infinite_loop_times_out_without_delaying_siblings() {
    let code = "def spin(n):\n    while n > 0:\n        pass\n    return n\n";
    let request = EvaluationRequest::new(
        code,
        vec![case(json!([1]), json!(1)), case(json!([0]), json!(0)), case(json!([0]), json!(0))],
    )
    .with_timeout(1);
    let started = Instant::now();
    let response = engine().evaluate(&request);
    assert!(started.elapsed().as_secs_f64() < 5.0);
    assert_eq!(kinds(&response), vec![Some(ErrorKind::Timeout), None, None]);
    assert!(response.test_results[1].passed && response.test_results[2].passed);
    assert!(response.test_results[1].elapsed_time < 1.0);
}

#[test]
fn test_flat_operator_chain_is_rejected_as_a_syntax_error() {
    let chain = vec!["1"; 20_000].join(" + ");
    let response = evaluate(&format!("def f():\n    return {chain}\n"), vec![case(json!({}), json!(20_000))]);
    assert!(!response.success);
    assert!(response.test_results.is_empty());
    assert_eq!(response.error_kind, Some(ErrorKind::SyntaxError));
}

#[test]
fn test_comparing_shared_structures_stops_at_the_deadline() {
    let code = "\
def f():
    a, b = [], []
    for i in range(40):
        a, b = [a, a], [b, b]
    return a == b
";
    let request = EvaluationRequest::new(code, vec![case(json!({}), json!(false))]).with_timeout(1);
    let started = Instant::now();
    let response = engine().evaluate(&request);
    assert!(started.elapsed().as_secs_f64() < 5.0);
    assert_eq!(kinds(&response), vec![Some(ErrorKind::Timeout)]);
}

#[test]
fn test_missing_base_case_is_a_stack_exhaustion() {
    let code = "def factorial(n):\n    return n * factorial(n - 1)\n";
    let response = evaluate(code, vec![case(json!({"n": 5}), json!(120))]);
    let outcome = &response.test_results[0];
    assert!(!outcome.passed);
    assert_matches!(outcome.error_kind(), Some(ErrorKind::ResourceExceeded | ErrorKind::Timeout));
    assert!(response.code_quality.is_some_and(|q| q.has_recursion && !q.has_base_case));
}

#[test]
fn test_disallowed_operation_fails_each_case() {
    let code = "def sneaky():\n    return open('/etc/passwd').read()\n";
    let response = evaluate(code, vec![case(json!({}), json!("")), case(json!({}), json!(""))]);
    assert_eq!(
        kinds(&response),
        vec![Some(ErrorKind::DisallowedOperation), Some(ErrorKind::DisallowedOperation)]
    );
}

#[test]
fn test_restricted_allow_list_is_enforced() {
    let config = EngineConfig {
        allow_list: vec!["len".into(), "ValueError".into()],
        ..EngineConfig::default()
    };
    let engine = Engine::new(config).expect("valid config");
    let response = engine.evaluate(&EvaluationRequest::new(
        "def f(xs):\n    return sorted(xs)\n",
        vec![case(json!([[2, 1]]), json!([1, 2]))],
    ));
    assert_eq!(kinds(&response), vec![Some(ErrorKind::DisallowedOperation)]);
}

// ══════════════════════════════════════════════════════════════════════════════
// Health and stats
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_health_check_and_stats() {
    let engine = engine();
    assert!(engine.health_check());
    engine.evaluate(&EvaluationRequest::new("def f(): return 1", vec![]));
    let stats = engine.stats();
    assert_eq!(stats.evaluations_completed, 2);
    assert_eq!(stats.max_execution_time, 5);
    assert_eq!(stats.max_memory, 50 * 1024 * 1024);
}
