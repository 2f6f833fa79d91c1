//! Records exchanged between the pipeline stages and the façade's caller.

use crate::ErrorRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ══════════════════════════════════════════════════════════════════════════════
// Submissions
// ══════════════════════════════════════════════════════════════════════════════

/// Languages the engine knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
}

impl Language {
    pub const ALL: &'static [Language] = &[Language::Python];

    pub fn tag(self) -> &'static str {
        match self {
            Self::Python => "python",
        }
    }

    /// Exact, case-sensitive lookup.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|lang| lang.tag() == tag)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Raw learner source plus its declared language tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    source: String,
    language: String,
}

impl Submission {
    pub fn new(source: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            language: language.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn language(&self) -> &str {
        &self.language
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Test Cases
// ══════════════════════════════════════════════════════════════════════════════

/// Caller-chosen test identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestId {
    Number(i64),
    Name(String),
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Name(s) => f.write_str(s),
        }
    }
}

fn empty_input() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TestId>,
    /// A mapping binds by name, an array positionally, anything else as one argument.
    #[serde(default = "empty_input")]
    pub input: Value,
    #[serde(default, alias = "output")]
    pub expected_output: Value,
}

impl TestCase {
    pub fn new(input: Value, expected_output: Value) -> Self {
        Self {
            id: None,
            input,
            expected_output,
        }
    }

    pub fn with_id(mut self, id: TestId) -> Self {
        self.id = Some(id);
        self
    }

    /// The explicit id, or the case's position in its batch.
    pub fn resolved_id(&self, position: usize) -> TestId {
        self.id
            .clone()
            .unwrap_or_else(|| TestId::Number(i64::try_from(position).unwrap_or(i64::MAX)))
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Outcomes
// ══════════════════════════════════════════════════════════════════════════════

/// Result of running the callable against one test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub test_id: TestId,
    pub passed: bool,
    pub input: Value,
    pub expected_output: Value,
    /// `None` when the invocation did not return normally.
    pub actual_output: Option<Value>,
    pub captured_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    /// Wall-clock seconds spent on this test case.
    pub elapsed_time: f64,
    /// Peak metered heap bytes held by the invocation.
    #[serde(default)]
    pub memory_used: usize,
}

impl ExecutionOutcome {
    pub fn error_kind(&self) -> Option<crate::ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Static, advisory metrics over a parsed submission.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub syntax_valid: bool,
    pub lines_of_code: usize,
    pub character_count: usize,
    pub function_count: usize,
    pub loop_count: usize,
    pub conditional_count: usize,
    pub has_recursion: bool,
    pub has_base_case: bool,
    pub uses_builtin: bool,
    pub complexity_estimate: usize,
}

impl QualityMetrics {
    /// Size-only metrics for source that failed to parse.
    pub fn unparsed(source: &str) -> Self {
        Self {
            syntax_valid: false,
            lines_of_code: source.matches('\n').count() + 1,
            character_count: source.chars().count(),
            ..Self::default()
        }
    }
}

/// Batch aggregate handed back by the façade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub overall_success: bool,
    pub outcomes: Vec<ExecutionOutcome>,
    pub total_elapsed_time: Option<f64>,
    pub quality_metrics: Option<QualityMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_level_error: Option<ErrorRecord>,
    /// Hex SHA-256 of the submitted source.
    pub submission_digest: String,
}

impl EvaluationResult {
    /// A request that stopped before any test ran.
    pub fn rejected(
        error: ErrorRecord,
        quality_metrics: Option<QualityMetrics>,
        submission_digest: String,
    ) -> Self {
        Self {
            overall_success: false,
            outcomes: Vec::new(),
            total_elapsed_time: None,
            quality_metrics,
            top_level_error: Some(error),
            submission_digest,
        }
    }

    /// Aggregate outcomes in their batch order.
    pub fn completed(
        outcomes: Vec<ExecutionOutcome>,
        quality_metrics: QualityMetrics,
        submission_digest: String,
    ) -> Self {
        let overall_success = outcomes.iter().all(|o| o.passed);
        let mut finished = outcomes.iter().filter(|o| o.error.is_none()).peekable();
        let total_elapsed_time = finished
            .peek()
            .is_some()
            .then(|| finished.map(|o| o.elapsed_time).sum());
        Self {
            overall_success,
            outcomes,
            total_elapsed_time,
            quality_metrics: Some(quality_metrics),
            top_level_error: None,
            submission_digest,
        }
    }

    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }

    /// `round(100 * passed / total)`, or 0 for an empty batch.
    pub fn score(&self) -> u8 {
        let total = self.outcomes.len();
        if total == 0 {
            return 0;
        }
        let pct = (100 * self.passed_count()) as f64 / total as f64;
        pct.round().clamp(0.0, 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde_json::json;

    fn outcome(passed: bool, failed_with: Option<ErrorKind>, elapsed: f64) -> ExecutionOutcome {
        ExecutionOutcome {
            test_id: TestId::Number(0),
            passed,
            input: json!({}),
            expected_output: json!(1),
            actual_output: failed_with.is_none().then(|| json!(1)),
            captured_text: String::new(),
            error: failed_with.map(|k| ErrorRecord::new(k, "boom")),
            elapsed_time: elapsed,
            memory_used: 0,
        }
    }

    #[test]
    fn test_case_accepts_legacy_output_key() {
        let case: TestCase = serde_json::from_value(json!({"input": [1, 2], "output": 3})).unwrap();
        assert_eq!(case.expected_output, json!(3));
        assert_eq!(case.id, None);
    }

    #[test]
    fn test_case_missing_input_defaults_to_empty_mapping() {
        let case: TestCase = serde_json::from_value(json!({"expected_output": 42})).unwrap();
        assert_eq!(case.input, json!({}));
    }

    #[test]
    fn test_case_ids_may_be_numbers_or_names() {
        let a: TestCase = serde_json::from_value(json!({"id": 7, "input": 1})).unwrap();
        let b: TestCase = serde_json::from_value(json!({"id": "edge", "input": 1})).unwrap();
        assert_eq!(a.resolved_id(3), TestId::Number(7));
        assert_eq!(b.resolved_id(3), TestId::Name("edge".into()));
        assert_eq!(TestCase::new(json!(1), json!(1)).resolved_id(3), TestId::Number(3));
    }

    #[test]
    fn test_language_tags_are_case_sensitive() {
        assert_eq!(Language::from_tag("python"), Some(Language::Python));
        assert_eq!(Language::from_tag("Python"), None);
        assert_eq!(Language::from_tag("javascript"), None);
    }

    #[test]
    fn test_score_rounds() {
        let digest = String::new();
        let q = QualityMetrics::default();
        let r = EvaluationResult::completed(
            vec![outcome(true, None, 0.1), outcome(true, None, 0.1), outcome(false, None, 0.1)],
            q.clone(),
            digest.clone(),
        );
        assert_eq!(r.score(), 67);
        assert!(!r.overall_success);

        let empty = EvaluationResult::completed(Vec::new(), q, digest);
        assert_eq!(empty.score(), 0);
        assert!(empty.overall_success);
        assert_eq!(empty.total_elapsed_time, None);
    }

    #[test]
    fn test_total_time_sums_completed_outcomes_only() {
        let r = EvaluationResult::completed(
            vec![
                outcome(true, None, 0.25),
                outcome(false, Some(ErrorKind::Timeout), 5.0),
                outcome(false, None, 0.5),
            ],
            QualityMetrics::default(),
            String::new(),
        );
        assert_eq!(r.total_elapsed_time, Some(0.75));
    }

    #[test]
    fn test_unparsed_metrics_keep_sizes() {
        let q = QualityMetrics::unparsed("def f(:\n  pass");
        assert!(!q.syntax_valid);
        assert_eq!(q.lines_of_code, 2);
        assert_eq!(q.character_count, 14);
        assert_eq!(q.function_count, 0);
    }
}
