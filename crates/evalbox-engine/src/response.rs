//! Outbound response wire type and the records handed to collaborators.

use evalbox_types::{ErrorKind, EvaluationResult, ExecutionOutcome, QualityMetrics};
use serde::{Deserialize, Serialize};

/// Top-level message when execution completed but not every test passed.
pub const SOME_TESTS_FAILED: &str = "Some tests failed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResponse {
    pub success: bool,
    pub test_results: Vec<ExecutionOutcome>,
    /// `round(100 * passed / total)`.
    pub score: u8,
    pub execution_time: Option<f64>,
    /// Largest per-test heap peak in bytes.
    pub memory_used: Option<usize>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub code_quality: Option<QualityMetrics>,
    pub submission_digest: String,
}

impl From<&EvaluationResult> for EvaluationResponse {
    fn from(result: &EvaluationResult) -> Self {
        let error = match &result.top_level_error {
            Some(record) => Some(record.message.clone()),
            None if !result.overall_success => Some(SOME_TESTS_FAILED.to_owned()),
            None => None,
        };
        Self {
            success: result.overall_success,
            test_results: result.outcomes.clone(),
            score: result.score(),
            execution_time: result.total_elapsed_time,
            memory_used: result.outcomes.iter().map(|o| o.memory_used).max(),
            error,
            error_kind: result.top_level_error.as_ref().map(|e| e.kind),
            code_quality: result.quality_metrics.clone(),
            submission_digest: result.submission_digest.clone(),
        }
    }
}

impl From<EvaluationResult> for EvaluationResponse {
    fn from(result: EvaluationResult) -> Self {
        Self::from(&result)
    }
}

/// What the learner-profile service records for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSignal {
    pub is_successful: bool,
    pub score: u8,
    pub time_spent: f64,
    pub hints_used: u32,
    pub error_type: Option<String>,
    pub code_quality: Option<QualityMetrics>,
}

/// What the feedback service needs to produce hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackInput {
    pub code: String,
    pub test_results: Vec<ExecutionOutcome>,
    pub error_message: Option<String>,
}

impl EvaluationResponse {
    /// The most specific error name available: the top-level kind, or
    /// the exception (or kind) of the first failing test.
    pub fn error_type(&self) -> Option<String> {
        if let Some(kind) = self.error_kind {
            return Some(kind.as_str().to_owned());
        }
        self.test_results
            .iter()
            .find_map(|o| o.error.as_ref())
            .map(|e| e.exception.clone().unwrap_or_else(|| e.kind.as_str().to_owned()))
    }

    pub fn profile_signal(&self, time_spent: f64, hints_used: u32) -> ProfileSignal {
        ProfileSignal {
            is_successful: self.success,
            score: self.score,
            time_spent,
            hints_used,
            error_type: self.error_type(),
            code_quality: self.code_quality.clone(),
        }
    }

    pub fn feedback_input(&self, code: impl Into<String>) -> FeedbackInput {
        FeedbackInput {
            code: code.into(),
            test_results: self.test_results.clone(),
            error_message: self.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalbox_types::{ErrorRecord, TestId};
    use serde_json::json;

    fn outcome(passed: bool, error: Option<ErrorRecord>, memory: usize) -> ExecutionOutcome {
        ExecutionOutcome {
            test_id: TestId::Number(0),
            passed,
            input: json!({}),
            expected_output: json!(1),
            actual_output: error.is_none().then(|| json!(1)),
            captured_text: String::new(),
            error,
            elapsed_time: 0.01,
            memory_used: memory,
        }
    }

    #[test]
    fn test_failed_batch_reports_generic_message() {
        let failing = ErrorRecord::new(ErrorKind::RuntimeError, "division by zero")
            .with_exception("ZeroDivisionError");
        let result = EvaluationResult::completed(
            vec![outcome(true, None, 100), outcome(false, Some(failing), 300)],
            QualityMetrics::default(),
            "abc".into(),
        );
        let response = EvaluationResponse::from(&result);
        assert!(!response.success);
        assert_eq!(response.score, 50);
        assert_eq!(response.error.as_deref(), Some(SOME_TESTS_FAILED));
        assert_eq!(response.memory_used, Some(300));
        assert_eq!(response.error_type().as_deref(), Some("ZeroDivisionError"));
    }

    #[test]
    fn test_rejection_carries_its_message() {
        let result = EvaluationResult::rejected(ErrorRecord::no_callable(), None, String::new());
        let response = EvaluationResponse::from(result);
        assert_eq!(response.error.as_deref(), Some("No function definition found"));
        assert_eq!(response.error_kind, Some(ErrorKind::NoCallableFound));
        assert_eq!(response.memory_used, None);
        assert!(response.test_results.is_empty());
    }

    #[test]
    fn test_collaborator_records() {
        let result = EvaluationResult::completed(
            vec![outcome(true, None, 10)],
            QualityMetrics::default(),
            String::new(),
        );
        let response = EvaluationResponse::from(result);
        assert_eq!(response.error, None);

        let signal = response.profile_signal(300.0, 2);
        assert!(signal.is_successful);
        assert_eq!(signal.score, 100);
        assert_eq!(signal.hints_used, 2);
        assert_eq!(signal.error_type, None);

        let feedback = response.feedback_input("def f(): return 1");
        assert_eq!(feedback.test_results.len(), 1);
        assert_eq!(feedback.error_message, None);
    }
}
