//! Inbound request wire type.

use evalbox_types::{Submission, TestCase};
use serde::{Deserialize, Serialize};

fn default_language() -> String {
    "python".to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub code: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default = "default_language")]
    pub language: String,
    /// Per-test deadline in seconds; the engine default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl EvaluationRequest {
    pub fn new(code: impl Into<String>, test_cases: Vec<TestCase>) -> Self {
        Self {
            code: code.into(),
            test_cases,
            language: default_language(),
            timeout: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn submission(&self) -> Submission {
        Submission::new(self.code.clone(), self.language.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_request_uses_defaults() {
        let req: EvaluationRequest = serde_json::from_value(json!({"code": "def f(): return 1"})).unwrap();
        assert_eq!(req.language, "python");
        assert!(req.test_cases.is_empty());
        assert_eq!(req.timeout, None);
    }

    #[test]
    fn test_full_request_parses() {
        let req: EvaluationRequest = serde_json::from_value(json!({
            "code": "def add(a, b): return a + b",
            "language": "python",
            "timeout": 3,
            "test_cases": [
                {"id": 1, "input": {"a": 1, "b": 2}, "expected_output": 3},
                {"input": [2, 2], "output": 4}
            ]
        }))
        .unwrap();
        assert_eq!(req.timeout, Some(3));
        assert_eq!(req.test_cases.len(), 2);
        assert_eq!(req.test_cases[1].expected_output, json!(4));
    }
}
