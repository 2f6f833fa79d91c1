//! Evaluation Façade.
//!
//! ```text
//! Received → Validated → CallableExtracted → Executing(i of N) → Aggregated → Returned
//!     └──────────┴─────────────┴──→ Rejected
//! ```

use crate::config::{ConfigError, EngineConfig};
use crate::extractor::extract;
use crate::harness::{CancellationToken, Harness};
use crate::quality::analyze;
use crate::request::EvaluationRequest;
use crate::response::EvaluationResponse;
use crate::validator::{check_language, validate};
use evalbox_eval::{AllowList, Sandbox};
use evalbox_types::{ErrorRecord, EvaluationResult, QualityMetrics, Submission, TestCase};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Submission used by [`Engine::health_check`].
pub const HEALTH_CHECK_SOURCE: &str = "def test(): return 42";

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build the test thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub evaluations_completed: u64,
    /// Default per-test deadline in seconds.
    pub max_execution_time: u64,
    /// Heap ceiling per test case in bytes.
    pub max_memory: usize,
}

/// Hex SHA-256 of a submission's source.
pub fn submission_digest(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

pub struct Engine {
    config: EngineConfig,
    allow: Arc<AllowList>,
    harness: Harness,
    completed: AtomicU64,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let allow = Arc::new(config.resolve_allow_list()?);
        let harness = Harness::new(config.max_parallel_tests)?;
        info!(
            parallel_tests = config.max_parallel_tests,
            memory_limit = config.memory_limit_bytes,
            default_timeout_secs = config.default_timeout_secs,
            builtins = config.allow_list.len(),
            "evaluation engine ready"
        );
        Ok(Self {
            config,
            allow,
            harness,
            completed: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluate a request end to end.
    pub fn evaluate(&self, request: &EvaluationRequest) -> EvaluationResponse {
        self.evaluate_with(request, &CancellationToken::new()).into()
    }

    /// Like [`Engine::evaluate`], stopping between test cases once `cancel`
    /// fires.
    pub fn evaluate_with(
        &self,
        request: &EvaluationRequest,
        cancel: &CancellationToken,
    ) -> EvaluationResult {
        self.evaluate_submission(&request.submission(), &request.test_cases, request.timeout, cancel)
    }

    pub fn evaluate_submission(
        &self,
        submission: &Submission,
        cases: &[TestCase],
        timeout_secs: Option<u64>,
        cancel: &CancellationToken,
    ) -> EvaluationResult {
        self.completed.fetch_add(1, Ordering::Relaxed);
        let digest = submission_digest(submission.source());
        info!(
            digest = %&digest[..12],
            code_bytes = submission.source().len(),
            tests = cases.len(),
            language = submission.language(),
            "evaluation received"
        );

        let reject = |error: ErrorRecord, quality: Option<QualityMetrics>| {
            info!(digest = %&digest[..12], kind = %error.kind, "evaluation rejected");
            EvaluationResult::rejected(error, quality, digest.clone())
        };

        if let Err(error) = check_language(submission.language(), &self.config.languages) {
            return reject(error, None);
        }
        let unit = match validate(submission.source()) {
            Ok(unit) => unit,
            Err(error) => return reject(error, Some(QualityMetrics::unparsed(submission.source()))),
        };
        debug!("validated");
        let callable = match extract(&unit) {
            Ok(callable) => callable,
            Err(error) => return reject(error, None),
        };
        debug!(entry = callable.name(), "callable extracted");

        let sandbox = Sandbox::new(Arc::clone(&self.allow), self.config.limits(timeout_secs));
        let outcomes = match self.harness.run_batch(&sandbox, &unit, callable, cases, cancel) {
            Ok(outcomes) => outcomes,
            Err(error) => {
                warn!(digest = %&digest[..12], detail = ?error.detail, "evaluation cancelled");
                return reject(error, None);
            }
        };
        let quality = analyze(&unit);
        let result = EvaluationResult::completed(outcomes, quality, digest.clone());
        info!(
            digest = %&digest[..12],
            passed = result.passed_count(),
            tests = cases.len(),
            score = result.score(),
            "evaluation finished"
        );
        result
    }

    /// Evaluate a known-good submission and report whether it passed.
    pub fn health_check(&self) -> bool {
        let request = EvaluationRequest::new(
            HEALTH_CHECK_SOURCE,
            vec![TestCase::new(serde_json::json!({}), serde_json::json!(42))],
        );
        let response = self.evaluate(&request);
        if !response.success {
            warn!(error = ?response.error, "health check failed");
        }
        response.success
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            evaluations_completed: self.completed.load(Ordering::Relaxed),
            max_execution_time: self.config.default_timeout_secs,
            max_memory: self.config.memory_limit_bytes,
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("parallelism", &self.harness.parallelism())
            .field("completed", &self.completed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalbox_types::ErrorKind;

    #[test]
    fn test_digest_is_hex_sha256() {
        let digest = submission_digest("");
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let config = EngineConfig {
            max_parallel_tests: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(Engine::new(config), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_unsupported_language_is_rejected_untouched() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let request = EvaluationRequest::new("def f(): return 1", vec![]).with_language("ruby");
        let result = engine.evaluate_with(&request, &CancellationToken::new());
        assert_eq!(result.top_level_error.map(|e| e.kind), Some(ErrorKind::UnsupportedLanguage));
        assert!(result.outcomes.is_empty());
        assert!(result.quality_metrics.is_none());
    }
}
