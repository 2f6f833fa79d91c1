//! Test Harness: runs the sandbox over a whole batch.
//!
//! Test cases of one batch run concurrently on the engine's rayon pool;
//! `collect` on an indexed parallel iterator keeps the input order, so the
//! outcome sequence always lines up with the caller's test cases.

use evalbox_eval::Sandbox;
use evalbox_types::{Callable, ErrorRecord, ExecutionOutcome, StructuralUnit, TestCase};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Cooperative cancellation for an in-flight batch.
///
/// Checked before each test case starts. A test case that has already
/// started always runs to completion or to its deadline.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pool: rayon::ThreadPool,
}

impl Harness {
    pub fn new(parallelism: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism.max(1))
            .thread_name(|i| format!("evalbox-batch-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn parallelism(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// One outcome per test case, in input order.
    ///
    /// Individual failures never stop the batch. Cancellation does: it
    /// discards whatever finished and reports `Cancelled`.
    pub fn run_batch(
        &self,
        sandbox: &Sandbox,
        unit: &StructuralUnit,
        callable: Callable<'_>,
        cases: &[TestCase],
        cancel: &CancellationToken,
    ) -> Result<Vec<ExecutionOutcome>, ErrorRecord> {
        debug!(
            tests = cases.len(),
            threads = self.parallelism(),
            entry = callable.name(),
            "running batch"
        );
        let results: Vec<Option<ExecutionOutcome>> = self.pool.install(|| {
            cases
                .par_iter()
                .enumerate()
                .map(|(position, case)| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    Some(sandbox.run(unit, callable, case, position))
                })
                .collect()
        });

        if results.iter().any(Option::is_none) {
            let completed = results.iter().filter(|r| r.is_some()).count();
            return Err(ErrorRecord::cancelled(completed, cases.len()));
        }
        Ok(results.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::extract;
    use crate::validator::validate;
    use evalbox_eval::{AllowList, Limits};
    use evalbox_types::{ErrorKind, TestId};
    use serde_json::json;

    fn sandbox() -> Sandbox {
        Sandbox::new(Arc::new(AllowList::standard()), Limits::default())
    }

    #[test]
    fn test_outcomes_follow_input_order() {
        let unit = validate("def f(n):\n    return n * n\n").unwrap();
        let callable = extract(&unit).unwrap();
        let cases: Vec<TestCase> = (0..12).map(|n| TestCase::new(json!([n]), json!(n * n))).collect();
        let harness = Harness::new(4).unwrap();
        let outcomes = harness
            .run_batch(&sandbox(), &unit, callable, &cases, &CancellationToken::new())
            .unwrap();
        assert_eq!(outcomes.len(), 12);
        for (position, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.test_id, TestId::Number(position as i64));
            assert!(outcome.passed);
        }
    }

    #[test]
    fn test_failures_do_not_stop_the_batch() {
        let unit = validate("def f(n):\n    return 10 // n\n").unwrap();
        let callable = extract(&unit).unwrap();
        let cases = vec![
            TestCase::new(json!([2]), json!(5)),
            TestCase::new(json!([0]), json!(0)),
            TestCase::new(json!([5]), json!(2)),
        ];
        let outcomes = Harness::new(1)
            .unwrap()
            .run_batch(&sandbox(), &unit, callable, &cases, &CancellationToken::new())
            .unwrap();
        assert!(outcomes[0].passed);
        assert_eq!(outcomes[1].error_kind(), Some(ErrorKind::RuntimeError));
        assert!(outcomes[2].passed);
    }

    #[test]
    fn test_cancelled_batch_reports_no_outcomes() {
        let unit = validate("def f():\n    return 1\n").unwrap();
        let callable = extract(&unit).unwrap();
        let cases = vec![TestCase::new(json!({}), json!(1)); 3];
        let token = CancellationToken::new();
        token.cancel();
        let err = Harness::new(2)
            .unwrap()
            .run_batch(&sandbox(), &unit, callable, &cases, &token)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(err.detail.as_deref(), Some("cancelled after 0 of 3 test cases"));
    }
}
