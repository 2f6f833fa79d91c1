//! Per-test-case isolation.
//!
//! Every invocation gets a fresh worker thread, a fresh heap session and a
//! fresh evaluator. Runtime values never leave the worker: it reports back
//! plain JSON and strings over a channel. The supervising thread waits on
//! that channel with the deadline; on expiry it raises the interrupt flag,
//! which the evaluator observes at its next step and native value walks
//! observe through the heap session, and joins the worker before the
//! outcome is produced.

use crate::allow::AllowList;
use crate::compare::outputs_match;
use crate::convert::{from_json, to_json};
use crate::error::{EvalError, ExcKind};
use crate::evaluator::{Budget, CallError, Evaluator};
use crate::heap::{self, HeapSession};
use crate::linker::link;
use evalbox_types::ast::Module;
use evalbox_types::{Callable, ErrorKind, ErrorRecord, ExecutionOutcome, StructuralUnit, TestCase};
use serde_json::Value as Json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Resource limits applied to every invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub timeout: Duration,
    pub memory_bytes: usize,
    pub recursion_limit: usize,
    pub max_steps: Option<u64>,
    pub stack_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            memory_bytes: 50 * 1024 * 1024,
            recursion_limit: 1000,
            max_steps: None,
            stack_bytes: 256 * 1024 * 1024,
        }
    }
}

impl Limits {
    fn budget(&self) -> Budget {
        Budget {
            recursion_limit: self.recursion_limit,
            max_steps: self.max_steps,
            stack_bytes: self.stack_bytes,
        }
    }
}

/// What a worker sends back when it finishes.
struct Report {
    result: Result<(Json, bool), ErrorRecord>,
    captured: String,
    peak_bytes: usize,
}

pub struct Sandbox {
    allow: Arc<AllowList>,
    limits: Limits,
}

impl Sandbox {
    pub fn new(allow: Arc<AllowList>, limits: Limits) -> Self {
        Self { allow, limits }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Run `callable` against one test case.
    ///
    /// `position` is the case's index in its batch, used when the case has
    /// no explicit id.
    pub fn run(
        &self,
        unit: &StructuralUnit,
        callable: Callable<'_>,
        case: &TestCase,
        position: usize,
    ) -> ExecutionOutcome {
        let test_id = case.resolved_id(position);
        let started = Instant::now();
        let (result, captured, peak_bytes) = self.supervise(unit.module(), callable.name(), case);
        let elapsed = started.elapsed().as_secs_f64();

        let mut outcome = ExecutionOutcome {
            test_id,
            passed: false,
            input: case.input.clone(),
            expected_output: case.expected_output.clone(),
            actual_output: None,
            captured_text: captured,
            error: None,
            elapsed_time: elapsed,
            memory_used: peak_bytes,
        };
        match result {
            Ok((actual, passed)) => {
                outcome.passed = passed;
                outcome.actual_output = Some(actual);
            }
            Err(record) => {
                if matches!(record.kind, ErrorKind::Timeout | ErrorKind::ResourceExceeded) {
                    warn!(
                        test = %outcome.test_id,
                        kind = %record.kind,
                        elapsed_secs = elapsed,
                        "test case stopped by a resource limit"
                    );
                }
                outcome.error = Some(record);
            }
        }
        debug!(
            test = %outcome.test_id,
            passed = outcome.passed,
            elapsed_secs = elapsed,
            peak_bytes,
            "test case finished"
        );
        outcome
    }

    fn supervise(
        &self,
        module: &Module,
        entry: &str,
        case: &TestCase,
    ) -> (Result<(Json, bool), ErrorRecord>, String, usize) {
        if let Err(record) = link(module, &self.allow) {
            return (Err(record), String::new(), 0);
        }
        let interrupt = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<Report>();
        let limits = self.limits;

        thread::scope(|scope| {
            let worker_interrupt = Arc::clone(&interrupt);
            let allow = Arc::clone(&self.allow);
            let spawned = thread::Builder::new()
                .name(format!("evalbox-test-{entry}"))
                .stack_size(limits.stack_bytes)
                .spawn_scoped(scope, move || {
                    let report = invoke(module, entry, case, allow, worker_interrupt, &limits);
                    let _ = tx.send(report);
                });
            let handle = match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    error!(error = %e, "failed to start evaluation worker");
                    let record = ErrorRecord::new(ErrorKind::RuntimeError, "could not start evaluation worker")
                        .with_detail(e.to_string());
                    return (Err(record), String::new(), 0);
                }
            };

            match rx.recv_timeout(limits.timeout) {
                Ok(report) => {
                    let _ = handle.join();
                    (report.result, report.captured, report.peak_bytes)
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    interrupt.store(true, Ordering::Relaxed);
                    let _ = handle.join();
                    let peak = rx.try_recv().map(|r| r.peak_bytes).unwrap_or(0);
                    (Err(timed_out(limits.timeout)), String::new(), peak)
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    let panic = handle.join().err();
                    let detail = panic
                        .as_ref()
                        .and_then(|p| {
                            p.downcast_ref::<&str>()
                                .map(|s| (*s).to_owned())
                                .or_else(|| p.downcast_ref::<String>().cloned())
                        })
                        .unwrap_or_else(|| "worker exited without a report".to_owned());
                    error!(detail = %detail, "evaluation worker panicked");
                    let record = ErrorRecord::new(ErrorKind::RuntimeError, "internal evaluator error")
                        .with_detail(detail);
                    (Err(record), String::new(), 0)
                }
            }
        })
    }
}

/// Body of the worker thread.
fn invoke(
    module: &Module,
    entry: &str,
    case: &TestCase,
    allow: Arc<AllowList>,
    interrupt: Arc<AtomicBool>,
    limits: &Limits,
) -> Report {
    let session = HeapSession::begin(limits.memory_bytes).watching(Arc::clone(&interrupt));
    let mut vm = Evaluator::new(allow, interrupt, limits.budget());
    let result = execute(&mut vm, module, entry, case).map_err(|e| classify(e, limits));
    let captured = vm.take_output();
    drop(vm);
    let peak_bytes = heap::peak_bytes();
    drop(session);
    Report {
        result,
        captured,
        peak_bytes,
    }
}

fn execute(
    vm: &mut Evaluator,
    module: &Module,
    entry: &str,
    case: &TestCase,
) -> Result<(Json, bool), CallError> {
    vm.exec_module(module).map_err(CallError::Eval)?;
    let callee = vm.global(entry).ok_or_else(|| {
        CallError::Eval(EvalError::raise(
            ExcKind::NameError,
            format!("name '{entry}' is not defined"),
        ))
    })?;
    let (args, kwargs) = bind_input(&case.input).map_err(CallError::Eval)?;
    let value = vm.call_entry(&callee, args, kwargs)?;
    let passed = outputs_match(&value, &case.expected_output).map_err(CallError::Eval)?;
    let json = to_json(&value).map_err(CallError::Eval)?;
    Ok((json, passed))
}

/// A mapping binds by name, an array positionally, anything else as the
/// single argument.
fn bind_input(
    input: &Json,
) -> Result<(Vec<crate::value::Value>, Vec<(String, crate::value::Value)>), EvalError> {
    match input {
        Json::Object(entries) => {
            let kwargs = entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), from_json(v)?)))
                .collect::<Result<Vec<_>, EvalError>>()?;
            Ok((Vec::new(), kwargs))
        }
        Json::Array(items) => {
            let args = items.iter().map(from_json).collect::<Result<Vec<_>, _>>()?;
            Ok((args, Vec::new()))
        }
        scalar => Ok((vec![from_json(scalar)?], Vec::new())),
    }
}

fn timed_out(timeout: Duration) -> ErrorRecord {
    ErrorRecord::new(
        ErrorKind::Timeout,
        format!("Execution timed out after {} seconds", timeout.as_secs_f64()),
    )
}

/// Map an evaluation failure onto the outcome taxonomy.
pub(crate) fn classify(error: CallError, limits: &Limits) -> ErrorRecord {
    match error {
        CallError::Binding(message) => {
            ErrorRecord::new(ErrorKind::ArgumentBindingError, message).with_exception("TypeError")
        }
        CallError::Eval(EvalError::Raised(exc)) => {
            let message = if exc.message.is_empty() {
                exc.kind.name().to_owned()
            } else {
                exc.message.clone()
            };
            let record =
                ErrorRecord::new(ErrorKind::RuntimeError, message).with_exception(exc.kind.name());
            match exc.location() {
                Some(location) => record.with_detail(location),
                None => record,
            }
        }
        CallError::Eval(EvalError::Interrupted) => timed_out(limits.timeout),
        CallError::Eval(e @ EvalError::StepBudget(_)) => {
            ErrorRecord::new(ErrorKind::Timeout, e.to_string())
        }
        CallError::Eval(e @ EvalError::MemoryExceeded { .. }) => {
            ErrorRecord::new(ErrorKind::ResourceExceeded, e.to_string()).with_exception("MemoryError")
        }
        CallError::Eval(EvalError::RecursionLimit) => ErrorRecord::new(
            ErrorKind::ResourceExceeded,
            "maximum recursion depth exceeded",
        )
        .with_exception("RecursionError"),
        CallError::Eval(EvalError::Disallowed(message)) => {
            ErrorRecord::new(ErrorKind::DisallowedOperation, message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Exception;
    use assert_matches::assert_matches;

    #[test]
    fn test_classify_raised_carries_exception_and_location() {
        let mut exc = Exception::new(ExcKind::ZeroDivisionError, "division by zero");
        exc.line = 3;
        exc.function = Some("f".into());
        let record = classify(
            CallError::Eval(EvalError::Raised(Box::new(exc))),
            &Limits::default(),
        );
        assert_eq!(record.kind, ErrorKind::RuntimeError);
        assert_eq!(record.message, "division by zero");
        assert_eq!(record.exception.as_deref(), Some("ZeroDivisionError"));
        assert_eq!(record.detail.as_deref(), Some("line 3, in f"));
    }

    #[test]
    fn test_classify_resource_stops() {
        let limits = Limits::default();
        assert_matches!(
            classify(CallError::Eval(EvalError::RecursionLimit), &limits),
            ErrorRecord { kind: ErrorKind::ResourceExceeded, .. }
        );
        assert_matches!(
            classify(CallError::Eval(EvalError::StepBudget(10)), &limits),
            ErrorRecord { kind: ErrorKind::Timeout, .. }
        );
        let memory = classify(CallError::Eval(EvalError::MemoryExceeded { limit: 64 }), &limits);
        assert_eq!(memory.exception.as_deref(), Some("MemoryError"));
    }

    #[test]
    fn test_bind_input_shapes() {
        let (args, kwargs) = bind_input(&serde_json::json!({"a": 1})).unwrap();
        assert!(args.is_empty());
        assert_eq!(kwargs.len(), 1);
        let (args, kwargs) = bind_input(&serde_json::json!([1, 2])).unwrap();
        assert_eq!(args.len(), 2);
        assert!(kwargs.is_empty());
        let (args, _) = bind_input(&serde_json::json!("x")).unwrap();
        assert_eq!(args.len(), 1);
    }
}
