//! Shared types for the evalbox evaluation engine.
//!
//! This crate defines the source spans, syntax diagnostics, the closed
//! error taxonomy, the tagged-variant AST produced by the parser, and the
//! records that flow between the validator, sandbox, harness and façade.

mod error;
mod model;
mod span;
mod unit;
pub mod ast;
pub mod visit;

pub use error::{Diagnostics, ErrorKind, ErrorRecord, SyntaxDiagnostic, MAX_DIAGNOSTICS};
pub use model::{
    EvaluationResult, ExecutionOutcome, Language, QualityMetrics, Submission, TestCase, TestId,
};
pub use span::{SourceFile, Span};
pub use unit::{Callable, ParamShape, StructuralUnit};
