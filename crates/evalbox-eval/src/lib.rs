//! Sandboxed tree-walking evaluator for learner code.
//!
//! ```text
//! Module → Linker → Sandbox worker → Evaluator → JSON result + comparison
//! ```
//!
//! The evaluator executes the parsed AST directly. It implements no file,
//! network, process or reflection primitive; the [`linker`] rejects every
//! reference to one before execution; and every container allocation is
//! charged against a per-invocation heap meter.

mod allow;
mod bind;
mod builtins;
mod compare;
mod convert;
mod env;
mod error;
mod evaluator;
mod format;
mod heap;
pub mod linker;
mod methods;
mod ops;
mod sandbox;
mod value;

pub use allow::{AllowList, Builtin, UnknownBuiltin};
pub use compare::outputs_match;
pub use convert::{from_json, to_json};
pub use error::{EvalError, EvalResult, ExcKind, Exception};
pub use evaluator::{Budget, CallError, Evaluator};
pub use format::{display, repr};
pub use heap::{peak_bytes, HeapSession};
pub use linker::link;
pub use sandbox::{Limits, Sandbox};
pub use value::Value;
