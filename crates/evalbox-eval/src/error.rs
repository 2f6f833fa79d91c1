//! Runtime error types for the evaluator.

use std::fmt;

/// Learner-visible exception classes.
///
/// The hierarchy is fixed: every class descends from `Exception`, and the
/// two abstract groupings (`ArithmeticError`, `LookupError`) can be caught
/// to handle their members together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExcKind {
    Exception,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    IndexError,
    KeyError,
    ValueError,
    TypeError,
    NameError,
    UnboundLocalError,
    AttributeError,
    AssertionError,
    RuntimeError,
    RecursionError,
    NotImplementedError,
    StopIteration,
    MemoryError,
}

impl ExcKind {
    pub const ALL: &'static [ExcKind] = &[
        Self::Exception,
        Self::ArithmeticError,
        Self::ZeroDivisionError,
        Self::OverflowError,
        Self::LookupError,
        Self::IndexError,
        Self::KeyError,
        Self::ValueError,
        Self::TypeError,
        Self::NameError,
        Self::UnboundLocalError,
        Self::AttributeError,
        Self::AssertionError,
        Self::RuntimeError,
        Self::RecursionError,
        Self::NotImplementedError,
        Self::StopIteration,
        Self::MemoryError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Exception => "Exception",
            Self::ArithmeticError => "ArithmeticError",
            Self::ZeroDivisionError => "ZeroDivisionError",
            Self::OverflowError => "OverflowError",
            Self::LookupError => "LookupError",
            Self::IndexError => "IndexError",
            Self::KeyError => "KeyError",
            Self::ValueError => "ValueError",
            Self::TypeError => "TypeError",
            Self::NameError => "NameError",
            Self::UnboundLocalError => "UnboundLocalError",
            Self::AttributeError => "AttributeError",
            Self::AssertionError => "AssertionError",
            Self::RuntimeError => "RuntimeError",
            Self::RecursionError => "RecursionError",
            Self::NotImplementedError => "NotImplementedError",
            Self::StopIteration => "StopIteration",
            Self::MemoryError => "MemoryError",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    pub fn parent(self) -> Option<Self> {
        match self {
            Self::Exception => None,
            Self::ZeroDivisionError | Self::OverflowError => Some(Self::ArithmeticError),
            Self::IndexError | Self::KeyError => Some(Self::LookupError),
            Self::UnboundLocalError => Some(Self::NameError),
            Self::RecursionError | Self::NotImplementedError => Some(Self::RuntimeError),
            _ => Some(Self::Exception),
        }
    }

    /// `true` when an `except other:` clause catches `self`.
    pub fn is_subclass_of(self, other: Self) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}

impl fmt::Display for ExcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A raised learner exception.
///
/// `line` and `function` are filled in by the first statement the
/// exception propagates through; zero means "not located yet".
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    pub kind: ExcKind,
    pub message: String,
    pub line: u32,
    pub function: Option<String>,
}

impl Exception {
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: 0,
            function: None,
        }
    }

    /// `line 3, in two_sum`
    pub fn location(&self) -> Option<String> {
        if self.line == 0 {
            return None;
        }
        Some(match &self.function {
            Some(name) => format!("line {}, in {name}", self.line),
            None => format!("line {}", self.line),
        })
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(self.kind.name())
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/// Evaluation error: a learner exception or a fatal resource stop.
///
/// Only `Raised` can be caught by learner `try` blocks. The other variants
/// unwind straight to the sandbox without running `except` or `finally`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("{0}")]
    Raised(Box<Exception>),
    /// The supervisor flagged the deadline.
    #[error("execution interrupted")]
    Interrupted,
    #[error("step budget of {0} exhausted")]
    StepBudget(u64),
    #[error("memory limit of {limit} bytes exceeded")]
    MemoryExceeded { limit: usize },
    #[error("maximum recursion depth exceeded")]
    RecursionLimit,
    /// A capability reached at run time; the linker normally stops these first.
    #[error("disallowed operation: {0}")]
    Disallowed(String),
}

impl EvalError {
    pub fn raise(kind: ExcKind, message: impl Into<String>) -> Self {
        Self::Raised(Box::new(Exception::new(kind, message)))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::raise(ExcKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::raise(ExcKind::ValueError, message)
    }

    pub fn overflow() -> Self {
        Self::raise(ExcKind::OverflowError, "integer overflow")
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Raised(_))
    }
}

/// Result alias for evaluator operations.
pub type EvalResult<T> = Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy() {
        assert!(ExcKind::ZeroDivisionError.is_subclass_of(ExcKind::ArithmeticError));
        assert!(ExcKind::KeyError.is_subclass_of(ExcKind::LookupError));
        assert!(ExcKind::RecursionError.is_subclass_of(ExcKind::Exception));
        assert!(!ExcKind::ValueError.is_subclass_of(ExcKind::LookupError));
        assert!(!ExcKind::Exception.is_subclass_of(ExcKind::ValueError));
    }

    #[test]
    fn test_names_round_trip() {
        for kind in ExcKind::ALL {
            assert_eq!(ExcKind::from_name(kind.name()), Some(*kind));
        }
        assert_eq!(ExcKind::from_name("BaseException"), None);
    }

    #[test]
    fn test_location() {
        let mut exc = Exception::new(ExcKind::ValueError, "bad");
        assert_eq!(exc.location(), None);
        exc.line = 4;
        exc.function = Some("solve".into());
        assert_eq!(exc.location().as_deref(), Some("line 4, in solve"));
        assert_eq!(exc.to_string(), "ValueError: bad");
    }

    #[test]
    fn test_only_raised_is_catchable() {
        assert!(!EvalError::value_error("x").is_fatal());
        assert!(EvalError::Interrupted.is_fatal());
        assert!(EvalError::MemoryExceeded { limit: 1 }.is_fatal());
    }
}
