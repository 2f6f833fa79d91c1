use crate::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of syntax diagnostics kept before the rest are only counted.
pub const MAX_DIAGNOSTICS: usize = 20;

/// Closed classification of every way an evaluation or a single test can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The request names a language outside the supported set.
    UnsupportedLanguage,
    /// The source failed to tokenize or parse.
    SyntaxError,
    /// The source parsed but declares no top-level function.
    NoCallableFound,
    /// A test input could not be bound to the callable's parameters.
    ArgumentBindingError,
    /// An allowed operation raised a domain error while running.
    RuntimeError,
    /// The invocation ran past its deadline.
    Timeout,
    /// The invocation exceeded the memory ceiling or the recursion limit.
    ResourceExceeded,
    /// The source reaches for an operation outside the allow-list.
    DisallowedOperation,
    /// The caller cancelled the batch before it finished.
    Cancelled,
}

impl ErrorKind {
    /// Kinds that abort the whole request with zero outcomes.
    pub fn is_top_level(self) -> bool {
        matches!(
            self,
            Self::UnsupportedLanguage | Self::SyntaxError | Self::NoCallableFound | Self::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedLanguage => "UnsupportedLanguage",
            Self::SyntaxError => "SyntaxError",
            Self::NoCallableFound => "NoCallableFound",
            Self::ArgumentBindingError => "ArgumentBindingError",
            Self::RuntimeError => "RuntimeError",
            Self::Timeout => "Timeout",
            Self::ResourceExceeded => "ResourceExceeded",
            Self::DisallowedOperation => "DisallowedOperation",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure, either top-level or attached to one outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Learner-facing exception class, e.g. `ZeroDivisionError`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
            exception: None,
            span: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn unsupported_language(language: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedLanguage,
            format!("Language {language} not supported yet"),
        )
    }

    /// Build the top-level syntax failure from the first collected diagnostic.
    pub fn syntax(diagnostics: &Diagnostics) -> Self {
        let Some(first) = diagnostics.first() else {
            return Self::new(ErrorKind::SyntaxError, "Syntax error: invalid syntax");
        };
        let mut detail = format!("{}: {}", first.span, first.source_line.trim_end());
        if diagnostics.total > 1 {
            detail.push_str(&format!(" ({} errors in total)", diagnostics.total));
        }
        Self::new(ErrorKind::SyntaxError, format!("Syntax error: {}", first.message))
            .with_detail(detail)
            .at(first.span)
    }

    pub fn no_callable() -> Self {
        Self::new(ErrorKind::NoCallableFound, "No function definition found")
    }

    pub fn cancelled(completed: usize, total: usize) -> Self {
        Self::new(ErrorKind::Cancelled, "Evaluation cancelled")
            .with_detail(format!("cancelled after {completed} of {total} test cases"))
    }
}

/// A single lexer or parser complaint with the offending source line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntaxDiagnostic {
    pub message: String,
    pub span: Span,
    pub source_line: String,
}

impl SyntaxDiagnostic {
    pub fn new(message: impl Into<String>, span: Span, source_line: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            span,
            source_line: source_line.into(),
        }
    }
}

impl fmt::Display for SyntaxDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.span, self.message)
    }
}

/// Diagnostics collected across lexing and parsing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub errors: Vec<SyntaxDiagnostic>,
    pub total: usize,
}

impl Diagnostics {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_errors(&self) -> bool {
        self.total > 0
    }

    /// True once the stored list is full; callers stop scanning at that point.
    pub fn is_saturated(&self) -> bool {
        self.total >= MAX_DIAGNOSTICS
    }

    pub fn push(&mut self, diagnostic: SyntaxDiagnostic) {
        if self.errors.len() < MAX_DIAGNOSTICS {
            self.errors.push(diagnostic);
        }
        self.total += 1;
    }

    pub fn first(&self) -> Option<&SyntaxDiagnostic> {
        self.errors.first()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        let hidden = other.total - other.errors.len();
        for diagnostic in other.errors {
            self.push(diagnostic);
        }
        self.total += hidden;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(msg: &str, line: u32) -> SyntaxDiagnostic {
        SyntaxDiagnostic::new(msg, Span::point(line, 1), "x = (")
    }

    #[test]
    fn test_diagnostics_cap_keeps_counting() {
        let mut d = Diagnostics::empty();
        for i in 0..25 {
            d.push(diag("bad", i + 1));
        }
        assert_eq!(d.errors.len(), MAX_DIAGNOSTICS);
        assert_eq!(d.total, 25);
        assert!(d.is_saturated());
    }

    #[test]
    fn test_syntax_record_uses_first_diagnostic() {
        let mut d = Diagnostics::empty();
        d.push(diag("unexpected EOF while parsing", 3));
        d.push(diag("invalid syntax", 4));
        let rec = ErrorRecord::syntax(&d);
        assert_eq!(rec.kind, ErrorKind::SyntaxError);
        assert_eq!(rec.message, "Syntax error: unexpected EOF while parsing");
        assert_eq!(rec.span, Some(Span::point(3, 1)));
        assert!(rec.detail.as_deref().is_some_and(|d| d.contains("2 errors")));
    }

    #[test]
    fn test_kind_serializes_as_name() {
        let json = serde_json::to_string(&ErrorKind::ResourceExceeded).unwrap();
        assert_eq!(json, "\"ResourceExceeded\"");
    }

    #[test]
    fn test_top_level_kinds() {
        assert!(ErrorKind::SyntaxError.is_top_level());
        assert!(ErrorKind::Cancelled.is_top_level());
        assert!(!ErrorKind::Timeout.is_top_level());
        assert!(!ErrorKind::DisallowedOperation.is_top_level());
    }

    #[test]
    fn test_record_skips_absent_fields() {
        let json = serde_json::to_value(ErrorRecord::no_callable()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "NoCallableFound", "message": "No function definition found"})
        );
    }
}
