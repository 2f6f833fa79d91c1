//! Source Validator: language gate and full parse, no execution.

use evalbox_types::{ErrorRecord, Language, SourceFile, StructuralUnit};
use tracing::debug;

/// Name given to every submission's source file in diagnostics.
pub const SUBMISSION_FILE: &str = "<submission>";

/// Resolve a declared language tag against the enabled set.
pub fn check_language(tag: &str, enabled: &[Language]) -> Result<Language, ErrorRecord> {
    Language::from_tag(tag)
        .filter(|lang| enabled.contains(lang))
        .ok_or_else(|| ErrorRecord::unsupported_language(tag))
}

/// Parse `source` into a [`StructuralUnit`].
///
/// Any lexer or parser diagnostic rejects the whole submission; the first
/// one becomes the `SyntaxError` record.
pub fn validate(source: &str) -> Result<StructuralUnit, ErrorRecord> {
    let file = SourceFile::new(SUBMISSION_FILE, source);
    let parsed = evalbox_parser::parse(&file);
    if parsed.errors.has_errors() {
        debug!(errors = parsed.errors.total, "submission rejected by the parser");
        return Err(ErrorRecord::syntax(&parsed.errors));
    }
    match parsed.module {
        Some(module) => Ok(StructuralUnit::new(file, module)),
        None => Err(ErrorRecord::syntax(&parsed.errors)),
    }
}
