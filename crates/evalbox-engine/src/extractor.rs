//! Callable Extractor.

use evalbox_types::ast::StmtKind;
use evalbox_types::{Callable, ErrorRecord, StructuralUnit};

/// The first top-level `def` in source order.
///
/// Nested functions are never candidates, and later definitions never win
/// over earlier ones whatever their names.
pub fn extract(unit: &StructuralUnit) -> Result<Callable<'_>, ErrorRecord> {
    unit.module()
        .body
        .iter()
        .enumerate()
        .find_map(|(position, stmt)| match &stmt.kind {
            StmtKind::FunctionDef(def) => Some(Callable::new(def, position)),
            _ => None,
        })
        .ok_or_else(ErrorRecord::no_callable)
}
