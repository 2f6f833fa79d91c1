//! Parser for the evalbox learner language: token stream to AST.

mod parse_expr;
mod parse_stmt;
mod parser;

pub use parser::{ParseResult, Parser, MAX_NESTING};

use evalbox_lexer::Lexer;
use evalbox_types::SourceFile;

/// Lex and parse `source`, merging diagnostics from both stages.
///
/// The lexer's diagnostics come first, so the earliest problem reported is
/// the one a learner sees.
pub fn parse(source: &SourceFile) -> ParseResult {
    let lexed = Lexer::new(source).lex();
    let mut result = Parser::new(lexed.tokens, source).parse();
    if lexed.errors.has_errors() {
        let mut errors = lexed.errors;
        errors.extend(result.errors);
        result.errors = errors;
    }
    result
}
