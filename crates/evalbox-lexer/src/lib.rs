//! Tokenizer for the evalbox learner language (a Python subset).
//!
//! Converts source text into a flat token stream with explicit
//! `Newline`/`Indent`/`Dedent` tokens so the parser never has to look at
//! whitespace.

mod lexer;
mod token;

pub use lexer::{LexResult, Lexer};
pub use token::{Token, TokenKind, ALL_KEYWORDS};
