//! Program text front end: tokenizer and program builder.
//!
//! Programs arrive either pre-split (one token per CLI operand, quoting
//! already done by the shell) or as one string that [`token::split_program`]
//! splits the same way a shell would have. [`build::build_program`] then
//! parses the token stream into a [`core_engine::Program`]: grammar
//! classification, string unescaping, label-name validation and interning,
//! and regex compilation all happen here, so the engine only ever sees
//! well-formed programs.

use thiserror::Error;

pub mod build;
pub mod token;

pub use build::build_program;
pub use token::split_program;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("parse: {0}")]
    Grammar(String),
    #[error("label: {0}")]
    LabelFmt(String),
    #[error("regex: {0}")]
    Regex(#[from] core_regex::RegexError),
}

pub type Result<T> = std::result::Result<T, ParseError>;
