//! Pattern compilation and execution for windowed byte searches.
//!
//! The front end leans on `regex-syntax`: a pattern string is parsed to HIR
//! with UTF-8 and Unicode modes off (patterns match raw bytes) and multi-line
//! mode on, so `^`/`$` mean "window edge or adjacent `\n`". The back end is
//! ours: [`compile`] lowers the HIR to a flat Thompson instruction list with
//! 256-bit byte classes, and [`Exec`] runs it as a breadth-first NFA fed one
//! input position at a time. Feeding positions (rather than a slice) lets the
//! byte source stream arbitrarily large windows through a fixed scratch
//! buffer without the matcher knowing about chunk boundaries.
//!
//! Supported syntax: literals, `.`, byte classes with negation and the perl
//! classes `\d \D \s \S \w \W`, `^`/`$`, `? * +` and bounded `{n[,m]}`
//! quantifiers (greedy and lazy), alternation, grouping. Word boundaries,
//! backreferences, and lookaround are rejected at compile time.

use thiserror::Error;

pub mod compile;
pub mod exec;

pub use compile::{ClassBits, Inst, MAX_RE_INSTS, Program, compile};
pub use exec::{Exec, Feed, Threads};

/// Pattern compilation failure.
#[derive(Debug, Error)]
pub enum RegexError {
    /// The pattern text did not parse.
    #[error("pattern syntax: {0}")]
    Syntax(String),
    /// The pattern parsed but uses a construct the engine does not run.
    #[error("unsupported pattern construct: {0}")]
    Unsupported(&'static str),
    /// Lowering exceeded [`MAX_RE_INSTS`] instructions.
    #[error("pattern too large (over {MAX_RE_INSTS} instructions)")]
    TooBig,
}
