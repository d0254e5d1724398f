//! Clause-atomic execution engine.
//!
//! A [`Program`] is an ordered list of clauses; a clause is an ordered list
//! of operations joined to the next clause by THEN / AND / OR. Operations
//! never touch the committed state directly: each clause runs against a
//! staged VM snapshot plus staged output ranges and label writes, and the
//! [`Engine`] commits everything at once on success or discards it all on
//! failure. The output sink therefore only ever sees whole clauses, in
//! program order.
//!
//! Module map, leaves first:
//! - [`program`]: the data model (`Program`, `Clause`, `Op`, `LocExpr`) and
//!   the per-clause capacity plan.
//! - [`vm`]: VM snapshot, view, match span, staged range/label types.
//! - [`resolve`]: location-expression resolution under a clamp policy.
//! - [`exec`]: one executor per operation, mutating staged state only.
//! - [`stage`]: clause staging (run ops, collect writes, stop on error).
//! - [`link`]: the clause linker and the run report.

use thiserror::Error;

pub mod exec;
pub mod link;
pub mod program;
pub mod resolve;
pub mod stage;
pub mod vm;

pub use link::{Engine, RunReport};
pub use program::{Base, CURSOR_MARK, Clause, Link, LocExpr, MAX_LABELS, Op, Program, Unit};
pub use vm::{LabelWrite, MatchSpan, Range, View, Vm};

/// Engine failure. Within a clause any of these rolls the clause back;
/// `Io` additionally aborts the whole run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Program construction failure (surfaced by the builder crate).
    #[error("program: {0}")]
    Parse(String),
    #[error("empty search needle")]
    BadNeedle,
    #[error("location: {0}")]
    LocResolve(String),
    #[error("no match")]
    NoMatch,
    #[error("label: {0}")]
    LabelFmt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("out of memory")]
    Oom,
    #[error("scratch capacity exceeded: {0}")]
    Capacity(&'static str),
    /// The `fail` operation fired.
    #[error("fail operation")]
    FailOp,
}

/// Compact error classification for exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Ok,
    Parse,
    BadNeedle,
    LocResolve,
    NoMatch,
    LabelFmt,
    Io,
    Oom,
    Capacity,
    FailOp,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Parse(_) => ErrorKind::Parse,
            EngineError::BadNeedle => ErrorKind::BadNeedle,
            EngineError::LocResolve(_) => ErrorKind::LocResolve,
            EngineError::NoMatch => ErrorKind::NoMatch,
            EngineError::LabelFmt(_) => ErrorKind::LabelFmt,
            EngineError::Io(_) => ErrorKind::Io,
            EngineError::Oom => ErrorKind::Oom,
            EngineError::Capacity(_) => ErrorKind::Capacity,
            EngineError::FailOp => ErrorKind::FailOp,
        }
    }
}

impl From<core_source::SourceError> for EngineError {
    fn from(e: core_source::SourceError) -> Self {
        match e {
            core_source::SourceError::BadNeedle => EngineError::BadNeedle,
            core_source::SourceError::OutOfBounds { .. } => EngineError::LocResolve(e.to_string()),
            core_source::SourceError::Io(io) => EngineError::Io(io),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
