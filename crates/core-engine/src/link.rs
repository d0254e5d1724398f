//! Clause linker: left-to-right execution with THEN / AND / OR
//! short-circuiting.
//!
//! Per clause: stage, then either commit (emit ranges in order, fold label
//! writes in, adopt the staged VM) or roll back. A success whose link is OR
//! skips the rest of its OR chain; a failure in an AND chain (entered when
//! either the failing clause's link or its predecessor's link is AND) skips
//! the remaining AND-linked clauses. Everything else proceeds to the next
//! clause.
//!
//! Sink and source I/O errors abort the run; all other failures are
//! clause-local and recorded in the [`RunReport`].

use std::io::Write;

use core_regex::Threads;
use core_source::Source;
use tracing::debug;

use crate::exec::ExecCtx;
use crate::program::{ClausePlan, Link, Program, clause_plan};
use crate::stage::stage_clause;
use crate::vm::{ClauseScratch, Range, Vm};
use crate::{EngineError, ErrorKind, Result};

/// Outcome summary of one program run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Clauses that committed.
    pub clauses_ok: usize,
    /// First failing clause and its error kind, if any clause failed.
    pub first_fail: Option<(usize, ErrorKind)>,
}

impl RunReport {
    /// A run succeeds when at least one clause committed.
    pub fn success(&self) -> bool {
        self.clauses_ok > 0
    }
}

/// Execution context reused across clauses: staging slabs sized for the
/// worst clause of the program, regex thread scratch sized for its largest
/// pattern, and the staged VM snapshot.
pub struct Engine {
    scratch: ClauseScratch,
    threads: Threads,
    staged: Vm,
}

impl Engine {
    pub fn new(prog: &Program) -> Engine {
        let plan = prog
            .clauses
            .iter()
            .map(clause_plan)
            .fold(ClausePlan::default(), ClausePlan::max);
        Engine {
            scratch: ClauseScratch::with_plan(plan),
            threads: Threads::with_capacity(prog.max_regex_insts()),
            staged: Vm::new(prog.label_names.len()),
        }
    }

    /// Run the program to completion. `Err` is reserved for I/O failures,
    /// which abort the run; clause-local failures land in the report.
    pub fn run(
        &mut self,
        prog: &Program,
        src: &mut Source,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<RunReport> {
        let mut committed = Vm::new(prog.label_names.len());
        let mut report = RunReport::default();
        let n = prog.clauses.len();
        let mut i = 0;
        while i < n {
            let clause = &prog.clauses[i];
            src.refresh_size()?;
            committed.clamp_to_window(src.size());
            self.scratch.reset();
            self.staged.clone_from(&committed);
            let staged = {
                let mut cx = ExecCtx {
                    src: &mut *src,
                    scratch: &mut self.scratch,
                    threads: &mut self.threads,
                    names: &prog.label_names,
                    err_sink: &mut *err,
                };
                stage_clause(clause, &mut self.staged, &mut cx)
            };
            match staged {
                Ok(()) => {
                    emit_ranges(src, &self.scratch, out)?;
                    out.flush()?;
                    for w in self.scratch.labels() {
                        if let Some(slot) = self.staged.labels.get_mut(w.name as usize) {
                            *slot = Some(w.pos);
                        }
                    }
                    committed.clone_from(&self.staged);
                    report.clauses_ok += 1;
                    debug!(
                        clause = i,
                        ranges = self.scratch.ranges().len(),
                        cursor = committed.cursor,
                        "clause committed"
                    );
                    i = if clause.link == Link::Or {
                        skip_chain(prog, i, Link::Or)
                    } else {
                        i + 1
                    };
                }
                Err(e @ EngineError::Io(_)) => return Err(e),
                Err(e) => {
                    debug!(clause = i, error = %e, "clause rolled back");
                    if report.first_fail.is_none() {
                        report.first_fail = Some((i, e.kind()));
                    }
                    let and_failure = clause.link == Link::And
                        || (i > 0 && prog.clauses[i - 1].link == Link::And);
                    i = if and_failure {
                        skip_chain(prog, i, Link::And)
                    } else {
                        i + 1
                    };
                }
            }
        }
        Ok(report)
    }
}

/// Index just past the run of clauses linked by `link` starting at `i`
/// (inclusive of the first clause whose link differs).
fn skip_chain(prog: &Program, i: usize, link: Link) -> usize {
    let mut j = i;
    while j < prog.clauses.len() && prog.clauses[j].link == link {
        j += 1;
    }
    j + 1
}

fn emit_ranges(src: &mut Source, scratch: &ClauseScratch, out: &mut dyn Write) -> Result<()> {
    for r in scratch.ranges() {
        match *r {
            Range::File { start, end } => src.emit(start, end, out)?,
            Range::Lit { off, len } => out.write_all(&scratch.lits()[off..off + len])?,
        }
    }
    Ok(())
}
