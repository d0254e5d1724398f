//! Clause staging.
//!
//! Runs a clause's ops in order against the staged VM and the staging slabs.
//! The first error stops the clause; because nothing here can reach the
//! committed VM or the output sink, an error makes the whole clause a no-op
//! apart from `fail`'s unstaged message.

use crate::Result;
use crate::exec::{ExecCtx, exec_op};
use crate::program::Clause;
use crate::vm::Vm;

pub fn stage_clause(clause: &Clause, staged: &mut Vm, cx: &mut ExecCtx<'_>) -> Result<()> {
    for op in &clause.ops {
        exec_op(op, staged, cx)?;
    }
    Ok(())
}
