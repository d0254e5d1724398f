//! One executor per operation.
//!
//! Executors mutate the staged VM and append to the staged slabs; nothing
//! here touches committed state or the output sink. The single exception is
//! `fail`, whose message goes to the error sink immediately — it stays
//! visible even though the clause rolls back.
//!
//! Cursor law: every cursor move is clamped into the active view, a
//! zero-length take never moves the cursor, and only `take to` / `viewset`
//! order-normalize their operand pair.

use std::io::Write;

use core_regex::Threads;
use core_source::{Dir, Source};
use tracing::trace;

use crate::program::{CURSOR_MARK, LocExpr, Op, Unit};
use crate::resolve::{Clamp, resolve};
use crate::vm::{ClauseScratch, LabelWrite, MatchSpan, Range, View, Vm};
use crate::{EngineError, Result};

pub struct ExecCtx<'a> {
    pub src: &'a mut Source,
    pub scratch: &'a mut ClauseScratch,
    pub threads: &'a mut Threads,
    pub names: &'a [String],
    pub err_sink: &'a mut dyn Write,
}

pub fn exec_op(op: &Op, vm: &mut Vm, cx: &mut ExecCtx<'_>) -> Result<()> {
    trace!(?op, cursor = vm.cursor, "exec");
    match op {
        Op::Find { to, needle } => {
            let (ms, me) = find_common(vm, cx, to, |src, lo, hi, dir, _th| {
                src.find_window(lo, hi, needle, dir).map_err(Into::into)
            })?;
            apply_find(vm, cx.src.size(), ms, me);
            Ok(())
        }
        Op::FindRe { to, prog } => {
            let (ms, me) = find_common(vm, cx, to, |src, lo, hi, dir, th| {
                src.find_regex_window(lo, hi, prog, th, dir)
                    .map_err(Into::into)
            })?;
            apply_find(vm, cx.src.size(), ms, me);
            Ok(())
        }
        Op::Skip { delta, unit } => {
            let size = cx.src.size();
            let moved = match unit {
                Unit::Bytes => vm.cursor.saturating_add(*delta),
                Unit::Lines => cx.src.step_lines(vm.cursor, *delta)?,
                Unit::Chars => {
                    let snapped = cx.src.prev_char_start(vm.cursor)?;
                    cx.src.step_chars(snapped, *delta)?
                }
            };
            vm.cursor = vm.view.clamp(moved, size);
            Ok(())
        }
        Op::SkipTo { loc } => {
            let pos = resolve(loc, cx.src, vm, vm.cursor, cx.scratch.labels(), cx.names, Clamp::None)?;
            if vm.view.active && (pos < vm.view.lo || pos > vm.view.hi) {
                return Err(EngineError::LocResolve(format!(
                    "target {pos} outside view [{}, {})",
                    vm.view.lo, vm.view.hi
                )));
            }
            vm.cursor = pos.clamp(0, cx.src.size());
            Ok(())
        }
        Op::TakeLen { delta, unit } => {
            let size = cx.src.size();
            let (vlo, vhi) = vm.view.bounds(size);
            let other = match unit {
                Unit::Bytes => vm.cursor.saturating_add(*delta),
                Unit::Lines => cx.src.step_lines(vm.cursor, *delta)?,
                Unit::Chars => {
                    let snapped = cx.src.prev_char_start(vm.cursor)?;
                    cx.src.step_chars(snapped, *delta)?
                }
            };
            let (mut start, mut end) = if *delta >= 0 {
                (vm.cursor, other)
            } else {
                (other, vm.cursor)
            };
            start = start.clamp(vlo, vhi);
            end = end.clamp(vlo, vhi);
            if start > end {
                std::mem::swap(&mut start, &mut end);
            }
            cx.scratch.push_range(Range::File { start, end })?;
            if start != end {
                vm.cursor = end;
            }
            Ok(())
        }
        Op::TakeTo { loc } => {
            let size = cx.src.size();
            let pos = resolve(loc, cx.src, vm, vm.cursor, cx.scratch.labels(), cx.names, Clamp::View)?;
            let (start, end) = (vm.cursor.min(pos), vm.cursor.max(pos));
            cx.scratch.push_range(Range::File { start, end })?;
            if start != end {
                vm.cursor = vm.view.clamp(end, size);
            }
            Ok(())
        }
        Op::TakeUntil { needle, at } => {
            let found = {
                let (_, vhi) = vm.view.bounds(cx.src.size());
                cx.src.find_window(vm.cursor, vhi, needle, Dir::Fwd)?
            };
            take_until_common(vm, cx, found, at)
        }
        Op::TakeUntilRe { prog, at } => {
            let found = {
                let (_, vhi) = vm.view.bounds(cx.src.size());
                cx.src
                    .find_regex_window(vm.cursor, vhi, prog, cx.threads, Dir::Fwd)?
            };
            take_until_common(vm, cx, found, at)
        }
        Op::Label { name } => cx.scratch.push_label(LabelWrite {
            name: *name,
            pos: vm.cursor,
        }),
        Op::ViewSet { a, b } => {
            let pa = resolve(a, cx.src, vm, vm.cursor, cx.scratch.labels(), cx.names, Clamp::File)?;
            let pb = resolve(b, cx.src, vm, vm.cursor, cx.scratch.labels(), cx.names, Clamp::File)?;
            let (lo, hi) = (pa.min(pb), pa.max(pb));
            vm.view = View {
                active: true,
                lo,
                hi,
            };
            vm.cursor = vm.cursor.clamp(lo, hi);
            if let Some(m) = vm.last_match
                && (m.start < lo || m.end > hi)
            {
                vm.last_match = None;
            }
            Ok(())
        }
        Op::ViewClear => {
            vm.view = View::INACTIVE;
            Ok(())
        }
        Op::Print { bytes } => print_op(vm, cx, bytes),
        Op::Fail { msg } => {
            // Deliberately unstaged: the message lands even though the
            // clause rolls back.
            cx.err_sink.write_all(msg)?;
            if msg.last() != Some(&b'\n') {
                cx.err_sink.write_all(b"\n")?;
            }
            Err(EngineError::FailOp)
        }
    }
}

/// Resolve the find window and run the supplied searcher over it. A target
/// left of the cursor flips the window and searches backward for the match
/// closest to the cursor.
fn find_common<F>(
    vm: &Vm,
    cx: &mut ExecCtx<'_>,
    to: &Option<LocExpr>,
    search: F,
) -> Result<(i64, i64)>
where
    F: FnOnce(&mut Source, i64, i64, Dir, &mut Threads) -> Result<Option<(i64, i64)>>,
{
    let (_, vhi) = vm.view.bounds(cx.src.size());
    let target = match to {
        Some(expr) => resolve(expr, cx.src, vm, vm.cursor, cx.scratch.labels(), cx.names, Clamp::View)?,
        None => vhi,
    };
    let (lo, hi, dir) = if target >= vm.cursor {
        (vm.cursor, target, Dir::Fwd)
    } else {
        (target, vm.cursor, Dir::Bwd)
    };
    search(cx.src, lo, hi, dir, cx.threads)?.ok_or(EngineError::NoMatch)
}

fn apply_find(vm: &mut Vm, size: i64, ms: i64, me: i64) {
    vm.last_match = Some(MatchSpan { start: ms, end: me });
    vm.cursor = vm.view.clamp(ms, size);
}

/// Shared tail of `take until`: record the staged match, resolve the
/// destination against the match start, and stage `[cursor, dst)` without
/// order normalization.
fn take_until_common(
    vm: &mut Vm,
    cx: &mut ExecCtx<'_>,
    found: Option<(i64, i64)>,
    at: &Option<LocExpr>,
) -> Result<()> {
    let (ms, me) = found.ok_or(EngineError::NoMatch)?;
    vm.last_match = Some(MatchSpan { start: ms, end: me });
    let dst = match at {
        None => ms,
        Some(expr) => resolve(expr, cx.src, vm, ms, cx.scratch.labels(), cx.names, Clamp::View)?,
    };
    cx.scratch.push_range(Range::File {
        start: vm.cursor,
        end: dst,
    })?;
    if dst > vm.cursor {
        vm.cursor = dst;
    }
    Ok(())
}

fn print_op(vm: &mut Vm, cx: &mut ExecCtx<'_>, bytes: &[u8]) -> Result<()> {
    let mut seg_start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b != CURSOR_MARK {
            continue;
        }
        if let Some(r) = cx.scratch.push_lit(&bytes[seg_start..i])? {
            cx.scratch.push_range(r)?;
        }
        let mut num = [0u8; 20];
        let at = fmt_i64(vm.cursor, &mut num);
        if let Some(r) = cx.scratch.push_lit(&num[at..])? {
            cx.scratch.push_range(r)?;
        }
        seg_start = i + 1;
    }
    if let Some(r) = cx.scratch.push_lit(&bytes[seg_start..])? {
        cx.scratch.push_range(r)?;
    }
    Ok(())
}

/// Render `v` right-aligned into `buf`, returning the first used index.
/// 20 bytes cover `i64::MIN` with its sign.
fn fmt_i64(v: i64, buf: &mut [u8; 20]) -> usize {
    let mut i = buf.len();
    let mut u = v.unsigned_abs();
    loop {
        i -= 1;
        buf[i] = b'0' + (u % 10) as u8;
        u /= 10;
        if u == 0 {
            break;
        }
    }
    if v < 0 {
        i -= 1;
        buf[i] = b'-';
    }
    i
}
