//! Location-expression resolution.
//!
//! Resolution happens against the *staged* VM snapshot: `cursor` and the
//! view come from the snapshot, and label references see the clause's own
//! staged writes (latest first) before the committed table. The clamp
//! policy decides where the final position may land; line/char offsets
//! saturate only through the stepping routines, byte offsets clamp
//! directly.

use core_source::Source;

use crate::program::{Base, LocExpr, Unit};
use crate::vm::{LabelWrite, Vm};
use crate::{EngineError, Result};

/// Where a resolved position is allowed to land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clamp {
    /// No final clamp; the caller validates.
    None,
    /// Clamp into `[0, size]`.
    File,
    /// Clamp into the effective window.
    View,
}

/// Resolve `expr` to an absolute offset. `cursor` is the anchor for
/// `cursor` / `line-start` / `line-end` bases; it is the staged cursor for
/// every executor except `take until`, which anchors the `at` expression at
/// the staged match start.
pub fn resolve(
    expr: &LocExpr,
    src: &mut Source,
    vm: &Vm,
    cursor: i64,
    staged_labels: &[LabelWrite],
    names: &[String],
    clamp: Clamp,
) -> Result<i64> {
    let size = src.size();
    let (vlo, vhi) = vm.view.bounds(size);
    let mut pos = match expr.base {
        Base::Cursor => cursor,
        Base::Bof => vlo,
        Base::Eof => vhi,
        Base::Name(idx) => lookup_label(idx, vm, staged_labels, names)?,
        Base::MatchStart => {
            vm.last_match
                .ok_or_else(|| EngineError::LocResolve("no previous match".into()))?
                .start
        }
        Base::MatchEnd => {
            vm.last_match
                .ok_or_else(|| EngineError::LocResolve("no previous match".into()))?
                .end
        }
        Base::LineStart => src.line_start(cursor)?.clamp(vlo, vhi),
        Base::LineEnd => src.line_end(cursor)?.clamp(vlo, vhi),
    };
    if expr.offset != 0 {
        pos = match expr.unit {
            Unit::Bytes => {
                let shifted = pos.saturating_add(expr.offset);
                match clamp {
                    Clamp::None => shifted,
                    Clamp::File => shifted.clamp(0, size),
                    Clamp::View => shifted.clamp(vlo, vhi),
                }
            }
            Unit::Lines => src.step_lines(pos.clamp(0, size), expr.offset)?,
            Unit::Chars => {
                let snapped = src.prev_char_start(pos.clamp(0, size))?;
                src.step_chars(snapped, expr.offset)?
            }
        };
    }
    Ok(match clamp {
        Clamp::None => pos,
        Clamp::File => pos.clamp(0, size),
        Clamp::View => pos.clamp(vlo, vhi),
    })
}

fn lookup_label(
    idx: u16,
    vm: &Vm,
    staged: &[LabelWrite],
    names: &[String],
) -> Result<i64> {
    // Staged writes shadow the committed table; latest write wins.
    if let Some(w) = staged.iter().rev().find(|w| w.name == idx) {
        return Ok(w.pos);
    }
    if let Some(pos) = vm.labels.get(idx as usize).copied().flatten() {
        return Ok(pos);
    }
    let name = names
        .get(idx as usize)
        .map(String::as_str)
        .unwrap_or("?");
    Err(EngineError::LocResolve(format!("label {name} not set")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::LocExpr;
    use crate::vm::{MatchSpan, View};
    use std::io::Write as _;

    fn source(bytes: &[u8]) -> Source {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        Source::open(f.path()).unwrap()
    }

    fn expr(base: Base, offset: i64, unit: Unit) -> LocExpr {
        LocExpr { base, offset, unit }
    }

    #[test]
    fn bof_eof_follow_the_view() {
        let mut src = source(b"0123456789");
        let mut vm = Vm::new(0);
        let r = |e: &LocExpr, src: &mut Source, vm: &Vm| {
            resolve(e, src, vm, vm.cursor, &[], &[], Clamp::View).unwrap()
        };
        assert_eq!(r(&LocExpr::at(Base::Bof), &mut src, &vm), 0);
        assert_eq!(r(&LocExpr::at(Base::Eof), &mut src, &vm), 10);
        vm.view = View {
            active: true,
            lo: 2,
            hi: 7,
        };
        assert_eq!(r(&LocExpr::at(Base::Bof), &mut src, &vm), 2);
        assert_eq!(r(&LocExpr::at(Base::Eof), &mut src, &vm), 7);
    }

    #[test]
    fn byte_offsets_clamp_by_policy() {
        let mut src = source(b"0123456789");
        let mut vm = Vm::new(0);
        vm.view = View {
            active: true,
            lo: 2,
            hi: 7,
        };
        vm.cursor = 5;
        let e = expr(Base::Cursor, 100, Unit::Bytes);
        assert_eq!(resolve(&e, &mut src, &vm, 5, &[], &[], Clamp::View).unwrap(), 7);
        assert_eq!(resolve(&e, &mut src, &vm, 5, &[], &[], Clamp::File).unwrap(), 10);
        assert_eq!(resolve(&e, &mut src, &vm, 5, &[], &[], Clamp::None).unwrap(), 105);
    }

    #[test]
    fn line_bases_anchor_at_cursor_and_clamp_to_view() {
        let mut src = source(b"abc\ndef\nghi\n");
        let mut vm = Vm::new(0);
        vm.cursor = 5;
        let r = |e, src: &mut Source, vm: &Vm| {
            resolve(&e, src, vm, vm.cursor, &[], &[], Clamp::View).unwrap()
        };
        assert_eq!(r(LocExpr::at(Base::LineStart), &mut src, &vm), 4);
        assert_eq!(r(LocExpr::at(Base::LineEnd), &mut src, &vm), 8);
        assert_eq!(r(expr(Base::LineStart, -1, Unit::Lines), &mut src, &vm), 0);
        assert_eq!(r(expr(Base::LineEnd, 1, Unit::Lines), &mut src, &vm), 12);
        vm.view = View {
            active: true,
            lo: 5,
            hi: 7,
        };
        assert_eq!(r(LocExpr::at(Base::LineStart), &mut src, &vm), 5);
        assert_eq!(r(LocExpr::at(Base::LineEnd), &mut src, &vm), 7);
    }

    #[test]
    fn match_bases_require_a_valid_match() {
        let mut src = source(b"0123456789");
        let mut vm = Vm::new(0);
        let e = LocExpr::at(Base::MatchStart);
        assert!(resolve(&e, &mut src, &vm, 0, &[], &[], Clamp::View).is_err());
        vm.last_match = Some(MatchSpan { start: 3, end: 6 });
        assert_eq!(resolve(&e, &mut src, &vm, 0, &[], &[], Clamp::View).unwrap(), 3);
        let e = LocExpr::at(Base::MatchEnd);
        assert_eq!(resolve(&e, &mut src, &vm, 0, &[], &[], Clamp::View).unwrap(), 6);
    }

    #[test]
    fn staged_labels_shadow_committed() {
        let mut src = source(b"0123456789");
        let mut vm = Vm::new(2);
        vm.labels[0] = Some(1);
        let names = vec!["A".to_string(), "B".to_string()];
        let e = LocExpr::at(Base::Name(0));
        assert_eq!(resolve(&e, &mut src, &vm, 0, &[], &names, Clamp::View).unwrap(), 1);
        let staged = [
            LabelWrite { name: 0, pos: 4 },
            LabelWrite { name: 0, pos: 8 },
        ];
        assert_eq!(
            resolve(&e, &mut src, &vm, 0, &staged, &names, Clamp::View).unwrap(),
            8
        );
        let unset = LocExpr::at(Base::Name(1));
        let err = resolve(&unset, &mut src, &vm, 0, &[], &names, Clamp::View).unwrap_err();
        assert!(err.to_string().contains('B'));
    }

    #[test]
    fn char_offsets_snap_then_step() {
        let text = "aé漢x";
        let mut src = source(text.as_bytes());
        let vm = Vm::new(0);
        // Cursor inside é: snapping back to the sequence start, then two
        // codepoints forward, lands after 漢.
        let e = expr(Base::Cursor, 2, Unit::Chars);
        assert_eq!(resolve(&e, &mut src, &vm, 2, &[], &[], Clamp::File).unwrap(), 6);
        let back = expr(Base::Cursor, -2, Unit::Chars);
        assert_eq!(resolve(&back, &mut src, &vm, 6, &[], &[], Clamp::File).unwrap(), 1);
    }
}
