//! Windowed byte and regex search.
//!
//! Byte search uses `memmem` (Two-Way) over streamed chunks: forward scans
//! read up to [`FW_WIN`](crate::FW_WIN) at a time with a needle-sized
//! overlap; backward scans read [`BK_BLK`](crate::BK_BLK) blocks from the
//! window top down, enumerate matches forward inside each block, and keep
//! the rightmost. Regex search streams the window through
//! [`core_regex::Exec`] one position at a time, so window length is not
//! bounded by the scratch buffer.

use core_regex::{Exec, Feed, Program, Threads};
use memchr::memmem;
use tracing::trace;

use crate::{BK_BLK, FW_WIN, OVERLAP_MAX, OVERLAP_MIN, Result, Source, SourceError};

/// Search direction. Forward returns the leftmost match, backward the
/// rightmost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    Fwd,
    Bwd,
}

impl Source {
    /// Find `needle` in the window `[lo, hi)`. The match lies wholly inside
    /// the window. Empty needles are a caller error.
    pub fn find_window(
        &mut self,
        lo: i64,
        hi: i64,
        needle: &[u8],
        dir: Dir,
    ) -> Result<Option<(i64, i64)>> {
        if needle.is_empty() {
            return Err(SourceError::BadNeedle);
        }
        let lo = lo.max(0);
        let hi = hi.min(self.size);
        let n = needle.len() as i64;
        if hi - lo < n {
            return Ok(None);
        }
        let found = match dir {
            Dir::Fwd => self.needle_fwd(lo, hi, needle)?,
            Dir::Bwd => self.needle_bwd(lo, hi, needle)?,
        };
        trace!(lo, hi, ?dir, len = needle.len(), ?found, "find_window");
        Ok(found)
    }

    fn needle_fwd(&mut self, lo: i64, hi: i64, needle: &[u8]) -> Result<Option<(i64, i64)>> {
        let finder = memmem::Finder::new(needle);
        let n = needle.len() as i64;
        let mut pos = lo;
        while pos + n <= hi {
            let want = ((hi - pos) as usize).min(FW_WIN);
            let got = self.fill(pos, want)?;
            if (got as i64) < n {
                break;
            }
            if let Some(off) = finder.find(&self.scratch[..got]) {
                let ms = pos + off as i64;
                return Ok(Some((ms, ms + n)));
            }
            // Re-read the tail so a match straddling the chunk edge is seen.
            pos += (got - (needle.len() - 1)) as i64;
        }
        Ok(None)
    }

    fn needle_bwd(&mut self, lo: i64, hi: i64, needle: &[u8]) -> Result<Option<(i64, i64)>> {
        let finder = memmem::Finder::new(needle);
        let n = needle.len() as i64;
        let overlap = needle.len().saturating_sub(1).clamp(OVERLAP_MIN, OVERLAP_MAX) as i64;
        let mut bhi = hi;
        loop {
            let blo = (bhi - BK_BLK as i64).max(lo);
            let got = self.fill(blo, (bhi - blo) as usize)?;
            let mut best = None;
            for off in finder.find_iter(&self.scratch[..got]) {
                best = Some(blo + off as i64);
            }
            if let Some(ms) = best {
                return Ok(Some((ms, ms + n)));
            }
            if blo <= lo {
                return Ok(None);
            }
            bhi = blo + overlap;
        }
    }

    /// Find a compiled pattern in `[lo, hi)`. `th` is the caller's thread
    /// scratch, sized for the largest program in play.
    pub fn find_regex_window(
        &mut self,
        lo: i64,
        hi: i64,
        prog: &Program,
        th: &mut Threads,
        dir: Dir,
    ) -> Result<Option<(i64, i64)>> {
        let lo = lo.max(0).min(self.size);
        let hi = hi.min(self.size).max(lo);
        let found = match dir {
            Dir::Fwd => self.regex_fwd(lo, hi, prog, th)?,
            Dir::Bwd => {
                // Rightmost match: enumerate non-overlapping matches with
                // repeated forward scans and keep the last winner.
                let mut winner = None;
                let mut from = lo;
                while from <= hi {
                    match self.regex_fwd(from, hi, prog, th)? {
                        None => break,
                        Some((ms, me)) => {
                            winner = Some((ms, me));
                            from = if me > ms { me } else { ms + 1 };
                        }
                    }
                }
                winner
            }
        };
        trace!(lo, hi, ?dir, pattern = prog.pattern.as_str(), ?found, "find_regex_window");
        Ok(found)
    }

    fn regex_fwd(
        &mut self,
        lo: i64,
        hi: i64,
        prog: &Program,
        th: &mut Threads,
    ) -> Result<Option<(i64, i64)>> {
        let mut ex = Exec::start(lo, hi, prog, th);
        let mut prev: Option<u8> = None;
        let mut pos = lo;
        while pos < hi {
            let want = ((hi - pos) as usize).min(FW_WIN);
            let got = self.fill(pos, want)?;
            if got == 0 {
                break;
            }
            for i in 0..got {
                let b = self.scratch[i];
                let bol = pos == lo || prev == Some(b'\n');
                if ex.feed(prog, th, pos, Some(b), bol) == Feed::Done {
                    return Ok(ex.best());
                }
                prev = Some(b);
                pos += 1;
            }
        }
        if pos == hi {
            let bol = pos == lo || prev == Some(b'\n');
            ex.feed(prog, th, pos, None, bol);
        }
        Ok(ex.best())
    }
}

#[cfg(test)]
mod tests {
    use super::Dir;
    use crate::SourceError;
    use crate::testutil::source;
    use core_regex::{Threads, compile};

    #[test]
    fn forward_returns_leftmost() {
        let mut s = source(b"one two one two");
        assert_eq!(s.find_window(0, 15, b"one", Dir::Fwd).unwrap(), Some((0, 3)));
        assert_eq!(s.find_window(1, 15, b"one", Dir::Fwd).unwrap(), Some((8, 11)));
    }

    #[test]
    fn backward_returns_rightmost() {
        let mut s = source(b"one two one two");
        assert_eq!(s.find_window(0, 15, b"one", Dir::Bwd).unwrap(), Some((8, 11)));
        assert_eq!(s.find_window(0, 10, b"one", Dir::Bwd).unwrap(), Some((0, 3)));
    }

    #[test]
    fn match_must_fit_in_window() {
        let mut s = source(b"abcdef");
        assert_eq!(s.find_window(0, 4, b"cde", Dir::Fwd).unwrap(), None);
        assert_eq!(s.find_window(0, 5, b"cde", Dir::Fwd).unwrap(), Some((2, 5)));
        assert_eq!(s.find_window(3, 6, b"abc", Dir::Bwd).unwrap(), None);
    }

    #[test]
    fn empty_needle_is_an_error() {
        let mut s = source(b"abc");
        assert!(matches!(
            s.find_window(0, 3, b"", Dir::Fwd),
            Err(SourceError::BadNeedle)
        ));
    }

    #[test]
    fn needle_with_nul_bytes() {
        let mut s = source(b"a\x00b\x00c");
        assert_eq!(s.find_window(0, 5, b"\x00b", Dir::Fwd).unwrap(), Some((1, 3)));
    }

    #[test]
    fn regex_forward_and_backward() {
        let mut s = source(b"a1 b22 c333");
        let prog = compile(r"[0-9]+").unwrap();
        let mut th = Threads::with_capacity(prog.nins());
        assert_eq!(
            s.find_regex_window(0, 11, &prog, &mut th, Dir::Fwd).unwrap(),
            Some((1, 2))
        );
        assert_eq!(
            s.find_regex_window(0, 11, &prog, &mut th, Dir::Bwd).unwrap(),
            Some((8, 11))
        );
        assert_eq!(
            s.find_regex_window(0, 7, &prog, &mut th, Dir::Bwd).unwrap(),
            Some((4, 6))
        );
    }

    #[test]
    fn regex_anchors_are_window_relative() {
        let mut s = source(b"abc\ndef");
        let prog = compile("^def$").unwrap();
        let mut th = Threads::with_capacity(prog.nins());
        assert_eq!(
            s.find_regex_window(0, 7, &prog, &mut th, Dir::Fwd).unwrap(),
            Some((4, 7))
        );
        let caret = compile("^c").unwrap();
        // 'c' is not at a line start in the file, but it is at the window
        // start.
        assert_eq!(
            s.find_regex_window(2, 7, &caret, &mut th, Dir::Fwd).unwrap(),
            Some((2, 3))
        );
    }

    #[test]
    fn regex_empty_window() {
        let mut s = source(b"abc");
        let prog = compile("x*").unwrap();
        let mut th = Threads::with_capacity(prog.nins());
        assert_eq!(
            s.find_regex_window(2, 2, &prog, &mut th, Dir::Fwd).unwrap(),
            Some((2, 2))
        );
    }
}
