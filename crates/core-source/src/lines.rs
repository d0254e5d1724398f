//! Line boundaries and line stepping over the raw byte stream.
//!
//! Only `\n` terminates a line; `\r` is an ordinary byte. Single-boundary
//! queries (`line_start`, `line_end`) scan directly with `memchr`/`memrchr`
//! over large reads. Multi-line stepping walks 4 KiB subchunks and skips
//! whole subchunks using a bounded LRU index of per-subchunk LF counts, so
//! `take 100000l` does not re-scan every byte it crosses.

use memchr::{memchr, memchr_iter, memrchr, memrchr_iter};

use crate::{BK_BLK, FW_WIN, Result, Source};

/// Bytes covered by one index block.
pub const IDX_BLOCK: usize = 1 << 20;
/// Subchunks per block; LF counts are kept at this granularity.
pub const IDX_SUBCHUNKS: usize = 256;
/// Bytes per subchunk.
pub const IDX_SUB: usize = IDX_BLOCK / IDX_SUBCHUNKS;
/// Cached blocks; eviction is LRU by generation.
pub const IDX_MAX_BLOCKS: usize = 64;

struct IdxBlock {
    block_no: i64,
    r#gen: u64,
    counts: Box<[u16; IDX_SUBCHUNKS]>,
}

pub(crate) struct LineIndex {
    blocks: Vec<IdxBlock>,
    r#gen: u64,
}

impl LineIndex {
    pub(crate) fn new() -> LineIndex {
        LineIndex {
            blocks: Vec::with_capacity(IDX_MAX_BLOCKS),
            r#gen: 0,
        }
    }

    fn lookup(&mut self, block_no: i64, sub: usize) -> Option<u16> {
        self.r#gen += 1;
        let r#gen = self.r#gen;
        self.blocks.iter_mut().find(|b| b.block_no == block_no).map(|b| {
            b.r#gen = r#gen;
            b.counts[sub]
        })
    }

    fn insert(&mut self, block_no: i64, counts: Box<[u16; IDX_SUBCHUNKS]>) {
        self.r#gen += 1;
        if self.blocks.len() == IDX_MAX_BLOCKS
            && let Some(oldest) = self
                .blocks
                .iter()
                .enumerate()
                .min_by_key(|(_, b)| b.r#gen)
                .map(|(i, _)| i)
        {
            self.blocks.swap_remove(oldest);
        }
        self.blocks.push(IdxBlock {
            block_no,
            r#gen: self.r#gen,
            counts,
        });
    }

    /// Drop every block at or past `pos`; the file changed size there.
    pub(crate) fn invalidate_from(&mut self, pos: i64) {
        let first_stale = pos / IDX_BLOCK as i64;
        self.blocks.retain(|b| b.block_no < first_stale);
    }
}

impl Source {
    /// First byte of the line containing `pos`: 0 at the top of the file,
    /// otherwise one past the last `\n` before `pos`.
    pub fn line_start(&mut self, pos: i64) -> Result<i64> {
        self.check_pos(pos)?;
        if pos == 0 {
            return Ok(0);
        }
        Ok(match self.nth_lf_back(pos, 1)? {
            Some(lf) => lf + 1,
            None => 0,
        })
    }

    /// One past the next `\n` at or after `pos`, or `size` if none.
    pub fn line_end(&mut self, pos: i64) -> Result<i64> {
        self.check_pos(pos)?;
        Ok(match self.nth_lf_fwd(pos, 1)? {
            Some(lf) => lf + 1,
            None => self.size,
        })
    }

    /// Move through `delta` line boundaries. Positive deltas advance past
    /// `delta` line ends; negative deltas retreat through `|delta|` line
    /// starts (snapping to the current line start counts as one). Saturates
    /// at the file bounds.
    pub fn step_lines(&mut self, pos: i64, delta: i64) -> Result<i64> {
        self.check_pos(pos)?;
        if delta == 0 {
            return Ok(pos);
        }
        if delta > 0 {
            return Ok(match self.nth_lf_fwd(pos, delta)? {
                Some(lf) => lf + 1,
                None => self.size,
            });
        }
        if pos == 0 {
            return Ok(0);
        }
        let at_line_start = self.byte_at(pos - 1)? == Some(b'\n');
        // Retreating from a line start must cross one more LF than the
        // number of requested steps; snapping supplies the first step
        // otherwise.
        let crossings = match delta.checked_neg() {
            Some(k) if !at_line_start => k,
            Some(k) => k + 1,
            None => i64::MAX,
        };
        Ok(match self.nth_lf_back(pos, crossings)? {
            Some(lf) => lf + 1,
            None => 0,
        })
    }

    /// Position of the `m`-th `\n` at or after `from`, if any.
    fn nth_lf_fwd(&mut self, from: i64, m: i64) -> Result<Option<i64>> {
        debug_assert!(m >= 1);
        if m == 1 {
            let mut pos = from;
            while pos < self.size {
                let got = self.fill(pos, FW_WIN)?;
                if got == 0 {
                    break;
                }
                if let Some(i) = memchr(b'\n', &self.scratch[..got]) {
                    return Ok(Some(pos + i as i64));
                }
                pos += got as i64;
            }
            return Ok(None);
        }
        let mut remaining = m;
        let mut pos = from;
        while pos < self.size {
            let sub_lo = pos / IDX_SUB as i64 * IDX_SUB as i64;
            let sub_hi = (sub_lo + IDX_SUB as i64).min(self.size);
            if pos == sub_lo && sub_hi - sub_lo == IDX_SUB as i64 {
                let cnt = self.sub_count(sub_lo)? as i64;
                if cnt < remaining {
                    remaining -= cnt;
                    pos = sub_hi;
                    continue;
                }
            }
            let got = self.fill(pos, (sub_hi - pos) as usize)?;
            for i in memchr_iter(b'\n', &self.scratch[..got]) {
                remaining -= 1;
                if remaining == 0 {
                    return Ok(Some(pos + i as i64));
                }
            }
            pos = sub_hi;
        }
        Ok(None)
    }

    /// Position of the `m`-th `\n` strictly before `from`, counting from the
    /// right, if any.
    fn nth_lf_back(&mut self, from: i64, m: i64) -> Result<Option<i64>> {
        debug_assert!(m >= 1);
        if m == 1 {
            let mut hi = from;
            while hi > 0 {
                let lo = (hi - BK_BLK as i64).max(0);
                let got = self.fill(lo, (hi - lo) as usize)?;
                if let Some(i) = memrchr(b'\n', &self.scratch[..got]) {
                    return Ok(Some(lo + i as i64));
                }
                hi = lo;
            }
            return Ok(None);
        }
        let mut remaining = m;
        let mut hi = from;
        while hi > 0 {
            let sub_lo = (hi - 1) / IDX_SUB as i64 * IDX_SUB as i64;
            if hi == sub_lo + IDX_SUB as i64 {
                let cnt = self.sub_count(sub_lo)? as i64;
                if cnt < remaining {
                    remaining -= cnt;
                    hi = sub_lo;
                    continue;
                }
            }
            let got = self.fill(sub_lo, (hi - sub_lo) as usize)?;
            for i in memrchr_iter(b'\n', &self.scratch[..got]) {
                remaining -= 1;
                if remaining == 0 {
                    return Ok(Some(sub_lo + i as i64));
                }
            }
            hi = sub_lo;
        }
        Ok(None)
    }

    /// LF count of the subchunk starting at `sub_lo`, building the owning
    /// index block on a miss (one read of the whole block).
    fn sub_count(&mut self, sub_lo: i64) -> Result<u16> {
        let block_no = sub_lo / IDX_BLOCK as i64;
        let sub = (sub_lo % IDX_BLOCK as i64) as usize / IDX_SUB;
        if let Some(cnt) = self.index.lookup(block_no, sub) {
            return Ok(cnt);
        }
        let base = block_no * IDX_BLOCK as i64;
        let got = self.fill(base, IDX_BLOCK)?;
        let mut counts = Box::new([0u16; IDX_SUBCHUNKS]);
        for i in memchr_iter(b'\n', &self.scratch[..got]) {
            counts[i / IDX_SUB] += 1;
        }
        let cnt = counts[sub];
        self.index.insert(block_no, counts);
        Ok(cnt)
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::source;

    #[test]
    fn line_start_cases() {
        let mut s = source(b"abc\ndef\nghi");
        assert_eq!(s.line_start(0).unwrap(), 0);
        assert_eq!(s.line_start(2).unwrap(), 0);
        assert_eq!(s.line_start(3).unwrap(), 0);
        assert_eq!(s.line_start(4).unwrap(), 4);
        assert_eq!(s.line_start(7).unwrap(), 4);
        assert_eq!(s.line_start(8).unwrap(), 8);
        assert_eq!(s.line_start(11).unwrap(), 8);
        assert!(s.line_start(12).is_err());
    }

    #[test]
    fn line_end_cases() {
        let mut s = source(b"abc\ndef\nghi");
        assert_eq!(s.line_end(0).unwrap(), 4);
        assert_eq!(s.line_end(3).unwrap(), 4);
        assert_eq!(s.line_end(4).unwrap(), 8);
        assert_eq!(s.line_end(8).unwrap(), 11);
        assert_eq!(s.line_end(11).unwrap(), 11);
    }

    #[test]
    fn step_lines_forward_saturates() {
        let mut s = source(b"abc\ndef\nghi");
        assert_eq!(s.step_lines(0, 1).unwrap(), 4);
        assert_eq!(s.step_lines(0, 2).unwrap(), 8);
        assert_eq!(s.step_lines(1, 1).unwrap(), 4);
        assert_eq!(s.step_lines(0, 3).unwrap(), 11);
        assert_eq!(s.step_lines(0, 50).unwrap(), 11);
    }

    #[test]
    fn step_lines_backward_counts_snap_as_one() {
        let mut s = source(b"abc\ndef\nghi");
        // Mid-line: the first step snaps to the line start.
        assert_eq!(s.step_lines(9, -1).unwrap(), 8);
        assert_eq!(s.step_lines(9, -2).unwrap(), 4);
        // At a line start: one step reaches the previous line's start.
        assert_eq!(s.step_lines(8, -1).unwrap(), 4);
        assert_eq!(s.step_lines(8, -2).unwrap(), 0);
        assert_eq!(s.step_lines(4, -2).unwrap(), 0);
        assert_eq!(s.step_lines(0, -1).unwrap(), 0);
    }

    #[test]
    fn no_trailing_newline() {
        let mut s = source(b"one\ntwo");
        assert_eq!(s.line_end(4).unwrap(), 7);
        assert_eq!(s.step_lines(0, 2).unwrap(), 7);
        assert_eq!(s.step_lines(7, -1).unwrap(), 4);
    }

    #[test]
    fn stepping_uses_subchunk_counts_across_blocks() {
        // 10_000 two-byte lines span several 4 KiB subchunks.
        let data: Vec<u8> = b"x\n".repeat(10_000);
        let mut s = source(&data);
        assert_eq!(s.step_lines(0, 5_000).unwrap(), 10_000);
        assert_eq!(s.step_lines(0, 10_000).unwrap(), 20_000);
        assert_eq!(s.step_lines(0, 10_001).unwrap(), 20_000);
        assert_eq!(s.step_lines(20_000, -5_000).unwrap(), 10_000);
        // Second pass hits the cached index.
        assert_eq!(s.step_lines(0, 5_000).unwrap(), 10_000);
    }

    #[test]
    fn crlf_is_not_special() {
        let mut s = source(b"a\r\nb");
        assert_eq!(s.line_end(0).unwrap(), 3);
        assert_eq!(s.line_start(3).unwrap(), 3);
    }
}
