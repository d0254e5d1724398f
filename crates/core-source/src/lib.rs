//! Random-access byte source for the extraction engine.
//!
//! A [`Source`] wraps a regular file (or stdin spooled to an anonymous temp
//! file) and presents the primitives the engine resolves locations with:
//! cached size, range emission into a sink, line boundaries, UTF-8 codepoint
//! stepping, and windowed byte/regex search. All reads go through one
//! reusable scratch buffer sized `max(FW_WIN, BK_BLK + OVERLAP_MAX)`; the
//! source never allocates per call.
//!
//! Reads are clamped to `[0, size)`; a read outside that range yields zero
//! bytes rather than an error. Position arguments to the line/char routines
//! must lie in `[0, size]` and fail with [`SourceError::OutOfBounds`]
//! otherwise.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;

mod chars;
mod lines;
mod search;

pub use lines::{IDX_BLOCK, IDX_MAX_BLOCKS, IDX_SUB, IDX_SUBCHUNKS};
pub use search::Dir;

use lines::LineIndex;

/// Forward search / streaming read window.
pub const FW_WIN: usize = 8 << 20;
/// Backward search block size.
pub const BK_BLK: usize = 4 << 20;
/// Bounds for the backward-search block overlap (`clamp(n - 1, MIN, MAX)`).
pub const OVERLAP_MIN: usize = 4 << 10;
pub const OVERLAP_MAX: usize = 64 << 10;

#[derive(Debug, Error)]
pub enum SourceError {
    /// Empty needle handed to a byte search.
    #[error("empty search needle")]
    BadNeedle,
    /// A position argument outside `[0, size]`.
    #[error("position {pos} outside [0, {size}]")]
    OutOfBounds { pos: i64, size: i64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SourceError>;

/// Read-only random-access byte source with a cached logical size.
pub struct Source {
    file: File,
    size: i64,
    scratch: Vec<u8>,
    index: LineIndex,
}

impl Source {
    /// Open a file on disk.
    pub fn open(path: &Path) -> Result<Source> {
        let file = File::open(path)?;
        let size = file.metadata()?.len() as i64;
        Ok(Source::new(file, size))
    }

    /// Spool stdin to an anonymous temp file so the program gets the same
    /// random-access contract a regular file has.
    pub fn from_stdin() -> Result<Source> {
        let mut spool = tempfile::tempfile()?;
        let copied = io::copy(&mut io::stdin().lock(), &mut spool)?;
        tracing::debug!(bytes = copied, "stdin spooled");
        Ok(Source::new(spool, copied as i64))
    }

    fn new(file: File, size: i64) -> Source {
        Source {
            file,
            size,
            scratch: vec![0; FW_WIN.max(BK_BLK + OVERLAP_MAX)],
            index: LineIndex::new(),
        }
    }

    /// Cached logical size in bytes.
    pub fn size(&self) -> i64 {
        self.size
    }

    /// Re-stat the backing file. Index blocks that could disagree with the
    /// new size are dropped.
    pub fn refresh_size(&mut self) -> Result<()> {
        let new = self.file.metadata()?.len() as i64;
        if new != self.size {
            self.index.invalidate_from(self.size.min(new));
            self.size = new;
        }
        Ok(())
    }

    /// Read up to `len` bytes at `pos` into the scratch buffer, clamped to
    /// `[0, size)`. Returns the byte count; the data sits in
    /// `self.scratch[..n]`.
    pub(crate) fn fill(&mut self, pos: i64, len: usize) -> Result<usize> {
        if pos < 0 || pos >= self.size || len == 0 {
            return Ok(0);
        }
        let want = len.min((self.size - pos) as usize).min(self.scratch.len());
        self.file.seek(SeekFrom::Start(pos as u64))?;
        let mut got = 0;
        while got < want {
            match self.file.read(&mut self.scratch[got..want]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(got)
    }

    /// Single byte at `pos`, or `None` outside `[0, size)`.
    pub(crate) fn byte_at(&mut self, pos: i64) -> Result<Option<u8>> {
        if self.fill(pos, 1)? == 0 {
            Ok(None)
        } else {
            Ok(Some(self.scratch[0]))
        }
    }

    /// Write bytes `[start, end)` to `sink`. `start >= end` is a no-op.
    pub fn emit(&mut self, start: i64, end: i64, sink: &mut dyn Write) -> Result<()> {
        let mut pos = start.max(0);
        let end = end.min(self.size);
        while pos < end {
            let want = ((end - pos) as usize).min(FW_WIN);
            let got = self.fill(pos, want)?;
            if got == 0 {
                break;
            }
            sink.write_all(&self.scratch[..got])?;
            pos += got as i64;
        }
        Ok(())
    }

    pub(crate) fn check_pos(&self, pos: i64) -> Result<()> {
        if pos < 0 || pos > self.size {
            return Err(SourceError::OutOfBounds {
                pos,
                size: self.size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::io::Write as _;

    /// Build a `Source` over literal bytes via a temp file.
    pub fn source(bytes: &[u8]) -> Source {
        let mut f = tempfile::tempfile().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        Source::new(f, bytes.len() as i64)
    }
}
