//! Range-bounded byte sources over one track's region of the file.
//!
//! Two implementations: [`BufferedByteSource`] drains one fixed-size buffer
//! while a background worker prefetches the next from a shared seekable
//! stream; [`RegionByteSource`] reads an in-memory view directly (the
//! memory-mapped path, no prefetch needed).

mod buffered;
mod region;

pub use buffered::BufferedByteSource;
#[cfg(feature = "mmap")]
pub use region::MappedByteSource;
pub use region::RegionByteSource;

use crate::error::Result;

/// Sequential access to one track's byte region `[start, start + len)`.
///
/// Exactly one byte of pushback is supported, used by running-status
/// handling: [`read`](ByteSource::read) and [`skip`](ByteSource::skip) honor
/// a pending pushback byte, [`read_fast`](ByteSource::read_fast) assumes the
/// caller knows none is pending.
pub trait ByteSource: Send {
    /// Read one byte, consuming a pending pushback byte first.
    fn read(&mut self) -> Result<u8>;

    /// Read one byte without checking for pushback.
    fn read_fast(&mut self) -> Result<u8>;

    /// Stash one byte of lookahead; the next [`read`](ByteSource::read)
    /// returns it.
    fn push_back(&mut self, byte: u8);

    /// Advance `count` bytes without surfacing them.
    fn skip(&mut self, count: usize) -> Result<()>;

    /// Rewind to the start of the region.
    fn reset(&mut self) -> Result<()>;

    /// Current offset from the start of the region.
    fn location(&self) -> u64;
}
