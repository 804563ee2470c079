//! Byte source over an in-memory view of the file.

use std::sync::Arc;

use super::ByteSource;
use crate::error::{Error, Result};

/// Byte source over a shared in-memory region.
///
/// Every track gets an independent cursor into the same backing allocation,
/// so reads need no locking and random access is O(1).
#[derive(Debug, Clone)]
pub struct RegionByteSource<B> {
    data: Arc<B>,
    start: u64,
    len: u64,
    pos: u64,
    pushback: Option<u8>,
}

impl<B: AsRef<[u8]>> RegionByteSource<B> {
    /// View `[start, start + len)` of `data`, clamped to the backing length.
    pub fn new(data: Arc<B>, start: u64, len: u64) -> Self {
        // (*data) so this hits B's AsRef<[u8]>, not Arc's AsRef<B>.
        let available = ((*data).as_ref().len() as u64).saturating_sub(start);
        Self {
            data,
            start,
            len: len.min(available),
            pos: 0,
            pushback: None,
        }
    }

    /// Length of the viewed region in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn byte_at(&self, pos: u64) -> u8 {
        (*self.data).as_ref()[(self.start + pos) as usize]
    }
}

impl<B: AsRef<[u8]> + Send + Sync> ByteSource for RegionByteSource<B> {
    fn read(&mut self) -> Result<u8> {
        if let Some(byte) = self.pushback.take() {
            return Ok(byte);
        }
        self.read_fast()
    }

    #[inline]
    fn read_fast(&mut self) -> Result<u8> {
        if self.pos >= self.len {
            return Err(Error::EndOfRegion(self.pos));
        }
        let byte = self.byte_at(self.pos);
        self.pos += 1;
        Ok(byte)
    }

    fn push_back(&mut self, byte: u8) {
        self.pushback = Some(byte);
    }

    fn skip(&mut self, mut count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        if self.pushback.take().is_some() {
            count -= 1;
        }
        let remaining = self.len - self.pos;
        if count as u64 > remaining {
            self.pos = self.len;
            return Err(Error::EndOfRegion(self.len));
        }
        self.pos += count as u64;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = 0;
        self.pushback = None;
        Ok(())
    }

    fn location(&self) -> u64 {
        self.pos
    }
}

/// Byte source over a memory-mapped view of the file.
#[cfg(feature = "mmap")]
pub type MappedByteSource = RegionByteSource<memmap2::Mmap>;

#[cfg(feature = "mmap")]
impl MappedByteSource {
    /// Map `file` read-only for sharing across per-track sources.
    ///
    /// Safety of the mapping rests on the file staying untouched while
    /// mapped; the coordinator opens it read-only and keeps no writer.
    pub fn map_file(file: &std::fs::File) -> Result<Arc<memmap2::Mmap>> {
        let mmap = unsafe { memmap2::Mmap::map(file)? };
        Ok(Arc::new(mmap))
    }
}
