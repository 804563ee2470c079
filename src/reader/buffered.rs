//! Double-buffered prefetching byte source over a shared seekable stream.

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use super::ByteSource;
use crate::error::{Error, Result};

struct FillRequest {
    offset: u64,
    buf: Vec<u8>,
}

struct Filled {
    offset: u64,
    valid: usize,
    buf: Vec<u8>,
}

/// Byte source that drains one fixed-size buffer while a background worker
/// fills the other from the underlying stream.
///
/// All sources over the same physical stream share an `Arc<Mutex<R>>`; each
/// positioned read (seek + read loop) happens under that lock, since one
/// handle serves every track's region. Buffer swaps move the `Vec`s through
/// a pair of bounded channels, so no bytes are copied on swap and exactly one
/// fill is in flight at a time.
pub struct BufferedByteSource {
    len: u64,
    capacity: usize,
    buf: Vec<u8>,
    buf_pos: usize,
    buf_valid: usize,
    /// Region offset the current buffer starts at.
    region_pos: u64,
    /// Region offset the next fill should start at.
    next_fill: u64,
    fill_pending: bool,
    /// Idle second buffer once the region is fully scheduled.
    spare: Option<Vec<u8>>,
    pushback: Option<u8>,
    req_tx: Option<Sender<FillRequest>>,
    res_rx: Receiver<Filled>,
    worker: Option<JoinHandle<()>>,
}

impl BufferedByteSource {
    /// Prefetching source over `[start, start + len)` of the shared stream.
    pub fn new<R>(stream: Arc<Mutex<R>>, start: u64, len: u64, buffer_size: usize) -> Result<Self>
    where
        R: Read + Seek + Send + 'static,
    {
        let capacity = buffer_size.max(1).min(len.max(1) as usize);
        let (req_tx, req_rx) = bounded::<FillRequest>(1);
        let (res_tx, res_rx) = bounded::<Filled>(1);
        let worker = thread::Builder::new()
            .name("smf-prefetch".into())
            .spawn(move || fill_worker(stream, start, len, req_rx, res_tx))?;

        let mut source = Self {
            len,
            capacity,
            buf: vec![0; capacity],
            buf_pos: 0,
            buf_valid: 0,
            region_pos: 0,
            next_fill: 0,
            fill_pending: false,
            spare: None,
            pushback: None,
            req_tx: Some(req_tx),
            res_rx,
            worker: Some(worker),
        };
        // Kick off the first fill; the empty live buffer forces a swap on the
        // first read.
        source.schedule_fill(vec![0; capacity]);
        Ok(source)
    }

    fn schedule_fill(&mut self, buf: Vec<u8>) {
        if self.next_fill >= self.len {
            self.spare = Some(buf);
            return;
        }
        let offset = self.next_fill;
        self.next_fill = offset + self.capacity as u64;
        if let Some(tx) = &self.req_tx {
            if tx.send(FillRequest { offset, buf }).is_ok() {
                self.fill_pending = true;
            }
        }
    }

    /// Block until the in-flight fill lands, swap it in, and schedule the
    /// next one with the drained buffer.
    fn swap_in(&mut self) -> Result<()> {
        if !self.fill_pending {
            return Err(Error::EndOfRegion(self.location()));
        }
        let filled = self.res_rx.recv().map_err(|_| Error::PrefetchGone)?;
        self.fill_pending = false;
        if filled.valid == 0 {
            self.spare = Some(filled.buf);
            return Err(Error::EndOfRegion(self.location()));
        }
        let drained = std::mem::replace(&mut self.buf, filled.buf);
        self.region_pos = filled.offset;
        self.buf_pos = 0;
        self.buf_valid = filled.valid;
        self.schedule_fill(drained);
        Ok(())
    }

    /// Reclaim both buffers from the worker side.
    fn reclaim(&mut self) -> Result<Vec<u8>> {
        if self.fill_pending {
            let filled = self.res_rx.recv().map_err(|_| Error::PrefetchGone)?;
            self.fill_pending = false;
            Ok(filled.buf)
        } else {
            self.spare.take().ok_or(Error::PrefetchGone)
        }
    }
}

impl ByteSource for BufferedByteSource {
    fn read(&mut self) -> Result<u8> {
        if let Some(byte) = self.pushback.take() {
            return Ok(byte);
        }
        self.read_fast()
    }

    #[inline]
    fn read_fast(&mut self) -> Result<u8> {
        if self.buf_pos >= self.buf_valid {
            self.swap_in()?;
        }
        let byte = self.buf[self.buf_pos];
        self.buf_pos += 1;
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
        loop {
            let remaining = self.buf_valid - self.buf_pos;
            if count <= remaining {
                self.buf_pos += count;
                return Ok(());
            }
            let target = self.location() + count as u64;
            // A skip ending inside the in-flight fill drains into it; a
            // longer one repositions the next fill so the skipped bytes are
            // never read from the stream.
            if self.fill_pending && target < self.next_fill {
                count -= remaining;
                self.buf_pos = self.buf_valid;
                self.swap_in()?;
                continue;
            }
            let spare = self.reclaim()?;
            self.buf_pos = 0;
            self.buf_valid = 0;
            self.region_pos = target.min(self.len);
            self.next_fill = self.region_pos;
            self.schedule_fill(spare);
            return if target > self.len {
                Err(Error::EndOfRegion(self.len))
            } else {
                Ok(())
            };
        }
    }

    fn reset(&mut self) -> Result<()> {
        let buf = self.reclaim()?;
        self.region_pos = 0;
        self.next_fill = 0;
        self.buf_pos = 0;
        self.buf_valid = 0;
        self.pushback = None;
        self.schedule_fill(buf);
        Ok(())
    }

    fn location(&self) -> u64 {
        self.region_pos + self.buf_pos as u64
    }
}

impl Drop for BufferedByteSource {
    fn drop(&mut self) {
        if self.fill_pending {
            let _ = self.res_rx.recv();
        }
        // Closing the request channel retires the worker.
        self.req_tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn fill_worker<R: Read + Seek>(
    stream: Arc<Mutex<R>>,
    start: u64,
    len: u64,
    req_rx: Receiver<FillRequest>,
    res_tx: Sender<Filled>,
) {
    while let Ok(FillRequest { offset, mut buf }) = req_rx.recv() {
        let want = buf.len().min((len - offset) as usize);
        let valid = {
            let mut stream = stream.lock();
            read_at(&mut *stream, start + offset, &mut buf[..want]).unwrap_or(0)
        };
        if res_tx.send(Filled { offset, valid, buf }).is_err() {
            break;
        }
    }
}

fn read_at<R: Read + Seek>(stream: &mut R, pos: u64, buf: &mut [u8]) -> std::io::Result<usize> {
    stream.seek(SeekFrom::Start(pos))?;
    let mut total = 0;
    while total < buf.len() {
        let read = stream.read(&mut buf[total..])?;
        if read == 0 {
            break;
        }
        total += read;
    }
    Ok(total)
}
